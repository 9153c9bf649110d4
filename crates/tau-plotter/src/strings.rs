//! String helpers for histogram names, file names and cut rewriting.

use std::sync::OnceLock;

use regex::Regex;

/// Join labels with `_` and replace characters that are awkward in names.
pub fn make_hist_name(labels: &[&str]) -> String {
    labels
        .iter()
        .map(|s| s.trim_matches('_'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .replace('+', "-")
        .replace(" - ", "-")
        .replace('.', "p")
        .replace(',', "-")
        .replace(' ', "_")
        .replace(['(', ')', '[', ']'], "-")
        .replace("||", "OR")
        .replace("&&", "AND")
        .replace('/', "_")
        .replace('<', "lt")
        .replace('>', "gt")
        .replace('=', "e")
        .replace('*', "x")
}

/// Make a string safe to use as a file name.
pub fn make_filename(s: &str) -> String {
    static DECIMAL_RE: OnceLock<Regex> = OnceLock::new();
    static ABS_RE: OnceLock<Regex> = OnceLock::new();
    let decimal = DECIMAL_RE.get_or_init(|| Regex::new(r"(\d+)\.(\d+)").expect("valid regex"));
    let abs = ABS_RE.get_or_init(|| Regex::new(r"abs\(([^)]*)\)").expect("valid regex"));

    let mut f = decimal.replace_all(s, "${1}p${2}").into_owned();
    if f.contains("abs(") {
        f = abs.replace_all(&f, "$1").into_owned();
    }
    f.replace(" and ", "-")
        .replace([',', '+', ':'], "-")
        .replace(['(', ')', '{', '}', '|', '&', '#'], "")
        .replace('!', "not")
        .replace(">=", "geq")
        .replace("<=", "leq")
        .replace('>', "gt")
        .replace('<', "lt")
        .replace('=', "eq")
        .replace(' ', "")
        .replace("GeV", "")
        .replace("anti-iso", "antiIso")
        .replace('/', "_")
}

/// AND-combine cuts, skipping empty ones. Cuts with a top-level `||` are parenthesized.
pub fn join_cuts(cuts: &[&str]) -> String {
    cuts.iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(|c| if c.contains("||") && !is_wrapped(c) { format!("({c})") } else { c.to_string() })
        .collect::<Vec<_>>()
        .join(" && ")
}

/// Cut string multiplied by a weight: `(cuts)*weight`.
pub fn join_cuts_weighted(cuts: &[&str], weight: &str) -> String {
    let cut = join_cuts(cuts);
    let weight = weight.trim();
    if weight.is_empty() {
        return cut;
    }
    let weight = if has_top_level_operator(weight) { format!("({weight})") } else { weight.to_string() };
    if cut.is_empty() { weight } else { format!("({cut})*{weight}") }
}

/// Multiply weight expressions, skipping empty ones.
pub fn join_weights(weights: &[&str]) -> String {
    weights
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .map(|w| if has_top_level_operator(w) { format!("({w})") } else { w.to_string() })
        .collect::<Vec<_>>()
        .join("*")
        .replace("*/", "/")
}

fn is_wrapped(s: &str) -> bool {
    if !(s.starts_with('(') && s.ends_with(')')) {
        return false;
    }
    let mut depth = 0i32;
    for (i, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i + 1 < s.len() {
                    return false;
                }
            }
            _ => {}
        }
    }
    true
}

fn has_top_level_operator(s: &str) -> bool {
    let mut depth = 0i32;
    for ch in s.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            '+' | '-' | '=' | '<' | '>' | '&' | '|' | '?' if depth == 0 => return true,
            _ => {}
        }
    }
    false
}

/// Target charge requirement for [`invert_charge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charge {
    /// Opposite sign, `q_1*q_2<0`.
    OS,
    /// Same sign, `q_1*q_2>0`.
    SS,
    /// No charge requirement.
    Any,
}

fn charge_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"q_[12]\s*\*\s*q_[12]\s*([<>])\s*0").expect("valid regex"))
}

/// Replace the charge-sign requirement of a cut (OS ↔ SS, or remove it).
pub fn invert_charge(cuts: &str, target: Charge) -> String {
    let cuts = cuts.trim();
    if cuts.is_empty() {
        return match target {
            Charge::OS => "q_1*q_2<0".into(),
            Charge::SS => "q_1*q_2>0".into(),
            Charge::Any => String::new(),
        };
    }
    let re = charge_regex();
    let n = re.find_iter(cuts).count();
    if n > 1 {
        log::warn!("invert_charge: {n} charge requirements in {cuts:?}");
    }
    let replacement = match target {
        Charge::OS => "q_1*q_2<0",
        Charge::SS => "q_1*q_2>0",
        Charge::Any => "",
    };
    clean_bool(&re.replace_all(cuts, replacement))
}

/// Remove dangling boolean operators and empty parentheses left by rewrites.
pub fn clean_bool(s: &str) -> String {
    static DOUBLE_RE: OnceLock<Regex> = OnceLock::new();
    static EMPTY_PAREN_RE: OnceLock<Regex> = OnceLock::new();
    static EDGE_RE: OnceLock<Regex> = OnceLock::new();
    let double =
        DOUBLE_RE.get_or_init(|| Regex::new(r"(?:&&|\|\|)\s*(?:&&|\|\|)").expect("valid regex"));
    let empty = EMPTY_PAREN_RE.get_or_init(|| Regex::new(r"\(\s*\)").expect("valid regex"));
    let edge = EDGE_RE
        .get_or_init(|| Regex::new(r"^\s*(?:&&|\|\|)\s*|\s*(?:&&|\|\|)\s*$").expect("valid regex"));

    let mut out = s.to_string();
    loop {
        let next = empty.replace_all(&out, "").into_owned();
        let next = double.replace_all(&next, "&&").into_owned();
        let next = edge.replace_all(&next, "").into_owned();
        if next == out {
            break;
        }
        out = next;
    }
    out.trim().to_string()
}

/// Strip systematic-shift suffixes like `_jecUp` or `_tesDown`.
pub fn undo_shift(s: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"_[a-zA-Z]+(?:Up|Down|nom)").expect("valid regex"));
    re.replace_all(s, "").into_owned()
}

/// Anchored shell-style match supporting `*`, `?` and `[...]`.
pub fn glob_match(pattern: &str, s: &str) -> bool {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    let mut in_class = false;
    for ch in pattern.chars() {
        match ch {
            '*' if !in_class => re.push_str(".*"),
            '?' if !in_class => re.push('.'),
            '[' if !in_class => {
                in_class = true;
                re.push('[');
            }
            ']' if in_class => {
                in_class = false;
                re.push(']');
            }
            c if in_class => re.push(c),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map(|r| r.is_match(s)).unwrap_or(pattern == s)
}

/// Format a number for a cut string, dropping float noise below 1e-9.
pub fn fmt_num(x: f64) -> String {
    let r = (x * 1e9).round() / 1e9;
    if r == 0.0 { "0".into() } else { format!("{r}") }
}
