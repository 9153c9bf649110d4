//! ROOT-style labels (`m_{#tau#tau}`, `fb^{-1}`, `t#bar{t}`) to SVG text.
//!
//! Widths are estimated from Helvetica-like advance classes; no font files
//! are read.

use std::fmt::Write as FmtWrite;

use crate::primitives::{FontWeight, TextStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Normal,
    Sub,
    Sup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub shift: Shift,
}

#[derive(Debug, Clone, Copy)]
pub struct TextMetrics {
    pub width: f64,
    pub height: f64,
}

const SCRIPT_SCALE: f64 = 0.7;

fn symbol(name: &str) -> Option<&'static str> {
    Some(match name {
        "alpha" => "α",
        "beta" => "β",
        "gamma" => "γ",
        "Delta" => "Δ",
        "delta" => "δ",
        "eta" => "η",
        "ell" => "ℓ",
        "mu" => "μ",
        "nu" => "ν",
        "pi" => "π",
        "phi" => "φ",
        "rho" => "ρ",
        "sigma" => "σ",
        "tau" => "τ",
        "chi" => "χ",
        "rightarrow" | "to" => "→",
        "pm" => "±",
        "times" => "×",
        "leq" => "≤",
        "geq" => "≥",
        "infty" => "∞",
        "sqrt" => "√",
        _ => return None,
    })
}

/// Read `{...}` (nesting allowed) or a single character after `_` / `^`.
fn group(chars: &[char], i: &mut usize) -> String {
    if chars.get(*i) == Some(&'{') {
        let mut depth = 0usize;
        let start = *i + 1;
        while *i < chars.len() {
            match chars[*i] {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        let s: String = chars[start..*i].iter().collect();
                        *i += 1;
                        return s;
                    }
                }
                _ => {}
            }
            *i += 1;
        }
        chars[start.min(chars.len())..].iter().collect()
    } else if let Some(&c) = chars.get(*i) {
        *i += 1;
        c.to_string()
    } else {
        String::new()
    }
}

fn plain(s: &str, out: &mut String) {
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '#' | '\\' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && chars[j].is_ascii_alphabetic() {
                    j += 1;
                }
                let name: String = chars[start..j].iter().collect();
                i = j;
                if name == "bar" || name == "overline" {
                    let inner = group(&chars, &mut i);
                    let mut buf = String::new();
                    plain(&inner, &mut buf);
                    for c in buf.chars() {
                        out.push(c);
                        out.push('\u{0304}');
                    }
                } else if let Some(sym) = symbol(&name) {
                    out.push_str(sym);
                } else {
                    out.push_str(&name);
                }
            }
            '{' | '}' => i += 1,
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
}

/// Split a label into runs of normal, subscript and superscript text.
pub fn spans(label: &str) -> Vec<Span> {
    let chars: Vec<char> = label.chars().collect();
    let mut out: Vec<Span> = Vec::new();
    let mut normal = String::new();
    let mut i = 0;
    while i < chars.len() {
        let shift = match chars[i] {
            '_' => Shift::Sub,
            '^' => Shift::Sup,
            _ => {
                let start = i;
                while i < chars.len() && chars[i] != '_' && chars[i] != '^' {
                    i += 1;
                }
                normal.extend(&chars[start..i]);
                continue;
            }
        };
        i += 1;
        let inner = group(&chars, &mut i);
        if !normal.is_empty() {
            let mut text = String::new();
            plain(&normal, &mut text);
            out.push(Span { text, shift: Shift::Normal });
            normal.clear();
        }
        let mut text = String::new();
        plain(&inner, &mut text);
        out.push(Span { text, shift });
    }
    if !normal.is_empty() {
        let mut text = String::new();
        plain(&normal, &mut text);
        out.push(Span { text, shift: Shift::Normal });
    }
    out
}

fn advance(c: char) -> f64 {
    match c {
        '\u{0300}'..='\u{036f}' => 0.0,
        'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '|' | '!' => 0.24,
        'f' | 't' | 'r' | 'I' | '(' | ')' | '[' | ']' | ' ' | '/' | '-' => 0.33,
        'm' | 'w' | 'M' | 'W' => 0.83,
        '0'..='9' => 0.556,
        c if c.is_ascii_uppercase() => 0.67,
        _ => 0.52,
    }
}

/// Estimated width of a label set in `style`.
pub fn measure(label: &str, style: &TextStyle) -> TextMetrics {
    let bold = if style.weight == FontWeight::Bold { 1.06 } else { 1.0 };
    let width = spans(label)
        .iter()
        .map(|s| {
            let scale = if s.shift == Shift::Normal { 1.0 } else { SCRIPT_SCALE };
            s.text.chars().map(advance).sum::<f64>() * scale
        })
        .sum::<f64>()
        * style.size
        * bold;
    TextMetrics { width, height: style.size * 1.2 }
}

pub fn escape_xml(s: &str, out: &mut String) {
    for ch in s.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

/// SVG text content: escaped runs, scripts as shifted `<tspan>`s.
pub fn to_svg_content(label: &str) -> String {
    let mut out = String::new();
    for span in spans(label) {
        match span.shift {
            Shift::Normal => escape_xml(&span.text, &mut out),
            Shift::Sub | Shift::Sup => {
                let shift = if span.shift == Shift::Sub { "sub" } else { "super" };
                let _ = write!(out, r#"<tspan baseline-shift="{shift}" font-size="70%">"#);
                escape_xml(&span.text, &mut out);
                out.push_str("</tspan>");
            }
        }
    }
    out
}
