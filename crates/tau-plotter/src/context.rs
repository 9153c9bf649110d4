//! Pattern-keyed overrides that depend on the selection or channel.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Table of values keyed by patterns, with a default.
///
/// Keys are tried longest first; a key matches a probe string if it is equal
/// to it or, read as a regex, is found in it. Keys that are not valid regexes
/// only match by equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context<T> {
    entries: Vec<(String, T)>,
    default: Option<T>,
}

impl<T> Default for Context<T> {
    fn default() -> Self {
        Self { entries: Vec::new(), default: None }
    }
}

impl<T: Clone> Context<T> {
    /// Build from `(pattern, value)` pairs.
    pub fn new(entries: impl IntoIterator<Item = (String, T)>, default: Option<T>) -> Self {
        let mut entries: Vec<(String, T)> = entries.into_iter().collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries, default }
    }

    /// Whether there are no overrides.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Default value.
    pub fn default_value(&self) -> Option<&T> {
        self.default.as_ref()
    }

    fn lookup(&self, probe: &str) -> Option<&T> {
        self.entries.iter().find_map(|(key, value)| {
            let hit = key == probe || Regex::new(key).map(|re| re.is_match(probe)).unwrap_or(false);
            hit.then_some(value)
        })
    }

    /// Value for the first probe that matches any key, else the default.
    pub fn get_any(&self, probes: &[&str]) -> Option<&T> {
        probes.iter().find_map(|p| self.lookup(p)).or(self.default.as_ref())
    }

    /// Value for a single probe, else the default.
    pub fn get(&self, probe: &str) -> Option<&T> {
        self.get_any(&[probe])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> Context<&'static str> {
        Context::new(
            [("iso".to_string(), "short"), (r"iso_1<0\.15".to_string(), "long")],
            Some("default"),
        )
    }

    #[test]
    fn longest_key_wins() {
        assert_eq!(ctx().get("q_1*q_2<0 && iso_1<0.15"), Some(&"long"));
        assert_eq!(ctx().get("iso_2<0.2"), Some(&"short"));
    }

    #[test]
    fn falls_back_to_default() {
        assert_eq!(ctx().get("pt_1>50"), Some(&"default"));
        let empty: Context<i32> = Context::default();
        assert_eq!(empty.get("x"), None);
    }

    #[test]
    fn first_matching_probe() {
        let c = Context::new([("mutau".to_string(), 1)], None);
        assert_eq!(c.get_any(&["pt_1>50", "mutau"]), Some(&1));
        assert_eq!(c.get_any(&["pt_1>50", "etau"]), None);
    }

    #[test]
    fn invalid_regex_matches_by_equality() {
        let c = Context::new([("m_vis(".to_string(), 7)], None);
        assert_eq!(c.get("m_vis("), Some(&7));
        assert_eq!(c.get("m_vis(x"), None);
    }
}
