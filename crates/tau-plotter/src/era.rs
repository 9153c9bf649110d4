//! Era table and the explicit analysis context.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use regex::Regex;

use crate::{Error, Result};

/// Luminosity and centre-of-mass energy of one data-taking period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EraInfo {
    /// Integrated luminosity in fb⁻¹.
    pub lumi: f64,
    /// Centre-of-mass energy in TeV.
    pub cme: f64,
}

const ERAS: &[(&str, f64, f64)] = &[
    ("7", 5.1, 7.0),
    ("8", 19.7, 8.0),
    ("2012", 19.7, 8.0),
    ("2016", 35.9, 13.0),
    ("2017", 41.5, 13.0),
    ("2018", 59.7, 13.0),
    ("UL2016_preVFP", 19.5, 13.0),
    ("UL2016_postVFP", 16.8, 13.0),
    ("UL2017", 41.5, 13.0),
    ("UL2018", 59.7, 13.0),
    ("Run2", 137.1, 13.0),
    ("2022_preEE", 7.98, 13.6),
    ("2022_postEE", 26.67, 13.6),
    ("2023_preBPix", 17.79, 13.6),
    ("2023_postBPix", 9.45, 13.6),
    ("Phase2", 3000.0, 14.0),
];

/// Look up an era: exact tag first, then the first four-digit year in the tag.
pub fn era_info(era: &str) -> Option<EraInfo> {
    let find = |tag: &str| {
        ERAS.iter().find(|(k, _, _)| *k == tag).map(|&(_, lumi, cme)| EraInfo { lumi, cme })
    };
    if let Some(info) = find(era) {
        return Some(info);
    }
    static YEAR_RE: OnceLock<Regex> = OnceLock::new();
    let re = YEAR_RE.get_or_init(|| Regex::new(r"20\d\d").expect("valid regex"));
    re.find(era).and_then(|m| find(m.as_str()))
}

/// Era, channel and luminosity shared by samples, sample sets, plots and
/// datacards. Cloning shares the warning registry.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    /// Era tag, e.g. `UL2018`.
    pub era: String,
    /// Channel tag, e.g. `mutau`.
    pub channel: String,
    /// Free-form output tag.
    pub tag: String,
    /// Integrated luminosity in fb⁻¹.
    pub lumi: f64,
    /// Centre-of-mass energy in TeV.
    pub cme: f64,
    /// Prefix prepended to relative input paths (e.g. an XRootD URL).
    pub prefix: Option<String>,
    warned: Arc<Mutex<HashSet<String>>>,
}

impl AnalysisContext {
    /// Context for a known era. Unknown eras are a configuration error.
    pub fn new(era: impl Into<String>, channel: impl Into<String>) -> Result<Self> {
        let era = era.into();
        let info =
            era_info(&era).ok_or_else(|| Error::Config(format!("unknown era '{era}'")))?;
        Ok(Self {
            era,
            channel: channel.into(),
            tag: String::new(),
            lumi: info.lumi,
            cme: info.cme,
            prefix: None,
            warned: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Override the luminosity.
    pub fn with_lumi(mut self, lumi: f64) -> Self {
        self.lumi = lumi;
        self
    }

    /// Set the output tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Set the input path prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        let p = prefix.into();
        self.prefix = (!p.is_empty()).then_some(p);
        self
    }

    /// Header text, e.g. `59.7 fb^{-1} (13 TeV)`.
    pub fn lumi_text(&self) -> String {
        format!("{} fb^{{-1}} ({} TeV)", self.lumi, self.cme)
    }

    /// Emit `msg` as a warning the first time `key` is seen.
    pub fn warn_once(&self, key: &str, msg: &str) {
        let first = match self.warned.lock() {
            Ok(mut set) => set.insert(key.to_string()),
            Err(_) => true,
        };
        if first {
            log::warn!("{msg}");
        }
    }

    /// Whether a warning was already emitted for `key`.
    pub fn has_warned(&self, key: &str) -> bool {
        self.warned.lock().map(|s| s.contains(key)).unwrap_or(false)
    }

    /// Resolve `$ERA`, `$CHANNEL` and `$TAG` in a template.
    pub fn expand(&self, template: &str) -> String {
        template
            .replace("$ERA", &self.era)
            .replace("$CHANNEL", &self.channel)
            .replace("$TAG", &self.tag)
    }

    /// Prepend the path prefix unless `path` is absolute or already a URL.
    pub fn resolve_path(&self, path: &str) -> String {
        match &self.prefix {
            Some(p) if !path.starts_with('/') && !path.contains("://") => {
                format!("{}/{}", p.trim_end_matches('/'), path)
            }
            _ => path.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_and_year_lookup() {
        assert_eq!(era_info("UL2018").unwrap().lumi, 59.7);
        assert_eq!(era_info("2022_postEE").unwrap().cme, 13.6);
        assert_eq!(era_info("2016_preVFP").unwrap().lumi, 35.9);
        assert!(era_info("Run3").is_none());
    }

    #[test]
    fn unknown_era_is_config_error() {
        assert!(matches!(AnalysisContext::new("1999x", "mutau"), Err(Error::Config(_))));
    }

    #[test]
    fn lumi_text_and_templates() {
        let ctx = AnalysisContext::new("UL2018", "mutau").unwrap().with_tag("_v1");
        assert_eq!(ctx.lumi_text(), "59.7 fb^{-1} (13 TeV)");
        assert_eq!(ctx.expand("out/$CHANNEL_$ERA$TAG.json"), "out/mutau_UL2018_v1.json");
        let ctx = ctx.with_lumi(10.0);
        assert_eq!(ctx.lumi_text(), "10 fb^{-1} (13 TeV)");
    }

    #[test]
    fn prefix_resolution() {
        let ctx = AnalysisContext::new("2018", "etau").unwrap().with_prefix("root://eos.cern.ch/");
        assert_eq!(ctx.resolve_path("store/DY.parquet"), "root://eos.cern.ch/store/DY.parquet");
        assert_eq!(ctx.resolve_path("/abs/DY.parquet"), "/abs/DY.parquet");
    }

    #[test]
    fn warn_once_deduplicates() {
        let ctx = AnalysisContext::new("2018", "etau").unwrap();
        let shared = ctx.clone();
        assert!(!ctx.has_warned("DY|sr|m_vis"));
        ctx.warn_once("DY|sr|m_vis", "binning mismatch");
        assert!(shared.has_warned("DY|sr|m_vis"));
    }
}
