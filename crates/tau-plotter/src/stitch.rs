//! Joining samples and stitching inclusive with jet-binned samples.
//!
//! Stitching gives every event with parton multiplicity `p` the weight
//!
//! ```text
//! norm_p = lumi * k * xsec_p * 1000 / (N_p + N_incl * xsec_p / xsec_incl)
//! ```
//!
//! in both the inclusive and the `p`-jet sample, and
//! `norm_incl = lumi * k * xsec_incl * 1000 / N_incl` to inclusive events outside
//! the jet bins. The expected yield of the stitched sample is therefore
//! `lumi * k * xsec_incl * 1000`, whatever the split into jet bins.

use std::sync::OnceLock;

use regex::Regex;

use crate::sample::Sample;
use crate::{Error, Result};

/// Inclusive (N)NLO cross sections in pb used to derive the k-factor.
pub const NLO_XSECS: &[(&str, f64)] = &[
    ("DYJetsToLL_M-50", 3.0 * 2025.74),
    ("DYJetsToLL_M-10to50", 18610.0),
    ("WJetsToLNu", 3.0 * 20508.9),
];

/// Inclusive (N)NLO cross section for a DY or W+jets stitch, looked up from the patterns.
pub fn nlo_xsec(patterns: &[&str]) -> Option<f64> {
    let lookup = |key: &str| NLO_XSECS.iter().find(|(k, _)| *k == key).map(|(_, x)| *x);
    for p in patterns {
        let key = if p.contains("DY") {
            if patterns.iter().any(|s| s.contains("10to50")) {
                "DYJetsToLL_M-10to50"
            } else {
                "DYJetsToLL_M-50"
            }
        } else if p.contains("WJ") {
            "WJetsToLNu"
        } else {
            p
        };
        if let Some(x) = lookup(key) {
            return Some(x);
        }
    }
    None
}

/// Parton multiplicity encoded in a jet-binned sample name (`DY2Jets...`, `..._2J`).
pub fn jet_multiplicity(name: &str) -> Option<u32> {
    static BIN_RE: OnceLock<Regex> = OnceLock::new();
    static JETS_RE: OnceLock<Regex> = OnceLock::new();
    let bin = BIN_RE.get_or_init(|| Regex::new(r"_(\d{1,2})J(?:$|_)").expect("valid regex"));
    let jets = JETS_RE.get_or_init(|| Regex::new(r"[A-Za-z](\d+)Jets").expect("valid regex"));
    let caps = bin.captures(name).or_else(|| jets.captures(name))?;
    caps.get(1)?.as_str().parse().ok()
}

/// Merge every sample matching one of `patterns` into one merged sample at the
/// position of the first match. With fewer than two matches nothing changes.
pub fn join(samples: &mut Vec<Sample>, patterns: &[&str], name: &str, title: Option<&str>) -> Result<()> {
    let idx: Vec<usize> =
        (0..samples.len()).filter(|&i| samples[i].match_patterns(patterns)).collect();
    if idx.len() < 2 {
        log::warn!(
            "join: cannot merge '{name}': {} sample(s) match '{}'",
            idx.len(),
            patterns.join("', '")
        );
        return Ok(());
    }
    let first = idx[0];
    let mut children = Vec::with_capacity(idx.len());
    for &i in idx.iter().rev() {
        children.push(samples.remove(i));
    }
    children.reverse();
    let title = title.map(str::to_string).unwrap_or_else(|| children[0].title.clone());
    log::debug!(
        "join: {} -> '{name}'",
        children.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
    );
    samples.insert(first, Sample::merged(name, title, children)?);
    Ok(())
}

/// Options of [`stitch`].
#[derive(Debug, Clone)]
pub struct StitchOptions {
    /// Name of the stitched sample (default: first pattern).
    pub name: Option<String>,
    /// Title of the stitched sample (default: the inclusive sample's title).
    pub title: Option<String>,
    /// Pattern identifying the inclusive sample (default: the match without a jet bin).
    pub incl: Option<String>,
    /// Higher-order inclusive cross section in pb, to derive the k-factor.
    pub xsec: Option<f64>,
    /// Explicit k-factor.
    pub kfactor: Option<f64>,
    /// Column holding the parton multiplicity.
    pub npart: String,
    /// Centre-of-mass energy; the cross-section table only applies at 13 TeV.
    pub cme: f64,
}

impl Default for StitchOptions {
    fn default() -> Self {
        Self {
            name: None,
            title: None,
            incl: None,
            xsec: None,
            kfactor: None,
            npart: "NUP".into(),
            cme: 13.0,
        }
    }
}

/// Stitch the inclusive sample with the jet-binned samples matching `patterns`
/// and merge them.
///
/// The inclusive sample gets a normalization of 1 and the per-multiplicity
/// weight as an extra weight; jet-binned samples get `norm_p` as their
/// normalization and scale 1.
pub fn stitch(samples: &mut Vec<Sample>, patterns: &[&str], opts: &StitchOptions) -> Result<()> {
    let name = opts
        .name
        .clone()
        .or_else(|| patterns.first().map(|p| p.to_string()))
        .ok_or_else(|| Error::Config("stitch: no search patterns".into()))?;
    let idx: Vec<usize> =
        (0..samples.len()).filter(|&i| samples[i].match_patterns(patterns)).collect();
    if idx.len() < 2 {
        log::warn!(
            "stitch: cannot stitch '{name}': {} sample(s) match '{}'",
            idx.len(),
            patterns.join("', '")
        );
        if let (Some(&i), Some(k)) = (idx.first(), opts.kfactor) {
            samples[i].multiply_scale(k);
        }
        return Ok(());
    }

    let is_incl = |s: &Sample| match &opts.incl {
        Some(p) => s.match_patterns(&[p]),
        None => jet_multiplicity(&s.name).is_none(),
    };
    let i_incl = idx
        .iter()
        .copied()
        .find(|&i| is_incl(&samples[i]))
        .ok_or_else(|| Error::Config(format!("stitch: no inclusive sample among '{name}' matches")))?;

    let incl = &samples[i_incl];
    let (lumi, xsec_incl) = (incl.lumi, incl.xsec);
    if xsec_incl <= 0.0 {
        return Err(Error::Normalization(format!(
            "stitch: inclusive sample '{}' has cross section {xsec_incl}",
            incl.name
        )));
    }
    let n_incl = incl.sumweights()?;
    if n_incl <= 0.0 {
        return Err(Error::Normalization(format!(
            "stitch: inclusive sample '{}' has sum of weights {n_incl}",
            incl.name
        )));
    }
    let kfactor = match opts.kfactor {
        Some(k) => k,
        None if (opts.cme - 13.0).abs() < 1e-6 => {
            opts.xsec.or_else(|| nlo_xsec(patterns)).map_or(1.0, |x| x / xsec_incl)
        }
        None => 1.0,
    };
    log::info!("stitch '{name}': k-factor {kfactor:.4}, inclusive '{}' sumw {n_incl}", incl.name);

    let mut bins: Vec<(u32, usize, f64)> = Vec::new();
    for &i in &idx {
        if i == i_incl {
            continue;
        }
        let s = &samples[i];
        let Some(p) = jet_multiplicity(&s.name) else {
            log::warn!("stitch: '{}' has no jet multiplicity; merged without reweighting", s.name);
            continue;
        };
        let neff = s.sumweights()? + n_incl * s.xsec / xsec_incl;
        if neff <= 0.0 {
            return Err(Error::Normalization(format!(
                "stitch: effective event count of '{}' is {neff}",
                s.name
            )));
        }
        let norm = s.lumi * kfactor * s.xsec * 1000.0 / neff;
        log::debug!("stitch: {p}-parton bin '{}' norm {norm}", s.name);
        bins.push((p, i, norm));
    }
    bins.sort_by_key(|&(p, _, _)| p);

    let norm_incl = lumi * kfactor * xsec_incl * 1000.0 / n_incl;
    let weight = stitch_weight(&opts.npart, &bins.iter().map(|&(p, _, n)| (p, n)).collect::<Vec<_>>(), norm_incl);
    for &(_, i, norm) in &bins {
        samples[i].set_norm(norm);
        samples[i].scale = 1.0;
    }
    let incl = &mut samples[i_incl];
    incl.set_norm(1.0);
    incl.scale = 1.0;
    incl.add_extraweight(&weight);
    let title = opts.title.clone().unwrap_or_else(|| incl.title.clone());
    join(samples, patterns, &name, Some(&title))
}

/// Nested conditional `(npart==p1 ? n1 : (npart==p2 ? n2 : ... : default))`.
pub fn stitch_weight(npart: &str, bins: &[(u32, f64)], default: f64) -> String {
    bins.iter().rev().fold(format!("{default}"), |acc, (p, n)| format!("({npart}=={p} ? {n} : {acc})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplicity_from_name() {
        assert_eq!(jet_multiplicity("DY3JetsToLL_M-50"), Some(3));
        assert_eq!(jet_multiplicity("WJetsToLNu-4Jets_2J"), Some(2));
        assert_eq!(jet_multiplicity("DYto2L-4Jets_MLL-50_1J"), Some(1));
        assert_eq!(jet_multiplicity("DYto2L-4Jets_MLL-50"), None);
        assert_eq!(jet_multiplicity("DYJetsToLL_M-50"), None);
    }

    #[test]
    fn nested_weight() {
        assert_eq!(stitch_weight("NUP", &[(1, 0.5), (2, 0.25)], 2.0), "(NUP==1 ? 0.5 : (NUP==2 ? 0.25 : 2))");
        assert_eq!(stitch_weight("NUP", &[], 2.0), "2");
    }

    #[test]
    fn nlo_lookup() {
        assert_eq!(nlo_xsec(&["DY*Jets*M-50"]), Some(3.0 * 2025.74));
        assert_eq!(nlo_xsec(&["DY*Jets*", "M-10to50"]), Some(18610.0));
        assert_eq!(nlo_xsec(&["W*Jets"]), Some(3.0 * 20508.9));
        assert_eq!(nlo_xsec(&["TT"]), None);
    }

    #[test]
    fn join_keeps_position() {
        let mut samples = vec![
            Sample::mc("TT", "ttbar", 1.0),
            Sample::mc("WW", "WW", 1.0),
            Sample::mc("ZTT", "Z", 1.0),
            Sample::mc("WZ", "WZ", 1.0),
        ];
        join(&mut samples, &["W?"], "VV", Some("Diboson")).unwrap();
        let names: Vec<&str> = samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["TT", "VV", "ZTT"]);
        assert_eq!(samples[1].children().len(), 2);
        assert_eq!(samples[1].title, "Diboson");
        join(&mut samples, &["nothing*"], "X", None).unwrap();
        assert_eq!(samples.len(), 3);
    }

    #[test]
    fn lone_inclusive_gets_kfactor() {
        let mut samples = vec![Sample::mc("DYJetsToLL_M-50", "DY", 5.0)];
        let opts = StitchOptions { kfactor: Some(1.2), ..StitchOptions::default() };
        stitch(&mut samples, &["DY*Jets*"], &opts).unwrap();
        assert_eq!(samples[0].scale, 1.2);
        assert!(!samples[0].is_merged());
    }
}
