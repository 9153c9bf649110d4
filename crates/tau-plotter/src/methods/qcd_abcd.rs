//! ABCD estimate of the QCD multijet background.
//!
//! Events are split by charge sign and isolation:
//!
//! | | tight | anti-isolated |
//! |---|---|---|
//! | OS | A (signal region) | C |
//! | SS | B | D |
//!
//! The four yields of `data - sum(MC)` come from one 2-D fill in a common
//! selection (charge requirement dropped, isolation relaxed to loose), binned
//! by `sign(q_1*q_2)` and an isolation tier. The estimate in A has the
//! normalization `s = n_C * n_B / n_D`. Its shape is taken from C for the
//! fully hadronic channel and from B (same-sign, isolated) otherwise.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use tau_core::{ErrorMode, HistStyle, Histogram, Histogram2D};

use super::{EstimateRequest, Estimator, PendingEstimate};
use crate::histset::{HistDict, HistSet};
use crate::result::{Deferred, ResultDict};
use crate::sample::{BookOptions, FillPlan, Sample, default_color, pair_key};
use crate::strings::{Charge, clean_bool, fmt_num, invert_charge, join_cuts, make_hist_name};
use crate::variable::Variable;
use crate::{Error, Result};

const SIGN_EXPR: &str = "(q_1*q_2>0) ? 1 : -1";

/// Channel families with their own isolation rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Two hadronic taus, isolation from the tau ID working point.
    FullyHadronic,
    /// One light lepton and a hadronic tau, isolation of the lepton.
    Semileptonic,
    /// Two light leptons.
    Leptonic,
}

/// Channel family of a channel tag, if known.
pub fn channel_kind(channel: &str) -> Option<ChannelKind> {
    match channel {
        "tautau" | "ditau" => Some(ChannelKind::FullyHadronic),
        "mutau" | "etau" => Some(ChannelKind::Semileptonic),
        "emu" | "mue" | "mumu" | "ee" => Some(ChannelKind::Leptonic),
        _ => None,
    }
}

/// Derived cuts of the ABCD regions for one signal-region cut.
#[derive(Debug, Clone, PartialEq)]
pub struct Regions {
    /// Superset of A, B, C and D.
    pub common: String,
    /// Region the shape is taken from.
    pub shape: String,
    /// Isolation tier: 2 tight, 1 anti-isolated, 0 neither.
    pub tier: String,
}

fn tau_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(idDeepTau\w*VSjet)_[12]\s*>=\s*(\d+)").expect("valid regex"))
}

fn lepton_iso_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(iso_1|pfRelIso\w*_1)\s*<\s*([\d.]+)").expect("valid regex"))
}

fn dilepton_iso_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(iso_[12]|pfRelIso\w*_[12])\s*<\s*([\d.]+)").expect("valid regex"))
}

/// Replace the first match of `re` by `replacement` and drop the others.
fn replace_tokens(re: &Regex, cut: &str, replacement: &str) -> String {
    let mut first = true;
    let out = re.replace_all(cut, |_: &Captures<'_>| {
        if std::mem::take(&mut first) { replacement.to_string() } else { String::new() }
    });
    clean_bool(&out)
}

fn with_charge(cut: &str, charge: Charge) -> String {
    let required = match charge {
        Charge::OS => "q_1*q_2<0",
        Charge::SS => "q_1*q_2>0",
        Charge::Any => "",
    };
    join_cuts(&[&invert_charge(cut, Charge::Any), required])
}

fn tier_expr(tight: &str, anti: &str) -> String {
    format!("(({tight}) ? 2 : (({anti}) ? 1 : 0))")
}

fn parse_threshold(cut: &str, raw: &str) -> Result<f64> {
    raw.parse()
        .map_err(|_| Error::CutParse(format!("bad isolation threshold '{raw}' in '{cut}'")))
}

/// Derive the ABCD region cuts from a signal-region cut.
///
/// Fails with [`Error::CutParse`] when the channel's isolation token is missing.
pub fn regions(kind: ChannelKind, cut: &str, loose_iso: f64) -> Result<Regions> {
    match kind {
        ChannelKind::FullyHadronic => {
            let re = tau_id_re();
            let caps = re.captures(cut).ok_or_else(|| {
                Error::CutParse(format!("no tau ID working point (idDeepTau*VSjet_[12]>=N) in '{cut}'"))
            })?;
            let id = &caps[1];
            let tight: u32 = caps[2]
                .parse()
                .map_err(|_| Error::CutParse(format!("bad tau ID working point in '{cut}'")))?;
            let medium = (tight / 2).max(1);
            let loose = (tight / 4).max(1);
            let (id1, id2) = (format!("{id}_1"), format!("{id}_2"));
            let tight_cut = format!("{id1}>={tight} && {id2}>={tight}");
            let anti = format!(
                "({id1}>={medium} && {id2}<{tight} && {id2}>={loose}) || ({id2}>={medium} && {id1}<{tight} && {id1}>={loose})"
            );
            let loose_cut = format!("{id1}>={loose} && {id2}>={loose}");
            Ok(Regions {
                common: with_charge(&replace_tokens(re, cut, &loose_cut), Charge::Any),
                shape: with_charge(&replace_tokens(re, cut, &format!("({anti})")), Charge::OS),
                tier: tier_expr(&tight_cut, &anti),
            })
        }
        ChannelKind::Semileptonic => {
            let re = lepton_iso_re();
            let caps = re.captures(cut).ok_or_else(|| {
                Error::CutParse(format!("no lepton isolation (iso_1<X) in '{cut}'"))
            })?;
            let iso = &caps[1];
            let tight = parse_threshold(cut, &caps[2])?;
            if tight >= loose_iso {
                return Err(Error::CutParse(format!(
                    "tight isolation {tight} is not below the loose bound {loose_iso} in '{cut}'"
                )));
            }
            let (t, l) = (fmt_num(tight), fmt_num(loose_iso));
            Ok(Regions {
                common: with_charge(&replace_tokens(re, cut, &format!("{iso}<{l}")), Charge::Any),
                shape: with_charge(cut, Charge::SS),
                tier: tier_expr(&format!("{iso}<{t}"), &format!("{iso}>={t} && {iso}<{l}")),
            })
        }
        ChannelKind::Leptonic => {
            let re = dilepton_iso_re();
            let found: Vec<(String, f64)> = re
                .captures_iter(cut)
                .map(|c| Ok((c[1].to_string(), parse_threshold(cut, &c[2])?)))
                .collect::<Result<_>>()?;
            let [(a, ta), (b, tb), ..] = found.as_slice() else {
                return Err(Error::CutParse(format!(
                    "need two lepton isolation cuts (iso_[12]<X) in '{cut}', found {}",
                    found.len()
                )));
            };
            let l = fmt_num(loose_iso);
            let tight = format!("{a}<{} && {b}<{}", fmt_num(*ta), fmt_num(*tb));
            let anti = format!("{a}>={} || {b}>={}", fmt_num(*ta), fmt_num(*tb));
            let loose = format!("{a}<{l} && {b}<{l}");
            Ok(Regions {
                common: with_charge(&replace_tokens(re, cut, &loose), Charge::Any),
                shape: with_charge(cut, Charge::SS),
                tier: tier_expr(&tight, &anti),
            })
        }
    }
}

/// ABCD QCD estimator, registered as `QCD_ABCD` (alias `QCD_OSSS`).
#[derive(Debug, Clone)]
pub struct QcdAbcd {
    /// Upper isolation bound of the anti-isolated band for light leptons.
    pub loose_iso: f64,
    /// Fraction of negative bins above which the subtraction is reported.
    pub max_negative_fraction: f64,
}

impl Default for QcdAbcd {
    fn default() -> Self {
        Self { loose_iso: 0.5, max_negative_fraction: 0.25 }
    }
}

fn is_qcd(s: &Sample) -> bool {
    s.name.to_lowercase().contains("qcd") || s.title.to_lowercase().contains("qcd")
}

impl Estimator for QcdAbcd {
    fn name(&self) -> &str {
        "QCD_ABCD"
    }

    fn book(&self, req: &EstimateRequest<'_>) -> Result<Option<Box<dyn PendingEstimate>>> {
        let Some(data) = req.data else {
            log::info!("QCD_ABCD: no observed data, estimate skipped");
            return Ok(None);
        };
        let Some(kind) = channel_kind(&req.ctx.channel) else {
            req.ctx.warn_once(
                &format!("qcd-channel:{}", req.ctx.channel),
                &format!("QCD_ABCD: unknown channel '{}', estimate skipped", req.ctx.channel),
            );
            return Ok(None);
        };
        let subtract: Vec<&Sample> = req.exp.iter().copied().filter(|s| !is_qcd(s)).collect();
        let opts = BookOptions { split: false, tag: format!("{}_QCD", req.tag), blind: false };

        let mut results = ResultDict::new();
        let mut regions_out = Vec::new();
        for (sel, vars) in &req.plan.entries {
            if vars.is_empty() {
                continue;
            }
            let reg = regions(kind, &sel.selection, self.loose_iso)?;
            log::debug!(
                "QCD_ABCD '{}': common={:?} shape={:?} tier={:?}",
                sel.name,
                reg.common,
                reg.shape,
                reg.tier
            );
            let mut common = sel.clone();
            common.selection = reg.common.clone();
            common.only.clear();
            common.veto.clear();
            let mut shape = sel.clone();
            shape.selection = reg.shape.clone();
            let shape_plan = FillPlan { entries: vec![(shape, vars.clone())] };

            let sign = Variable::uniform(SIGN_EXPR, 2, -2.0, 2.0)?.with_filename("qcd_sign");
            let tier = Variable::uniform(reg.tier.as_str(), 2, 1.0, 3.0)?.with_filename("qcd_tier");
            let grid_key = pair_key(&sign, &tier);
            let pairs = [(sign, tier)];

            let mut region = BookedRegion {
                selection: sel.filename.clone(),
                grid: Vec::new(),
                shapes: vars.iter().map(|v| (v.filename.clone(), Vec::new())).collect(),
            };
            let contributions =
                std::iter::once((data, 1.0)).chain(subtract.iter().map(|s| (*s, -1.0)));
            for (sample, c) in contributions {
                let key = format!("QCD_ABCD:{}", sample.name);
                let grid = sample.book2d(&pairs, std::slice::from_ref(&common), &opts)?;
                if let Some(r) = grid.get(&sel.filename, &grid_key, &sample.name) {
                    results.add(&sel.filename, &grid_key, &key, r.clone());
                    region.grid.push((c, r.clone()));
                }
                let shapes = sample.book(&shape_plan, &opts)?;
                for (var_key, parts) in &mut region.shapes {
                    if let Some(r) = shapes.get(&sel.filename, var_key, &sample.name) {
                        results.add(&sel.filename, var_key, &key, r.clone());
                        parts.push((c, r.clone()));
                    }
                }
            }
            regions_out.push(region);
        }
        Ok(Some(Box::new(PendingQcd {
            results,
            regions: regions_out,
            shift: req.shift,
            tag: req.tag.to_string(),
            max_negative_fraction: self.max_negative_fraction,
        })))
    }
}

/// Signed contributions (`+1` data, `-1` simulation).
type Parts = Vec<(f64, Deferred)>;

#[derive(Debug)]
struct BookedRegion {
    selection: String,
    grid: Parts,
    shapes: Vec<(String, Parts)>,
}

#[derive(Debug)]
struct PendingQcd {
    results: ResultDict,
    regions: Vec<BookedRegion>,
    shift: f64,
    tag: String,
    max_negative_fraction: f64,
}

fn subtract_1d(parts: &Parts) -> Result<Option<Histogram>> {
    let mut total: Option<Histogram> = None;
    for (c, r) in parts {
        let h = r.histogram()?;
        match &mut total {
            Some(t) => t.add(&h, *c)?,
            None => {
                let mut h = h;
                h.error_mode = ErrorMode::SumW2;
                h.scale(*c);
                total = Some(h);
            }
        }
    }
    Ok(total)
}

fn subtract_2d(parts: &Parts) -> Result<Option<Histogram2D>> {
    let mut total: Option<Histogram2D> = None;
    for (c, r) in parts {
        let h = r.histogram2d()?;
        match &mut total {
            Some(t) => t.add(&h, *c)?,
            None => {
                let mut h = h;
                h.scale(*c);
                total = Some(h);
            }
        }
    }
    Ok(total)
}

impl PendingQcd {
    /// Transfer scale `n_C * n_B / n_D` of one region, with the shift applied.
    fn scale(&self, region: &BookedRegion) -> Result<f64> {
        let Some(grid) = subtract_2d(&region.grid)? else {
            return Ok(0.0);
        };
        // x: 0 = OS, 1 = SS; y: 0 = anti-isolated, 1 = tight
        let (n_a, n_b, n_c, mut n_d) =
            (grid.content(0, 1), grid.content(1, 1), grid.content(0, 0), grid.content(1, 0));
        if n_d <= 0.0 {
            log::warn!("QCD_ABCD '{}': n_D = {n_d:.3} <= 0, using 1", region.selection);
            n_d = 1.0;
        }
        let mut s = n_c * n_b / n_d * (1.0 + self.shift);
        log::info!(
            "QCD_ABCD '{}': n_A={n_a:.1} n_B={n_b:.1} n_C={n_c:.1} n_D={n_d:.1} -> {s:.3}",
            region.selection
        );
        if s < 0.0 {
            log::warn!("QCD_ABCD '{}': negative normalization {s:.3}, using 0", region.selection);
            s = 0.0;
        }
        Ok(s)
    }

    fn clamp_negative(&self, h: &mut Histogram, label: &str) {
        let negative: Vec<usize> = (0..h.n_bins()).filter(|&i| h.bin_content[i] < 0.0).collect();
        for &i in &negative {
            h.set_bin(i, 0.0, 1.0);
        }
        let frac = negative.len() as f64 / h.n_bins().max(1) as f64;
        if frac > self.max_negative_fraction {
            log::warn!(
                "QCD_ABCD '{label}': {} of {} bins negative after subtraction",
                negative.len(),
                h.n_bins()
            );
        }
    }
}

impl PendingEstimate for PendingQcd {
    fn results(&self) -> &ResultDict {
        &self.results
    }

    fn finish(&self, hists: &mut HistDict<HistSet>, index: Option<usize>) -> Result<()> {
        for region in &self.regions {
            let s = self.scale(region)?;
            for (var_key, parts) in &region.shapes {
                let Some(set) = hists.get_mut(&region.selection, var_key) else {
                    continue;
                };
                let Some(mut h) = subtract_1d(parts)? else {
                    continue;
                };
                let label = format!("{}/{var_key}", region.selection);
                self.clamp_negative(&mut h, &label);
                let integral = h.integral();
                if integral > 0.0 {
                    h.scale(s / integral);
                } else {
                    log::warn!("QCD_ABCD '{label}': empty shape");
                }
                h.name = make_hist_name(&[var_key, &region.selection, &format!("QCD{}", self.tag)]);
                h.title = "QCD multijet".into();
                h.style = HistStyle {
                    fill_color: default_color("QCD").map(str::to_string),
                    ..HistStyle::default()
                };
                set.insert_exp(index, h);
            }
        }
        Ok(())
    }
}
