//! Observed data, expected and signal samples, filled together.
//!
//! [`SampleSet::gethists`] books every sample (and the auxiliary fills of an
//! estimator) for all eligible (selection, variable) pairs, runs the event
//! loop once, and assembles one [`HistSet`] per pair.

use tau_core::ExecutionMode;

use crate::era::AnalysisContext;
use crate::errorband::geterrorband;
use crate::histset::{HistDict, HistSet, HistSet2D};
use crate::methods::{EstimateRequest, get_estimator};
use crate::result::ResultDict;
use crate::sample::{BookOptions, FillPlan, Sample, pair_key};
use crate::selection::Selection;
use crate::stack::Stack;
use crate::stitch::{StitchOptions, join, stitch};
use crate::variable::Variable;
use crate::{Error, Result};

/// Options of [`SampleSet::gethists`].
#[derive(Debug, Clone)]
pub struct GetHistsOptions {
    /// Registered estimator, e.g. `QCD_ABCD`.
    pub method: Option<String>,
    /// Position of the estimate in the stack (last when `None`).
    pub imethod: Option<usize>,
    /// Fill split subsamples instead of their parents.
    pub split: bool,
    /// Suffix appended to histogram names.
    pub tag: String,
    /// Apply variables' blinding windows to observed data.
    pub blind: bool,
    /// Only expected and signal samples matching one of these patterns.
    pub filter: Vec<String>,
    /// Skip expected and signal samples matching one of these patterns.
    pub veto: Vec<String>,
    /// Relative shift of the estimate's normalization.
    pub qcd_shift: f64,
    /// Attach the statistical error band.
    pub errband: bool,
}

impl Default for GetHistsOptions {
    fn default() -> Self {
        Self {
            method: None,
            imethod: None,
            split: true,
            tag: String::new(),
            blind: false,
            filter: Vec::new(),
            veto: Vec::new(),
            qcd_shift: 0.0,
            errband: true,
        }
    }
}

impl GetHistsOptions {
    /// Options with an estimator.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Options with a histogram name suffix.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }
}

fn matches_any(sample: &Sample, patterns: &[String]) -> bool {
    let p: Vec<&str> = patterns.iter().map(String::as_str).collect();
    sample.match_patterns(&p)
}

/// The samples of one analysis channel.
#[derive(Debug, Clone)]
pub struct SampleSet {
    /// Era, channel and luminosity.
    pub ctx: AnalysisContext,
    /// Observed data.
    pub data: Option<Sample>,
    /// Expected processes in stack order, top first.
    pub exp: Vec<Sample>,
    /// Signal processes.
    pub sig: Vec<Sample>,
    /// Patterns of samples left out of every request.
    pub ignore: Vec<String>,
    /// Event loop scheduling.
    pub mode: ExecutionMode,
}

impl SampleSet {
    /// Sample set normalized to the context's luminosity.
    pub fn new(ctx: AnalysisContext, data: Option<Sample>, exp: Vec<Sample>, sig: Vec<Sample>) -> Self {
        let mut set = Self { ctx, data, exp, sig, ignore: Vec::new(), mode: ExecutionMode::default() };
        let lumi = set.ctx.lumi;
        set.exp.iter_mut().chain(set.sig.iter_mut()).filter(|s| !s.is_data()).for_each(|s| s.set_lumi(lumi));
        set
    }

    /// Set the event loop scheduling.
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Leave samples matching `patterns` out of every request.
    pub fn with_ignore(mut self, patterns: Vec<String>) -> Self {
        self.ignore = patterns;
        self
    }

    fn ignored(&self, s: &Sample) -> bool {
        matches_any(s, &self.ignore)
    }

    fn active<'a>(&self, samples: &'a [Sample], opts: &GetHistsOptions) -> Vec<&'a Sample> {
        samples
            .iter()
            .filter(|s| !self.ignored(s))
            .filter(|s| opts.filter.is_empty() || matches_any(s, &opts.filter))
            .filter(|s| !matches_any(s, &opts.veto))
            .collect()
    }

    fn active_data(&self) -> Option<&Sample> {
        self.data.as_ref().filter(|d| !self.ignored(d))
    }

    /// Every sample: data, expected, then signal.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.data.iter().chain(&self.exp).chain(&self.sig)
    }

    /// The sample whose name or title matches every pattern. Ambiguous matches
    /// return the first one with a warning.
    pub fn get(&self, patterns: &[&str]) -> Option<&Sample> {
        let found: Vec<&Sample> =
            self.samples().filter(|s| patterns.iter().all(|p| s.match_patterns(&[p]))).collect();
        if found.len() > 1 {
            log::warn!(
                "SampleSet::get: {} samples match '{}', taking '{}'",
                found.len(),
                patterns.join("', '"),
                found[0].name
            );
        }
        found.first().copied()
    }

    /// Position in the expected list of the first sample matching `patterns`.
    pub fn index(&self, patterns: &[&str]) -> Option<usize> {
        self.exp.iter().position(|s| s.match_patterns(patterns))
    }

    /// Replace the expected samples matching `patterns` by `sample`, at the
    /// position of the first match.
    pub fn replace(&mut self, patterns: &[&str], sample: Sample) -> Result<()> {
        let first = self.index(patterns).ok_or_else(|| {
            Error::Config(format!("replace: no expected sample matches '{}'", patterns.join("', '")))
        })?;
        self.exp.retain(|s| !s.match_patterns(patterns));
        self.exp.insert(first.min(self.exp.len()), sample);
        Ok(())
    }

    /// Merge the expected samples matching `patterns`.
    pub fn join(&mut self, patterns: &[&str], name: &str, title: Option<&str>) -> Result<()> {
        join(&mut self.exp, patterns, name, title)
    }

    /// Stitch the expected samples matching `patterns`, at this set's energy.
    pub fn stitch(&mut self, patterns: &[&str], opts: StitchOptions) -> Result<()> {
        let opts = StitchOptions { cme: self.ctx.cme, ..opts };
        stitch(&mut self.exp, patterns, &opts)
    }

    /// Attach split subsamples `(name, title, cut, color)` to the expected
    /// sample matching `patterns`.
    pub fn split(&mut self, patterns: &[&str], parts: &[(&str, &str, &str, Option<&str>)]) -> Result<()> {
        let i = self.index(patterns).ok_or_else(|| {
            Error::Config(format!("split: no expected sample matches '{}'", patterns.join("', '")))
        })?;
        self.exp[i].split(parts);
        Ok(())
    }

    /// Copy whose samples matching `patterns` read the `tag` variant of their
    /// files, e.g. `_TESUp`. Observed data is never shifted.
    pub fn shift(&self, patterns: &[&str], tag: &str) -> SampleSet {
        let mut out = self.clone();
        for s in out.exp.iter_mut().chain(out.sig.iter_mut()) {
            if s.match_patterns(patterns) {
                log::debug!("shift: '{}' -> files{tag}", s.name);
                s.shift_files(tag);
            }
        }
        out
    }

    /// Copy whose samples matching `patterns` have `from` replaced by `to` in
    /// their weights, or `to` multiplied in when `from` is empty.
    pub fn shiftweight(&self, patterns: &[&str], from: &str, to: &str) -> SampleSet {
        let mut out = self.clone();
        for s in out.exp.iter_mut().chain(out.sig.iter_mut()) {
            if !s.match_patterns(patterns) {
                continue;
            }
            if from.is_empty() {
                s.add_weight(to);
            } else {
                s.replace_weight(from, to);
            }
        }
        out
    }

    fn book_all(
        &self,
        plan: &FillPlan,
        opts: &GetHistsOptions,
    ) -> Result<(ResultDict, Option<Box<dyn crate::methods::PendingEstimate>>)> {
        let book = BookOptions { split: opts.split, tag: opts.tag.clone(), blind: opts.blind };
        let single = BookOptions { split: false, ..book.clone() };
        let data = self.active_data();
        let exp = self.active(&self.exp, opts);
        let sig = self.active(&self.sig, opts);

        let mut rd = ResultDict::new();
        if let Some(d) = data {
            let data_plan = FillPlan {
                entries: plan
                    .entries
                    .iter()
                    .map(|(sel, vars)| (sel.clone(), vars.iter().filter(|v| v.data).cloned().collect()))
                    .collect(),
            };
            rd.update(d.book(&data_plan, &single)?);
        }
        for s in &exp {
            rd.update(s.book(plan, &book)?);
        }
        for s in &sig {
            rd.update(s.book(plan, &single)?);
        }
        let pending = match &opts.method {
            Some(name) => {
                let estimator = get_estimator(name)?;
                let req = EstimateRequest {
                    ctx: &self.ctx,
                    data,
                    exp: &exp,
                    plan,
                    tag: &opts.tag,
                    shift: opts.qcd_shift,
                };
                let pending = estimator.book(&req)?;
                if let Some(p) = &pending {
                    rd.update(p.results().clone());
                }
                pending
            }
            None => None,
        };
        Ok((rd, pending))
    }

    fn fill(
        &self,
        variables: &[Variable],
        selections: &[Selection],
        opts: &GetHistsOptions,
    ) -> Result<(FillPlan, HistDict<HistSet>)> {
        let plan = FillPlan::new(variables, selections, &self.ctx.channel);
        let mut hists = HistDict::new();
        if plan.is_empty() {
            log::warn!("gethists: no (selection, variable) pair to fill");
            return Ok((plan, hists));
        }
        let (rd, pending) = self.book_all(&plan, opts)?;
        rd.run(self.mode)?;

        let data = self.active_data();
        let exp = self.active(&self.exp, opts);
        let sig = self.active(&self.sig, opts);
        let exp_names: Vec<&str> = exp
            .iter()
            .flat_map(|s| {
                if opts.split && !s.splits().is_empty() {
                    s.splits().iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
                } else {
                    vec![s.name.as_str()]
                }
            })
            .collect();
        for (sel, vars) in &plan.entries {
            for var in vars {
                let (sk, vk) = (sel.filename.as_str(), var.filename.as_str());
                let mut set = HistSet::new(sk, vk);
                if let Some(r) = data.and_then(|d| rd.get(sk, vk, &d.name)) {
                    set.data = Some(r.histogram()?);
                }
                for name in &exp_names {
                    if let Some(r) = rd.get(sk, vk, name) {
                        set.exp.push(r.histogram()?);
                    }
                }
                for s in &sig {
                    if let Some(r) = rd.get(sk, vk, &s.name) {
                        let mut h = r.histogram()?;
                        if h.style.line_color.is_none() {
                            h.style.line_color = h.style.fill_color.take();
                        }
                        h.style.fill_color = None;
                        set.sig.push(h);
                    }
                }
                hists.insert(sk, vk, set);
            }
        }
        if let Some(p) = pending {
            p.finish(&mut hists, opts.imethod)?;
        }
        for (sel, vars) in &plan.entries {
            for var in vars {
                let Some(set) = hists.get_mut(&sel.filename, &var.filename) else {
                    continue;
                };
                if var.divides_by_bin_width() {
                    set.divide_by_bin_width();
                }
                if opts.errband {
                    set.errband = geterrorband(&set.exp, &[])?;
                }
            }
        }
        Ok((plan, hists))
    }

    /// One [`HistSet`] per eligible (selection, variable) pair, keyed by their
    /// file names. The event loop runs once.
    pub fn gethists(
        &self,
        variables: &[Variable],
        selections: &[Selection],
        opts: &GetHistsOptions,
    ) -> Result<HistDict<HistSet>> {
        Ok(self.fill(variables, selections, opts)?.1)
    }

    /// Like [`gethists`](Self::gethists), wrapped as stacks ready to render.
    pub fn getstack(
        &self,
        variables: &[Variable],
        selections: &[Selection],
        opts: &GetHistsOptions,
    ) -> Result<HistDict<Stack>> {
        let (plan, mut hists) = self.fill(variables, selections, opts)?;
        let mut out = HistDict::new();
        for (sel, vars) in &plan.entries {
            for var in vars {
                if let Some(set) = hists.get_mut(&sel.filename, &var.filename) {
                    let set = std::mem::take(set);
                    out.insert(&sel.filename, &var.filename, Stack::new(set, var, sel, &self.ctx));
                }
            }
        }
        Ok(out)
    }

    /// 2-D histograms of `(x, y)` pairs, keyed by selection file name and
    /// `x:y` file names. Estimators do not apply.
    pub fn gethists2d(
        &self,
        pairs: &[(Variable, Variable)],
        selections: &[Selection],
        opts: &GetHistsOptions,
    ) -> Result<HistDict<HistSet2D>> {
        let book = BookOptions { split: opts.split, tag: opts.tag.clone(), blind: false };
        let single = BookOptions { split: false, ..book.clone() };
        let data = self.active_data();
        let exp = self.active(&self.exp, opts);
        let sig = self.active(&self.sig, opts);
        let mut rd = ResultDict::new();
        if let Some(d) = data {
            let data_pairs: Vec<(Variable, Variable)> =
                pairs.iter().filter(|(x, y)| x.data && y.data).cloned().collect();
            rd.update(d.book2d(&data_pairs, selections, &single)?);
        }
        for s in &exp {
            rd.update(s.book2d(pairs, selections, &book)?);
        }
        for s in &sig {
            rd.update(s.book2d(pairs, selections, &single)?);
        }
        rd.run(self.mode)?;

        let mut out = HistDict::new();
        for sel in selections {
            for (x, y) in pairs {
                let key = pair_key(x, y);
                let sk = sel.filename.as_str();
                if rd.samples(sk, &key).is_empty() {
                    continue;
                }
                let mut set = HistSet2D::default();
                if let Some(r) = data.and_then(|d| rd.get(sk, &key, &d.name)) {
                    set.data = Some(r.histogram2d()?);
                }
                for s in &exp {
                    let names: Vec<&str> = if opts.split && !s.splits().is_empty() {
                        s.splits().iter().map(|c| c.name.as_str()).collect()
                    } else {
                        vec![s.name.as_str()]
                    };
                    for name in names {
                        if let Some(r) = rd.get(sk, &key, name) {
                            set.exp.push(r.histogram2d()?);
                        }
                    }
                }
                for s in &sig {
                    if let Some(r) = rd.get(sk, &key, &s.name) {
                        set.sig.push(r.histogram2d()?);
                    }
                }
                out.insert(sk, &key, set);
            }
        }
        Ok(out)
    }

    /// Sample table as text; also logged at info level.
    pub fn printtable(&self) -> String {
        let mut lines = vec![format!(
            "{:<28} {:<32} {:>12} {:>14} {:>10} {:>8} {}",
            "name", "title", "xsec [pb]", "sumw", "norm", "scale", "extra weights"
        )];
        fn rows(s: &Sample, indent: usize, lines: &mut Vec<String>) {
            lines.push(s.row(indent));
            for c in s.children().iter().chain(s.splits()) {
                rows(c, indent + 2, lines);
            }
        }
        for s in self.samples() {
            rows(s, 0, &mut lines);
        }
        let text = lines.join("\n");
        log::info!("samples of {} {} ({}):\n{text}", self.ctx.channel, self.ctx.era, self.ctx.lumi_text());
        text
    }

    /// Release all open sources.
    pub fn close(&self) {
        self.samples().for_each(Sample::close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Arc;
    use tau_core::{Bookkeeping, MemorySource};

    fn source(name: &str, m: &[f64], q: f64) -> Arc<MemorySource> {
        let cols = vec![("m_vis".into(), m.to_vec()), ("q".into(), vec![q; m.len()])];
        Arc::new(
            MemorySource::new(name, cols)
                .unwrap()
                .with_bookkeeping(Bookkeeping { sumw: Some(1000.0), nevents: None }),
        )
    }

    fn set() -> SampleSet {
        let ctx = AnalysisContext::new("2018", "mutau").unwrap().with_lumi(1.0);
        let data = Sample::data("Data", "Observed").with_source(source("data", &[10.0, 30.0, 30.0, 50.0], -1.0));
        let ztt = Sample::mc("ZTT", "Z -> tautau", 1.0).with_source(source("ztt", &[10.0, 30.0], -1.0));
        let tt = Sample::mc("TT", "ttbar", 0.5).with_source(source("tt", &[50.0, 50.0], 1.0));
        let sig = Sample::mc("H", "Higgs", 2.0).with_signal(true).with_source(source("h", &[30.0], -1.0));
        SampleSet::new(ctx, Some(data), vec![ztt, tt], vec![sig]).with_mode(ExecutionMode::Sequential)
    }

    #[test]
    fn gethists_assembles_sets() {
        let s = set();
        let vars = [Variable::uniform("m_vis", 3, 0.0, 60.0).unwrap()];
        let sels = [Selection::new("all", "")];
        let hists = s.gethists(&vars, &sels, &GetHistsOptions::default()).unwrap();
        let set = hists.get("all", "m_vis").unwrap();
        assert_eq!(set.data.as_ref().unwrap().integral(), 4.0);
        let names: Vec<&str> = set.exp.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(names, ["Z -> tautau", "ttbar"]);
        // norm = lumi * xsec * 1000 / sumw = xsec
        assert_relative_eq!(set.exp[1].integral(), 1.0);
        assert_relative_eq!(set.sig[0].integral(), 2.0);
        assert!(set.sig[0].style.fill_color.is_none());
        let band = set.errband.as_ref().unwrap();
        assert_relative_eq!(band.points[2].y, 1.0);
    }

    #[test]
    fn filter_veto_and_ignore() {
        let s = set().with_ignore(vec!["Data".into()]);
        let vars = [Variable::uniform("m_vis", 3, 0.0, 60.0).unwrap()];
        let sels = [Selection::new("all", "")];
        let opts = GetHistsOptions { veto: vec!["TT".into()], errband: false, ..Default::default() };
        let hists = s.gethists(&vars, &sels, &opts).unwrap();
        let set = hists.get("all", "m_vis").unwrap();
        assert!(set.data.is_none());
        assert_eq!(set.exp.len(), 1);
        assert!(set.errband.is_none());
    }

    #[test]
    fn variable_without_data() {
        let s = set();
        let mut v = Variable::uniform("m_vis", 3, 0.0, 60.0).unwrap();
        v.data = false;
        let hists = s.gethists(&[v], &[Selection::new("all", "")], &GetHistsOptions::default()).unwrap();
        assert!(hists.get("all", "m_vis").unwrap().data.is_none());
    }

    #[test]
    fn split_fills_parts() {
        let mut s = set();
        s.split(&["ZTT"], &[("ZTT_lo", "low", "m_vis<20", None), ("ZTT_hi", "high", "m_vis>=20", None)]).unwrap();
        let vars = [Variable::uniform("m_vis", 3, 0.0, 60.0).unwrap()];
        let hists = s.gethists(&vars, &[Selection::new("all", "")], &GetHistsOptions::default()).unwrap();
        let set = hists.get("all", "m_vis").unwrap();
        let titles: Vec<&str> = set.exp.iter().map(|h| h.title.as_str()).collect();
        assert_eq!(titles, ["low", "high", "ttbar"]);
    }

    #[test]
    fn lookup_and_replace() {
        let mut s = set();
        assert_eq!(s.get(&["T*"]).map(|x| x.name.as_str()), Some("TT"));
        assert_eq!(s.index(&["TT"]), Some(1));
        s.replace(&["ZTT"], Sample::mc("DY", "Drell-Yan", 1.0)).unwrap();
        assert_eq!(s.exp[0].name, "DY");
        assert!(matches!(s.replace(&["nothing"], Sample::mc("X", "X", 1.0)), Err(Error::Config(_))));
        assert!(s.printtable().contains("Drell-Yan"));
    }

    #[test]
    fn shiftweight_copies() {
        let s = set();
        let shifted = s.shiftweight(&["ZTT"], "", "1.1");
        assert_eq!(shifted.exp[0].weight, "1.1");
        assert_eq!(s.exp[0].weight, "");
        let vars = [Variable::uniform("m_vis", 3, 0.0, 60.0).unwrap()];
        let hists = shifted.gethists(&vars, &[Selection::new("all", "")], &GetHistsOptions::default()).unwrap();
        assert_relative_eq!(hists.get("all", "m_vis").unwrap().exp[0].integral(), 2.2, max_relative = 1e-12);
    }
}
