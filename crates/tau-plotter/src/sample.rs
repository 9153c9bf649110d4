//! Samples: a physics process backed by event files, and merged groups of them.
//!
//! A [`Sample`] books deferred fills for every eligible (selection, variable)
//! pair on one [`DataFrame`] over its files. A merged sample holds child
//! samples, books through them and registers one [`MergedResult`] per pair
//! that sums the children on demand.
//!
//! Normalization of simulated samples is
//! `lumi * xsec * 1000 / sumweights * scale` (xsec in pb, lumi in fb⁻¹), applied
//! as a constant factor on top of the per-event weight expressions.

use std::borrow::Cow;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use serde::{Deserialize, Serialize};
use tau_core::{
    DataFrame, EventSource, HistStyle, Histogram2DSpec, HistogramSpec, MeanSpec, ParquetSource,
};

use crate::era::AnalysisContext;
use crate::result::{Deferred, MergedResult, ResultDict};
use crate::selection::{Selection, plot_allowed};
use crate::strings::{glob_match, join_cuts, join_weights, make_hist_name};
use crate::variable::Variable;
use crate::{Error, Result};

/// Kind of sample, which decides weights and normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleKind {
    /// Observed data: weight `dataweight`, normalization 1.
    Data,
    /// Simulation: normalized to cross section and luminosity.
    #[default]
    Mc,
    /// Embedded data: simulation weights, normalization `scale` only.
    Embed,
}

const DEFAULT_COLORS: &[(&str, &str)] = &[
    ("ZTT*", "#ffcc66"),
    ("DY*", "#ffcc66"),
    ("ZL", "#64b6e8"),
    ("ZJ", "#76c176"),
    ("TT*", "#9999cc"),
    ("ST*", "#8cb4dc"),
    ("VV", "#de8c6a"),
    ("W*", "#de5a6a"),
    ("QCD", "#ffccff"),
    ("JTF", "#cc99ff"),
];

/// Fill color for well-known process names.
pub fn default_color(name: &str) -> Option<&'static str> {
    DEFAULT_COLORS.iter().find(|(p, _)| glob_match(p, name)).map(|(_, c)| *c)
}

/// Opened sources are cached until [`Sample::close`].
#[derive(Debug, Default)]
struct FileInputs {
    paths: Vec<String>,
    memory: Vec<Arc<dyn EventSource>>,
    opened: Mutex<Option<Vec<Arc<dyn EventSource>>>>,
}

impl Clone for FileInputs {
    fn clone(&self) -> Self {
        let opened = self.opened.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Self { paths: self.paths.clone(), memory: self.memory.clone(), opened: Mutex::new(opened) }
    }
}

#[derive(Debug, Clone)]
enum Inputs {
    Files(FileInputs),
    Merged(Vec<Sample>),
}

/// Options for [`Sample::book`].
#[derive(Debug, Clone, Default)]
pub struct BookOptions {
    /// Fill split subsamples instead of this sample, if it has any.
    pub split: bool,
    /// Suffix appended to histogram names.
    pub tag: String,
    /// Apply the variable's blinding window to observed data.
    pub blind: bool,
}

/// Selections with the variables eligible for each, after context overrides.
#[derive(Debug, Clone, Default)]
pub struct FillPlan {
    /// `(selection, variables)` in the requested order.
    pub entries: Vec<(Selection, Vec<Variable>)>,
}

impl FillPlan {
    /// Apply each selection's channel context and each variable's selection
    /// context, then keep the pairs allowed by `only`/`veto` on both sides.
    pub fn new(variables: &[Variable], selections: &[Selection], channel: &str) -> Self {
        let entries = selections
            .iter()
            .map(|sel| {
                let mut sel = sel.clone();
                if !channel.is_empty() {
                    sel.changecontext(&[channel]);
                }
                let vars = variables
                    .iter()
                    .filter_map(|var| {
                        let mut v = var.clone();
                        v.changecontext(&[&sel.selection, &sel.name, &sel.filename, channel]);
                        plot_allowed(&v, &sel).then_some(v)
                    })
                    .collect();
                (sel, vars)
            })
            .collect();
        Self { entries }
    }

    /// Number of (selection, variable) pairs.
    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).sum()
    }

    /// `true` if nothing is eligible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Key of a 2-D result in a [`ResultDict`].
pub fn pair_key(x: &Variable, y: &Variable) -> String {
    format!("{}:{}", x.filename, y.filename)
}

/// A physics process with its inputs, normalization, weights and style.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Short name, also the process name in datacards.
    pub name: String,
    /// Legend title.
    pub title: String,
    /// Group label from the sample table (e.g. `DY`, `TT`, `Data`).
    pub group: String,
    /// Data, simulation or embedded.
    pub kind: SampleKind,
    /// Drawn as an overlay instead of in the stack.
    pub is_signal: bool,
    /// Name of the event table.
    pub treename: String,
    /// Cross section in pb.
    pub xsec: f64,
    /// Target luminosity in fb⁻¹.
    pub lumi: f64,
    /// Nominal per-event weight expression.
    pub weight: String,
    /// Extra weight expressions multiplied into the nominal weight.
    pub extraweights: Vec<String>,
    /// Weight expression for observed data.
    pub data_weight: String,
    /// Cut applied to every fill of this sample (used by split subsamples).
    pub cut: String,
    /// User scale factor.
    pub scale: f64,
    /// Drawing style.
    pub style: HistStyle,
    norm_override: Option<f64>,
    sumw: OnceLock<f64>,
    inputs: Inputs,
    splits: Vec<Sample>,
}

impl Sample {
    fn base(name: String, title: String, kind: SampleKind, inputs: Inputs) -> Self {
        let style = match kind {
            SampleKind::Data => HistStyle { marker: true, ..HistStyle::default() },
            _ => HistStyle {
                fill_color: default_color(&name).map(str::to_string),
                ..HistStyle::default()
            },
        };
        Self {
            group: name.clone(),
            name,
            title,
            kind,
            is_signal: false,
            treename: "Events".into(),
            xsec: -1.0,
            lumi: 1.0,
            weight: String::new(),
            extraweights: Vec::new(),
            data_weight: String::new(),
            cut: String::new(),
            scale: 1.0,
            style,
            norm_override: None,
            sumw: OnceLock::new(),
            inputs,
            splits: Vec::new(),
        }
    }

    /// Simulated sample with a cross section in pb.
    pub fn mc(name: impl Into<String>, title: impl Into<String>, xsec: f64) -> Self {
        let mut s = Self::base(name.into(), title.into(), SampleKind::Mc, Inputs::Files(FileInputs::default()));
        s.xsec = xsec;
        s
    }

    /// Observed-data sample.
    pub fn data(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self::base(name.into(), title.into(), SampleKind::Data, Inputs::Files(FileInputs::default()))
    }

    /// Merged sample over `children`.
    ///
    /// Kind, group, luminosity and tree name are taken from the first child.
    /// Children with a different tree name are accepted with a warning.
    pub fn merged(
        name: impl Into<String>,
        title: impl Into<String>,
        children: Vec<Sample>,
    ) -> Result<Self> {
        let name = name.into();
        let first = children
            .first()
            .ok_or_else(|| Error::Config(format!("merged sample '{name}' has no children")))?;
        let (kind, group, lumi, treename, is_signal) =
            (first.kind, first.group.clone(), first.lumi, first.treename.clone(), first.is_signal);
        if let Some(c) = children.iter().find(|c| c.treename != treename) {
            log::warn!(
                "merged sample '{name}': tree name '{}' of '{}' differs from '{treename}'",
                c.treename,
                c.name
            );
        }
        let mut s = Self::base(name, title.into(), kind, Inputs::Merged(children));
        s.group = group;
        s.lumi = lumi;
        s.treename = treename;
        s.is_signal = is_signal;
        s.xsec = s.children().iter().map(|c| c.xsec.max(0.0)).sum();
        Ok(s)
    }

    /// Set the group label.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Set the kind.
    pub fn with_kind(mut self, kind: SampleKind) -> Self {
        if kind == SampleKind::Data {
            self.style.marker = true;
        }
        self.kind = kind;
        self
    }

    /// Mark as signal.
    pub fn with_signal(mut self, on: bool) -> Self {
        self.is_signal = on;
        self
    }

    /// Set the target luminosity (propagates to children).
    pub fn with_lumi(mut self, lumi: f64) -> Self {
        self.set_lumi(lumi);
        self
    }

    /// Set the nominal weight (propagates to children).
    pub fn with_weight(mut self, weight: impl Into<String>) -> Self {
        let w = weight.into();
        self.for_each_leaf(&mut |s: &mut Sample| s.weight = w.clone());
        self.weight = w;
        self
    }

    /// Set the observed-data weight.
    pub fn with_data_weight(mut self, weight: impl Into<String>) -> Self {
        let w = weight.into();
        self.for_each_leaf(&mut |s: &mut Sample| s.data_weight = w.clone());
        self.data_weight = w;
        self
    }

    /// Set the tree name.
    pub fn with_treename(mut self, treename: impl Into<String>) -> Self {
        self.treename = treename.into();
        self
    }

    /// Set the user scale. On a merged sample it multiplies the children's
    /// own scales when booking.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Set the fill color (`#rrggbb`).
    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        let c = color.into();
        if self.is_signal {
            self.style.line_color = Some(c);
        } else {
            self.style.fill_color = Some(c);
        }
        self
    }

    /// Add input file paths.
    pub fn with_files<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Inputs::Files(f) = &mut self.inputs {
            f.paths.extend(paths.into_iter().map(Into::into));
        }
        self
    }

    /// Add an already open source.
    pub fn with_source(mut self, source: Arc<dyn EventSource>) -> Self {
        if let Inputs::Files(f) = &mut self.inputs {
            f.memory.push(source);
        }
        self
    }

    /// Fix the sum of generator weights instead of reading it from the inputs.
    pub fn with_sumweights(mut self, sumw: f64) -> Self {
        self.sumw = OnceLock::from(sumw);
        self
    }

    /// Resolve `$ERA`, `$CHANNEL`, `$TAG`, `$GROUP` and `$SAMPLE` in `template` and
    /// add the resulting file. A `*` in the file name matches every file in the
    /// directory. Missing files are reported once per sample.
    pub fn with_file_template(self, template: &str, ctx: &AnalysisContext) -> Self {
        let expanded =
            ctx.expand(&template.replace("$GROUP", &self.group).replace("$SAMPLE", &self.name));
        let path = ctx.resolve_path(&expanded);
        let files = expand_glob(&path);
        if files.is_empty() {
            ctx.warn_once(
                &format!("missing-files:{}", self.name),
                &format!("sample '{}': no input file matches '{path}'", self.name),
            );
            return self.with_files([path]);
        }
        self.with_files(files)
    }

    /// Whether this sample merges children.
    pub fn is_merged(&self) -> bool {
        matches!(self.inputs, Inputs::Merged(_))
    }

    /// Whether this is observed data.
    pub fn is_data(&self) -> bool {
        self.kind == SampleKind::Data
    }

    /// Whether this is embedded data.
    pub fn is_embed(&self) -> bool {
        self.kind == SampleKind::Embed
    }

    /// Children of a merged sample (empty otherwise).
    pub fn children(&self) -> &[Sample] {
        match &self.inputs {
            Inputs::Merged(c) => c,
            Inputs::Files(_) => &[],
        }
    }

    /// Mutable children of a merged sample.
    pub fn children_mut(&mut self) -> &mut [Sample] {
        match &mut self.inputs {
            Inputs::Merged(c) => c,
            Inputs::Files(_) => &mut [],
        }
    }

    /// Split subsamples.
    pub fn splits(&self) -> &[Sample] {
        &self.splits
    }

    /// Input paths, including those of children.
    pub fn paths(&self) -> Vec<String> {
        match &self.inputs {
            Inputs::Files(f) => f.paths.clone(),
            Inputs::Merged(c) => c.iter().flat_map(|s| s.paths()).collect(),
        }
    }

    fn for_each_leaf(&mut self, f: &mut dyn FnMut(&mut Sample)) {
        if let Inputs::Merged(children) = &mut self.inputs {
            for c in children.iter_mut() {
                f(c);
                c.for_each_leaf(f);
            }
        }
    }

    /// Children to book, with this sample's own scale folded into them.
    fn booked_children(&self) -> Cow<'_, [Sample]> {
        let children = self.children();
        if self.scale == 1.0 {
            return Cow::Borrowed(children);
        }
        Cow::Owned(
            children
                .iter()
                .map(|c| {
                    let mut c = c.clone();
                    c.multiply_scale(self.scale);
                    c
                })
                .collect(),
        )
    }

    /// Set the luminosity (propagates to children).
    pub fn set_lumi(&mut self, lumi: f64) {
        self.lumi = lumi;
        self.for_each_leaf(&mut |s: &mut Sample| s.lumi = lumi);
    }

    /// Whether any shell pattern matches the name or title.
    pub fn match_patterns(&self, patterns: &[&str]) -> bool {
        patterns.iter().any(|p| glob_match(p, &self.name) || glob_match(p, &self.title))
    }

    /// Multiply `weight` into the nominal weight (propagates to children).
    pub fn add_weight(&mut self, weight: &str) {
        self.weight = join_weights(&[&self.weight, weight]);
        self.for_each_leaf(&mut |s: &mut Sample| s.weight = join_weights(&[&s.weight, weight]));
    }

    /// Add an extra weight expression. Merged samples pass it to their children.
    pub fn add_extraweight(&mut self, weight: &str) {
        if weight.trim().is_empty() {
            return;
        }
        match &mut self.inputs {
            Inputs::Merged(children) => children.iter_mut().for_each(|c| c.add_extraweight(weight)),
            Inputs::Files(_) => self.extraweights.push(weight.to_string()),
        }
    }

    /// Replace `lumi * xsec * 1000 / sumweights` by a fixed normalization.
    /// Merged samples pass it to their children.
    pub fn set_norm(&mut self, norm: f64) {
        self.norm_override = Some(norm);
        self.for_each_leaf(&mut |s: &mut Sample| s.norm_override = Some(norm));
    }

    /// Fixed normalization, if set.
    pub fn norm_override(&self) -> Option<f64> {
        self.norm_override
    }

    /// Multiply the scale. Merged samples pass it to their children.
    pub fn multiply_scale(&mut self, f: f64) {
        match &mut self.inputs {
            Inputs::Merged(children) => children.iter_mut().for_each(|c| c.multiply_scale(f)),
            Inputs::Files(_) => self.scale *= f,
        }
    }

    /// Replace `from` by `to` in the nominal and extra weights, in children and
    /// split subsamples too.
    pub fn replace_weight(&mut self, from: &str, to: &str) {
        fn swap(s: &mut Sample, from: &str, to: &str) {
            s.weight = s.weight.replace(from, to);
            for w in &mut s.extraweights {
                *w = w.replace(from, to);
            }
            s.splits.iter_mut().for_each(|c| swap(c, from, to));
        }
        swap(self, from, to);
        self.for_each_leaf(&mut |s: &mut Sample| swap(s, from, to));
    }

    /// Point every input file at its systematic variant: `DY.parquet` becomes
    /// `DY<tag>.parquet`. Open sources are dropped; in-memory sources are kept.
    pub fn shift_files(&mut self, tag: &str) {
        fn retag(s: &mut Sample, tag: &str) {
            if let Inputs::Files(f) = &mut s.inputs {
                if !f.memory.is_empty() {
                    log::warn!("sample '{}': in-memory sources cannot be shifted by '{tag}'", s.name);
                }
                for p in &mut f.paths {
                    *p = insert_tag(p, tag);
                }
                *f.opened.lock().unwrap_or_else(PoisonError::into_inner) = None;
            }
            s.splits.iter_mut().for_each(|c| retag(c, tag));
        }
        retag(self, tag);
        self.for_each_leaf(&mut |s: &mut Sample| retag(s, tag));
    }

    /// Attach split subsamples `(name, title, cut, color)`, each a copy of this
    /// sample restricted by `cut`.
    pub fn split(&mut self, parts: &[(&str, &str, &str, Option<&str>)]) {
        self.splits = parts
            .iter()
            .map(|&(name, title, cut, color)| {
                let mut s = self.clone();
                s.splits.clear();
                s.name = name.to_string();
                s.title = title.to_string();
                s.cut = join_cuts(&[&self.cut, cut]);
                if let Some(c) = color.map(str::to_string).or_else(|| default_color(name).map(str::to_string)) {
                    s.style.fill_color = Some(c);
                }
                s
            })
            .collect();
    }

    /// Open (or reuse) the sources of a file-backed sample.
    pub fn sources(&self) -> Result<Vec<Arc<dyn EventSource>>> {
        let Inputs::Files(f) = &self.inputs else {
            return Err(Error::Config(format!("merged sample '{}' has no own sources", self.name)));
        };
        let mut opened = f.opened.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(s) = opened.as_ref() {
            return Ok(s.clone());
        }
        if f.paths.is_empty() && f.memory.is_empty() {
            return Err(Error::Config(format!("sample '{}' has no inputs", self.name)));
        }
        let mut sources: Vec<Arc<dyn EventSource>> = Vec::with_capacity(f.paths.len() + f.memory.len());
        for p in &f.paths {
            sources.push(Arc::new(ParquetSource::open(p)?));
        }
        sources.extend(f.memory.iter().cloned());
        log::debug!("sample '{}': opened {} source(s)", self.name, sources.len());
        *opened = Some(sources.clone());
        Ok(sources)
    }

    /// Release open sources (recursively for merged samples).
    pub fn close(&self) {
        match &self.inputs {
            Inputs::Files(f) => {
                *f.opened.lock().unwrap_or_else(PoisonError::into_inner) = None;
            }
            Inputs::Merged(children) => children.iter().for_each(Sample::close),
        }
        self.splits.iter().for_each(Sample::close);
    }

    /// Number of clusters per input, `(name, clusters)`.
    pub fn clusters(&self) -> Result<Vec<(String, usize)>> {
        match &self.inputs {
            Inputs::Files(_) => {
                Ok(self.sources()?.iter().map(|s| (s.name().to_string(), s.n_clusters())).collect())
            }
            Inputs::Merged(children) => {
                let mut out = Vec::new();
                for c in children {
                    out.extend(c.clusters()?);
                }
                Ok(out)
            }
        }
    }

    /// Sum of generator weights, read once.
    ///
    /// Taken from the `taufw.sumw` metadata of each input; inputs without it
    /// count their rows. Merged samples sum their children.
    pub fn sumweights(&self) -> Result<f64> {
        if let Some(v) = self.sumw.get() {
            return Ok(*v);
        }
        let total = match &self.inputs {
            Inputs::Merged(children) => {
                let mut t = 0.0;
                for c in children {
                    t += c.sumweights()?;
                }
                t
            }
            Inputs::Files(_) => {
                let mut t = 0.0;
                for src in self.sources()? {
                    t += match src.bookkeeping().sumw {
                        Some(w) => w,
                        None => {
                            if self.kind == SampleKind::Mc {
                                log::warn!(
                                    "sample '{}': no sum of weights in '{}', using its row count",
                                    self.name,
                                    src.name()
                                );
                            }
                            src.n_entries() as f64
                        }
                    };
                }
                t
            }
        };
        Ok(*self.sumw.get_or_init(|| total))
    }

    /// Constant normalization factor applied to every fill.
    pub fn norm(&self) -> Result<f64> {
        match self.kind {
            SampleKind::Data => Ok(1.0),
            SampleKind::Embed => Ok(self.scale),
            SampleKind::Mc => {
                let base = match self.norm_override {
                    Some(n) => n,
                    None if self.xsec <= 0.0 => 1.0,
                    None => {
                        let sumw = self.sumweights()?;
                        if sumw <= 0.0 {
                            return Err(Error::Normalization(format!(
                                "sample '{}' has sum of weights {sumw}",
                                self.name
                            )));
                        }
                        self.lumi * self.xsec * 1000.0 / sumw
                    }
                };
                Ok(base * self.scale)
            }
        }
    }

    /// Per-event weight for a fill under `sel` and `var`.
    fn event_weight(&self, sel: &Selection, var: &Variable) -> String {
        if self.kind == SampleKind::Data {
            return join_weights(&[&self.data_weight, &var.data_weight]);
        }
        let mut parts: Vec<&str> = vec![&self.weight];
        parts.extend(self.extraweights.iter().map(String::as_str));
        parts.push(&sel.weight);
        parts.push(&var.weight);
        join_weights(&parts)
    }

    fn event_cut(&self, sel: &Selection, var: &Variable, opts: &BookOptions) -> Result<String> {
        let blind = match (self.kind, opts.blind, var.blind_window) {
            (SampleKind::Data, true, Some((a, b))) => var.blind(a, b)?,
            _ => String::new(),
        };
        Ok(join_cuts(&[&sel.selection, &var.cut, &self.cut, &blind]))
    }

    fn hist_name(&self, labels: &[&str], tag: &str) -> String {
        let last = format!("{}{}", self.name, tag);
        let mut all = labels.to_vec();
        all.push(&last);
        make_hist_name(&all)
    }

    /// Book 1-D histograms for every (selection, variable) pair, without
    /// running the event loop.
    pub fn getrdframe(
        &self,
        variables: &[Variable],
        selections: &[Selection],
        split: bool,
    ) -> Result<ResultDict> {
        let plan = FillPlan::new(variables, selections, "");
        self.book(&plan, &BookOptions { split, ..BookOptions::default() })
    }

    /// Book 1-D histograms for a prepared plan.
    pub fn book(&self, plan: &FillPlan, opts: &BookOptions) -> Result<ResultDict> {
        if opts.split && !self.splits.is_empty() {
            let mut rd = ResultDict::new();
            let inner = BookOptions { split: false, ..opts.clone() };
            for s in &self.splits {
                rd.update(s.book(plan, &inner)?);
            }
            return Ok(rd);
        }
        let mut rd = ResultDict::new();
        match &self.inputs {
            Inputs::Merged(_) => {
                let children = self.booked_children();
                let inner = BookOptions { split: false, ..opts.clone() };
                let child_rds =
                    children.iter().map(|c| c.book(plan, &inner)).collect::<Result<Vec<_>>>()?;
                for (sel, vars) in &plan.entries {
                    for var in vars {
                        let name = self.hist_name(&[&var.filename, &sel.filename], &opts.tag);
                        let mut merged = MergedResult::new(name, &self.title, self.style.clone());
                        for (child, crd) in children.iter().zip(&child_rds) {
                            if let Some(r) = crd.get(&sel.filename, &var.filename, &child.name) {
                                merged.push(r.clone());
                            }
                        }
                        rd.add(&sel.filename, &var.filename, &self.name, Deferred::Merged(merged));
                    }
                }
            }
            Inputs::Files(_) => {
                let frame = DataFrame::new(&self.name, self.sources()?);
                let norm = self.norm()?;
                for (sel, vars) in &plan.entries {
                    for var in vars {
                        let name = self.hist_name(&[&var.filename, &sel.filename], &opts.tag);
                        let weight = self.event_weight(sel, var);
                        let cut = self.event_cut(sel, var, opts)?;
                        let poisson = self.kind == SampleKind::Data && is_unit_weight(&weight);
                        let mut template = var.gethist(Some(&name), Some(&self.title), poisson)?;
                        template.y_title = var.y_title();
                        template.style = self.style.clone();
                        let spec = HistogramSpec::new(&name, &var.name, var.bin_edges())?
                            .with_selection(&cut)?
                            .with_weight(&weight)?
                            .with_scale(norm);
                        log::debug!("{}: book {name} cut={cut:?} weight={weight:?} norm={norm}", self.name);
                        let ptr = frame.book_hist(spec, Some(template));
                        rd.add(&sel.filename, &var.filename, &self.name, Deferred::Single(ptr));
                    }
                }
            }
        }
        Ok(rd)
    }

    /// Book 2-D histograms of `(x, y)` pairs under each selection.
    ///
    /// Results are keyed by [`pair_key`].
    pub fn book2d(
        &self,
        pairs: &[(Variable, Variable)],
        selections: &[Selection],
        opts: &BookOptions,
    ) -> Result<ResultDict> {
        if opts.split && !self.splits.is_empty() {
            let mut rd = ResultDict::new();
            let inner = BookOptions { split: false, ..opts.clone() };
            for s in &self.splits {
                rd.update(s.book2d(pairs, selections, &inner)?);
            }
            return Ok(rd);
        }
        let eligible: Vec<(&Selection, &Variable, &Variable)> = selections
            .iter()
            .flat_map(|sel| {
                pairs
                    .iter()
                    .filter(move |(x, y)| plot_allowed(x, sel) && plot_allowed(y, sel))
                    .map(move |(x, y)| (sel, x, y))
            })
            .collect();
        let mut rd = ResultDict::new();
        match &self.inputs {
            Inputs::Merged(_) => {
                let children = self.booked_children();
                let inner = BookOptions { split: false, ..opts.clone() };
                let child_rds = children
                    .iter()
                    .map(|c| c.book2d(pairs, selections, &inner))
                    .collect::<Result<Vec<_>>>()?;
                for (sel, x, y) in eligible {
                    let key = pair_key(x, y);
                    let name = self.hist_name(&[&x.filename, &y.filename, &sel.filename], &opts.tag);
                    let mut merged = MergedResult::new(name, &self.title, self.style.clone());
                    for (child, crd) in children.iter().zip(&child_rds) {
                        if let Some(r) = crd.get(&sel.filename, &key, &child.name) {
                            merged.push(r.clone());
                        }
                    }
                    rd.add(&sel.filename, &key, &self.name, Deferred::Merged(merged));
                }
            }
            Inputs::Files(_) => {
                let frame = DataFrame::new(&self.name, self.sources()?);
                let norm = self.norm()?;
                for (sel, x, y) in eligible {
                    let name = self.hist_name(&[&x.filename, &y.filename, &sel.filename], &opts.tag);
                    let weight = join_weights(&[&self.event_weight(sel, x), &y.weight]);
                    let cut = join_cuts(&[&sel.selection, &x.cut, &y.cut, &self.cut]);
                    let spec = Histogram2DSpec::new(&name, &x.name, &y.name, x.bin_edges(), y.bin_edges())?
                        .with_selection(&cut)?
                        .with_weight(&weight)?
                        .with_scale(norm);
                    let ptr = frame.book_hist2d(spec);
                    rd.add(&sel.filename, &pair_key(x, y), &self.name, Deferred::Single(ptr));
                }
            }
        }
        Ok(rd)
    }

    /// Book the weighted mean of `var` under each selection.
    ///
    /// Means carry the sample normalization in their weights, so merged
    /// samples combine children in proportion to their expected yields.
    pub fn getmean(&self, var: &Variable, selections: &[Selection]) -> Result<ResultDict> {
        let mut rd = ResultDict::new();
        match &self.inputs {
            Inputs::Merged(_) => {
                let children = self.booked_children();
                let child_rds =
                    children.iter().map(|c| c.getmean(var, selections)).collect::<Result<Vec<_>>>()?;
                for sel in selections {
                    let name = self.hist_name(&[&var.filename, &sel.filename], "");
                    let mut merged = MergedResult::new(name, &self.title, self.style.clone());
                    for (child, crd) in children.iter().zip(&child_rds) {
                        if let Some(r) = crd.get(&sel.filename, &var.filename, &child.name) {
                            merged.push(r.clone());
                        }
                    }
                    rd.add(&sel.filename, &var.filename, &self.name, Deferred::Merged(merged));
                }
            }
            Inputs::Files(_) => {
                let frame = DataFrame::new(&self.name, self.sources()?);
                let norm = self.norm()?;
                for sel in selections {
                    let name = self.hist_name(&[&var.filename, &sel.filename], "");
                    let spec = MeanSpec::new(name, &var.name)?
                        .with_selection(&join_cuts(&[&sel.selection, &var.cut, &self.cut]))?
                        .with_weight(&self.event_weight(sel, var))?
                        .with_scale(norm);
                    let ptr = frame.book_mean(spec);
                    rd.add(&sel.filename, &var.filename, &self.name, Deferred::Single(ptr));
                }
            }
        }
        Ok(rd)
    }

    /// One row of the sample table.
    pub fn row(&self, indent: usize) -> String {
        let pad = " ".repeat(indent);
        let xsec = if self.xsec > 0.0 { format!("{:.4}", self.xsec) } else { "-".into() };
        let sumw = self.sumw.get().map_or_else(|| "-".to_string(), |w| format!("{w:.1}"));
        let norm = match (self.kind, self.norm_override) {
            (SampleKind::Data, _) => "1".to_string(),
            (_, Some(n)) => format!("{n:.4}"),
            _ => "-".to_string(),
        };
        format!(
            "{:<28} {:<32} {:>12} {:>14} {:>10} {:>8} {}",
            format!("{pad}{}", self.name),
            self.title,
            xsec,
            sumw,
            norm,
            format!("{}", self.scale),
            self.extraweights.join("*")
        )
    }
}

fn insert_tag(path: &str, tag: &str) -> String {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let at = name_start + dot;
            format!("{}{tag}{}", &path[..at], &path[at..])
        }
        _ => format!("{path}{tag}"),
    }
}

fn is_unit_weight(w: &str) -> bool {
    let w = w.trim();
    w.is_empty() || w == "1" || w == "1.0"
}

/// Paths matching `pattern`, where only the file name may contain `*` or `?`.
fn expand_glob(pattern: &str) -> Vec<String> {
    if pattern.contains("://") {
        return vec![pattern.to_string()];
    }
    let path = Path::new(pattern);
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    if !name.contains(['*', '?']) {
        return if path.exists() { vec![pattern.to_string()] } else { Vec::new() };
    }
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Vec::new();
    };
    let mut out: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let fname = e.file_name().into_string().ok()?;
            glob_match(name, &fname).then(|| dir.join(fname).display().to_string())
        })
        .collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tau_core::{Bookkeeping, ExecutionMode, MemorySource};

    fn flat(name: &str, n: usize, sumw: Option<f64>) -> Arc<dyn EventSource> {
        let x: Vec<f64> = (0..n).map(|i| (i % 10) as f64 + 0.5).collect();
        let q: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let src = MemorySource::new(name, vec![("x".into(), x), ("q".into(), q)])
            .unwrap()
            .with_cluster_size(64)
            .with_bookkeeping(Bookkeeping { sumw, nevents: None });
        Arc::new(src)
    }

    fn var() -> Variable {
        Variable::uniform("x", 10, 0.0, 10.0).unwrap()
    }

    #[test]
    fn mc_normalization() {
        let s = Sample::mc("TT", "ttbar", 2.0).with_lumi(10.0).with_source(flat("tt", 500, Some(1000.0)));
        assert_relative_eq!(s.norm().unwrap(), 10.0 * 2.0 * 1000.0 / 1000.0);
        let rd = s.getrdframe(&[var()], &[Selection::new("all", "")], false).unwrap();
        rd.run(ExecutionMode::Sequential).unwrap();
        let h = rd.get("all", "x", "TT").unwrap().histogram().unwrap();
        assert_relative_eq!(h.integral(), 500.0 * 20.0, max_relative = 1e-12);
        assert_eq!(h.title, "ttbar");
        assert_eq!(h.name, "x_all_TT");
    }

    #[test]
    fn sumweights_falls_back_to_rows() {
        let s = Sample::mc("W", "W + jets", 1.0).with_source(flat("w", 40, None));
        assert_eq!(s.sumweights().unwrap(), 40.0);
    }

    #[test]
    fn non_positive_sumweights_fail() {
        let s = Sample::mc("W", "W + jets", 1.0).with_source(flat("w", 40, Some(-3.0)));
        assert!(matches!(s.norm(), Err(Error::Normalization(_))));
        let s = Sample::mc("W", "W + jets", -1.0).with_source(flat("w", 40, Some(-3.0)));
        assert_eq!(s.norm().unwrap(), 1.0);
    }

    #[test]
    fn data_and_embed_normalization() {
        let d = Sample::data("Data", "Observed").with_scale(5.0);
        assert_eq!(d.norm().unwrap(), 1.0);
        let e = Sample::mc("EMB", "Embedded", 1.0).with_kind(SampleKind::Embed).with_scale(0.9);
        assert_eq!(e.norm().unwrap(), 0.9);
    }

    #[test]
    fn data_uses_poisson_errors() {
        let d = Sample::data("Data", "Observed").with_source(flat("data", 30, None));
        let rd = d.getrdframe(&[var()], &[Selection::new("all", "")], false).unwrap();
        let h = rd.get("all", "x", "Data").unwrap().histogram().unwrap();
        assert_eq!(h.error_mode, tau_core::ErrorMode::Poisson);
        assert_eq!(h.integral(), 30.0);
    }

    #[test]
    fn merged_sums_children() {
        let a = Sample::mc("DY1", "DY 1j", 1.0).with_source(flat("a", 100, Some(100.0)));
        let b = Sample::mc("DY2", "DY 2j", 1.0).with_source(flat("b", 50, Some(100.0)));
        let m = Sample::merged("DY", "Drell-Yan", vec![a, b]).unwrap().with_lumi(1.0);
        assert_eq!(m.sumweights().unwrap(), 200.0);
        let sels = [Selection::new("pos", "q>0")];
        let rd = m.getrdframe(&[var()], &sels, false).unwrap();
        assert_eq!(rd.len(), 1);
        rd.run(ExecutionMode::Parallel(2)).unwrap();
        let h = rd.get("pos", "x", "DY").unwrap().histogram().unwrap();
        // each child: half the rows pass, norm = 1000 / 100
        assert_relative_eq!(h.integral(), (50.0 + 25.0) * 10.0, max_relative = 1e-12);
        assert_eq!(h.title, "Drell-Yan");
    }

    #[test]
    fn merged_scale_and_norm_reach_children() {
        let children = || {
            vec![
                Sample::mc("A", "A", 1.0).with_source(flat("a", 100, Some(1000.0))),
                Sample::mc("B", "B", 1.0).with_source(flat("b", 100, Some(1000.0))),
            ]
        };
        let integral = |m: &Sample| {
            let rd = m.getrdframe(&[var()], &[Selection::new("all", "")], false).unwrap();
            rd.run(ExecutionMode::Sequential).unwrap();
            rd.get("all", "x", "M").unwrap().histogram().unwrap().integral()
        };
        // each child yields 100 at unit norm
        let m = Sample::merged("M", "M", children()).unwrap().with_scale(2.0);
        assert_relative_eq!(integral(&m), 400.0, max_relative = 1e-12);
        assert_eq!(m.children()[0].scale, 1.0);

        let inner = Sample::merged("M", "M", children()).unwrap().with_scale(3.0);
        let mut outer = Sample::merged("M", "M", vec![inner]).unwrap().with_scale(0.5);
        assert_relative_eq!(integral(&outer), 300.0, max_relative = 1e-12);

        outer.set_norm(0.25);
        assert_eq!(outer.children()[0].children()[1].norm_override(), Some(0.25));
        assert_relative_eq!(integral(&outer), 200.0 * 0.25 * 1.5, max_relative = 1e-12);
    }

    #[test]
    fn extraweight_and_split() {
        let mut s = Sample::mc("ZTT", "Z -> tautau", -1.0).with_source(flat("z", 20, None));
        s.add_extraweight("2");
        s.split(&[("ZTT_pos", "q > 0", "q>0", None), ("ZTT_neg", "q < 0", "q<0", Some("#000000"))]);
        assert_eq!(s.splits().len(), 2);
        assert_eq!(s.splits()[1].style.fill_color.as_deref(), Some("#000000"));
        let plan = FillPlan::new(&[var()], &[Selection::new("all", "")], "");
        let rd = s.book(&plan, &BookOptions { split: true, ..Default::default() }).unwrap();
        assert!(rd.get("all", "x", "ZTT").is_none());
        let pos = rd.get("all", "x", "ZTT_pos").unwrap().histogram().unwrap();
        assert_eq!(pos.integral(), 20.0);
    }

    #[test]
    fn shifted_files_and_weights() {
        let a = Sample::mc("DY1", "DY 1j", 1.0).with_files(["/in/DY1.parquet"]).with_weight("genweight*idSF");
        let b = Sample::mc("DY2", "DY 2j", 1.0).with_files(["/in/v1.2/DY2"]);
        let mut m = Sample::merged("DY", "Drell-Yan", vec![a, b]).unwrap();
        m.shift_files("_TESUp");
        assert_eq!(m.paths(), vec!["/in/DY1_TESUp.parquet", "/in/v1.2/DY2_TESUp"]);
        m.replace_weight("idSF", "idSF_up");
        assert_eq!(m.children()[0].weight, "genweight*idSF_up");
    }

    #[test]
    fn patterns_match_name_or_title() {
        let s = Sample::mc("DYJetsToLL_M-50", "Drell-Yan 50", 1.0);
        assert!(s.match_patterns(&["DY*"]));
        assert!(s.match_patterns(&["Drell*"]));
        assert!(!s.match_patterns(&["*Jets"]));
    }

    #[test]
    fn missing_file_is_unavailable() {
        let s = Sample::mc("TT", "ttbar", 1.0).with_files(["/nonexistent/TT.parquet"]);
        assert!(matches!(s.sources(), Err(Error::FileUnavailable { .. })));
    }

    #[test]
    fn file_template_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mutau_DY_2018.parquet");
        tau_core::write_parquet(&path, &[("x".into(), vec![1.0, 2.0])], Bookkeeping::default(), 10).unwrap();
        let ctx = AnalysisContext::new("2018", "mutau").unwrap();
        let tpl = format!("{}/$CHANNEL_$SAMPLE_$ERA.parquet", dir.path().display());
        let s = Sample::mc("DY", "DY", 1.0).with_file_template(&tpl, &ctx);
        assert_eq!(s.paths(), vec![path.display().to_string()]);
        assert!(!ctx.has_warned("missing-files:DY"));
        let s = Sample::mc("TT", "TT", 1.0).with_file_template(&tpl, &ctx);
        assert_eq!(s.paths().len(), 1);
        assert!(ctx.has_warned("missing-files:TT"));
        let star = format!("{}/mutau_*.parquet", dir.path().display());
        assert_eq!(Sample::mc("X", "X", 1.0).with_file_template(&star, &ctx).paths().len(), 1);
    }
}
