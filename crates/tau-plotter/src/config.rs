//! Analysis configuration (YAML or JSON).
//!
//! One file describes the era and channel, the sample table, sample
//! combinations, selections, variables and systematic variations:
//!
//! ```yaml
//! era: UL2018
//! channel: mutau
//! files: "samples/$ERA/$GROUP/$SAMPLE_$CHANNEL$TAG.parquet"
//! weight: "genweight*trigweight"
//! method: QCD_ABCD
//! samples:
//!   data: [[Data, SingleMuon_Run2018A, Observed]]
//!   exp:
//!     - [DY, DYJetsToLL_M-50, "Drell-Yan", 5343.0]
//!     - [TT, TTTo2L2Nu, "ttbar", 88.29, {extraweight: ttptweight}]
//! stitches: [{patterns: ["DY*J*M-50*"], name: DY, kfactor: 1.14}]
//! selections: [{name: baseline, cut: "q_1*q_2<0 && iso_1<0.15"}]
//! variables: [{name: m_vis, bins: [40, 0, 200], title: "m_{vis} [GeV]"}]
//! systematics:
//!   - {name: shape_tes, processes: [ZTT], up: {files: _TES1p03}, down: {files: _TES0p97}}
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tau_core::ExecutionMode;

use crate::context::Context;
use crate::datacard::SystVariation;
use crate::era::AnalysisContext;
use crate::sample::{Sample, SampleKind};
use crate::sampleset::SampleSet;
use crate::selection::Selection;
use crate::stitch::StitchOptions;
use crate::variable::{Binning, Variable};
use crate::{Error, Result};

/// Extra options of a sample row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SampleOptions {
    /// Extra weight expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extraweight: Option<String>,
    /// Scale factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    /// Event table name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treename: Option<String>,
    /// Kind override (`data`, `mc` or `embed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<SampleKind>,
    /// Fill or line color (`#rrggbb`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// File template for this sample only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<String>,
    /// Fixed sum of generator weights.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sumw: Option<f64>,
}

/// One field of a sample row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowItem {
    /// Cross section.
    Number(f64),
    /// Group, name or title.
    Text(String),
    /// Extra options.
    Options(SampleOptions),
}

/// A sample row: `[group, name, title, xsec, {options}]` for simulation,
/// `[group, name, title, {options}]` for observed data (title and options optional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleRow(pub Vec<RowItem>);

#[derive(Debug)]
struct ParsedRow {
    group: String,
    name: String,
    title: String,
    xsec: f64,
    opts: SampleOptions,
}

impl SampleRow {
    fn parse(&self, data: bool) -> Result<ParsedRow> {
        let bad = || Error::Config(format!("malformed sample row {:?}", self.0));
        let mut it = self.0.iter().peekable();
        fn text(it: &mut std::iter::Peekable<std::slice::Iter<'_, RowItem>>) -> Option<String> {
            match it.peek() {
                Some(RowItem::Text(s)) => {
                    let s = s.clone();
                    it.next();
                    Some(s)
                }
                _ => None,
            }
        }
        let group = text(&mut it).ok_or_else(bad)?;
        let name = text(&mut it).ok_or_else(bad)?;
        let title = text(&mut it);
        let xsec = match it.peek() {
            Some(RowItem::Number(x)) if !data => {
                let x = *x;
                it.next();
                Some(x)
            }
            _ => None,
        };
        let opts = match it.next() {
            Some(RowItem::Options(o)) => o.clone(),
            None => SampleOptions::default(),
            Some(_) => return Err(bad()),
        };
        if it.next().is_some() {
            return Err(bad());
        }
        let xsec = match (data, title.as_ref(), xsec) {
            (true, _, _) => -1.0,
            (false, Some(_), Some(x)) => x,
            _ => return Err(bad()),
        };
        Ok(ParsedRow { title: title.unwrap_or_else(|| name.clone()), group, name, xsec, opts })
    }
}

/// Sample table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleTable {
    /// Observed data rows; several are merged into one `Data` sample.
    #[serde(default)]
    pub data: Vec<SampleRow>,
    /// Expected process rows in stack order.
    #[serde(default)]
    pub exp: Vec<SampleRow>,
    /// Signal rows.
    #[serde(default)]
    pub sig: Vec<SampleRow>,
}

/// Merge matching samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinConfig {
    /// Shell-style patterns.
    pub patterns: Vec<String>,
    /// Merged name.
    pub name: String,
    /// Merged title.
    #[serde(default)]
    pub title: Option<String>,
}

/// Stitch inclusive and jet-binned samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StitchConfig {
    /// Shell-style patterns.
    pub patterns: Vec<String>,
    /// Stitched name.
    #[serde(default)]
    pub name: Option<String>,
    /// Stitched title.
    #[serde(default)]
    pub title: Option<String>,
    /// Pattern of the inclusive sample.
    #[serde(default)]
    pub incl: Option<String>,
    /// Higher-order inclusive cross section in pb.
    #[serde(default)]
    pub xsec: Option<f64>,
    /// Explicit k-factor.
    #[serde(default)]
    pub kfactor: Option<f64>,
    /// Parton multiplicity column.
    #[serde(default)]
    pub npart: Option<String>,
}

/// One part of a sample split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitPart {
    /// Name.
    pub name: String,
    /// Title.
    pub title: String,
    /// Cut.
    pub cut: String,
    /// Color.
    #[serde(default)]
    pub color: Option<String>,
}

/// Split an expected sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Pattern of the sample.
    pub sample: String,
    /// Parts.
    pub parts: Vec<SplitPart>,
}

/// A selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Name.
    pub name: String,
    /// Cut.
    #[serde(default)]
    pub cut: String,
    /// Title.
    #[serde(default)]
    pub title: Option<String>,
    /// File name.
    #[serde(default)]
    pub filename: Option<String>,
    /// Weight.
    #[serde(default)]
    pub weight: Option<String>,
    /// Only variables matching these patterns.
    #[serde(default)]
    pub only: Vec<String>,
    /// No variables matching these patterns.
    #[serde(default)]
    pub veto: Vec<String>,
    /// Cut per channel pattern.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl SelectionConfig {
    /// Build the selection.
    pub fn build(&self) -> Selection {
        let mut s = Selection::new(&self.name, &self.cut)
            .with_only(self.only.clone())
            .with_veto(self.veto.clone());
        if let Some(t) = &self.title {
            s = s.with_title(t);
        }
        if let Some(f) = &self.filename {
            s = s.with_filename(f);
        }
        if let Some(w) = &self.weight {
            s = s.with_weight(w);
        }
        if !self.context.is_empty() {
            s = s.with_context(Context::new(self.context.clone(), None));
        }
        s
    }
}

/// Per-selection overrides of a variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableContext {
    /// Titles.
    #[serde(default)]
    pub title: BTreeMap<String, String>,
    /// Binnings (`{nbins, xmin, xmax}` or edges).
    #[serde(default)]
    pub binning: BTreeMap<String, Binning>,
    /// Legend positions.
    #[serde(default)]
    pub position: BTreeMap<String, String>,
    /// Cuts.
    #[serde(default)]
    pub cut: BTreeMap<String, String>,
    /// Weights.
    #[serde(default)]
    pub weight: BTreeMap<String, String>,
    /// Y margins.
    #[serde(default)]
    pub ymargin: BTreeMap<String, f64>,
    /// Blinding windows.
    #[serde(default)]
    pub blind: BTreeMap<String, (f64, f64)>,
}

/// A variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableConfig {
    /// Expression.
    pub name: String,
    /// Uniform binning `[nbins, xmin, xmax]`.
    #[serde(default)]
    pub bins: Option<(usize, f64, f64)>,
    /// Explicit edges.
    #[serde(default)]
    pub edges: Option<Vec<f64>>,
    /// Axis title.
    #[serde(default)]
    pub title: Option<String>,
    /// File name (`$VAR` expands to the derived name).
    #[serde(default)]
    pub filename: Option<String>,
    /// Extra cut.
    #[serde(default)]
    pub cut: Option<String>,
    /// Extra simulation weight.
    #[serde(default)]
    pub weight: Option<String>,
    /// Extra data weight.
    #[serde(default)]
    pub data_weight: Option<String>,
    /// Draw observed data.
    #[serde(default)]
    pub data: Option<bool>,
    /// Log x axis.
    #[serde(default)]
    pub logx: bool,
    /// Log y axis.
    #[serde(default)]
    pub logy: bool,
    /// Y minimum.
    #[serde(default)]
    pub ymin: Option<f64>,
    /// Y maximum.
    #[serde(default)]
    pub ymax: Option<f64>,
    /// Y headroom.
    #[serde(default)]
    pub ymargin: Option<f64>,
    /// Ratio panel range.
    #[serde(default)]
    pub ratio_range: Option<(f64, f64)>,
    /// Legend position.
    #[serde(default)]
    pub position: Option<String>,
    /// Legend columns.
    #[serde(default)]
    pub ncols: Option<usize>,
    /// Bin labels.
    #[serde(default)]
    pub bin_labels: Vec<String>,
    /// Only selections matching these patterns.
    #[serde(default)]
    pub only: Vec<String>,
    /// No selections matching these patterns.
    #[serde(default)]
    pub veto: Vec<String>,
    /// Fold the overflow into the last bin.
    #[serde(default)]
    pub overflow: bool,
    /// Divide by bin width (default: for variable-width bins).
    #[serde(default)]
    pub divide_by_bin_width: Option<bool>,
    /// Blinding window.
    #[serde(default)]
    pub blind: Option<(f64, f64)>,
    /// Per-selection overrides.
    #[serde(default)]
    pub context: VariableContext,
}

impl VariableConfig {
    /// Build the variable.
    pub fn build(&self) -> Result<Variable> {
        let binning = match (&self.bins, &self.edges) {
            (Some((n, lo, hi)), None) => Binning::uniform(*n, *lo, *hi)?,
            (None, Some(e)) => Binning::edges(e.clone())?,
            _ => {
                return Err(Error::Config(format!(
                    "variable '{}': give exactly one of 'bins' and 'edges'",
                    self.name
                )));
            }
        };
        let mut v = Variable::new(&self.name, binning)?.with_only(self.only.clone()).with_veto(self.veto.clone());
        if let Some(t) = &self.title {
            v = v.with_title(t);
        }
        if let Some(f) = &self.filename {
            v = v.with_filename(f);
        }
        if let Some(c) = &self.cut {
            v = v.with_cut(c);
        }
        if let Some(w) = &self.weight {
            v = v.with_weight(w);
        }
        if let Some(w) = &self.data_weight {
            v.data_weight = w.clone();
        }
        if let Some(p) = &self.position {
            v = v.with_position(p);
        }
        if let Some(m) = self.ymargin {
            v = v.with_ymargin(m);
        }
        if let Some((a, b)) = self.blind {
            v = v.with_blind_window(a, b);
        }
        if let Some(on) = self.divide_by_bin_width {
            v = v.with_divide_by_bin_width(on);
        }
        v.data = self.data.unwrap_or(true);
        v.logx = self.logx;
        v.logy = self.logy;
        v.ymin = self.ymin;
        v.ymax = self.ymax;
        v.ratio_range = self.ratio_range;
        v.ncols = self.ncols;
        v.bin_labels = self.bin_labels.clone();
        let c = &self.context;
        v = v
            .with_context_titles(Context::new(c.title.clone(), None))
            .with_context_binning(Context::new(c.binning.clone(), None))
            .with_context_positions(Context::new(c.position.clone(), None))
            .with_context_cuts(Context::new(c.cut.clone(), None))
            .with_context_weights(Context::new(c.weight.clone(), None))
            .with_context_ymargins(Context::new(c.ymargin.clone(), None))
            .with_context_blind(Context::new(c.blind.clone(), None));
        if self.overflow {
            v.addoverflow();
        }
        Ok(v)
    }
}

/// How one side of a systematic is produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariationConfig {
    /// Tag inserted before the file extension of the affected samples.
    #[serde(default)]
    pub files: Option<String>,
    /// Weight multiplied in, or replacing `replace`.
    #[serde(default)]
    pub weight: Option<String>,
    /// Weight factor to replace.
    #[serde(default)]
    pub replace: Option<String>,
}

/// A systematic variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystematicConfig {
    /// Name; histograms are tagged `_<name>Up` and `_<name>Down`.
    pub name: String,
    /// Affected processes (shell-style patterns).
    pub processes: Vec<String>,
    /// Up variation.
    pub up: VariationConfig,
    /// Down variation.
    pub down: VariationConfig,
}

impl SystematicConfig {
    /// Name and patterns, as read back by [`plotinputs`](crate::datacard::plotinputs).
    pub fn variation(&self) -> SystVariation {
        SystVariation { name: self.name.clone(), processes: self.processes.clone() }
    }

    /// Varied copies of `set`: `(tag, set)` for up and down.
    pub fn apply(&self, set: &SampleSet) -> Result<Vec<(String, SampleSet)>> {
        let patterns: Vec<&str> = self.processes.iter().map(String::as_str).collect();
        [("Up", &self.up), ("Down", &self.down)]
            .into_iter()
            .map(|(dir, var)| {
                let tag = format!("_{}{dir}", self.name);
                let shifted = match (&var.files, &var.weight) {
                    (Some(files), None) => set.shift(&patterns, files),
                    (None, Some(w)) => set.shiftweight(&patterns, var.replace.as_deref().unwrap_or(""), w),
                    _ => {
                        return Err(Error::Config(format!(
                            "systematic '{}{dir}': give exactly one of 'files' and 'weight'",
                            self.name
                        )));
                    }
                };
                Ok((tag, shifted))
            })
            .collect()
    }
}

/// Datacard output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatacardConfig {
    /// Output template (`$OBS`, `$CHANNEL`, `$ERA`, `$TAG`).
    #[serde(default = "default_shapes_template")]
    pub output: String,
    /// Write `p` between digits as `.` in process names.
    #[serde(default)]
    pub replace_p: bool,
    /// Keep negative bins.
    #[serde(default)]
    pub keep_negative: bool,
}

fn default_shapes_template() -> String {
    "$OBS_$CHANNEL-$ERA$TAG.shapes.json".into()
}

impl Default for DatacardConfig {
    fn default() -> Self {
        Self { output: default_shapes_template(), replace_p: false, keep_negative: false }
    }
}

/// Full analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Era tag.
    pub era: String,
    /// Channel tag.
    pub channel: String,
    /// Output tag.
    #[serde(default)]
    pub tag: String,
    /// Luminosity override in fb⁻¹.
    #[serde(default)]
    pub lumi: Option<f64>,
    /// Prefix of relative input paths.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Input file template (`$ERA`, `$CHANNEL`, `$TAG`, `$GROUP`, `$SAMPLE`).
    pub files: String,
    /// Nominal simulation weight.
    #[serde(default)]
    pub weight: String,
    /// Observed-data weight.
    #[serde(default)]
    pub data_weight: String,
    /// Worker threads (`0` = all cores).
    #[serde(default)]
    pub threads: usize,
    /// Estimator, e.g. `QCD_ABCD`.
    #[serde(default)]
    pub method: Option<String>,
    /// Sample table.
    #[serde(default)]
    pub samples: SampleTable,
    /// Patterns of samples to leave out.
    #[serde(default)]
    pub ignore: Vec<String>,
    /// Joins, applied first.
    #[serde(default)]
    pub joins: Vec<JoinConfig>,
    /// Stitches, applied after joins.
    #[serde(default)]
    pub stitches: Vec<StitchConfig>,
    /// Splits, applied last.
    #[serde(default)]
    pub splits: Vec<SplitConfig>,
    /// Selections.
    #[serde(default)]
    pub selections: Vec<SelectionConfig>,
    /// Variables.
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
    /// Systematic variations.
    #[serde(default)]
    pub systematics: Vec<SystematicConfig>,
    /// Datacard output.
    #[serde(default)]
    pub datacard: DatacardConfig,
}

impl AnalysisConfig {
    /// Read a `.json` file with `serde_json`, anything else as YAML.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::FileUnavailable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            Ok(serde_json::from_slice(&bytes)?)
        } else {
            Self::from_yaml(&String::from_utf8_lossy(&bytes))
        }
    }

    /// Parse YAML (or JSON, which YAML reads too).
    pub fn from_yaml(text: &str) -> Result<Self> {
        serde_yaml_ng::from_str(text).map_err(|e| Error::Yaml(e.to_string()))
    }

    /// Analysis context. Unknown eras are a configuration error.
    pub fn context(&self) -> Result<AnalysisContext> {
        let mut ctx = AnalysisContext::new(&self.era, &self.channel)?.with_tag(&self.tag);
        if let Some(l) = self.lumi {
            ctx = ctx.with_lumi(l);
        }
        if let Some(p) = &self.prefix {
            ctx = ctx.with_prefix(p);
        }
        Ok(ctx)
    }

    /// Event loop scheduling for a thread count.
    pub fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Parallel(self.threads)
    }

    fn sample(&self, row: &SampleRow, data: bool, ctx: &AnalysisContext) -> Result<Sample> {
        let r = row.parse(data)?;
        let kind = r.opts.dtype.unwrap_or(if data { SampleKind::Data } else { SampleKind::Mc });
        let mut s = match kind {
            SampleKind::Data => Sample::data(&r.name, &r.title).with_data_weight(&self.data_weight),
            _ => Sample::mc(&r.name, &r.title, r.xsec).with_kind(kind).with_weight(&self.weight),
        }
        .with_group(&r.group);
        if let Some(t) = &r.opts.treename {
            s = s.with_treename(t);
        }
        if let Some(x) = r.opts.scale {
            s = s.with_scale(x);
        }
        if let Some(w) = r.opts.sumw {
            s = s.with_sumweights(w);
        }
        if let Some(c) = &r.opts.color {
            s = s.with_color(c);
        }
        if let Some(w) = &r.opts.extraweight {
            s.add_extraweight(w);
        }
        let template = r.opts.files.as_deref().unwrap_or(&self.files);
        Ok(s.with_file_template(template, ctx))
    }

    /// Selections.
    pub fn selections(&self) -> Vec<Selection> {
        self.selections.iter().map(SelectionConfig::build).collect()
    }

    /// Variables.
    pub fn variables(&self) -> Result<Vec<Variable>> {
        self.variables.iter().map(VariableConfig::build).collect()
    }

    /// Sample set with joins, stitches and splits applied.
    pub fn sampleset(&self) -> Result<SampleSet> {
        let ctx = self.context()?;
        let mut data = self
            .samples
            .data
            .iter()
            .map(|r| self.sample(r, true, &ctx))
            .collect::<Result<Vec<_>>>()?;
        let data = match data.len() {
            0 => None,
            1 => data.pop(),
            _ => Some(Sample::merged("Data", "Observed", data)?),
        };
        let exp = self.samples.exp.iter().map(|r| self.sample(r, false, &ctx)).collect::<Result<Vec<_>>>()?;
        let sig = self
            .samples
            .sig
            .iter()
            .map(|r| self.sample(r, false, &ctx).map(|s| s.with_signal(true)))
            .collect::<Result<Vec<_>>>()?;
        let mut set = SampleSet::new(ctx, data, exp, sig)
            .with_mode(self.execution_mode())
            .with_ignore(self.ignore.clone());
        for j in &self.joins {
            let p: Vec<&str> = j.patterns.iter().map(String::as_str).collect();
            set.join(&p, &j.name, j.title.as_deref())?;
        }
        for st in &self.stitches {
            let p: Vec<&str> = st.patterns.iter().map(String::as_str).collect();
            let opts = StitchOptions {
                name: st.name.clone(),
                title: st.title.clone(),
                incl: st.incl.clone(),
                xsec: st.xsec,
                kfactor: st.kfactor,
                npart: st.npart.clone().unwrap_or_else(|| "NUP".into()),
                ..StitchOptions::default()
            };
            set.stitch(&p, opts)?;
        }
        for sp in &self.splits {
            let parts: Vec<(&str, &str, &str, Option<&str>)> = sp
                .parts
                .iter()
                .map(|p| (p.name.as_str(), p.title.as_str(), p.cut.as_str(), p.color.as_deref()))
                .collect();
            set.split(&[&sp.sample], &parts)?;
        }
        if let Some(m) = &self.method {
            crate::methods::get_estimator(m)?;
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r##"
era: UL2018
channel: mutau
files: "/nonexistent/$ERA/$SAMPLE_$CHANNEL.parquet"
weight: genweight
method: QCD_OSSS
samples:
  data:
    - [Data, SingleMuon_Run2018A]
    - [Data, SingleMuon_Run2018B, "Run B"]
  exp:
    - [DY, DYJetsToLL_M-50, "Drell-Yan", 5343.0, {extraweight: zptweight}]
    - [TT, TTTo2L2Nu, "ttbar", 88.29]
    - [TT, TTToSemiLeptonic, "ttbar", 365.34, {scale: 0.9, color: "#9999cc"}]
  sig:
    - [H, GluGluHToTauTau, "ggH", 48.6]
joins: [{patterns: ["TTTo*"], name: TT, title: "t#bar{t}"}]
selections:
  - {name: baseline, cut: "q_1*q_2<0 && iso_1<0.15", title: "Baseline"}
variables:
  - {name: m_vis, bins: [40, 0, 200], title: "m_{vis} [GeV]", blind: [70, 110]}
  - {name: pt_1, edges: [20, 30, 50, 100], logy: true, context: {title: {baseline: "p_{T}^{#mu}"}}}
systematics:
  - {name: shape_tes, processes: [DY*], up: {files: _TESUp}, down: {files: _TESDown}}
"##;

    #[test]
    fn parse_and_build() {
        let cfg = AnalysisConfig::from_yaml(YAML).unwrap();
        let set = cfg.sampleset().unwrap();
        assert_eq!(set.ctx.lumi, 59.7);
        let data = set.data.as_ref().unwrap();
        assert!(data.is_merged() && data.is_data());
        assert_eq!(data.children()[1].title, "Run B");
        let names: Vec<&str> = set.exp.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["DYJetsToLL_M-50", "TT"]);
        assert_eq!(set.exp[0].extraweights, vec!["zptweight"]);
        assert_eq!(set.exp[0].paths(), vec!["/nonexistent/UL2018/DYJetsToLL_M-50_mutau.parquet"]);
        assert!(set.sig[0].is_signal);
        let vars = cfg.variables().unwrap();
        assert_eq!(vars[0].blind_window, Some((70.0, 110.0)));
        assert!(vars[1].divides_by_bin_width());
        assert_eq!(cfg.selections()[0].title, "Baseline");
        let shifted = cfg.systematics[0].apply(&set).unwrap();
        assert_eq!(shifted[0].0, "_shape_tesUp");
        assert_eq!(shifted[1].1.exp[0].paths(), vec!["/nonexistent/UL2018/DYJetsToLL_M-50_mutau_TESDown.parquet"]);
    }

    #[test]
    fn malformed_rows() {
        let row = |items: Vec<RowItem>| SampleRow(items);
        let t = |s: &str| RowItem::Text(s.into());
        assert!(row(vec![t("DY"), t("DY"), t("Drell-Yan")]).parse(false).is_err());
        assert!(row(vec![t("DY"), RowItem::Number(1.0)]).parse(false).is_err());
        assert!(row(vec![t("Data")]).parse(true).is_err());
        let ok = row(vec![t("Data"), t("SingleMuon"), RowItem::Options(SampleOptions::default())]);
        assert_eq!(ok.parse(true).unwrap().title, "SingleMuon");
    }

    #[test]
    fn unknown_era_and_method() {
        let cfg = AnalysisConfig::from_yaml(&YAML.replace("UL2018", "UL1999")).unwrap();
        assert!(matches!(cfg.sampleset(), Err(Error::Config(_))));
        let cfg = AnalysisConfig::from_yaml(&YAML.replace("QCD_OSSS", "JTF")).unwrap();
        assert!(matches!(cfg.sampleset(), Err(Error::Config(_))));
        assert!(matches!(AnalysisConfig::from_yaml("era: [1"), Err(Error::Yaml(_))));
    }

    #[test]
    fn json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        let cfg = AnalysisConfig::from_yaml(YAML).unwrap();
        std::fs::write(&path, serde_json::to_string(&cfg).unwrap()).unwrap();
        assert_eq!(AnalysisConfig::from_path(&path).unwrap(), cfg);
    }
}
