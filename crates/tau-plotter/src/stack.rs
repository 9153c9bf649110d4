//! Plot-ready stacks and systematic comparisons (numbers-first artifacts).
//!
//! A [`Stack`] bundles a [`HistSet`] with its variable and selection and the
//! axis, legend and ratio decisions. [`Stack::artifact`] flattens it into a
//! [`StackArtifact`] that a renderer draws without further physics logic.

use serde::{Deserialize, Serialize};
use tau_core::{Graph, Histogram};

use crate::era::AnalysisContext;
use crate::errorband::SystTriplet;
use crate::histset::HistSet;
use crate::ratio::{Denominator, GraphRatioMode, Numerator, Ratio};
use crate::selection::Selection;
use crate::variable::Variable;
use crate::{Error, Result};

/// Schema of [`StackArtifact`].
pub const STACK_SCHEMA: &str = "taufw_stack_v1";
/// Schema of [`ComparisonArtifact`].
pub const COMPARISON_SCHEMA: &str = "taufw_compare_v1";

const DEFAULT_YMARGIN: f64 = 1.16;
const DEFAULT_YMARGIN_LOG: f64 = 1.6;

/// Provenance of an artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Producing tool.
    pub tool: String,
    /// Tool version.
    pub tool_version: String,
    /// Era tag.
    pub era: String,
    /// Channel tag.
    pub channel: String,
    /// Header text, e.g. `59.7 fb^{-1} (13 TeV)`.
    pub lumi_text: String,
}

impl ArtifactMeta {
    fn new(ctx: &AnalysisContext) -> Self {
        Self {
            tool: "taufw".into(),
            tool_version: env!("CARGO_PKG_VERSION").into(),
            era: ctx.era.clone(),
            channel: ctx.channel.clone(),
            lumi_text: ctx.lumi_text(),
        }
    }
}

/// Lower and upper envelope per bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandEnvelope {
    /// Lower edge.
    pub lo: Vec<f64>,
    /// Upper edge.
    pub hi: Vec<f64>,
}

impl BandEnvelope {
    fn from_graph(g: &Graph) -> Self {
        Self {
            lo: g.points.iter().map(|p| p.y - p.ey_lo).collect(),
            hi: g.points.iter().map(|p| p.y + p.ey_hi).collect(),
        }
    }
}

/// Points with asymmetric errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSeries {
    /// Name.
    pub name: String,
    /// Legend label.
    pub title: String,
    /// X positions.
    pub x: Vec<f64>,
    /// Y values.
    pub y: Vec<f64>,
    /// Lower errors.
    pub yerr_lo: Vec<f64>,
    /// Upper errors.
    pub yerr_hi: Vec<f64>,
}

impl PointSeries {
    fn from_graph(g: &Graph) -> Self {
        Self {
            name: g.name.clone(),
            title: g.title.clone(),
            x: g.points.iter().map(|p| p.x).collect(),
            y: g.points.iter().map(|p| p.y).collect(),
            yerr_lo: g.points.iter().map(|p| p.ey_lo).collect(),
            yerr_hi: g.points.iter().map(|p| p.ey_hi).collect(),
        }
    }

    fn from_hist(h: &Histogram) -> Self {
        let n = h.n_bins();
        Self {
            name: h.name.clone(),
            title: h.title.clone(),
            x: (0..n).map(|i| h.bin_center(i)).collect(),
            y: h.bin_content.clone(),
            yerr_lo: (0..n).map(|i| h.bin_error_low(i)).collect(),
            yerr_hi: (0..n).map(|i| h.bin_error_up(i)).collect(),
        }
    }
}

/// One histogram drawn as a filled stack layer or a line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSeries {
    /// Process name.
    pub name: String,
    /// Legend label.
    pub title: String,
    /// Bin contents.
    pub y: Vec<f64>,
    /// Fill or line color (`#rrggbb`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Dashed line.
    #[serde(default)]
    pub dashed: bool,
}

impl SampleSeries {
    fn from_hist(h: &Histogram) -> Self {
        Self {
            name: h.name.clone(),
            title: h.title.clone(),
            y: h.bin_content.clone(),
            color: h.style.fill_color.clone().or_else(|| h.style.line_color.clone()),
            dashed: h.style.dashed,
        }
    }
}

/// Legend layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendSpec {
    /// Position hint, e.g. `right`, `left`, `x=0.6`.
    pub position: String,
    /// Number of columns.
    pub ncols: usize,
}

/// Ratio panel numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatioSeries {
    /// What is divided by what, e.g. `data / expected`.
    pub label: String,
    /// Ratio points.
    pub points: PointSeries,
    /// Unit band of the denominator uncertainty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<BandEnvelope>,
    /// Y range.
    pub y_range: (f64, f64),
}

/// Everything needed to draw a stack plot with an optional ratio panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackArtifact {
    /// [`STACK_SCHEMA`].
    pub schema_version: String,
    /// Provenance.
    pub meta: ArtifactMeta,
    /// Selection title.
    pub title: String,
    /// X-axis title.
    pub x_title: String,
    /// Y-axis title.
    pub y_title: String,
    /// Bin edges.
    pub bin_edges: Vec<f64>,
    /// Alphanumeric bin labels, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bin_labels: Vec<String>,
    /// Log-scale x axis.
    pub logx: bool,
    /// Log-scale y axis.
    pub logy: bool,
    /// Y range of the main panel.
    pub y_range: (f64, f64),
    /// Observed data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PointSeries>,
    /// Expected processes, top of the stack first.
    pub samples: Vec<SampleSeries>,
    /// Sum of the expected processes.
    pub total_y: Vec<f64>,
    /// Error band of the expected sum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<BandEnvelope>,
    /// Signal overlays.
    #[serde(default)]
    pub signals: Vec<SampleSeries>,
    /// Legend layout.
    pub legend: LegendSpec,
    /// Ratio panel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<RatioSeries>,
}

/// Stack plot of one (selection, variable) pair.
#[derive(Debug, Clone)]
pub struct Stack {
    /// Histograms.
    pub set: HistSet,
    /// Variable (axis and plot hints).
    pub variable: Variable,
    /// Selection (title).
    pub selection: Selection,
    /// Era, channel, luminosity.
    pub ctx: AnalysisContext,
    /// Draw the data / expected ratio panel.
    pub ratio: bool,
    /// Denominator lookup for graph numerators.
    pub ratio_mode: GraphRatioMode,
}

impl Stack {
    /// Stack with a ratio panel when observed data is present.
    pub fn new(set: HistSet, variable: &Variable, selection: &Selection, ctx: &AnalysisContext) -> Self {
        let ratio = set.data.is_some();
        Self {
            set,
            variable: variable.clone(),
            selection: selection.clone(),
            ctx: ctx.clone(),
            ratio,
            ratio_mode: GraphRatioMode::Snap,
        }
    }

    /// Enable or disable the ratio panel.
    pub fn with_ratio(mut self, on: bool) -> Self {
        self.ratio = on;
        self
    }

    fn y_max(&self) -> f64 {
        let mut ymax = 0.0f64;
        if let Ok(Some(total)) = self.set.total_exp() {
            for (i, v) in total.bin_content.iter().enumerate() {
                let band = self.set.errband.as_ref().and_then(|b| b.points.get(i)).map_or(0.0, |p| p.ey_hi);
                ymax = ymax.max(v + band);
            }
        }
        match (&self.set.data_graph, &self.set.data) {
            (Some(g), _) => g.points.iter().for_each(|p| ymax = ymax.max(p.y + p.ey_hi)),
            (None, Some(d)) => (0..d.n_bins()).for_each(|i| ymax = ymax.max(d.bin_content[i] + d.bin_error_up(i))),
            _ => {}
        }
        for s in &self.set.sig {
            ymax = ymax.max(s.bin_content.iter().copied().fold(0.0, f64::max));
        }
        ymax
    }

    fn y_min_positive(&self) -> f64 {
        self.set
            .all()
            .flat_map(|h| h.bin_content.iter().copied())
            .filter(|v| *v > 0.0)
            .fold(f64::INFINITY, f64::min)
    }

    /// Y range from the content, the variable's margin and its explicit limits.
    pub fn y_range(&self) -> (f64, f64) {
        let v = &self.variable;
        let max = self.y_max();
        if v.logy {
            let floor = if max > 0.0 { max * 1e-5 } else { 1e-2 };
            let ymin = v.ymin.unwrap_or_else(|| (0.5 * self.y_min_positive()).max(floor).min(1.0));
            let margin = v.ymargin.unwrap_or(DEFAULT_YMARGIN_LOG);
            let decades = (max.max(ymin) / ymin).log10();
            let ymax = v.ymax.unwrap_or(ymin * 10f64.powf(decades * margin.max(1.0)));
            (ymin, ymax.max(ymin * 10.0))
        } else {
            let margin = v.ymargin.unwrap_or(DEFAULT_YMARGIN);
            let ymax = v.ymax.unwrap_or(if max > 0.0 { max * margin } else { 1.0 });
            (v.ymin.unwrap_or(0.0), ymax)
        }
    }

    /// Data / expected ratio, if enabled and possible.
    pub fn getratio(&self) -> Result<Option<Ratio>> {
        if !self.ratio || self.set.exp.is_empty() {
            return Ok(None);
        }
        let num = match (&self.set.data_graph, &self.set.data) {
            (Some(g), _) => Numerator::Graph(g.clone()),
            (None, Some(d)) => Numerator::Graph(Graph::from_poisson(d, false)),
            (None, None) => return Ok(None),
        };
        let den = Denominator::Stack(self.set.exp.clone());
        let mut ratio = Ratio::new(&[num], &den, self.ratio_mode, Some(&self.ctx))?;
        if let Some(band) = &self.set.errband {
            ratio = ratio.with_band(band);
        }
        if let Some((lo, hi)) = self.variable.ratio_range {
            ratio = ratio.with_range(lo, hi);
        }
        Ok(Some(ratio))
    }

    /// Flatten into a [`StackArtifact`].
    pub fn artifact(&self) -> Result<StackArtifact> {
        let reference = self
            .set
            .all()
            .next()
            .ok_or_else(|| Error::Histogram(format!("stack '{}' has no histograms", self.set.variable)))?;
        let total_y = match self.set.total_exp()? {
            Some(t) => t.bin_content,
            None => vec![0.0; reference.n_bins()],
        };
        let data = match (&self.set.data_graph, &self.set.data) {
            (Some(g), _) => Some(PointSeries::from_graph(g)),
            (None, Some(d)) => Some(PointSeries::from_hist(d)),
            _ => None,
        };
        let ratio = self.getratio()?.and_then(|r| {
            let points = r.graphs.first().map(PointSeries::from_graph)?;
            Some(RatioSeries {
                label: "Obs. / Exp.".into(),
                points,
                band: r.band.as_ref().map(BandEnvelope::from_graph),
                y_range: r.y_range,
            })
        });
        let position = if self.variable.position.is_empty() { "right".to_string() } else { self.variable.position.clone() };
        Ok(StackArtifact {
            schema_version: STACK_SCHEMA.into(),
            meta: ArtifactMeta::new(&self.ctx),
            title: self.selection.title.clone(),
            x_title: self.variable.title.clone(),
            y_title: self.variable.y_title(),
            bin_edges: reference.bin_edges.clone(),
            bin_labels: self.variable.bin_labels.clone(),
            logx: self.variable.logx,
            logy: self.variable.logy,
            y_range: self.y_range(),
            data,
            samples: self.set.exp.iter().map(SampleSeries::from_hist).collect(),
            total_y,
            band: self.set.errband.as_ref().map(BandEnvelope::from_graph),
            signals: self.set.sig.iter().map(SampleSeries::from_hist).collect(),
            legend: LegendSpec { position, ncols: self.variable.ncols.unwrap_or(1) },
            ratio,
        })
    }
}

/// Up / nominal / down comparison of one process under one systematic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonArtifact {
    /// [`COMPARISON_SCHEMA`].
    pub schema_version: String,
    /// Provenance.
    pub meta: ArtifactMeta,
    /// Plot title, e.g. `ZTT, tes`.
    pub title: String,
    /// X-axis title.
    pub x_title: String,
    /// Bin edges.
    pub bin_edges: Vec<f64>,
    /// Up, nominal and down, in that order.
    pub series: Vec<SampleSeries>,
    /// Up / nominal and down / nominal.
    pub ratios: Vec<SampleSeries>,
    /// Y range of the ratio panel.
    pub ratio_range: (f64, f64),
}

impl ComparisonArtifact {
    /// Comparison of a triplet.
    pub fn new(triplet: &SystTriplet, x_title: &str, ctx: &AnalysisContext) -> Self {
        let style = |h: &Histogram, color: &str, dashed: bool| SampleSeries {
            color: Some(color.to_string()),
            dashed,
            ..SampleSeries::from_hist(h)
        };
        let series = vec![
            style(&triplet.up, "#cc2222", true),
            style(&triplet.nominal, "#000000", false),
            style(&triplet.down, "#2255cc", true),
        ];
        let ratio = |h: &Histogram, color: &str| {
            let r = crate::ratio::gethistratio(h, &triplet.nominal);
            style(&r, color, true)
        };
        let ratios = vec![ratio(&triplet.up, "#cc2222"), ratio(&triplet.down, "#2255cc")];
        let spread = ratios
            .iter()
            .flat_map(|r| r.y.iter())
            .filter(|v| v.abs() < 1e3)
            .map(|v| (v - 1.0).abs())
            .fold(0.0, f64::max);
        let half = (1.2 * spread).clamp(0.05, 1.0);
        Self {
            schema_version: COMPARISON_SCHEMA.into(),
            meta: ArtifactMeta::new(ctx),
            title: format!("{}, {}", triplet.nominal.title, triplet.name),
            x_title: x_title.to_string(),
            bin_edges: triplet.nominal.bin_edges.clone(),
            series,
            ratios,
            ratio_range: (1.0 - half, 1.0 + half),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tau_core::ErrorMode;

    fn hist(name: &str, content: &[f64]) -> Histogram {
        let mut h = Histogram::uniform(name, content.len(), 0.0, 10.0 * content.len() as f64).unwrap();
        h.bin_content = content.to_vec();
        h.sumw2 = content.to_vec();
        h.title = name.to_string();
        h
    }

    fn stack() -> Stack {
        let ctx = AnalysisContext::new("UL2018", "mutau").unwrap();
        let var = Variable::uniform("m_vis", 3, 0.0, 30.0).unwrap().with_title("m_{vis}");
        let sel = Selection::new("sr", "q_1*q_2<0").with_title("signal region");
        let mut set = HistSet::new("sr", "m_vis");
        let mut data = hist("data", &[60.0, 12.0, 1.0]);
        data.error_mode = ErrorMode::Poisson;
        set.data = Some(data);
        set.exp = vec![hist("ZTT", &[40.0, 6.0, 0.5]), hist("TT", &[10.0, 4.0, 0.5])];
        set.errband = crate::errorband::geterrorband(&set.exp, &[]).unwrap();
        Stack::new(set, &var, &sel, &ctx)
    }

    #[test]
    fn artifact_numbers() {
        let art = stack().artifact().unwrap();
        assert_eq!(art.schema_version, STACK_SCHEMA);
        assert_eq!(art.total_y, vec![50.0, 10.0, 1.0]);
        assert_eq!(art.samples[0].name, "ZTT");
        assert_eq!(art.title, "signal region");
        assert_eq!(art.meta.lumi_text, "59.7 fb^{-1} (13 TeV)");
        let ratio = art.ratio.as_ref().unwrap();
        assert!((ratio.points.y[0] - 1.2).abs() < 1e-12);
        assert!((ratio.points.y[1] - 1.2).abs() < 1e-12);
        assert!(art.y_range.1 > 60.0);
        let json = serde_json::to_string(&art).unwrap();
        let back: StackArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back, art);
    }

    #[test]
    fn log_range_spans_content() {
        let mut s = stack();
        s.variable.logy = true;
        let (lo, hi) = s.y_range();
        assert!(lo > 0.0 && lo <= 0.5);
        assert!(hi > 60.0);
    }

    #[test]
    fn comparison_ratios() {
        let ctx = AnalysisContext::new("2018", "mutau").unwrap();
        let t = SystTriplet::new("tes", hist("up", &[11.0, 22.0]), hist("ZTT", &[10.0, 20.0]), hist("down", &[9.0, 18.0]));
        let c = ComparisonArtifact::new(&t, "m_{vis}", &ctx);
        assert_eq!(c.series.len(), 3);
        assert!((c.ratios[0].y[0] - 1.1).abs() < 1e-12);
        assert!((c.ratios[1].y[1] - 0.9).abs() < 1e-12);
        assert!(c.ratio_range.0 < 0.9 && c.ratio_range.1 > 1.1);
        assert_eq!(c.title, "ZTT, tes");
    }
}
