//! Variables: an event expression paired with a binning and plot hints.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tau_core::{Histogram, Histogram2D, is_uniform_edges, uniform_edges};

use crate::context::Context;
use crate::strings::{fmt_num, make_filename};
use crate::{Error, Result};

/// Histogram binning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Binning {
    /// `nbins` equal bins in `[xmin, xmax)`.
    Uniform {
        /// Number of bins.
        nbins: usize,
        /// Lower edge.
        xmin: f64,
        /// Upper edge.
        xmax: f64,
    },
    /// Explicit increasing edges.
    Edges(Vec<f64>),
}

impl Binning {
    /// Validated uniform binning.
    pub fn uniform(nbins: usize, xmin: f64, xmax: f64) -> Result<Self> {
        let b = Binning::Uniform { nbins, xmin, xmax };
        b.validate()?;
        Ok(b)
    }

    /// Validated explicit edges.
    pub fn edges(edges: Vec<f64>) -> Result<Self> {
        let b = Binning::Edges(edges);
        b.validate()?;
        Ok(b)
    }

    /// Check bin count and ordering.
    pub fn validate(&self) -> Result<()> {
        match self {
            Binning::Uniform { nbins, xmin, xmax } => {
                if *nbins == 0 {
                    return Err(Error::Range("number of bins must be positive".into()));
                }
                if !(xmin.is_finite() && xmax.is_finite()) || xmin >= xmax {
                    return Err(Error::Range(format!("xmin ({xmin}) must be below xmax ({xmax})")));
                }
            }
            Binning::Edges(e) => {
                if e.len() < 2 {
                    return Err(Error::Range(format!("need at least two bin edges, got {}", e.len())));
                }
                if e.iter().any(|x| !x.is_finite()) || e.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(Error::Range(format!("bin edges must be finite and increasing: {e:?}")));
                }
            }
        }
        Ok(())
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        match self {
            Binning::Uniform { nbins, .. } => *nbins,
            Binning::Edges(e) => e.len().saturating_sub(1),
        }
    }

    /// Lower edge of the first bin.
    pub fn x_min(&self) -> f64 {
        match self {
            Binning::Uniform { xmin, .. } => *xmin,
            Binning::Edges(e) => e.first().copied().unwrap_or(0.0),
        }
    }

    /// Upper edge of the last bin.
    pub fn x_max(&self) -> f64 {
        match self {
            Binning::Uniform { xmax, .. } => *xmax,
            Binning::Edges(e) => e.last().copied().unwrap_or(0.0),
        }
    }

    /// All bin edges.
    pub fn bin_edges(&self) -> Vec<f64> {
        match self {
            Binning::Uniform { nbins, xmin, xmax } => uniform_edges(*nbins, *xmin, *xmax),
            Binning::Edges(e) => e.clone(),
        }
    }

    /// `true` for explicit edges that are not equally spaced.
    pub fn is_variable(&self) -> bool {
        match self {
            Binning::Uniform { .. } => false,
            Binning::Edges(e) => !is_uniform_edges(e),
        }
    }
}

/// Match a list of regex patterns against any probe; invalid patterns match as substrings.
pub(crate) fn any_pattern_matches(patterns: &[String], probes: &[&str]) -> bool {
    patterns.iter().any(|p| {
        let re = Regex::new(p).ok();
        probes.iter().any(|s| match &re {
            Some(re) => re.is_match(s),
            None => s.contains(p.as_str()),
        })
    })
}

/// An expression to histogram with its binning, titles and plot hints.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Expression evaluated per event (possibly wrapped for overflow folding).
    pub name: String,
    base_name: String,
    /// Axis title.
    pub title: String,
    base_title: String,
    /// File- and histogram-safe name.
    pub filename: String,
    binning: Binning,
    base_binning: Binning,
    divide_override: Option<bool>,
    /// Extra cut applied when filling.
    pub cut: String,
    base_cut: String,
    /// Extra weight applied to simulation.
    pub weight: String,
    base_weight: String,
    /// Extra weight applied to observed data.
    pub data_weight: String,
    /// Whether observed data is drawn.
    pub data: bool,
    /// Logarithmic x axis.
    pub logx: bool,
    /// Logarithmic y axis.
    pub logy: bool,
    /// Fixed y-axis minimum.
    pub ymin: Option<f64>,
    /// Fixed y-axis maximum.
    pub ymax: Option<f64>,
    /// Headroom above the maximum, as a multiple of it.
    pub ymargin: Option<f64>,
    base_ymargin: Option<f64>,
    /// Ratio panel range.
    pub ratio_range: Option<(f64, f64)>,
    /// Legend position hint, e.g. `"TR"` or `"L"`.
    pub position: String,
    base_position: String,
    /// Number of legend columns.
    pub ncols: Option<usize>,
    /// Custom labels for the x bins.
    pub bin_labels: Vec<String>,
    /// Only plot for selections matching one of these patterns.
    pub only: Vec<String>,
    /// Never plot for selections matching one of these patterns.
    pub veto: Vec<String>,
    /// Window hidden in observed data when blinding.
    pub blind_window: Option<(f64, f64)>,
    base_blind: Option<(f64, f64)>,
    overflow: bool,
    ctx_title: Context<String>,
    ctx_bins: Context<Binning>,
    ctx_position: Context<String>,
    ctx_cut: Context<String>,
    ctx_weight: Context<String>,
    ctx_ymargin: Context<f64>,
    ctx_blind: Context<(f64, f64)>,
}

impl Variable {
    /// Variable with the expression as title and a file name derived from it.
    pub fn new(name: impl Into<String>, binning: Binning) -> Result<Self> {
        binning.validate()?;
        let name = name.into();
        let filename = make_filename(&name);
        Ok(Self {
            base_name: name.clone(),
            title: name.clone(),
            base_title: name.clone(),
            name,
            filename,
            base_binning: binning.clone(),
            binning,
            divide_override: None,
            cut: String::new(),
            base_cut: String::new(),
            weight: String::new(),
            base_weight: String::new(),
            data_weight: String::new(),
            data: true,
            logx: false,
            logy: false,
            ymin: None,
            ymax: None,
            ymargin: None,
            base_ymargin: None,
            ratio_range: None,
            position: String::new(),
            base_position: String::new(),
            ncols: None,
            bin_labels: Vec::new(),
            only: Vec::new(),
            veto: Vec::new(),
            blind_window: None,
            base_blind: None,
            overflow: false,
            ctx_title: Context::default(),
            ctx_bins: Context::default(),
            ctx_position: Context::default(),
            ctx_cut: Context::default(),
            ctx_weight: Context::default(),
            ctx_ymargin: Context::default(),
            ctx_blind: Context::default(),
        })
    }

    /// Shorthand for uniform binning.
    pub fn uniform(name: impl Into<String>, nbins: usize, xmin: f64, xmax: f64) -> Result<Self> {
        Self::new(name, Binning::uniform(nbins, xmin, xmax)?)
    }

    /// Shorthand for explicit edges.
    pub fn with_edges(name: impl Into<String>, edges: Vec<f64>) -> Result<Self> {
        Self::new(name, Binning::edges(edges)?)
    }

    /// Set the axis title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self.base_title = self.title.clone();
        self
    }

    /// Set the file name. `$VAR` expands to the derived name.
    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = filename.replace("$VAR", &make_filename(&self.base_name));
        self
    }

    /// Set the extra cut.
    pub fn with_cut(mut self, cut: impl Into<String>) -> Self {
        self.cut = cut.into();
        self.base_cut = self.cut.clone();
        self
    }

    /// Set the extra simulation weight.
    pub fn with_weight(mut self, weight: impl Into<String>) -> Self {
        self.weight = weight.into();
        self.base_weight = self.weight.clone();
        self
    }

    /// Force dividing (or not) by the bin width.
    pub fn with_divide_by_bin_width(mut self, on: bool) -> Self {
        self.divide_override = Some(on);
        self
    }

    /// Set the legend position.
    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position = position.into();
        self.base_position = self.position.clone();
        self
    }

    /// Set the y-axis headroom.
    pub fn with_ymargin(mut self, ymargin: f64) -> Self {
        self.ymargin = Some(ymargin);
        self.base_ymargin = self.ymargin;
        self
    }

    /// Set the blinding window.
    pub fn with_blind_window(mut self, a: f64, b: f64) -> Self {
        self.blind_window = Some((a, b));
        self.base_blind = self.blind_window;
        self
    }

    /// Set `only` patterns.
    pub fn with_only(mut self, only: Vec<String>) -> Self {
        self.only = only;
        self
    }

    /// Set `veto` patterns.
    pub fn with_veto(mut self, veto: Vec<String>) -> Self {
        self.veto = veto;
        self
    }

    /// Per-context title overrides.
    pub fn with_context_titles(mut self, ctx: Context<String>) -> Self {
        self.ctx_title = ctx;
        self
    }

    /// Per-context binning overrides.
    pub fn with_context_binning(mut self, ctx: Context<Binning>) -> Self {
        self.ctx_bins = ctx;
        self
    }

    /// Per-context legend position overrides.
    pub fn with_context_positions(mut self, ctx: Context<String>) -> Self {
        self.ctx_position = ctx;
        self
    }

    /// Per-context cut overrides.
    pub fn with_context_cuts(mut self, ctx: Context<String>) -> Self {
        self.ctx_cut = ctx;
        self
    }

    /// Per-context weight overrides.
    pub fn with_context_weights(mut self, ctx: Context<String>) -> Self {
        self.ctx_weight = ctx;
        self
    }

    /// Per-context y-margin overrides.
    pub fn with_context_ymargins(mut self, ctx: Context<f64>) -> Self {
        self.ctx_ymargin = ctx;
        self
    }

    /// Per-context blinding windows.
    pub fn with_context_blind(mut self, ctx: Context<(f64, f64)>) -> Self {
        self.ctx_blind = ctx;
        self
    }

    /// Expression before overflow folding.
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Current binning.
    pub fn binning(&self) -> &Binning {
        &self.binning
    }

    /// Number of bins.
    pub fn n_bins(&self) -> usize {
        self.binning.n_bins()
    }

    /// Lower edge.
    pub fn x_min(&self) -> f64 {
        self.binning.x_min()
    }

    /// Upper edge.
    pub fn x_max(&self) -> f64 {
        self.binning.x_max()
    }

    /// All bin edges.
    pub fn bin_edges(&self) -> Vec<f64> {
        self.binning.bin_edges()
    }

    /// Whether the binning is variable-width.
    pub fn has_variable_bins(&self) -> bool {
        self.binning.is_variable()
    }

    /// Whether contents are divided by the bin width when plotting.
    pub fn divides_by_bin_width(&self) -> bool {
        self.divide_override.unwrap_or_else(|| self.has_variable_bins())
    }

    /// Whether overflow folding is enabled.
    pub fn has_overflow(&self) -> bool {
        self.overflow
    }

    /// Replace the binning (and refold the overflow).
    pub fn set_binning(&mut self, binning: Binning) -> Result<()> {
        binning.validate()?;
        self.binning = binning;
        if self.overflow {
            self.fold_overflow();
        }
        Ok(())
    }

    /// Fold entries above the last bin into it by wrapping the expression in `min(expr, thr)`.
    ///
    /// The threshold lies inside the last bin. Calling this again only
    /// recomputes the threshold.
    pub fn addoverflow(&mut self) -> &str {
        self.overflow = true;
        self.fold_overflow();
        &self.name
    }

    fn fold_overflow(&mut self) {
        let edges = self.bin_edges();
        let n = edges.len();
        let threshold = match self.binning {
            Binning::Uniform { xmax, .. } => xmax - 0.9 * (edges[n - 1] - edges[n - 2]),
            Binning::Edges(_) => edges[n - 2] + 0.9 * (edges[n - 1] - edges[n - 2]),
        };
        self.name = format!("min({},{})", self.base_name, fmt_num(threshold));
        log::debug!("addoverflow: '{}' -> '{}'", self.base_name, self.name);
    }

    /// Apply the overrides matching `probes` (selection cut, name, channel, ...).
    ///
    /// Starts from the construction-time values, so repeating a context is a no-op.
    pub fn changecontext(&mut self, probes: &[&str]) {
        self.title = self.ctx_title.get_any(probes).cloned().unwrap_or_else(|| self.base_title.clone());
        let binning =
            self.ctx_bins.get_any(probes).cloned().unwrap_or_else(|| self.base_binning.clone());
        if binning.validate().is_ok() {
            self.binning = binning;
        } else {
            log::warn!("changecontext: ignoring invalid binning {binning:?} for '{}'", self.base_name);
            self.binning = self.base_binning.clone();
        }
        if self.overflow {
            self.fold_overflow();
        }
        self.position =
            self.ctx_position.get_any(probes).cloned().unwrap_or_else(|| self.base_position.clone());
        self.cut = self.ctx_cut.get_any(probes).cloned().unwrap_or_else(|| self.base_cut.clone());
        self.weight =
            self.ctx_weight.get_any(probes).cloned().unwrap_or_else(|| self.base_weight.clone());
        self.ymargin = self.ctx_ymargin.get_any(probes).copied().or(self.base_ymargin);
        self.blind_window = self.ctx_blind.get_any(probes).copied().or(self.base_blind);
    }

    /// Whether this variable is plotted for a selection described by `probes`.
    pub fn accepts(&self, probes: &[&str]) -> bool {
        if any_pattern_matches(&self.veto, probes) {
            return false;
        }
        self.only.is_empty() || any_pattern_matches(&self.only, probes)
    }

    /// Histogram name for this variable with an optional tag.
    pub fn hist_name(&self, tag: &str) -> String {
        let tag = if !tag.is_empty() && !tag.starts_with('_') { format!("_{tag}") } else { tag.to_string() };
        format!("{}{}", self.filename, tag)
            .replace(['(', ')', '[', ']'], "")
            .replace(',', "-")
            .replace('.', "p")
    }

    /// Empty histogram with this binning. Poisson mode is meant for unweighted data.
    pub fn gethist(&self, name: Option<&str>, title: Option<&str>, poisson: bool) -> Result<Histogram> {
        let name = name.map(str::to_string).unwrap_or_else(|| self.hist_name(""));
        let mut h = Histogram::new(name, self.bin_edges())?;
        h.title = title.unwrap_or(&self.title).to_string();
        h.x_title = self.title.clone();
        if poisson {
            h.error_mode = tau_core::ErrorMode::Poisson;
        }
        Ok(h)
    }

    /// Empty 2-D histogram with this variable on x and `yvar` on y.
    pub fn gethist2d(&self, yvar: &Variable, name: Option<&str>) -> Result<Histogram2D> {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}_vs_{}", yvar.hist_name(""), self.hist_name("")));
        let mut h = Histogram2D::new(name, self.bin_edges(), yvar.bin_edges())?;
        h.x_title = self.title.clone();
        h.y_title = yvar.title.clone();
        Ok(h)
    }

    /// Draw expression `"<expr> >> <hname>"`, optionally with the uniform binning appended.
    pub fn drawcmd(&self, name: Option<&str>, with_bins: bool) -> String {
        let hname = name.map(str::to_string).unwrap_or_else(|| self.hist_name(""));
        if with_bins {
            format!(
                "{} >> {}({},{},{})",
                self.name,
                hname,
                self.n_bins(),
                fmt_num(self.x_min()),
                fmt_num(self.x_max())
            )
        } else {
            format!("{} >> {}", self.name, hname)
        }
    }

    /// Cut excluding the window `(a, b)` widened outward to bin edges.
    pub fn blind(&self, a: f64, b: f64) -> Result<String> {
        if a.is_nan() || b.is_nan() || b <= a {
            return Err(Error::Range(format!("blinding window ({a}, {b}) of '{}' is empty", self.base_name)));
        }
        const TOL: f64 = 1e-9;
        let (xlow, xhigh) = match &self.binning {
            Binning::Edges(edges) => {
                let xlow = edges.iter().rev().copied().find(|&e| e <= a + TOL).unwrap_or(a);
                let xhigh = edges.iter().copied().find(|&e| e >= b - TOL).unwrap_or(b);
                (xlow, xhigh)
            }
            Binning::Uniform { nbins, xmin, xmax } => {
                let width = (xmax - xmin) / *nbins as f64;
                let xlow = if *xmin < a && a < *xmax {
                    xmin + ((a - xmin) / width + TOL).floor() * width
                } else {
                    a
                };
                let xhigh = if *xmin < b && b < *xmax {
                    xmin + ((b - xmin) / width - TOL).ceil() * width
                } else {
                    b
                };
                (xlow, xhigh)
            }
        };
        let cut = format!("({}<{} || {}<{})", self.name, fmt_num(xlow), fmt_num(xhigh), self.name);
        log::debug!("blind: {cut:?} for window ({a}, {b})");
        Ok(cut)
    }

    /// Copy with `tag` appended to expression and file name, binning unchanged.
    pub fn shift(&self, tag: &str) -> Variable {
        let tag = if !tag.is_empty() && !tag.starts_with('_') { format!("_{tag}") } else { tag.to_string() };
        let mut v = self.clone();
        v.base_name = format!("{}{}", self.base_name, tag);
        v.name = if self.overflow {
            self.name.replacen(&self.base_name, &v.base_name, 1)
        } else {
            v.base_name.clone()
        };
        v.filename = format!("{}{}", self.filename, tag);
        v
    }

    /// y-axis title, e.g. `Events / GeV` when dividing by the bin width.
    pub fn y_title(&self) -> String {
        let unit = self.unit();
        if self.divides_by_bin_width() {
            return match unit {
                Some(u) => format!("Events / {u}"),
                None => "Events / bin width".into(),
            };
        }
        match (&self.binning, unit) {
            (Binning::Uniform { nbins, xmin, xmax }, Some(u)) => {
                format!("Events / {} {u}", fmt_num((xmax - xmin) / *nbins as f64))
            }
            _ => "Events".into(),
        }
    }

    /// Unit in square brackets or parentheses at the end of the title.
    pub fn unit(&self) -> Option<String> {
        let t = self.title.trim_end();
        let (open, close) = if t.ends_with(']') { ('[', ']') } else if t.ends_with(')') { ('(', ')') } else { return None };
        let start = t.rfind(open)?;
        let unit = t[start + 1..t.len() - close.len_utf8()].trim();
        (!unit.is_empty() && unit.len() <= 8 && !unit.contains(' ')).then(|| unit.to_string())
    }
}
