//! Histogram, 2-D histogram and asymmetric-error graph types.
//!
//! All types are plain owned values. Histograms keep the sum of squared
//! weights per bin; observed data can additionally be flagged with
//! [`ErrorMode::Poisson`], in which case low/high errors follow the Garwood
//! central interval instead of `sqrt(sumw2)`.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::error::{Error, Result};

const EDGE_TOLERANCE: f64 = 1e-9;

/// Per-bin error bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// `sqrt(sum of squared weights)`.
    #[default]
    SumW2,
    /// Asymmetric Garwood 68% interval for integer (unweighted) contents.
    Poisson,
}

/// Drawing hints carried along with a histogram or graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistStyle {
    /// Fill color (`#rrggbb`), used for stacked expected processes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,
    /// Line color (`#rrggbb`), used for signal overlays and comparisons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_color: Option<String>,
    /// Dashed line.
    #[serde(default)]
    pub dashed: bool,
    /// Draw as markers with error bars.
    #[serde(default)]
    pub marker: bool,
}

// ── 1-D histogram ──────────────────────────────────────────────

/// A 1-D histogram with arbitrary (sorted) bin edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Histogram name.
    pub name: String,
    /// Title (legend label).
    #[serde(default)]
    pub title: String,
    /// X-axis title.
    #[serde(default)]
    pub x_title: String,
    /// Y-axis title.
    #[serde(default)]
    pub y_title: String,
    /// Bin edges (length = n_bins + 1).
    pub bin_edges: Vec<f64>,
    /// Bin contents.
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
    /// Underflow sum of weights.
    #[serde(default)]
    pub underflow: f64,
    /// Overflow sum of weights.
    #[serde(default)]
    pub overflow: f64,
    /// Number of filled entries.
    #[serde(default)]
    pub entries: f64,
    /// Error bookkeeping mode.
    #[serde(default)]
    pub error_mode: ErrorMode,
    /// Drawing hints.
    #[serde(default)]
    pub style: HistStyle,
}

pub(crate) fn validate_edges(edges: &[f64]) -> Result<()> {
    if edges.len() < 2 {
        return Err(Error::Range(format!("need at least two bin edges, got {}", edges.len())));
    }
    if edges.iter().any(|e| !e.is_finite()) {
        return Err(Error::Range("bin edges must be finite".into()));
    }
    if let Some(w) = edges.windows(2).find(|w| w[1] <= w[0]) {
        return Err(Error::Range(format!(
            "bin edges must be strictly increasing ({} >= {})",
            w[0], w[1]
        )));
    }
    Ok(())
}

impl Histogram {
    /// Empty histogram with explicit edges.
    pub fn new(name: impl Into<String>, bin_edges: Vec<f64>) -> Result<Self> {
        validate_edges(&bin_edges)?;
        let n = bin_edges.len() - 1;
        Ok(Self {
            name: name.into(),
            title: String::new(),
            x_title: String::new(),
            y_title: String::new(),
            bin_edges,
            bin_content: vec![0.0; n],
            sumw2: vec![0.0; n],
            underflow: 0.0,
            overflow: 0.0,
            entries: 0.0,
            error_mode: ErrorMode::SumW2,
            style: HistStyle::default(),
        })
    }

    /// Empty histogram with `n_bins` uniform bins in `[x_min, x_max)`.
    pub fn uniform(name: impl Into<String>, n_bins: usize, x_min: f64, x_max: f64) -> Result<Self> {
        if n_bins == 0 {
            return Err(Error::Range("number of bins must be positive".into()));
        }
        if x_min.is_nan() || x_max.is_nan() || x_min >= x_max {
            return Err(Error::Range(format!("xmin ({x_min}) must be below xmax ({x_max})")));
        }
        Self::new(name, uniform_edges(n_bins, x_min, x_max))
    }

    /// Same histogram with a different name.
    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of bins (excluding under/overflow).
    pub fn n_bins(&self) -> usize {
        self.bin_content.len()
    }

    /// Lower edge of the first bin.
    pub fn x_min(&self) -> f64 {
        self.bin_edges[0]
    }

    /// Upper edge of the last bin.
    pub fn x_max(&self) -> f64 {
        self.bin_edges[self.bin_edges.len() - 1]
    }

    /// Width of bin `i`.
    pub fn bin_width(&self, i: usize) -> f64 {
        self.bin_edges[i + 1] - self.bin_edges[i]
    }

    /// Center of bin `i`.
    pub fn bin_center(&self, i: usize) -> f64 {
        0.5 * (self.bin_edges[i] + self.bin_edges[i + 1])
    }

    /// `true` if all bins have the same width.
    pub fn is_uniform(&self) -> bool {
        is_uniform_edges(&self.bin_edges)
    }

    /// Bin containing `x`, `None` for under/overflow.
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        find_bin(&self.bin_edges, x)
    }

    /// Fill one entry.
    pub fn fill(&mut self, x: f64, w: f64) {
        self.entries += 1.0;
        match self.find_bin(x) {
            Some(b) => {
                self.bin_content[b] += w;
                self.sumw2[b] += w * w;
            }
            None if x < self.x_min() => self.underflow += w,
            None => self.overflow += w,
        }
    }

    /// Sum of in-range bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// Sum of bin contents including under/overflow.
    pub fn integral_with_flows(&self) -> f64 {
        self.integral() + self.underflow + self.overflow
    }

    /// Symmetric error of bin `i`.
    pub fn bin_error(&self, i: usize) -> f64 {
        match self.error_mode {
            ErrorMode::SumW2 => self.sumw2[i].max(0.0).sqrt(),
            ErrorMode::Poisson => {
                let (lo, hi) = poisson_errors(self.bin_content[i]);
                0.5 * (lo + hi)
            }
        }
    }

    /// Lower error of bin `i`.
    pub fn bin_error_low(&self, i: usize) -> f64 {
        match self.error_mode {
            ErrorMode::SumW2 => self.bin_error(i),
            ErrorMode::Poisson => poisson_errors(self.bin_content[i]).0,
        }
    }

    /// Upper error of bin `i`.
    pub fn bin_error_up(&self, i: usize) -> f64 {
        match self.error_mode {
            ErrorMode::SumW2 => self.bin_error(i),
            ErrorMode::Poisson => poisson_errors(self.bin_content[i]).1,
        }
    }

    /// Set content and (symmetric) error of bin `i`.
    pub fn set_bin(&mut self, i: usize, content: f64, error: f64) {
        self.bin_content[i] = content;
        self.sumw2[i] = error * error;
    }

    /// `true` if both histograms share the same edges.
    pub fn same_binning(&self, other: &Histogram) -> bool {
        self.bin_edges.len() == other.bin_edges.len()
            && self
                .bin_edges
                .iter()
                .zip(&other.bin_edges)
                .all(|(a, b)| (a - b).abs() <= EDGE_TOLERANCE * a.abs().max(b.abs()).max(1.0))
    }

    /// `self += c * other` (errors add in quadrature).
    pub fn add(&mut self, other: &Histogram, c: f64) -> Result<()> {
        if !self.same_binning(other) {
            return Err(Error::Histogram(format!(
                "cannot add '{}' to '{}': binning differs",
                other.name, self.name
            )));
        }
        for i in 0..self.n_bins() {
            self.bin_content[i] += c * other.bin_content[i];
            self.sumw2[i] += c * c * other.sumw2[i];
        }
        self.underflow += c * other.underflow;
        self.overflow += c * other.overflow;
        self.entries += other.entries;
        Ok(())
    }

    /// Scale contents by `f` (errors scale with `|f|`).
    pub fn scale(&mut self, f: f64) {
        for i in 0..self.n_bins() {
            self.bin_content[i] *= f;
            self.sumw2[i] *= f * f;
        }
        self.underflow *= f;
        self.overflow *= f;
    }

    /// Zero all contents and errors.
    pub fn reset(&mut self) {
        self.bin_content.iter_mut().for_each(|v| *v = 0.0);
        self.sumw2.iter_mut().for_each(|v| *v = 0.0);
        self.underflow = 0.0;
        self.overflow = 0.0;
        self.entries = 0.0;
    }

    /// Divide every bin content and error by its bin width.
    ///
    /// Poisson-mode histograms switch to sumw2 bookkeeping with the scaled
    /// symmetric error, since the Garwood interval no longer applies; use
    /// [`Graph::from_poisson`] beforehand to keep asymmetric errors.
    pub fn divide_by_bin_width(&mut self) {
        for i in 0..self.n_bins() {
            let w = self.bin_width(i);
            let err = self.bin_error(i) / w;
            self.bin_content[i] /= w;
            self.sumw2[i] = err * err;
        }
        self.error_mode = ErrorMode::SumW2;
    }
}

/// `n_bins + 1` equally spaced edges.
pub fn uniform_edges(n_bins: usize, x_min: f64, x_max: f64) -> Vec<f64> {
    let w = (x_max - x_min) / n_bins as f64;
    (0..=n_bins).map(|i| if i == n_bins { x_max } else { x_min + i as f64 * w }).collect()
}

/// `true` if all bins spanned by `edges` have the same width.
pub fn is_uniform_edges(edges: &[f64]) -> bool {
    if edges.len() < 3 {
        return true;
    }
    let w0 = edges[1] - edges[0];
    edges.windows(2).all(|w| ((w[1] - w[0]) - w0).abs() <= 1e-9 * w0.abs().max(1.0))
}

/// Find the bin index for a value given sorted bin edges.
///
/// Returns `None` for underflow/overflow and NaN.
pub fn find_bin(edges: &[f64], val: f64) -> Option<usize> {
    if edges.len() < 2 || !(val >= edges[0]) || val >= edges[edges.len() - 1] {
        return None;
    }
    // partition_point: first edge strictly greater than val
    let i = edges.partition_point(|e| *e <= val);
    if i == 0 || i >= edges.len() { None } else { Some(i - 1) }
}

// ── Poisson intervals ──────────────────────────────────────────

/// `Some(n)` if `x` is a non-negative integer within 1e-9.
pub fn is_near_integer_nonneg(x: f64) -> Option<u64> {
    if !(x.is_finite() && x >= 0.0) {
        return None;
    }
    let r = x.round();
    if (x - r).abs() <= 1e-9 { Some(r as u64) } else { None }
}

/// Central 68.27% Garwood interval for an observed count `n`.
///
/// Returns `(down, up)` distances from `n`.
pub fn garwood_interval(n: u64) -> (f64, f64) {
    let alpha = 0.31731_f64;
    let nf = n as f64;
    let lo = if n == 0 {
        0.0
    } else {
        match ChiSquared::new(2.0 * nf) {
            Ok(dist) => nf - 0.5 * dist.inverse_cdf(alpha / 2.0),
            Err(_) => nf.sqrt(),
        }
    };
    let hi = match ChiSquared::new(2.0 * (nf + 1.0)) {
        Ok(dist) => 0.5 * dist.inverse_cdf(1.0 - alpha / 2.0) - nf,
        Err(_) => (nf + 1.0).sqrt(),
    };
    (lo, hi)
}

/// Garwood errors for integer contents, `sqrt(y)` otherwise.
pub fn poisson_errors(y: f64) -> (f64, f64) {
    match is_near_integer_nonneg(y) {
        Some(n) => garwood_interval(n),
        None => {
            let e = if y.is_finite() && y > 0.0 { y.sqrt() } else { 0.0 };
            (e, e)
        }
    }
}

// ── 2-D histogram ──────────────────────────────────────────────

/// A 2-D histogram. Contents are stored row-major: `iy * nx + ix`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram2D {
    /// Histogram name.
    pub name: String,
    /// Title.
    #[serde(default)]
    pub title: String,
    /// X-axis title.
    #[serde(default)]
    pub x_title: String,
    /// Y-axis title.
    #[serde(default)]
    pub y_title: String,
    /// X bin edges.
    pub x_edges: Vec<f64>,
    /// Y bin edges.
    pub y_edges: Vec<f64>,
    /// Bin contents.
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
    /// Number of filled in-range entries.
    #[serde(default)]
    pub entries: f64,
}

impl Histogram2D {
    /// Empty 2-D histogram.
    pub fn new(name: impl Into<String>, x_edges: Vec<f64>, y_edges: Vec<f64>) -> Result<Self> {
        validate_edges(&x_edges)?;
        validate_edges(&y_edges)?;
        let n = (x_edges.len() - 1) * (y_edges.len() - 1);
        Ok(Self {
            name: name.into(),
            title: String::new(),
            x_title: String::new(),
            y_title: String::new(),
            x_edges,
            y_edges,
            bin_content: vec![0.0; n],
            sumw2: vec![0.0; n],
            entries: 0.0,
        })
    }

    /// Number of x bins.
    pub fn nx(&self) -> usize {
        self.x_edges.len() - 1
    }

    /// Number of y bins.
    pub fn ny(&self) -> usize {
        self.y_edges.len() - 1
    }

    fn index(&self, ix: usize, iy: usize) -> usize {
        iy * self.nx() + ix
    }

    /// Fill one entry; out-of-range entries are dropped.
    pub fn fill(&mut self, x: f64, y: f64, w: f64) {
        if let (Some(ix), Some(iy)) = (find_bin(&self.x_edges, x), find_bin(&self.y_edges, y)) {
            let k = self.index(ix, iy);
            self.bin_content[k] += w;
            self.sumw2[k] += w * w;
            self.entries += 1.0;
        }
    }

    /// Content of bin `(ix, iy)`.
    pub fn content(&self, ix: usize, iy: usize) -> f64 {
        self.bin_content[self.index(ix, iy)]
    }

    /// Error of bin `(ix, iy)`.
    pub fn error(&self, ix: usize, iy: usize) -> f64 {
        self.sumw2[self.index(ix, iy)].max(0.0).sqrt()
    }

    /// Sum of all bin contents.
    pub fn integral(&self) -> f64 {
        self.bin_content.iter().sum()
    }

    /// `self += c * other`.
    pub fn add(&mut self, other: &Histogram2D, c: f64) -> Result<()> {
        if self.x_edges != other.x_edges || self.y_edges != other.y_edges {
            return Err(Error::Histogram(format!(
                "cannot add '{}' to '{}': binning differs",
                other.name, self.name
            )));
        }
        for k in 0..self.bin_content.len() {
            self.bin_content[k] += c * other.bin_content[k];
            self.sumw2[k] += c * c * other.sumw2[k];
        }
        self.entries += other.entries;
        Ok(())
    }

    /// Scale contents by `f`.
    pub fn scale(&mut self, f: f64) {
        for k in 0..self.bin_content.len() {
            self.bin_content[k] *= f;
            self.sumw2[k] *= f * f;
        }
    }
}

// ── Graph with asymmetric errors ───────────────────────────────

/// One point of a [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphPoint {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
    /// Horizontal error to the left.
    pub ex_lo: f64,
    /// Horizontal error to the right.
    pub ex_hi: f64,
    /// Vertical error below.
    pub ey_lo: f64,
    /// Vertical error above.
    pub ey_hi: f64,
}

/// A graph with asymmetric errors (observed data, error bands, ratios).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    /// Graph name.
    pub name: String,
    /// Title (legend label).
    #[serde(default)]
    pub title: String,
    /// Points, ordered by `x`.
    pub points: Vec<GraphPoint>,
    /// Drawing hints.
    #[serde(default)]
    pub style: HistStyle,
}

impl Graph {
    /// Empty graph.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Observed-data graph from a histogram: points at bin centers with
    /// horizontal half-width errors and Poisson (Garwood) vertical errors.
    ///
    /// With `per_width`, contents and errors are divided by the bin width.
    pub fn from_poisson(h: &Histogram, per_width: bool) -> Self {
        let points = (0..h.n_bins())
            .map(|i| {
                let (lo, hi) = poisson_errors(h.bin_content[i]);
                let w = if per_width { h.bin_width(i) } else { 1.0 };
                let half = 0.5 * h.bin_width(i);
                GraphPoint {
                    x: h.bin_center(i),
                    y: h.bin_content[i] / w,
                    ex_lo: half,
                    ex_hi: half,
                    ey_lo: lo / w,
                    ey_hi: hi / w,
                }
            })
            .collect();
        Self {
            name: h.name.clone(),
            title: h.title.clone(),
            points,
            style: HistStyle { marker: true, ..h.style.clone() },
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// `true` if the graph has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Linear interpolation in `x`, clamped to the end points.
    pub fn eval(&self, x: f64) -> f64 {
        match self.points.len() {
            0 => 0.0,
            1 => self.points[0].y,
            n => {
                let i = self.points.partition_point(|p| p.x < x);
                if i == 0 {
                    self.points[0].y
                } else if i >= n {
                    self.points[n - 1].y
                } else {
                    let (a, b) = (&self.points[i - 1], &self.points[i]);
                    if (b.x - a.x).abs() < f64::EPSILON {
                        b.y
                    } else {
                        a.y + (b.y - a.y) * (x - a.x) / (b.x - a.x)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn uniform_binning() {
        let h = Histogram::uniform("h", 40, 0.0, 200.0).unwrap();
        assert_eq!(h.n_bins(), 40);
        assert_eq!(h.x_min(), 0.0);
        assert_eq!(h.x_max(), 200.0);
        assert_relative_eq!(h.bin_width(3), 5.0, epsilon = 1e-12);
        assert!(h.is_uniform());
    }

    #[test]
    fn invalid_binning() {
        assert!(Histogram::uniform("h", 10, 5.0, 5.0).is_err());
        assert!(Histogram::uniform("h", 0, 0.0, 1.0).is_err());
        assert!(Histogram::new("h", vec![0.0, 2.0, 1.0]).is_err());
        assert!(Histogram::new("h", vec![0.0]).is_err());
    }

    #[test]
    fn fill_and_flows() {
        let mut h = Histogram::new("h", vec![0.0, 1.0, 3.0, 7.0]).unwrap();
        h.fill(0.5, 2.0);
        h.fill(2.0, 2.0);
        h.fill(-1.0, 1.0);
        h.fill(7.0, 3.0);
        assert_eq!(h.bin_content, vec![2.0, 2.0, 0.0]);
        assert_eq!(h.sumw2, vec![4.0, 4.0, 0.0]);
        assert_eq!(h.underflow, 1.0);
        assert_eq!(h.overflow, 3.0);
        assert!(!h.is_uniform());
    }

    #[test]
    fn divide_by_width() {
        let mut h = Histogram::new("h", vec![0.0, 1.0, 3.0, 7.0]).unwrap();
        for x in [0.5, 2.0, 5.0] {
            h.fill(x, 2.0);
        }
        h.divide_by_bin_width();
        assert_eq!(h.bin_content, vec![2.0, 1.0, 0.5]);
        assert_relative_eq!(h.bin_error(2), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn add_and_scale() {
        let mut a = Histogram::uniform("a", 2, 0.0, 2.0).unwrap();
        let mut b = a.clone();
        a.fill(0.5, 1.0);
        b.fill(0.5, 2.0);
        b.fill(1.5, 1.0);
        a.add(&b, -1.0).unwrap();
        assert_eq!(a.bin_content, vec![-1.0, -1.0]);
        assert_eq!(a.sumw2, vec![5.0, 1.0]);
        a.scale(2.0);
        assert_eq!(a.bin_content, vec![-2.0, -2.0]);
        assert_eq!(a.sumw2, vec![20.0, 4.0]);

        let c = Histogram::uniform("c", 3, 0.0, 2.0).unwrap();
        assert!(a.add(&c, 1.0).is_err());
    }

    #[test]
    fn find_bin_edge_cases() {
        let edges = vec![0.0, 1.0, 2.0, 3.0];
        assert_eq!(find_bin(&edges, -0.5), None);
        assert_eq!(find_bin(&edges, 3.0), None);
        assert_eq!(find_bin(&edges, f64::NAN), None);
        assert_eq!(find_bin(&edges, 0.0), Some(0));
        assert_eq!(find_bin(&edges, 1.0), Some(1));
        assert_eq!(find_bin(&edges, 2.99), Some(2));
    }

    #[test]
    fn garwood_known_values() {
        let (lo0, hi0) = garwood_interval(0);
        assert_eq!(lo0, 0.0);
        assert_relative_eq!(hi0, 1.8410, epsilon = 1e-3);
        let (lo1, hi1) = garwood_interval(1);
        assert_relative_eq!(lo1, 0.8274, epsilon = 1e-3);
        assert_relative_eq!(hi1, 2.2996, epsilon = 1e-3);
    }

    #[test]
    fn poisson_error_mode() {
        let mut h = Histogram::uniform("data", 2, 0.0, 2.0).unwrap();
        h.error_mode = ErrorMode::Poisson;
        h.fill(0.5, 1.0);
        assert_relative_eq!(h.bin_error_low(0), 0.8274, epsilon = 1e-3);
        assert_relative_eq!(h.bin_error_up(0), 2.2996, epsilon = 1e-3);
        assert_eq!(h.bin_error_low(1), 0.0);
    }

    #[test]
    fn graph_from_poisson_and_eval() {
        let mut h = Histogram::new("data", vec![0.0, 1.0, 3.0]).unwrap();
        h.fill(0.5, 1.0);
        h.fill(2.0, 1.0);
        h.fill(2.5, 1.0);
        let g = Graph::from_poisson(&h, true);
        assert_eq!(g.len(), 2);
        assert_eq!(g.points[1].x, 2.0);
        assert_eq!(g.points[1].y, 1.0);
        assert_eq!(g.points[1].ex_lo, 1.0);
        assert!(g.style.marker);
        assert_relative_eq!(g.eval(1.25), 1.0, epsilon = 1e-12);
        assert_eq!(g.eval(-5.0), 1.0);
    }

    #[test]
    fn hist2d_fill() {
        let mut h = Histogram2D::new("h2", vec![-2.0, 0.0, 2.0], vec![1.0, 2.0, 3.0]).unwrap();
        h.fill(-1.0, 2.0, 1.0);
        h.fill(1.0, 1.0, 2.0);
        h.fill(1.0, 0.0, 5.0);
        assert_eq!(h.content(0, 1), 1.0);
        assert_eq!(h.content(1, 0), 2.0);
        assert_eq!(h.integral(), 3.0);
        assert_eq!(h.entries, 2.0);
    }
}
