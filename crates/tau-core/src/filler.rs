//! Single-pass histogram filling from column data with selections and weights.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::expr::CompiledExpr;
use crate::histogram::{Histogram, Histogram2D, find_bin, uniform_edges, validate_edges};

/// Under/overflow handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowPolicy {
    /// Drop entries outside the histogram range (record them in `underflow/overflow`).
    #[default]
    Drop,
    /// Fold underflow into the first bin and overflow into the last bin.
    Fold,
}

/// Negative weight handling policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegativeWeightPolicy {
    /// Keep negative weights as-is.
    #[default]
    Allow,
    /// Clamp negative weights to 0.
    ClampToZero,
    /// Error on the first negative weight encountered.
    Error,
}

/// Specification for filling one histogram.
#[derive(Debug, Clone)]
pub struct HistogramSpec {
    /// Histogram name.
    pub name: String,
    /// Expression for the variable to histogram.
    pub variable: CompiledExpr,
    /// Optional weight expression.
    pub weight: Option<CompiledExpr>,
    /// Optional selection expression (entries passing if != 0).
    pub selection: Option<CompiledExpr>,
    /// Constant factor multiplied into every weight (sample normalization).
    pub scale: f64,
    /// Bin edges (must be sorted, length = n_bins + 1).
    pub bin_edges: Vec<f64>,
    /// Under/overflow policy.
    pub flow_policy: FlowPolicy,
    /// Policy for negative event weights.
    pub negative_weight_policy: NegativeWeightPolicy,
}

impl HistogramSpec {
    /// Spec over explicit edges with no cut, unit weight and scale 1.
    pub fn new(name: impl Into<String>, variable: &str, bin_edges: Vec<f64>) -> Result<Self> {
        validate_edges(&bin_edges)?;
        Ok(Self {
            name: name.into(),
            variable: CompiledExpr::compile(variable)?,
            weight: None,
            selection: None,
            scale: 1.0,
            bin_edges,
            flow_policy: FlowPolicy::Drop,
            negative_weight_policy: NegativeWeightPolicy::Allow,
        })
    }

    /// Spec over `n_bins` uniform bins.
    pub fn uniform(
        name: impl Into<String>,
        variable: &str,
        n_bins: usize,
        x_min: f64,
        x_max: f64,
    ) -> Result<Self> {
        if n_bins == 0 || x_min.is_nan() || x_max.is_nan() || x_min >= x_max {
            return Err(Error::Range(format!("invalid binning ({n_bins}, {x_min}, {x_max})")));
        }
        Self::new(name, variable, uniform_edges(n_bins, x_min, x_max))
    }

    /// Set the selection (blank means none).
    pub fn with_selection(mut self, cut: &str) -> Result<Self> {
        self.selection = CompiledExpr::compile_opt(cut)?;
        Ok(self)
    }

    /// Set the weight expression (blank means unit weight).
    pub fn with_weight(mut self, weight: &str) -> Result<Self> {
        self.weight = CompiledExpr::compile_opt(weight)?;
        Ok(self)
    }

    /// Set the constant scale.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Columns referenced by any expression of this spec.
    pub fn required_branches(&self) -> Vec<String> {
        collect_branches([Some(&self.variable), self.weight.as_ref(), self.selection.as_ref()])
    }

    /// Empty histogram with this spec's name and binning.
    pub fn empty_histogram(&self) -> Histogram {
        let n = self.bin_edges.len().saturating_sub(1);
        Histogram::from(FilledHistogram {
            name: self.name.clone(),
            bin_edges: self.bin_edges.clone(),
            bin_content: vec![0.0; n],
            sumw2: vec![0.0; n],
            underflow: 0.0,
            overflow: 0.0,
            negative_weight_entries: 0,
            entries: 0,
        })
    }
}

/// Specification for filling one 2-D histogram.
#[derive(Debug, Clone)]
pub struct Histogram2DSpec {
    /// Histogram name.
    pub name: String,
    /// X expression.
    pub x: CompiledExpr,
    /// Y expression.
    pub y: CompiledExpr,
    /// Optional weight expression.
    pub weight: Option<CompiledExpr>,
    /// Optional selection expression.
    pub selection: Option<CompiledExpr>,
    /// Constant factor multiplied into every weight.
    pub scale: f64,
    /// X bin edges.
    pub x_edges: Vec<f64>,
    /// Y bin edges.
    pub y_edges: Vec<f64>,
}

impl Histogram2DSpec {
    /// Spec with no cut, unit weight and scale 1.
    pub fn new(
        name: impl Into<String>,
        x: &str,
        y: &str,
        x_edges: Vec<f64>,
        y_edges: Vec<f64>,
    ) -> Result<Self> {
        validate_edges(&x_edges)?;
        validate_edges(&y_edges)?;
        Ok(Self {
            name: name.into(),
            x: CompiledExpr::compile(x)?,
            y: CompiledExpr::compile(y)?,
            weight: None,
            selection: None,
            scale: 1.0,
            x_edges,
            y_edges,
        })
    }

    /// Set the selection (blank means none).
    pub fn with_selection(mut self, cut: &str) -> Result<Self> {
        self.selection = CompiledExpr::compile_opt(cut)?;
        Ok(self)
    }

    /// Set the weight expression (blank means unit weight).
    pub fn with_weight(mut self, weight: &str) -> Result<Self> {
        self.weight = CompiledExpr::compile_opt(weight)?;
        Ok(self)
    }

    /// Set the constant scale.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Empty 2-D histogram with this spec's name and binning.
    pub fn empty_histogram(&self) -> Histogram2D {
        let n = self.x_edges.len().saturating_sub(1) * self.y_edges.len().saturating_sub(1);
        Histogram2D {
            name: self.name.clone(),
            title: String::new(),
            x_title: String::new(),
            y_title: String::new(),
            x_edges: self.x_edges.clone(),
            y_edges: self.y_edges.clone(),
            bin_content: vec![0.0; n],
            sumw2: vec![0.0; n],
            entries: 0.0,
        }
    }

    /// Columns referenced by any expression of this spec.
    pub fn required_branches(&self) -> Vec<String> {
        collect_branches([Some(&self.x), Some(&self.y), self.weight.as_ref(), self.selection.as_ref()])
    }
}

/// Specification for a weighted mean of an expression.
#[derive(Debug, Clone)]
pub struct MeanSpec {
    /// Name of the booked quantity.
    pub name: String,
    /// Expression to average.
    pub expr: CompiledExpr,
    /// Optional weight expression.
    pub weight: Option<CompiledExpr>,
    /// Optional selection expression.
    pub selection: Option<CompiledExpr>,
    /// Constant factor multiplied into every weight.
    pub scale: f64,
}

impl MeanSpec {
    /// Unweighted mean of `expr` over all entries.
    pub fn new(name: impl Into<String>, expr: &str) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            expr: CompiledExpr::compile(expr)?,
            weight: None,
            selection: None,
            scale: 1.0,
        })
    }

    /// Set the selection (blank means none).
    pub fn with_selection(mut self, cut: &str) -> Result<Self> {
        self.selection = CompiledExpr::compile_opt(cut)?;
        Ok(self)
    }

    /// Set the weight expression (blank means unit weight).
    pub fn with_weight(mut self, weight: &str) -> Result<Self> {
        self.weight = CompiledExpr::compile_opt(weight)?;
        Ok(self)
    }

    /// Set the constant scale.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Columns referenced by any expression of this spec.
    pub fn required_branches(&self) -> Vec<String> {
        collect_branches([Some(&self.expr), self.weight.as_ref(), self.selection.as_ref()])
    }
}

fn collect_branches<'a>(exprs: impl IntoIterator<Item = Option<&'a CompiledExpr>>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for e in exprs.into_iter().flatten() {
        for b in &e.required_branches {
            if !out.contains(b) {
                out.push(b.clone());
            }
        }
    }
    out
}

/// Weighted mean accumulator. Associative under [`WeightedMean::merge`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightedMean {
    /// Sum of `w * x`.
    pub sum_wx: f64,
    /// Sum of `w`.
    pub sumw: f64,
}

impl WeightedMean {
    /// Mean value, or 0 without entries.
    pub fn mean(&self) -> f64 {
        if self.sumw != 0.0 { self.sum_wx / self.sumw } else { 0.0 }
    }

    /// Combine with another accumulator.
    pub fn merge(&mut self, other: &WeightedMean) {
        self.sum_wx += other.sum_wx;
        self.sumw += other.sumw;
    }
}

/// Result of filling a histogram.
#[derive(Debug, Clone)]
pub struct FilledHistogram {
    /// Histogram name.
    pub name: String,
    /// Bin edges.
    pub bin_edges: Vec<f64>,
    /// Bin contents (sum of weights per bin).
    pub bin_content: Vec<f64>,
    /// Sum of weights squared per bin.
    pub sumw2: Vec<f64>,
    /// Underflow sum of weights (before optional folding).
    pub underflow: f64,
    /// Overflow sum of weights (before optional folding).
    pub overflow: f64,
    /// Count of selected entries with negative weights (after applying policy).
    pub negative_weight_entries: u64,
    /// Total entries passing selection.
    pub entries: u64,
}

impl From<FilledHistogram> for Histogram {
    fn from(fh: FilledHistogram) -> Self {
        Histogram {
            name: fh.name,
            title: String::new(),
            x_title: String::new(),
            y_title: String::new(),
            bin_edges: fh.bin_edges,
            bin_content: fh.bin_content,
            sumw2: fh.sumw2,
            underflow: fh.underflow,
            overflow: fh.overflow,
            entries: fh.entries as f64,
            error_mode: Default::default(),
            style: Default::default(),
        }
    }
}

impl Histogram {
    /// Accumulate a filled partial result into this histogram.
    pub fn absorb(&mut self, fh: &FilledHistogram) -> Result<()> {
        if fh.bin_content.len() != self.n_bins() {
            return Err(Error::Histogram(format!(
                "partial fill of '{}' has {} bins, expected {}",
                fh.name,
                fh.bin_content.len(),
                self.n_bins()
            )));
        }
        for i in 0..self.n_bins() {
            self.bin_content[i] += fh.bin_content[i];
            self.sumw2[i] += fh.sumw2[i];
        }
        self.underflow += fh.underflow;
        self.overflow += fh.overflow;
        self.entries += fh.entries as f64;
        Ok(())
    }
}

/// Fill multiple histograms in a single pass over the data.
///
/// `columns` maps column names to their data arrays. All arrays must have
/// the same length.
pub fn fill_histograms(
    specs: &[HistogramSpec],
    columns: &HashMap<String, Vec<f64>>,
) -> Result<Vec<FilledHistogram>> {
    if specs.is_empty() {
        return Ok(Vec::new());
    }

    let n_entries = columns.values().next().map(|v| v.len()).unwrap_or(0);

    // Pre-evaluate all expressions column-wise
    let mut var_vals: Vec<Vec<f64>> = Vec::with_capacity(specs.len());
    let mut weight_vals: Vec<Option<Vec<f64>>> = Vec::with_capacity(specs.len());
    let mut sel_vals: Vec<Option<Vec<f64>>> = Vec::with_capacity(specs.len());

    for spec in specs {
        var_vals.push(eval_expr_columns(&spec.variable, columns, n_entries)?);
        weight_vals.push(eval_opt(spec.weight.as_ref(), columns, n_entries)?);
        sel_vals.push(eval_opt(spec.selection.as_ref(), columns, n_entries)?);
    }

    let mut results: Vec<FilledHistogram> = Vec::with_capacity(specs.len());
    for spec in specs {
        let n_bins = spec.bin_edges.len().saturating_sub(1);
        if n_bins == 0 {
            return Err(Error::Histogram(format!(
                "invalid bin_edges for spec='{}' (len(edges)={})",
                spec.name,
                spec.bin_edges.len()
            )));
        }
        results.push(FilledHistogram {
            name: spec.name.clone(),
            bin_edges: spec.bin_edges.clone(),
            bin_content: vec![0.0; n_bins],
            sumw2: vec![0.0; n_bins],
            underflow: 0.0,
            overflow: 0.0,
            negative_weight_entries: 0,
            entries: 0,
        });
    }

    for entry in 0..n_entries {
        for (i, spec) in specs.iter().enumerate() {
            if let Some(ref sel) = sel_vals[i]
                && sel[entry] == 0.0
            {
                continue;
            }

            let val = var_vals[i][entry];
            let mut weight = match &weight_vals[i] {
                Some(w) => w[entry] * spec.scale,
                None => spec.scale,
            };

            if weight < 0.0 {
                match spec.negative_weight_policy {
                    NegativeWeightPolicy::Allow => {
                        results[i].negative_weight_entries += 1;
                    }
                    NegativeWeightPolicy::ClampToZero => {
                        results[i].negative_weight_entries += 1;
                        weight = 0.0;
                    }
                    NegativeWeightPolicy::Error => {
                        return Err(Error::Histogram(format!(
                            "negative weight (spec='{}', entry={entry}, weight={weight})",
                            spec.name
                        )));
                    }
                }
            }

            let w2 = weight * weight;
            let r = &mut results[i];
            let n_bins = r.bin_content.len();
            let target = if val < r.bin_edges[0] {
                r.underflow += weight;
                (spec.flow_policy == FlowPolicy::Fold).then_some(0)
            } else if val >= r.bin_edges[n_bins] {
                r.overflow += weight;
                (spec.flow_policy == FlowPolicy::Fold).then_some(n_bins - 1)
            } else {
                find_bin(&r.bin_edges, val)
            };
            if let Some(b) = target {
                r.bin_content[b] += weight;
                r.sumw2[b] += w2;
                r.entries += 1;
            }
        }
    }

    Ok(results)
}

/// Fill 2-D histograms in one pass. Out-of-range entries are dropped.
pub fn fill_histograms_2d(
    specs: &[Histogram2DSpec],
    columns: &HashMap<String, Vec<f64>>,
) -> Result<Vec<Histogram2D>> {
    let n_entries = columns.values().next().map(|v| v.len()).unwrap_or(0);
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let mut h = spec.empty_histogram();
        let xs = eval_expr_columns(&spec.x, columns, n_entries)?;
        let ys = eval_expr_columns(&spec.y, columns, n_entries)?;
        let ws = eval_opt(spec.weight.as_ref(), columns, n_entries)?;
        let sel = eval_opt(spec.selection.as_ref(), columns, n_entries)?;
        for entry in 0..n_entries {
            if let Some(ref s) = sel
                && s[entry] == 0.0
            {
                continue;
            }
            let w = ws.as_ref().map_or(1.0, |w| w[entry]) * spec.scale;
            h.fill(xs[entry], ys[entry], w);
        }
        out.push(h);
    }
    Ok(out)
}

/// Accumulate weighted means in one pass.
pub fn fill_means(
    specs: &[MeanSpec],
    columns: &HashMap<String, Vec<f64>>,
) -> Result<Vec<WeightedMean>> {
    let n_entries = columns.values().next().map(|v| v.len()).unwrap_or(0);
    let mut out = Vec::with_capacity(specs.len());
    for spec in specs {
        let xs = eval_expr_columns(&spec.expr, columns, n_entries)?;
        let ws = eval_opt(spec.weight.as_ref(), columns, n_entries)?;
        let sel = eval_opt(spec.selection.as_ref(), columns, n_entries)?;
        let mut acc = WeightedMean::default();
        for entry in 0..n_entries {
            if let Some(ref s) = sel
                && s[entry] == 0.0
            {
                continue;
            }
            let w = ws.as_ref().map_or(1.0, |w| w[entry]) * spec.scale;
            acc.sum_wx += w * xs[entry];
            acc.sumw += w;
        }
        out.push(acc);
    }
    Ok(out)
}

fn eval_opt(
    expr: Option<&CompiledExpr>,
    columns: &HashMap<String, Vec<f64>>,
    n_entries: usize,
) -> Result<Option<Vec<f64>>> {
    expr.map(|e| eval_expr_columns(e, columns, n_entries)).transpose()
}

/// Evaluate a compiled expression using column data.
fn eval_expr_columns(
    expr: &CompiledExpr,
    columns: &HashMap<String, Vec<f64>>,
    n_entries: usize,
) -> Result<Vec<f64>> {
    let cols: Vec<&[f64]> = expr
        .required_branches
        .iter()
        .map(|name| {
            columns.get(name.as_str()).map(|v| v.as_slice()).ok_or_else(|| {
                Error::Expression(format!("missing column '{}' in '{}'", name, expr.source()))
            })
        })
        .collect::<Result<_>>()?;

    if cols.is_empty() {
        // Constant expression
        let val = expr.eval_row(&[]);
        return Ok(vec![val; n_entries]);
    }

    Ok(expr.eval_bulk(&cols))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(edges: Vec<f64>) -> HistogramSpec {
        HistogramSpec::new("h", "x", edges).unwrap()
    }

    #[test]
    fn fill_simple() {
        let mut cols = HashMap::new();
        cols.insert("x".into(), vec![0.5, 1.5, 2.5, 0.5, -1.0, 3.5]);

        let result = fill_histograms(&[spec(vec![0.0, 1.0, 2.0, 3.0])], &cols).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].bin_content, vec![2.0, 1.0, 1.0]);
        assert_eq!(result[0].underflow, 1.0);
        assert_eq!(result[0].overflow, 1.0);
        assert_eq!(result[0].entries, 4);
    }

    #[test]
    fn fill_with_weight_and_scale() {
        let s = spec(vec![0.0, 1.0, 2.0]).with_weight("w").unwrap().with_scale(2.0);

        let mut cols = HashMap::new();
        cols.insert("x".into(), vec![0.5, 1.5, 0.5]);
        cols.insert("w".into(), vec![2.0, 3.0, 1.0]);

        let result = fill_histograms(&[s], &cols).unwrap();
        assert_eq!(result[0].bin_content, vec![6.0, 6.0]);
        assert_eq!(result[0].sumw2, vec![20.0, 36.0]);
    }

    #[test]
    fn fill_with_selection() {
        let s = spec(vec![0.0, 1.0, 2.0, 3.0]).with_selection("x > 1.0").unwrap();

        let mut cols = HashMap::new();
        cols.insert("x".into(), vec![0.5, 1.5, 2.5, 0.3]);

        let result = fill_histograms(&[s], &cols).unwrap();
        assert_eq!(result[0].bin_content, vec![0.0, 1.0, 1.0]);
        assert_eq!(result[0].entries, 2);
    }

    #[test]
    fn fill_flow_fold() {
        let mut s = spec(vec![0.0, 1.0, 2.0]);
        s.flow_policy = FlowPolicy::Fold;

        let mut cols = HashMap::new();
        cols.insert("x".into(), vec![-1.0, 0.2, 1.2, 3.0]);

        let result = fill_histograms(&[s], &cols).unwrap();
        assert_eq!(result[0].bin_content, vec![2.0, 2.0]);
        assert_eq!(result[0].underflow, 1.0);
        assert_eq!(result[0].overflow, 1.0);
        assert_eq!(result[0].entries, 4);
    }

    #[test]
    fn fill_negative_weight_policies() {
        let mut s = spec(vec![0.0, 1.0, 2.0]).with_weight("w").unwrap();
        s.negative_weight_policy = NegativeWeightPolicy::Error;

        let mut cols = HashMap::new();
        cols.insert("x".into(), vec![0.5, 1.5]);
        cols.insert("w".into(), vec![-1.0, 2.0]);

        let err = fill_histograms(std::slice::from_ref(&s), &cols).unwrap_err();
        assert!(err.to_string().contains("negative weight"));

        s.negative_weight_policy = NegativeWeightPolicy::ClampToZero;
        let r = fill_histograms(&[s], &cols).unwrap();
        assert_eq!(r[0].bin_content, vec![0.0, 2.0]);
        assert_eq!(r[0].negative_weight_entries, 1);
    }

    #[test]
    fn missing_column_is_reported() {
        let s = spec(vec![0.0, 1.0]).with_selection("iso_1<0.15").unwrap();
        let mut cols = HashMap::new();
        cols.insert("x".into(), vec![0.5]);
        let err = fill_histograms(&[s], &cols).unwrap_err();
        assert!(err.to_string().contains("iso_1"));
    }

    #[test]
    fn fill_2d_and_means() {
        let mut cols = HashMap::new();
        cols.insert("q".into(), vec![-1.0, 1.0, 1.0]);
        cols.insert("t".into(), vec![2.0, 1.0, 2.0]);
        let s2 =
            Histogram2DSpec::new("abcd", "q", "t", vec![-2.0, 0.0, 2.0], vec![1.0, 2.0, 3.0])
                .unwrap();
        let h = &fill_histograms_2d(&[s2], &cols).unwrap()[0];
        assert_eq!(h.content(0, 1), 1.0);
        assert_eq!(h.content(1, 0), 1.0);
        assert_eq!(h.content(1, 1), 1.0);

        let m = MeanSpec::new("mean_t", "t").unwrap().with_selection("q > 0").unwrap();
        let acc = fill_means(&[m], &cols).unwrap()[0];
        assert_eq!(acc.sumw, 2.0);
        assert_eq!(acc.mean(), 1.5);
    }

    #[test]
    fn filled_histogram_to_histogram() {
        let fh = FilledHistogram {
            name: "test".into(),
            bin_edges: vec![0.0, 1.0, 2.0],
            bin_content: vec![5.0, 3.0],
            sumw2: vec![25.0, 9.0],
            underflow: 0.0,
            overflow: 1.0,
            negative_weight_entries: 0,
            entries: 8,
        };
        let mut h: Histogram = fh.clone().into();
        assert_eq!(h.n_bins(), 2);
        assert_eq!(h.x_max(), 2.0);
        h.absorb(&fh).unwrap();
        assert_eq!(h.bin_content, vec![10.0, 6.0]);
        assert_eq!(h.overflow, 2.0);
        assert_eq!(h.entries, 16.0);
    }
}
