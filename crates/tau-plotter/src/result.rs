//! Deferred results keyed by (selection, variable, sample).

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tau_core::{
    DataFrame, ExecutionMode, FillValue, HistStyle, Histogram, Histogram2D, ResultPtr,
    WeightedMean, run_frames,
};

use crate::{Error, Result};

/// A booked result: one engine handle, or the sum over a merged sample's children.
#[derive(Debug, Clone)]
pub enum Deferred {
    /// Handle into one frame.
    Single(ResultPtr),
    /// Sum of child results.
    Merged(MergedResult),
}

impl Deferred {
    /// Every frame this result depends on.
    pub fn collect_frames(&self, out: &mut Vec<DataFrame>) {
        match self {
            Deferred::Single(ptr) => out.push(ptr.frame().clone()),
            Deferred::Merged(m) => m.parts.iter().for_each(|p| p.collect_frames(out)),
        }
    }

    /// Whether every underlying booking has been filled.
    pub fn is_ready(&self) -> bool {
        match self {
            Deferred::Single(ptr) => ptr.is_ready(),
            Deferred::Merged(m) => m.cache.get().is_some() || m.parts.iter().all(Deferred::is_ready),
        }
    }

    /// Materialize, running the engine for any frame that has not run yet.
    pub fn value(&self) -> Result<FillValue> {
        match self {
            Deferred::Single(ptr) => ptr.value(),
            Deferred::Merged(m) => m.value(),
        }
    }

    /// Materialize as a 1-D histogram.
    pub fn histogram(&self) -> Result<Histogram> {
        match self.value()? {
            FillValue::Hist1D(h) => Ok(h),
            _ => Err(Error::Engine("result is not a 1-D histogram".into())),
        }
    }

    /// Materialize as a 2-D histogram.
    pub fn histogram2d(&self) -> Result<Histogram2D> {
        match self.value()? {
            FillValue::Hist2D(h) => Ok(h),
            _ => Err(Error::Engine("result is not a 2-D histogram".into())),
        }
    }

    /// Materialize as a weighted mean.
    pub fn mean(&self) -> Result<WeightedMean> {
        match self.value()? {
            FillValue::Mean(m) => Ok(m),
            _ => Err(Error::Engine("result is not a mean".into())),
        }
    }
}

/// Results of a merged sample's children, summed when first requested.
///
/// Histograms add bin by bin; weighted means combine through their sums of
/// weights, so nesting merged samples gives the same mean as a flat merge.
#[derive(Debug, Clone)]
pub struct MergedResult {
    /// Name given to the summed histogram.
    pub name: String,
    /// Title given to the summed histogram.
    pub title: String,
    /// Style given to the summed histogram.
    pub style: HistStyle,
    parts: Vec<Deferred>,
    cache: Arc<OnceLock<FillValue>>,
}

impl MergedResult {
    /// Empty merged result.
    pub fn new(name: impl Into<String>, title: impl Into<String>, style: HistStyle) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            style,
            parts: Vec::new(),
            cache: Arc::new(OnceLock::new()),
        }
    }

    /// Add a child result.
    pub fn push(&mut self, part: Deferred) {
        self.parts.push(part);
    }

    /// Child results.
    pub fn parts(&self) -> &[Deferred] {
        &self.parts
    }

    /// Sum of the children (cached after the first call).
    pub fn value(&self) -> Result<FillValue> {
        if let Some(v) = self.cache.get() {
            return Ok(v.clone());
        }
        let mut parts = self.parts.iter();
        let first = parts
            .next()
            .ok_or_else(|| Error::Engine(format!("merged result '{}' has no parts", self.name)))?;
        let mut total = first.value()?;
        for part in parts {
            match (&mut total, part.value()?) {
                (FillValue::Hist1D(a), FillValue::Hist1D(b)) => a.add(&b, 1.0)?,
                (FillValue::Hist2D(a), FillValue::Hist2D(b)) => a.add(&b, 1.0)?,
                (FillValue::Mean(a), FillValue::Mean(b)) => a.merge(&b),
                _ => {
                    return Err(Error::Engine(format!(
                        "merged result '{}' mixes result kinds",
                        self.name
                    )));
                }
            }
        }
        match &mut total {
            FillValue::Hist1D(h) => {
                h.name = self.name.clone();
                h.title = self.title.clone();
                h.style = self.style.clone();
            }
            FillValue::Hist2D(h) => {
                h.name = self.name.clone();
                h.title = self.title.clone();
            }
            FillValue::Mean(_) => {}
        }
        let _ = self.cache.set(total.clone());
        Ok(total)
    }
}

/// One entry of a [`ResultDict`].
#[derive(Debug, Clone)]
pub struct ResultEntry {
    /// Selection key (file name of the selection).
    pub selection: String,
    /// Variable key (file name of the variable).
    pub variable: String,
    /// Sample name.
    pub sample: String,
    /// Booked result.
    pub result: Deferred,
}

/// Booked results keyed by selection, variable and sample, in booking order.
#[derive(Debug, Clone, Default)]
pub struct ResultDict {
    entries: Vec<ResultEntry>,
    index: HashMap<(String, String, String), usize>,
}

impl ResultDict {
    /// Empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a result. A later entry with the same key replaces the earlier one.
    pub fn add(&mut self, selection: &str, variable: &str, sample: &str, result: Deferred) {
        let key = (selection.to_string(), variable.to_string(), sample.to_string());
        if let Some(&i) = self.index.get(&key) {
            self.entries[i].result = result;
            return;
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(ResultEntry {
            selection: selection.to_string(),
            variable: variable.to_string(),
            sample: sample.to_string(),
            result,
        });
    }

    /// Append all entries of `other`.
    pub fn update(&mut self, other: ResultDict) {
        for e in other.entries {
            self.add(&e.selection, &e.variable, &e.sample, e.result);
        }
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing was booked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in booking order.
    pub fn iter(&self) -> impl Iterator<Item = &ResultEntry> {
        self.entries.iter()
    }

    /// Result for a key.
    pub fn get(&self, selection: &str, variable: &str, sample: &str) -> Option<&Deferred> {
        let key = (selection.to_string(), variable.to_string(), sample.to_string());
        self.index.get(&key).map(|&i| &self.entries[i].result)
    }

    /// Selection keys in booking order.
    pub fn selections(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for e in &self.entries {
            if !out.contains(&e.selection.as_str()) {
                out.push(&e.selection);
            }
        }
        out
    }

    /// Variable keys booked for `selection`.
    pub fn variables(&self, selection: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for e in self.entries.iter().filter(|e| e.selection == selection) {
            if !out.contains(&e.variable.as_str()) {
                out.push(&e.variable);
            }
        }
        out
    }

    /// Sample results booked for `(selection, variable)`.
    pub fn samples(&self, selection: &str, variable: &str) -> Vec<(&str, &Deferred)> {
        self.entries
            .iter()
            .filter(|e| e.selection == selection && e.variable == variable)
            .map(|e| (e.sample.as_str(), &e.result))
            .collect()
    }

    /// Distinct frames behind all results.
    pub fn frames(&self) -> Vec<DataFrame> {
        let mut all = Vec::new();
        for e in &self.entries {
            e.result.collect_frames(&mut all);
        }
        let mut out: Vec<DataFrame> = Vec::new();
        for f in all {
            if !out.iter().any(|g| g.same_frame(&f)) {
                out.push(f);
            }
        }
        out
    }

    /// Run the event loop once for every pending booking.
    pub fn run(&self, mode: ExecutionMode) -> Result<()> {
        let frames = self.frames();
        let pending: usize = frames.iter().map(DataFrame::n_pending).sum();
        if pending == 0 {
            log::debug!("ResultDict::run: nothing pending");
            return Ok(());
        }
        let clusters: usize =
            frames.iter().flat_map(|f| f.sources().iter().map(|s| s.n_clusters())).sum();
        log::info!(
            "filling {pending} booking(s) for {} result(s) over {clusters} cluster(s) in {} frame(s)",
            self.len(),
            frames.len()
        );
        run_frames(&frames, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tau_core::{HistogramSpec, MeanSpec, MemorySource};

    fn frame(name: &str, xs: Vec<f64>) -> DataFrame {
        let src = MemorySource::new(name, vec![("x".into(), xs)]).unwrap().with_cluster_size(2);
        DataFrame::new(name, vec![Arc::new(src)])
    }

    fn hist(f: &DataFrame) -> Deferred {
        Deferred::Single(f.book_hist(HistogramSpec::uniform("x", "x", 2, 0.0, 2.0).unwrap(), None))
    }

    #[test]
    fn merged_histogram_sums_children() {
        let a = frame("a", vec![0.5, 1.5, 1.5]);
        let b = frame("b", vec![0.5]);
        let mut m = MergedResult::new("x_sr_DY", "Drell-Yan", HistStyle::default());
        m.push(hist(&a));
        m.push(hist(&b));
        let mut rd = ResultDict::new();
        rd.add("sr", "x", "DY", Deferred::Merged(m));
        assert_eq!(rd.frames().len(), 2);
        rd.run(ExecutionMode::Sequential).unwrap();
        let h = rd.get("sr", "x", "DY").unwrap().histogram().unwrap();
        assert_eq!(h.bin_content, vec![2.0, 2.0]);
        assert_eq!(h.name, "x_sr_DY");
        assert_eq!(h.title, "Drell-Yan");
    }

    #[test]
    fn merged_means_are_weighted() {
        let a = frame("a", vec![1.0, 1.0, 1.0]);
        let b = frame("b", vec![5.0]);
        let mut m = MergedResult::new("mean", "", HistStyle::default());
        m.push(Deferred::Single(a.book_mean(MeanSpec::new("x", "x").unwrap())));
        m.push(Deferred::Single(b.book_mean(MeanSpec::new("x", "x").unwrap())));
        let mean = Deferred::Merged(m).mean().unwrap();
        assert_eq!(mean.sumw, 4.0);
        assert_eq!(mean.mean(), 2.0);
    }

    #[test]
    fn run_is_idempotent() {
        let a = frame("a", vec![0.5, 1.5, 0.2]);
        let mut rd = ResultDict::new();
        rd.add("sr", "x", "a", hist(&a));
        rd.run(ExecutionMode::Parallel(2)).unwrap();
        let first = rd.get("sr", "x", "a").unwrap().histogram().unwrap();
        rd.run(ExecutionMode::Parallel(2)).unwrap();
        let second = rd.get("sr", "x", "a").unwrap().histogram().unwrap();
        assert_eq!(first, second);
        assert!(rd.get("sr", "x", "a").unwrap().is_ready());
    }

    #[test]
    fn keys_in_booking_order() {
        let a = frame("a", vec![0.5]);
        let mut rd = ResultDict::new();
        rd.add("sr", "x", "a", hist(&a));
        rd.add("cr", "x", "a", hist(&a));
        rd.add("sr", "y", "a", hist(&a));
        assert_eq!(rd.selections(), vec!["sr", "cr"]);
        assert_eq!(rd.variables("sr"), vec!["x", "y"]);
        assert_eq!(rd.len(), 3);
        assert_eq!(rd.frames().len(), 1);
    }

    #[test]
    fn readding_a_key_replaces_in_place() {
        let a = frame("a", vec![0.5]);
        let b = frame("b", vec![1.5, 1.5]);
        let mut rd = ResultDict::new();
        for sel in ["sr", "cr", "ss"] {
            rd.add(sel, "x", "a", hist(&a));
        }
        let mut other = ResultDict::new();
        other.add("cr", "x", "a", hist(&b));
        other.add("os", "x", "a", hist(&b));
        rd.update(other);
        assert_eq!(rd.selections(), vec!["sr", "cr", "ss", "os"]);
        rd.run(ExecutionMode::Sequential).unwrap();
        assert_eq!(rd.get("cr", "x", "a").unwrap().histogram().unwrap().bin_content, vec![0.0, 2.0]);
        assert_eq!(rd.get("sr", "x", "a").unwrap().histogram().unwrap().bin_content, vec![1.0, 0.0]);
        assert!(rd.get("cr", "x", "b").is_none());
    }
}
