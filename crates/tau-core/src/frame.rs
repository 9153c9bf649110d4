//! Deferred dataframe engine.
//!
//! Fills are *booked* on a [`DataFrame`] and return a [`ResultPtr`]. Nothing is
//! read until a result is requested or [`run_frames`] is called; then every
//! pending booking of every frame is filled in one pass over the clusters of
//! each source, optionally in parallel.
//!
//! Partial results are reduced in cluster order so that the outcome does not
//! depend on the number of worker threads. A run either completes every
//! pending booking or stores nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::filler::{
    Histogram2DSpec, HistogramSpec, MeanSpec, WeightedMean, fill_histograms, fill_histograms_2d,
    fill_means,
};
use crate::histogram::{Histogram, Histogram2D};
use crate::source::EventSource;

/// How [`run_frames`] schedules cluster tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Run on a rayon pool; `0` uses the global pool.
    Parallel(usize),
    /// Run on the calling thread.
    Sequential,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Parallel(0)
    }
}

/// A booked fill.
#[derive(Debug, Clone)]
pub enum Booking {
    /// 1-D histogram. `template` carries titles and style; its binning must match the spec.
    Hist1D {
        /// Fill specification.
        spec: HistogramSpec,
        /// Empty result histogram.
        template: Histogram,
    },
    /// 2-D histogram.
    Hist2D {
        /// Fill specification.
        spec: Histogram2DSpec,
        /// Empty result histogram.
        template: Histogram2D,
    },
    /// Weighted mean.
    Mean {
        /// Fill specification.
        spec: MeanSpec,
    },
}

impl Booking {
    fn required_branches(&self) -> Vec<String> {
        match self {
            Booking::Hist1D { spec, .. } => spec.required_branches(),
            Booking::Hist2D { spec, .. } => spec.required_branches(),
            Booking::Mean { spec } => spec.required_branches(),
        }
    }

    fn empty_value(&self) -> FillValue {
        match self {
            Booking::Hist1D { template, .. } => {
                let mut h = template.clone();
                h.reset();
                FillValue::Hist1D(h)
            }
            Booking::Hist2D { template, .. } => FillValue::Hist2D(template.clone()),
            Booking::Mean { .. } => FillValue::Mean(WeightedMean::default()),
        }
    }
}

/// Materialized value of a booking.
#[derive(Debug, Clone)]
pub enum FillValue {
    /// 1-D histogram.
    Hist1D(Histogram),
    /// 2-D histogram.
    Hist2D(Histogram2D),
    /// Weighted mean accumulator.
    Mean(WeightedMean),
}

impl FillValue {
    fn merge(&mut self, other: &FillValue) -> Result<()> {
        match (self, other) {
            (FillValue::Hist1D(a), FillValue::Hist1D(b)) => a.add(b, 1.0),
            (FillValue::Hist2D(a), FillValue::Hist2D(b)) => a.add(b, 1.0),
            (FillValue::Mean(a), FillValue::Mean(b)) => {
                a.merge(b);
                Ok(())
            }
            _ => Err(Error::Engine("mismatched partial results".into())),
        }
    }
}

#[derive(Debug, Default)]
struct FrameState {
    bookings: Vec<Booking>,
    values: Vec<Option<FillValue>>,
}

impl FrameState {
    fn pending(&self) -> Vec<usize> {
        (0..self.bookings.len()).filter(|&i| self.values[i].is_none()).collect()
    }
}

#[derive(Debug)]
struct FrameInner {
    name: String,
    sources: Vec<Arc<dyn EventSource>>,
    state: Mutex<FrameState>,
}

/// Lazily evaluated view of one or more event sources.
///
/// Cloning is cheap and shares the bookings.
#[derive(Debug, Clone)]
pub struct DataFrame {
    inner: Arc<FrameInner>,
}

impl DataFrame {
    /// Frame over the concatenation of `sources`.
    pub fn new(name: impl Into<String>, sources: Vec<Arc<dyn EventSource>>) -> Self {
        Self {
            inner: Arc::new(FrameInner {
                name: name.into(),
                sources,
                state: Mutex::new(FrameState::default()),
            }),
        }
    }

    /// Frame name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Underlying sources.
    pub fn sources(&self) -> &[Arc<dyn EventSource>] {
        &self.inner.sources
    }

    /// Total number of rows over all sources.
    pub fn n_entries(&self) -> u64 {
        self.inner.sources.iter().map(|s| s.n_entries()).sum()
    }

    /// Whether every source has column `name`.
    pub fn has_branch(&self, name: &str) -> bool {
        !self.inner.sources.is_empty() && self.inner.sources.iter().all(|s| s.has_branch(name))
    }

    /// Whether both handles refer to the same frame.
    pub fn same_frame(&self, other: &DataFrame) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of bookings not yet filled.
    pub fn n_pending(&self) -> usize {
        self.lock().map(|s| s.pending().len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, FrameState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| Error::Engine(format!("state of frame '{}' is poisoned", self.inner.name)))
    }

    /// Book a fill. Nothing is read until the result is requested.
    pub fn book(&self, booking: Booking) -> ResultPtr {
        let mut st = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.bookings.push(booking);
        st.values.push(None);
        let index = st.bookings.len() - 1;
        drop(st);
        ResultPtr { frame: self.clone(), index }
    }

    /// Book a 1-D histogram. Without a template the result carries only the spec's name and binning.
    pub fn book_hist(&self, spec: HistogramSpec, template: Option<Histogram>) -> ResultPtr {
        let template = template.unwrap_or_else(|| spec.empty_histogram());
        self.book(Booking::Hist1D { spec, template })
    }

    /// Book a 2-D histogram.
    pub fn book_hist2d(&self, spec: Histogram2DSpec) -> ResultPtr {
        let template = spec.empty_histogram();
        self.book(Booking::Hist2D { spec, template })
    }

    /// Book a weighted mean.
    pub fn book_mean(&self, spec: MeanSpec) -> ResultPtr {
        self.book(Booking::Mean { spec })
    }

    /// Fill every pending booking of this frame.
    pub fn run(&self, mode: ExecutionMode) -> Result<()> {
        run_frames(std::slice::from_ref(self), mode)
    }
}

/// Handle to a booked result.
#[derive(Debug, Clone)]
pub struct ResultPtr {
    frame: DataFrame,
    index: usize,
}

impl ResultPtr {
    /// Owning frame.
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    /// Whether the value has been filled.
    pub fn is_ready(&self) -> bool {
        self.frame.lock().map(|st| st.values[self.index].is_some()).unwrap_or(false)
    }

    /// Materialize the value, running the owning frame if needed.
    pub fn value(&self) -> Result<FillValue> {
        if let Some(v) = &self.frame.lock()?.values[self.index] {
            return Ok(v.clone());
        }
        self.frame.run(ExecutionMode::default())?;
        self.frame.lock()?.values[self.index]
            .clone()
            .ok_or_else(|| Error::Engine(format!("booking {} was not filled", self.index)))
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

/// Pending work of one frame.
struct FramePlan {
    frame: DataFrame,
    indices: Vec<usize>,
    bookings: Vec<Booking>,
    branches: Vec<String>,
}

struct Task {
    plan: usize,
    source: usize,
    cluster: usize,
}

/// Fill every pending booking of `frames` in one pass over their sources.
pub fn run_frames(frames: &[DataFrame], mode: ExecutionMode) -> Result<()> {
    let mut plans: Vec<FramePlan> = Vec::new();
    for frame in frames {
        if plans.iter().any(|p| Arc::ptr_eq(&p.frame.inner, &frame.inner)) {
            continue;
        }
        let st = frame.lock()?;
        let indices = st.pending();
        if indices.is_empty() {
            continue;
        }
        let bookings: Vec<Booking> = indices.iter().map(|&i| st.bookings[i].clone()).collect();
        let mut branches: Vec<String> = Vec::new();
        for b in bookings.iter().flat_map(|b| b.required_branches()) {
            if !branches.contains(&b) {
                branches.push(b);
            }
        }
        drop(st);
        // constant expressions still need one column for the row count
        if branches.is_empty()
            && let Some(b) = frame.sources().first().and_then(|s| s.branches().into_iter().next())
        {
            branches.push(b);
        }
        plans.push(FramePlan { frame: frame.clone(), indices, bookings, branches });
    }
    if plans.is_empty() {
        return Ok(());
    }

    for plan in &plans {
        for src in plan.frame.sources() {
            if let Some(b) = plan.branches.iter().find(|b| !src.has_branch(b)) {
                return Err(Error::BranchMissing {
                    branch: b.clone(),
                    source_name: src.name().to_string(),
                });
            }
        }
    }

    let mut tasks: Vec<Task> = Vec::new();
    for (p, plan) in plans.iter().enumerate() {
        for (s, src) in plan.frame.sources().iter().enumerate() {
            for c in 0..src.n_clusters() {
                tasks.push(Task { plan: p, source: s, cluster: c });
            }
        }
    }
    log::debug!("running {} frame(s), {} cluster task(s), mode={mode:?}", plans.len(), tasks.len());

    let run_task = |t: &Task| -> Result<Vec<FillValue>> {
        let plan = &plans[t.plan];
        let src = &plan.frame.sources()[t.source];
        let columns = src.read_cluster(t.cluster, &plan.branches)?;
        fill_cluster(&plan.bookings, &columns)
    };

    let partials: Vec<Vec<FillValue>> = match mode {
        ExecutionMode::Sequential => tasks.iter().map(run_task).collect::<Result<_>>()?,
        ExecutionMode::Parallel(0) => tasks.par_iter().map(run_task).collect::<Result<_>>()?,
        ExecutionMode::Parallel(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| Error::Engine(format!("failed to create thread pool: {e}")))?;
            pool.install(|| tasks.par_iter().map(run_task).collect::<Result<_>>())?
        }
    };

    let mut totals: Vec<Vec<FillValue>> =
        plans.iter().map(|p| p.bookings.iter().map(Booking::empty_value).collect()).collect();
    for (task, partial) in tasks.iter().zip(&partials) {
        for (acc, v) in totals[task.plan].iter_mut().zip(partial) {
            acc.merge(v)?;
        }
    }

    for (plan, values) in plans.iter().zip(totals) {
        let mut st = plan.frame.lock()?;
        for (&i, v) in plan.indices.iter().zip(values) {
            st.values[i] = Some(v);
        }
    }
    Ok(())
}

/// Fill all bookings from one cluster. Partials start from the templates.
fn fill_cluster(
    bookings: &[Booking],
    columns: &HashMap<String, Vec<f64>>,
) -> Result<Vec<FillValue>> {
    let mut specs_1d = Vec::new();
    let mut specs_2d = Vec::new();
    let mut specs_mean = Vec::new();
    for b in bookings {
        match b {
            Booking::Hist1D { spec, .. } => specs_1d.push(spec.clone()),
            Booking::Hist2D { spec, .. } => specs_2d.push(spec.clone()),
            Booking::Mean { spec } => specs_mean.push(spec.clone()),
        }
    }
    let mut h1 = fill_histograms(&specs_1d, columns)?.into_iter();
    let mut h2 = fill_histograms_2d(&specs_2d, columns)?.into_iter();
    let mut means = fill_means(&specs_mean, columns)?.into_iter();

    bookings
        .iter()
        .map(|b| {
            let missing = || Error::Engine("fill produced fewer results than bookings".into());
            Ok(match b {
                Booking::Hist1D { template, .. } => {
                    let mut h = template.clone();
                    h.reset();
                    h.absorb(&h1.next().ok_or_else(missing)?)?;
                    FillValue::Hist1D(h)
                }
                Booking::Hist2D { .. } => FillValue::Hist2D(h2.next().ok_or_else(missing)?),
                Booking::Mean { .. } => FillValue::Mean(means.next().ok_or_else(missing)?),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn frame(n: usize, cluster: usize) -> DataFrame {
        let x: Vec<f64> = (0..n).map(|i| (i % 10) as f64 + 0.5).collect();
        let w: Vec<f64> = (0..n).map(|i| if i % 3 == 0 { 2.0 } else { 1.0 }).collect();
        let src = MemorySource::new("mem", vec![("x".into(), x), ("w".into(), w)])
            .unwrap()
            .with_cluster_size(cluster);
        DataFrame::new("test", vec![Arc::new(src)])
    }

    #[test]
    fn lazy_until_requested() {
        let df = frame(100, 7);
        let spec = HistogramSpec::uniform("h", "x", 10, 0.0, 10.0).unwrap();
        let ptr = df.book_hist(spec, None);
        assert!(!ptr.is_ready());
        assert_eq!(df.n_pending(), 1);
        let h = ptr.histogram().unwrap();
        assert!(ptr.is_ready());
        assert_eq!(h.integral(), 100.0);
        assert_eq!(h.entries, 100.0);
    }

    #[test]
    fn single_pass_fills_every_booking() {
        let df = frame(100, 16);
        let a = df.book_hist(HistogramSpec::uniform("a", "x", 10, 0.0, 10.0).unwrap(), None);
        let b = df.book_hist(
            HistogramSpec::uniform("b", "x", 5, 0.0, 10.0).unwrap().with_weight("w").unwrap(),
            None,
        );
        let m = df.book_mean(MeanSpec::new("mx", "x").unwrap());
        run_frames(&[df.clone(), df.clone()], ExecutionMode::Sequential).unwrap();
        assert!(a.is_ready() && b.is_ready() && m.is_ready());
        assert_eq!(df.n_pending(), 0);
        // 34 of 100 rows have weight 2
        assert_eq!(b.histogram().unwrap().integral(), 134.0);
        assert_eq!(m.mean().unwrap().mean(), 5.0);
    }

    #[test]
    fn parallel_matches_sequential() {
        let spec = HistogramSpec::uniform("h", "x", 10, 0.0, 10.0).unwrap().with_weight("w").unwrap();
        let seq = frame(1000, 33);
        let par = frame(1000, 33);
        let p1 = seq.book_hist(spec.clone(), None);
        let p2 = par.book_hist(spec, None);
        seq.run(ExecutionMode::Sequential).unwrap();
        par.run(ExecutionMode::Parallel(3)).unwrap();
        let (h1, h2) = (p1.histogram().unwrap(), p2.histogram().unwrap());
        assert_eq!(h1.bin_content, h2.bin_content);
        assert_eq!(h1.sumw2, h2.sumw2);
    }

    #[test]
    fn template_carries_titles() {
        let df = frame(10, 4);
        let spec = HistogramSpec::uniform("h", "x", 10, 0.0, 10.0).unwrap();
        let mut tpl = spec.empty_histogram();
        tpl.title = "Drell-Yan".into();
        let h = df.book_hist(spec, Some(tpl)).histogram().unwrap();
        assert_eq!(h.title, "Drell-Yan");
        assert_eq!(h.integral(), 10.0);
    }

    #[test]
    fn missing_branch_aborts_whole_run() {
        let df = frame(10, 4);
        let ok = df.book_hist(HistogramSpec::uniform("ok", "x", 10, 0.0, 10.0).unwrap(), None);
        let _bad = df.book_hist(HistogramSpec::uniform("bad", "pt_1", 10, 0.0, 10.0).unwrap(), None);
        let err = df.run(ExecutionMode::Sequential).unwrap_err();
        assert!(matches!(err, Error::BranchMissing { ref branch, .. } if branch == "pt_1"));
        assert!(!ok.is_ready());
    }

    #[test]
    fn empty_source_gives_empty_histogram() {
        let src = MemorySource::new("empty", vec![("x".into(), vec![])]).unwrap();
        let df = DataFrame::new("empty", vec![Arc::new(src)]);
        let h = df
            .book_hist(HistogramSpec::uniform("h", "x", 4, 0.0, 4.0).unwrap(), None)
            .histogram()
            .unwrap();
        assert_eq!(h.n_bins(), 4);
        assert_eq!(h.integral(), 0.0);
    }

    #[test]
    fn book_2d() {
        let df = frame(20, 8);
        let spec =
            Histogram2DSpec::new("xy", "x", "w", vec![0.0, 5.0, 10.0], vec![0.0, 1.5, 3.0]).unwrap();
        let h = df.book_hist2d(spec).histogram2d().unwrap();
        assert_eq!(h.integral(), 20.0);
    }
}
