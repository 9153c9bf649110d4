//! # tau-core
//!
//! Columnar histogramming core for TauFW.
//!
//! Reads flat event tables (Parquet files or in-memory columns), compiles
//! selection/weight/variable expressions once, and fills 1-D and 2-D
//! histograms through a deferred dataframe engine that executes every booked
//! fill in a single pass.
//!
//! ## Example
//!
//! ```no_run
//! use tau_core::{DataFrame, ExecutionMode, HistogramSpec, ParquetSource};
//! use std::sync::Arc;
//!
//! let src = ParquetSource::open("pico_DY_mutau.parquet").unwrap();
//! let frame = DataFrame::new("DY", vec![Arc::new(src)]);
//! let spec = HistogramSpec::uniform("m_vis", "m_vis", 40, 0.0, 200.0)
//!     .unwrap()
//!     .with_selection("q_1*q_2<0 && iso_1<0.15")
//!     .unwrap();
//! let ptr = frame.book_hist(spec, None);
//! tau_core::run_frames(&[frame], ExecutionMode::Parallel(4)).unwrap();
//! let h = ptr.histogram().unwrap();
//! println!("yield: {}", h.integral());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod expr;
pub mod filler;
pub mod frame;
pub mod histogram;
pub mod source;

pub use error::{Error, Result};
pub use expr::CompiledExpr;
pub use filler::{
    FilledHistogram, FlowPolicy, Histogram2DSpec, HistogramSpec, MeanSpec, NegativeWeightPolicy,
    WeightedMean, fill_histograms, fill_histograms_2d, fill_means,
};
pub use frame::{Booking, DataFrame, ExecutionMode, FillValue, ResultPtr, run_frames};
pub use histogram::{
    ErrorMode, Graph, GraphPoint, HistStyle, Histogram, Histogram2D, find_bin, garwood_interval,
    is_near_integer_nonneg, is_uniform_edges, poisson_errors, uniform_edges,
};
pub use source::{
    Bookkeeping, DEFAULT_CLUSTER_SIZE, EventSource, META_KEY_NEVENTS, META_KEY_SUMW, MemorySource,
    ParquetSource, write_parquet,
};
