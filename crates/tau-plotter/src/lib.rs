//! # tau-plotter
//!
//! Analysis layer of TauFW on top of [`tau_core`].
//!
//! - [`Variable`] and [`Selection`] describe what to histogram and where.
//! - [`Sample`] books deferred fills for one process (possibly merged from
//!   children); [`SampleSet`] orchestrates observed data, expected and signal
//!   samples and runs the event loop once per request.
//! - [`methods`] holds data-driven estimators such as the ABCD QCD estimate.
//! - [`stitch()`](crate::stitch::stitch) and [`join`](crate::stitch::join)
//!   combine inclusive and jet-binned samples.
//! - [`errorband`], [`ratio`] and [`stack`] turn a [`HistSet`] into
//!   plot-ready numbers; [`datacard`] writes and reads shape files.
//!
//! Era, channel and luminosity are carried explicitly in an
//! [`AnalysisContext`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod datacard;
pub mod era;
pub mod errorband;
pub mod histset;
pub mod methods;
pub mod ratio;
pub mod result;
pub mod sample;
pub mod sampleset;
pub mod selection;
pub mod stack;
pub mod stitch;
pub mod strings;
pub mod variable;

pub use tau_core::{Error, ExecutionMode, Graph, HistStyle, Histogram, Histogram2D, Result};

pub use config::AnalysisConfig;
pub use context::Context;
pub use datacard::{ShapeFile, ShapeInputs, createinputs, plotinputs};
pub use era::{AnalysisContext, EraInfo, era_info};
pub use errorband::{SystTriplet, geterrorband};
pub use histset::{HistDict, HistSet, HistSet2D};
pub use methods::{Estimator, QcdAbcd, get_estimator};
pub use ratio::{GraphRatioMode, RATIO_INF, Ratio, gethistratio};
pub use result::{Deferred, MergedResult, ResultDict};
pub use sample::{Sample, SampleKind};
pub use sampleset::{GetHistsOptions, SampleSet};
pub use selection::{Selection, plot_allowed};
pub use stack::{StackArtifact, Stack};
pub use stitch::{join, stitch};
pub use variable::{Binning, Variable};
