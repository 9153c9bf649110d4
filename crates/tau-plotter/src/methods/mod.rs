//! Data-driven estimators.
//!
//! An [`Estimator`] books its auxiliary fills next to the regular ones, so the
//! event loop still runs once per request, and afterwards inserts its estimate
//! into the histogram sets.

mod qcd_abcd;

pub use qcd_abcd::{ChannelKind, QcdAbcd, Regions, channel_kind, regions};

use crate::era::AnalysisContext;
use crate::histset::{HistDict, HistSet};
use crate::result::ResultDict;
use crate::sample::{FillPlan, Sample};
use crate::{Error, Result};

/// Everything an estimator may look at while booking.
#[derive(Debug, Clone, Copy)]
pub struct EstimateRequest<'a> {
    /// Era, channel and luminosity.
    pub ctx: &'a AnalysisContext,
    /// Observed data, if any.
    pub data: Option<&'a Sample>,
    /// Expected samples.
    pub exp: &'a [&'a Sample],
    /// Signal-region selections with their eligible variables.
    pub plan: &'a FillPlan,
    /// Suffix of the regular histogram names.
    pub tag: &'a str,
    /// Relative systematic shift of the estimate's normalization.
    pub shift: f64,
}

/// A data-driven background estimate.
pub trait Estimator: std::fmt::Debug + Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Book the auxiliary fills. `None` means the estimate does not apply.
    fn book(&self, req: &EstimateRequest<'_>) -> Result<Option<Box<dyn PendingEstimate>>>;
}

/// Booked estimate waiting for the event loop.
pub trait PendingEstimate: std::fmt::Debug {
    /// Auxiliary results, to be run together with the regular fills.
    fn results(&self) -> &ResultDict;

    /// Build the estimate and insert it into `hists` at `index` of each
    /// expected list (last when `None`).
    fn finish(&self, hists: &mut HistDict<HistSet>, index: Option<usize>) -> Result<()>;
}

/// Estimator registered under `name`.
///
/// `QCD_OSSS` is an alias of `QCD_ABCD`.
pub fn get_estimator(name: &str) -> Result<Box<dyn Estimator>> {
    match name {
        "QCD_ABCD" | "QCD_OSSS" => Ok(Box::new(QcdAbcd::default())),
        other => Err(Error::Config(format!("unknown estimation method '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry() {
        assert_eq!(get_estimator("QCD_ABCD").unwrap().name(), "QCD_ABCD");
        assert_eq!(get_estimator("QCD_OSSS").unwrap().name(), "QCD_ABCD");
        assert!(matches!(get_estimator("JTF"), Err(Error::Config(_))));
    }
}
