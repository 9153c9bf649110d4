//! Stat + syst error band of an expected stack.

use serde::{Deserialize, Serialize};
use tau_core::{Graph, GraphPoint, HistStyle, Histogram};

use crate::{Error, Result};

/// Total expected yield under one systematic variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystTriplet {
    /// Systematic name, e.g. `tes`.
    pub name: String,
    /// Up variation.
    pub up: Histogram,
    /// Nominal.
    pub nominal: Histogram,
    /// Down variation.
    pub down: Histogram,
}

impl SystTriplet {
    /// Triplet from the three totals.
    pub fn new(name: impl Into<String>, up: Histogram, nominal: Histogram, down: Histogram) -> Self {
        Self { name: name.into(), up, nominal, down }
    }
}

fn check_binning(reference: &Histogram, h: &Histogram) -> Result<()> {
    if reference.same_binning(h) {
        Ok(())
    } else {
        Err(Error::Histogram(format!(
            "error band: binning of '{}' differs from '{}'",
            h.name, reference.name
        )))
    }
}

/// Error band around the sum of `exp`.
///
/// Per bin, statistical errors of the stacked histograms add in quadrature,
/// separately up and down. Each systematic adds `max(0, up - nominal)` to the
/// upper and `max(0, nominal - down)` to the lower error, in quadrature.
/// Returns `None` for an empty stack.
pub fn geterrorband(exp: &[Histogram], systs: &[SystTriplet]) -> Result<Option<Graph>> {
    let Some(first) = exp.first() else {
        return Ok(None);
    };
    let n = first.n_bins();
    let mut total = vec![0.0; n];
    let mut var_up = vec![0.0; n];
    let mut var_lo = vec![0.0; n];
    for h in exp {
        check_binning(first, h)?;
        for i in 0..n {
            total[i] += h.bin_content[i];
            var_up[i] += h.bin_error_up(i).powi(2);
            var_lo[i] += h.bin_error_low(i).powi(2);
        }
    }
    for s in systs {
        for h in [&s.up, &s.nominal, &s.down] {
            check_binning(first, h)?;
        }
        for i in 0..n {
            let nom = s.nominal.bin_content[i];
            var_up[i] += (s.up.bin_content[i] - nom).max(0.0).powi(2);
            var_lo[i] += (nom - s.down.bin_content[i]).max(0.0).powi(2);
        }
    }
    let points = (0..n)
        .map(|i| {
            let half = 0.5 * first.bin_width(i);
            GraphPoint {
                x: first.bin_center(i),
                y: total[i],
                ex_lo: half,
                ex_hi: half,
                ey_lo: var_lo[i].sqrt(),
                ey_hi: var_up[i].sqrt(),
            }
        })
        .collect();
    let title = if systs.is_empty() { "Stat. unc." } else { "Stat. + syst. unc." };
    Ok(Some(Graph {
        name: format!("{}_errband", first.name),
        title: title.into(),
        points,
        style: HistStyle { fill_color: Some("#999999".into()), ..HistStyle::default() },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn hist(name: &str, content: &[f64], sumw2: &[f64]) -> Histogram {
        let mut h = Histogram::uniform(name, content.len(), 0.0, content.len() as f64).unwrap();
        h.bin_content = content.to_vec();
        h.sumw2 = sumw2.to_vec();
        h
    }

    #[test]
    fn stat_only() {
        let a = hist("a", &[4.0, 1.0], &[4.0, 1.0]);
        let b = hist("b", &[2.0, 0.0], &[5.0, 0.0]);
        let band = geterrorband(&[a, b], &[]).unwrap().unwrap();
        assert_eq!(band.points[0].y, 6.0);
        assert_relative_eq!(band.points[0].ey_hi, 3.0);
        assert_relative_eq!(band.points[0].ey_lo, 3.0);
        assert_eq!(band.points[1].ex_lo, 0.5);
        assert_eq!(band.title, "Stat. unc.");
        assert!(geterrorband(&[], &[]).unwrap().is_none());
    }

    #[test]
    fn systematics_are_one_sided() {
        let a = hist("a", &[10.0], &[0.0]);
        let syst = SystTriplet::new(
            "tes",
            hist("up", &[13.0], &[0.0]),
            hist("nom", &[10.0], &[0.0]),
            hist("down", &[11.0], &[0.0]),
        );
        let band = geterrorband(&[a], &[syst]).unwrap().unwrap();
        assert_relative_eq!(band.points[0].ey_hi, 3.0);
        assert_eq!(band.points[0].ey_lo, 0.0);
    }

    #[test]
    fn binning_mismatch_fails() {
        let a = hist("a", &[1.0, 2.0], &[1.0, 2.0]);
        let b = hist("b", &[1.0], &[1.0]);
        assert!(matches!(geterrorband(&[a, b], &[]), Err(Error::Histogram(_))));
    }

    proptest! {
        #[test]
        fn band_covers_stat(
            contents in prop::collection::vec(0.0f64..100.0, 1..8),
            shifts in prop::collection::vec(-10.0f64..10.0, 8),
        ) {
            let n = contents.len();
            let h = hist("h", &contents, &contents);
            let up: Vec<f64> = (0..n).map(|i| contents[i] + shifts[i]).collect();
            let down: Vec<f64> = (0..n).map(|i| contents[i] - shifts[i]).collect();
            let syst = SystTriplet::new("s", hist("u", &up, &up), h.clone(), hist("d", &down, &down));
            let stat = geterrorband(std::slice::from_ref(&h), &[]).unwrap().unwrap();
            let full = geterrorband(std::slice::from_ref(&h), &[syst]).unwrap().unwrap();
            for i in 0..n {
                prop_assert!((stat.points[i].ey_hi - h.bin_error_up(i)).abs() < 1e-9);
                prop_assert!(full.points[i].ey_hi >= stat.points[i].ey_hi);
                prop_assert!(full.points[i].ey_lo >= stat.points[i].ey_lo);
            }
        }
    }
}
