//! Ratio panel: numerators over a histogram, stack or graph denominator.
//!
//! Zero policy: where the denominator is zero the ratio is 1 for an empty
//! numerator and `±RATIO_INF` otherwise, with zero errors.

use serde::{Deserialize, Serialize};
use tau_core::{ErrorMode, Graph, GraphPoint, Histogram};

use crate::era::AnalysisContext;
use crate::{Error, Result};

/// Value standing in for an infinite ratio.
pub const RATIO_INF: f64 = 1e12;

/// How a graph numerator finds its denominator value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphRatioMode {
    /// Content of the denominator bin containing the point.
    #[default]
    Snap,
    /// Linear interpolation between denominator bin centres.
    Interpolate,
}

fn ratio_value(n: f64, d: f64) -> Option<f64> {
    if d != 0.0 {
        None
    } else if n == 0.0 {
        Some(1.0)
    } else {
        Some(RATIO_INF.copysign(n))
    }
}

fn denominator_at(den: &Histogram, num: &Histogram, i: usize, aligned: bool) -> f64 {
    if aligned {
        den.bin_content[i]
    } else {
        den.find_bin(num.bin_center(i)).map_or(0.0, |j| den.bin_content[j])
    }
}

/// Bin-by-bin ratio `num / den` with errors `σ_num / den`.
///
/// Histograms with different binning are matched by the numerator's bin
/// centres, with a warning.
pub fn gethistratio(num: &Histogram, den: &Histogram) -> Histogram {
    let aligned = num.same_binning(den);
    if !aligned {
        log::warn!("ratio '{}' / '{}': binning differs, matching bin centres", num.name, den.name);
    }
    ratio_hist(num, den, aligned)
}

fn ratio_hist(num: &Histogram, den: &Histogram, aligned: bool) -> Histogram {
    let mut r = num.clone().renamed(format!("ratio_{}", num.name));
    r.error_mode = ErrorMode::SumW2;
    r.underflow = 0.0;
    r.overflow = 0.0;
    for i in 0..num.n_bins() {
        let (n, d) = (num.bin_content[i], denominator_at(den, num, i, aligned));
        match ratio_value(n, d) {
            Some(v) => r.set_bin(i, v, 0.0),
            None => r.set_bin(i, n / d, num.bin_error(i) / d.abs()),
        }
    }
    r
}

fn ratio_point(p: &GraphPoint, d: f64) -> GraphPoint {
    match ratio_value(p.y, d) {
        Some(v) => GraphPoint { y: v, ey_lo: 0.0, ey_hi: 0.0, ..*p },
        None => GraphPoint { y: p.y / d, ey_lo: p.ey_lo / d.abs(), ey_hi: p.ey_hi / d.abs(), ..*p },
    }
}

/// Ratio of a graph over a histogram.
pub fn getgraphratio(num: &Graph, den: &Histogram, mode: GraphRatioMode) -> Graph {
    let centres = match mode {
        GraphRatioMode::Interpolate => Some(Graph {
            points: (0..den.n_bins())
                .map(|i| GraphPoint {
                    x: den.bin_center(i),
                    y: den.bin_content[i],
                    ex_lo: 0.0,
                    ex_hi: 0.0,
                    ey_lo: 0.0,
                    ey_hi: 0.0,
                })
                .collect(),
            ..Graph::default()
        }),
        GraphRatioMode::Snap => None,
    };
    let points = num
        .points
        .iter()
        .map(|p| {
            let d = match &centres {
                Some(g) => g.eval(p.x),
                None => den.find_bin(p.x).map_or(0.0, |j| den.bin_content[j]),
            };
            ratio_point(p, d)
        })
        .collect();
    Graph { name: format!("ratio_{}", num.name), title: num.title.clone(), points, style: num.style.clone() }
}

/// A ratio numerator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Numerator {
    /// Histogram.
    Hist(Histogram),
    /// Graph, e.g. observed data with asymmetric errors.
    Graph(Graph),
}

/// A ratio denominator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Denominator {
    /// Histogram.
    Hist(Histogram),
    /// Stack of histograms, summed.
    Stack(Vec<Histogram>),
    /// Graph, evaluated by linear interpolation.
    Graph(Graph),
}

impl Denominator {
    fn as_histogram(&self, like: Option<&Histogram>) -> Result<Histogram> {
        match self {
            Denominator::Hist(h) => Ok(h.clone()),
            Denominator::Stack(hs) => {
                let mut it = hs.iter();
                let first = it
                    .next()
                    .ok_or_else(|| Error::Histogram("ratio denominator stack is empty".into()))?;
                let mut total = first.clone().renamed("stack_total");
                for h in it {
                    total.add(h, 1.0)?;
                }
                Ok(total)
            }
            Denominator::Graph(g) => {
                let like = like.ok_or_else(|| {
                    Error::Histogram("graph denominator needs a histogram numerator".into())
                })?;
                let mut h = like.clone().renamed(format!("{}_hist", g.name));
                h.reset();
                h.error_mode = ErrorMode::SumW2;
                for i in 0..h.n_bins() {
                    h.set_bin(i, g.eval(h.bin_center(i)), 0.0);
                }
                Ok(h)
            }
        }
    }
}

/// Ratio panel contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ratio {
    /// Ratio histograms, one per histogram numerator.
    pub hists: Vec<Histogram>,
    /// Ratio graphs, one per graph numerator.
    pub graphs: Vec<Graph>,
    /// Denominator error band divided by the denominator (unit band).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub band: Option<Graph>,
    /// Y range of the panel.
    pub y_range: (f64, f64),
}

impl Ratio {
    /// Ratios of every numerator over `den`.
    ///
    /// A binning mismatch is warned about once per numerator name through `ctx`.
    pub fn new(
        numerators: &[Numerator],
        den: &Denominator,
        mode: GraphRatioMode,
        ctx: Option<&AnalysisContext>,
    ) -> Result<Self> {
        let like = numerators.iter().find_map(|n| match n {
            Numerator::Hist(h) => Some(h),
            Numerator::Graph(_) => None,
        });
        let den_hist = den.as_histogram(like)?;
        let mut out = Ratio { y_range: (0.5, 1.5), ..Ratio::default() };
        for num in numerators {
            match num {
                Numerator::Hist(h) => {
                    let aligned = h.same_binning(&den_hist);
                    if !aligned {
                        let msg = format!(
                            "ratio '{}' / '{}': binning differs, matching bin centres",
                            h.name, den_hist.name
                        );
                        match ctx {
                            Some(c) => c.warn_once(&format!("ratio-binning:{}", h.name), &msg),
                            None => log::warn!("{msg}"),
                        }
                    }
                    out.hists.push(ratio_hist(h, &den_hist, aligned));
                }
                Numerator::Graph(g) => out.graphs.push(getgraphratio(g, &den_hist, mode)),
            }
        }
        Ok(out)
    }

    /// Attach the denominator's error band, normalized to the denominator.
    pub fn with_band(mut self, band: &Graph) -> Self {
        let points = band
            .points
            .iter()
            .map(|p| {
                if p.y > 0.0 {
                    GraphPoint { y: 1.0, ey_lo: p.ey_lo / p.y, ey_hi: p.ey_hi / p.y, ..*p }
                } else {
                    GraphPoint { y: 1.0, ey_lo: 0.0, ey_hi: 0.0, ..*p }
                }
            })
            .collect();
        self.band = Some(Graph { name: format!("ratio_{}", band.name), points, ..band.clone() });
        self
    }

    /// Set the panel's y range.
    pub fn with_range(mut self, lo: f64, hi: f64) -> Self {
        self.y_range = (lo, hi);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;
    use tau_core::garwood_interval;

    fn hist(content: &[f64]) -> Histogram {
        let mut h = Histogram::uniform("h", content.len(), 0.0, content.len() as f64).unwrap();
        h.bin_content = content.to_vec();
        h.sumw2 = content.to_vec();
        h
    }

    #[test]
    fn zero_policy() {
        let r = gethistratio(&hist(&[0.0, 3.0, -2.0, 4.0]), &hist(&[0.0, 0.0, 0.0, 2.0]));
        assert_eq!(r.bin_content, vec![1.0, RATIO_INF, -RATIO_INF, 2.0]);
        assert_eq!(r.bin_error(0), 0.0);
        assert_relative_eq!(r.bin_error(3), 1.0);
    }

    #[test]
    fn graph_over_stack() {
        let mut data = hist(&[50.0, 5.0, 0.0]);
        data.error_mode = ErrorMode::Poisson;
        let g = Graph::from_poisson(&data, false);
        let stack = Denominator::Stack(vec![hist(&[30.0, 6.0, 1.0]), hist(&[20.0, 4.0, 0.0])]);
        let ratio =
            Ratio::new(&[Numerator::Graph(g.clone())], &stack, GraphRatioMode::Snap, None).unwrap();
        let p = &ratio.graphs[0].points;
        assert_relative_eq!(p[0].y, 1.0);
        assert_relative_eq!(p[1].y, 0.5);
        assert_relative_eq!(p[1].ey_hi, g.points[1].ey_hi / 10.0);
        assert_eq!(p[2].y, 0.0);
        assert_eq!(p[2].ey_lo, 0.0);
        assert_relative_eq!(p[2].ey_hi, garwood_interval(0).1);
    }

    #[test]
    fn interpolated_denominator() {
        let g = Graph {
            points: vec![GraphPoint { x: 1.0, y: 3.0, ex_lo: 0.0, ex_hi: 0.0, ey_lo: 0.0, ey_hi: 0.0 }],
            ..Graph::default()
        };
        let den = hist(&[2.0, 4.0]);
        let r = getgraphratio(&g, &den, GraphRatioMode::Interpolate);
        assert_relative_eq!(r.points[0].y, 1.0);
        let r = getgraphratio(&g, &den, GraphRatioMode::Snap);
        assert_relative_eq!(r.points[0].y, 0.75);
    }

    #[test]
    fn mismatched_binning_matches_centres() {
        let num = hist(&[2.0, 2.0]);
        let den = Histogram::uniform("d", 1, 0.0, 2.0).map(|mut d| {
            d.bin_content = vec![4.0];
            d
        });
        let r = gethistratio(&num, &den.unwrap());
        assert_eq!(r.bin_content, vec![0.5, 0.5]);
    }

    proptest! {
        #[test]
        fn self_ratio_is_unity(contents in prop::collection::vec(0.0f64..1e4, 1..12)) {
            let h = hist(&contents);
            let r = gethistratio(&h, &h);
            for v in &r.bin_content {
                prop_assert!((v - 1.0).abs() < 1e-12);
            }
        }
    }
}
