use crate::layout::axes::Axis;
use crate::layout::margins::PlotArea;

/// Pixel mapping of one panel.
pub struct Frame<'a> {
    pub area: &'a PlotArea,
    pub x: &'a Axis,
    pub y: &'a Axis,
}

impl Frame<'_> {
    pub fn px(&self, x: f64) -> f64 {
        self.x.clamped(x, self.area.left, self.area.right())
    }

    pub fn py(&self, y: f64) -> f64 {
        self.y.clamped(y, self.area.bottom(), self.area.top)
    }

    /// Outline of a histogram as a step line.
    pub fn step_points(&self, edges: &[f64], y: &[f64]) -> Vec<(f64, f64)> {
        let mut pts = Vec::with_capacity(2 * y.len());
        for (i, v) in y.iter().take(n_bins(edges, y)).enumerate() {
            let (lo, hi) = (edges[i], edges[i + 1]);
            pts.push((self.px(lo), self.py(*v)));
            pts.push((self.px(hi), self.py(*v)));
        }
        pts
    }
}

/// Bins that have both edges.
pub fn n_bins(edges: &[f64], y: &[f64]) -> usize {
    y.len().min(edges.len().saturating_sub(1))
}
