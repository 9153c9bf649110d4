use crate::layout::margins::PlotArea;

/// Main + ratio panel layout sharing one x axis.
#[derive(Debug, Clone)]
pub struct MainRatioLayout {
    pub main: PlotArea,
    pub ratio: PlotArea,
}

impl MainRatioLayout {
    pub fn new(area: &PlotArea, gap: f64, ratio_frac: f64) -> Self {
        let ratio_h = area.height * ratio_frac.clamp(0.05, 0.6);
        let main_h = area.height - ratio_h - gap;

        Self {
            main: PlotArea::manual(area.left, area.top, area.width, main_h),
            ratio: PlotArea::manual(area.left, area.top + main_h + gap, area.width, ratio_h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_heights() {
        let l = MainRatioLayout::new(&PlotArea::manual(50.0, 20.0, 400.0, 404.0), 4.0, 0.25);
        assert!((l.ratio.height - 101.0).abs() < 1e-9);
        assert!((l.main.height - 299.0).abs() < 1e-9);
        assert!((l.ratio.bottom() - 424.0).abs() < 1e-9);
        assert_eq!(l.main.width, l.ratio.width);
    }
}
