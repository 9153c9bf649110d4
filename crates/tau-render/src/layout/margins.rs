/// Rectangular plot area within the canvas.
#[derive(Debug, Clone, Copy)]
pub struct PlotArea {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl PlotArea {
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    pub fn manual(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }
}

/// Page margins around the plotted panels.
#[derive(Debug, Clone, Copy)]
pub struct Margins {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

impl Margins {
    /// Room for tick labels, the rotated y title and the header.
    pub fn for_plot(config: &crate::config::RenderConfig, y_tick_width: f64) -> Self {
        let top = if config.experiment.name.is_empty() {
            config.font.label_size + 10.0
        } else {
            config.font.label_size * 1.3 + 14.0
        };
        Self {
            left: y_tick_width + config.font.label_size + 22.0,
            right: 15.0,
            top,
            bottom: config.font.tick_size + config.font.label_size + 22.0,
        }
    }

    /// The area left inside a `width` x `height` figure.
    pub fn inner(&self, width: f64, height: f64) -> crate::Result<PlotArea> {
        let w = width - self.left - self.right;
        let h = height - self.top - self.bottom;
        if w < 20.0 || h < 20.0 {
            return Err(crate::RenderError::Layout(format!(
                "figure {width} x {height} leaves no room for the plot"
            )));
        }
        Ok(PlotArea::manual(self.left, self.top, w, h))
    }
}
