use crate::canvas::Canvas;
use crate::color::Color;
use crate::layout::margins::PlotArea;
use crate::primitives::*;

pub struct LegendEntry {
    pub label: String,
    pub color: Color,
    pub kind: LegendKind,
}

pub enum LegendKind {
    FilledRect,
    Line(Option<String>),
    Marker,
    HatchedRect,
}

/// Where the legend box sits inside the plot area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegendPlacement {
    /// Horizontal anchor as a fraction of the area width; `None` aligns right.
    pub x: Option<f64>,
    /// Top edge as a fraction of the area height, measured from the top.
    pub y: f64,
}

impl LegendPlacement {
    /// Parse hints like `right`, `left`, `x=0.3`, `Ly=0.8` or `x=0.5;y=0.7`.
    pub fn parse(position: &str) -> Self {
        let mut out = Self { x: None, y: 0.0 };
        let lower = position.to_ascii_lowercase();
        if lower.starts_with('l') {
            out.x = Some(0.0);
        } else if lower.starts_with('c') {
            out.x = Some(0.35);
        }
        for part in lower.split([';', ',', ' ']) {
            if let Some(v) = value_after(part, "x=") {
                out.x = Some(v.clamp(0.0, 1.0));
            }
            if let Some(v) = value_after(part, "y=") {
                out.y = (1.0 - v).clamp(0.0, 1.0);
            }
        }
        out
    }
}

fn value_after(part: &str, key: &str) -> Option<f64> {
    part.find(key).and_then(|i| part[i + key.len()..].parse().ok())
}

/// Draw a legend in the plot area with `ncols` columns.
pub fn draw_legend(
    canvas: &mut Canvas,
    area: &PlotArea,
    entries: &[LegendEntry],
    font_size: f64,
    placement: LegendPlacement,
    ncols: usize,
) {
    if entries.is_empty() {
        return;
    }
    let ncols = ncols.clamp(1, entries.len());
    let nrows = entries.len().div_ceil(ncols);

    let row_height = font_size + 4.0;
    let swatch_w = 14.0;
    let swatch_h = font_size - 2.0;
    let gap = 6.0;
    let padding = 6.0;

    let text_style = TextStyle { size: font_size * 0.85, baseline: TextBaseline::Central, ..Default::default() };

    let max_w = entries.iter().map(|e| canvas.measure_text(&e.label, &text_style).width).fold(0.0_f64, f64::max);
    let col_w = swatch_w + gap + max_w + padding;

    let legend_w = padding + ncols as f64 * col_w;
    let legend_h = padding + nrows as f64 * row_height + padding;

    let lx = match placement.x {
        Some(fx) => (area.left + 5.0 + fx * area.width).min(area.right() - legend_w - 5.0),
        None => area.right() - legend_w - 5.0,
    };
    let ly = (area.top + 5.0 + placement.y * area.height).min(area.bottom() - legend_h);

    let bg_style = Style { fill: Some(Color::rgba(255, 255, 255, 0.9)), stroke: None, stroke_width: 0.5, opacity: 1.0 };
    canvas.rect(lx, ly, legend_w, legend_h, &bg_style);

    for (i, entry) in entries.iter().enumerate() {
        let (row, col) = (i / ncols, i % ncols);
        let ey = ly + padding + row as f64 * row_height + row_height / 2.0;
        let sx = lx + padding + col as f64 * col_w;

        match &entry.kind {
            LegendKind::FilledRect => {
                let style = Style::outlined(entry.color, entry.color.darken(0.4), 0.5);
                canvas.rect(sx, ey - swatch_h / 2.0, swatch_w, swatch_h, &style);
            }
            LegendKind::Line(dash) => {
                let ls = LineStyle { color: entry.color, width: 1.5, dash: dash.clone() };
                canvas.line(sx, ey, sx + swatch_w, ey, &ls);
            }
            LegendKind::Marker => {
                let ls = LineStyle::solid(entry.color, 1.0);
                canvas.error_bar(sx + swatch_w / 2.0, ey - swatch_h / 2.0, ey + swatch_h / 2.0, 0.0, &ls);
                canvas.marker(sx + swatch_w / 2.0, ey, &MarkerStyle { color: entry.color, size: 2.5, fill: true });
            }
            LegendKind::HatchedRect => {
                let pid = canvas.hatch_pattern("legend_hatch", entry.color, 4.0);
                canvas.pattern_rect(sx, ey - swatch_h / 2.0, swatch_w, swatch_h, &pid);
            }
        }

        canvas.text(sx + swatch_w + gap, ey, &entry.label, &text_style);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placements() {
        assert_eq!(LegendPlacement::parse("right"), LegendPlacement { x: None, y: 0.0 });
        assert_eq!(LegendPlacement::parse("left").x, Some(0.0));
        let p = LegendPlacement::parse("x=0.4;y=0.75");
        assert_eq!(p.x, Some(0.4));
        assert!((p.y - 0.25).abs() < 1e-12);
        assert_eq!(LegendPlacement::parse("Ly=0.9").x, Some(0.0));
        assert_eq!(LegendPlacement::parse("x=oops").x, None);
    }

    #[test]
    fn columns() {
        let mut c = Canvas::new(300.0, 200.0).unwrap();
        let entries: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|l| LegendEntry { label: l.to_string(), color: Color::rgb(1, 2, 3), kind: LegendKind::FilledRect })
            .collect();
        let area = PlotArea::manual(10.0, 10.0, 280.0, 180.0);
        draw_legend(&mut c, &area, &entries, 11.0, LegendPlacement::parse("right"), 2);
        let svg = c.finish_svg();
        assert_eq!(svg.matches("fill=\"#010203\"").count(), 3);
        assert!(svg.contains(">c</text>"));
    }
}
