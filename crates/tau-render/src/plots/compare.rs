use tau_plotter::stack::{ComparisonArtifact, SampleSeries};

use crate::canvas::Canvas;
use crate::color::Color;
use crate::config::RenderConfig;
use crate::header::{draw_header, draw_title};
use crate::layout::axes::Axis;
use crate::layout::legend::{self, LegendEntry, LegendKind, LegendPlacement};
use crate::layout::margins::Margins;
use crate::layout::multi_panel::MainRatioLayout;
use crate::plots::axes_draw::{draw_axes, tick_label_width};
use crate::plots::steps::Frame;
use crate::primitives::*;

const YMARGIN: f64 = 1.25;

pub fn render(art: &ComparisonArtifact, config: &RenderConfig) -> crate::Result<String> {
    let edges = &art.bin_edges;
    if edges.len() < 2 || art.series.is_empty() {
        return Err(crate::RenderError::Layout(format!("comparison '{}' is empty", art.title)));
    }
    let fig_w = config.figure.width;
    let fig_h = config.figure.height * config.ratio.height_scale;
    let mut canvas = Canvas::new(fig_w, fig_h)?;

    let (xlo, xhi) = (edges[0], edges[edges.len() - 1]);
    let x_axis = Axis::linear(xlo, xhi, 6).with_label(&art.x_title);
    let ymax = art.series.iter().flat_map(|s| s.y.iter().copied()).fold(0.0_f64, f64::max);
    let y_axis = Axis::linear(0.0, if ymax > 0.0 { ymax * YMARGIN } else { 1.0 }, 6).with_label("Events");
    let (rlo, rhi) = art.ratio_range;
    let ratio_axis = Axis::linear(rlo, rhi, 4).with_label("Var. / nom.");

    let margins = Margins::for_plot(config, tick_label_width(&canvas, &[&y_axis, &ratio_axis], config));
    let layout = MainRatioLayout::new(&margins.inner(fig_w, fig_h)?, 4.0, config.ratio.fraction);
    let (main, ratio) = (layout.main, layout.ratio);

    draw_header(&mut canvas, &main, config, &art.meta.lumi_text);

    let frame = Frame { area: &main, x: &x_axis, y: &y_axis };
    canvas.push_clip(main.left, main.top, main.width, main.height);
    let mut entries = Vec::new();
    for series in &art.series {
        let style = line_style(series);
        canvas.polyline(&frame.step_points(edges, &series.y), &style);
        entries.push(LegendEntry { label: series.title.clone(), color: style.color, kind: LegendKind::Line(style.dash) });
    }
    canvas.pop_clip();
    draw_axes(&mut canvas, &main, &x_axis, &y_axis, config, false);
    draw_title(&mut canvas, &main, config, &art.title);
    legend::draw_legend(&mut canvas, &main, &entries, config.font.size, LegendPlacement::parse("right"), 1);

    let rframe = Frame { area: &ratio, x: &x_axis, y: &ratio_axis };
    canvas.push_clip(ratio.left, ratio.top, ratio.width, ratio.height);
    let one = rframe.py(1.0);
    canvas.line(ratio.left, one, ratio.right(), one, &LineStyle::solid(Color::rgb(0, 0, 0), 0.8));
    for series in &art.ratios {
        canvas.polyline(&rframe.step_points(edges, &series.y), &line_style(series));
    }
    canvas.pop_clip();
    draw_axes(&mut canvas, &ratio, &x_axis, &ratio_axis, config, true);

    Ok(canvas.finish_svg())
}

fn line_style(series: &SampleSeries) -> LineStyle {
    let color = series.color.as_deref().and_then(Color::parse).unwrap_or_default();
    if series.dashed { LineStyle::dashed(color, 1.2) } else { LineStyle::solid(color, 1.2) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tau_plotter::{AnalysisContext, Histogram, SystTriplet};

    fn hist(name: &str, content: &[f64]) -> Histogram {
        let mut h = Histogram::uniform(name, content.len(), 0.0, 50.0).unwrap();
        h.bin_content = content.to_vec();
        h.sumw2 = content.to_vec();
        h.title = name.to_string();
        h
    }

    fn artifact() -> ComparisonArtifact {
        let ctx = AnalysisContext::new("UL2018", "etau").unwrap();
        let t = SystTriplet::new(
            "tes",
            hist("up", &[11.0, 22.0]),
            hist("ZTT", &[10.0, 20.0]),
            hist("down", &[9.0, 18.0]),
        );
        ComparisonArtifact::new(&t, "m_{vis} [GeV]", &ctx)
    }

    #[test]
    fn up_nominal_down() {
        let json = serde_json::to_string(&artifact()).unwrap();
        let svg = crate::render_svg(&json, "compare", &RenderConfig::default()).unwrap();
        assert_eq!(svg.matches("<polyline").count(), 5);
        assert!(svg.contains(r##"stroke="#cc2222""##));
        assert!(svg.contains(r##"stroke="#2255cc""##));
        assert!(svg.contains(">ZTT, tes</text>"));
        assert!(svg.contains(">down</text>"));
    }

    #[test]
    fn empty_series_is_a_layout_error() {
        let mut art = artifact();
        art.series.clear();
        assert!(matches!(render(&art, &RenderConfig::default()), Err(crate::RenderError::Layout(_))));
    }
}
