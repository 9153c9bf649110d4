use tau_plotter::RATIO_INF;
use tau_plotter::stack::{PointSeries, RatioSeries, StackArtifact};

use crate::canvas::Canvas;
use crate::color::Color;
use crate::config::RenderConfig;
use crate::header::{draw_header, draw_title};
use crate::layout::axes::Axis;
use crate::layout::legend::{self, LegendEntry, LegendKind, LegendPlacement};
use crate::layout::margins::{Margins, PlotArea};
use crate::layout::multi_panel::MainRatioLayout;
use crate::plots::axes_draw::{draw_axes, tick_label_width};
use crate::plots::steps::{Frame, n_bins};
use crate::primitives::*;

pub fn render(art: &StackArtifact, config: &RenderConfig) -> crate::Result<String> {
    let edges = &art.bin_edges;
    if edges.len() < 2 {
        return Err(crate::RenderError::Layout(format!("stack '{}' has no bins", art.x_title)));
    }
    let with_ratio = art.ratio.is_some();
    let fig_w = config.figure.width;
    let fig_h = config.figure.height * if with_ratio { config.ratio.height_scale } else { 1.0 };
    let mut canvas = Canvas::new(fig_w, fig_h)?;

    let x_axis = x_axis(art);
    let (ylo, yhi) = art.y_range;
    let y_axis = if art.logy { Axis::log(ylo, yhi) } else { Axis::linear(ylo, yhi, 6) }.with_label(&art.y_title);
    let ratio_axis = art.ratio.as_ref().map(|r| Axis::linear(r.y_range.0, r.y_range.1, 4).with_label(&r.label));

    let mut tick_axes = vec![&y_axis];
    tick_axes.extend(ratio_axis.as_ref());
    let margins = Margins::for_plot(config, tick_label_width(&canvas, &tick_axes, config));
    let inner = margins.inner(fig_w, fig_h)?;
    let (main, ratio_area) = if with_ratio {
        let layout = MainRatioLayout::new(&inner, 4.0, config.ratio.fraction);
        (layout.main, Some(layout.ratio))
    } else {
        (inner, None)
    };

    draw_header(&mut canvas, &main, config, &art.meta.lumi_text);

    let frame = Frame { area: &main, x: &x_axis, y: &y_axis };
    canvas.push_clip(main.left, main.top, main.width, main.height);
    let mut entries = Vec::new();
    if let Some(data) = &art.data {
        entries.push(LegendEntry { label: data.title.clone(), color: config.colors.observed, kind: LegendKind::Marker });
    }
    draw_samples(&mut canvas, &frame, art, config, &mut entries);
    if let Some(band) = &art.band {
        let pid = canvas.hatch_pattern("band_hatch", config.colors.band, 4.0);
        for i in 0..n_bins(edges, &band.lo).min(band.hi.len()) {
            let (x0, x1) = (frame.px(edges[i]), frame.px(edges[i + 1]));
            let (y0, y1) = (frame.py(band.hi[i]), frame.py(band.lo[i]));
            canvas.pattern_rect(x0, y0, x1 - x0, y1 - y0, &pid);
        }
        entries.push(LegendEntry { label: "Uncertainty".into(), color: config.colors.band, kind: LegendKind::HatchedRect });
    }
    for sig in &art.signals {
        let color = sig.color.as_deref().and_then(Color::parse).unwrap_or(config.colors.signal);
        let style = if sig.dashed { LineStyle::dashed(color, 1.5) } else { LineStyle::solid(color, 1.5) };
        canvas.polyline(&frame.step_points(edges, &sig.y), &style);
        entries.push(LegendEntry { label: sig.title.clone(), color, kind: LegendKind::Line(style.dash.clone()) });
    }
    if let Some(data) = &art.data {
        draw_points(&mut canvas, &frame, data, config.colors.observed, art.logy);
    }
    canvas.pop_clip();

    draw_axes(&mut canvas, &main, &x_axis, &y_axis, config, !with_ratio);
    draw_title(&mut canvas, &main, config, &art.title);
    let placement = LegendPlacement::parse(&art.legend.position);
    legend::draw_legend(&mut canvas, &main, &entries, config.font.size, placement, art.legend.ncols);

    if let (Some(ratio), Some(area), Some(axis)) = (&art.ratio, ratio_area, &ratio_axis) {
        draw_ratio(&mut canvas, &area, &x_axis, axis, edges, ratio, config);
    }

    Ok(canvas.finish_svg())
}

fn x_axis(art: &StackArtifact) -> Axis {
    let edges = &art.bin_edges;
    let (lo, hi) = (edges[0], edges[edges.len() - 1]);
    let axis = if !art.bin_labels.is_empty() {
        Axis::bin_labels(edges, &art.bin_labels)
    } else if art.logx && lo > 0.0 {
        Axis::log(lo, hi)
    } else {
        Axis::linear(lo, hi, 6)
    };
    axis.with_label(&art.x_title)
}

/// Cumulative stack; the first sample ends up on top.
fn draw_samples(
    canvas: &mut Canvas,
    frame: &Frame<'_>,
    art: &StackArtifact,
    config: &RenderConfig,
    entries: &mut Vec<LegendEntry>,
) {
    let edges = &art.bin_edges;
    let colors: Vec<Color> =
        art.samples.iter().enumerate().map(|(i, s)| config.sample_color(&s.name, s.color.as_deref(), i)).collect();
    let mut base = vec![0.0_f64; edges.len() - 1];
    for (sample, color) in art.samples.iter().zip(&colors).rev() {
        let mut tops = base.clone();
        for i in 0..n_bins(edges, &sample.y) {
            tops[i] += sample.y[i];
            let (x0, x1) = (frame.px(edges[i]), frame.px(edges[i + 1]));
            let (y0, y1) = (frame.py(tops[i]), frame.py(base[i]));
            canvas.rect(x0, y0, x1 - x0, y1 - y0, &Style::filled(*color));
        }
        canvas.polyline(&frame.step_points(edges, &tops), &LineStyle::solid(Color::rgb(0, 0, 0), 0.5));
        base = tops;
    }
    for (sample, color) in art.samples.iter().zip(colors) {
        entries.push(LegendEntry { label: sample.title.clone(), color, kind: LegendKind::FilledRect });
    }
}

/// Markers with vertical error bars; points off the axis range are skipped.
fn draw_points(canvas: &mut Canvas, frame: &Frame<'_>, pts: &PointSeries, color: Color, logy: bool) {
    let marker = MarkerStyle { color, size: 2.5, fill: true };
    let err = LineStyle::solid(color, 1.0);
    for (i, (&x, &y)) in pts.x.iter().zip(&pts.y).enumerate() {
        if y.abs() >= 0.5 * RATIO_INF || (logy && y <= 0.0) {
            continue;
        }
        let lo = y - pts.yerr_lo.get(i).copied().unwrap_or(0.0);
        let hi = y + pts.yerr_hi.get(i).copied().unwrap_or(0.0);
        let px = frame.px(x);
        canvas.error_bar(px, frame.py(lo), frame.py(hi), 0.0, &err);
        canvas.marker(px, frame.py(y), &marker);
    }
}

fn draw_ratio(
    canvas: &mut Canvas,
    area: &PlotArea,
    x_axis: &Axis,
    y_axis: &Axis,
    edges: &[f64],
    ratio: &RatioSeries,
    config: &RenderConfig,
) {
    let frame = Frame { area, x: x_axis, y: y_axis };
    canvas.push_clip(area.left, area.top, area.width, area.height);
    if let Some(band) = &ratio.band {
        for i in 0..n_bins(edges, &band.lo).min(band.hi.len()) {
            let (x0, x1) = (frame.px(edges[i]), frame.px(edges[i + 1]));
            let (y0, y1) = (frame.py(band.hi[i]), frame.py(band.lo[i]));
            canvas.rect(x0, y0, x1 - x0, y1 - y0, &Style::filled(config.colors.ratio_band));
        }
    }
    let one = frame.py(1.0);
    canvas.line(area.left, one, area.right(), one, &LineStyle::dashed(Color::rgb(0, 0, 0), 0.8));
    draw_points(canvas, &frame, &ratio.points, config.colors.observed, false);
    canvas.pop_clip();
    draw_axes(canvas, area, x_axis, y_axis, config, true);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tau_plotter::{AnalysisContext, HistSet, Histogram, Selection, Stack, Variable};

    fn hist(name: &str, content: &[f64]) -> Histogram {
        let mut h = Histogram::uniform(name, content.len(), 0.0, 10.0 * content.len() as f64).unwrap();
        h.bin_content = content.to_vec();
        h.sumw2 = content.to_vec();
        h.title = name.to_string();
        h
    }

    fn artifact(ratio: bool) -> StackArtifact {
        let ctx = AnalysisContext::new("UL2018", "mutau").unwrap();
        let var = Variable::uniform("m_vis", 3, 0.0, 30.0).unwrap().with_title("m_{vis} [GeV]");
        let sel = Selection::new("sr", "q_1*q_2<0").with_title("#mu#tau_{h}");
        let mut set = HistSet::new("sr", "m_vis");
        let mut data = hist("data_obs", &[60.0, 12.0, 0.0]);
        data.title = "Observed".into();
        set.data = Some(data);
        set.exp = vec![hist("ZTT", &[40.0, 6.0, 0.5]), hist("TT", &[10.0, 4.0, 0.5])];
        set.sig = vec![hist("ggH", &[1.0, 5.0, 1.0])];
        set.errband = tau_plotter::geterrorband(&set.exp, &[]).unwrap();
        Stack::new(set, &var, &sel, &ctx).with_ratio(ratio).artifact().unwrap()
    }

    #[test]
    fn stack_with_ratio() {
        let art = artifact(true);
        let svg = crate::render_svg(&serde_json::to_string(&art).unwrap(), "stack", &RenderConfig::default()).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(">ZTT</text>"));
        assert!(svg.contains(">Observed</text>"));
        assert!(svg.contains(">Uncertainty</text>"));
        assert!(svg.contains(">Obs. / Exp.</text>"));
        assert!(svg.contains("μτ<tspan"));
        assert!(svg.contains("url(#band_hatch)"));
        assert_eq!(svg.matches("<clipPath").count(), 2);
        let expected_h = RenderConfig::default().figure.height * RenderConfig::default().ratio.height_scale;
        assert!(svg.contains(&format!("height=\"{expected_h}\"")));
    }

    #[test]
    fn stack_without_ratio() {
        let art = artifact(false);
        let svg = render(&art, &RenderConfig::default()).unwrap();
        assert_eq!(svg.matches("<clipPath").count(), 1);
        assert!(!svg.contains("Obs. / Exp."));
        assert!(svg.contains(" [GeV]</text>"));
    }

    #[test]
    fn log_scale_and_colors() {
        let mut art = artifact(false);
        art.logy = true;
        art.y_range = (0.1, 1000.0);
        art.samples[0].color = Some("#ffcc66".into());
        let svg = render(&art, &RenderConfig::default()).unwrap();
        assert!(svg.contains("fill=\"#ffcc66\""));
        assert!(svg.contains("10\u{00B2}"));
    }

    #[test]
    fn schema_and_bins_checked() {
        let mut art = artifact(false);
        art.schema_version = "other".into();
        let json = serde_json::to_string(&art).unwrap();
        assert!(matches!(
            crate::render_svg(&json, "stack", &RenderConfig::default()),
            Err(crate::RenderError::Schema { .. })
        ));
        art.bin_edges.clear();
        assert!(matches!(render(&art, &RenderConfig::default()), Err(crate::RenderError::Layout(_))));
    }
}
