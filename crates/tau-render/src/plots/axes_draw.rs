use crate::canvas::Canvas;
use crate::color::Color;
use crate::config::RenderConfig;
use crate::layout::axes::Axis;
use crate::layout::margins::PlotArea;
use crate::primitives::*;

/// Draw a box frame with ticks and labels. The x tick labels and title are
/// left out of panels stacked above another one.
pub fn draw_axes(
    canvas: &mut Canvas,
    area: &PlotArea,
    x_axis: &Axis,
    y_axis: &Axis,
    config: &RenderConfig,
    x_labels: bool,
) {
    let frame_color = Color::rgb(0, 0, 0);
    let tick_line = LineStyle::solid(frame_color, 0.6);
    let minor_line = LineStyle::solid(frame_color, 0.4);

    let inward = config.axes.tick_direction == "in";
    let sign = if inward { 1.0 } else { -1.0 };
    let tl = config.axes.tick_length * sign;
    let mtl = config.axes.minor_tick_length * sign;

    draw_frame(canvas, area);

    let x_tick_label = TextStyle {
        size: config.font.tick_size,
        anchor: TextAnchor::Middle,
        baseline: TextBaseline::Hanging,
        ..Default::default()
    };
    let inside_x = |px: f64| px >= area.left - 0.5 && px <= area.right() + 0.5;
    let inside_y = |py: f64| py >= area.top - 0.5 && py <= area.bottom() + 0.5;

    for (i, &val) in x_axis.tick_positions.iter().enumerate() {
        let px = x_axis.data_to_pixel(val, area.left, area.right());
        if !inside_x(px) {
            continue;
        }
        canvas.line(px, area.bottom(), px, area.bottom() - tl, &tick_line);
        if config.axes.show_top_ticks {
            canvas.line(px, area.top, px, area.top + tl, &tick_line);
        }
        if x_labels && let Some(label) = x_axis.tick_labels.get(i) {
            let label_y = area.bottom() + 3.0 + if inward { 0.0 } else { -tl };
            canvas.text(px, label_y, label, &x_tick_label);
        }
    }
    for &val in &x_axis.minor_ticks {
        let px = x_axis.data_to_pixel(val, area.left, area.right());
        if inside_x(px) {
            canvas.line(px, area.bottom(), px, area.bottom() - mtl, &minor_line);
            if config.axes.show_top_ticks {
                canvas.line(px, area.top, px, area.top + mtl, &minor_line);
            }
        }
    }

    let y_tick_label = TextStyle {
        size: config.font.tick_size,
        anchor: TextAnchor::End,
        baseline: TextBaseline::Central,
        ..Default::default()
    };
    for (i, &val) in y_axis.tick_positions.iter().enumerate() {
        let py = y_axis.data_to_pixel(val, area.bottom(), area.top);
        if !inside_y(py) {
            continue;
        }
        canvas.line(area.left, py, area.left + tl, py, &tick_line);
        if config.axes.show_right_ticks {
            canvas.line(area.right(), py, area.right() - tl, py, &tick_line);
        }
        if let Some(label) = y_axis.tick_labels.get(i) {
            let label_x = area.left - 4.0 + if inward { 0.0 } else { tl };
            canvas.text(label_x, py, label, &y_tick_label);
        }
    }
    for &val in &y_axis.minor_ticks {
        let py = y_axis.data_to_pixel(val, area.bottom(), area.top);
        if inside_y(py) {
            canvas.line(area.left, py, area.left + mtl, py, &minor_line);
            if config.axes.show_right_ticks {
                canvas.line(area.right(), py, area.right() - mtl, py, &minor_line);
            }
        }
    }

    let label_style = TextStyle { size: config.font.label_size, ..Default::default() };
    if x_labels && !x_axis.label.is_empty() {
        let label_y = area.bottom() + config.font.tick_size + config.font.label_size + 8.0;
        let style = TextStyle { anchor: TextAnchor::End, ..label_style.clone() };
        canvas.text(area.right(), label_y, &x_axis.label, &style);
    }
    if !y_axis.label.is_empty() {
        let tick_w = y_axis
            .tick_labels
            .iter()
            .map(|l| canvas.measure_text(l, &y_tick_label).width)
            .fold(0.0_f64, f64::max);
        let label_x = area.left - tick_w - 10.0;
        let style = TextStyle { anchor: TextAnchor::End, ..label_style };
        canvas.text_rotated(label_x, area.top, &y_axis.label, &style, -90.0);
    }
}

pub fn draw_frame(canvas: &mut Canvas, area: &PlotArea) {
    canvas.rect(area.left, area.top, area.width, area.height, &Style::stroked(Color::rgb(0, 0, 0), 0.8));
}

/// Widest tick label of the given axes.
pub fn tick_label_width(canvas: &Canvas, axes: &[&Axis], config: &RenderConfig) -> f64 {
    let style = TextStyle { size: config.font.tick_size, ..Default::default() };
    axes.iter()
        .flat_map(|a| a.tick_labels.iter())
        .map(|l| canvas.measure_text(l, &style).width)
        .fold(0.0_f64, f64::max)
}
