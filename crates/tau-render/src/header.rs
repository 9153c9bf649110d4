use crate::canvas::Canvas;
use crate::color::Color;
use crate::config::RenderConfig;
use crate::layout::margins::PlotArea;
use crate::primitives::*;

/// Draw the header above the plot: **CMS** *Preliminary* on the left, the
/// luminosity text (e.g. `59.7 fb^{-1} (13 TeV)`) on the right.
pub fn draw_header(canvas: &mut Canvas, area: &PlotArea, config: &RenderConfig, lumi_text: &str) {
    let header_size = config.font.label_size * 1.3;
    let y = area.top - 6.0;

    if !config.experiment.name.is_empty() {
        let bold_style = TextStyle {
            size: header_size,
            color: Color::rgb(0, 0, 0),
            weight: FontWeight::Bold,
            ..Default::default()
        };
        canvas.text(area.left, y, &config.experiment.name, &bold_style);
        let name_w = canvas.measure_text(&config.experiment.name, &bold_style).width;

        if !config.experiment.status.is_empty() {
            let italic_style =
                TextStyle { size: header_size * 0.85, style: FontStyle::Italic, ..Default::default() };
            canvas.text(area.left + name_w + 5.0, y, &config.experiment.status, &italic_style);
        }
    }

    if !lumi_text.is_empty() {
        let info_style = TextStyle { size: config.font.size, anchor: TextAnchor::End, ..Default::default() };
        canvas.text(area.right(), y, lumi_text, &info_style);
    }
}

/// Selection title in the top-left corner inside the plot area.
pub fn draw_title(canvas: &mut Canvas, area: &PlotArea, config: &RenderConfig, title: &str) {
    if title.is_empty() {
        return;
    }
    let style = TextStyle { size: config.font.size, baseline: TextBaseline::Hanging, ..Default::default() };
    canvas.text(area.left + 8.0, area.top + 8.0, title, &style);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::BuiltinTheme;

    #[test]
    fn cms_header() {
        let mut c = Canvas::new(400.0, 300.0).unwrap();
        let area = PlotArea::manual(50.0, 30.0, 300.0, 200.0);
        draw_header(&mut c, &area, &RenderConfig::default(), "59.7 fb^{-1} (13 TeV)");
        let svg = c.finish_svg();
        assert!(svg.contains(r#"font-weight="bold">CMS</text>"#));
        assert!(svg.contains(r#"font-style="italic">Preliminary</text>"#));
        assert!(svg.contains(r#"59.7 fb<tspan baseline-shift="super" font-size="70%">-1</tspan> (13 TeV)"#));
    }

    #[test]
    fn minimal_has_no_experiment() {
        let mut c = Canvas::new(400.0, 300.0).unwrap();
        let area = PlotArea::manual(50.0, 30.0, 300.0, 200.0);
        draw_header(&mut c, &area, &BuiltinTheme::Minimal.base_config(), "");
        assert!(!c.finish_svg().contains("<text"));
    }
}
