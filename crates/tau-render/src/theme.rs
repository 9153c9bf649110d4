use crate::color::Color;
use crate::config::*;

/// Built-in theme presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTheme {
    Cms,
    Minimal,
}

impl BuiltinTheme {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "minimal" => Self::Minimal,
            _ => Self::Cms,
        }
    }

    pub fn base_config(self) -> RenderConfig {
        match self {
            Self::Cms => cms(),
            Self::Minimal => minimal(),
        }
    }
}

fn cms() -> RenderConfig {
    RenderConfig {
        theme: "cms".into(),
        figure: FigureConfig::default(),
        font: FontConfig::default(),
        axes: AxesConfig::default(),
        experiment: ExperimentConfig::default(),
        colors: ColorsConfig::default(),
        palette: "cms_petroff10".into(),
        sample_colors: Default::default(),
        ratio: RatioConfig::default(),
    }
}

fn minimal() -> RenderConfig {
    RenderConfig {
        theme: "minimal".into(),
        figure: FigureConfig { width: 432.0, height: 360.0 },
        font: FontConfig { size: 9.0, label_size: 10.0, tick_size: 8.0 },
        axes: AxesConfig {
            tick_direction: "out".into(),
            show_top_ticks: false,
            show_right_ticks: false,
            tick_length: 4.0,
            minor_tick_length: 2.0,
        },
        experiment: ExperimentConfig { name: String::new(), status: String::new() },
        colors: ColorsConfig { band: Color::hex("#888888"), ..ColorsConfig::default() },
        palette: "tableau10".into(),
        ..cms()
    }
}
