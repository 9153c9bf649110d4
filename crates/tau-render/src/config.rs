use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::color::Color;
use crate::theme::BuiltinTheme;

/// Rendering configuration (YAML or programmatic).
///
/// A user YAML names a `theme` and overrides single fields; everything it
/// leaves out comes from that theme.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub theme: String,
    pub figure: FigureConfig,
    pub font: FontConfig,
    pub axes: AxesConfig,
    pub experiment: ExperimentConfig,
    pub colors: ColorsConfig,
    pub palette: String,
    /// Colors by process name, used when an artifact carries none.
    pub sample_colors: HashMap<String, Color>,
    pub ratio: RatioConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        BuiltinTheme::Cms.base_config()
    }
}

impl RenderConfig {
    pub fn palette_colors(&self) -> Vec<Color> {
        crate::color::palette_colors(&self.palette)
    }

    /// Fill color of the `index`-th process named `name`.
    pub fn sample_color(&self, name: &str, explicit: Option<&str>, index: usize) -> Color {
        if let Some(c) = explicit.and_then(Color::parse) {
            return c;
        }
        if let Some(c) = self.sample_colors.get(name) {
            return *c;
        }
        let palette = self.palette_colors();
        palette.get(index % palette.len().max(1)).copied().unwrap_or(Color::hex("#888888"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FigureConfig {
    pub width: f64,
    pub height: f64,
}

impl Default for FigureConfig {
    fn default() -> Self {
        Self { width: 576.0, height: 504.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    pub size: f64,
    pub label_size: f64,
    pub tick_size: f64,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self { size: 11.0, label_size: 13.0, tick_size: 10.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AxesConfig {
    pub tick_direction: String,
    pub show_top_ticks: bool,
    pub show_right_ticks: bool,
    pub tick_length: f64,
    pub minor_tick_length: f64,
}

impl Default for AxesConfig {
    fn default() -> Self {
        Self {
            tick_direction: "in".into(),
            show_top_ticks: true,
            show_right_ticks: true,
            tick_length: 8.0,
            minor_tick_length: 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub name: String,
    pub status: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self { name: "CMS".into(), status: "Preliminary".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    pub observed: Color,
    pub band: Color,
    pub ratio_band: Color,
    pub signal: Color,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self {
            observed: Color::hex("#000000"),
            band: Color::hex("#555555"),
            ratio_band: Color::hex("#c8c8c8"),
            signal: Color::hex("#dc2626"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatioConfig {
    /// Share of the plot height given to the ratio panel.
    pub fraction: f64,
    /// Extra height of a figure with a ratio panel.
    pub height_scale: f64,
}

impl Default for RatioConfig {
    fn default() -> Self {
        Self { fraction: 0.28, height_scale: 1.25 }
    }
}

#[derive(Deserialize)]
struct ThemeProbe {
    #[serde(default)]
    theme: Option<String>,
}

/// Resolve a RenderConfig from an optional YAML string.
/// Fields present in the YAML override the named theme.
pub fn resolve_config(user_yaml: Option<&str>) -> crate::Result<RenderConfig> {
    let Some(yaml) = user_yaml else {
        return Ok(RenderConfig::default());
    };
    let err = |e: serde_yaml_ng::Error| crate::RenderError::Config(e.to_string());
    let probe: ThemeProbe = serde_yaml_ng::from_str(yaml).map_err(err)?;
    let base = BuiltinTheme::parse(probe.theme.as_deref().unwrap_or("cms")).base_config();
    let mut merged = serde_yaml_ng::to_value(&base).map_err(err)?;
    let user: serde_yaml_ng::Value = serde_yaml_ng::from_str(yaml).map_err(err)?;
    merge(&mut merged, user);
    serde_yaml_ng::from_value(merged).map_err(err)
}

fn merge(base: &mut serde_yaml_ng::Value, over: serde_yaml_ng::Value) {
    use serde_yaml_ng::Value;
    match (base, over) {
        (Value::Mapping(b), Value::Mapping(o)) => {
            for (k, v) in o {
                match b.get_mut(&k) {
                    Some(slot) => merge(slot, v),
                    None => {
                        b.insert(k, v);
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (slot, v) => *slot = v,
    }
}
