//! SVG rendering of TauFW plot artifacts.
//!
//! Input is the JSON written by `tau_plotter` (a stack with its ratio panel,
//! or an up/nominal/down comparison); output is a self-contained SVG document.

pub mod canvas;
pub mod color;
pub mod config;
pub mod header;
pub mod layout;
pub mod plots;
pub mod primitives;
pub mod text;
pub mod theme;

use config::RenderConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown artifact kind: {0}")]
    UnknownKind(String),
    #[error("deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("schema mismatch: expected '{expected}', found '{found}'")]
    Schema { expected: &'static str, found: String },
    #[error("config error: {0}")]
    Config(String),
    #[error("layout error: {0}")]
    Layout(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RenderError>;

/// Artifact kinds understood by [`render_svg`].
pub const KINDS: &[&str] = &["stack", "compare"];

/// Render an artifact JSON to an SVG string.
pub fn render_svg(artifact_json: &str, kind: &str, config: &RenderConfig) -> Result<String> {
    let svg = match kind {
        "stack" => {
            let art: tau_plotter::StackArtifact = serde_json::from_str(artifact_json)?;
            check_schema(tau_plotter::stack::STACK_SCHEMA, &art.schema_version)?;
            plots::stack::render(&art, config)?
        }
        "compare" | "comparison" => {
            let art: tau_plotter::stack::ComparisonArtifact = serde_json::from_str(artifact_json)?;
            check_schema(tau_plotter::stack::COMPARISON_SCHEMA, &art.schema_version)?;
            plots::compare::render(&art, config)?
        }
        other => return Err(RenderError::UnknownKind(other.to_string())),
    };
    Ok(svg)
}

fn check_schema(expected: &'static str, found: &str) -> Result<()> {
    if found == expected {
        Ok(())
    } else {
        Err(RenderError::Schema { expected, found: found.to_string() })
    }
}

/// Render an artifact JSON to a file. Only `.svg` output is produced.
pub fn render_to_file(
    artifact_json: &str,
    kind: &str,
    path: &std::path::Path,
    config: &RenderConfig,
) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()).unwrap_or("svg") {
        "svg" => {}
        other => return Err(RenderError::UnknownKind(format!("format: {other}"))),
    }
    let svg = render_svg(artifact_json, kind, config)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, svg)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind() {
        let err = render_svg("{}", "pulls", &RenderConfig::default()).unwrap_err();
        assert!(matches!(err, RenderError::UnknownKind(k) if k == "pulls"));
    }

    #[test]
    fn bad_json() {
        let err = render_svg("{", "stack", &RenderConfig::default()).unwrap_err();
        assert!(matches!(err, RenderError::Deserialize(_)));
    }

    #[test]
    fn png_not_supported() {
        let dir = tempfile::tempdir().unwrap();
        let err =
            render_to_file("{}", "stack", &dir.path().join("x.png"), &RenderConfig::default()).unwrap_err();
        assert!(matches!(err, RenderError::UnknownKind(_)));
    }
}
