use crate::error::PlacementError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Symbol fade duration in milliseconds; `0` disables fading.
    pub fade_duration: f64,
    /// When false, labels only collide with labels from the same source.
    pub cross_source_collisions: bool,
    pub show_collision_boxes: bool,
    /// Pixels beyond each viewport edge still covered by the collision grid.
    pub viewport_padding: f32,
    pub grid_cell_size: f32,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            fade_duration: 300.0,
            cross_source_collisions: true,
            show_collision_boxes: false,
            viewport_padding: 100.0,
            grid_cell_size: 25.0,
        }
    }
}

impl PlacementConfig {
    pub fn validate(&self) -> Result<(), PlacementError> {
        if !self.fade_duration.is_finite() || self.fade_duration < 0.0 {
            return Err(PlacementError::InvalidFadeDuration(self.fade_duration));
        }
        if self.grid_cell_size.is_nan() || self.grid_cell_size <= 0.0 {
            return Err(PlacementError::InvalidGridCellSize(self.grid_cell_size));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    pub width: f32,
    pub height: f32,
    pub background: String,
    pub placed_color: String,
    pub unplaced_color: String,
    pub icon_color: String,
    pub text_color: String,
    pub font_family: String,
    pub font_size: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 512.0,
            height: 512.0,
            background: "#FFFFFF".to_string(),
            placed_color: "#1F7A3A".to_string(),
            unplaced_color: "#C0392B".to_string(),
            icon_color: "#2C5AA0".to_string(),
            text_color: "#222222".to_string(),
            font_family: "Inter, Segoe UI, system-ui, sans-serif".to_string(),
            font_size: 11.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub placement: PlacementConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PlacementConfigFile {
    fade_duration: Option<f64>,
    cross_source_collisions: Option<bool>,
    show_collision_boxes: Option<bool>,
    viewport_padding: Option<f32>,
    grid_cell_size: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RenderConfigFile {
    width: Option<f32>,
    height: Option<f32>,
    background: Option<String>,
    placed_color: Option<String>,
    unplaced_color: Option<String>,
    icon_color: Option<String>,
    text_color: Option<String>,
    font_family: Option<String>,
    font_size: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    placement: Option<PlacementConfigFile>,
    render: Option<RenderConfigFile>,
}

/// Parse strict JSON, falling back to JSON5 (comments, trailing commas).
pub(crate) fn parse_lenient<T: serde::de::DeserializeOwned>(contents: &str) -> anyhow::Result<T> {
    match serde_json::from_str(contents) {
        Ok(value) => Ok(value),
        Err(json_err) => json5::from_str(contents).map_err(|json5_err| {
            anyhow::anyhow!("invalid JSON ({json_err}) and invalid JSON5 ({json5_err})")
        }),
    }
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    let Some(path) = path else {
        return Ok(config);
    };

    let contents = std::fs::read_to_string(path)?;
    let parsed: ConfigFile = parse_lenient(&contents)?;

    if let Some(placement) = parsed.placement {
        if let Some(v) = placement.fade_duration {
            config.placement.fade_duration = v;
        }
        if let Some(v) = placement.cross_source_collisions {
            config.placement.cross_source_collisions = v;
        }
        if let Some(v) = placement.show_collision_boxes {
            config.placement.show_collision_boxes = v;
        }
        if let Some(v) = placement.viewport_padding {
            config.placement.viewport_padding = v;
        }
        if let Some(v) = placement.grid_cell_size {
            config.placement.grid_cell_size = v;
        }
    }

    if let Some(render) = parsed.render {
        if let Some(v) = render.width {
            config.render.width = v;
        }
        if let Some(v) = render.height {
            config.render.height = v;
        }
        if let Some(v) = render.background {
            config.render.background = v;
        }
        if let Some(v) = render.placed_color {
            config.render.placed_color = v;
        }
        if let Some(v) = render.unplaced_color {
            config.render.unplaced_color = v;
        }
        if let Some(v) = render.icon_color {
            config.render.icon_color = v;
        }
        if let Some(v) = render.text_color {
            config.render.text_color = v;
        }
        if let Some(v) = render.font_family {
            config.render.font_family = v;
        }
        if let Some(v) = render.font_size {
            config.render.font_size = v;
        }
    }

    config.placement.validate()?;
    Ok(config)
}
