use std::{fs, path::Path};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    error::{Result, TakeoffError},
    types::Color,
};

/// How the four detectors are scheduled once the drawing has been colorized
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DetectorExecution {
    #[default]
    Sequential,
    Concurrent,
}

/// Tunables for every stage. Thresholds are deployment policy; changing them
/// never changes which category a marker color stands for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum per-coordinate distance for two paths to count as duplicates
    #[schemars(range(min = 0.0))]
    pub dedup_tolerance: f32,

    /// Luminance split point: strokes at or above become the light tone
    #[schemars(range(min = 0.0, max = 1.0))]
    pub color_classification_threshold: f32,

    /// Minimum pixel area for a connected component to count as a marker
    pub marker_min_area: u32,

    /// Maximum RGB distance for a pixel to match a marker color
    pub color_tolerance: f32,

    /// Components whose centroids lie within this distance (drawing units) merge
    pub merge_epsilon: f32,

    /// Raster pixels per drawing unit
    #[schemars(range(min = 0.01, max = 16.0))]
    pub render_scale: f32,

    /// Upper bound on raster size
    pub max_raster_pixels: u64,

    /// Allowed deviation from a right angle, in degrees
    pub angle_tolerance_deg: f32,

    /// Largest adjacent-side ratio still classified as a square
    pub square_side_ratio: f32,

    /// Largest bounding-box aspect ratio accepted for an X-mark
    pub x_aspect_tolerance: f32,

    /// Extra aspect ratio allowed to detectors for rasterization error
    pub detector_aspect_slack: f32,

    /// Smallest bounding-box side (drawing units) of any symbol
    pub symbol_min_size: f32,

    /// Largest bounding-box side (drawing units) of any symbol
    pub symbol_max_size: f32,

    /// Minimum polygon area (drawing units squared) of an irregular shape
    pub irregular_min_area: f32,

    /// Irregular shapes must carry a fill
    pub irregular_requires_fill: bool,

    #[schemars(with = "String")]
    pub light_tone: Color,

    #[schemars(with = "String")]
    pub dark_tone: Color,

    #[schemars(with = "String")]
    pub background_color: Color,

    pub detector_execution: DetectorExecution,

    /// Write the colorized drawing and detector masks next to the input artifact
    pub write_stage_artifacts: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dedup_tolerance: 0.5,
            color_classification_threshold: 0.5,
            marker_min_area: 8,
            color_tolerance: 60.0,
            merge_epsilon: 3.0,
            render_scale: 1.0,
            max_raster_pixels: 64_000_000,
            angle_tolerance_deg: 12.0,
            square_side_ratio: 1.15,
            x_aspect_tolerance: 1.4,
            detector_aspect_slack: 0.15,
            symbol_min_size: 3.0,
            symbol_max_size: 80.0,
            irregular_min_area: 20.0,
            irregular_requires_fill: true,
            light_tone: Color::LIGHT_GRAY,
            dark_tone: Color::BLACK,
            background_color: Color::WHITE,
            detector_execution: DetectorExecution::Sequential,
            write_stage_artifacts: false,
        }
    }
}

impl PipelineConfig {
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PipelineConfig)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [
            ("dedup_tolerance", self.dedup_tolerance),
            ("color_classification_threshold", self.color_classification_threshold),
            ("color_tolerance", self.color_tolerance),
            ("merge_epsilon", self.merge_epsilon),
            ("render_scale", self.render_scale),
            ("angle_tolerance_deg", self.angle_tolerance_deg),
            ("square_side_ratio", self.square_side_ratio),
            ("x_aspect_tolerance", self.x_aspect_tolerance),
            ("detector_aspect_slack", self.detector_aspect_slack),
            ("symbol_min_size", self.symbol_min_size),
            ("symbol_max_size", self.symbol_max_size),
            ("irregular_min_area", self.irregular_min_area),
        ];
        for (name, value) in finite {
            if !value.is_finite() || value < 0.0 {
                return Err(TakeoffError::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        if self.color_classification_threshold > 1.0 {
            return Err(TakeoffError::InvalidConfig(
                "color_classification_threshold must lie in [0, 1]".into(),
            ));
        }
        if self.render_scale <= 0.0 {
            return Err(TakeoffError::InvalidConfig("render_scale must be positive".into()));
        }
        if self.angle_tolerance_deg >= 45.0 {
            return Err(TakeoffError::InvalidConfig(
                "angle_tolerance_deg must be below 45".into(),
            ));
        }
        if self.square_side_ratio < 1.0 || self.x_aspect_tolerance < 1.0 {
            return Err(TakeoffError::InvalidConfig(
                "square_side_ratio and x_aspect_tolerance are ratios and must be >= 1".into(),
            ));
        }
        if self.symbol_min_size > self.symbol_max_size {
            return Err(TakeoffError::InvalidConfig(
                "symbol_min_size exceeds symbol_max_size".into(),
            ));
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Auto-detect file format and load configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(TakeoffError::InvalidConfig(format!(
                "unsupported config format for {}, use .toml or .json",
                path_ref.display()
            ))),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
