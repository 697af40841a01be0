use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, IntoEnumIterator};

use crate::types::{BoundingBox, Color};

/// The four takeoff categories, each bound to one canonical marker color
#[derive(
    Debug, Clone, Copy,
    PartialEq, Eq, Hash, PartialOrd, Ord,
    Serialize, Deserialize,
    Display, EnumString, EnumIter, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MarkerCategory {
    BlueX,
    RedSquare,
    PinkShape,
    GreenRectangle,
}

impl MarkerCategory {
    pub fn all() -> impl Iterator<Item = MarkerCategory> {
        Self::iter()
    }

    /// Canonical marker color painted by the colorizer and masked by the detector
    pub const fn color(self) -> Color {
        match self {
            Self::BlueX => Color::rgb(0, 0, 255),
            Self::RedSquare => Color::rgb(255, 0, 0),
            Self::PinkShape => Color::rgb(255, 105, 180),
            Self::GreenRectangle => Color::rgb(0, 255, 0),
        }
    }

    /// Field name used in the result record
    pub const fn record_field(self) -> &'static str {
        match self {
            Self::BlueX => "blue_x",
            Self::RedSquare => "red_squares",
            Self::PinkShape => "pink_shapes",
            Self::GreenRectangle => "green_rectangles",
        }
    }

    pub const fn detector_name(self) -> &'static str {
        match self {
            Self::BlueX => "detect_blue_x",
            Self::RedSquare => "detect_red_squares",
            Self::PinkShape => "detect_pink_shapes",
            Self::GreenRectangle => "detect_green_rectangles",
        }
    }

    pub fn from_color(color: Color) -> Option<Self> {
        Self::iter().find(|category| category.color() == color)
    }
}

/// One counted symbol, in drawing units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedComponent {
    pub centroid: [f32; 2],
    pub bbox: BoundingBox,
    /// Number of mask pixels merged into this symbol
    pub area_px: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub category: MarkerCategory,
    pub count: u32,
    pub components: Vec<DetectedComponent>,
}

impl DetectionResult {
    pub fn new(category: MarkerCategory, components: Vec<DetectedComponent>) -> Self {
        Self {
            category,
            count: components.len() as u32,
            components,
        }
    }
}
