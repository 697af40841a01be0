use image::GrayImage;

use crate::{
    algorithms::raster::Raster,
    error::Result,
    marker::{DetectionResult, MarkerCategory},
    types::Drawing,
};

/// Receives human-readable narration lines. Advisory only: structured results
/// are always returned as values, never recovered from narration.
pub trait ProgressSink: Send + Sync {
    fn narrate(&self, stage: &str, message: &str);
}

/// Trait for stages that rewrite the drawing in place (stages 1-4)
pub trait TransformStage: Send + Sync {
    /// Stable stage name used in run reports
    fn name(&self) -> &'static str;

    /// Rewrite the drawing. On error the drawing may be partially modified
    /// and the run halts.
    fn apply(&self, drawing: &mut Drawing, progress: &dyn ProgressSink) -> Result<()>;
}

/// Trait for read-only marker detectors (stages 5-8)
pub trait DetectorStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// The single category this detector counts
    fn category(&self) -> MarkerCategory;

    /// Count markers in a render of the colorized drawing
    fn detect(&self, raster: &Raster, progress: &dyn ProgressSink) -> Result<DetectionResult>;

    /// Intermediate mask written as a stage artifact, if the detector has one
    fn render_mask(&self, _raster: &Raster) -> Option<GrayImage> {
        None
    }
}
