use std::sync::Arc;

use crate::{
    algorithms::{
        BackgroundCompositor, ClassificationRules, ColorMaskDetector, PathDeduplicator,
        PatternColorizer, Renderer, StyleNormalizer,
    },
    config::PipelineConfig,
    marker::MarkerCategory,
    pipeline::Pipeline,
    progress::TracingProgress,
    traits::{DetectorStage, ProgressSink, TransformStage},
};

/// Builder for creating processing pipelines with a fluent API
pub struct PipelineBuilder {
    transforms: Vec<Box<dyn TransformStage>>,
    detectors: Vec<Arc<dyn DetectorStage>>,
    renderer: Option<Renderer>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl PipelineBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self {
            transforms: Vec::new(),
            detectors: Vec::new(),
            renderer: None,
            progress: None,
        }
    }

    /// The standard eight-stage takeoff pipeline, tuned by `config`
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut builder = Self::new()
            .add_transform(PathDeduplicator {
                tolerance: config.dedup_tolerance,
            })
            .add_transform(StyleNormalizer {
                threshold: config.color_classification_threshold,
                light: config.light_tone,
                dark: config.dark_tone,
            })
            .add_transform(BackgroundCompositor {
                color: config.background_color,
            })
            .add_transform(PatternColorizer::new(ClassificationRules::from(config)))
            .with_renderer(Renderer {
                scale: config.render_scale,
                max_pixels: config.max_raster_pixels,
            });

        for category in MarkerCategory::all() {
            builder = builder.add_detector(ColorMaskDetector::from_config(category, config));
        }
        builder
    }

    /// Append a transform stage
    pub fn add_transform<T>(mut self, stage: T) -> Self
    where
        T: TransformStage + 'static,
    {
        self.transforms.push(Box::new(stage));
        self
    }

    /// Insert a transform stage at `index`, clamped to the end of the list
    pub fn insert_transform<T>(mut self, index: usize, stage: T) -> Self
    where
        T: TransformStage + 'static,
    {
        let index = index.min(self.transforms.len());
        self.transforms.insert(index, Box::new(stage));
        self
    }

    /// Append a detector stage
    pub fn add_detector<D>(mut self, detector: D) -> Self
    where
        D: DetectorStage + 'static,
    {
        self.detectors.push(Arc::new(detector));
        self
    }

    /// Swap the detector registered for the same category, keeping its position
    pub fn replace_detector<D>(mut self, detector: D) -> Self
    where
        D: DetectorStage + 'static,
    {
        let category = detector.category();
        let detector: Arc<dyn DetectorStage> = Arc::new(detector);
        match self.detectors.iter().position(|d| d.category() == category) {
            Some(index) => self.detectors[index] = detector,
            None => self.detectors.push(detector),
        }
        self
    }

    /// Keep only the detectors for `categories`, in the given order
    pub fn with_detector_order(mut self, categories: &[MarkerCategory]) -> Self {
        let mut ordered = Vec::with_capacity(categories.len());
        for category in categories {
            if let Some(index) = self.detectors.iter().position(|d| d.category() == *category) {
                ordered.push(self.detectors.remove(index));
            }
        }
        self.detectors = ordered;
        self
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_progress<P>(self, progress: P) -> Self
    where
        P: ProgressSink + 'static,
    {
        self.with_shared_progress(Arc::new(progress))
    }

    pub fn with_shared_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Build the pipeline, narrating through `tracing` unless a sink was set
    pub fn build(self) -> Pipeline {
        let progress = self.progress.unwrap_or_else(|| Arc::new(TracingProgress));
        Pipeline::new(
            self.transforms,
            self.detectors,
            self.renderer.unwrap_or_default(),
            progress,
        )
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_order() {
        let pipeline = PipelineBuilder::from_config(&PipelineConfig::default()).build();
        assert_eq!(
            pipeline.stage_names(),
            vec![
                "remove_duplicate_paths",
                "normalize_stroke_colors",
                "add_background",
                "color_code_patterns",
                "detect_blue_x",
                "detect_red_squares",
                "detect_pink_shapes",
                "detect_green_rectangles",
            ]
        );
    }

    #[test]
    fn test_detector_order_and_subset() {
        let pipeline = PipelineBuilder::from_config(&PipelineConfig::default())
            .with_detector_order(&[MarkerCategory::GreenRectangle, MarkerCategory::BlueX])
            .build();
        let names = pipeline.stage_names();
        assert_eq!(names.len(), 6);
        assert_eq!(&names[4..], &["detect_green_rectangles", "detect_blue_x"]);
    }
}
