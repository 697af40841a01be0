pub mod builder;
pub mod run;

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use crate::{
    algorithms::raster::{Raster, Renderer},
    error::{Result, TakeoffError},
    marker::DetectionResult,
    traits::{DetectorStage, ProgressSink, TransformStage},
    types::Drawing,
};

pub use builder::PipelineBuilder;
pub use run::{CancelFlag, PipelineRun, StageOutcome, StageState};

/// Ordered takeoff pipeline: transform stages rewrite the drawing one after
/// another, then every detector counts its category on a single shared render.
pub struct Pipeline {
    transforms: Vec<Box<dyn TransformStage>>,
    detectors: Vec<Arc<dyn DetectorStage>>,
    renderer: Renderer,
    progress: Arc<dyn ProgressSink>,
}

impl Pipeline {
    /// Create a new pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn new(
        transforms: Vec<Box<dyn TransformStage>>,
        detectors: Vec<Arc<dyn DetectorStage>>,
        renderer: Renderer,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            transforms,
            detectors,
            renderer,
            progress,
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.transforms
            .iter()
            .map(|t| t.name())
            .chain(self.detectors.iter().map(|d| d.name()))
            .collect()
    }

    pub fn detectors(&self) -> &[Arc<dyn DetectorStage>] {
        &self.detectors
    }

    pub fn progress(&self) -> &Arc<dyn ProgressSink> {
        &self.progress
    }

    fn empty_run(&self) -> PipelineRun {
        PipelineRun::new(
            self.transforms.iter().map(|t| t.name()),
            self.detectors.iter().map(|d| d.name()),
        )
    }

    /// Run every stage once, detectors one after another
    pub fn run(&self, drawing: &mut Drawing, cancel: &CancelFlag) -> PipelineRun {
        let mut run = self.empty_run();
        let Some(raster) = self.run_transforms(drawing, cancel, &mut run) else {
            return self.finish(run);
        };

        for (offset, detector) in self.detectors.iter().enumerate() {
            if cancel.is_cancelled() {
                run.cancelled = true;
                break;
            }
            let index = run.transform_count + offset;
            run.start(index);
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                detector.detect(&raster, self.progress.as_ref())
            }))
            .unwrap_or_else(|_| Err(panicked(detector.as_ref())));
            self.record_detection(&mut run, index, detector.as_ref(), outcome);
        }

        run.raster = Some(raster);
        self.finish(run)
    }

    /// Run the transforms, then all detectors concurrently on blocking tasks
    /// that share one read-only render
    pub async fn run_concurrent(&self, drawing: &mut Drawing, cancel: &CancelFlag) -> PipelineRun {
        let mut run = self.empty_run();
        let Some(raster) = self.run_transforms(drawing, cancel, &mut run) else {
            return self.finish(run);
        };
        if cancel.is_cancelled() {
            run.cancelled = true;
            return self.finish(run);
        }

        let mut handles = Vec::with_capacity(self.detectors.len());
        for (offset, detector) in self.detectors.iter().enumerate() {
            let index = run.transform_count + offset;
            run.start(index);
            let (detector, raster, progress) = (detector.clone(), raster.clone(), self.progress.clone());
            handles.push((
                index,
                tokio::task::spawn_blocking(move || detector.detect(&raster, progress.as_ref())),
            ));
        }

        for ((index, handle), detector) in handles.into_iter().zip(&self.detectors) {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    tracing::error!(stage = detector.name(), %join_error, "detector task aborted");
                    Err(panicked(detector.as_ref()))
                }
            };
            self.record_detection(&mut run, index, detector.as_ref(), outcome);
        }

        run.raster = Some(raster);
        self.finish(run)
    }

    /// Render once the transforms are done so detectors never repeat it
    pub fn render(&self, drawing: &Drawing) -> Result<Raster> {
        self.renderer.render(drawing)
    }

    /// Stages 1-4. Returns the shared render when detection may proceed.
    fn run_transforms(&self, drawing: &mut Drawing, cancel: &CancelFlag, run: &mut PipelineRun) -> Option<Arc<Raster>> {
        for (index, stage) in self.transforms.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(stage = stage.name(), "run cancelled before stage");
                run.cancelled = true;
                return None;
            }

            run.start(index);
            tracing::info!(stage = stage.name(), "running stage");
            let outcome = catch_unwind(AssertUnwindSafe(|| stage.apply(drawing, self.progress.as_ref())))
                .unwrap_or_else(|_| Err(TakeoffError::stage(stage.name(), "stage panicked")));

            match outcome {
                Ok(()) => run.succeed(index),
                Err(error) => {
                    tracing::error!(stage = stage.name(), %error, "transform stage failed, halting run");
                    self.progress.narrate(stage.name(), &format!("failed: {error}"));
                    run.fail(index, error.to_string());
                    return None;
                }
            }
        }

        if self.detectors.is_empty() {
            return None;
        }
        match self.render(drawing) {
            Ok(raster) => Some(Arc::new(raster)),
            Err(error) => {
                // Without a render no category can be counted
                tracing::error!(%error, "failed to render colorized drawing");
                for offset in 0..self.detectors.len() {
                    run.fail(run.transform_count + offset, format!("render failed: {error}"));
                }
                None
            }
        }
    }

    fn record_detection(
        &self,
        run: &mut PipelineRun,
        index: usize,
        detector: &dyn DetectorStage,
        outcome: Result<DetectionResult>,
    ) {
        match outcome {
            Ok(result) if result.category == detector.category() => {
                tracing::info!(stage = detector.name(), count = result.count, "detector finished");
                run.succeed(index);
                run.detections.insert(result.category, result);
            }
            Ok(result) => {
                let message = format!("reported {} instead of {}", result.category, detector.category());
                tracing::error!(stage = detector.name(), "{message}");
                run.fail(index, message);
            }
            Err(error) => {
                tracing::warn!(stage = detector.name(), %error, "detector failed, category unavailable");
                self.progress.narrate(detector.name(), &format!("failed: {error}"));
                run.fail(index, error.to_string());
            }
        }
    }

    fn finish(&self, run: PipelineRun) -> PipelineRun {
        self.progress.narrate("pipeline", &run.summary());
        run
    }
}

fn panicked(detector: &dyn DetectorStage) -> TakeoffError {
    TakeoffError::Detector {
        stage: detector.name().to_string(),
        category: detector.category(),
        message: "detector panicked".to_string(),
    }
}
