use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::{
    algorithms::raster::Raster,
    marker::{DetectionResult, MarkerCategory},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub name: String,
    pub state: StageState,
    /// Present whenever `state` is `Failed`
    pub diagnostic: Option<String>,
}

impl StageOutcome {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StageState::Pending,
            diagnostic: None,
        }
    }
}

/// Cooperative cancellation, checked between stages
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one pass over the stage list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRun {
    /// One entry per declared stage, in execution order
    pub stages: Vec<StageOutcome>,
    /// Number of leading entries in `stages` that are transforms
    pub transform_count: usize,
    pub detections: BTreeMap<MarkerCategory, DetectionResult>,
    pub cancelled: bool,
    /// The render the detectors consumed, kept for stage artifacts
    #[serde(skip)]
    pub raster: Option<Arc<Raster>>,
}

impl PipelineRun {
    pub fn new<'a>(transforms: impl IntoIterator<Item = &'a str>, detectors: impl IntoIterator<Item = &'a str>) -> Self {
        let mut stages: Vec<StageOutcome> = transforms.into_iter().map(StageOutcome::pending).collect();
        let transform_count = stages.len();
        stages.extend(detectors.into_iter().map(StageOutcome::pending));
        Self {
            stages,
            transform_count,
            ..Default::default()
        }
    }

    pub(crate) fn start(&mut self, index: usize) {
        if let Some(stage) = self.stages.get_mut(index) {
            stage.state = StageState::Running;
        }
    }

    pub(crate) fn succeed(&mut self, index: usize) {
        if let Some(stage) = self.stages.get_mut(index) {
            stage.state = StageState::Succeeded;
            stage.diagnostic = None;
        }
    }

    pub(crate) fn fail(&mut self, index: usize, diagnostic: impl Into<String>) {
        if let Some(stage) = self.stages.get_mut(index) {
            stage.state = StageState::Failed;
            stage.diagnostic = Some(diagnostic.into());
        }
    }

    /// True only when every declared stage succeeded and the run was not cancelled
    pub fn succeeded(&self) -> bool {
        !self.cancelled
            && !self.stages.is_empty()
            && self.stages.iter().all(|s| s.state == StageState::Succeeded)
    }

    /// Logical AND of the transform stages
    pub fn transforms_succeeded(&self) -> bool {
        !self.cancelled
            && self.stages[..self.transform_count]
                .iter()
                .all(|s| s.state == StageState::Succeeded)
    }

    pub fn completed_stages(&self) -> usize {
        self.stages.iter().filter(|s| s.state == StageState::Succeeded).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StageOutcome> {
        self.stages.iter().filter(|s| s.state == StageState::Failed)
    }

    pub fn stage(&self, name: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Count for a category, `None` when its detector did not succeed
    pub fn count(&self, category: MarkerCategory) -> Option<u32> {
        self.detections.get(&category).map(|d| d.count)
    }

    pub fn summary(&self) -> String {
        let mut summary = format!("Steps completed: {}/{}", self.completed_stages(), self.stages.len());
        if self.cancelled {
            summary.push_str(" (cancelled)");
        }
        for failure in self.failures() {
            summary.push_str(&format!(
                "; {} failed: {}",
                failure.name,
                failure.diagnostic.as_deref().unwrap_or("no diagnostic")
            ));
        }
        summary
    }
}
