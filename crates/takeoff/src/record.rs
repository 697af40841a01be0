//! Persisted per-upload takeoff results and the aggregator that builds them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;
use ts_rs::TS;

use crate::{marker::MarkerCategory, pipeline::PipelineRun};

/// A category count, or an explicit marker that the count could not be produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "CountRepr", into = "CountRepr")]
pub enum CategoryCount {
    Available(u32),
    #[default]
    NotAvailable,
}

impl CategoryCount {
    pub fn value(self) -> Option<u32> {
        match self {
            Self::Available(count) => Some(count),
            Self::NotAvailable => None,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Self::Available(_))
    }
}

impl From<Option<u32>> for CategoryCount {
    fn from(count: Option<u32>) -> Self {
        count.map_or(Self::NotAvailable, Self::Available)
    }
}

/// Wire shape: a plain number or the string `"not_available"`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
enum CountRepr {
    Count(u32),
    Missing(Unavailable),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
enum Unavailable {
    NotAvailable,
}

impl From<CountRepr> for CategoryCount {
    fn from(repr: CountRepr) -> Self {
        match repr {
            CountRepr::Count(count) => Self::Available(count),
            CountRepr::Missing(Unavailable::NotAvailable) => Self::NotAvailable,
        }
    }
}

impl From<CategoryCount> for CountRepr {
    fn from(count: CategoryCount) -> Self {
        match count {
            CategoryCount::Available(count) => Self::Count(count),
            CategoryCount::NotAvailable => Self::Missing(Unavailable::NotAvailable),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema, TS)]
pub struct TakeoffCounts {
    #[schemars(with = "CountRepr")]
    #[ts(type = "number | \"not_available\"")]
    pub blue_x: CategoryCount,
    #[schemars(with = "CountRepr")]
    #[ts(type = "number | \"not_available\"")]
    pub red_squares: CategoryCount,
    #[schemars(with = "CountRepr")]
    #[ts(type = "number | \"not_available\"")]
    pub pink_shapes: CategoryCount,
    #[schemars(with = "CountRepr")]
    #[ts(type = "number | \"not_available\"")]
    pub green_rectangles: CategoryCount,
}

impl TakeoffCounts {
    pub fn get(&self, category: MarkerCategory) -> CategoryCount {
        match category {
            MarkerCategory::BlueX => self.blue_x,
            MarkerCategory::RedSquare => self.red_squares,
            MarkerCategory::PinkShape => self.pink_shapes,
            MarkerCategory::GreenRectangle => self.green_rectangles,
        }
    }

    pub fn set(&mut self, category: MarkerCategory, count: CategoryCount) {
        let slot = match category {
            MarkerCategory::BlueX => &mut self.blue_x,
            MarkerCategory::RedSquare => &mut self.red_squares,
            MarkerCategory::PinkShape => &mut self.pink_shapes,
            MarkerCategory::GreenRectangle => &mut self.green_rectangles,
        };
        *slot = count;
    }

    /// Counts of the categories whose detector succeeded; the rest stay unavailable
    pub fn from_run(run: &PipelineRun) -> Self {
        let mut counts = Self::default();
        for category in MarkerCategory::all() {
            counts.set(category, run.count(category).into());
        }
        counts
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default,
    Serialize, Deserialize, JsonSchema, TS, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordStatus {
    /// Freshly created or reset, no run has written it
    #[default]
    Empty,
    /// Every stage succeeded
    Completed,
    /// Transforms succeeded but at least one detector failed
    Partial,
    /// A transform failed or the run was cancelled
    Failed,
}

/// Reference to a stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, TS)]
pub struct ArtifactRef {
    pub path: String,
    #[ts(type = "number")]
    pub size_bytes: u64,
}

/// The persisted result of the latest run for one upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, TS)]
#[ts(export)]
#[schemars(description = "Takeoff result for one upload, overwritten by every run")]
pub struct ResultRecord {
    pub upload_id: String,
    pub status: RecordStatus,
    pub counts: TakeoffCounts,
    #[schemars(description = "Text extracted from the source document, stored verbatim")]
    pub extracted_text: Option<String>,
    pub source_document: Option<ArtifactRef>,
    pub converted_drawing: Option<ArtifactRef>,
    pub file_name: Option<String>,
    pub company: Option<String>,
    pub jobsite: Option<String>,
    pub stages_completed: u32,
    pub stages_total: u32,
    #[schemars(description = "Stage name to the path of the artifact it produced")]
    pub stage_artifacts: BTreeMap<String, String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResultRecord {
    /// The cleared structure a record is reset to after delivery
    pub fn empty(upload_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            upload_id: upload_id.into(),
            status: RecordStatus::Empty,
            counts: TakeoffCounts::default(),
            extracted_text: None,
            source_document: None,
            converted_drawing: None,
            file_name: None,
            company: None,
            jobsite: None,
            stages_completed: 0,
            stages_total: 0,
            stage_artifacts: BTreeMap::new(),
            message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Everything about an upload that does not come out of the pipeline itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub extracted_text: Option<String>,
    pub source_document: Option<ArtifactRef>,
    pub converted_drawing: Option<ArtifactRef>,
    pub file_name: Option<String>,
    pub company: Option<String>,
    pub jobsite: Option<String>,
}

/// Folds a run and its upload metadata into a result record
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    pub fn status(run: &PipelineRun) -> RecordStatus {
        if run.succeeded() {
            RecordStatus::Completed
        } else if run.transforms_succeeded() && !run.detections.is_empty() {
            RecordStatus::Partial
        } else {
            RecordStatus::Failed
        }
    }

    /// Build the record that replaces `previous`. Every field is overwritten;
    /// only the creation time of an existing record survives.
    pub fn merge(
        &self,
        upload_id: &str,
        previous: Option<&ResultRecord>,
        run: &PipelineRun,
        metadata: &UploadMetadata,
        stage_artifacts: BTreeMap<String, String>,
    ) -> ResultRecord {
        let now = Utc::now();
        ResultRecord {
            upload_id: upload_id.to_string(),
            status: Self::status(run),
            counts: TakeoffCounts::from_run(run),
            extracted_text: metadata.extracted_text.clone(),
            source_document: metadata.source_document.clone(),
            converted_drawing: metadata.converted_drawing.clone(),
            file_name: metadata.file_name.clone(),
            company: metadata.company.clone(),
            jobsite: metadata.jobsite.clone(),
            stages_completed: run.completed_stages() as u32,
            stages_total: run.stages.len() as u32,
            stage_artifacts,
            message: Some(run.summary()),
            created_at: previous
                .filter(|record| record.status != RecordStatus::Empty)
                .map_or(now, |record| record.created_at),
            updated_at: now,
        }
    }
}
