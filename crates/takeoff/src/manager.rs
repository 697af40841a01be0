use std::{
    collections::{BTreeMap, HashSet},
    io::Cursor,
    sync::{Arc, Mutex},
};

use image::{DynamicImage, GrayImage, ImageFormat};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr, VariantNames};

use crate::{
    artifacts::ArtifactStore,
    config::{DetectorExecution, PipelineConfig},
    error::{Result, TakeoffError},
    pipeline::{CancelFlag, Pipeline, PipelineBuilder, PipelineRun, StageState},
    record::{ArtifactRef, ResultAggregator, ResultRecord, UploadMetadata},
    store::{RecordStore, validate_upload_id},
    traits::ProgressSink,
    types::Drawing,
};

#[derive(
    Debug, Clone,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, VariantNames, IntoStaticStr,
    PartialEq
)]
#[serde(tag = "type", content = "params")]
#[strum(serialize_all = "snake_case")]
pub enum TakeoffCommand {
    /// Run the full pipeline for an upload and persist its record
    #[serde(rename = "process")]
    Process {
        #[schemars(length(min = 1, max = 128))]
        upload_id: String,
        #[serde(default)]
        options: ProcessOptions,
    },

    /// Read the current record of an upload
    #[serde(rename = "results")]
    Results {
        #[schemars(length(min = 1, max = 128))]
        upload_id: String,
    },

    /// Clear the record once its results have been delivered
    #[serde(rename = "reset")]
    Reset {
        #[schemars(length(min = 1, max = 128))]
        upload_id: String,
    },
}

impl TakeoffCommand {
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(TakeoffCommand)
    }

    pub fn command_names() -> &'static [&'static str] {
        <Self as VariantNames>::VARIANTS
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Process { .. } => "Deduplicate, normalize, composite, colorize and count markers for an upload",
            Self::Results { .. } => "Fetch the stored takeoff record for an upload",
            Self::Reset { .. } => "Reset an upload's record to the empty structure",
        }
    }
}

/// Caller-supplied details stored alongside the counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessOptions {
    pub file_name: Option<String>,
    pub company: Option<String>,
    pub jobsite: Option<String>,
    /// Overrides the OCR text kept with the upload's artifacts
    pub extracted_text: Option<String>,
}

/// Everything a single processing call produced
#[derive(Debug, Clone, Serialize)]
pub struct TakeoffReport {
    pub upload_id: String,
    pub run: PipelineRun,
    pub record: ResultRecord,
}

/// Removes the upload from the active set when dropped
struct ActiveRun {
    active: Arc<Mutex<HashSet<String>>>,
    upload_id: String,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.upload_id);
        }
    }
}

/// Runs the takeoff pipeline per upload over pluggable artifact and record
/// stores, allowing at most one active run per upload id.
#[derive(Clone)]
pub struct TakeoffManager {
    config: PipelineConfig,
    pipeline: Arc<Pipeline>,
    artifacts: Arc<dyn ArtifactStore>,
    records: Arc<dyn RecordStore>,
    aggregator: ResultAggregator,
    active: Arc<Mutex<HashSet<String>>>,
}

impl TakeoffManager {
    pub fn new(
        config: PipelineConfig,
        artifacts: Arc<dyn ArtifactStore>,
        records: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        config.validate()?;
        let pipeline = PipelineBuilder::from_config(&config).build();
        Ok(Self {
            config,
            pipeline: Arc::new(pipeline),
            artifacts,
            records,
            aggregator: ResultAggregator,
            active: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    /// Rebuild the standard pipeline narrating into `progress`
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.pipeline = Arc::new(
            PipelineBuilder::from_config(&self.config)
                .with_shared_progress(progress)
                .build(),
        );
        self
    }

    /// Replace the pipeline with a custom one
    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    fn begin(&self, upload_id: &str) -> Result<ActiveRun> {
        validate_upload_id(upload_id)?;
        let mut active = self
            .active
            .lock()
            .map_err(|_| TakeoffError::StoreUnavailable("active run registry poisoned".into()))?;
        if !active.insert(upload_id.to_string()) {
            return Err(TakeoffError::RunInProgress(upload_id.to_string()));
        }
        Ok(ActiveRun {
            active: self.active.clone(),
            upload_id: upload_id.to_string(),
        })
    }

    pub fn is_active(&self, upload_id: &str) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(upload_id))
            .unwrap_or(false)
    }

    /// Gate before any stage runs: every missing input is reported at once
    fn prerequisites(&self, upload_id: &str) -> Result<Drawing> {
        let mut missing = Vec::new();
        let drawing = match self.artifacts.load_drawing(upload_id) {
            Ok(Some(drawing)) => Some(drawing),
            Ok(None) => {
                missing.push("converted drawing artifact".to_string());
                None
            }
            Err(error) => {
                missing.push(format!("readable converted drawing ({error})"));
                None
            }
        };
        if self.pipeline.stage_names().is_empty() {
            missing.push("pipeline stages".to_string());
        }

        match drawing {
            Some(drawing) if missing.is_empty() => Ok(drawing),
            _ => {
                tracing::warn!(upload_id, ?missing, "prerequisite check failed");
                Err(TakeoffError::MissingPrerequisite {
                    upload_id: upload_id.to_string(),
                    missing,
                })
            }
        }
    }

    /// Run every stage once with detectors in sequence
    pub fn process(&self, upload_id: &str, options: &ProcessOptions) -> Result<TakeoffReport> {
        self.process_with_cancel(upload_id, options, &CancelFlag::new())
    }

    pub fn process_with_cancel(
        &self,
        upload_id: &str,
        options: &ProcessOptions,
        cancel: &CancelFlag,
    ) -> Result<TakeoffReport> {
        let _active = self.begin(upload_id)?;
        let mut drawing = self.prerequisites(upload_id)?;
        tracing::info!(upload_id, elements = drawing.elements.len(), "starting takeoff run");
        let run = self.pipeline.run(&mut drawing, cancel);
        self.finish(upload_id, options, &drawing, run)
    }

    /// Run the transforms, then all detectors concurrently on one shared render
    pub async fn process_concurrent(
        &self,
        upload_id: &str,
        options: &ProcessOptions,
        cancel: &CancelFlag,
    ) -> Result<TakeoffReport> {
        let _active = self.begin(upload_id)?;
        let mut drawing = self.prerequisites(upload_id)?;
        tracing::info!(upload_id, elements = drawing.elements.len(), "starting concurrent takeoff run");
        let run = self.pipeline.run_concurrent(&mut drawing, cancel).await;
        self.finish(upload_id, options, &drawing, run)
    }

    /// Dispatch on the configured detector execution mode
    pub async fn process_async(
        &self,
        upload_id: &str,
        options: &ProcessOptions,
        cancel: &CancelFlag,
    ) -> Result<TakeoffReport> {
        match self.config.detector_execution {
            DetectorExecution::Sequential => self.process_with_cancel(upload_id, options, cancel),
            DetectorExecution::Concurrent => self.process_concurrent(upload_id, options, cancel).await,
        }
    }

    /// The stored record, `None` when the upload has never been recorded
    pub fn results(&self, upload_id: &str) -> Result<Option<ResultRecord>> {
        let _active = self.begin(upload_id)?;
        self.records.load(upload_id)
    }

    /// Cleanup after delivery: the record becomes the empty structure
    pub fn reset(&self, upload_id: &str) -> Result<ResultRecord> {
        let _active = self.begin(upload_id)?;
        let record = self.records.reset(upload_id)?;
        tracing::info!(upload_id, "reset result record");
        Ok(record)
    }

    pub async fn execute(&self, command: TakeoffCommand) -> Result<Option<ResultRecord>> {
        match command {
            TakeoffCommand::Process { upload_id, options } => {
                let report = self.process_async(&upload_id, &options, &CancelFlag::new()).await?;
                Ok(Some(report.record))
            }
            TakeoffCommand::Results { upload_id } => self.results(&upload_id),
            TakeoffCommand::Reset { upload_id } => self.reset(&upload_id).map(Some),
        }
    }

    fn finish(
        &self,
        upload_id: &str,
        options: &ProcessOptions,
        drawing: &Drawing,
        run: PipelineRun,
    ) -> Result<TakeoffReport> {
        let previous = self.records.load(upload_id).unwrap_or_else(|error| {
            tracing::warn!(upload_id, %error, "could not read previous record");
            None
        });
        let extracted_text = match &options.extracted_text {
            Some(text) => Some(text.clone()),
            None => self.artifacts.load_ocr_text(upload_id).unwrap_or_else(|error| {
                tracing::warn!(upload_id, %error, "could not read OCR text");
                None
            }),
        };
        let source_document = self.artifacts.source_document(upload_id).unwrap_or_else(|error| {
            tracing::warn!(upload_id, %error, "could not stat source document");
            None
        });

        let (converted_drawing, stage_artifacts, write_error) = match self.write_artifacts(upload_id, drawing, &run) {
            Ok((drawing_ref, stage_artifacts)) => (Some(drawing_ref), stage_artifacts, None),
            Err(error) => (
                self.artifacts.drawing_ref(upload_id).ok().flatten(),
                BTreeMap::new(),
                Some(error),
            ),
        };

        let metadata = UploadMetadata {
            extracted_text,
            source_document,
            converted_drawing,
            file_name: options.file_name.clone(),
            company: options.company.clone(),
            jobsite: options.jobsite.clone(),
        };
        let record = self
            .aggregator
            .merge(upload_id, previous.as_ref(), &run, &metadata, stage_artifacts);
        tracing::info!(upload_id, status = %record.status, summary = %run.summary(), "takeoff run finished");

        let report = TakeoffReport {
            upload_id: upload_id.to_string(),
            run,
            record,
        };
        // The record is replaced even when an artifact could not be written
        let save_error = self.records.save(&report.record).err();
        let failure = match (write_error, save_error) {
            (Some(write), Some(save)) => Some(format!("{write}; {save}")),
            (Some(error), None) | (None, Some(error)) => Some(error.to_string()),
            (None, None) => None,
        };
        match failure {
            None => Ok(report),
            Some(error) => {
                tracing::error!(upload_id, %error, "failed to persist takeoff results");
                Err(TakeoffError::Persistence {
                    upload_id: upload_id.to_string(),
                    message: error,
                    report: Box::new(report),
                })
            }
        }
    }

    /// Overwrite the stored drawing and, when enabled, write per-stage outputs
    fn write_artifacts(
        &self,
        upload_id: &str,
        drawing: &Drawing,
        run: &PipelineRun,
    ) -> Result<(ArtifactRef, BTreeMap<String, String>)> {
        let drawing_ref = self.artifacts.save_drawing(upload_id, drawing)?;
        let mut stage_artifacts = BTreeMap::new();
        if !self.config.write_stage_artifacts || !run.transforms_succeeded() {
            return Ok((drawing_ref, stage_artifacts));
        }

        if let Some(last) = run.stages[..run.transform_count].last() {
            let file_name = format!("step{}_{}.svg", run.transform_count, last.name);
            let path = self
                .artifacts
                .write_stage_artifact(upload_id, &file_name, drawing.to_svg().as_bytes())?;
            stage_artifacts.insert(last.name.clone(), path);
        }

        if let Some(raster) = &run.raster {
            for (offset, detector) in self.pipeline.detectors().iter().enumerate() {
                let index = run.transform_count + offset;
                let succeeded = run.stages.get(index).is_some_and(|s| s.state == StageState::Succeeded);
                let Some(mask) = detector.render_mask(raster).filter(|_| succeeded) else {
                    continue;
                };
                let file_name = format!("step{}_{}.png", index + 1, detector.name());
                let path = self
                    .artifacts
                    .write_stage_artifact(upload_id, &file_name, &encode_png(mask)?)?;
                stage_artifacts.insert(detector.name().to_string(), path);
            }
        }
        Ok((drawing_ref, stage_artifacts))
    }
}

fn encode_png(mask: GrayImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(mask).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifacts::MemoryArtifactStore,
        marker::MarkerCategory,
        progress::NullProgress,
        record::{CategoryCount, RecordStatus},
        store::MemoryRecordStore,
        types::{Color, Geometry, Style},
    };

    struct BrokenStore;

    impl RecordStore for BrokenStore {
        fn load(&self, _upload_id: &str) -> Result<Option<ResultRecord>> {
            Ok(None)
        }

        fn save(&self, _record: &ResultRecord) -> Result<()> {
            Err(TakeoffError::StoreUnavailable("disk full".into()))
        }
    }

    fn drawing() -> Drawing {
        let mut drawing = Drawing::new(120.0, 80.0);
        drawing.push(Geometry::rect(10.0, 10.0, 12.0, 12.0), Style::stroked(Color::BLACK));
        drawing.push(Geometry::rect(40.0, 10.0, 24.0, 10.0), Style::stroked(Color::BLACK));
        drawing
    }

    fn manager(config: PipelineConfig) -> (TakeoffManager, Arc<MemoryArtifactStore>, Arc<MemoryRecordStore>) {
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let records = Arc::new(MemoryRecordStore::new());
        let manager = TakeoffManager::new(config, artifacts.clone(), records.clone())
            .unwrap()
            .with_progress(Arc::new(NullProgress));
        (manager, artifacts, records)
    }

    #[test]
    fn test_missing_drawing_runs_nothing() {
        let (manager, _, records) = manager(PipelineConfig::default());
        let error = manager.process("u1", &ProcessOptions::default()).unwrap_err();
        match error {
            TakeoffError::MissingPrerequisite { upload_id, missing } => {
                assert_eq!(upload_id, "u1");
                assert_eq!(missing, vec!["converted drawing artifact".to_string()]);
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(records.load("u1").unwrap(), None);
    }

    #[test]
    fn test_process_persists_record_and_drawing() {
        let (manager, artifacts, records) = manager(PipelineConfig::default());
        artifacts.insert_drawing("u1", drawing()).unwrap();
        artifacts.insert_ocr_text("u1", "LEVEL 2").unwrap();

        let options = ProcessOptions {
            company: Some("Acme".into()),
            ..Default::default()
        };
        let report = manager.process("u1", &options).unwrap();
        assert!(report.run.succeeded());
        assert_eq!(report.record.status, RecordStatus::Completed);
        assert_eq!(report.record.counts.red_squares, CategoryCount::Available(1));
        assert_eq!(report.record.counts.green_rectangles, CategoryCount::Available(1));
        assert_eq!(report.record.counts.blue_x, CategoryCount::Available(0));
        assert_eq!(report.record.extracted_text.as_deref(), Some("LEVEL 2"));
        assert_eq!(report.record.company.as_deref(), Some("Acme"));
        assert_eq!(report.record.stages_completed, 8);

        assert_eq!(records.load("u1").unwrap(), Some(report.record.clone()));
        let stored = artifacts.load_drawing("u1").unwrap().unwrap();
        assert_eq!(stored.background_count(), 1);
        assert_eq!(stored.elements_colored(MarkerCategory::RedSquare.color()).len(), 1);
    }

    #[test]
    fn test_results_and_reset() {
        let (manager, artifacts, _) = manager(PipelineConfig::default());
        assert_eq!(manager.results("u1").unwrap(), None);
        assert!(manager.results("bad/id").is_err());

        artifacts.insert_drawing("u1", drawing()).unwrap();
        manager.process("u1", &ProcessOptions::default()).unwrap();
        assert!(manager.results("u1").unwrap().is_some());
        assert!(!manager.is_active("u1"));

        let reset = manager.reset("u1").unwrap();
        assert_eq!(reset.status, RecordStatus::Empty);
        let stored = manager.results("u1").unwrap().unwrap();
        assert_eq!(stored.counts.red_squares, CategoryCount::NotAvailable);
        assert_eq!(stored.extracted_text, None);
    }

    #[test]
    fn test_one_active_run_per_upload() {
        let (manager, artifacts, _) = manager(PipelineConfig::default());
        artifacts.insert_drawing("u1", drawing()).unwrap();

        let held = manager.begin("u1").unwrap();
        assert!(matches!(
            manager.process("u1", &ProcessOptions::default()),
            Err(TakeoffError::RunInProgress(_))
        ));
        assert!(matches!(manager.results("u1"), Err(TakeoffError::RunInProgress(_))));
        assert!(matches!(manager.reset("u1"), Err(TakeoffError::RunInProgress(_))));
        drop(held);
        assert!(manager.process("u1", &ProcessOptions::default()).is_ok());
        assert!(!manager.is_active("u1"));
    }

    #[test]
    fn test_persistence_failure_keeps_results() {
        let artifacts = Arc::new(MemoryArtifactStore::new());
        artifacts.insert_drawing("u1", drawing()).unwrap();
        let manager = TakeoffManager::new(PipelineConfig::default(), artifacts, Arc::new(BrokenStore))
            .unwrap()
            .with_progress(Arc::new(NullProgress));

        match manager.process("u1", &ProcessOptions::default()) {
            Err(TakeoffError::Persistence { report, message, .. }) => {
                assert!(message.contains("disk full"));
                assert_eq!(report.record.counts.red_squares, CategoryCount::Available(1));
            }
            other => panic!("expected persistence failure, got {other:?}"),
        }
    }

    /// Serves the drawing but refuses every write
    struct ReadOnlyArtifacts(MemoryArtifactStore);

    impl ArtifactStore for ReadOnlyArtifacts {
        fn load_drawing(&self, upload_id: &str) -> Result<Option<Drawing>> {
            self.0.load_drawing(upload_id)
        }

        fn save_drawing(&self, _upload_id: &str, _drawing: &Drawing) -> Result<ArtifactRef> {
            Err(TakeoffError::StoreUnavailable("read-only volume".into()))
        }

        fn drawing_ref(&self, upload_id: &str) -> Result<Option<ArtifactRef>> {
            self.0.drawing_ref(upload_id)
        }

        fn load_ocr_text(&self, upload_id: &str) -> Result<Option<String>> {
            self.0.load_ocr_text(upload_id)
        }

        fn source_document(&self, upload_id: &str) -> Result<Option<ArtifactRef>> {
            self.0.source_document(upload_id)
        }

        fn write_stage_artifact(&self, _upload_id: &str, _file_name: &str, _bytes: &[u8]) -> Result<String> {
            Err(TakeoffError::StoreUnavailable("read-only volume".into()))
        }
    }

    #[test]
    fn test_artifact_failure_still_replaces_record() {
        let memory = MemoryArtifactStore::new();
        memory.insert_drawing("u1", drawing()).unwrap();
        let records = Arc::new(MemoryRecordStore::new());
        let mut stale = ResultRecord::empty("u1");
        stale.counts.red_squares = CategoryCount::Available(42);
        stale.status = RecordStatus::Completed;
        records.save(&stale).unwrap();

        let manager = TakeoffManager::new(PipelineConfig::default(), Arc::new(ReadOnlyArtifacts(memory)), records.clone())
            .unwrap()
            .with_progress(Arc::new(NullProgress));
        match manager.process("u1", &ProcessOptions::default()) {
            Err(TakeoffError::Persistence { message, .. }) => assert!(message.contains("read-only volume")),
            other => panic!("expected persistence failure, got {other:?}"),
        }

        let stored = records.load("u1").unwrap().unwrap();
        assert_eq!(stored.counts.red_squares, CategoryCount::Available(1));
        assert_eq!(stored.counts.green_rectangles, CategoryCount::Available(1));
    }

    #[test]
    fn test_stage_artifacts_written() {
        let config = PipelineConfig {
            write_stage_artifacts: true,
            ..Default::default()
        };
        let (manager, artifacts, _) = manager(config);
        artifacts.insert_drawing("u1", drawing()).unwrap();
        let report = manager.process("u1", &ProcessOptions::default()).unwrap();

        let stages = &report.record.stage_artifacts;
        assert_eq!(stages.len(), 5);
        assert_eq!(stages.get("color_code_patterns").map(String::as_str), Some("memory://u1/stages/step4_color_code_patterns.svg"));
        let svg = artifacts.stage_file("u1", "step4_color_code_patterns.svg").unwrap().unwrap();
        assert!(String::from_utf8(svg).unwrap().contains("#ff0000"));
        let png = artifacts.stage_file("u1", "step6_detect_red_squares.png").unwrap().unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[tokio::test]
    async fn test_execute_commands() {
        let (manager, artifacts, _) = manager(PipelineConfig {
            detector_execution: DetectorExecution::Concurrent,
            ..Default::default()
        });
        artifacts.insert_drawing("u1", drawing()).unwrap();

        let record = manager
            .execute(TakeoffCommand::Process {
                upload_id: "u1".into(),
                options: ProcessOptions::default(),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.counts.red_squares, CategoryCount::Available(1));

        let fetched = manager
            .execute(TakeoffCommand::Results { upload_id: "u1".into() })
            .await
            .unwrap();
        assert_eq!(fetched, Some(record));
        assert_eq!(TakeoffCommand::command_names(), &["process", "results", "reset"]);
    }
}
