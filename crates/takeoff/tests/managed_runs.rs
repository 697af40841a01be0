//! Upload-level runs through the manager with file-backed stores.

mod common;

use std::{fs, sync::Arc};

use tempfile::TempDir;
use takeoff::{
    ArtifactStore, CancelFlag, CategoryCount, ColorMaskDetector, DetectionResult, DetectorStage, FileArtifactStore,
    JsonFileRecordStore, MarkerCategory, NullProgress, PipelineBuilder, PipelineConfig, ProcessOptions,
    ProgressSink, Raster, RecordStatus, ResultRecord, TakeoffError, TakeoffManager,
};

use common::scenario_drawing;

struct Stores {
    _root: TempDir,
    artifacts: FileArtifactStore,
    records_dir: std::path::PathBuf,
}

fn stores() -> Stores {
    let root = TempDir::new().unwrap();
    let artifacts = FileArtifactStore::new(root.path().join("artifacts"));
    let records_dir = root.path().join("records");
    Stores {
        _root: root,
        artifacts,
        records_dir,
    }
}

fn manager(stores: &Stores, config: PipelineConfig) -> TakeoffManager {
    TakeoffManager::new(
        config,
        Arc::new(stores.artifacts.clone()),
        Arc::new(JsonFileRecordStore::new(&stores.records_dir).unwrap()),
    )
    .unwrap()
    .with_progress(Arc::new(NullProgress))
}

fn stage_upload(stores: &Stores, upload_id: &str) {
    let dir = stores.artifacts.upload_dir(upload_id).unwrap();
    fs::create_dir_all(&dir).unwrap();
    scenario_drawing().save(dir.join("drawing.json")).unwrap();
    fs::write(dir.join("ocr.txt"), "SHEET A-101\nFIRST FLOOR PLAN").unwrap();
    fs::write(dir.join("source.pdf"), b"%PDF-1.7").unwrap();
}

/// Stands in for a red-square detector that cannot complete
struct UnavailableDetector;

impl DetectorStage for UnavailableDetector {
    fn name(&self) -> &'static str {
        "detect_red_squares"
    }

    fn category(&self) -> MarkerCategory {
        MarkerCategory::RedSquare
    }

    fn detect(&self, _raster: &Raster, _progress: &dyn ProgressSink) -> takeoff::Result<DetectionResult> {
        Err(TakeoffError::Detector {
            stage: self.name().to_string(),
            category: self.category(),
            message: "mask could not be built".to_string(),
        })
    }
}

#[test]
fn scenario_record_is_persisted() {
    let stores = stores();
    stage_upload(&stores, "job-7");
    let manager = manager(&stores, PipelineConfig::default());

    let options = ProcessOptions {
        file_name: Some("plan.pdf".into()),
        jobsite: Some("Harbor St".into()),
        ..Default::default()
    };
    let report = manager.process("job-7", &options).unwrap();
    assert_eq!(report.record.status, RecordStatus::Completed);

    let stored = fs::read_to_string(stores.records_dir.join("job-7.json")).unwrap();
    let json: serde_json::Value = serde_json::from_str(&stored).unwrap();
    assert_eq!(
        json["counts"],
        serde_json::json!({"blue_x": 3, "red_squares": 5, "pink_shapes": 0, "green_rectangles": 2})
    );
    assert_eq!(json["extracted_text"], "SHEET A-101\nFIRST FLOOR PLAN");
    assert_eq!(json["file_name"], "plan.pdf");
    assert_eq!(json["source_document"]["size_bytes"], 8);
    assert_eq!(json["stages_completed"], 8);

    // The drawing artifact now holds the colorized state
    let drawing = stores.artifacts.load_drawing("job-7").unwrap().unwrap();
    assert_eq!(drawing.background_count(), 1);
    assert_eq!(drawing.elements_colored(MarkerCategory::RedSquare.color()).len(), 5);
}

#[test]
fn failing_detector_leaves_other_categories() {
    let stores = stores();
    stage_upload(&stores, "job-8");
    let config = PipelineConfig::default();
    let pipeline = PipelineBuilder::from_config(&config)
        .replace_detector(UnavailableDetector)
        .with_progress(NullProgress)
        .build();
    let manager = manager(&stores, config).with_pipeline(pipeline);

    let report = manager.process("job-8", &ProcessOptions::default()).unwrap();
    let record = &report.record;
    assert_eq!(record.status, RecordStatus::Partial);
    assert_eq!(record.counts.red_squares, CategoryCount::NotAvailable);
    assert_eq!(record.counts.blue_x, CategoryCount::Available(3));
    assert_eq!(record.counts.pink_shapes, CategoryCount::Available(0));
    assert_eq!(record.counts.green_rectangles, CategoryCount::Available(2));
    assert!(record.message.as_deref().unwrap_or("").contains("detect_red_squares failed"));

    let stored = fs::read_to_string(stores.records_dir.join("job-8.json")).unwrap();
    assert!(stored.contains("\"red_squares\": \"not_available\""));
}

#[test]
fn rerun_overwrites_and_reset_clears() {
    let stores = stores();
    stage_upload(&stores, "job-9");
    let manager = manager(&stores, PipelineConfig::default());

    let first = manager.process("job-9", &ProcessOptions::default()).unwrap().record;
    let second = manager.process("job-9", &ProcessOptions::default()).unwrap().record;
    assert_eq!(second.counts, first.counts);
    assert_eq!(second.created_at, first.created_at);

    manager.reset("job-9").unwrap();
    let cleared: ResultRecord = manager.results("job-9").unwrap().unwrap();
    assert_eq!(cleared.status, RecordStatus::Empty);
    assert!(MarkerCategory::all().all(|c| cleared.counts.get(c) == CategoryCount::NotAvailable));
    assert_eq!(manager.results("never-uploaded").unwrap(), None);
}

#[test]
fn missing_drawing_is_reported_before_any_stage() {
    let stores = stores();
    let manager = manager(&stores, PipelineConfig::default());
    match manager.process("job-10", &ProcessOptions::default()) {
        Err(TakeoffError::MissingPrerequisite { missing, .. }) => assert_eq!(missing.len(), 1),
        other => panic!("expected missing prerequisite, got {other:?}"),
    }
    assert!(!stores.records_dir.join("job-10.json").exists());
}

#[test]
fn stage_artifacts_land_next_to_the_upload() {
    let stores = stores();
    stage_upload(&stores, "job-11");
    let manager = manager(
        &stores,
        PipelineConfig {
            write_stage_artifacts: true,
            ..Default::default()
        },
    );
    let record = manager.process("job-11", &ProcessOptions::default()).unwrap().record;

    let stages_dir = stores.artifacts.upload_dir("job-11").unwrap().join("stages");
    assert!(stages_dir.join("step4_color_code_patterns.svg").is_file());
    for detector in MarkerCategory::all().map(ColorMaskDetector::new) {
        let path = record.stage_artifacts.get(detector.name()).unwrap();
        assert!(std::path::Path::new(path).is_file(), "{path}");
    }
}

#[tokio::test]
async fn concurrent_processing_matches_sequential() {
    let stores = stores();
    stage_upload(&stores, "job-12");
    stage_upload(&stores, "job-13");
    let manager = manager(&stores, PipelineConfig::default());

    let sequential = manager.process("job-12", &ProcessOptions::default()).unwrap();
    let concurrent = manager
        .process_concurrent("job-13", &ProcessOptions::default(), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(concurrent.record.counts, sequential.record.counts);
}
