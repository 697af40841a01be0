//! # Drawing Takeoff Library
//!
//! Counts domain symbols on architectural drawings. A converted vector
//! drawing passes through four transform stages that clean it up and recolor
//! recognised symbols into canonical marker colors, then four independent
//! detectors count each marker color on a shared raster render.
//!
//! ## Stages
//!
//! 1. `remove_duplicate_paths` drops geometry re-emitted by conversion
//! 2. `normalize_stroke_colors` collapses strokes onto a light and a dark tone
//! 3. `add_background` places one opaque backdrop under everything
//! 4. `color_code_patterns` recolors X-marks, squares, rectangles and irregular shapes
//! 5. to 8. `detect_*` count each marker color via connected components
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use takeoff::{CancelFlag, Drawing, PipelineBuilder, PipelineConfig};
//!
//! let pipeline = PipelineBuilder::from_config(&PipelineConfig::default()).build();
//! let mut drawing = Drawing::load("drawing.json")?;
//! let run = pipeline.run(&mut drawing, &CancelFlag::new());
//! println!("{}", run.summary());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Managed Runs
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use takeoff::{FileArtifactStore, JsonFileRecordStore, PipelineConfig, ProcessOptions, TakeoffManager};
//!
//! let manager = TakeoffManager::new(
//!     PipelineConfig::default(),
//!     Arc::new(FileArtifactStore::new("artifacts")),
//!     Arc::new(JsonFileRecordStore::new("records")?),
//! )?;
//! let report = manager.process("upload-1", &ProcessOptions::default())?;
//! println!("{}", serde_json::to_string_pretty(&report.record)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod error;
pub mod types;
pub mod marker;
pub mod config;
pub mod traits;
pub mod progress;
pub mod algorithms;
pub mod pipeline;
pub mod record;
pub mod store;
pub mod artifacts;
pub mod io;
pub mod manager;

pub use error::{Result, TakeoffError};
pub use types::{BoundingBox, Color, Drawing, Element, ElementId, ElementRole, Geometry, Style, Subpath};
pub use marker::{DetectedComponent, DetectionResult, MarkerCategory};
pub use config::{DetectorExecution, PipelineConfig};
pub use traits::{DetectorStage, ProgressSink, TransformStage};
pub use progress::{BroadcastProgress, CollectingProgress, NullProgress, TracingProgress};
pub use algorithms::{
    BackgroundCompositor, ClassificationRules, ColorMaskDetector, PathDeduplicator, PatternColorizer,
    Raster, Renderer, StyleNormalizer, SymbolMatch,
};
pub use pipeline::{CancelFlag, Pipeline, PipelineBuilder, PipelineRun, StageOutcome, StageState};
pub use record::{ArtifactRef, CategoryCount, RecordStatus, ResultAggregator, ResultRecord, TakeoffCounts, UploadMetadata};
pub use store::{JsonFileRecordStore, MemoryRecordStore, RecordStore};
pub use artifacts::{ArtifactStore, FileArtifactStore, MemoryArtifactStore};
pub use io::{counts_from_geojson, detections_to_geojson, detections_to_geojson_string, save_detections_geojson};
pub use manager::{ProcessOptions, TakeoffCommand, TakeoffManager, TakeoffReport};
