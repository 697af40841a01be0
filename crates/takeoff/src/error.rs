use thiserror::Error;

use crate::{manager::TakeoffReport, marker::MarkerCategory};

#[derive(Error, Debug)]
pub enum TakeoffError {
    #[error("Missing prerequisite for upload {upload_id}: {}", missing.join(", "))]
    MissingPrerequisite {
        upload_id: String,
        missing: Vec<String>,
    },

    #[error("Stage {stage} failed: {message}")]
    StageTransform { stage: String, message: String },

    #[error("Detector {stage} ({category}) failed: {message}")]
    Detector {
        stage: String,
        category: MarkerCategory,
        message: String,
    },

    #[error("Failed to persist result record for upload {upload_id}: {message}")]
    Persistence {
        upload_id: String,
        message: String,
        /// Results computed before the write failed
        report: Box<TakeoffReport>,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("A run is already active for upload {0}")]
    RunInProgress(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid drawing: {0}")]
    InvalidDrawing(String),

    #[error("Invalid upload id '{0}'")]
    InvalidUploadId(String),

    #[error("Record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Failed to encode image: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
}

impl TakeoffError {
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StageTransform {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TakeoffError>;
