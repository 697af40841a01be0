use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;
use takeoff::{PipelineConfig, ResultRecord, TakeoffError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Takeoff(#[from] TakeoffError),
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Config file {0} does not exist")]
    MissingConfig(PathBuf),
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// Defaults when no path is given; a given path must exist
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, CliError> {
    match path {
        None => Ok(PipelineConfig::default()),
        Some(path) if !path.is_file() => Err(CliError::MissingConfig(path.to_path_buf())),
        Some(path) => Ok(PipelineConfig::from_file(path)?),
    }
}

/// Write the default configuration in the format the extension names
pub fn write_default_config(path: &Path) -> Result<(), CliError> {
    let config = PipelineConfig::default();
    let content = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => config.to_toml()?,
        Some("json") => config.to_json()?,
        _ => return Err(CliError::UnsupportedFileFormat),
    };
    fs::write(path, content)?;
    Ok(())
}

pub fn read_text(path: Option<&Path>) -> Result<Option<String>, CliError> {
    path.map(fs::read_to_string).transpose().map_err(CliError::from)
}

#[derive(Debug, Serialize)]
struct NotFound<'a> {
    upload_id: &'a str,
    status: &'static str,
}

/// JSON answer for a results query: the record, or a `not_found` status
pub fn results_json(upload_id: &str, record: Option<&ResultRecord>) -> Result<String, CliError> {
    let json = match record {
        Some(record) => serde_json::to_string_pretty(record)?,
        None => serde_json::to_string_pretty(&NotFound {
            upload_id,
            status: "not_found",
        })?,
    };
    Ok(json)
}
