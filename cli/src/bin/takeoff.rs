use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use takeoff::{
    CancelFlag, FileArtifactStore, JsonFileRecordStore, PipelineConfig, ProcessOptions, RecordStore,
    TakeoffCommand, TakeoffError, TakeoffManager, TakeoffReport, save_detections_geojson,
};
use takeoff_cli::{load_config, read_text, results_json, write_default_config};
use tracing::{error, info, warn};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(author, version, about = "Count takeoff markers on converted drawings", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline for an upload and store its result record
    Run {
        #[arg(short, long)]
        upload_id: String,
        /// Directory holding <upload_id>/drawing.json and friends
        #[arg(short, long, default_value = "artifacts")]
        artifacts: PathBuf,
        /// Directory of result records
        #[arg(short, long, default_value = "records")]
        records: PathBuf,
        /// Pipeline configuration (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Use this OCR text instead of <upload_id>/ocr.txt
        #[arg(long)]
        ocr_text: Option<PathBuf>,
        /// Run the four detectors concurrently
        #[arg(long)]
        concurrent: bool,
        /// Also write detected components as GeoJSON
        #[arg(long)]
        geojson: Option<PathBuf>,
        #[arg(long)]
        file_name: Option<String>,
        #[arg(long)]
        company: Option<String>,
        #[arg(long)]
        jobsite: Option<String>,
    },
    /// Print the stored result record of an upload
    Results {
        #[arg(short, long)]
        upload_id: String,
        #[arg(short, long, default_value = "records")]
        records: PathBuf,
    },
    /// Reset an upload's record after its results were delivered
    Reset {
        #[arg(short, long)]
        upload_id: String,
        #[arg(short, long, default_value = "records")]
        records: PathBuf,
    },
    /// Print the JSON schema of the configuration or of the command set
    Schema {
        #[arg(long)]
        commands: bool,
    },
    /// Write the default configuration to a .toml or .json file
    InitConfig {
        #[arg(short, long, default_value = "takeoff.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            upload_id,
            artifacts,
            records,
            config,
            ocr_text,
            concurrent,
            geojson,
            file_name,
            company,
            jobsite,
        } => {
            let config = load_config(config.as_deref())?;
            let options = ProcessOptions {
                file_name,
                company,
                jobsite,
                extracted_text: read_text(ocr_text.as_deref())?,
            };
            let manager = TakeoffManager::new(
                config,
                Arc::new(FileArtifactStore::new(&artifacts)),
                Arc::new(JsonFileRecordStore::new(&records)?),
            )?;

            let outcome = if concurrent {
                manager.process_concurrent(&upload_id, &options, &CancelFlag::new()).await
            } else {
                manager.process_async(&upload_id, &options, &CancelFlag::new()).await
            };
            let report = match outcome {
                Ok(report) => report,
                Err(TakeoffError::Persistence { report, message, .. }) => {
                    // The counts were computed, so show them before failing
                    error!("Result record was not saved: {message}");
                    print_report(&report)?;
                    return Err(TakeoffError::Persistence {
                        upload_id: upload_id.clone(),
                        message,
                        report,
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(path) = geojson {
                save_detections_geojson(&path, report.run.detections.values())?;
                info!("Wrote detections to {}", path.display());
            }
            if !report.run.succeeded() {
                warn!("{}", report.run.summary());
            }
            print_report(&report)?;
        }
        Commands::Results { upload_id, records } => {
            let store = JsonFileRecordStore::new(&records)?;
            let record = store.load(&upload_id)?;
            println!("{}", results_json(&upload_id, record.as_ref())?);
        }
        Commands::Reset { upload_id, records } => {
            let store = JsonFileRecordStore::new(&records)?;
            store.reset(&upload_id)?;
            info!("Reset record for upload {upload_id}");
        }
        Commands::Schema { commands } => {
            let schema = if commands {
                serde_json::to_string_pretty(&TakeoffCommand::schema())?
            } else {
                serde_json::to_string_pretty(&PipelineConfig::schema())?
            };
            println!("{schema}");
        }
        Commands::InitConfig { output } => {
            write_default_config(&output)?;
            info!("Wrote default configuration to {}", output.display());
        }
    }

    Ok(())
}

fn print_report(report: &TakeoffReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&report.record)?);
    Ok(())
}
