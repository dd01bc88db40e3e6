//! CLI entry point for the conflict_synth tool.
//!
//! Provides subcommands for building a simulator input set, retrieving
//! conflict events, running the simulator and uploading a run to S3.

mod infra;
mod services;

use crate::infra::acled::client::AcledClient;
use crate::infra::flee::command::CommandSimulator;
use crate::services::event_source::{EventQuery, EventSource};
use crate::services::simulator::{SimulationRequest, Simulator};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use conflict_synth::config::{
    DEFAULT_ADDED_CONFLICT_DAYS, DEFAULT_CONFLICT_THRESHOLD, DEFAULT_POPULATION_THRESHOLD,
    DEFAULT_ROWS_SHOWN, DEFAULT_TOP_ROUTES, RunPaths, ScenarioConfig,
};
use conflict_synth::error::{
    Diagnostics, PipelineError, Result as PipelineResult, Stage, StageContext,
};
use conflict_synth::output::{print_json, print_pretty, write_events, write_json};
use conflict_synth::parser::load_population;
use conflict_synth::pipeline::{self, EVENTS_FILE, POPULATION_FILE, RunInputs};
use conflict_synth::publish::{upload_dir, write_json_to_s3};
use conflict_synth::types::AdminLevel;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const ACLED_SOURCE: &str = "ACLED";

#[derive(Parser)]
#[command(name = "conflict_synth")]
#[command(about = "Builds displacement-simulator input sets from conflict data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct ScenarioArgs {
    /// Country name as used by the event provider
    #[arg(long)]
    country: String,

    /// First day of the scenario (dd-mm-yyyy)
    #[arg(long)]
    start_date: String,

    /// Last day of event retrieval (dd-mm-yyyy)
    #[arg(long)]
    end_date: String,

    /// Last simulated day (dd-mm-yyyy), defaults to the end date
    #[arg(long)]
    simulation_end_date: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize a simulator input set and validation data for a scenario
    Build {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// Directory holding acled.csv, population.csv and rounds.json
        #[arg(short, long, default_value = "conflict_data")]
        input_root: PathBuf,

        /// Parent directory of generated input sets
        #[arg(short, long, default_value = "conflict_input")]
        output_root: PathBuf,

        /// Parent directory of generated validation sets
        #[arg(short, long, default_value = "conflict_validation")]
        validation_root: PathBuf,

        /// Administrative level events are grouped by
        #[arg(long, value_enum, default_value_t = AdminLevel::Location)]
        granularity: AdminLevel,

        /// Drop units whose latest event has at most this many fatalities
        #[arg(long)]
        fatalities_threshold: Option<u32>,

        /// Days after the scenario start up to which a location counts as a town
        #[arg(long, default_value_t = DEFAULT_CONFLICT_THRESHOLD)]
        conflict_threshold: u32,

        /// Locations kept per class, and camps kept
        #[arg(long, default_value_t = DEFAULT_ROWS_SHOWN)]
        rows_shown: usize,

        /// Days added to every estimated conflict duration
        #[arg(long, default_value_t = DEFAULT_ADDED_CONFLICT_DAYS)]
        added_conflict_days: u32,

        /// Nearest neighbours connected per location
        #[arg(long, default_value_t = DEFAULT_TOP_ROUTES)]
        top_routes: usize,

        /// Population entries below this are ignored
        #[arg(long, default_value_t = DEFAULT_POPULATION_THRESHOLD)]
        population_threshold: u64,

        /// Retrieve events from ACLED instead of reading acled.csv
        #[arg(long, default_value_t = false)]
        fetch_events: bool,
    },
    /// Retrieve conflict events from ACLED and store them as CSV
    FetchEvents {
        #[command(flatten)]
        scenario: ScenarioArgs,

        /// CSV file to write
        #[arg(short, long, default_value = "conflict_data/acled.csv")]
        output: PathBuf,
    },
    /// Run the external simulator on a generated input set
    Simulate {
        /// Generated input directory
        #[arg(long)]
        input_dir: PathBuf,

        /// Matching validation directory
        #[arg(long)]
        validation_dir: PathBuf,

        /// Simulator settings file
        #[arg(long)]
        settings_file: PathBuf,

        /// Optional: file to write the simulator result to
        #[arg(long)]
        result_file: Option<PathBuf>,
    },
    /// Upload a generated input set and its validation data to S3
    Publish {
        /// Generated input directory
        #[arg(long)]
        input_dir: PathBuf,

        /// Matching validation directory
        #[arg(long)]
        validation_dir: PathBuf,

        /// S3 bucket name to upload to (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: String,

        /// Optional: Gzip compress files before uploading to S3
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

impl ScenarioArgs {
    fn to_config(&self) -> Result<ScenarioConfig> {
        let config = ScenarioConfig::new(
            &self.country,
            &self.start_date,
            &self.end_date,
            self.simulation_end_date.as_deref(),
        )?;
        Ok(config)
    }

    fn query(&self, config: &ScenarioConfig) -> EventQuery {
        EventQuery {
            country: config.country.clone(),
            start: config.start_date,
            end: config.end_date,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/conflict_synth.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("conflict_synth.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            scenario,
            input_root,
            output_root,
            validation_root,
            granularity,
            fatalities_threshold,
            conflict_threshold,
            rows_shown,
            added_conflict_days,
            top_routes,
            population_threshold,
            fetch_events,
        } => {
            let mut config = scenario.to_config()?;
            config.classifier.granularity = granularity;
            config.classifier.fatalities_threshold = fatalities_threshold;
            config.classifier.conflict_threshold = conflict_threshold;
            config.classifier.rows_shown = rows_shown;
            config.added_conflict_days = added_conflict_days;
            config.top_routes = top_routes;
            config.population_threshold = population_threshold;

            let paths = RunPaths::new(input_root, validation_root, output_root);
            let events = if fetch_events {
                Some(scenario.query(&config))
            } else {
                None
            };
            build(&config, &paths, events).await?;
        }
        Commands::FetchEvents { scenario, output } => {
            let config = scenario.to_config()?;
            let client = AcledClient::from_env()?;
            let batch = client.fetch_events(&scenario.query(&config)).await?;

            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            write_events(&output, &batch.events)
                .with_context(|| format!("Failed to write {}", output.display()))?;

            info!(
                path = %output.display(),
                events = batch.events.len(),
                oldest = ?batch.provenance.oldest_event,
                latest = ?batch.provenance.latest_event,
                last_update_hours = ?batch.last_update_hours,
                "Events stored"
            );
        }
        Commands::Simulate {
            input_dir,
            validation_dir,
            settings_file,
            result_file,
        } => {
            let simulator = CommandSimulator::from_env()?;
            let request = SimulationRequest {
                input_dir,
                settings_file,
                validation_dir,
            };
            let outcome = simulator.run(&request).await?;

            if let Some(path) = result_file {
                write_json(&path, &outcome)?;
                info!(path = %path.display(), "Simulation result written");
            }
            if !outcome.is_completed() {
                bail!("simulation failed: {:?}", outcome);
            }
        }
        Commands::Publish {
            input_dir,
            validation_dir,
            s3_bucket,
            gzip,
        } => {
            publish(&input_dir, &validation_dir, &s3_bucket, gzip).await?;
        }
    }

    Ok(())
}

/// Loads (or retrieves) the sources and writes one run.
#[tracing::instrument(skip_all, fields(country = %config.country))]
async fn build(config: &ScenarioConfig, paths: &RunPaths, fetch: Option<EventQuery>) -> Result<()> {
    let timestamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let mut diagnostics = Diagnostics::new();

    let loaded = match &fetch {
        None => RunInputs::load(paths, config, &mut diagnostics),
        Some(query) => match AcledClient::from_env() {
            Ok(client) => fetch_inputs(&client, query, config, paths, &mut diagnostics).await,
            Err(e) => Err(retrieval_failed(ACLED_SOURCE, &e)),
        },
    };
    let inputs = record_load_failure(paths, config, &timestamp, loaded)?;

    let outcome = pipeline::run(config, paths, inputs, diagnostics, &timestamp)?;

    print_pretty(&outcome.stats);
    print_json(&outcome.stats)?;
    for d in outcome.diagnostics.entries() {
        warn!(stage = %d.stage, "{}", d.message);
    }
    info!(
        run = %outcome.run_name,
        input_dir = %outcome.input_dir.display(),
        validation_dir = %outcome.validation_dir.display(),
        "Build finished"
    );
    Ok(())
}

/// A failed retrieval, attributed to the normalization stage.
fn retrieval_failed(source_name: &str, err: &anyhow::Error) -> PipelineError {
    PipelineError::Stage {
        stage: Stage::Normalize,
        source: Box::new(PipelineError::Retrieval {
            source_name: source_name.to_string(),
            message: format!("{err:#}"),
        }),
    }
}

/// Appends a failure row to the run log when the sources could not be
/// loaded. Later failures are logged by [`pipeline::run`].
fn record_load_failure(
    paths: &RunPaths,
    config: &ScenarioConfig,
    timestamp: &str,
    loaded: PipelineResult<RunInputs>,
) -> PipelineResult<RunInputs> {
    if let Err(e) = &loaded {
        pipeline::record_failure(paths, config, &config.run_name(timestamp), e);
    }
    loaded
}

/// Retrieves events through `source` and reads the remaining sources from
/// the input root.
async fn fetch_inputs<S: EventSource>(
    source: &S,
    query: &EventQuery,
    config: &ScenarioConfig,
    paths: &RunPaths,
    diagnostics: &mut Diagnostics,
) -> PipelineResult<RunInputs> {
    let batch = source
        .fetch_events(query)
        .await
        .map_err(|e| retrieval_failed(ACLED_SOURCE, &e))?;

    // keep a copy next to the other sources so the run can be rebuilt offline
    let events_path = paths.input(EVENTS_FILE);
    if let Err(e) = write_events(&events_path, &batch.events) {
        warn!(path = %events_path.display(), error = %e, "Failed to store retrieved events");
    }

    let population = load_population(&paths.input(POPULATION_FILE), config.population_threshold)
        .in_stage(Stage::Classify)?;
    let rounds = pipeline::load_rounds(paths, config, diagnostics)?;

    Ok(RunInputs {
        events: batch.events,
        population,
        rounds,
        provenance: Some(batch.provenance),
    })
}

/// Uploads both directories of a run under `input/<run>` and
/// `validation/<run>`, then a small manifest describing the upload.
#[tracing::instrument(skip(input_dir, validation_dir), fields(input_dir = %input_dir.display()))]
async fn publish(
    input_dir: &Path,
    validation_dir: &Path,
    s3_bucket: &str,
    gzip: bool,
) -> Result<()> {
    if s3_bucket.is_empty() {
        info!("S3 bucket not specified, skipping upload");
        return Ok(());
    }
    let run_name = input_dir
        .file_name()
        .and_then(OsStr::to_str)
        .context("input directory has no name")?
        .to_string();

    let config = aws_config::load_from_env().await;
    let client = aws_sdk_s3::Client::new(&config);
    info!(bucket = %s3_bucket, gzip, "S3 upload enabled");

    let input_prefix = format!("input/{run_name}");
    let inputs = upload_dir(&client, s3_bucket, &input_prefix, input_dir, gzip).await?;
    let validation = match upload_dir(
        &client,
        s3_bucket,
        &format!("validation/{run_name}"),
        validation_dir,
        gzip,
    )
    .await
    {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "Validation upload failed");
            return Err(e);
        }
    };

    let manifest = serde_json::json!({
        "run": run_name,
        "uploaded_at": Utc::now(),
        "gzip": gzip,
        "input_objects": inputs,
        "validation_objects": validation,
    });
    write_json_to_s3(&client, s3_bucket, &format!("runs/{run_name}.json"), &manifest).await?;

    info!(inputs, validation, "Run published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conflict_synth::fetch::HttpClient;

    /// Hands every request to reqwest with a scheme it refuses, so the
    /// request fails without any network I/O.
    struct RefusingClient;

    #[async_trait]
    impl HttpClient for RefusingClient {
        async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let _ = req.url_mut().set_scheme("ftp");
            reqwest::Client::new().execute(req).await
        }
    }

    #[tokio::test]
    async fn test_failed_retrieval_is_logged_as_failed_run() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = RunPaths::new(
            tmp.path().join("data"),
            tmp.path().join("validation"),
            tmp.path().join("input"),
        );
        let config = ScenarioConfig::new("Ethiopia", "01-01-2023", "31-03-2023", None).unwrap();
        let client = AcledClient::with_client(RefusingClient, "https://acled.test/acled/read");
        let query = EventQuery {
            country: config.country.clone(),
            start: config.start_date,
            end: config.end_date,
        };
        let mut diagnostics = Diagnostics::new();

        let loaded = fetch_inputs(&client, &query, &config, &paths, &mut diagnostics).await;
        let err = record_load_failure(&paths, &config, "t0", loaded).unwrap_err();

        assert_eq!(err.stage(), Some(Stage::Normalize));
        assert_eq!(err.kind(), "retrieval");
        assert!(err.to_string().contains("ACLED"));
        assert!(!paths.input(EVENTS_FILE).exists());

        let log = std::fs::read_to_string(tmp.path().join("input/runs.csv")).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.contains("ethiopia2023_t0"));
        assert!(log.contains("retrieval"));
        assert!(log.contains("temporal normalization"));
    }

    #[test]
    fn test_missing_credentials_are_a_retrieval_failure() {
        let err = retrieval_failed(ACLED_SOURCE, &anyhow::anyhow!("ACLED_API_KEY must be set"));
        assert_eq!(err.kind(), "retrieval");
        assert_eq!(err.stage(), Some(Stage::Normalize));
        assert!(err.to_string().contains("ACLED_API_KEY"));
    }
}
