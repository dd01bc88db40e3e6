//! End-to-end run: loads the source extracts, drives every stage in order
//! and publishes the output set atomically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::classifier::classify_locations;
use crate::config::{RunPaths, ScenarioConfig};
use crate::error::{Diagnostics, PipelineError, Result, Stage, StageContext};
use crate::output::{self, append_record};
use crate::parser::{load_events, load_population, load_rounds_manifest, load_table};
use crate::routes::synthesize_routes;
use crate::stats::{EventProvenance, RunStats, RunSummary};
use crate::survey::{LoadedRound, Reconciliation, reconcile_camps, select_rounds};
use crate::timeline::{build_timeline, estimate_conflict_info};
use crate::types::{
    ConflictEventRecord, ConflictInfoRecord, ConflictTimelineMatrix, LocationRecord,
    LocationType, PopulationTable, RouteEdge, ValidationDataset,
};
use crate::validation::build_validation;

pub const EVENTS_FILE: &str = "acled.csv";
pub const POPULATION_FILE: &str = "population.csv";
pub const ROUNDS_MANIFEST_FILE: &str = "rounds.json";
pub const RUN_LOG_FILE: &str = "runs.csv";

const PARTIAL_SUFFIX: &str = ".partial";

/// Source data of one run, fully loaded.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    pub events: Vec<ConflictEventRecord>,
    pub population: PopulationTable,
    /// Survey rounds inside the scenario window, with their extracts.
    pub rounds: Vec<LoadedRound>,
    pub provenance: Option<EventProvenance>,
}

impl RunInputs {
    /// Reads `acled.csv`, `population.csv` and `rounds.json` (plus the
    /// extracts it names) from the input root. A missing manifest means no
    /// camp data.
    pub fn load(
        paths: &RunPaths,
        scenario: &ScenarioConfig,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self> {
        let events_path = paths.input(EVENTS_FILE);
        let events = load_events(&events_path).in_stage(Stage::Normalize)?;
        let provenance = EventProvenance::from_events(&events_path.display().to_string(), &events);

        let population = load_population(
            &paths.input(POPULATION_FILE),
            scenario.population_threshold,
        )
        .in_stage(Stage::Classify)?;

        let rounds = load_rounds(paths, scenario, diagnostics)?;

        Ok(Self {
            events,
            population,
            rounds,
            provenance: Some(provenance),
        })
    }
}

/// Loads the extracts of the rounds that fall inside the scenario window.
pub fn load_rounds(
    paths: &RunPaths,
    scenario: &ScenarioConfig,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<LoadedRound>> {
    let manifest_path = paths.input(ROUNDS_MANIFEST_FILE);
    if !manifest_path.exists() {
        diagnostics.push(
            Stage::Survey,
            format!("no rounds manifest at {}", manifest_path.display()),
        );
        return Ok(Vec::new());
    }

    let manifest = load_rounds_manifest(&manifest_path).in_stage(Stage::Survey)?;
    select_rounds(&manifest, scenario.start_date, scenario.end_date)
        .into_iter()
        .map(|descriptor| -> Result<LoadedRound> {
            let table = load_table(&paths.input(&descriptor.extract)).in_stage(Stage::Survey)?;
            Ok(LoadedRound { descriptor, table })
        })
        .collect()
}

/// Everything the stages produce for one run, before anything is written.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub events: usize,
    pub population_entries: usize,
    /// Towns, conflict zones, then camps.
    pub locations: Vec<LocationRecord>,
    pub conflict_info: Vec<ConflictInfoRecord>,
    pub timeline: ConflictTimelineMatrix,
    pub reconciliation: Reconciliation,
    pub routes: Vec<RouteEdge>,
    pub validation: ValidationDataset,
    pub diagnostics: Diagnostics,
}

/// Keeps events of the scenario country dated inside
/// `[start_date, end_date]`.
pub fn normalize_events(
    events: Vec<ConflictEventRecord>,
    scenario: &ScenarioConfig,
    diagnostics: &mut Diagnostics,
) -> Vec<ConflictEventRecord> {
    let total = events.len();
    let kept: Vec<ConflictEventRecord> = events
        .into_iter()
        .filter(|e| e.country.trim().eq_ignore_ascii_case(&scenario.country))
        .filter(|e| e.event_date >= scenario.start_date && e.event_date <= scenario.end_date)
        .collect();

    if kept.len() < total {
        diagnostics.push(
            Stage::Normalize,
            format!(
                "{} of {total} events fall outside {} / {}..{} and were ignored",
                total - kept.len(),
                scenario.country,
                scenario.start_date,
                scenario.end_date
            ),
        );
    }
    kept
}

/// Runs every stage in order. Nothing touches the filesystem.
#[tracing::instrument(skip_all, fields(country = %scenario.country))]
pub fn synthesize(
    scenario: &ScenarioConfig,
    inputs: RunInputs,
    mut diagnostics: Diagnostics,
) -> Result<RunArtifacts> {
    let events = normalize_events(inputs.events, scenario, &mut diagnostics);

    let mut locations = classify_locations(
        &events,
        &inputs.population,
        scenario.start_date,
        &scenario.classifier,
        &mut diagnostics,
    );

    let zones: Vec<String> = locations
        .iter()
        .filter(|l| l.location_type == LocationType::ConflictZone)
        .map(|l| l.name.clone())
        .collect();
    let conflict_info = estimate_conflict_info(
        &events,
        &zones,
        scenario.classifier.granularity,
        &scenario.country,
        scenario.simulation_end_date,
        scenario.added_conflict_days,
        &mut diagnostics,
    );
    let timeline = build_timeline(&conflict_info, scenario.start_date, scenario.period());

    let reconciliation = reconcile_camps(
        inputs.rounds,
        scenario.classifier.rows_shown,
        &scenario.country,
        &mut diagnostics,
    )
    .in_stage(Stage::Survey)?;
    locations.extend(reconciliation.locations.iter().cloned());

    let routes = synthesize_routes(&locations, scenario.top_routes, &mut diagnostics);

    let validation = build_validation(
        &reconciliation.rounds,
        &reconciliation.camps,
        &scenario.country,
        &mut diagnostics,
    );

    Ok(RunArtifacts {
        events: events.len(),
        population_entries: inputs.population.len(),
        locations,
        conflict_info,
        timeline,
        reconciliation,
        routes,
        validation,
        diagnostics,
    })
}

/// Where a successful run landed.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_name: String,
    pub input_dir: PathBuf,
    pub validation_dir: PathBuf,
    pub stats: RunStats,
    pub diagnostics: Diagnostics,
}

/// Synthesizes and writes one run.
///
/// Files are written into `<name>.partial` directories which are renamed
/// once everything is on disk; on failure they are removed. Either way a
/// row is appended to `<output_root>/runs.csv`.
pub fn run(
    scenario: &ScenarioConfig,
    paths: &RunPaths,
    inputs: RunInputs,
    diagnostics: Diagnostics,
    timestamp: &str,
) -> Result<RunOutcome> {
    let run_name = scenario.run_name(timestamp);
    let result = synthesize_and_write(scenario, paths, inputs, diagnostics, &run_name);

    match &result {
        Ok(outcome) => log_run(paths, &outcome.stats),
        Err(e) => record_failure(paths, scenario, &run_name, e),
    }

    result
}

/// Appends a failure row for a run that never produced output.
pub fn record_failure(
    paths: &RunPaths,
    scenario: &ScenarioConfig,
    run_name: &str,
    err: &PipelineError,
) {
    error!(run = %run_name, error = %err, "Run failed");
    log_run(paths, &RunStats::from_error(err).with_scenario_info(scenario, run_name));
}

fn log_run(paths: &RunPaths, stats: &RunStats) {
    let run_log = paths.output_root.join(RUN_LOG_FILE);
    if let Err(e) = append_record(&run_log, stats) {
        warn!(path = %run_log.display(), error = %e, "Failed to append run log");
    }
}

fn synthesize_and_write(
    scenario: &ScenarioConfig,
    paths: &RunPaths,
    inputs: RunInputs,
    diagnostics: Diagnostics,
    run_name: &str,
) -> Result<RunOutcome> {
    let provenance = inputs.provenance.clone();
    let artifacts = synthesize(scenario, inputs, diagnostics)?;

    let mut stats =
        RunStats::from_locations(&artifacts.locations).with_scenario_info(scenario, run_name);
    stats.events = artifacts.events;
    stats.population_entries = artifacts.population_entries;
    stats.survey_rounds = artifacts.reconciliation.rounds.len();
    stats.routes = artifacts.routes.len();
    stats.diagnostics = artifacts.diagnostics.len();

    let input_dir = paths.output_root.join(run_name);
    let validation_dir = paths.validation_root.join(run_name);
    let staging = Staging::prepare(&[input_dir.as_path(), validation_dir.as_path()])
        .in_stage(Stage::Output)?;

    let summary = RunSummary {
        stats: &stats,
        scenario,
        provenance: provenance.as_ref(),
        survey_rounds: &artifacts.reconciliation.rounds,
        latest_round: artifacts.reconciliation.latest_round,
        diagnostics: &artifacts.diagnostics,
    };

    let summary_path = staging.partial[0].join(output::RUN_SUMMARY_FILE);
    let written = write_input_set(&staging.partial[0], scenario, &artifacts)
        .and_then(|()| output::write_json(&summary_path, &summary))
        .and_then(|()| output::write_validation(&staging.partial[1], &artifacts.validation))
        .and_then(|()| staging.commit());

    if let Err(e) = written {
        staging.discard();
        return Err::<RunOutcome, _>(e).in_stage(Stage::Output);
    }

    info!(
        run = %run_name,
        input_dir = %input_dir.display(),
        validation_dir = %validation_dir.display(),
        diagnostics = artifacts.diagnostics.len(),
        "Run written"
    );

    Ok(RunOutcome {
        run_name: run_name.to_string(),
        input_dir,
        validation_dir,
        stats,
        diagnostics: artifacts.diagnostics,
    })
}

fn write_input_set(dir: &Path, scenario: &ScenarioConfig, artifacts: &RunArtifacts) -> Result<()> {
    output::write_locations(&dir.join(output::LOCATIONS_FILE), &artifacts.locations)?;
    output::write_routes(&dir.join(output::ROUTES_FILE), &artifacts.routes)?;
    output::write_conflicts(&dir.join(output::CONFLICTS_FILE), &artifacts.timeline)?;
    output::write_closures(&dir.join(output::CLOSURES_FILE))?;
    output::write_registration_corrections(&dir.join(output::REGISTRATION_CORRECTIONS_FILE))?;
    output::write_sim_period(
        &dir.join(output::SIM_PERIOD_FILE),
        scenario.start_date,
        scenario.period(),
    )?;
    output::write_conflict_info(&dir.join(output::CONFLICT_INFO_FILE), &artifacts.conflict_info)?;
    output::write_camps_merged(
        &dir.join(output::CAMPS_MERGED_FILE),
        &artifacts.reconciliation.camps,
        &artifacts.reconciliation.rounds,
    )?;
    Ok(())
}

/// `<name>.partial` twins of the final run directories.
struct Staging {
    targets: Vec<PathBuf>,
    partial: Vec<PathBuf>,
}

impl Staging {
    fn prepare(targets: &[&Path]) -> Result<Self> {
        if let Some(existing) = targets.iter().find(|t| t.exists()) {
            return Err(PipelineError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", existing.display()),
            )));
        }

        let partial: Vec<PathBuf> = targets
            .iter()
            .map(|target| {
                let mut name = target.as_os_str().to_os_string();
                name.push(PARTIAL_SUFFIX);
                PathBuf::from(name)
            })
            .collect();
        for dir in &partial {
            if dir.exists() {
                fs::remove_dir_all(dir)?;
            }
            fs::create_dir_all(dir)?;
        }

        Ok(Self {
            targets: targets.iter().map(|t| t.to_path_buf()).collect(),
            partial,
        })
    }

    fn commit(&self) -> Result<()> {
        for (i, (from, to)) in self.partial.iter().zip(&self.targets).enumerate() {
            if let Err(e) = fs::rename(from, to) {
                // roll back the directories already renamed
                for (done, back) in self.targets.iter().zip(&self.partial).take(i) {
                    if let Err(rollback) = fs::rename(done, back) {
                        warn!(
                            dir = %done.display(),
                            error = %rollback,
                            "Failed to roll back committed output"
                        );
                    }
                }
                return Err(e.into());
            }
        }
        Ok(())
    }

    fn discard(&self) {
        for dir in &self.partial {
            if dir.exists() {
                if let Err(e) = fs::remove_dir_all(dir) {
                    warn!(dir = %dir.display(), error = %e, "Failed to remove partial output");
                }
            }
        }
    }
}
