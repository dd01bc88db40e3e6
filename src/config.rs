//! Scenario parameters and filesystem roots for a single run.

use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::dates::{days_between, parse_dmy};
use crate::error::{PipelineError, Result};
use crate::types::AdminLevel;

pub const DEFAULT_CONFLICT_THRESHOLD: u32 = 100;
pub const DEFAULT_ADDED_CONFLICT_DAYS: u32 = 7;
pub const DEFAULT_ROWS_SHOWN: usize = 10;
pub const DEFAULT_TOP_ROUTES: usize = 3;
pub const DEFAULT_POPULATION_THRESHOLD: u64 = 10_000;

/// Filesystem roots. Every path a run touches is derived from these.
#[derive(Debug, Clone, Serialize)]
pub struct RunPaths {
    /// Source extracts: events, population table, rounds manifest.
    pub input_root: PathBuf,
    /// Parent of per-run validation directories.
    pub validation_root: PathBuf,
    /// Parent of per-run simulator input directories.
    pub output_root: PathBuf,
}

impl RunPaths {
    pub fn new(
        input_root: impl Into<PathBuf>,
        validation_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            validation_root: validation_root.into(),
            output_root: output_root.into(),
        }
    }

    pub fn input(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.input_root.join(relative)
    }
}

/// Thresholds steering the location classifier.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierSettings {
    pub granularity: AdminLevel,
    /// Units whose current event has at most this many fatalities are
    /// dropped. `None` keeps every unit.
    pub fatalities_threshold: Option<u32>,
    pub conflict_threshold: u32,
    pub rows_shown: usize,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            granularity: AdminLevel::Location,
            fatalities_threshold: None,
            conflict_threshold: DEFAULT_CONFLICT_THRESHOLD,
            rows_shown: DEFAULT_ROWS_SHOWN,
        }
    }
}

/// Fully validated parameters of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioConfig {
    pub country: String,
    pub start_date: NaiveDate,
    /// Last day of source data retrieval.
    pub end_date: NaiveDate,
    /// Last simulated day; defaults to `end_date`.
    pub simulation_end_date: NaiveDate,
    pub classifier: ClassifierSettings,
    pub added_conflict_days: u32,
    pub top_routes: usize,
    pub population_threshold: u64,
}

impl ScenarioConfig {
    /// Builds a config from `dd-mm-yyyy` dates, rejecting inverted windows.
    pub fn new(
        country: &str,
        start_date: &str,
        end_date: &str,
        simulation_end_date: Option<&str>,
    ) -> Result<Self> {
        let start = parse_dmy(start_date)?;
        let end = parse_dmy(end_date)?;
        let simulation_end = match simulation_end_date {
            Some(d) => parse_dmy(d)?,
            None => end,
        };

        if country.trim().is_empty() {
            return Err(PipelineError::InvalidScenario("country must not be empty".into()));
        }
        if start > end {
            return Err(PipelineError::InvalidScenario(
                "start date is after the end date of fetching".into(),
            ));
        }
        if start > simulation_end {
            return Err(PipelineError::InvalidScenario(
                "start date is after the simulation end date".into(),
            ));
        }

        Ok(Self {
            country: country.trim().to_string(),
            start_date: start,
            end_date: end,
            simulation_end_date: simulation_end,
            classifier: ClassifierSettings::default(),
            added_conflict_days: DEFAULT_ADDED_CONFLICT_DAYS,
            top_routes: DEFAULT_TOP_ROUTES,
            population_threshold: DEFAULT_POPULATION_THRESHOLD,
        })
    }

    /// Number of simulated days after the start day.
    pub fn period(&self) -> u32 {
        days_between(self.start_date, self.simulation_end_date) as u32
    }

    /// Directory name shared by the input and validation directories of a
    /// run, e.g. `ethiopia2023_2024-01-11_09-30-00`.
    pub fn run_name(&self, timestamp: &str) -> String {
        format!(
            "{}{}_{}",
            self.country.to_lowercase().replace(' ', "_"),
            self.start_date.year(),
            timestamp
        )
    }
}
