use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::ScenarioConfig;
use crate::error::{Diagnostics, PipelineError};
use crate::types::{CampSurveyRound, ConflictEventRecord, LocationRecord, LocationType};

/// One row of the run log (`runs.csv`).
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunStats {
    pub timestamp: DateTime<Utc>,
    pub run_name: Option<String>,
    pub country: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub simulation_end_date: Option<NaiveDate>,

    // inputs
    pub events: usize,
    pub population_entries: usize,
    pub survey_rounds: usize,

    // outputs
    pub towns: usize,
    pub conflict_zones: usize,
    pub camps: usize,
    pub routes: usize,
    pub period: u32,
    pub diagnostics: usize,

    // error tracking
    pub error_stage: Option<String>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl RunStats {
    pub fn from_locations(locations: &[LocationRecord]) -> Self {
        let mut s = RunStats {
            timestamp: Utc::now(),
            ..Default::default()
        };

        for l in locations {
            match l.location_type {
                LocationType::Town => s.towns += 1,
                LocationType::ConflictZone => s.conflict_zones += 1,
                LocationType::IdpCamp => s.camps += 1,
            }
        }

        s
    }

    /// Create a failure record from a pipeline error
    pub fn from_error(error: &PipelineError) -> Self {
        RunStats {
            timestamp: Utc::now(),
            error_stage: error.stage().map(|s| s.to_string()),
            error_type: Some(error.kind().to_string()),
            error_message: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Set scenario metadata
    pub fn with_scenario_info(mut self, scenario: &ScenarioConfig, run_name: &str) -> Self {
        self.run_name = Some(run_name.to_string());
        self.country = Some(scenario.country.clone());
        self.start_date = Some(scenario.start_date);
        self.simulation_end_date = Some(scenario.simulation_end_date);
        self.period = scenario.period();
        self
    }

    pub fn succeeded(&self) -> bool {
        self.error_type.is_none()
    }
}

/// Where the conflict events of a run came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventProvenance {
    pub source: String,
    pub retrieved_at: DateTime<Utc>,
    pub event_count: usize,
    pub oldest_event: Option<NaiveDate>,
    pub latest_event: Option<NaiveDate>,
}

impl EventProvenance {
    pub fn from_events(source: &str, events: &[ConflictEventRecord]) -> Self {
        EventProvenance {
            source: source.to_string(),
            retrieved_at: Utc::now(),
            event_count: events.len(),
            oldest_event: events.iter().map(|e| e.event_date).min(),
            latest_event: events.iter().map(|e| e.event_date).max(),
        }
    }
}

/// Contents of `run.json`, written next to the simulator inputs.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary<'a> {
    pub stats: &'a RunStats,
    pub scenario: &'a ScenarioConfig,
    pub provenance: Option<&'a EventProvenance>,
    pub survey_rounds: &'a [CampSurveyRound],
    pub latest_round: Option<u32>,
    pub diagnostics: &'a Diagnostics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Stage, StageContext};

    fn location(location_type: LocationType) -> LocationRecord {
        LocationRecord {
            name: "X".into(),
            region: String::new(),
            country: "Mali".into(),
            latitude: 0.0,
            longitude: 0.0,
            location_type,
            conflict_date: Some(0),
            population: 0,
        }
    }

    #[test]
    fn test_from_locations_counts_types() {
        let stats = RunStats::from_locations(&[
            location(LocationType::Town),
            location(LocationType::Town),
            location(LocationType::ConflictZone),
            location(LocationType::IdpCamp),
        ]);

        assert_eq!(stats.towns, 2);
        assert_eq!(stats.conflict_zones, 1);
        assert_eq!(stats.camps, 1);
        assert!(stats.succeeded());
    }

    #[test]
    fn test_from_error_records_stage_and_kind() {
        let err = Err::<(), _>(PipelineError::UnknownSchema { round: 4 })
            .in_stage(Stage::Survey)
            .unwrap_err();
        let stats = RunStats::from_error(&err);

        assert_eq!(stats.error_stage.as_deref(), Some("camp survey reconciliation"));
        assert_eq!(stats.error_type.as_deref(), Some("unknown_schema"));
        assert!(!stats.succeeded());
    }

    #[test]
    fn test_with_scenario_info() {
        let scenario = ScenarioConfig::new("Mali", "01-01-2023", "31-01-2023", None).unwrap();
        let stats = RunStats::default().with_scenario_info(&scenario, "mali2023_x");
        assert_eq!(stats.run_name.as_deref(), Some("mali2023_x"));
        assert_eq!(stats.period, 30);
    }

    #[test]
    fn test_provenance_event_range() {
        let mk = |d: (i32, u32, u32)| ConflictEventRecord {
            event_date: NaiveDate::from_ymd_opt(d.0, d.1, d.2).unwrap(),
            country: "Mali".into(),
            admin1: String::new(),
            admin2: String::new(),
            admin3: String::new(),
            location: "Gao".into(),
            latitude: 16.2,
            longitude: -0.04,
            fatalities: None,
        };
        let p = EventProvenance::from_events("acled.csv", &[mk((2023, 3, 1)), mk((2023, 1, 5))]);
        assert_eq!(p.event_count, 2);
        assert_eq!(p.oldest_event, NaiveDate::from_ymd_opt(2023, 1, 5));
        assert_eq!(p.latest_event, NaiveDate::from_ymd_opt(2023, 3, 1));
    }
}
