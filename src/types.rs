//! Data types passed between pipeline stages.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Classification of a location in the simulator's location file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    Town,
    ConflictZone,
    #[serde(rename = "idpcamp")]
    IdpCamp,
}

impl LocationType {
    pub const fn as_str(self) -> &'static str {
        match self {
            LocationType::Town => "town",
            LocationType::ConflictZone => "conflict_zone",
            LocationType::IdpCamp => "idpcamp",
        }
    }
}

/// One row of `locations.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationRecord {
    pub name: String,
    pub region: String,
    pub country: String,
    pub latitude: f64,
    pub longitude: f64,
    pub location_type: LocationType,
    /// Days between the scenario start and the location's most recent
    /// qualifying event. Camps carry 0.
    pub conflict_date: Option<u32>,
    pub population: u64,
}

/// Administrative granularity used to group conflict events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AdminLevel {
    #[default]
    Location,
    Admin1,
    Admin2,
    Admin3,
}

/// One reported conflict event.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictEventRecord {
    pub event_date: NaiveDate,
    pub country: String,
    pub admin1: String,
    pub admin2: String,
    pub admin3: String,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub fatalities: Option<u32>,
}

impl ConflictEventRecord {
    /// Name of the administrative unit this event belongs to.
    pub fn unit(&self, level: AdminLevel) -> &str {
        match level {
            AdminLevel::Location => &self.location,
            AdminLevel::Admin1 => &self.admin1,
            AdminLevel::Admin2 => &self.admin2,
            AdminLevel::Admin3 => &self.admin3,
        }
    }
}

/// Name to population lookup.
#[derive(Debug, Clone, Default)]
pub struct PopulationTable {
    entries: HashMap<String, u64>,
}

impl PopulationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, population: u64) {
        self.entries.insert(name.into(), population);
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.entries.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, u64)> for PopulationTable {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Estimated conflict start and duration for one conflict zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictInfoRecord {
    pub name: String,
    pub country: String,
    pub event_count: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Estimated occupancy duration in days.
    pub conflict_date: u32,
}

/// Day by conflict-zone occupancy matrix backing `conflicts.csv`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictTimelineMatrix {
    pub period: u32,
    pub zones: Vec<String>,
    /// `cells[day][zone]`
    pub cells: Vec<Vec<u8>>,
}

impl ConflictTimelineMatrix {
    pub fn zeroed(period: u32, zones: Vec<String>) -> Self {
        let width = zones.len();
        Self {
            period,
            zones,
            cells: vec![vec![0; width]; period as usize + 1],
        }
    }

    pub fn column(&self, zone: usize) -> impl Iterator<Item = u8> + '_ {
        self.cells.iter().map(move |row| row[zone])
    }
}

/// Descriptor of one camp-survey round, as listed in the rounds manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampSurveyRound {
    pub round_number: u32,
    #[serde(with = "dmy")]
    pub covered_from: NaiveDate,
    #[serde(with = "dmy")]
    pub covered_to: NaiveDate,
    pub source_url: String,
    #[serde(rename = "total_IDP_conflict_number")]
    pub total_idp_conflict_number: u64,
    /// Extract path relative to the input root.
    pub extract: String,
}

/// A camp's figures for a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundObservation {
    pub population: u64,
    pub survey_date: NaiveDate,
}

/// One camp reconciled across all retained rounds.
#[derive(Debug, Clone, PartialEq)]
pub struct CampMergedRow {
    pub site_id: String,
    pub name: String,
    pub region: String,
    pub country: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub rounds: BTreeMap<u32, RoundObservation>,
}

impl CampMergedRow {
    pub fn population_in(&self, round: u32) -> Option<u64> {
        self.rounds.get(&round).map(|o| o.population)
    }
}

/// One row of `routes.csv`. `(A, B)` and `(B, A)` are never both emitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteEdge {
    pub name1: String,
    pub name2: String,
    pub distance: f64,
    pub forced_redirection: u8,
}

/// A dated displacement count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPoint {
    pub date: NaiveDate,
    pub refugee_numbers: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CampSeries {
    pub camp_name: String,
    pub file_name: String,
    pub points: Vec<ValidationPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationDataset {
    pub totals: Vec<ValidationPoint>,
    pub camps: Vec<CampSeries>,
}

/// `dd-mm-yyyy` serde representation used by the rounds manifest.
mod dmy {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%d-%m-%Y";

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDate::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_type_strings() {
        assert_eq!(LocationType::Town.as_str(), "town");
        assert_eq!(LocationType::ConflictZone.as_str(), "conflict_zone");
        assert_eq!(LocationType::IdpCamp.as_str(), "idpcamp");
    }

    #[test]
    fn test_round_manifest_entry_deserializes() {
        let json = r#"{
            "round_number": 33,
            "covered_from": "01-05-2023",
            "covered_to": "29-06-2023",
            "source_url": "https://example.org/round-33",
            "total_IDP_conflict_number": 1900920,
            "extract": "rounds/round33.csv"
        }"#;
        let round: CampSurveyRound = serde_json::from_str(json).unwrap();
        assert_eq!(round.round_number, 33);
        assert_eq!(round.covered_to, NaiveDate::from_ymd_opt(2023, 6, 29).unwrap());
        assert_eq!(round.total_idp_conflict_number, 1_900_920);
    }

    #[test]
    fn test_timeline_zeroed_shape() {
        let m = ConflictTimelineMatrix::zeroed(4, vec!["A".into(), "B".into()]);
        assert_eq!(m.cells.len(), 5);
        assert!(m.cells.iter().all(|r| r.len() == 2 && r.iter().all(|c| *c == 0)));
    }
}
