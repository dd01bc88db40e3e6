//! Readers for the source extracts: conflict events, population table,
//! survey-round manifest and raw survey extracts.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::dates::parse_event_date;
use crate::error::{PipelineError, Result};
use crate::types::{CampSurveyRound, ConflictEventRecord, PopulationTable};

#[derive(Debug, Deserialize)]
struct RawEvent {
    event_date: String,
    country: String,
    #[serde(default)]
    admin1: String,
    #[serde(default)]
    admin2: String,
    #[serde(default)]
    admin3: String,
    #[serde(default)]
    location: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    fatalities: Option<u32>,
}

/// Decodes conflict events from CSV with an `event_date, country, admin1,
/// admin2, admin3, location, latitude, longitude, fatalities` header.
/// `admin3` and `fatalities` may be absent.
///
/// # Errors
///
/// Rejects the whole extract on the first record whose date or coordinates
/// cannot be decoded, naming the offending record.
pub fn parse_events<R: Read>(reader: R) -> Result<Vec<ConflictEventRecord>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut events = Vec::new();

    for (idx, result) in rdr.deserialize::<RawEvent>().enumerate() {
        let raw = result.map_err(|e| PipelineError::MalformedRecord {
            record: idx + 1,
            reason: e.to_string(),
        })?;
        let event_date = parse_event_date(&raw.event_date).map_err(|e| {
            PipelineError::MalformedRecord {
                record: idx + 1,
                reason: e.to_string(),
            }
        })?;

        events.push(ConflictEventRecord {
            event_date,
            country: raw.country,
            admin1: raw.admin1,
            admin2: raw.admin2,
            admin3: raw.admin3,
            location: raw.location,
            latitude: raw.latitude,
            longitude: raw.longitude,
            fatalities: raw.fatalities,
        });
    }

    debug!(count = events.len(), "Conflict events parsed");
    Ok(events)
}

pub fn load_events(path: &Path) -> Result<Vec<ConflictEventRecord>> {
    parse_events(File::open(path)?)
}

#[derive(Debug, Deserialize)]
struct RawPopulation {
    name: String,
    population: String,
}

/// Parses a population figure, tolerating thousands separators.
/// Unparsable values count as 0.
pub fn parse_population_value(raw: &str) -> u64 {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '_' | ' ' | '\u{a0}'))
        .collect();
    digits
        .parse::<u64>()
        .or_else(|_| {
            digits
                .parse::<f64>()
                .map(|f| if f.is_finite() && f > 0.0 { f as u64 } else { 0 })
        })
        .unwrap_or(0)
}

/// Decodes a `name,population` table, keeping entries at or above
/// `threshold`.
pub fn parse_population<R: Read>(reader: R, threshold: u64) -> Result<PopulationTable> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut table = PopulationTable::new();
    let mut below = 0usize;

    for result in rdr.deserialize::<RawPopulation>() {
        let raw = result?;
        let population = parse_population_value(&raw.population);
        if population < threshold {
            below += 1;
            continue;
        }
        table.insert(raw.name.trim(), population);
    }

    debug!(kept = table.len(), below_threshold = below, "Population table parsed");
    Ok(table)
}

pub fn load_population(path: &Path, threshold: u64) -> Result<PopulationTable> {
    parse_population(File::open(path)?, threshold)
}

/// Reads the JSON list of survey-round descriptors.
pub fn load_rounds_manifest(path: &Path) -> Result<Vec<CampSurveyRound>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// A survey extract as read from disk, before schema detection.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

pub fn parse_table<R: Read>(reader: R) -> Result<RawTable> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut rows = Vec::new();

    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(|f| f.trim().to_string()).collect());
    }

    Ok(RawTable { headers, rows })
}

pub fn load_table(path: &Path) -> Result<RawTable> {
    parse_table(File::open(path)?)
}
