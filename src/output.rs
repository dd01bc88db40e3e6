//! Writers for the simulator input files, the validation directory and the
//! run log.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use csv::{QuoteStyle, WriterBuilder};
use serde::Serialize;
use tracing::{debug, info};

use crate::dates::iso;
use crate::error::Result;
use crate::stats::RunStats;
use crate::types::{
    CampMergedRow, CampSurveyRound, ConflictEventRecord, ConflictInfoRecord,
    ConflictTimelineMatrix, LocationRecord, LocationType, RouteEdge, ValidationDataset,
};
use crate::validation::{TOTALS_FILE, data_layout};

pub const LOCATIONS_FILE: &str = "locations.csv";
pub const ROUTES_FILE: &str = "routes.csv";
pub const CONFLICTS_FILE: &str = "conflicts.csv";
pub const CLOSURES_FILE: &str = "closures.csv";
pub const REGISTRATION_CORRECTIONS_FILE: &str = "registration_corrections.csv";
pub const SIM_PERIOD_FILE: &str = "sim_period.csv";
pub const CONFLICT_INFO_FILE: &str = "conflict_info.csv";
pub const CAMPS_MERGED_FILE: &str = "camps_merged.csv";
pub const RUN_SUMMARY_FILE: &str = "run.json";
pub const DATA_LAYOUT_FILE: &str = "data_layout.csv";

const LOCATIONS_HEADER: &str =
    "#name,region,country,latitude,longitude,location_type,conflict_date,population";
const CLOSURES_HEADER: &str = "#closure_type,name1,name2,closure_start,closure_end";

/// Logs run statistics using Rust's debug pretty-print format.
pub fn print_pretty(stats: &RunStats) {
    debug!("{:#?}", stats);
}

/// Logs run statistics as pretty-printed JSON.
pub fn print_json(stats: &RunStats) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(stats)?);
    Ok(())
}

/// Appends a record as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "Appending CSV record");

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(record)?;
    writer.flush()?;

    Ok(())
}

/// Writes `locations.csv`. The header is bare so the simulator reads it as
/// a comment; data rows quote every non-numeric field.
pub fn write_locations(path: &Path, locations: &[LocationRecord]) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "{LOCATIONS_HEADER}")?;

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::NonNumeric)
        .from_writer(file);

    for l in locations {
        writer.write_record([
            l.name.clone(),
            l.region.clone(),
            l.country.clone(),
            l.latitude.to_string(),
            l.longitude.to_string(),
            l.location_type.as_str().to_string(),
            l.conflict_date.map(|d| d.to_string()).unwrap_or_default(),
            l.population.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_routes(path: &Path, routes: &[RouteEdge]) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    for route in routes {
        writer.serialize(route)?;
    }
    if routes.is_empty() {
        writer.write_record(["name1", "name2", "distance", "forced_redirection"])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `conflicts.csv`: a `day` column followed by one 0/1 column per
/// conflict zone, `period + 1` rows.
pub fn write_conflicts(path: &Path, matrix: &ConflictTimelineMatrix) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;

    let header: Vec<&str> = std::iter::once("day")
        .chain(matrix.zones.iter().map(String::as_str))
        .collect();
    writer.write_record(&header)?;

    for (day, row) in matrix.cells.iter().enumerate() {
        let record: Vec<String> = std::iter::once(day.to_string())
            .chain(row.iter().map(u8::to_string))
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_closures(path: &Path) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "{CLOSURES_HEADER}")?;
    Ok(())
}

pub fn write_registration_corrections(path: &Path) -> Result<()> {
    File::create(path)?;
    Ok(())
}

/// Writes the two-row `sim_period.csv`.
pub fn write_sim_period(path: &Path, start: chrono::NaiveDate, length: u32) -> Result<()> {
    let mut file = File::create(path)?;
    writeln!(file, "\"StartDate\",\"{}\"", iso(start))?;
    writeln!(file, "\"Length\",{length}")?;
    Ok(())
}

pub fn write_conflict_info(path: &Path, infos: &[ConflictInfoRecord]) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    for info in infos {
        writer.serialize(info)?;
    }
    if infos.is_empty() {
        writer.write_record([
            "name",
            "country",
            "event_count",
            "start_date",
            "end_date",
            "conflict_date",
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes the reconciled camps as a wide table with a population and a
/// survey date column per retained round, most recent round first.
pub fn write_camps_merged(
    path: &Path,
    camps: &[CampMergedRow],
    rounds: &[CampSurveyRound],
) -> Result<()> {
    let mut numbers: Vec<u32> = rounds.iter().map(|r| r.round_number).collect();
    numbers.sort_unstable_by(|a, b| b.cmp(a));

    let mut writer = WriterBuilder::new().from_path(path)?;

    let mut header: Vec<String> = [
        "site_id",
        "name",
        "region",
        "country",
        "latitude",
        "longitude",
        "location_type",
        "conflict_date",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for n in &numbers {
        header.push(format!("population_round_{n}"));
        header.push(format!("survey_date_round_{n}"));
    }
    writer.write_record(&header)?;

    let opt = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();
    for camp in camps {
        let mut record = vec![
            camp.site_id.clone(),
            camp.name.clone(),
            camp.region.clone(),
            camp.country.clone(),
            opt(camp.latitude),
            opt(camp.longitude),
            LocationType::IdpCamp.as_str().to_string(),
            "0".to_string(),
        ];
        for n in &numbers {
            match camp.rounds.get(n) {
                Some(obs) => {
                    record.push(obs.population.to_string());
                    record.push(iso(obs.survey_date));
                }
                None => {
                    record.push(String::new());
                    record.push(String::new());
                }
            }
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `refugees.csv`, one headerless file per camp and
/// `data_layout.csv` into `dir`.
pub fn write_validation(dir: &Path, dataset: &ValidationDataset) -> Result<()> {
    let mut totals = WriterBuilder::new().from_path(dir.join(TOTALS_FILE))?;
    totals.write_record(["Date", "Refugee_numbers"])?;
    for p in &dataset.totals {
        totals.write_record([iso(p.date), p.refugee_numbers.to_string()])?;
    }
    totals.flush()?;

    for camp in &dataset.camps {
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_path(dir.join(&camp.file_name))?;
        for p in &camp.points {
            writer.write_record([iso(p.date), p.refugee_numbers.to_string()])?;
        }
        writer.flush()?;
    }

    let mut layout = WriterBuilder::new()
        .has_headers(false)
        .from_path(dir.join(DATA_LAYOUT_FILE))?;
    for (name, file) in data_layout(dataset) {
        layout.write_record([name, file])?;
    }
    layout.flush()?;

    debug!(dir = %dir.display(), camps = dataset.camps.len(), "Validation files written");
    Ok(())
}

/// Writes conflict events in the same layout the event reader accepts.
pub fn write_events(path: &Path, events: &[ConflictEventRecord]) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record([
        "event_date",
        "country",
        "admin1",
        "admin2",
        "admin3",
        "location",
        "latitude",
        "longitude",
        "fatalities",
    ])?;
    for e in events {
        writer.write_record([
            iso(e.event_date),
            e.country.clone(),
            e.admin1.clone(),
            e.admin2.clone(),
            e.admin3.clone(),
            e.location.clone(),
            e.latitude.to_string(),
            e.longitude.to_string(),
            e.fatalities.map(|f| f.to_string()).unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}
