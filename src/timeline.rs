//! Conflict-duration estimation and the day by zone occupancy matrix.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::dates::{day_offset, days_between};
use crate::error::{Diagnostics, Stage};
use crate::types::{AdminLevel, ConflictEventRecord, ConflictInfoRecord, ConflictTimelineMatrix};

/// Estimates when each conflict zone became active and for how long.
///
/// The start is the zone's earliest event; the duration runs from there to
/// `simulation_end`, padded by `added_conflict_days`.
#[tracing::instrument(
    skip_all,
    fields(zones = zones.len(), added_conflict_days = added_conflict_days)
)]
pub fn estimate_conflict_info(
    events: &[ConflictEventRecord],
    zones: &[String],
    granularity: AdminLevel,
    country: &str,
    simulation_end: NaiveDate,
    added_conflict_days: u32,
    diagnostics: &mut Diagnostics,
) -> Vec<ConflictInfoRecord> {
    let mut first_seen: HashMap<&str, (NaiveDate, usize)> = HashMap::new();
    for event in events {
        let entry = first_seen
            .entry(event.unit(granularity).trim())
            .or_insert((event.event_date, 0));
        entry.0 = entry.0.min(event.event_date);
        entry.1 += 1;
    }

    let mut infos = Vec::with_capacity(zones.len());
    for zone in zones {
        let Some(&(start_date, event_count)) = first_seen.get(zone.as_str()) else {
            diagnostics.push(Stage::Timeline, format!("no events found for conflict zone {zone}"));
            continue;
        };
        let duration = days_between(start_date, simulation_end) as u32 + added_conflict_days;
        debug!(zone = %zone, %start_date, event_count, duration, "Conflict info estimated");

        infos.push(ConflictInfoRecord {
            name: zone.clone(),
            country: country.to_string(),
            event_count,
            start_date,
            end_date: simulation_end,
            conflict_date: duration,
        });
    }

    infos
}

/// Expands conflict estimates into a `(period + 1) x zones` 0/1 matrix.
///
/// Each column holds a single run of 1s from the zone's start offset through
/// `start + duration`, clamped to `[0, period]`.
#[tracing::instrument(skip_all, fields(period = period, zones = infos.len()))]
pub fn build_timeline(
    infos: &[ConflictInfoRecord],
    scenario_start: NaiveDate,
    period: u32,
) -> ConflictTimelineMatrix {
    let zones = infos.iter().map(|i| i.name.clone()).collect();
    let mut matrix = ConflictTimelineMatrix::zeroed(period, zones);
    let period = i64::from(period);

    for (col, info) in infos.iter().enumerate() {
        let raw_start = day_offset(scenario_start, info.start_date);
        let end_index = (raw_start + i64::from(info.conflict_date)).min(period);
        let start_index = raw_start.max(0);
        if start_index > end_index {
            continue;
        }
        if raw_start < 0 {
            debug!(
                zone = %info.name,
                raw_start,
                "Conflict start predates scenario, clamped to day 0"
            );
        }

        for row in &mut matrix.cells[start_index as usize..=end_index as usize] {
            row[col] = 1;
        }
    }

    info!(rows = matrix.cells.len(), zones = matrix.zones.len(), "Conflict timeline built");
    matrix
}
