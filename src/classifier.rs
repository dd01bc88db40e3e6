//! Splits conflict-event locations into towns and conflict zones.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::ClassifierSettings;
use crate::dates::days_between;
use crate::error::{Diagnostics, Stage};
use crate::types::{ConflictEventRecord, LocationRecord, LocationType, PopulationTable};

/// Most recent event of one administrative unit.
#[derive(Debug, Clone)]
struct UnitEvent<'a> {
    name: &'a str,
    event: &'a ConflictEventRecord,
    conflict_date: u32,
}

/// Reduces events to one record per administrative unit and classifies
/// each unit as town or conflict zone.
///
/// Names missing from `population` resolve to 0 and are reported to
/// `diagnostics`; they are not dropped.
#[tracing::instrument(skip_all, fields(events = events.len(), granularity = ?settings.granularity))]
pub fn classify_locations(
    events: &[ConflictEventRecord],
    population: &PopulationTable,
    scenario_start: NaiveDate,
    settings: &ClassifierSettings,
    diagnostics: &mut Diagnostics,
) -> Vec<LocationRecord> {
    let mut order: Vec<&str> = Vec::new();
    let mut latest: HashMap<&str, &ConflictEventRecord> = HashMap::new();
    let mut unnamed = 0usize;

    for event in events {
        let name = event.unit(settings.granularity).trim();
        if name.is_empty() {
            unnamed += 1;
            continue;
        }
        match latest.get(name) {
            Some(current) if current.event_date > event.event_date => {}
            Some(_) => {
                latest.insert(name, event);
            }
            None => {
                order.push(name);
                latest.insert(name, event);
            }
        }
    }

    if unnamed > 0 {
        diagnostics.push(
            Stage::Classify,
            format!("{unnamed} events have no {:?} name and were skipped", settings.granularity),
        );
    }

    // every event location, including those the fatalities filter drops
    let missing: Vec<&str> = order
        .iter()
        .copied()
        .filter(|name| population.get(name).is_none())
        .collect();
    if !missing.is_empty() {
        diagnostics.push(
            Stage::Classify,
            format!("locations without population data: {}", missing.join(", ")),
        );
    }

    let mut units: Vec<UnitEvent> = order
        .iter()
        .map(|&name| {
            let event = latest[name];
            UnitEvent {
                name,
                event,
                conflict_date: days_between(event.event_date, scenario_start) as u32,
            }
        })
        .filter(|unit| match settings.fatalities_threshold {
            Some(threshold) => unit.event.fatalities.unwrap_or(0) > threshold,
            None => true,
        })
        .collect();

    units.sort_by_key(|u| u.conflict_date);

    let (towns, zones): (Vec<UnitEvent>, Vec<UnitEvent>) = units
        .into_iter()
        .partition(|u| u.conflict_date <= settings.conflict_threshold);

    debug!(towns = towns.len(), conflict_zones = zones.len(), "Units split");

    let mut locations =
        top_by_population(towns, LocationType::Town, population, settings.rows_shown);
    locations.extend(top_by_population(
        zones,
        LocationType::ConflictZone,
        population,
        settings.rows_shown,
    ));

    info!(
        locations = locations.len(),
        unmatched_population = missing.len(),
        "Locations classified"
    );
    locations
}

fn top_by_population(
    units: Vec<UnitEvent>,
    location_type: LocationType,
    population: &PopulationTable,
    rows_shown: usize,
) -> Vec<LocationRecord> {
    let mut records: Vec<LocationRecord> = units
        .into_iter()
        .map(|u| LocationRecord {
            name: u.name.to_string(),
            region: u.event.admin1.clone(),
            country: u.event.country.clone(),
            latitude: u.event.latitude,
            longitude: u.event.longitude,
            location_type,
            conflict_date: Some(u.conflict_date),
            population: population.get(u.name).unwrap_or(0),
        })
        .collect();

    // stable: ties keep conflict_date order
    records.sort_by(|a, b| b.population.cmp(&a.population));
    records.truncate(rows_shown);
    records
}
