//! Multi-round merge of camp surveys into one per-camp time series.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use tracing::{debug, info};

use super::schema::{SiteRow, extract_site_rows};
use crate::error::{Diagnostics, Result, Stage, StageContext};
use crate::parser::RawTable;
use crate::types::{
    CampMergedRow, CampSurveyRound, LocationRecord, LocationType, RoundObservation,
};

/// A retained round together with its decoded extract.
#[derive(Debug, Clone)]
pub struct LoadedRound {
    pub descriptor: CampSurveyRound,
    pub table: RawTable,
}

/// Result of reconciling all retained rounds.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Retained round descriptors, most recent first.
    pub rounds: Vec<CampSurveyRound>,
    pub camps: Vec<CampMergedRow>,
    pub latest_round: Option<u32>,
    /// Camp rows for the location file, taken from the latest round.
    pub locations: Vec<LocationRecord>,
}

/// Keeps rounds whose coverage lies inside `[start, end]`, most recent
/// first.
pub fn select_rounds(
    rounds: &[CampSurveyRound],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<CampSurveyRound> {
    let mut kept: Vec<CampSurveyRound> = rounds
        .iter()
        .filter(|r| r.covered_from >= start && r.covered_to <= end)
        .cloned()
        .collect();
    kept.sort_by_key(|r| Reverse(r.round_number));
    debug!(offered = rounds.len(), kept = kept.len(), "Survey rounds selected");
    kept
}

fn by_population_desc(rows: &mut [SiteRow]) {
    rows.sort_by(|a, b| b.population.cmp(&a.population));
}

/// Merges camp surveys across rounds.
///
/// The most recent round fixes which sites exist: its active camps/sites,
/// top `rows_shown` by population. Older rounds only add observations for
/// those sites. Coordinates come from the first round, in processing order,
/// that supplies them; camps without any are left out of the result.
#[tracing::instrument(skip_all, fields(rounds = rounds.len(), rows_shown = rows_shown))]
pub fn reconcile_camps(
    mut rounds: Vec<LoadedRound>,
    rows_shown: usize,
    country: &str,
    diagnostics: &mut Diagnostics,
) -> Result<Reconciliation> {
    rounds.sort_by_key(|r| Reverse(r.descriptor.round_number));

    let Some(baseline) = rounds.first() else {
        diagnostics.push(Stage::Survey, "no survey round falls inside the scenario window");
        return Ok(Reconciliation::default());
    };
    let baseline_round = baseline.descriptor.round_number;

    let (variant, baseline_rows) =
        extract_site_rows(&baseline.table, baseline_round, diagnostics).in_stage(Stage::Survey)?;
    let mut candidates: Vec<SiteRow> = baseline_rows
        .into_iter()
        .filter(SiteRow::is_active_site)
        .collect();
    by_population_desc(&mut candidates);
    candidates.truncate(rows_shown);
    debug!(
        round = baseline_round,
        schema = variant.name(),
        sites = candidates.len(),
        "Baseline round decoded"
    );

    let mut camps: Vec<CampMergedRow> = Vec::with_capacity(candidates.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for row in candidates {
        index.insert(row.site_id.clone(), camps.len());
        camps.push(CampMergedRow {
            site_id: row.site_id.clone(),
            name: row.name.clone(),
            region: row.region.clone(),
            country: country.to_string(),
            latitude: None,
            longitude: None,
            rounds: BTreeMap::new(),
        });
        if let Some(camp) = camps.last_mut() {
            merge_observation(camp, baseline_round, &row);
        }
    }

    for older in rounds.iter().skip(1) {
        let round = older.descriptor.round_number;
        let (variant, rows) =
            extract_site_rows(&older.table, round, diagnostics).in_stage(Stage::Survey)?;

        let mut dropped: Vec<String> = Vec::new();
        for row in rows {
            match index.get(&row.site_id) {
                Some(&i) => merge_observation(&mut camps[i], round, &row),
                None => dropped.push(row.site_id),
            }
        }
        if !dropped.is_empty() {
            diagnostics.push(
                Stage::Survey,
                format!(
                    "round {round}: {} sites absent from the baseline were dropped: {}",
                    dropped.len(),
                    dropped.join(", ")
                ),
            );
        }
        debug!(round, schema = variant.name(), "Older round merged");
    }

    let latest_round = rounds.iter().map(|r| r.descriptor.round_number).max();
    if let Some(latest) = latest_round {
        camps.sort_by_key(|c| Reverse(c.population_in(latest)));
    }
    camps.truncate(rows_shown);

    let locations = latest_round
        .map(|latest| camp_locations(&camps, latest, diagnostics))
        .unwrap_or_default();
    camps.retain(|c| c.latitude.is_some() && c.longitude.is_some());

    info!(
        camps = camps.len(),
        locations = locations.len(),
        latest_round,
        "Camp surveys reconciled"
    );

    Ok(Reconciliation {
        rounds: rounds.into_iter().map(|r| r.descriptor).collect(),
        camps,
        latest_round,
        locations,
    })
}

fn merge_observation(camp: &mut CampMergedRow, round: u32, row: &SiteRow) {
    camp.rounds.insert(
        round,
        RoundObservation {
            population: row.population,
            survey_date: row.survey_date,
        },
    );
    if camp.latitude.is_none() || camp.longitude.is_none() {
        if let Some((lat, lon)) = row.coordinates() {
            camp.latitude = Some(lat);
            camp.longitude = Some(lon);
        }
    }
}

fn camp_locations(
    camps: &[CampMergedRow],
    latest: u32,
    diagnostics: &mut Diagnostics,
) -> Vec<LocationRecord> {
    let mut out = Vec::with_capacity(camps.len());
    for camp in camps {
        let (Some(latitude), Some(longitude)) = (camp.latitude, camp.longitude) else {
            diagnostics.push(
                Stage::Survey,
                format!("camp {} ({}) has no coordinates in any round", camp.name, camp.site_id),
            );
            continue;
        };
        out.push(LocationRecord {
            name: camp.name.clone(),
            region: camp.region.clone(),
            country: camp.country.clone(),
            latitude,
            longitude,
            location_type: LocationType::IdpCamp,
            conflict_date: Some(0),
            population: camp.population_in(latest).unwrap_or(0),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::parser::parse_table;
    use crate::validation::{build_validation, data_layout};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn descriptor(n: u32, from: NaiveDate, to: NaiveDate) -> CampSurveyRound {
        CampSurveyRound {
            round_number: n,
            covered_from: from,
            covered_to: to,
            source_url: format!("https://example.org/round-{n}"),
            total_idp_conflict_number: 1000 * u64::from(n),
            extract: format!("round{n}.csv"),
        }
    }

    fn loaded(n: u32, csv: &str) -> LoadedRound {
        LoadedRound {
            descriptor: descriptor(n, date(2023, 1, 1), date(2023, 2, 1)),
            table: parse_table(csv.as_bytes()).unwrap(),
        }
    }

    const HEADER: &str =
        "Site ID,Site Name,Region,Latitude,Longitude,Site Type,Reason for displacement,Total IDP Individuals,Survey Date\n";

    fn reason_extract(rows: &[&str]) -> String {
        let mut s = HEADER.to_string();
        for r in rows {
            s.push_str(r);
            s.push('\n');
        }
        s
    }

    #[test]
    fn test_select_rounds_window_and_order() {
        let rounds = vec![
            descriptor(30, date(2022, 6, 1), date(2022, 7, 9)),
            descriptor(32, date(2022, 12, 1), date(2023, 1, 9)),
            descriptor(33, date(2023, 5, 1), date(2023, 6, 29)),
            descriptor(34, date(2023, 8, 1), date(2024, 2, 2)),
        ];
        let kept = select_rounds(&rounds, date(2022, 6, 1), date(2023, 12, 31));
        let numbers: Vec<u32> = kept.iter().map(|r| r.round_number).collect();
        assert_eq!(numbers, vec![33, 32, 30]);
    }

    #[test]
    fn test_baseline_fixes_site_set() {
        let round2 = reason_extract(&[
            "A,Alpha,Tigray,13.1,39.1,Camp/Camp-like setting,Conflict,500,2023-02-01",
            "B,Beta,Afar,11.1,41.1,Collective site,Conflict,300,2023-02-01",
        ]);
        let round1 = reason_extract(&[
            "A,Alpha,Tigray,,,Camp/Camp-like setting,Conflict,450,2023-01-01",
            "C,Gamma,Amhara,12.1,37.1,Camp/Camp-like setting,Conflict,900,2023-01-01",
        ]);
        let mut diag = Diagnostics::new();

        let rec = reconcile_camps(
            vec![loaded(1, &round1), loaded(2, &round2)],
            10,
            "Ethiopia",
            &mut diag,
        )
        .unwrap();

        let ids: Vec<&str> = rec.camps.iter().map(|c| c.site_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(rec.latest_round, Some(2));
        assert_eq!(rec.camps[0].population_in(1), Some(450));
        assert_eq!(rec.camps[0].population_in(2), Some(500));
        assert_eq!(rec.camps[1].population_in(1), None);
        assert!(diag.for_stage(Stage::Survey).any(|d| d.message.contains('C')));
        assert_eq!(rec.rounds[0].round_number, 2);
    }

    #[test]
    fn test_coordinates_taken_from_first_supplier_and_kept() {
        let round3 = reason_extract(&[
            "A,Alpha,Tigray,,,Camp/Camp-like setting,Conflict,10,2023-03-01",
        ]);
        let round2 = reason_extract(&[
            "A,Alpha,Tigray,13.0,39.0,Camp/Camp-like setting,Conflict,9,2023-02-01",
        ]);
        let round1 = reason_extract(&[
            "A,Alpha,Tigray,1.0,1.0,Camp/Camp-like setting,Conflict,8,2023-01-01",
        ]);
        let mut diag = Diagnostics::new();

        let rec = reconcile_camps(
            vec![loaded(3, &round3), loaded(1, &round1), loaded(2, &round2)],
            10,
            "Ethiopia",
            &mut diag,
        )
        .unwrap();

        let camp = &rec.camps[0];
        assert_eq!((camp.latitude, camp.longitude), (Some(13.0), Some(39.0)));
        assert_eq!(rec.locations.len(), 1);
        assert_eq!(rec.locations[0].population, 10);
        assert_eq!(rec.locations[0].location_type, LocationType::IdpCamp);
        assert_eq!(rec.locations[0].conflict_date, Some(0));
    }

    #[test]
    fn test_rows_shown_and_inactive_sites() {
        let round = reason_extract(&[
            "A,Alpha,Tigray,1,1,Camp/Camp-like setting,Conflict,100,2023-02-01",
            "B,Beta,Tigray,1,1,Camp/Camp-like setting,Conflict,300,2023-02-01",
            "C,Gamma,Tigray,1,1,Host community,Conflict,999,2023-02-01",
            "D,Delta,Tigray,1,1,collective site,Conflict,200,2023-02-01",
        ]);
        let mut diag = Diagnostics::new();

        let rec = reconcile_camps(vec![loaded(5, &round)], 2, "Ethiopia", &mut diag).unwrap();
        let ids: Vec<&str> = rec.camps.iter().map(|c| c.site_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "D"]);
    }

    #[test]
    fn test_camp_without_coordinates_not_located() {
        let round = reason_extract(&[
            "A,Alpha,Tigray,,,Camp/Camp-like setting,Conflict,100,2023-02-01",
        ]);
        let mut diag = Diagnostics::new();

        let rec = reconcile_camps(vec![loaded(5, &round)], 10, "Ethiopia", &mut diag).unwrap();
        assert!(rec.camps.is_empty());
        assert!(rec.locations.is_empty());
        assert!(diag.entries().iter().any(|d| d.message.contains("no coordinates")));
    }

    #[test]
    fn test_unlocated_camp_absent_from_validation_layout() {
        let round = reason_extract(&[
            "A,Alpha,Tigray,,,Camp/Camp-like setting,Conflict,100,2023-02-01",
            "B,Beta,Afar,11.1,41.1,Collective site,Conflict,80,2023-02-01",
        ]);
        let mut diag = Diagnostics::new();

        let rec = reconcile_camps(vec![loaded(5, &round)], 10, "E", &mut diag).unwrap();
        let validation = build_validation(&rec.rounds, &rec.camps, "E", &mut diag);

        let located: Vec<&str> = rec.locations.iter().map(|l| l.name.as_str()).collect();
        let merged: Vec<&str> = rec.camps.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(located, vec!["Beta"]);
        assert_eq!(merged, vec!["Beta"]);
        assert_eq!(
            data_layout(&validation),
            vec![
                ("total".to_string(), "refugees.csv".to_string()),
                ("Beta".to_string(), "E-Beta.csv".to_string()),
            ]
        );
    }

    #[test]
    fn test_older_round_duplicates_are_summed() {
        let round2 = reason_extract(&[
            "A,Alpha,Tigray,13.1,39.1,Camp/Camp-like setting,Conflict,500,2023-02-01",
        ]);
        let round1 = "\
Site ID,Site Name,Admin 1,Site Classification,Date of Assessment,IDP Individuals due to Conflict,GPS: Latitude,GPS: Longitude
A,Alpha,Tigray,Camp/Camp-like setting,2023-01-10,4,13.1,39.1
A,Alpha,Tigray,Camp/Camp-like setting,2023-01-12,5,13.1,39.1
";
        let mut diag = Diagnostics::new();

        let rec = reconcile_camps(
            vec![loaded(2, &round2), loaded(1, round1)],
            10,
            "Ethiopia",
            &mut diag,
        )
        .unwrap();

        assert_eq!(rec.camps.len(), 1);
        assert_eq!(rec.camps[0].population_in(1), Some(9));
        assert_eq!(rec.camps[0].rounds[&1].survey_date, date(2023, 1, 10));
        assert_eq!(rec.camps[0].population_in(2), Some(500));
    }

    #[test]
    fn test_broken_older_round_stops_reconciliation() {
        let round2 = reason_extract(&[
            "A,Alpha,Tigray,1,1,Camp/Camp-like setting,Conflict,100,2023-02-01",
        ]);
        let round1 = "Site ID,Site Name,IDP Individuals due to Conflict\nA,Alpha,5\n";
        let mut diag = Diagnostics::new();

        let err = reconcile_camps(
            vec![loaded(2, &round2), loaded(1, round1)],
            10,
            "Ethiopia",
            &mut diag,
        )
        .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Survey));
        match err {
            PipelineError::Stage { source, .. } => {
                assert!(matches!(*source, PipelineError::MissingColumns { round: 1, .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_no_rounds_yields_empty_result() {
        let mut diag = Diagnostics::new();
        let rec = reconcile_camps(Vec::new(), 10, "Ethiopia", &mut diag).unwrap();
        assert!(rec.camps.is_empty());
        assert_eq!(rec.latest_round, None);
        assert_eq!(diag.len(), 1);
    }
}
