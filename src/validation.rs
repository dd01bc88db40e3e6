//! Observed displacement series used to score simulation runs.

use tracing::info;

use crate::error::{Diagnostics, Stage};
use crate::types::{CampMergedRow, CampSeries, CampSurveyRound, ValidationDataset, ValidationPoint};

/// File holding the aggregate series.
pub const TOTALS_FILE: &str = "refugees.csv";

/// Name of a camp's series file. Path separators in either part are
/// replaced so the file always lands in the validation directory.
pub fn camp_file_name(country: &str, camp_name: &str) -> String {
    let clean = |s: &str| s.replace(['/', '\\'], "_");
    format!("{}-{}.csv", clean(country), clean(camp_name))
}

/// Builds the aggregate and per-camp series from the retained rounds.
///
/// Each round contributes one point dated at its `covered_to` boundary.
/// Camps only get points for rounds in which they were observed. All series
/// are ordered oldest first.
#[tracing::instrument(skip_all, fields(rounds = rounds.len(), camps = camps.len()))]
pub fn build_validation(
    rounds: &[CampSurveyRound],
    camps: &[CampMergedRow],
    country: &str,
    diagnostics: &mut Diagnostics,
) -> ValidationDataset {
    let mut ordered: Vec<&CampSurveyRound> = rounds.iter().collect();
    ordered.sort_by_key(|r| (r.covered_to, r.round_number));

    let totals: Vec<ValidationPoint> = ordered
        .iter()
        .map(|r| ValidationPoint {
            date: r.covered_to,
            refugee_numbers: r.total_idp_conflict_number,
        })
        .collect();

    let mut series = Vec::with_capacity(camps.len());
    for camp in camps {
        let points: Vec<ValidationPoint> = ordered
            .iter()
            .filter_map(|r| {
                camp.population_in(r.round_number).map(|population| ValidationPoint {
                    date: r.covered_to,
                    refugee_numbers: population,
                })
            })
            .collect();
        if points.is_empty() {
            diagnostics.push(
                Stage::Validation,
                format!("camp {} has no observation in any retained round", camp.name),
            );
        }
        series.push(CampSeries {
            camp_name: camp.name.clone(),
            file_name: camp_file_name(country, &camp.name),
            points,
        });
    }

    info!(total_points = totals.len(), camp_series = series.len(), "Validation dataset built");
    ValidationDataset { totals, camps: series }
}

/// Rows of `data_layout.csv`: the aggregate file first, then one row per
/// camp.
pub fn data_layout(dataset: &ValidationDataset) -> Vec<(String, String)> {
    std::iter::once(("total".to_string(), TOTALS_FILE.to_string()))
        .chain(
            dataset
                .camps
                .iter()
                .map(|c| (c.camp_name.clone(), c.file_name.clone())),
        )
        .collect()
}
