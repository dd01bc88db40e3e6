//! Known survey-extract layouts and their column mappings.

use std::collections::HashMap;

use chrono::NaiveDate;

use crate::dates::parse_event_date;
use crate::error::{Diagnostics, PipelineError, Result, Stage};
use crate::parser::RawTable;

/// Settlement labels that mark a currently active camp or site.
pub const ACTIVE_SITE_TYPES: [&str; 2] = ["Camp/Camp-like setting", "Collective site"];

/// Displacement reason counted in reason-split extracts.
pub const CONFLICT_REASON: &str = "Conflict";

/// Column names of one schema variant. `None` marks a column the variant
/// does not have.
#[derive(Debug, Clone, Copy)]
pub struct ColumnMap {
    pub site_id: &'static str,
    pub name: &'static str,
    pub region: &'static str,
    pub site_type: &'static str,
    pub survey_date: &'static str,
    pub population: &'static str,
    pub reason: Option<&'static str>,
    pub latitude: &'static str,
    pub longitude: &'static str,
}

impl ColumnMap {
    fn required(&self) -> Vec<&'static str> {
        let mut cols = vec![
            self.site_id,
            self.name,
            self.region,
            self.site_type,
            self.survey_date,
            self.population,
        ];
        cols.extend(self.reason);
        cols
    }
}

/// Survey extracts come in two layouts that differ in how the
/// conflict-attributable displacement count is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaVariant {
    /// One row per site and displacement reason; only rows whose reason is
    /// conflict are counted.
    ReasonSplit,
    /// One row per site with a pre-split conflict count column.
    ConflictColumn,
}

const REASON_SPLIT: ColumnMap = ColumnMap {
    site_id: "Site ID",
    name: "Site Name",
    region: "Region",
    site_type: "Site Type",
    survey_date: "Survey Date",
    population: "Total IDP Individuals",
    reason: Some("Reason for displacement"),
    latitude: "Latitude",
    longitude: "Longitude",
};

const CONFLICT_COLUMN: ColumnMap = ColumnMap {
    site_id: "Site ID",
    name: "Site Name",
    region: "Admin 1",
    site_type: "Site Classification",
    survey_date: "Date of Assessment",
    population: "IDP Individuals due to Conflict",
    reason: None,
    latitude: "GPS: Latitude",
    longitude: "GPS: Longitude",
};

impl SchemaVariant {
    pub const fn name(self) -> &'static str {
        match self {
            SchemaVariant::ReasonSplit => "reason-split",
            SchemaVariant::ConflictColumn => "conflict-column",
        }
    }

    pub const fn columns(self) -> ColumnMap {
        match self {
            SchemaVariant::ReasonSplit => REASON_SPLIT,
            SchemaVariant::ConflictColumn => CONFLICT_COLUMN,
        }
    }

    /// Picks the variant by its discriminating column, then checks that every
    /// column the variant requires is present.
    pub fn detect(table: &RawTable, round: u32) -> Result<Self> {
        let variant = if REASON_SPLIT.reason.is_some_and(|c| table.has_column(c)) {
            SchemaVariant::ReasonSplit
        } else if table.has_column(CONFLICT_COLUMN.population) {
            SchemaVariant::ConflictColumn
        } else {
            return Err(PipelineError::UnknownSchema { round });
        };

        let missing: Vec<String> = variant
            .columns()
            .required()
            .into_iter()
            .filter(|c| !table.has_column(c))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::MissingColumns {
                round,
                variant: variant.name(),
                missing,
            });
        }

        Ok(variant)
    }
}

/// One site's conflict-attributable figures within a single round.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteRow {
    pub site_id: String,
    pub name: String,
    pub region: String,
    pub site_type: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub population: u64,
    pub survey_date: NaiveDate,
}

impl SiteRow {
    pub fn is_active_site(&self) -> bool {
        ACTIVE_SITE_TYPES
            .iter()
            .any(|t| t.eq_ignore_ascii_case(self.site_type.trim()))
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

struct Indices {
    site_id: usize,
    name: usize,
    region: usize,
    site_type: usize,
    survey_date: usize,
    population: usize,
    reason: Option<usize>,
    latitude: Option<usize>,
    longitude: Option<usize>,
}

impl Indices {
    fn resolve(map: &ColumnMap, table: &RawTable) -> Option<Self> {
        Some(Self {
            site_id: table.column(map.site_id)?,
            name: table.column(map.name)?,
            region: table.column(map.region)?,
            site_type: table.column(map.site_type)?,
            survey_date: table.column(map.survey_date)?,
            population: table.column(map.population)?,
            reason: match map.reason {
                Some(col) => Some(table.column(col)?),
                None => None,
            },
            latitude: table.column(map.latitude),
            longitude: table.column(map.longitude),
        })
    }
}

fn parse_count(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(|c| !matches!(c, ',' | ' ')).collect();
    if digits.is_empty() {
        return Some(0);
    }
    digits.parse::<u64>().ok().or_else(|| {
        digits
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f as u64)
    })
}

fn parse_coordinate(raw: &str) -> std::result::Result<Option<f64>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| format!("invalid coordinate '{raw}'"))
}

fn cell(row: &[String], i: usize) -> &str {
    row.get(i).map(String::as_str).unwrap_or("")
}

fn decode_row(
    raw: &[String],
    idx: &Indices,
    site_id: &str,
) -> std::result::Result<SiteRow, String> {
    let population = parse_count(cell(raw, idx.population))
        .ok_or_else(|| format!("invalid population '{}'", cell(raw, idx.population)))?;
    let survey_date = parse_event_date(cell(raw, idx.survey_date)).map_err(|e| e.to_string())?;
    let latitude = match idx.latitude {
        Some(i) => parse_coordinate(cell(raw, i))?,
        None => None,
    };
    let longitude = match idx.longitude {
        Some(i) => parse_coordinate(cell(raw, i))?,
        None => None,
    };

    Ok(SiteRow {
        site_id: site_id.to_string(),
        name: cell(raw, idx.name).to_string(),
        region: cell(raw, idx.region).to_string(),
        site_type: cell(raw, idx.site_type).to_string(),
        latitude,
        longitude,
        population,
        survey_date,
    })
}

/// Maps an extract onto [`SiteRow`]s: detects the schema, keeps only
/// conflict-attributable counts and aggregates duplicate site ids (summed
/// population, first value for everything else).
///
/// Rows that cannot be decoded are skipped and reported to `diagnostics`.
pub fn extract_site_rows(
    table: &RawTable,
    round: u32,
    diagnostics: &mut Diagnostics,
) -> Result<(SchemaVariant, Vec<SiteRow>)> {
    let variant = SchemaVariant::detect(table, round)?;
    let idx = Indices::resolve(&variant.columns(), table)
        .ok_or(PipelineError::UnknownSchema { round })?;

    let mut rows: Vec<SiteRow> = Vec::new();
    for (line, raw) in table.rows.iter().enumerate() {
        if let Some(r) = idx.reason {
            if !cell(raw, r).eq_ignore_ascii_case(CONFLICT_REASON) {
                continue;
            }
        }

        let site_id = cell(raw, idx.site_id);
        if site_id.is_empty() {
            diagnostics.push(
                Stage::Survey,
                format!("round {round}, row {}: empty site id", line + 1),
            );
            continue;
        }

        match decode_row(raw, &idx, site_id) {
            Ok(row) => rows.push(row),
            Err(reason) => diagnostics.push(
                Stage::Survey,
                format!("round {round}, row {} (site {site_id}) rejected: {reason}", line + 1),
            ),
        }
    }

    Ok((variant, aggregate_duplicates(rows)))
}

/// Collapses rows sharing a site id, in first-seen order.
pub fn aggregate_duplicates(rows: Vec<SiteRow>) -> Vec<SiteRow> {
    let mut out: Vec<SiteRow> = Vec::with_capacity(rows.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for row in rows {
        match seen.get(&row.site_id) {
            Some(&i) => out[i].population += row.population,
            None => {
                seen.insert(row.site_id.clone(), out.len());
                out.push(row);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_table;

    const REASON_EXTRACT: &str = "\
Site ID,Site Name,Region,Latitude,Longitude,Site Type,Reason for displacement,Total IDP Individuals,Survey Date
S1,Camp One,Tigray,13.5,39.4,Camp/Camp-like setting,Conflict,\"1,200\",2023-06-20
S1,Camp One,Tigray,13.5,39.4,Camp/Camp-like setting,Drought,500,2023-06-20
S1,Camp One,Tigray,,,Camp/Camp-like setting,conflict,300,2023-06-21
S2,Host Two,Afar,11.9,41.3,Host community,Conflict,80,2023-06-22
";

    const COLUMN_EXTRACT: &str = "\
Site ID,Site Name,Admin 1,Site Classification,IDP Individuals due to Conflict,Date of Assessment
S1,Camp One,Tigray,Collective site,900,09-01-2023
";

    #[test]
    fn test_detect_reason_split() {
        let table = parse_table(REASON_EXTRACT.as_bytes()).unwrap();
        assert_eq!(SchemaVariant::detect(&table, 34).unwrap(), SchemaVariant::ReasonSplit);
    }

    #[test]
    fn test_detect_conflict_column_without_coordinates() {
        let table = parse_table(COLUMN_EXTRACT.as_bytes()).unwrap();
        let mut diag = Diagnostics::new();
        let (variant, rows) = extract_site_rows(&table, 32, &mut diag).unwrap();
        assert_eq!(variant, SchemaVariant::ConflictColumn);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].coordinates(), None);
        assert!(rows[0].is_active_site());
        assert_eq!(rows[0].survey_date, NaiveDate::from_ymd_opt(2023, 1, 9).unwrap());
    }

    #[test]
    fn test_missing_columns_listed() {
        let table = parse_table(
            "Site ID,Site Name,Reason for displacement,Total IDP Individuals\nS1,A,Conflict,5\n"
                .as_bytes(),
        )
        .unwrap();
        match SchemaVariant::detect(&table, 30).unwrap_err() {
            PipelineError::MissingColumns { round, variant, missing } => {
                assert_eq!(round, 30);
                assert_eq!(variant, "reason-split");
                assert_eq!(missing, vec!["Region", "Site Type", "Survey Date"]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_unknown_schema() {
        let table = parse_table("Site ID,Households\nS1,4\n".as_bytes()).unwrap();
        assert!(matches!(
            SchemaVariant::detect(&table, 29),
            Err(PipelineError::UnknownSchema { round: 29 })
        ));
    }

    #[test]
    fn test_conflict_rows_only_and_duplicates_summed() {
        let table = parse_table(REASON_EXTRACT.as_bytes()).unwrap();
        let mut diag = Diagnostics::new();
        let (_, rows) = extract_site_rows(&table, 34, &mut diag).unwrap();

        assert_eq!(rows.len(), 2);
        let s1 = &rows[0];
        assert_eq!(s1.site_id, "S1");
        assert_eq!(s1.population, 1_500);
        assert_eq!(s1.coordinates(), Some((13.5, 39.4)));
        assert!(!rows[1].is_active_site());
        assert!(diag.is_empty());
    }

    #[test]
    fn test_undecodable_row_is_rejected_with_diagnostic() {
        let csv = "\
Site ID,Site Name,Admin 1,Site Classification,IDP Individuals due to Conflict,Date of Assessment
S1,Camp One,Tigray,Collective site,lots,09-01-2023
S2,Camp Two,Tigray,Collective site,10,09-01-2023
";
        let table = parse_table(csv.as_bytes()).unwrap();
        let mut diag = Diagnostics::new();
        let (_, rows) = extract_site_rows(&table, 31, &mut diag).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].site_id, "S2");
        assert!(diag.entries()[0].message.contains("site S1"));
    }
}
