//! Calendar-date helpers.
//!
//! Scenario dates travel through the pipeline as `dd-mm-yyyy` text and all
//! "day index" fields are integer offsets from the scenario start date.

use chrono::NaiveDate;

use crate::error::{PipelineError, Result};

/// Reverses the three tokens of a date string, turning `dd-mm-yyyy` into
/// `yyyy-mm-dd` (and back). Tokens are split on `-` when present, otherwise
/// on whitespace.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedDate`] when fewer than three tokens are
/// found.
pub fn date_format(input: &str) -> Result<String> {
    let tokens: Vec<&str> = if input.contains('-') {
        input.split('-').collect()
    } else {
        input.split_whitespace().collect()
    };

    if tokens.len() < 3 {
        return Err(PipelineError::malformed_date(
            input,
            "expected three date components",
        ));
    }

    Ok(format!("{}-{}-{}", tokens[2], tokens[1], tokens[0]))
}

/// Parses a strict `dd-mm-yyyy` date.
pub fn parse_dmy(input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%d-%m-%Y")
        .map_err(|e| PipelineError::malformed_date(input, &e.to_string()))
}

/// Absolute number of calendar days between two `dd-mm-yyyy` dates.
pub fn between_date(d1: &str, d2: &str) -> Result<i64> {
    Ok(days_between(parse_dmy(d1)?, parse_dmy(d2)?))
}

/// Absolute number of calendar days between two dates.
pub fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
    (a - b).num_days().abs()
}

/// Signed offset of `target` from `reference` in days; negative when
/// `target` predates `reference`.
pub fn day_offset(reference: NaiveDate, target: NaiveDate) -> i64 {
    (target - reference).num_days()
}

/// Parses an event date as delivered by the event provider.
///
/// Accepts `yyyy-mm-dd`, `dd-mm-yyyy` and `dd Month yyyy` (full or
/// abbreviated English month names).
pub fn parse_event_date(input: &str) -> Result<NaiveDate> {
    let trimmed = input.trim();
    ["%Y-%m-%d", "%d-%m-%Y", "%d %B %Y", "%d %b %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| PipelineError::malformed_date(input, "unrecognized event date format"))
}

/// Formats a date as `yyyy-mm-dd`.
pub fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_format_dash() {
        assert_eq!(date_format("15-01-2023").unwrap(), "2023-01-15");
    }

    #[test]
    fn test_date_format_space_separated() {
        assert_eq!(date_format("15 01 2023").unwrap(), "2023-01-15");
    }

    #[test]
    fn test_date_format_flips_back() {
        let iso = date_format("01-02-2024").unwrap();
        assert_eq!(date_format(&iso).unwrap(), "01-02-2024");
    }

    #[test]
    fn test_date_format_rejects_short_input() {
        assert!(date_format("2023-01").is_err());
        assert!(date_format("").is_err());
    }

    #[test]
    fn test_date_format_matches_calendar_date() {
        for s in ["29-02-2024", "31-12-1999", "01-01-2023"] {
            let parsed = parse_dmy(s).unwrap();
            assert_eq!(date_format(s).unwrap(), iso(parsed));
        }
    }

    #[test]
    fn test_between_date_symmetric() {
        let a = "01-01-2023";
        let b = "11-01-2024";
        assert_eq!(between_date(a, b).unwrap(), between_date(b, a).unwrap());
        assert_eq!(between_date(a, b).unwrap(), 375);
    }

    #[test]
    fn test_between_date_same_day_is_zero() {
        assert_eq!(between_date("17-03-2022", "17-03-2022").unwrap(), 0);
    }

    #[test]
    fn test_between_date_crosses_leap_february() {
        assert_eq!(between_date("28-02-2024", "01-03-2024").unwrap(), 2);
        assert_eq!(between_date("28-02-2023", "01-03-2023").unwrap(), 1);
    }

    #[test]
    fn test_between_date_rejects_garbage() {
        assert!(between_date("32-01-2023", "01-01-2023").is_err());
        assert!(between_date("yesterday", "01-01-2023").is_err());
    }

    #[test]
    fn test_day_offset_is_signed() {
        let start = parse_dmy("10-01-2023").unwrap();
        let before = parse_dmy("05-01-2023").unwrap();
        assert_eq!(day_offset(start, before), -5);
        assert_eq!(day_offset(before, start), 5);
    }

    #[test]
    fn test_parse_event_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 3, 7).unwrap();
        assert_eq!(parse_event_date("2023-03-07").unwrap(), expected);
        assert_eq!(parse_event_date("07-03-2023").unwrap(), expected);
        assert_eq!(parse_event_date("07 March 2023").unwrap(), expected);
        assert_eq!(parse_event_date("07 Mar 2023").unwrap(), expected);
        assert!(parse_event_date("March 2023").is_err());
    }
}
