//! Trait and types for retrieving conflict events from a provider.

use anyhow::Result;
use chrono::{Datelike, NaiveDate};

use conflict_synth::stats::EventProvenance;
use conflict_synth::types::ConflictEventRecord;

/// What to retrieve: one country over an inclusive date window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventQuery {
    pub country: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl EventQuery {
    /// Calendar years touched by the window, oldest first.
    pub fn years(&self) -> Vec<i32> {
        (self.start.year()..=self.end.year()).collect()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Events returned for a query, already restricted to its window.
#[derive(Debug, Clone)]
pub struct EventBatch {
    pub events: Vec<ConflictEventRecord>,
    pub provenance: EventProvenance,
    /// Hours since the provider last refreshed its data, when reported.
    pub last_update_hours: Option<f64>,
}

/// Abstraction over a conflict-event provider (e.g., ACLED).
#[async_trait::async_trait]
pub trait EventSource {
    async fn fetch_events(&self, query: &EventQuery) -> Result<EventBatch>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_years_span() {
        let q = EventQuery {
            country: "Ethiopia".into(),
            start: NaiveDate::from_ymd_opt(2021, 11, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2023, 2, 1).unwrap(),
        };
        assert_eq!(q.years(), vec![2021, 2022, 2023]);
        assert!(q.contains(NaiveDate::from_ymd_opt(2023, 2, 1).unwrap()));
        assert!(!q.contains(NaiveDate::from_ymd_opt(2021, 10, 31).unwrap()));
    }
}
