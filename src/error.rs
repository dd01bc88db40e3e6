//! Error and diagnostic types shared by every pipeline stage.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Pipeline stage that produced an error or diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Classify,
    Timeline,
    Survey,
    Routes,
    Validation,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Normalize => "temporal normalization",
            Stage::Classify => "location classification",
            Stage::Timeline => "conflict timeline",
            Stage::Survey => "camp survey reconciliation",
            Stage::Routes => "route synthesis",
            Stage::Validation => "validation dataset",
            Stage::Output => "output",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("malformed date '{value}': {reason}")]
    MalformedDate { value: String, reason: String },

    #[error("round {round}: extract is missing columns {missing:?} required by the {variant} schema")]
    MissingColumns {
        round: u32,
        variant: &'static str,
        missing: Vec<String>,
    },

    #[error("round {round}: extract matches no known survey schema")]
    UnknownSchema { round: u32 },

    #[error("invalid scenario: {0}")]
    InvalidScenario(String),

    #[error("record {record}: {reason}")]
    MalformedRecord { record: usize, reason: String },

    #[error("retrieval from {source_name} failed: {message}")]
    Retrieval { source_name: String, message: String },

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn malformed_date(value: &str, reason: &str) -> Self {
        PipelineError::MalformedDate {
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Stage the error was raised in, if it has been attributed to one.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Short machine-readable category used in the run log.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::MalformedDate { .. } => "malformed_date",
            PipelineError::MissingColumns { .. } => "missing_columns",
            PipelineError::UnknownSchema { .. } => "unknown_schema",
            PipelineError::InvalidScenario(_) => "invalid_scenario",
            PipelineError::MalformedRecord { .. } => "malformed_record",
            PipelineError::Retrieval { .. } => "retrieval",
            PipelineError::Stage { source, .. } => source.kind(),
            PipelineError::Csv(_) => "csv",
            PipelineError::Io(_) => "io",
            PipelineError::Json(_) => "json",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Attaches the failing stage to an error.
pub trait StageContext<T> {
    fn in_stage(self, stage: Stage) -> Result<T>;
}

impl<T, E: Into<PipelineError>> StageContext<T> for std::result::Result<T, E> {
    fn in_stage(self, stage: Stage) -> Result<T> {
        self.map_err(|e| match e.into() {
            already @ PipelineError::Stage { .. } => already,
            other => PipelineError::Stage {
                stage,
                source: Box::new(other),
            },
        })
    }
}

/// One advisory finding. Never fatal.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub stage: Stage,
    pub message: String,
}

/// Advisory findings accumulated over a run, for operator review.
#[derive(Debug, Default, Clone, Serialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        warn!(%stage, %message, "Diagnostic");
        self.entries.push(Diagnostic { stage, message });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn for_stage(&self, stage: Stage) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.stage == stage)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
