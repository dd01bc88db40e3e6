//! Boundary to the external displacement simulator.

use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;

/// Inputs of one simulation: a generated input directory, the simulator's
/// settings file and the matching validation directory.
#[derive(Debug, Clone)]
pub struct SimulationRequest {
    pub input_dir: PathBuf,
    pub settings_file: PathBuf,
    pub validation_dir: PathBuf,
}

/// What the simulator reported back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SimulationOutcome {
    /// The simulator's own result document.
    Completed { result: serde_json::Value },
    /// The simulator ran but reported failure.
    Failed { exit_code: Option<i32>, message: String },
}

impl SimulationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SimulationOutcome::Completed { .. })
    }
}

#[async_trait::async_trait]
pub trait Simulator {
    /// Runs one simulation. `Err` means the simulator could not be invoked
    /// at all; a failed run is reported as [`SimulationOutcome::Failed`].
    async fn run(&self, request: &SimulationRequest) -> Result<SimulationOutcome>;
}
