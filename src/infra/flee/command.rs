use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::services::simulator::{SimulationOutcome, SimulationRequest, Simulator};

/// Runs the simulator as an external program.
///
/// The program is called with `<input_dir> <validation_dir> <settings_file>`
/// appended to its configured arguments and must print its result document
/// as JSON on stdout.
pub struct CommandSimulator {
    program: String,
    args: Vec<String>,
}

impl CommandSimulator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Splits a command line such as `python3 run_flee.py` on whitespace.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("simulator command is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }

    /// Reads `SIMULATOR_COMMAND`.
    pub fn from_env() -> Result<Self> {
        let line = std::env::var("SIMULATOR_COMMAND").context("SIMULATOR_COMMAND must be set")?;
        Self::from_command_line(&line)
    }
}

#[async_trait]
impl Simulator for CommandSimulator {
    #[tracing::instrument(
        skip(self, request),
        fields(program = %self.program, input_dir = %request.input_dir.display())
    )]
    async fn run(&self, request: &SimulationRequest) -> Result<SimulationOutcome> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&request.input_dir)
            .arg(&request.validation_dir)
            .arg(&request.settings_file)
            .output()
            .await
            .with_context(|| format!("Failed to start simulator '{}'", self.program))?;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            warn!(code = ?output.status.code(), "Simulator exited with failure");
            return Ok(SimulationOutcome::Failed {
                exit_code: output.status.code(),
                message: stderr,
            });
        }
        if !stderr.is_empty() {
            debug!(stderr = %stderr, "Simulator diagnostics");
        }

        let result = serde_json::from_slice(&output.stdout)
            .context("Simulator output is not valid JSON")?;
        info!("Simulation completed");
        Ok(SimulationOutcome::Completed { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request() -> SimulationRequest {
        SimulationRequest {
            input_dir: PathBuf::from("in"),
            settings_file: PathBuf::from("simsetting.yml"),
            validation_dir: PathBuf::from("val"),
        }
    }

    #[test]
    fn test_from_command_line() {
        let sim = CommandSimulator::from_command_line("python3 run_flee.py --quiet").unwrap();
        assert_eq!(sim.program, "python3");
        assert_eq!(sim.args, vec!["run_flee.py", "--quiet"]);
        assert!(CommandSimulator::from_command_line("   ").is_err());
    }

    #[tokio::test]
    async fn test_successful_run_parses_stdout() {
        let sim = CommandSimulator::new(
            "sh",
            vec![
                "-c".into(),
                r#"echo "{\"input\": \"$1\", \"settings\": \"$3\"}""#.into(),
                "sim".into(),
            ],
        );

        let outcome = sim.run(&request()).await.unwrap();
        assert_eq!(
            outcome,
            SimulationOutcome::Completed {
                result: serde_json::json!({"input": "in", "settings": "simsetting.yml"})
            }
        );
    }

    #[tokio::test]
    async fn test_failed_run_is_reported() {
        let sim = CommandSimulator::new(
            "sh",
            vec!["-c".into(), "echo boom >&2; exit 3".into(), "sim".into()],
        );

        let outcome = sim.run(&request()).await.unwrap();
        assert_eq!(
            outcome,
            SimulationOutcome::Failed {
                exit_code: Some(3),
                message: "boom".into()
            }
        );
        assert!(!outcome.is_completed());
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let sim = CommandSimulator::new("definitely-not-a-simulator-binary", Vec::new());
        assert!(sim.run(&request()).await.is_err());
    }
}
