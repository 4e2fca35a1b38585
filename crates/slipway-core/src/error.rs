//! Orchestrator error taxonomy.
//!
//! Each variant maps to one user-visible failure class: external command
//! failures carry the full command line, working directory and exit code so
//! they can be reported before the process terminates.

use std::path::PathBuf;

/// Errors produced by the plan orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// An external command exited non-zero.
    #[error("command `{command}` exited with status {exit_code} (cwd: {cwd})")]
    CommandFailed {
        command: String,
        cwd: PathBuf,
        exit_code: i32,
        output: String,
    },

    /// Malformed or missing workspace/module descriptor.
    #[error("workspace error: {0}")]
    Workspace(String),

    /// The coverage tool output did not contain the expected summary line.
    #[error("unable to extract coverage for plan {plan}: {reason}")]
    CoverageExtraction { plan: String, reason: String },

    /// The coverage-regression gate tripped in CI context.
    #[error(
        "coverage for plan {plan} regressed from {previous:.1}% to {current:.1}%"
    )]
    CoverageRegression {
        plan: String,
        previous: f64,
        current: f64,
    },

    /// Test orchestration failed for a reason internal to the engine.
    #[error("orchestration error: {0}")]
    Internal(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Store(#[from] slipway_store::StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    /// Captured output of a failed command, when present.
    ///
    /// Only printed in verbose mode; the summary line always carries the
    /// command, cwd and exit code.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            OrchestratorError::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_display_carries_context() {
        let err = OrchestratorError::CommandFailed {
            command: "go test ./...".to_string(),
            cwd: PathBuf::from("/work/module"),
            exit_code: 2,
            output: "FAIL".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("go test ./..."));
        assert!(msg.contains("/work/module"));
        assert!(msg.contains("status 2"));
        assert_eq!(err.captured_output(), Some("FAIL"));
    }

    #[test]
    fn regression_display_shows_both_values() {
        let err = OrchestratorError::CoverageRegression {
            plan: "go".to_string(),
            previous: 80.0,
            current: 78.0,
        };

        let msg = err.to_string();
        assert!(msg.contains("80.0%"));
        assert!(msg.contains("78.0%"));
    }
}
