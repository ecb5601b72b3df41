//! Shared deterministic types for pair execution.
//!
//! These types define stable contracts between the orchestrator and the pair
//! executor. They do not depend on external state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a pair within one run. `Running` is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PairState {
    Pending,
    Running,
    Verified,
    Failed,
    Skipped,
}

impl PairState {
    pub fn as_str(self) -> &'static str {
        match self {
            PairState::Pending => "pending",
            PairState::Running => "running",
            PairState::Verified => "verified",
            PairState::Failed => "failed",
            PairState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PairState::Verified | PairState::Failed | PairState::Skipped
        )
    }

    /// Allowed moves: `Pending → Running | Skipped`, `Running → Verified | Failed`.
    pub fn can_transition_to(self, next: PairState) -> bool {
        matches!(
            (self, next),
            (PairState::Pending, PairState::Running)
                | (PairState::Pending, PairState::Skipped)
                | (PairState::Running, PairState::Verified)
                | (PairState::Running, PairState::Failed)
        )
    }
}

impl fmt::Display for PairState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a pair did not build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// Project directory missing or empty after scaffolding.
    ScaffoldFailed { detail: String },
    /// Build tool exited nonzero, or was killed (`exit_code: None`).
    BuildFailed { exit_code: Option<i32> },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ScaffoldFailed { detail } => write!(f, "scaffold failed: {detail}"),
            FailureReason::BuildFailed {
                exit_code: Some(code),
            } => write!(f, "build failed with exit code {code}"),
            FailureReason::BuildFailed { exit_code: None } => {
                write!(f, "build terminated without exit code")
            }
        }
    }
}

/// Classified result of one pair execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(FailureReason),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Terminal state this outcome moves a running pair into.
    pub fn state(&self) -> PairState {
        match self {
            Outcome::Success => PairState::Verified,
            Outcome::Failure(_) => PairState::Failed,
        }
    }
}
