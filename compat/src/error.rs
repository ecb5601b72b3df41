//! Fatal error taxonomy.
//!
//! Per-pair scaffold and build failures are not errors: they are recorded as
//! [`crate::core::types::FailureReason`] and the run continues. The variants
//! here abort the run. They are attached as `anyhow` context so callers keep
//! the full cause chain and `main` can still downcast to pick an exit code.

use crate::exit_codes;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompatError {
    /// Trust or alias confirmation text did not match.
    #[error("configuration failure: {0}")]
    Configuration(String),
    /// Version catalog could not be fetched or parsed.
    #[error("registry failure: {0}")]
    Registry(String),
    /// Durable state could not be read, parsed or written.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl CompatError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CompatError::Configuration(_) => exit_codes::CONFIGURATION,
            CompatError::Registry(_) => exit_codes::REGISTRY,
            CompatError::Storage(_) => exit_codes::STORAGE,
        }
    }
}

/// Exit code for an error bubbled up to `main`.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CompatError>()
        .map(CompatError::exit_code)
        .unwrap_or(exit_codes::INVALID)
}
