//! Stable exit codes for compat CLI commands.

/// Command succeeded and no pair failed in this run.
pub const OK: i32 = 0;
/// Invalid arguments/config or an unclassified error.
pub const INVALID: i32 = 1;
/// `compat run` finished but at least one pair newly failed.
pub const PAIRS_FAILED: i32 = 2;
/// Artifact source trust or alias registration could not be confirmed.
pub const CONFIGURATION: i32 = 3;
/// Version catalog fetch failed.
pub const REGISTRY: i32 = 4;
/// Combination store could not be read or written.
pub const STORAGE: i32 = 5;
