//! I/O helpers for compat commands.

pub mod config;
pub mod executor;
pub mod process;
pub mod registry;
pub mod storage;
pub mod summary;
