//! Compatibility-matrix orchestrator for cli × platform release pairs.
//!
//! Every pair of a cli release and a platform release is scaffolded and built
//! at most once; outcomes are recorded in a durable store so repeated runs
//! only pick up untested pairs. The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (version ordering, broken-pair
//!   policy, store membership, matrix generation). No I/O.
//! - **[`io`]**: Side-effecting operations (registry HTTP, store files,
//!   subprocesses, summaries). Isolated behind traits for fakes in tests.
//!
//! [`plan`] and [`orchestrate`] combine the two into a run; [`commands`]
//! implements the CLI commands on top.

pub mod commands;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrate;
pub mod plan;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
