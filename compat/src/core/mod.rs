//! Deterministic, pure logic for the compatibility matrix.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod combination;
pub mod matrix;
pub mod policy;
pub mod store;
pub mod types;
pub mod version;
