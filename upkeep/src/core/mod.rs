//! Deterministic, pure logic for the decision loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests.

pub mod allowlist;
pub mod candidate;
pub mod gate;
pub mod path;
pub mod score;
pub mod similarity;
pub mod types;
