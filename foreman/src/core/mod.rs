//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod annotations;
pub mod budget;
pub mod events;
pub mod outcome;
pub mod stats;
pub mod text;
pub mod types;
pub mod verdict;
