//! File-queue orchestrator for long-running coding-agent roles.
//!
//! Work moves between directories by rename: a role claims a task from its
//! `tasks/` queue into `ongoing/`, drives the agent CLI round after round until
//! the agent deletes the task file, and leaves a report for the auditor. The
//! crate is split the same way throughout:
//!
//! - **[`core`]**: Pure logic (annotations, event parsing, outcome
//!   classification, statistics, verdicts). No I/O.
//! - **[`io`]**: Filesystem layout, config, the task queue, agent process
//!   execution, prompt rendering and persisted records.
//!
//! Orchestration modules ([`lifecycle`], [`looping`], [`roles`], [`audit`])
//! combine the two behind the [`engine::Engine`] handle.

pub mod audit;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod lifecycle;
pub mod logging;
pub mod looping;
pub mod roles;
pub mod shutdown;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
