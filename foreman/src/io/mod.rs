//! I/O helpers for the engine: processes, the filesystem queue and persistence.

pub mod clock;
pub mod config;
pub mod invoker;
pub mod layout;
pub mod process;
pub mod prompt;
pub mod queue;
pub mod record_store;
pub mod status;
