//! Cooperative shutdown flag set by SIGINT/SIGTERM.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use signal_hook::consts::{SIGINT, SIGTERM};

/// Shared "please stop" flag checked between cycles and during sleeps.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// A flag that only reacts to [`ShutdownFlag::request`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag that is also raised by SIGINT and SIGTERM.
    pub fn from_signals() -> Result<Self> {
        let flag = Self::new();
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&flag.requested))
                .with_context(|| format!("install handler for signal {signal}"))?;
        }
        Ok(flag)
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
