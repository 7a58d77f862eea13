//! Operator-facing tracing output.
//!
//! Logs go to stderr and are filtered by `RUST_LOG` (default `info`). Agent
//! output is logged under the `foreman::agent` target, so
//! `RUST_LOG=info,foreman::agent=warn` silences the live transcript. Durable
//! records (statistics, stream logs, the role ledger) are written under
//! `.foreman/` regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global subscriber. Calling it twice is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
