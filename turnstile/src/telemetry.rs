//! Tracing initialization.
//!
//! Console output through the tracing-subscriber fmt layer, filtered by `RUST_LOG` (default
//! `info`). For example, to watch every dispatch decision:
//!
//! ```bash
//! RUST_LOG=turnstile=debug,tower_http=info
//! ```

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Fails if one is already installed.
pub fn init_telemetry() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    info!("Telemetry initialized");
    Ok(())
}
