//! Logging system setup.
//!
//! `RUST_LOG` overrides the configured level (e.g. `world_server=debug`).
//! Thread names are always printed; every actor runs on a named thread
//! (`butler-1a2b3c4d-client`, `region-meadow`, ...).

use crate::config::LoggingSettings;
use anyhow::{anyhow, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn setup_logging(config: &LoggingSettings) -> Result<()> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    let initialized = if config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_names(true),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_names(true),
            )
            .try_init()
    };
    initialized.map_err(|e| anyhow!("Failed to initialize logging: {e}"))?;

    info!("🔧 Logging at {} ({} output)", log_level, if config.json_format { "json" } else { "plain" });
    Ok(())
}
