//! Main application entry point for the world server
//!
//! Parses the command line, loads and validates the TOML configuration,
//! starts the world and serves TCP clients until SIGINT or SIGTERM.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::Context;
use cli::CliArgs;
use config::AppConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use world_server::{Reception, ServerConfig, World};

const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

pub struct Application {
    config: AppConfig,
    server_config: ServerConfig,
    world: Arc<World>,
}

impl Application {
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_overrides(&args);
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

        logging::setup_logging(&config.logging)?;
        log_summary(&config, &args.config_path);

        let server_config = config.to_server_config()?;
        let store = config.open_store()?;
        let world = World::start(&server_config, store).context("Failed to start the world")?;

        Ok(Self {
            config,
            server_config,
            world: Arc::new(world),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let reception = Reception::bind(
            self.server_config.bind_address,
            Arc::clone(&self.world),
            self.server_config.max_connections,
        )
        .await?;
        let reception_handle = reception.handle();
        let reception_task = tokio::spawn(reception.run());

        let monitoring_handle = {
            let world = Arc::clone(&self.world);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    info!(
                        "📊 World health - {} connection(s) | {} player(s) in the world",
                        world.connection_count(),
                        world.context().players.len()
                    );
                }
            })
        };

        info!("🌟 Overworld ready on {}", self.config.server.bind_address);
        if let Err(e) = signals::wait_for_shutdown_signal().await {
            error!("❌ Signal handling failed: {}", e);
        }

        reception_handle.shutdown();
        monitoring_handle.abort();
        match reception_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("❌ Reception error: {}", e),
            Err(e) => error!("❌ Reception task failed: {}", e),
        }

        // butlers save their players while stopping, which blocks
        let world = Arc::clone(&self.world);
        tokio::task::spawn_blocking(move || world.shutdown())
            .await
            .context("World shutdown panicked")?;

        info!("👋 Overworld stopped");
        Ok(())
    }
}

fn log_summary(config: &AppConfig, config_path: &Path) {
    info!("🚀 Overworld v{}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration Summary:");
    info!("  📂 Config file: {}", config_path.display());
    info!("  🌐 Bind address: {}", config.server.bind_address);
    info!("  👥 Max connections: {}", config.server.max_connections);
    for region in &config.world.regions {
        info!(
            "  🗺️  Region {}: {}x{} with {} link(s)",
            region.id,
            region.width,
            region.height,
            region.links.len()
        );
    }
    info!(
        "  💾 Storage: {:?} ({})",
        config.storage.backend, config.storage.data_dir
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let app = Application::new(args).await?;
    app.run().await
}
