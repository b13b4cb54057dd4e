//! Configuration management for the world server.
//!
//! This module handles loading, validation, and conversion of server configuration
//! from TOML files and command-line arguments.

use crate::cli::CliArgs;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use world_server::config::default_regions;
use world_server::{
    AccountStore, Field, JsonFileStore, MailboxCapacities, MemoryStore, RegionMap, ServerConfig,
};

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network and pacing settings
    pub server: ServerSettings,
    /// Regions and the spawn point
    pub world: WorldSettings,
    /// Actor mailbox bounds
    #[serde(default)]
    pub mailboxes: MailboxCapacities,
    /// Where accounts and players are kept
    pub storage: StorageSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:7878")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Milliseconds between two steps of a walk
    #[serde(default = "default_step_interval")]
    pub step_interval_ms: u64,
    /// Milliseconds a connection waits for a region to confirm a handoff
    #[serde(default = "default_handoff_timeout")]
    pub handoff_timeout_ms: u64,
}

fn default_max_connections() -> usize {
    1000
}

fn default_step_interval() -> u64 {
    150
}

fn default_handoff_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSettings {
    pub spawn_region: String,
    pub spawn_position: Field,
    pub regions: Vec<RegionMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// One JSON file per account and player under `data_dir`
    Json,
    /// Nothing survives a restart
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    pub data_dir: String,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            server: ServerSettings {
                bind_address: server.bind_address.to_string(),
                max_connections: server.max_connections,
                step_interval_ms: default_step_interval(),
                handoff_timeout_ms: default_handoff_timeout(),
            },
            world: WorldSettings {
                spawn_region: server.spawn_region.to_string(),
                spawn_position: server.spawn_position,
                regions: default_regions(),
            },
            mailboxes: MailboxCapacities::default(),
            storage: StorageSettings {
                backend: StorageBackend::Json,
                data_dir: "data".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the specified path
    /// and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn apply_overrides(&mut self, args: &CliArgs) {
        if let Some(bind_address) = &args.bind_address {
            self.server.bind_address = bind_address.clone();
        }
        if let Some(log_level) = &args.log_level {
            self.logging.level = log_level.clone();
        }
        if args.json_logs {
            self.logging.json_format = true;
        }
        if let Some(data_dir) = &args.data_dir {
            self.storage.data_dir = data_dir.to_string_lossy().to_string();
        }
    }

    /// Converts the application configuration to a world server configuration.
    pub fn to_server_config(&self) -> anyhow::Result<ServerConfig> {
        let bind_address: SocketAddr = self
            .server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind_address))?;

        Ok(ServerConfig {
            bind_address,
            max_connections: self.server.max_connections,
            regions: self.world.regions.clone(),
            spawn_region: self.world.spawn_region.as_str().into(),
            spawn_position: self.world.spawn_position,
            capacities: self.mailboxes.clone(),
            step_interval: Duration::from_millis(self.server.step_interval_ms),
            handoff_timeout: Duration::from_millis(self.server.handoff_timeout_ms),
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// Region geometry, links, the spawn point and mailbox bounds are checked
    /// by the world server's own validation.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid bind address: {}", &self.server.bind_address));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.storage.backend == StorageBackend::Json && self.storage.data_dir.is_empty() {
            return Err("Data directory cannot be empty".to_string());
        }
        if self.server.handoff_timeout_ms == 0 {
            return Err("handoff_timeout_ms must be greater than 0".to_string());
        }

        self.to_server_config()
            .map_err(|e| e.to_string())?
            .validate()
    }

    /// Opens the configured account store.
    pub fn open_store(&self) -> anyhow::Result<Arc<dyn AccountStore>> {
        match self.storage.backend {
            StorageBackend::Json => {
                let store = JsonFileStore::new(&self.storage.data_dir)
                    .with_context(|| format!("Failed to open data directory {}", self.storage.data_dir))?;
                Ok(Arc::new(store))
            }
            StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use world_server::CoordTransform;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.server.bind_address, "127.0.0.1:7878");
        assert_eq!(config.world.regions.len(), 2);
        assert_eq!(config.storage.backend, StorageBackend::Json);
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("overworld.toml");

        let created = AppConfig::load_from_file(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(created, AppConfig::default());

        // the written default must load back unchanged
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded, created);
    }

    #[tokio::test]
    async fn loads_a_handwritten_file() {
        let toml_content = r#"
[server]
bind_address = "0.0.0.0:9000"
step_interval_ms = 50

[world]
spawn_region = "hall"
spawn_position = { x = 1, y = 1 }

[[world.regions]]
id = "hall"
width = 4
height = 3
blocked = [{ x = 2, y = 2 }]
links = [{ at = { x = 3, y = 1 }, target = "hall", transform = { kind = "translate", dx = -3, dy = 0 } }]

[storage]
backend = "memory"
data_dir = ""

[logging]
level = "debug"
json_format = true
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        tokio::fs::write(&path, toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.server.max_connections, 1000);
        assert_eq!(config.mailboxes, MailboxCapacities::default());
        assert_eq!(config.storage.backend, StorageBackend::Memory);

        let server = config.to_server_config().unwrap();
        assert_eq!(server.step_interval, Duration::from_millis(50));
        assert_eq!(server.regions[0].links[0].transform, CoordTransform::Translate { dx: -3, dy: 0 });
        assert!(!server.regions[0].is_walkable(Field::new(2, 2)));
    }

    #[test]
    fn cli_overrides_win() {
        let mut config = AppConfig::default();
        let args = CliArgs::try_parse_from([
            "overworld",
            "--bind",
            "0.0.0.0:1234",
            "--log-level",
            "warn",
            "--json-logs",
            "--data-dir",
            "/tmp/world",
        ])
        .unwrap();

        config.apply_overrides(&args);
        assert_eq!(config.server.bind_address, "0.0.0.0:1234");
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
        assert_eq!(config.storage.data_dir, "/tmp/world");
    }

    #[test]
    fn validation_reports_the_first_problem() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid_address".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid bind address"));

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().unwrap_err().contains("Invalid log level"));

        let mut config = AppConfig::default();
        config.world.spawn_region = "nowhere".to_string();
        assert!(config.validate().unwrap_err().contains("Spawn region"));

        let mut config = AppConfig::default();
        config.world.regions[0].links[0].target = "swamp".into();
        assert!(config.validate().unwrap_err().contains("unknown region swamp"));
    }

    #[test]
    fn memory_backend_needs_no_directory() {
        let mut config = AppConfig::default();
        config.storage.backend = StorageBackend::Memory;
        config.storage.data_dir.clear();
        assert_eq!(config.validate(), Ok(()));
        assert!(config.open_store().is_ok());
    }
}
