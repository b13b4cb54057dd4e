//! # World - process-wide wiring
//!
//! [`World::start`] spawns one map manager per configured region and builds
//! the [`WorldContext`] every butler is handed. The context replaces global
//! state: region directory, player directory, account sessions, live
//! butlers and the account store are all reached through it.

use crate::butler::{Butler, ButlerSettings};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::map_manager::{MapManager, MapManagerRef};
use crate::registry::{AccountSessions, ButlerRegistry, ConnectionSlot, PlayerDirectory, RegionDirectory};
use crate::store::AccountStore;
use crate::types::RegionId;
use crate::wire::Connection;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared state handed to every butler.
pub struct WorldContext {
    pub regions: RegionDirectory,
    pub players: Arc<PlayerDirectory>,
    pub sessions: AccountSessions,
    pub butlers: ButlerRegistry,
    pub store: Arc<dyn AccountStore>,
    pub settings: ButlerSettings,
}

pub struct World {
    context: Arc<WorldContext>,
    managers: Mutex<Vec<MapManager>>,
    stopped: AtomicBool,
}

impl World {
    /// Validates `config` and starts every region.
    pub fn start(config: &ServerConfig, store: Arc<dyn AccountStore>) -> Result<Self, ServerError> {
        config.validate().map_err(ServerError::Config)?;

        let players = Arc::new(PlayerDirectory::new());
        let region_settings = config.region_settings();
        let mut managers = Vec::with_capacity(config.regions.len());
        let mut regions = RegionDirectory::new();

        for map in &config.regions {
            // already spawned managers stop on drop if this fails
            let manager = MapManager::spawn(map.clone(), Arc::clone(&players), &region_settings)?;
            regions.insert(manager.handle());
            managers.push(manager);
        }

        info!("🗺️  World started with {} region(s): {:?}", regions.len(), regions.ids());
        Ok(Self {
            context: Arc::new(WorldContext {
                regions,
                players,
                sessions: AccountSessions::new(),
                butlers: ButlerRegistry::new(),
                store,
                settings: config.butler_settings(),
            }),
            managers: Mutex::new(managers),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn context(&self) -> &Arc<WorldContext> {
        &self.context
    }

    /// Serves a new connection without a connection limit.
    pub fn create_butler(&self, connection: Connection) -> Result<Arc<Butler>, ServerError> {
        let slot = self
            .reserve_connection(usize::MAX)
            .ok_or_else(|| ServerError::Internal("no connection slot left".to_string()))?;
        self.create_reserved_butler(connection, slot)
    }

    /// Takes one of `limit` connection slots. Live butlers and connections
    /// still being set up both count.
    pub fn reserve_connection(&self, limit: usize) -> Option<ConnectionSlot> {
        self.context.butlers.try_reserve(limit)
    }

    /// Serves a new connection in a slot taken by [`World::reserve_connection`].
    pub fn create_reserved_butler(
        &self,
        connection: Connection,
        slot: ConnectionSlot,
    ) -> Result<Arc<Butler>, ServerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ServerError::Internal("world is shutting down".to_string()));
        }
        let butler = Butler::create(Arc::clone(&self.context), connection, slot)?;

        // shutdown may have swept the registry while this butler was joining it
        if self.stopped.load(Ordering::Acquire) {
            butler.kick("server shutting down");
            return Err(ServerError::Internal("world is shutting down".to_string()));
        }
        Ok(butler)
    }

    pub fn region(&self, id: &RegionId) -> Option<MapManagerRef> {
        self.context.regions.get(id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.context.butlers.len()
    }

    /// Disconnects every butler (saving their players), then stops the
    /// regions. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("🛑 Shutting down world");
        self.context.butlers.stop_all("server shutting down");

        let managers = std::mem::take(&mut *self.managers.lock());
        for manager in &managers {
            manager.stop();
        }
        info!("✅ World stopped");
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.shutdown();
    }
}
