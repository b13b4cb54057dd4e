//! # World Server - butlers, regions and the handoff between them
//!
//! A multiplayer world split into regions. Every region is run by one
//! [`MapManager`] actor; every client connection is served by one
//! [`Butler`] actor. The two only ever talk through bounded mailboxes.
//!
//! ## Actors
//!
//! * **Butler** - per connection. Logs the client into an account, loads
//!   one of its players into the world and relays moves and chat to the
//!   region the player is in. Region events flow back through the butler,
//!   which drops everything that does not come from the player's region.
//! * **MapManager** - per region. Owns the region's registry, walks players
//!   along shortest paths and broadcasts what happens to every butler with
//!   a player in the region.
//!
//! ## Handoff
//!
//! Walking onto a link into another region makes the old region report it
//! to the owning butler, which unregisters the player there, applies the
//! link's coordinate transform and registers it with the new region. The
//! player value travels inside the commands, so it is never held by two
//! regions. See [`butler::handoff`].
//!
//! ## Message Flow
//!
//! 1. A client writes a [`ClientRequest`] (one JSON line on TCP)
//! 2. The butler's clientside worker executes it, sending a
//!    [`RegionCommand`](messages::RegionCommand) if the world is involved
//! 3. The map manager updates its registry and emits
//!    [`RegionEvent`](messages::RegionEvent)s
//! 4. The butler's serverside worker authorizes each event and writes the
//!    matching [`ClientEvent`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use world_server::{wire, ClientRequest, MemoryStore, ServerConfig, World};
//!
//! let world = World::start(&ServerConfig::default(), Arc::new(MemoryStore::new())).unwrap();
//! let (connection, client) = wire::pipe("local", 16);
//! world.create_butler(connection).unwrap();
//! client.send(ClientRequest::CreateAccount { account: "alice".into() });
//! world.shutdown();
//! ```

pub mod butler;
pub mod config;
pub mod error;
pub mod map;
pub mod map_manager;
pub mod messages;
pub mod player;
pub mod reception;
pub mod registry;
pub mod store;
pub mod types;
pub mod wire;
pub mod world;

pub use butler::{Butler, ButlerSettings};
pub use config::{MailboxCapacities, ServerConfig};
pub use error::{ButlerError, HandoffError, RegionError, ServerError, StoreError};
pub use map::{CoordTransform, RegionLink, RegionMap};
pub use map_manager::{MapManager, MapManagerRef, RegionSettings};
pub use messages::{ClientEvent, ClientRequest, WireMessage};
pub use player::{Account, Player, PlayerView};
pub use reception::{Reception, ReceptionHandle};
pub use store::{AccountStore, JsonFileStore, MemoryStore};
pub use types::{ButlerId, Direction, Field, RegionId};
pub use world::{World, WorldContext};
