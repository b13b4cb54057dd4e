//! Error types for the world server.
//!
//! Each layer has its own enum. Domain-rule violations ([`ButlerError`]) are
//! never fatal: the butler turns them into a `ClientEvent::Error` reply.

use crate::butler::handoff::HandoffState;
use crate::types::{Field, RegionId};
use actor_runtime::{MuxError, WorkerError};
use std::io::Error as IoError;
use std::path::PathBuf;

/// Errors that abort server startup or a single connection.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<WorkerError> for ServerError {
    fn from(e: WorkerError) -> Self {
        ServerError::Internal(e.to_string())
    }
}

impl From<MuxError> for ServerError {
    fn from(e: MuxError) -> Self {
        ServerError::Internal(e.to_string())
    }
}

/// Persistence failures of an [`AccountStore`](crate::store::AccountStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Account {0} already exists")]
    AccountExists(String),

    #[error("Account {0} not found")]
    AccountNotFound(String),

    #[error("Player {0} already exists")]
    PlayerExists(String),

    #[error("Player {0} not found")]
    PlayerNotFound(String),

    #[error("Invalid name {0:?}: use 1-32 letters, digits, '-' or '_'")]
    InvalidName(String),

    #[error("Failed to create directory {0}: {1}")]
    DirectoryCreate(PathBuf, IoError),

    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, IoError),

    #[error("Failed to write to file {0}: {1}")]
    FileWrite(PathBuf, IoError),

    #[error("Failed to rename file from {0} to {1}: {2}")]
    FileRename(PathBuf, PathBuf, IoError),

    #[error("Failed to serialize {0}: {1}")]
    Serialization(String, serde_json::Error),

    #[error("Failed to deserialize file {0}: {1}")]
    Deserialization(PathBuf, serde_json::Error),
}

/// Failures reported by a region's map manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegionError {
    #[error("Player {0} is already registered in region {1}")]
    AlreadyRegistered(String, RegionId),

    #[error("Player {0} is not registered in region {1}")]
    NotRegistered(String, RegionId),

    #[error("Player {0} is controlled by another connection")]
    NotOwner(String),

    #[error("Player {0} cannot stand on {1} in region {2}")]
    Unwalkable(String, Field, RegionId),

    #[error("Player {0} is no longer waiting on the link at {1}")]
    LeftLink(String, Field),

    #[error("Region {0} is not running")]
    Unavailable(RegionId),

    #[error("Region {0} did not answer in time")]
    Timeout(RegionId),
}

/// Protocol violations of the cross-region handoff state machine.
#[derive(Debug, thiserror::Error)]
pub enum HandoffError {
    #[error("Handoff of {player} is {actual:?}, expected {expected:?}")]
    InvalidState {
        player: String,
        actual: HandoffState,
        expected: HandoffState,
    },

    #[error("Player {0} was released but still has an assigned region")]
    StillAssigned(String),

    #[error(transparent)]
    Region(#[from] RegionError),
}

/// Domain-rule violations while serving a client request.
#[derive(Debug, thiserror::Error)]
pub enum ButlerError {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Already logged in as {0}")]
    AlreadyLoggedIn(String),

    #[error("Account {0} is already logged in elsewhere")]
    AccountInUse(String),

    #[error("No active player")]
    NoActivePlayer,

    #[error("Player {0} is already active, unload it first")]
    PlayerActive(String),

    #[error("Player {0} is already in the world")]
    PlayerInUse(String),

    #[error("Player {0} does not belong to account {1}")]
    NotYourPlayer(String, String),

    #[error("Unknown region {0}")]
    UnknownRegion(RegionId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Region(#[from] RegionError),

    #[error(transparent)]
    Handoff(#[from] HandoffError),
}
