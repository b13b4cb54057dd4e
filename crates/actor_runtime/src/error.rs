//! Error types shared by the runtime components.

use std::io;

/// Errors surfaced by [`Mux`](crate::Mux) operations.
///
/// `take()` only ever fails with [`MuxError::Closed`]; failures of individual
/// sources are reported through listeners instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MuxError {
    #[error("Mux is closed")]
    Closed,

    #[error("Failed to spawn pump thread: {0}")]
    Spawn(String),
}

/// Errors produced by a [`Source`](crate::Source) while pulling.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The underlying transport failed. The pump stops.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// One item could not be decoded. The pump reports it and keeps going.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The pull was interrupted by a close request.
    #[error("Interrupted")]
    Interrupted,
}

/// Why a [`Mailbox`](crate::Mailbox) fetch did not yield a message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Fetch interrupted by stop request")]
    Interrupted,

    #[error("Mailbox closed")]
    Closed,

    #[error("Mailbox failed: {0}")]
    Failed(String),
}

/// Errors from [`Worker`](crate::Worker) lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {0} was already started")]
    AlreadyStarted(String),

    #[error("Worker {0} was stopped before it started")]
    Stopped(String),

    #[error("Failed to spawn thread for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}
