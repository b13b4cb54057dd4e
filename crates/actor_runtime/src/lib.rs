//! # Actor Runtime - threads, mailboxes and multiplexers
//!
//! A small thread-per-mailbox actor runtime. Every actor owns one OS thread
//! that drains one bounded mailbox; actors never share mutable state and
//! talk to each other exclusively by sending messages.
//!
//! ## Building Blocks
//!
//! * **[`Mux`]** - merges a dynamic set of ordered sources (in-process
//!   channels, decoded network streams) into one blocking mailbox. Each
//!   source is pumped by its own thread; failures stay with the source and
//!   are reported through [`MuxListener`].
//! * **[`Worker`]** - a named thread that fetches one message at a time from
//!   a [`Mailbox`] and dispatches it to a [`Handler`]. Stopping is
//!   idempotent and safe from the worker's own thread.
//! * **[`Scheduler`]** - one timer thread over a [`DeadlineQueue`], firing
//!   keys into a channel that an actor merges with its other inputs.
//!
//! ## Backpressure
//!
//! All queues are bounded. A producer sending into a full mailbox blocks
//! until the consumer frees a slot; nothing is dropped and per-producer
//! order is kept. A handler that blocks on another actor's full mailbox
//! stalls its own worker in the meantime, so actors that wait on each other
//! must not do so in both directions.
//!
//! ## Example
//!
//! ```rust
//! use actor_runtime::{ChannelSource, Handler, Mux, StopOptions, Worker};
//! use crossbeam::channel::bounded;
//!
//! struct Printer;
//!
//! impl Handler for Printer {
//!     type Message = String;
//!
//!     fn handle_message(&mut self, message: String) {
//!         println!("{message}");
//!     }
//! }
//!
//! let mux: Mux<String> = Mux::new("printer", 16);
//! let (tx, rx) = bounded::<String>(16);
//! mux.add_source("lines", ChannelSource::new(rx)).unwrap();
//!
//! let worker = Worker::new("printer");
//! worker.start(mux.clone(), Printer).unwrap();
//! tx.send("hello".to_string()).unwrap();
//!
//! mux.close();
//! worker.stop(StopOptions::default());
//! ```

pub mod error;
pub mod mailbox;
pub mod mux;
pub mod scheduler;
pub mod worker;

pub use error::{FetchError, MuxError, SourceError, WorkerError};
pub use mailbox::Mailbox;
pub use mux::{ChannelSource, CloseReason, Mux, MuxListener, Source, SourceId, SourceInfo, Unblock};
pub use scheduler::{DeadlineQueue, Scheduler, SchedulerHandle};
pub use worker::{Handler, StopOptions, Termination, Worker};
