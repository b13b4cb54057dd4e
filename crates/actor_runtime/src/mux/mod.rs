//! # Mux - merging ordered sources into one mailbox
//!
//! A [`Mux`] presents a dynamically growable set of ordered sources as a
//! single blocking pull. Every source gets a dedicated pump thread which
//! pulls items, converts them to the mux message type and forwards them into
//! one shared bounded queue.
//!
//! ## Failure isolation
//!
//! Consumers only ever observe [`MuxError::Closed`] from [`Mux::take`].
//! Everything that goes wrong with an individual source is reported through
//! [`MuxListener`] callbacks:
//!
//! * an item that does not convert to the mux message type (or fails to
//!   decode) fires [`MuxListener::on_filter_rejected`] and the pump keeps
//!   running;
//! * a source that ends, fails or is closed fires
//!   [`MuxListener::on_source_closed`] exactly once.
//!
//! ## Ordering
//!
//! Items from one source arrive in production order. No ordering is
//! guaranteed between distinct sources.
//!
//! ## Lifecycle
//!
//! Pump threads keep the mux alive. Call [`Mux::close`] to stop every pump
//! and release consumers blocked in [`Mux::take`].

mod source;

pub use source::{ChannelSource, Source, Unblock};

use crate::error::{MuxError, SourceError};
use crossbeam::channel::{bounded, select, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Identifier of a source within one mux.
pub type SourceId = u64;

/// Identity of a source as reported to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub id: SourceId,
    pub label: String,
}

/// Why a source stopped delivering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close_source` or `close` was called.
    Requested,
    /// The source reported the end of its stream.
    EndOfStream,
    /// The source failed with an I/O error.
    Failed(String),
}

/// Observer for per-source events.
///
/// Callbacks run on pump threads (or on the thread calling `close_source`)
/// and must not block for long.
pub trait MuxListener<T>: Send + Sync {
    fn on_filter_rejected(&self, _source: &SourceInfo, _detail: &str) {}

    fn on_source_closed(&self, _mux: &Mux<T>, _source: &SourceInfo, _reason: &CloseReason) {}
}

#[derive(Default)]
struct SourceState {
    closed: AtomicBool,
}

struct SourceEntry {
    info: SourceInfo,
    state: Arc<SourceState>,
    stop: Option<Sender<()>>,
    unblocker: Option<Box<dyn Unblock>>,
    pump: Option<JoinHandle<()>>,
}

struct Inner<T> {
    name: String,
    queue_tx: Sender<T>,
    queue_rx: Receiver<T>,
    closed: AtomicBool,
    closed_signal: Mutex<Option<Sender<()>>>,
    closed_rx: Receiver<()>,
    sources: DashMap<SourceId, SourceEntry>,
    listeners: RwLock<Vec<Arc<dyn MuxListener<T>>>>,
    next_id: AtomicU64,
}

/// Multiplexer over heterogeneous ordered sources.
///
/// Cloning a `Mux` yields another handle to the same queue.
pub struct Mux<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Mux<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Mux<T> {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Ids of the sources still in the set, open or not.
    pub fn source_ids(&self) -> Vec<SourceId> {
        let mut ids: Vec<SourceId> = self.inner.sources.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_source_open(&self, id: SourceId) -> bool {
        self.inner
            .sources
            .get(&id)
            .map(|entry| !entry.state.closed.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

impl<T> fmt::Debug for Mux<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mux")
            .field("name", &self.inner.name)
            .field("sources", &self.inner.sources.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T: Send + 'static> Mux<T> {
    /// Creates a mux whose shared queue holds at most `capacity` messages.
    ///
    /// Pumps block once the queue is full, which in turn blocks the
    /// producers feeding their sources.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (queue_tx, queue_rx) = bounded(capacity.max(1));
        let (closed_signal, closed_rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                queue_tx,
                queue_rx,
                closed: AtomicBool::new(false),
                closed_signal: Mutex::new(Some(closed_signal)),
                closed_rx,
                sources: DashMap::new(),
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Registers a listener. Add listeners before sources to observe every
    /// event.
    pub fn add_listener(&self, listener: Arc<dyn MuxListener<T>>) {
        self.inner.listeners.write().push(listener);
    }

    /// Adds a source and starts its pump.
    ///
    /// Items are converted with `TryInto<T>`; items that fail the conversion
    /// never surface from [`take`](Self::take) and are reported to the
    /// listeners instead.
    ///
    /// # Errors
    ///
    /// [`MuxError::Closed`] if the mux has been closed, [`MuxError::Spawn`]
    /// if the pump thread could not be created.
    pub fn add_source<S>(&self, label: &str, source: S) -> Result<SourceId, MuxError>
    where
        S: Source,
        S::Item: TryInto<T>,
        <S::Item as TryInto<T>>::Error: fmt::Debug,
    {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let info = SourceInfo {
            id,
            label: label.to_string(),
        };
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let state = Arc::new(SourceState::default());
        let unblocker = source.unblocker();

        let pump = {
            let inner = Arc::clone(&self.inner);
            let info = info.clone();
            let state = Arc::clone(&state);
            thread::Builder::new()
                .name(format!("{}:{}", self.inner.name, label))
                .spawn(move || run_pump(inner, info, source, stop_rx, state))
                .map_err(|e| MuxError::Spawn(e.to_string()))?
        };

        self.inner.sources.insert(
            id,
            SourceEntry {
                info,
                state,
                stop: Some(stop_tx),
                unblocker,
                pump: Some(pump),
            },
        );

        // close() may have swept the source set before the insert above
        if self.is_closed() {
            self.close_source(id, true);
            return Err(MuxError::Closed);
        }

        debug!(mux = %self.inner.name, source = label, id, "source added");
        Ok(id)
    }

    /// Blocks until a message is available from any source.
    ///
    /// # Errors
    ///
    /// [`MuxError::Closed`] once [`close`](Self::close) has been called.
    pub fn take(&self) -> Result<T, MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        select! {
            recv(self.inner.queue_rx) -> message => message.map_err(|_| MuxError::Closed),
            recv(self.inner.closed_rx) -> _ => Err(MuxError::Closed),
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout`, returning
    /// `Ok(None)`.
    pub fn take_timeout(&self, timeout: Duration) -> Result<Option<T>, MuxError> {
        if self.is_closed() {
            return Err(MuxError::Closed);
        }
        select! {
            recv(self.inner.queue_rx) -> message => message.map(Some).map_err(|_| MuxError::Closed),
            recv(self.inner.closed_rx) -> _ => Err(MuxError::Closed),
            default(timeout) => Ok(None),
        }
    }

    /// Stops one source.
    ///
    /// Signals the pump, unblocks the source if it exposes an [`Unblock`]
    /// hook, fires the close listeners (once per source), optionally removes
    /// the source from the set and waits for the pump thread to exit. When
    /// called from the pump thread itself the wait is skipped.
    ///
    /// Returns `false` if no such source exists.
    pub fn close_source(&self, id: SourceId, remove: bool) -> bool {
        let taken = if remove {
            self.inner.sources.remove(&id).map(|(_, mut entry)| {
                (
                    entry.info.clone(),
                    Arc::clone(&entry.state),
                    entry.stop.take(),
                    entry.unblocker.take(),
                    entry.pump.take(),
                )
            })
        } else {
            self.inner.sources.get_mut(&id).map(|mut entry| {
                (
                    entry.info.clone(),
                    Arc::clone(&entry.state),
                    entry.stop.take(),
                    entry.unblocker.take(),
                    entry.pump.take(),
                )
            })
        };

        let Some((info, state, stop, unblocker, pump)) = taken else {
            return false;
        };

        let first_close = !state.closed.swap(true, Ordering::AcqRel);
        drop(stop);
        if let Some(unblocker) = unblocker {
            unblocker.unblock();
        }
        if first_close {
            self.fire_closed(&info, &CloseReason::Requested);
        }

        if let Some(pump) = pump {
            if pump.thread().id() != thread::current().id() && pump.join().is_err() {
                warn!(mux = %self.inner.name, source = %info.label, "pump thread panicked");
            }
        }
        true
    }

    /// Closes every source and releases consumers blocked in `take`.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.closed_signal.lock().take();

        let ids: Vec<SourceId> = self.inner.sources.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.close_source(id, true);
        }
        info!("🔒 Mux {} closed", self.inner.name);
    }

    /// Receiver side of the shared queue, for [`Mailbox`](crate::Mailbox).
    pub(crate) fn queue(&self) -> &Receiver<T> {
        &self.inner.queue_rx
    }

    pub(crate) fn closed_signal(&self) -> &Receiver<()> {
        &self.inner.closed_rx
    }

    fn fire_closed(&self, source: &SourceInfo, reason: &CloseReason) {
        match reason {
            CloseReason::Failed(detail) => {
                warn!(mux = %self.inner.name, source = %source.label, "source failed: {detail}")
            }
            _ => debug!(mux = %self.inner.name, source = %source.label, ?reason, "source closed"),
        }
        let listeners = self.inner.listeners.read().clone();
        for listener in listeners {
            listener.on_source_closed(self, source, reason);
        }
    }
}

impl<T> Inner<T> {
    fn report_rejection(&self, source: &SourceInfo, detail: &str) {
        warn!(mux = %self.name, source = %source.label, "rejected item: {detail}");
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_filter_rejected(source, detail);
        }
    }
}

fn run_pump<T, S>(
    inner: Arc<Inner<T>>,
    info: SourceInfo,
    mut source: S,
    stop: Receiver<()>,
    state: Arc<SourceState>,
) where
    T: Send + 'static,
    S: Source,
    S::Item: TryInto<T>,
    <S::Item as TryInto<T>>::Error: fmt::Debug,
{
    let outcome = loop {
        if state.closed.load(Ordering::Acquire) {
            break None;
        }

        match source.pull(&stop) {
            Ok(Some(item)) => match item.try_into() {
                Ok(message) => {
                    let forwarded = select! {
                        send(inner.queue_tx, message) -> sent => sent.is_ok(),
                        recv(stop) -> _ => false,
                    };
                    if !forwarded {
                        break None;
                    }
                }
                Err(rejected) => inner.report_rejection(&info, &format!("{rejected:?}")),
            },
            Ok(None) => break Some(CloseReason::EndOfStream),
            Err(SourceError::Decode(detail)) => inner.report_rejection(&info, &detail),
            Err(SourceError::Interrupted) => break None,
            Err(SourceError::Io(e)) => break Some(CloseReason::Failed(e.to_string())),
        }
    };

    // a failure caused by close_source unblocking the source is the close itself
    if let Some(reason) = outcome {
        if !state.closed.swap(true, Ordering::AcqRel) {
            Mux { inner }.fire_closed(&info, &reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        rejected: AtomicUsize,
        closed: AtomicUsize,
    }

    impl<T> MuxListener<T> for Counting {
        fn on_filter_rejected(&self, _source: &SourceInfo, _detail: &str) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
        }

        fn on_source_closed(&self, _mux: &Mux<T>, _source: &SourceInfo, _reason: &CloseReason) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn debug_output_reports_name_and_state() {
        let mux: Mux<u32> = Mux::new("printable", 4);
        let (_tx, rx) = bounded::<u32>(1);
        mux.add_source("chan", ChannelSource::new(rx)).unwrap();

        let open = format!("{mux:?}");
        assert!(open.contains("printable"), "{open}");
        assert!(open.contains("sources: 1"), "{open}");
        assert!(open.contains("closed: false"), "{open}");

        mux.close();
        assert!(format!("{mux:?}").contains("closed: true"));
    }

    #[test]
    fn take_after_close_fails() {
        let mux: Mux<u32> = Mux::new("test", 4);
        mux.close();
        assert_eq!(mux.take(), Err(MuxError::Closed));
        assert!(matches!(
            mux.add_source("late", ChannelSource::new(bounded::<u32>(1).1)),
            Err(MuxError::Closed)
        ));
    }

    #[test]
    fn close_unblocks_waiting_consumer() {
        let mux: Mux<u32> = Mux::new("test", 4);
        let consumer = {
            let mux = mux.clone();
            thread::spawn(move || mux.take())
        };
        thread::sleep(Duration::from_millis(50));
        mux.close();
        assert_eq!(consumer.join().unwrap(), Err(MuxError::Closed));
    }

    #[test]
    fn close_listener_fires_once_per_source() {
        let mux: Mux<u32> = Mux::new("test", 4);
        let listener = Arc::new(Counting::default());
        mux.add_listener(listener.clone());

        let (tx, rx) = bounded::<u32>(1);
        let id = mux.add_source("chan", ChannelSource::new(rx)).unwrap();

        assert!(mux.close_source(id, false));
        assert!(mux.close_source(id, false));
        assert!(!mux.is_source_open(id));
        assert_eq!(mux.source_ids(), vec![id]);

        assert!(mux.close_source(id, true));
        assert!(mux.source_ids().is_empty());
        assert!(!mux.close_source(id, true));

        assert_eq!(listener.closed.load(Ordering::SeqCst), 1);
        drop(tx);
    }

    #[test]
    fn end_of_stream_is_reported_not_raised() {
        let mux: Mux<u32> = Mux::new("test", 4);
        let listener = Arc::new(Counting::default());
        mux.add_listener(listener.clone());

        let (tx, rx) = bounded::<u32>(1);
        mux.add_source("chan", ChannelSource::new(rx)).unwrap();
        tx.send(7).unwrap();
        drop(tx);

        assert_eq!(mux.take(), Ok(7));
        assert_eq!(mux.take_timeout(Duration::from_millis(50)), Ok(None));
        assert_eq!(listener.closed.load(Ordering::SeqCst), 1);
        mux.close();
        assert_eq!(listener.closed.load(Ordering::SeqCst), 1);
    }
}
