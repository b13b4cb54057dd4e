//! # Butler - the per-connection actor
//!
//! A butler serves exactly one client connection and holds at most one
//! logged-in account and at most one active player. It runs two workers so
//! that a stalled socket never blocks world events and vice versa:
//!
//! * **clientside** - drains a [`Mux`] over the decoded wire stream and an
//!   internal queue of handoff orders, and executes client requests;
//! * **serverside** - drains the bounded queue that map managers send
//!   [`RegionEvent`]s to, authorizes each event and writes it to the
//!   client.
//!
//! ## Authorization
//!
//! Every region event names the region it came from. Events from any region
//! other than the active player's are dropped; events without a source
//! (private chat relayed from another region) are always accepted.
//!
//! ## Shutdown
//!
//! Shutdown is triggered by a disconnect request, a transport failure, or
//! the admin `stop_all` broadcast. An atomic flag makes the cleanup run
//! exactly once, in this order:
//!
//! 1. close the inbound mux (this also unblocks the socket),
//! 2. stop both workers,
//! 3. log out, which unloads and saves the active player,
//! 4. leave the butler registry, give back the connection slot and close
//!    the connection.
//!
//! When shutdown is requested from one of the butler's own workers the
//! cleanup moves to a separate thread, because stopping a worker waits for
//! every thread except the caller's.

mod clientside;
pub mod handoff;
mod serverside;

use crate::error::ServerError;
use crate::messages::{ButlerRef, ButlerTask, ClientEvent, RegionEvent};
use crate::player::Account;
use crate::registry::ConnectionSlot;
use crate::types::{ButlerId, Field, RegionId};
use crate::wire::{Connection, Outbound};
use crate::world::WorldContext;
use actor_runtime::{ChannelSource, CloseReason, Mux, MuxListener, SourceInfo, StopOptions, Worker};
use clientside::Clientside;
use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use serverside::Serverside;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const WIRE_SOURCE: &str = "wire";
const INTERNAL_SOURCE: &str = "internal";

/// Mailbox sizes, timeouts and spawn point used by every butler.
#[derive(Debug, Clone)]
pub struct ButlerSettings {
    pub serverside_capacity: usize,
    pub clientside_capacity: usize,
    pub internal_capacity: usize,
    /// Upper bound for waiting on a region's register/unregister ack.
    pub handoff_timeout: Duration,
    pub spawn_region: RegionId,
    pub spawn_position: Field,
}

impl Default for ButlerSettings {
    fn default() -> Self {
        Self {
            serverside_capacity: 128,
            clientside_capacity: 64,
            internal_capacity: 8,
            handoff_timeout: Duration::from_secs(5),
            spawn_region: RegionId::from("meadow"),
            spawn_position: Field::new(5, 5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActivePlayer {
    pub(crate) name: String,
    pub(crate) region: RegionId,
}

#[derive(Debug, Default)]
pub(crate) struct Session {
    pub(crate) account: Option<Account>,
    pub(crate) active: Option<ActivePlayer>,
}

pub struct Butler {
    id: ButlerId,
    peer: String,
    context: Arc<WorldContext>,
    session: Mutex<Session>,
    clientside: Worker,
    serverside: Worker,
    inbox: Mux<ButlerTask>,
    internal: Sender<ButlerTask>,
    outbound: Mutex<Box<dyn Outbound>>,
    events: Sender<RegionEvent>,
    shutting_down: AtomicBool,
    slot: Mutex<Option<ConnectionSlot>>,
    done_signal: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
}

impl fmt::Debug for Butler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Butler")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

impl Butler {
    /// Wires a connection into a new butler and starts both workers. The
    /// butler holds `slot` until its cleanup has finished.
    ///
    /// # Errors
    ///
    /// Fails if the butler's threads cannot be started. Only this butler is
    /// affected; the connection is closed and the slot given back.
    pub fn create(
        context: Arc<WorldContext>,
        connection: Connection,
        slot: ConnectionSlot,
    ) -> Result<Arc<Butler>, ServerError> {
        let id = ButlerId::new();
        let settings = context.settings.clone();
        let (events, events_rx) = bounded(settings.serverside_capacity.max(1));
        let (internal, internal_rx) = bounded(settings.internal_capacity.max(1));
        let (done_signal, done) = bounded(0);
        let short = id.short();

        let butler = Arc::new(Butler {
            id,
            peer: connection.peer,
            context: Arc::clone(&context),
            session: Mutex::new(Session::default()),
            clientside: Worker::new(format!("butler-{short}-client")),
            serverside: Worker::new(format!("butler-{short}-server")),
            inbox: Mux::new(format!("butler-{short}"), settings.clientside_capacity),
            internal,
            outbound: Mutex::new(connection.outbound),
            events,
            shutting_down: AtomicBool::new(false),
            slot: Mutex::new(Some(slot)),
            done_signal: Mutex::new(Some(done_signal)),
            done,
        });

        context.butlers.insert(Arc::clone(&butler));
        if let Err(e) = butler.start(events_rx, internal_rx, connection.inbound) {
            error!("❌ Could not start butler for {}: {}", butler.peer, e);
            context.butlers.remove(&butler.id);
            butler.shutting_down.store(true, Ordering::Release);
            butler.inbox.close();
            butler.clientside.stop(StopOptions::default());
            butler.serverside.stop(StopOptions::default());
            butler.outbound.lock().close();
            butler.slot.lock().take();
            butler.done_signal.lock().take();
            return Err(e);
        }

        info!("👋 Connection {} from {} accepted", short, butler.peer);
        Ok(butler)
    }

    fn start(
        self: &Arc<Self>,
        events: Receiver<RegionEvent>,
        internal: Receiver<ButlerTask>,
        wire: Box<dyn actor_runtime::Source<Item = crate::messages::WireMessage>>,
    ) -> Result<(), ServerError> {
        self.inbox.add_listener(Arc::new(InboxWatch {
            butler: Arc::downgrade(self),
        }));
        self.inbox.add_source(INTERNAL_SOURCE, ChannelSource::new(internal))?;
        self.inbox.add_source(WIRE_SOURCE, wire)?;

        self.write(ClientEvent::Welcome {
            session: self.id.to_string(),
        });
        self.serverside.start(
            events,
            Serverside {
                butler: Arc::clone(self),
            },
        )?;
        self.clientside.start(
            self.inbox.clone(),
            Clientside {
                butler: Arc::clone(self),
            },
        )?;
        Ok(())
    }

    pub fn id(&self) -> ButlerId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Address region actors use to reach this butler.
    pub fn butler_ref(&self) -> ButlerRef {
        ButlerRef::new(self.id, self.events.clone())
    }

    pub fn account_name(&self) -> Option<String> {
        self.session.lock().account.as_ref().map(|a| a.name.clone())
    }

    /// Name and region of the active player.
    pub fn active_player(&self) -> Option<(String, RegionId)> {
        self.session
            .lock()
            .active
            .as_ref()
            .map(|a| (a.name.clone(), a.region.clone()))
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn context(&self) -> &WorldContext {
        &self.context
    }

    pub(crate) fn session(&self) -> parking_lot::MutexGuard<'_, Session> {
        self.session.lock()
    }

    pub(crate) fn internal(&self) -> &Sender<ButlerTask> {
        &self.internal
    }

    /// Writes one event to the client. Write failures are left to the
    /// reading side, which sees the same broken transport.
    pub(crate) fn write(&self, event: ClientEvent) {
        if let Err(e) = self.outbound.lock().write_event(&event) {
            debug!(butler = %self.id.short(), "write failed: {}", e);
        }
    }

    /// Tells the client why it is being disconnected, then shuts down.
    pub fn kick(self: &Arc<Self>, reason: &str) {
        if !self.is_shutting_down() {
            self.write(ClientEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
        self.shutdown(reason);
    }

    /// Shuts the butler down. Safe to call concurrently and repeatedly;
    /// the cleanup runs once. Callers outside the butler's own workers
    /// return after the cleanup has finished.
    pub fn shutdown(self: &Arc<Self>, reason: &str) {
        let own_thread = self.clientside.is_current_thread() || self.serverside.is_current_thread();

        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            if own_thread {
                let butler = Arc::clone(self);
                let reason_owned = reason.to_string();
                let spawned = thread::Builder::new()
                    .name(format!("butler-{}-shutdown", self.id.short()))
                    .spawn(move || butler.cleanup(&reason_owned));
                if let Err(e) = spawned {
                    warn!("Could not spawn shutdown thread ({}), cleaning up inline", e);
                    self.cleanup(reason);
                }
                return;
            }
            self.cleanup(reason);
            return;
        }

        if !own_thread {
            let _ = self.done.recv();
        }
    }

    fn cleanup(&self, reason: &str) {
        info!("👋 Connection {} from {} closing: {}", self.id.short(), self.peer, reason);

        self.inbox.close();
        self.clientside.stop(StopOptions::default());
        self.serverside.stop(StopOptions::default());

        match self.logout() {
            Ok(()) | Err(crate::error::ButlerError::NotLoggedIn) => {}
            Err(e) => warn!("Logout of {} during shutdown failed: {}", self.id.short(), e),
        }
        self.release_claims();

        self.context.butlers.remove(&self.id);
        self.slot.lock().take();
        self.outbound.lock().close();
        self.done_signal.lock().take();
        debug!(butler = %self.id.short(), "cleanup finished");
    }

    /// Drops whatever the session still holds after a failed logout.
    fn release_claims(&self) {
        let mut session = self.session.lock();
        if let Some(active) = session.active.take() {
            self.context.players.release(&active.name, self.id);
        }
        if let Some(account) = session.account.take() {
            self.context.sessions.release(&account.name, self.id);
        }
    }
}

/// Watches the inbound mux on behalf of its butler.
struct InboxWatch {
    butler: Weak<Butler>,
}

impl MuxListener<ButlerTask> for InboxWatch {
    fn on_filter_rejected(&self, source: &SourceInfo, detail: &str) {
        if let Some(butler) = self.butler.upgrade() {
            warn!("Connection {} sent an invalid message on {}: {}", butler.id.short(), source.label, detail);
            butler.write(ClientEvent::Error {
                message: "Invalid message".to_string(),
            });
        }
    }

    fn on_source_closed(&self, mux: &Mux<ButlerTask>, source: &SourceInfo, reason: &CloseReason) {
        if source.label != WIRE_SOURCE || *reason == CloseReason::Requested {
            return;
        }
        // closing the mux ends the clientside worker, which shuts the butler down
        debug!("Transport {} closed: {:?}", mux.name(), reason);
        mux.close();
    }
}
