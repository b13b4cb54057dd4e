//! # Map Manager - the per-region actor
//!
//! One map manager runs per configured region for the lifetime of the
//! process. It owns the region's registry (player name to player and owning
//! butler) and is the only thread that ever touches it, so none of the
//! handlers below take a lock.
//!
//! ## Mailbox
//!
//! The worker drains a [`Mux`] that merges two sources:
//!
//! * `commands` - the bounded queue of [`RegionCommand`]s sent by butlers,
//! * `timer` - mover ticks fired by the region's [`Scheduler`].
//!
//! ## Handlers
//!
//! * **register** - rejects a second registration of the same name or a
//!   player on a field that is not walkable here, sends the full snapshot to
//!   the new butler and `PlayerAdded` to every other.
//! * **unregister** - owner check, cancels the walk, removes the player,
//!   broadcasts `PlayerRemoved` and returns the player through the ack. With
//!   `persist` the player's assigned region is cleared first, which is what
//!   the handoff waits on. A departure through a link is refused once the
//!   player has walked on.
//! * **move** - replaces any walk with a new shortest path driven by a
//!   [`Mover`]. At the end of a walk a link on the final field is applied
//!   here (same region) or reported to the owning butler (other region).
//! * **chat** - broadcast, or private delivery to a local player or, via
//!   the global player directory, to a player in another region.

pub mod mover;

use crate::error::{RegionError, ServerError};
use crate::map::RegionMap;
use crate::messages::{
    ButlerRef, RegionCommand, RegionEvent, RegionEventKind, RegionStatus, RegisterAck,
    RegisterRejected, UnregisterAck,
};
use crate::player::Player;
use crate::registry::PlayerDirectory;
use crate::types::{Field, RegionId};
use actor_runtime::{
    ChannelSource, Handler, Mux, Scheduler, SchedulerHandle, StopOptions, Termination, Worker,
};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use mover::{Mover, MoverKey, Step};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything a map manager's worker fetches.
#[derive(Debug)]
pub enum RegionInbox {
    Command(RegionCommand),
    Timer(MoverKey),
}

impl From<RegionCommand> for RegionInbox {
    fn from(command: RegionCommand) -> Self {
        RegionInbox::Command(command)
    }
}

impl From<MoverKey> for RegionInbox {
    fn from(key: MoverKey) -> Self {
        RegionInbox::Timer(key)
    }
}

/// Queue sizes and pacing of one region.
#[derive(Debug, Clone)]
pub struct RegionSettings {
    pub command_capacity: usize,
    pub mux_capacity: usize,
    pub timer_capacity: usize,
    pub step_interval: Duration,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            command_capacity: 256,
            mux_capacity: 256,
            timer_capacity: 256,
            step_interval: Duration::from_millis(150),
        }
    }
}

/// Cloneable address of a map manager.
#[derive(Clone)]
pub struct MapManagerRef {
    id: RegionId,
    commands: Sender<RegionCommand>,
}

impl fmt::Debug for MapManagerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MapManagerRef").field(&self.id).finish()
    }
}

impl MapManagerRef {
    pub fn id(&self) -> &RegionId {
        &self.id
    }

    /// Enqueues a command, blocking while the queue is full.
    pub fn send(&self, command: RegionCommand) -> Result<(), RegionError> {
        self.commands
            .send(command)
            .map_err(|_| RegionError::Unavailable(self.id.clone()))
    }

    /// Registers `player` and waits for the region to confirm.
    ///
    /// On rejection the player is handed back unless the region stopped
    /// while holding it.
    pub fn register(
        &self,
        player: Player,
        butler: ButlerRef,
        persist: bool,
        timeout: Duration,
    ) -> RegisterAck {
        let (ack, done) = bounded(1);
        let command = RegionCommand::Register {
            player: Box::new(player),
            butler,
            persist,
            ack,
        };

        if let Err(returned) = self.commands.send(command) {
            let player = match returned.into_inner() {
                RegionCommand::Register { player, .. } => Some(player),
                _ => None,
            };
            return Err(RegisterRejected {
                error: RegionError::Unavailable(self.id.clone()),
                player,
            });
        }

        match done.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(RegisterRejected {
                error: RegionError::Timeout(self.id.clone()),
                player: None,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(RegisterRejected {
                error: RegionError::Unavailable(self.id.clone()),
                player: None,
            }),
        }
    }

    /// Unregisters `name` and waits for the released player.
    pub fn unregister(
        &self,
        name: &str,
        butler: ButlerRef,
        persist: bool,
        timeout: Duration,
    ) -> UnregisterAck {
        self.release(name, butler, persist, None, timeout)
    }

    /// Unregisters `name` for a handoff through the link on `at`.
    ///
    /// Fails with [`RegionError::LeftLink`] if the player is no longer
    /// standing on `at`, leaving it registered here.
    pub fn depart(&self, name: &str, at: Field, butler: ButlerRef, timeout: Duration) -> UnregisterAck {
        self.release(name, butler, true, Some(at), timeout)
    }

    fn release(
        &self,
        name: &str,
        butler: ButlerRef,
        persist: bool,
        departure: Option<Field>,
        timeout: Duration,
    ) -> UnregisterAck {
        let (ack, done) = bounded(1);
        self.send(RegionCommand::Unregister {
            name: name.to_string(),
            butler,
            persist,
            departure,
            ack,
        })?;

        match done.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(RegionError::Timeout(self.id.clone())),
            Err(RecvTimeoutError::Disconnected) => Err(RegionError::Unavailable(self.id.clone())),
        }
    }

    pub fn move_player(&self, name: &str, target: Field, butler: ButlerRef) -> Result<(), RegionError> {
        self.send(RegionCommand::Move {
            name: name.to_string(),
            target,
            butler,
        })
    }

    pub fn chat(
        &self,
        from: &str,
        text: &str,
        to: Option<String>,
        butler: ButlerRef,
    ) -> Result<(), RegionError> {
        self.send(RegionCommand::Chat {
            from: from.to_string(),
            text: text.to_string(),
            to,
            butler,
        })
    }

    /// Registry snapshot, `None` if the region does not answer in time.
    pub fn status(&self, timeout: Duration) -> Option<RegionStatus> {
        let (reply, answer) = bounded(1);
        self.send(RegionCommand::Inspect { reply }).ok()?;
        answer.recv_timeout(timeout).ok()
    }
}

/// Owning handle of a running map manager.
pub struct MapManager {
    id: RegionId,
    commands: Sender<RegionCommand>,
    worker: Worker,
    inbox: Mux<RegionInbox>,
    scheduler: Mutex<Scheduler<MoverKey>>,
}

impl MapManager {
    /// Starts the region's timer, mailbox and worker.
    pub fn spawn(
        map: RegionMap,
        players: Arc<PlayerDirectory>,
        settings: &RegionSettings,
    ) -> Result<Self, ServerError> {
        let id = map.id.clone();
        let (commands, command_rx) = bounded(settings.command_capacity.max(1));
        let (timer_tx, timer_rx) = bounded(settings.timer_capacity.max(1));

        let scheduler = Scheduler::start(&format!("region-{id}-timer"), timer_tx)?;
        let inbox = Mux::new(format!("region-{id}"), settings.mux_capacity);
        inbox.add_source("commands", ChannelSource::new(command_rx))?;
        inbox.add_source("timer", ChannelSource::new(timer_rx))?;

        let actor = RegionActor {
            id: id.clone(),
            map,
            registry: BTreeMap::new(),
            movers: HashMap::new(),
            timer: scheduler.handle(),
            players,
            step_interval: settings.step_interval,
            next_token: 0,
        };
        let worker = Worker::new(format!("region-{id}"));
        if let Err(e) = worker.start(inbox.clone(), actor) {
            inbox.close();
            return Err(e.into());
        }

        info!("🌍 Region {} started", id);
        Ok(Self {
            id,
            commands,
            worker,
            inbox,
            scheduler: Mutex::new(scheduler),
        })
    }

    pub fn id(&self) -> &RegionId {
        &self.id
    }

    pub fn handle(&self) -> MapManagerRef {
        MapManagerRef {
            id: self.id.clone(),
            commands: self.commands.clone(),
        }
    }

    /// Stops the worker, then the mailbox and the timer. Idempotent.
    pub fn stop(&self) {
        self.worker.stop(StopOptions::default());
        if !self.inbox.is_closed() {
            self.inbox.close();
            self.scheduler.lock().stop();
            info!("🌙 Region {} stopped", self.id);
        }
    }
}

impl Drop for MapManager {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Registration {
    player: Player,
    butler: ButlerRef,
}

struct RegionActor {
    id: RegionId,
    map: RegionMap,
    registry: BTreeMap<String, Registration>,
    movers: HashMap<String, Mover>,
    timer: SchedulerHandle<MoverKey>,
    players: Arc<PlayerDirectory>,
    step_interval: Duration,
    next_token: u64,
}

impl Handler for RegionActor {
    type Message = RegionInbox;

    fn handle_message(&mut self, message: RegionInbox) {
        match message {
            RegionInbox::Command(RegionCommand::Register {
                player,
                butler,
                persist,
                ack,
            }) => self.register(*player, butler, persist, ack),
            RegionInbox::Command(RegionCommand::Unregister {
                name,
                butler,
                persist,
                departure,
                ack,
            }) => self.unregister(&name, &butler, persist, departure, ack),
            RegionInbox::Command(RegionCommand::Move {
                name,
                target,
                butler,
            }) => self.move_player(&name, target, &butler),
            RegionInbox::Command(RegionCommand::Chat {
                from,
                text,
                to,
                butler,
            }) => self.chat(&from, &text, to.as_deref(), &butler),
            RegionInbox::Command(RegionCommand::Inspect { reply }) => {
                let _ = reply.send(self.status());
            }
            RegionInbox::Timer(key) => self.tick(key),
        }
    }

    fn notify_termination(&mut self, termination: &Termination) {
        warn!("Region {} worker terminated: {:?}", self.id, termination);
    }
}

impl RegionActor {
    fn event(&self, kind: RegionEventKind) -> RegionEvent {
        RegionEvent {
            source: Some(self.id.clone()),
            kind,
        }
    }

    fn broadcast(&self, kind: RegionEventKind, except: Option<&str>) {
        for (name, registration) in &self.registry {
            if except == Some(name.as_str()) {
                continue;
            }
            if !registration.butler.send(self.event(kind.clone())) {
                debug!("Region {}: butler of {} is gone", self.id, name);
            }
        }
    }

    fn reject(id: &RegionId, butler: &ButlerRef, reason: String) {
        debug!("Region {}: {}", id, reason);
        butler.send(RegionEvent {
            source: Some(id.clone()),
            kind: RegionEventKind::Rejected { reason },
        });
    }

    fn status(&self) -> RegionStatus {
        RegionStatus {
            region: self.id.clone(),
            players: self.registry.values().map(|r| r.player.view()).collect(),
            movers: self.movers.values().filter(|m| m.is_running()).count(),
        }
    }

    fn register(&mut self, mut player: Player, butler: ButlerRef, persist: bool, ack: Sender<RegisterAck>) {
        if self.registry.contains_key(&player.name) {
            let error = RegionError::AlreadyRegistered(player.name.clone(), self.id.clone());
            warn!("{}", error);
            let _ = ack.send(Err(RegisterRejected {
                error,
                player: Some(Box::new(player)),
            }));
            return;
        }
        if !self.map.is_walkable(player.position) {
            let error = RegionError::Unwalkable(player.name.clone(), player.position, self.id.clone());
            warn!("{}", error);
            let _ = ack.send(Err(RegisterRejected {
                error,
                player: Some(Box::new(player)),
            }));
            return;
        }

        if persist {
            player.assigned_region = Some(self.id.clone());
        }
        player.region = self.id.clone();
        let name = player.name.clone();
        let view = player.view();
        self.registry.insert(
            name.clone(),
            Registration {
                player,
                butler: butler.clone(),
            },
        );

        butler.send(self.event(RegionEventKind::Snapshot {
            players: self.registry.values().map(|r| r.player.view()).collect(),
        }));
        self.broadcast(RegionEventKind::PlayerAdded(view), Some(&name));
        let _ = ack.send(Ok(()));
        info!("🧍 {} entered {} ({} present)", name, self.id, self.registry.len());
    }

    fn unregister(
        &mut self,
        name: &str,
        butler: &ButlerRef,
        persist: bool,
        departure: Option<Field>,
        ack: Sender<UnregisterAck>,
    ) {
        let Some(registration) = self.registry.get(name) else {
            let _ = ack.send(Err(RegionError::NotRegistered(name.to_string(), self.id.clone())));
            return;
        };
        if registration.butler.id() != butler.id() {
            let _ = ack.send(Err(RegionError::NotOwner(name.to_string())));
            return;
        }
        if let Some(at) = departure {
            let walking = self.movers.get(name).is_some_and(|m| m.is_running());
            if walking || registration.player.position != at {
                debug!("Region {}: {} walked on from the link at {}", self.id, name, at);
                let _ = ack.send(Err(RegionError::LeftLink(name.to_string(), at)));
                return;
            }
        }

        let Some(Registration {
            mut player,
            butler: owner,
        }) = self.registry.remove(name)
        else {
            return;
        };
        if let Some(mut mover) = self.movers.remove(name) {
            mover.stop(&mut player);
        }
        let previous_assignment = player.assigned_region.clone();
        if persist {
            player.assigned_region = None;
        }
        self.broadcast(
            RegionEventKind::PlayerRemoved {
                name: name.to_string(),
            },
            None,
        );

        if let Err(returned) = ack.send(Ok(player)) {
            // the caller gave up waiting: keep the player rather than lose it
            if let Ok(mut player) = returned.into_inner() {
                warn!("Region {}: release of {} was not collected, keeping it", self.id, name);
                player.assigned_region = previous_assignment;
                let view = player.view();
                self.registry.insert(name.to_string(), Registration { player, butler: owner });
                self.broadcast(RegionEventKind::PlayerAdded(view), Some(name));
            }
            return;
        }
        info!("🚶 {} left {} ({} present)", name, self.id, self.registry.len());
    }

    fn move_player(&mut self, name: &str, target: Field, butler: &ButlerRef) {
        let Some(registration) = self.registry.get_mut(name) else {
            Self::reject(&self.id, butler, format!("{name} is not in region {}", self.id));
            return;
        };
        if registration.butler.id() != butler.id() {
            let reason = RegionError::NotOwner(name.to_string()).to_string();
            Self::reject(&self.id, butler, reason);
            return;
        }

        if let Some(mut mover) = self.movers.remove(name) {
            mover.stop(&mut registration.player);
        }
        let from = registration.player.position;
        if from == target {
            return;
        }

        let Some(path) = self.map.find_path(from, target) else {
            Self::reject(&self.id, butler, format!("No path from {from} to {target} in {}", self.id));
            return;
        };

        self.next_token += 1;
        let key = MoverKey {
            player: name.to_string(),
            token: self.next_token,
        };
        let mover = Mover::start(
            key,
            self.step_interval,
            self.timer.clone(),
            &mut registration.player,
            path,
        );
        let view = registration.player.view();
        self.movers.insert(name.to_string(), mover);
        debug!("Region {}: {} walks {} -> {}", self.id, name, from, target);
        self.broadcast(RegionEventKind::PlayerMoved(view), None);
    }

    fn tick(&mut self, key: MoverKey) {
        let Some(mover) = self.movers.get_mut(&key.player) else {
            return;
        };
        if mover.key() != &key {
            debug!("Region {}: stale tick for {}", self.id, key.player);
            return;
        }
        let Some(registration) = self.registry.get_mut(&key.player) else {
            self.movers.remove(&key.player);
            return;
        };

        match mover.tick(&mut registration.player) {
            Step::Idle => {}
            Step::Moved(_) => {
                let view = registration.player.view();
                self.broadcast(RegionEventKind::PlayerMoved(view), None);
            }
            Step::Finished(field) => {
                self.movers.remove(&key.player);
                let view = registration.player.view();
                self.broadcast(RegionEventKind::PlayerMoved(view), None);
                self.arrive(&key.player, field);
            }
        }
    }

    /// Applies a link on the field a walk ended on.
    fn arrive(&mut self, name: &str, field: Field) {
        let Some(link) = self.map.link_at(field).cloned() else {
            return;
        };
        let Some(registration) = self.registry.get_mut(name) else {
            return;
        };

        if link.target == self.id {
            let destination = link.transform.apply(field);
            if !self.map.is_walkable(destination) {
                warn!("Region {}: link on {} leads off the grid to {}", self.id, field, destination);
                return;
            }
            registration.player.position = destination;
            let view = registration.player.view();
            debug!("Region {}: {} took a link to {}", self.id, name, destination);
            self.broadcast(RegionEventKind::PlayerMoved(view), None);
        } else {
            let owner = registration.butler.clone();
            info!("🚪 {} reached the way from {} to {}", name, self.id, link.target);
            owner.send(self.event(RegionEventKind::LinkReached {
                player: name.to_string(),
                link,
            }));
        }
    }

    fn chat(&self, from: &str, text: &str, to: Option<&str>, butler: &ButlerRef) {
        let Some(to) = to else {
            self.broadcast(
                RegionEventKind::Chat {
                    from: from.to_string(),
                    text: text.to_string(),
                    private: false,
                },
                None,
            );
            return;
        };

        let kind = RegionEventKind::Chat {
            from: from.to_string(),
            text: text.to_string(),
            private: true,
        };
        if let Some(registration) = self.registry.get(to) {
            registration.butler.send(self.event(kind));
        } else if let Some(recipient) = self.players.lookup(to) {
            recipient.send(RegionEvent { source: None, kind });
        } else {
            Self::reject(&self.id, butler, format!("{to} is not online"));
        }
    }
}
