//! Clientside worker: client requests and handoff orders.

use super::handoff::Handoff;
use super::{ActivePlayer, Butler};
use crate::error::{ButlerError, RegionError};
use crate::map_manager::MapManagerRef;
use crate::messages::{ButlerTask, ClientEvent, ClientRequest, HandoffOrder, RegisterRejected};
use crate::player::{Player, PlayerView};
use crate::types::{Field, RegionId};
use actor_runtime::{Handler, Termination};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub(super) struct Clientside {
    pub(super) butler: Arc<Butler>,
}

impl Handler for Clientside {
    type Message = ButlerTask;

    fn handle_message(&mut self, task: ButlerTask) {
        match task {
            ButlerTask::Client(request) => self.butler.handle_request(request),
            ButlerTask::Handoff(order) => self.butler.handle_handoff(order),
        }
    }

    fn notify_termination(&mut self, termination: &Termination) {
        let reason = match termination {
            Termination::MailboxClosed => "connection closed".to_string(),
            other => format!("client worker ended: {other:?}"),
        };
        self.butler.shutdown(&reason);
    }
}

impl Butler {
    fn handle_request(self: &Arc<Self>, request: ClientRequest) {
        debug!(butler = %self.id.short(), ?request, "request");
        let result = match request {
            ClientRequest::CreateAccount { account } => self.create_account(&account),
            ClientRequest::Login { account } => self.login(&account),
            ClientRequest::Logout => self.logout().map(|()| self.write(ClientEvent::LoggedOut)),
            ClientRequest::CreatePlayer { name } => self.create_player(&name),
            ClientRequest::LoadPlayer { name } => self.load_player(&name),
            ClientRequest::UnloadPlayer => self.unload_player(),
            ClientRequest::Move { target } => self.move_player(target),
            ClientRequest::Chat { text, to } => self.chat(&text, to),
            ClientRequest::Ping => {
                self.write(ClientEvent::Pong);
                Ok(())
            }
            ClientRequest::Disconnect => {
                self.kick("goodbye");
                Ok(())
            }
        };

        if let Err(e) = result {
            debug!(butler = %self.id.short(), "request refused: {}", e);
            self.write(ClientEvent::Error {
                message: e.to_string(),
            });
        }
    }

    fn region(&self, id: &RegionId) -> Result<MapManagerRef, ButlerError> {
        self.context
            .regions
            .get(id)
            .cloned()
            .ok_or_else(|| ButlerError::UnknownRegion(id.clone()))
    }

    fn active(&self) -> Result<ActivePlayer, ButlerError> {
        self.session().active.clone().ok_or(ButlerError::NoActivePlayer)
    }

    fn set_active(&self, active: Option<ActivePlayer>) {
        let mut session = self.session();
        if let Some(account) = session.account.as_mut() {
            account.active = active.as_ref().map(|a| a.name.clone());
        }
        session.active = active;
    }

    /// Forgets the active player and gives up the claim on its name.
    fn clear_active(&self, name: &str) {
        self.set_active(None);
        self.context.players.release(name, self.id);
    }

    fn create_account(&self, name: &str) -> Result<(), ButlerError> {
        let account = self.context.store.create_account(name)?;
        info!("📝 Account {} created", account.name);
        self.write(ClientEvent::AccountCreated {
            account: account.name,
        });
        Ok(())
    }

    fn login(&self, name: &str) -> Result<(), ButlerError> {
        if let Some(current) = self.account_name() {
            return Err(ButlerError::AlreadyLoggedIn(current));
        }
        let account = self.context.store.load_account(name)?;
        if !self.context.sessions.claim(&account.name, self.id) {
            return Err(ButlerError::AccountInUse(account.name));
        }

        let players = account.players.iter().cloned().collect();
        let name = account.name.clone();
        self.session().account = Some(account);
        info!("🔑 {} logged in from {}", name, self.peer);
        self.write(ClientEvent::LoggedIn {
            account: name,
            players,
        });
        Ok(())
    }

    /// Unloads the active player, saves the account and frees its name.
    pub(super) fn logout(&self) -> Result<(), ButlerError> {
        let active = {
            let session = self.session();
            if session.account.is_none() {
                return Err(ButlerError::NotLoggedIn);
            }
            session.active.is_some()
        };
        if active {
            self.unload_player()?;
        }

        let Some(mut account) = self.session().account.take() else {
            return Err(ButlerError::NotLoggedIn);
        };
        account.active = None;
        let saved = self.context.store.save_account(&account);
        self.context.sessions.release(&account.name, self.id);
        info!("🔒 {} logged out", account.name);
        saved.map_err(Into::into)
    }

    fn create_player(&self, name: &str) -> Result<(), ButlerError> {
        let mut account = self.session().account.clone().ok_or(ButlerError::NotLoggedIn)?;
        let settings = &self.context.settings;
        let player = Player::new(name, settings.spawn_region.clone(), settings.spawn_position);

        self.context.store.create_player(&player)?;
        account.players.insert(player.name.clone());
        self.context.store.save_account(&account)?;
        if let Some(current) = self.session().account.as_mut() {
            current.players.insert(player.name.clone());
        }

        info!("🧑 Player {} created for {}", player.name, account.name);
        self.write(ClientEvent::PlayerCreated { name: player.name });
        Ok(())
    }

    fn load_player(&self, name: &str) -> Result<(), ButlerError> {
        {
            let session = self.session();
            let account = session.account.as_ref().ok_or(ButlerError::NotLoggedIn)?;
            if let Some(active) = &session.active {
                return Err(ButlerError::PlayerActive(active.name.clone()));
            }
            if !account.owns(name) {
                return Err(ButlerError::NotYourPlayer(name.to_string(), account.name.clone()));
            }
        }
        if !self.context.players.claim(name, self.butler_ref()) {
            return Err(ButlerError::PlayerInUse(name.to_string()));
        }

        let entered = self.enter_world(name);
        if entered.is_err() {
            self.context.players.release(name, self.id);
        }
        entered
    }

    fn enter_world(&self, name: &str) -> Result<(), ButlerError> {
        let mut player = self.context.store.load_player(name)?;
        let settings = &self.context.settings;
        let region = match self.region(&player.region) {
            Ok(region) => region,
            Err(_) => {
                warn!("{} was saved in unknown region {}, respawning", name, player.region);
                player.region = settings.spawn_region.clone();
                player.position = settings.spawn_position;
                self.region(&settings.spawn_region)?
            }
        };

        let (region, view) = match self.place(player, region) {
            Ok(placed) => placed,
            Err(RegisterRejected {
                error: RegionError::Unwalkable(_, field, _),
                player: Some(mut player),
            }) => {
                warn!("{} was saved on blocked field {}, respawning", name, field);
                player.region = settings.spawn_region.clone();
                player.position = settings.spawn_position;
                let spawn = self.region(&settings.spawn_region)?;
                self.place(*player, spawn).map_err(|rejected| rejected.error)?
            }
            Err(rejected) => return Err(rejected.error.into()),
        };

        info!("🎮 {} entered the world in {}", name, region.id());
        self.write(ClientEvent::PlayerLoaded {
            player: view,
            region: region.id().clone(),
        });
        Ok(())
    }

    /// Makes `player` active in `region` and registers it there.
    fn place(&self, player: Player, region: MapManagerRef) -> Result<(MapManagerRef, PlayerView), RegisterRejected> {
        // active first: the region's snapshot may arrive before the ack
        self.set_active(Some(ActivePlayer {
            name: player.name.clone(),
            region: region.id().clone(),
        }));
        let view = player.view();
        let timeout = self.context.settings.handoff_timeout;

        match region.register(player, self.butler_ref(), true, timeout) {
            Ok(()) => Ok((region, view)),
            Err(rejected) => {
                self.set_active(None);
                Err(rejected)
            }
        }
    }

    fn unload_player(&self) -> Result<(), ButlerError> {
        let active = self.active()?;
        let timeout = self.context.settings.handoff_timeout;
        let released = self
            .region(&active.region)
            .map_err(|_| RegionError::Unavailable(active.region.clone()))
            .and_then(|region| region.unregister(&active.name, self.butler_ref(), true, timeout));

        let player = match released {
            Ok(player) => player,
            Err(RegionError::Timeout(region)) => {
                // the region may still hold the player, so keep it active
                return Err(RegionError::Timeout(region).into());
            }
            Err(e) => {
                self.clear_active(&active.name);
                return Err(e.into());
            }
        };

        self.clear_active(&active.name);
        let saved = self.context.store.save_player(&player);
        info!("💤 {} left the world from {}", active.name, active.region);
        self.write(ClientEvent::PlayerUnloaded { name: active.name });
        saved.map_err(Into::into)
    }

    fn move_player(&self, target: Field) -> Result<(), ButlerError> {
        let active = self.active()?;
        self.region(&active.region)?
            .move_player(&active.name, target, self.butler_ref())?;
        Ok(())
    }

    fn chat(&self, text: &str, to: Option<String>) -> Result<(), ButlerError> {
        let active = self.active()?;
        self.region(&active.region)?
            .chat(&active.name, text, to, self.butler_ref())?;
        Ok(())
    }

    fn handle_handoff(&self, order: HandoffOrder) {
        if let Err(e) = self.perform_handoff(&order) {
            error!("❌ Handoff of {} from {} failed: {}", order.player, order.from, e);
            self.write(ClientEvent::Error {
                message: e.to_string(),
            });
        }
    }

    fn perform_handoff(&self, order: &HandoffOrder) -> Result<(), ButlerError> {
        let expected = ActivePlayer {
            name: order.player.clone(),
            region: order.from.clone(),
        };
        if self.session().active.as_ref() != Some(&expected) {
            debug!("Ignoring stale handoff of {} from {}", order.player, order.from);
            return Ok(());
        }
        let Some(target) = self.context.regions.get(&order.link.target).cloned() else {
            warn!("{} reached a link to unknown region {}, staying", order.player, order.link.target);
            return Ok(());
        };
        let source = self.region(&order.from)?;
        let timeout = self.context.settings.handoff_timeout;
        let mut handoff = Handoff::begin(&order.player, order.from.clone(), &order.link);

        let released = source.depart(&order.player, order.link.at, self.butler_ref(), timeout);
        let mut player = match released {
            Ok(player) => player,
            Err(RegionError::LeftLink(..)) => {
                debug!("{} walked on from the link in {}, staying", order.player, order.from);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = handoff.released(&player) {
            self.abandon(player);
            return Err(e.into());
        }
        if let Err(e) = handoff.transfer(&mut player) {
            self.abandon(player);
            return Err(e.into());
        }

        self.set_active(Some(ActivePlayer {
            name: player.name.clone(),
            region: handoff.to().clone(),
        }));
        self.write(ClientEvent::RegionChanged {
            region: handoff.to().clone(),
            position: player.position,
        });

        match target.register(player, self.butler_ref(), true, timeout) {
            Ok(()) => {
                handoff.registered()?;
                info!("🔀 {} moved from {} to {}", order.player, handoff.from(), handoff.to());
                Ok(())
            }
            Err(RegisterRejected {
                error: RegionError::Timeout(region),
                ..
            }) => Err(RegionError::Timeout(region).into()),
            Err(RegisterRejected { error, player }) => {
                match player {
                    Some(player) => self.abandon(*player),
                    None => self.clear_active(&order.player),
                }
                Err(error.into())
            }
        }
    }

    /// Saves and unloads a player that no region would take.
    fn abandon(&self, player: Player) {
        if let Err(e) = self.context.store.save_player(&player) {
            error!("❌ Could not save {}: {}", player.name, e);
        }
        self.clear_active(&player.name);
        self.write(ClientEvent::PlayerUnloaded { name: player.name });
    }
}
