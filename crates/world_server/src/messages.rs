//! Message types, one tagged union per bus direction.
//!
//! | direction          | type              |
//! |--------------------|-------------------|
//! | client -> butler   | [`ClientRequest`] |
//! | butler -> client   | [`ClientEvent`]   |
//! | butler -> region   | [`RegionCommand`] |
//! | region -> butler   | [`RegionEvent`]   |
//!
//! On the wire both client directions travel inside a [`WireMessage`]
//! envelope. The butler's inbound filter only lets requests through.

use crate::error::RegionError;
use crate::map::RegionLink;
use crate::player::{Player, PlayerView};
use crate::types::{ButlerId, Field, RegionId};
use crossbeam::channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requests a client may send to its butler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientRequest {
    CreateAccount { account: String },
    Login { account: String },
    Logout,
    CreatePlayer { name: String },
    LoadPlayer { name: String },
    UnloadPlayer,
    Move { target: Field },
    Chat {
        text: String,
        #[serde(default)]
        to: Option<String>,
    },
    Ping,
    Disconnect,
}

/// Everything a butler writes to its client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Welcome { session: String },
    AccountCreated { account: String },
    LoggedIn { account: String, players: Vec<String> },
    LoggedOut,
    PlayerCreated { name: String },
    PlayerLoaded { player: PlayerView, region: RegionId },
    PlayerUnloaded { name: String },
    RegionSnapshot { region: RegionId, players: Vec<PlayerView> },
    PlayerAdded { player: PlayerView },
    PlayerRemoved { name: String },
    PlayerMoved { player: PlayerView },
    RegionChanged { region: RegionId, position: Field },
    Chat { from: String, text: String, private: bool },
    Error { message: String },
    Pong,
    Disconnected { reason: String },
}

/// Envelope for both client directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "direction", content = "message", rename_all = "snake_case")]
pub enum WireMessage {
    Request(ClientRequest),
    Event(ClientEvent),
}

/// Address of a butler's serverside mailbox.
#[derive(Clone)]
pub struct ButlerRef {
    id: ButlerId,
    events: Sender<RegionEvent>,
}

impl ButlerRef {
    pub fn new(id: ButlerId, events: Sender<RegionEvent>) -> Self {
        Self { id, events }
    }

    pub fn id(&self) -> ButlerId {
        self.id
    }

    /// Blocks while the mailbox is full. Returns `false` once the butler's
    /// serverside worker is gone.
    pub fn send(&self, event: RegionEvent) -> bool {
        self.events.send(event).is_ok()
    }
}

impl PartialEq for ButlerRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for ButlerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ButlerRef").field(&self.id).finish()
    }
}

/// Returned when a region refuses (or could not receive) a registration.
///
/// The player travels back to the caller whenever it was not lost in a
/// region that stopped.
#[derive(Debug)]
pub struct RegisterRejected {
    pub error: RegionError,
    pub player: Option<Box<Player>>,
}

pub type RegisterAck = Result<(), RegisterRejected>;
pub type UnregisterAck = Result<Player, RegionError>;

/// Commands a butler sends to a map manager.
#[derive(Debug)]
pub enum RegionCommand {
    Register {
        player: Box<Player>,
        butler: ButlerRef,
        persist: bool,
        ack: Sender<RegisterAck>,
    },
    /// With `departure` set the region only lets go of a player that is
    /// standing still on that field.
    Unregister {
        name: String,
        butler: ButlerRef,
        persist: bool,
        departure: Option<Field>,
        ack: Sender<UnregisterAck>,
    },
    Move {
        name: String,
        target: Field,
        butler: ButlerRef,
    },
    Chat {
        from: String,
        text: String,
        to: Option<String>,
        butler: ButlerRef,
    },
    Inspect {
        reply: Sender<RegionStatus>,
    },
}

/// Point-in-time view of one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionStatus {
    pub region: RegionId,
    pub players: Vec<PlayerView>,
    pub movers: usize,
}

impl RegionStatus {
    pub fn contains(&self, name: &str) -> bool {
        self.players.iter().any(|p| p.name == name)
    }
}

/// An event from a region to a butler.
///
/// `source` is the originating region; `None` marks chat relayed by a
/// region that does not own the recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionEvent {
    pub source: Option<RegionId>,
    pub kind: RegionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionEventKind {
    Snapshot { players: Vec<PlayerView> },
    PlayerAdded(PlayerView),
    PlayerRemoved { name: String },
    PlayerMoved(PlayerView),
    Chat { from: String, text: String, private: bool },
    /// The player finished a walk on a link into another region.
    LinkReached { player: String, link: RegionLink },
    Rejected { reason: String },
}

/// A cross-region move the butler has to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffOrder {
    pub player: String,
    pub from: RegionId,
    pub link: RegionLink,
}

/// Work for the butler's clientside worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButlerTask {
    Client(ClientRequest),
    Handoff(HandoffOrder),
}

impl From<HandoffOrder> for ButlerTask {
    fn from(order: HandoffOrder) -> Self {
        ButlerTask::Handoff(order)
    }
}

/// Inbound filter: only requests may arrive from a client.
impl TryFrom<WireMessage> for ButlerTask {
    type Error = String;

    fn try_from(message: WireMessage) -> Result<Self, Self::Error> {
        match message {
            WireMessage::Request(request) => Ok(ButlerTask::Client(request)),
            WireMessage::Event(event) => Err(format!("clients may not send events: {event:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_tagged() {
        let message = WireMessage::Request(ClientRequest::Move {
            target: Field::new(3, 4),
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "direction": "request",
                "message": { "type": "move", "data": { "target": { "x": 3, "y": 4 } } }
            })
        );

        let ping: WireMessage =
            serde_json::from_str(r#"{"direction":"request","message":{"type":"ping"}}"#).unwrap();
        assert_eq!(ping, WireMessage::Request(ClientRequest::Ping));
    }

    #[test]
    fn inbound_filter_rejects_events() {
        let request = WireMessage::Request(ClientRequest::Logout);
        assert_eq!(
            ButlerTask::try_from(request),
            Ok(ButlerTask::Client(ClientRequest::Logout))
        );
        assert!(ButlerTask::try_from(WireMessage::Event(ClientEvent::Pong)).is_err());
    }
}
