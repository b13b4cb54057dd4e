//! Persistent player and account records.

use crate::types::{Direction, Field, RegionId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// A player character.
///
/// `region` is the persisted last residence. `assigned_region` is runtime
/// only: it is `Some` exactly while a map manager holds the player's
/// registration and is cleared by the releasing region during a handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub position: Field,
    #[serde(default)]
    pub direction: Direction,
    pub region: RegionId,
    #[serde(skip)]
    pub path: VecDeque<Field>,
    #[serde(skip)]
    pub animation: Option<String>,
    #[serde(skip)]
    pub assigned_region: Option<RegionId>,
}

impl Player {
    pub fn new(name: impl Into<String>, region: RegionId, position: Field) -> Self {
        Self {
            name: name.into(),
            position,
            direction: Direction::default(),
            region,
            path: VecDeque::new(),
            animation: None,
            assigned_region: None,
        }
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            name: self.name.clone(),
            position: self.position,
            direction: self.direction,
            path: self.path.iter().copied().collect(),
            animation: self.animation.clone(),
        }
    }
}

/// What other clients get to see of a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerView {
    pub name: String,
    pub position: Field,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<Field>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<String>,
}

/// A login identity owning a set of players.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(default)]
    pub players: BTreeSet<String>,
    #[serde(skip)]
    pub active: Option<String>,
}

impl Account {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            players: BTreeSet::new(),
            active: None,
        }
    }

    pub fn owns(&self, player: &str) -> bool {
        self.players.contains(player)
    }
}
