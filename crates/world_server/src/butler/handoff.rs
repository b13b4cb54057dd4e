//! Cross-region handoff of a player.
//!
//! The owning butler moves its player from one map manager to another in
//! three steps, each gated on the previous one:
//!
//! ```text
//! Unregistering --released--> Transferring --transfer--> Registering --registered--> Complete
//! ```
//!
//! * **Unregistering** - `Unregister { persist: true }` was sent to the old
//!   region. The butler blocks on that command's ack, which carries the
//!   player with its assigned region already cleared.
//! * **Transferring** - the player belongs to no region; the link transform
//!   is applied.
//! * **Registering** - `Register { persist: true }` was sent to the new
//!   region.
//!
//! The player value itself travels inside the two commands, so at no point
//! can two regions hold it.

use crate::error::HandoffError;
use crate::map::{CoordTransform, RegionLink};
use crate::player::Player;
use crate::types::RegionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffState {
    Unregistering,
    Transferring,
    Registering,
    Complete,
}

#[derive(Debug, Clone)]
pub struct Handoff {
    player: String,
    from: RegionId,
    to: RegionId,
    transform: CoordTransform,
    state: HandoffState,
}

impl Handoff {
    pub fn begin(player: impl Into<String>, from: RegionId, link: &RegionLink) -> Self {
        Self {
            player: player.into(),
            from,
            to: link.target.clone(),
            transform: link.transform,
            state: HandoffState::Unregistering,
        }
    }

    pub fn state(&self) -> HandoffState {
        self.state
    }

    pub fn from(&self) -> &RegionId {
        &self.from
    }

    pub fn to(&self) -> &RegionId {
        &self.to
    }

    fn expect(&self, expected: HandoffState) -> Result<(), HandoffError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(HandoffError::InvalidState {
                player: self.player.clone(),
                actual: self.state,
                expected,
            })
        }
    }

    /// The old region acknowledged the release.
    pub fn released(&mut self, player: &Player) -> Result<(), HandoffError> {
        self.expect(HandoffState::Unregistering)?;
        if player.assigned_region.is_some() {
            return Err(HandoffError::StillAssigned(player.name.clone()));
        }
        self.state = HandoffState::Transferring;
        Ok(())
    }

    /// Moves the player into the coordinates of the target region.
    pub fn transfer(&mut self, player: &mut Player) -> Result<(), HandoffError> {
        self.expect(HandoffState::Transferring)?;
        player.position = self.transform.apply(player.position);
        player.region = self.to.clone();
        player.path.clear();
        player.animation = None;
        self.state = HandoffState::Registering;
        Ok(())
    }

    /// The new region confirmed the registration.
    pub fn registered(&mut self) -> Result<(), HandoffError> {
        self.expect(HandoffState::Registering)?;
        self.state = HandoffState::Complete;
        Ok(())
    }
}
