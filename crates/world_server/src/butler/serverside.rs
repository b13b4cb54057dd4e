//! Serverside worker: authorizes region events and forwards them.

use super::Butler;
use crate::messages::{ButlerTask, ClientEvent, HandoffOrder, RegionEvent, RegionEventKind};
use crate::types::RegionId;
use actor_runtime::{Handler, Termination};
use std::sync::Arc;
use tracing::{debug, warn};

pub(super) struct Serverside {
    pub(super) butler: Arc<Butler>,
}

impl Handler for Serverside {
    type Message = RegionEvent;

    fn handle_message(&mut self, event: RegionEvent) {
        self.butler.deliver(event);
    }

    fn notify_termination(&mut self, termination: &Termination) {
        self.butler
            .shutdown(&format!("event queue ended: {termination:?}"));
    }
}

impl Butler {
    /// Only the active player's region may talk to this butler. Sourceless
    /// events are relayed private chat.
    fn is_authorized(&self, source: Option<&RegionId>) -> bool {
        match source {
            None => true,
            Some(source) => self
                .session()
                .active
                .as_ref()
                .is_some_and(|active| &active.region == source),
        }
    }

    fn deliver(&self, event: RegionEvent) {
        if !self.is_authorized(event.source.as_ref()) {
            debug!(
                butler = %self.id.short(),
                "dropping {:?} from unauthorized region {:?}",
                event.kind,
                event.source
            );
            return;
        }

        let region = event.source.clone();
        let client_event = match event.kind {
            RegionEventKind::Snapshot { players } => match region {
                Some(region) => ClientEvent::RegionSnapshot { region, players },
                None => return,
            },
            RegionEventKind::PlayerAdded(player) => ClientEvent::PlayerAdded { player },
            RegionEventKind::PlayerRemoved { name } => ClientEvent::PlayerRemoved { name },
            RegionEventKind::PlayerMoved(player) => ClientEvent::PlayerMoved { player },
            RegionEventKind::Chat { from, text, private } => ClientEvent::Chat { from, text, private },
            RegionEventKind::Rejected { reason } => ClientEvent::Error { message: reason },
            RegionEventKind::LinkReached { player, link } => {
                let Some(from) = region else {
                    warn!("Link report for {} without a source region", player);
                    return;
                };
                let order = HandoffOrder { player, from, link };
                if self.internal().send(ButlerTask::from(order)).is_err() {
                    debug!(butler = %self.id.short(), "handoff order dropped, butler is closing");
                }
                return;
            }
        };
        self.write(client_event);
    }
}
