//! Process-wide registries shared through the world context.
//!
//! Each registry is an injected object rather than global state. Claims use
//! the map's entry API, so deciding "is this name free" and taking it is a
//! single atomic step.

use crate::butler::Butler;
use crate::map_manager::MapManagerRef;
use crate::messages::ButlerRef;
use crate::types::{ButlerId, RegionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Region id to map manager handle. Filled once at startup.
#[derive(Debug, Default)]
pub struct RegionDirectory {
    regions: HashMap<RegionId, MapManagerRef>,
}

impl RegionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, region: MapManagerRef) {
        self.regions.insert(region.id().clone(), region);
    }

    pub fn get(&self, id: &RegionId) -> Option<&MapManagerRef> {
        self.regions.get(id)
    }

    pub fn ids(&self) -> Vec<RegionId> {
        let mut ids: Vec<RegionId> = self.regions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Global index of active player names to the butler controlling them.
///
/// Used to reject loading the same player twice and to route private chat
/// across regions.
#[derive(Debug, Default)]
pub struct PlayerDirectory {
    players: DashMap<String, ButlerRef>,
}

impl PlayerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes `name` for `butler`. Returns `false` if another butler holds it.
    pub fn claim(&self, name: &str, butler: ButlerRef) -> bool {
        match self.players.entry(name.to_string()) {
            Entry::Occupied(existing) => existing.get().id() == butler.id(),
            Entry::Vacant(slot) => {
                slot.insert(butler);
                true
            }
        }
    }

    /// Releases `name` if `butler` holds it.
    pub fn release(&self, name: &str, butler: ButlerId) -> bool {
        self.players
            .remove_if(name, |_, holder| holder.id() == butler)
            .is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<ButlerRef> {
        self.players.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

/// Logged-in accounts, one butler each.
#[derive(Debug, Default)]
pub struct AccountSessions {
    sessions: DashMap<String, ButlerId>,
}

impl AccountSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, account: &str, butler: ButlerId) -> bool {
        match self.sessions.entry(account.to_string()) {
            Entry::Occupied(existing) => *existing.get() == butler,
            Entry::Vacant(slot) => {
                slot.insert(butler);
                true
            }
        }
    }

    pub fn release(&self, account: &str, butler: ButlerId) -> bool {
        self.sessions
            .remove_if(account, |_, holder| *holder == butler)
            .is_some()
    }

    pub fn holder(&self, account: &str) -> Option<ButlerId> {
        self.sessions.get(account).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// A reserved place for one connection, given back on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    occupied: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.occupied.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Every live butler, plus the connection slots they and the connections
/// still being set up hold.
#[derive(Default)]
pub struct ButlerRegistry {
    butlers: DashMap<ButlerId, Arc<Butler>>,
    occupied: Arc<AtomicUsize>,
}

impl ButlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a slot if fewer than `limit` are held. Checking and taking is
    /// one atomic step.
    pub fn try_reserve(&self, limit: usize) -> Option<ConnectionSlot> {
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| (held < limit).then_some(held + 1))
            .ok()?;
        Some(ConnectionSlot {
            occupied: Arc::clone(&self.occupied),
        })
    }

    /// Slots currently held, including connections not yet registered.
    pub fn occupied(&self) -> usize {
        self.occupied.load(Ordering::Acquire)
    }

    pub fn insert(&self, butler: Arc<Butler>) {
        self.butlers.insert(butler.id(), butler);
    }

    pub fn remove(&self, id: &ButlerId) -> Option<Arc<Butler>> {
        self.butlers.remove(id).map(|(_, butler)| butler)
    }

    pub fn get(&self, id: &ButlerId) -> Option<Arc<Butler>> {
        self.butlers.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.butlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.butlers.is_empty()
    }

    /// Admin broadcast: disconnects every butler and waits for each
    /// cleanup to finish.
    pub fn stop_all(&self, reason: &str) {
        // shutdown removes entries, so never hold a shard lock across it
        let butlers: Vec<Arc<Butler>> = self
            .butlers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        if !butlers.is_empty() {
            info!("🧹 Stopping {} connection(s): {}", butlers.len(), reason);
        }
        for butler in butlers {
            butler.kick(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;

    fn butler_ref() -> ButlerRef {
        let (tx, _rx) = bounded(1);
        ButlerRef::new(ButlerId::new(), tx)
    }

    #[test]
    fn player_claims_are_exclusive() {
        let directory = PlayerDirectory::new();
        let first = butler_ref();
        let second = butler_ref();

        assert!(directory.claim("ada", first.clone()));
        assert!(directory.claim("ada", first.clone()));
        assert!(!directory.claim("ada", second.clone()));
        assert!(!directory.release("ada", second.id()));
        assert_eq!(directory.lookup("ada").map(|b| b.id()), Some(first.id()));

        assert!(directory.release("ada", first.id()));
        assert!(directory.claim("ada", second));
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn connection_slots_respect_the_limit_and_come_back_on_drop() {
        let registry = ButlerRegistry::new();
        let first = registry.try_reserve(2).unwrap();
        let second = registry.try_reserve(2).unwrap();
        assert!(registry.try_reserve(2).is_none());
        assert_eq!(registry.occupied(), 2);

        drop(first);
        let third = registry.try_reserve(2).unwrap();
        assert!(registry.try_reserve(2).is_none());

        drop((second, third));
        assert_eq!(registry.occupied(), 0);
    }

    #[test]
    fn concurrent_reservations_never_exceed_the_limit() {
        let registry = Arc::new(ButlerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || (0..50).filter_map(|_| registry.try_reserve(5)).collect::<Vec<_>>())
            })
            .collect();
        let held: Vec<Vec<ConnectionSlot>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(held.iter().map(Vec::len).sum::<usize>(), 5);

        drop(held);
        assert_eq!(registry.occupied(), 0);
    }

    #[test]
    fn account_sessions_reject_a_second_holder() {
        let sessions = AccountSessions::new();
        let a = ButlerId::new();
        let b = ButlerId::new();

        assert!(sessions.claim("alice", a));
        assert!(!sessions.claim("alice", b));
        assert_eq!(sessions.holder("alice"), Some(a));
        assert!(sessions.release("alice", a));
        assert!(sessions.is_empty());
    }
}
