use super::{validate_name, AccountStore};
use crate::error::StoreError;
use crate::player::{Account, Player};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// In-memory store. Records are cloned in and out, so runtime-only fields
/// behave as if they went through serialization.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: DashMap<String, Account>,
    players: DashMap<String, Player>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn stored_account(account: &Account) -> Account {
    Account {
        active: None,
        ..account.clone()
    }
}

fn stored_player(player: &Player) -> Player {
    let mut stored = player.clone();
    stored.path.clear();
    stored.animation = None;
    stored.assigned_region = None;
    stored
}

impl AccountStore for MemoryStore {
    fn create_account(&self, name: &str) -> Result<Account, StoreError> {
        validate_name(name)?;
        match self.accounts.entry(name.to_string()) {
            Entry::Occupied(_) => Err(StoreError::AccountExists(name.to_string())),
            Entry::Vacant(slot) => {
                let account = Account::new(name);
                slot.insert(account.clone());
                Ok(account)
            }
        }
    }

    fn load_account(&self, name: &str) -> Result<Account, StoreError> {
        self.accounts
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::AccountNotFound(name.to_string()))
    }

    fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        validate_name(&account.name)?;
        self.accounts
            .insert(account.name.clone(), stored_account(account));
        Ok(())
    }

    fn create_player(&self, player: &Player) -> Result<(), StoreError> {
        validate_name(&player.name)?;
        match self.players.entry(player.name.clone()) {
            Entry::Occupied(_) => Err(StoreError::PlayerExists(player.name.clone())),
            Entry::Vacant(slot) => {
                slot.insert(stored_player(player));
                Ok(())
            }
        }
    }

    fn load_player(&self, name: &str) -> Result<Player, StoreError> {
        self.players
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::PlayerNotFound(name.to_string()))
    }

    fn save_player(&self, player: &Player) -> Result<(), StoreError> {
        validate_name(&player.name)?;
        self.players
            .insert(player.name.clone(), stored_player(player));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, RegionId};

    #[test]
    fn accounts_and_players_round_trip() {
        let store = MemoryStore::new();
        let mut account = store.create_account("alice").unwrap();
        assert!(matches!(
            store.create_account("alice"),
            Err(StoreError::AccountExists(_))
        ));

        let mut player = Player::new("ada", RegionId::from("meadow"), Field::new(2, 3));
        store.create_player(&player).unwrap();
        assert!(matches!(
            store.create_player(&player),
            Err(StoreError::PlayerExists(_))
        ));

        account.players.insert("ada".into());
        account.active = Some("ada".into());
        store.save_account(&account).unwrap();
        let loaded = store.load_account("alice").unwrap();
        assert!(loaded.owns("ada"));
        assert_eq!(loaded.active, None);

        player.position = Field::new(4, 4);
        player.assigned_region = Some(RegionId::from("meadow"));
        store.save_player(&player).unwrap();
        let loaded = store.load_player("ada").unwrap();
        assert_eq!(loaded.position, Field::new(4, 4));
        assert_eq!(loaded.assigned_region, None);

        assert!(matches!(
            store.load_player("nobody"),
            Err(StoreError::PlayerNotFound(_))
        ));
    }
}
