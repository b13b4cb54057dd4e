//! Account and player persistence.
//!
//! The butler only depends on the [`AccountStore`] trait. Two
//! implementations ship with the server:
//!
//! * [`MemoryStore`] - process-local maps, used by tests and ephemeral runs;
//! * [`JsonFileStore`] - one JSON document per account and per player.
//!
//! Every operation is synchronous and returns a typed [`StoreError`]; the
//! butler reports failures to its client and aborts the request.

mod json_file;
mod memory;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::player::{Account, Player};

pub trait AccountStore: Send + Sync {
    /// Creates an empty account. Fails if the name is taken.
    fn create_account(&self, name: &str) -> Result<Account, StoreError>;

    fn load_account(&self, name: &str) -> Result<Account, StoreError>;

    fn save_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Persists a new player. Fails if the name is taken.
    fn create_player(&self, player: &Player) -> Result<(), StoreError>;

    fn load_player(&self, name: &str) -> Result<Player, StoreError>;

    fn save_player(&self, player: &Player) -> Result<(), StoreError>;
}

/// Names double as file names, so they are restricted to a safe alphabet.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name.len() <= 32
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_restricted() {
        assert!(validate_name("ada_lovelace-1").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc/passwd").is_err());
        assert!(validate_name("with space").is_err());
        assert!(validate_name(&"x".repeat(33)).is_err());
    }
}
