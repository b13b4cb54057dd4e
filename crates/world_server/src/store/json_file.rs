//! File-backed store: `accounts/<name>.account.json` and
//! `players/<name>.player.json` under one data directory.

use super::{validate_name, AccountStore};
use crate::error::StoreError;
use crate::player::{Account, Player};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
pub struct JsonFileStore {
    accounts_dir: PathBuf,
    players_dir: PathBuf,
}

impl JsonFileStore {
    /// Opens (and creates if needed) the store under `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref();
        let accounts_dir = root.join("accounts");
        let players_dir = root.join("players");
        for dir in [&accounts_dir, &players_dir] {
            fs::create_dir_all(dir).map_err(|e| StoreError::DirectoryCreate(dir.clone(), e))?;
        }
        info!("💾 Using data directory {}", root.display());
        Ok(Self {
            accounts_dir,
            players_dir,
        })
    }

    fn account_path(&self, name: &str) -> PathBuf {
        self.accounts_dir.join(format!("{name}.account.json"))
    }

    fn player_path(&self, name: &str) -> PathBuf {
        self.players_dir.join(format!("{name}.player.json"))
    }
}

fn read_record<T: DeserializeOwned>(path: &Path, missing: StoreError) -> Result<T, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(missing),
        Err(e) => return Err(StoreError::FileRead(path.to_path_buf(), e)),
    };
    serde_json::from_str(&contents).map_err(|e| StoreError::Deserialization(path.to_path_buf(), e))
}

/// Writes through a uniquely named temp file and renames it into place.
fn write_record<T: Serialize>(path: &Path, label: &str, record: &T) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| StoreError::Serialization(label.to_string(), e))?;
    let temp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));

    let mut file =
        fs::File::create(&temp_path).map_err(|e| StoreError::FileWrite(temp_path.clone(), e))?;
    file.write_all(json.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| StoreError::FileWrite(temp_path.clone(), e))?;

    fs::rename(&temp_path, path)
        .map_err(|e| StoreError::FileRename(temp_path, path.to_path_buf(), e))?;
    debug!("Saved {}", label);
    Ok(())
}

/// Creates `path` exclusively, failing with `exists` if it is already there.
fn create_record<T: Serialize>(
    path: &Path,
    label: &str,
    record: &T,
    exists: StoreError,
) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| StoreError::Serialization(label.to_string(), e))?;
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(exists),
        Err(e) => return Err(StoreError::FileWrite(path.to_path_buf(), e)),
    };
    file.write_all(json.as_bytes())
        .and_then(|_| file.sync_all())
        .map_err(|e| StoreError::FileWrite(path.to_path_buf(), e))
}

impl AccountStore for JsonFileStore {
    fn create_account(&self, name: &str) -> Result<Account, StoreError> {
        validate_name(name)?;
        let account = Account::new(name);
        create_record(
            &self.account_path(name),
            &format!("account {name}"),
            &account,
            StoreError::AccountExists(name.to_string()),
        )?;
        info!("🆕 Created account {}", name);
        Ok(account)
    }

    fn load_account(&self, name: &str) -> Result<Account, StoreError> {
        validate_name(name)?;
        read_record(
            &self.account_path(name),
            StoreError::AccountNotFound(name.to_string()),
        )
    }

    fn save_account(&self, account: &Account) -> Result<(), StoreError> {
        validate_name(&account.name)?;
        write_record(
            &self.account_path(&account.name),
            &format!("account {}", account.name),
            account,
        )
    }

    fn create_player(&self, player: &Player) -> Result<(), StoreError> {
        validate_name(&player.name)?;
        create_record(
            &self.player_path(&player.name),
            &format!("player {}", player.name),
            player,
            StoreError::PlayerExists(player.name.clone()),
        )?;
        info!("🆕 Created player {}", player.name);
        Ok(())
    }

    fn load_player(&self, name: &str) -> Result<Player, StoreError> {
        validate_name(name)?;
        read_record(
            &self.player_path(name),
            StoreError::PlayerNotFound(name.to_string()),
        )
    }

    fn save_player(&self, player: &Player) -> Result<(), StoreError> {
        validate_name(&player.name)?;
        write_record(
            &self.player_path(&player.name),
            &format!("player {}", player.name),
            player,
        )
    }
}
