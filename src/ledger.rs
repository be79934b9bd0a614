// Copyright 2021 Damir Jelić
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bookkeeping of the pre-key ids handed out per user.
//!
//! The native store doesn't remember which pre-key id it generated last, the
//! ledger does. Refilling pre-keys continues after the id recorded here.

use std::{
    collections::{BTreeMap, HashMap},
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{UserId, utilities::write_atomically};

/// Error type for [`KeyIdLedger`] implementations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The ledger couldn't be read or written.
    #[error("The ledger couldn't be accessed: {0}")]
    Io(#[from] io::Error),
    /// The ledger contents couldn't be (de)serialized.
    #[error("The ledger is malformed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persists the id of the last pre-key generated for each user.
pub trait KeyIdLedger {
    /// The id of the last pre-key generated for `owner`, if any.
    fn last_prekey_id(&self, owner: &UserId) -> Result<Option<u16>, LedgerError>;

    /// Record the id of the last pre-key generated for `owner`.
    fn update_last_prekey_id(&mut self, owner: &UserId, id: u16) -> Result<(), LedgerError>;
}

impl<L: KeyIdLedger + ?Sized> KeyIdLedger for Box<L> {
    fn last_prekey_id(&self, owner: &UserId) -> Result<Option<u16>, LedgerError> {
        (**self).last_prekey_id(owner)
    }

    fn update_last_prekey_id(&mut self, owner: &UserId, id: u16) -> Result<(), LedgerError> {
        (**self).update_last_prekey_id(owner, id)
    }
}

/// A ledger that lives in memory only.
#[derive(Clone, Debug, Default)]
pub struct MemoryLedger {
    entries: HashMap<UserId, u16>,
}

impl KeyIdLedger for MemoryLedger {
    fn last_prekey_id(&self, owner: &UserId) -> Result<Option<u16>, LedgerError> {
        Ok(self.entries.get(owner).copied())
    }

    fn update_last_prekey_id(&mut self, owner: &UserId, id: u16) -> Result<(), LedgerError> {
        self.entries.insert(owner.clone(), id);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerEntry {
    last_prekey_id: u16,
}

/// A ledger stored as a JSON document, keyed by user id.
///
/// ```json
/// { "alice": { "last_prekey_id": 99 } }
/// ```
#[derive(Clone, Debug)]
pub struct JsonFileLedger {
    path: PathBuf,
}

impl JsonFileLedger {
    /// A ledger backed by the given file. The file is created on the first
    /// update.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<UserId, LedgerEntry>, LedgerError> {
        match fs::read(&self.path) {
            Ok(contents) => Ok(serde_json::from_slice(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl KeyIdLedger for JsonFileLedger {
    fn last_prekey_id(&self, owner: &UserId) -> Result<Option<u16>, LedgerError> {
        Ok(self.load()?.get(owner).map(|entry| entry.last_prekey_id))
    }

    fn update_last_prekey_id(&mut self, owner: &UserId, id: u16) -> Result<(), LedgerError> {
        let mut entries = self.load()?;
        entries.entry(owner.clone()).or_default().last_prekey_id = id;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        write_atomically(&self.path, serde_json::to_vec_pretty(&entries)?)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;
    use tempfile::TempDir;

    use super::{JsonFileLedger, KeyIdLedger, LedgerError, MemoryLedger};
    use crate::UserId;

    #[test]
    fn memory_ledger_tracks_users_separately() {
        let mut ledger = MemoryLedger::default();
        let alice = UserId::new("alice");

        assert_eq!(ledger.last_prekey_id(&alice).unwrap(), None);
        ledger.update_last_prekey_id(&alice, 99).unwrap();

        assert_eq!(ledger.last_prekey_id(&alice).unwrap(), Some(99));
        assert_eq!(ledger.last_prekey_id(&UserId::new("bob")).unwrap(), None);
    }

    #[test]
    fn json_ledger_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("ledger.json");
        let alice = UserId::new("alice");

        JsonFileLedger::new(&path).update_last_prekey_id(&alice, 99).unwrap();
        JsonFileLedger::new(&path).update_last_prekey_id(&UserId::new("bob"), 5).unwrap();

        let ledger = JsonFileLedger::new(&path);
        assert_eq!(ledger.last_prekey_id(&alice).unwrap(), Some(99));
        assert_eq!(ledger.last_prekey_id(&UserId::new("bob")).unwrap(), Some(5));
    }

    #[test]
    fn json_ledger_updates_replace_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let alice = UserId::new("alice");
        let mut ledger = JsonFileLedger::new(&path);

        ledger.update_last_prekey_id(&alice, 99).unwrap();
        ledger.update_last_prekey_id(&alice, 199).unwrap();

        assert_eq!(ledger.last_prekey_id(&alice).unwrap(), Some(199));

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(files, ["ledger.json"]);
    }

    #[test]
    fn malformed_json_ledger_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "not json").unwrap();

        assert_matches!(
            JsonFileLedger::new(&path).last_prekey_id(&UserId::new("alice")),
            Err(LedgerError::Serialization(_))
        );
    }
}
