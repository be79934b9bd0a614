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

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{UserId, utilities::is_safe_file_name};

/// The folder below the root directory that holds one store per user.
pub const STORE_FOLDER: &str = "cryptobox";

/// How many ordinary pre-keys a device starts with.
pub const DEFAULT_PREKEY_BATCH_SIZE: u16 = 100;

fn default_prekey_batch_size() -> u16 {
    DEFAULT_PREKEY_BATCH_SIZE
}

/// Configuration of a [`SessionCryptoEngine`](crate::SessionCryptoEngine).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The application's data directory.
    pub root_dir: PathBuf,
    /// The user owning the store.
    pub owner: UserId,
    /// How many ordinary pre-keys
    /// [`create_initial_prekeys()`](crate::SessionCryptoEngine::create_initial_prekeys)
    /// generates.
    #[serde(default = "default_prekey_batch_size")]
    pub prekey_batch_size: u16,
}

impl EngineConfig {
    /// A configuration with the default pre-key batch size.
    pub fn new(root_dir: impl Into<PathBuf>, owner: UserId) -> Self {
        Self { root_dir: root_dir.into(), owner, prekey_batch_size: DEFAULT_PREKEY_BATCH_SIZE }
    }

    /// Override the number of initial pre-keys.
    pub fn with_prekey_batch_size(mut self, prekey_batch_size: u16) -> Self {
        self.prekey_batch_size = prekey_batch_size;
        self
    }

    /// The directory of the owner's store, `<root>/cryptobox/<owner>`.
    ///
    /// The engine refuses to open it unless [`has_valid_owner()`] holds.
    ///
    /// [`has_valid_owner()`]: Self::has_valid_owner
    pub fn store_path(&self) -> PathBuf {
        self.root_dir.join(STORE_FOLDER).join(self.owner.as_str())
    }

    /// Whether the owner id names exactly one directory below
    /// `<root>/cryptobox`.
    pub fn has_valid_owner(&self) -> bool {
        is_safe_file_name(self.owner.as_str())
    }

    /// The root directory.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{DEFAULT_PREKEY_BATCH_SIZE, EngineConfig};
    use crate::UserId;

    #[test]
    fn store_lives_below_the_owner_folder() {
        let config = EngineConfig::new("/data", UserId::new("alice"));

        assert_eq!(config.store_path(), Path::new("/data/cryptobox/alice"));
        assert_eq!(config.prekey_batch_size, DEFAULT_PREKEY_BATCH_SIZE);
    }

    #[test]
    fn owners_must_be_plain_names() {
        assert!(EngineConfig::new("/data", UserId::new("alice")).has_valid_owner());

        for owner in ["", ".", "..", "../bob", "alice/../bob"] {
            assert!(!EngineConfig::new("/data", UserId::new(owner)).has_valid_owner());
        }
    }

    #[test]
    fn batch_size_defaults_when_missing() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "root_dir": "/data", "owner": "bob" }"#).unwrap();

        assert_eq!(config.prekey_batch_size, 100);
        assert_eq!(config.with_prekey_batch_size(5).prekey_batch_size, 5);
    }
}
