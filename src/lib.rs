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

//! End-to-end encryption sessions and notification reconciliation for
//! messaging clients.
//!
//! The crate has two halves.
//!
//! # Sessions
//!
//! [`SessionCryptoEngine`] is a façade over a stateful, on-disk session store
//! (a [`NativeStore`], in production the [`CryptoBox`]). It opens the store
//! lazily, bootstraps the pre-key inventory and encrypts and decrypts messages
//! for remote devices. Every encryption or decryption advances a double
//! ratchet; the advanced state is only written to disk once the caller
//! confirms the message was durably handled:
//!
//! ```no_run
//! # fn main() -> Result<(), cryptobox_client::CryptoFailure> {
//! use cryptobox_client::{
//!     ClientId, CryptoSessionId, EngineConfig, MemoryLedger, PickleKey, SessionCryptoEngine,
//!     UserId,
//! };
//!
//! let config = EngineConfig::new("/var/lib/messenger", UserId::new("alice"));
//! let pickle_key = PickleKey::from_bytes([0; 32]);
//! let mut engine =
//!     SessionCryptoEngine::with_cryptobox(config, pickle_key, MemoryLedger::default());
//!
//! let bob = CryptoSessionId::new(UserId::new("bob"), ClientId::new("phone"));
//! # let ciphertext = vec![];
//! let pending = engine.decrypt(&bob, &ciphertext)?;
//! println!("{:?}", pending.output());
//! // Only now is the session advanced on disk.
//! let plaintext = pending.commit()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Notifications
//!
//! [`NotificationReconciler`] follows the currently signed-in identity,
//! subscribes to that identity's notification snapshots and turns them into
//! [`NotificationDiff`]s, pairs of consecutive snapshots from which a presenter
//! derives the minimal set of notifications to show, update or cancel.

mod cipher;
mod config;
pub mod cryptobox;
mod engine;
mod failure;
mod ids;
mod ledger;
mod native;
pub mod notifications;
mod prekeys;
mod types;
mod utilities;

pub use config::{DEFAULT_PREKEY_BATCH_SIZE, EngineConfig, STORE_FOLDER};
pub use cryptobox::{CryptoBox, CryptoBoxError, CryptoBoxOptions, PickleKey};
pub use engine::{
    EncryptedMessage, Pending, PlainMessage, SessionCommit, SessionCryptoEngine, SessionLookup,
};
pub use failure::{CryptoFailure, FailureMapper, map_cryptobox_error};
pub use ids::{ClientId, ConversationId, CryptoSessionId, UserId};
pub use ledger::{JsonFileLedger, KeyIdLedger, LedgerError, MemoryLedger};
pub use native::{NativeSession, NativeStore};
pub use notifications::{NotificationDiff, NotificationReconciler};
pub use prekeys::{CryptoBoxPreKeyMapper, PreKey, PreKeyInitialization, PreKeyMapper};
pub use types::{
    Curve25519PublicKey, Curve25519SecretKey, Ed25519PublicKey, Ed25519Signature, KeyError,
    SignatureError,
};
pub use utilities::{base64_decode, base64_encode};

/// Error type describing the various ways messages and pre-key bundles can
/// fail to be decoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The message has an unknown type.
    #[error("The message has an invalid type, expected 0 or 1, got {0}")]
    InvalidMessageType(u8),
    /// The message didn't contain a version.
    #[error("The message didn't contain a version")]
    MissingVersion,
    /// The message doesn't have enough data to be correctly decoded.
    #[error("The message was too short, it didn't contain a valid payload, got {0} bytes")]
    MessageTooShort(usize),
    /// The message has an unsupported version.
    #[error("The message didn't have a valid version, expected {0}, got {1}")]
    InvalidVersion(u32, u32),
    /// The pre-key id doesn't fit into 16 bits.
    #[error("The message contained an invalid pre-key id {0}")]
    InvalidPreKeyId(u32),
    /// An embedded key or signature couldn't be decoded.
    #[error("The message contained an invalid key: {0}")]
    InvalidKey(#[from] KeyError),
    /// The protobuf body couldn't be decoded.
    #[error(transparent)]
    ProtoBufError(#[from] prost::DecodeError),
}

/// Error type describing the various ways encrypted store files can fail to be
/// read.
#[derive(Debug, thiserror::Error)]
pub enum PickleError {
    /// The pickle wasn't valid base64.
    #[error("The pickle wasn't valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The pickle was too short to contain its salt.
    #[error("The pickle didn't contain a salt")]
    MissingSalt,
    /// The pickle couldn't be decrypted.
    #[error("The pickle couldn't be decrypted: {0}")]
    Decryption(#[from] cipher::DecryptionError),
    /// The decrypted pickle couldn't be (de)serialized.
    #[error("The pickle couldn't be serialized or deserialized: {0}")]
    Serialization(#[from] serde_json::Error),
}
