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

//! A persistent store of identity keys, pre-keys and sessions.
//!
//! The store keeps every piece of state in its own encrypted file below the
//! store directory:
//!
//! ```text
//! identities/local        the identity key pair of this device
//! prekeys/<id>            one file per unused pre-key
//! sessions/<session id>   one file per session
//! ```
//!
//! Sessions are always loaded fresh from disk and only written back by
//! [`CryptoBox::session_save()`], so a session that advanced in memory but was
//! never saved leaves no trace.

mod identity;
mod messages;
mod prekey;
mod session;

use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub use identity::IdentityKeys;
use identity::IdentityKeyPair;
pub use messages::{Envelope, Message, MessageType, PreKeyMessage};
pub use prekey::{PreKeyBundle, PreKeyId};
use prekey::PreKeyPair;
use serde::{Serialize, de::DeserializeOwned};
pub use session::{DecryptionError, Session, SessionCreationError};
use thiserror::Error;
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    DecodeError, KeyError, PickleError,
    types::SignatureError,
    utilities::{is_safe_file_name, pickle, unpickle, write_atomically},
};

const IDENTITIES_DIR: &str = "identities";
const LOCAL_IDENTITY: &str = "local";
const PREKEYS_DIR: &str = "prekeys";
const SESSIONS_DIR: &str = "sessions";

/// Error type for the [`CryptoBox`] store.
#[derive(Debug, Error)]
pub enum CryptoBoxError {
    /// Reading or writing a store file failed.
    #[error("The store couldn't be accessed: {0}")]
    Io(#[from] io::Error),
    /// A store file couldn't be decrypted or deserialized.
    #[error("A store file couldn't be read: {0}")]
    Pickle(#[from] PickleError),
    /// A message or pre-key bundle couldn't be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// A key in a pre-key bundle was unusable.
    #[error(transparent)]
    Key(#[from] KeyError),
    /// A pre-key bundle wasn't signed by the identity it contains.
    #[error("The pre-key bundle has an invalid signature: {0}")]
    Signature(#[from] SignatureError),
    /// A message couldn't be decrypted with an existing session.
    #[error(transparent)]
    Decryption(#[from] DecryptionError),
    /// A session couldn't be created from a pre-key message.
    #[error(transparent)]
    SessionCreation(#[from] SessionCreationError),
    /// The pre-key a message was encrypted for doesn't exist (anymore).
    #[error("The pre-key with the id {0} doesn't exist")]
    PreKeyNotFound(PreKeyId),
    /// A session was to be created from a message that isn't a pre-key
    /// message.
    #[error("The message isn't a pre-key message")]
    NotAPreKeyMessage,
    /// The session id can't be used as a file name.
    #[error("Invalid session id {0:?}")]
    InvalidSessionId(String),
}

/// The key protecting every file of a [`CryptoBox`].
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PickleKey(Box<[u8; 32]>);

impl PickleKey {
    /// Create a pickle key from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Box::new(bytes))
    }

    fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for PickleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PickleKey(..)")
    }
}

/// Options for opening a [`CryptoBox`].
#[derive(Clone, Debug)]
pub struct CryptoBoxOptions {
    /// The key the store files are encrypted with.
    pub pickle_key: PickleKey,
}

impl CryptoBoxOptions {
    /// Options using the given pickle key.
    pub fn new(pickle_key: PickleKey) -> Self {
        Self { pickle_key }
    }
}

/// A session loaded from, or about to be saved to, a [`CryptoBox`].
pub struct BoxSession {
    id: String,
    session: Session,
    consumed_prekey: Option<PreKeyId>,
}

impl BoxSession {
    /// The id the session is stored under.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The identity keys of the remote device.
    pub fn remote_identity(&self) -> IdentityKeys {
        self.session.remote_identity()
    }

    /// Encrypt a plaintext, returning the encoded [`Envelope`].
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Vec<u8> {
        self.session.encrypt(plaintext).to_bytes()
    }

    /// Decrypt an encoded [`Envelope`].
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoBoxError> {
        let envelope = Envelope::from_bytes(ciphertext)?;
        Ok(self.session.decrypt(&envelope)?)
    }
}

impl std::fmt::Debug for BoxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxSession")
            .field("id", &self.id)
            .field("remote_fingerprint", &self.remote_identity().fingerprint())
            .field("consumed_prekey", &self.consumed_prekey)
            .finish_non_exhaustive()
    }
}

/// The on-disk session store of a single device.
pub struct CryptoBox {
    path: PathBuf,
    pickle_key: PickleKey,
    identity: IdentityKeyPair,
}

impl CryptoBox {
    /// Open the store in the given directory, creating a new identity if the
    /// directory doesn't contain one yet.
    pub fn open(path: &Path, options: &CryptoBoxOptions) -> Result<Self, CryptoBoxError> {
        for dir in [IDENTITIES_DIR, PREKEYS_DIR, SESSIONS_DIR] {
            fs::create_dir_all(path.join(dir))?;
        }

        let identity_path = path.join(IDENTITIES_DIR).join(LOCAL_IDENTITY);
        let pickle_key = options.pickle_key.clone();

        let identity = match read_pickle(&identity_path, &pickle_key)? {
            Some(identity) => identity,
            None => {
                let identity = IdentityKeyPair::new();
                write_pickle(&identity_path, &identity, &pickle_key)?;
                debug!(path = %path.display(), "Created a new local identity");

                identity
            }
        };

        Ok(Self { path: path.to_owned(), pickle_key, identity })
    }

    /// The directory of this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The public identity keys of this device.
    pub fn identity_keys(&self) -> IdentityKeys {
        self.identity.public_keys()
    }

    /// The fingerprint of this device.
    pub fn fingerprint(&self) -> String {
        self.identity_keys().fingerprint()
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf, CryptoBoxError> {
        if is_safe_file_name(session_id) {
            Ok(self.path.join(SESSIONS_DIR).join(session_id))
        } else {
            Err(CryptoBoxError::InvalidSessionId(session_id.to_owned()))
        }
    }

    fn prekey_path(&self, prekey_id: PreKeyId) -> PathBuf {
        self.path.join(PREKEYS_DIR).join(prekey_id.to_string())
    }

    /// Load a session, `None` if no session with the given id was saved.
    pub fn session_load(&self, session_id: &str) -> Result<Option<BoxSession>, CryptoBoxError> {
        let session = read_pickle(&self.session_path(session_id)?, &self.pickle_key)?;

        Ok(session.map(|session| BoxSession {
            id: session_id.to_owned(),
            session,
            consumed_prekey: None,
        }))
    }

    /// Persist a session. A pre-key consumed to create the session is removed
    /// once the session is safely on disk.
    pub fn session_save(&self, session: &mut BoxSession) -> Result<(), CryptoBoxError> {
        write_pickle(&self.session_path(&session.id)?, &session.session, &self.pickle_key)?;
        trace!(session_id = %session.id, "Saved a session");

        if let Some(prekey_id) = session.consumed_prekey.take() {
            remove_file(&self.prekey_path(prekey_id))?;
            debug!(session_id = %session.id, %prekey_id, "Removed a consumed pre-key");
        }

        Ok(())
    }

    /// Remove a session, it's not an error if it doesn't exist.
    pub fn session_delete(&self, session_id: &str) -> Result<(), CryptoBoxError> {
        Ok(remove_file(&self.session_path(session_id)?)?)
    }

    /// Create a new outbound session from an encoded [`PreKeyBundle`].
    ///
    /// The session isn't saved.
    pub fn session_from_prekey(
        &self,
        session_id: &str,
        prekey: &[u8],
    ) -> Result<BoxSession, CryptoBoxError> {
        // Validate before doing any work.
        self.session_path(session_id)?;

        let bundle = PreKeyBundle::from_bytes(prekey)?;
        bundle.verify()?;

        let session = Session::new_outbound(&self.identity, &bundle)?;
        debug!(session_id, prekey_id = %bundle.prekey_id(), "Created an outbound session");

        Ok(BoxSession { id: session_id.to_owned(), session, consumed_prekey: None })
    }

    /// Create a new inbound session from an encoded pre-key message, returning
    /// the session and the decrypted message.
    ///
    /// The session isn't saved, and the consumed pre-key stays in the store
    /// until it is.
    pub fn session_from_message(
        &self,
        session_id: &str,
        message: &[u8],
    ) -> Result<(BoxSession, Vec<u8>), CryptoBoxError> {
        self.session_path(session_id)?;

        let Envelope::PreKey(message) = Envelope::from_bytes(message)? else {
            return Err(CryptoBoxError::NotAPreKeyMessage);
        };

        let prekey_id = message.prekey_id();
        let prekey: PreKeyPair = read_pickle(&self.prekey_path(prekey_id), &self.pickle_key)?
            .ok_or(CryptoBoxError::PreKeyNotFound(prekey_id))?;

        let (session, plaintext) = Session::new_inbound(&self.identity, &prekey, &message)?;
        debug!(session_id, %prekey_id, "Created an inbound session");

        let consumed_prekey = (!prekey_id.is_last()).then_some(prekey_id);

        Ok((BoxSession { id: session_id.to_owned(), session, consumed_prekey }, plaintext))
    }

    /// Generate and persist `count` pre-keys with consecutive ids starting
    /// at `start`, see [`PreKeyId::nth_after()`].
    pub fn new_prekeys(&self, start: u16, count: u16) -> Result<Vec<PreKeyBundle>, CryptoBoxError> {
        (0..count)
            .map(|offset| {
                let prekey = PreKeyPair::new(PreKeyId::nth_after(start, offset));
                write_pickle(&self.prekey_path(prekey.id()), &prekey, &self.pickle_key)?;

                Ok(prekey.bundle(&self.identity))
            })
            .collect()
    }

    /// The last-resort pre-key, created on first use.
    pub fn new_last_prekey(&self) -> Result<PreKeyBundle, CryptoBoxError> {
        let path = self.prekey_path(PreKeyId::LAST);

        let prekey = match read_pickle::<PreKeyPair>(&path, &self.pickle_key)? {
            Some(prekey) => prekey,
            None => {
                let prekey = PreKeyPair::new(PreKeyId::LAST);
                write_pickle(&path, &prekey, &self.pickle_key)?;

                prekey
            }
        };

        Ok(prekey.bundle(&self.identity))
    }
}

impl std::fmt::Debug for CryptoBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoBox")
            .field("path", &self.path)
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

fn read_pickle<T: DeserializeOwned>(
    path: &Path,
    pickle_key: &PickleKey,
) -> Result<Option<T>, CryptoBoxError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(unpickle(&contents, pickle_key.as_bytes())?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_pickle<T: Serialize>(
    path: &Path,
    thing: &T,
    pickle_key: &PickleKey,
) -> Result<(), CryptoBoxError> {
    let pickled = pickle(thing, pickle_key.as_bytes())?;
    Ok(write_atomically(path, pickled)?)
}

fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}
