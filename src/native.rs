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

//! The boundary between the engine and the native session store.
//!
//! The engine never touches key material itself. It drives a store through
//! these traits and maps the store's errors into [`CryptoFailure`]s with an
//! injected [`FailureMapper`].
//!
//! [`CryptoFailure`]: crate::CryptoFailure
//! [`FailureMapper`]: crate::FailureMapper

use std::path::Path;

use crate::cryptobox::{BoxSession, CryptoBox, CryptoBoxError, CryptoBoxOptions, PreKeyBundle};

/// A stateful, on-disk store of sessions and pre-keys.
pub trait NativeStore: Sized {
    /// Whatever, besides the directory, the store needs to be opened.
    type Options;
    /// A session loaded from the store.
    type Session: NativeSession<Error = Self::Error>;
    /// The store's representation of a public pre-key.
    type PreKey;
    /// The store's error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the store in an existing directory, initializing it if empty.
    fn open(path: &Path, options: &Self::Options) -> Result<Self, Self::Error>;

    /// Release the store.
    fn close(self);

    /// The fingerprint of the local identity.
    fn local_fingerprint(&self) -> String;

    /// Load a persisted session.
    fn session_load(&mut self, session_id: &str) -> Result<Option<Self::Session>, Self::Error>;

    /// Persist a session. Nothing a session does in memory is durable before
    /// this is called.
    fn session_save(&mut self, session: &mut Self::Session) -> Result<(), Self::Error>;

    /// Remove a persisted session.
    fn session_delete(&mut self, session_id: &str) -> Result<(), Self::Error>;

    /// Create an outbound session from a serialized remote pre-key.
    fn session_from_prekey(
        &mut self,
        session_id: &str,
        prekey: &[u8],
    ) -> Result<Self::Session, Self::Error>;

    /// Create an inbound session from the first message of a remote device,
    /// returning the decrypted message alongside.
    fn session_from_message(
        &mut self,
        session_id: &str,
        message: &[u8],
    ) -> Result<(Self::Session, Vec<u8>), Self::Error>;

    /// Generate `count` ordinary pre-keys with ids starting at `start`.
    fn new_prekeys(&mut self, start: u16, count: u16) -> Result<Vec<Self::PreKey>, Self::Error>;

    /// The last-resort pre-key.
    fn new_last_prekey(&mut self) -> Result<Self::PreKey, Self::Error>;
}

/// A session with a single remote device.
pub trait NativeSession {
    /// The error type of the owning store.
    type Error;

    /// Encrypt a plaintext, advancing the session in memory.
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Self::Error>;

    /// Decrypt a ciphertext, advancing the session in memory.
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Self::Error>;

    /// The fingerprint of the remote device.
    fn remote_fingerprint(&self) -> String;
}

impl NativeStore for CryptoBox {
    type Options = CryptoBoxOptions;
    type Session = BoxSession;
    type PreKey = PreKeyBundle;
    type Error = CryptoBoxError;

    fn open(path: &Path, options: &Self::Options) -> Result<Self, Self::Error> {
        CryptoBox::open(path, options)
    }

    fn close(self) {}

    fn local_fingerprint(&self) -> String {
        self.fingerprint()
    }

    fn session_load(&mut self, session_id: &str) -> Result<Option<Self::Session>, Self::Error> {
        CryptoBox::session_load(self, session_id)
    }

    fn session_save(&mut self, session: &mut Self::Session) -> Result<(), Self::Error> {
        CryptoBox::session_save(self, session)
    }

    fn session_delete(&mut self, session_id: &str) -> Result<(), Self::Error> {
        CryptoBox::session_delete(self, session_id)
    }

    fn session_from_prekey(
        &mut self,
        session_id: &str,
        prekey: &[u8],
    ) -> Result<Self::Session, Self::Error> {
        CryptoBox::session_from_prekey(self, session_id, prekey)
    }

    fn session_from_message(
        &mut self,
        session_id: &str,
        message: &[u8],
    ) -> Result<(Self::Session, Vec<u8>), Self::Error> {
        CryptoBox::session_from_message(self, session_id, message)
    }

    fn new_prekeys(&mut self, start: u16, count: u16) -> Result<Vec<Self::PreKey>, Self::Error> {
        CryptoBox::new_prekeys(self, start, count)
    }

    fn new_last_prekey(&mut self) -> Result<Self::PreKey, Self::Error> {
        CryptoBox::new_last_prekey(self)
    }
}

impl NativeSession for BoxSession {
    type Error = CryptoBoxError;

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Self::Error> {
        Ok(BoxSession::encrypt(self, plaintext))
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Self::Error> {
        BoxSession::decrypt(self, ciphertext)
    }

    fn remote_fingerprint(&self) -> String {
        self.remote_identity().fingerprint()
    }
}
