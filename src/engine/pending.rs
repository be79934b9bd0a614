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

use std::fmt;

use tracing::{debug, trace, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoFailure, CryptoSessionId, FailureMapper, NativeStore};

/// A ciphertext ready to be sent to the remote device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedMessage(Vec<u8>);

impl EncryptedMessage {
    /// The ciphertext bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the ciphertext bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for EncryptedMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// A decrypted message. The plaintext is zeroized when dropped.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PlainMessage(Vec<u8>);

impl PlainMessage {
    /// The plaintext bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Take the plaintext bytes, the caller becomes responsible for them.
    pub fn into_bytes(mut self) -> Vec<u8> {
        std::mem::take(&mut self.0)
    }
}

impl From<Vec<u8>> for PlainMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for PlainMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlainMessage({} bytes)", self.0.len())
    }
}

/// The in-memory advance of a session, waiting to be persisted.
///
/// Dropping it discards the advance: the next operation on the session loads
/// the last committed state again.
pub struct SessionCommit<'a, S: NativeStore> {
    pub(super) store: &'a mut S,
    pub(super) failure_mapper: &'a dyn FailureMapper<S::Error>,
    pub(super) session: S::Session,
    pub(super) session_id: CryptoSessionId,
}

impl<S: NativeStore> SessionCommit<'_, S> {
    /// The session that advanced.
    pub fn session_id(&self) -> &CryptoSessionId {
        &self.session_id
    }

    /// Persist the advanced session.
    pub fn commit(mut self) -> Result<(), CryptoFailure> {
        match self.store.session_save(&mut self.session) {
            Ok(()) => {
                debug!(session_id = %self.session_id, "Committed the session");
                Ok(())
            }
            Err(e) => {
                let failure = self.failure_mapper.map_failure(e);
                warn!(
                    session_id = %self.session_id,
                    error = %failure,
                    "Failed to commit the session"
                );

                Err(failure)
            }
        }
    }

    /// Drop the advanced session without persisting it.
    pub fn discard(self) {
        trace!(session_id = %self.session_id, "Discarded an uncommitted session advance");
    }
}

/// The result of an encryption or decryption whose session advance hasn't
/// been persisted yet.
///
/// Hand the output to whatever needs it, then [`commit()`](Pending::commit)
/// once it was durably handled. The engine stays borrowed until then, so no
/// other operation can interleave.
#[must_use = "the session only advances on disk once the result is committed"]
pub struct Pending<'a, S: NativeStore, T> {
    pub(super) output: T,
    pub(super) commit: SessionCommit<'a, S>,
}

impl<'a, S: NativeStore, T> Pending<'a, S, T> {
    /// The encrypted or decrypted message.
    pub fn output(&self) -> &T {
        &self.output
    }

    /// The session that advanced.
    pub fn session_id(&self) -> &CryptoSessionId {
        self.commit.session_id()
    }

    /// Persist the advanced session and return the output.
    pub fn commit(self) -> Result<T, CryptoFailure> {
        self.commit.commit()?;
        Ok(self.output)
    }

    /// Return the output without persisting the session.
    pub fn discard(self) -> T {
        self.commit.discard();
        self.output
    }

    /// Split the output from the commit handle.
    pub fn into_parts(self) -> (T, SessionCommit<'a, S>) {
        (self.output, self.commit)
    }
}
