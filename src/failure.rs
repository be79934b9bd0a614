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

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{
    CryptoSessionId,
    cryptobox::{CryptoBoxError, DecryptionError, SessionCreationError},
    ledger::LedgerError,
};

/// The failures every [`SessionCryptoEngine`] operation reports.
///
/// Native store errors never cross the engine boundary, they are translated
/// into one of these by a [`FailureMapper`].
///
/// [`SessionCryptoEngine`]: crate::SessionCryptoEngine
#[derive(Debug, Error)]
pub enum CryptoFailure {
    /// The store directory couldn't be created or opened.
    #[error("The crypto store at {path} couldn't be initialized: {reason}")]
    Initialization {
        /// The store directory.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
    /// There is no session for the given id.
    #[error("No session exists for {0}")]
    SessionNotFound(CryptoSessionId),
    /// Persisted crypto state couldn't be read back.
    #[error("The stored crypto state is corrupted: {0}")]
    Corrupted(String),
    /// A message couldn't be decoded.
    #[error("The message couldn't be decoded: {0}")]
    Decode(String),
    /// A message didn't authenticate.
    #[error("The message couldn't be authenticated")]
    InvalidMessage,
    /// A message was already decrypted, or its key has been discarded.
    #[error("The message was already decrypted")]
    DuplicateMessage,
    /// A message is too far ahead of its chain to be decrypted.
    #[error("The message is too far in the future")]
    TooDistantFuture,
    /// A message was encrypted for a pre-key that was already used.
    #[error("The pre-key with the id {0} doesn't exist")]
    PreKeyNotFound(u16),
    /// A remote pre-key couldn't be used to start a session.
    #[error("The pre-key is invalid: {0}")]
    InvalidPreKey(String),
    /// The key-id ledger couldn't be read or written.
    #[error("The key-id ledger couldn't be updated: {0}")]
    Ledger(#[from] LedgerError),
    /// A file system operation outside of the native store failed.
    #[error("The crypto store couldn't be accessed: {0}")]
    Storage(#[from] io::Error),
    /// Anything else the native store reported.
    #[error("Unknown crypto failure: {0}")]
    Unknown(String),
}

impl CryptoFailure {
    /// Is this the failure of looking up a session that doesn't exist.
    pub fn is_session_not_found(&self) -> bool {
        matches!(self, CryptoFailure::SessionNotFound(_))
    }
}

/// Translates the errors of a native store into [`CryptoFailure`]s.
///
/// Implemented for every `Fn(E) -> CryptoFailure`.
pub trait FailureMapper<E> {
    /// Map a native error.
    fn map_failure(&self, error: E) -> CryptoFailure;
}

impl<E, F> FailureMapper<E> for F
where
    F: Fn(E) -> CryptoFailure,
{
    fn map_failure(&self, error: E) -> CryptoFailure {
        self(error)
    }
}

fn map_decryption_error(error: DecryptionError) -> CryptoFailure {
    match error {
        DecryptionError::MissingMessageKey(_) => CryptoFailure::DuplicateMessage,
        DecryptionError::TooBigMessageGap(..) => CryptoFailure::TooDistantFuture,
        DecryptionError::InvalidMac(_)
        | DecryptionError::InvalidPadding(_)
        | DecryptionError::UnexpectedRatchetKey => CryptoFailure::InvalidMessage,
    }
}

/// The [`FailureMapper`] for the [`CryptoBox`](crate::CryptoBox) store.
pub fn map_cryptobox_error(error: CryptoBoxError) -> CryptoFailure {
    match error {
        CryptoBoxError::Io(e) => CryptoFailure::Storage(e),
        CryptoBoxError::Pickle(e) => CryptoFailure::Corrupted(e.to_string()),
        CryptoBoxError::Decode(e) => CryptoFailure::Decode(e.to_string()),
        e @ CryptoBoxError::NotAPreKeyMessage => CryptoFailure::Decode(e.to_string()),
        CryptoBoxError::Key(e) => CryptoFailure::InvalidPreKey(e.to_string()),
        CryptoBoxError::Signature(e) => CryptoFailure::InvalidPreKey(e.to_string()),
        CryptoBoxError::Decryption(e) => map_decryption_error(e),
        CryptoBoxError::SessionCreation(SessionCreationError::Decryption(e)) => {
            map_decryption_error(e)
        }
        CryptoBoxError::SessionCreation(SessionCreationError::KeyAgreement(_)) => {
            CryptoFailure::InvalidMessage
        }
        CryptoBoxError::PreKeyNotFound(id) => CryptoFailure::PreKeyNotFound(id.value()),
        e @ CryptoBoxError::InvalidSessionId(_) => CryptoFailure::Unknown(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use assert_matches2::{assert_let, assert_matches};

    use super::{CryptoFailure, FailureMapper, map_cryptobox_error};
    use crate::cryptobox::{CryptoBoxError, DecryptionError, PreKeyId};

    #[test]
    fn decryption_errors_keep_their_meaning() {
        assert_matches!(
            map_cryptobox_error(DecryptionError::MissingMessageKey(3).into()),
            CryptoFailure::DuplicateMessage
        );
        assert_matches!(
            map_cryptobox_error(DecryptionError::TooBigMessageGap(2000, 1000).into()),
            CryptoFailure::TooDistantFuture
        );
        assert_matches!(
            map_cryptobox_error(CryptoBoxError::PreKeyNotFound(PreKeyId::new(4))),
            CryptoFailure::PreKeyNotFound(4)
        );
        assert_matches!(
            map_cryptobox_error(io::Error::other("disk on fire").into()),
            CryptoFailure::Storage(_)
        );
    }

    #[test]
    fn closures_are_failure_mappers() {
        let mapper = |error: String| CryptoFailure::Unknown(error);

        assert_let!(CryptoFailure::Unknown(message) = mapper.map_failure("boom".to_owned()));
        assert_eq!(message, "boom");
    }
}
