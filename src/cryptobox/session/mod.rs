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

//! Double-ratchet sessions between two devices.

mod keys;
mod ratchet;
mod receiver_chain;
mod shared_secret;

use aes::cipher::block_padding::UnpadError;
use arrayvec::ArrayVec;
use hmac::digest::MacError;
use keys::{ChainKey, RemoteRatchetKey, RemoteRootKey, RootKey};
use ratchet::SendingRatchet;
use receiver_chain::ReceiverChain;
use serde::{Deserialize, Serialize};
use shared_secret::Shared3DHSecret;
use thiserror::Error;

use super::{
    identity::{IdentityKeyPair, IdentityKeys},
    messages::{Envelope, Message, PreKeyMessage},
    prekey::{PreKeyBundle, PreKeyId, PreKeyPair},
};
use crate::{
    KeyError,
    types::{Curve25519PublicKey, Curve25519SecretKey},
};

const MAX_RECEIVING_CHAINS: usize = 5;

/// Error type describing the ways decrypting a message can fail.
#[derive(Debug, Error)]
pub enum DecryptionError {
    /// The MAC didn't authenticate the message.
    #[error("The MAC of the message didn't pass validation: {0}")]
    InvalidMac(#[from] MacError),
    /// The plaintext wasn't padded correctly.
    #[error("Failed decrypting the message, invalid padding")]
    InvalidPadding(#[from] UnpadError),
    /// The key for this message was already used or has been discarded.
    #[error("The message key for the chain index {0} is missing")]
    MissingMessageKey(u64),
    /// The message is too far ahead of the receiving chain.
    #[error("The message gap was too big, got {0}, max allowed {1}")]
    TooBigMessageGap(u64, u64),
    /// The message introduced a new ratchet key while we were still waiting
    /// for our own to be acknowledged.
    #[error("The message started an unexpected ratchet step")]
    UnexpectedRatchetKey,
}

/// Error type describing failures while creating a session from an incoming
/// pre-key message.
#[derive(Debug, Error)]
pub enum SessionCreationError {
    /// The key agreement didn't produce a secure shared secret.
    #[error("The key agreement failed: {0}")]
    KeyAgreement(#[from] KeyError),
    /// The pre-key message couldn't be decrypted.
    #[error("The pre-key message couldn't be decrypted: {0}")]
    Decryption(#[from] DecryptionError),
}

/// The public keys that tie a session to its key agreement. An initiator
/// repeats them in every pre-key message until it hears back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct SessionKeys {
    identity_keys: IdentityKeys,
    base_key: Curve25519PublicKey,
    prekey_id: PreKeyId,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct ChainStore {
    inner: ArrayVec<ReceiverChain, MAX_RECEIVING_CHAINS>,
}

impl ChainStore {
    fn push(&mut self, chain: ReceiverChain) {
        if self.inner.is_full() {
            self.inner.remove(0);
        }

        self.inner.push(chain);
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn find_mut(&mut self, ratchet_key: &RemoteRatchetKey) -> Option<&mut ReceiverChain> {
        self.inner.iter_mut().rev().find(|chain| chain.belongs_to(ratchet_key))
    }
}

/// A double-ratchet session with a single remote device.
#[derive(Clone, Serialize, Deserialize)]
pub struct Session {
    session_keys: SessionKeys,
    remote_identity: IdentityKeys,
    sending_ratchet: SendingRatchet,
    receiving_chains: ChainStore,
}

impl Session {
    /// Start a session with the owner of the given pre-key bundle.
    ///
    /// The bundle's signature has to be verified by the caller.
    pub(crate) fn new_outbound(
        identity: &IdentityKeyPair,
        bundle: &PreKeyBundle,
    ) -> Result<Self, KeyError> {
        let remote_identity = bundle.identity_keys();
        let base_key = Curve25519SecretKey::new();

        let shared_secret = Shared3DHSecret::outbound(
            identity.diffie_hellman_key(),
            &base_key,
            &remote_identity.curve25519,
            &bundle.public_key(),
        )?;
        let (root_key, chain_key) = shared_secret.expand();

        Ok(Self {
            session_keys: SessionKeys {
                identity_keys: identity.public_keys(),
                base_key: Curve25519PublicKey::from(&base_key),
                prekey_id: bundle.prekey_id(),
            },
            remote_identity,
            sending_ratchet: SendingRatchet::active(
                RootKey::new(root_key),
                ChainKey::new(chain_key),
            ),
            receiving_chains: ChainStore::default(),
        })
    }

    /// Create the responder's side of a session from the first message the
    /// initiator sent, returning the session together with the plaintext.
    pub(crate) fn new_inbound(
        identity: &IdentityKeyPair,
        prekey: &PreKeyPair,
        message: &PreKeyMessage,
    ) -> Result<(Self, Vec<u8>), SessionCreationError> {
        let shared_secret = Shared3DHSecret::inbound(
            identity.diffie_hellman_key(),
            prekey.secret_key(),
            &message.identity_keys.curve25519,
            &message.base_key,
        )?;
        let (root_key, chain_key) = shared_secret.expand();

        let remote_ratchet_key = RemoteRatchetKey::from(message.message.ratchet_key);
        let mut chain = ReceiverChain::new(remote_ratchet_key, ChainKey::new(chain_key));
        let plaintext = chain.decrypt(&message.message)?;

        let mut receiving_chains = ChainStore::default();
        receiving_chains.push(chain);

        let session = Self {
            session_keys: SessionKeys {
                identity_keys: message.identity_keys,
                base_key: message.base_key,
                prekey_id: message.prekey_id,
            },
            remote_identity: message.identity_keys,
            sending_ratchet: SendingRatchet::inactive(
                RemoteRootKey::new(root_key),
                remote_ratchet_key,
            ),
            receiving_chains,
        };

        Ok((session, plaintext))
    }

    /// The identity keys of the remote device.
    pub fn remote_identity(&self) -> IdentityKeys {
        self.remote_identity
    }

    /// Has this session decrypted at least one message from the other side.
    pub fn has_received_message(&self) -> bool {
        !self.receiving_chains.is_empty()
    }

    /// Encrypt the plaintext. Until the other side has answered, messages are
    /// wrapped into pre-key messages so the other side can create its session.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Envelope {
        let message = self.sending_ratchet.encrypt(plaintext);

        if self.has_received_message() {
            Envelope::Normal(message)
        } else {
            let SessionKeys { identity_keys, base_key, prekey_id } = self.session_keys;
            Envelope::PreKey(PreKeyMessage { prekey_id, base_key, identity_keys, message })
        }
    }

    /// Decrypt a message sent over this session.
    ///
    /// The session is only modified if decryption succeeds.
    pub fn decrypt(&mut self, envelope: &Envelope) -> Result<Vec<u8>, DecryptionError> {
        let message = match envelope {
            Envelope::Normal(message) => message,
            Envelope::PreKey(prekey_message) => &prekey_message.message,
        };

        self.decrypt_message(message)
    }

    fn decrypt_message(&mut self, message: &Message) -> Result<Vec<u8>, DecryptionError> {
        let ratchet_key = RemoteRatchetKey::from(message.ratchet_key);

        if let Some(chain) = self.receiving_chains.find_mut(&ratchet_key) {
            chain.decrypt(message)
        } else {
            let (sending_ratchet, mut chain) = self.sending_ratchet.advance(ratchet_key)?;
            let plaintext = chain.decrypt(message)?;

            self.sending_ratchet = sending_ratchet;
            self.receiving_chains.push(chain);

            Ok(plaintext)
        }
    }
}
