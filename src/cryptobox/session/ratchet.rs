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

use serde::{Deserialize, Serialize};

use super::{
    DecryptionError,
    keys::{ChainKey, RatchetKey, RemoteRatchetKey, RemoteRootKey, RootKey},
    receiver_chain::ReceiverChain,
};
use crate::cryptobox::messages::Message;

/// The sending side of the double ratchet.
///
/// While we are encrypting we are "active": we own the newest ratchet key and
/// a sending chain derived from it. Decrypting a message carrying a new remote
/// ratchet key makes us "inactive" until we send again, at which point a new
/// ratchet key and sending chain are generated.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub(super) enum SendingRatchet {
    Active(ActiveRatchet),
    Inactive(InactiveRatchet),
}

#[derive(Clone, Serialize, Deserialize)]
pub(super) struct ActiveRatchet {
    root_key: RootKey,
    ratchet_key: RatchetKey,
    chain_key: ChainKey,
}

#[derive(Clone, Serialize, Deserialize)]
pub(super) struct InactiveRatchet {
    root_key: RemoteRootKey,
    remote_ratchet_key: RemoteRatchetKey,
}

impl SendingRatchet {
    /// The ratchet of the session initiator, right after the key agreement.
    pub fn active(root_key: RootKey, chain_key: ChainKey) -> Self {
        Self::Active(ActiveRatchet { root_key, ratchet_key: RatchetKey::new(), chain_key })
    }

    /// The ratchet of the responder, waiting to send its first message.
    pub fn inactive(root_key: RemoteRootKey, remote_ratchet_key: RemoteRatchetKey) -> Self {
        Self::Inactive(InactiveRatchet { root_key, remote_ratchet_key })
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Message {
        match self {
            Self::Active(ratchet) => ratchet.encrypt(plaintext),
            Self::Inactive(ratchet) => {
                let (root_key, chain_key, ratchet_key) =
                    ratchet.root_key.advance(&ratchet.remote_ratchet_key);
                let mut active = ActiveRatchet { root_key, ratchet_key, chain_key };
                let message = active.encrypt(plaintext);

                *self = Self::Active(active);

                message
            }
        }
    }

    /// Compute the ratchet state and receiving chain for a new remote ratchet
    /// key, without modifying the current state.
    pub fn advance(
        &self,
        remote_ratchet_key: RemoteRatchetKey,
    ) -> Result<(SendingRatchet, ReceiverChain), DecryptionError> {
        match self {
            Self::Active(ratchet) => {
                let (root_key, chain_key) =
                    ratchet.root_key.advance(&ratchet.ratchet_key, &remote_ratchet_key);

                Ok((
                    Self::inactive(root_key, remote_ratchet_key),
                    ReceiverChain::new(remote_ratchet_key, chain_key),
                ))
            }
            // The other side can't have started a new chain, it never saw a
            // ratchet key of ours that is newer than its own.
            Self::Inactive(_) => Err(DecryptionError::UnexpectedRatchetKey),
        }
    }
}

impl ActiveRatchet {
    fn encrypt(&mut self, plaintext: &[u8]) -> Message {
        self.chain_key.next_message_key().encrypt(self.ratchet_key.public_key(), plaintext)
    }
}
