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

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

use super::{
    DecryptionError,
    keys::{ChainKey, MessageKey, RemoteRatchetKey},
};
use crate::cryptobox::messages::Message;

/// How far ahead of the current chain index a message may be.
pub(crate) const MAX_MESSAGE_GAP: u64 = 1000;
/// How many skipped message keys a chain keeps for late messages.
pub(crate) const MAX_SKIPPED_KEYS: usize = 40;

/// The receiving half of a single chain in the double ratchet.
#[derive(Clone, Serialize, Deserialize)]
pub(super) struct ReceiverChain {
    ratchet_key: RemoteRatchetKey,
    chain_key: ChainKey,
    skipped_keys: ArrayVec<MessageKey, MAX_SKIPPED_KEYS>,
}

impl fmt::Debug for ReceiverChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverChain")
            .field("ratchet_key", &self.ratchet_key)
            .field("chain_index", &self.chain_key.index())
            .field("skipped_keys", &self.skipped_keys.len())
            .finish()
    }
}

impl ReceiverChain {
    pub fn new(ratchet_key: RemoteRatchetKey, chain_key: ChainKey) -> Self {
        Self { ratchet_key, chain_key, skipped_keys: ArrayVec::new() }
    }

    pub fn belongs_to(&self, ratchet_key: &RemoteRatchetKey) -> bool {
        &self.ratchet_key == ratchet_key
    }

    /// Decrypt a message sent on this chain.
    ///
    /// The chain is only modified if the message authenticates.
    pub fn decrypt(&mut self, message: &Message) -> Result<Vec<u8>, DecryptionError> {
        let index = message.chain_index;
        let current = self.chain_key.index();

        if index < current {
            self.decrypt_skipped(index, message)
        } else if index - current > MAX_MESSAGE_GAP {
            Err(DecryptionError::TooBigMessageGap(index - current, MAX_MESSAGE_GAP))
        } else {
            let mut chain_key = self.chain_key.clone();
            let mut skipped = Vec::new();

            while chain_key.index() < index {
                // Keys further back than the stash can hold would be evicted
                // right away, don't bother deriving them.
                if index - chain_key.index() > MAX_SKIPPED_KEYS as u64 {
                    chain_key.advance();
                } else {
                    skipped.push(chain_key.next_message_key());
                }
            }

            let plaintext = chain_key.next_message_key().decrypt(message)?;

            self.chain_key = chain_key;
            for key in skipped {
                self.stash(key);
            }

            Ok(plaintext)
        }
    }

    fn decrypt_skipped(
        &mut self,
        index: u64,
        message: &Message,
    ) -> Result<Vec<u8>, DecryptionError> {
        let position = self
            .skipped_keys
            .iter()
            .position(|key| key.index() == index)
            .ok_or(DecryptionError::MissingMessageKey(index))?;

        let plaintext = self.skipped_keys[position].decrypt(message)?;
        self.skipped_keys.remove(position);

        Ok(plaintext)
    }

    fn stash(&mut self, key: MessageKey) {
        if self.skipped_keys.is_full() {
            self.skipped_keys.remove(0);
        }

        self.skipped_keys.push(key);
    }
}
