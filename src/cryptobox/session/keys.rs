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

use hkdf::Hkdf;
use hmac::{Hmac, Mac as _};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::DecryptionError;
use crate::{
    cipher::Cipher,
    cryptobox::messages::Message,
    types::{Curve25519PublicKey, Curve25519SecretKey},
};

const RATCHET_INFO: &[u8] = b"CRYPTOBOX_RATCHET";
const MESSAGE_KEY_SEED: &[u8] = b"\x01";
const ADVANCEMENT_SEED: &[u8] = b"\x02";

/// Our side of a ratchet step, `T`<sub>`i`</sub>.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub(super) struct RatchetKey(Curve25519SecretKey);

impl RatchetKey {
    pub fn new() -> Self {
        Self(Curve25519SecretKey::new())
    }

    pub fn public_key(&self) -> Curve25519PublicKey {
        Curve25519PublicKey::from(&self.0)
    }

    fn diffie_hellman(&self, other: &RemoteRatchetKey) -> SharedSecret {
        self.0.diffie_hellman(&other.0)
    }
}

/// The other side's ratchet key, as seen in their messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub(super) struct RemoteRatchetKey(Curve25519PublicKey);

impl From<Curve25519PublicKey> for RemoteRatchetKey {
    fn from(key: Curve25519PublicKey) -> Self {
        Self(key)
    }
}

/// Root key while we own the newest ratchet key.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub(super) struct RootKey(Box<[u8; 32]>);

/// Root key after the other side has sent us a new ratchet key.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub(super) struct RemoteRootKey(Box<[u8; 32]>);

fn kdf(
    root_key: &[u8; 32],
    ratchet_key: &RatchetKey,
    remote_ratchet_key: &RemoteRatchetKey,
) -> (Box<[u8; 32]>, Box<[u8; 32]>) {
    let shared_secret = ratchet_key.diffie_hellman(remote_ratchet_key);
    let hkdf: Hkdf<Sha256> = Hkdf::new(Some(root_key.as_ref()), shared_secret.as_bytes());
    let mut output = [0u8; 64];

    #[allow(clippy::expect_used)]
    hkdf.expand(RATCHET_INFO, &mut output).expect("64 bytes are a valid HKDF-SHA-256 length");

    let mut root_key = Box::new([0u8; 32]);
    let mut chain_key = Box::new([0u8; 32]);
    root_key.copy_from_slice(&output[..32]);
    chain_key.copy_from_slice(&output[32..]);

    output.zeroize();

    (root_key, chain_key)
}

impl RootKey {
    pub fn new(bytes: Box<[u8; 32]>) -> Self {
        Self(bytes)
    }

    /// Mix the remote ratchet key into the root, producing the chain the
    /// remote side is going to send on.
    pub fn advance(
        &self,
        ratchet_key: &RatchetKey,
        remote_ratchet_key: &RemoteRatchetKey,
    ) -> (RemoteRootKey, ChainKey) {
        let (root_key, chain_key) = kdf(&self.0, ratchet_key, remote_ratchet_key);

        (RemoteRootKey(root_key), ChainKey::new(chain_key))
    }
}

impl RemoteRootKey {
    pub fn new(bytes: Box<[u8; 32]>) -> Self {
        Self(bytes)
    }

    /// Generate a fresh ratchet key and derive our next sending chain from it.
    pub fn advance(
        &self,
        remote_ratchet_key: &RemoteRatchetKey,
    ) -> (RootKey, ChainKey, RatchetKey) {
        let ratchet_key = RatchetKey::new();
        let (root_key, chain_key) = kdf(&self.0, &ratchet_key, remote_ratchet_key);

        (RootKey(root_key), ChainKey::new(chain_key), ratchet_key)
    }
}

fn hmac_with_seed(key: &[u8; 32], seed: &[u8]) -> Box<[u8; 32]> {
    #[allow(clippy::expect_used)]
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .expect("We should be able to create a HMAC object from a 32-byte key");
    mac.update(seed);

    let mut output = mac.finalize().into_bytes();
    let mut result = Box::new([0u8; 32]);
    result.copy_from_slice(output.as_slice());

    output.zeroize();

    result
}

/// A symmetric chain key `C`<sub>`i`,`j`</sub>, used for both sending and
/// receiving chains.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(super) struct ChainKey {
    key: Box<[u8; 32]>,
    index: u64,
}

impl ChainKey {
    pub fn new(key: Box<[u8; 32]>) -> Self {
        Self { key, index: 0 }
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn advance(&mut self) {
        let next = hmac_with_seed(&self.key, ADVANCEMENT_SEED);
        self.key.zeroize();
        self.key = next;
        self.index += 1;
    }

    pub fn next_message_key(&mut self) -> MessageKey {
        let message_key =
            MessageKey { key: hmac_with_seed(&self.key, MESSAGE_KEY_SEED), index: self.index };
        self.advance();

        message_key
    }
}

/// A single-use key `M`<sub>`i`,`j`</sub>.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub(super) struct MessageKey {
    key: Box<[u8; 32]>,
    index: u64,
}

impl MessageKey {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn encrypt(&self, ratchet_key: Curve25519PublicKey, plaintext: &[u8]) -> Message {
        let cipher = Cipher::new(&self.key);
        let ciphertext = cipher.encrypt(plaintext);

        let mut message = Message::new(ratchet_key, self.index, ciphertext);
        let mac = cipher.mac(&message.to_mac_bytes());
        message.set_mac(mac);

        message
    }

    pub fn decrypt(&self, message: &Message) -> Result<Vec<u8>, DecryptionError> {
        let cipher = Cipher::new(&self.key);

        cipher.verify_mac(&message.to_mac_bytes(), &message.mac)?;
        Ok(cipher.decrypt(&message.ciphertext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::{ChainKey, RatchetKey, RemoteRatchetKey, RemoteRootKey, RootKey};

    #[test]
    fn advancing_chain_key_increments_index() {
        let mut key = ChainKey::new(Box::new(*b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"));
        assert_eq!(key.index(), 0);

        let message_key = key.next_message_key();
        assert_eq!(message_key.index(), 0);
        assert_eq!(key.index(), 1);

        key.advance();
        assert_eq!(key.next_message_key().index(), 2);
    }

    #[test]
    fn both_sides_derive_the_same_chain() {
        let root = [5u8; 32];
        let alice_ratchet = RatchetKey::new();
        let alice_public = RemoteRatchetKey::from(alice_ratchet.public_key());

        // Bob derives a new sending chain from Alice's ratchet key, Alice
        // derives the matching receiving chain once she sees Bob's key.
        let (_, mut bob_chain, bob_ratchet) =
            RemoteRootKey::new(Box::new(root)).advance(&alice_public);
        let (_, mut alice_chain) = RootKey::new(Box::new(root))
            .advance(&alice_ratchet, &RemoteRatchetKey::from(bob_ratchet.public_key()));

        let plaintext = b"ratchet";
        let message = bob_chain.next_message_key().encrypt(bob_ratchet.public_key(), plaintext);

        assert_eq!(alice_chain.next_message_key().decrypt(&message).unwrap(), plaintext);
    }
}
