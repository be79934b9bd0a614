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

use rand::thread_rng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::KeyError;
use crate::utilities::{base64_decode, base64_encode};

/// A Curve25519 secret key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Curve25519SecretKey(Box<StaticSecret>);

impl Curve25519SecretKey {
    /// Generate a new, random, Curve25519SecretKey.
    pub fn new() -> Self {
        Self(Box::new(StaticSecret::random_from_rng(thread_rng())))
    }

    /// Create a Curve25519SecretKey from the given byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Box::new(StaticSecret::from(bytes)))
    }

    /// Perform a Diffie-Hellman key exchange between the given
    /// [`Curve25519PublicKey`] and this [`Curve25519SecretKey`] and return a
    /// shared secret.
    pub fn diffie_hellman(&self, their_public_key: &Curve25519PublicKey) -> SharedSecret {
        self.0.diffie_hellman(&their_public_key.inner)
    }

    pub(crate) fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl Default for Curve25519SecretKey {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "Curve25519KeypairPickle")]
#[serde(into = "Curve25519KeypairPickle")]
pub(crate) struct Curve25519Keypair {
    secret_key: Curve25519SecretKey,
    public_key: Curve25519PublicKey,
}

impl Curve25519Keypair {
    pub fn new() -> Self {
        let secret_key = Curve25519SecretKey::new();
        let public_key = Curve25519PublicKey::from(&secret_key);

        Self { secret_key, public_key }
    }

    pub fn secret_key(&self) -> &Curve25519SecretKey {
        &self.secret_key
    }

    pub fn public_key(&self) -> Curve25519PublicKey {
        self.public_key
    }
}

/// A Curve25519 public key.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Curve25519PublicKey {
    pub(crate) inner: PublicKey,
}

impl Curve25519PublicKey {
    /// The number of bytes a Curve25519 public key has.
    pub const LENGTH: usize = 32;

    /// Convert this public key to a byte array.
    #[inline]
    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        self.inner.to_bytes()
    }

    /// View this public key as a byte array.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        self.inner.as_bytes()
    }

    /// Instantiate a Curve25519 public key from an unpadded base64
    /// representation.
    pub fn from_base64(input: &str) -> Result<Curve25519PublicKey, KeyError> {
        let key = base64_decode(input)?;
        Self::from_slice(&key)
    }

    /// Try to create a [`Curve25519PublicKey`] from a slice of bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Curve25519PublicKey, KeyError> {
        let key: [u8; Self::LENGTH] = slice.try_into().map_err(|_| KeyError::InvalidKeyLength {
            key_type: "Curve25519",
            expected_length: Self::LENGTH,
            length: slice.len(),
        })?;

        Ok(Self::from(key))
    }

    /// Serialize a Curve25519 public key to an unpadded base64 representation.
    pub fn to_base64(&self) -> String {
        base64_encode(self.inner.as_bytes())
    }
}

impl fmt::Debug for Curve25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Curve25519PublicKey({})", self.to_base64())
    }
}

impl From<[u8; Curve25519PublicKey::LENGTH]> for Curve25519PublicKey {
    fn from(bytes: [u8; Curve25519PublicKey::LENGTH]) -> Curve25519PublicKey {
        Curve25519PublicKey { inner: PublicKey::from(bytes) }
    }
}

impl<'a> From<&'a Curve25519SecretKey> for Curve25519PublicKey {
    fn from(secret: &'a Curve25519SecretKey) -> Curve25519PublicKey {
        Curve25519PublicKey { inner: PublicKey::from(secret.0.as_ref()) }
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct Curve25519KeypairPickle {
    secret: [u8; 32],
    #[zeroize(skip)]
    public: [u8; Curve25519PublicKey::LENGTH],
}

impl From<Curve25519KeypairPickle> for Curve25519Keypair {
    fn from(pickle: Curve25519KeypairPickle) -> Self {
        Self {
            secret_key: Curve25519SecretKey::from_bytes(pickle.secret),
            public_key: Curve25519PublicKey::from(pickle.public),
        }
    }
}

impl From<Curve25519Keypair> for Curve25519KeypairPickle {
    fn from(key: Curve25519Keypair) -> Self {
        Curve25519KeypairPickle {
            secret: key.secret_key.to_bytes(),
            public: key.public_key.to_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;

    use super::{Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey};
    use crate::{KeyError, utilities::DecodeError};

    #[test]
    fn decoding_invalid_base64_fails() {
        assert_matches!(
            Curve25519PublicKey::from_base64("a"),
            Err(KeyError::Base64Error(DecodeError::InvalidLength(_)))
        );
        assert_matches!(
            Curve25519PublicKey::from_base64("a "),
            Err(KeyError::Base64Error(DecodeError::InvalidByte(..)))
        );
    }

    #[test]
    fn decoding_incorrect_num_of_bytes_fails() {
        assert_matches!(
            Curve25519PublicKey::from_base64("aaaa"),
            Err(KeyError::InvalidKeyLength { expected_length: 32, length: 3, .. })
        );
    }

    #[test]
    fn decoding_of_correct_num_of_bytes_succeeds() {
        let base64_payload = "MDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDA";
        let key = Curve25519PublicKey::from_base64(base64_payload).unwrap();
        assert_eq!(key.to_base64(), base64_payload);
    }

    #[test]
    fn diffie_hellman_agrees() {
        let alice = Curve25519SecretKey::new();
        let bob = Curve25519SecretKey::new();

        let alice_shared = alice.diffie_hellman(&Curve25519PublicKey::from(&bob));
        let bob_shared = bob.diffie_hellman(&Curve25519PublicKey::from(&alice));

        assert_eq!(alice_shared.as_bytes(), bob_shared.as_bytes());
    }

    #[test]
    fn keypair_survives_serialization() {
        let keypair = Curve25519Keypair::new();
        let json = serde_json::to_string(&keypair).unwrap();
        let restored: Curve25519Keypair = serde_json::from_str(&json).unwrap();

        assert_eq!(keypair.public_key(), restored.public_key());
        assert_eq!(keypair.secret_key().to_bytes(), restored.secret_key().to_bytes());
    }
}
