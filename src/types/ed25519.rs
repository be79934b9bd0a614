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

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
pub use ed25519_dalek::SignatureError;
use rand::thread_rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::KeyError;
use crate::utilities::{base64_decode, base64_encode};

/// An Ed25519 key pair, used to sign pre-keys and to identify a device.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "Ed25519KeypairPickle")]
#[serde(into = "Ed25519KeypairPickle")]
pub(crate) struct Ed25519Keypair {
    secret_key: SigningKey,
    public_key: Ed25519PublicKey,
}

impl Ed25519Keypair {
    pub fn new() -> Self {
        let secret_key = SigningKey::generate(&mut thread_rng());
        let public_key = Ed25519PublicKey(secret_key.verifying_key());

        Self { secret_key, public_key }
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        self.public_key
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.secret_key.sign(message))
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct Ed25519KeypairPickle {
    secret: [u8; 32],
}

impl From<Ed25519KeypairPickle> for Ed25519Keypair {
    fn from(pickle: Ed25519KeypairPickle) -> Self {
        let secret_key = SigningKey::from_bytes(&pickle.secret);
        let public_key = Ed25519PublicKey(secret_key.verifying_key());

        Self { secret_key, public_key }
    }
}

impl From<Ed25519Keypair> for Ed25519KeypairPickle {
    fn from(keypair: Ed25519Keypair) -> Self {
        Self { secret: keypair.secret_key.to_bytes() }
    }
}

/// An Ed25519 public key, used to verify digital signatures.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519PublicKey(VerifyingKey);

impl Ed25519PublicKey {
    /// The number of bytes an Ed25519 public key has.
    pub const LENGTH: usize = 32;

    /// Try to create a [`Ed25519PublicKey`] from a slice of bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let key: &[u8; Self::LENGTH] = bytes.try_into().map_err(|_| KeyError::InvalidKeyLength {
            key_type: "Ed25519",
            expected_length: Self::LENGTH,
            length: bytes.len(),
        })?;

        Ok(Self(VerifyingKey::from_bytes(key)?))
    }

    /// Instantiate an Ed25519 public key from an unpadded base64
    /// representation.
    pub fn from_base64(input: &str) -> Result<Self, KeyError> {
        Self::from_slice(&base64_decode(input)?)
    }

    /// View this public key as a byte array.
    pub fn as_bytes(&self) -> &[u8; Self::LENGTH] {
        self.0.as_bytes()
    }

    /// Serialize an Ed25519 public key to an unpadded base64 representation.
    pub fn to_base64(&self) -> String {
        base64_encode(self.as_bytes())
    }

    /// The lowercase hex encoding of the key, as shown to users who compare
    /// device fingerprints.
    pub fn fingerprint(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Verify that the provided signature for a given message has been signed
    /// by the private key matching this public one.
    pub fn verify(
        &self,
        message: &[u8],
        signature: &Ed25519Signature,
    ) -> Result<(), SignatureError> {
        self.0.verify_strict(message, &signature.0)
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519PublicKey({})", self.to_base64())
    }
}

impl Serialize for Ed25519PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for Ed25519PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(D::Error::custom)
    }
}

/// An Ed25519 digital signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Ed25519Signature(Signature);

impl Ed25519Signature {
    /// The number of bytes an Ed25519 signature has.
    pub const LENGTH: usize = 64;

    /// Try to create an [`Ed25519Signature`] from a slice of bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != Self::LENGTH {
            return Err(KeyError::InvalidKeyLength {
                key_type: "signature",
                expected_length: Self::LENGTH,
                length: bytes.len(),
            });
        }

        Ok(Self(Signature::from_slice(bytes)?))
    }

    /// Convert the signature to a byte array.
    pub fn to_bytes(&self) -> [u8; Self::LENGTH] {
        self.0.to_bytes()
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Signature({})", base64_encode(self.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches2::assert_matches;

    use super::{Ed25519Keypair, Ed25519PublicKey, Ed25519Signature};
    use crate::KeyError;

    #[test]
    fn signatures_verify() {
        let keypair = Ed25519Keypair::new();
        let signature = keypair.sign(b"prekey");

        keypair.public_key().verify(b"prekey", &signature).unwrap();
        assert!(keypair.public_key().verify(b"another prekey", &signature).is_err());

        let restored = Ed25519Signature::from_slice(&signature.to_bytes()).unwrap();
        assert_eq!(restored, signature);
    }

    #[test]
    fn public_key_serializes_as_base64() {
        let public_key = Ed25519Keypair::new().public_key();
        let json = serde_json::to_string(&public_key).unwrap();

        assert_eq!(json, format!("\"{}\"", public_key.to_base64()));
        assert_eq!(serde_json::from_str::<Ed25519PublicKey>(&json).unwrap(), public_key);
    }

    #[test]
    fn fingerprint_is_lowercase_hex() {
        let public_key = Ed25519Keypair::new().public_key();
        let fingerprint = public_key.fingerprint();

        assert_eq!(fingerprint.len(), 64);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn short_keys_are_rejected() {
        assert_matches!(
            Ed25519PublicKey::from_slice(&[0u8; 31]),
            Err(KeyError::InvalidKeyLength { expected_length: 32, length: 31, .. })
        );
        assert_matches!(
            Ed25519Signature::from_slice(&[0u8; 12]),
            Err(KeyError::InvalidKeyLength { expected_length: 64, .. })
        );
    }
}
