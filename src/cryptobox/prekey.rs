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

use prost::Message as _;
use serde::{Deserialize, Serialize};

use super::identity::{IdentityKeyPair, IdentityKeys};
use crate::{
    DecodeError,
    types::{
        Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey, Ed25519PublicKey,
        Ed25519Signature, SignatureError,
    },
};

const BUNDLE_VERSION: u32 = 1;

/// The identifier of a pre-key.
///
/// Ordinary pre-keys are handed out once; [`PreKeyId::LAST`] marks the
/// last-resort pre-key which is never consumed.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreKeyId(u16);

impl PreKeyId {
    /// The id of the last-resort pre-key.
    pub const LAST: PreKeyId = PreKeyId(u16::MAX);

    /// Create a new pre-key id.
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// The numeric value of this id.
    pub const fn value(self) -> u16 {
        self.0
    }

    /// Is this the id of the last-resort pre-key.
    pub const fn is_last(self) -> bool {
        self.0 == u16::MAX
    }

    /// The id `offset` places after `start`, wrapping around before
    /// [`PreKeyId::LAST`] so ordinary pre-keys never take the last-resort id.
    pub fn nth_after(start: u16, offset: u16) -> Self {
        let id = (u32::from(start) + u32::from(offset)) % u32::from(u16::MAX);
        // The modulus keeps the value below u16::MAX.
        Self(u16::try_from(id).unwrap_or_default())
    }
}

impl fmt::Display for PreKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A pre-key with its secret half, as kept by its owner.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct PreKeyPair {
    id: PreKeyId,
    key_pair: Curve25519Keypair,
}

impl PreKeyPair {
    pub fn new(id: PreKeyId) -> Self {
        Self { id, key_pair: Curve25519Keypair::new() }
    }

    pub fn id(&self) -> PreKeyId {
        self.id
    }

    pub fn secret_key(&self) -> &Curve25519SecretKey {
        self.key_pair.secret_key()
    }

    /// The signed, publishable form of this pre-key.
    pub fn bundle(&self, identity: &IdentityKeyPair) -> PreKeyBundle {
        let public_key = self.key_pair.public_key();
        let signature = identity.sign(&PreKeyBundle::signed_bytes(self.id, &public_key));

        PreKeyBundle {
            prekey_id: self.id,
            public_key,
            identity_keys: identity.public_keys(),
            signature,
        }
    }
}

/// A published pre-key: everything a remote device needs to start a session
/// with the owner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyBundle {
    prekey_id: PreKeyId,
    public_key: Curve25519PublicKey,
    identity_keys: IdentityKeys,
    signature: Ed25519Signature,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoBufPreKeyBundle {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(uint32, tag = "2")]
    prekey_id: u32,
    #[prost(bytes, tag = "3")]
    public_key: Vec<u8>,
    #[prost(bytes, tag = "4")]
    identity_key: Vec<u8>,
    #[prost(bytes, tag = "5")]
    signing_key: Vec<u8>,
    #[prost(bytes, tag = "6")]
    signature: Vec<u8>,
}

impl PreKeyBundle {
    fn signed_bytes(prekey_id: PreKeyId, public_key: &Curve25519PublicKey) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(2 + Curve25519PublicKey::LENGTH);
        bytes.extend_from_slice(&prekey_id.value().to_be_bytes());
        bytes.extend_from_slice(public_key.as_bytes());

        bytes
    }

    /// The id of the pre-key.
    pub fn prekey_id(&self) -> PreKeyId {
        self.prekey_id
    }

    /// The public half of the pre-key.
    pub fn public_key(&self) -> Curve25519PublicKey {
        self.public_key
    }

    /// The identity keys of the pre-key's owner.
    pub fn identity_keys(&self) -> IdentityKeys {
        self.identity_keys
    }

    /// Check that the pre-key was signed by the identity it claims to belong
    /// to.
    pub fn verify(&self) -> Result<(), SignatureError> {
        self.identity_keys
            .ed25519
            .verify(&Self::signed_bytes(self.prekey_id, &self.public_key), &self.signature)
    }

    /// Encode the bundle into its binary wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        ProtoBufPreKeyBundle {
            version: BUNDLE_VERSION,
            prekey_id: self.prekey_id.value().into(),
            public_key: self.public_key.to_bytes().to_vec(),
            identity_key: self.identity_keys.curve25519.to_bytes().to_vec(),
            signing_key: self.identity_keys.ed25519.as_bytes().to_vec(),
            signature: self.signature.to_bytes().to_vec(),
        }
        .encode_to_vec()
    }

    /// Decode a bundle from its binary wire format. The signature isn't
    /// checked, see [`PreKeyBundle::verify()`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let decoded = ProtoBufPreKeyBundle::decode(bytes)?;

        if decoded.version != BUNDLE_VERSION {
            return Err(DecodeError::InvalidVersion(BUNDLE_VERSION, decoded.version));
        }

        let prekey_id = u16::try_from(decoded.prekey_id)
            .map_err(|_| DecodeError::InvalidPreKeyId(decoded.prekey_id))?;

        Ok(Self {
            prekey_id: PreKeyId(prekey_id),
            public_key: Curve25519PublicKey::from_slice(&decoded.public_key)?,
            identity_keys: IdentityKeys {
                ed25519: Ed25519PublicKey::from_slice(&decoded.signing_key)?,
                curve25519: Curve25519PublicKey::from_slice(&decoded.identity_key)?,
            },
            signature: Ed25519Signature::from_slice(&decoded.signature)?,
        })
    }
}
