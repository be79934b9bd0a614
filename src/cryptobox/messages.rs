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

//! The wire format of encrypted messages.
//!
//! Every message starts with a type byte and a version byte. Normal messages
//! carry a protobuf body followed by a 32-byte MAC over the version byte and
//! the body. Pre-key messages additionally carry the public keys the receiver
//! needs to create its side of the session.

use prost::Message as _;

use super::{identity::IdentityKeys, prekey::PreKeyId};
use crate::{
    DecodeError,
    cipher::Mac,
    types::{Curve25519PublicKey, Ed25519PublicKey},
};

const VERSION: u8 = 1;

/// The type of an encrypted message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    /// A message that can create a session on the receiving side.
    PreKey = 0,
    /// A message sent over an established session.
    Normal = 1,
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::PreKey),
            1 => Ok(Self::Normal),
            other => Err(DecodeError::InvalidMessageType(other)),
        }
    }
}

fn split_version(bytes: &[u8]) -> Result<&[u8], DecodeError> {
    let (&version, body) = bytes.split_first().ok_or(DecodeError::MissingVersion)?;

    if version == VERSION {
        Ok(body)
    } else {
        Err(DecodeError::InvalidVersion(VERSION.into(), version.into()))
    }
}

/// A message encrypted with a message key of the double ratchet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub(crate) ratchet_key: Curve25519PublicKey,
    pub(crate) chain_index: u64,
    pub(crate) ciphertext: Vec<u8>,
    pub(crate) mac: Mac,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoBufMessage {
    #[prost(bytes, tag = "1")]
    ratchet_key: Vec<u8>,
    #[prost(uint64, tag = "2")]
    chain_index: u64,
    #[prost(bytes, tag = "3")]
    ciphertext: Vec<u8>,
}

impl Message {
    pub(crate) fn new(
        ratchet_key: Curve25519PublicKey,
        chain_index: u64,
        ciphertext: Vec<u8>,
    ) -> Self {
        Self { ratchet_key, chain_index, ciphertext, mac: Mac([0u8; Mac::LENGTH]) }
    }

    pub(crate) fn set_mac(&mut self, mac: Mac) {
        self.mac = mac;
    }

    /// The bytes the MAC is calculated over.
    pub(crate) fn to_mac_bytes(&self) -> Vec<u8> {
        let body = ProtoBufMessage {
            ratchet_key: self.ratchet_key.to_bytes().to_vec(),
            chain_index: self.chain_index,
            ciphertext: self.ciphertext.clone(),
        };

        let mut bytes = Vec::with_capacity(1 + body.encoded_len() + Mac::LENGTH);
        bytes.push(VERSION);
        bytes.extend(body.encode_to_vec());

        bytes
    }

    /// The index of the message in its sending chain.
    pub fn chain_index(&self) -> u64 {
        self.chain_index
    }

    /// Encode the message, MAC included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.to_mac_bytes();
        bytes.extend_from_slice(self.mac.as_bytes());

        bytes
    }

    /// Decode a message. The MAC is only checked during decryption.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let body = split_version(bytes)?;

        if body.len() < Mac::LENGTH {
            return Err(DecodeError::MessageTooShort(bytes.len()));
        }

        let (body, mac_bytes) = body.split_at(body.len() - Mac::LENGTH);
        let decoded = ProtoBufMessage::decode(body)?;

        let mut mac = [0u8; Mac::LENGTH];
        mac.copy_from_slice(mac_bytes);

        Ok(Self {
            ratchet_key: Curve25519PublicKey::from_slice(&decoded.ratchet_key)?,
            chain_index: decoded.chain_index,
            ciphertext: decoded.ciphertext,
            mac: Mac(mac),
        })
    }
}

/// The first messages of a session, carrying the key agreement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyMessage {
    pub(crate) prekey_id: PreKeyId,
    pub(crate) base_key: Curve25519PublicKey,
    pub(crate) identity_keys: IdentityKeys,
    pub(crate) message: Message,
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProtoBufPreKeyMessage {
    #[prost(uint32, tag = "1")]
    prekey_id: u32,
    #[prost(bytes, tag = "2")]
    base_key: Vec<u8>,
    #[prost(bytes, tag = "3")]
    identity_key: Vec<u8>,
    #[prost(bytes, tag = "4")]
    signing_key: Vec<u8>,
    #[prost(bytes, tag = "5")]
    message: Vec<u8>,
}

impl PreKeyMessage {
    /// The id of the receiver's pre-key this message was encrypted for.
    pub fn prekey_id(&self) -> PreKeyId {
        self.prekey_id
    }

    /// The identity keys of the sender.
    pub fn identity_keys(&self) -> IdentityKeys {
        self.identity_keys
    }

    /// Encode the pre-key message.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = ProtoBufPreKeyMessage {
            prekey_id: self.prekey_id.value().into(),
            base_key: self.base_key.to_bytes().to_vec(),
            identity_key: self.identity_keys.curve25519.to_bytes().to_vec(),
            signing_key: self.identity_keys.ed25519.as_bytes().to_vec(),
            message: self.message.to_bytes(),
        };

        let mut bytes = Vec::with_capacity(1 + body.encoded_len());
        bytes.push(VERSION);
        bytes.extend(body.encode_to_vec());

        bytes
    }

    /// Decode a pre-key message.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let decoded = ProtoBufPreKeyMessage::decode(split_version(bytes)?)?;

        let prekey_id = u16::try_from(decoded.prekey_id)
            .map_err(|_| DecodeError::InvalidPreKeyId(decoded.prekey_id))?;

        Ok(Self {
            prekey_id: PreKeyId::new(prekey_id),
            base_key: Curve25519PublicKey::from_slice(&decoded.base_key)?,
            identity_keys: IdentityKeys {
                ed25519: Ed25519PublicKey::from_slice(&decoded.signing_key)?,
                curve25519: Curve25519PublicKey::from_slice(&decoded.identity_key)?,
            },
            message: Message::from_bytes(&decoded.message)?,
        })
    }
}

/// Any encrypted message, as exchanged between two devices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    /// A message that can create a session on the receiving side.
    PreKey(PreKeyMessage),
    /// A message sent over an established session.
    Normal(Message),
}

impl Envelope {
    /// The type of the contained message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Envelope::PreKey(_) => MessageType::PreKey,
            Envelope::Normal(_) => MessageType::Normal,
        }
    }

    /// Encode the envelope, prefixed with the message type.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.message_type() as u8];

        match self {
            Envelope::PreKey(message) => bytes.extend(message.to_bytes()),
            Envelope::Normal(message) => bytes.extend(message.to_bytes()),
        }

        bytes
    }

    /// Decode an envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (&message_type, message) = bytes.split_first().ok_or(DecodeError::MessageTooShort(0))?;

        match MessageType::try_from(message_type)? {
            MessageType::PreKey => Ok(Envelope::PreKey(PreKeyMessage::from_bytes(message)?)),
            MessageType::Normal => Ok(Envelope::Normal(Message::from_bytes(message)?)),
        }
    }
}
