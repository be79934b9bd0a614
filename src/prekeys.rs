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

use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

use crate::{
    cryptobox::PreKeyBundle,
    utilities::{base64_decode, base64_encode},
};

/// A public pre-key as the rest of the application sees it: an id and the
/// serialized form the native store understands.
///
/// Serializes to `{"id": 7, "key": "<base64>"}`, the shape pre-keys are
/// uploaded in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKey {
    /// The pre-key id.
    pub id: u16,
    /// The serialized pre-key.
    #[serde(
        rename = "key",
        serialize_with = "serialize_base64",
        deserialize_with = "deserialize_base64"
    )]
    pub data: Vec<u8>,
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&base64_encode(data))
}

fn deserialize_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    base64_decode(encoded).map_err(D::Error::custom)
}

/// The pre-keys generated when a device is set up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreKeyInitialization {
    /// The ordinary pre-keys, in id order. Never empty.
    pub created_keys: Vec<PreKey>,
    /// The last-resort pre-key.
    pub last_key: PreKey,
}

/// Converts between the native store's pre-keys and [`PreKey`]s.
pub trait PreKeyMapper<N> {
    /// Convert a pre-key generated by the native store.
    fn from_native(&self, native: N) -> PreKey;

    /// The serialized form the native store accepts to start a session.
    fn to_native(&self, prekey: &PreKey) -> Vec<u8>;
}

/// The [`PreKeyMapper`] for the [`CryptoBox`](crate::CryptoBox) store.
#[derive(Clone, Copy, Debug, Default)]
pub struct CryptoBoxPreKeyMapper;

impl PreKeyMapper<PreKeyBundle> for CryptoBoxPreKeyMapper {
    fn from_native(&self, native: PreKeyBundle) -> PreKey {
        PreKey { id: native.prekey_id().value(), data: native.to_bytes() }
    }

    fn to_native(&self, prekey: &PreKey) -> Vec<u8> {
        prekey.data.clone()
    }
}
