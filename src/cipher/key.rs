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
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Zeroize, ZeroizeOnDrop)]
struct ExpandedKeys([u8; 80]);

impl ExpandedKeys {
    const MESSAGE_HKDF_INFO: &'static [u8] = b"CRYPTOBOX_KEYS";
    const PICKLE_HKDF_INFO: &'static [u8] = b"CRYPTOBOX_PICKLE";

    fn new(message_key: &[u8; 32]) -> Self {
        Self::new_helper(&[0], message_key, Self::MESSAGE_HKDF_INFO)
    }

    fn new_pickle(pickle_key: &[u8], salt: &[u8]) -> Self {
        Self::new_helper(salt, pickle_key, Self::PICKLE_HKDF_INFO)
    }

    fn new_helper(salt: &[u8], key: &[u8], info: &[u8]) -> Self {
        let mut expanded_keys = [0u8; 80];

        let hkdf: Hkdf<Sha256> = Hkdf::new(Some(salt), key);

        // 80 bytes are well below the HKDF-SHA-256 output limit of 8160 bytes.
        #[allow(clippy::expect_used)]
        hkdf.expand(info, &mut expanded_keys).expect("Can't expand the cipher key");

        Self(expanded_keys)
    }
}

#[derive(Zeroize, ZeroizeOnDrop)]
pub(super) struct CipherKeys {
    aes_key: [u8; 32],
    aes_iv: [u8; 16],
    mac_key: [u8; 32],
}

impl CipherKeys {
    pub fn new(message_key: &[u8; 32]) -> Self {
        Self::from(ExpandedKeys::new(message_key))
    }

    pub fn new_pickle(pickle_key: &[u8], salt: &[u8]) -> Self {
        Self::from(ExpandedKeys::new_pickle(pickle_key, salt))
    }

    pub fn aes_key(&self) -> &[u8; 32] {
        &self.aes_key
    }

    pub fn mac_key(&self) -> &[u8; 32] {
        &self.mac_key
    }

    pub fn iv(&self) -> &[u8; 16] {
        &self.aes_iv
    }
}

impl From<ExpandedKeys> for CipherKeys {
    fn from(expanded_keys: ExpandedKeys) -> Self {
        let mut aes_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        let mut aes_iv = [0u8; 16];

        aes_key.copy_from_slice(&expanded_keys.0[0..32]);
        mac_key.copy_from_slice(&expanded_keys.0[32..64]);
        aes_iv.copy_from_slice(&expanded_keys.0[64..80]);

        Self { aes_key, aes_iv, mac_key }
    }
}
