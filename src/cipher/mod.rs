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

mod key;

use aes::{
    Aes256,
    cipher::{
        BlockDecryptMut, BlockEncryptMut, KeyIvInit,
        block_padding::{Pkcs7, UnpadError},
        generic_array::GenericArray,
    },
};
use hmac::{Hmac, Mac as MacT, digest::MacError};
use key::CipherKeys;
use sha2::Sha256;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// The message authentication code of a ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mac(pub(crate) [u8; Self::LENGTH]);

impl Mac {
    /// The length of the message authentication code (MAC).
    pub const LENGTH: usize = 32;
    /// The length of the truncated MAC used by encrypted pickles.
    pub const TRUNCATED_LEN: usize = 8;

    /// Truncates and converts the [`Mac`] into a byte array.
    pub fn truncate(&self) -> [u8; Self::TRUNCATED_LEN] {
        let mut truncated = [0u8; Self::TRUNCATED_LEN];
        truncated.copy_from_slice(&self.0[0..Self::TRUNCATED_LEN]);

        truncated
    }

    /// Return the [`Mac`] as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Error type describing failures of the authenticated decryption.
#[derive(Debug, Error)]
pub enum DecryptionError {
    /// The plaintext wasn't padded correctly.
    #[error("Failed decrypting, invalid padding")]
    InvalidPadding(#[from] UnpadError),
    /// The MAC didn't authenticate the ciphertext.
    #[error("The MAC of the ciphertext didn't pass validation {0}")]
    Mac(#[from] MacError),
    /// The ciphertext was too short to contain a MAC.
    #[error("The ciphertext didn't contain a valid MAC")]
    MacMissing,
}

/// AES-256-CBC with HMAC-SHA-256, keyed by HKDF expansion of a single
/// 32-byte key.
pub(crate) struct Cipher {
    keys: CipherKeys,
}

impl Cipher {
    /// Creates a new [`Cipher`] from a ratchet message key.
    ///
    /// The key is expanded into a 32-byte AES key, a 32-byte MAC key and a
    /// 16-byte IV using HKDF with the info string "CRYPTOBOX_KEYS".
    pub fn new(key: &[u8; 32]) -> Self {
        Self { keys: CipherKeys::new(key) }
    }

    /// Creates a new [`Cipher`] for encrypting pickles.
    ///
    /// Every pickle uses its own random salt, so no two pickles share the same
    /// AES key and IV even when the pickle key stays the same.
    pub fn new_pickle(key: &[u8], salt: &[u8]) -> Self {
        Self { keys: CipherKeys::new_pickle(key, salt) }
    }

    fn get_hmac(&self) -> HmacSha256 {
        // HMAC accepts keys of any length.
        #[allow(clippy::expect_used)]
        HmacSha256::new_from_slice(self.keys.mac_key())
            .expect("We should be able to create a HmacSha256 from a 32 byte key")
    }

    /// Encrypts the given plaintext. The ciphertext is not authenticated, call
    /// [`Cipher::mac()`] over the encoded message afterwards.
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256CbcEnc::new(
            GenericArray::from_slice(self.keys.aes_key()),
            GenericArray::from_slice(self.keys.iv()),
        );
        cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn mac(&self, message: &[u8]) -> Mac {
        let mut hmac = self.get_hmac();
        hmac.update(message);

        let mac_bytes = hmac.finalize().into_bytes();

        let mut mac = [0u8; Mac::LENGTH];
        mac.copy_from_slice(&mac_bytes);

        Mac(mac)
    }

    /// Decrypts the given ciphertext. The MAC has to be verified beforehand
    /// with [`Cipher::verify_mac()`].
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, UnpadError> {
        let cipher = Aes256CbcDec::new(
            GenericArray::from_slice(self.keys.aes_key()),
            GenericArray::from_slice(self.keys.iv()),
        );
        cipher.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    }

    pub fn verify_mac(&self, message: &[u8], tag: &Mac) -> Result<(), MacError> {
        let mut hmac = self.get_hmac();

        hmac.update(message);
        hmac.verify_slice(tag.as_bytes())
    }

    fn verify_truncated_mac(&self, message: &[u8], tag: &[u8]) -> Result<(), MacError> {
        let mut hmac = self.get_hmac();

        hmac.update(message);
        hmac.verify_truncated_left(tag)
    }

    /// Encrypts the plaintext and appends the truncated MAC of the ciphertext.
    pub fn encrypt_pickle(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut ciphertext = self.encrypt(plaintext);
        let mac = self.mac(&ciphertext);

        ciphertext.extend(mac.truncate());

        ciphertext
    }

    /// Verifies the truncated MAC at the end of `ciphertext` and decrypts the
    /// rest.
    pub fn decrypt_pickle(&self, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        if ciphertext.len() < Mac::TRUNCATED_LEN + 1 {
            Err(DecryptionError::MacMissing)
        } else {
            let (ciphertext, mac) = ciphertext.split_at(ciphertext.len() - Mac::TRUNCATED_LEN);
            self.verify_truncated_mac(ciphertext, mac)?;

            Ok(self.decrypt(ciphertext)?)
        }
    }
}
