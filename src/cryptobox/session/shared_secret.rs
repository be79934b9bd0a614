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

//! The triple Diffie-Hellman key agreement that starts every session.
//!
//! The initiator (Alice) holds her identity key `I`<sub>`a`</sub> and a fresh
//! base key `E`<sub>`a`</sub>; the responder (Bob) publishes his identity key
//! `I`<sub>`b`</sub> and a pre-key `P`<sub>`b`</sub>. Both sides compute
//!
//! ```text
//! S = DH(Ia, Pb) || DH(Ea, Ib) || DH(Ea, Pb)
//! R0 || C0 = HKDF(salt = 0, S, "CRYPTOBOX_ROOT")
//! ```

use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::SharedSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    KeyError,
    types::{Curve25519PublicKey, Curve25519SecretKey},
};

const ROOT_INFO: &[u8] = b"CRYPTOBOX_ROOT";

#[derive(Zeroize, ZeroizeOnDrop)]
pub(super) struct Shared3DHSecret(Box<[u8; 96]>);

impl Shared3DHSecret {
    pub fn outbound(
        identity_key: &Curve25519SecretKey,
        base_key: &Curve25519SecretKey,
        remote_identity_key: &Curve25519PublicKey,
        remote_prekey: &Curve25519PublicKey,
    ) -> Result<Self, KeyError> {
        Self::from_parts([
            identity_key.diffie_hellman(remote_prekey),
            base_key.diffie_hellman(remote_identity_key),
            base_key.diffie_hellman(remote_prekey),
        ])
    }

    pub fn inbound(
        identity_key: &Curve25519SecretKey,
        prekey: &Curve25519SecretKey,
        remote_identity_key: &Curve25519PublicKey,
        remote_base_key: &Curve25519PublicKey,
    ) -> Result<Self, KeyError> {
        Self::from_parts([
            prekey.diffie_hellman(remote_identity_key),
            identity_key.diffie_hellman(remote_base_key),
            prekey.diffie_hellman(remote_base_key),
        ])
    }

    fn from_parts(parts: [SharedSecret; 3]) -> Result<Self, KeyError> {
        if !parts.iter().all(SharedSecret::was_contributory) {
            return Err(KeyError::NonContributoryKey);
        }

        let mut secret = Box::new([0u8; 96]);

        for (chunk, part) in secret.chunks_exact_mut(32).zip(&parts) {
            chunk.copy_from_slice(part.as_bytes());
        }

        Ok(Self(secret))
    }

    /// Derive the initial root key and chain key.
    pub fn expand(&self) -> (Box<[u8; 32]>, Box<[u8; 32]>) {
        let hkdf: Hkdf<Sha256> = Hkdf::new(Some(&[0]), self.0.as_slice());
        let mut output = [0u8; 64];

        #[allow(clippy::expect_used)]
        hkdf.expand(ROOT_INFO, &mut output).expect("64 bytes are a valid HKDF-SHA-256 length");

        let mut root_key = Box::new([0u8; 32]);
        let mut chain_key = Box::new([0u8; 32]);
        root_key.copy_from_slice(&output[..32]);
        chain_key.copy_from_slice(&output[32..]);

        output.zeroize();

        (root_key, chain_key)
    }
}
