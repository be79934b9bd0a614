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

use serde::{Deserialize, Serialize};

use crate::types::{
    Curve25519Keypair, Curve25519PublicKey, Curve25519SecretKey, Ed25519Keypair, Ed25519PublicKey,
    Ed25519Signature,
};

/// The public identity keys of a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityKeys {
    /// The Ed25519 key, used to sign pre-keys. Its fingerprint identifies the
    /// device to users.
    pub ed25519: Ed25519PublicKey,
    /// The Curve25519 key, used in the key agreement.
    pub curve25519: Curve25519PublicKey,
}

impl IdentityKeys {
    /// The fingerprint users compare to verify this device.
    pub fn fingerprint(&self) -> String {
        self.ed25519.fingerprint()
    }
}

/// The long-term key pairs of the local device.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct IdentityKeyPair {
    signing_key: Ed25519Keypair,
    diffie_hellman_key: Curve25519Keypair,
}

impl IdentityKeyPair {
    pub fn new() -> Self {
        Self { signing_key: Ed25519Keypair::new(), diffie_hellman_key: Curve25519Keypair::new() }
    }

    pub fn public_keys(&self) -> IdentityKeys {
        IdentityKeys {
            ed25519: self.signing_key.public_key(),
            curve25519: self.diffie_hellman_key.public_key(),
        }
    }

    pub fn diffie_hellman_key(&self) -> &Curve25519SecretKey {
        self.diffie_hellman_key.secret_key()
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        self.signing_key.sign(message)
    }
}
