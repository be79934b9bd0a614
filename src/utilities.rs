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

use std::{fs, io, path::Path};

use base64::{Engine, engine::general_purpose::STANDARD_NO_PAD};
use rand::{RngCore, thread_rng};
use serde::{Serialize, de::DeserializeOwned};
use zeroize::Zeroize;

pub use base64::DecodeError;

use crate::{PickleError, cipher::Cipher};

/// Length of the random salt prepended to every encrypted pickle.
const PICKLE_SALT_LENGTH: usize = 32;

/// Decode the input as base64 with no padding.
pub fn base64_decode(input: impl AsRef<[u8]>) -> Result<Vec<u8>, DecodeError> {
    STANDARD_NO_PAD.decode(input)
}

/// Encode the input as base64 with no padding.
pub fn base64_encode(input: impl AsRef<[u8]>) -> String {
    STANDARD_NO_PAD.encode(input)
}

/// Serialize `thing` to JSON and encrypt it with a cipher derived from the
/// pickle key and a fresh salt.
///
/// The result is `base64(salt || ciphertext || truncated MAC)`.
pub(crate) fn pickle<T: Serialize>(
    thing: &T,
    pickle_key: &[u8; 32],
) -> Result<String, PickleError> {
    let mut salt = [0u8; PICKLE_SALT_LENGTH];
    thread_rng().fill_bytes(&mut salt);

    let mut json = serde_json::to_vec(thing)?;
    let cipher = Cipher::new_pickle(pickle_key, &salt);
    let ciphertext = cipher.encrypt_pickle(&json);

    json.zeroize();

    let mut output = Vec::with_capacity(PICKLE_SALT_LENGTH + ciphertext.len());
    output.extend_from_slice(&salt);
    output.extend_from_slice(&ciphertext);

    Ok(base64_encode(output))
}

pub(crate) fn unpickle<T: DeserializeOwned>(
    ciphertext: &str,
    pickle_key: &[u8; 32],
) -> Result<T, PickleError> {
    let decoded = base64_decode(ciphertext.trim_end())?;

    if decoded.len() <= PICKLE_SALT_LENGTH {
        return Err(PickleError::MissingSalt);
    }

    let (salt, ciphertext) = decoded.split_at(PICKLE_SALT_LENGTH);
    let cipher = Cipher::new_pickle(pickle_key, salt);
    let mut plaintext = cipher.decrypt_pickle(ciphertext)?;

    let pickle = serde_json::from_slice(&plaintext);
    plaintext.zeroize();

    Ok(pickle?)
}

/// Whether `name` can be used as a single path component inside a store
/// directory: non-empty, not hidden and free of separators and NUL bytes.
pub(crate) fn is_safe_file_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\', '\0'])
}

/// Replace the file at `path` by writing `contents` to a hidden sibling and
/// renaming it into place, a crash never leaves a torn file behind.
pub(crate) fn write_atomically(path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
    let file_name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)
}
