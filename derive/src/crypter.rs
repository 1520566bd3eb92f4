// Hierarchical deterministic key chains for lightweight bitcoin wallets.
//
// SPDX-License-Identifier: Apache-2.0
//
// Written in 2020-2024 by
//     Dr Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// Copyright (C) 2020-2024 LNP/BP Standards Association. All rights reserved.
// Copyright (C) 2020-2024 Dr Maxim Orlovsky. All rights reserved.
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

//! Password-based encryption of private key material.
//!
//! Passwords are stretched into AES-256 keys with Argon2id; private scalars
//! and seeds are encrypted with AES-256-GCM under a fresh random IV each
//! time. Deriving a key with the default [`KdfParams`] is intentionally slow
//! (hundreds of milliseconds), so callers should keep it off latency-sensitive
//! paths.

use std::fmt::{self, Debug, Formatter};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const AES_KEY_LEN: usize = 32;

#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum CrypterError {
    /// password key derivation has failed - {0}
    Kdf(String),

    /// unable to encrypt private key material.
    Encrypt,

    /// unable to decrypt private key material: the key is wrong or the data are corrupted.
    Decrypt,
}

/// Cost parameters of the Argon2id password key derivation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct KdfParams {
    /// Memory size in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        KdfParams {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Cheapest parameters accepted by Argon2; suitable only for tests.
    pub const fn light() -> Self {
        KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Symmetric key derived from a password.
#[derive(Clone, Eq, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct AesKey([u8; AES_KEY_LEN]);

impl Debug for AesKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result { f.write_str("AesKey(..)") }
}

impl From<[u8; AES_KEY_LEN]> for AesKey {
    fn from(key: [u8; AES_KEY_LEN]) -> Self { AesKey(key) }
}

impl AesKey {
    pub fn as_bytes(&self) -> &[u8; AES_KEY_LEN] { &self.0 }
}

/// Ciphertext together with the IV it was produced with.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct EncryptedData {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

/// Password KDF and cipher bound to a single salt.
///
/// All private material of a key chain is encrypted by the same crypter, so
/// one password unlocks all of it.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct KeyCrypter {
    salt: [u8; SALT_LEN],
    params: KdfParams,
}

impl KeyCrypter {
    /// Creates crypter with a fresh random salt.
    pub fn new(params: KdfParams) -> Self {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        KeyCrypter { salt, params }
    }

    pub fn with_salt(salt: [u8; SALT_LEN], params: KdfParams) -> Self {
        KeyCrypter { salt, params }
    }

    pub fn salt(&self) -> [u8; SALT_LEN] { self.salt }

    pub fn params(&self) -> KdfParams { self.params }

    pub fn derive_key(&self, password: &str) -> Result<AesKey, CrypterError> {
        let params = Params::new(
            self.params.memory_kib,
            self.params.iterations,
            self.params.parallelism,
            Some(AES_KEY_LEN),
        )
        .map_err(|err| CrypterError::Kdf(err.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut key = [0u8; AES_KEY_LEN];
        let res = argon2
            .hash_password_into(password.as_bytes(), &self.salt, &mut key)
            .map_err(|err| CrypterError::Kdf(err.to_string()))
            .map(|_| AesKey(key));
        key.zeroize();
        res
    }

    pub fn encrypt(&self, plain: &[u8], key: &AesKey) -> Result<EncryptedData, CrypterError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plain)
            .map_err(|_| CrypterError::Encrypt)?;
        Ok(EncryptedData { iv, ciphertext })
    }

    pub fn decrypt(
        &self,
        data: &EncryptedData,
        key: &AesKey,
    ) -> Result<Zeroizing<Vec<u8>>, CrypterError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        cipher
            .decrypt(Nonce::from_slice(&data.iv), data.ciphertext.as_ref())
            .map(Zeroizing::new)
            .map_err(|_| CrypterError::Decrypt)
    }
}
