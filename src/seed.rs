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

use std::fmt::{self, Debug, Formatter};

use derive::{AesKey, EncryptedData, KeyCrypter};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::ChainError;

pub const MIN_SEED_LEN: usize = 16;
pub const MAX_SEED_LEN: usize = 64;
pub const DEFAULT_SEED_LEN: usize = 32;

#[derive(Clone, Eq, PartialEq)]
pub enum SeedData {
    Plain(Zeroizing<Vec<u8>>),
    Encrypted(EncryptedData),
}

/// Entropy the root key of a chain was generated from.
#[derive(Clone, Eq, PartialEq)]
pub struct Seed {
    data: SeedData,
    creation_time: u64,
}

impl Debug for Seed {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed")
            .field("encrypted", &self.is_encrypted())
            .field("creation_time", &self.creation_time)
            .finish_non_exhaustive()
    }
}

impl Seed {
    pub fn new(entropy: impl Into<Vec<u8>>, creation_time: u64) -> Result<Self, ChainError> {
        let entropy = Zeroizing::new(entropy.into());
        if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&entropy.len()) {
            return Err(ChainError::InvalidArgument(format!(
                "seed must be {MIN_SEED_LEN} to {MAX_SEED_LEN} bytes long, while {} bytes were \
                 provided",
                entropy.len()
            )));
        }
        Ok(Seed {
            data: SeedData::Plain(entropy),
            creation_time,
        })
    }

    /// Generates a fresh seed of `len` bytes from the thread RNG.
    pub fn random(len: usize, creation_time: u64) -> Result<Self, ChainError> {
        let mut entropy = Zeroizing::new(vec![0u8; len]);
        rand::thread_rng().fill_bytes(&mut entropy);
        Seed::new(entropy.to_vec(), creation_time)
    }

    pub fn with_encrypted(data: EncryptedData, creation_time: u64) -> Self {
        Seed {
            data: SeedData::Encrypted(data),
            creation_time,
        }
    }

    #[inline]
    pub fn data(&self) -> &SeedData { &self.data }

    #[inline]
    pub fn creation_time(&self) -> u64 { self.creation_time }

    pub fn is_encrypted(&self) -> bool { matches!(self.data, SeedData::Encrypted(_)) }

    pub fn plain_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            SeedData::Plain(entropy) => Some(entropy.as_slice()),
            SeedData::Encrypted(_) => None,
        }
    }

    pub fn encrypted_data(&self) -> Option<&EncryptedData> {
        match &self.data {
            SeedData::Plain(_) => None,
            SeedData::Encrypted(data) => Some(data),
        }
    }

    pub fn encrypt(&self, crypter: &KeyCrypter, key: &AesKey) -> Result<Seed, ChainError> {
        let SeedData::Plain(entropy) = &self.data else {
            return Err(ChainError::AlreadyEncrypted);
        };
        Ok(Seed::with_encrypted(crypter.encrypt(entropy, key)?, self.creation_time))
    }

    pub fn decrypt(&self, crypter: &KeyCrypter, key: &AesKey) -> Result<Seed, ChainError> {
        let SeedData::Encrypted(data) = &self.data else {
            return Err(ChainError::NotEncrypted);
        };
        let entropy = crypter.decrypt(data, key).map_err(|_| ChainError::WrongDecryptionKey)?;
        Seed::new(entropy.to_vec(), self.creation_time)
    }
}

#[cfg(test)]
mod test {
    use derive::KdfParams;

    use super::*;

    #[test]
    fn length_limits() {
        assert!(Seed::new(vec![1u8; 16], 0).is_ok());
        assert!(Seed::new(vec![1u8; 64], 0).is_ok());
        assert!(matches!(Seed::new(vec![1u8; 15], 0), Err(ChainError::InvalidArgument(_))));
        assert!(matches!(Seed::new(vec![1u8; 65], 0), Err(ChainError::InvalidArgument(_))));
        assert!(matches!(Seed::random(8, 0), Err(ChainError::InvalidArgument(_))));
    }

    #[test]
    fn random_seeds_differ() {
        let a = Seed::random(DEFAULT_SEED_LEN, 0).unwrap();
        let b = Seed::random(DEFAULT_SEED_LEN, 0).unwrap();
        assert_eq!(a.plain_bytes().unwrap().len(), DEFAULT_SEED_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn encryption() {
        let crypter = KeyCrypter::new(KdfParams::light());
        let key = crypter.derive_key("pass").unwrap();
        let seed = Seed::new(vec![0xab; 32], 1_700_000_000).unwrap();
        let encrypted = seed.encrypt(&crypter, &key).unwrap();
        assert!(encrypted.is_encrypted());
        assert_eq!(encrypted.plain_bytes(), None);
        assert_eq!(encrypted.creation_time(), 1_700_000_000);
        assert_eq!(encrypted.encrypt(&crypter, &key), Err(ChainError::AlreadyEncrypted));
        assert_eq!(encrypted.decrypt(&crypter, &key).unwrap(), seed);
        assert_eq!(seed.decrypt(&crypter, &key), Err(ChainError::NotEncrypted));
        let wrong = crypter.derive_key("wrong").unwrap();
        assert_eq!(encrypted.decrypt(&crypter, &wrong), Err(ChainError::WrongDecryptionKey));
    }
}
