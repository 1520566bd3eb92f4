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

//! Hierarchical deterministic key chain for lightweight wallets.
//!
//! [`HdKeyChain`] issues never-reused receive and change keys from a single
//! BIP32 account, keeps a window of pre-derived lookahead keys so a remote
//! BIP37 filter needs few rebuilds, and can be converted into an encrypted or
//! decrypted copy of itself without mutating the source.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod error;
mod node;
mod tree;
mod registry;
mod bloom;
mod purpose;
mod lookahead;
mod seed;
mod chain;
mod transform;
mod records;

pub use bloom::{murmur3, BloomFilter, BloomUpdate, MAX_BLOOM_FILTER_SIZE, MAX_HASH_FUNCS};
pub use chain::{control_paths, HdKeyChain, KeyChainBuilder, KeyChainListener};
pub use derive::{
    secp256k1, AesKey, ChainCode, DerivationIndex, DerivationPath, EncryptedData, HardenedIndex,
    IdxBase, KdfParams, KeyCrypter, NormalIndex, PubkeyHash, Xpriv, Xpub, XpubFp,
};
pub use error::ChainError;
pub use lookahead::{LookaheadConfig, DEFAULT_LOOKAHEAD_SIZE};
pub use node::{KeyNode, KeySecret};
pub use purpose::{account_path, KeyPurpose, Keychain};
pub use records::{DerivedKeyRecord, KeyRecord, SecretRecord, SeedRecord};
pub use registry::KeyRegistry;
pub use seed::{Seed, SeedData, DEFAULT_SEED_LEN, MAX_SEED_LEN, MIN_SEED_LEN};
pub use tree::KeyTree;
