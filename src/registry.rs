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

use derive::secp256k1::PublicKey;
use derive::{DerivationPath, PubkeyHash};
use indexmap::IndexMap;

use crate::{BloomFilter, BloomUpdate, ChainError, KeyNode};

/// Flat, insertion-ordered index of every key node materialized by a chain.
///
/// The registry maps public key hashes and raw public keys to node paths;
/// nodes themselves live in the [`crate::KeyTree`].
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct KeyRegistry {
    by_hash: IndexMap<PubkeyHash, DerivationPath>,
    by_pubkey: IndexMap<PublicKey, DerivationPath>,
}

impl KeyRegistry {
    pub fn new() -> Self { KeyRegistry::default() }

    /// Registers a batch of nodes, returning how many of them were not known
    /// before.
    pub fn import_keys<'node>(
        &mut self,
        nodes: impl IntoIterator<Item = &'node KeyNode>,
    ) -> usize {
        let mut added = 0usize;
        for node in nodes {
            let pk = node.public_key();
            if self.by_pubkey.insert(pk, node.path().clone()).is_none() {
                added += 1;
            }
            self.by_hash.insert(node.pubkey_hash(), node.path().clone());
        }
        added
    }

    pub fn path_by_pubkey_hash(&self, hash: &PubkeyHash) -> Option<&DerivationPath> {
        self.by_hash.get(hash)
    }

    pub fn path_by_pubkey(&self, pubkey: &PublicKey) -> Option<&DerivationPath> {
        self.by_pubkey.get(pubkey)
    }

    #[inline]
    pub fn len(&self) -> usize { self.by_pubkey.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.by_pubkey.is_empty() }

    /// Paths of the registered nodes in the order they were imported.
    pub fn paths(&self) -> impl Iterator<Item = &DerivationPath> { self.by_pubkey.values() }

    /// Number of entries a filter over all registered keys holds: one for the
    /// public key and one for its hash.
    pub fn filter_entry_count(&self) -> usize { self.len() * 2 }

    /// Builds BIP37 filter over all registered keys.
    ///
    /// Fails with [`ChainError::InsufficientFilterSize`] if `size` is smaller
    /// than [`KeyRegistry::filter_entry_count`].
    pub fn build_filter(
        &self,
        size: usize,
        fp_rate: f64,
        tweak: u32,
        flags: BloomUpdate,
    ) -> Result<BloomFilter, ChainError> {
        let required = self.filter_entry_count();
        if size < required {
            return Err(ChainError::InsufficientFilterSize(size, required));
        }
        let mut filter = BloomFilter::new(size, fp_rate, tweak, flags);
        for pubkey in self.by_pubkey.keys() {
            filter.insert(pubkey.serialize());
            filter.insert(PubkeyHash::with(pubkey));
        }
        Ok(filter)
    }
}
