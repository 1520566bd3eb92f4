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

use derive::{NormalIndex, HARDENED_INDEX_BOUNDARY};
use tracing::debug;

use crate::chain::ChainState;
use crate::{ChainError, KeyNode, Keychain};

pub const DEFAULT_LOOKAHEAD_SIZE: u32 = 20;

/// Lookahead window of a key chain.
///
/// Each branch is kept supplied with `size` derived but not yet issued keys.
/// New keys are derived only once the shortfall exceeds `threshold`, so small
/// issuance steps do not require a filter update. `threshold` is always less
/// than `size`.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct LookaheadConfig {
    size: u32,
    threshold: u32,
}

impl Default for LookaheadConfig {
    fn default() -> Self {
        LookaheadConfig {
            size: DEFAULT_LOOKAHEAD_SIZE,
            threshold: DEFAULT_LOOKAHEAD_SIZE / 3,
        }
    }
}

impl LookaheadConfig {
    pub fn new(size: u32, threshold: u32) -> Result<Self, ChainError> {
        let mut config = LookaheadConfig::with_size(size)?;
        config.set_threshold(threshold)?;
        Ok(config)
    }

    /// Constructs config with the default threshold of `size / 3`.
    pub fn with_size(size: u32) -> Result<Self, ChainError> {
        if size == 0 {
            return Err(ChainError::InvalidArgument("lookahead size must be positive".to_owned()));
        }
        Ok(LookaheadConfig {
            size,
            threshold: size / 3,
        })
    }

    #[inline]
    pub fn size(&self) -> u32 { self.size }

    #[inline]
    pub fn threshold(&self) -> u32 { self.threshold }

    /// Changes the window size. A threshold which is not below the new size is
    /// lowered to `size - 1`.
    pub fn set_size(&mut self, size: u32) -> Result<(), ChainError> {
        if size == 0 {
            return Err(ChainError::InvalidArgument("lookahead size must be positive".to_owned()));
        }
        self.size = size;
        if self.threshold >= size {
            self.threshold = size - 1;
        }
        Ok(())
    }

    pub fn set_threshold(&mut self, threshold: u32) -> Result<(), ChainError> {
        if threshold >= self.size {
            return Err(ChainError::InvalidArgument(format!(
                "lookahead threshold {threshold} must be less than lookahead size {}",
                self.size
            )));
        }
        self.threshold = threshold;
        Ok(())
    }

    /// Number of keys to derive for a branch with `issued` keys handed out
    /// and `children` keys materialized, if the shortfall is above the
    /// threshold.
    ///
    /// The result never reaches past the last normal child index.
    pub fn shortfall(&self, issued: u32, children: u32) -> Option<u32> {
        let needed = issued as i64 + self.size as i64 - children as i64;
        if needed <= self.threshold as i64 {
            return None;
        }
        let available = HARDENED_INDEX_BOUNDARY.saturating_sub(children) as i64;
        match needed.min(available) {
            0 => None,
            needed => Some(needed as u32),
        }
    }
}

impl ChainState {
    /// Tops up both branches and registers all new keys in a single batch.
    /// Returns the newly derived keys; nothing is modified on error.
    pub(crate) fn maybe_lookahead(&mut self) -> Result<Vec<KeyNode>, ChainError> {
        let mut batch = vec![];
        for keychain in Keychain::ALL {
            let branch_path = keychain.path();
            let issued = self.issued(keychain);
            let children = self.tree.child_count(&branch_path);
            let Some(needed) = self.lookahead.shortfall(issued, children) else {
                continue;
            };
            let branch = self
                .tree
                .node(&branch_path)
                .ok_or_else(|| ChainError::NodeNotFound(branch_path.clone()))?
                .to_pubkey_only();
            for offset in 0..needed {
                let index = NormalIndex::try_from_child_number(children.saturating_add(offset))?;
                batch.push(branch.derive_child(index)?);
            }
            debug!(
                "lookahead for {keychain} branch: issued {issued}, materialized {children}, \
                 deriving {needed} keys"
            );
        }
        if batch.is_empty() {
            return Ok(batch);
        }
        for node in &batch {
            self.tree.put(node.clone());
        }
        let added = self.registry.import_keys(&batch);
        debug!("registered lookahead batch of {added} keys, {} keys total", self.registry.len());
        Ok(batch)
    }
}

#[cfg(feature = "serde")]
mod _serde {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::*;

    #[derive(Serialize, Deserialize)]
    #[serde(crate = "serde_crate")]
    struct LookaheadRepr {
        size: u32,
        threshold: u32,
    }

    impl Serialize for LookaheadConfig {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where S: Serializer {
            LookaheadRepr {
                size: self.size,
                threshold: self.threshold,
            }
            .serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for LookaheadConfig {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where D: Deserializer<'de> {
            let repr = LookaheadRepr::deserialize(deserializer)?;
            LookaheadConfig::new(repr.size, repr.threshold).map_err(D::Error::custom)
        }
    }
}
