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

//! Encryption and decryption of key chains.
//!
//! Both directions build a new chain, leaving the source untouched. Only the
//! control nodes (root, account and both branches) carry private material;
//! leaves are always stored public-only and re-derived on demand.

use derive::{AesKey, DerivationPath, KdfParams, KeyCrypter};
use tracing::{debug, warn};

use crate::chain::{control_paths, ChainState};
use crate::{account_path, ChainError, HdKeyChain, KeyRegistry, KeyTree};

/// Registers nodes of `tree` in the order they were registered in `source`.
fn rebuild_registry(source: &KeyRegistry, tree: &KeyTree) -> Result<KeyRegistry, ChainError> {
    let nodes = source
        .paths()
        .map(|path| tree.node(path).ok_or_else(|| ChainError::NodeNotFound(path.clone())))
        .collect::<Result<Vec<_>, _>>()?;
    let mut registry = KeyRegistry::new();
    registry.import_keys(nodes);
    Ok(registry)
}

impl HdKeyChain {
    fn check_encryptable(&self, state: &ChainState) -> Result<(), ChainError> {
        if self.is_watching() {
            warn!("refusing to encrypt a watch-only key chain");
            return Err(ChainError::WatchOnlyChain);
        }
        if state.crypter.is_some() {
            return Err(ChainError::AlreadyEncrypted);
        }
        Ok(())
    }

    /// Returns encrypted copy of the chain, deriving the encryption key from
    /// `password` with the default KDF parameters.
    ///
    /// The key derivation is deliberately slow; do not call this from latency
    /// sensitive code.
    pub fn to_encrypted(&self, password: &str) -> Result<HdKeyChain, ChainError> {
        self.to_encrypted_with_params(password, KdfParams::default())
    }

    pub fn to_encrypted_with_params(
        &self,
        password: &str,
        params: KdfParams,
    ) -> Result<HdKeyChain, ChainError> {
        self.check_encryptable(&self.state())?;
        let crypter = KeyCrypter::new(params);
        let key = crypter.derive_key(password)?;
        self.to_encrypted_with_key(crypter, &key)
    }

    /// Returns copy of the chain with all control nodes and the seed
    /// encrypted with `key`. Leaves are copied as public-only nodes; issuance
    /// counters and lookahead settings are preserved.
    pub fn to_encrypted_with_key(
        &self,
        crypter: KeyCrypter,
        key: &AesKey,
    ) -> Result<HdKeyChain, ChainError> {
        let state = self.state();
        self.check_encryptable(&state)?;

        let control = control_paths();
        let mut tree = KeyTree::new();
        for node in state.tree.iter() {
            if control.contains(node.path()) {
                tree.put(node.encrypt(&crypter, key)?);
            } else {
                tree.put(node.to_pubkey_only());
            }
        }
        let seed = state.seed.as_ref().map(|seed| seed.encrypt(&crypter, key)).transpose()?;
        let registry = rebuild_registry(&state.registry, &tree)?;
        debug!("encrypted key chain with {} keys", registry.len());

        HdKeyChain::with_state(self.is_following(), ChainState {
            tree,
            registry,
            seed,
            crypter: Some(crypter),
            issued_external: state.issued_external,
            issued_internal: state.issued_internal,
            lookahead: state.lookahead,
        })
    }

    /// Returns decrypted copy of the chain.
    ///
    /// Fails with [`ChainError::WrongDecryptionKey`] if the password does not
    /// match the one the chain was encrypted with.
    pub fn to_decrypted(&self, password: &str) -> Result<HdKeyChain, ChainError> {
        let crypter = self.crypter().ok_or(ChainError::NotEncrypted)?;
        let key = crypter.derive_key(password)?;
        self.to_decrypted_with_key(&key)
    }

    /// Returns copy of the chain with the root decrypted with `key` and the
    /// account and branch nodes re-derived from it. The re-derived account
    /// key must match the watching key of this chain.
    pub fn to_decrypted_with_key(&self, key: &AesKey) -> Result<HdKeyChain, ChainError> {
        let state = self.state();
        let crypter = state.crypter.as_ref().ok_or(ChainError::NotEncrypted)?;
        let root_path = DerivationPath::new();
        let root = state
            .tree
            .node(&root_path)
            .ok_or_else(|| ChainError::NodeNotFound(root_path.clone()))?
            .decrypt(crypter, key)?;

        let mut tree = KeyTree::new();
        tree.put(root);
        for path in &control_paths()[1..] {
            let derived = tree.get(path, true, false)?.public_key();
            if state.tree.node(path).map(|node| node.public_key()) != Some(derived) {
                return Err(ChainError::WrongDecryptionKey);
            }
        }
        let account = tree.get(&account_path(), false, false)?;
        if account.public_key() != self.watching_key().public_key() {
            return Err(ChainError::WrongDecryptionKey);
        }

        for node in state.tree.iter() {
            if !tree.contains(node.path()) {
                tree.put(node.to_pubkey_only());
            }
        }
        let seed = state.seed.as_ref().map(|seed| seed.decrypt(crypter, key)).transpose()?;
        let registry = rebuild_registry(&state.registry, &tree)?;
        debug!("decrypted key chain with {} keys", registry.len());

        HdKeyChain::with_state(self.is_following(), ChainState {
            tree,
            registry,
            seed,
            crypter: None,
            issued_external: state.issued_external,
            issued_internal: state.issued_internal,
            lookahead: state.lookahead,
        })
    }

    /// Checks whether `password` decrypts the chain. Never fails: a wrong
    /// password, a KDF failure or a plaintext chain all give `false`.
    pub fn check_password(&self, password: &str) -> bool {
        let Some(crypter) = self.crypter() else {
            warn!("password check requested for a key chain which is not encrypted");
            return false;
        };
        match crypter.derive_key(password) {
            Ok(key) => self.check_aes_key(&key),
            Err(err) => {
                warn!("unable to derive key from the password: {err}");
                false
            }
        }
    }

    /// Checks whether `key` decrypts the root node to the known root public
    /// key.
    pub fn check_aes_key(&self, key: &AesKey) -> bool {
        let state = self.state();
        let Some(crypter) = &state.crypter else {
            return false;
        };
        state
            .tree
            .node(&DerivationPath::new())
            .is_some_and(|root| root.decrypt(crypter, key).is_ok())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{KeyChainBuilder, KeyPurpose, Seed};

    const PASSWORD: &str = "correct horse battery staple";

    fn chain() -> HdKeyChain {
        let chain = KeyChainBuilder::new()
            .seed(Seed::new(vec![0x17; 32], 0).unwrap())
            .build()
            .unwrap();
        chain.get_keys(KeyPurpose::Receive, 3).unwrap();
        chain.get_key(KeyPurpose::Change).unwrap();
        chain
    }

    fn encrypted(chain: &HdKeyChain) -> HdKeyChain {
        chain.to_encrypted_with_params(PASSWORD, KdfParams::light()).unwrap()
    }

    #[test]
    fn only_control_nodes_carry_ciphertext() {
        let chain = chain();
        let encrypted = encrypted(&chain);
        let state = encrypted.state();
        let ciphered = state.tree.iter().filter(|node| node.is_encrypted()).count();
        assert_eq!(ciphered, 4);
        assert!(state.tree.iter().all(|node| node.private_key().is_none()));
        assert!(state.seed.as_ref().is_some_and(Seed::is_encrypted));
        assert_eq!(state.tree.len(), chain.state().tree.len());
    }

    #[test]
    fn topology_and_counters_preserved() {
        let chain = chain();
        let encrypted = encrypted(&chain);
        assert!(encrypted.is_encrypted());
        assert!(!chain.is_encrypted());
        assert_eq!(encrypted.issued_external_keys(), 3);
        assert_eq!(encrypted.issued_internal_keys(), 1);
        assert_eq!(encrypted.lookahead(), chain.lookahead());
        assert_eq!(encrypted.key_count(), chain.key_count());
        assert_eq!(encrypted.leaf_keys().unwrap(), chain.leaf_keys().unwrap());
        let paths = |chain: &HdKeyChain| {
            chain.state().registry.paths().cloned().collect::<Vec<_>>()
        };
        assert_eq!(paths(&encrypted), paths(&chain));
    }

    #[test]
    fn double_encryption() {
        let encrypted = encrypted(&chain());
        assert_eq!(
            encrypted.to_encrypted_with_params(PASSWORD, KdfParams::light()).unwrap_err(),
            ChainError::AlreadyEncrypted
        );
        assert_eq!(chain().to_decrypted(PASSWORD).unwrap_err(), ChainError::NotEncrypted);
    }

    #[test]
    fn decryption_restores_private_control_nodes() {
        let chain = chain();
        let decrypted = encrypted(&chain).to_decrypted(PASSWORD).unwrap();
        assert!(!decrypted.is_encrypted());
        let state = decrypted.state();
        for path in control_paths() {
            assert_eq!(
                state.tree.node(&path).and_then(|node| node.private_key()),
                chain.state().tree.node(&path).and_then(|node| node.private_key())
            );
        }
        assert_eq!(state.seed, chain.state().seed);
    }

    #[test]
    fn password_checks() {
        let chain = chain();
        let encrypted = encrypted(&chain);
        assert!(encrypted.check_password(PASSWORD));
        assert!(!encrypted.check_password("wrong"));
        assert!(!chain.check_password(PASSWORD));
        let wrong = encrypted.crypter().unwrap().derive_key("wrong").unwrap();
        assert!(!encrypted.check_aes_key(&wrong));
        assert_eq!(
            encrypted.to_decrypted_with_key(&wrong).unwrap_err(),
            ChainError::WrongDecryptionKey
        );
    }
}
