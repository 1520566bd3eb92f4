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
use std::ops::Range;
use std::sync::Arc;

use chrono::Utc;
use derive::secp256k1::{PublicKey, SecretKey};
use derive::{
    AesKey, DerivationIndex, DerivationPath, IdxBase, IndexError, KeyCrypter, NormalIndex,
    PubkeyHash, Xpriv, Xpub, HARDENED_INDEX_BOUNDARY,
};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    account_path, BloomFilter, BloomUpdate, ChainError, KeyNode, KeyPurpose, KeyRegistry,
    KeySecret, KeyTree, Keychain, LookaheadConfig, Seed, DEFAULT_SEED_LEN,
};

/// Paths of the nodes which control a chain: root, account and both
/// branches. Only these nodes carry private material.
pub fn control_paths() -> [DerivationPath; 4] {
    [
        DerivationPath::new(),
        account_path(),
        Keychain::External.path(),
        Keychain::Internal.path(),
    ]
}

/// Receives batches of keys added to a chain by lookahead.
///
/// Listeners are called after the chain lock is released, so they may call
/// back into the chain.
pub trait KeyChainListener: Send + Sync {
    fn on_keys_added(&self, keys: &[KeyNode]);
}

/// Mutable part of a chain, guarded by a single lock.
#[derive(Clone, Debug)]
pub(crate) struct ChainState {
    pub(crate) tree: KeyTree,
    pub(crate) registry: KeyRegistry,
    pub(crate) seed: Option<Seed>,
    pub(crate) crypter: Option<KeyCrypter>,
    pub(crate) issued_external: u32,
    pub(crate) issued_internal: u32,
    pub(crate) lookahead: LookaheadConfig,
}

impl ChainState {
    pub(crate) fn new(lookahead: LookaheadConfig) -> Self {
        ChainState {
            tree: KeyTree::new(),
            registry: KeyRegistry::new(),
            seed: None,
            crypter: None,
            issued_external: 0,
            issued_internal: 0,
            lookahead,
        }
    }

    pub(crate) fn issued(&self, keychain: Keychain) -> u32 {
        match keychain {
            Keychain::External => self.issued_external,
            Keychain::Internal => self.issued_internal,
        }
    }

    pub(crate) fn set_issued(&mut self, keychain: Keychain, issued: u32) {
        match keychain {
            Keychain::External => self.issued_external = issued,
            Keychain::Internal => self.issued_internal = issued,
        }
    }

    fn node(&self, path: &DerivationPath) -> Result<&KeyNode, ChainError> {
        self.tree.node(path).ok_or_else(|| ChainError::NodeNotFound(path.clone()))
    }

    fn issued_range(
        &self,
        keychain: Keychain,
        range: Range<u32>,
    ) -> Result<Vec<KeyNode>, ChainError> {
        let branch = keychain.path();
        range
            .map(|index| {
                let index = NormalIndex::try_from_child_number(index)?;
                self.node(&branch.child(index)).cloned()
            })
            .collect()
    }

    /// Advances the issuance counter of the branch owning `key` and tops up
    /// lookahead. Keys which are not leaves of this chain's branches are
    /// ignored.
    fn mark_used(&mut self, key: &KeyNode) -> Result<Vec<KeyNode>, ChainError> {
        let Some(keychain) = key.parent_path().as_ref().and_then(Keychain::with_path) else {
            trace!("key {} is not a branch leaf, ignoring usage mark", key.path());
            return Ok(vec![]);
        };
        let Some(DerivationIndex::Normal(index)) = key.child_index() else {
            return Ok(vec![]);
        };
        if self.tree.node(key.path()).map(KeyNode::public_key) != Some(key.public_key()) {
            trace!("key {} does not belong to the chain, ignoring usage mark", key.path());
            return Ok(vec![]);
        }
        let prev = self.issued(keychain);
        let used = index.index() + 1;
        if used <= prev {
            return Ok(vec![]);
        }
        trace!("marking {keychain} keys up to index {index} as used");
        self.set_issued(keychain, used);
        let added = self.maybe_lookahead();
        if added.is_err() {
            self.set_issued(keychain, prev);
        }
        added
    }

    /// Returns copy of the node at `path` holding its private key in plain
    /// form, decrypting or deriving it from its ancestors.
    fn plain_node(
        &self,
        path: &DerivationPath,
        aes_key: Option<&AesKey>,
    ) -> Result<KeyNode, ChainError> {
        let node = self.node(path)?;
        match node.secret() {
            KeySecret::Plain(_) => Ok(node.clone()),
            KeySecret::Encrypted(_) => {
                let (Some(crypter), Some(aes_key)) = (&self.crypter, aes_key) else {
                    return Err(ChainError::WrongDecryptionKey);
                };
                node.decrypt(crypter, aes_key)
            }
            KeySecret::Public => {
                let (Some(parent), Some(index)) = (path.parent(), path.child_index()) else {
                    return Err(ChainError::WatchOnlyChain);
                };
                Ok(self.plain_node(&parent, aes_key)?.derive_child(index)?)
            }
        }
    }
}

/// Hierarchical deterministic key chain with a single account and two
/// branches, issuing never-reused keys and keeping a lookahead window of
/// pre-derived keys for filter construction.
///
/// All operations take `&self`; the mutable state is guarded by a lock, so
/// the chain can be shared between threads.
pub struct HdKeyChain {
    watch_only: bool,
    following: bool,
    watching: KeyNode,
    state: Mutex<ChainState>,
    listeners: Mutex<Vec<Arc<dyn KeyChainListener>>>,
}

impl Debug for HdKeyChain {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HdKeyChain")
            .field("watching", &self.watching.public_key())
            .field("watch_only", &self.watch_only)
            .field("following", &self.following)
            .field("encrypted", &state.crypter.is_some())
            .field("issued_external", &state.issued_external)
            .field("issued_internal", &state.issued_internal)
            .field("lookahead", &state.lookahead)
            .field("keys", &state.registry.len())
            .finish()
    }
}

impl HdKeyChain {
    /// Assembles a chain from a fully populated state. The state must contain
    /// the account and both branch nodes.
    pub(crate) fn with_state(following: bool, state: ChainState) -> Result<Self, ChainError> {
        let account = state.node(&account_path())?;
        let watching = account.to_pubkey_only();
        let watch_only = account.is_pubkey_only();
        for keychain in Keychain::ALL {
            state.node(&keychain.path())?;
        }
        Ok(HdKeyChain {
            watch_only,
            following,
            watching,
            state: Mutex::new(state),
            listeners: none!(),
        })
    }

    fn with_seed(
        seed: Seed,
        lookahead: LookaheadConfig,
        following: bool,
    ) -> Result<Self, ChainError> {
        let entropy = seed.plain_bytes().ok_or_else(|| {
            ChainError::InvalidArgument("encrypted seed must be decrypted first".to_owned())
        })?;
        let master = Xpriv::new_master(false, entropy);
        let mut state = ChainState::new(lookahead);
        state.tree.put(KeyNode::with_xpriv(DerivationPath::new(), &master, seed.creation_time()));
        let mut control = Vec::with_capacity(4);
        for path in control_paths() {
            control.push(state.tree.get(&path, true, false)?.clone());
        }
        state.registry.import_keys(&control);
        state.seed = Some(seed);
        debug!("created key chain with master key fingerprint {}", master.fingerprint());
        HdKeyChain::with_state(following, state)
    }

    fn with_watching(
        xpub: Xpub,
        creation_time: u64,
        lookahead: LookaheadConfig,
        following: bool,
    ) -> Result<Self, ChainError> {
        if xpub.depth() != 1 {
            return Err(ChainError::InvalidArgument(format!(
                "watching key must be an account-level key of depth 1, not {}",
                xpub.depth()
            )));
        }
        let mut state = ChainState::new(lookahead);
        state.tree.put(KeyNode::with_xpub(account_path(), &xpub, creation_time));
        for keychain in Keychain::ALL {
            state.tree.get(&keychain.path(), true, false)?;
        }
        let nodes = state.tree.iter().cloned().collect::<Vec<_>>();
        state.registry.import_keys(&nodes);
        debug!("created watch-only key chain for account key {}", xpub.public_key());
        HdKeyChain::with_state(following, state)
    }

    pub(crate) fn state(&self) -> parking_lot::MutexGuard<'_, ChainState> { self.state.lock() }

    fn notify(&self, keys: &[KeyNode]) {
        if keys.is_empty() {
            return;
        }
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener.on_keys_added(keys);
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn KeyChainListener>) {
        self.listeners.lock().push(listener);
    }

    /// Issues `count` fresh keys for the purpose, in ascending index order.
    ///
    /// Keys returned by different calls never overlap. Lookahead for both
    /// branches is topped up before the keys are returned.
    pub fn get_keys(&self, purpose: KeyPurpose, count: u32) -> Result<Vec<KeyNode>, ChainError> {
        if count == 0 {
            return Err(ChainError::InvalidArgument("number of keys must be positive".to_owned()));
        }
        let keychain = purpose.keychain();
        let mut state = self.state.lock();
        let start = state.issued(keychain);
        let end = start.checked_add(count).filter(|end| *end <= HARDENED_INDEX_BOUNDARY).ok_or(
            IndexError {
                what: "issued key index",
                invalid: start.saturating_add(count - 1),
                start: 0,
                end: HARDENED_INDEX_BOUNDARY - 1,
            },
        )?;
        state.set_issued(keychain, end);
        let added = match state.maybe_lookahead() {
            Ok(added) => added,
            Err(err) => {
                state.set_issued(keychain, start);
                return Err(err);
            }
        };
        let keys = state.issued_range(keychain, start..end);
        if keys.is_err() {
            state.set_issued(keychain, start);
        }
        drop(state);
        self.notify(&added);
        keys
    }

    pub fn get_key(&self, purpose: KeyPurpose) -> Result<KeyNode, ChainError> {
        let mut keys = self.get_keys(purpose, 1)?;
        keys.pop().ok_or_else(|| ChainError::NodeNotFound(purpose.keychain().path()))
    }

    /// Reports a key as seen in use, advancing the issuance counter of its
    /// branch up to the key. Keys at or below the counter, and keys which are
    /// not leaves of this chain, are ignored.
    pub fn mark_key_as_used(&self, key: &KeyNode) -> Result<(), ChainError> {
        let added = self.state.lock().mark_used(key)?;
        self.notify(&added);
        Ok(())
    }

    /// Marks the key with the public key hash as used. Returns whether the
    /// key is known to the chain.
    pub fn mark_pubkey_hash_as_used(&self, hash: &PubkeyHash) -> Result<bool, ChainError> {
        let mut state = self.state.lock();
        let Some(path) = state.registry.path_by_pubkey_hash(hash).cloned() else {
            return Ok(false);
        };
        let key = state.node(&path)?.clone();
        let added = state.mark_used(&key)?;
        drop(state);
        self.notify(&added);
        Ok(true)
    }

    /// Marks the key with the public key as used. Returns whether the key is
    /// known to the chain.
    pub fn mark_pubkey_as_used(&self, pubkey: &PublicKey) -> Result<bool, ChainError> {
        let mut state = self.state.lock();
        let Some(path) = state.registry.path_by_pubkey(pubkey).cloned() else {
            return Ok(false);
        };
        let key = state.node(&path)?.clone();
        let added = state.mark_used(&key)?;
        drop(state);
        self.notify(&added);
        Ok(true)
    }

    /// Public-only account key, from which a watch-only copy of the chain
    /// can be built.
    #[inline]
    pub fn watching_key(&self) -> &KeyNode { &self.watching }

    pub fn watching_xpub(&self, testnet: bool) -> Xpub { self.watching.to_xpub(testnet) }

    pub fn lookahead_size(&self) -> u32 { self.state.lock().lookahead.size() }

    pub fn lookahead_threshold(&self) -> u32 { self.state.lock().lookahead.threshold() }

    pub fn lookahead(&self) -> LookaheadConfig { self.state.lock().lookahead }

    /// Sets the lookahead window size. If the current threshold is not below
    /// the new size it is lowered to `size - 1`.
    pub fn set_lookahead_size(&self, size: u32) -> Result<(), ChainError> {
        self.state.lock().lookahead.set_size(size)
    }

    pub fn set_lookahead_threshold(&self, threshold: u32) -> Result<(), ChainError> {
        self.state.lock().lookahead.set_threshold(threshold)
    }

    /// Tops up the lookahead window of both branches, returning the number of
    /// keys derived.
    pub fn maybe_lookahead(&self) -> Result<usize, ChainError> {
        let added = self.state.lock().maybe_lookahead()?;
        self.notify(&added);
        Ok(added.len())
    }

    /// Number of keys materialized under the branch, including lookahead.
    pub fn child_count(&self, keychain: Keychain) -> u32 {
        self.state.lock().tree.child_count(&keychain.path())
    }

    /// Number of elements a filter over all chain keys has to hold. Tops up
    /// lookahead first, so the count matches what [`HdKeyChain::build_filter`]
    /// inserts.
    pub fn filter_entry_count(&self) -> Result<usize, ChainError> {
        let mut state = self.state.lock();
        let added = state.maybe_lookahead()?;
        let count = state.registry.filter_entry_count();
        drop(state);
        self.notify(&added);
        Ok(count)
    }

    /// Builds BIP37 filter over all chain keys, including lookahead keys.
    ///
    /// `size` must be at least [`HdKeyChain::filter_entry_count`].
    pub fn build_filter(
        &self,
        size: usize,
        fp_rate: f64,
        tweak: u32,
    ) -> Result<BloomFilter, ChainError> {
        let mut state = self.state.lock();
        let added = state.maybe_lookahead()?;
        let filter = state.registry.build_filter(size, fp_rate, tweak, BloomUpdate::PubkeyOnly);
        drop(state);
        self.notify(&added);
        filter
    }

    /// Issued keys of both branches, external first. Lookahead keys are not
    /// included.
    pub fn leaf_keys(&self) -> Result<Vec<KeyNode>, ChainError> {
        let state = self.state.lock();
        let mut keys = state.issued_range(Keychain::External, 0..state.issued_external)?;
        keys.extend(state.issued_range(Keychain::Internal, 0..state.issued_internal)?);
        Ok(keys)
    }

    pub fn find_key_by_pubkey_hash(&self, hash: &PubkeyHash) -> Option<KeyNode> {
        let state = self.state.lock();
        let path = state.registry.path_by_pubkey_hash(hash)?;
        state.tree.node(path).cloned()
    }

    pub fn find_key_by_pubkey(&self, pubkey: &PublicKey) -> Option<KeyNode> {
        let state = self.state.lock();
        let path = state.registry.path_by_pubkey(pubkey)?;
        state.tree.node(path).cloned()
    }

    pub fn has_key(&self, pubkey: &PublicKey) -> bool {
        self.state.lock().registry.path_by_pubkey(pubkey).is_some()
    }

    pub fn key_by_path(&self, path: &DerivationPath) -> Option<KeyNode> {
        self.state.lock().tree.node(path).cloned()
    }

    /// Number of keys known to the chain, including control nodes and
    /// lookahead keys.
    pub fn key_count(&self) -> usize { self.state.lock().registry.len() }

    pub fn issued_external_keys(&self) -> u32 { self.state.lock().issued_external }

    pub fn issued_internal_keys(&self) -> u32 { self.state.lock().issued_internal }

    pub fn is_encrypted(&self) -> bool { self.state.lock().crypter.is_some() }

    #[inline]
    pub fn is_watching(&self) -> bool { self.watch_only }

    /// Whether the chain follows another chain when several chains share one
    /// persisted stream.
    #[inline]
    pub fn is_following(&self) -> bool { self.following }

    pub fn seed(&self) -> Option<Seed> { self.state.lock().seed.clone() }

    pub fn crypter(&self) -> Option<KeyCrypter> { self.state.lock().crypter.clone() }

    pub fn earliest_key_creation_time(&self) -> u64 {
        let state = self.state.lock();
        match &state.seed {
            Some(seed) => seed.creation_time(),
            None => state.tree.iter().map(KeyNode::creation_time).min().unwrap_or_default(),
        }
    }

    /// Recovers the private key of a chain key. Leaves keep no private
    /// material, so the key is re-derived from its branch, which is decrypted
    /// with `aes_key` first when the chain is encrypted.
    pub fn private_key_for(
        &self,
        key: &KeyNode,
        aes_key: Option<&AesKey>,
    ) -> Result<SecretKey, ChainError> {
        if self.watch_only {
            warn!("private key requested from a watch-only key chain");
            return Err(ChainError::WatchOnlyChain);
        }
        let state = self.state.lock();
        if state.node(key.path())?.public_key() != key.public_key() {
            return Err(ChainError::NodeNotFound(key.path().clone()));
        }
        let node = state.plain_node(key.path(), aes_key)?;
        node.private_key().ok_or(ChainError::WatchOnlyChain)
    }
}

/// Constructs [`HdKeyChain`] from a seed, fresh random entropy or a watching
/// key.
#[derive(Clone, Debug, Default)]
pub struct KeyChainBuilder {
    seed: Option<Seed>,
    random_len: Option<usize>,
    watching: Option<Xpub>,
    lookahead: LookaheadConfig,
    creation_time: Option<u64>,
    following: bool,
}

impl KeyChainBuilder {
    pub fn new() -> Self { KeyChainBuilder::default() }

    pub fn seed(mut self, seed: Seed) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Generates a fresh seed of [`DEFAULT_SEED_LEN`] bytes on build.
    pub fn random(self) -> Self { self.random_with_len(DEFAULT_SEED_LEN) }

    pub fn random_with_len(mut self, len: usize) -> Self {
        self.random_len = Some(len);
        self
    }

    /// Builds a watch-only chain from an account-level extended public key.
    pub fn watching(mut self, xpub: Xpub) -> Self {
        self.watching = Some(xpub);
        self
    }

    pub fn lookahead(mut self, config: LookaheadConfig) -> Self {
        self.lookahead = config;
        self
    }

    /// Creation time of random seeds and watching keys, in seconds since
    /// UNIX epoch. Defaults to the current time.
    pub fn creation_time(mut self, time: u64) -> Self {
        self.creation_time = Some(time);
        self
    }

    pub fn following(mut self, following: bool) -> Self {
        self.following = following;
        self
    }

    pub fn build(self) -> Result<HdKeyChain, ChainError> {
        let creation_time =
            self.creation_time.unwrap_or_else(|| Utc::now().timestamp().max(0) as u64);
        match (self.seed, self.random_len, self.watching) {
            (Some(seed), None, None) => HdKeyChain::with_seed(seed, self.lookahead, self.following),
            (None, Some(len), None) => {
                let seed = Seed::random(len, creation_time)?;
                HdKeyChain::with_seed(seed, self.lookahead, self.following)
            }
            (None, None, Some(xpub)) => {
                HdKeyChain::with_watching(xpub, creation_time, self.lookahead, self.following)
            }
            (None, None, None) => Err(ChainError::InvalidArgument(
                "key chain requires a seed or a watching key".to_owned(),
            )),
            _ => Err(ChainError::InvalidArgument(
                "only one of seed, random entropy or watching key may be given".to_owned(),
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn chain() -> HdKeyChain {
        KeyChainBuilder::new()
            .seed(Seed::new(vec![0x42; 32], 1_600_000_000).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn construction() {
        let chain = chain();
        assert_eq!(chain.key_count(), 4);
        assert!(!chain.is_watching());
        assert!(!chain.is_encrypted());
        assert_eq!(chain.watching_key().path(), &account_path());
        assert!(chain.watching_key().is_pubkey_only());
        assert_eq!(chain.earliest_key_creation_time(), 1_600_000_000);
        assert!(matches!(KeyChainBuilder::new().build(), Err(ChainError::InvalidArgument(_))));
        assert!(matches!(
            KeyChainBuilder::new().random().watching(chain.watching_xpub(false)).build(),
            Err(ChainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn issuance_is_sequential() {
        let chain = chain();
        let first = chain.get_keys(KeyPurpose::Receive, 3).unwrap();
        let second = chain.get_keys(KeyPurpose::Refund, 2).unwrap();
        let paths = first
            .iter()
            .chain(&second)
            .map(|key| key.path().to_string())
            .collect::<Vec<_>>();
        assert_eq!(paths, ["m/0h/0/0", "m/0h/0/1", "m/0h/0/2", "m/0h/0/3", "m/0h/0/4"]);
        assert!(first.iter().chain(&second).all(KeyNode::is_pubkey_only));
        assert_eq!(chain.get_key(KeyPurpose::Change).unwrap().path().to_string(), "m/0h/1/0");
        assert_eq!(chain.issued_external_keys(), 5);
        assert_eq!(chain.issued_internal_keys(), 1);
        assert!(matches!(
            chain.get_keys(KeyPurpose::Change, 0),
            Err(ChainError::InvalidArgument(_))
        ));
    }

    #[test]
    fn lookahead_batches_both_branches() {
        struct Counter(AtomicUsize, AtomicUsize);
        impl KeyChainListener for Counter {
            fn on_keys_added(&self, keys: &[KeyNode]) {
                self.0.fetch_add(1, Ordering::SeqCst);
                self.1.fetch_add(keys.len(), Ordering::SeqCst);
            }
        }

        let chain = chain();
        let counter = Arc::new(Counter(AtomicUsize::new(0), AtomicUsize::new(0)));
        chain.add_listener(counter.clone());
        chain.get_key(KeyPurpose::Receive).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(counter.1.load(Ordering::SeqCst), 41);
        assert_eq!(chain.child_count(Keychain::External), 21);
        assert_eq!(chain.child_count(Keychain::Internal), 20);
        assert_eq!(chain.key_count(), 45);

        // within the threshold, nothing gets derived
        chain.get_keys(KeyPurpose::Receive, 6).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(chain.child_count(Keychain::External), 21);
    }

    #[test]
    fn usage_marks() {
        let chain = chain();
        chain.maybe_lookahead().unwrap();
        let key = chain.key_by_path(&"m/0h/1/9".parse().unwrap()).unwrap();
        chain.mark_key_as_used(&key).unwrap();
        assert_eq!(chain.issued_internal_keys(), 10);
        let lower = chain.key_by_path(&"m/0h/1/3".parse().unwrap()).unwrap();
        chain.mark_key_as_used(&lower).unwrap();
        assert_eq!(chain.issued_internal_keys(), 10);
        assert_eq!(chain.issued_external_keys(), 0);

        let external = chain.key_by_path(&"m/0h/0/4".parse().unwrap()).unwrap();
        assert!(chain.mark_pubkey_hash_as_used(&external.pubkey_hash()).unwrap());
        assert_eq!(chain.issued_external_keys(), 5);
        let external = chain.key_by_path(&"m/0h/0/7".parse().unwrap()).unwrap();
        assert!(chain.mark_pubkey_as_used(&external.public_key()).unwrap());
        assert_eq!(chain.issued_external_keys(), 8);

        let foreign = KeyChainBuilder::new().random().build().unwrap();
        let stranger = foreign.get_key(KeyPurpose::Receive).unwrap();
        assert!(!chain.mark_pubkey_as_used(&stranger.public_key()).unwrap());
        chain.mark_key_as_used(&stranger).unwrap();
        assert_eq!(chain.issued_external_keys(), 8);
    }

    #[test]
    fn control_nodes_are_not_marked() {
        let chain = chain();
        assert!(chain.mark_pubkey_as_used(&chain.watching_key().public_key()).unwrap());
        assert_eq!(chain.issued_external_keys(), 0);
        assert_eq!(chain.issued_internal_keys(), 0);
    }

    #[test]
    fn lookups() {
        let chain = chain();
        let key = chain.get_key(KeyPurpose::Receive).unwrap();
        assert_eq!(chain.find_key_by_pubkey(&key.public_key()), Some(key.clone()));
        assert_eq!(chain.find_key_by_pubkey_hash(&key.pubkey_hash()), Some(key.clone()));
        assert!(chain.has_key(&key.public_key()));
        assert_eq!(chain.leaf_keys().unwrap(), vec![key]);
    }

    #[test]
    fn private_key_recovery() {
        let seed = vec![0x42; 32];
        let chain = chain();
        let key = chain.get_key(KeyPurpose::Change).unwrap();
        let sk = chain.private_key_for(&key, None).unwrap();
        let expected = Xpriv::new_master(false, &seed).derive_priv([
            DerivationIndex::hardened(0),
            DerivationIndex::normal(1),
            DerivationIndex::normal(0),
        ]);
        assert_eq!(sk, expected.private_key());

        let watching = KeyChainBuilder::new().watching(chain.watching_xpub(false)).build().unwrap();
        let key = watching.get_key(KeyPurpose::Change).unwrap();
        assert_eq!(watching.private_key_for(&key, None), Err(ChainError::WatchOnlyChain));
    }

    #[test]
    fn watch_only_mirror() {
        let chain = chain();
        let watching = KeyChainBuilder::new()
            .watching(chain.watching_xpub(true))
            .creation_time(1)
            .build()
            .unwrap();
        assert!(watching.is_watching());
        assert_eq!(watching.earliest_key_creation_time(), 1);
        let pubkeys = |chain: &HdKeyChain| {
            let keys = chain.get_keys(KeyPurpose::Receive, 4).unwrap();
            keys.iter().map(KeyNode::public_key).collect::<Vec<_>>()
        };
        assert_eq!(pubkeys(&watching), pubkeys(&chain));
    }

    #[test]
    fn watching_key_depth() {
        let chain = chain();
        let root = chain.key_by_path(&DerivationPath::new()).unwrap().to_xpub(false);
        let leaf = chain.get_key(KeyPurpose::Receive).unwrap().to_xpub(false);
        for xpub in [root, leaf] {
            assert!(matches!(
                KeyChainBuilder::new().watching(xpub).build(),
                Err(ChainError::InvalidArgument(_))
            ));
        }
    }
}
