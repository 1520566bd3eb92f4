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

//! Persisted layout of key chains.
//!
//! A stream of [`KeyRecord`]s may hold several chains. A chain starts at a
//! seed record, at a root record which does not follow a seed, or at an
//! account record when the current chain already has its account. Records
//! of a chain follow in derivation path order, so parents always precede
//! their children.

use derive::secp256k1::{PublicKey, SecretKey, SECP256K1};
use derive::{DerivationPath, EncryptedData, IdxBase, KeyCrypter, XpubFp};
use tracing::debug;

use crate::chain::ChainState;
use crate::seed::SeedData;
use crate::{
    account_path, ChainError, HdKeyChain, KeyNode, KeySecret, Keychain, LookaheadConfig, Seed,
};

/// Private material of a persisted record.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum SecretRecord {
    None,
    Plain(Vec<u8>),
    Encrypted(EncryptedData),
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct SeedRecord {
    pub secret: SecretRecord,
    pub creation_time: u64,
    pub following: bool,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub struct DerivedKeyRecord {
    pub path: DerivationPath,
    pub chain_code: [u8; 32],
    /// Compressed public key.
    pub public_key: Vec<u8>,
    pub parent_fp: [u8; 4],
    pub secret: SecretRecord,
    pub creation_time: u64,
    /// Issuance counter; present on branch records only.
    pub issued_subkeys: Option<u32>,
    /// Lookahead window size; present on branch records only.
    pub lookahead_size: Option<u32>,
    /// Set on the first record of a chain which follows another chain.
    pub following: bool,
}

#[derive(Clone, Eq, PartialEq, Hash, Debug, From)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
pub enum KeyRecord {
    #[from]
    Seed(SeedRecord),
    #[from]
    Derived(DerivedKeyRecord),
}

impl KeyRecord {
    pub fn is_following(&self) -> bool {
        match self {
            KeyRecord::Seed(record) => record.following,
            KeyRecord::Derived(record) => record.following,
        }
    }
}

fn unreadable(no: usize, reason: impl AsRef<str>) -> ChainError {
    ChainError::UnreadablePersistedState(format!("record #{no}: {}", reason.as_ref()))
}

impl SeedRecord {
    fn to_seed(&self, no: usize, crypter: Option<&KeyCrypter>) -> Result<Seed, ChainError> {
        match &self.secret {
            SecretRecord::None => Err(unreadable(no, "seed record has no seed data")),
            SecretRecord::Plain(entropy) => Seed::new(entropy.clone(), self.creation_time)
                .map_err(|err| unreadable(no, err.to_string())),
            SecretRecord::Encrypted(_) if crypter.is_none() => {
                Err(unreadable(no, "encrypted seed requires a key crypter"))
            }
            SecretRecord::Encrypted(data) => {
                Ok(Seed::with_encrypted(data.clone(), self.creation_time))
            }
        }
    }
}

impl DerivedKeyRecord {
    fn to_node(&self, no: usize, crypter: Option<&KeyCrypter>) -> Result<KeyNode, ChainError> {
        let public_key = PublicKey::from_slice(&self.public_key)
            .map_err(|err| unreadable(no, format!("invalid public key - {err}")))?;
        let secret = match &self.secret {
            SecretRecord::None => KeySecret::Public,
            SecretRecord::Plain(data) => {
                let sk = SecretKey::from_slice(data)
                    .map_err(|err| unreadable(no, format!("invalid private key - {err}")))?;
                if sk.public_key(SECP256K1) != public_key {
                    return Err(unreadable(no, "private key does not match the public key"));
                }
                KeySecret::Plain(sk)
            }
            SecretRecord::Encrypted(_) if crypter.is_none() => {
                return Err(unreadable(no, "encrypted private key requires a key crypter"));
            }
            SecretRecord::Encrypted(data) => KeySecret::Encrypted(data.clone()),
        };
        Ok(KeyNode::with_parts(
            self.path.clone(),
            self.chain_code.into(),
            public_key,
            XpubFp::from(self.parent_fp),
            secret,
            self.creation_time,
        ))
    }
}

/// Chain being assembled from records.
struct PendingChain {
    following: bool,
    state: ChainState,
    lookahead_size: Option<u32>,
}

impl PendingChain {
    fn new(following: bool) -> Self {
        PendingChain {
            following,
            state: ChainState::new(LookaheadConfig::default()),
            lookahead_size: None,
        }
    }

    fn has(&self, path: &DerivationPath) -> bool { self.state.tree.contains(path) }

    fn is_seed_only(&self) -> bool { self.state.seed.is_some() && self.state.tree.is_empty() }

    fn add(
        &mut self,
        no: usize,
        record: &DerivedKeyRecord,
        node: KeyNode,
    ) -> Result<(), ChainError> {
        let path = node.path().clone();
        if self.has(&path) {
            return Err(unreadable(no, format!("duplicate record for {path}")));
        }
        match path.depth() {
            0 => {}
            1 if path == account_path() => {}
            1 => return Err(unreadable(no, format!("{path} is not an account path"))),
            2 => {
                let keychain = Keychain::with_path(&path)
                    .ok_or_else(|| unreadable(no, format!("{path} is not a branch path")))?;
                let (Some(issued), Some(size)) = (record.issued_subkeys, record.lookahead_size)
                else {
                    return Err(unreadable(no, "branch record misses issuance data"));
                };
                self.state.set_issued(keychain, issued);
                self.lookahead_size = Some(size);
            }
            _ => {
                let parent = node.parent_path().unwrap_or_default();
                if Keychain::with_path(&parent).is_none() {
                    return Err(unreadable(no, format!("{path} is not a branch leaf")));
                }
            }
        }
        let parent = node.parent_path().map(|parent| self.state.tree.node(&parent));
        match parent {
            Some(Some(parent)) if parent.to_xpub(false).fingerprint() != node.parent_fp() => {
                return Err(unreadable(no, format!("{path} is not a child of its parent")));
            }
            // watch-only chains start at the account key
            Some(None) if path.depth() > 1 => {
                return Err(unreadable(no, format!("{path} has no parent record")));
            }
            _ => {}
        }
        if path.depth() >= 2 {
            self.check_derivation(no, &node)?;
        }
        self.state.registry.import_keys([&node]);
        self.state.tree.put(node);
        Ok(())
    }

    /// Branches and leaves must match public derivation from their parent.
    fn check_derivation(&self, no: usize, node: &KeyNode) -> Result<(), ChainError> {
        let path = node.path();
        let (Some(parent), Some(index)) = (node.parent_path(), node.child_index()) else {
            return Ok(());
        };
        let Some(parent) = self.state.tree.node(&parent) else {
            return Ok(());
        };
        let expected = parent
            .to_pubkey_only()
            .derive_child(index)
            .map_err(|err| unreadable(no, format!("{path} can't be derived: {err}")))?;
        if expected.public_key() != node.public_key() || expected.chain_code() != node.chain_code()
        {
            return Err(unreadable(no, format!("{path} does not match its derivation")));
        }
        Ok(())
    }

    fn finish(
        mut self,
        no: usize,
        crypter: Option<&KeyCrypter>,
    ) -> Result<HdKeyChain, ChainError> {
        for path in [account_path(), Keychain::External.path(), Keychain::Internal.path()] {
            if !self.has(&path) {
                return Err(unreadable(no, format!("key chain has no record for {path}")));
            }
        }
        if self.state.seed.is_some() && !self.has(&DerivationPath::new()) {
            return Err(unreadable(no, "key chain has a seed but no root key"));
        }
        for keychain in Keychain::ALL {
            let branch = keychain.path();
            let count = self.state.tree.child_count(&branch);
            let gap = self
                .state
                .tree
                .iter()
                .filter(|node| node.parent_path().as_ref() == Some(&branch))
                .filter_map(KeyNode::child_index)
                .any(|index| index.is_hardened() || index.index() >= count);
            if gap {
                return Err(unreadable(no, format!("{keychain} branch has gaps in key indexes")));
            }
        }
        let size = self.lookahead_size.unwrap_or_default();
        self.state.lookahead = LookaheadConfig::with_size(size)
            .map_err(|_| unreadable(no, format!("invalid lookahead size {size}")))?;

        let encrypted = self.state.tree.iter().any(KeyNode::is_encrypted)
            || self.state.seed.as_ref().is_some_and(Seed::is_encrypted);
        if encrypted {
            if self.state.tree.iter().any(|node| node.private_key().is_some())
                || self.state.seed.as_ref().is_some_and(|seed| !seed.is_encrypted())
            {
                return Err(unreadable(no, "key chain mixes encrypted and plain private keys"));
            }
            self.state.crypter = crypter.cloned();
        }
        HdKeyChain::with_state(self.following, self.state)
    }
}

impl HdKeyChain {
    /// Persisted form of the chain: the seed record, if any, followed by all
    /// materialized nodes in derivation path order.
    pub fn to_records(&self) -> Vec<KeyRecord> {
        let state = self.state();
        let mut records = Vec::with_capacity(state.tree.len() + 1);
        if let Some(seed) = &state.seed {
            let secret = match seed.data() {
                SeedData::Plain(entropy) => SecretRecord::Plain(entropy.to_vec()),
                SeedData::Encrypted(data) => SecretRecord::Encrypted(data.clone()),
            };
            records.push(KeyRecord::Seed(SeedRecord {
                secret,
                creation_time: seed.creation_time(),
                following: self.is_following(),
            }));
        }
        for node in state.tree.iter() {
            let keychain = Keychain::with_path(node.path());
            let secret = match node.secret() {
                KeySecret::Public => SecretRecord::None,
                KeySecret::Plain(sk) => SecretRecord::Plain(sk.secret_bytes().to_vec()),
                KeySecret::Encrypted(data) => SecretRecord::Encrypted(data.clone()),
            };
            records.push(KeyRecord::Derived(DerivedKeyRecord {
                path: node.path().clone(),
                chain_code: node.chain_code().to_byte_array(),
                public_key: node.public_key().serialize().to_vec(),
                parent_fp: node.parent_fp().into(),
                secret,
                creation_time: node.creation_time(),
                issued_subkeys: keychain.map(|keychain| state.issued(keychain)),
                lookahead_size: keychain.map(|_| state.lookahead.size()),
                following: self.is_following() && records.is_empty(),
            }));
        }
        records
    }

    /// Restores all chains from a record stream. `crypter` is required when
    /// any of the chains is encrypted.
    ///
    /// The lookahead threshold is not persisted and is reset to a third of
    /// the lookahead size.
    pub fn from_records(
        records: &[KeyRecord],
        crypter: Option<KeyCrypter>,
    ) -> Result<Vec<HdKeyChain>, ChainError> {
        let crypter = crypter.as_ref();
        let mut chains = vec![];
        let mut pending: Option<PendingChain> = None;

        for (no, record) in records.iter().enumerate() {
            let starts_chain = match record {
                KeyRecord::Seed(_) => true,
                KeyRecord::Derived(record) => match record.path.depth() {
                    0 => !pending.as_ref().is_some_and(PendingChain::is_seed_only),
                    1 => !pending.as_ref().is_some_and(|chain| {
                        chain.has(&DerivationPath::new()) && !chain.has(&account_path())
                    }),
                    2 | 3 => false,
                    depth => return Err(unreadable(no, format!("unsupported depth {depth}"))),
                },
            };
            if starts_chain {
                if let Some(chain) = pending.take() {
                    chains.push(chain.finish(no, crypter)?);
                }
                pending = Some(PendingChain::new(record.is_following()));
            } else if record.is_following() {
                return Err(unreadable(no, "following flag is set inside a key chain"));
            }
            let Some(chain) = pending.as_mut() else {
                return Err(unreadable(no, "record does not belong to any key chain"));
            };

            match record {
                KeyRecord::Seed(seed) => chain.state.seed = Some(seed.to_seed(no, crypter)?),
                KeyRecord::Derived(record) => {
                    let node = record.to_node(no, crypter)?;
                    chain.add(no, record, node)?;
                }
            }
        }
        if let Some(chain) = pending {
            chains.push(chain.finish(records.len(), crypter)?);
        }
        debug!("restored {} key chains from {} records", chains.len(), records.len());
        Ok(chains)
    }
}

#[cfg(test)]
mod test {
    use derive::KdfParams;

    use super::*;
    use crate::{KeyChainBuilder, KeyPurpose};

    fn chain() -> HdKeyChain {
        let chain = KeyChainBuilder::new()
            .seed(Seed::new(vec![0x21; 32], 1_650_000_000).unwrap())
            .build()
            .unwrap();
        chain.get_keys(KeyPurpose::Receive, 2).unwrap();
        chain
    }

    #[test]
    fn layout() {
        let chain = chain();
        let records = chain.to_records();
        assert_eq!(records.len(), chain.key_count() + 1);
        assert!(matches!(records[0], KeyRecord::Seed(_)));
        let KeyRecord::Derived(external) = &records[3] else {
            panic!("derived record expected");
        };
        assert_eq!(external.path, Keychain::External.path());
        assert_eq!(external.issued_subkeys, Some(2));
        assert_eq!(external.lookahead_size, Some(20));
        let KeyRecord::Derived(leaf) = &records[5] else {
            panic!("derived record expected");
        };
        assert_eq!(leaf.path.depth(), 3);
        assert_eq!(leaf.secret, SecretRecord::None);
        assert_eq!(leaf.issued_subkeys, None);
    }

    #[test]
    fn restore() {
        let chain = chain();
        chain.set_lookahead_threshold(2).unwrap();
        let restored = HdKeyChain::from_records(&chain.to_records(), None).unwrap();
        assert_eq!(restored.len(), 1);
        let restored = &restored[0];
        assert_eq!(restored.issued_external_keys(), 2);
        assert_eq!(restored.lookahead_size(), 20);
        assert_eq!(restored.lookahead_threshold(), 6);
        assert_eq!(restored.key_count(), chain.key_count());
        assert_eq!(restored.seed(), chain.seed());
        assert_eq!(restored.to_records(), chain.to_records());
    }

    #[test]
    fn restore_encrypted() {
        let encrypted = chain().to_encrypted_with_params("pw", KdfParams::light()).unwrap();
        let records = encrypted.to_records();
        assert!(matches!(
            HdKeyChain::from_records(&records, None),
            Err(ChainError::UnreadablePersistedState(_))
        ));
        let restored = HdKeyChain::from_records(&records, encrypted.crypter()).unwrap();
        assert!(restored[0].is_encrypted());
        assert!(restored[0].check_password("pw"));
    }

    #[test]
    fn multiple_chains() {
        let first = chain();
        let watching = KeyChainBuilder::new()
            .watching(first.watching_xpub(false))
            .following(true)
            .creation_time(5)
            .build()
            .unwrap();
        watching.get_key(KeyPurpose::Change).unwrap();
        let mut records = first.to_records();
        let following = watching.to_records();
        assert!(following[0].is_following());
        assert!(!following[1].is_following());
        records.extend(following);

        let chains = HdKeyChain::from_records(&records, None).unwrap();
        assert_eq!(chains.len(), 2);
        assert!(!chains[0].is_following());
        assert!(chains[1].is_following());
        assert!(chains[1].is_watching());
        assert_eq!(chains[1].issued_internal_keys(), 1);
        let (ours, theirs) = (chains[1].watching_key(), first.watching_key());
        assert_eq!(ours.public_key(), theirs.public_key());
        assert_eq!(ours.chain_code(), theirs.chain_code());
    }

    #[test]
    fn malformed_streams() {
        let records = chain().to_records();
        let unreadable = |records: &[KeyRecord]| {
            matches!(
                HdKeyChain::from_records(records, None),
                Err(ChainError::UnreadablePersistedState(_))
            )
        };

        // missing internal branch
        let mut truncated = records.clone();
        truncated.retain(|record| {
            !matches!(record, KeyRecord::Derived(r) if r.path == Keychain::Internal.path())
        });
        assert!(unreadable(&truncated));

        // leaf before its branch
        let mut reordered = records.clone();
        let leaf = reordered.remove(5);
        reordered.insert(3, leaf);
        assert!(unreadable(&reordered));

        // branch without issuance data
        let mut stripped = records.clone();
        if let KeyRecord::Derived(record) = &mut stripped[3] {
            record.issued_subkeys = None;
        }
        assert!(unreadable(&stripped));

        // corrupted public key
        let mut corrupted = records.clone();
        if let KeyRecord::Derived(record) = &mut corrupted[6] {
            record.public_key = vec![0x05; 33];
        }
        assert!(unreadable(&corrupted));

        // gap in issued keys
        let mut gapped = records.clone();
        gapped.retain(|record| {
            !matches!(record, KeyRecord::Derived(r) if r.path.to_string() == "m/0h/0/1")
        });
        assert_eq!(gapped.len(), records.len() - 1);
        assert!(unreadable(&gapped));

        // valid public key which is not derived from the branch
        let mut swapped = records.clone();
        let KeyRecord::Derived(other) = &records[7] else {
            panic!("derived record expected");
        };
        if let KeyRecord::Derived(record) = &mut swapped[6] {
            record.public_key = other.public_key.clone();
        }
        assert!(unreadable(&swapped));

        // branch chain code altered
        let mut recoded = records.clone();
        if let KeyRecord::Derived(record) = &mut recoded[3] {
            record.chain_code[0] ^= 0xFF;
        }
        assert!(unreadable(&recoded));

        // following flag in the middle of a chain
        let mut flagged = records;
        if let KeyRecord::Derived(record) = &mut flagged[4] {
            record.following = true;
        }
        assert!(unreadable(&flagged));
    }
}
