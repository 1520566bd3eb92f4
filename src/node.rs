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

use derive::secp256k1::{PublicKey, SecretKey, SECP256K1};
use derive::{
    AesKey, ChainCode, DerivationIndex, DerivationPath, EncryptedData, KeyCrypter, PubkeyHash,
    XkeyError, XkeyMeta, Xpriv, XprivCore, Xpub, XpubCore, XpubFp,
};

use crate::ChainError;

/// Private part of a key node.
#[derive(Clone, Eq, PartialEq, Debug)]
pub enum KeySecret {
    /// No private key is stored: the node is watch-only, or its private key
    /// is re-derivable from the parent.
    Public,
    Plain(SecretKey),
    Encrypted(EncryptedData),
}

/// Node of the derivation tree.
///
/// Nodes do not reference their parents; the parent is the node at
/// [`KeyNode::parent_path`] in the same [`crate::KeyTree`].
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct KeyNode {
    path: DerivationPath,
    chain_code: ChainCode,
    public_key: PublicKey,
    parent_fp: XpubFp,
    secret: KeySecret,
    creation_time: u64,
}

impl KeyNode {
    pub fn with_xpriv(path: DerivationPath, xpriv: &Xpriv, creation_time: u64) -> Self {
        KeyNode {
            path,
            chain_code: xpriv.chain_code(),
            public_key: xpriv.public_key(),
            parent_fp: xpriv.parent_fp(),
            secret: KeySecret::Plain(xpriv.private_key()),
            creation_time,
        }
    }

    pub fn with_xpub(path: DerivationPath, xpub: &Xpub, creation_time: u64) -> Self {
        KeyNode {
            path,
            chain_code: xpub.chain_code(),
            public_key: xpub.public_key(),
            parent_fp: xpub.parent_fp(),
            secret: KeySecret::Public,
            creation_time,
        }
    }

    pub(crate) fn with_parts(
        path: DerivationPath,
        chain_code: ChainCode,
        public_key: PublicKey,
        parent_fp: XpubFp,
        secret: KeySecret,
        creation_time: u64,
    ) -> Self {
        KeyNode {
            path,
            chain_code,
            public_key,
            parent_fp,
            secret,
            creation_time,
        }
    }

    #[inline]
    pub fn path(&self) -> &DerivationPath { &self.path }

    #[inline]
    pub fn chain_code(&self) -> ChainCode { self.chain_code }

    #[inline]
    pub fn public_key(&self) -> PublicKey { self.public_key }

    #[inline]
    pub fn parent_fp(&self) -> XpubFp { self.parent_fp }

    #[inline]
    pub fn secret(&self) -> &KeySecret { &self.secret }

    /// Creation time as seconds since UNIX epoch.
    #[inline]
    pub fn creation_time(&self) -> u64 { self.creation_time }

    #[inline]
    pub fn depth(&self) -> usize { self.path.depth() }

    pub fn parent_path(&self) -> Option<DerivationPath> { self.path.parent() }

    pub fn child_index(&self) -> Option<DerivationIndex> { self.path.child_index() }

    pub fn pubkey_hash(&self) -> PubkeyHash { PubkeyHash::with(&self.public_key) }

    pub fn is_pubkey_only(&self) -> bool { matches!(self.secret, KeySecret::Public) }

    pub fn is_encrypted(&self) -> bool { matches!(self.secret, KeySecret::Encrypted(_)) }

    pub fn private_key(&self) -> Option<SecretKey> {
        match self.secret {
            KeySecret::Plain(sk) => Some(sk),
            _ => None,
        }
    }

    pub fn encrypted_private_key(&self) -> Option<&EncryptedData> {
        match &self.secret {
            KeySecret::Encrypted(data) => Some(data),
            _ => None,
        }
    }

    fn meta(&self) -> XkeyMeta {
        XkeyMeta {
            depth: self.path.depth() as u8,
            parent_fp: self.parent_fp,
            child_number: self.path.child_index().unwrap_or_default(),
        }
    }

    pub fn to_xpub(&self, testnet: bool) -> Xpub {
        Xpub::new(testnet, self.meta(), XpubCore {
            public_key: self.public_key,
            chain_code: self.chain_code,
        })
    }

    /// Returns extended private key for nodes which store it in plain form.
    pub fn to_xpriv(&self, testnet: bool) -> Option<Xpriv> {
        let private_key = self.private_key()?;
        Some(Xpriv::new(testnet, self.meta(), XprivCore {
            private_key,
            chain_code: self.chain_code,
        }))
    }

    /// Clone of the node with any private key material removed.
    pub fn to_pubkey_only(&self) -> KeyNode {
        KeyNode {
            secret: KeySecret::Public,
            ..self.clone()
        }
    }

    /// Derives direct child of this node. Hardened children require the
    /// private key to be present in plain form.
    pub fn derive_child(&self, index: impl Into<DerivationIndex>) -> Result<KeyNode, XkeyError> {
        let index = index.into();
        let path = self.path.child(index);
        match self.to_xpriv(false) {
            Some(xpriv) => {
                let xpriv = xpriv.ckd_priv(index);
                Ok(KeyNode::with_xpriv(path, &xpriv, self.creation_time))
            }
            None => {
                let xpub = self.to_xpub(false).ckd(index)?;
                Ok(KeyNode::with_xpub(path, &xpub, self.creation_time))
            }
        }
    }

    /// Returns copy of the node with its private key encrypted.
    pub fn encrypt(&self, crypter: &KeyCrypter, key: &AesKey) -> Result<KeyNode, ChainError> {
        let encrypted = match &self.secret {
            KeySecret::Plain(sk) => crypter.encrypt(&sk.secret_bytes(), key)?,
            KeySecret::Encrypted(_) => return Err(ChainError::AlreadyEncrypted),
            KeySecret::Public => return Err(ChainError::WatchOnlyChain),
        };
        Ok(KeyNode {
            secret: KeySecret::Encrypted(encrypted),
            ..self.clone()
        })
    }

    /// Returns copy of the node with its private key decrypted.
    ///
    /// Fails with [`ChainError::WrongDecryptionKey`] if the cipher rejects the
    /// key or the decrypted scalar does not match the node public key.
    pub fn decrypt(&self, crypter: &KeyCrypter, key: &AesKey) -> Result<KeyNode, ChainError> {
        let KeySecret::Encrypted(data) = &self.secret else {
            return Err(ChainError::NotEncrypted);
        };
        let plain = crypter.decrypt(data, key).map_err(|_| ChainError::WrongDecryptionKey)?;
        let sk = SecretKey::from_slice(&plain).map_err(|_| ChainError::WrongDecryptionKey)?;
        if sk.public_key(SECP256K1) != self.public_key {
            return Err(ChainError::WrongDecryptionKey);
        }
        Ok(KeyNode {
            secret: KeySecret::Plain(sk),
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod test {
    use derive::{HardenedIndex, KdfParams, NormalIndex};

    use super::*;

    fn root() -> KeyNode {
        KeyNode::with_xpriv(DerivationPath::new(), &Xpriv::new_master(false, &[0x5a; 32]), 1)
    }

    #[test]
    fn private_and_public_derivation_agree() {
        let account = root().derive_child(HardenedIndex::ZERO).unwrap();
        let by_priv = account.derive_child(NormalIndex::ONE).unwrap();
        let by_pub = account.to_pubkey_only().derive_child(NormalIndex::ONE).unwrap();
        assert_eq!(by_priv.public_key(), by_pub.public_key());
        assert_eq!(by_priv.chain_code(), by_pub.chain_code());
        assert_eq!(by_priv.parent_fp(), by_pub.parent_fp());
        assert_eq!(by_pub.path().to_string(), "m/0h/1");
        assert!(by_pub.is_pubkey_only());
        assert!(by_priv.private_key().is_some());
    }

    #[test]
    fn hardened_requires_private() {
        let public = root().to_pubkey_only();
        assert_eq!(
            public.derive_child(HardenedIndex::ZERO),
            Err(XkeyError::HardenedFromPublic(HardenedIndex::ZERO))
        );
    }

    #[test]
    fn encryption_roundtrip() {
        let crypter = KeyCrypter::new(KdfParams::light());
        let key = crypter.derive_key("secret").unwrap();
        let node = root();
        let encrypted = node.encrypt(&crypter, &key).unwrap();
        assert!(encrypted.is_encrypted());
        assert_eq!(encrypted.private_key(), None);
        assert_eq!(encrypted.public_key(), node.public_key());
        assert_eq!(encrypted.encrypt(&crypter, &key), Err(ChainError::AlreadyEncrypted));
        assert_eq!(encrypted.decrypt(&crypter, &key).unwrap(), node);
        assert_eq!(node.decrypt(&crypter, &key), Err(ChainError::NotEncrypted));
    }

    #[test]
    fn wrong_key_detected() {
        let crypter = KeyCrypter::new(KdfParams::light());
        let key = crypter.derive_key("secret").unwrap();
        let wrong = crypter.derive_key("guess").unwrap();
        let encrypted = root().encrypt(&crypter, &key).unwrap();
        assert_eq!(encrypted.decrypt(&crypter, &wrong), Err(ChainError::WrongDecryptionKey));
    }

    #[test]
    fn encrypting_public_node_fails() {
        let crypter = KeyCrypter::new(KdfParams::light());
        let key = crypter.derive_key("secret").unwrap();
        assert_eq!(
            root().to_pubkey_only().encrypt(&crypter, &key),
            Err(ChainError::WatchOnlyChain)
        );
    }
}
