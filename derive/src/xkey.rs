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

use std::borrow::Borrow;

use amplify::{Bytes20, Bytes32, Bytes4, Wrapper};
use bitcoin_hashes::{hash160, sha512, Hash, HashEngine, Hmac, HmacEngine};
use secp256k1::{PublicKey, Scalar, SecretKey, SECP256K1};

use crate::{DerivationIndex, HardenedIndex, IdxBase, NormalIndex};

pub const XPUB_MAINNET_MAGIC: [u8; 4] = [0x04u8, 0x88, 0xB2, 0x1E];
pub const XPUB_TESTNET_MAGIC: [u8; 4] = [0x04u8, 0x35, 0x87, 0xCF];

/// Key used for the HMAC-SHA512 producing the master key from a seed.
pub const MASTER_KEY_HMAC_KEY: &[u8] = b"Bitcoin seed";

#[derive(Copy, Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum XkeyError {
    /// wrong length of extended pubkey data ({0}).
    WrongExtendedKeyLength(usize),

    /// provided key is not a standard BIP-32 extended pubkey
    UnknownKeyType([u8; 4]),

    /// extended key contains invalid elliptic curve point - {0}
    #[from]
    InvalidPubkey(secp256k1::Error),

    /// unable to derive hardened child {0} from an extended public key.
    HardenedFromPublic(HardenedIndex),
}

/// BIP32 chain code used for hierarchical derivation
#[derive(Wrapper, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, From)]
#[wrapper(Deref, RangeOps)]
pub struct ChainCode(Bytes32);

impl AsRef<[u8]> for ChainCode {
    fn as_ref(&self) -> &[u8] { self.0.as_ref() }
}

impl From<[u8; 32]> for ChainCode {
    fn from(value: [u8; 32]) -> Self { Self(value.into()) }
}

impl From<ChainCode> for [u8; 32] {
    fn from(value: ChainCode) -> Self { value.0.into_inner() }
}

impl ChainCode {
    pub fn to_byte_array(&self) -> [u8; 32] { (*self).into() }
}

#[derive(Wrapper, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, Display, From)]
#[wrapper(RangeOps, Hex, FromStr)]
#[display(LowerHex)]
pub struct XpubFp(
    #[from]
    #[from([u8; 4])]
    Bytes4,
);

impl AsRef<[u8]> for XpubFp {
    fn as_ref(&self) -> &[u8] { self.0.as_ref() }
}

impl From<XpubFp> for [u8; 4] {
    fn from(value: XpubFp) -> Self { value.0.into_inner() }
}

impl XpubFp {
    pub const fn master() -> Self { Self(Bytes4::zero()) }
}

/// HASH160 of a compressed public key, as used by P2PKH outputs and bloom
/// filters.
#[derive(Wrapper, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, Display, From)]
#[wrapper(RangeOps, Hex, FromStr)]
#[display(LowerHex)]
pub struct PubkeyHash(
    #[from]
    #[from([u8; 20])]
    Bytes20,
);

impl AsRef<[u8]> for PubkeyHash {
    fn as_ref(&self) -> &[u8] { self.0.as_ref() }
}

impl From<PubkeyHash> for [u8; 20] {
    fn from(value: PubkeyHash) -> Self { value.0.into_inner() }
}

impl PubkeyHash {
    pub fn with(pk: &PublicKey) -> Self {
        let hash = hash160::Hash::hash(&pk.serialize());
        Self::from(hash.to_byte_array())
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct XkeyMeta {
    pub depth: u8,
    pub parent_fp: XpubFp,
    pub child_number: DerivationIndex,
}

impl XkeyMeta {
    pub fn master() -> Self {
        XkeyMeta {
            depth: 0,
            parent_fp: XpubFp::master(),
            child_number: DerivationIndex::default(),
        }
    }
}

/// Deterministic part of the extended public key.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct XpubCore {
    /// Public key
    pub public_key: PublicKey,
    /// BIP32 chain code used for hierarchical derivation
    pub chain_code: ChainCode,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct Xpub {
    testnet: bool,
    meta: XkeyMeta,
    core: XpubCore,
}

impl Xpub {
    pub fn new(testnet: bool, meta: XkeyMeta, core: XpubCore) -> Self {
        Xpub {
            testnet,
            meta,
            core,
        }
    }

    pub fn decode(data: impl Borrow<[u8]>) -> Result<Xpub, XkeyError> {
        let data = data.borrow();

        if data.len() != 78 {
            return Err(XkeyError::WrongExtendedKeyLength(data.len()));
        }

        let testnet = match &data[0..4] {
            magic if magic == XPUB_MAINNET_MAGIC => false,
            magic if magic == XPUB_TESTNET_MAGIC => true,
            unknown => {
                let mut magic = [0u8; 4];
                magic.copy_from_slice(unknown);
                return Err(XkeyError::UnknownKeyType(magic));
            }
        };
        let depth = data[4];

        let mut parent_fp = [0u8; 4];
        parent_fp.copy_from_slice(&data[5..9]);

        let mut child_number = [0u8; 4];
        child_number.copy_from_slice(&data[9..13]);
        let child_number = u32::from_be_bytes(child_number);

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&data[13..45]);

        let public_key = PublicKey::from_slice(&data[45..78])?;

        Ok(Xpub {
            testnet,
            meta: XkeyMeta {
                depth,
                parent_fp: parent_fp.into(),
                child_number: child_number.into(),
            },
            core: XpubCore {
                public_key,
                chain_code: chain_code.into(),
            },
        })
    }

    pub fn encode(&self) -> [u8; 78] {
        let mut ret = [0; 78];
        ret[0..4].copy_from_slice(&match self.testnet {
            false => XPUB_MAINNET_MAGIC,
            true => XPUB_TESTNET_MAGIC,
        });
        ret[4] = self.meta.depth;
        ret[5..9].copy_from_slice(self.meta.parent_fp.as_ref());
        ret[9..13].copy_from_slice(&self.meta.child_number.index().to_be_bytes());
        ret[13..45].copy_from_slice(self.core.chain_code.as_ref());
        ret[45..78].copy_from_slice(&self.core.public_key.serialize());
        ret
    }

    #[must_use]
    pub fn is_testnet(&self) -> bool { self.testnet }

    pub fn depth(&self) -> u8 { self.meta.depth }

    pub fn child_number(&self) -> DerivationIndex { self.meta.child_number }

    pub fn parent_fp(&self) -> XpubFp { self.meta.parent_fp }

    pub fn public_key(&self) -> PublicKey { self.core.public_key }

    pub fn chain_code(&self) -> ChainCode { self.core.chain_code }

    /// Returns the HASH160 of the public key
    pub fn identifier(&self) -> PubkeyHash { PubkeyHash::with(&self.core.public_key) }

    pub fn fingerprint(&self) -> XpubFp {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.identifier()[..4]);
        XpubFp::from(bytes)
    }

    /// Derives an extended public key following a path of unhardened indexes.
    pub fn derive_pub(&self, path: impl AsRef<[NormalIndex]>) -> Self {
        let mut pk = *self;
        for cnum in path.as_ref() {
            pk = pk.ckd_pub(*cnum)
        }
        pk
    }

    /// Compute the scalar tweak added to this key to get a child key
    pub fn ckd_pub_tweak(&self, child_no: NormalIndex) -> (Scalar, ChainCode) {
        let mut hmac_engine: HmacEngine<sha512::Hash> =
            HmacEngine::new(self.core.chain_code.as_ref());
        hmac_engine.input(&self.core.public_key.serialize());
        hmac_engine.input(&child_no.to_be_bytes());

        let hmac_result = Hmac::<sha512::Hash>::from_engine(hmac_engine).to_byte_array();

        let private_key = SecretKey::from_slice(&hmac_result[..32])
            .expect("negligible probability")
            .into();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&hmac_result[32..]);
        (private_key, ChainCode::from(bytes))
    }

    /// Public->Public child key derivation
    pub fn ckd_pub(&self, child_no: NormalIndex) -> Xpub {
        let (scalar, chain_code) = self.ckd_pub_tweak(child_no);
        let tweaked =
            self.core.public_key.add_exp_tweak(SECP256K1, &scalar).expect("negligible probability");

        let meta = XkeyMeta {
            depth: self.meta.depth + 1,
            parent_fp: self.fingerprint(),
            child_number: child_no.into(),
        };
        let core = XpubCore {
            public_key: tweaked,
            chain_code,
        };
        Xpub {
            testnet: self.testnet,
            meta,
            core,
        }
    }

    /// Public->Public child key derivation for an arbitrary index, failing on
    /// hardened ones.
    pub fn ckd(&self, index: impl Into<DerivationIndex>) -> Result<Xpub, XkeyError> {
        match index.into() {
            DerivationIndex::Normal(index) => Ok(self.ckd_pub(index)),
            DerivationIndex::Hardened(index) => Err(XkeyError::HardenedFromPublic(index)),
        }
    }
}

/// Deterministic part of the extended private key.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct XprivCore {
    /// Secret key
    pub private_key: SecretKey,
    /// BIP32 chain code used for hierarchical derivation
    pub chain_code: ChainCode,
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Xpriv {
    testnet: bool,
    meta: XkeyMeta,
    core: XprivCore,
}

impl Xpriv {
    pub fn new(testnet: bool, meta: XkeyMeta, core: XprivCore) -> Self {
        Xpriv {
            testnet,
            meta,
            core,
        }
    }

    pub fn new_master(testnet: bool, seed: &[u8]) -> Xpriv {
        let mut hmac_engine: HmacEngine<sha512::Hash> = HmacEngine::new(MASTER_KEY_HMAC_KEY);
        hmac_engine.input(seed);
        let hmac_result = Hmac::<sha512::Hash>::from_engine(hmac_engine).to_byte_array();

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&hmac_result[32..]);

        Xpriv {
            testnet,
            meta: XkeyMeta::master(),
            core: XprivCore {
                private_key: SecretKey::from_slice(&hmac_result[..32])
                    .expect("negligible probability"),
                chain_code: chain_code.into(),
            },
        }
    }

    #[must_use]
    pub fn is_testnet(&self) -> bool { self.testnet }

    pub fn depth(&self) -> u8 { self.meta.depth }

    pub fn child_number(&self) -> DerivationIndex { self.meta.child_number }

    pub fn parent_fp(&self) -> XpubFp { self.meta.parent_fp }

    pub fn fingerprint(&self) -> XpubFp { self.to_xpub().fingerprint() }

    pub fn chain_code(&self) -> ChainCode { self.core.chain_code }

    pub fn private_key(&self) -> SecretKey { self.core.private_key }

    pub fn public_key(&self) -> PublicKey { self.core.private_key.public_key(SECP256K1) }

    pub fn to_xpub(&self) -> Xpub {
        Xpub {
            testnet: self.testnet,
            meta: self.meta,
            core: XpubCore {
                public_key: self.public_key(),
                chain_code: self.core.chain_code,
            },
        }
    }

    /// Derives an extended private key following a path, which may contain
    /// both hardened and unhardened indexes.
    pub fn derive_priv<I: Into<DerivationIndex> + Copy>(&self, path: impl AsRef<[I]>) -> Xpriv {
        let mut xpriv: Xpriv = *self;
        for idx in path.as_ref() {
            xpriv = xpriv.ckd_priv(*idx);
        }
        xpriv
    }

    /// Private->Private child key derivation
    pub fn ckd_priv(&self, idx: impl Into<DerivationIndex>) -> Xpriv {
        let idx = idx.into();

        let mut hmac_engine: HmacEngine<sha512::Hash> =
            HmacEngine::new(self.core.chain_code.as_ref());
        match idx {
            DerivationIndex::Normal(_) => {
                // Non-hardened key: compute public data and use that
                hmac_engine.input(&self.public_key().serialize());
            }
            DerivationIndex::Hardened(_) => {
                // Hardened key: use only secret data to prevent public derivation
                hmac_engine.input(&[0u8]);
                hmac_engine.input(&self.core.private_key.secret_bytes());
            }
        }

        hmac_engine.input(&idx.to_be_bytes());
        let hmac_result = Hmac::<sha512::Hash>::from_engine(hmac_engine).to_byte_array();
        let sk =
            SecretKey::from_slice(&hmac_result[..32]).expect("statistically impossible to hit");
        let tweaked = sk
            .add_tweak(&Scalar::from(self.core.private_key))
            .expect("statistically impossible to hit");

        let mut chain_code = [0u8; 32];
        chain_code.copy_from_slice(&hmac_result[32..]);

        Xpriv {
            testnet: self.testnet,
            meta: XkeyMeta {
                depth: self.meta.depth + 1,
                parent_fp: self.fingerprint(),
                child_number: idx,
            },
            core: XprivCore {
                private_key: tweaked,
                chain_code: chain_code.into(),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use amplify::hex::FromHex;

    use super::*;
    use crate::DerivationPath;

    // BIP32 test vector 1
    const SEED: &str = "000102030405060708090a0b0c0d0e0f";

    fn master() -> Xpriv { Xpriv::new_master(false, &Vec::<u8>::from_hex(SEED).unwrap()) }

    #[test]
    fn bip32_vector1_master() {
        let xpriv = master();
        assert_eq!(
            xpriv.chain_code().to_byte_array().to_vec(),
            Vec::<u8>::from_hex(
                "873dff81c02f525623fd1fe5167eac3a55a049de3d314bb42ee227ffed37d508"
            )
            .unwrap()
        );
        assert_eq!(
            xpriv.public_key().serialize().to_vec(),
            Vec::<u8>::from_hex(
                "0339a36013301597daef41fbe593a02cc513d0b55527ec2df1050e2e8ff49c85c2"
            )
            .unwrap()
        );
        assert_eq!(xpriv.fingerprint().to_string(), "3442193e");
    }

    #[test]
    fn bip32_vector1_hardened_child() {
        let child = master().derive_priv(DerivationPath::from_str("m/0h").unwrap());
        assert_eq!(
            child.public_key().serialize().to_vec(),
            Vec::<u8>::from_hex(
                "035a784662a4a20a65bf6aab9ae98a6c068a81c52e4b032c0fb5400c706cfccc56"
            )
            .unwrap()
        );
        assert_eq!(child.parent_fp().to_string(), "3442193e");
        assert_eq!(child.depth(), 1);
    }

    #[test]
    fn public_matches_private_derivation() {
        let account = master().ckd_priv(HardenedIndex::ZERO);
        let by_priv = account.derive_priv([NormalIndex::ONE, NormalIndex::normal(9)]).to_xpub();
        let by_pub = account.to_xpub().derive_pub([NormalIndex::ONE, NormalIndex::normal(9)]);
        assert_eq!(by_priv, by_pub);
    }

    #[test]
    fn hardened_from_public_fails() {
        let xpub = master().to_xpub();
        assert_eq!(
            xpub.ckd(HardenedIndex::ZERO),
            Err(XkeyError::HardenedFromPublic(HardenedIndex::ZERO))
        );
    }

    #[test]
    fn xpub_encoding() {
        let xpub = master().ckd_priv(HardenedIndex::ZERO).to_xpub();
        let data = xpub.encode();
        assert_eq!(Xpub::decode(data), Ok(xpub));
        assert_eq!(Xpub::decode(&data[..77]), Err(XkeyError::WrongExtendedKeyLength(77)));
    }
}
