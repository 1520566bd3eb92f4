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

//! BIP32 derivation and key encryption primitives used by HD key chains.

#[macro_use]
extern crate amplify;
#[cfg(feature = "serde")]
#[macro_use]
extern crate serde_crate as serde;

mod index;
mod path;
mod xkey;
pub mod crypter;

pub use crypter::{
    AesKey, CrypterError, EncryptedData, KdfParams, KeyCrypter, AES_KEY_LEN, IV_LEN, SALT_LEN,
};
pub use index::{
    DerivationIndex, HardenedIndex, IdxBase, IndexError, IndexParseError, NormalIndex,
    HARDENED_INDEX_BOUNDARY,
};
pub use path::{DerivationParseError, DerivationPath};
pub use secp256k1;
pub use xkey::{
    ChainCode, PubkeyHash, XkeyError, XkeyMeta, Xpriv, XprivCore, Xpub, XpubCore, XpubFp,
    MASTER_KEY_HMAC_KEY, XPUB_MAINNET_MAGIC, XPUB_TESTNET_MAGIC,
};
