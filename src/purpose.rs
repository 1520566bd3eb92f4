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

use std::str::FromStr;

use derive::{DerivationIndex, DerivationPath, HardenedIndex, NormalIndex};

use crate::ChainError;

/// Path of the account node, `m/0h`, under which both branches live.
pub fn account_path() -> DerivationPath {
    DerivationPath::from([DerivationIndex::Hardened(HardenedIndex::ZERO)])
}

/// One of the two fixed branches of an account.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[display(lowercase)]
#[repr(u8)]
pub enum Keychain {
    /// Receive addresses, `m/0h/0`.
    External = 0,
    /// Change addresses, `m/0h/1`.
    Internal = 1,
}

impl From<Keychain> for NormalIndex {
    #[inline]
    fn from(keychain: Keychain) -> Self { keychain.index() }
}

impl From<Keychain> for DerivationIndex {
    #[inline]
    fn from(keychain: Keychain) -> Self { DerivationIndex::Normal(keychain.index()) }
}

impl Keychain {
    pub const ALL: [Keychain; 2] = [Keychain::External, Keychain::Internal];

    pub const fn index(self) -> NormalIndex { NormalIndex::normal(self as u16) }

    /// Absolute path of the branch node.
    pub fn path(self) -> DerivationPath { account_path().child(self) }

    /// Detects the branch a node at `path` is the branch node of.
    pub fn with_path(path: &DerivationPath) -> Option<Keychain> {
        Keychain::ALL.into_iter().find(|keychain| &keychain.path() == path)
    }
}

/// Reason a key is requested from a chain.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Display)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", rename_all = "camelCase")
)]
#[display(lowercase)]
pub enum KeyPurpose {
    Receive,
    Refund,
    Change,
}

impl KeyPurpose {
    /// Branch keys for the purpose are issued from.
    ///
    /// Refund keys share the external branch with receive keys. This is the
    /// only place the mapping is defined.
    pub const fn keychain(self) -> Keychain {
        match self {
            KeyPurpose::Receive | KeyPurpose::Refund => Keychain::External,
            KeyPurpose::Change => Keychain::Internal,
        }
    }
}

impl FromStr for KeyPurpose {
    type Err = ChainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "receive" => Ok(KeyPurpose::Receive),
            "refund" => Ok(KeyPurpose::Refund),
            "change" => Ok(KeyPurpose::Change),
            _ => Err(ChainError::UnsupportedPurpose(s.to_owned())),
        }
    }
}

impl TryFrom<u8> for KeyPurpose {
    type Error = ChainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyPurpose::Receive),
            1 => Ok(KeyPurpose::Refund),
            2 => Ok(KeyPurpose::Change),
            other => Err(ChainError::UnsupportedPurpose(other.to_string())),
        }
    }
}
