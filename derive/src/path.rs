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

use core::fmt::{self, Display, Formatter};
use core::str::FromStr;

use crate::{DerivationIndex, IndexParseError};

#[derive(Clone, Eq, PartialEq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum DerivationParseError {
    /// unable to parse derivation path '{0}' - {1}
    InvalidIndex(String, IndexParseError),
    /// invalid derivation path format '{0}'
    InvalidFormat(String),
}

/// Absolute derivation path of a key node, starting from the master key.
///
/// The empty path denotes the master (root) key and is displayed as `m`.
#[derive(Wrapper, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Default, Debug, From)]
#[wrapper(Deref)]
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_crate", transparent)
)]
pub struct DerivationPath(Vec<DerivationIndex>);

impl From<&[DerivationIndex]> for DerivationPath {
    fn from(path: &[DerivationIndex]) -> Self { Self(path.to_vec()) }
}

impl<const LEN: usize> From<[DerivationIndex; LEN]> for DerivationPath {
    fn from(path: [DerivationIndex; LEN]) -> Self { Self(path.to_vec()) }
}

impl AsRef<[DerivationIndex]> for DerivationPath {
    fn as_ref(&self) -> &[DerivationIndex] { self.0.as_ref() }
}

impl Display for DerivationPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for segment in &self.0 {
            f.write_str("/")?;
            Display::fmt(segment, f)?;
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.strip_prefix('m').unwrap_or(s);
        let t = t.strip_prefix('/').unwrap_or(t);
        if t.is_empty() {
            return Ok(Self::new());
        }
        if t.split('/').any(str::is_empty) {
            return Err(DerivationParseError::InvalidFormat(s.to_owned()));
        }
        t.split('/')
            .map(DerivationIndex::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|err| DerivationParseError::InvalidIndex(s.to_owned(), err))
    }
}

impl IntoIterator for DerivationPath {
    type Item = DerivationIndex;
    type IntoIter = std::vec::IntoIter<DerivationIndex>;

    fn into_iter(self) -> Self::IntoIter { self.0.into_iter() }
}

impl<'path> IntoIterator for &'path DerivationPath {
    type Item = DerivationIndex;
    type IntoIter = std::iter::Copied<std::slice::Iter<'path, DerivationIndex>>;

    fn into_iter(self) -> Self::IntoIter { self.0.iter().copied() }
}

impl FromIterator<DerivationIndex> for DerivationPath {
    fn from_iter<T: IntoIterator<Item = DerivationIndex>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl DerivationPath {
    /// Constructs path of the master key.
    pub fn new() -> Self { Self(vec![]) }

    #[inline]
    pub fn is_master(&self) -> bool { self.0.is_empty() }

    /// Number of derivation steps from the master key.
    #[inline]
    pub fn depth(&self) -> usize { self.0.len() }

    /// Index of the last derivation step, which is absent for the master key.
    #[inline]
    pub fn child_index(&self) -> Option<DerivationIndex> { self.0.last().copied() }

    /// Path of the parent node, if any.
    pub fn parent(&self) -> Option<DerivationPath> {
        let (_, parent) = self.0.split_last()?;
        Some(Self(parent.to_vec()))
    }

    /// Constructs path of the direct child with a given index.
    #[must_use]
    pub fn child(&self, index: impl Into<DerivationIndex>) -> DerivationPath {
        let mut path = self.0.clone();
        path.push(index.into());
        Self(path)
    }

    /// Detects whether `other` is a direct child of this path.
    pub fn is_parent_of(&self, other: &DerivationPath) -> bool {
        other.depth() == self.depth() + 1 && other.0.starts_with(&self.0)
    }
}
