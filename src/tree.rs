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

use std::collections::{BTreeMap, HashMap};

use derive::DerivationPath;

use crate::{ChainError, KeyNode};

/// Path-addressed hierarchy of key nodes.
///
/// Nodes are stored by their absolute derivation path; the tree also keeps the
/// number of materialized direct children for each parent path.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct KeyTree {
    nodes: BTreeMap<DerivationPath, KeyNode>,
    children: HashMap<DerivationPath, u32>,
}

impl KeyTree {
    pub fn new() -> Self { KeyTree::default() }

    /// Returns node at `path`, deriving it from its parent if it is missing and
    /// `create_missing` is set. Missing parents are derived too when
    /// `create_parents` is set; otherwise the parent must already be present.
    pub fn get(
        &mut self,
        path: &DerivationPath,
        create_missing: bool,
        create_parents: bool,
    ) -> Result<&KeyNode, ChainError> {
        if !self.nodes.contains_key(path) {
            if !create_missing {
                return Err(ChainError::NodeNotFound(path.clone()));
            }
            let (Some(parent_path), Some(index)) = (path.parent(), path.child_index()) else {
                return Err(ChainError::NodeNotFound(path.clone()));
            };
            if !self.nodes.contains_key(&parent_path) {
                if !create_parents {
                    return Err(ChainError::NodeNotFound(parent_path));
                }
                self.get(&parent_path, true, true)?;
            }
            let parent = self
                .nodes
                .get(&parent_path)
                .ok_or_else(|| ChainError::NodeNotFound(parent_path.clone()))?;
            let child = parent.derive_child(index)?;
            self.put(child);
        }
        self.nodes.get(path).ok_or_else(|| ChainError::NodeNotFound(path.clone()))
    }

    /// Returns node at `path` if it is materialized.
    #[inline]
    pub fn node(&self, path: &DerivationPath) -> Option<&KeyNode> { self.nodes.get(path) }

    #[inline]
    pub fn contains(&self, path: &DerivationPath) -> bool { self.nodes.contains_key(path) }

    /// Inserts a node, replacing any node at the same path.
    pub fn put(&mut self, node: KeyNode) {
        let parent = node.parent_path();
        if self.nodes.insert(node.path().clone(), node).is_none() {
            if let Some(parent) = parent {
                *self.children.entry(parent).or_default() += 1;
            }
        }
    }

    /// Number of materialized direct children of a node at `parent`.
    pub fn child_count(&self, parent: &DerivationPath) -> u32 {
        self.children.get(parent).copied().unwrap_or_default()
    }

    #[inline]
    pub fn len(&self) -> usize { self.nodes.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

    /// Iterates nodes in derivation path order, so parents always precede
    /// their children.
    pub fn iter(&self) -> impl Iterator<Item = &KeyNode> { self.nodes.values() }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use derive::{DerivationIndex, Xpriv};

    use super::*;

    fn tree() -> KeyTree {
        let mut tree = KeyTree::new();
        let root = Xpriv::new_master(false, &[0x11; 16]);
        tree.put(KeyNode::with_xpriv(DerivationPath::new(), &root, 0));
        tree
    }

    fn path(s: &str) -> DerivationPath { DerivationPath::from_str(s).unwrap() }

    #[test]
    fn missing_node() {
        let mut tree = tree();
        assert_eq!(
            tree.get(&path("m/0h"), false, false),
            Err(ChainError::NodeNotFound(path("m/0h")))
        );
        assert_eq!(
            tree.get(&path("m/0h/0"), true, false),
            Err(ChainError::NodeNotFound(path("m/0h")))
        );
    }

    #[test]
    fn derive_with_parents() {
        let mut tree = tree();
        let leaf = tree.get(&path("m/0h/1/2"), true, true).unwrap().clone();
        assert_eq!(leaf.path(), &path("m/0h/1/2"));
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.child_count(&path("m")), 1);
        assert_eq!(tree.child_count(&path("m/0h/1")), 1);
        assert_eq!(tree.child_count(&path("m/0h/1/2")), 0);
    }

    #[test]
    fn memoized_and_deterministic() {
        let mut tree1 = tree();
        let mut tree2 = tree();
        let a = tree1.get(&path("m/0h/0/5"), true, true).unwrap().clone();
        let b = tree2.get(&path("m/0h/0/5"), true, true).unwrap().clone();
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.chain_code(), b.chain_code());
        let again = tree1.get(&path("m/0h/0/5"), false, false).unwrap();
        assert_eq!(&a, again);
    }

    #[test]
    fn put_overwrites_without_recounting() {
        let mut tree = tree();
        let branch = tree.get(&path("m/0h/0"), true, true).unwrap().clone();
        let child = branch.derive_child(DerivationIndex::normal(0)).unwrap();
        tree.put(child.clone());
        tree.put(child.to_pubkey_only());
        assert_eq!(tree.child_count(&path("m/0h/0")), 1);
        assert!(tree.node(&path("m/0h/0/0")).unwrap().is_pubkey_only());
    }
}
