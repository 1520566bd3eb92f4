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

use keychain::{ChainError, KeyChainBuilder, KeyPurpose, Seed};

#[test]
fn filter_size_precondition() {
    let chain = KeyChainBuilder::new().seed(Seed::new(vec![9; 32], 0).unwrap()).build().unwrap();
    chain.get_keys(KeyPurpose::Receive, 3).unwrap();
    let entries = chain.filter_entry_count().unwrap();
    assert_eq!(entries, chain.key_count() * 2);
    assert_eq!(
        chain.build_filter(entries - 1, 0.001, 0x1234).unwrap_err(),
        ChainError::InsufficientFilterSize(entries - 1, entries)
    );
    assert!(chain.build_filter(entries, 0.001, 0x1234).is_ok());
}

#[test]
fn filter_matches_issued_and_lookahead_keys() {
    let chain = KeyChainBuilder::new().random().build().unwrap();
    let issued = chain.get_keys(KeyPurpose::Change, 2).unwrap();
    let filter = chain.build_filter(chain.filter_entry_count().unwrap(), 0.0001, 7).unwrap();
    let lookahead = chain.key_by_path(&"m/0h/0/19".parse().unwrap()).unwrap();
    for key in issued.iter().chain([&lookahead]) {
        assert!(filter.contains(key.public_key().serialize()));
        assert!(filter.contains(key.pubkey_hash()));
    }
    assert_eq!(filter.tweak(), 7);
}

#[test]
fn entry_count_includes_pending_lookahead() {
    let chain = KeyChainBuilder::new().random().build().unwrap();
    assert_eq!(chain.key_count(), 4);
    assert_eq!(chain.filter_entry_count().unwrap(), 2 * (4 + 40));
}
