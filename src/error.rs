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

use derive::{CrypterError, DerivationPath, IndexError, XkeyError};

/// Errors returned by key chain operations.
#[derive(Clone, Eq, PartialEq, Debug, Display, Error, From)]
#[display(doc_comments)]
pub enum ChainError {
    /// invalid argument - {0}.
    InvalidArgument(String),

    /// unsupported key purpose '{0}'.
    UnsupportedPurpose(String),

    /// key chain is already encrypted.
    AlreadyEncrypted,

    /// key chain is not encrypted.
    NotEncrypted,

    /// operation requires private keys, while the key chain is watch-only.
    WatchOnlyChain,

    /// provided password or AES key does not match the key chain.
    WrongDecryptionKey,

    /// persisted key chain state is unreadable: {0}.
    UnreadablePersistedState(String),

    /// key chain has no node at derivation path {0}.
    NodeNotFound(DerivationPath),

    /// filter sized for {0} elements can't hold all {1} key chain entries.
    InsufficientFilterSize(usize, usize),

    /// key index overflow - {0}.
    #[from]
    IndexOverflow(IndexError),

    #[from]
    #[display(inner)]
    Derivation(XkeyError),

    #[from]
    #[display(inner)]
    Crypter(CrypterError),
}
