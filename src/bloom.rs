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

//! BIP37 transaction bloom filter.

use std::f64::consts::LN_2;

/// Maximum size of a BIP37 filter, in bytes.
pub const MAX_BLOOM_FILTER_SIZE: usize = 36_000;
/// Maximum number of hash functions a BIP37 filter may use.
pub const MAX_HASH_FUNCS: u32 = 50;

const LN2_SQUARED: f64 = LN_2 * LN_2;
const SEED_MULTIPLIER: u32 = 0xFBA4C795;

/// How a remote node updates the filter when it matches an output.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default, Display)]
#[display(lowercase)]
#[repr(u8)]
pub enum BloomUpdate {
    #[default]
    None = 0,
    All = 1,
    PubkeyOnly = 2,
}

/// Probabilistic set of byte strings in the BIP37 wire layout.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct BloomFilter {
    data: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
    flags: BloomUpdate,
}

impl BloomFilter {
    /// Constructs an empty filter sized for `elements` entries with the given
    /// false positive rate. Sizes are capped by [`MAX_BLOOM_FILTER_SIZE`] and
    /// [`MAX_HASH_FUNCS`].
    pub fn new(elements: usize, fp_rate: f64, tweak: u32, flags: BloomUpdate) -> Self {
        let elements = elements.max(1);
        let bits = (-1.0 / LN2_SQUARED * elements as f64 * fp_rate.ln()).max(0.0) as usize;
        let len = (bits.min(MAX_BLOOM_FILTER_SIZE * 8) / 8).max(1);
        let hash_funcs = ((len * 8 / elements) as f64 * LN_2) as u32;
        BloomFilter {
            data: vec![0u8; len],
            hash_funcs: hash_funcs.clamp(1, MAX_HASH_FUNCS),
            tweak,
            flags,
        }
    }

    #[inline]
    pub fn data(&self) -> &[u8] { &self.data }

    #[inline]
    pub fn hash_funcs(&self) -> u32 { self.hash_funcs }

    #[inline]
    pub fn tweak(&self) -> u32 { self.tweak }

    #[inline]
    pub fn flags(&self) -> BloomUpdate { self.flags }

    fn bit_index(&self, n: u32, item: &[u8]) -> usize {
        let seed = n.wrapping_mul(SEED_MULTIPLIER).wrapping_add(self.tweak);
        murmur3(seed, item) as usize % (self.data.len() * 8)
    }

    pub fn insert(&mut self, item: impl AsRef<[u8]>) {
        let item = item.as_ref();
        for n in 0..self.hash_funcs {
            let idx = self.bit_index(n, item);
            self.data[idx >> 3] |= 1 << (idx & 7);
        }
    }

    pub fn contains(&self, item: impl AsRef<[u8]>) -> bool {
        let item = item.as_ref();
        (0..self.hash_funcs).all(|n| {
            let idx = self.bit_index(n, item);
            self.data[idx >> 3] & (1 << (idx & 7)) != 0
        })
    }

    /// Serializes the filter as the payload of a `filterload` message.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() + 12);
        let len = self.data.len();
        if len < 0xFD {
            buf.push(len as u8);
        } else {
            buf.push(0xFD);
            buf.extend_from_slice(&(len as u16).to_le_bytes());
        }
        buf.extend_from_slice(&self.data);
        buf.extend_from_slice(&self.hash_funcs.to_le_bytes());
        buf.extend_from_slice(&self.tweak.to_le_bytes());
        buf.push(self.flags as u8);
        buf
    }
}

/// 32-bit MurmurHash3 (x86 variant), as used by BIP37.
pub fn murmur3(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e2d51;
    const C2: u32 = 0x1b873593;

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h1 ^= k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k1 = tail
            .iter()
            .enumerate()
            .fold(0u32, |k, (i, byte)| k ^ ((*byte as u32) << (8 * i)));
        h1 ^= k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85ebca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2ae35);
    h1 ^= h1 >> 16;
    h1
}

#[cfg(test)]
mod test {
    use amplify::hex::FromHex;

    use super::*;

    #[test]
    fn murmur3_vectors() {
        assert_eq!(murmur3(0, &[]), 0);
        assert_eq!(murmur3(0xFBA4C795, &[]), 0x6a396f08);
        assert_eq!(murmur3(0xffffffff, &[]), 0x81f16f39);
        assert_eq!(murmur3(0, &[0x00]), 0x514e28b7);
        assert_eq!(murmur3(0, &[0xff]), 0xfd6cf10d);
        assert_eq!(murmur3(0, &[0x00, 0x11]), 0x16c6b7ab);
        assert_eq!(murmur3(0, &[0x00, 0x11, 0x22]), 0x8eb51c3d);
        assert_eq!(murmur3(0, &[0x00, 0x11, 0x22, 0x33]), 0xb4471bf8);
        assert_eq!(murmur3(0x9747b28c, b"Hello, world!"), 0x24884cba);
    }

    fn filter_with(tweak: u32) -> BloomFilter {
        let mut filter = BloomFilter::new(3, 0.01, tweak, BloomUpdate::All);
        for item in [
            "99108ad8ed9bb6274d3980bab5a85c048f0950c8",
            "b5a2c786d9ef4658287ced5914b37a1b4aa32eee",
            "b9300670b4c5366e95b2699e8b18bc75e5f729c5",
        ] {
            filter.insert(Vec::<u8>::from_hex(item).unwrap());
        }
        filter
    }

    #[test]
    fn bip37_filter() {
        let filter = filter_with(0);
        assert_eq!(filter.hash_funcs(), 5);
        assert_eq!(filter.data(), &[0x61, 0x4e, 0x9b]);
        assert_eq!(
            filter.serialize(),
            Vec::<u8>::from_hex("03614e9b050000000000000001").unwrap()
        );
        assert!(filter.contains(
            Vec::<u8>::from_hex("99108ad8ed9bb6274d3980bab5a85c048f0950c8").unwrap()
        ));
        assert!(!filter.contains(
            Vec::<u8>::from_hex("19108ad8ed9bb6274d3980bab5a85c048f0950c8").unwrap()
        ));
    }

    #[test]
    fn bip37_filter_tweaked() {
        let filter = filter_with(2147483649);
        assert_eq!(
            filter.serialize(),
            Vec::<u8>::from_hex("03ce4299050000000100008001").unwrap()
        );
    }

    #[test]
    fn size_limits() {
        let filter = BloomFilter::new(1_000_000, 0.000001, 0, BloomUpdate::None);
        assert_eq!(filter.data().len(), MAX_BLOOM_FILTER_SIZE);
        assert!(filter.hash_funcs() <= MAX_HASH_FUNCS);
        let tiny = BloomFilter::new(0, 0.5, 0, BloomUpdate::PubkeyOnly);
        assert!(!tiny.data().is_empty());
        assert!(tiny.hash_funcs() >= 1);
    }
}
