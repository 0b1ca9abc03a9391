// Copyright 2024 Saorsa Labs
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Property-based tests for the shard codec.

use cde::codec::Codec;
use cde::types::Policy;
use proptest::prelude::*;
use std::collections::HashSet;

fn policy_strategy() -> impl Strategy<Value = (u16, u16)> {
    (2u16..=12, 1u16..=8).prop_filter("k + m <= 255", |(k, m)| k + m <= 255)
}

fn chunk_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 16..=512)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn encode_reconstruct_roundtrip_any_k_subset(
        (k, m) in policy_strategy(),
        raw in chunk_strategy(),
    ) {
        let codec = Codec::new();
        let chunk_size = ((raw.len() as u32 + k as u32 - 1) / k as u32) * k as u32;
        let chunk_size = chunk_size.max(k as u32);
        let policy = Policy::new(k, m, chunk_size).unwrap();

        let mut chunk = raw.clone();
        chunk.resize(chunk_size as usize, 0);

        let shards = codec.encode(&policy, &chunk).unwrap();
        let n = (k + m) as usize;
        prop_assert_eq!(shards.len(), n);

        // Any k of the n shards must reconstruct the original chunk.
        let keep: Vec<usize> = (0..n).take(k as usize).collect();
        let mut present: Vec<Option<Vec<u8>>> = (0..n)
            .map(|i| keep.contains(&i).then(|| shards[i].clone()))
            .collect();

        codec.reconstruct(&policy, &mut present).unwrap();
        let data: Vec<Vec<u8>> = present.into_iter().take(k as usize).map(|s| s.unwrap()).collect();
        let rebuilt = codec.assemble(&policy, &data).unwrap();
        prop_assert_eq!(rebuilt, chunk);
    }

    #[test]
    fn systematic_encoding_preserves_data_shards(
        (k, m) in policy_strategy(),
        raw in chunk_strategy(),
    ) {
        let codec = Codec::new();
        let chunk_size = ((raw.len() as u32 + k as u32 - 1) / k as u32) * k as u32;
        let chunk_size = chunk_size.max(k as u32);
        let policy = Policy::new(k, m, chunk_size).unwrap();

        let mut chunk = raw.clone();
        chunk.resize(chunk_size as usize, 0);

        let shards = codec.encode(&policy, &chunk).unwrap();
        let shard_len = policy.shard_len() as usize;
        for (i, shard) in shards.iter().take(k as usize).enumerate() {
            prop_assert_eq!(shard.as_slice(), &chunk[i * shard_len..(i + 1) * shard_len]);
        }
    }

    #[test]
    fn encode_is_deterministic(
        (k, m) in policy_strategy(),
        raw in chunk_strategy(),
    ) {
        let codec = Codec::new();
        let chunk_size = ((raw.len() as u32 + k as u32 - 1) / k as u32) * k as u32;
        let chunk_size = chunk_size.max(k as u32);
        let policy = Policy::new(k, m, chunk_size).unwrap();

        let mut chunk = raw.clone();
        chunk.resize(chunk_size as usize, 0);

        let shards1 = codec.encode(&policy, &chunk).unwrap();
        let shards2 = codec.encode(&policy, &chunk).unwrap();
        prop_assert_eq!(shards1, shards2);
    }

    #[test]
    fn insufficient_shards_are_rejected(
        (k, m) in policy_strategy(),
        raw in chunk_strategy(),
        missing_indices in prop::collection::vec(0usize..20, 0..20),
    ) {
        let codec = Codec::new();
        let chunk_size = ((raw.len() as u32 + k as u32 - 1) / k as u32) * k as u32;
        let chunk_size = chunk_size.max(k as u32);
        let policy = Policy::new(k, m, chunk_size).unwrap();

        let mut chunk = raw.clone();
        chunk.resize(chunk_size as usize, 0);

        let shards = codec.encode(&policy, &chunk).unwrap();
        let n = (k + m) as usize;

        let keep: HashSet<usize> = missing_indices
            .into_iter()
            .filter(|&i| i < n)
            .collect::<HashSet<_>>()
            .into_iter()
            .take((k as usize).saturating_sub(1))
            .collect();

        let mut present: Vec<Option<Vec<u8>>> = (0..n)
            .map(|i| keep.contains(&i).then(|| shards[i].clone()))
            .collect();

        prop_assert!(codec.reconstruct(&policy, &mut present).is_err());
    }
}
