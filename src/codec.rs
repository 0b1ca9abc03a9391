//! Shard codec (§4.1): systematic Reed-Solomon over GF(2⁸).
//!
//! `encode` produces `k` data shards (a direct split of the chunk) plus `m`
//! parity shards. `reconstruct` recovers any missing shards given at least
//! `k` of the `k + m` total, using Gauss-Jordan inversion of the surviving
//! rows of the Cauchy encoding matrix — unlike a decoder limited to
//! parity-only erasures, this supports an arbitrary missing-shard subset.

use crate::error::{FecError, Result};
use crate::gf256::{self, Gf256};
use crate::types::Policy;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug)]
struct CachedMatrix {
    k: usize,
    m: usize,
    matrix: Vec<Vec<Gf256>>,
}

/// Encodes and reconstructs shards for a fixed `(k, m)` shape, caching the
/// generated Cauchy matrix the way `PureRustBackend::get_or_create_matrix`
/// does so repeated calls for the same policy don't regenerate it.
#[derive(Debug, Default)]
pub struct Codec {
    matrix_cache: Arc<RwLock<Vec<CachedMatrix>>>,
}

impl Codec {
    pub fn new() -> Self {
        Self {
            matrix_cache: Arc::new(RwLock::new(Vec::new())),
        }
    }

    fn matrix_for(&self, k: usize, m: usize) -> Vec<Vec<Gf256>> {
        {
            let cache = self.matrix_cache.read();
            if let Some(cached) = cache.iter().find(|c| c.k == k && c.m == m) {
                return cached.matrix.clone();
            }
        }
        let matrix = gf256::generate_cauchy_matrix(k, m);
        self.matrix_cache.write().push(CachedMatrix {
            k,
            m,
            matrix: matrix.clone(),
        });
        matrix
    }

    /// Split `chunk` into `policy.k` data shards and derive `policy.m` parity
    /// shards. `chunk.len()` must equal `policy.chunk_size` (the caller pads
    /// the final chunk of a content to the policy's chunk size beforehand).
    pub fn encode(&self, policy: &Policy, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        let k = policy.k as usize;
        let m = policy.m as usize;
        if chunk.len() != policy.chunk_size as usize {
            return Err(FecError::InvalidShape {
                k,
                m,
                data_len: chunk.len(),
            }
            .into());
        }
        let shard_len = policy.shard_len() as usize;

        let mut shards: Vec<Vec<u8>> = chunk.chunks(shard_len).map(|s| s.to_vec()).collect();
        debug_assert_eq!(shards.len(), k);

        let matrix = self.matrix_for(k, m);
        for i in 0..m {
            let mut parity = vec![0u8; shard_len];
            for (j, data_shard) in shards.iter().enumerate().take(k) {
                let coeff = matrix[k + i][j];
                if coeff.0 != 0 {
                    gf256::mul_add_slice(&mut parity, data_shard, coeff);
                }
            }
            shards.push(parity);
        }
        Ok(shards)
    }

    /// Reconstruct every shard given a sparse set of survivors. `present`
    /// must carry exactly `k + m` slots, `Some` for an available shard and
    /// `None` for a missing one. On success every slot is `Some`.
    pub fn reconstruct(&self, policy: &Policy, present: &mut [Option<Vec<u8>>]) -> Result<()> {
        let k = policy.k as usize;
        let m = policy.m as usize;
        let n = k + m;
        if present.len() != n {
            return Err(FecError::InvalidIndex {
                index: present.len(),
                n,
            }
            .into());
        }

        let available: Vec<usize> = present
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.is_some().then_some(i))
            .collect();
        if available.len() < k {
            return Err(FecError::TooFewShards {
                have: available.len(),
                need: k,
            }
            .into());
        }

        if (0..k).all(|i| present[i].is_some()) {
            return Ok(());
        }

        let chosen = &available[..k];
        let full_matrix = self.matrix_for(k, m);
        let mut decode_matrix = vec![vec![Gf256::ZERO; k]; k];
        for (row, &idx) in chosen.iter().enumerate() {
            if idx < k {
                decode_matrix[row][idx] = Gf256::ONE;
            } else {
                decode_matrix[row][..k].copy_from_slice(&full_matrix[idx][..k]);
            }
        }

        let inverse = gf256::invert_matrix(&decode_matrix).ok_or(FecError::SingularMatrix)?;

        let shard_len = present[chosen[0]].as_ref().unwrap().len();
        let survivors: Vec<&[u8]> = chosen
            .iter()
            .map(|&idx| present[idx].as_ref().unwrap().as_slice())
            .collect();

        for data_idx in 0..k {
            if present[data_idx].is_some() {
                continue;
            }
            let mut recovered = vec![0u8; shard_len];
            for (row, &coeff) in inverse[data_idx].iter().enumerate() {
                if coeff.0 != 0 {
                    gf256::mul_add_slice(&mut recovered, survivors[row], coeff);
                }
            }
            present[data_idx] = Some(recovered);
        }

        // Re-derive any missing parity shards from the now-complete data set.
        if (k..n).any(|i| present[i].is_none()) {
            let data: Vec<&[u8]> = (0..k).map(|i| present[i].as_ref().unwrap().as_slice()).collect();
            for i in 0..m {
                if present[k + i].is_some() {
                    continue;
                }
                let mut parity = vec![0u8; shard_len];
                for (j, data_shard) in data.iter().enumerate() {
                    let coeff = full_matrix[k + i][j];
                    if coeff.0 != 0 {
                        gf256::mul_add_slice(&mut parity, data_shard, coeff);
                    }
                }
                present[k + i] = Some(parity);
            }
        }

        Ok(())
    }

    /// Recombine `k` data shards back into the original chunk bytes.
    pub fn assemble(&self, policy: &Policy, shards: &[Vec<u8>]) -> Result<Vec<u8>> {
        let k = policy.k as usize;
        if shards.len() < k {
            return Err(FecError::TooFewShards {
                have: shards.len(),
                need: k,
            }
            .into());
        }
        let mut out = Vec::with_capacity(policy.chunk_size as usize);
        for shard in &shards[..k] {
            out.extend_from_slice(shard);
        }
        Ok(out)
    }

    /// Verify a shard's content hash against what the Fragment Index recorded
    /// for it, used by the health scan's full-hash sampling path.
    pub fn verify(&self, shard: &[u8], expected_hash: &[u8; 32]) -> bool {
        blake3::hash(shard).as_bytes() == expected_hash
    }
}
