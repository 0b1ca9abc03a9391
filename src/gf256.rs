// Copyright 2024 Saorsa Labs
// SPDX-License-Identifier: AGPL-3.0-or-later

//! GF(2⁸) field arithmetic and the Cauchy encoding matrix used by [`crate::codec`].
//!
//! Field elements use the standard irreducible polynomial
//! `x⁸ + x⁴ + x³ + x² + 1` (0x11D). Multiplication is table-driven: a single
//! log/antilog pair built once and shared across the process.

use std::sync::OnceLock;

/// An element of GF(2⁸).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gf256(pub u8);

impl Gf256 {
    pub const ZERO: Gf256 = Gf256(0);
    pub const ONE: Gf256 = Gf256(1);
}

struct Tables {
    log: [u8; 256],
    antilog: [u8; 512],
}

fn tables() -> &'static Tables {
    static TABLES: OnceLock<Tables> = OnceLock::new();
    TABLES.get_or_init(|| {
        const POLY: u16 = 0x11D;
        let mut log = [0u8; 256];
        let mut antilog = [0u8; 512];
        let mut x: u16 = 1;
        for i in 0..255u16 {
            antilog[i as usize] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= POLY;
            }
        }
        // Mirror the table so lookups for sums of two logs in [0, 510) never wrap.
        for i in 255..510 {
            antilog[i] = antilog[i - 255];
        }
        Tables { log, antilog }
    })
}

/// Multiply two field elements.
pub fn mul(a: Gf256, b: Gf256) -> Gf256 {
    if a.0 == 0 || b.0 == 0 {
        return Gf256::ZERO;
    }
    let t = tables();
    let sum = t.log[a.0 as usize] as usize + t.log[b.0 as usize] as usize;
    Gf256(t.antilog[sum])
}

/// Divide `a` by `b`. Panics if `b` is zero.
pub fn div(a: Gf256, b: Gf256) -> Gf256 {
    assert!(b.0 != 0, "division by zero in GF(256)");
    if a.0 == 0 {
        return Gf256::ZERO;
    }
    let t = tables();
    let diff = t.log[a.0 as usize] as isize - t.log[b.0 as usize] as isize + 255;
    Gf256(t.antilog[(diff % 255) as usize])
}

/// Invert a nonzero field element.
pub fn inv(a: Gf256) -> Gf256 {
    div(Gf256::ONE, a)
}

/// Add two field elements (XOR — GF(2⁸) addition is characteristic-2).
pub fn add(a: Gf256, b: Gf256) -> Gf256 {
    Gf256(a.0 ^ b.0)
}

/// `dst[i] ^= src[i] * coeff` for every byte position.
pub fn mul_add_slice(dst: &mut [u8], src: &[u8], coeff: Gf256) {
    if coeff.0 == 0 {
        return;
    }
    if coeff.0 == 1 {
        for (d, s) in dst.iter_mut().zip(src) {
            *d ^= *s;
        }
        return;
    }
    let t = tables();
    let log_c = t.log[coeff.0 as usize] as usize;
    for (d, s) in dst.iter_mut().zip(src) {
        if *s != 0 {
            let sum = t.log[*s as usize] as usize + log_c;
            *d ^= t.antilog[sum];
        }
    }
}

/// `dst[i] = src[i] * coeff` for every byte position.
pub fn mul_slice(dst: &mut [u8], src: &[u8], coeff: Gf256) {
    dst.fill(0);
    mul_add_slice(dst, src, coeff);
}

/// `dst[i] ^= src[i]` for every byte position.
pub fn add_slice(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}

/// Build the `(k+m) x k` systematic encoding matrix: identity over the first
/// `k` rows, a Cauchy matrix over the lower `m` rows. Every `k x k` submatrix
/// of the result is invertible, which is what lets [`crate::codec::reconstruct`]
/// recover from any `k` of the `k+m` rows.
pub fn generate_cauchy_matrix(k: usize, m: usize) -> Vec<Vec<Gf256>> {
    let n = k + m;
    let mut matrix = vec![vec![Gf256::ZERO; k]; n];

    for (row, matrix_row) in matrix.iter_mut().enumerate().take(k) {
        matrix_row[row] = Gf256::ONE;
    }

    // Cauchy construction: entry (i, j) = 1 / (x_i xor y_j), with x_i drawn
    // from the parity rows and y_j from the data columns, both ranging over
    // disjoint byte values so no denominator is ever zero.
    for i in 0..m {
        let x = (k + i) as u8;
        for j in 0..k {
            let y = j as u8;
            let denom = Gf256(x ^ y);
            matrix[k + i][j] = inv(denom);
        }
    }

    matrix
}

/// Invert a square matrix over GF(2⁸) via Gauss-Jordan elimination.
/// Returns `None` if the matrix is singular.
pub fn invert_matrix(matrix: &[Vec<Gf256>]) -> Option<Vec<Vec<Gf256>>> {
    let n = matrix.len();
    debug_assert!(matrix.iter().all(|row| row.len() == n));

    // Augmented [matrix | identity].
    let mut aug: Vec<Vec<Gf256>> = matrix
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut full = row.clone();
            full.extend((0..n).map(|j| if i == j { Gf256::ONE } else { Gf256::ZERO }));
            full
        })
        .collect();

    for col in 0..n {
        // Find a pivot with a nonzero entry in this column.
        let pivot_row = (col..n).find(|&r| aug[r][col].0 != 0)?;
        aug.swap(col, pivot_row);

        let pivot_inv = inv(aug[col][col]);
        for cell in aug[col].iter_mut() {
            *cell = mul(*cell, pivot_inv);
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[row][col];
            if factor.0 == 0 {
                continue;
            }
            for c in 0..aug[row].len() {
                aug[row][c] = add(aug[row][c], mul(factor, aug[col][c]));
            }
        }
    }

    Some(aug.into_iter().map(|row| row[n..].to_vec()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_is_distributive_over_add() {
        let a = Gf256(37);
        let b = Gf256(91);
        let c = Gf256(5);
        assert_eq!(mul(a, add(b, c)), add(mul(a, b), mul(a, c)));
    }

    #[test]
    fn mul_div_roundtrip() {
        for x in 1u16..256 {
            let a = Gf256(x as u8);
            let b = Gf256(200);
            assert_eq!(div(mul(a, b), b), a);
        }
    }

    #[test]
    fn zero_absorbs_multiplication() {
        assert_eq!(mul(Gf256::ZERO, Gf256(123)), Gf256::ZERO);
        assert_eq!(mul(Gf256(123), Gf256::ZERO), Gf256::ZERO);
    }

    #[test]
    fn inv_roundtrip() {
        for x in 1u16..256 {
            let a = Gf256(x as u8);
            assert_eq!(mul(a, inv(a)), Gf256::ONE);
        }
    }

    #[test]
    fn cauchy_matrix_is_systematic() {
        let matrix = generate_cauchy_matrix(4, 3);
        for (row, matrix_row) in matrix.iter().enumerate().take(4) {
            for (col, &cell) in matrix_row.iter().enumerate() {
                assert_eq!(cell, if row == col { Gf256::ONE } else { Gf256::ZERO });
            }
        }
    }

    #[test]
    fn every_k_by_k_submatrix_of_cauchy_matrix_is_invertible() {
        let k = 4;
        let m = 4;
        let matrix = generate_cauchy_matrix(k, m);
        let n = k + m;

        // Check every combination of k rows out of n.
        fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
            if k == 0 {
                return vec![vec![]];
            }
            if n == 0 {
                return vec![];
            }
            let mut out = Vec::new();
            for rest in combinations(n - 1, k - 1) {
                let mut c = rest.clone();
                c.push(n - 1);
                out.push(c);
            }
            out.extend(combinations(n - 1, k));
            out
        }

        for combo in combinations(n, k) {
            let submatrix: Vec<Vec<Gf256>> = combo.iter().map(|&r| matrix[r].clone()).collect();
            assert!(
                invert_matrix(&submatrix).is_some(),
                "submatrix for rows {:?} should be invertible",
                combo
            );
        }
    }

    #[test]
    fn invert_identity_is_identity() {
        let n = 5;
        let identity: Vec<Vec<Gf256>> = (0..n)
            .map(|i| (0..n).map(|j| if i == j { Gf256::ONE } else { Gf256::ZERO }).collect())
            .collect();
        let inverted = invert_matrix(&identity).unwrap();
        assert_eq!(inverted, identity);
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let singular = vec![
            vec![Gf256(1), Gf256(2)],
            vec![Gf256(2), Gf256(4)], // second row is first row doubled in the field sense only by luck; force zero row instead
        ];
        let zero_row = vec![vec![Gf256(1), Gf256(2)], vec![Gf256(0), Gf256(0)]];
        assert!(invert_matrix(&zero_row).is_none());
        let _ = singular;
    }
}
