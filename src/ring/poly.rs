//! RNS polynomial containers.
//!
//! A [`Poly`] is a level-indexed matrix of residue rows: row `i` holds the
//! `n` coefficients modulo `q_i`. `level + 1` rows are live; trailing rows
//! may exist as slack after a level drop and are ignored by every
//! operation.
//!
//! [`PolyVector`] and [`PolyMatrix`] generalize to sequences and 2-D
//! collections, used by gadget ciphertexts and hoisted decompositions.

use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poly {
    pub coeffs: Vec<Vec<u64>>,
}

impl Poly {
    /// Allocates a zero polynomial with `level + 1` residue rows of `n`
    /// coefficients.
    pub fn new(n: usize, level: usize) -> Self {
        Poly {
            coeffs: vec![vec![0u64; n]; level + 1],
        }
    }

    pub fn n(&self) -> usize {
        self.coeffs[0].len()
    }

    pub fn level(&self) -> usize {
        self.coeffs.len() - 1
    }

    #[inline]
    pub fn at(&self, i: usize) -> &[u64] {
        &self.coeffs[i]
    }

    #[inline]
    pub fn at_mut(&mut self, i: usize) -> &mut [u64] {
        &mut self.coeffs[i]
    }

    /// Adjusts the number of live rows, allocating zero rows as needed.
    pub fn resize(&mut self, level: usize) {
        let n = self.n();
        self.coeffs.resize(level + 1, vec![0u64; n]);
    }

    /// Copies the rows of `other` up to `level` (inclusive).
    pub fn copy_at_level(&mut self, level: usize, other: &Poly) {
        for i in 0..=level {
            self.coeffs[i].copy_from_slice(&other.coeffs[i]);
        }
    }

    pub fn zero(&mut self) {
        for row in self.coeffs.iter_mut() {
            row.fill(0);
        }
    }

    /// Equality over the first `level + 1` rows.
    pub fn equal_at_level(&self, level: usize, other: &Poly) -> bool {
        self.coeffs[..=level] == other.coeffs[..=level]
    }
}

impl std::fmt::Debug for Poly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Poly(n={}, level={})", self.n(), self.level())
    }
}

/// A polynomial in basis Q with an optional companion in the extended
/// basis P, as produced by hoisted decompositions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolyQP {
    pub q: Poly,
    pub p: Option<Poly>,
}

impl PolyQP {
    pub fn new(n: usize, level_q: usize, level_p: Option<usize>) -> Self {
        PolyQP {
            q: Poly::new(n, level_q),
            p: level_p.map(|lp| Poly::new(n, lp)),
        }
    }
}

/// Sequence of RNS polynomials (the rows of a gadget decomposition).
pub type PolyVector = Vec<PolyQP>;

/// 2-D ragged collection: `[rns digit][base-2 digit]`.
pub type PolyMatrix = Vec<Vec<PolyQP>>;
