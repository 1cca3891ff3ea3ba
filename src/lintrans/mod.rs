//! Plaintext linear transformations encoded by diagonals.
//!
//! A matrix `M` acting on the slot vector is expressed as
//! `v ↦ Σ_k M_k ⊙ rot_k(v)` over its generalized diagonals `M_k`. The
//! encoded form keeps each non-zero diagonal as an NTT + Montgomery
//! plaintext in the extended basis Q·P, optionally pre-rotated for the
//! baby-step/giant-step evaluation.

pub mod evaluator;

use std::collections::HashMap;

use crate::ckks::{Encoder, SlotValue};
use crate::error::{Error, Result};
use crate::params::Params;
use crate::ring::PolyQP;
use crate::rlwe::{LogDimensions, MetaData};

pub use evaluator::{evaluate, evaluate_hoisted};

/// Sparse diagonal collection: index (mod slots) → slot vector.
#[derive(Clone, Debug)]
pub struct Diagonals<T>(pub HashMap<i64, Vec<T>>);

impl<T: SlotValue> Diagonals<T> {
    pub fn new() -> Self {
        Diagonals(HashMap::new())
    }

    pub fn indexes(&self) -> Vec<i64> {
        let mut v: Vec<i64> = self.0.keys().copied().collect();
        v.sort_unstable();
        v
    }

    /// The diagonal at (possibly negative) index `i`, wrapped mod `slots`.
    pub fn at(&self, i: i64, slots: usize) -> Result<&Vec<T>> {
        let key = i.rem_euclid(slots as i64);
        self.0
            .get(&key)
            .ok_or_else(|| Error::shape(format!("diagonal {i} does not exist")))
    }

    pub fn insert(&mut self, i: i64, slots: usize, v: Vec<T>) {
        self.0.insert(i.rem_euclid(slots as i64), v);
    }

    /// Accumulates `v` onto diagonal `i`.
    pub fn add_at(&mut self, i: i64, slots: usize, v: &[T]) {
        let key = i.rem_euclid(slots as i64);
        match self.0.get_mut(&key) {
            Some(d) => {
                for (a, b) in d.iter_mut().zip(v.iter()) {
                    *a = a.add(*b);
                }
            }
            None => {
                self.0.insert(key, v.to_vec());
            }
        }
    }

    /// Composition `self ∘ other` (apply `other` first):
    /// `C_{i+j} += A_i ⊙ rot_i(B_j)`.
    pub fn compose(&self, other: &Diagonals<T>, slots: usize) -> Diagonals<T> {
        let mut out = Diagonals::new();
        for (&i, a) in &self.0 {
            for (&j, b) in &other.0 {
                let rotated = rotate_slots(b, i);
                let prod: Vec<T> = a.iter().zip(rotated.iter()).map(|(x, y)| x.mul(*y)).collect();
                out.add_at(i + j, slots, &prod);
            }
        }
        out
    }

    /// Galois elements of the naive one-rotation-per-diagonal evaluation.
    pub fn galois_elements(&self, params: &Params) -> Vec<u64> {
        let lt_params = LinearTransformationParameters {
            indexes: self.indexes(),
            level_q: params.max_level(),
            scale: 1.0,
            giant_step: 0,
        };
        lt_params.galois_elements(params)
    }
}

impl<T: SlotValue> Default for Diagonals<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Left-rotates a slot vector by `r` positions (negative `r` rotates
/// right).
pub fn rotate_slots<T: Copy>(v: &[T], r: i64) -> Vec<T> {
    let n = v.len();
    let r = (r.rem_euclid(n as i64)) as usize;
    let mut out = Vec::with_capacity(n);
    out.extend_from_slice(&v[r..]);
    out.extend_from_slice(&v[..r]);
    out
}

/// A linear transformation defined as a permutation-with-weights:
/// `out[y] += c · in[x]` per entry.
#[derive(Clone, Debug)]
pub struct Permutation<T> {
    pub entries: Vec<PermutationEntry<T>>,
}

#[derive(Clone, Copy, Debug)]
pub struct PermutationEntry<T> {
    /// Source slot.
    pub x: usize,
    /// Destination slot.
    pub y: usize,
    /// Scalar factor.
    pub c: T,
}

impl<T: SlotValue> Permutation<T> {
    pub fn with_capacity(size: usize) -> Self {
        Permutation {
            entries: Vec::with_capacity(size),
        }
    }

    pub fn push(&mut self, x: usize, y: usize, c: T) {
        self.entries.push(PermutationEntry { x, y, c });
    }

    /// Diagonal indexes touched by the permutation.
    pub fn indexes(&self, slots: usize) -> Vec<i64> {
        let mut set = std::collections::BTreeSet::new();
        for e in &self.entries {
            set.insert((e.x as i64 - e.y as i64).rem_euclid(slots as i64));
        }
        set.into_iter().collect()
    }

    /// Diagonals representation: `D_k[y] = c` for `k = x - y mod slots`.
    pub fn diagonals(&self, slots: usize) -> Diagonals<T> {
        let mut out: HashMap<i64, Vec<T>> = HashMap::new();
        for e in &self.entries {
            let k = (e.x as i64 - e.y as i64).rem_euclid(slots as i64);
            let d = out.entry(k).or_insert_with(|| vec![T::zero(); slots]);
            d[e.y] = e.c;
        }
        Diagonals(out)
    }

    pub fn galois_elements(&self, params: &Params) -> Vec<u64> {
        let lt_params = LinearTransformationParameters {
            indexes: self.indexes(params.max_slots()),
            level_q: params.max_level(),
            scale: 1.0,
            giant_step: 0,
        };
        lt_params.galois_elements(params)
    }
}

/// Construction parameters of an encoded linear transformation.
#[derive(Clone, Debug)]
pub struct LinearTransformationParameters {
    pub indexes: Vec<i64>,
    pub level_q: usize,
    /// Plaintext scale of the encoded diagonals.
    pub scale: f64,
    /// `< 0`: naive (one hoisted rotation per diagonal); `0`: automatic
    /// baby-step/giant-step; `> 0`: explicit giant step.
    pub giant_step: i64,
}

impl LinearTransformationParameters {
    fn resolved_giant_step(&self) -> i64 {
        if self.giant_step != 0 {
            return self.giant_step;
        }
        let d = self.indexes.len().max(1);
        let mut g = 1i64;
        while (g * g) < d as i64 {
            g <<= 1;
        }
        g.max(1)
    }

    /// Rotation keys needed to evaluate a transformation with these
    /// parameters.
    pub fn galois_elements(&self, params: &Params) -> Vec<u64> {
        let slots = params.max_slots() as i64;
        let mut out = std::collections::BTreeSet::new();
        let g = self.resolved_giant_step();
        for &k in &self.indexes {
            let k = k.rem_euclid(slots);
            if g <= 0 {
                if k != 0 {
                    out.insert(params.galois_element(k));
                }
            } else {
                let (i, j) = split_index(k, g, slots);
                if i != 0 {
                    out.insert(params.galois_element(i));
                }
                if j != 0 {
                    out.insert(params.galois_element(j));
                }
            }
        }
        out.into_iter().collect()
    }
}

/// Splits a canonical diagonal index into (baby, giant) components, with
/// the giant chosen around the signed representative to keep rotations
/// short.
pub(crate) fn split_index(k: i64, g: i64, slots: i64) -> (i64, i64) {
    let signed = if k > slots / 2 { k - slots } else { k };
    let j = signed.div_euclid(g) * g;
    let i = signed - j;
    (i, j)
}

/// Plaintext matrix encoded by diagonals, ready for hoisted evaluation.
pub struct LinearTransformation {
    pub meta: MetaData,
    pub level_q: usize,
    pub giant_step: i64,
    /// Canonical diagonal index → encoded plaintext (pre-rotated by the
    /// giant component under BSGS).
    pub vec: HashMap<i64, PolyQP>,
}

impl LinearTransformation {
    /// Encodes the non-zero diagonals at `params.level_q` and
    /// `params.scale`.
    pub fn encode<T: SlotValue>(
        encoder: &mut Encoder,
        diagonals: &Diagonals<T>,
        lt_params: &LinearTransformationParameters,
    ) -> Result<Self> {
        let params = encoder.params().clone();
        let slots = params.max_slots();
        let level_p = params.max_level_p();
        if level_p.is_none() {
            return Err(Error::shape(
                "linear transformations require the auxiliary basis P",
            ));
        }
        let g = lt_params.resolved_giant_step();

        let n = params.n();
        let mut vec = HashMap::new();
        for &idx in &lt_params.indexes {
            let k = idx.rem_euclid(slots as i64);
            let diag = diagonals.at(k, slots)?;
            let values = if g > 0 {
                let (_, j) = split_index(k, g, slots as i64);
                rotate_slots(diag, -j)
            } else {
                diag.clone()
            };
            let mut qp = PolyQP::new(n, lt_params.level_q, level_p);
            encoder.encode_qp(&values, lt_params.level_q, lt_params.scale, &mut qp)?;
            vec.insert(k, qp);
        }

        let mut meta = MetaData::new(lt_params.scale, params.log_max_slots());
        meta.is_montgomery = true;
        meta.log_dimensions = LogDimensions {
            rows: 0,
            cols: params.log_max_slots(),
        };
        Ok(LinearTransformation {
            meta,
            level_q: lt_params.level_q,
            giant_step: g,
            vec,
        })
    }

    pub fn scale(&self) -> f64 {
        self.meta.scale
    }

    /// The Galois elements required to evaluate this transformation.
    pub fn galois_elements(&self, params: &Params) -> Vec<u64> {
        let mut idx: Vec<i64> = self.vec.keys().copied().collect();
        idx.sort_unstable();
        LinearTransformationParameters {
            indexes: idx,
            level_q: self.level_q,
            scale: self.meta.scale,
            giant_step: if self.giant_step <= 0 { -1 } else { self.giant_step },
        }
        .galois_elements(params)
    }
}
