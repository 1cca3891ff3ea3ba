//! Scheme parameters.
//!
//! A [`ParametersLiteral`] spells out the ring degree, moduli bit sizes,
//! default scale and secret distribution; [`Params`] is the checked,
//! cheaply clonable form with the instantiated rings. Concrete security
//! levels are the caller's responsibility — the library consumes whatever
//! chain it is given.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::math::modular::mod_exp;
use crate::math::prime::generate_primes;
use crate::ring::{Ring, RingType};

/// Literal, serializable parameter description.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParametersLiteral {
    /// log2 of the ring degree N.
    pub log_n: usize,
    /// Bit sizes of the ciphertext moduli chain, level 0 first.
    pub log_q: Vec<usize>,
    /// Bit sizes of the auxiliary (key-switching) moduli. May be empty,
    /// in which case gadget products fall back to digit decomposition.
    pub log_p: Vec<usize>,
    /// log2 of the default plaintext scale Δ.
    pub log_default_scale: usize,
    pub ring_type: RingType,
    /// Hamming weight of the ternary secret.
    pub xs_hamming_weight: usize,
    /// Standard deviation of the encryption noise.
    pub xe_sigma: f64,
}

struct ParamsInner {
    literal: ParametersLiteral,
    ring_q: Ring,
    ring_p: Option<Ring>,
}

/// Checked parameters with instantiated rings. Clones share the rings.
#[derive(Clone)]
pub struct Params {
    inner: Arc<ParamsInner>,
}

impl Params {
    pub fn from_literal(literal: ParametersLiteral) -> Result<Params> {
        if literal.log_n < 3 {
            return Err(Error::shape("log_n too small"));
        }
        if literal.log_q.is_empty() {
            return Err(Error::shape("empty moduli chain"));
        }
        let n = 1usize << literal.log_n;
        let nth_root = match literal.ring_type {
            RingType::Standard => 2 * n as u64,
            RingType::ConjugateInvariant => 4 * n as u64,
        };
        // a single scan keeps Q and P pairwise distinct
        let mut sizes = literal.log_q.clone();
        sizes.extend_from_slice(&literal.log_p);
        let primes = generate_primes(&sizes, 2 * nth_root);
        let (q_primes, p_primes) = primes.split_at(literal.log_q.len());

        let ring_q = Ring::new(n, q_primes, literal.ring_type)?;
        let ring_p = if p_primes.is_empty() {
            None
        } else {
            Some(Ring::new(n, p_primes, literal.ring_type)?)
        };

        Ok(Params {
            inner: Arc::new(ParamsInner {
                literal,
                ring_q,
                ring_p,
            }),
        })
    }

    pub fn literal(&self) -> &ParametersLiteral {
        &self.inner.literal
    }

    pub fn n(&self) -> usize {
        1 << self.inner.literal.log_n
    }

    pub fn log_n(&self) -> usize {
        self.inner.literal.log_n
    }

    pub fn ring_type(&self) -> RingType {
        self.inner.literal.ring_type
    }

    /// Ciphertext-modulus ring at its maximum level.
    pub fn ring_q(&self) -> &Ring {
        &self.inner.ring_q
    }

    pub fn ring_p(&self) -> Option<&Ring> {
        self.inner.ring_p.as_ref()
    }

    pub fn max_level(&self) -> usize {
        self.inner.ring_q.max_level()
    }

    /// Level of the auxiliary basis, `None` when P is absent.
    pub fn max_level_p(&self) -> Option<usize> {
        self.inner.ring_p.as_ref().map(|r| r.max_level())
    }

    pub fn q(&self) -> Vec<u64> {
        self.inner.ring_q.moduli()
    }

    pub fn p(&self) -> Vec<u64> {
        self.inner
            .ring_p
            .as_ref()
            .map(|r| r.moduli())
            .unwrap_or_default()
    }

    pub fn default_scale(&self) -> f64 {
        (self.inner.literal.log_default_scale as f64).exp2()
    }

    pub fn xs_hamming_weight(&self) -> usize {
        self.inner.literal.xs_hamming_weight
    }

    pub fn xe_sigma(&self) -> f64 {
        self.inner.literal.xe_sigma
    }

    /// Number of plaintext slots: N/2 complex slots for the standard ring,
    /// N real slots for the conjugate-invariant ring.
    pub fn max_slots(&self) -> usize {
        match self.inner.literal.ring_type {
            RingType::Standard => self.n() / 2,
            RingType::ConjugateInvariant => self.n(),
        }
    }

    pub fn log_max_slots(&self) -> usize {
        self.max_slots().trailing_zeros() as usize
    }

    /// 2N (standard) or 4N (conjugate-invariant).
    pub fn nth_root(&self) -> u64 {
        self.inner.ring_q.nth_root()
    }

    /// Galois element realizing a rotation of the slot vector by `k`
    /// positions: `5^{k mod slots} mod NthRoot`.
    pub fn galois_element(&self, k: i64) -> u64 {
        let slots = self.max_slots() as i64;
        let k = k.rem_euclid(slots) as u64;
        mod_exp(5, k, self.nth_root())
    }

    /// Galois element of the complex conjugation (standard ring only).
    pub fn galois_element_for_conjugation(&self) -> u64 {
        self.nth_root() - 1
    }

    /// Plaintext scale such that multiplying an operand of scale
    /// `scale_in` and rescaling once lands exactly on `scale_out`.
    pub fn scaling_factor(&self, scale_in: f64, scale_out: f64, level: usize) -> f64 {
        scale_out * self.q()[level] as f64 / scale_in
    }

    /// Number of auxiliary primes (0 when P is absent).
    pub fn alpha(&self) -> usize {
        self.p().len()
    }

    /// Number of RNS digit groups of the gadget decomposition at `level_q`.
    pub fn rns_digit_count(&self, level_q: usize) -> usize {
        match self.alpha() {
            0 => level_q + 1,
            a => (level_q + 1).div_ceil(a),
        }
    }

    /// Member range of RNS digit group `i` at `level_q`.
    pub fn rns_digit_range(&self, level_q: usize, i: usize) -> std::ops::Range<usize> {
        let a = self.alpha().max(1);
        (i * a)..((i + 1) * a).min(level_q + 1)
    }

    /// Iterations of lazy accumulation that fit before a 64-bit overflow
    /// at the given level.
    pub fn qi_overflow_margin(&self, level: usize) -> usize {
        let max_q = self.q()[..=level].iter().copied().max().unwrap();
        ((u64::MAX / max_q) / 2) as usize
    }

    /// Galois elements required by `inner_sum(batch, n)` (and its dual
    /// `replicate(-batch, n)`).
    pub fn galois_elements_for_inner_sum(&self, batch: i64, n: usize) -> Vec<u64> {
        let mut out = Vec::new();
        let mut m = 1usize;
        let bits = usize::BITS - n.leading_zeros();
        for b in (0..bits - 1).rev() {
            out.push(self.galois_element(m as i64 * batch));
            m *= 2;
            if (n >> b) & 1 == 1 {
                out.push(self.galois_element(m as i64 * batch));
                m += 1;
            }
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Galois elements required by `replicate(batch, n)`.
    pub fn galois_elements_for_replicate(&self, batch: i64, n: usize) -> Vec<u64> {
        self.galois_elements_for_inner_sum(-batch, n)
    }
}

impl std::fmt::Debug for Params {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Params(logN={}, levels={}, |P|={}, type={:?}, logΔ={})",
            self.log_n(),
            self.max_level() + 1,
            self.p().len(),
            self.ring_type(),
            self.inner.literal.log_default_scale,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn small_literal() -> ParametersLiteral {
        ParametersLiteral {
            log_n: 8,
            log_q: vec![50, 40, 40],
            log_p: vec![51],
            log_default_scale: 40,
            ring_type: RingType::Standard,
            xs_hamming_weight: 64,
            xe_sigma: 3.2,
        }
    }

    #[test]
    fn builds_distinct_ntt_primes() {
        let params = Params::from_literal(small_literal()).unwrap();
        let mut all = params.q();
        all.extend(params.p());
        for (i, &q) in all.iter().enumerate() {
            assert_eq!(q % (2 * params.nth_root()), 1);
            assert!(!all[..i].contains(&q));
        }
        assert_eq!(params.max_level(), 2);
        assert_eq!(params.max_slots(), 128);
    }

    #[test]
    fn galois_elements_are_odd_units() {
        let params = Params::from_literal(small_literal()).unwrap();
        let m = params.nth_root();
        for k in [-3i64, -1, 1, 2, 5, 100] {
            let g = params.galois_element(k);
            assert_eq!(g % 2, 1);
            assert!(g < m);
        }
        assert_eq!(params.galois_element(0), 1);
    }

    #[test]
    fn conjugate_invariant_slots() {
        let mut lit = small_literal();
        lit.ring_type = RingType::ConjugateInvariant;
        let params = Params::from_literal(lit).unwrap();
        assert_eq!(params.max_slots(), 256);
        assert_eq!(params.nth_root(), 1024);
    }
}
