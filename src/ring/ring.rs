//! The RNS ring: a stack of sub-rings with a current level.
//!
//! A [`Ring`] is a cheap view: cloning or calling [`Ring::at_level`] shares
//! the underlying sub-rings and precomputations through an `Arc`, so views
//! can be handed to worker threads freely. Public operations iterate the
//! per-modulus kernels over rows `0..=level`.

use std::sync::Arc;

use num_bigint::BigInt;

use crate::error::{Error, Result};
use crate::math::modular::{bred_add, cred, mform, mod_inverse};
use super::poly::Poly;
use super::subring::SubRing;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RingType {
    /// Z[X]/(X^N + 1), N/2 complex slots, NthRoot = 2N.
    Standard,
    /// The real subring of Z[X]/(X^{2N} + 1) fixed by X -> X^{-1},
    /// N real slots, NthRoot = 4N.
    ConjugateInvariant,
}

struct RingInner {
    n: usize,
    ring_type: RingType,
    sub_rings: Vec<SubRing>,
    /// `rescale_constants[l][i]`: Montgomery form of `q_l^{-1} mod q_i`.
    rescale_constants: Vec<Vec<u64>>,
}

#[derive(Clone)]
pub struct Ring {
    inner: Arc<RingInner>,
    level: usize,
}

impl Ring {
    /// Builds a ring of degree `n` over the given pairwise-distinct NTT
    /// primes.
    pub fn new(n: usize, moduli: &[u64], ring_type: RingType) -> Result<Ring> {
        if !n.is_power_of_two() || n < 8 {
            return Err(Error::shape(format!("ring degree must be a power of two >= 8, got {n}")));
        }
        if moduli.is_empty() {
            return Err(Error::shape("empty moduli chain"));
        }
        let ntt_size = match ring_type {
            RingType::Standard => n,
            RingType::ConjugateInvariant => 2 * n,
        };
        for (i, &q) in moduli.iter().enumerate() {
            if moduli[..i].contains(&q) {
                return Err(Error::shape(format!("duplicate modulus {q}")));
            }
        }
        let sub_rings: Vec<SubRing> = moduli
            .iter()
            .map(|&q| SubRing::new(n, ntt_size, q))
            .collect();

        let mut rescale_constants = Vec::with_capacity(moduli.len());
        for l in 0..moduli.len() {
            let mut row = Vec::with_capacity(l);
            for i in 0..l {
                let s = &sub_rings[i];
                let ql_mod_qi = bred_add(moduli[l], s.modulus, s.brc);
                let inv = mod_inverse(ql_mod_qi, s.modulus);
                row.push(mform(inv, s.modulus, s.nu, s.r2));
            }
            rescale_constants.push(row);
        }

        let level = moduli.len() - 1;
        Ok(Ring {
            inner: Arc::new(RingInner {
                n,
                ring_type,
                sub_rings,
                rescale_constants,
            }),
            level,
        })
    }

    /// Returns a view of the same ring at level `level`.
    pub fn at_level(&self, level: usize) -> Ring {
        debug_assert!(level < self.inner.sub_rings.len());
        Ring {
            inner: Arc::clone(&self.inner),
            level,
        }
    }

    pub fn n(&self) -> usize {
        self.inner.n
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn max_level(&self) -> usize {
        self.inner.sub_rings.len() - 1
    }

    pub fn ring_type(&self) -> RingType {
        self.inner.ring_type
    }

    /// 2N for the standard ring, 4N for the conjugate-invariant ring.
    pub fn nth_root(&self) -> u64 {
        match self.inner.ring_type {
            RingType::Standard => 2 * self.inner.n as u64,
            RingType::ConjugateInvariant => 4 * self.inner.n as u64,
        }
    }

    pub fn sub(&self, i: usize) -> &SubRing {
        &self.inner.sub_rings[i]
    }

    pub fn sub_rings(&self) -> &[SubRing] {
        &self.inner.sub_rings[..=self.level]
    }

    pub fn moduli(&self) -> Vec<u64> {
        self.inner.sub_rings[..=self.level]
            .iter()
            .map(|s| s.modulus)
            .collect()
    }

    /// Product of the live moduli as a big integer.
    pub fn modulus_big(&self) -> BigInt {
        let mut m = BigInt::from(1u64);
        for s in self.sub_rings() {
            m *= s.modulus;
        }
        m
    }

    pub fn new_poly(&self) -> Poly {
        Poly::new(self.inner.n, self.level)
    }

    // --- transforms ---

    pub fn ntt_inplace(&self, p: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            s.ntt(p.at_mut(i));
        }
    }

    pub fn intt_inplace(&self, p: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            s.intt(p.at_mut(i));
        }
    }

    // --- arithmetic (rows 0..=level) ---

    pub fn add(&self, a: &Poly, b: &Poly, c: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            s.add(a.at(i), b.at(i), c.at_mut(i));
        }
    }

    pub fn add_assign(&self, c: &mut Poly, a: &Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            crate::math::vec_ops::add_assign_vec(c.at_mut(i), a.at(i), s.modulus);
        }
    }

    pub fn sub_assign(&self, c: &mut Poly, a: &Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            crate::math::vec_ops::sub_assign_vec(c.at_mut(i), a.at(i), s.modulus);
        }
    }

    pub fn sub_coeffs(&self, a: &Poly, b: &Poly, c: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            s.sub(a.at(i), b.at(i), c.at_mut(i));
        }
    }

    pub fn neg(&self, a: &Poly, c: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            s.neg(a.at(i), c.at_mut(i));
        }
    }

    pub fn reduce_inplace(&self, p: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            crate::math::vec_ops::reduce_assign_vec(p.at_mut(i), s.modulus, s.brc);
        }
    }

    pub fn mul_coeffs_montgomery(&self, a: &Poly, b: &Poly, c: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            s.mul_coeffs_montgomery(a.at(i), b.at(i), c.at_mut(i));
        }
    }

    pub fn mul_coeffs_montgomery_then_add(&self, a: &Poly, b: &Poly, c: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            s.mul_coeffs_montgomery_then_add(a.at(i), b.at(i), c.at_mut(i));
        }
    }

    pub fn mul_coeffs_montgomery_then_sub(&self, a: &Poly, b: &Poly, c: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            s.mul_coeffs_montgomery_then_sub(a.at(i), b.at(i), c.at_mut(i));
        }
    }

    pub fn mul_coeffs_montgomery_lazy_then_add_lazy(&self, a: &Poly, b: &Poly, c: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            s.mul_coeffs_montgomery_lazy_then_add_lazy(a.at(i), b.at(i), c.at_mut(i));
        }
    }

    pub fn mul_coeffs_barrett(&self, a: &Poly, b: &Poly, c: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            s.mul_coeffs_barrett(a.at(i), b.at(i), c.at_mut(i));
        }
    }

    pub fn mform_inplace(&self, p: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            crate::math::vec_ops::mul_scalar_montgomery_assign_vec(
                p.at_mut(i),
                s.r2,
                s.modulus,
                s.nu,
            );
        }
    }

    pub fn imform_inplace(&self, p: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            crate::math::vec_ops::mul_scalar_montgomery_assign_vec(p.at_mut(i), 1, s.modulus, s.nu);
        }
    }

    /// Multiplies every row by a per-modulus reduced scalar list
    /// (Montgomery form).
    pub fn mul_scalar_montgomery_inplace(&self, p: &mut Poly, s_mont: &[u64]) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            crate::math::vec_ops::mul_scalar_montgomery_assign_vec(
                p.at_mut(i),
                s_mont[i],
                s.modulus,
                s.nu,
            );
        }
    }

    /// Multiplies every row by the same big scalar given as residues.
    pub fn mul_scalar_bigint_inplace(&self, p: &mut Poly, scalar: &BigInt) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            let s_mont = s.mform(residue(scalar, s.modulus));
            crate::math::vec_ops::mul_scalar_montgomery_assign_vec(
                p.at_mut(i),
                s_mont,
                s.modulus,
                s.nu,
            );
        }
    }

    // --- structural maps ---

    /// Negacyclic monomial multiplication: `p · X^k` (coefficient domain).
    pub fn mult_by_monomial(&self, p: &Poly, k: i64, out: &mut Poly) {
        let n = self.inner.n as i64;
        let k = k.rem_euclid(2 * n);
        for (i, s) in self.sub_rings().iter().enumerate() {
            let q = s.modulus;
            let src = p.at(i);
            let dst = out.at_mut(i);
            for j in 0..n {
                let idx = j + k;
                let (pos, negate) = if idx < n {
                    (idx, false)
                } else if idx < 2 * n {
                    (idx - n, true)
                } else {
                    (idx - 2 * n, false)
                };
                dst[pos as usize] = if negate {
                    cred(q - src[j as usize], q)
                } else {
                    src[j as usize]
                };
            }
        }
    }

    /// Plain cyclic rotation of each residue row by `k` positions.
    pub fn shift(&self, p: &Poly, k: i64, out: &mut Poly) {
        let n = self.inner.n;
        let k = (k.rem_euclid(n as i64)) as usize;
        for i in 0..=self.level {
            let src = p.at(i);
            let dst = out.at_mut(i);
            dst[..n - k].copy_from_slice(&src[k..]);
            dst[n - k..].copy_from_slice(&src[..k]);
        }
    }

    /// Applies the Galois automorphism `X -> X^{gal_el}` in the coefficient
    /// domain. `gal_el` must be odd.
    pub fn automorphism(&self, p: &Poly, gal_el: u64, out: &mut Poly) {
        debug_assert_eq!(gal_el & 1, 1, "galois element must be odd");
        match self.inner.ring_type {
            RingType::Standard => {
                let n = self.inner.n;
                for (i, s) in self.sub_rings().iter().enumerate() {
                    automorphism_negacyclic(p.at(i), gal_el, n, s.modulus, out.at_mut(i));
                }
            }
            RingType::ConjugateInvariant => {
                // lift to the degree-2N negacyclic ring, map, project
                let n = self.inner.n;
                let mut scratch = vec![0u64; 2 * n];
                let mut mapped = vec![0u64; 2 * n];
                for (i, s) in self.sub_rings().iter().enumerate() {
                    let q = s.modulus;
                    let src = p.at(i);
                    scratch[0] = src[0];
                    scratch[n] = 0;
                    for j in 1..n {
                        scratch[j] = src[j];
                        scratch[2 * n - j] = cred(q - src[j], q);
                    }
                    automorphism_negacyclic(&scratch, gal_el, 2 * n, q, &mut mapped);
                    out.at_mut(i)[..n].copy_from_slice(&mapped[..n]);
                }
            }
        }
    }

    // --- rescaling ---

    /// Divides by the last live modulus with rounding; the result has one
    /// fewer row. `ntt` indicates the domain of `p`.
    pub fn div_round_by_last_modulus(&self, p: &mut Poly, ntt: bool) {
        let level = self.level;
        assert!(level > 0, "cannot rescale at level 0");
        let last = &self.inner.sub_rings[level];
        let ql = last.modulus;
        let p_half = (ql - 1) >> 1;

        // centered remainder modulo q_level, coefficient domain
        let mut rem: Vec<u64> = p.at(level).to_vec();
        if ntt {
            last.intt(&mut rem);
        }
        for x in rem.iter_mut() {
            *x = cred(*x + p_half, ql);
        }

        let constants = &self.inner.rescale_constants[level];
        let mut srow = vec![0u64; self.inner.n];
        for i in 0..level {
            let s = &self.inner.sub_rings[i];
            let qi = s.modulus;
            let p_half_qi = bred_add(p_half, qi, s.brc);
            for (j, x) in rem.iter().enumerate() {
                let r = bred_add(*x, qi, s.brc);
                srow[j] = cred(r + qi - p_half_qi, qi);
            }
            if ntt {
                s.ntt(&mut srow);
            }
            crate::math::vec_ops::sub_then_mul_scalar_montgomery_assign_vec(
                p.at_mut(i),
                &srow,
                constants[i],
                qi,
                s.nu,
            );
        }
        p.resize(level - 1);
    }

    /// Divides by the last live modulus with flooring.
    pub fn div_floor_by_last_modulus(&self, p: &mut Poly, ntt: bool) {
        let level = self.level;
        assert!(level > 0, "cannot rescale at level 0");
        let last = &self.inner.sub_rings[level];

        let mut rem: Vec<u64> = p.at(level).to_vec();
        if ntt {
            last.intt(&mut rem);
        }

        let constants = &self.inner.rescale_constants[level];
        let mut srow = vec![0u64; self.inner.n];
        for i in 0..level {
            let s = &self.inner.sub_rings[i];
            let qi = s.modulus;
            for (j, x) in rem.iter().enumerate() {
                srow[j] = bred_add(*x, qi, s.brc);
            }
            if ntt {
                s.ntt(&mut srow);
            }
            crate::math::vec_ops::sub_then_mul_scalar_montgomery_assign_vec(
                p.at_mut(i),
                &srow,
                constants[i],
                qi,
                s.nu,
            );
        }
        p.resize(level - 1);
    }

    // --- CRT reconstruction ---

    /// Reconstructs every `gap`-th coefficient as a big integer in `[0, Q)`.
    pub fn poly_to_bigint(&self, p: &Poly, gap: usize) -> Vec<BigInt> {
        let q_big = self.modulus_big();
        let crt = self.crt_constants();
        let n = self.inner.n;
        let mut out = Vec::with_capacity(n.div_ceil(gap));
        for j in (0..n).step_by(gap) {
            let mut acc = BigInt::from(0u64);
            for (i, c) in crt.iter().enumerate() {
                acc += c * p.at(i)[j];
            }
            out.push(acc % &q_big);
        }
        out
    }

    /// As [`Ring::poly_to_bigint`], centered in `(-Q/2, Q/2]`.
    pub fn poly_to_bigint_centered(&self, p: &Poly, gap: usize) -> Vec<BigInt> {
        let q_big = self.modulus_big();
        let half = &q_big / 2;
        let mut out = self.poly_to_bigint(p, gap);
        for x in out.iter_mut() {
            if &*x > &half {
                *x -= &q_big;
            }
        }
        out
    }

    /// Sets coefficients from big integers (coefficient domain, reduced to
    /// each modulus).
    pub fn set_coefficients_bigint(&self, values: &[BigInt], p: &mut Poly) {
        for (i, s) in self.sub_rings().iter().enumerate() {
            let row = p.at_mut(i);
            for (j, v) in values.iter().enumerate() {
                row[j] = residue(v, s.modulus);
            }
            for r in row.iter_mut().skip(values.len()) {
                *r = 0;
            }
        }
    }

    /// CRT basis: `crt[i] = (Q/q_i) · [(Q/q_i)^{-1}]_{q_i}`.
    fn crt_constants(&self) -> Vec<BigInt> {
        let q_big = self.modulus_big();
        self.sub_rings()
            .iter()
            .map(|s| {
                let qi = BigInt::from(s.modulus);
                let qhat = &q_big / &qi;
                let qhat_mod = residue(&qhat, s.modulus);
                let inv = mod_inverse(qhat_mod, s.modulus);
                qhat * inv
            })
            .collect()
    }
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Ring(n={}, type={:?}, level={}/{})",
            self.inner.n,
            self.inner.ring_type,
            self.level,
            self.max_level()
        )
    }
}

/// `v mod q` for a (possibly negative) big integer.
pub fn residue(v: &BigInt, q: u64) -> u64 {
    use num_bigint::Sign;
    let m = BigInt::from(q);
    let r = v % &m;
    match r.sign() {
        Sign::Minus => {
            let (_, digits) = (&r + &m).to_u64_digits();
            digits.first().copied().unwrap_or(0)
        }
        _ => {
            let (_, digits) = r.to_u64_digits();
            digits.first().copied().unwrap_or(0)
        }
    }
}

/// Extends a small-norm polynomial given modulo `base_q` to the moduli of
/// `out`, interpreting residues above `base_q/2` as negative.
pub fn extend_basis_small_norm(base_q: u64, moduli: &[u64], src: &[u64], out: &mut Poly) {
    let half = base_q >> 1;
    for (i, &q) in moduli.iter().enumerate() {
        let row = out.at_mut(i);
        for (j, &x) in src.iter().enumerate() {
            row[j] = if x > half {
                q - (base_q - x) % q
            } else {
                x % q
            };
        }
    }
}

fn automorphism_negacyclic(src: &[u64], gal_el: u64, n: usize, q: u64, out: &mut [u64]) {
    let two_n = 2 * n as u64;
    let g = gal_el % two_n;
    let mask = two_n - 1;
    for (j, &c) in src.iter().enumerate() {
        let idx = (j as u64 * g) & mask;
        if idx < n as u64 {
            out[idx as usize] = c;
        } else {
            out[(idx - n as u64) as usize] = cred(q - c, q);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ring() -> Ring {
        Ring::new(64, &[40961, 65537, 114689], RingType::Standard).unwrap()
    }

    #[test]
    fn at_level_shares_subrings() {
        let r = test_ring();
        let v = r.at_level(1);
        assert_eq!(v.level(), 1);
        assert_eq!(v.moduli(), vec![40961, 65537]);
        assert_eq!(r.level(), 2);
    }

    #[test]
    fn bigint_round_trip() {
        let r = test_ring();
        let values: Vec<BigInt> = (0..64).map(|i| BigInt::from(i * 123456789i64)).collect();
        let mut p = r.new_poly();
        r.set_coefficients_bigint(&values, &mut p);
        let back = r.poly_to_bigint(&p, 1);
        assert_eq!(back, values);
    }

    #[test]
    fn bigint_centered_negative() {
        let r = test_ring();
        let values: Vec<BigInt> = (0..64).map(|i| BigInt::from(-(i as i64) * 99991)).collect();
        let mut p = r.new_poly();
        r.set_coefficients_bigint(&values, &mut p);
        let back = r.poly_to_bigint_centered(&p, 1);
        assert_eq!(back, values);
    }

    #[test]
    fn rescale_round_divides() {
        // encode constants v·q_last + e, rescale, expect v (rounded)
        let r = test_ring();
        let ql = r.sub(2).modulus;
        let values: Vec<BigInt> = (0..64i64)
            .map(|i| BigInt::from(i * 1000) * ql + BigInt::from(i % 7 - 3))
            .collect();
        let mut p = r.new_poly();
        r.set_coefficients_bigint(&values, &mut p);
        r.div_round_by_last_modulus(&mut p, false);
        let low = r.at_level(1);
        let back = low.poly_to_bigint_centered(&p, 1);
        for (i, b) in back.iter().enumerate() {
            assert_eq!(*b, BigInt::from(i as i64 * 1000), "coeff {i}");
        }
    }

    #[test]
    fn rescale_in_ntt_domain() {
        let r = test_ring();
        let ql = r.sub(2).modulus;
        let values: Vec<BigInt> = (0..64i64).map(|i| BigInt::from(7 - i) * ql).collect();
        let mut p = r.new_poly();
        r.set_coefficients_bigint(&values, &mut p);
        r.ntt_inplace(&mut p);
        r.div_round_by_last_modulus(&mut p, true);
        let low = r.at_level(1);
        let mut q = p.clone();
        low.intt_inplace(&mut q);
        let back = low.poly_to_bigint_centered(&q, 1);
        for (i, b) in back.iter().enumerate() {
            assert_eq!(*b, BigInt::from(7 - i as i64), "coeff {i}");
        }
    }

    #[test]
    fn automorphism_identity_and_composition() {
        let r = test_ring();
        let mut p = r.new_poly();
        for i in 0..=r.level() {
            for (j, x) in p.at_mut(i).iter_mut().enumerate() {
                *x = (j as u64 * 17 + 5) % r.sub(i).modulus;
            }
        }
        let mut id = r.new_poly();
        r.automorphism(&p, 1, &mut id);
        assert!(id.equal_at_level(r.level(), &p));

        let mut a = r.new_poly();
        let mut b = r.new_poly();
        let mut c = r.new_poly();
        r.automorphism(&p, 5, &mut a);
        r.automorphism(&a, 25, &mut b);
        r.automorphism(&p, 125 % (2 * 64), &mut c);
        assert!(b.equal_at_level(r.level(), &c));
    }

    #[test]
    fn monomial_wraps_with_sign() {
        let r = Ring::new(8, &[40961], RingType::Standard).unwrap();
        let mut p = r.new_poly();
        p.at_mut(0)[7] = 3; // 3·X^7
        let mut out = r.new_poly();
        r.mult_by_monomial(&p, 1, &mut out); // 3·X^8 = -3
        assert_eq!(out.at(0)[0], 40961 - 3);
        assert!(out.at(0)[1..].iter().all(|&x| x == 0));
    }
}
