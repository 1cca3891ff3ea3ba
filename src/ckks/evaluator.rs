//! Scale-aware homomorphic operations.
//!
//! Wraps the RLWE key-switching engine with the CKKS fixed-point
//! discipline: scales multiply under multiplication, must agree under
//! addition (within a tight relative tolerance, absorbing the prime-chain
//! drift), and divide by the dropped modulus under rescaling.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::params::Params;
use crate::ring::PolyQP;
use crate::rlwe::{self, Ciphertext, EvaluationKeySet, MetaData, Plaintext};

use super::encoder::Encoder;

/// Relative scale tolerance for additions. The rescaling chain keeps all
/// operand scales within ~2^-25 of each other; anything larger is a bug.
const SCALE_RTOL: f64 = 1e-5;

pub fn scales_close(a: f64, b: f64) -> bool {
    (a / b - 1.0).abs() < SCALE_RTOL
}

pub struct Evaluator {
    pub rlwe: rlwe::Evaluator,
    pub encoder: Encoder,
    params: Params,
}

impl Evaluator {
    pub fn new(params: Params, keys: Arc<dyn EvaluationKeySet>) -> Self {
        Evaluator {
            rlwe: rlwe::Evaluator::new(params.clone(), keys),
            encoder: Encoder::new(params.clone()),
            params,
        }
    }

    /// Shares read-only state, allocates fresh scratch. Thread-local.
    pub fn shallow_copy(&self) -> Self {
        Evaluator {
            rlwe: self.rlwe.shallow_copy(),
            encoder: Encoder::new(self.params.clone()),
            params: self.params.clone(),
        }
    }

    pub fn set_keys(&mut self, keys: Arc<dyn EvaluationKeySet>) {
        self.rlwe.set_keys(keys);
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    // ------------------------------------------------------------------
    // encoding helpers
    // ------------------------------------------------------------------

    /// Encodes real values into a fresh plaintext at `level` and `scale`.
    pub fn encode_new(&mut self, values: &[f64], level: usize, scale: f64) -> Result<Plaintext> {
        let mut pt = Plaintext::new(
            self.params.ring_q(),
            level,
            MetaData::new(scale, self.params.log_max_slots()),
        );
        self.encoder.encode(values, &mut pt)?;
        Ok(pt)
    }

    // ------------------------------------------------------------------
    // additive ops
    // ------------------------------------------------------------------

    fn check_add(&self, a: &Ciphertext, b_scale: f64) -> Result<()> {
        if !scales_close(a.scale(), b_scale) {
            return Err(Error::ScaleMismatch(a.scale(), b_scale));
        }
        Ok(())
    }

    /// a += b (levels aligned to the minimum, scales must agree).
    pub fn add_inplace(&mut self, a: &mut Ciphertext, b: &Ciphertext) -> Result<()> {
        self.check_add(a, b.scale())?;
        if b.degree() > a.degree() {
            return Err(Error::shape("add: rhs degree exceeds lhs"));
        }
        let level = a.level().min(b.level());
        a.resize_level(level);
        let rq = self.params.ring_q().at_level(level);
        for (c, q) in a.q.iter_mut().zip(b.q.iter()) {
            rq.add_assign(c, q);
        }
        a.meta.scale = a.meta.scale.max(b.meta.scale);
        Ok(())
    }

    /// a -= b.
    pub fn sub_inplace(&mut self, a: &mut Ciphertext, b: &Ciphertext) -> Result<()> {
        self.check_add(a, b.scale())?;
        if b.degree() > a.degree() {
            return Err(Error::shape("sub: rhs degree exceeds lhs"));
        }
        let level = a.level().min(b.level());
        a.resize_level(level);
        let rq = self.params.ring_q().at_level(level);
        for (c, q) in a.q.iter_mut().zip(b.q.iter()) {
            rq.sub_assign(c, q);
        }
        a.meta.scale = a.meta.scale.max(b.meta.scale);
        Ok(())
    }

    pub fn add_new(&mut self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        let (mut out, other) = if a.degree() >= b.degree() {
            (a.clone(), b)
        } else {
            (b.clone(), a)
        };
        self.add_inplace(&mut out, other)?;
        Ok(out)
    }

    pub fn sub_new(&mut self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        let mut out = a.clone();
        if b.degree() > a.degree() {
            return Err(Error::shape("sub: rhs degree exceeds lhs"));
        }
        self.sub_inplace(&mut out, b)?;
        Ok(out)
    }

    pub fn neg_inplace(&mut self, a: &mut Ciphertext) {
        let rq = self.params.ring_q().at_level(a.level());
        for c in a.q.iter_mut() {
            let tmp = c.clone();
            rq.neg(&tmp, c);
        }
    }

    /// a += pt (scales must agree; plaintext must not be in Montgomery
    /// form).
    pub fn add_pt_inplace(&mut self, a: &mut Ciphertext, pt: &Plaintext) -> Result<()> {
        self.check_add(a, pt.scale())?;
        if pt.meta.is_montgomery {
            return Err(Error::shape("add_pt: plaintext is in Montgomery form"));
        }
        let level = a.level().min(pt.level());
        a.resize_level(level);
        let rq = self.params.ring_q().at_level(level);
        rq.add_assign(&mut a.q[0], &pt.poly);
        Ok(())
    }

    pub fn sub_pt_inplace(&mut self, a: &mut Ciphertext, pt: &Plaintext) -> Result<()> {
        self.check_add(a, pt.scale())?;
        let level = a.level().min(pt.level());
        a.resize_level(level);
        let rq = self.params.ring_q().at_level(level);
        rq.sub_assign(&mut a.q[0], &pt.poly);
        Ok(())
    }

    /// Adds the same real constant to every slot (a constant polynomial
    /// is constant across all NTT evaluation points).
    pub fn add_scalar_inplace(&mut self, a: &mut Ciphertext, value: f64) {
        let v = value * a.meta.scale;
        let rq = self.params.ring_q().at_level(a.level());
        for (i, s) in rq.sub_rings().iter().enumerate() {
            let q = s.modulus;
            let r = signed_residue(v, q);
            for x in a.q[0].at_mut(i).iter_mut() {
                *x = crate::math::modular::cred(*x + r, q);
            }
        }
    }

    pub fn sub_scalar_inplace(&mut self, a: &mut Ciphertext, value: f64) {
        self.add_scalar_inplace(a, -value);
    }

    // ------------------------------------------------------------------
    // multiplicative ops
    // ------------------------------------------------------------------

    /// Tensor product without relinearization: degree 1 × 1 -> 2.
    pub fn mul_new(&mut self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        if a.degree() != 1 || b.degree() != 1 {
            return Err(Error::shape("mul expects degree-1 operands"));
        }
        let level = a.level().min(b.level());
        if level == 0 {
            return Err(Error::Range {
                op: "mul",
                level: 0,
                required: 1,
            });
        }
        let rq = self.params.ring_q().at_level(level);
        let mut out = Ciphertext::new(self.params.ring_q(), 2, level, a.meta);
        out.meta.scale = a.meta.scale * b.meta.scale;
        rq.mul_coeffs_barrett(&a.q[0], &b.q[0], &mut out.q[0]);
        let mut t = rq.new_poly();
        rq.mul_coeffs_barrett(&a.q[0], &b.q[1], &mut out.q[1]);
        rq.mul_coeffs_barrett(&a.q[1], &b.q[0], &mut t);
        rq.add_assign(&mut out.q[1], &t);
        rq.mul_coeffs_barrett(&a.q[1], &b.q[1], &mut out.q[2]);
        Ok(out)
    }

    /// Multiplication with immediate relinearization.
    pub fn mul_relin_new(&mut self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        let mut out = self.mul_new(a, b)?;
        self.rlwe.relinearize(&mut out)?;
        Ok(out)
    }

    /// acc += a·b without intermediate allocation beyond scratch; `acc`
    /// must be degree 2 with scale ≈ a.scale·b.scale.
    pub fn mul_then_add(&mut self, a: &Ciphertext, b: &Ciphertext, acc: &mut Ciphertext) -> Result<()> {
        if a.degree() != 1 || b.degree() != 1 {
            return Err(Error::shape("mul_then_add expects degree-1 operands"));
        }
        if acc.degree() < 2 {
            acc.resize_degree(2, self.params.n());
        }
        let level = a.level().min(b.level()).min(acc.level());
        let prod_scale = a.meta.scale * b.meta.scale;
        if !scales_close(acc.meta.scale, prod_scale) {
            return Err(Error::ScaleMismatch(acc.meta.scale, prod_scale));
        }
        acc.resize_level(level);
        let rq = self.params.ring_q().at_level(level);
        let mut t = rq.new_poly();
        rq.mul_coeffs_barrett(&a.q[0], &b.q[0], &mut t);
        rq.add_assign(&mut acc.q[0], &t);
        rq.mul_coeffs_barrett(&a.q[0], &b.q[1], &mut t);
        rq.add_assign(&mut acc.q[1], &t);
        rq.mul_coeffs_barrett(&a.q[1], &b.q[0], &mut t);
        rq.add_assign(&mut acc.q[1], &t);
        rq.mul_coeffs_barrett(&a.q[1], &b.q[1], &mut t);
        rq.add_assign(&mut acc.q[2], &t);
        acc.meta.scale = acc.meta.scale.max(prod_scale);
        Ok(())
    }

    /// ct ·= pt (scale multiplies; the plaintext may be in Montgomery
    /// form, as pre-encoded linear-transformation diagonals are).
    pub fn mul_pt_inplace(&mut self, ct: &mut Ciphertext, pt: &Plaintext) -> Result<()> {
        let level = ct.level().min(pt.level());
        ct.resize_level(level);
        let rq = self.params.ring_q().at_level(level);
        for c in ct.q.iter_mut() {
            let tmp = c.clone();
            if pt.meta.is_montgomery {
                rq.mul_coeffs_montgomery(&tmp, &pt.poly, c);
            } else {
                rq.mul_coeffs_barrett(&tmp, &pt.poly, c);
            }
        }
        ct.meta.scale *= pt.meta.scale;
        Ok(())
    }

    /// Multiplies by a real scalar. Integer scalars are exact and free of
    /// scale growth; general reals are encoded against the top modulus and
    /// multiply the scale by it (one rescale returns to the input scale).
    pub fn mul_scalar_inplace(&mut self, ct: &mut Ciphertext, value: f64) {
        if value.fract() == 0.0 && value.abs() < (1u64 << 40) as f64 {
            self.mul_scalar_int_inplace(ct, value as i64);
            return;
        }
        let level = ct.level();
        let q_lev = self.params.q()[level];
        let m = (value * q_lev as f64).round();
        let rq = self.params.ring_q().at_level(level);
        let mont: Vec<u64> = rq
            .sub_rings()
            .iter()
            .map(|s| s.mform(signed_residue(m, s.modulus)))
            .collect();
        for c in ct.q.iter_mut() {
            rq.mul_scalar_montgomery_inplace(c, &mont);
        }
        ct.meta.scale *= q_lev as f64;
    }

    /// Multiplies by an arbitrary rounded scalar without touching the
    /// scale bookkeeping; the caller accounts for the factor. Used by the
    /// polynomial evaluator to hit exact target scales.
    pub fn mul_scalar_raw_inplace(&mut self, ct: &mut Ciphertext, m: f64) {
        let rq = self.params.ring_q().at_level(ct.level());
        let mont: Vec<u64> = rq
            .sub_rings()
            .iter()
            .map(|s| s.mform(signed_residue(m, s.modulus)))
            .collect();
        for c in ct.q.iter_mut() {
            rq.mul_scalar_montgomery_inplace(c, &mont);
        }
    }

    /// Exact integer scalar multiplication (scale unchanged).
    pub fn mul_scalar_int_inplace(&mut self, ct: &mut Ciphertext, value: i64) {
        let rq = self.params.ring_q().at_level(ct.level());
        let mont: Vec<u64> = rq
            .sub_rings()
            .iter()
            .map(|s| s.mform(signed_residue(value as f64, s.modulus)))
            .collect();
        for c in ct.q.iter_mut() {
            rq.mul_scalar_montgomery_inplace(c, &mont);
        }
    }

    /// Multiplies by the current level's modulus (exact), raising the
    /// scale by the same factor; a following rescale is the identity on
    /// the message.
    pub fn scale_up_modulus(&mut self, ct: &mut Ciphertext) {
        let level = ct.level();
        let q_lev = self.params.q()[level];
        let rq = self.params.ring_q().at_level(level);
        let mont: Vec<u64> = rq
            .sub_rings()
            .iter()
            .map(|s| s.mform(crate::math::modular::bred_add(q_lev, s.modulus, s.brc)))
            .collect();
        for c in ct.q.iter_mut() {
            rq.mul_scalar_montgomery_inplace(c, &mont);
        }
        ct.meta.scale *= q_lev as f64;
    }

    // ------------------------------------------------------------------
    // level and scale management
    // ------------------------------------------------------------------

    /// Divides by the last modulus; level drops by one, scale divides by
    /// the dropped prime.
    pub fn rescale_inplace(&mut self, ct: &mut Ciphertext) -> Result<()> {
        let level = ct.level();
        if level == 0 {
            return Err(Error::Range {
                op: "rescale",
                level: 0,
                required: 1,
            });
        }
        let q_lev = self.params.q()[level];
        let rq = self.params.ring_q().at_level(level);
        for c in ct.q.iter_mut() {
            rq.div_round_by_last_modulus(c, ct.meta.is_ntt);
        }
        ct.meta.scale /= q_lev as f64;
        Ok(())
    }

    pub fn drop_level(&mut self, ct: &mut Ciphertext, levels: usize) {
        let level = ct.level().saturating_sub(levels);
        ct.resize_level(level);
    }

    /// Forces the ciphertext scale to `target` by an exact scalar
    /// multiplication followed by a rescale (one level).
    pub fn set_scale(&mut self, ct: &mut Ciphertext, target: f64) -> Result<()> {
        if scales_close(ct.meta.scale, target) {
            ct.meta.scale = target;
            return Ok(());
        }
        let ratio = target / ct.meta.scale;
        self.mul_scalar_inplace(ct, ratio);
        self.rescale_inplace(ct)?;
        ct.meta.scale = target;
        Ok(())
    }

    /// Aligns `a` and `b` so that `rescale(a·b)` lands on `target`.
    pub fn match_scales_for_mul(
        &mut self,
        a: &mut Ciphertext,
        b: &mut Ciphertext,
        target: f64,
    ) -> Result<()> {
        let lvl = a.level().min(b.level());
        if lvl == 0 {
            return Err(Error::Range {
                op: "match_scales_for_mul",
                level: 0,
                required: 1,
            });
        }
        let lvl = lvl - 1;
        let q_lvl = self.params.q()[lvl] as f64;
        let want_a = target * q_lvl / b.meta.scale;
        if scales_close(a.meta.scale, want_a) {
            a.meta.scale = want_a;
            a.resize_level(lvl + 1);
            b.resize_level(lvl + 1);
            return Ok(());
        }
        self.set_scale(a, want_a)?;
        let l = a.level().min(b.level());
        a.resize_level(l);
        b.resize_level(l);
        Ok(())
    }

    // ------------------------------------------------------------------
    // rotations
    // ------------------------------------------------------------------

    /// Rotates the slot vector left by `k` positions.
    pub fn rotate(&mut self, ct: &Ciphertext, k: i64, out: &mut Ciphertext) -> Result<()> {
        let gal = self.params.galois_element(k);
        self.rlwe.automorphism(ct, gal, out)
    }

    pub fn rotate_new(&mut self, ct: &Ciphertext, k: i64) -> Result<Ciphertext> {
        let mut out = ct.clone();
        self.rotate(ct, k, &mut out)?;
        Ok(out)
    }

    pub fn rotate_inplace(&mut self, ct: &mut Ciphertext, k: i64) -> Result<()> {
        if k == 0 {
            return Ok(());
        }
        let src = ct.clone();
        self.rotate(&src, k, ct)
    }

    /// Hoisted rotation reusing a precomputed decomposition of c1.
    pub fn rotate_hoisted(
        &mut self,
        ct: &Ciphertext,
        decomp: &[PolyQP],
        k: i64,
        out: &mut Ciphertext,
    ) -> Result<()> {
        let gal = self.params.galois_element(k);
        self.rlwe.automorphism_hoisted(ct, decomp, gal, out)
    }

    /// Complex conjugation of the slots (standard ring).
    pub fn conjugate(&mut self, ct: &Ciphertext, out: &mut Ciphertext) -> Result<()> {
        let gal = self.params.galois_element_for_conjugation();
        self.rlwe.automorphism(ct, gal, out)
    }

    /// Precomputes the hoisting decomposition of c1.
    pub fn decompose_ntt(&mut self, ct: &Ciphertext) -> Result<Vec<PolyQP>> {
        self.rlwe.decompose_ntt(ct.level(), &ct.q[1])
    }

    // ------------------------------------------------------------------
    // reductions
    // ------------------------------------------------------------------

    /// Sums `n` copies of the slot vector rotated by multiples of `batch`:
    /// slot `j` of the result holds `Σ_{i<n} v[j + i·batch]`.
    pub fn inner_sum(&mut self, ct: &mut Ciphertext, batch: i64, n: usize) -> Result<()> {
        if n <= 1 {
            return Ok(());
        }
        let orig = ct.clone();
        let bits = usize::BITS - n.leading_zeros();
        let mut m = 1i64;
        for b in (0..bits - 1).rev() {
            let rot = self.rotate_new(ct, m * batch)?;
            self.add_inplace(ct, &rot)?;
            m *= 2;
            if (n >> b) & 1 == 1 {
                let rot = self.rotate_new(&orig, m * batch)?;
                self.add_inplace(ct, &rot)?;
                m += 1;
            }
        }
        Ok(())
    }

    /// Dual of [`Self::inner_sum`]: broadcasts by summing right-rotations.
    pub fn replicate(&mut self, ct: &mut Ciphertext, batch: i64, n: usize) -> Result<()> {
        self.inner_sum(ct, -batch, n)
    }

    /// Partial sums over sub-groups at stride `2^log_stride` covering the
    /// whole slot vector (log-step automorphisms).
    pub fn trace(&mut self, ct: &mut Ciphertext, log_stride: usize) -> Result<()> {
        let slots = self.params.max_slots();
        self.inner_sum(ct, 1i64 << log_stride, slots >> log_stride)
    }

    /// Relinearizes a degree-2 ciphertext.
    pub fn relinearize_inplace(&mut self, ct: &mut Ciphertext) -> Result<()> {
        self.rlwe.relinearize(ct)
    }
}

/// Signed residue of a rounded f64 value. Values beyond 2^53 are split
/// into mantissa · 2^k, keeping the residue exact for the integer the
/// float actually represents.
pub fn signed_residue(v: f64, q: u64) -> u64 {
    let neg = v < 0.0;
    let m = v.abs().round();
    let r = if m < 9.007199254740992e15 {
        // < 2^53: exact as integer
        (m as u128 % q as u128) as u64
    } else {
        let k = (m.log2().ceil() as i32 - 52).max(0);
        let a = (m / (k as f64).exp2()).round() as u128;
        let a_mod = (a % q as u128) as u64;
        let pow = crate::math::modular::mod_exp(2, k as u64, q);
        crate::math::modular::bred_u128(
            a_mod as u128 * pow as u128,
            q,
            crate::math::modular::barrett_constant(q),
        )
    };
    if neg && r != 0 {
        q - r
    } else {
        r
    }
}
