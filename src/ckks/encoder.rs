//! CKKS encoder: canonical embedding between slot vectors and ring
//! polynomials.
//!
//! Slots live at the odd roots of unity indexed by the rotation group
//! `5^j mod M`: slot `j` is the evaluation at `ζ^{5^j}`, which makes the
//! automorphism `X -> X^{5^r}` a left rotation of the slot vector by `r`.
//!
//! The standard ring of degree N carries N/2 complex slots (real and
//! imaginary coefficient halves). The conjugate-invariant ring of degree N
//! carries N real slots: the embedding runs through the virtual degree-2N
//! standard ring, whose conjugate-symmetric coefficients fold onto the N
//! stored ones.

use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::params::Params;
use crate::ring::{Poly, Ring, RingType};
use crate::rlwe::Plaintext;
#[cfg(test)]
use crate::rlwe::MetaData;

/// Slot element kinds the generic containers range over.
pub trait SlotValue: Copy + Send + Sync + 'static {
    fn zero() -> Self;
    fn from_f64(v: f64) -> Self;
    fn add(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
    fn into_complex(self) -> Complex64;
    /// Complex slots only exist on the standard ring.
    fn check_ring(ring_type: RingType) -> Result<()>;
}

impl SlotValue for f64 {
    fn zero() -> Self {
        0.0
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn add(self, other: Self) -> Self {
        self + other
    }
    fn mul(self, other: Self) -> Self {
        self * other
    }
    fn into_complex(self) -> Complex64 {
        Complex64::new(self, 0.0)
    }
    fn check_ring(_: RingType) -> Result<()> {
        Ok(())
    }
}

impl SlotValue for Complex64 {
    fn zero() -> Self {
        Complex64::new(0.0, 0.0)
    }
    fn from_f64(v: f64) -> Self {
        Complex64::new(v, 0.0)
    }
    fn add(self, other: Self) -> Self {
        self + other
    }
    fn mul(self, other: Self) -> Self {
        self * other
    }
    fn into_complex(self) -> Complex64 {
        self
    }
    fn check_ring(ring_type: RingType) -> Result<()> {
        match ring_type {
            RingType::Standard => Ok(()),
            RingType::ConjugateInvariant => {
                Err(Error::shape("complex slots require the standard ring"))
            }
        }
    }
}

pub struct Encoder {
    params: Params,
    slots: usize,
    m: usize,
    rot_group: Vec<usize>,
    roots: Vec<Complex64>,
    buff: Vec<Complex64>,
}

impl Encoder {
    pub fn new(params: Params) -> Self {
        let slots = params.max_slots();
        let m = 4 * slots;
        let mut rot_group = Vec::with_capacity(slots);
        let mut five_pow = 1usize;
        for _ in 0..slots {
            rot_group.push(five_pow);
            five_pow = (five_pow * 5) % m;
        }
        let roots: Vec<Complex64> = (0..=m)
            .map(|j| {
                let angle = 2.0 * std::f64::consts::PI * j as f64 / m as f64;
                Complex64::new(angle.cos(), angle.sin())
            })
            .collect();
        Encoder {
            slots,
            m,
            rot_group,
            roots,
            buff: vec![Complex64::new(0.0, 0.0); slots],
            params,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Encodes real slot values (zero-padded to the slot count) into `pt`
    /// at its level and scale. The plaintext ends in the NTT domain.
    pub fn encode(&mut self, values: &[f64], pt: &mut Plaintext) -> Result<()> {
        if values.len() > self.slots {
            return Err(Error::shape(format!(
                "{} values exceed {} slots",
                values.len(),
                self.slots
            )));
        }
        for (b, &v) in self.buff.iter_mut().zip(values.iter()) {
            *b = Complex64::new(v, 0.0);
        }
        for b in self.buff.iter_mut().skip(values.len()) {
            *b = Complex64::new(0.0, 0.0);
        }
        self.embed(pt.meta.scale, pt.level(), &mut pt.poly);
        pt.meta.is_ntt = true;
        pt.meta.is_montgomery = false;
        Ok(())
    }

    /// Encodes complex slot values (standard ring only).
    pub fn encode_complex(&mut self, values: &[Complex64], pt: &mut Plaintext) -> Result<()> {
        if self.params.ring_type() != RingType::Standard {
            return Err(Error::shape(
                "complex slots require the standard ring",
            ));
        }
        if values.len() > self.slots {
            return Err(Error::shape("too many values"));
        }
        self.buff[..values.len()].copy_from_slice(values);
        for b in self.buff.iter_mut().skip(values.len()) {
            *b = Complex64::new(0.0, 0.0);
        }
        self.embed(pt.meta.scale, pt.level(), &mut pt.poly);
        pt.meta.is_ntt = true;
        pt.meta.is_montgomery = false;
        Ok(())
    }

    fn embed(&mut self, scale: f64, level: usize, out: &mut Poly) {
        let coeffs = self.coeffs_from_buff(scale);
        let ring = self.params.ring_q().at_level(level);
        set_signed_coeffs(&ring, &coeffs, out);
        ring.ntt_inplace(out);
    }

    /// Runs the inverse embedding on the slot buffer and returns the
    /// rounded scaled coefficients.
    fn coeffs_from_buff(&mut self, scale: f64) -> Vec<f64> {
        self.fft_special_inv();
        let n = self.slots;
        match self.params.ring_type() {
            RingType::Standard => {
                let mut coeffs = vec![0f64; 2 * n];
                for j in 0..n {
                    coeffs[j] = (self.buff[j].re * scale).round();
                    coeffs[j + n] = (self.buff[j].im * scale).round();
                }
                coeffs
            }
            RingType::ConjugateInvariant => {
                let mut coeffs = vec![0f64; n];
                for j in 0..n {
                    coeffs[j] = (self.buff[j].re * scale).round();
                }
                coeffs
            }
        }
    }

    /// Encodes slot values into the extended basis Q·P, NTT + Montgomery —
    /// the layout of pre-encoded linear-transformation diagonals.
    pub fn encode_qp<T: SlotValue>(
        &mut self,
        values: &[T],
        level_q: usize,
        scale: f64,
        out: &mut crate::ring::PolyQP,
    ) -> Result<()> {
        if values.len() > self.slots {
            return Err(Error::shape("too many values"));
        }
        T::check_ring(self.params.ring_type())?;
        for (b, v) in self.buff.iter_mut().zip(values.iter()) {
            *b = v.into_complex();
        }
        for b in self.buff.iter_mut().skip(values.len()) {
            *b = Complex64::new(0.0, 0.0);
        }
        let coeffs = self.coeffs_from_buff(scale);

        let rq = self.params.ring_q().at_level(level_q);
        out.q.resize(level_q);
        set_signed_coeffs(&rq, &coeffs, &mut out.q);
        rq.ntt_inplace(&mut out.q);
        rq.mform_inplace(&mut out.q);

        if let (Some(rp), Some(p)) = (self.params.ring_p(), out.p.as_mut()) {
            set_signed_coeffs(rp, &coeffs, p);
            rp.ntt_inplace(p);
            rp.mform_inplace(p);
        }
        Ok(())
    }

    /// Decodes a plaintext back to real slot values.
    pub fn decode(&mut self, pt: &Plaintext, out: &mut [f64]) -> Result<()> {
        self.extract(pt)?;
        self.fft_special();
        for (o, b) in out.iter_mut().zip(self.buff.iter()) {
            *o = b.re;
        }
        Ok(())
    }

    /// Decodes a plaintext to complex slot values (standard ring).
    pub fn decode_complex(&mut self, pt: &Plaintext, out: &mut [Complex64]) -> Result<()> {
        self.extract(pt)?;
        self.fft_special();
        out.copy_from_slice(&self.buff[..out.len()]);
        Ok(())
    }

    fn extract(&mut self, pt: &Plaintext) -> Result<()> {
        let level = pt.level();
        let ring = self.params.ring_q().at_level(level);
        let mut poly = pt.poly.clone();
        if pt.meta.is_ntt {
            ring.intt_inplace(&mut poly);
        }
        let coeffs = centered_coeffs(&ring, &poly);
        let scale = pt.meta.scale;
        match self.params.ring_type() {
            RingType::Standard => {
                let n = self.slots;
                for j in 0..n {
                    self.buff[j] = Complex64::new(coeffs[j] / scale, coeffs[j + n] / scale);
                }
            }
            RingType::ConjugateInvariant => {
                let n = self.slots;
                self.buff[0] = Complex64::new(coeffs[0] / scale, 0.0);
                for j in 1..n {
                    self.buff[j] = Complex64::new(coeffs[j] / scale, -coeffs[n - j] / scale);
                }
            }
        }
        Ok(())
    }

    /// In-place special inverse FFT over the rotation-group ordering.
    fn fft_special_inv(&mut self) {
        let n = self.slots;
        let m = self.m;
        let vals = &mut self.buff;
        let mut len = n;
        while len >= 1 {
            let lenh = len >> 1;
            let lenq = len << 2;
            let gap = m / lenq;
            let mut i = 0;
            while i < n {
                for j in 0..lenh {
                    let idx = (lenq - (self.rot_group[j] % lenq)) * gap;
                    let u = vals[i + j] + vals[i + j + lenh];
                    let v = (vals[i + j] - vals[i + j + lenh]) * self.roots[idx];
                    vals[i + j] = u;
                    vals[i + j + lenh] = v;
                }
                i += len;
            }
            len >>= 1;
        }
        bit_reverse(vals);
        let inv_n = 1.0 / n as f64;
        for v in vals.iter_mut() {
            *v *= inv_n;
        }
    }

    /// In-place special forward FFT (inverse of [`Self::fft_special_inv`]).
    fn fft_special(&mut self) {
        let n = self.slots;
        let m = self.m;
        let vals = &mut self.buff;
        bit_reverse(vals);
        let mut len = 2;
        while len <= n {
            let lenh = len >> 1;
            let lenq = len << 2;
            let gap = m / lenq;
            let mut i = 0;
            while i < n {
                for j in 0..lenh {
                    let idx = (self.rot_group[j] % lenq) * gap;
                    let u = vals[i + j];
                    let v = vals[i + j + lenh] * self.roots[idx];
                    vals[i + j] = u + v;
                    vals[i + j + lenh] = u - v;
                }
                i += len;
            }
            len <<= 1;
        }
    }
}

fn bit_reverse(vals: &mut [Complex64]) {
    let n = vals.len();
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            vals.swap(i, j);
        }
    }
}

/// Writes rounded signed coefficients (as f64 integers) into each RNS row.
pub fn set_signed_coeffs(ring: &Ring, coeffs: &[f64], out: &mut Poly) {
    for (i, s) in ring.sub_rings().iter().enumerate() {
        let q = s.modulus;
        let row = out.at_mut(i);
        for (r, &c) in row.iter_mut().zip(coeffs.iter()) {
            let v = c as i128;
            *r = if v < 0 {
                q - (((-v) % q as i128) as u64)
            } else {
                (v % q as i128) as u64
            };
            if *r == q {
                *r = 0;
            }
        }
        for r in row.iter_mut().skip(coeffs.len()) {
            *r = 0;
        }
    }
}

/// Centered coefficient values as f64 (exact CRT through big integers for
/// multi-modulus levels).
pub fn centered_coeffs(ring: &Ring, poly: &Poly) -> Vec<f64> {
    if ring.level() == 0 {
        let q = ring.sub(0).modulus;
        let half = q / 2;
        return poly
            .at(0)
            .iter()
            .map(|&x| {
                if x > half {
                    -((q - x) as f64)
                } else {
                    x as f64
                }
            })
            .collect();
    }
    ring.poly_to_bigint_centered(poly, 1)
        .into_iter()
        .map(|b| bigint_to_f64(&b))
        .collect()
}

pub(crate) fn bigint_to_f64(b: &num_bigint::BigInt) -> f64 {
    use num_bigint::Sign;
    let (sign, digits) = b.to_u64_digits();
    let mut v = 0.0f64;
    for &d in digits.iter().rev() {
        v = v * 1.8446744073709552e19 + d as f64;
    }
    if sign == Sign::Minus {
        -v
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParametersLiteral;

    fn params(ring_type: RingType) -> Params {
        Params::from_literal(ParametersLiteral {
            log_n: 6,
            log_q: vec![45, 38],
            log_p: vec![46],
            log_default_scale: 38,
            ring_type,
            xs_hamming_weight: 16,
            xe_sigma: 3.2,
        })
        .unwrap()
    }

    fn meta(p: &Params) -> MetaData {
        MetaData::new(p.default_scale(), p.log_max_slots())
    }

    #[test]
    fn standard_round_trip() {
        let p = params(RingType::Standard);
        let mut ecd = Encoder::new(p.clone());
        let values: Vec<f64> = (0..p.max_slots()).map(|i| (i as f64) * 0.1 - 1.3).collect();
        let mut pt = Plaintext::new(p.ring_q(), p.max_level(), meta(&p));
        ecd.encode(&values, &mut pt).unwrap();
        let mut out = vec![0f64; p.max_slots()];
        ecd.decode(&pt, &mut out).unwrap();
        for i in 0..values.len() {
            assert!(
                (values[i] - out[i]).abs() < 1e-9,
                "slot {i}: {} vs {}",
                values[i],
                out[i]
            );
        }
    }

    #[test]
    fn conjugate_invariant_round_trip() {
        let p = params(RingType::ConjugateInvariant);
        let mut ecd = Encoder::new(p.clone());
        let values: Vec<f64> = (0..p.max_slots())
            .map(|i| ((i * 37) % 19) as f64 * 0.05 - 0.4)
            .collect();
        let mut pt = Plaintext::new(p.ring_q(), p.max_level(), meta(&p));
        ecd.encode(&values, &mut pt).unwrap();
        let mut out = vec![0f64; p.max_slots()];
        ecd.decode(&pt, &mut out).unwrap();
        for i in 0..values.len() {
            assert!(
                (values[i] - out[i]).abs() < 1e-9,
                "slot {i}: {} vs {}",
                values[i],
                out[i]
            );
        }
    }

    #[test]
    fn slot_products_match_ring_products() {
        // slotwise product of encodings == encoding of slotwise products
        for ring_type in [RingType::Standard, RingType::ConjugateInvariant] {
            let p = params(ring_type);
            let rq = p.ring_q();
            let mut ecd = Encoder::new(p.clone());
            let a: Vec<f64> = (0..p.max_slots()).map(|i| 0.3 + 0.01 * i as f64).collect();
            let b: Vec<f64> = (0..p.max_slots()).map(|i| 1.1 - 0.02 * i as f64).collect();

            let mut pa = Plaintext::new(rq, p.max_level(), meta(&p));
            let mut pb = Plaintext::new(rq, p.max_level(), meta(&p));
            ecd.encode(&a, &mut pa).unwrap();
            ecd.encode(&b, &mut pb).unwrap();

            let mut pc = Plaintext::new(rq, p.max_level(), meta(&p));
            rq.mul_coeffs_barrett(&pa.poly, &pb.poly, &mut pc.poly);
            pc.meta.scale = pa.meta.scale * pb.meta.scale;

            let mut out = vec![0f64; p.max_slots()];
            ecd.decode(&pc, &mut out).unwrap();
            for i in 0..p.max_slots() {
                assert!(
                    (out[i] - a[i] * b[i]).abs() < 1e-6,
                    "{ring_type:?} slot {i}: {} vs {}",
                    out[i],
                    a[i] * b[i]
                );
            }
        }
    }

    #[test]
    fn automorphism_rotates_slots() {
        for ring_type in [RingType::Standard, RingType::ConjugateInvariant] {
            let p = params(ring_type);
            let rq = p.ring_q();
            let mut ecd = Encoder::new(p.clone());
            let values: Vec<f64> = (0..p.max_slots()).map(|i| i as f64).collect();
            let mut pt = Plaintext::new(rq, p.max_level(), meta(&p));
            ecd.encode(&values, &mut pt).unwrap();

            let k = 3usize;
            let gal = p.galois_element(k as i64);
            let mut mapped = pt.clone();
            let mut tmp = pt.poly.clone();
            rq.intt_inplace(&mut tmp);
            rq.automorphism(&tmp, gal, &mut mapped.poly);
            rq.ntt_inplace(&mut mapped.poly);

            let mut out = vec![0f64; p.max_slots()];
            ecd.decode(&mapped, &mut out).unwrap();
            let n = p.max_slots();
            for i in 0..n {
                let want = values[(i + k) % n];
                assert!(
                    (out[i] - want).abs() < 1e-6,
                    "{ring_type:?} slot {i}: want {want} got {}",
                    out[i]
                );
            }
        }
    }
}
