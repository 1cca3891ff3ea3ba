//! Key generation: secret keys, gadget ciphertexts and the evaluation
//! keys built from them.

use crate::math::decompose::digit_count;
use crate::math::modular::{cred, mod_exp, mred};
use crate::params::Params;
use crate::ring::{embed_signed, GaussianSampler, Poly, PolyQP, Source, TernarySampler, UniformSampler};

use super::keys::{
    DigitDecomposition, DigitDecompositionType, EvaluationKey, GadgetCiphertext, GaloisKey,
    RelinearizationKey, SecretKey,
};

pub struct KeyGenerator {
    params: Params,
    source: Source,
    gaussian: GaussianSampler,
    /// `P mod q_i` per ciphertext modulus (empty when P is absent).
    p_mod_q: Vec<u64>,
}

impl KeyGenerator {
    pub fn new(params: Params) -> Self {
        Self::with_source(params, Source::from_entropy())
    }

    pub fn with_source(params: Params, source: Source) -> Self {
        let p_mod_q = if params.alpha() > 0 {
            let p_big: num_bigint::BigInt = params
                .p()
                .iter()
                .map(|&x| num_bigint::BigInt::from(x))
                .product();
            params
                .q()
                .iter()
                .map(|&qi| crate::ring::residue(&p_big, qi))
                .collect()
        } else {
            Vec::new()
        };
        let gaussian = GaussianSampler::new(params.xe_sigma());
        KeyGenerator {
            params,
            source,
            gaussian,
            p_mod_q,
        }
    }

    /// Samples a fresh ternary secret with the configured Hamming weight,
    /// stored NTT + Montgomery over both bases.
    pub fn gen_secret_key(&mut self) -> SecretKey {
        let params = &self.params;
        let n = params.n();
        let values = TernarySampler {
            hamming_weight: params.xs_hamming_weight(),
        }
        .sample_values(&mut self.source, n);

        let rq = params.ring_q();
        let mut q = rq.new_poly();
        embed_signed(rq, &values, &mut q);
        rq.ntt_inplace(&mut q);
        rq.mform_inplace(&mut q);

        let p = params.ring_p().map(|rp| {
            let mut p = rp.new_poly();
            embed_signed(rp, &values, &mut p);
            rp.ntt_inplace(&mut p);
            rp.mform_inplace(&mut p);
            p
        });

        SecretKey { q, p }
    }

    /// Gadget-encrypts `pt` (NTT domain, standard form, defined over the
    /// first `level_q + 1` rows) under `sk`.
    pub fn gen_gadget_ciphertext(
        &mut self,
        pt: &Poly,
        sk: &SecretKey,
        level_q: usize,
        dd: DigitDecomposition,
    ) -> GadgetCiphertext {
        let params = self.params.clone();
        let n = params.n();
        let rq = params.ring_q().at_level(level_q);
        let rp = params.ring_p();
        let level_p = params.max_level_p();
        // digit decomposition is only meaningful without an auxiliary basis
        let dd = if level_p.is_some() {
            DigitDecomposition::default()
        } else {
            dd
        };

        let rns_digits = params.rns_digit_count(level_q);
        let mut el = Vec::with_capacity(rns_digits);

        for i in 0..rns_digits {
            let base2_digits = match dd.kind {
                DigitDecompositionType::None => 1,
                _ => {
                    let qi = rq.sub(i).modulus;
                    digit_count(64 - qi.leading_zeros() as usize, dd.log2_basis)
                }
            };
            let mut row = Vec::with_capacity(base2_digits);
            for j in 0..base2_digits {
                row.push(self.gen_gadget_row(pt, sk, level_q, i, j, dd, &rq, rp, n));
            }
            el.push(row);
        }

        GadgetCiphertext {
            dd,
            level_q,
            level_p,
            el,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn gen_gadget_row(
        &mut self,
        pt: &Poly,
        sk: &SecretKey,
        level_q: usize,
        i: usize,
        j: usize,
        dd: DigitDecomposition,
        rq: &crate::ring::Ring,
        rp: Option<&crate::ring::Ring>,
        n: usize,
    ) -> [PolyQP; 2] {
        // a uniform in NTT domain, e Gaussian
        let mut a_q = rq.new_poly();
        UniformSampler.read(&mut self.source, rq, &mut a_q);
        let e_values = self.gaussian.sample_values(&mut self.source, n);
        let mut b_q = rq.new_poly();
        embed_signed(rq, &e_values, &mut b_q);
        rq.ntt_inplace(&mut b_q);

        // b = e - a·s
        rq.mul_coeffs_montgomery_then_sub(&a_q, &sk.q, &mut b_q);

        // gadget term on the Q rows
        match dd.kind {
            DigitDecompositionType::None => {
                if self.p_mod_q.is_empty() {
                    // no P: plain CRT gadget, factor 1 on the group row
                    let range = self.params.rns_digit_range(level_q, i);
                    for t in range {
                        add_scaled_row(rq, pt, 1, t, &mut b_q);
                    }
                } else {
                    let range = self.params.rns_digit_range(level_q, i);
                    for t in range {
                        add_scaled_row(rq, pt, self.p_mod_q[t], t, &mut b_q);
                    }
                }
            }
            _ => {
                let qi = rq.sub(i).modulus;
                let w = mod_exp(2, (j * dd.log2_basis) as u64, qi);
                add_scaled_row(rq, pt, w, i, &mut b_q);
            }
        }

        rq.mform_inplace(&mut a_q);
        rq.mform_inplace(&mut b_q);

        let (a_p, b_p) = match (rp, sk.p.as_ref()) {
            (Some(rp), Some(sk_p)) => {
                let mut a_p = rp.new_poly();
                UniformSampler.read(&mut self.source, rp, &mut a_p);
                let mut b_p = rp.new_poly();
                embed_signed(rp, &e_values, &mut b_p);
                rp.ntt_inplace(&mut b_p);
                rp.mul_coeffs_montgomery_then_sub(&a_p, sk_p, &mut b_p);
                rp.mform_inplace(&mut a_p);
                rp.mform_inplace(&mut b_p);
                (Some(a_p), Some(b_p))
            }
            _ => (None, None),
        };

        [
            PolyQP { q: b_q, p: b_p },
            PolyQP { q: a_q, p: a_p },
        ]
    }

    /// Relinearization key: gadget encryption of s².
    pub fn gen_relinearization_key(&mut self, sk: &SecretKey) -> RelinearizationKey {
        let rq = self.params.ring_q();
        let mut s_std = sk.q.clone();
        rq.imform_inplace(&mut s_std); // NTT, standard form
        let mut s2 = rq.new_poly();
        rq.mul_coeffs_montgomery(&s_std, &sk.q, &mut s2);
        RelinearizationKey {
            gct: self.gen_gadget_ciphertext(
                &s2,
                sk,
                self.params.max_level(),
                DigitDecomposition::default(),
            ),
        }
    }

    /// Galois key for `X -> X^{gal_el}`: gadget encryption of
    /// `auto_{gal_el^{-1}}(s)`.
    pub fn gen_galois_key(&mut self, gal_el: u64, sk: &SecretKey) -> GaloisKey {
        self.gen_galois_key_with(gal_el, sk, DigitDecomposition::default())
    }

    pub fn gen_galois_key_with(
        &mut self,
        gal_el: u64,
        sk: &SecretKey,
        dd: DigitDecomposition,
    ) -> GaloisKey {
        let rq = self.params.ring_q();
        let g_inv = inv_mod_power_of_two(gal_el, self.params.nth_root());

        let mut s_coeff = sk.q.clone();
        rq.imform_inplace(&mut s_coeff);
        rq.intt_inplace(&mut s_coeff);
        let mut pt = rq.new_poly();
        rq.automorphism(&s_coeff, g_inv, &mut pt);
        rq.ntt_inplace(&mut pt);

        GaloisKey {
            gal_el,
            gct: self.gen_gadget_ciphertext(&pt, sk, self.params.max_level(), dd),
        }
    }

    /// Re-encryption key from `sk_in` to `sk_out`.
    pub fn gen_evaluation_key(&mut self, sk_in: &SecretKey, sk_out: &SecretKey) -> EvaluationKey {
        let rq = self.params.ring_q();
        let mut pt = sk_in.q.clone();
        rq.imform_inplace(&mut pt);
        EvaluationKey {
            gct: self.gen_gadget_ciphertext(
                &pt,
                sk_out,
                self.params.max_level(),
                DigitDecomposition::default(),
            ),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }
}

/// `b.row[t] += w · pt.row[t]` with `w < q_t`.
fn add_scaled_row(rq: &crate::ring::Ring, pt: &Poly, w: u64, t: usize, b: &mut Poly) {
    let s = rq.sub(t);
    let w_mont = s.mform(w);
    let q = s.modulus;
    for (b, &x) in b.at_mut(t).iter_mut().zip(pt.at(t).iter()) {
        *b = cred(*b + mred(x, w_mont, q, s.nu), q);
    }
}

/// Inverse of an odd element modulo a power of two.
fn inv_mod_power_of_two(a: u64, m: u64) -> u64 {
    debug_assert!(m.is_power_of_two() && a % 2 == 1);
    let mut inv: u64 = 1;
    for _ in 0..6 {
        inv = inv.wrapping_mul(2u64.wrapping_sub(a.wrapping_mul(inv)));
    }
    inv & (m - 1)
}
