//! Key-switching engine: gadget products, hoisted decompositions,
//! automorphisms and relinearization.
//!
//! The gadget product is the cost center of every rotation and
//! relinearization: decompose a polynomial into small-norm digits,
//! multiply-accumulate against the gadget rows in the extended basis Q·P,
//! and divide by P on the way out. Accumulation is lazy, with reductions
//! scheduled from the per-level overflow margin.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::math::decompose::{
    center_mod_u64, decompose_signed_balanced_values, decompose_signed_values, decompose_unsigned,
};
use crate::params::Params;
use crate::ring::{BasisExtender, Poly, PolyQP, Ring};

use super::ciphertext::Ciphertext;
use super::keys::{DigitDecompositionType, EvaluationKeySet, GadgetCiphertext};

/// Degree-1 accumulator over the extended basis Q·P.
#[derive(Clone, Debug)]
pub struct CiphertextQP {
    pub q: [Poly; 2],
    pub p: Option<[Poly; 2]>,
}

impl CiphertextQP {
    pub fn new(n: usize, level_q: usize, level_p: Option<usize>) -> Self {
        CiphertextQP {
            q: [Poly::new(n, level_q), Poly::new(n, level_q)],
            p: level_p.map(|lp| [Poly::new(n, lp), Poly::new(n, lp)]),
        }
    }

    fn zero(&mut self) {
        for p in self.q.iter_mut() {
            p.zero();
        }
        if let Some(p) = self.p.as_mut() {
            for pp in p.iter_mut() {
                pp.zero();
            }
        }
    }
}

pub struct Evaluator {
    params: Params,
    ext: Option<Arc<BasisExtender>>,
    keys: Arc<dyn EvaluationKeySet>,
    // scratch, sized at the maximum level
    buff_intt: Poly,
    buff_dq: Poly,
    buff_dp: Option<Poly>,
    acc: CiphertextQP,
    buff_d0: Poly,
    buff_d1: Poly,
}

impl Evaluator {
    pub fn new(params: Params, keys: Arc<dyn EvaluationKeySet>) -> Self {
        let n = params.n();
        let level_q = params.max_level();
        let level_p = params.max_level_p();
        let ext = params
            .ring_p()
            .map(|rp| Arc::new(BasisExtender::new(params.ring_q(), rp)));
        Evaluator {
            ext,
            buff_intt: Poly::new(n, level_q),
            buff_dq: Poly::new(n, level_q),
            buff_dp: level_p.map(|lp| Poly::new(n, lp)),
            acc: CiphertextQP::new(n, level_q, level_p),
            buff_d0: Poly::new(n, level_q),
            buff_d1: Poly::new(n, level_q),
            keys,
            params,
        }
    }

    /// Shares the read-only state (params, basis extender, key set) and
    /// allocates fresh scratch. Shallow copies are thread-local.
    pub fn shallow_copy(&self) -> Self {
        let n = self.params.n();
        let level_q = self.params.max_level();
        let level_p = self.params.max_level_p();
        Evaluator {
            params: self.params.clone(),
            ext: self.ext.clone(),
            keys: self.keys.clone(),
            buff_intt: Poly::new(n, level_q),
            buff_dq: Poly::new(n, level_q),
            buff_dp: level_p.map(|lp| Poly::new(n, lp)),
            acc: CiphertextQP::new(n, level_q, level_p),
            buff_d0: Poly::new(n, level_q),
            buff_d1: Poly::new(n, level_q),
        }
    }

    pub fn with_keys(&self, keys: Arc<dyn EvaluationKeySet>) -> Self {
        let mut e = self.shallow_copy();
        e.keys = keys;
        e
    }

    pub fn set_keys(&mut self, keys: Arc<dyn EvaluationKeySet>) {
        self.keys = keys;
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn keys(&self) -> &Arc<dyn EvaluationKeySet> {
        &self.keys
    }

    pub fn basis_extender(&self) -> Option<&Arc<BasisExtender>> {
        self.ext.as_ref()
    }

    /// `P mod q_i` in Montgomery form for the first `level_q + 1` moduli
    /// (used to lift c0 into the Q·P-scaled accumulator domain).
    pub fn p_mod_q_mont(&self, level_q: usize) -> Vec<u64> {
        let rq = self.params.ring_q();
        (0..=level_q)
            .map(|i| {
                let s = rq.sub(i);
                let p = self
                    .ext
                    .as_ref()
                    .map(|e| e.p_mod_q(i))
                    .unwrap_or(1);
                s.mform(p)
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // gadget products
    // ------------------------------------------------------------------

    /// Pre-computes the hoisted RNS decomposition of `cx` (NTT domain):
    /// each digit lifted into the full Q·P basis. Requires the auxiliary
    /// basis.
    pub fn decompose_ntt(&mut self, level_q: usize, cx: &Poly) -> Result<Vec<PolyQP>> {
        let ext = self
            .ext
            .clone()
            .ok_or_else(|| Error::shape("hoisting requires an auxiliary basis P"))?;
        let rq = self.params.ring_q().at_level(level_q);
        let level_p = self.params.max_level_p().unwrap();
        let n = self.params.n();

        self.buff_intt.copy_at_level(level_q, cx);
        rq.intt_inplace(&mut self.buff_intt);

        let digits = ext.digit_count(level_q);
        let mut out = Vec::with_capacity(digits);
        for d in 0..digits {
            let mut qp = PolyQP::new(n, level_q, Some(level_p));
            ext.decompose_and_split(
                level_q,
                d,
                cx,
                &self.buff_intt,
                &mut qp.q,
                qp.p.as_mut().unwrap(),
            );
            out.push(qp);
        }
        Ok(out)
    }

    /// Multiply-accumulates a hoisted decomposition against a gadget
    /// ciphertext, leaving a reduced result in `acc` (NTT domain, basis
    /// Q·P). No allocation, no decomposition: the hoisted fast path.
    pub fn gadget_product_hoisted_lazy_acc(
        &self,
        level_q: usize,
        decomp: &[PolyQP],
        gct: &GadgetCiphertext,
        acc: &mut CiphertextQP,
        overwrite: bool,
    ) -> Result<()> {
        if gct.dd.kind != DigitDecompositionType::None {
            return Err(Error::shape(
                "hoisted gadget products do not support digit decomposition",
            ));
        }
        let level_q = level_q.min(gct.level_q);
        let rq = self.params.ring_q().at_level(level_q);
        let rp = self.params.ring_p().expect("hoisting requires P");
        let q_margin = self.params.qi_overflow_margin(level_q) >> 1;
        let p_margin = {
            let max_p = self.params.p().into_iter().max().unwrap();
            (((u64::MAX / max_p) / 2) >> 1).max(1) as usize
        };
        let q_margin = q_margin.max(1);

        if overwrite {
            acc.zero();
        }

        let digits = decomp.len().min(gct.rns_digits());
        let mut reduce = 0usize;
        for i in 0..digits {
            let row = &gct.el[i][0];
            for c in 0..2 {
                rq.mul_coeffs_montgomery_lazy_then_add_lazy(&row[c].q, &decomp[i].q, &mut acc.q[c]);
                if let (Some(p_acc), Some(p_row), Some(p_dec)) =
                    (acc.p.as_mut(), row[c].p.as_ref(), decomp[i].p.as_ref())
                {
                    rp.mul_coeffs_montgomery_lazy_then_add_lazy(p_row, p_dec, &mut p_acc[c]);
                }
            }
            reduce += 1;
            if reduce % q_margin == q_margin - 1 {
                for c in 0..2 {
                    rq.reduce_inplace(&mut acc.q[c]);
                }
            }
            if reduce % p_margin == p_margin - 1 {
                if let Some(p_acc) = acc.p.as_mut() {
                    for pp in p_acc.iter_mut() {
                        rp.reduce_inplace(pp);
                    }
                }
            }
        }
        for c in 0..2 {
            rq.reduce_inplace(&mut acc.q[c]);
        }
        if let Some(p_acc) = acc.p.as_mut() {
            for pp in p_acc.iter_mut() {
                rp.reduce_inplace(pp);
            }
        }
        Ok(())
    }

    /// Full gadget product: decompose `cx` (NTT domain), accumulate, and
    /// divide by P. `out0`/`out1` receive the NTT-domain result mod Q at
    /// `level_q`.
    pub fn gadget_product(
        &mut self,
        level_q: usize,
        cx: &Poly,
        gct: &GadgetCiphertext,
        out0: &mut Poly,
        out1: &mut Poly,
    ) -> Result<()> {
        let level_q = level_q.min(gct.level_q);
        match (gct.dd.kind, self.ext.is_some()) {
            (DigitDecompositionType::None, true) => self.gadget_product_rns(level_q, cx, gct)?,
            _ => self.gadget_product_digits(level_q, cx, gct)?,
        }
        self.mod_down_acc(level_q, out0, out1);
        Ok(())
    }

    /// Hoisted gadget product with final ModDown.
    pub fn gadget_product_hoisted(
        &mut self,
        level_q: usize,
        decomp: &[PolyQP],
        gct: &GadgetCiphertext,
        out0: &mut Poly,
        out1: &mut Poly,
    ) -> Result<()> {
        let level_q = level_q.min(gct.level_q);
        let mut acc = std::mem::replace(&mut self.acc, CiphertextQP::new(8, 0, None));
        let res = self.gadget_product_hoisted_lazy_acc(level_q, decomp, gct, &mut acc, true);
        self.acc = acc;
        res?;
        self.mod_down_acc(level_q, out0, out1);
        Ok(())
    }

    fn gadget_product_rns(&mut self, level_q: usize, cx: &Poly, gct: &GadgetCiphertext) -> Result<()> {
        let ext = self.ext.clone().unwrap();
        let rq = self.params.ring_q().at_level(level_q);

        self.buff_intt.copy_at_level(level_q, cx);
        rq.intt_inplace(&mut self.buff_intt);

        let mut acc = std::mem::replace(&mut self.acc, CiphertextQP::new(8, 0, None));
        acc.zero();

        let rp = self.params.ring_p().unwrap();
        let q_margin = (self.params.qi_overflow_margin(level_q) >> 1).max(1);
        let p_margin = {
            let max_p = self.params.p().into_iter().max().unwrap();
            ((u64::MAX / max_p) / 4).max(1) as usize
        };

        let digits = ext.digit_count(level_q).min(gct.rns_digits());
        let mut reduce = 0usize;
        for d in 0..digits {
            ext.decompose_and_split(
                level_q,
                d,
                cx,
                &self.buff_intt,
                &mut self.buff_dq,
                self.buff_dp.as_mut().unwrap(),
            );
            let row = &gct.el[d][0];
            for c in 0..2 {
                rq.mul_coeffs_montgomery_lazy_then_add_lazy(&row[c].q, &self.buff_dq, &mut acc.q[c]);
                rp.mul_coeffs_montgomery_lazy_then_add_lazy(
                    row[c].p.as_ref().unwrap(),
                    self.buff_dp.as_ref().unwrap(),
                    &mut acc.p.as_mut().unwrap()[c],
                );
            }
            reduce += 1;
            if reduce % q_margin == q_margin - 1 {
                for c in 0..2 {
                    rq.reduce_inplace(&mut acc.q[c]);
                }
            }
            if reduce % p_margin == p_margin - 1 {
                for pp in acc.p.as_mut().unwrap().iter_mut() {
                    rp.reduce_inplace(pp);
                }
            }
        }
        for c in 0..2 {
            rq.reduce_inplace(&mut acc.q[c]);
        }
        for pp in acc.p.as_mut().unwrap().iter_mut() {
            rp.reduce_inplace(pp);
        }
        self.acc = acc;
        Ok(())
    }

    /// Digit-decomposition path (no auxiliary basis): every RNS row is
    /// centered and split into base-2^w digits, each re-embedded into all
    /// live moduli.
    fn gadget_product_digits(
        &mut self,
        level_q: usize,
        cx: &Poly,
        gct: &GadgetCiphertext,
    ) -> Result<()> {
        let rq = self.params.ring_q().at_level(level_q);
        let n = self.params.n();

        self.buff_intt.copy_at_level(level_q, cx);
        rq.intt_inplace(&mut self.buff_intt);

        let mut acc = std::mem::replace(&mut self.acc, CiphertextQP::new(8, 0, None));
        acc.zero();

        let q_margin = (self.params.qi_overflow_margin(level_q) >> 1).max(1);
        let w = gct.dd.log2_basis;

        let mut centered = vec![0u64; n];
        let mut carry = vec![0u64; n];
        let mut digits_i64 = vec![0i64; n];
        let mut digit_row = vec![0u64; n];

        let mut reduce = 0usize;
        for i in 0..=level_q.min(gct.rns_digits() - 1) {
            let qi = rq.sub(i).modulus;
            center_mod_u64(self.buff_intt.at(i), qi, &mut centered);
            carry.fill(0);
            let dims = gct.el[i].len();
            for j in 0..dims {
                let last = j == dims - 1;
                match gct.dd.kind {
                    DigitDecompositionType::None => {
                        for (d, &c) in digits_i64.iter_mut().zip(centered.iter()) {
                            *d = c as i64;
                        }
                    }
                    DigitDecompositionType::Unsigned => {
                        // unsigned digits of the plain residue
                        decompose_unsigned(j, w, self.buff_intt.at(i), &mut digit_row);
                        for (d, &c) in digits_i64.iter_mut().zip(digit_row.iter()) {
                            *d = c as i64;
                        }
                    }
                    DigitDecompositionType::Signed => {
                        decompose_signed_values(j, w, last, &centered, &mut carry, &mut digits_i64);
                    }
                    DigitDecompositionType::SignedBalanced => {
                        decompose_signed_balanced_values(
                            j,
                            w,
                            last,
                            &centered,
                            &mut carry,
                            &mut digits_i64,
                        );
                    }
                }

                let row = &gct.el[i][j];
                for u in 0..=level_q {
                    let s = rq.sub(u);
                    let qu = s.modulus;
                    for (o, &d) in digit_row.iter_mut().zip(digits_i64.iter()) {
                        *o = if d < 0 {
                            qu - ((-d) as u64 % qu)
                        } else {
                            d as u64 % qu
                        };
                    }
                    s.ntt(&mut digit_row);
                    for c in 0..2 {
                        crate::math::vec_ops::mul_coeffs_montgomery_lazy_then_add_lazy_vec(
                            row[c].q.at(u),
                            &digit_row,
                            acc.q[c].at_mut(u),
                            qu,
                            s.nu,
                        );
                    }
                }
                reduce += 1;
                if reduce % q_margin == q_margin - 1 {
                    for c in 0..2 {
                        rq.reduce_inplace(&mut acc.q[c]);
                    }
                }
            }
        }
        for c in 0..2 {
            rq.reduce_inplace(&mut acc.q[c]);
        }
        self.acc = acc;
        Ok(())
    }

    /// Divides the internal accumulator by P (rounding) into `out0`/`out1`
    /// (NTT domain, mod Q).
    fn mod_down_acc(&mut self, level_q: usize, out0: &mut Poly, out1: &mut Poly) {
        match (&self.ext, self.acc.p.as_mut()) {
            (Some(ext), Some(p_acc)) => {
                ext.mod_down_qp_to_q_ntt(level_q, &mut self.acc.q[0], &mut p_acc[0]);
                ext.mod_down_qp_to_q_ntt(level_q, &mut self.acc.q[1], &mut p_acc[1]);
            }
            _ => {}
        }
        out0.copy_at_level(level_q, &self.acc.q[0]);
        out1.copy_at_level(level_q, &self.acc.q[1]);
    }

    // ------------------------------------------------------------------
    // automorphisms, key switching, relinearization
    // ------------------------------------------------------------------

    /// Applies `X -> X^{gal_el}` using the matching Galois key. Input and
    /// output are degree-1 NTT-domain ciphertexts; `out` is resized to the
    /// input level.
    pub fn automorphism(&mut self, ct: &Ciphertext, gal_el: u64, out: &mut Ciphertext) -> Result<()> {
        if ct.degree() != 1 {
            return Err(Error::shape("automorphism expects a degree-1 ciphertext"));
        }
        out.resize_degree(1, self.params.n());
        out.resize_level(ct.level());
        if gal_el == 1 {
            out.q[0].copy_at_level(ct.level(), &ct.q[0]);
            out.q[1].copy_at_level(ct.level(), &ct.q[1]);
            out.meta = ct.meta;
            return Ok(());
        }
        let gk = self.keys.galois_key(gal_el)?;
        let level = ct.level();
        let rq = self.params.ring_q().at_level(level);

        let mut d0 = std::mem::replace(&mut self.buff_d0, Poly::new(8, 0));
        let mut d1 = std::mem::replace(&mut self.buff_d1, Poly::new(8, 0));
        let res = self.gadget_product(level, &ct.q[1], &gk.gct, &mut d0, &mut d1);
        if let Err(e) = res {
            self.buff_d0 = d0;
            self.buff_d1 = d1;
            return Err(e);
        }
        rq.add_assign(&mut d0, &ct.q[0]);

        self.automorphism_poly_ntt(&rq, &d0, gal_el, &mut out.q[0]);
        self.automorphism_poly_ntt(&rq, &d1, gal_el, &mut out.q[1]);
        self.buff_d0 = d0;
        self.buff_d1 = d1;
        out.meta = ct.meta;
        Ok(())
    }

    /// Hoisted automorphism: reuses a pre-computed decomposition of c1.
    pub fn automorphism_hoisted(
        &mut self,
        ct: &Ciphertext,
        decomp: &[PolyQP],
        gal_el: u64,
        out: &mut Ciphertext,
    ) -> Result<()> {
        if ct.degree() != 1 {
            return Err(Error::shape("automorphism expects a degree-1 ciphertext"));
        }
        out.resize_degree(1, self.params.n());
        out.resize_level(ct.level());
        if gal_el == 1 {
            out.q[0].copy_at_level(ct.level(), &ct.q[0]);
            out.q[1].copy_at_level(ct.level(), &ct.q[1]);
            out.meta = ct.meta;
            return Ok(());
        }
        let gk = self.keys.galois_key(gal_el)?;
        let level = ct.level();
        let rq = self.params.ring_q().at_level(level);

        let mut d0 = std::mem::replace(&mut self.buff_d0, Poly::new(8, 0));
        let mut d1 = std::mem::replace(&mut self.buff_d1, Poly::new(8, 0));
        let res = self.gadget_product_hoisted(level, decomp, &gk.gct, &mut d0, &mut d1);
        if let Err(e) = res {
            self.buff_d0 = d0;
            self.buff_d1 = d1;
            return Err(e);
        }
        rq.add_assign(&mut d0, &ct.q[0]);

        self.automorphism_poly_ntt(&rq, &d0, gal_el, &mut out.q[0]);
        self.automorphism_poly_ntt(&rq, &d1, gal_el, &mut out.q[1]);
        self.buff_d0 = d0;
        self.buff_d1 = d1;
        out.meta = ct.meta;
        Ok(())
    }

    /// Re-encrypts `ct` under the output key of `evk` (a gadget
    /// encryption of the input secret under the output secret).
    pub fn apply_evaluation_key(
        &mut self,
        ct: &Ciphertext,
        evk: &super::keys::EvaluationKey,
        out: &mut Ciphertext,
    ) -> Result<()> {
        if ct.degree() != 1 {
            return Err(Error::shape("key switching expects a degree-1 ciphertext"));
        }
        let level = ct.level();
        let rq = self.params.ring_q().at_level(level);
        out.resize_degree(1, self.params.n());
        out.resize_level(level);

        let mut d0 = std::mem::replace(&mut self.buff_d0, Poly::new(8, 0));
        let mut d1 = std::mem::replace(&mut self.buff_d1, Poly::new(8, 0));
        let res = self.gadget_product(level, &ct.q[1], &evk.gct, &mut d0, &mut d1);
        if let Err(e) = res {
            self.buff_d0 = d0;
            self.buff_d1 = d1;
            return Err(e);
        }
        out.q[0].copy_at_level(level, &ct.q[0]);
        rq.add_assign(&mut out.q[0], &d0);
        out.q[1].copy_at_level(level, &d1);
        self.buff_d0 = d0;
        self.buff_d1 = d1;
        out.meta = ct.meta;
        Ok(())
    }

    /// Applies the automorphism to an NTT-domain polynomial through the
    /// coefficient domain.
    pub fn automorphism_poly_ntt(&self, rq: &Ring, src: &Poly, gal_el: u64, out: &mut Poly) {
        let mut tmp = src.clone();
        tmp.resize(rq.level());
        rq.intt_inplace(&mut tmp);
        out.resize(rq.level());
        rq.automorphism(&tmp, gal_el, out);
        rq.ntt_inplace(out);
    }

    /// Reduces a degree-2 ciphertext to degree 1 with the relinearization
    /// key.
    pub fn relinearize(&mut self, ct: &mut Ciphertext) -> Result<()> {
        if ct.degree() == 1 {
            return Ok(());
        }
        if ct.degree() != 2 {
            return Err(Error::shape(format!(
                "relinearization expects degree <= 2, got {}",
                ct.degree()
            )));
        }
        let rlk = self.keys.relinearization_key()?;
        let level = ct.level();
        let rq = self.params.ring_q().at_level(level);

        let mut d0 = std::mem::replace(&mut self.buff_d0, Poly::new(8, 0));
        let mut d1 = std::mem::replace(&mut self.buff_d1, Poly::new(8, 0));
        let res = self.gadget_product(level, &ct.q[2], &rlk.gct, &mut d0, &mut d1);
        if let Err(e) = res {
            self.buff_d0 = d0;
            self.buff_d1 = d1;
            return Err(e);
        }
        rq.add_assign(&mut ct.q[0], &d0);
        rq.add_assign(&mut ct.q[1], &d1);
        ct.q.truncate(2);
        self.buff_d0 = d0;
        self.buff_d1 = d1;
        Ok(())
    }
}
