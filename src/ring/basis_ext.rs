//! RNS basis extension between the ciphertext basis Q and the auxiliary
//! basis P.
//!
//! Two conversions are needed by the key-switching machinery:
//!
//! - **mod-up** ([`BasisExtender::decompose_and_split`]): lift one digit
//!   group of Q residues into the full Q·P basis (approximate CRT — the
//!   lift may exceed the true value by a small multiple of the group
//!   modulus, which the gadget construction absorbs);
//! - **mod-down** ([`BasisExtender::mod_down_qp_to_q_ntt`]): divide a Q·P
//!   value by P with rounding, returning to basis Q.

use num_bigint::BigInt;

use crate::math::modular::{bred_u128, cred, mred};
use super::poly::Poly;
use super::ring::{residue, Ring};

struct DigitTable {
    start: usize,
    end: usize,
    /// Per member j: `[(Q_G/q_j)^{-1}]_{q_j}` in Montgomery form.
    qhat_inv_mont: Vec<u64>,
    /// Per member j, per target modulus t (all of Q then all of P):
    /// `(Q_G/q_j) mod t`.
    qhat_mod: Vec<Vec<u64>>,
}

pub struct BasisExtender {
    ring_q: Ring,
    ring_p: Ring,
    alpha: usize,
    /// `digit_tables[level_q][digit]`.
    digit_tables: Vec<Vec<DigitTable>>,
    phat_inv_mont: Vec<u64>,
    /// `phat_mod_q[j][i] = (P/p_j) mod q_i`.
    phat_mod_q: Vec<Vec<u64>>,
    p_inv_mont_q: Vec<u64>,
    p_half_mod_p: Vec<u64>,
    p_half_mod_q: Vec<u64>,
    p_mod_q: Vec<u64>,
}

impl BasisExtender {
    pub fn new(ring_q: &Ring, ring_p: &Ring) -> Self {
        let ring_q = ring_q.at_level(ring_q.max_level());
        let ring_p = ring_p.at_level(ring_p.max_level());
        let alpha = ring_p.max_level() + 1;
        assert!(alpha <= 8, "at most 8 auxiliary primes supported");

        let q_moduli = ring_q.moduli();
        let p_moduli = ring_p.moduli();

        // per-level digit tables
        let mut digit_tables = Vec::with_capacity(q_moduli.len());
        for level_q in 0..q_moduli.len() {
            let live = level_q + 1;
            let digits = live.div_ceil(alpha);
            let mut tables = Vec::with_capacity(digits);
            for d in 0..digits {
                let start = d * alpha;
                let end = ((d + 1) * alpha).min(live);
                let group_modulus: BigInt = q_moduli[start..end]
                    .iter()
                    .map(|&x| BigInt::from(x))
                    .product();
                let mut qhat_inv_mont = Vec::with_capacity(end - start);
                let mut qhat_mod = Vec::with_capacity(end - start);
                for j in start..end {
                    let qhat: BigInt = &group_modulus / q_moduli[j];
                    let s = ring_q.sub(j);
                    let inv = crate::math::modular::mod_inverse(
                        residue(&qhat, s.modulus),
                        s.modulus,
                    );
                    qhat_inv_mont.push(s.mform(inv));
                    let mut row = Vec::with_capacity(live + p_moduli.len());
                    for &t in q_moduli[..live].iter().chain(p_moduli.iter()) {
                        row.push(residue(&qhat, t));
                    }
                    qhat_mod.push(row);
                }
                tables.push(DigitTable {
                    start,
                    end,
                    qhat_inv_mont,
                    qhat_mod,
                });
            }
            digit_tables.push(tables);
        }

        // P -> Q constants
        let p_big: BigInt = p_moduli.iter().map(|&x| BigInt::from(x)).product();
        let p_half: BigInt = (&p_big - 1) / 2;
        let mut phat_inv_mont = Vec::with_capacity(alpha);
        let mut phat_mod_q = Vec::with_capacity(alpha);
        for (j, &pj) in p_moduli.iter().enumerate() {
            let phat: BigInt = &p_big / pj;
            let s = ring_p.sub(j);
            let inv = crate::math::modular::mod_inverse(residue(&phat, pj), pj);
            phat_inv_mont.push(s.mform(inv));
            phat_mod_q.push(q_moduli.iter().map(|&qi| residue(&phat, qi)).collect());
        }
        let p_inv_mont_q = q_moduli
            .iter()
            .enumerate()
            .map(|(i, &qi)| {
                let s = ring_q.sub(i);
                s.mform(crate::math::modular::mod_inverse(residue(&p_big, qi), qi))
            })
            .collect();
        let p_half_mod_p = p_moduli.iter().map(|&pj| residue(&p_half, pj)).collect();
        let p_half_mod_q = q_moduli.iter().map(|&qi| residue(&p_half, qi)).collect();
        let p_mod_q = q_moduli.iter().map(|&qi| residue(&p_big, qi)).collect();

        BasisExtender {
            ring_q,
            ring_p,
            alpha,
            digit_tables,
            phat_inv_mont,
            phat_mod_q,
            p_inv_mont_q,
            p_half_mod_p,
            p_half_mod_q,
            p_mod_q,
        }
    }

    pub fn alpha(&self) -> usize {
        self.alpha
    }

    /// Number of RNS digit groups at the given Q level.
    pub fn digit_count(&self, level_q: usize) -> usize {
        self.digit_tables[level_q].len()
    }

    /// `P mod q_i`, used by the gadget factor.
    pub fn p_mod_q(&self, i: usize) -> u64 {
        self.p_mod_q[i]
    }

    /// Lifts digit group `digit` of `src` into the full Q·P basis, NTT
    /// domain. `src_ntt`/`src_intt` are the same polynomial in and out of
    /// the NTT domain; in-group rows are copied from `src_ntt`, all other
    /// rows are reconstructed from `src_intt` and transformed.
    pub fn decompose_and_split(
        &self,
        level_q: usize,
        digit: usize,
        src_ntt: &Poly,
        src_intt: &Poly,
        out_q: &mut Poly,
        out_p: &mut Poly,
    ) {
        let table = &self.digit_tables[level_q][digit];
        let n = self.ring_q.n();
        let g = table.end - table.start;
        let p_count = self.ring_p.max_level() + 1;

        // y_j = [x_j · (Q_G/q_j)^{-1}]_{q_j}
        let mut y = vec![vec![0u64; n]; g];
        for (jj, j) in (table.start..table.end).enumerate() {
            let s = self.ring_q.sub(j);
            let src = src_intt.at(j);
            let dst = &mut y[jj];
            for k in 0..n {
                dst[k] = mred(src[k], table.qhat_inv_mont[jj], s.modulus, s.nu);
            }
        }

        // Q targets
        for t in 0..=level_q {
            if t >= table.start && t < table.end {
                out_q.at_mut(t).copy_from_slice(src_ntt.at(t));
                continue;
            }
            let s = self.ring_q.sub(t);
            let row = out_q.at_mut(t);
            for k in 0..n {
                let mut acc: u128 = 0;
                for jj in 0..g {
                    acc += y[jj][k] as u128 * table.qhat_mod[jj][t] as u128;
                }
                row[k] = bred_u128(acc, s.modulus, s.brc);
            }
            s.ntt(row);
        }

        // P targets
        for (jp, sp) in self.ring_p.sub_rings()[..p_count].iter().enumerate() {
            let t = level_q + 1 + jp;
            let row = out_p.at_mut(jp);
            for k in 0..n {
                let mut acc: u128 = 0;
                for jj in 0..g {
                    acc += y[jj][k] as u128 * table.qhat_mod[jj][t] as u128;
                }
                row[k] = bred_u128(acc, sp.modulus, sp.brc);
            }
            sp.ntt(row);
        }
    }

    /// Rounded division by P of an NTT-domain Q·P value, in place on the Q
    /// part: `a_q <- round((a_q, a_p)/P) mod Q`. `a_p` is consumed as
    /// scratch.
    pub fn mod_down_qp_to_q_ntt(&self, level_q: usize, a_q: &mut Poly, a_p: &mut Poly) {
        let rp = &self.ring_p;
        rp.intt_inplace(a_p);
        self.mod_down_core(level_q, a_q, a_p, true);
    }

    /// As [`Self::mod_down_qp_to_q_ntt`] for coefficient-domain operands.
    pub fn mod_down_qp_to_q(&self, level_q: usize, a_q: &mut Poly, a_p: &mut Poly) {
        self.mod_down_core(level_q, a_q, a_p, false);
    }

    fn mod_down_core(&self, level_q: usize, a_q: &mut Poly, a_p: &mut Poly, ntt: bool) {
        let n = self.ring_q.n();
        let p_count = self.ring_p.max_level() + 1;

        // center for rounding, then y_j = [(x + P/2)·(P/p_j)^{-1}]_{p_j}
        for (j, sp) in self.ring_p.sub_rings()[..p_count].iter().enumerate() {
            let row = a_p.at_mut(j);
            let half = self.p_half_mod_p[j];
            for x in row.iter_mut() {
                *x = mred(
                    cred(*x + half, sp.modulus),
                    self.phat_inv_mont[j],
                    sp.modulus,
                    sp.nu,
                );
            }
        }

        let mut lam = vec![0u64; n];
        for i in 0..=level_q {
            let s = self.ring_q.sub(i);
            let qi = s.modulus;
            let half = self.p_half_mod_q[i];
            for k in 0..n {
                let mut acc: u128 = 0;
                for j in 0..p_count {
                    acc += a_p.at(j)[k] as u128 * self.phat_mod_q[j][i] as u128;
                }
                let v = bred_u128(acc, qi, s.brc);
                lam[k] = cred(v + qi - half, qi);
            }
            if ntt {
                s.ntt(&mut lam);
            }
            let row = a_q.at_mut(i);
            for k in 0..n {
                row[k] = mred(row[k] + 2 * qi - lam[k], self.p_inv_mont_q[i], qi, s.nu);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::ring::RingType;
    use num_bigint::BigInt;

    fn rings() -> (Ring, Ring) {
        let q = Ring::new(64, &[40961, 65537, 114689], RingType::Standard).unwrap();
        let p = Ring::new(64, &[147457], RingType::Standard).unwrap();
        (q, p)
    }

    #[test]
    fn mod_down_divides_by_p() {
        let (rq, rp) = rings();
        let ext = BasisExtender::new(&rq, &rp);
        let p_big = BigInt::from(147457u64);

        // value = v·P + e with |e| small: mod_down should return v (rounded)
        let values: Vec<BigInt> = (0..64i64)
            .map(|i| BigInt::from(i * 31 - 500) * &p_big + BigInt::from((i % 5) - 2))
            .collect();
        let mut aq = rq.new_poly();
        rq.set_coefficients_bigint(&values, &mut aq);
        let mut ap = rp.new_poly();
        rp.set_coefficients_bigint(&values, &mut ap);

        ext.mod_down_qp_to_q(rq.level(), &mut aq, &mut ap);
        let back = rq.poly_to_bigint_centered(&aq, 1);
        for (i, b) in back.iter().enumerate() {
            assert_eq!(*b, BigInt::from(i as i64 * 31 - 500), "coeff {i}");
        }
    }

    #[test]
    fn decompose_lift_is_congruent() {
        let (rq, rp) = rings();
        let ext = BasisExtender::new(&rq, &rp);
        let level = rq.level();

        let mut src = rq.new_poly();
        for (i, s) in rq.sub_rings().iter().enumerate() {
            for (j, x) in src.at_mut(i).iter_mut().enumerate() {
                *x = (j as u64 * 7919 + i as u64) % s.modulus;
            }
        }
        let mut src_ntt = src.clone();
        rq.ntt_inplace(&mut src_ntt);

        for digit in 0..ext.digit_count(level) {
            let mut out_q = rq.new_poly();
            let mut out_p = rp.new_poly();
            ext.decompose_and_split(level, digit, &src_ntt, &src, &mut out_q, &mut out_p);
            rq.intt_inplace(&mut out_q);
            rp.intt_inplace(&mut out_p);

            // the lift must be congruent to the digit residue modulo the
            // group modulus, consistently across every target modulus
            let qg = rq.sub(digit).modulus; // alpha == 1 here
            let lift_q = rq.poly_to_bigint(&out_q, 1);
            let lift_p = rp.poly_to_bigint(&out_p, 1);
            for k in 0..8 {
                let want = BigInt::from(src.at(digit)[k]);
                assert_eq!(&lift_q[k] % qg, &want % qg, "digit {digit} coeff {k}");
                // and the lift is the same small integer in both bases
                assert_eq!(lift_q[k], lift_p[k], "digit {digit} coeff {k}");
                assert!(lift_q[k] < BigInt::from(qg), "lift not small");
            }
        }
    }
}
