//! Evaluation of encoded linear transformations.
//!
//! Both strategies share one hoisted decomposition of the input's c1:
//!
//! - *naive*: every non-zero diagonal costs one hoisted key-switch; the
//!   rotated ciphertexts stay in the P-scaled extended basis and are
//!   multiplied by the diagonal plaintexts there, with a single ModDown at
//!   the end;
//! - *BSGS*: baby rotations are materialized mod Q from the shared
//!   decomposition, inner sums over pre-rotated diagonals are free of
//!   key-switches, and one full automorphism per giant step finishes the
//!   job, cutting rotations from O(d) to O(√d).

use std::collections::BTreeMap;

use crate::ckks::Evaluator;
use crate::error::{Error, Result};
use crate::ring::PolyQP;
use crate::rlwe::{Ciphertext, CiphertextQP, MetaData};

use super::{split_index, LinearTransformation};

/// Evaluates `lt` on `ct`, decomposing c1 once internally.
pub fn evaluate(
    eval: &mut Evaluator,
    ct: &Ciphertext,
    lt: &LinearTransformation,
) -> Result<Ciphertext> {
    let level = ct.level().min(lt.level_q);
    let mut input = ct.clone();
    input.resize_level(level);
    let decomp = eval.decompose_ntt(&input)?;
    evaluate_hoisted(eval, &input, &decomp, lt)
}

/// Evaluates `lt` reusing a pre-computed decomposition of `ct.q[1]`
/// (which must have been taken at `ct.level()`).
pub fn evaluate_hoisted(
    eval: &mut Evaluator,
    ct: &Ciphertext,
    decomp: &[PolyQP],
    lt: &LinearTransformation,
) -> Result<Ciphertext> {
    if ct.degree() != 1 {
        return Err(Error::shape("linear transformations expect degree-1 inputs"));
    }
    if lt.level_q < ct.level() {
        return Err(Error::shape(format!(
            "transformation level {} below ciphertext level {}",
            lt.level_q,
            ct.level()
        )));
    }
    if lt.giant_step > 0 {
        evaluate_bsgs(eval, ct, decomp, lt)
    } else {
        evaluate_naive(eval, ct, decomp, lt)
    }
}

fn evaluate_naive(
    eval: &mut Evaluator,
    ct: &Ciphertext,
    decomp: &[PolyQP],
    lt: &LinearTransformation,
) -> Result<Ciphertext> {
    let params = eval.params().clone();
    let level = ct.level();
    let n = params.n();
    let rq = params.ring_q().at_level(level);
    let rp = params
        .ring_p()
        .ok_or_else(|| Error::shape("linear transformations require P"))?
        .clone();
    let level_p = params.max_level_p().unwrap();

    // c0·P, so the extended-basis accumulator stays homogeneous
    let p_mont = eval.rlwe.p_mod_q_mont(level);
    let mut c0p = ct.q[0].clone();
    c0p.resize(level);
    rq.mul_scalar_montgomery_inplace(&mut c0p, &p_mont);

    let mut acc = CiphertextQP::new(n, level, Some(level_p));
    let mut rot = CiphertextQP::new(n, level, Some(level_p));
    let mut rot_auto = CiphertextQP::new(n, level, Some(level_p));

    let mut keys: Vec<i64> = lt.vec.keys().copied().collect();
    keys.sort_unstable();

    for &k in &keys {
        if k == 0 {
            continue;
        }
        let pt = &lt.vec[&k];
        let gal = params.galois_element(k);
        let gk = eval.rlwe.keys().galois_key(gal)?;
        eval.rlwe
            .gadget_product_hoisted_lazy_acc(level, decomp, &gk.gct, &mut rot, true)?;
        rq.add_assign(&mut rot.q[0], &c0p);

        for c in 0..2 {
            eval.rlwe
                .automorphism_poly_ntt(&rq, &rot.q[c], gal, &mut rot_auto.q[c]);
            eval.rlwe.automorphism_poly_ntt(
                &rp,
                &rot.p.as_ref().unwrap()[c],
                gal,
                &mut rot_auto.p.as_mut().unwrap()[c],
            );
        }

        for c in 0..2 {
            rq.mul_coeffs_montgomery_then_add(&rot_auto.q[c], &pt.q, &mut acc.q[c]);
            rp.mul_coeffs_montgomery_then_add(
                &rot_auto.p.as_ref().unwrap()[c],
                pt.p.as_ref().unwrap(),
                &mut acc.p.as_mut().unwrap()[c],
            );
        }
    }

    let ext = eval.rlwe.basis_extender().unwrap().clone();
    let p_acc = acc.p.as_mut().unwrap();
    ext.mod_down_qp_to_q_ntt(level, &mut acc.q[0], &mut p_acc[0]);
    ext.mod_down_qp_to_q_ntt(level, &mut acc.q[1], &mut p_acc[1]);

    let mut out = Ciphertext::new(params.ring_q(), 1, level, ct.meta);
    out.q[0].copy_at_level(level, &acc.q[0]);
    out.q[1].copy_at_level(level, &acc.q[1]);

    // diagonal 0 needs no rotation: multiply in basis Q directly
    if let Some(pt0) = lt.vec.get(&0) {
        let mut t = rq.new_poly();
        for c in 0..2 {
            rq.mul_coeffs_montgomery(&ct.q[c], &pt0.q, &mut t);
            rq.add_assign(&mut out.q[c], &t);
        }
    }

    out.meta.scale = ct.meta.scale * lt.meta.scale;
    Ok(out)
}

fn evaluate_bsgs(
    eval: &mut Evaluator,
    ct: &Ciphertext,
    decomp: &[PolyQP],
    lt: &LinearTransformation,
) -> Result<Ciphertext> {
    let params = eval.params().clone();
    let level = ct.level();
    let slots = params.max_slots() as i64;
    let rq = params.ring_q().at_level(level);
    let g = lt.giant_step;

    // group diagonals by giant component
    let mut groups: BTreeMap<i64, Vec<(i64, i64)>> = BTreeMap::new();
    for &k in lt.vec.keys() {
        let (i, j) = split_index(k, g, slots);
        groups.entry(j).or_default().push((k, i));
    }

    // baby rotations, all from the shared decomposition
    let mut babies: BTreeMap<i64, Ciphertext> = BTreeMap::new();
    for items in groups.values() {
        for &(_, i) in items {
            if babies.contains_key(&i) {
                continue;
            }
            let b = if i == 0 {
                ct.clone()
            } else {
                let mut out = ct.clone();
                eval.rotate_hoisted(ct, decomp, i, &mut out)?;
                out
            };
            babies.insert(i, b);
        }
    }

    let scale = ct.meta.scale * lt.meta.scale;
    let mut out: Option<Ciphertext> = None;
    for (&j, items) in &groups {
        let mut meta = MetaData::new(scale, params.log_max_slots());
        meta.is_ntt = true;
        let mut inner = Ciphertext::new(params.ring_q(), 1, level, meta);
        for &(k, i) in items {
            let pt = &lt.vec[&k];
            let baby = &babies[&i];
            for c in 0..2 {
                rq.mul_coeffs_montgomery_then_add(&baby.q[c], &pt.q, &mut inner.q[c]);
            }
        }
        let contribution = if j == 0 {
            inner
        } else {
            let mut rotated = inner.clone();
            let gal = params.galois_element(j);
            eval.rlwe.automorphism(&inner, gal, &mut rotated)?;
            rotated
        };
        match out.as_mut() {
            None => out = Some(contribution),
            Some(o) => eval.add_inplace(o, &contribution)?,
        }
    }

    let mut out = out.ok_or_else(|| Error::shape("empty linear transformation"))?;
    out.meta.scale = scale;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::ckks::Evaluator;
    use crate::lintrans::{Diagonals, LinearTransformation, LinearTransformationParameters};
    use crate::params::{Params, ParametersLiteral};
    use crate::ring::{RingType, Source};
    use crate::rlwe::{
        Decryptor, Encryptor, KeyGenerator, MemEvaluationKeySet, MetaData, Plaintext,
    };

    use super::*;

    fn params() -> Params {
        Params::from_literal(ParametersLiteral {
            log_n: 6,
            log_q: vec![50, 40, 40],
            log_p: vec![51],
            log_default_scale: 40,
            ring_type: RingType::ConjugateInvariant,
            xs_hamming_weight: 16,
            xe_sigma: 3.2,
        })
        .unwrap()
    }

    fn random_diagonals(slots: usize, indexes: &[i64]) -> Diagonals<f64> {
        let mut d = Diagonals::new();
        for (t, &k) in indexes.iter().enumerate() {
            let v: Vec<f64> = (0..slots)
                .map(|i| (((i * 31 + t * 17 + 7) % 13) as f64 - 6.0) / 13.0)
                .collect();
            d.insert(k, slots, v);
        }
        d
    }

    fn apply_plain(d: &Diagonals<f64>, v: &[f64]) -> Vec<f64> {
        let slots = v.len();
        let mut out = vec![0.0; slots];
        for (&k, diag) in &d.0 {
            let rot = crate::lintrans::rotate_slots(v, k);
            for i in 0..slots {
                out[i] += diag[i] * rot[i];
            }
        }
        out
    }

    fn run_case(naive: bool) {
        let p = params();
        let slots = p.max_slots();
        let mut kgen = KeyGenerator::with_source(p.clone(), Source::new([31u8; 32]));
        let sk = kgen.gen_secret_key();
        let mut enc = Encryptor::with_source(p.clone(), &sk, Source::new([32u8; 32]));
        let dec = Decryptor::new(p.clone(), &sk);
        let mut eval = Evaluator::new(p.clone(), Arc::new(MemEvaluationKeySet::new()));

        let indexes: Vec<i64> = vec![0, 1, 2, 5, (slots as i64) - 3];
        let diags = random_diagonals(slots, &indexes);
        let scale = p.q()[p.max_level()] as f64;
        let lt = LinearTransformation::encode(
            &mut eval.encoder,
            &diags,
            &LinearTransformationParameters {
                indexes: indexes.clone(),
                level_q: p.max_level(),
                scale,
                giant_step: if naive { -1 } else { 0 },
            },
        )
        .unwrap();

        let mut keys = MemEvaluationKeySet::new();
        for gal in lt.galois_elements(&p) {
            keys.insert_galois(kgen.gen_galois_key(gal, &sk));
        }
        eval.set_keys(Arc::new(keys));

        let values: Vec<f64> = (0..slots).map(|i| ((i % 7) as f64 - 3.0) / 7.0).collect();
        let mut pt = Plaintext::new(
            p.ring_q(),
            p.max_level(),
            MetaData::new(p.default_scale(), p.log_max_slots()),
        );
        eval.encoder.encode(&values, &mut pt).unwrap();
        let ct = enc.encrypt_new(&pt).unwrap();

        let mut out = evaluate(&mut eval, &ct, &lt).unwrap();
        eval.rescale_inplace(&mut out).unwrap();

        let want = apply_plain(&diags, &values);
        let got_pt = dec.decrypt_new(&out);
        let mut got = vec![0f64; slots];
        eval.encoder.decode(&got_pt, &mut got).unwrap();
        for i in 0..slots {
            assert!(
                (want[i] - got[i]).abs() < 1e-4,
                "naive={naive} slot {i}: want {} got {}",
                want[i],
                got[i]
            );
        }
    }

    #[test]
    fn naive_evaluation_matches_plain() {
        run_case(true);
    }

    #[test]
    fn bsgs_evaluation_matches_plain() {
        run_case(false);
    }
}
