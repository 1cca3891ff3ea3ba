//! CKKS layer: slot encoding, scale-managed evaluation and ciphertext
//! polynomial evaluation.

pub mod encoder;
pub mod evaluator;
pub mod polynomial;

pub use encoder::{Encoder, SlotValue};
pub use evaluator::{scales_close, signed_residue, Evaluator};
pub use polynomial::{
    chebyshev_approximate, cheb_eval, composite_eval, evaluate_polynomial,
    evaluate_polynomial_vector, MinimaxCompositePolynomial, Polynomial, PolynomialVector,
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::params::{Params, ParametersLiteral};
    use crate::ring::{RingType, Source};
    use crate::rlwe::{
        Decryptor, Encryptor, KeyGenerator, MemEvaluationKeySet, MetaData, Plaintext, SecretKey,
    };

    use super::*;

    fn params(ring_type: RingType) -> Params {
        Params::from_literal(ParametersLiteral {
            log_n: 8,
            log_q: vec![55, 45, 45, 45, 45, 45, 45],
            log_p: vec![56],
            log_default_scale: 45,
            ring_type,
            xs_hamming_weight: 64,
            xe_sigma: 3.2,
        })
        .unwrap()
    }

    struct Ctx {
        params: Params,
        enc: Encryptor,
        dec: Decryptor,
        eval: Evaluator,
        sk: SecretKey,
        kgen: KeyGenerator,
    }

    fn setup(ring_type: RingType, rotations: &[i64]) -> Ctx {
        let p = params(ring_type);
        let mut kgen = KeyGenerator::with_source(p.clone(), Source::new([5u8; 32]));
        let sk = kgen.gen_secret_key();
        let mut keys = MemEvaluationKeySet::new();
        keys.set_relinearization(kgen.gen_relinearization_key(&sk));
        for &k in rotations {
            keys.insert_galois(kgen.gen_galois_key(p.galois_element(k), &sk));
        }
        let eval = Evaluator::new(p.clone(), Arc::new(keys));
        Ctx {
            enc: Encryptor::with_source(p.clone(), &sk, Source::new([6u8; 32])),
            dec: Decryptor::new(p.clone(), &sk),
            eval,
            sk,
            kgen,
            params: p,
        }
    }

    fn encrypt(ctx: &mut Ctx, values: &[f64]) -> crate::rlwe::Ciphertext {
        let p = &ctx.params;
        let mut pt = Plaintext::new(
            p.ring_q(),
            p.max_level(),
            MetaData::new(p.default_scale(), p.log_max_slots()),
        );
        ctx.eval.encoder.encode(values, &mut pt).unwrap();
        ctx.enc.encrypt_new(&pt).unwrap()
    }

    fn decrypt(ctx: &mut Ctx, ct: &crate::rlwe::Ciphertext) -> Vec<f64> {
        let pt = ctx.dec.decrypt_new(ct);
        let mut out = vec![0f64; ctx.params.max_slots()];
        ctx.eval.encoder.decode(&pt, &mut out).unwrap();
        out
    }

    fn assert_close(want: &[f64], got: &[f64], tol: f64, what: &str) {
        for i in 0..want.len() {
            assert!(
                (want[i] - got[i]).abs() < tol,
                "{what} slot {i}: want {} got {} (err {:.3e})",
                want[i],
                got[i],
                (want[i] - got[i]).abs()
            );
        }
    }

    #[test]
    fn encrypt_decrypt_within_noise() {
        for rt in [RingType::Standard, RingType::ConjugateInvariant] {
            let mut ctx = setup(rt, &[]);
            let n = ctx.params.max_slots();
            let values: Vec<f64> = (1..=n).map(|i| i as f64 / 10.0).collect();
            let ct = encrypt(&mut ctx, &values);
            let out = decrypt(&mut ctx, &ct);
            // max error < 2^-30
            assert_close(&values, &out, 2f64.powi(-30), "enc/dec");
        }
    }

    #[test]
    fn rescale_drops_level_and_scale() {
        let mut ctx = setup(RingType::Standard, &[]);
        let values = vec![0.5f64; ctx.params.max_slots()];
        let mut ct = encrypt(&mut ctx, &values);
        let level = ct.level();
        let q_last = ctx.params.q()[level] as f64;
        ctx.eval.scale_up_modulus(&mut ct);
        ctx.eval.rescale_inplace(&mut ct).unwrap();
        assert_eq!(ct.level(), level - 1);
        assert!(scales_close(
            ct.scale(),
            ctx.params.default_scale() * q_last / q_last
        ));
        let out = decrypt(&mut ctx, &ct);
        assert_close(&values, &out, 1e-8, "rescale");
    }

    #[test]
    fn mul_relin_rescale_is_slotwise_product() {
        for rt in [RingType::Standard, RingType::ConjugateInvariant] {
            let mut ctx = setup(rt, &[]);
            let n = ctx.params.max_slots();
            let a: Vec<f64> = (0..n).map(|i| 0.01 * i as f64 - 0.7).collect();
            let b: Vec<f64> = (0..n).map(|i| 1.5 - 0.005 * i as f64).collect();
            let ca = encrypt(&mut ctx, &a);
            let cb = encrypt(&mut ctx, &b);
            let mut prod = ctx.eval.mul_relin_new(&ca, &cb).unwrap();
            ctx.eval.rescale_inplace(&mut prod).unwrap();
            let want: Vec<f64> = a.iter().zip(&b).map(|(x, y)| x * y).collect();
            let got = decrypt(&mut ctx, &prod);
            assert_close(&want, &got, 1e-6, "mul");
        }
    }

    #[test]
    fn mul_at_level_zero_is_range_error() {
        let mut ctx = setup(RingType::Standard, &[]);
        let values = vec![0.25f64; ctx.params.max_slots()];
        let mut ct = encrypt(&mut ctx, &values);
        ct.resize_level(0);
        let err = ctx.eval.mul_new(&ct.clone(), &ct).unwrap_err();
        assert!(matches!(err, crate::error::Error::Range { .. }));
        // additions still work at level zero
        let mut sum = ct.clone();
        ctx.eval.add_inplace(&mut sum, &ct).unwrap();
        let got = decrypt(&mut ctx, &sum);
        assert!((got[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn rotation_shifts_slots() {
        for rt in [RingType::Standard, RingType::ConjugateInvariant] {
            let mut ctx = setup(rt, &[3]);
            let n = ctx.params.max_slots();
            let values: Vec<f64> = (1..=n).map(|i| i as f64).collect();
            let ct = encrypt(&mut ctx, &values);
            let rotated = ctx.eval.rotate_new(&ct, 3).unwrap();
            let got = decrypt(&mut ctx, &rotated);
            let want: Vec<f64> = (0..n).map(|i| values[(i + 3) % n]).collect();
            assert_close(&want, &got, 1e-6, "rotate");
        }
    }

    #[test]
    fn inner_sum_reduces_blocks() {
        // n = 5 exercises the non-power-of-two schedule
        let mut ctx = setup(RingType::Standard, &[1, 2, 3, 4, 6, 12, 24]);
        let slots = ctx.params.max_slots();
        let values: Vec<f64> = (0..slots).map(|i| (i % 5) as f64 + 1.0).collect();
        let ct = encrypt(&mut ctx, &values);
        let mut summed = ct.clone();
        ctx.eval.inner_sum(&mut summed, 1, 5).unwrap();
        let got = decrypt(&mut ctx, &summed);
        // slot j holds sum of values[j..j+5]
        for j in 0..slots - 5 {
            let want: f64 = (0..5).map(|i| values[j + i]).sum();
            assert!((got[j] - want).abs() < 1e-5, "slot {j}: {} vs {want}", got[j]);
        }
    }

    #[test]
    fn replicate_broadcasts() {
        let mut ctx = setup(RingType::Standard, &[-1, -2, -4]);
        let slots = ctx.params.max_slots();
        let mut values = vec![0f64; slots];
        for j in (0..slots).step_by(4) {
            values[j] = (j / 4) as f64 + 1.0;
        }
        let ct = encrypt(&mut ctx, &values);
        let mut rep = ct.clone();
        ctx.eval.replicate(&mut rep, 1, 4).unwrap();
        let got = decrypt(&mut ctx, &rep);
        for j in 0..slots {
            let want = values[j - (j % 4)];
            assert!((got[j] - want).abs() < 1e-5, "slot {j}");
        }
    }

    #[test]
    fn polynomial_evaluation_matches_scalar() {
        let mut ctx = setup(RingType::Standard, &[]);
        let n = ctx.params.max_slots();
        // exp over [-1, 1], degree 15: depth 4
        let poly = chebyshev_approximate(f64::exp, -1.0, 1.0, 15);
        let values: Vec<f64> = (0..n).map(|i| -1.0 + 2.0 * i as f64 / n as f64).collect();
        let ct = encrypt(&mut ctx, &values);
        let out = evaluate_polynomial(&mut ctx.eval, &ct, &poly, ctx.params.default_scale()).unwrap();
        assert_eq!(out.level(), ct.level() - poly.depth());
        let got = decrypt(&mut ctx, &out);
        let want: Vec<f64> = values.iter().map(|&x| x.exp()).collect();
        assert_close(&want, &got, 1e-4, "poly");
    }

    #[test]
    fn polynomial_vector_dispatches_per_slot() {
        let mut ctx = setup(RingType::Standard, &[]);
        let n = ctx.params.max_slots();
        let p0 = chebyshev_approximate(|x| x * x, -1.0, 1.0, 7);
        let p1 = chebyshev_approximate(|x| 1.0 - x, -1.0, 1.0, 7);
        let mapping: Vec<usize> = (0..n).map(|i| i % 2).collect();
        let pv = PolynomialVector::new(vec![p0, p1], mapping.clone()).unwrap();
        let values: Vec<f64> = (0..n).map(|i| -0.9 + 1.8 * i as f64 / n as f64).collect();
        let ct = encrypt(&mut ctx, &values);
        let out =
            evaluate_polynomial_vector(&mut ctx.eval, &ct, &pv, ctx.params.default_scale()).unwrap();
        let got = decrypt(&mut ctx, &out);
        for i in 0..n {
            let x = values[i];
            let want = if mapping[i] == 0 { x * x } else { 1.0 - x };
            assert!(
                (got[i] - want).abs() < 1e-4,
                "slot {i}: want {want} got {}",
                got[i]
            );
        }
    }

    #[test]
    fn set_scale_aligns_operands() {
        let mut ctx = setup(RingType::Standard, &[]);
        let n = ctx.params.max_slots();
        let values: Vec<f64> = (0..n).map(|i| 0.001 * i as f64).collect();
        let mut ct = encrypt(&mut ctx, &values);
        let target = ctx.params.default_scale() * 1.5;
        ctx.eval.set_scale(&mut ct, target).unwrap();
        assert_eq!(ct.scale(), target);
        let got = decrypt(&mut ctx, &ct);
        assert_close(&values, &got, 1e-6, "set_scale");
    }

    #[test]
    fn serialization_of_secret_key_is_stable() {
        let ctx = setup(RingType::Standard, &[]);
        let bytes = crate::io::to_bytes(&ctx.sk).unwrap();
        let back: SecretKey = crate::io::from_bytes(&bytes).unwrap();
        assert_eq!(ctx.sk.q, back.q);
        assert_eq!(ctx.sk.p, back.p);
        let _ = &ctx.kgen;
    }
}
