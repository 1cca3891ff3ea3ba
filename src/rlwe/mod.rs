//! RLWE layer: ciphertexts, keys, encryption and the key-switching
//! evaluator.

pub mod ciphertext;
pub mod encryptor;
pub mod evaluator;
pub mod keygen;
pub mod keys;

pub use ciphertext::{Ciphertext, LogDimensions, MetaData, Plaintext};
pub use encryptor::{Decryptor, Encryptor};
pub use evaluator::{CiphertextQP, Evaluator};
pub use keygen::KeyGenerator;
pub use keys::{
    DigitDecomposition, DigitDecompositionType, EvaluationKey, EvaluationKeySet, GadgetCiphertext,
    GaloisKey, MemEvaluationKeySet, NoKeys, RelinearizationKey, SecretKey,
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use num_bigint::BigInt;

    use crate::params::{Params, ParametersLiteral};
    use crate::ring::{RingType, Source};

    use super::*;

    fn params() -> Params {
        Params::from_literal(ParametersLiteral {
            log_n: 6,
            log_q: vec![45, 38, 38],
            log_p: vec![46],
            log_default_scale: 38,
            ring_type: RingType::Standard,
            xs_hamming_weight: 16,
            xe_sigma: 3.2,
        })
        .unwrap()
    }

    fn encode_coeffs(p: &Params, values: &[i64], scale: f64) -> Plaintext {
        let rq = p.ring_q();
        let big: Vec<BigInt> = values
            .iter()
            .map(|&v| BigInt::from((v as f64 * scale).round() as i64))
            .collect();
        let mut pt = Plaintext::new(rq, p.max_level(), MetaData::new(scale, p.log_max_slots()));
        rq.set_coefficients_bigint(&big, &mut pt.poly);
        rq.ntt_inplace(&mut pt.poly);
        pt
    }

    fn decode_coeffs(p: &Params, pt: &Plaintext) -> Vec<f64> {
        let rq = p.ring_q().at_level(pt.level());
        let mut poly = pt.poly.clone();
        rq.intt_inplace(&mut poly);
        rq.poly_to_bigint_centered(&poly, 1)
            .into_iter()
            .map(|b| bigint_to_f64(&b) / pt.meta.scale)
            .collect()
    }

    fn bigint_to_f64(b: &BigInt) -> f64 {
        // exact enough for test tolerances
        let s = b.to_string();
        s.parse::<f64>().unwrap()
    }

    fn setup() -> (Params, SecretKey, Encryptor, Decryptor, KeyGenerator) {
        let p = params();
        let mut kgen = KeyGenerator::with_source(p.clone(), Source::new([9u8; 32]));
        let sk = kgen.gen_secret_key();
        let enc = Encryptor::with_source(p.clone(), &sk, Source::new([10u8; 32]));
        let dec = Decryptor::new(p.clone(), &sk);
        (p, sk, enc, dec, kgen)
    }

    #[test]
    fn encrypt_decrypt_coefficients() {
        let (p, _sk, mut enc, dec, _) = setup();
        let values: Vec<i64> = (0..64).map(|i| (i % 17) - 8).collect();
        let pt = encode_coeffs(&p, &values, p.default_scale());
        let ct = enc.encrypt_new(&pt).unwrap();
        let out = decode_coeffs(&p, &dec.decrypt_new(&ct));
        for (i, (&want, got)) in values.iter().zip(out.iter()).enumerate() {
            assert!(
                (want as f64 - got).abs() < 1e-6,
                "coeff {i}: want {want} got {got}"
            );
        }
    }

    #[test]
    fn automorphism_matches_plaintext_map() {
        let (p, sk, mut enc, dec, mut kgen) = setup();
        let gal_el = 5u64;
        let mut keys = MemEvaluationKeySet::new();
        keys.insert_galois(kgen.gen_galois_key(gal_el, &sk));
        let mut eval = Evaluator::new(p.clone(), Arc::new(keys));

        let values: Vec<i64> = (0..64).map(|i| (i % 11) - 5).collect();
        let pt = encode_coeffs(&p, &values, p.default_scale());
        let ct = enc.encrypt_new(&pt).unwrap();

        let mut out = ct.clone();
        eval.automorphism(&ct, gal_el, &mut out).unwrap();

        // expected: automorphism applied to the plaintext polynomial
        let rq = p.ring_q();
        let mut expected = pt.poly.clone();
        rq.intt_inplace(&mut expected);
        let mut mapped = rq.new_poly();
        rq.automorphism(&expected, gal_el, &mut mapped);
        rq.ntt_inplace(&mut mapped);
        let want = decode_coeffs(
            &p,
            &Plaintext {
                poly: mapped,
                meta: pt.meta,
            },
        );

        let got = decode_coeffs(&p, &dec.decrypt_new(&out));
        for i in 0..64 {
            assert!(
                (want[i] - got[i]).abs() < 1e-5,
                "coeff {i}: want {} got {}",
                want[i],
                got[i]
            );
        }
    }

    #[test]
    fn automorphism_without_key_reports_missing() {
        let (p, _sk, mut enc, _dec, _) = setup();
        let mut eval = Evaluator::new(p.clone(), Arc::new(NoKeys));
        let pt = encode_coeffs(&p, &[1i64; 64], p.default_scale());
        let ct = enc.encrypt_new(&pt).unwrap();
        let mut out = ct.clone();
        let err = eval.automorphism(&ct, 5, &mut out).unwrap_err();
        assert!(matches!(err, crate::error::Error::KeyMissing(_)));
    }

    #[test]
    fn tensor_then_relinearize() {
        let (p, sk, mut enc, dec, mut kgen) = setup();
        let mut keys = MemEvaluationKeySet::new();
        keys.set_relinearization(kgen.gen_relinearization_key(&sk));
        let mut eval = Evaluator::new(p.clone(), Arc::new(keys));

        // m1 = 2 + X, m2 = 3: product = 6 + 3X
        let mut v1 = vec![0i64; 64];
        v1[0] = 2;
        v1[1] = 1;
        let mut v2 = vec![0i64; 64];
        v2[0] = 3;
        let scale = p.default_scale();
        let ct1 = enc.encrypt_new(&encode_coeffs(&p, &v1, scale)).unwrap();
        let ct2 = enc.encrypt_new(&encode_coeffs(&p, &v2, scale)).unwrap();

        // tensor product (degree 2)
        let rq = p.ring_q();
        let mut prod = Ciphertext::new(rq, 2, p.max_level(), ct1.meta);
        prod.meta.scale = scale * scale;
        rq.mul_coeffs_barrett(&ct1.q[0], &ct2.q[0], &mut prod.q[0]);
        let mut t = rq.new_poly();
        rq.mul_coeffs_barrett(&ct1.q[0], &ct2.q[1], &mut prod.q[1]);
        rq.mul_coeffs_barrett(&ct1.q[1], &ct2.q[0], &mut t);
        rq.add_assign(&mut prod.q[1], &t);
        rq.mul_coeffs_barrett(&ct1.q[1], &ct2.q[1], &mut prod.q[2]);

        eval.relinearize(&mut prod).unwrap();
        assert_eq!(prod.degree(), 1);

        let out = decode_coeffs(&p, &dec.decrypt_new(&prod));
        assert!((out[0] - 6.0).abs() < 1e-4, "got {}", out[0]);
        assert!((out[1] - 3.0).abs() < 1e-4, "got {}", out[1]);
        for (i, &x) in out.iter().enumerate().skip(2) {
            assert!(x.abs() < 1e-4, "coeff {i} = {x}");
        }
    }

    #[test]
    fn hoisted_automorphism_agrees_with_plain() {
        let (p, sk, mut enc, dec, mut kgen) = setup();
        let g1 = p.galois_element(1);
        let g2 = p.galois_element(2);
        let mut keys = MemEvaluationKeySet::new();
        keys.insert_galois(kgen.gen_galois_key(g1, &sk));
        keys.insert_galois(kgen.gen_galois_key(g2, &sk));
        let mut eval = Evaluator::new(p.clone(), Arc::new(keys));

        let values: Vec<i64> = (0..64).map(|i| (i % 5) - 2).collect();
        let ct = enc
            .encrypt_new(&encode_coeffs(&p, &values, p.default_scale()))
            .unwrap();

        let decomp = eval.decompose_ntt(ct.level(), &ct.q[1]).unwrap();
        for g in [g1, g2] {
            let mut plain = ct.clone();
            let mut hoisted = ct.clone();
            eval.automorphism(&ct, g, &mut plain).unwrap();
            eval.automorphism_hoisted(&ct, &decomp, g, &mut hoisted).unwrap();
            let a = decode_coeffs(&p, &dec.decrypt_new(&plain));
            let b = decode_coeffs(&p, &dec.decrypt_new(&hoisted));
            for i in 0..64 {
                assert!((a[i] - b[i]).abs() < 1e-5, "g={g} coeff {i}");
            }
        }
    }

    #[test]
    fn digit_decomposition_gadget_without_p() {
        // no auxiliary basis: the signed power-of-two decomposition keeps
        // the key-switch noise bounded
        let p = Params::from_literal(ParametersLiteral {
            log_n: 6,
            log_q: vec![45, 38, 38],
            log_p: vec![],
            log_default_scale: 38,
            ring_type: RingType::Standard,
            xs_hamming_weight: 16,
            xe_sigma: 3.2,
        })
        .unwrap();
        let mut kgen = KeyGenerator::with_source(p.clone(), Source::new([21u8; 32]));
        let sk = kgen.gen_secret_key();
        let mut enc = Encryptor::with_source(p.clone(), &sk, Source::new([22u8; 32]));
        let dec = Decryptor::new(p.clone(), &sk);

        let dd = DigitDecomposition {
            kind: DigitDecompositionType::Signed,
            log2_basis: 13,
        };
        let mut keys = MemEvaluationKeySet::new();
        keys.insert_galois(kgen.gen_galois_key_with(5, &sk, dd));
        let mut eval = Evaluator::new(p.clone(), Arc::new(keys));

        let values: Vec<i64> = (0..64).map(|i| (i % 7) - 3).collect();
        let pt = encode_coeffs(&p, &values, p.default_scale());
        let ct = enc.encrypt_new(&pt).unwrap();
        let mut out = ct.clone();
        eval.automorphism(&ct, 5, &mut out).unwrap();

        let rq = p.ring_q();
        let mut expected = pt.poly.clone();
        rq.intt_inplace(&mut expected);
        let mut mapped = rq.new_poly();
        rq.automorphism(&expected, 5, &mut mapped);
        rq.ntt_inplace(&mut mapped);
        let want = decode_coeffs(
            &p,
            &Plaintext {
                poly: mapped,
                meta: pt.meta,
            },
        );
        let got = decode_coeffs(&p, &dec.decrypt_new(&out));
        for i in 0..64 {
            assert!(
                (want[i] - got[i]).abs() < 1e-3,
                "coeff {i}: want {} got {}",
                want[i],
                got[i]
            );
        }
    }

    #[test]
    fn key_switch_to_fresh_secret() {
        let (p, sk, mut enc, _dec, mut kgen) = setup();
        let sk2 = kgen.gen_secret_key();
        let evk = kgen.gen_evaluation_key(&sk, &sk2);
        let mut eval = Evaluator::new(p.clone(), Arc::new(MemEvaluationKeySet::new()));

        let values: Vec<i64> = (0..64).map(|i| (i % 9) - 4).collect();
        let ct = enc
            .encrypt_new(&encode_coeffs(&p, &values, p.default_scale()))
            .unwrap();
        let mut switched = ct.clone();
        eval.apply_evaluation_key(&ct, &evk, &mut switched).unwrap();

        // decrypts under the new secret, not the old one
        let dec2 = Decryptor::new(p.clone(), &sk2);
        let got = decode_coeffs(&p, &dec2.decrypt_new(&switched));
        for i in 0..64 {
            assert!(
                (values[i] as f64 - got[i]).abs() < 1e-5,
                "coeff {i}: want {} got {}",
                values[i],
                got[i]
            );
        }
    }

    #[test]
    fn gadget_level_p_disables_digit_decomposition() {
        // with P >= 1 prime, a requested digit decomposition is ignored
        let (p, sk, _enc, _dec, mut kgen) = setup();
        let dd = DigitDecomposition {
            kind: DigitDecompositionType::Signed,
            log2_basis: 13,
        };
        let gk = kgen.gen_galois_key_with(5, &sk, dd);
        assert_eq!(gk.gct.dd.kind, DigitDecompositionType::None);
        assert_eq!(gk.gct.base2_digits(), 1);
        let _ = p;
    }
}
