//! Non-linear layers: ReLU, approximate maxima, SoftMax and LayerNorm.

pub mod innermax;
pub mod norm;
pub mod relu;
pub mod softmax;

pub use innermax::{inner_max, InnerMaxParameters};
pub use norm::{evaluate_norm, inv_sqrt, NormParameters};
pub use relu::{evaluate_relu, step, ReluParameters};
pub use softmax::{evaluate_softmax, SoftMaxParameters};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::bootstrap::{Bootstrapper, PooledBootstrapper};
    use crate::keycache::KeyManager;
    use crate::matrix::MatrixEvaluator;
    use crate::params::{Params, ParametersLiteral};
    use crate::ring::{RingType, Source};
    use crate::rlwe::{KeyGenerator, SecretKey};

    use super::*;

    fn sign_coeffs() -> Vec<Vec<f64>> {
        vec![vec![
            0.0, 1.27020217932, 0.0, -0.41513217792, 0.0, 0.23969221445, 0.0, -0.16067723908, 0.0,
            0.11530467170, 0.0, -0.08537291689, 0.0, 0.06375404757, 0.0, -0.10285141221,
        ]]
    }

    struct Ctx {
        params: Params,
        sk: SecretKey,
        eval: MatrixEvaluator,
        km: Arc<KeyManager>,
        btp: PooledBootstrapper,
        enc: crate::matrix::Encryptor,
        dec: crate::matrix::Decryptor,
    }

    fn setup(dims: usize) -> Ctx {
        let params = Params::from_literal(ParametersLiteral {
            log_n: 7,
            log_q: vec![55, 45, 45, 45, 45, 45, 45, 45, 45],
            log_p: vec![56],
            log_default_scale: 45,
            ring_type: RingType::ConjugateInvariant,
            xs_hamming_weight: 32,
            xe_sigma: 3.2,
        })
        .unwrap();
        let mut kgen = KeyGenerator::with_source(params.clone(), Source::new([41u8; 32]));
        let sk = kgen.gen_secret_key();
        let km = Arc::new(KeyManager::new(2, params.clone(), 128, &sk));
        let eval = MatrixEvaluator::new(params.clone(), dims, 2, km.clone());
        let btp = PooledBootstrapper::dummy(2, &params, &sk, params.max_level());
        Ctx {
            enc: crate::matrix::Encryptor::new(params.clone(), &sk),
            dec: crate::matrix::Decryptor::new(params.clone(), &sk),
            params,
            sk,
            eval,
            km,
            btp,
        }
    }

    fn encrypt_values(ctx: &mut Ctx, values: &[f64]) -> crate::rlwe::Ciphertext {
        let m = crate::matrix::Dense::new(1, values.len(), values.to_vec());
        ctx.enc.encrypt_new(&[m], 0, 1).unwrap().remove(0)
    }

    fn decrypt_values(ctx: &mut Ctx, ct: &crate::rlwe::Ciphertext, n: usize) -> Vec<f64> {
        let m = ctx
            .dec
            .decrypt_new(std::slice::from_ref(ct), 1, n, 0, 1)
            .unwrap();
        m[0].data().to_vec()
    }

    #[test]
    fn encrypted_relu_matches_reference() {
        let mut ctx = setup(4);
        let slots = ctx.params.max_slots();
        let values: Vec<f64> = (0..slots)
            .map(|i| -0.95 + 1.9 * i as f64 / slots as f64)
            .collect();
        let ct = encrypt_values(&mut ctx, &values);
        let mut cts = vec![ct];

        let relu_params = ReluParameters {
            coeffs: sign_coeffs(),
            abs_max: 1.0,
        };
        evaluate_relu(&mut ctx.eval, &mut ctx.btp, &relu_params, &mut cts).unwrap();

        let mut want = values.clone();
        relu::relu_approximate(&sign_coeffs(), &mut want);
        let got = decrypt_values(&mut ctx, &cts[0], slots);
        for i in 0..slots {
            assert!(
                (want[i] - got[i]).abs() < 2e-2,
                "slot {i}: want {} got {}",
                want[i],
                got[i]
            );
        }
        let _ = &ctx.sk;
    }

    #[test]
    fn encrypted_inner_max_matches_reference() {
        let k = 4usize;
        let mut ctx = setup(k);
        let slots = ctx.params.max_slots();
        let p = InnerMaxParameters {
            abs_max: 8.0,
            coeffs: sign_coeffs(),
        };
        ctx.km
            .load_galois_keys(&softmax::inner_max_galois_elements(&ctx.params, k, 2))
            .unwrap();

        // two array elements with distinct block maxima
        let v1: Vec<f64> = (0..slots).map(|i| ((i * 5 + 1) % 7) as f64 - 3.0).collect();
        let v2: Vec<f64> = (0..slots).map(|i| ((i * 3 + 2) % 6) as f64 - 2.0).collect();
        let cts = vec![
            encrypt_values(&mut ctx, &v1),
            encrypt_values(&mut ctx, &v2),
        ];

        let maxes = inner_max(&mut ctx.eval, &mut ctx.btp, &p, cts, k).unwrap();
        assert_eq!(maxes.len(), 2);

        for (want_src, ct) in [(&v1, &maxes[0]), (&v2, &maxes[1])] {
            let mut want = want_src.clone();
            innermax::inner_max_plaintext(&p, &mut want, k);
            let got = decrypt_values(&mut ctx, ct, slots);
            for base in (0..slots).step_by(k) {
                assert!(
                    (want[base] - got[base]).abs() < 0.2,
                    "block {base}: want {} got {}",
                    want[base],
                    got[base]
                );
            }
        }
    }

    #[test]
    fn encrypted_softmax_matches_reference() {
        let k = 4usize;
        let mut ctx = setup(k);
        let slots = ctx.params.max_slots();
        let p = SoftMaxParameters {
            exp_offset: 0.0,
            exp_min: -16.0,
            exp_max: 2.0,
            exp_deg: 15,
            inv_min: 0.5,
            inv_max: 8.0,
            inv_deg: 15,
            k,
            tot_vec_size: slots,
            inv_sqrt_iter: 0,
            max_parameters: InnerMaxParameters {
                abs_max: 8.0,
                coeffs: sign_coeffs(),
            },
        };
        ctx.km
            .load_galois_keys(&softmax::softmax_galois_elements(&ctx.params, &p, 1))
            .unwrap();

        let values: Vec<f64> = (0..slots)
            .map(|i| (((i * 13 + 3) % 11) as f64 - 5.0) / 2.0)
            .collect();
        let mut cts = vec![encrypt_values(&mut ctx, &values)];
        evaluate_softmax(&mut ctx.eval, &mut ctx.btp, &p, &mut cts).unwrap();

        let mut want = values.clone();
        softmax::softmax_approximate(&p, &mut want);
        let got = decrypt_values(&mut ctx, &cts[0], slots);
        for i in 0..slots {
            assert!(
                (want[i] - got[i]).abs() < 5e-2,
                "slot {i}: want {} got {}",
                want[i],
                got[i]
            );
        }
    }

    #[test]
    fn encrypted_layer_norm_matches_reference() {
        let k = 4usize;
        let mut ctx = setup(k);
        let slots = ctx.params.max_slots();
        let p = NormParameters {
            gamma: vec![1.0, 0.8, 1.2, 0.9],
            beta: vec![0.05, -0.05, 0.1, 0.0],
            tot_vec_size: slots,
            inv_sqrt_min: 0.1,
            inv_sqrt_max: 16.0,
            inv_sqrt_deg: 31,
            inv_sqrt_iter: 1,
            bootstrap_before: false,
            bootstrap_after: true,
        };
        ctx.km
            .load_galois_keys(&norm::norm_galois_elements(&ctx.params, k, 1))
            .unwrap();

        let values: Vec<f64> = (0..slots)
            .map(|i| (((i * 7 + 2) % 9) as f64 - 4.0) / 1.5)
            .collect();
        let mut cts = vec![encrypt_values(&mut ctx, &values)];
        evaluate_norm(&mut ctx.eval, &mut ctx.btp, &p, &mut cts, k).unwrap();

        let mut want = values.clone();
        norm::norm_approximate(&p, &mut want, k);
        let got = decrypt_values(&mut ctx, &cts[0], slots);
        for i in 0..slots {
            assert!(
                (want[i] - got[i]).abs() < 5e-2,
                "slot {i}: want {} got {}",
                want[i],
                got[i]
            );
        }
        let _ = ctx.btp.output_level();
    }
}
