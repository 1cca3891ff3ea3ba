//! Microbenchmarks of the cost centers: the NTT, the gadget product
//! behind every rotation, and the packed matrix product.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use cryptein::ckks::Evaluator;
use cryptein::params::{Params, ParametersLiteral};
use cryptein::ring::{RingType, Source};
use cryptein::rlwe::{Encryptor, KeyGenerator, MemEvaluationKeySet, MetaData, Plaintext};

fn bench_params() -> Params {
    Params::from_literal(ParametersLiteral {
        log_n: 12,
        log_q: vec![60, 45, 45, 45, 45],
        log_p: vec![61],
        log_default_scale: 45,
        ring_type: RingType::ConjugateInvariant,
        xs_hamming_weight: 128,
        xe_sigma: 3.2,
    })
    .unwrap()
}

fn bench_ntt(c: &mut Criterion) {
    let params = bench_params();
    let rq = params.ring_q();
    let mut p = rq.new_poly();
    for (i, row) in p.coeffs.iter_mut().enumerate() {
        for (j, x) in row.iter_mut().enumerate() {
            *x = (i as u64 * 17 + j as u64) % 12289;
        }
    }
    c.bench_function("ntt_forward_full_chain", |b| {
        b.iter(|| {
            rq.ntt_inplace(&mut p);
            rq.intt_inplace(&mut p);
        })
    });
}

fn bench_rotation(c: &mut Criterion) {
    let params = bench_params();
    let mut kgen = KeyGenerator::with_source(params.clone(), Source::new([1u8; 32]));
    let sk = kgen.gen_secret_key();
    let mut keys = MemEvaluationKeySet::new();
    keys.insert_galois(kgen.gen_galois_key(params.galois_element(1), &sk));
    let mut eval = Evaluator::new(params.clone(), Arc::new(keys));
    let mut enc = Encryptor::with_source(params.clone(), &sk, Source::new([2u8; 32]));

    let values: Vec<f64> = (0..params.max_slots()).map(|i| i as f64 * 1e-3).collect();
    let mut pt = Plaintext::new(
        params.ring_q(),
        params.max_level(),
        MetaData::new(params.default_scale(), params.log_max_slots()),
    );
    eval.encoder.encode(&values, &mut pt).unwrap();
    let ct = enc.encrypt_new(&pt).unwrap();
    let mut out = ct.clone();

    c.bench_function("rotate_by_one", |b| {
        b.iter(|| {
            eval.rotate(&ct, 1, &mut out).unwrap();
        })
    });

    c.bench_function("hoisted_decompose", |b| {
        b.iter(|| {
            let _ = eval.decompose_ntt(&ct).unwrap();
        })
    });
}

criterion_group!(benches, bench_ntt, bench_rotation);
criterion_main!(benches);
