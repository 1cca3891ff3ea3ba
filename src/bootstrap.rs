//! Bootstrapping interface.
//!
//! The circuit treats bootstrapping as an opaque, expensive refresh: a
//! level-restoring operator with slot-preserving semantics. The production
//! FFT-based circuit is out of scope; the secret-key bootstrapper below
//! implements the same contract for tests and `--dummy-bootstrapping`
//! runs, and the pooled wrapper provides the divide-by-two parallel
//! `bootstrap_many` scheduling over replica workers.

use tracing::debug;

use crate::ckks::Encoder;
use crate::error::{Error, Result};
use crate::params::Params;
use crate::pool::ResourceManager;
use crate::rlwe::{Ciphertext, Decryptor, Encryptor, MetaData, Plaintext, SecretKey};

/// Level-restoring refresh. Implementations must satisfy
/// `decode(decrypt(bootstrap(ct))) ≈ decode(decrypt(ct))` with
/// `level(bootstrap(ct)) == output_level()`.
pub trait Bootstrapper: Send {
    fn bootstrap(&mut self, ct: &Ciphertext) -> Result<Ciphertext>;

    /// Refreshes a batch; the default loops sequentially.
    fn bootstrap_many(&mut self, cts: Vec<Ciphertext>) -> Result<Vec<Ciphertext>> {
        let mut out = Vec::with_capacity(cts.len());
        for ct in &cts {
            out.push(self.bootstrap(ct)?);
        }
        Ok(out)
    }

    /// Levels consumed internally by the refresh circuit.
    fn depth(&self) -> usize;
    fn minimum_input_level(&self) -> usize;
    fn output_level(&self) -> usize;
}

/// Test-fixture bootstrapper: decrypts with the client secret, re-encodes
/// and re-encrypts at the output level. Must not ship in production
/// deployments; it is constructed only from an explicitly provided secret.
pub struct SecretKeyBootstrapper {
    params: Params,
    encryptor: Encryptor,
    decryptor: Decryptor,
    encoder: Encoder,
    output_level: usize,
    pub minimum_input_level: usize,
}

impl SecretKeyBootstrapper {
    pub fn new(params: Params, sk: &SecretKey, output_level: usize) -> Self {
        SecretKeyBootstrapper {
            encryptor: Encryptor::new(params.clone(), sk),
            decryptor: Decryptor::new(params.clone(), sk),
            encoder: Encoder::new(params.clone()),
            output_level,
            minimum_input_level: 0,
            params,
        }
    }
}

impl Bootstrapper for SecretKeyBootstrapper {
    fn bootstrap(&mut self, ct: &Ciphertext) -> Result<Ciphertext> {
        if ct.level() < self.minimum_input_level {
            return Err(Error::Range {
                op: "bootstrap",
                level: ct.level(),
                required: self.minimum_input_level,
            });
        }
        let pt = self.decryptor.decrypt_new(ct);
        let mut values = vec![0f64; self.params.max_slots()];
        self.encoder.decode(&pt, &mut values)?;

        let mut fresh = Plaintext::new(
            self.params.ring_q(),
            self.output_level,
            MetaData::new(self.params.default_scale(), self.params.log_max_slots()),
        );
        self.encoder.encode(&values, &mut fresh)?;
        self.encryptor.encrypt_new(&fresh)
    }

    fn depth(&self) -> usize {
        0
    }

    fn minimum_input_level(&self) -> usize {
        self.minimum_input_level
    }

    fn output_level(&self) -> usize {
        self.output_level
    }
}

/// Fans `bootstrap_many` out over a pool of bootstrapper replicas, two
/// ciphertexts per task (odd leftovers go alone).
pub struct PooledBootstrapper {
    pool: ResourceManager<Box<dyn Bootstrapper>>,
    depth: usize,
    minimum_input_level: usize,
    output_level: usize,
}

impl PooledBootstrapper {
    pub fn new(replicas: Vec<Box<dyn Bootstrapper>>) -> Self {
        let depth = replicas[0].depth();
        let minimum_input_level = replicas[0].minimum_input_level();
        let output_level = replicas[0].output_level();
        PooledBootstrapper {
            pool: ResourceManager::new(replicas),
            depth,
            minimum_input_level,
            output_level,
        }
    }

    /// Convenience constructor for the secret-key variant.
    pub fn dummy(num_cpu: usize, params: &Params, sk: &SecretKey, output_level: usize) -> Self {
        let replicas: Vec<Box<dyn Bootstrapper>> = (0..num_cpu.max(1))
            .map(|_| {
                Box::new(SecretKeyBootstrapper::new(params.clone(), sk, output_level))
                    as Box<dyn Bootstrapper>
            })
            .collect();
        Self::new(replicas)
    }
}

impl Bootstrapper for PooledBootstrapper {
    fn bootstrap(&mut self, ct: &Ciphertext) -> Result<Ciphertext> {
        self.pool.get_mut(0).bootstrap(ct)
    }

    fn bootstrap_many(&mut self, mut cts: Vec<Ciphertext>) -> Result<Vec<Ciphertext>> {
        debug!(
            count = cts.len(),
            level_in = cts[0].level(),
            level_out = self.output_level,
            "bootstrap_many"
        );
        let tasks: Vec<_> = cts
            .chunks_mut(2)
            .map(|chunk| {
                move |btp: &mut Box<dyn Bootstrapper>| {
                    for ct in chunk.iter_mut() {
                        *ct = btp.bootstrap(ct)?;
                    }
                    Ok(())
                }
            })
            .collect();
        self.pool.execute(tasks)?;
        Ok(cts)
    }

    fn depth(&self) -> usize {
        self.depth
    }

    fn minimum_input_level(&self) -> usize {
        self.minimum_input_level
    }

    fn output_level(&self) -> usize {
        self.output_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParametersLiteral;
    use crate::ring::{RingType, Source};
    use crate::rlwe::KeyGenerator;

    fn params() -> Params {
        Params::from_literal(ParametersLiteral {
            log_n: 6,
            log_q: vec![45, 38, 38, 38],
            log_p: vec![46],
            log_default_scale: 38,
            ring_type: RingType::ConjugateInvariant,
            xs_hamming_weight: 16,
            xe_sigma: 3.2,
        })
        .unwrap()
    }

    #[test]
    fn refresh_restores_level_and_preserves_slots() {
        let p = params();
        let mut kgen = KeyGenerator::with_source(p.clone(), Source::new([11u8; 32]));
        let sk = kgen.gen_secret_key();
        let mut enc = Encryptor::with_source(p.clone(), &sk, Source::new([12u8; 32]));
        let mut ecd = Encoder::new(p.clone());

        let values: Vec<f64> = (0..p.max_slots()).map(|i| 0.01 * i as f64 - 0.3).collect();
        let mut pt = Plaintext::new(
            p.ring_q(),
            p.max_level(),
            MetaData::new(p.default_scale(), p.log_max_slots()),
        );
        ecd.encode(&values, &mut pt).unwrap();
        let mut ct = enc.encrypt_new(&pt).unwrap();
        ct.resize_level(0); // exhausted

        let mut btp = SecretKeyBootstrapper::new(p.clone(), &sk, p.max_level());
        let fresh = btp.bootstrap(&ct).unwrap();
        assert_eq!(fresh.level(), p.max_level());

        let dec = Decryptor::new(p.clone(), &sk);
        let out_pt = dec.decrypt_new(&fresh);
        let mut out = vec![0f64; p.max_slots()];
        ecd.decode(&out_pt, &mut out).unwrap();
        for i in 0..values.len() {
            assert!((values[i] - out[i]).abs() < 1e-6, "slot {i}");
        }
    }

    #[test]
    fn refuses_below_minimum_level() {
        let p = params();
        let mut kgen = KeyGenerator::with_source(p.clone(), Source::new([13u8; 32]));
        let sk = kgen.gen_secret_key();
        let mut btp = SecretKeyBootstrapper::new(p.clone(), &sk, p.max_level());
        btp.minimum_input_level = 1;

        let ct = Ciphertext::new(
            p.ring_q(),
            1,
            0,
            MetaData::new(p.default_scale(), p.log_max_slots()),
        );
        assert!(matches!(
            btp.bootstrap(&ct).unwrap_err(),
            Error::Range { .. }
        ));
    }

    #[test]
    fn pooled_bootstrap_many_handles_odd_batches() {
        let p = params();
        let mut kgen = KeyGenerator::with_source(p.clone(), Source::new([14u8; 32]));
        let sk = kgen.gen_secret_key();
        let mut enc = Encryptor::with_source(p.clone(), &sk, Source::new([15u8; 32]));
        let mut ecd = Encoder::new(p.clone());

        let mut cts = Vec::new();
        for k in 0..5 {
            let values: Vec<f64> = (0..p.max_slots()).map(|i| (i + k) as f64 * 0.001).collect();
            let mut pt = Plaintext::new(
                p.ring_q(),
                1,
                MetaData::new(p.default_scale(), p.log_max_slots()),
            );
            ecd.encode(&values, &mut pt).unwrap();
            cts.push(enc.encrypt_new(&pt).unwrap());
        }

        let mut btp = PooledBootstrapper::dummy(3, &p, &sk, p.max_level());
        let fresh = btp.bootstrap_many(cts).unwrap();
        assert_eq!(fresh.len(), 5);
        let dec = Decryptor::new(p.clone(), &sk);
        for (k, ct) in fresh.iter().enumerate() {
            assert_eq!(ct.level(), p.max_level());
            let mut out = vec![0f64; p.max_slots()];
            ecd.decode(&dec.decrypt_new(ct), &mut out).unwrap();
            assert!((out[0] - k as f64 * 0.001).abs() < 1e-6);
        }
    }
}
