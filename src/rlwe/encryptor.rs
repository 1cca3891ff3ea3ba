//! Secret-key encryption and decryption.

use crate::error::{Error, Result};
use crate::params::Params;
use crate::ring::{embed_signed, GaussianSampler, Source, UniformSampler};

use super::ciphertext::{Ciphertext, MetaData, Plaintext};
use super::keys::SecretKey;

pub struct Encryptor {
    params: Params,
    sk: SecretKey,
    source: Source,
    gaussian: GaussianSampler,
}

impl Encryptor {
    pub fn new(params: Params, sk: &SecretKey) -> Self {
        Self::with_source(params, sk, Source::from_entropy())
    }

    pub fn with_source(params: Params, sk: &SecretKey, source: Source) -> Self {
        let gaussian = GaussianSampler::new(params.xe_sigma());
        Encryptor {
            params,
            sk: sk.clone(),
            source,
            gaussian,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Encrypts `pt` (NTT domain) into `ct` at the plaintext's level:
    /// `(c0, c1) = (-c1·s + e + pt, uniform)`.
    pub fn encrypt(&mut self, pt: &Plaintext, ct: &mut Ciphertext) -> Result<()> {
        if !pt.meta.is_ntt {
            return Err(Error::shape("encryption expects an NTT-domain plaintext"));
        }
        let level = pt.level();
        let rq = self.params.ring_q().at_level(level);
        ct.resize_degree(1, self.params.n());
        ct.resize_level(level);

        UniformSampler.read(&mut self.source, &rq, &mut ct.q[1]);

        let e_values = self.gaussian.sample_values(&mut self.source, self.params.n());
        embed_signed(&rq, &e_values, &mut ct.q[0]);
        rq.ntt_inplace(&mut ct.q[0]);

        // c0 = e - c1·s + pt
        let (c0, c1) = ct.q.split_at_mut(1);
        rq.mul_coeffs_montgomery_then_sub(&c1[0], &self.sk.q, &mut c0[0]);
        rq.add_assign(&mut ct.q[0], &pt.poly);

        ct.meta = pt.meta;
        Ok(())
    }

    pub fn encrypt_new(&mut self, pt: &Plaintext) -> Result<Ciphertext> {
        let mut ct = Ciphertext::new(self.params.ring_q(), 1, pt.level(), pt.meta);
        self.encrypt(pt, &mut ct)?;
        Ok(ct)
    }
}

pub struct Decryptor {
    params: Params,
    sk: SecretKey,
}

impl Decryptor {
    pub fn new(params: Params, sk: &SecretKey) -> Self {
        Decryptor {
            params,
            sk: sk.clone(),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Decrypts `ct` of any degree: `pt = Σ c_i s^i` (Horner, NTT domain).
    pub fn decrypt(&self, ct: &Ciphertext, pt: &mut Plaintext) {
        let level = ct.level();
        let rq = self.params.ring_q().at_level(level);
        pt.poly.resize(level);

        let d = ct.degree();
        pt.poly.copy_at_level(level, &ct.q[d]);
        for i in (0..d).rev() {
            // pt = pt·s + c_i
            let mut tmp = rq.new_poly();
            rq.mul_coeffs_montgomery(&pt.poly, &self.sk.q, &mut tmp);
            rq.add(&tmp, &ct.q[i], &mut pt.poly);
        }
        pt.meta = ct.meta;
    }

    pub fn decrypt_new(&self, ct: &Ciphertext) -> Plaintext {
        let mut pt = Plaintext::new(
            self.params.ring_q(),
            ct.level(),
            MetaData::new(ct.scale(), ct.meta.log_dimensions.cols),
        );
        self.decrypt(ct, &mut pt);
        pt
    }
}
