//! Packing of dense matrices into ciphertext slots.
//!
//! A `r×c` matrix is flattened row-major with `pad` empty slots appended
//! to each row; `mat_per_ct` matrices are concatenated per ciphertext.

use crate::ckks::Encoder;
use crate::error::Result;
use crate::params::Params;
use crate::rlwe::{Ciphertext, Decryptor as RlweDecryptor, Encryptor as RlweEncryptor, MetaData,
    Plaintext, SecretKey};

use super::dense::Dense;

/// Replicates a flattened matrix across the whole slot vector.
pub fn flatten(m: &Dense, slots: usize) -> Vec<f64> {
    let (rows, cols) = m.dims();
    let flattened = rows * cols;
    let mat_per_ct = slots / flattened;
    let mut values = vec![0.0; slots];
    for j in 0..mat_per_ct {
        values[flattened * j..flattened * (j + 1)].copy_from_slice(m.data());
    }
    values
}

pub struct Encryptor {
    params: Params,
    enc: RlweEncryptor,
    ecd: Encoder,
}

impl Encryptor {
    pub fn new(params: Params, sk: &SecretKey) -> Self {
        Encryptor {
            enc: RlweEncryptor::new(params.clone(), sk),
            ecd: Encoder::new(params.clone()),
            params,
        }
    }

    /// Packs and encrypts `mat_per_ct` matrices per ciphertext with `pad`
    /// empty slots per row.
    pub fn encrypt_new(
        &mut self,
        matrices: &[Dense],
        pad: usize,
        mat_per_ct: usize,
    ) -> Result<Vec<Ciphertext>> {
        let (rows, cols) = matrices[0].dims();
        let flattened = rows * (cols + pad);
        let slots = self.params.max_slots();
        let count = matrices.len().div_ceil(mat_per_ct);

        let mut cts = Vec::with_capacity(count);
        for i in 0..count {
            let mut values = vec![0.0; slots];
            for j in 0..mat_per_ct {
                let Some(m) = matrices.get(i * mat_per_ct + j) else {
                    break;
                };
                let base = flattened * j;
                for k in 0..rows {
                    values[base + k * (cols + pad)..base + k * (cols + pad) + cols]
                        .copy_from_slice(m.row(k));
                }
            }
            let mut pt = Plaintext::new(
                self.params.ring_q(),
                self.params.max_level(),
                MetaData::new(self.params.default_scale(), self.params.log_max_slots()),
            );
            self.ecd.encode(&values, &mut pt)?;
            cts.push(self.enc.encrypt_new(&pt)?);
        }
        Ok(cts)
    }
}

pub struct Decryptor {
    params: Params,
    dec: RlweDecryptor,
    ecd: Encoder,
}

impl Decryptor {
    pub fn new(params: Params, sk: &SecretKey) -> Self {
        Decryptor {
            dec: RlweDecryptor::new(params.clone(), sk),
            ecd: Encoder::new(params.clone()),
            params,
        }
    }

    /// Inverse of [`Encryptor::encrypt_new`].
    pub fn decrypt_new(
        &mut self,
        cts: &[Ciphertext],
        rows: usize,
        cols: usize,
        pad: usize,
        mat_per_ct: usize,
    ) -> Result<Vec<Dense>> {
        let slots = self.params.max_slots();
        let flattened = rows * (cols + pad);
        let mut out = Vec::with_capacity(mat_per_ct * cts.len());
        let mut values = vec![0.0; slots];
        for ct in cts {
            let pt = self.dec.decrypt_new(ct);
            self.ecd.decode(&pt, &mut values)?;
            for j in 0..mat_per_ct {
                let base = j * flattened;
                let mut m = Dense::zeros(rows, cols);
                for k in 0..rows {
                    m.data_mut()[k * cols..(k + 1) * cols]
                        .copy_from_slice(&values[base + k * (cols + pad)..base + k * (cols + pad) + cols]);
                }
                out.push(m);
            }
        }
        Ok(out)
    }
}
