//! Client side: tokenization, packing encryption, decryption and result
//! reordering.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::keycache::KeyManager;
use crate::matrix::{self, Dense};
use crate::params::Params;
use crate::rlwe::{Ciphertext, SecretKey};

use super::config::PipelineConfig;

/// Canonical amino-acid alphabet; index 0 is the padding token.
pub const AMINO_ACIDS: &str = "ACDEFGHIKLMNPQRSTVWY";

/// Affine embedding of token indexes into (-1, 1), consumed by the
/// per-column embedding polynomials.
pub fn token_value(index: usize) -> f64 {
    (index as f64 - 10.0) / 10.5
}

/// Maps a sequence of amino-acid letters to the packed token matrix: row
/// `i` carries the value of residue `i` replicated across all columns
/// (each column polynomial later picks its embedding component).
pub fn tokenize(sequence: &str, rows: usize, cols: usize) -> Result<Dense> {
    let mut out = Dense::zeros(rows, cols);
    for (i, ch) in sequence.chars().take(rows).enumerate() {
        let idx = AMINO_ACIDS
            .find(ch.to_ascii_uppercase())
            .map(|p| p + 1)
            .ok_or_else(|| Error::shape(format!("unknown amino acid {ch:?}")))?;
        let v = token_value(idx);
        for j in 0..cols {
            out.set(i, j, v);
        }
    }
    for i in sequence.chars().count().min(rows)..rows {
        let v = token_value(0);
        for j in 0..cols {
            out.set(i, j, v);
        }
    }
    Ok(out)
}

pub struct Client {
    params: Params,
    config: PipelineConfig,
    enc: matrix::Encryptor,
    dec: matrix::Decryptor,
}

impl Client {
    pub fn new(config: PipelineConfig, sk: &SecretKey) -> Result<Client> {
        config.validate()?;
        let params = Params::from_literal(config.params.clone())?;
        Ok(Client {
            enc: matrix::Encryptor::new(params.clone(), sk),
            dec: matrix::Decryptor::new(params.clone(), sk),
            params,
            config,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Builds the bounded key manager shared with the server.
    pub fn key_manager(&self, sk: &SecretKey) -> Arc<KeyManager> {
        Arc::new(KeyManager::new(
            self.config.num_cpu,
            self.params.clone(),
            self.config.max_concurrent_galois_keys,
            sk,
        ))
    }

    /// Packs and encrypts token matrices.
    pub fn encrypt_new(&mut self, inputs: &[Dense]) -> Result<Vec<Ciphertext>> {
        let mat_per_ct = self.config.nb_mat_per_ct(&self.params);
        self.enc.encrypt_new(inputs, 0, mat_per_ct)
    }

    /// Decrypts classifier outputs into one logits row per sample, undoing
    /// the pooling re-pack.
    pub fn decrypt_results(&mut self, cts: &[Ciphertext]) -> Result<Vec<Dense>> {
        let c = &self.config;
        let nb_mat = c.nb_mat_per_ct(&self.params);
        let raw = self.dec.decrypt_new(
            cts,
            1,
            c.classes,
            c.cols - c.classes,
            c.rows * nb_mat,
        )?;
        Ok(reorder_results(&raw, c.nb_samples, nb_mat, c.rows))
    }
}

/// Undoes the pooling layout: output ciphertext `g`, packed matrix `m`,
/// lane-row `j` holds the logits of sample `(g·rows + j)·nb_mat + m`.
pub fn reorder_results(raw: &[Dense], nb_samples: usize, nb_mat: usize, rows: usize) -> Vec<Dense> {
    let mut out = Vec::with_capacity(nb_samples);
    for s in 0..nb_samples {
        let input_ct = s / nb_mat;
        let m = s % nb_mat;
        let group = input_ct / rows;
        let j = input_ct % rows;
        let idx = group * rows * nb_mat + m * rows + j;
        out.push(raw[idx].clone());
    }
    out
}

pub fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    let mut best_v = f64::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_v {
            best = i;
            best_v = v;
        }
    }
    best
}

/// Fraction of matching argmax predictions and the mean absolute noise
/// between two prediction sets.
pub fn precision(have: &[Dense], want: &[Dense]) -> (f64, f64) {
    assert_eq!(have.len(), want.len(), "prediction counts differ");
    let mut accuracy = 0.0;
    let mut noise = 0.0;
    let mut count = 0usize;
    for (h, w) in have.iter().zip(want.iter()) {
        if argmax(h.data()) == argmax(w.data()) {
            accuracy += 1.0;
        }
        for (a, b) in h.data().iter().zip(w.data().iter()) {
            noise += (a - b).abs();
            count += 1;
        }
    }
    (accuracy / have.len() as f64, noise / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_replicates_values_per_row() {
        let m = tokenize("ACD", 4, 8).unwrap();
        assert_eq!(m.at(0, 0), token_value(1)); // A
        assert_eq!(m.at(0, 7), token_value(1));
        assert_eq!(m.at(1, 3), token_value(2)); // C
        assert_eq!(m.at(3, 0), token_value(0)); // padding
        assert!(tokenize("AXZ", 4, 8).is_err());
    }

    #[test]
    fn token_values_stay_in_unit_interval() {
        for idx in 0..=20 {
            let v = token_value(idx);
            assert!((-1.0..=1.0).contains(&v), "{v}");
        }
    }

    #[test]
    fn argmax_and_precision() {
        let a = Dense::new(1, 3, vec![0.1, 0.9, 0.3]);
        let b = Dense::new(1, 3, vec![0.2, 0.8, 0.1]);
        assert_eq!(argmax(a.data()), 1);
        let (acc, noise) = precision(&[a.clone()], &[b]);
        assert_eq!(acc, 1.0);
        assert!((noise - 0.1333333).abs() < 1e-5);
    }

    #[test]
    fn reorder_maps_pooling_layout() {
        // 2 input cts of nb_mat=3, rows=2: samples 0..6
        let nb_mat = 3;
        let rows = 2;
        let raw: Vec<Dense> = (0..rows * nb_mat)
            .map(|i| Dense::new(1, 1, vec![i as f64]))
            .collect();
        let out = reorder_results(&raw, 6, nb_mat, rows);
        // sample s = input_ct·nb_mat + m → raw[m·rows + input_ct]
        assert_eq!(out[0].at(0, 0), 0.0); // ct0 m0 → idx 0
        assert_eq!(out[1].at(0, 0), 2.0); // ct0 m1 → idx 2
        assert_eq!(out[3].at(0, 0), 1.0); // ct1 m0 → idx 1
    }
}
