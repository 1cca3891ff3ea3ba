//! Model weights: CSV loading and synthetic generation for tests.
//!
//! File layouts (all floats, row-major, one logical record):
//! `transformer_block_{query,key,value,combine}_weights.csv` hold the
//! `cols×cols` matrix followed by the bias; `transformer_block_fnn_weights.csv`
//! holds W1 | b1 | W2 | b2; `transformer_block_norm{1,2}_weights.csv` hold
//! γ then β; `classifier_weights.csv` holds the `cols×classes` matrix then
//! the bias; `embedding_coefficients.csv` holds one Chebyshev coefficient
//! row per embedding column; `positional_encoding.csv` holds the
//! `rows×cols` table.

use std::path::Path;

use crate::error::{Error, Result};
use crate::matrix::Dense;

#[derive(Clone, Debug)]
pub struct ModelWeights {
    /// Per-column Chebyshev coefficients over [-1, 1] mapping the token
    /// value to its embedding component.
    pub embedding_coeffs: Vec<Vec<f64>>,
    pub positional: Dense,
    pub query_w: Dense,
    pub query_b: Vec<f64>,
    pub key_w: Dense,
    pub key_b: Vec<f64>,
    pub value_w: Dense,
    pub value_b: Vec<f64>,
    pub combine_w: Dense,
    pub combine_b: Vec<f64>,
    pub norm1_gamma: Vec<f64>,
    pub norm1_beta: Vec<f64>,
    pub norm2_gamma: Vec<f64>,
    pub norm2_beta: Vec<f64>,
    pub fnn1_w: Dense,
    pub fnn1_b: Vec<f64>,
    pub fnn2_w: Dense,
    pub fnn2_b: Vec<f64>,
    pub classifier_w: Dense,
    pub classifier_b: Vec<f64>,
}

/// Parses a CSV file of floats into one flat record.
pub fn read_csv_floats(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)?;
    let mut out = Vec::new();
    for token in text.split(|c: char| c == ',' || c.is_whitespace()) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        out.push(
            token
                .parse::<f64>()
                .map_err(|e| Error::shape(format!("{}: bad float {token:?}: {e}", path.display())))?,
        );
    }
    Ok(out)
}

fn take_matrix(data: &[f64], offset: &mut usize, rows: usize, cols: usize) -> Result<Dense> {
    let n = rows * cols;
    if *offset + n > data.len() {
        return Err(Error::shape("weight file too short"));
    }
    let m = Dense::new(rows, cols, data[*offset..*offset + n].to_vec());
    *offset += n;
    Ok(m)
}

fn take_vector(data: &[f64], offset: &mut usize, n: usize) -> Result<Vec<f64>> {
    if *offset + n > data.len() {
        return Err(Error::shape("weight file too short"));
    }
    let v = data[*offset..*offset + n].to_vec();
    *offset += n;
    Ok(v)
}

impl ModelWeights {
    pub fn load(dir: &Path, rows: usize, cols: usize, classes: usize) -> Result<ModelWeights> {
        let mat_with_bias = |name: &str| -> Result<(Dense, Vec<f64>)> {
            let data = read_csv_floats(&dir.join(name))?;
            let mut off = 0;
            let w = take_matrix(&data, &mut off, cols, cols)?;
            let b = take_vector(&data, &mut off, cols)?;
            Ok((w, b))
        };
        let (query_w, query_b) = mat_with_bias("transformer_block_query_weights.csv")?;
        let (key_w, key_b) = mat_with_bias("transformer_block_key_weights.csv")?;
        let (value_w, value_b) = mat_with_bias("transformer_block_value_weights.csv")?;
        let (combine_w, combine_b) = mat_with_bias("transformer_block_combine_weights.csv")?;

        let norm = |name: &str| -> Result<(Vec<f64>, Vec<f64>)> {
            let data = read_csv_floats(&dir.join(name))?;
            let mut off = 0;
            let gamma = take_vector(&data, &mut off, cols)?;
            let beta = take_vector(&data, &mut off, cols)?;
            Ok((gamma, beta))
        };
        let (norm1_gamma, norm1_beta) = norm("transformer_block_norm1_weights.csv")?;
        let (norm2_gamma, norm2_beta) = norm("transformer_block_norm2_weights.csv")?;

        let fnn = read_csv_floats(&dir.join("transformer_block_fnn_weights.csv"))?;
        let mut off = 0;
        let fnn1_w = take_matrix(&fnn, &mut off, cols, 2 * cols)?;
        let fnn1_b = take_vector(&fnn, &mut off, 2 * cols)?;
        let fnn2_w = take_matrix(&fnn, &mut off, 2 * cols, cols)?;
        let fnn2_b = take_vector(&fnn, &mut off, cols)?;

        let cls = read_csv_floats(&dir.join("classifier_weights.csv"))?;
        let mut off = 0;
        let classifier_w = take_matrix(&cls, &mut off, cols, classes)?;
        let classifier_b = take_vector(&cls, &mut off, classes)?;

        let emb = read_csv_floats(&dir.join("embedding_coefficients.csv"))?;
        if emb.len() % cols != 0 {
            return Err(Error::shape("embedding coefficient table not divisible by cols"));
        }
        let deg = emb.len() / cols;
        let embedding_coeffs: Vec<Vec<f64>> =
            (0..cols).map(|j| emb[j * deg..(j + 1) * deg].to_vec()).collect();

        let pos = read_csv_floats(&dir.join("positional_encoding.csv"))?;
        let mut off = 0;
        let positional = take_matrix(&pos, &mut off, rows, cols)?;

        Ok(ModelWeights {
            embedding_coeffs,
            positional,
            query_w,
            query_b,
            key_w,
            key_b,
            value_w,
            value_b,
            combine_w,
            combine_b,
            norm1_gamma,
            norm1_beta,
            norm2_gamma,
            norm2_beta,
            fnn1_w,
            fnn1_b,
            fnn2_w,
            fnn2_b,
            classifier_w,
            classifier_b,
        })
    }

    /// Deterministic synthetic weights for tests: small magnitudes so the
    /// non-linear approximation intervals hold.
    pub fn synthetic(rows: usize, cols: usize, classes: usize, embedding_deg: usize) -> ModelWeights {
        let mut state = 0x9E3779B97F4A7C15u64;

        fn next_val(state: &mut u64) -> f64 {
            *state ^= *state << 13;
            *state ^= *state >> 7;
            *state ^= *state << 17;
            (*state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
        }
        fn mat(state: &mut u64, r: usize, c: usize, scale: f64) -> Dense {
            Dense::new(r, c, (0..r * c).map(|_| next_val(state) * scale).collect())
        }
        fn vecf(state: &mut u64, n: usize, scale: f64) -> Vec<f64> {
            (0..n).map(|_| next_val(state) * scale).collect()
        }

        // per-column embedding polynomials with distinct low-order terms;
        // weight magnitudes shrink with the fan-in so activations stay
        // inside the non-linear approximation intervals
        let embedding_coeffs: Vec<Vec<f64>> = (0..cols)
            .map(|_| (0..=embedding_deg).map(|_| next_val(&mut state) * 0.3).collect())
            .collect();
        let w_scale = 1.2 / (cols as f64).sqrt();
        let w2_scale = 1.2 / (2.0 * cols as f64).sqrt();

        ModelWeights {
            embedding_coeffs,
            positional: mat(&mut state, rows, cols, 0.2),
            query_w: mat(&mut state, cols, cols, w_scale),
            query_b: vecf(&mut state, cols, 0.1),
            key_w: mat(&mut state, cols, cols, w_scale),
            key_b: vecf(&mut state, cols, 0.1),
            value_w: mat(&mut state, cols, cols, w_scale),
            value_b: vecf(&mut state, cols, 0.1),
            combine_w: mat(&mut state, cols, cols, w_scale),
            combine_b: vecf(&mut state, cols, 0.1),
            norm1_gamma: (0..cols).map(|_| 1.0 + next_val(&mut state) * 0.2).collect(),
            norm1_beta: vecf(&mut state, cols, 0.1),
            norm2_gamma: (0..cols).map(|_| 1.0 + next_val(&mut state) * 0.2).collect(),
            norm2_beta: vecf(&mut state, cols, 0.1),
            fnn1_w: mat(&mut state, cols, 2 * cols, w_scale),
            fnn1_b: vecf(&mut state, 2 * cols, 0.1),
            fnn2_w: mat(&mut state, 2 * cols, cols, w2_scale),
            fnn2_b: vecf(&mut state, cols, 0.1),
            classifier_w: mat(&mut state, cols, classes, 1.6 / (cols as f64).sqrt()),
            classifier_b: vecf(&mut state, classes, 0.1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_parsing_handles_newlines_and_commas() {
        let dir = std::env::temp_dir().join("cryptein-weights-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("x.csv");
        std::fs::write(&path, "1.5,2.25,-3\n4.0,5e-1\n").unwrap();
        let v = read_csv_floats(&path).unwrap();
        assert_eq!(v, vec![1.5, 2.25, -3.0, 4.0, 0.5]);
    }

    #[test]
    fn synthetic_weights_have_expected_shapes() {
        let w = ModelWeights::synthetic(4, 8, 3, 7);
        assert_eq!(w.fnn1_w.dims(), (8, 16));
        assert_eq!(w.fnn2_w.dims(), (16, 8));
        assert_eq!(w.classifier_w.dims(), (8, 3));
        assert_eq!(w.embedding_coeffs.len(), 8);
        assert_eq!(w.embedding_coeffs[0].len(), 8);
        assert_eq!(w.positional.dims(), (4, 8));
    }
}
