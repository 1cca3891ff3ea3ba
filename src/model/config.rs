//! Pipeline configuration.
//!
//! One explicit value threaded through client and server constructors (no
//! process-wide mutable state). The packing geometry requires
//! `cols/split + padding == rows`: heads are padded to square blocks so
//! the Halevi–Shoup product and the transpose act on aligned `rows×rows`
//! tiles.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::nn::{InnerMaxParameters, NormParameters, ReluParameters, SoftMaxParameters};
use crate::params::{Params, ParametersLiteral};
use crate::ring::RingType;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub params: ParametersLiteral,

    /// Sequence length (rows of the packed matrices).
    pub rows: usize,
    /// Embedding width.
    pub cols: usize,
    /// Number of attention heads.
    pub split: usize,
    /// Zero columns appended per head row; `cols/split + padding == rows`.
    pub padding: usize,
    pub classes: usize,
    pub nb_samples: usize,

    pub num_cpu: usize,
    pub max_concurrent_galois_keys: usize,

    /// Output level of the (dummy) bootstrapper.
    pub level_bootstrapping: usize,
    /// 1/√(head dim), folded into the Q·Kᵀ product.
    pub kt_scaling: f64,

    pub softmax_exp_offset: f64,
    pub softmax_exp_min: f64,
    pub softmax_exp_max: f64,
    pub softmax_exp_deg: usize,
    pub softmax_inv_min: f64,
    pub softmax_inv_max: f64,
    pub softmax_inv_deg: usize,
    pub softmax_inv_sqrt_iter: usize,
    pub innermax_abs_max: f64,
    pub sign_coeffs: Vec<Vec<f64>>,

    pub norm1_inv_sqrt_min: f64,
    pub norm1_inv_sqrt_max: f64,
    pub norm1_inv_sqrt_deg: usize,
    pub norm1_inv_sqrt_iter: usize,
    pub norm1_bootstrap_after: bool,

    pub norm2_inv_sqrt_min: f64,
    pub norm2_inv_sqrt_max: f64,
    pub norm2_inv_sqrt_deg: usize,
    pub norm2_bootstrap_after: bool,

    pub relu_abs_max: f64,

    /// Chebyshev degree of the per-column embedding polynomials.
    pub embedding_deg: usize,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cols % self.split != 0 {
            return Err(Error::shape("split must divide cols"));
        }
        if self.cols / self.split + self.padding != self.rows {
            return Err(Error::shape(
                "padded head width must equal rows (cols/split + padding == rows)",
            ));
        }
        if self.classes > self.cols {
            return Err(Error::shape("classes must fit into cols"));
        }
        Ok(())
    }

    /// Matrices packed per ciphertext, sized for the split-head expansion.
    pub fn nb_mat_per_ct(&self, params: &Params) -> usize {
        params.max_slots() / (self.split * self.rows * (self.cols / self.split + self.padding))
    }

    /// Number of array elements for `nb_samples` inputs.
    pub fn num_cts(&self, params: &Params) -> usize {
        self.nb_samples.div_ceil(self.nb_mat_per_ct(params))
    }

    pub fn softmax_parameters(&self, params: &Params) -> SoftMaxParameters {
        SoftMaxParameters {
            exp_offset: self.softmax_exp_offset,
            exp_min: self.softmax_exp_min,
            exp_max: self.softmax_exp_max,
            exp_deg: self.softmax_exp_deg,
            inv_min: self.softmax_inv_min,
            inv_max: self.softmax_inv_max,
            inv_deg: self.softmax_inv_deg,
            k: self.rows,
            tot_vec_size: self.nb_mat_per_ct(params) * self.rows * self.rows * self.split,
            inv_sqrt_iter: self.softmax_inv_sqrt_iter,
            max_parameters: InnerMaxParameters {
                abs_max: self.innermax_abs_max,
                coeffs: self.sign_coeffs.clone(),
            },
        }
    }

    pub fn norm1_parameters(&self, params: &Params, gamma: Vec<f64>, beta: Vec<f64>) -> NormParameters {
        NormParameters {
            gamma,
            beta,
            tot_vec_size: self.nb_mat_per_ct(params) * self.rows * self.cols,
            inv_sqrt_min: self.norm1_inv_sqrt_min,
            inv_sqrt_max: self.norm1_inv_sqrt_max,
            inv_sqrt_deg: self.norm1_inv_sqrt_deg,
            inv_sqrt_iter: self.norm1_inv_sqrt_iter,
            bootstrap_before: false,
            bootstrap_after: self.norm1_bootstrap_after,
        }
    }

    pub fn norm2_parameters(&self, params: &Params, gamma: Vec<f64>, beta: Vec<f64>) -> NormParameters {
        NormParameters {
            gamma,
            beta,
            tot_vec_size: self.nb_mat_per_ct(params) * self.rows * self.cols,
            inv_sqrt_min: self.norm2_inv_sqrt_min,
            inv_sqrt_max: self.norm2_inv_sqrt_max,
            inv_sqrt_deg: self.norm2_inv_sqrt_deg,
            inv_sqrt_iter: 0,
            bootstrap_before: false,
            bootstrap_after: self.norm2_bootstrap_after,
        }
    }

    pub fn relu_parameters(&self) -> ReluParameters {
        ReluParameters {
            coeffs: self.sign_coeffs.clone(),
            abs_max: self.relu_abs_max,
        }
    }

    /// Full-size configuration of the amino-acid classifier.
    pub fn full() -> Self {
        PipelineConfig {
            params: ParametersLiteral {
                log_n: 15,
                log_q: vec![60, 45, 45, 45, 45, 45, 45, 45, 45, 45, 45, 45],
                log_p: vec![61],
                log_default_scale: 45,
                ring_type: RingType::ConjugateInvariant,
                xs_hamming_weight: 192,
                xe_sigma: 3.2,
            },
            rows: 25,
            cols: 128,
            split: 8,
            padding: 9,
            classes: 19,
            nb_samples: 100,
            num_cpu: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            max_concurrent_galois_keys: 256,
            level_bootstrapping: 11,
            kt_scaling: 0.25, // 1/√16
            softmax_exp_offset: 0.0,
            softmax_exp_min: -50.0,
            softmax_exp_max: 5.0,
            softmax_exp_deg: 31,
            softmax_inv_min: 0.5,
            softmax_inv_max: 256.0,
            softmax_inv_deg: 31,
            softmax_inv_sqrt_iter: 2,
            innermax_abs_max: 60.0,
            sign_coeffs: vec![default_sign_coeffs()],
            norm1_inv_sqrt_min: 1.0,
            norm1_inv_sqrt_max: 216.0,
            norm1_inv_sqrt_deg: 63,
            norm1_inv_sqrt_iter: 1,
            norm1_bootstrap_after: true,
            norm2_inv_sqrt_min: 1.0,
            norm2_inv_sqrt_max: 280.0,
            norm2_inv_sqrt_deg: 31,
            norm2_bootstrap_after: false,
            relu_abs_max: 50.0,
            embedding_deg: 15,
        }
    }

    /// Reduced geometry for fast end-to-end tests: the same circuit over
    /// a small ring.
    pub fn test_small() -> Self {
        PipelineConfig {
            params: ParametersLiteral {
                log_n: 9,
                log_q: vec![55, 45, 45, 45, 45, 45, 45, 45, 45, 45],
                log_p: vec![56],
                log_default_scale: 45,
                ring_type: RingType::ConjugateInvariant,
                xs_hamming_weight: 64,
                xe_sigma: 3.2,
            },
            rows: 4,
            cols: 8,
            split: 2,
            padding: 0,
            classes: 3,
            nb_samples: 2,
            num_cpu: 2,
            max_concurrent_galois_keys: 256,
            level_bootstrapping: 9,
            kt_scaling: 0.5, // 1/√4
            softmax_exp_offset: 0.0,
            softmax_exp_min: -16.0,
            softmax_exp_max: 2.0,
            softmax_exp_deg: 15,
            softmax_inv_min: 0.5,
            softmax_inv_max: 8.0,
            softmax_inv_deg: 15,
            softmax_inv_sqrt_iter: 0,
            innermax_abs_max: 8.0,
            sign_coeffs: vec![default_sign_coeffs()],
            norm1_inv_sqrt_min: 0.02,
            norm1_inv_sqrt_max: 64.0,
            norm1_inv_sqrt_deg: 31,
            norm1_inv_sqrt_iter: 1,
            norm1_bootstrap_after: true,
            norm2_inv_sqrt_min: 0.02,
            norm2_inv_sqrt_max: 64.0,
            norm2_inv_sqrt_deg: 31,
            norm2_bootstrap_after: true,
            relu_abs_max: 8.0,
            embedding_deg: 7,
        }
    }
}

/// Degree-15 minimax factor of sign over [-1, 1]
/// (`GenMinimaxCompositePolynomial(512, 5, 10, {15}, sign)`).
pub fn default_sign_coeffs() -> Vec<f64> {
    vec![
        0.0,
        1.27020217932,
        0.0,
        -0.41513217792,
        0.0,
        0.23969221445,
        0.0,
        -0.16067723908,
        0.0,
        0.11530467170,
        0.0,
        -0.08537291689,
        0.0,
        0.06375404757,
        0.0,
        -0.10285141221,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_is_consistent() {
        let cfg = PipelineConfig::full();
        cfg.validate().unwrap();
        let params = Params::from_literal(cfg.params.clone()).unwrap();
        // 32768 slots / (8·25·25) = 6 matrices per ciphertext
        assert_eq!(cfg.nb_mat_per_ct(&params), 6);
        assert_eq!(cfg.num_cts(&params), 17);
    }

    #[test]
    fn small_config_is_consistent() {
        let cfg = PipelineConfig::test_small();
        cfg.validate().unwrap();
        let params = Params::from_literal(cfg.params.clone()).unwrap();
        // 512 slots / (2·4·4) = 16
        assert_eq!(cfg.nb_mat_per_ct(&params), 16);
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let mut cfg = PipelineConfig::test_small();
        cfg.padding = 1;
        assert!(cfg.validate().is_err());
    }
}
