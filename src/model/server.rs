//! Server-side transformer circuit: one encoder block plus classifier
//! head, encrypted and plaintext flavors.
//!
//! Every encrypted stage loads exactly the Galois keys it needs into the
//! bounded cache, runs its array primitives on the worker pool, and logs
//! level/scale movement. Bootstraps sit at the stage boundaries; the
//! conditioned ones derive their predicate from the next stage's level
//! requirement.

use std::sync::Arc;

use tracing::info;

use crate::bootstrap::Bootstrapper;
use crate::ckks::{Polynomial, PolynomialVector};
use crate::error::{Result, StageExt};
use crate::keycache::KeyManager;
use crate::matrix::diagonals::{
    diagonalize, diagonalize_galois_elements, merge_diagonals, merge_galois_elements,
    split_diagonals, split_galois_elements, transpose_galois_elements,
};
use crate::matrix::mul::mul_galois_elements;
use crate::matrix::{bias_to_dense, split_heads, Dense, MatrixEvaluator};
use crate::nn::{self, softmax};
use crate::params::Params;
use crate::rlwe::Ciphertext;

use super::config::PipelineConfig;
use super::weights::ModelWeights;

pub struct Server {
    config: PipelineConfig,
    params: Params,
    weights: ModelWeights,
    eval: MatrixEvaluator,
    km: Arc<KeyManager>,
}

impl Server {
    pub fn new(
        config: PipelineConfig,
        weights: ModelWeights,
        km: Arc<KeyManager>,
    ) -> Result<Server> {
        config.validate()?;
        let params = Params::from_literal(config.params.clone())?;
        let eval = MatrixEvaluator::new(params.clone(), config.rows, config.num_cpu, km.clone());
        Ok(Server {
            config,
            params,
            weights,
            eval,
            km,
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn load_keys(&mut self, stage: &str, elements: &[u64]) -> Result<()> {
        info!(stage, keys = elements.len(), "loading Galois keys");
        self.km.load_galois_keys(elements).stage(stage)
    }

    fn ensure_level(
        &mut self,
        cts: &mut Vec<Ciphertext>,
        minimum: usize,
        btp: &mut dyn Bootstrapper,
    ) -> Result<()> {
        if cts[0].level() < minimum {
            let taken = std::mem::take(cts);
            *cts = btp.bootstrap_many(taken)?;
        }
        Ok(())
    }

    fn log_stage(stage: &str, cts: &[Ciphertext]) {
        info!(
            stage,
            level = cts[0].level(),
            log_scale = format!("{:.2}", cts[0].log_scale()),
            count = cts.len(),
            "stage done"
        );
    }

    // ------------------------------------------------------------------
    // encrypted stages
    // ------------------------------------------------------------------

    /// Maps encrypted token values to embedding vectors: each column has
    /// its own Chebyshev polynomial, dispatched per slot.
    pub fn embed_encrypted(&mut self, cts: Vec<Ciphertext>) -> Result<Vec<Ciphertext>> {
        let (rows, cols) = (self.config.rows, self.config.cols);
        let slots = self.params.max_slots();
        let nb = self.config.nb_mat_per_ct(&self.params);

        let polys: Vec<Polynomial> = self
            .weights
            .embedding_coeffs
            .iter()
            .map(|c| Polynomial::new(c.clone(), -1.0, 1.0))
            .collect();
        let mut mapping = vec![0usize; slots];
        for d in 0..nb {
            let base = d * rows * cols;
            for i in 0..rows {
                for j in 0..cols {
                    mapping[base + i * cols + j] = j;
                }
            }
        }
        let pv = PolynomialVector::new(polys, mapping)?;
        let out = self.eval.polynomial_vector(&cts, &pv).stage("embedding")?;
        Self::log_stage("embedding", &out);
        Ok(out)
    }

    pub fn positional_encoding_encrypted(&mut self, cts: &mut Vec<Ciphertext>) -> Result<()> {
        let w = self.weights.positional.clone();
        self.eval.add_pt(cts, &w).stage("positional-encoding")?;
        Self::log_stage("positional-encoding", cts);
        Ok(())
    }

    pub fn qkv_galois_elements(&self) -> Vec<u64> {
        diagonalize_galois_elements(&self.params, self.config.cols)
    }

    pub fn qkv_encrypted(
        &mut self,
        cts: &Vec<Ciphertext>,
    ) -> Result<(Vec<Ciphertext>, Vec<Ciphertext>, Vec<Ciphertext>)> {
        self.load_keys("qkv", &self.qkv_galois_elements())?;
        let level = cts[0].level();
        let rows = self.config.rows;

        let key_w = self.weights.key_w.clone();
        let key_b = self.weights.key_b.clone();
        let query_w = self.weights.query_w.clone();
        let query_b = self.weights.query_b.clone();
        let value_w = self.weights.value_w.clone();
        let value_b = self.weights.value_b.clone();

        let mut project = |w: &Dense, b: &[f64]| -> Result<Vec<Ciphertext>> {
            let encoded = self.eval.encode_mul_new(w, level)?;
            let mut out = cts.clone();
            self.eval.mul_pt(&mut out, &encoded)?;
            self.eval.rescale(&mut out)?;
            self.eval.add_pt(&mut out, &bias_to_dense(rows, b))?;
            Ok(out)
        };

        let k = project(&key_w, &key_b).stage("qkv: key")?;
        let q = project(&query_w, &query_b).stage("qkv: query")?;
        let v = project(&value_w, &value_b).stage("qkv: value")?;
        drop(project);
        Self::log_stage("qkv", &q);
        Ok((q, k, v))
    }

    pub fn split_heads_galois_elements(&self) -> Vec<u64> {
        let c = &self.config;
        split_galois_elements(&self.params, c.rows, c.cols, c.split, c.padding)
    }

    pub fn split_heads_encrypted(
        &mut self,
        q: &mut Vec<Ciphertext>,
        k: &mut Vec<Ciphertext>,
        v: &mut Vec<Ciphertext>,
    ) -> Result<()> {
        self.load_keys("split-heads", &self.split_heads_galois_elements())?;
        let c = self.config.clone();
        let slots = self.params.max_slots();
        let level = q[0].level().max(k[0].level()).max(v[0].level());
        let default = self.params.default_scale();
        let diags = split_diagonals(slots, c.rows, c.cols, c.split, c.padding, 1.0);
        let lt = self
            .eval
            .new_linear_transformation(level, default, default, false, &diags)?;
        for cts in [&mut *q, &mut *k, &mut *v] {
            self.eval
                .evaluate_linear_transformation(cts, &lt)
                .stage("split-heads")?;
            self.eval.rescale(cts).stage("split-heads")?;
        }
        Ok(())
    }

    pub fn transpose_galois_elements_set(&self) -> Vec<u64> {
        transpose_galois_elements(&self.params, self.config.rows)
    }

    pub fn mul_galois_elements_set(&self) -> Vec<u64> {
        mul_galois_elements(&self.params, self.config.rows, false, false)
    }

    /// K <- Kᵀ (per head), then the Halevi–Shoup product Q·Kᵀ scaled by
    /// 1/√(head dim).
    pub fn q_mul_kt_encrypted(
        &mut self,
        q: &mut Vec<Ciphertext>,
        k: &mut Vec<Ciphertext>,
        btp: &mut dyn Bootstrapper,
    ) -> Result<Vec<Ciphertext>> {
        self.ensure_level(q, 4, btp)?;
        self.ensure_level(k, 5, btp)?;

        self.load_keys("transpose", &self.transpose_galois_elements_set())?;
        let default = self.params.default_scale();
        let transpose = self
            .eval
            .new_transpose(k[0].level(), self.config.rows, 1.0, k[0].scale(), default)?;
        self.eval
            .evaluate_linear_transformation(k, &transpose)
            .stage("transpose")?;
        self.eval.rescale(k).stage("transpose")?;

        self.load_keys("q-mul-kt", &self.mul_galois_elements_set())?;
        let level = q[0].level().min(k[0].level());
        let mp = self.eval.new_mul_parameters(
            level,
            self.config.kt_scaling,
            false,
            false,
            q[0].scale(),
            k[0].scale(),
        )?;
        let mut scores = self.eval.mul_ct(q, k, &mp).stage("q-mul-kt")?;
        self.eval.rescale(&mut scores).stage("q-mul-kt")?;
        Self::log_stage("q-mul-kt", &scores);
        Ok(scores)
    }

    pub fn softmax_encrypted(
        &mut self,
        scores: &mut Vec<Ciphertext>,
        btp: &mut dyn Bootstrapper,
    ) -> Result<()> {
        let p = self.config.softmax_parameters(&self.params);
        self.load_keys(
            "softmax",
            &softmax::softmax_galois_elements(&self.params, &p, scores.len()),
        )?;
        nn::evaluate_softmax(&mut self.eval, btp, &p, scores).stage("softmax")?;
        Self::log_stage("softmax", scores);
        Ok(())
    }

    /// Attention · V (Halevi–Shoup again).
    pub fn qkt_mul_v_encrypted(
        &mut self,
        scores: &mut Vec<Ciphertext>,
        v: &mut Vec<Ciphertext>,
        btp: &mut dyn Bootstrapper,
    ) -> Result<Vec<Ciphertext>> {
        self.ensure_level(scores, 4, btp)?;
        self.ensure_level(v, 4, btp)?;
        self.load_keys("att-mul-v", &self.mul_galois_elements_set())?;
        let level = scores[0].level().min(v[0].level());
        let mp = self
            .eval
            .new_mul_parameters(level, 1.0, false, false, scores[0].scale(), v[0].scale())?;
        let mut att = self.eval.mul_ct(scores, v, &mp).stage("att-mul-v")?;
        self.eval.rescale(&mut att).stage("att-mul-v")?;
        Self::log_stage("att-mul-v", &att);
        Ok(att)
    }

    pub fn merge_heads_galois_elements(&self) -> Vec<u64> {
        let c = &self.config;
        merge_galois_elements(&self.params, c.rows, c.cols, c.split, c.padding)
    }

    pub fn merge_heads_encrypted(
        &mut self,
        att: &mut Vec<Ciphertext>,
        btp: &mut dyn Bootstrapper,
    ) -> Result<()> {
        self.ensure_level(att, 3, btp)?;
        self.load_keys("merge-heads", &self.merge_heads_galois_elements())?;
        let c = self.config.clone();
        let slots = self.params.max_slots();
        let default = self.params.default_scale();
        let diags = merge_diagonals(slots, c.rows, c.cols, c.split, c.padding, 1.0);
        let lt = self.eval.new_linear_transformation(
            att[0].level(),
            att[0].scale(),
            default,
            false,
            &diags,
        )?;
        self.eval
            .evaluate_linear_transformation(att, &lt)
            .stage("merge-heads")?;
        self.eval.rescale(att).stage("merge-heads")?;
        Self::log_stage("merge-heads", att);
        Ok(())
    }

    /// att·W_combine + bias, then the residual connection.
    pub fn combine_encrypted(
        &mut self,
        residual: &mut Vec<Ciphertext>,
        att: &mut Vec<Ciphertext>,
        btp: &mut dyn Bootstrapper,
    ) -> Result<()> {
        self.ensure_level(att, 2, btp)?;
        self.load_keys("combine", &diagonalize_galois_elements(&self.params, self.config.cols))?;
        let slots = self.params.max_slots();
        let cols = self.config.cols;
        let rows = self.config.rows;
        let default = self.params.default_scale();
        let level = (residual[0].level() + 1).min(att[0].level());
        let combine_w = self.weights.combine_w.clone();
        let combine_b = self.weights.combine_b.clone();
        let diags = diagonalize(&combine_w, slots / cols, slots);
        let lt = self
            .eval
            .new_linear_transformation(level, att[0].scale(), default, false, &diags)?;
        self.eval
            .evaluate_linear_transformation(att, &lt)
            .stage("combine")?;
        self.eval
            .add_pt(att, &bias_to_dense(rows, &combine_b))
            .stage("combine")?;
        self.eval.rescale(att).stage("combine")?;
        self.eval.add_ct(residual, att).stage("combine")?;
        Self::log_stage("combine", residual);
        Ok(())
    }

    pub fn norm1_encrypted(
        &mut self,
        cts: &mut Vec<Ciphertext>,
        btp: &mut dyn Bootstrapper,
    ) -> Result<()> {
        let p = self.config.norm1_parameters(
            &self.params,
            self.weights.norm1_gamma.clone(),
            self.weights.norm1_beta.clone(),
        );
        self.load_keys(
            "norm1",
            &nn::norm::norm_galois_elements(&self.params, self.config.cols, cts.len()),
        )?;
        nn::evaluate_norm(&mut self.eval, btp, &p, cts, self.config.cols).stage("norm1")?;
        Self::log_stage("norm1", cts);
        Ok(())
    }

    pub fn norm2_encrypted(
        &mut self,
        cts: &mut Vec<Ciphertext>,
        btp: &mut dyn Bootstrapper,
    ) -> Result<()> {
        let p = self.config.norm2_parameters(
            &self.params,
            self.weights.norm2_gamma.clone(),
            self.weights.norm2_beta.clone(),
        );
        self.load_keys(
            "norm2",
            &nn::norm::norm_galois_elements(&self.params, self.config.cols, cts.len()),
        )?;
        nn::evaluate_norm(&mut self.eval, btp, &p, cts, self.config.cols).stage("norm2")?;
        Self::log_stage("norm2", cts);
        Ok(())
    }

    /// Feed-forward: the first linear layer is split in two halves to
    /// stay within the slot budget; ReLU is applied on values scaled by
    /// 1/abs_max (folded into the weights).
    pub fn fnn_encrypted(
        &mut self,
        cts: &mut Vec<Ciphertext>,
        btp: &mut dyn Bootstrapper,
    ) -> Result<()> {
        self.load_keys("fnn", &diagonalize_galois_elements(&self.params, self.config.cols))?;
        self.ensure_level(cts, 2, btp)?;

        let cols = self.config.cols;
        let rows = self.config.rows;
        let slots = self.params.max_slots();
        let default = self.params.default_scale();
        let scale = self.config.relu_abs_max;
        let relu_params = self.config.relu_parameters();

        let mut fnn1_w = self.weights.fnn1_w.clone();
        fnn1_w.scale(1.0 / scale);
        let mut fnn2_w = self.weights.fnn2_w.clone();
        fnn2_w.scale(scale);

        let fnn1_split = split_heads(&fnn1_w, 2);
        let (r2, c2) = fnn2_w.dims();
        let fnn2_split = [
            Dense::new(r2 / 2, c2, fnn2_w.data()[..(r2 / 2) * c2].to_vec()),
            Dense::new(r2 / 2, c2, fnn2_w.data()[(r2 / 2) * c2..].to_vec()),
        ];
        let mut fnn1_bias = [
            bias_to_dense(rows, &self.weights.fnn1_b[..cols]),
            bias_to_dense(rows, &self.weights.fnn1_b[cols..]),
        ];
        fnn1_bias[0].scale(1.0 / scale);
        fnn1_bias[1].scale(1.0 / scale);
        let fnn2_bias = bias_to_dense(rows, &self.weights.fnn2_b);

        let mut acc = cts.clone();
        for half in 0..2 {
            let diags1 = diagonalize(&fnn1_split[half], slots / cols, slots);
            let lt1 = self.eval.new_linear_transformation(
                cts[0].level(),
                cts[0].scale(),
                default,
                false,
                &diags1,
            )?;
            let mut hidden = cts.clone();
            self.eval
                .evaluate_linear_transformation(&mut hidden, &lt1)
                .stage("fnn: w1")?;
            self.eval.rescale(&mut hidden).stage("fnn: w1")?;
            self.eval
                .add_pt(&mut hidden, &fnn1_bias[half])
                .stage("fnn: b1")?;

            nn::evaluate_relu(&mut self.eval, btp, &relu_params, &mut hidden).stage("fnn: relu")?;

            let diags2 = diagonalize(&fnn2_split[half], slots / cols, slots);
            let lt2 = self.eval.new_linear_transformation(
                hidden[0].level(),
                hidden[0].scale(),
                default,
                false,
                &diags2,
            )?;
            self.eval
                .evaluate_linear_transformation(&mut hidden, &lt2)
                .stage("fnn: w2")?;
            self.eval.rescale(&mut hidden).stage("fnn: w2")?;
            self.eval.add_ct(&mut acc, &hidden).stage("fnn: acc")?;
        }

        self.eval.add_pt(&mut acc, &fnn2_bias).stage("fnn: b2")?;
        *cts = acc;
        Self::log_stage("fnn", cts);
        Ok(())
    }

    pub fn pooling_galois_elements(&self, num_cts: usize) -> Vec<u64> {
        let mut out = std::collections::BTreeSet::new();
        out.extend(
            self.params
                .galois_elements_for_inner_sum(self.config.cols as i64, self.config.rows),
        );
        for j in 1..self.config.rows.min(num_cts) {
            out.insert(self.params.galois_element(-((j * self.config.cols) as i64)));
        }
        out.into_iter().collect()
    }

    /// Mean over rows, re-packed so each output ciphertext carries the
    /// pooled vectors of `rows` input elements.
    pub fn pooling_encrypted(&mut self, cts: Vec<Ciphertext>) -> Result<Vec<Ciphertext>> {
        self.load_keys("pooling", &self.pooling_galois_elements(cts.len()))?;
        let rows = self.config.rows;
        let cols = self.config.cols;
        let slots = self.params.max_slots();
        let flatten = rows * cols;

        let mut mask = vec![0.0f64; slots];
        for b in 0..slots / flatten {
            for j in 0..cols {
                mask[b * flatten + j] = 1.0 / rows as f64;
            }
        }

        let mut cts = cts;
        let groups = cts.len().div_ceil(rows);
        let mut out: Vec<Option<Ciphertext>> = (0..groups).map(|_| None).collect();

        for (idx, ct) in cts.iter_mut().enumerate() {
            let group = idx / rows;
            let j = idx % rows;
            let ev = self.eval.eval0();
            let levels = ct.level().saturating_sub(2);
            ev.drop_level(ct, levels);
            ev.inner_sum(ct, cols as i64, rows).stage("pooling")?;
            let pt = {
                let level = ct.level();
                let scale = ev
                    .params()
                    .scaling_factor(ct.scale(), ev.params().default_scale(), level);
                ev.encode_new(&mask, level, scale)?
            };
            ev.mul_pt_inplace(ct, &pt).stage("pooling")?;
            if j > 0 {
                ev.rotate_inplace(ct, -((j * cols) as i64)).stage("pooling")?;
            }
            match out[group].as_mut() {
                None => out[group] = Some(ct.clone()),
                Some(o) => ev.add_inplace(o, ct).stage("pooling")?,
            }
        }

        let mut out: Vec<Ciphertext> = out.into_iter().map(|o| o.unwrap()).collect();
        self.eval.rescale(&mut out).stage("pooling")?;
        Self::log_stage("pooling", &out);
        Ok(out)
    }

    pub fn classifier_encrypted(&mut self, cts: &mut Vec<Ciphertext>) -> Result<()> {
        self.load_keys(
            "classifier",
            &diagonalize_galois_elements(&self.params, self.config.cols),
        )?;
        let cols = self.config.cols;
        let classes = self.config.classes;

        // pad to a square matrix; the tail columns stay zero
        let mut padded = Dense::zeros(cols, cols);
        for i in 0..cols {
            for j in 0..classes {
                padded.set(i, j, self.weights.classifier_w.at(i, j));
            }
        }
        let encoded = self.eval.encode_mul_new(&padded, cts[0].level())?;
        self.eval.mul_pt(cts, &encoded).stage("classifier")?;

        let mut bias = vec![0.0f64; cols];
        bias[..classes].copy_from_slice(&self.weights.classifier_b);
        self.eval
            .add_pt(cts, &bias_to_dense(1, &bias))
            .stage("classifier")?;
        self.eval.rescale(cts).stage("classifier")?;
        Self::log_stage("classifier", cts);
        Ok(())
    }

    /// The full encrypted pipeline.
    pub fn run_encrypted(
        &mut self,
        cts: Vec<Ciphertext>,
        btp: &mut dyn Bootstrapper,
    ) -> Result<Vec<Ciphertext>> {
        let mut x = self.embed_encrypted(cts)?;
        self.positional_encoding_encrypted(&mut x)?;

        let (mut q, mut k, mut v) = self.qkv_encrypted(&x)?;
        self.split_heads_encrypted(&mut q, &mut k, &mut v)?;

        let mut scores = self.q_mul_kt_encrypted(&mut q, &mut k, btp)?;
        scores = btp.bootstrap_many(scores)?;
        self.softmax_encrypted(&mut scores, btp)?;

        let mut att = self.qkt_mul_v_encrypted(&mut scores, &mut v, btp)?;
        self.merge_heads_encrypted(&mut att, btp)?;
        self.combine_encrypted(&mut x, &mut att, btp)?;

        x = btp.bootstrap_many(x)?;
        self.norm1_encrypted(&mut x, btp)?;
        self.fnn_encrypted(&mut x, btp)?;

        // the second LayerNorm needs its full level budget up front
        let norm2_depth = 4 + self
            .config
            .norm2_parameters(&self.params, vec![1.0], vec![0.0])
            .inv_sqrt_poly()
            .depth();
        if x[0].level() < norm2_depth {
            x = btp.bootstrap_many(x)?;
        }
        self.norm2_encrypted(&mut x, btp)?;

        if x[0].level() < 1 {
            x = btp.bootstrap_many(x)?;
        }
        let mut pooled = self.pooling_encrypted(x)?;
        if pooled[0].level() < 1 {
            pooled = btp.bootstrap_many(pooled)?;
        }
        self.classifier_encrypted(&mut pooled)?;
        Ok(pooled)
    }

    // ------------------------------------------------------------------
    // plaintext reference circuits
    // ------------------------------------------------------------------

    /// Plaintext pipeline with exact non-linearities.
    pub fn run_exact(&self, inputs: &[Dense]) -> Vec<Dense> {
        self.run_plain(inputs, true)
    }

    /// Plaintext pipeline with the same approximations as the encrypted
    /// path.
    pub fn run_approximate(&self, inputs: &[Dense]) -> Vec<Dense> {
        self.run_plain(inputs, false)
    }

    fn run_plain(&self, inputs: &[Dense], exact: bool) -> Vec<Dense> {
        inputs.iter().map(|m| self.run_plain_one(m, exact)).collect()
    }

    fn run_plain_one(&self, tokens: &Dense, exact: bool) -> Dense {
        let c = &self.config;
        let w = &self.weights;
        let (rows, cols) = (c.rows, c.cols);

        // embedding: per-column polynomial of the token value
        let mut x = Dense::zeros(rows, cols);
        for i in 0..rows {
            for j in 0..cols {
                x.set(
                    i,
                    j,
                    crate::ckks::cheb_eval(&w.embedding_coeffs[j], -1.0, 1.0, tokens.at(i, j)),
                );
            }
        }
        x.add_assign(&w.positional);

        // attention
        let dense =
            |input: &Dense, wt: &Dense, b: &[f64]| -> Dense {
                let mut out = input.mul(wt);
                for i in 0..out.rows() {
                    for j in 0..out.cols() {
                        let v = out.at(i, j) + b[j];
                        out.set(i, j, v);
                    }
                }
                out
            };
        let q = dense(&x, &w.query_w, &w.query_b);
        let k = dense(&x, &w.key_w, &w.key_b);
        let v = dense(&x, &w.value_w, &w.value_b);

        let q_heads = split_heads(&q, c.split);
        let k_heads = split_heads(&k, c.split);
        let v_heads = split_heads(&v, c.split);

        let smp = self.config.softmax_parameters(&self.params);
        let mut att_heads = Vec::with_capacity(c.split);
        for h in 0..c.split {
            let mut scores = q_heads[h].mul(&k_heads[h].transpose());
            scores.scale(c.kt_scaling);
            let mut flat = scores.data().to_vec();
            if exact {
                softmax::softmax_exact(&mut flat, rows);
            } else {
                let mut p = smp.clone();
                p.k = rows;
                softmax::softmax_approximate(&p, &mut flat);
            }
            let scores = Dense::new(rows, rows, flat);
            att_heads.push(scores.mul(&v_heads[h]));
        }
        let att = crate::matrix::merge_heads(&att_heads);
        let mut att = dense(&att, &w.combine_w, &w.combine_b);
        att.add_assign(&x);
        let mut x = att;

        // norm1
        if exact {
            nn::norm::norm_exact(&w.norm1_gamma, &w.norm1_beta, x.data_mut(), cols);
        } else {
            let p = c.norm1_parameters(&self.params, w.norm1_gamma.clone(), w.norm1_beta.clone());
            nn::norm::norm_approximate(&p, x.data_mut(), cols);
        }

        // feed-forward with the 1/abs_max scaling of the encrypted path
        let scale = c.relu_abs_max;
        let mut fnn1_w = w.fnn1_w.clone();
        fnn1_w.scale(1.0 / scale);
        let mut fnn2_w = w.fnn2_w.clone();
        fnn2_w.scale(scale);
        let fnn1_b: Vec<f64> = w.fnn1_b.iter().map(|b| b / scale).collect();

        let mut hidden = x.mul(&fnn1_w);
        for i in 0..hidden.rows() {
            for j in 0..hidden.cols() {
                let v = hidden.at(i, j) + fnn1_b[j];
                hidden.set(i, j, v);
            }
        }
        if exact {
            nn::relu::relu_exact(hidden.data_mut());
        } else {
            nn::relu::relu_approximate(&c.sign_coeffs, hidden.data_mut());
        }
        let mut ff = hidden.mul(&fnn2_w);
        for i in 0..ff.rows() {
            for j in 0..ff.cols() {
                let v = ff.at(i, j) + w.fnn2_b[j];
                ff.set(i, j, v);
            }
        }
        x.add_assign(&ff);

        // norm2
        if exact {
            nn::norm::norm_exact(&w.norm2_gamma, &w.norm2_beta, x.data_mut(), cols);
        } else {
            let p = c.norm2_parameters(&self.params, w.norm2_gamma.clone(), w.norm2_beta.clone());
            nn::norm::norm_approximate(&p, x.data_mut(), cols);
        }

        // mean pooling + classifier
        let mut pooled = Dense::zeros(1, cols);
        for j in 0..cols {
            let s: f64 = (0..rows).map(|i| x.at(i, j)).sum();
            pooled.set(0, j, s / rows as f64);
        }
        let mut logits = pooled.mul(&w.classifier_w);
        for j in 0..c.classes {
            let v = logits.at(0, j) + w.classifier_b[j];
            logits.set(0, j, v);
        }
        logits
    }
}
