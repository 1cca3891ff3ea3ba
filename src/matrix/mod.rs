//! Matrix-over-ciphertext algebra.
//!
//! An ordered array of ciphertexts, each packing several dense matrices,
//! with every element-wise primitive fanned out over the worker pool of
//! evaluator replicas. The Halevi–Shoup square product, packing
//! permutations and mask/compress utilities live in the submodules.

pub mod dense;
pub mod diagonals;
pub mod encoder;
pub mod mask;
pub mod mul;

use std::sync::Arc;

use crate::ckks::{self, evaluate_polynomial, Polynomial};
use crate::error::Result;
use crate::lintrans::{self, Diagonals, LinearTransformation, LinearTransformationParameters};
use crate::params::Params;
use crate::pool::ResourceManager;
use crate::rlwe::{Ciphertext, EvaluationKeySet};

pub use dense::{bias_to_dense, merge_heads, split_heads, Dense};
pub use encoder::{flatten, Decryptor, Encryptor};
pub use mul::MulParameters;

/// A dense weight matrix pre-encoded as a linear transformation.
pub struct EncodedMatrix {
    pub lt: LinearTransformation,
}

pub struct MatrixEvaluator {
    params: Params,
    dims: usize,
    pool: ResourceManager<ckks::Evaluator>,
}

impl MatrixEvaluator {
    /// `dims` is the row count of the packed square blocks (the sequence
    /// length of the transformer).
    pub fn new(params: Params, dims: usize, threads: usize, keys: Arc<dyn EvaluationKeySet>) -> Self {
        let first = ckks::Evaluator::new(params.clone(), keys);
        let mut replicas = Vec::with_capacity(threads.max(1));
        for _ in 1..threads.max(1) {
            replicas.push(first.shallow_copy());
        }
        let mut all = vec![first];
        all.extend(replicas);
        MatrixEvaluator {
            params,
            dims,
            pool: ResourceManager::new(all),
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn set_keys(&mut self, keys: Arc<dyn EvaluationKeySet>) {
        self.pool.for_each(|ev| ev.set_keys(keys.clone()));
    }

    /// The first evaluator replica, for serial glue between stages.
    pub fn eval0(&mut self) -> &mut ckks::Evaluator {
        self.pool.get_mut(0)
    }

    // ------------------------------------------------------------------
    // element-wise array primitives
    // ------------------------------------------------------------------

    pub fn rescale(&mut self, a: &mut [Ciphertext]) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .map(|ct| move |ev: &mut ckks::Evaluator| ev.rescale_inplace(ct))
                .collect(),
        )
    }

    pub fn drop_level(&mut self, a: &mut [Ciphertext], levels: usize) {
        for ct in a.iter_mut() {
            let level = ct.level().saturating_sub(levels);
            ct.resize_level(level);
        }
    }

    pub fn set_scale(&mut self, a: &mut [Ciphertext], scale: f64) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .map(|ct| move |ev: &mut ckks::Evaluator| ev.set_scale(ct, scale))
                .collect(),
        )
    }

    pub fn match_scales_for_mul(
        &mut self,
        a: &mut [Ciphertext],
        b: &mut [Ciphertext],
        target: f64,
    ) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .zip(b.iter_mut())
                .map(|(ca, cb)| {
                    move |ev: &mut ckks::Evaluator| ev.match_scales_for_mul(ca, cb, target)
                })
                .collect(),
        )
    }

    pub fn add_ct(&mut self, a: &mut [Ciphertext], b: &[Ciphertext]) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .zip(b.iter())
                .map(|(ca, cb)| move |ev: &mut ckks::Evaluator| ev.add_inplace(ca, cb))
                .collect(),
        )
    }

    pub fn sub_ct(&mut self, a: &mut [Ciphertext], b: &[Ciphertext]) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .zip(b.iter())
                .map(|(ca, cb)| move |ev: &mut ckks::Evaluator| ev.sub_inplace(ca, cb))
                .collect(),
        )
    }

    /// a[i] <- relin(a[i] · b[i]).
    pub fn dot_ct(&mut self, a: &mut [Ciphertext], b: &[Ciphertext]) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .zip(b.iter())
                .map(|(ca, cb)| {
                    move |ev: &mut ckks::Evaluator| {
                        *ca = ev.mul_relin_new(ca, cb)?;
                        Ok(())
                    }
                })
                .collect(),
        )
    }

    /// Element-wise product with a plain vector, encoded once at the scale
    /// that rescales back to the default.
    pub fn dot_vec(&mut self, a: &mut [Ciphertext], values: &[f64]) -> Result<()> {
        let level = a.iter().map(|ct| ct.level()).min().unwrap();
        let scale = self
            .params
            .scaling_factor(a[0].scale(), self.params.default_scale(), level);
        let pt = self.eval0().encode_new(values, level, scale)?;
        self.pool.execute(
            a.iter_mut()
                .map(|ct| {
                    let pt = &pt;
                    move |ev: &mut ckks::Evaluator| ev.mul_pt_inplace(ct, pt)
                })
                .collect(),
        )
    }

    pub fn add_vec(&mut self, a: &mut [Ciphertext], values: &[f64]) -> Result<()> {
        let level = a.iter().map(|ct| ct.level()).min().unwrap();
        let scale = a[0].scale();
        let pt = self.eval0().encode_new(values, level, scale)?;
        self.pool.execute(
            a.iter_mut()
                .map(|ct| {
                    let pt = &pt;
                    move |ev: &mut ckks::Evaluator| ev.add_pt_inplace(ct, pt)
                })
                .collect(),
        )
    }

    pub fn sub_vec(&mut self, a: &mut [Ciphertext], values: &[f64]) -> Result<()> {
        let level = a.iter().map(|ct| ct.level()).min().unwrap();
        let scale = a[0].scale();
        let pt = self.eval0().encode_new(values, level, scale)?;
        self.pool.execute(
            a.iter_mut()
                .map(|ct| {
                    let pt = &pt;
                    move |ev: &mut ckks::Evaluator| ev.sub_pt_inplace(ct, pt)
                })
                .collect(),
        )
    }

    pub fn add_scalar(&mut self, a: &mut [Ciphertext], value: f64) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .map(|ct| {
                    move |ev: &mut ckks::Evaluator| {
                        ev.add_scalar_inplace(ct, value);
                        Ok(())
                    }
                })
                .collect(),
        )
    }

    pub fn mul_scalar(&mut self, a: &mut [Ciphertext], value: f64) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .map(|ct| {
                    move |ev: &mut ckks::Evaluator| {
                        ev.mul_scalar_inplace(ct, value);
                        Ok(())
                    }
                })
                .collect(),
        )
    }

    /// Adds a dense matrix, replicated across every packed block.
    pub fn add_pt(&mut self, a: &mut [Ciphertext], w: &Dense) -> Result<()> {
        let values = flatten(w, self.params.max_slots());
        self.add_vec(a, &values)
    }

    /// Applies a pre-encoded weight matrix (one hoisted evaluation per
    /// array element).
    pub fn mul_pt(&mut self, a: &mut [Ciphertext], w: &EncodedMatrix) -> Result<()> {
        self.evaluate_linear_transformation(a, &w.lt)
    }

    pub fn evaluate_linear_transformation(
        &mut self,
        a: &mut [Ciphertext],
        lt: &LinearTransformation,
    ) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .map(|ct| {
                    move |ev: &mut ckks::Evaluator| {
                        *ct = lintrans::evaluate(ev, ct, lt)?;
                        Ok(())
                    }
                })
                .collect(),
        )
    }

    pub fn inner_sum(&mut self, a: &mut [Ciphertext], batch: i64, n: usize) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .map(|ct| move |ev: &mut ckks::Evaluator| ev.inner_sum(ct, batch, n))
                .collect(),
        )
    }

    pub fn replicate(&mut self, a: &mut [Ciphertext], batch: i64, n: usize) -> Result<()> {
        self.pool.execute(
            a.iter_mut()
                .map(|ct| move |ev: &mut ckks::Evaluator| ev.replicate(ct, batch, n))
                .collect(),
        )
    }

    /// Applies a Chebyshev polynomial to every element; results are fully
    /// rescaled to the default scale.
    pub fn polynomial(&mut self, a: &[Ciphertext], poly: &Polynomial) -> Result<Vec<Ciphertext>> {
        let scale = self.params.default_scale();
        let mut out: Vec<Option<Ciphertext>> = (0..a.len()).map(|_| None).collect();
        self.pool.execute(
            a.iter()
                .zip(out.iter_mut())
                .map(|(ct, slot)| {
                    move |ev: &mut ckks::Evaluator| {
                        *slot = Some(evaluate_polynomial(ev, ct, poly, scale)?);
                        Ok(())
                    }
                })
                .collect(),
        )?;
        Ok(out.into_iter().map(|o| o.unwrap()).collect())
    }

    /// Applies a per-slot polynomial vector (the embedding transform) to
    /// every element.
    pub fn polynomial_vector(
        &mut self,
        a: &[Ciphertext],
        pv: &crate::ckks::PolynomialVector,
    ) -> Result<Vec<Ciphertext>> {
        let scale = self.params.default_scale();
        let mut out: Vec<Option<Ciphertext>> = (0..a.len()).map(|_| None).collect();
        self.pool.execute(
            a.iter()
                .zip(out.iter_mut())
                .map(|(ct, slot)| {
                    move |ev: &mut ckks::Evaluator| {
                        *slot = Some(crate::ckks::evaluate_polynomial_vector(ev, ct, pv, scale)?);
                        Ok(())
                    }
                })
                .collect(),
        )?;
        Ok(out.into_iter().map(|o| o.unwrap()).collect())
    }

    // ------------------------------------------------------------------
    // plaintext-matrix encoding
    // ------------------------------------------------------------------

    /// Encodes a square weight matrix for `mul_pt` at the given level,
    /// with the scale chosen so one rescale returns to the default.
    pub fn encode_mul_new(&mut self, w: &Dense, level: usize) -> Result<EncodedMatrix> {
        let slots = self.params.max_slots();
        let (rows, _) = w.dims();
        let replicate = slots / rows;
        let diags = diagonals::diagonalize(w, replicate, slots);
        let scale = self.params.scaling_factor(
            self.params.default_scale(),
            self.params.default_scale(),
            level,
        );
        let lt = self.encode_lt(&diags, level, scale, false)?;
        Ok(EncodedMatrix { lt })
    }

    /// Encodes a diagonal collection with scale
    /// `scaling_factor(scale_in, scale_out, level)`.
    pub fn new_linear_transformation(
        &mut self,
        level: usize,
        scale_in: f64,
        scale_out: f64,
        naive: bool,
        diags: &Diagonals<f64>,
    ) -> Result<LinearTransformation> {
        let scale = self.params.scaling_factor(scale_in, scale_out, level);
        self.encode_lt(diags, level, scale, naive)
    }

    pub fn new_transpose(
        &mut self,
        level: usize,
        dims: usize,
        scaling: f64,
        scale_in: f64,
        scale_out: f64,
    ) -> Result<LinearTransformation> {
        let slots = self.params.max_slots();
        let diags = diagonals::transpose_diagonals(slots, dims, scaling);
        self.new_linear_transformation(level, scale_in, scale_out, false, &diags)
    }

    fn encode_lt(
        &mut self,
        diags: &Diagonals<f64>,
        level: usize,
        scale: f64,
        naive: bool,
    ) -> Result<LinearTransformation> {
        let lt_params = LinearTransformationParameters {
            indexes: diags.indexes(),
            level_q: level,
            scale,
            giant_step: if naive { -1 } else { 0 },
        };
        let encoder = &mut self.pool.get_mut(0).encoder;
        LinearTransformation::encode(encoder, diags, &lt_params)
    }
}
