//! LayerNorm over packed rows.
//!
//! Per row of length `k`: subtract the mean, compute the variance, pack
//! the variances of all array elements into one ciphertext, evaluate a
//! Chebyshev approximation of `1/√v` (optionally refined by Newton
//! iterations of depth 2), broadcast back, and apply `γ·(x-μ)·v^{-1/2}+β`.

use crate::bootstrap::Bootstrapper;
use crate::ckks::{self, chebyshev_approximate, evaluate_polynomial, Polynomial};
use crate::error::Result;
use crate::matrix::mask::{extract_galois_elements, mask_and_compress_galois_elements};
use crate::matrix::MatrixEvaluator;
use crate::params::Params;
use crate::rlwe::Ciphertext;

const VARIANCE_EPSILON: f64 = 1e-6;

#[derive(Clone, Debug)]
pub struct NormParameters {
    pub gamma: Vec<f64>,
    pub beta: Vec<f64>,
    /// Total masked vector length for the compression step.
    pub tot_vec_size: usize,
    pub inv_sqrt_min: f64,
    pub inv_sqrt_max: f64,
    pub inv_sqrt_deg: usize,
    pub inv_sqrt_iter: usize,
    pub bootstrap_before: bool,
    pub bootstrap_after: bool,
}

impl NormParameters {
    pub fn inv_sqrt_poly(&self) -> Polynomial {
        chebyshev_approximate(
            |x| 1.0 / x.sqrt(),
            self.inv_sqrt_min,
            self.inv_sqrt_max,
            self.inv_sqrt_deg,
        )
    }

    pub fn circuit_depth(&self) -> usize {
        4 + 2 * self.inv_sqrt_iter + self.inv_sqrt_poly().depth()
    }
}

/// In-place LayerNorm over rows of length `k`.
pub fn evaluate_norm(
    eval: &mut MatrixEvaluator,
    btp: &mut dyn Bootstrapper,
    p: &NormParameters,
    cts: &mut Vec<Ciphertext>,
    k: usize,
) -> Result<()> {
    let inv_sqrt_poly = p.inv_sqrt_poly();
    let (a_cb, b_cb) = inv_sqrt_poly.change_of_basis();

    // μ, replicated over each row
    let mut means = cts.clone();
    eval.inner_sum(&mut means, 1, k)?;
    eval.mask_and_replicate(&mut means, 1.0 / k as f64, k, true)?;

    // x - μ
    eval.sub_ct(cts, &means)?;

    // v = Σ (x-μ)² per row (normalization by k folded into the mask)
    let mut variances = cts.clone();
    eval.dot_ct(&mut variances, cts)?;
    eval.inner_sum(&mut variances, 1, k)?;
    eval.rescale(&mut variances)?;
    eval.add_scalar(&mut variances, VARIANCE_EPSILON)?;

    if p.bootstrap_before {
        let drop = variances[0].level().saturating_sub(1);
        eval.drop_level(&mut variances, drop);
    }

    let mut half = if p.inv_sqrt_iter > 0 {
        let mut copy = variances.clone();
        Some(eval.mask_and_compress(
            &mut copy,
            1.0 / (2.0 * k as f64),
            0.0,
            k,
            p.tot_vec_size,
            true,
        )?)
    } else {
        None
    };

    let mut variance = eval.mask_and_compress(
        &mut variances,
        a_cb / k as f64,
        b_cb,
        k,
        p.tot_vec_size,
        true,
    )?;

    if p.bootstrap_before {
        match half.take() {
            Some(h) => {
                let mut pair = btp.bootstrap_many(vec![variance, h])?;
                half = Some(pair.pop().unwrap());
                variance = pair.pop().unwrap();
            }
            None => variance = btp.bootstrap(&variance)?,
        }
    }

    if p.bootstrap_after {
        let needed = inv_sqrt_poly.depth() + 2 * p.inv_sqrt_iter;
        let drop = variance.level().saturating_sub(needed);
        eval.eval0().drop_level(&mut variance, drop);
    }

    // y ≈ 1/√v
    let default_scale = eval.params().default_scale();
    variance = evaluate_polynomial(eval.eval0(), &variance, &inv_sqrt_poly, default_scale)?;

    if p.inv_sqrt_iter > 0 {
        let mut h = half.take().unwrap();
        inv_sqrt(eval.eval0(), btp, &mut variance, &mut h, p.inv_sqrt_iter)?;
    }

    if p.bootstrap_after {
        variance = btp.bootstrap(&variance)?;
    }

    let mut stds = eval.extract(&variance, cts.len())?;
    eval.mask_and_replicate(&mut stds, 1.0, k, true)?;

    // (x-μ)·γ·v^{-1/2} + β
    let slots = eval.params().max_slots();
    let mut gamma = vec![0.0f64; slots];
    let mut beta = vec![0.0f64; slots];
    for i in 0..slots / k {
        gamma[i * k..i * k + p.gamma.len().min(k)]
            .copy_from_slice(&p.gamma[..p.gamma.len().min(k)]);
        beta[i * k..i * k + p.beta.len().min(k)].copy_from_slice(&p.beta[..p.beta.len().min(k)]);
    }

    eval.dot_vec(cts, &gamma)?;
    eval.rescale(cts)?;
    eval.dot_ct(cts, &stds)?;
    eval.rescale(cts)?;
    eval.add_vec(cts, &beta)?;
    Ok(())
}

/// Newton refinement of `y ≈ 1/√x`: `y <- y·(1.5 - (x/2)·y²)`, depth 2
/// per iteration. `half` carries `x/2`.
pub fn inv_sqrt(
    ev: &mut ckks::Evaluator,
    btp: &mut dyn Bootstrapper,
    y: &mut Ciphertext,
    half: &mut Ciphertext,
    iterations: usize,
) -> Result<()> {
    for _ in 0..iterations {
        if y.level() < 2 {
            *y = btp.bootstrap(y)?;
        }
        if half.level() < y.level() {
            *half = btp.bootstrap(half)?;
        }

        let mut ysq = ev.mul_relin_new(y, y)?;
        ev.rescale_inplace(&mut ysq)?;

        let mut xy = ev.mul_relin_new(half, y)?;
        ev.rescale_inplace(&mut xy)?;

        let mut prod = ev.mul_relin_new(&ysq, &xy)?;
        ev.neg_inplace(&mut prod);

        // += 1.5·y at the accumulator's scale
        let mut t = y.clone();
        t.resize_level(prod.level());
        let factor = 1.5 * prod.scale() / t.scale();
        ev.mul_scalar_raw_inplace(&mut t, factor);
        t.meta.scale = prod.scale();
        ev.add_inplace(&mut prod, &t)?;

        ev.rescale_inplace(&mut prod)?;
        *y = prod;
    }
    Ok(())
}

/// Rotation keys of the LayerNorm stage.
pub fn norm_galois_elements(params: &Params, k: usize, num_cts: usize) -> Vec<u64> {
    let mut out = std::collections::BTreeSet::new();
    out.extend(params.galois_elements_for_inner_sum(1, k));
    out.extend(params.galois_elements_for_replicate(1, k));
    out.extend(mask_and_compress_galois_elements(params, num_cts));
    out.extend(extract_galois_elements(params, num_cts.max(1)));
    out.into_iter().collect()
}

/// Plaintext reference with the same approximations; returns the
/// (min, max) of the variance values seen, for interval calibration.
pub fn norm_approximate(p: &NormParameters, values: &mut [f64], k: usize) -> (f64, f64) {
    let poly = p.inv_sqrt_poly();
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for base in (0..values.len()).step_by(k) {
        let row = &mut values[base..base + k];
        let mean = row.iter().sum::<f64>() / k as f64;
        for x in row.iter_mut() {
            *x -= mean;
        }
        let var = row.iter().map(|x| x * x).sum::<f64>() / k as f64 + VARIANCE_EPSILON;
        lo = lo.min(var);
        hi = hi.max(var);
        let mut y = poly.eval(var);
        for _ in 0..p.inv_sqrt_iter {
            y = y * (1.5 - (var / 2.0) * y * y);
        }
        for (j, x) in row.iter_mut().enumerate() {
            *x = *x * p.gamma[j % p.gamma.len()] * y + p.beta[j % p.beta.len()];
        }
    }
    (lo, hi)
}

/// Exact plaintext LayerNorm; returns the variance range.
pub fn norm_exact(gamma: &[f64], beta: &[f64], values: &mut [f64], k: usize) -> (f64, f64) {
    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for base in (0..values.len()).step_by(k) {
        let row = &mut values[base..base + k];
        let mean = row.iter().sum::<f64>() / k as f64;
        for x in row.iter_mut() {
            *x -= mean;
        }
        let var = row.iter().map(|x| x * x).sum::<f64>() / k as f64 + VARIANCE_EPSILON;
        lo = lo.min(var);
        hi = hi.max(var);
        let inv = 1.0 / var.sqrt();
        for (j, x) in row.iter_mut().enumerate() {
            *x = *x * gamma[j % gamma.len()] * inv + beta[j % beta.len()];
        }
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approximate_norm_tracks_exact() {
        let p = NormParameters {
            gamma: vec![1.0, 0.5, 2.0, 1.5],
            beta: vec![0.1, -0.1, 0.0, 0.2],
            tot_vec_size: 8,
            inv_sqrt_min: 0.5,
            inv_sqrt_max: 20.0,
            inv_sqrt_deg: 63,
            inv_sqrt_iter: 1,
            bootstrap_before: false,
            bootstrap_after: false,
        };
        let mut values = vec![1.0, 3.0, -2.0, 4.0, -1.0, 2.5, 0.5, -3.0];
        let mut exact = values.clone();
        let (lo, hi) = norm_approximate(&p, &mut values, 4);
        norm_exact(&p.gamma, &p.beta, &mut exact, 4);
        assert!(lo > 0.0 && hi < 20.0, "variance range [{lo}, {hi}]");
        for i in 0..values.len() {
            assert!(
                (values[i] - exact[i]).abs() < 0.05,
                "slot {i}: approx {} vs exact {}",
                values[i],
                exact[i]
            );
        }
    }

    #[test]
    fn newton_iteration_converges() {
        // scalar check of the y(1.5 - (x/2)y²) update used homomorphically
        let x = 7.3f64;
        let mut y = 1.0 / x.sqrt() * 1.05; // 5% off
        for _ in 0..2 {
            y = y * (1.5 - (x / 2.0) * y * y);
        }
        assert!((y - 1.0 / x.sqrt()).abs() < 1e-4);
    }
}
