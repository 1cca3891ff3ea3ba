//! SoftMax over packed rows.
//!
//! Per row of length `k`: subtract the approximate row max (scaled into
//! the exp interval), exponentiate with a Chebyshev polynomial, reduce the
//! row sums of all array elements into a single compressed ciphertext,
//! invert (directly or through 1/√ with Newton refinement, then squared),
//! and broadcast the reciprocal back over the rows.

use crate::bootstrap::Bootstrapper;
use crate::ckks::{chebyshev_approximate, evaluate_polynomial, Polynomial};
use crate::error::Result;
use crate::matrix::mask::{extract_galois_elements, mask_and_compress_galois_elements};
use crate::matrix::MatrixEvaluator;
use crate::params::Params;
use crate::rlwe::Ciphertext;

use super::innermax::{self, InnerMaxParameters};
use super::norm::inv_sqrt;

#[derive(Clone, Debug)]
pub struct SoftMaxParameters {
    pub exp_offset: f64,
    pub exp_min: f64,
    pub exp_max: f64,
    pub exp_deg: usize,
    pub inv_min: f64,
    pub inv_max: f64,
    pub inv_deg: usize,
    /// Row length.
    pub k: usize,
    /// Total masked vector length: rows · row length · matrices per array.
    pub tot_vec_size: usize,
    /// When positive, evaluate 1/√s, refine with Newton, and square.
    pub inv_sqrt_iter: usize,
    pub max_parameters: InnerMaxParameters,
}

impl SoftMaxParameters {
    pub fn exp_poly(&self) -> Polynomial {
        chebyshev_approximate(f64::exp, self.exp_min, self.exp_max, self.exp_deg)
    }

    pub fn inv_poly(&self) -> Polynomial {
        if self.inv_sqrt_iter > 0 {
            chebyshev_approximate(|x| 1.0 / x.sqrt(), self.inv_min, self.inv_max, self.inv_deg)
        } else {
            chebyshev_approximate(|x| 1.0 / x, self.inv_min, self.inv_max, self.inv_deg)
        }
    }
}

/// In-place SoftMax over the packed rows of `cts`.
pub fn evaluate_softmax(
    eval: &mut MatrixEvaluator,
    btp: &mut dyn Bootstrapper,
    p: &SoftMaxParameters,
    cts: &mut Vec<Ciphertext>,
) -> Result<()> {
    let exp_poly = p.exp_poly();
    let inv_poly = p.inv_poly();
    let k = p.k;

    // a·(x - max(x)) + b maps the exp argument into [-1, 1]
    normalize(eval, btp, p, &exp_poly, cts)?;

    // e = exp(x)
    let num = eval.polynomial(cts, &exp_poly)?;
    *cts = num.clone();

    // s = Σ_row e, one compressed ciphertext for all elements
    let (a_inv, b_inv) = inv_poly.change_of_basis();
    let mut norm = num;
    eval.inner_sum(&mut norm, 1, k)?;
    let mut ct = eval.mask_and_compress(&mut norm, a_inv, b_inv, k, p.tot_vec_size, true)?;

    // r = 1/s (or (1/√s)² with Newton refinement)
    if ct.level() < inv_poly.depth() {
        ct = btp.bootstrap(&ct)?;
    }

    let mut half: Option<Ciphertext> = None;
    if p.inv_sqrt_iter > 0 {
        // s/2, recovered from the affine-mapped argument; kept small for
        // the bootstrap and restored by 128 after
        let ev = eval.eval0();
        let mut h = ct.clone();
        ev.sub_scalar_inplace(&mut h, b_inv);
        ev.mul_scalar_inplace(&mut h, 0.5 / (a_inv * 128.0));
        ev.rescale_inplace(&mut h)?;
        half = Some(h);
    }

    let default_scale = eval.params().default_scale();
    let mut ct = evaluate_polynomial(eval.eval0(), &ct, &inv_poly, default_scale)?;

    if p.inv_sqrt_iter > 0 {
        let mut pair = btp.bootstrap_many(vec![ct, half.take().unwrap()])?;
        let mut h = pair.pop().unwrap();
        ct = pair.pop().unwrap();
        let ev = eval.eval0();
        ev.mul_scalar_int_inplace(&mut h, 128);
        inv_sqrt(ev, btp, &mut ct, &mut h, p.inv_sqrt_iter)?;
        let sq = ev.mul_relin_new(&ct, &ct)?;
        ct = sq;
        ev.rescale_inplace(&mut ct)?;
    } else {
        ct = btp.bootstrap(&ct)?;
    }

    // broadcast the reciprocal back to every row
    let mut norm = eval.extract(&ct, cts.len())?;
    eval.mask_and_replicate(&mut norm, 1.0, k, true)?;

    // out = e · r
    eval.dot_ct(cts, &norm)?;
    eval.rescale(cts)?;
    Ok(())
}

/// `x <- a_exp·(x - max(x)) + b_exp + offset·a_exp`, rescaled.
fn normalize(
    eval: &mut MatrixEvaluator,
    btp: &mut dyn Bootstrapper,
    p: &SoftMaxParameters,
    exp_poly: &Polynomial,
    cts: &mut Vec<Ciphertext>,
) -> Result<()> {
    let (a_exp, b_exp) = exp_poly.change_of_basis();

    let maxes = innermax::inner_max(eval, btp, &p.max_parameters, cts.clone(), p.k)?;
    let mut maxes = maxes;
    eval.mask_and_replicate(&mut maxes, a_exp, p.k, false)?;

    let drop = cts[0].level().saturating_sub(maxes[0].level());
    eval.drop_level(cts, drop);
    eval.mul_scalar(cts, a_exp)?;
    eval.sub_ct(cts, &maxes)?;
    eval.add_scalar(cts, b_exp + p.exp_offset * a_exp)?;
    eval.rescale(cts)?;
    Ok(())
}

/// Rotation keys for the SoftMax stage over `num_cts` array elements.
pub fn softmax_galois_elements(params: &Params, p: &SoftMaxParameters, num_cts: usize) -> Vec<u64> {
    let mut out = std::collections::BTreeSet::new();
    out.extend(mask_and_compress_galois_elements(params, num_cts));
    out.extend(params.galois_elements_for_inner_sum(1, p.k));
    out.extend(params.galois_elements_for_replicate(1, p.k));
    out.extend(inner_max_galois_elements(params, p.k, num_cts));
    out.extend(extract_galois_elements(params, num_cts.max(p.k)));
    out.into_iter().collect()
}

/// Rotation keys of the inner-max halving/packing schedule.
pub fn inner_max_galois_elements(params: &Params, k: usize, num_cts: usize) -> Vec<u64> {
    let mut out = std::collections::BTreeSet::new();
    let k0 = k;
    let mut k = k;
    let mut prev_k = k;
    let mut d = num_cts;
    while k != 1 {
        let shift = if k % 2 == 0 {
            k / 2
        } else {
            k - (1 << (usize::BITS - 1 - (k - 1).leading_zeros()))
        };
        out.insert(params.galois_element(shift as i64));
        let pack = prev_k / (k - shift);
        if pack > 1 {
            for j in 1..pack {
                out.insert(params.galois_element(-((shift * j) as i64)));
            }
            d = d.div_ceil(pack);
            prev_k = k >> 1;
        }
        k -= shift;
    }
    let _ = d;
    // the final unpacking extracts all original block positions
    out.extend(extract_galois_elements(params, k0.max(num_cts)));
    out.into_iter().collect()
}

/// Plaintext reference with the same approximations as the encrypted
/// path: rows of length `k` inside `values`.
pub fn softmax_approximate(p: &SoftMaxParameters, values: &mut [f64]) {
    let exp_poly = p.exp_poly();
    let inv_poly = p.inv_poly();
    let k = p.k;
    let mut maxes = values.to_vec();
    innermax::inner_max_plaintext(&p.max_parameters, &mut maxes, k);
    for base in (0..values.len()).step_by(k) {
        let m = maxes[base];
        for x in values[base..base + k].iter_mut() {
            *x = exp_poly.eval(*x - m + p.exp_offset);
        }
        let s: f64 = values[base..base + k].iter().sum();
        let r = if p.inv_sqrt_iter > 0 {
            let y = inv_poly.eval(s);
            let mut y = y;
            for _ in 0..p.inv_sqrt_iter {
                y = y * (1.5 - (s / 2.0) * y * y);
            }
            y * y
        } else {
            inv_poly.eval(s)
        };
        for x in values[base..base + k].iter_mut() {
            *x *= r;
        }
    }
}

/// Exact plaintext softmax.
pub fn softmax_exact(values: &mut [f64], k: usize) {
    for base in (0..values.len()).step_by(k) {
        let row = &mut values[base..base + k];
        let m = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut s = 0.0;
        for x in row.iter_mut() {
            *x = (*x - m).exp();
            s += *x;
        }
        for x in row.iter_mut() {
            *x /= s;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SoftMaxParameters {
        SoftMaxParameters {
            exp_offset: 0.0,
            exp_min: -16.0,
            exp_max: 2.0,
            exp_deg: 31,
            inv_min: 0.5,
            inv_max: 16.0,
            inv_deg: 31,
            k: 4,
            tot_vec_size: 16,
            inv_sqrt_iter: 0,
            max_parameters: InnerMaxParameters {
                abs_max: 10.0,
                coeffs: vec![vec![
                    0.0, 1.27020217932, 0.0, -0.41513217792, 0.0, 0.23969221445, 0.0,
                    -0.16067723908, 0.0, 0.11530467170, 0.0, -0.08537291689, 0.0, 0.06375404757,
                    0.0, -0.10285141221,
                ]],
            },
        }
    }

    #[test]
    fn approximate_softmax_tracks_exact() {
        let p = params();
        let mut values = vec![1.0, 3.0, -2.0, 0.5, -1.0, -4.0, 2.0, 0.0];
        let mut exact = values.clone();
        softmax_approximate(&p, &mut values);
        softmax_exact(&mut exact, p.k);
        for i in 0..values.len() {
            assert!(
                (values[i] - exact[i]).abs() < 0.15,
                "slot {i}: approx {} vs exact {}",
                values[i],
                exact[i]
            );
        }
        // rows still sum to ~1
        for base in (0..values.len()).step_by(p.k) {
            let s: f64 = values[base..base + p.k].iter().sum();
            assert!((s - 1.0).abs() < 0.2, "row at {base} sums to {s}");
        }
    }
}
