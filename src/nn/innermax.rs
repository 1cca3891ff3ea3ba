//! Approximate row-maximum by pairwise comparisons.
//!
//! Each halving step rotates by `shift`, masks the surviving lanes, and
//! blends `max(a, b) = step(a-b)·(a-b) + b` with the minimax step. As the
//! active block length `k` shrinks, several array elements are packed into
//! one ciphertext (the rotate-and-add grouping tracked by `keys`), so the
//! expensive comparisons amortize.

use crate::bootstrap::Bootstrapper;
use crate::ckks::composite_eval;
use crate::error::Result;
use crate::matrix::MatrixEvaluator;
use crate::rlwe::Ciphertext;

use super::relu::step;

#[derive(Clone, Debug)]
pub struct InnerMaxParameters {
    /// Inputs are scaled by `1/abs_max` into the comparison domain.
    pub abs_max: f64,
    /// Composite minimax coefficients of sign over [-1, 1].
    pub coeffs: Vec<Vec<f64>>,
}

impl InnerMaxParameters {
    /// Depth of one comparison: the step composite plus the blend product.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        for c in &self.coeffs {
            let deg = (c.len() - 1).max(1);
            depth += (usize::BITS - deg.leading_zeros()) as usize;
        }
        depth + 1
    }
}

/// Approximate `max(a, b)` element-wise: `step(a-b)·(a-b) + b`.
pub fn max(
    eval: &mut MatrixEvaluator,
    btp: &mut dyn Bootstrapper,
    params: &InnerMaxParameters,
    a: &[Ciphertext],
    b: &[Ciphertext],
) -> Result<Vec<Ciphertext>> {
    let mut diff = a.to_vec();
    eval.sub_ct(&mut diff, b)?;

    let mut step_cts = step(eval, btp, &params.coeffs, diff.clone())?;

    let drop = diff[0]
        .level()
        .saturating_sub(step_cts[0].level() + 1);
    eval.drop_level(&mut diff, drop);
    eval.match_scales_for_mul(&mut step_cts, &mut diff, a[0].scale())?;
    eval.dot_ct(&mut step_cts, &diff)?;
    eval.rescale(&mut step_cts)?;
    eval.add_ct(&mut step_cts, b)?;
    Ok(step_cts)
}

/// Reduces each `k`-block of every array element to its (approximate)
/// maximum, packing elements together as the active block shrinks.
/// Returns one ciphertext per input element with the block max in the
/// first lane of each block.
pub fn inner_max(
    eval: &mut MatrixEvaluator,
    btp: &mut dyn Bootstrapper,
    params: &InnerMaxParameters,
    mut cts: Vec<Ciphertext>,
    k: usize,
) -> Result<Vec<Ciphertext>> {
    let slots = eval.params().max_slots();
    let nb = cts.len();
    let d = k;
    let mut k = k;
    let mut prev_k = k;
    let mut step_len = k;
    let mut tot_pack = 1usize;
    let mut keys = vec![0usize; d];
    keys[0] = 1;
    let mut iter = 0usize;

    while k != 1 {
        let shift = if k % 2 == 0 {
            k / 2
        } else {
            step_len = k;
            k - (1 << (usize::BITS - 1 - (k - 1).leading_zeros()))
        };

        if cts[0].level() < 1 + params.depth() {
            cts = btp.bootstrap_many(cts)?;
        }

        let mut rotated = cts.clone();
        {
            let ev = eval.eval0();
            for ct in rotated.iter_mut() {
                ev.rotate_inplace(ct, shift as i64)?;
            }
        }

        let scale = if iter == 0 { 1.0 / params.abs_max } else { 1.0 };
        iter += 1;
        let mut mask = vec![0.0f64; slots];
        for i in 0..slots / step_len {
            let offset0 = i * step_len;
            for j in 0..step_len / k {
                let offset1 = j * k;
                for m in 0..k - shift {
                    mask[offset0 + offset1 + m] = scale;
                }
            }
        }

        eval.dot_vec(&mut cts, &mask)?;
        eval.dot_vec(&mut rotated, &mask)?;
        eval.rescale(&mut cts)?;
        eval.rescale(&mut rotated)?;

        cts = max(eval, btp, params, &cts, &rotated)?;

        let pack = prev_k / (k - shift);
        if pack > 1 {
            let snapshot = keys.clone();
            for j in 1..pack {
                for (i, &c) in snapshot.iter().enumerate() {
                    if c != 0 {
                        keys[i + shift * j] = c + j * tot_pack;
                    }
                }
                let groups = cts.len().div_ceil(pack);
                for i in 0..groups {
                    if pack * i + j >= cts.len() {
                        break;
                    }
                    let (head, tail) = cts.split_at_mut(pack * i + j);
                    let src = &mut tail[0];
                    let ev = eval.eval0();
                    ev.rotate_inplace(src, -((shift * j) as i64))?;
                    ev.add_inplace(&mut head[pack * i], src)?;
                }
            }
            let groups = cts.len().div_ceil(pack);
            for i in 0..groups {
                cts.swap(i, pack * i);
            }
            cts.truncate(groups);
            prev_k = k >> 1;
            tot_pack *= pack;
        }

        k -= shift;
    }

    cts = btp.bootstrap_many(cts)?;
    eval.mul_scalar(&mut cts, params.abs_max)?;

    // lane → packed-element mapping accumulated above
    let mut lane_of = std::collections::HashMap::new();
    for (i, &c) in keys.iter().enumerate() {
        if c != 0 {
            lane_of.insert(c - 1, i);
        }
    }

    let mut out: Vec<Option<Ciphertext>> = (0..nb).map(|_| None).collect();
    for (i, ct) in cts.iter().enumerate() {
        let extracted = eval.extract(ct, d)?;
        for j in 0..tot_pack {
            let dst = j + i * tot_pack;
            if dst >= nb {
                break;
            }
            out[dst] = Some(extracted[lane_of[&j]].clone());
        }
    }
    Ok(out.into_iter().map(|o| o.unwrap()).collect())
}

/// Plaintext reference of the comparison gate.
pub fn approximate_max(params: &InnerMaxParameters, a: &[f64], b: &[f64], out: &mut [f64]) {
    for i in 0..a.len() {
        let diff = a[i] - b[i];
        let s = composite_eval(&params.coeffs, -1.0, 1.0, diff);
        out[i] = diff * (0.5 * s + 0.5) + b[i];
    }
}

/// Plaintext reference of the full block-max reduction (values already in
/// natural units; the `1/abs_max` scaling is applied internally).
pub fn inner_max_plaintext(params: &InnerMaxParameters, values: &mut [f64], k: usize) {
    let inv = 1.0 / params.abs_max;
    let mut work: Vec<f64> = values.iter().map(|&x| x * inv).collect();
    let n = work.len();
    let mut kk = k;
    while kk != 1 {
        let shift = if kk % 2 == 0 {
            kk / 2
        } else {
            kk - (1 << (usize::BITS - 1 - (kk - 1).leading_zeros()))
        };
        let rotated: Vec<f64> = (0..n).map(|i| work[(i + shift) % n]).collect();
        // mask both to the surviving lanes, then blend
        let mut masked_a = vec![0.0; n];
        let mut masked_b = vec![0.0; n];
        for base in (0..n).step_by(k) {
            for m in 0..kk - shift {
                masked_a[base + m] = work[base + m];
                masked_b[base + m] = rotated[base + m];
            }
        }
        let mut blended = vec![0.0; n];
        approximate_max(params, &masked_a, &masked_b, &mut blended);
        work = blended;
        kk -= shift;
    }
    for (v, w) in values.iter_mut().zip(work.iter()) {
        *v = w * params.abs_max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> InnerMaxParameters {
        InnerMaxParameters {
            abs_max: 10.0,
            coeffs: vec![vec![
                0.0, 1.27020217932, 0.0, -0.41513217792, 0.0, 0.23969221445, 0.0, -0.16067723908,
                0.0, 0.11530467170, 0.0, -0.08537291689, 0.0, 0.06375404757, 0.0, -0.10285141221,
            ]],
        }
    }

    #[test]
    fn plaintext_inner_max_finds_block_maxima() {
        let p = params();
        // blocks of 4 with clearly separated values
        let mut values = vec![
            1.0, 7.0, -3.0, 2.0, // max 7
            -5.0, -1.0, -9.0, -2.0, // max -1
        ];
        inner_max_plaintext(&p, &mut values, 4);
        assert!((values[0] - 7.0).abs() < 0.5, "got {}", values[0]);
        assert!((values[4] - (-1.0)).abs() < 0.5, "got {}", values[4]);
    }

    #[test]
    fn plaintext_inner_max_odd_block() {
        let p = params();
        let mut values = vec![2.0, 8.0, -1.0, 0.5, 3.0, -4.0, 1.0, 6.5, 0.0, 2.5];
        // k = 5: odd schedule (shift = 1, then halving on k = 4)
        inner_max_plaintext(&p, &mut values, 5);
        assert!((values[0] - 8.0).abs() < 0.6, "got {}", values[0]);
        assert!((values[5] - 6.5).abs() < 0.6, "got {}", values[5]);
    }

    #[test]
    fn depth_counts_blend() {
        let p = params();
        assert_eq!(p.depth(), 5);
    }
}
