//! ReLU via the minimax-composite sign approximation.
//!
//! `step(x) = (sign(x) + 1)/2` is obtained by halving the last composite
//! factor and shifting its constant term; `relu(x) = x · step(x)`. Inputs
//! are assumed pre-scaled into [-1, 1] (the feed-forward weights fold
//! `1/abs_max` in).

use crate::bootstrap::Bootstrapper;
use crate::ckks::{composite_eval, MinimaxCompositePolynomial};
use crate::error::Result;
use crate::matrix::MatrixEvaluator;
use crate::rlwe::Ciphertext;

#[derive(Clone, Debug)]
pub struct ReluParameters {
    /// Composite minimax coefficients of sign over [-1, 1].
    pub coeffs: Vec<Vec<f64>>,
    /// Values are scaled by `1/abs_max` before the composite.
    pub abs_max: f64,
}

impl ReluParameters {
    pub fn depth(&self) -> usize {
        MinimaxCompositePolynomial::from_coeff_tables(&self.coeffs).depth()
    }
}

/// Evaluates the step composite on every array element, bootstrapping
/// between factors whenever the level budget runs short.
pub fn step(
    eval: &mut MatrixEvaluator,
    btp: &mut dyn Bootstrapper,
    coeffs: &[Vec<f64>],
    cts: Vec<Ciphertext>,
) -> Result<Vec<Ciphertext>> {
    let composite = MinimaxCompositePolynomial::from_coeff_tables(coeffs).to_step();
    let mut out = cts;
    for poly in &composite.polys {
        if out[0].level() < poly.depth() {
            out = btp.bootstrap_many(out)?;
        }
        out = eval.polynomial(&out, poly)?;
    }
    Ok(out)
}

/// In-place ReLU over a ciphertext array: `x <- x · step(x)`.
pub fn evaluate_relu(
    eval: &mut MatrixEvaluator,
    btp: &mut dyn Bootstrapper,
    params: &ReluParameters,
    cts: &mut [Ciphertext],
) -> Result<()> {
    let step_cts = step(eval, btp, &params.coeffs, cts.to_vec())?;
    eval.dot_ct(cts, &step_cts)?;
    eval.rescale(cts)?;
    Ok(())
}

/// Plaintext reference: exact ReLU.
pub fn relu_exact(values: &mut [f64]) {
    for x in values.iter_mut() {
        if *x < 0.0 {
            *x = 0.0;
        }
    }
}

/// Plaintext reference with the same approximation error as the encrypted
/// path (input expected pre-scaled into [-1, 1]).
pub fn relu_approximate(coeffs: &[Vec<f64>], values: &mut [f64]) {
    for x in values.iter_mut() {
        let sign = composite_eval(coeffs, -1.0, 1.0, *x);
        *x *= 0.5 * sign + 0.5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // degree-15 single-factor sign approximation, adequate for unit tests
    pub(crate) fn test_sign_coeffs() -> Vec<Vec<f64>> {
        vec![vec![
            0.0, 1.27020217932, 0.0, -0.41513217792, 0.0, 0.23969221445, 0.0, -0.16067723908, 0.0,
            0.11530467170, 0.0, -0.08537291689, 0.0, 0.06375404757, 0.0, -0.10285141221,
        ]]
    }

    #[test]
    fn approximate_relu_tracks_exact_away_from_zero() {
        let coeffs = test_sign_coeffs();
        for i in 0..50 {
            let x = -1.0 + 2.0 * i as f64 / 49.0;
            if x.abs() < 0.15 {
                continue; // transition band of the approximation
            }
            let mut v = [x];
            relu_approximate(&coeffs, &mut v);
            let want = x.max(0.0);
            assert!(
                (v[0] - want).abs() < 0.12,
                "x={x}: approx {} vs exact {want}",
                v[0]
            );
        }
    }
}
