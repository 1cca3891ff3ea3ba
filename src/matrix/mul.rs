//! Halevi–Shoup square-matrix multiplication over packed ciphertexts.
//!
//! `C = σ(A) ⊙ τ(B) + Σ_i colrot_i(σ(A)) ⊙ rowrot_i(τ(B))`, with the σ/τ
//! permutations and per-shift rotations as pre-encoded linear
//! transformations, both operand decompositions hoisted once across the
//! inner loop, and one relinearization at the end. When `d·d` fills the
//! slot vector exactly, the row rotation collapses to a single
//! automorphism.

use crate::ckks;
use crate::error::{Error, Result};
use crate::lintrans::{self, LinearTransformation, LinearTransformationParameters};
use crate::params::Params;
use crate::rlwe::Ciphertext;

use super::diagonals::{
    permute_cols_diagonals, permute_cols_indexes, permute_rows_diagonals, permute_rows_indexes,
    rotate_rows_diagonals, rotate_rows_indexes,
};
use super::MatrixEvaluator;

pub struct MulParameters {
    pub permute_rows: LinearTransformation,
    pub permute_cols: LinearTransformation,
    /// Column rotations of σ(A) by 1..d-1 (naive, two diagonals each).
    pub rotate_cols: Vec<LinearTransformation>,
    /// Row rotations of τ(B); `None` when `d·d == slots` and a plain
    /// automorphism does the job.
    pub rotate_rows: Option<Vec<LinearTransformation>>,
    dims: usize,
}

impl MulParameters {
    pub fn level(&self) -> usize {
        self.permute_rows.level_q
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// All rotation keys the product needs.
    pub fn galois_elements(&self, params: &Params) -> Vec<u64> {
        let mut out = std::collections::BTreeSet::new();
        out.extend(self.permute_rows.galois_elements(params));
        out.extend(self.permute_cols.galois_elements(params));
        for lt in &self.rotate_cols {
            out.extend(lt.galois_elements(params));
        }
        match &self.rotate_rows {
            Some(rr) => {
                for lt in rr {
                    out.extend(lt.galois_elements(params));
                }
            }
            None => {
                for i in 1..self.dims {
                    out.insert(params.galois_element((i * self.dims) as i64));
                }
            }
        }
        out.into_iter().collect()
    }
}

/// Static Galois-element set of a product with the given geometry, for
/// key preloading before the parameters are built.
pub fn mul_galois_elements(
    params: &Params,
    dims: usize,
    transpose_left: bool,
    transpose_right: bool,
) -> Vec<u64> {
    let slots = params.max_slots();
    let mut out = std::collections::BTreeSet::new();
    let bsgs = |indexes: Vec<i64>| LinearTransformationParameters {
        indexes,
        level_q: params.max_level(),
        scale: 1.0,
        giant_step: 0,
    };
    let naive = |indexes: Vec<i64>| LinearTransformationParameters {
        indexes,
        level_q: params.max_level(),
        scale: 1.0,
        giant_step: -1,
    };
    out.extend(bsgs(permute_rows_indexes(slots, dims, transpose_left)).galois_elements(params));
    out.extend(bsgs(permute_cols_indexes(slots, dims, transpose_right)).galois_elements(params));
    for i in 1..dims {
        out.extend(naive(rotate_rows_indexes(slots, dims, i)).galois_elements(params));
    }
    if dims * dims != slots {
        for i in 1..dims {
            out.extend(
                naive(rotate_rows_indexes(slots, dims * dims, i * dims)).galois_elements(params),
            );
        }
    } else {
        for i in 1..dims {
            out.insert(params.galois_element((i * dims) as i64));
        }
    }
    out.into_iter().collect()
}

impl MatrixEvaluator {
    /// Builds the permutations and rotations of a product at `level`,
    /// folding `scaling` (√ on each side, sign on the rows) into σ and τ.
    pub fn new_mul_parameters(
        &mut self,
        level: usize,
        scaling: f64,
        transpose_left: bool,
        transpose_right: bool,
        scale_a: f64,
        scale_b: f64,
    ) -> Result<MulParameters> {
        if level < 3 {
            return Err(Error::Range {
                op: "new_mul_parameters",
                level,
                required: 3,
            });
        }
        let params = self.params().clone();
        let dims = self.dims();
        let slots = params.max_slots();
        let q = params.q();

        let default_scale = params.default_scale();
        let scale_out = q[level - 2] as f64;

        let mut scaling_rows = scaling.abs().sqrt();
        let scaling_cols = scaling_rows;
        if scaling < 0.0 {
            scaling_rows = -scaling_rows;
        }

        let permute_rows = self.new_linear_transformation(
            level,
            scale_a,
            default_scale,
            false,
            &permute_rows_diagonals(slots, dims, scaling_rows, transpose_left),
        )?;
        let permute_cols = self.new_linear_transformation(
            level,
            scale_b,
            scale_out,
            false,
            &permute_cols_diagonals(slots, dims, scaling_cols, transpose_right),
        )?;

        let mut rotate_cols = Vec::with_capacity(dims - 1);
        for i in 1..dims {
            rotate_cols.push(self.new_linear_transformation(
                level - 1,
                scale_out,
                scale_out,
                true,
                &rotate_rows_diagonals(slots, dims, i),
            )?);
        }

        let rotate_rows = if dims * dims != slots {
            let mut rr = Vec::with_capacity(dims - 1);
            for i in 1..dims {
                rr.push(self.new_linear_transformation(
                    level - 1,
                    scale_out,
                    scale_out,
                    true,
                    &rotate_rows_diagonals(slots, dims * dims, i * dims),
                )?);
            }
            Some(rr)
        } else {
            None
        };

        Ok(MulParameters {
            permute_rows,
            permute_cols,
            rotate_cols,
            rotate_rows,
            dims,
        })
    }

    /// Element-wise Halevi–Shoup product of two ciphertext arrays.
    pub fn mul_ct(
        &mut self,
        a: &[Ciphertext],
        b: &[Ciphertext],
        mp: &MulParameters,
    ) -> Result<Vec<Ciphertext>> {
        let mut out: Vec<Option<Ciphertext>> = (0..a.len()).map(|_| None).collect();
        self.pool.execute(
            a.iter()
                .zip(b.iter())
                .zip(out.iter_mut())
                .map(|((ca, cb), slot)| {
                    move |ev: &mut ckks::Evaluator| {
                        *slot = Some(squared_mat_mul(ev, ca, cb, mp)?);
                        Ok(())
                    }
                })
                .collect(),
        )?;
        Ok(out.into_iter().map(|o| o.unwrap()).collect())
    }
}

/// One packed product: 3 levels consumed, result left at
/// `scale·q[level-2]` for the caller to rescale.
fn squared_mat_mul(
    ev: &mut ckks::Evaluator,
    a: &Ciphertext,
    b: &Ciphertext,
    mp: &MulParameters,
) -> Result<Ciphertext> {
    let level = a.level().min(b.level()).min(mp.level());
    if level < 3 {
        return Err(Error::Range {
            op: "mul_ct",
            level,
            required: 3,
        });
    }

    let mut a_in = a.clone();
    a_in.resize_level(level);
    let mut b_in = b.clone();
    b_in.resize_level(level);

    // σ and τ permutations, rescaled
    let mut a_p = lintrans::evaluate(ev, &a_in, &mp.permute_rows)?;
    ev.rescale_inplace(&mut a_p)?;
    let mut b_p = lintrans::evaluate(ev, &b_in, &mp.permute_cols)?;
    ev.rescale_inplace(&mut b_p)?;

    // first inner-product term, kept at degree 2
    let mut c = ev.mul_new(&a_p, &b_p)?;

    // hoist both permuted operands once for the whole loop
    let decomp_a = ev.decompose_ntt(&a_p)?;
    let decomp_b = ev.decompose_ntt(&b_p)?;

    let d = mp.dims();
    for i in 1..d {
        let mut a_i = lintrans::evaluate_hoisted(ev, &a_p, &decomp_a, &mp.rotate_cols[i - 1])?;
        ev.rescale_inplace(&mut a_i)?;

        let mut b_i = match &mp.rotate_rows {
            Some(rr) => lintrans::evaluate_hoisted(ev, &b_p, &decomp_b, &rr[i - 1])?,
            None => {
                let mut o = b_p.clone();
                ev.rotate_hoisted(&b_p, &decomp_b, (i * d) as i64, &mut o)?;
                ev.scale_up_modulus(&mut o);
                o
            }
        };
        ev.rescale_inplace(&mut b_i)?;

        ev.mul_then_add(&a_i, &b_i, &mut c)?;
    }

    ev.relinearize_inplace(&mut c)?;
    Ok(c)
}
