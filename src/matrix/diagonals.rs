//! Diagonal and permutation builders for the packed-matrix layout.
//!
//! All builders produce [`Diagonals`] over the full slot vector, with the
//! `d×d` block replicated so one evaluation acts on every packed matrix at
//! once. Galois-element functions mirror the exact index sets of their
//! builders so key preloading and evaluation always agree.

use crate::lintrans::{rotate_slots, Diagonals, LinearTransformationParameters, Permutation};
use crate::params::Params;

use super::dense::Dense;

fn elements_for_indexes(params: &Params, indexes: Vec<i64>, naive: bool) -> Vec<u64> {
    LinearTransformationParameters {
        indexes,
        level_q: params.max_level(),
        scale: 1.0,
        giant_step: if naive { -1 } else { 0 },
    }
    .galois_elements(params)
}

/// Generalized diagonals of a square weight matrix, for
/// vector-times-matrix products on row-major packed data. `replicate`
/// copies the `d`-periodic pattern across the slot vector.
pub fn diagonalize(w: &Dense, replicate: usize, slots: usize) -> Diagonals<f64> {
    let (rows, cols) = w.dims();
    assert_eq!(rows, cols, "diagonalize expects a square matrix");
    let d = rows;
    let mut out = Diagonals::new();
    for i in -(d as i64 - 1)..d as i64 {
        let mut m = vec![0.0f64; slots];
        if i >= 0 {
            for j in 0..d - i as usize {
                m[j] = w.at(j + i as usize, j);
            }
        } else {
            for j in 0..(d as i64 + i) as usize {
                m[j] = w.at(j, (j as i64 - i) as usize);
            }
            m = rotate_slots(&m, i);
        }
        for t in 1..replicate {
            let (head, tail) = m.split_at_mut(t * d);
            tail[..d].copy_from_slice(&head[..d]);
        }
        out.insert(i, slots, m);
    }
    out
}

pub fn diagonalize_indexes(d: usize) -> Vec<i64> {
    (-(d as i64 - 1)..d as i64).collect()
}

pub fn diagonalize_galois_elements(params: &Params, d: usize) -> Vec<u64> {
    elements_for_indexes(params, diagonalize_indexes(d), false)
}

/// Transposition `(i,j) <-> (j,i)` of each `d×d` block; diagonals sit at
/// shifts `k·(d-1)` (section 4.1 of eprint/2018/1041).
pub fn transpose_diagonals(slots: usize, d: usize, scaling: f64) -> Diagonals<f64> {
    let dsqrt = d * d;
    let mut out = Diagonals::new();
    for i in -(d as i64 - 1)..d as i64 {
        let mut m = vec![0.0f64; slots];
        if i >= 0 {
            let i = i as usize;
            let mut j = 0;
            while j < dsqrt.saturating_sub(i * d) {
                m[i + j] = scaling;
                j += d + 1;
            }
        } else {
            let neg = (-i) as usize;
            let mut j = neg * d;
            while j < dsqrt {
                m[j] = scaling;
                j += d + 1;
            }
        }
        replicate_blocks(&mut m, dsqrt);
        out.insert(i * (d as i64 - 1), slots, m);
    }
    out
}

pub fn transpose_indexes(slots: usize, d: usize) -> Vec<i64> {
    let mut v: Vec<i64> = (-(d as i64 - 1)..d as i64)
        .map(|i| (i * (d as i64 - 1)).rem_euclid(slots as i64))
        .collect();
    v.sort_unstable();
    v.dedup();
    v
}

pub fn transpose_galois_elements(params: &Params, d: usize) -> Vec<u64> {
    elements_for_indexes(params, transpose_indexes(params.max_slots(), d), false)
}

/// Row-wise shift σ of the Halevi–Shoup product:
/// `σ(A)_{i,j} = A_{i,i+j}`.
pub fn permute_rows_diagonals(slots: usize, d: usize, scaling: f64, transpose: bool) -> Diagonals<f64> {
    let dsqrt = (d * d) as i64;
    let mut out = Diagonals::new();
    for i in -(d as i64 - 1)..d as i64 {
        let mut m = vec![0.0f64; slots];
        let blocks = slots / dsqrt as usize;
        for j in 0..(blocks * dsqrt as usize) as i64 {
            let r = (dsqrt + (j % dsqrt) - i * d as i64) % dsqrt;
            let hit = if i < 0 {
                r < d as i64 && r >= -i
            } else {
                r < d as i64 - i
            };
            if hit {
                m[j as usize] = scaling;
            }
        }
        out.insert(i, slots, m);
    }
    if transpose {
        // the transpose is applied first: σ(Aᵀ) and τ(Bᵀ)
        return out.compose(&transpose_diagonals(slots, d, 1.0), slots);
    }
    out
}

pub fn permute_rows_indexes(slots: usize, d: usize, transpose: bool) -> Vec<i64> {
    let base: Vec<i64> = (-(d as i64 - 1)..d as i64)
        .map(|i| i.rem_euclid(slots as i64))
        .collect();
    if transpose {
        return mul_indexes(&transpose_indexes(slots, d), &base, slots);
    }
    dedup_sorted(base)
}

pub fn permute_rows_galois_elements(params: &Params, d: usize, transpose: bool) -> Vec<u64> {
    elements_for_indexes(params, permute_rows_indexes(params.max_slots(), d, transpose), false)
}

/// Column-wise shift τ of the Halevi–Shoup product:
/// `τ(A)_{i,j} = A_{i+j,j}`.
pub fn permute_cols_diagonals(slots: usize, d: usize, scaling: f64, transpose: bool) -> Diagonals<f64> {
    let dsqrt = d * d;
    assert!(dsqrt <= slots, "d² cannot exceed the slot count");
    let mut out = Diagonals::new();
    if dsqrt < slots {
        for i in -(d as i64 - 1)..d as i64 {
            let mut m = vec![0.0f64; slots];
            if i >= 0 {
                for j in 0..d - i as usize {
                    m[j * d + i as usize] = scaling;
                }
            } else {
                for j in 0..(d as i64 + i) as usize {
                    let idx = (j as i64 - i + 1) * d as i64 + i;
                    m[idx as usize] = scaling;
                }
            }
            replicate_blocks(&mut m, dsqrt);
            out.insert(i * d as i64, slots, m);
        }
    } else {
        // d·d == slots: the row rotation wraps globally, one diagonal per
        // column
        for i in 0..d {
            let mut m = vec![0.0f64; slots];
            for j in 0..d {
                m[j * d + i] = scaling;
            }
            out.insert((i * d) as i64, slots, m);
        }
    }
    if transpose {
        // the transpose is applied first: σ(Aᵀ) and τ(Bᵀ)
        return out.compose(&transpose_diagonals(slots, d, 1.0), slots);
    }
    out
}

pub fn permute_cols_indexes(slots: usize, d: usize, transpose: bool) -> Vec<i64> {
    let dsqrt = d * d;
    let base: Vec<i64> = if dsqrt < slots {
        (-(d as i64 - 1)..d as i64)
            .map(|i| (i * d as i64).rem_euclid(slots as i64))
            .collect()
    } else {
        (0..d as i64).map(|i| i * d as i64).collect()
    };
    if transpose {
        return mul_indexes(&transpose_indexes(slots, d), &base, slots);
    }
    dedup_sorted(base)
}

pub fn permute_cols_galois_elements(params: &Params, d: usize, transpose: bool) -> Vec<u64> {
    elements_for_indexes(params, permute_cols_indexes(params.max_slots(), d, transpose), false)
}

/// Cyclic rotation by `k` inside every block of `d` slots (two masked
/// diagonals; always evaluated naively).
pub fn rotate_rows_diagonals(slots: usize, d: usize, k: usize) -> Diagonals<f64> {
    let k = k % d;
    let mut out = Diagonals::new();

    let mut d_left = vec![0.0f64; slots];
    for i in 0..slots / d {
        for j in 0..k {
            d_left[i * d + j] = 1.0;
        }
    }
    let idx = (k as i64 - d as i64).rem_euclid(slots as i64);
    let d_left = rotate_slots(&d_left, idx);
    out.insert(idx, slots, d_left);

    let mut d_right = vec![0.0f64; slots];
    for i in 0..slots / d {
        for j in k..d {
            d_right[i * d + j] = 1.0;
        }
    }
    let d_right = rotate_slots(&d_right, k as i64);
    out.insert(k as i64, slots, d_right);

    out
}

pub fn rotate_rows_indexes(slots: usize, d: usize, k: usize) -> Vec<i64> {
    let k = k % d;
    dedup_sorted(vec![
        (k as i64 - d as i64).rem_euclid(slots as i64),
        k as i64,
    ])
}

pub fn rotate_rows_galois_elements(params: &Params, d: usize, k: usize) -> Vec<u64> {
    elements_for_indexes(params, rotate_rows_indexes(params.max_slots(), d, k), true)
}

/// Head-splitting permutation: one `r×c` matrix becomes `split`
/// interleaved `r × c/split` heads with `pad` empty columns each.
pub fn split_permutation(
    slots: usize,
    rows: usize,
    cols: usize,
    split: usize,
    pad: usize,
    scaling: f64,
) -> Permutation<f64> {
    let flattened = split * rows * (cols / split + pad);
    let nb_matrices = slots / flattened;
    let mut perm = Permutation::with_capacity(nb_matrices * rows * cols);
    for m in 0..nb_matrices {
        for i in 0..rows {
            for j in 0..split {
                for k in 0..cols / split {
                    let src = i * cols + j * (cols / split) + k + m * rows * cols;
                    let dst = k
                        + i * (cols / split + pad)
                        + j * (rows * (cols / split + pad))
                        + m * flattened;
                    perm.push(src, dst, scaling);
                }
            }
        }
    }
    perm
}

pub fn split_diagonals(
    slots: usize,
    rows: usize,
    cols: usize,
    split: usize,
    pad: usize,
    scaling: f64,
) -> Diagonals<f64> {
    split_permutation(slots, rows, cols, split, pad, scaling).diagonals(slots)
}

pub fn split_galois_elements(
    params: &Params,
    rows: usize,
    cols: usize,
    split: usize,
    pad: usize,
) -> Vec<u64> {
    split_permutation(params.max_slots(), rows, cols, split, pad, 1.0).galois_elements(params)
}

/// Inverse of [`split_permutation`].
pub fn merge_permutation(
    slots: usize,
    rows: usize,
    cols: usize,
    split: usize,
    pad: usize,
    scaling: f64,
) -> Permutation<f64> {
    let flattened = split * rows * (cols / split + pad);
    let nb_matrices = slots / flattened;
    let mut perm = Permutation::with_capacity(nb_matrices * rows * cols);
    for m in 0..nb_matrices {
        for i in 0..rows {
            for j in 0..split {
                for k in 0..cols / split {
                    let dst = i * cols + j * (cols / split) + k + m * rows * cols;
                    let src = k
                        + i * (cols / split + pad)
                        + j * (rows * (cols / split + pad))
                        + m * flattened;
                    perm.push(src, dst, scaling);
                }
            }
        }
    }
    perm
}

pub fn merge_diagonals(
    slots: usize,
    rows: usize,
    cols: usize,
    split: usize,
    pad: usize,
    scaling: f64,
) -> Diagonals<f64> {
    merge_permutation(slots, rows, cols, split, pad, scaling).diagonals(slots)
}

pub fn merge_galois_elements(
    params: &Params,
    rows: usize,
    cols: usize,
    split: usize,
    pad: usize,
) -> Vec<u64> {
    merge_permutation(params.max_slots(), rows, cols, split, pad, 1.0).galois_elements(params)
}

/// Index set of a composition of two diagonal transformations.
pub fn mul_indexes(a: &[i64], b: &[i64], slots: usize) -> Vec<i64> {
    let mut out = std::collections::BTreeSet::new();
    for &i in a {
        for &j in b {
            out.insert((i + j).rem_euclid(slots as i64));
        }
    }
    out.into_iter().collect()
}

fn dedup_sorted(mut v: Vec<i64>) -> Vec<i64> {
    v.sort_unstable();
    v.dedup();
    v
}

fn replicate_blocks(m: &mut [f64], block: usize) {
    let n = m.len();
    let mut j = block;
    while j + block <= n {
        let (head, tail) = m.split_at_mut(j);
        tail[..block].copy_from_slice(&head[..block]);
        j += block;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lintrans::rotate_slots;

    fn apply(d: &Diagonals<f64>, v: &[f64]) -> Vec<f64> {
        let slots = v.len();
        let mut out = vec![0.0; slots];
        for (&k, diag) in &d.0 {
            let rot = rotate_slots(v, k);
            for i in 0..slots {
                out[i] += diag[i] * rot[i];
            }
        }
        out
    }

    #[test]
    fn diagonalize_computes_vec_mat_product() {
        let d = 4usize;
        let slots = 16usize;
        let w = Dense::new(
            d,
            d,
            (0..16).map(|x| ((x * 7 + 3) % 11) as f64 - 5.0).collect(),
        );
        let diags = diagonalize(&w, slots / d, slots);
        // x tiles the slots every d entries
        let x: Vec<f64> = (0..slots).map(|i| ((i % d) + 1) as f64).collect();
        let got = apply(&diags, &x);
        for block in 0..slots / d {
            for c in 0..d {
                let want: f64 = (0..d).map(|k| x[k] * w.at(k, c)).sum();
                let g = got[block * d + c];
                assert!((g - want).abs() < 1e-9, "block {block} col {c}: {g} vs {want}");
            }
        }
    }

    #[test]
    fn transpose_diagonals_transpose_blocks() {
        let d = 3usize;
        let slots = 32usize; // d² = 9 < 32, one full block + slack
        let diags = transpose_diagonals(slots, d, 1.0);
        let mut x = vec![0.0f64; slots];
        for i in 0..d * d {
            x[i] = (i + 1) as f64;
        }
        let got = apply(&diags, &x);
        for r in 0..d {
            for c in 0..d {
                let want = x[c * d + r];
                assert!(
                    (got[r * d + c] - want).abs() < 1e-9,
                    "({r},{c}): {} vs {want}",
                    got[r * d + c]
                );
            }
        }
    }

    #[test]
    fn permute_rows_is_sigma() {
        // σ(A)_{i,j} = A_{i, i+j mod d}
        let d = 4usize;
        let slots = 16usize;
        let diags = permute_rows_diagonals(slots, d, 1.0, false);
        let x: Vec<f64> = (0..slots).map(|i| i as f64 + 1.0).collect();
        let got = apply(&diags, &x);
        for i in 0..d {
            for j in 0..d {
                let want = x[i * d + (i + j) % d];
                assert!(
                    (got[i * d + j] - want).abs() < 1e-9,
                    "({i},{j}): {} vs {want}",
                    got[i * d + j]
                );
            }
        }
    }

    #[test]
    fn permute_cols_is_tau() {
        // τ(A)_{i,j} = A_{i+j mod d, j}
        let d = 4usize;
        for slots in [16usize, 64] {
            let diags = permute_cols_diagonals(slots, d, 1.0, false);
            let mut x = vec![0.0f64; slots];
            for i in 0..d * d {
                x[i] = (i * i + 1) as f64;
            }
            // replicate across blocks so global wraps agree
            for b in 1..slots / (d * d) {
                for i in 0..d * d {
                    x[b * d * d + i] = x[i];
                }
            }
            let got = apply(&diags, &x);
            for i in 0..d {
                for j in 0..d {
                    let want = x[((i + j) % d) * d + j];
                    assert!(
                        (got[i * d + j] - want).abs() < 1e-9,
                        "slots={slots} ({i},{j}): {} vs {want}",
                        got[i * d + j]
                    );
                }
            }
        }
    }

    #[test]
    fn rotate_rows_rotates_blocks() {
        let d = 8usize;
        let slots = 32usize;
        let k = 3usize;
        let diags = rotate_rows_diagonals(slots, d, k);
        // replicate a block pattern so edge wraps agree
        let x: Vec<f64> = (0..slots).map(|i| ((i % d) * (i % d)) as f64).collect();
        let got = apply(&diags, &x);
        for b in 0..slots / d {
            for j in 0..d {
                let want = x[b * d + (j + k) % d];
                assert!(
                    (got[b * d + j] - want).abs() < 1e-9,
                    "block {b} pos {j}: {} vs {want}",
                    got[b * d + j]
                );
            }
        }
    }

    #[test]
    fn split_then_merge_is_identity() {
        let (rows, cols, split, pad) = (2usize, 4usize, 2usize, 0usize);
        let slots = 16usize;
        let s = split_diagonals(slots, rows, cols, split, pad, 1.0);
        let m = merge_diagonals(slots, rows, cols, split, pad, 1.0);
        let x: Vec<f64> = (0..slots).map(|i| (i * 3 + 1) as f64).collect();
        let split_x = apply(&s, &x);
        let back = apply(&m, &split_x);
        for i in 0..rows * cols {
            assert!((back[i] - x[i]).abs() < 1e-9, "slot {i}");
        }
        // and the split layout interleaves heads
        let heads = crate::matrix::dense::split_heads(
            &Dense::new(rows, cols, x[..rows * cols].to_vec()),
            split,
        );
        let hc = cols / split + pad;
        for h in 0..split {
            for r in 0..rows {
                for c in 0..cols / split {
                    let want = heads[h].at(r, c);
                    let got = split_x[h * rows * hc + r * hc + c];
                    assert!((got - want).abs() < 1e-9, "head {h} ({r},{c})");
                }
            }
        }
    }
}
