//! Coefficient-vector kernels.
//!
//! Every kernel processes its operands in fixed blocks of eight and
//! requires `len % 8 == 0` (the ring dimension is a power of two ≥ 8, so
//! whole rows always qualify). Operands must have identical lengths.
//!
//! Tightness contracts: unless the name carries `lazy`, inputs are expected
//! in `[0, q)` and outputs are produced in `[0, q)`. `*_lazy` outputs are in
//! `[0, 2q)`; accumulating kernels (`*_then_add_lazy`) grow their
//! accumulator by up to `2q` per call and rely on the caller reducing
//! before `2^64` overflows (see `Params::qi_overflow_margin`).

use super::modular::{bred_add, cred, mred, mred_lazy};

#[inline(always)]
fn check_lens(lens: &[usize]) {
    let n = lens[0];
    assert!(n % 8 == 0, "vector length must be a multiple of 8");
    for &l in lens {
        assert_eq!(l, n, "operand length mismatch");
    }
}

/// c = a + b mod q. Inputs in `[0, q)`.
pub fn add_vec(a: &[u64], b: &[u64], c: &mut [u64], q: u64) {
    check_lens(&[a.len(), b.len(), c.len()]);
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            c[k] = cred(a[k] + b[k], q);
        }
    }
}

/// c = a + b, output in `[0, 2q)`.
pub fn add_vec_lazy(a: &[u64], b: &[u64], c: &mut [u64]) {
    check_lens(&[a.len(), b.len(), c.len()]);
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            c[k] = a[k] + b[k];
        }
    }
}

/// c += a mod q. Inputs in `[0, q)`.
pub fn add_assign_vec(c: &mut [u64], a: &[u64], q: u64) {
    check_lens(&[a.len(), c.len()]);
    for (c, a) in c.chunks_exact_mut(8).zip(a.chunks_exact(8)) {
        for k in 0..8 {
            c[k] = cred(c[k] + a[k], q);
        }
    }
}

/// c -= a mod q. Inputs in `[0, q)`.
pub fn sub_assign_vec(c: &mut [u64], a: &[u64], q: u64) {
    check_lens(&[a.len(), c.len()]);
    for (c, a) in c.chunks_exact_mut(8).zip(a.chunks_exact(8)) {
        for k in 0..8 {
            c[k] = cred(c[k] + q - a[k], q);
        }
    }
}

/// In-place Barrett reduction of arbitrary residues into `[0, q)`.
pub fn reduce_assign_vec(c: &mut [u64], q: u64, brc: [u64; 2]) {
    assert!(c.len() % 8 == 0, "vector length must be a multiple of 8");
    for c in c.chunks_exact_mut(8) {
        for k in 0..8 {
            c[k] = bred_add(c[k], q, brc);
        }
    }
}

/// In-place scalar Montgomery multiplication (`s < q`, Montgomery form).
pub fn mul_scalar_montgomery_assign_vec(c: &mut [u64], s_mont: u64, q: u64, nu: u64) {
    assert!(c.len() % 8 == 0, "vector length must be a multiple of 8");
    for c in c.chunks_exact_mut(8) {
        for k in 0..8 {
            c[k] = mred(c[k], s_mont, q, nu);
        }
    }
}

/// c = a - b mod q. Inputs in `[0, q)`.
pub fn sub_vec(a: &[u64], b: &[u64], c: &mut [u64], q: u64) {
    check_lens(&[a.len(), b.len(), c.len()]);
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            c[k] = cred(a[k] + q - b[k], q);
        }
    }
}

/// c = a - b + q, output in `[0, 2q)`. Inputs in `[0, q)`.
pub fn sub_vec_lazy(a: &[u64], b: &[u64], c: &mut [u64], q: u64) {
    check_lens(&[a.len(), b.len(), c.len()]);
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            c[k] = a[k] + q - b[k];
        }
    }
}

/// c = -a mod q. Input in `[0, q)`.
pub fn neg_vec(a: &[u64], c: &mut [u64], q: u64) {
    check_lens(&[a.len(), c.len()]);
    for (a, c) in a.chunks_exact(8).zip(c.chunks_exact_mut(8)) {
        for k in 0..8 {
            c[k] = cred(q - a[k], q);
        }
    }
}

/// Reduces arbitrary residues into `[0, q)` with Barrett.
pub fn reduce_vec(a: &[u64], c: &mut [u64], q: u64, brc: [u64; 2]) {
    check_lens(&[a.len(), c.len()]);
    for (a, c) in a.chunks_exact(8).zip(c.chunks_exact_mut(8)) {
        for k in 0..8 {
            c[k] = bred_add(a[k], q, brc);
        }
    }
}

/// c = a ⊙ b with one Montgomery-form operand. `a` must be in `[0, q)`.
pub fn mul_coeffs_montgomery_vec(a: &[u64], b: &[u64], c: &mut [u64], q: u64, nu: u64) {
    check_lens(&[a.len(), b.len(), c.len()]);
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            c[k] = mred(a[k], b[k], q, nu);
        }
    }
}

/// c = a ⊙ b, output in `[0, 2q)`. `a` must be in `[0, q)`.
pub fn mul_coeffs_montgomery_lazy_vec(a: &[u64], b: &[u64], c: &mut [u64], q: u64, nu: u64) {
    check_lens(&[a.len(), b.len(), c.len()]);
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            c[k] = mred_lazy(a[k], b[k], q, nu);
        }
    }
}

/// c += a ⊙ b mod q. `a` in `[0, q)`, `c` in `[0, q)`.
pub fn mul_coeffs_montgomery_then_add_vec(a: &[u64], b: &[u64], c: &mut [u64], q: u64, nu: u64) {
    check_lens(&[a.len(), b.len(), c.len()]);
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            c[k] = cred(c[k] + mred(a[k], b[k], q, nu), q);
        }
    }
}

/// c += a ⊙ b without reduction of the accumulator. `a` in `[0, q)`.
///
/// Each call grows `c` by less than `2q`; the caller must reduce before
/// the accumulator can overflow 64 bits.
pub fn mul_coeffs_montgomery_lazy_then_add_lazy_vec(
    a: &[u64],
    b: &[u64],
    c: &mut [u64],
    q: u64,
    nu: u64,
) {
    check_lens(&[a.len(), b.len(), c.len()]);
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            c[k] += mred_lazy(a[k], b[k], q, nu);
        }
    }
}

/// c -= a ⊙ b mod q. All reduced operands.
pub fn mul_coeffs_montgomery_then_sub_vec(a: &[u64], b: &[u64], c: &mut [u64], q: u64, nu: u64) {
    check_lens(&[a.len(), b.len(), c.len()]);
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            c[k] = cred(c[k] + q - mred(a[k], b[k], q, nu), q);
        }
    }
}

/// c = a ⊙ b mod q with Barrett reduction (neither operand in Montgomery
/// form). Inputs may be lazy up to `2^63`.
pub fn mul_coeffs_barrett_vec(a: &[u64], b: &[u64], c: &mut [u64], q: u64, brc: [u64; 2]) {
    check_lens(&[a.len(), b.len(), c.len()]);
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            c[k] = super::modular::bred(a[k], b[k], q, brc);
        }
    }
}

/// c = a · s mod q with `s` in Montgomery form (`s < q`).
pub fn mul_scalar_montgomery_vec(a: &[u64], s_mont: u64, c: &mut [u64], q: u64, nu: u64) {
    check_lens(&[a.len(), c.len()]);
    for (a, c) in a.chunks_exact(8).zip(c.chunks_exact_mut(8)) {
        for k in 0..8 {
            c[k] = mred(a[k], s_mont, q, nu);
        }
    }
}

/// c = a + s mod q. `a` in `[0, q)`, `s < q`.
pub fn add_scalar_vec(a: &[u64], s: u64, c: &mut [u64], q: u64) {
    check_lens(&[a.len(), c.len()]);
    for (a, c) in a.chunks_exact(8).zip(c.chunks_exact_mut(8)) {
        for k in 0..8 {
            c[k] = cred(a[k] + s, q);
        }
    }
}

/// c = a + s, unreduced. Caller guarantees no 64-bit overflow.
pub fn add_scalar_vec_lazy(a: &[u64], s: u64, c: &mut [u64]) {
    check_lens(&[a.len(), c.len()]);
    for (a, c) in a.chunks_exact(8).zip(c.chunks_exact_mut(8)) {
        for k in 0..8 {
            c[k] = a[k] + s;
        }
    }
}

/// c = (c - b) · s mod q, in place; `b` must be in `[0, 2q)` and `s` in
/// Montgomery form. Used by rescaling with `s = q_last^{-1} mod q`.
pub fn sub_then_mul_scalar_montgomery_assign_vec(
    c: &mut [u64],
    b: &[u64],
    s_mont: u64,
    q: u64,
    nu: u64,
) {
    check_lens(&[b.len(), c.len()]);
    let two_q = q << 1;
    for (c, b) in c.chunks_exact_mut(8).zip(b.chunks_exact(8)) {
        for k in 0..8 {
            c[k] = mred(c[k] + two_q - b[k], s_mont, q, nu);
        }
    }
}

/// c = (a - b) · s mod q where `b` may be a residue of a *different*
/// modulus (only `b < 2^63 - q` is required) and `s` is in Montgomery form.
///
/// Used by rescaling: `b` carries the (centered) last-modulus residue and
/// `s` the Montgomery form of `q_last^{-1} mod q`.
pub fn sub_then_mul_scalar_montgomery_two_modulus_vec(
    a: &[u64],
    b: &[u64],
    s_mont: u64,
    c: &mut [u64],
    q: u64,
    nu: u64,
) {
    check_lens(&[a.len(), b.len(), c.len()]);
    let two_q = q << 1;
    for ((a, b), c) in a
        .chunks_exact(8)
        .zip(b.chunks_exact(8))
        .zip(c.chunks_exact_mut(8))
    {
        for k in 0..8 {
            // a < q and b < 2q after the caller's pre-reduction
            c[k] = mred(a[k] + two_q - b[k], s_mont, q, nu);
        }
    }
}
