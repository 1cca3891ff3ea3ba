//! Power-of-two digit decomposition of coefficient vectors.
//!
//! Used by gadget products when no auxiliary modulus P is available: each
//! RNS residue is split into base-2^w digits, shrinking the noise growth of
//! the decompose-multiply-accumulate at the cost of more rows.
//!
//! The reconstruction contract, for every element and any `w`:
//!
//! `Σ_j lift(digit_j) · 2^{j·w} = value`
//!
//! where `lift` maps the stored residue back to its signed (signed
//! variants) or unsigned magnitude.

/// Number of base-2^w digits needed for residues of a `bits`-bit modulus.
pub fn digit_count(bits: usize, log2_basis: usize) -> usize {
    bits.div_ceil(log2_basis)
}

/// Maps residues `[0, q)` to centered representatives in `(-q/2, q/2]`,
/// stored as two's-complement u64.
pub fn center_mod_u64(input: &[u64], q: u64, out: &mut [u64]) {
    let half = q >> 1;
    for (x, o) in input.iter().zip(out.iter_mut()) {
        *o = if *x > half {
            (*x).wrapping_sub(q)
        } else {
            *x
        };
    }
}

/// Extracts digit `j` of the plain (non-negative) residues.
///
/// Output digits are in `[0, 2^w)` and are valid residues for any modulus
/// larger than the basis.
pub fn decompose_unsigned(j: usize, log2_basis: usize, input: &[u64], out: &mut [u64]) {
    let w = log2_basis;
    let mask = (1u64 << w) - 1;
    let shift = j * w;
    for (x, o) in input.iter().zip(out.iter_mut()) {
        *o = (x >> shift) & mask;
    }
}

/// Extracts signed digit `j` as plain i64 values with carry propagation.
///
/// Same contract as [`decompose_signed`], but the digits are left as
/// signed integers so the caller can reduce them into several moduli.
pub fn decompose_signed_values(
    j: usize,
    log2_basis: usize,
    last: bool,
    input: &[u64],
    carry: &mut [u64],
    out: &mut [i64],
) {
    let w = log2_basis;
    let mask = (1i64 << w) - 1;
    let half = 1i64 << (w - 1);
    let shift = (j * w) as u32;
    for ((x, c), o) in input.iter().zip(carry.iter_mut()).zip(out.iter_mut()) {
        let v = (*x as i64) >> shift;
        if last {
            *o = v + *c as i64;
            *c = 0;
            continue;
        }
        let raw = (v & mask) + *c as i64;
        if raw >= half {
            *o = raw - (1i64 << w);
            *c = 1;
        } else {
            *o = raw;
            *c = 0;
        }
    }
}

/// Balanced variant of [`decompose_signed_values`].
pub fn decompose_signed_balanced_values(
    j: usize,
    log2_basis: usize,
    last: bool,
    input: &[u64],
    carry: &mut [u64],
    out: &mut [i64],
) {
    let w = log2_basis;
    let mask = (1i64 << w) - 1;
    let half = 1i64 << (w - 1);
    let shift = (j * w) as u32;
    for ((x, c), o) in input.iter().zip(carry.iter_mut()).zip(out.iter_mut()) {
        let v = (*x as i64) >> shift;
        if last {
            *o = v + *c as i64;
            *c = 0;
            continue;
        }
        let raw = (v & mask) + *c as i64;
        let next_odd = ((v >> w) & 1) == 1;
        if raw > half || (raw == half && next_odd) {
            *o = raw - (1i64 << w);
            *c = 1;
        } else {
            *o = raw;
            *c = 0;
        }
    }
}

/// Extracts signed digit `j` with carry propagation, reducing negative
/// digits modulo `q`.
///
/// `input` holds two's-complement centered values (see [`center_mod_u64`]);
/// `carry` must be zeroed before digit 0 and passed unchanged between
/// consecutive digits. When `last` is set the full remaining value is
/// emitted so the reconstruction is exact regardless of the top digit's
/// magnitude.
pub fn decompose_signed(
    j: usize,
    log2_basis: usize,
    last: bool,
    input: &[u64],
    carry: &mut [u64],
    out: &mut [u64],
    q: u64,
) {
    let w = log2_basis;
    let mask = (1i64 << w) - 1;
    let half = 1i64 << (w - 1);
    let shift = (j * w) as u32;
    for ((x, c), o) in input.iter().zip(carry.iter_mut()).zip(out.iter_mut()) {
        let v = (*x as i64) >> shift;
        if last {
            let d = v + *c as i64;
            *o = if d < 0 { q.wrapping_add(d as u64) } else { d as u64 };
            *c = 0;
            continue;
        }
        let raw = (v & mask) + *c as i64;
        if raw >= half {
            let d = raw - (1i64 << w); // in [-2^{w-1}, 0]
            *o = q.wrapping_add(d as u64);
            *c = 1;
        } else {
            *o = raw as u64;
            *c = 0;
        }
    }
}

/// Balanced signed decomposition: ties at exactly `2^{w-1}` alternate on
/// the parity of the next digit, keeping the digit distribution symmetric.
#[allow(clippy::too_many_arguments)]
pub fn decompose_signed_balanced(
    j: usize,
    log2_basis: usize,
    last: bool,
    input: &[u64],
    carry: &mut [u64],
    out: &mut [u64],
    q: u64,
) {
    let w = log2_basis;
    let mask = (1i64 << w) - 1;
    let half = 1i64 << (w - 1);
    let shift = (j * w) as u32;
    for ((x, c), o) in input.iter().zip(carry.iter_mut()).zip(out.iter_mut()) {
        let v = (*x as i64) >> shift;
        if last {
            let d = v + *c as i64;
            *o = if d < 0 { q.wrapping_add(d as u64) } else { d as u64 };
            *c = 0;
            continue;
        }
        let raw = (v & mask) + *c as i64;
        let next_odd = ((v >> w) & 1) == 1;
        let round_up = raw > half || (raw == half && next_odd);
        if round_up {
            let d = raw - (1i64 << w);
            *o = q.wrapping_add(d as u64);
            *c = 1;
        } else {
            *o = raw as u64;
            *c = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const Q: u64 = (1 << 45) - (1 << 13) + 1; // any odd 45-bit value works here

    fn lift_signed(d: u64, q: u64) -> i64 {
        if d > q / 2 {
            d as i64 - q as i64
        } else {
            d as i64
        }
    }

    #[test]
    fn unsigned_reconstructs() {
        let w = 13;
        let values: Vec<u64> = (0..16u64).map(|i| i * 0x9E3779B97F4 % Q).collect();
        let dims = digit_count(45, w);
        let mut digits = vec![vec![0u64; 16]; dims];
        for j in 0..dims {
            decompose_unsigned(j, w, &values, &mut digits[j]);
        }
        for i in 0..16 {
            let mut acc: u64 = 0;
            for j in (0..dims).rev() {
                assert!(digits[j][i] < 1 << w);
                acc = (acc << w) + digits[j][i];
            }
            assert_eq!(acc, values[i]);
        }
    }

    #[test]
    fn signed_reconstructs() {
        let w = 16;
        let raw: Vec<u64> = (0..16u64).map(|i| i * 0xDEADBEEF137 % Q).collect();
        let mut centered = vec![0u64; 16];
        center_mod_u64(&raw, Q, &mut centered);

        let dims = digit_count(45, w);
        let mut carry = vec![0u64; 16];
        let mut digits = vec![vec![0u64; 16]; dims];
        for j in 0..dims {
            decompose_signed(j, w, j == dims - 1, &centered, &mut carry, &mut digits[j], Q);
        }
        for i in 0..16 {
            let mut acc: i64 = 0;
            for j in (0..dims).rev() {
                acc = (acc << w) + lift_signed(digits[j][i], Q);
            }
            assert_eq!(acc, centered[i] as i64, "element {i}");
        }
    }

    #[test]
    fn balanced_reconstructs_and_bounds() {
        let w = 12;
        let raw: Vec<u64> = (0..32u64).map(|i| (i * 0xABCDEF12345 + 7) % Q).collect();
        let mut centered = vec![0u64; 32];
        center_mod_u64(&raw, Q, &mut centered);

        let dims = digit_count(45, w);
        let mut carry = vec![0u64; 32];
        let mut digits = vec![vec![0u64; 32]; dims];
        for j in 0..dims {
            decompose_signed_balanced(
                j,
                w,
                j == dims - 1,
                &centered,
                &mut carry,
                &mut digits[j],
                Q,
            );
        }
        for i in 0..32 {
            let mut acc: i64 = 0;
            for j in (0..dims).rev() {
                let d = lift_signed(digits[j][i], Q);
                if j < dims - 1 {
                    assert!(d.abs() <= 1 << (w - 1), "digit too large: {d}");
                }
                acc = (acc << w) + d;
            }
            assert_eq!(acc, centered[i] as i64, "element {i}");
        }
    }
}
