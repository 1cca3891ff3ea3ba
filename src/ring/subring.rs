//! Per-modulus ring: precomputed constants and the negacyclic NTT.
//!
//! A [`SubRing`] owns everything needed to operate on one RNS residue row:
//! Barrett and Montgomery constants, the primitive root ψ and its
//! bit-reversed twiddle tables, and thin wrappers over the coefficient
//! kernels.
//!
//! For the conjugate-invariant ring a row of length N represents the
//! symmetric element `a_0 + Σ a_i (X^i + X^{-i})` of the degree-2N
//! negacyclic ring; its transform goes through a size-2N lift
//! (`ntt_size == 2·n`), with the redundant conjugate half dropped on the
//! way out.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use crate::math::modular::{
    barrett_constant, cred, mform, mod_exp, mod_inverse, montgomery_constant, mred, primitive_root,
    r_squared,
};
use crate::math::vec_ops;

thread_local! {
    // Scratch for the conjugate-invariant lift; resized on demand.
    static LIFT_SCRATCH: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SubRing {
    /// Row length (coefficients stored per modulus).
    pub n: usize,
    /// Transform size: `n` for the standard ring, `2n` for the
    /// conjugate-invariant lift.
    pub ntt_size: usize,
    pub modulus: u64,
    /// Barrett constant ⌊2^128/q⌋.
    pub brc: [u64; 2],
    /// Montgomery constant -q^{-1} mod 2^64.
    pub nu: u64,
    /// 2^128 mod q.
    pub r2: u64,
    /// Primitive 2·ntt_size-th root of unity.
    pub psi: u64,
    twiddles: Vec<u64>,
    twiddles_inv: Vec<u64>,
    size_inv_mont: u64,
}

impl SubRing {
    /// # Panics
    ///
    /// Panics if `ntt_size` is not a power of two or q is not ≡ 1 mod
    /// 2·ntt_size.
    pub fn new(n: usize, ntt_size: usize, modulus: u64) -> Self {
        assert!(ntt_size.is_power_of_two(), "ntt_size must be a power of two");
        assert!(ntt_size == n || ntt_size == 2 * n, "invalid lift factor");
        assert_eq!(
            modulus % (2 * ntt_size as u64),
            1,
            "modulus must be 1 mod 2·ntt_size"
        );

        let nu = montgomery_constant(modulus);
        let r2 = r_squared(modulus);
        let brc = barrett_constant(modulus);

        let psi = primitive_root(2 * ntt_size as u64, modulus);
        let psi_inv = mod_inverse(psi, modulus);

        let twiddles = Self::twiddle_table(ntt_size, psi, modulus, nu, r2);
        let twiddles_inv = Self::twiddle_table(ntt_size, psi_inv, modulus, nu, r2);

        let size_inv = mod_inverse(ntt_size as u64, modulus);
        let size_inv_mont = mform(size_inv, modulus, nu, r2);

        SubRing {
            n,
            ntt_size,
            modulus,
            brc,
            nu,
            r2,
            psi,
            twiddles,
            twiddles_inv,
            size_inv_mont,
        }
    }

    /// Builds the bit-reversed twiddle table `T[m] = ψ^{rev(m)}` in
    /// Montgomery form.
    fn twiddle_table(size: usize, psi: u64, q: u64, nu: u64, r2: u64) -> Vec<u64> {
        let mut t = vec![0u64; size];
        t[0] = mform(1, q, nu, r2); // unused by the butterflies, kept valid
        for m in 1..size {
            if m.is_power_of_two() {
                let exp = (size / (2 * m)) as u64;
                t[m] = mform(mod_exp(psi, exp, q), q, nu, r2);
            } else {
                let prev = m & (m - 1); // clear lowest set bit
                let step = m & m.wrapping_neg(); // lowest set bit
                t[m] = mred(t[prev], t[step], q, nu);
            }
        }
        t
    }

    pub fn mform(&self, a: u64) -> u64 {
        mform(a, self.modulus, self.nu, self.r2)
    }

    /// Forward negacyclic NTT over `ntt_size` coefficients, in place.
    /// Values stay in standard (non-Montgomery) form.
    fn ntt_raw(&self, coeffs: &mut [u64]) {
        let size = self.ntt_size;
        debug_assert_eq!(coeffs.len(), size);
        let q = self.modulus;
        let nu = self.nu;

        let mut t = size;
        let mut m = 1;
        while m < size {
            t >>= 1;
            for i in 0..m {
                let j1 = 2 * i * t;
                let w = self.twiddles[m + i];
                for j in j1..j1 + t {
                    let u = coeffs[j];
                    let v = mred(coeffs[j + t], w, q, nu);
                    coeffs[j] = cred(u + v, q);
                    coeffs[j + t] = if u >= v { u - v } else { q - v + u };
                }
            }
            m <<= 1;
        }
    }

    /// Inverse negacyclic NTT over `ntt_size` coefficients, in place.
    fn intt_raw(&self, coeffs: &mut [u64]) {
        let size = self.ntt_size;
        debug_assert_eq!(coeffs.len(), size);
        let q = self.modulus;
        let nu = self.nu;

        let mut t = 1;
        let mut m = size;
        while m > 1 {
            m >>= 1;
            for i in 0..m {
                let j1 = i * 2 * t;
                let w = self.twiddles_inv[m + i];
                for j in j1..j1 + t {
                    let u = coeffs[j];
                    let v = coeffs[j + t];
                    coeffs[j] = cred(u + v, q);
                    let diff = if u >= v { u - v } else { q - v + u };
                    coeffs[j + t] = mred(diff, w, q, nu);
                }
            }
            t <<= 1;
        }

        for c in coeffs.iter_mut() {
            *c = mred(*c, self.size_inv_mont, q, nu);
        }
    }

    /// Forward transform of one residue row.
    pub fn ntt(&self, row: &mut [u64]) {
        debug_assert_eq!(row.len(), self.n);
        if self.ntt_size == self.n {
            self.ntt_raw(row);
        } else {
            // conjugate-invariant: symmetric lift into 2n, transform, keep
            // the non-redundant half
            let q = self.modulus;
            LIFT_SCRATCH.with(|s| {
                let mut s = s.borrow_mut();
                s.resize(self.ntt_size, 0);
                let n = self.n;
                s[0] = row[0];
                s[n] = 0;
                for i in 1..n {
                    s[i] = row[i];
                    s[2 * n - i] = cred(q - row[i], q);
                }
                self.ntt_raw(&mut s);
                row.copy_from_slice(&s[..n]);
            });
        }
    }

    /// Inverse transform of one residue row.
    pub fn intt(&self, row: &mut [u64]) {
        debug_assert_eq!(row.len(), self.n);
        if self.ntt_size == self.n {
            self.intt_raw(row);
        } else {
            // evaluation points come in conjugate pairs (j, 2n-1-j) with
            // equal values on conjugate-invariant elements
            LIFT_SCRATCH.with(|s| {
                let mut s = s.borrow_mut();
                s.resize(self.ntt_size, 0);
                let n = self.n;
                for j in 0..n {
                    s[j] = row[j];
                    s[2 * n - 1 - j] = row[j];
                }
                self.intt_raw(&mut s);
                row.copy_from_slice(&s[..n]);
            });
        }
    }

    // Kernel wrappers, all operating on full rows.

    pub fn add(&self, a: &[u64], b: &[u64], c: &mut [u64]) {
        vec_ops::add_vec(a, b, c, self.modulus);
    }

    pub fn add_lazy(&self, a: &[u64], b: &[u64], c: &mut [u64]) {
        vec_ops::add_vec_lazy(a, b, c);
    }

    pub fn sub(&self, a: &[u64], b: &[u64], c: &mut [u64]) {
        vec_ops::sub_vec(a, b, c, self.modulus);
    }

    pub fn neg(&self, a: &[u64], c: &mut [u64]) {
        vec_ops::neg_vec(a, c, self.modulus);
    }

    pub fn reduce(&self, a: &[u64], c: &mut [u64]) {
        vec_ops::reduce_vec(a, c, self.modulus, self.brc);
    }

    pub fn mul_coeffs_montgomery(&self, a: &[u64], b: &[u64], c: &mut [u64]) {
        vec_ops::mul_coeffs_montgomery_vec(a, b, c, self.modulus, self.nu);
    }

    pub fn mul_coeffs_montgomery_then_add(&self, a: &[u64], b: &[u64], c: &mut [u64]) {
        vec_ops::mul_coeffs_montgomery_then_add_vec(a, b, c, self.modulus, self.nu);
    }

    pub fn mul_coeffs_montgomery_lazy_then_add_lazy(&self, a: &[u64], b: &[u64], c: &mut [u64]) {
        vec_ops::mul_coeffs_montgomery_lazy_then_add_lazy_vec(a, b, c, self.modulus, self.nu);
    }

    pub fn mul_coeffs_montgomery_then_sub(&self, a: &[u64], b: &[u64], c: &mut [u64]) {
        vec_ops::mul_coeffs_montgomery_then_sub_vec(a, b, c, self.modulus, self.nu);
    }

    pub fn mul_coeffs_barrett(&self, a: &[u64], b: &[u64], c: &mut [u64]) {
        vec_ops::mul_coeffs_barrett_vec(a, b, c, self.modulus, self.brc);
    }

    pub fn mul_scalar_montgomery(&self, a: &[u64], s_mont: u64, c: &mut [u64]) {
        vec_ops::mul_scalar_montgomery_vec(a, s_mont, c, self.modulus, self.nu);
    }

    pub fn add_scalar(&self, a: &[u64], s: u64, c: &mut [u64]) {
        vec_ops::add_scalar_vec(a, s, c, self.modulus);
    }

    pub fn mform_vec(&self, a: &[u64], c: &mut [u64]) {
        vec_ops::mul_scalar_montgomery_vec(a, self.r2, c, self.modulus, self.nu);
    }

    pub fn imform_vec(&self, a: &[u64], c: &mut [u64]) {
        vec_ops::mul_scalar_montgomery_vec(a, 1, c, self.modulus, self.nu);
    }
}

impl std::fmt::Debug for SubRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubRing")
            .field("n", &self.n)
            .field("ntt_size", &self.ntt_size)
            .field("modulus", &self.modulus)
            .finish()
    }
}
