//! Ciphertext and plaintext containers.

use serde::{Deserialize, Serialize};

use crate::ring::{Poly, Ring};

/// Slot-matrix geometry of an encoded message (log2 of rows × cols).
/// CKKS packing uses a single row of `slots` columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogDimensions {
    pub rows: usize,
    pub cols: usize,
}

/// Tag carried by every ciphertext and plaintext.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetaData {
    /// Fixed-point scale Δ of the encoded message.
    pub scale: f64,
    /// Whether the polynomials are in the NTT domain.
    pub is_ntt: bool,
    /// Whether the polynomials are in Montgomery form (only plaintexts
    /// pre-encoded for multiplication).
    pub is_montgomery: bool,
    /// Whether the message uses the batched (slot) encoding.
    pub is_batched: bool,
    pub log_dimensions: LogDimensions,
}

impl MetaData {
    pub fn new(scale: f64, log_slots: usize) -> Self {
        MetaData {
            scale,
            is_ntt: true,
            is_montgomery: false,
            is_batched: true,
            log_dimensions: LogDimensions {
                rows: 0,
                cols: log_slots,
            },
        }
    }

    pub fn slots(&self) -> usize {
        1 << self.log_dimensions.cols
    }

    pub fn log_scale(&self) -> f64 {
        self.scale.log2()
    }
}

/// RLWE ciphertext: `degree + 1` polynomials in basis Q satisfying
/// `Σ c_i s^i ≈ Δ·m mod Q`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ciphertext {
    pub q: Vec<Poly>,
    pub meta: MetaData,
}

impl Ciphertext {
    pub fn new(ring_q: &Ring, degree: usize, level: usize, meta: MetaData) -> Self {
        Ciphertext {
            q: (0..=degree)
                .map(|_| Poly::new(ring_q.n(), level))
                .collect(),
            meta,
        }
    }

    pub fn degree(&self) -> usize {
        self.q.len() - 1
    }

    pub fn level(&self) -> usize {
        self.q[0].level()
    }

    pub fn scale(&self) -> f64 {
        self.meta.scale
    }

    pub fn log_scale(&self) -> f64 {
        self.meta.scale.log2()
    }

    pub fn slots(&self) -> usize {
        self.meta.slots()
    }

    /// Drops RNS rows down to `level`.
    pub fn resize_level(&mut self, level: usize) {
        for p in self.q.iter_mut() {
            p.resize(level);
        }
    }

    /// Changes the degree, allocating or dropping trailing components.
    pub fn resize_degree(&mut self, degree: usize, n: usize) {
        let level = self.level();
        self.q.resize_with(degree + 1, || Poly::new(n, level));
    }
}

/// Plaintext: a single polynomial with metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Plaintext {
    pub poly: Poly,
    pub meta: MetaData,
}

impl Plaintext {
    pub fn new(ring_q: &Ring, level: usize, meta: MetaData) -> Self {
        Plaintext {
            poly: Poly::new(ring_q.n(), level),
            meta,
        }
    }

    pub fn level(&self) -> usize {
        self.poly.level()
    }

    pub fn scale(&self) -> f64 {
        self.meta.scale
    }
}
