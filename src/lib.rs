//! cryptein: encrypted inference for a small Transformer classifier over
//! amino-acid sequences.
//!
//! The crate implements a CKKS-style approximate homomorphic encryption
//! stack from the ground up — RNS polynomial rings with negacyclic NTTs,
//! RLWE ciphertexts with hybrid key switching and hoisting, slot encoding
//! through the canonical embedding — and, on top of it, the matrix-packed
//! algebra (Halevi–Shoup products, head permutations, mask/compress) and
//! polynomial non-linearities (minimax sign, SoftMax, LayerNorm) that
//! evaluate one Transformer encoder block plus classifier head under
//! encryption.
//!
//! Layering, leaves first:
//!
//! - [`math`]: modular kernels, NTT-friendly primes, digit decomposition
//! - [`ring`]: RNS polynomials, sub-ring NTTs, rescaling, basis extension
//! - [`rlwe`]: ciphertexts, keys, gadget products, automorphisms
//! - [`ckks`]: slot encoder, scale management, Chebyshev evaluation
//! - [`lintrans`]: diagonal-encoded plaintext matrices (BSGS, hoisting)
//! - [`matrix`]: ciphertext-array algebra and packing permutations
//! - [`nn`]: ReLU / InnerMax / SoftMax / LayerNorm
//! - [`model`]: the transformer circuit, client and server glue
//! - [`bootstrap`], [`pool`], [`keycache`]: refresh operator, worker
//!   pool, bounded Galois-key cache

pub mod bootstrap;
pub mod ckks;
pub mod error;
pub mod io;
pub mod keycache;
pub mod lintrans;
pub mod math;
pub mod matrix;
pub mod model;
pub mod nn;
pub mod params;
pub mod pool;
pub mod ring;
pub mod rlwe;

pub use error::{Error, Result};
pub use params::{Params, ParametersLiteral};
