//! RNS polynomial ring layer.
//!
//! Multi-modulus polynomials over `Z[X]/(X^N + 1)` (or its
//! conjugate-invariant subring), with per-modulus NTTs, rescaling, basis
//! extension between the ciphertext and auxiliary moduli, and the samplers
//! feeding key generation and encryption.

pub mod basis_ext;
pub mod poly;
pub mod ring;
pub mod sampler;
pub mod subring;

pub use basis_ext::BasisExtender;
pub use poly::{Poly, PolyMatrix, PolyQP, PolyVector};
pub use ring::{extend_basis_small_norm, residue, Ring, RingType};
pub use sampler::{embed_signed, GaussianSampler, Source, TernarySampler, UniformSampler};
pub use subring::SubRing;
