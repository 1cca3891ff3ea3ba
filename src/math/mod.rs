//! Modular arithmetic primitives.
//!
//! The lowest layer of the crate: scalar Barrett/Montgomery reduction,
//! fixed-stride coefficient kernels with documented lazy ranges, digit
//! decomposition and NTT-friendly prime generation. Everything above
//! (rings, ciphertexts, the transformer circuit) reduces to these loops.

pub mod decompose;
pub mod modular;
pub mod prime;
pub mod vec_ops;

pub use modular::{
    barrett_constant, bred, bred_add, cred, mform, imform, mod_exp, mod_inverse,
    montgomery_constant, mred, primitive_root, r_squared,
};
pub use prime::{generate_primes, is_prime};
