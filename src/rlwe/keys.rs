//! Secret, evaluation and gadget keys.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ring::{Poly, PolyQP};

/// Ternary secret, stored NTT + Montgomery in both bases.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SecretKey {
    pub q: Poly,
    pub p: Option<Poly>,
}

/// Radix of the power-of-two digit decomposition used by gadget products
/// when no auxiliary modulus is available.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitDecomposition {
    pub kind: DigitDecompositionType,
    pub log2_basis: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigitDecompositionType {
    #[default]
    None,
    Unsigned,
    Signed,
    SignedBalanced,
}

/// Gadget encryption of a plaintext polynomial: row `(i, j)` encrypts
/// `g_{i,j}·pt` where `g_{i,j}` is the hybrid-RNS (and optionally
/// base-2^w) gadget factor. Rows are stored NTT + Montgomery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GadgetCiphertext {
    pub dd: DigitDecomposition,
    pub level_q: usize,
    pub level_p: Option<usize>,
    /// `el[i][j] = [b, a]` with `b = -a·s + e + g_{i,j}·pt` over Q·P.
    pub el: Vec<Vec<[PolyQP; 2]>>,
}

impl GadgetCiphertext {
    /// Number of RNS digit groups.
    pub fn rns_digits(&self) -> usize {
        self.el.len()
    }

    /// Number of base-2^w digits per RNS group (1 without decomposition).
    pub fn base2_digits(&self) -> usize {
        self.el[0].len()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelinearizationKey {
    pub gct: GadgetCiphertext,
}

/// Key for the automorphism `X -> X^{gal_el}`: a gadget encryption of
/// `auto_{gal_el^{-1}}(s)` under `s`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GaloisKey {
    pub gal_el: u64,
    pub gct: GadgetCiphertext,
}

/// Generic re-encryption key from `sk_in` to `sk_out`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationKey {
    pub gct: GadgetCiphertext,
}

/// Key lookup used by evaluators. Implemented by the in-memory set below
/// and by the bounded key manager; handles are shared, not copied.
pub trait EvaluationKeySet: Send + Sync {
    fn galois_key(&self, gal_el: u64) -> Result<Arc<GaloisKey>>;
    fn relinearization_key(&self) -> Result<Arc<RelinearizationKey>>;
}

/// Plain in-memory key set.
#[derive(Default)]
pub struct MemEvaluationKeySet {
    pub galois: HashMap<u64, Arc<GaloisKey>>,
    pub relin: Option<Arc<RelinearizationKey>>,
}

impl MemEvaluationKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_galois(&mut self, key: GaloisKey) {
        self.galois.insert(key.gal_el, Arc::new(key));
    }

    pub fn set_relinearization(&mut self, key: RelinearizationKey) {
        self.relin = Some(Arc::new(key));
    }
}

impl EvaluationKeySet for MemEvaluationKeySet {
    fn galois_key(&self, gal_el: u64) -> Result<Arc<GaloisKey>> {
        self.galois
            .get(&gal_el)
            .cloned()
            .ok_or_else(|| Error::key_missing(format!("galois key {gal_el}")))
    }

    fn relinearization_key(&self) -> Result<Arc<RelinearizationKey>> {
        self.relin
            .clone()
            .ok_or_else(|| Error::key_missing("relinearization key"))
    }
}

/// An empty key set for evaluators that perform no key switching.
pub struct NoKeys;

impl EvaluationKeySet for NoKeys {
    fn galois_key(&self, gal_el: u64) -> Result<Arc<GaloisKey>> {
        Err(Error::key_missing(format!("galois key {gal_el} (no key set attached)")))
    }

    fn relinearization_key(&self) -> Result<Arc<RelinearizationKey>> {
        Err(Error::key_missing("relinearization key (no key set attached)"))
    }
}
