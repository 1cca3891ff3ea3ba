//! Bounded Galois-key cache.
//!
//! The server never holds more than `max_concurrent` Galois keys: before a
//! pipeline stage it loads the stage's element set, evicting keys the
//! previous stage needed and generating the newly required ones on a pool
//! of key generators. Reads after a load are cheap Arc clones behind the
//! mutex; writes serialize.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::params::Params;
use crate::pool::ResourceManager;
use crate::rlwe::{
    EvaluationKeySet, GaloisKey, KeyGenerator, RelinearizationKey, SecretKey,
};

pub struct KeyManager {
    capacity: usize,
    relin: Arc<RelinearizationKey>,
    state: Mutex<State>,
}

struct State {
    kgen: ResourceManager<KeyGenerator>,
    sk: SecretKey,
    keys: HashMap<u64, Arc<GaloisKey>>,
}

impl KeyManager {
    /// `num_cpu` key generators share the load; the cache holds at most
    /// `max_concurrent` Galois keys. The relinearization key is generated
    /// once here.
    pub fn new(num_cpu: usize, params: Params, max_concurrent: usize, sk: &SecretKey) -> Self {
        let mut gens: Vec<KeyGenerator> = (0..num_cpu.max(1))
            .map(|_| KeyGenerator::new(params.clone()))
            .collect();
        let relin = Arc::new(gens[0].gen_relinearization_key(sk));
        KeyManager {
            capacity: max_concurrent,
            relin,
            state: Mutex::new(State {
                kgen: ResourceManager::new(gens),
                sk: sk.clone(),
                keys: HashMap::new(),
            }),
        }
    }

    /// Loads exactly the wanted key set: evicts keys outside it, generates
    /// the missing ones in parallel. Fails without modification beyond the
    /// eviction if the set exceeds the cache capacity.
    pub fn load_galois_keys(&self, wanted: &[u64]) -> Result<()> {
        let mut state = self.state.lock().unwrap();

        let wanted_set: std::collections::HashSet<u64> = wanted.iter().copied().collect();
        state.keys.retain(|gal_el, _| wanted_set.contains(gal_el));

        let missing: Vec<u64> = wanted_set
            .iter()
            .copied()
            .filter(|g| !state.keys.contains_key(g))
            .collect();
        if state.keys.len() + missing.len() > self.capacity {
            return Err(Error::KeyCapacity);
        }
        if missing.is_empty() {
            return Ok(());
        }

        let generated: Mutex<Vec<GaloisKey>> = Mutex::new(Vec::with_capacity(missing.len()));
        let sk = state.sk.clone();
        let tasks: Vec<_> = missing
            .iter()
            .map(|&gal_el| {
                let generated = &generated;
                let sk = &sk;
                move |kgen: &mut KeyGenerator| {
                    let gk = kgen.gen_galois_key(gal_el, sk);
                    generated.lock().unwrap().push(gk);
                    Ok(())
                }
            })
            .collect();
        state.kgen.execute(tasks)?;

        for gk in generated.into_inner().unwrap() {
            state.keys.insert(gk.gal_el, Arc::new(gk));
        }
        Ok(())
    }

    /// Currently cached Galois elements, sorted.
    pub fn galois_elements(&self) -> Vec<u64> {
        let state = self.state.lock().unwrap();
        let mut out: Vec<u64> = state.keys.keys().copied().collect();
        out.sort_unstable();
        out
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl EvaluationKeySet for KeyManager {
    fn galois_key(&self, gal_el: u64) -> Result<Arc<GaloisKey>> {
        let state = self.state.lock().unwrap();
        state
            .keys
            .get(&gal_el)
            .cloned()
            .ok_or_else(|| Error::key_missing(format!("galois key {gal_el} not loaded")))
    }

    fn relinearization_key(&self) -> Result<Arc<RelinearizationKey>> {
        Ok(self.relin.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParametersLiteral;
    use crate::ring::RingType;

    fn params() -> Params {
        Params::from_literal(ParametersLiteral {
            log_n: 5,
            log_q: vec![45, 38],
            log_p: vec![46],
            log_default_scale: 38,
            ring_type: RingType::Standard,
            xs_hamming_weight: 8,
            xe_sigma: 3.2,
        })
        .unwrap()
    }

    #[test]
    fn loads_evicts_and_reloads() {
        let p = params();
        let mut kgen = KeyGenerator::new(p.clone());
        let sk = kgen.gen_secret_key();
        let km = KeyManager::new(2, p.clone(), 3, &sk);

        let g = |k: i64| p.galois_element(k);
        km.load_galois_keys(&[g(1), g(2)]).unwrap();
        assert!(km.galois_key(g(1)).is_ok());
        assert!(km.galois_key(g(3)).is_err());

        // next stage: overlap {2}, new {3, 4}; 1 must be evicted
        km.load_galois_keys(&[g(2), g(3), g(4)]).unwrap();
        assert!(km.galois_key(g(1)).is_err());
        assert!(km.galois_key(g(2)).is_ok());
        assert!(km.galois_key(g(4)).is_ok());
    }

    #[test]
    fn capacity_is_enforced() {
        let p = params();
        let mut kgen = KeyGenerator::new(p.clone());
        let sk = kgen.gen_secret_key();
        let km = KeyManager::new(1, p.clone(), 2, &sk);
        let g = |k: i64| p.galois_element(k);
        let err = km.load_galois_keys(&[g(1), g(2), g(3)]).unwrap_err();
        assert!(matches!(err, Error::KeyCapacity));
    }

    #[test]
    fn relinearization_key_always_available() {
        let p = params();
        let mut kgen = KeyGenerator::new(p.clone());
        let sk = kgen.gen_secret_key();
        let km = KeyManager::new(1, p, 1, &sk);
        assert!(km.relinearization_key().is_ok());
    }
}
