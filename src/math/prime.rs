//! NTT-friendly prime generation.
//!
//! The moduli chain is built from distinct primes of requested bit sizes,
//! each ≡ 1 mod NthRoot so that the negacyclic transform exists. Candidates
//! are scanned outward from 2^bits in steps of NthRoot, alternating above
//! and below, to keep every modulus as close as possible to its nominal
//! size (the rescaling error tracks `|q / 2^bits - 1|`).

use super::modular::mod_exp;

/// Deterministic Miller-Rabin for u64 (the listed bases are a proven
/// complete witness set below 3.3·10^24).
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    for p in [2u64, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
        if n == p {
            return true;
        }
        if n % p == 0 {
            return false;
        }
    }
    let mut d = n - 1;
    let mut r = 0u32;
    while d & 1 == 0 {
        d >>= 1;
        r += 1;
    }
    'witness: for a in [2u64, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37] {
        let mut x = mod_exp(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 0..r - 1 {
            x = ((x as u128 * x as u128) % n as u128) as u64;
            if x == n - 1 {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

/// Generates primes ≡ 1 mod `nth_root` close to `2^bits`, skipping any
/// value already present in `used`.
pub struct NttPrimeGenerator {
    nth_root: u64,
    next_up: u64,
    next_down: u64,
    prefer_up: bool,
}

impl NttPrimeGenerator {
    /// # Panics
    ///
    /// Panics if `bits` is not in `[3, 61]` or `nth_root` is not a power of
    /// two.
    pub fn new(bits: usize, nth_root: u64) -> Self {
        assert!((3..=61).contains(&bits), "prime size out of range: {bits}");
        assert!(nth_root.is_power_of_two(), "nth_root must be a power of two");
        let center = 1u64 << bits;
        // first candidate ≡ 1 mod nth_root at or above the center
        let up = center + 1;
        let down = center + 1 - nth_root;
        NttPrimeGenerator {
            nth_root,
            next_up: up,
            next_down: down,
            prefer_up: true,
        }
    }

    /// Returns the next NTT prime, alternating above/below `2^bits`.
    pub fn next_prime(&mut self) -> u64 {
        loop {
            let candidate = if self.prefer_up {
                let c = self.next_up;
                self.next_up += self.nth_root;
                c
            } else {
                let c = self.next_down;
                self.next_down -= self.nth_root;
                c
            };
            self.prefer_up = !self.prefer_up;
            if is_prime(candidate) {
                return candidate;
            }
        }
    }
}

/// Generates the moduli for the requested bit sizes, all ≡ 1 mod
/// `nth_root`, pairwise distinct across the whole call.
pub fn generate_primes(bit_sizes: &[usize], nth_root: u64) -> Vec<u64> {
    let mut out = Vec::with_capacity(bit_sizes.len());
    let mut generators: std::collections::HashMap<usize, NttPrimeGenerator> =
        std::collections::HashMap::new();
    for &bits in bit_sizes {
        let g = generators
            .entry(bits)
            .or_insert_with(|| NttPrimeGenerator::new(bits, nth_root));
        loop {
            let p = g.next_prime();
            if !out.contains(&p) {
                out.push(p);
                break;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_primes() {
        assert!(is_prime(2));
        assert!(is_prime(3));
        assert!(is_prime(40961));
        assert!(!is_prime(40963 * 3));
        assert!(!is_prime(1));
        assert!(!is_prime(0));
    }

    #[test]
    fn large_primes() {
        assert!(is_prime((1 << 61) - 1)); // Mersenne prime M61
        assert!(!is_prime((1 << 60) - 1));
    }

    #[test]
    fn generated_primes_are_ntt_friendly() {
        let nth_root = 1 << 14;
        let primes = generate_primes(&[45, 45, 45, 60], nth_root);
        assert_eq!(primes.len(), 4);
        for (i, &p) in primes.iter().enumerate() {
            assert!(is_prime(p), "{p} not prime");
            assert_eq!(p % nth_root, 1, "{p} not 1 mod 2N");
            for &q in &primes[..i] {
                assert_ne!(p, q, "duplicate modulus");
            }
        }
        // sizes stay close to nominal
        assert!((primes[0] as f64).log2().round() as i32 == 45);
        assert!((primes[3] as f64).log2().round() as i32 == 60);
    }
}
