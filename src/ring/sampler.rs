//! Randomness source and polynomial samplers.
//!
//! A [`Source`] is a seedable ChaCha stream; all key material and
//! encryption randomness flows through it so tests can be made
//! deterministic. Samplers write directly into RNS rows.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha12Rng;

use super::poly::Poly;
use super::ring::Ring;

/// Opaque random byte stream.
pub struct Source {
    rng: ChaCha12Rng,
}

impl Source {
    pub fn new(seed: [u8; 32]) -> Self {
        Source {
            rng: ChaCha12Rng::from_seed(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Source {
            rng: ChaCha12Rng::from_entropy(),
        }
    }

    pub fn read_bytes(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
    }

    pub fn uint64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    pub fn float64(&mut self, lo: f64, hi: f64) -> f64 {
        self.rng.gen_range(lo..hi)
    }
}

/// Fills rows with independent uniform residues (NTT-domain sampling is
/// legitimate: the transform is a bijection).
pub struct UniformSampler;

impl UniformSampler {
    pub fn read(&self, source: &mut Source, ring: &Ring, p: &mut Poly) {
        for (i, s) in ring.sub_rings().iter().enumerate() {
            let q = s.modulus;
            // rejection sampling on the top bits
            let mask = q.next_power_of_two() - 1;
            for x in p.at_mut(i).iter_mut() {
                loop {
                    let v = source.uint64() & mask;
                    if v < q {
                        *x = v;
                        break;
                    }
                }
            }
        }
    }
}

/// Discrete Gaussian with standard deviation `sigma`, truncated at
/// `bound`. Small-norm values are embedded into every RNS row.
pub struct GaussianSampler {
    pub sigma: f64,
    pub bound: f64,
}

impl GaussianSampler {
    pub fn new(sigma: f64) -> Self {
        GaussianSampler {
            sigma,
            bound: 6.0 * sigma,
        }
    }

    /// Draws `n` truncated discrete-Gaussian values.
    pub fn sample_values(&self, source: &mut Source, n: usize) -> Vec<i64> {
        let mut values = vec![0i64; n];
        for v in values.iter_mut() {
            *v = loop {
                // Box-Muller
                let u1 = source.float64(f64::MIN_POSITIVE, 1.0);
                let u2 = source.float64(0.0, 1.0);
                let g = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                let x = g * self.sigma;
                if x.abs() <= self.bound {
                    break x.round() as i64;
                }
            };
        }
        values
    }

    pub fn read(&self, source: &mut Source, ring: &Ring, p: &mut Poly) {
        let values = self.sample_values(source, ring.n());
        embed_signed(ring, &values, p);
    }
}

/// Ternary secret with exactly `hamming_weight` non-zero ±1 coefficients.
pub struct TernarySampler {
    pub hamming_weight: usize,
}

impl TernarySampler {
    /// Draws `n` ternary values with exactly `hamming_weight` non-zeros.
    pub fn sample_values(&self, source: &mut Source, n: usize) -> Vec<i64> {
        assert!(self.hamming_weight <= n, "hamming weight exceeds degree");
        let mut values = vec![0i64; n];
        // partial Fisher-Yates over positions
        let mut index: Vec<usize> = (0..n).collect();
        for k in 0..self.hamming_weight {
            let j = k + (source.uint64() as usize) % (n - k);
            index.swap(k, j);
            values[index[k]] = if source.uint64() & 1 == 0 { 1 } else { -1 };
        }
        values
    }

    pub fn read(&self, source: &mut Source, ring: &Ring, p: &mut Poly) {
        let values = self.sample_values(source, ring.n());
        embed_signed(ring, &values, p);
    }
}

/// Writes small signed coefficients into every live RNS row.
pub fn embed_signed(ring: &Ring, values: &[i64], p: &mut Poly) {
    for (i, s) in ring.sub_rings().iter().enumerate() {
        let q = s.modulus;
        let row = p.at_mut(i);
        for (x, &v) in row.iter_mut().zip(values.iter()) {
            *x = if v < 0 {
                q - ((-v) as u64 % q)
            } else {
                v as u64 % q
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::ring::RingType;

    fn ring() -> Ring {
        Ring::new(64, &[40961, 65537], RingType::Standard).unwrap()
    }

    #[test]
    fn uniform_in_range_and_deterministic() {
        let r = ring();
        let mut p1 = r.new_poly();
        let mut p2 = r.new_poly();
        UniformSampler.read(&mut Source::new([7u8; 32]), &r, &mut p1);
        UniformSampler.read(&mut Source::new([7u8; 32]), &r, &mut p2);
        assert_eq!(p1, p2);
        for (i, s) in r.sub_rings().iter().enumerate() {
            assert!(p1.at(i).iter().all(|&x| x < s.modulus));
        }
        let mut p3 = r.new_poly();
        UniformSampler.read(&mut Source::new([8u8; 32]), &r, &mut p3);
        assert_ne!(p1, p3);
    }

    #[test]
    fn ternary_has_requested_weight() {
        let r = ring();
        let mut p = r.new_poly();
        TernarySampler { hamming_weight: 24 }.read(&mut Source::new([1u8; 32]), &r, &mut p);
        let q0 = r.sub(0).modulus;
        let nonzero = p.at(0).iter().filter(|&&x| x != 0).count();
        assert_eq!(nonzero, 24);
        assert!(p.at(0).iter().all(|&x| x == 0 || x == 1 || x == q0 - 1));
        // rows agree as signed values
        let q1 = r.sub(1).modulus;
        for j in 0..64 {
            let v0 = p.at(0)[j];
            let v1 = p.at(1)[j];
            let s0 = if v0 > q0 / 2 { v0 as i64 - q0 as i64 } else { v0 as i64 };
            let s1 = if v1 > q1 / 2 { v1 as i64 - q1 as i64 } else { v1 as i64 };
            assert_eq!(s0, s1);
        }
    }

    #[test]
    fn gaussian_is_small() {
        let r = ring();
        let mut p = r.new_poly();
        GaussianSampler::new(3.2).read(&mut Source::new([2u8; 32]), &r, &mut p);
        let q0 = r.sub(0).modulus;
        for &x in p.at(0) {
            let v = if x > q0 / 2 { x as i64 - q0 as i64 } else { x as i64 };
            assert!(v.abs() <= 20, "sample too large: {v}");
        }
    }
}
