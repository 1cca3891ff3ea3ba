//! Mask-and-compress / extract / mask-and-replicate.
//!
//! `mask_and_compress` keeps one lane every `k` slots of each array
//! element (affine map `a·x + b` on the kept lanes), then packs the whole
//! array into a single ciphertext by power-of-two rotate-and-sum — the
//! amortization trick that lets one large polynomial evaluation serve
//! many small vectors. `extract` reverses the packing with a butterfly
//! rotation schedule, and `mask_and_replicate` broadcasts each kept lane
//! across its `k`-group.

use crate::ckks;
use crate::error::{Error, Result};
use crate::params::Params;
use crate::rlwe::Ciphertext;

use super::MatrixEvaluator;

impl MatrixEvaluator {
    /// Masks every `k`-th lane with `a·x + b` over a vector of length `n`
    /// and packs all elements of `cts` into one ciphertext.
    pub fn mask_and_compress(
        &mut self,
        cts: &mut Vec<Ciphertext>,
        a: f64,
        b: f64,
        k: usize,
        n: usize,
        rescale: bool,
    ) -> Result<Ciphertext> {
        if cts.len() > k {
            return Err(Error::shape(format!("{} ciphertexts > k = {k}", cts.len())));
        }
        if n == 0 || n % k != 0 {
            return Err(Error::shape(format!("n = {n} must be a non-zero multiple of k = {k}")));
        }

        let mut mask = vec![0.0f64; n];
        for j in (0..n).step_by(k) {
            mask[j] = a;
        }
        self.dot_vec(cts, &mask)?;
        for j in (0..n).step_by(k) {
            mask[j] = b;
        }
        self.add_vec(cts, &mask)?;

        let mut out: Option<Ciphertext> = None;
        let mut shifts: Vec<i64> = Vec::new();
        let mut offset = 0usize;
        while offset < cts.len() {
            let remaining = cts.len() - offset;
            let shift = 1usize << (usize::BITS - 1 - remaining.leading_zeros());
            let mut ct = self.pack_pow2(&mut cts[offset..offset + shift])?;
            match out.as_mut() {
                Some(o) => {
                    let ev = self.pool.get_mut(0);
                    for &s in &shifts {
                        ev.rotate_inplace(&mut ct, s)?;
                    }
                    ev.add_inplace(o, &ct)?;
                }
                None => out = Some(ct),
            }
            shifts.push(-(shift as i64));
            offset += shift;
        }

        let mut out = out.ok_or_else(|| Error::shape("empty input array"))?;
        if rescale {
            self.pool.get_mut(0).rescale_inplace(&mut out)?;
        }
        Ok(out)
    }

    /// Rotate-and-sum tree over a power-of-two slice: element `j` lands
    /// rotated right by `j` into the first element.
    pub fn pack_pow2(&mut self, cts: &mut [Ciphertext]) -> Result<Ciphertext> {
        assert!(cts.len().is_power_of_two(), "pack_pow2 needs a power of two");
        let mut len = cts.len();
        let mut shift = 1i64;
        while len > 1 {
            self.pool.execute(
                cts[..len]
                    .chunks_mut(2)
                    .map(|pair| {
                        move |ev: &mut ckks::Evaluator| {
                            let (a, b) = pair.split_at_mut(1);
                            ev.rotate_inplace(&mut b[0], -shift)?;
                            ev.add_inplace(&mut a[0], &b[0])
                        }
                    })
                    .collect(),
            )?;
            for i in 1..len / 2 {
                cts.swap(i, 2 * i);
            }
            len /= 2;
            shift <<= 1;
        }
        Ok(cts[0].clone())
    }

    /// Un-packs a compressed ciphertext into `k` copies, element `j`
    /// rotated left so its lanes return to offset 0 (butterfly schedule).
    pub fn extract(&mut self, ct: &Ciphertext, k: usize) -> Result<Vec<Ciphertext>> {
        let mut out = vec![ct.clone(); k];
        let mut t = 1usize;
        let mut m = if k > 1 {
            1usize << (usize::BITS - (k - 1).leading_zeros())
        } else {
            1
        };
        while m > 0 {
            let h = m >> 1;
            // indices rotated at this stage
            let mut targets = Vec::new();
            let mut j1 = 0usize;
            for _ in 0..h {
                for jy in j1 + t..j1 + 2 * t {
                    if jy >= k {
                        break;
                    }
                    targets.push(jy);
                }
                j1 += 2 * t;
            }
            if !targets.is_empty() {
                let shift = t as i64;
                self.pool.execute(
                    out.iter_mut()
                        .enumerate()
                        .filter(|(i, _)| targets.contains(i))
                        .map(|(_, c)| move |ev: &mut ckks::Evaluator| ev.rotate_inplace(c, shift))
                        .collect(),
                )?;
            }
            t <<= 1;
            m >>= 1;
        }
        Ok(out)
    }

    /// Masks one lane per `k`-group (scaled) and broadcasts it across the
    /// group.
    pub fn mask_and_replicate(
        &mut self,
        cts: &mut [Ciphertext],
        scaling: f64,
        k: usize,
        rescale: bool,
    ) -> Result<()> {
        let slots = self.params().max_slots();
        let n = if slots % k == 0 {
            slots
        } else {
            (slots / k) * k - 1
        };
        let mut mask = vec![0.0f64; n];
        for j in (0..n).step_by(k) {
            mask[j] = scaling;
        }
        self.dot_vec(cts, &mask)?;
        self.replicate(cts, 1, k)?;
        if rescale {
            self.rescale(cts)?;
        }
        Ok(())
    }
}

pub fn pack_pow2_galois_elements(params: &Params, d: usize) -> Vec<u64> {
    let mut out = std::collections::BTreeSet::new();
    let mut shift = 1i64;
    let mut d = d;
    while d != 0 {
        out.insert(params.galois_element(-shift));
        d >>= 1;
        shift <<= 1;
    }
    out.into_iter().collect()
}

pub fn mask_and_compress_galois_elements(params: &Params, d: usize) -> Vec<u64> {
    let mut out = std::collections::BTreeSet::new();
    if d <= 1 {
        return Vec::new();
    }
    let mut shifts: Vec<i64> = Vec::new();
    let mut rem = d;
    while rem != 0 {
        let shift = 1usize << (usize::BITS - 1 - rem.leading_zeros());
        out.extend(pack_pow2_galois_elements(params, shift));
        for &s in &shifts {
            out.insert(params.galois_element(s));
        }
        shifts.push(-(shift as i64));
        rem -= shift;
    }
    out.into_iter().collect()
}

pub fn extract_galois_elements(params: &Params, k: usize) -> Vec<u64> {
    let mut out = std::collections::BTreeSet::new();
    if k > 1 {
        let top = 1usize << (usize::BITS - (k - 1).leading_zeros());
        let mut t = 1usize;
        while t < top {
            out.insert(params.galois_element(t as i64));
            t <<= 1;
        }
    }
    out.into_iter().collect()
}
