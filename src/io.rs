//! Deterministic binary serialization.
//!
//! Endian-stable 64-bit words with per-structure length prefixes; every
//! persisted type satisfies `read_from(write_to(x)) == x` by deep
//! equality. The writer contracts mirror `binary_size` exactly.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::ring::{Poly, PolyQP};
use crate::rlwe::{
    Ciphertext, DigitDecomposition, DigitDecompositionType, GadgetCiphertext, GaloisKey,
    LogDimensions, MetaData, Plaintext, RelinearizationKey, SecretKey,
};

pub trait BinarySerialize: Sized {
    /// Exact number of bytes produced by [`BinarySerialize::write_to`].
    fn binary_size(&self) -> usize;
    fn write_to<W: Write>(&self, w: &mut W) -> Result<()>;
    fn read_from<R: Read>(r: &mut R) -> Result<Self>;
}

pub fn to_bytes<T: BinarySerialize>(x: &T) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(x.binary_size());
    x.write_to(&mut out)?;
    debug_assert_eq!(out.len(), x.binary_size());
    Ok(out)
}

pub fn from_bytes<T: BinarySerialize>(mut b: &[u8]) -> Result<T> {
    T::read_from(&mut b)
}

impl BinarySerialize for Poly {
    fn binary_size(&self) -> usize {
        16 + self.coeffs.len() * self.n() * 8
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64::<LittleEndian>(self.coeffs.len() as u64)?;
        w.write_u64::<LittleEndian>(self.n() as u64)?;
        for row in &self.coeffs {
            for &x in row {
                w.write_u64::<LittleEndian>(x)?;
            }
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let rows = r.read_u64::<LittleEndian>()? as usize;
        let n = r.read_u64::<LittleEndian>()? as usize;
        let mut coeffs = Vec::with_capacity(rows);
        for _ in 0..rows {
            let mut row = vec![0u64; n];
            for x in row.iter_mut() {
                *x = r.read_u64::<LittleEndian>()?;
            }
            coeffs.push(row);
        }
        Ok(Poly { coeffs })
    }
}

impl BinarySerialize for PolyQP {
    fn binary_size(&self) -> usize {
        1 + self.q.binary_size() + self.p.as_ref().map_or(0, |p| p.binary_size())
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.p.is_some() as u8)?;
        self.q.write_to(w)?;
        if let Some(p) = &self.p {
            p.write_to(w)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let has_p = r.read_u8()? != 0;
        let q = Poly::read_from(r)?;
        let p = if has_p { Some(Poly::read_from(r)?) } else { None };
        Ok(PolyQP { q, p })
    }
}

impl BinarySerialize for MetaData {
    fn binary_size(&self) -> usize {
        8 + 3 + 16
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64::<LittleEndian>(self.scale.to_bits())?;
        w.write_u8(self.is_ntt as u8)?;
        w.write_u8(self.is_montgomery as u8)?;
        w.write_u8(self.is_batched as u8)?;
        w.write_u64::<LittleEndian>(self.log_dimensions.rows as u64)?;
        w.write_u64::<LittleEndian>(self.log_dimensions.cols as u64)?;
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let scale = f64::from_bits(r.read_u64::<LittleEndian>()?);
        let is_ntt = r.read_u8()? != 0;
        let is_montgomery = r.read_u8()? != 0;
        let is_batched = r.read_u8()? != 0;
        let rows = r.read_u64::<LittleEndian>()? as usize;
        let cols = r.read_u64::<LittleEndian>()? as usize;
        Ok(MetaData {
            scale,
            is_ntt,
            is_montgomery,
            is_batched,
            log_dimensions: LogDimensions { rows, cols },
        })
    }
}

impl BinarySerialize for Ciphertext {
    fn binary_size(&self) -> usize {
        self.meta.binary_size() + 8 + self.q.iter().map(|p| p.binary_size()).sum::<usize>()
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.meta.write_to(w)?;
        w.write_u64::<LittleEndian>(self.q.len() as u64)?;
        for p in &self.q {
            p.write_to(w)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let meta = MetaData::read_from(r)?;
        let count = r.read_u64::<LittleEndian>()? as usize;
        let mut q = Vec::with_capacity(count);
        for _ in 0..count {
            q.push(Poly::read_from(r)?);
        }
        Ok(Ciphertext { q, meta })
    }
}

impl BinarySerialize for Plaintext {
    fn binary_size(&self) -> usize {
        self.meta.binary_size() + self.poly.binary_size()
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.meta.write_to(w)?;
        self.poly.write_to(w)
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let meta = MetaData::read_from(r)?;
        let poly = Poly::read_from(r)?;
        Ok(Plaintext { poly, meta })
    }
}

impl BinarySerialize for SecretKey {
    fn binary_size(&self) -> usize {
        1 + self.q.binary_size() + self.p.as_ref().map_or(0, |p| p.binary_size())
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(self.p.is_some() as u8)?;
        self.q.write_to(w)?;
        if let Some(p) = &self.p {
            p.write_to(w)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let has_p = r.read_u8()? != 0;
        let q = Poly::read_from(r)?;
        let p = if has_p { Some(Poly::read_from(r)?) } else { None };
        Ok(SecretKey { q, p })
    }
}

impl BinarySerialize for GadgetCiphertext {
    fn binary_size(&self) -> usize {
        let rows: usize = self
            .el
            .iter()
            .map(|row| {
                8 + row
                    .iter()
                    .map(|pair| pair[0].binary_size() + pair[1].binary_size())
                    .sum::<usize>()
            })
            .sum();
        2 + 8 + 8 + 8 + 8 + rows
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u8(match self.dd.kind {
            DigitDecompositionType::None => 0,
            DigitDecompositionType::Unsigned => 1,
            DigitDecompositionType::Signed => 2,
            DigitDecompositionType::SignedBalanced => 3,
        })?;
        w.write_u8(self.dd.log2_basis as u8)?;
        w.write_u64::<LittleEndian>(self.level_q as u64)?;
        w.write_i64::<LittleEndian>(self.level_p.map_or(-1, |l| l as i64))?;
        w.write_u64::<LittleEndian>(self.el.len() as u64)?;
        w.write_u64::<LittleEndian>(0)?; // reserved framing word
        for row in &self.el {
            w.write_u64::<LittleEndian>(row.len() as u64)?;
            for pair in row {
                pair[0].write_to(w)?;
                pair[1].write_to(w)?;
            }
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let kind = match r.read_u8()? {
            0 => DigitDecompositionType::None,
            1 => DigitDecompositionType::Unsigned,
            2 => DigitDecompositionType::Signed,
            _ => DigitDecompositionType::SignedBalanced,
        };
        let log2_basis = r.read_u8()? as usize;
        let level_q = r.read_u64::<LittleEndian>()? as usize;
        let level_p = match r.read_i64::<LittleEndian>()? {
            -1 => None,
            l => Some(l as usize),
        };
        let rows = r.read_u64::<LittleEndian>()? as usize;
        let _ = r.read_u64::<LittleEndian>()?;
        let mut el = Vec::with_capacity(rows);
        for _ in 0..rows {
            let cols = r.read_u64::<LittleEndian>()? as usize;
            let mut row = Vec::with_capacity(cols);
            for _ in 0..cols {
                let a = PolyQP::read_from(r)?;
                let b = PolyQP::read_from(r)?;
                row.push([a, b]);
            }
            el.push(row);
        }
        Ok(GadgetCiphertext {
            dd: DigitDecomposition { kind, log2_basis },
            level_q,
            level_p,
            el,
        })
    }
}

impl BinarySerialize for GaloisKey {
    fn binary_size(&self) -> usize {
        8 + self.gct.binary_size()
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64::<LittleEndian>(self.gal_el)?;
        self.gct.write_to(w)
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let gal_el = r.read_u64::<LittleEndian>()?;
        let gct = GadgetCiphertext::read_from(r)?;
        Ok(GaloisKey { gal_el, gct })
    }
}

impl BinarySerialize for RelinearizationKey {
    fn binary_size(&self) -> usize {
        self.gct.binary_size()
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        self.gct.write_to(w)
    }

    fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        Ok(RelinearizationKey {
            gct: GadgetCiphertext::read_from(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poly(n: usize, rows: usize, seed: u64) -> Poly {
        let mut p = Poly::new(n, rows - 1);
        for (i, row) in p.coeffs.iter_mut().enumerate() {
            for (j, x) in row.iter_mut().enumerate() {
                *x = seed
                    .wrapping_mul(i as u64 + 1)
                    .wrapping_add(j as u64 * 0x9E3779B97F4A7C15);
            }
        }
        p
    }

    #[test]
    fn poly_round_trip() {
        let p = poly(32, 3, 77);
        let bytes = to_bytes(&p).unwrap();
        assert_eq!(bytes.len(), p.binary_size());
        let back: Poly = from_bytes(&bytes).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn ciphertext_round_trip() {
        let meta = MetaData::new(2f64.powi(45), 4);
        let ct = Ciphertext {
            q: vec![poly(16, 2, 1), poly(16, 2, 2)],
            meta,
        };
        let bytes = to_bytes(&ct).unwrap();
        assert_eq!(bytes.len(), ct.binary_size());
        let back: Ciphertext = from_bytes(&bytes).unwrap();
        assert_eq!(ct.meta, back.meta);
        assert_eq!(ct.q[0], back.q[0]);
        assert_eq!(ct.q[1], back.q[1]);
    }

    #[test]
    fn gadget_ciphertext_round_trip() {
        let gct = GadgetCiphertext {
            dd: DigitDecomposition {
                kind: DigitDecompositionType::Signed,
                log2_basis: 13,
            },
            level_q: 1,
            level_p: None,
            el: vec![vec![
                [
                    PolyQP {
                        q: poly(16, 2, 3),
                        p: None,
                    },
                    PolyQP {
                        q: poly(16, 2, 4),
                        p: None,
                    },
                ],
                [
                    PolyQP {
                        q: poly(16, 2, 5),
                        p: None,
                    },
                    PolyQP {
                        q: poly(16, 2, 6),
                        p: None,
                    },
                ],
            ]],
        };
        let bytes = to_bytes(&gct).unwrap();
        assert_eq!(bytes.len(), gct.binary_size());
        let back: GadgetCiphertext = from_bytes(&bytes).unwrap();
        assert_eq!(back.dd, gct.dd);
        assert_eq!(back.el.len(), 1);
        assert_eq!(back.el[0].len(), 2);
        assert_eq!(back.el[0][1][0].q, gct.el[0][1][0].q);
    }
}
