//! Chebyshev polynomials over ciphertexts.
//!
//! Coefficients are kept in the Chebyshev basis over [-1, 1]; the
//! `(a, b)` interval is metadata for callers, which fold the change of
//! basis into the preceding affine stage. Evaluation uses the
//! baby-step/giant-step splitting `p = q·T_{2^m} + r`, consuming
//! `ceil(log2(deg+1))` levels, with target scales propagated top-down so
//! every addition meets operands of identical scale.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::rlwe::Ciphertext;

use super::evaluator::Evaluator;

/// A polynomial in the Chebyshev basis.
#[derive(Clone, Debug)]
pub struct Polynomial {
    /// Chebyshev coefficients c_0..c_deg over [-1, 1].
    pub coeffs: Vec<f64>,
    /// Approximation interval; callers map inputs into [-1, 1] with
    /// [`Polynomial::change_of_basis`].
    pub a: f64,
    pub b: f64,
}

impl Polynomial {
    pub fn new(coeffs: Vec<f64>, a: f64, b: f64) -> Self {
        Polynomial { coeffs, a, b }
    }

    pub fn degree(&self) -> usize {
        self.coeffs.len() - 1
    }

    /// Multiplicative depth of the evaluation.
    pub fn depth(&self) -> usize {
        let deg = self.degree().max(1);
        (usize::BITS - deg.leading_zeros()) as usize
    }

    /// Returns `(scalar, constant)` such that `u = scalar·x + constant`
    /// maps `[a, b]` onto `[-1, 1]`.
    pub fn change_of_basis(&self) -> (f64, f64) {
        let scalar = 2.0 / (self.b - self.a);
        let constant = -(self.a + self.b) / (self.b - self.a);
        (scalar, constant)
    }

    /// Scalar evaluation with the interval folded in.
    pub fn eval(&self, x: f64) -> f64 {
        cheb_eval(&self.coeffs, self.a, self.b, x)
    }
}

/// Chebyshev interpolation of `f` on `[a, b]` at `degree + 1` nodes.
pub fn chebyshev_approximate(f: impl Fn(f64) -> f64, a: f64, b: f64, degree: usize) -> Polynomial {
    let n = degree + 1;
    let samples: Vec<f64> = (0..n)
        .map(|j| {
            let u = (std::f64::consts::PI * (j as f64 + 0.5) / n as f64).cos();
            f((u + 1.0) * (b - a) / 2.0 + a)
        })
        .collect();
    let mut coeffs = vec![0f64; n];
    for (k, c) in coeffs.iter_mut().enumerate() {
        let mut acc = 0.0;
        for (j, &s) in samples.iter().enumerate() {
            acc += s * (std::f64::consts::PI * k as f64 * (j as f64 + 0.5) / n as f64).cos();
        }
        *c = acc * 2.0 / n as f64;
    }
    coeffs[0] /= 2.0;
    Polynomial::new(coeffs, a, b)
}

/// Scalar Chebyshev evaluation of coefficients over `[a, b]`.
pub fn cheb_eval(coeffs: &[f64], a: f64, b: f64, x: f64) -> f64 {
    let u = (2.0 * x - a - b) / (b - a);
    let mut t_prev = 1.0;
    let mut t = u;
    let mut y = coeffs[0];
    for &c in &coeffs[1..] {
        y += t * c;
        let t_next = 2.0 * u * t - t_prev;
        t_prev = t;
        t = t_next;
    }
    y
}

/// Scalar evaluation of a composite: the first factor over `[a, b]`, the
/// rest over `[-1, 1]`.
pub fn composite_eval(table: &[Vec<f64>], a: f64, b: f64, x: f64) -> f64 {
    let mut y = x;
    for (i, coeffs) in table.iter().enumerate() {
        y = if i == 0 {
            cheb_eval(coeffs, a, b, y)
        } else {
            cheb_eval(coeffs, -1.0, 1.0, y)
        };
    }
    y
}

/// A composite minimax approximation of the sign function: a chain of
/// low-degree Chebyshev factors over [-1, 1].
#[derive(Clone, Debug)]
pub struct MinimaxCompositePolynomial {
    pub polys: Vec<Polynomial>,
}

impl MinimaxCompositePolynomial {
    pub fn from_coeff_tables(tables: &[Vec<f64>]) -> Self {
        MinimaxCompositePolynomial {
            polys: tables
                .iter()
                .map(|t| Polynomial::new(t.clone(), -1.0, 1.0))
                .collect(),
        }
    }

    /// Total multiplicative depth of the chain.
    pub fn depth(&self) -> usize {
        self.polys.iter().map(|p| p.depth()).sum()
    }

    /// Turns the sign composite into a step composite `(sign + 1)/2` by
    /// halving the last factor and shifting its constant term.
    pub fn to_step(&self) -> Self {
        let mut polys = self.polys.clone();
        if let Some(last) = polys.last_mut() {
            for c in last.coeffs.iter_mut() {
                *c *= 0.5;
            }
            last.coeffs[0] += 0.5;
        }
        MinimaxCompositePolynomial { polys }
    }
}

/// Per-slot selection of column polynomials: slot `j` is evaluated under
/// `polys[mapping[j]]`.
#[derive(Clone, Debug)]
pub struct PolynomialVector {
    pub polys: Vec<Polynomial>,
    pub mapping: Vec<usize>,
}

impl PolynomialVector {
    pub fn new(polys: Vec<Polynomial>, mapping: Vec<usize>) -> Result<Self> {
        for &m in &mapping {
            if m >= polys.len() {
                return Err(Error::shape("polynomial vector mapping out of range"));
            }
        }
        Ok(PolynomialVector { polys, mapping })
    }

    pub fn depth(&self) -> usize {
        self.polys.iter().map(|p| p.depth()).max().unwrap_or(0)
    }
}

/// Evaluates a Chebyshev polynomial on a ciphertext already mapped into
/// [-1, 1]. Consumes `poly.depth()` levels; the result is fully rescaled
/// to `target_scale`.
pub fn evaluate_polynomial(
    eval: &mut Evaluator,
    ct: &Ciphertext,
    poly: &Polynomial,
    target_scale: f64,
) -> Result<Ciphertext> {
    let coeffs = vec![poly.coeffs.clone()];
    evaluate_internal(eval, ct, &coeffs, None, target_scale)
}

/// Evaluates a vector of polynomials, dispatching slots by the mapping.
pub fn evaluate_polynomial_vector(
    eval: &mut Evaluator,
    ct: &Ciphertext,
    pv: &PolynomialVector,
    target_scale: f64,
) -> Result<Ciphertext> {
    let coeffs: Vec<Vec<f64>> = pv.polys.iter().map(|p| p.coeffs.clone()).collect();
    evaluate_internal(eval, ct, &coeffs, Some(&pv.mapping), target_scale)
}

fn evaluate_internal(
    eval: &mut Evaluator,
    ct: &Ciphertext,
    coeffs: &[Vec<f64>],
    mapping: Option<&[usize]>,
    target_scale: f64,
) -> Result<Ciphertext> {
    let deg = coeffs.iter().map(|c| trimmed_degree(c)).max().unwrap_or(0);
    if deg == 0 {
        let mut out = Ciphertext::new(eval.params().ring_q(), 1, ct.level(), ct.meta);
        out.meta.scale = target_scale;
        add_constant_term(eval, &mut out, coeffs, mapping)?;
        return Ok(out);
    }
    let log_degree = (usize::BITS - deg.leading_zeros()) as usize;
    if ct.level() < log_degree {
        return Err(Error::Range {
            op: "evaluate_polynomial",
            level: ct.level(),
            required: log_degree,
        });
    }
    let log_split = (log_degree >> 1).max(1);
    let bs = 1usize << log_split;

    let pb = gen_power_basis(eval, ct, log_degree, log_split)?;

    let padded: Vec<Vec<f64>> = coeffs
        .iter()
        .map(|c| {
            let mut c = c.clone();
            c.resize(deg + 1, 0.0);
            c
        })
        .collect();

    let out_level = ct.level() - log_degree;
    rec_eval(eval, &pb, &padded, mapping, bs, out_level, target_scale)
}

fn trimmed_degree(c: &[f64]) -> usize {
    c.iter().rposition(|&x| x != 0.0).unwrap_or(0)
}

fn gen_power_basis(
    eval: &mut Evaluator,
    ct: &Ciphertext,
    log_degree: usize,
    log_split: usize,
) -> Result<BTreeMap<usize, Ciphertext>> {
    let mut pb = BTreeMap::new();
    pb.insert(1usize, ct.clone());
    let bs = 1usize << log_split;
    for i in 2..bs {
        gen_power(eval, &mut pb, i)?;
    }
    let mut g = bs;
    while g <= 1 << (log_degree - 1) {
        gen_power(eval, &mut pb, g)?;
        g <<= 1;
    }
    Ok(pb)
}

fn gen_power(eval: &mut Evaluator, pb: &mut BTreeMap<usize, Ciphertext>, i: usize) -> Result<()> {
    if pb.contains_key(&i) {
        return Ok(());
    }
    if i % 2 == 0 {
        // T_{2j} = 2·T_j² - 1
        let j = i / 2;
        gen_power(eval, pb, j)?;
        let t_j = pb[&j].clone();
        let mut t = eval.mul_relin_new(&t_j, &t_j)?;
        eval.rescale_inplace(&mut t)?;
        eval.mul_scalar_int_inplace(&mut t, 2);
        eval.add_scalar_inplace(&mut t, -1.0);
        pb.insert(i, t);
    } else {
        // T_{a+b} = 2·T_a·T_b - T_{a-b} with a = b+1
        let a = i / 2 + 1;
        let b = i / 2;
        gen_power(eval, pb, a)?;
        gen_power(eval, pb, b)?;
        let mut ca = pb[&a].clone();
        let mut cb = pb[&b].clone();
        let level = ca.level().min(cb.level());
        ca.resize_level(level);
        cb.resize_level(level);
        let mut t = eval.mul_relin_new(&ca, &cb)?;
        eval.rescale_inplace(&mut t)?;
        eval.mul_scalar_int_inplace(&mut t, 2);
        let mut t1 = pb[&(a - b)].clone();
        t1.resize_level(t.level());
        eval.sub_inplace(&mut t, &t1)?;
        pb.insert(i, t);
    }
    Ok(())
}

fn rec_eval(
    eval: &mut Evaluator,
    pb: &BTreeMap<usize, Ciphertext>,
    coeffs: &[Vec<f64>],
    mapping: Option<&[usize]>,
    bs: usize,
    level: usize,
    scale: f64,
) -> Result<Ciphertext> {
    let deg = coeffs.iter().map(|c| trimmed_degree(c)).max().unwrap_or(0);
    if deg < bs {
        return leaf_eval(eval, pb, coeffs, mapping, level, scale);
    }

    // split p = q·T_m + r at the largest power of two <= deg
    let m = 1usize << (usize::BITS - 1 - deg.leading_zeros());
    let mut q_coeffs = Vec::with_capacity(coeffs.len());
    let mut r_coeffs = Vec::with_capacity(coeffs.len());
    for c in coeffs {
        let (q, r) = split_chebyshev(c, m);
        q_coeffs.push(q);
        r_coeffs.push(r);
    }

    let t_g = &pb[&m];
    if t_g.level() < level + 1 {
        return Err(Error::shape("power basis level too low for split"));
    }
    let q_lvl = eval.params().q()[level + 1] as f64;
    let q_scale = scale * q_lvl / t_g.meta.scale;

    let q_ct = rec_eval(eval, pb, &q_coeffs, mapping, bs, level + 1, q_scale)?;
    let mut t_g = t_g.clone();
    t_g.resize_level(level + 1);
    let mut prod = eval.mul_relin_new(&q_ct, &t_g)?;
    eval.rescale_inplace(&mut prod)?;
    prod.meta.scale = scale;

    let r_ct = rec_eval(eval, pb, &r_coeffs, mapping, bs, level, scale)?;
    eval.add_inplace(&mut prod, &r_ct)?;
    Ok(prod)
}

fn leaf_eval(
    eval: &mut Evaluator,
    pb: &BTreeMap<usize, Ciphertext>,
    coeffs: &[Vec<f64>],
    mapping: Option<&[usize]>,
    level: usize,
    scale: f64,
) -> Result<Ciphertext> {
    let deg = coeffs.iter().map(|c| trimmed_degree(c)).max().unwrap_or(0);

    // the working level adapts to the lowest power-basis entry used
    let mut work_level = level + 1;
    for i in 1..=deg {
        if coeffs.iter().all(|c| c[i] == 0.0) {
            continue;
        }
        work_level = work_level.min(pb[&i].level());
    }
    if work_level < level {
        return Err(Error::shape("power basis level below leaf target"));
    }
    let work_scale = if work_level > level {
        scale * eval.params().q()[work_level] as f64
    } else {
        scale
    };

    let mut acc: Option<Ciphertext> = None;
    for i in 1..=deg {
        if coeffs.iter().all(|c| c[i] == 0.0) {
            continue;
        }
        let t_i = &pb[&i];
        let mut term = t_i.clone();
        term.resize_level(work_level);
        match mapping {
            None => {
                let m = coeffs[0][i] * work_scale / t_i.meta.scale;
                eval.mul_scalar_raw_inplace(&mut term, m);
            }
            Some(map) => {
                let slots = eval.params().max_slots();
                let values: Vec<f64> = (0..slots)
                    .map(|s| map.get(s).map(|&p| coeffs[p][i]).unwrap_or(0.0))
                    .collect();
                let pt = eval.encode_new(&values, work_level, work_scale / t_i.meta.scale)?;
                eval.mul_pt_inplace(&mut term, &pt)?;
            }
        }
        term.meta.scale = work_scale;
        match acc.as_mut() {
            None => acc = Some(term),
            Some(a) => eval.add_inplace(a, &term)?,
        }
    }

    let mut acc = match acc {
        Some(a) => a,
        None => {
            let meta = crate::rlwe::MetaData::new(work_scale, eval.params().log_max_slots());
            Ciphertext::new(eval.params().ring_q(), 1, work_level, meta)
        }
    };
    acc.meta.scale = work_scale;
    add_constant_term(eval, &mut acc, coeffs, mapping)?;

    while acc.level() > level {
        eval.rescale_inplace(&mut acc)?;
    }
    acc.meta.scale = scale;
    Ok(acc)
}

fn add_constant_term(
    eval: &mut Evaluator,
    acc: &mut Ciphertext,
    coeffs: &[Vec<f64>],
    mapping: Option<&[usize]>,
) -> Result<()> {
    match mapping {
        None => {
            if coeffs[0][0] != 0.0 {
                eval.add_scalar_inplace(acc, coeffs[0][0]);
            }
        }
        Some(map) => {
            let slots = eval.params().max_slots();
            let values: Vec<f64> = (0..slots)
                .map(|s| map.get(s).map(|&p| coeffs[p][0]).unwrap_or(0.0))
                .collect();
            if values.iter().any(|&v| v != 0.0) {
                let pt = eval.encode_new(&values, acc.level(), acc.meta.scale)?;
                eval.add_pt_inplace(acc, &pt)?;
            }
        }
    }
    Ok(())
}

/// Chebyshev division by `T_m` (m a power of two): `p = q·T_m + r` with
/// `deg r < m`, using `T_i = 2·T_{i-m}·T_m - T_{2m-i}`.
fn split_chebyshev(coeffs: &[f64], m: usize) -> (Vec<f64>, Vec<f64>) {
    let deg = coeffs.len() - 1;
    debug_assert!(deg < 2 * m, "split point too small");
    let mut q = vec![0f64; deg - m + 1];
    let mut r = coeffs[..m].to_vec();
    for i in m..=deg {
        if coeffs[i] == 0.0 {
            continue;
        }
        if i == m {
            q[0] += coeffs[i];
        } else {
            q[i - m] += 2.0 * coeffs[i];
            r[2 * m - i] -= coeffs[i];
        }
    }
    (q, r)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chebyshev_approximation_is_accurate() {
        let poly = chebyshev_approximate(f64::exp, -3.0, 2.0, 31);
        for i in 0..100 {
            let x = -3.0 + 5.0 * i as f64 / 99.0;
            assert!(
                (poly.eval(x) - x.exp()).abs() < 1e-9,
                "x={x}: {} vs {}",
                poly.eval(x),
                x.exp()
            );
        }
    }

    #[test]
    fn change_of_basis_maps_interval() {
        let poly = Polynomial::new(vec![0.0, 1.0], 2.0, 10.0);
        let (a, b) = poly.change_of_basis();
        assert!((a * 2.0 + b + 1.0).abs() < 1e-12);
        assert!((a * 10.0 + b - 1.0).abs() < 1e-12);
    }

    #[test]
    fn split_reconstructs() {
        // p(u) with random-ish chebyshev coeffs; check q·T_m + r == p
        let coeffs: Vec<f64> = (0..=13).map(|i| ((i * 7 + 3) % 11) as f64 - 5.0).collect();
        let m = 8;
        let (q, r) = split_chebyshev(&coeffs, m);
        for i in 0..50 {
            let u = -1.0 + 2.0 * i as f64 / 49.0;
            let tm = (m as f64 * u.acos()).cos();
            let want = cheb_eval(&coeffs, -1.0, 1.0, u);
            let got = cheb_eval(&q, -1.0, 1.0, u) * tm + cheb_eval(&r, -1.0, 1.0, u);
            assert!((want - got).abs() < 1e-9, "u={u}: {want} vs {got}");
        }
    }

    #[test]
    fn step_transform_shifts_range() {
        let sign = MinimaxCompositePolynomial::from_coeff_tables(&[vec![0.0, 1.27, 0.0, -0.42]]);
        let step = sign.to_step();
        for x in [-0.9f64, -0.3, 0.3, 0.9] {
            let s = composite_eval(
                &sign.polys.iter().map(|p| p.coeffs.clone()).collect::<Vec<_>>(),
                -1.0,
                1.0,
                x,
            );
            let st = composite_eval(
                &step.polys.iter().map(|p| p.coeffs.clone()).collect::<Vec<_>>(),
                -1.0,
                1.0,
                x,
            );
            assert!((st - (s + 1.0) / 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn depth_is_log_degree() {
        assert_eq!(Polynomial::new(vec![0.0; 32], -1.0, 1.0).depth(), 5);
        assert_eq!(Polynomial::new(vec![0.0; 64], -1.0, 1.0).depth(), 6);
        assert_eq!(Polynomial::new(vec![0.0; 2], -1.0, 1.0).depth(), 1);
    }
}
