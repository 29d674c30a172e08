use std::cell::RefCell;
use std::time::Instant;

use log::debug;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::linalg::{axpy, dot, gramian, llt_solve_inplace};
use crate::sparse::CsrMatrix;

/// Floor applied to the regularization term so the per-row normal equations
/// stay positive definite even when the caller passes zero.
const MIN_LAMBDA: f32 = 1e-6;

/// Per-row least-squares strategy for each ALS half-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    /// Dense normal equations factored with Cholesky. Exact, O(k^3) per row.
    Cholesky,
    /// Conjugate gradient against the implicitly applied system matrix.
    /// Cheaper for large k; `iterations` is the inner CG step count.
    ConjugateGradient { iterations: usize },
}

/// Training hyperparameters.
///
/// The interaction weights passed to `fit` are taken as confidence minus
/// one (`c = 1 + weight`); any scaling convention such as `alpha * count`
/// or BM25 damping is applied by the caller beforehand.
#[derive(Debug, Clone)]
pub struct AlsConfig {
    /// Latent factor dimensionality, shared by users and items.
    pub factors: usize,
    /// L2 regularization strength.
    pub regularization: f32,
    /// Number of full user/item alternations. The sole stopping criterion.
    pub iterations: usize,
    pub solver: SolverKind,
    /// Worker threads for the solver and batch queries; 0 means available
    /// hardware concurrency.
    pub threads: usize,
    /// Seed for factor initialization; fits are reproducible per seed.
    pub seed: u64,
}

impl Default for AlsConfig {
    fn default() -> Self {
        AlsConfig {
            factors: 64,
            regularization: 0.01,
            iterations: 15,
            solver: SolverKind::ConjugateGradient { iterations: 10 },
            threads: 0,
            seed: 42,
        }
    }
}

impl AlsConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.factors == 0 {
            return Err(Error::Config("factor count must be positive".into()));
        }
        if self.iterations == 0 {
            return Err(Error::Config("iteration count must be positive".into()));
        }
        if !(self.regularization >= 0.0) {
            return Err(Error::Config(format!(
                "regularization must be non-negative, got {}",
                self.regularization
            )));
        }
        if let SolverKind::ConjugateGradient { iterations: 0 } = self.solver {
            return Err(Error::Config("cg iteration count must be positive".into()));
        }
        Ok(())
    }
}

// Xorshift-seeded factors scaled by 1/sqrt(k); reproducible without an RNG
// dependency.
pub(crate) fn seeded_factors(n: usize, k: usize, seed: u64) -> Vec<f32> {
    let mut out = vec![0.0f32; n * k];
    // Xorshift fixes the zero state, which would yield all-zero factors.
    let mut s = seed | 1;
    let scale = 1.0 / (k as f32).sqrt();
    for v in out.iter_mut() {
        s ^= s << 13;
        s ^= s >> 7;
        s ^= s << 17;
        *v = ((s & 0xFFFF) as f32) / (0xFFFF as f32) * scale;
    }
    out
}

thread_local! {
    static CHOL_SCRATCH: RefCell<(Vec<f32>, Vec<f32>)> =
        const { RefCell::new((Vec::new(), Vec::new())) };
    static CG_SCRATCH: RefCell<(Vec<f32>, Vec<f32>, Vec<f32>, Vec<f32>)> =
        const { RefCell::new((Vec::new(), Vec::new(), Vec::new(), Vec::new())) };
}

/// Solve one half-step: for every row of `m`, find the factor vector that
/// minimizes the confidence-weighted least-squares objective against the
/// fixed `other` factors. `gram` is the shared `otherᵗ other` product.
pub(crate) fn solve_rows(
    m: &CsrMatrix,
    other: &[f32],
    gram: &[f32],
    k: usize,
    lambda: f32,
    solver: SolverKind,
) -> Result<Vec<f32>> {
    let n = m.n_rows();
    let mut out = vec![0.0f32; n * k];
    match solver {
        SolverKind::Cholesky => solve_rows_cholesky(m, other, gram, k, lambda, &mut out)?,
        SolverKind::ConjugateGradient { iterations } => {
            solve_rows_cg(m, other, gram, k, lambda, iterations, &mut out)?
        }
    }
    Ok(out)
}

fn solve_rows_cholesky(
    m: &CsrMatrix,
    other: &[f32],
    gram: &[f32],
    k: usize,
    lambda: f32,
    out: &mut [f32],
) -> Result<()> {
    let indptr = m.indptr();
    let indices = m.indices();
    let data = m.data();
    let eff_lambda = lambda.max(MIN_LAMBDA);

    out.par_chunks_mut(k)
        .enumerate()
        .try_for_each(|(row, x)| -> Result<()> {
            let start = indptr[row] as usize;
            let end = indptr[row + 1] as usize;
            if start == end {
                // No interactions: the regularized solution is the zero vector.
                return Ok(());
            }

            CHOL_SCRATCH.with(|cell| {
                let mut borrow = cell.borrow_mut();
                let (ref mut a, ref mut b) = *borrow;
                a.clear();
                a.extend_from_slice(gram);
                b.clear();
                b.resize(k, 0.0);

                for j in 0..k {
                    a[j * k + j] += eff_lambda;
                }

                for idx in start..end {
                    let i = indices[idx] as usize;
                    let c = 1.0 + data[idx];
                    let y = &other[i * k..(i + 1) * k];

                    axpy(c, y, b);

                    // Rank-one update (c - 1) * y yᵗ onto the system matrix.
                    let w = c - 1.0;
                    for r in 0..k {
                        axpy(w * y[r], y, &mut a[r * k..(r + 1) * k]);
                    }
                }

                if !llt_solve_inplace(a, b, k) {
                    return Err(Error::Numerical(format!(
                        "normal equations for row {row} ({} nonzeros, k={k}) \
                         are not positive definite",
                        end - start
                    )));
                }
                x.copy_from_slice(b);
                Ok(())
            })
        })
}

fn solve_rows_cg(
    m: &CsrMatrix,
    other: &[f32],
    gram: &[f32],
    k: usize,
    lambda: f32,
    cg_iters: usize,
    out: &mut [f32],
) -> Result<()> {
    let indptr = m.indptr();
    let indices = m.indices();
    let data = m.data();
    let eff_lambda = lambda.max(MIN_LAMBDA);

    out.par_chunks_mut(k)
        .enumerate()
        .try_for_each(|(row, x)| -> Result<()> {
            let start = indptr[row] as usize;
            let end = indptr[row + 1] as usize;
            if start == end {
                return Ok(());
            }

            CG_SCRATCH.with(|cell| {
                let mut borrow = cell.borrow_mut();
                let (ref mut b, ref mut r, ref mut p, ref mut ap) = *borrow;
                b.clear();
                b.resize(k, 0.0);
                r.clear();
                r.resize(k, 0.0);
                p.clear();
                p.resize(k, 0.0);
                ap.clear();
                ap.resize(k, 0.0);

                for idx in start..end {
                    let i = indices[idx] as usize;
                    let c = 1.0 + data[idx];
                    let y = &other[i * k..(i + 1) * k];
                    axpy(c, y, b);
                }

                // A v = (gram + lambda I) v + sum_i (c_i - 1) y_i (y_iᵗ v),
                // applied without materializing A.
                let apply_a = |v: &[f32], out: &mut [f32]| {
                    for a in 0..k {
                        let mut s = 0.0f32;
                        for bb in 0..k {
                            s += gram[a * k + bb] * v[bb];
                        }
                        out[a] = s + eff_lambda * v[a];
                    }
                    for idx in start..end {
                        let i = indices[idx] as usize;
                        let c = 1.0 + data[idx];
                        let y = &other[i * k..(i + 1) * k];
                        let w = (c - 1.0) * dot(y, v);
                        axpy(w, y, out);
                    }
                };

                x.fill(0.0);
                r.copy_from_slice(b);
                p.copy_from_slice(b);
                let mut rsold = dot(r, r);

                if rsold < 1e-20 {
                    return Ok(());
                }

                for _ in 0..cg_iters {
                    apply_a(p, ap);
                    let pap = dot(p, ap);
                    if pap <= 0.0 {
                        return Err(Error::Numerical(format!(
                            "cg detected a non-positive-definite system for \
                             row {row} (curvature {pap:e})"
                        )));
                    }
                    let alpha = rsold / pap;

                    axpy(alpha, p, x);
                    axpy(-alpha, ap, r);

                    let rsnew = dot(r, r);
                    if rsnew < 1e-20 {
                        break;
                    }
                    let beta = rsnew / rsold;
                    for j in 0..k {
                        p[j] = r[j] + beta * p[j];
                    }
                    rsold = rsnew;
                }
                Ok(())
            })
        })
}

/// Solve a single user row against fixed item factors and their Gram
/// matrix. Used for on-the-fly user recalculation at query time; never
/// touches stored factors.
pub(crate) fn solve_user_row(
    cols: &[i32],
    vals: &[f32],
    item_factors: &[f32],
    item_gram: &[f32],
    k: usize,
    lambda: f32,
) -> Result<Vec<f32>> {
    let eff_lambda = lambda.max(MIN_LAMBDA);
    let mut a = item_gram.to_vec();
    let mut b = vec![0.0f32; k];

    for j in 0..k {
        a[j * k + j] += eff_lambda;
    }
    for (&i, &v) in cols.iter().zip(vals) {
        let c = 1.0 + v;
        let y = &item_factors[i as usize * k..(i as usize + 1) * k];
        axpy(c, y, &mut b);
        let w = c - 1.0;
        for r in 0..k {
            axpy(w * y[r], y, &mut a[r * k..(r + 1) * k]);
        }
    }

    if b.iter().all(|&v| v == 0.0) {
        return Ok(b);
    }
    if !llt_solve_inplace(&mut a, &mut b, k) {
        return Err(Error::Numerical(format!(
            "normal equations for recalculated user ({} nonzeros, k={k}) \
             are not positive definite",
            cols.len()
        )));
    }
    Ok(b)
}

/// Run the full alternation: `iterations` rounds of (solve users, barrier,
/// solve items). `m` is user-major, `mt` its transpose. Must be called
/// inside the model's thread pool.
pub(crate) fn train(
    m: &CsrMatrix,
    mt: &CsrMatrix,
    cfg: &AlsConfig,
) -> Result<(Vec<f32>, Vec<f32>)> {
    let k = cfg.factors;
    let n_users = m.n_rows();
    let n_items = m.n_cols();

    let mut user_factors = seeded_factors(n_users, k, cfg.seed);
    let mut item_factors = seeded_factors(n_items, k, cfg.seed.wrapping_add(1));

    for iter in 0..cfg.iterations {
        let start_u = Instant::now();
        let g_item = gramian(&item_factors, n_items, k);
        user_factors = solve_rows(m, &item_factors, &g_item, k, cfg.regularization, cfg.solver)?;
        let user_time = start_u.elapsed();

        let start_i = Instant::now();
        let g_user = gramian(&user_factors, n_users, k);
        item_factors = solve_rows(mt, &user_factors, &g_user, k, cfg.regularization, cfg.solver)?;

        debug!(
            "als iteration {}/{}: users {:.3}s, items {:.3}s",
            iter + 1,
            cfg.iterations,
            user_time.as_secs_f64(),
            start_i.elapsed().as_secs_f64()
        );
    }

    Ok((user_factors, item_factors))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_validation() {
        assert!(AlsConfig::default().validate().is_ok());
        let bad = AlsConfig {
            factors: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
        let bad = AlsConfig {
            iterations: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
        let bad = AlsConfig {
            regularization: -1.0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
        let bad = AlsConfig {
            solver: SolverKind::ConjugateGradient { iterations: 0 },
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn seeded_factors_are_deterministic_and_scaled() {
        let a = seeded_factors(4, 8, 7);
        let b = seeded_factors(4, 8, 7);
        assert_eq!(a, b);
        let bound = 1.0 / (8.0f32).sqrt();
        assert!(a.iter().all(|&v| (0.0..=bound).contains(&v)));
        assert!(a.iter().any(|&v| v != 0.0));
    }

    #[test]
    fn empty_rows_solve_to_zero() {
        let m = CsrMatrix::from_triples(3, 2, &[(0, 0, 1.0), (2, 1, 2.0)]).unwrap();
        let other = seeded_factors(2, 2, 1);
        let gram = gramian(&other, 2, 2);
        let out = solve_rows(&m, &other, &gram, 2, 0.1, SolverKind::Cholesky).unwrap();
        assert_eq!(&out[2..4], &[0.0, 0.0]);
        assert!(out[0] != 0.0 || out[1] != 0.0);
    }

    #[test]
    fn cg_agrees_with_cholesky() {
        let m = CsrMatrix::from_triples(
            3,
            3,
            &[
                (0, 0, 4.0),
                (0, 1, 2.0),
                (1, 0, 3.0),
                (1, 2, 1.0),
                (2, 2, 5.0),
            ],
        )
        .unwrap();
        let other = seeded_factors(3, 2, 9);
        let gram = gramian(&other, 3, 2);
        let exact = solve_rows(&m, &other, &gram, 2, 0.05, SolverKind::Cholesky).unwrap();
        let cg = solve_rows(
            &m,
            &other,
            &gram,
            2,
            0.05,
            SolverKind::ConjugateGradient { iterations: 10 },
        )
        .unwrap();
        for (a, b) in exact.iter().zip(&cg) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn recalculated_row_matches_half_step_solution() {
        let m = CsrMatrix::from_triples(2, 3, &[(0, 0, 2.0), (0, 2, 1.0), (1, 1, 3.0)]).unwrap();
        let items = seeded_factors(3, 2, 3);
        let gram = gramian(&items, 3, 2);
        let full = solve_rows(&m, &items, &gram, 2, 0.1, SolverKind::Cholesky).unwrap();
        let (cols, vals) = m.row(0);
        let solo = solve_user_row(cols, vals, &items, &gram, 2, 0.1).unwrap();
        for (a, b) in full[0..2].iter().zip(&solo) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn train_is_reproducible_per_seed() {
        let m = CsrMatrix::from_triples(
            3,
            3,
            &[
                (0, 0, 1.0),
                (0, 1, 1.0),
                (1, 0, 1.0),
                (1, 1, 1.0),
                (2, 2, 1.0),
            ],
        )
        .unwrap();
        let mt = m.transpose();
        let cfg = AlsConfig {
            factors: 2,
            iterations: 5,
            ..Default::default()
        };
        let (u1, i1) = train(&m, &mt, &cfg).unwrap();
        let (u2, i2) = train(&m, &mt, &cfg).unwrap();
        assert_eq!(u1, u2);
        assert_eq!(i1, i2);
        assert!(u1.iter().all(|v| v.is_finite()));
        assert!(i1.iter().all(|v| v.is_finite()));
    }
}
