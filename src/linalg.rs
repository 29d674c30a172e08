use faer::linalg::solvers::Solve;
use faer::{linalg::matmul::matmul, Accum, MatRef, Par, Side};

// 8-wide unrolled dot product; autovectorizes on AVX2 / NEON.
#[inline(always)]
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0;
    let mut i = 0;
    while i + 8 <= a.len() {
        sum += a[i] * b[i]
            + a[i + 1] * b[i + 1]
            + a[i + 2] * b[i + 2]
            + a[i + 3] * b[i + 3]
            + a[i + 4] * b[i + 4]
            + a[i + 5] * b[i + 5]
            + a[i + 6] * b[i + 6]
            + a[i + 7] * b[i + 7];
        i += 8;
    }
    while i < a.len() {
        sum += a[i] * b[i];
        i += 1;
    }
    sum
}

// y += alpha * x, 8-wide unrolled.
#[inline(always)]
pub(crate) fn axpy(alpha: f32, x: &[f32], y: &mut [f32]) {
    let mut i = 0;
    while i + 8 <= x.len() {
        y[i] += alpha * x[i];
        y[i + 1] += alpha * x[i + 1];
        y[i + 2] += alpha * x[i + 2];
        y[i + 3] += alpha * x[i + 3];
        y[i + 4] += alpha * x[i + 4];
        y[i + 5] += alpha * x[i + 5];
        y[i + 6] += alpha * x[i + 6];
        y[i + 7] += alpha * x[i + 7];
        i += 8;
    }
    while i < x.len() {
        y[i] += alpha * x[i];
        i += 1;
    }
}

/// Dense Gram matrix `FᵗF` of an n x k row-major factor matrix, returned
/// row-major k x k. Shared across every per-row solve of a half-step.
pub(crate) fn gramian(factors: &[f32], n: usize, k: usize) -> Vec<f32> {
    let f = MatRef::from_row_major_slice(factors, n, k);
    let ft = f.transpose();

    let mut g = faer::Mat::<f32>::zeros(k, k);
    matmul(g.as_mut(), Accum::Replace, ft, f, 1.0f32, Par::rayon(0));

    let mut out = vec![0.0f32; k * k];
    for a in 0..k {
        for b in 0..k {
            out[a * k + b] = g[(a, b)];
        }
    }
    out
}

/// Solve `A x = b` for a symmetric positive-definite `A` (row-major k x k)
/// via LLT, writing the solution over `b`. Returns false when the
/// factorization fails, i.e. `A` is not positive definite.
#[must_use]
pub(crate) fn llt_solve_inplace(a: &mut [f32], b: &mut [f32], k: usize) -> bool {
    let a_mat = faer::MatMut::from_row_major_slice_mut(a, k, k);
    let mut b_mat = faer::MatMut::from_column_major_slice_mut(b, k, 1);

    match a_mat.as_ref().llt(Side::Lower) {
        Ok(llt) => {
            let x = llt.solve(b_mat.as_ref());
            b_mat.copy_from(x.as_ref());
            true
        }
        Err(_) => false,
    }
}
