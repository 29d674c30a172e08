use crate::error::{Error, Result};
use crate::sparse::CsrMatrix;

/// BM25-style confidence weighting over a sparse count matrix.
///
/// Each row is treated as a document: with `total_r` the sum of row `r` and
/// `mean` the average row total, every stored count `v` becomes
///
/// ```text
/// (k1 + 1) * v / (k1 * (1 - b + b * total_r / mean) + v)
/// ```
///
/// which grows with the raw count but is damped for rows with large totals.
/// Applied to the item-major matrix (items as rows) this down-weights
/// globally popular items; transpose the result for training.
///
/// An all-zero matrix is returned unchanged rather than dividing by a zero
/// mean.
pub fn bm25_weight(m: &CsrMatrix, k1: f32, b: f32) -> Result<CsrMatrix> {
    if !(k1 > 0.0) {
        return Err(Error::Config(format!("bm25 k1 must be positive, got {k1}")));
    }
    if !(0.0..=1.0).contains(&b) {
        return Err(Error::Config(format!("bm25 b must be in [0, 1], got {b}")));
    }

    let n_rows = m.n_rows();
    let mut totals = vec![0.0f64; n_rows];
    for row in 0..n_rows {
        totals[row] = m.row(row).1.iter().map(|&v| v as f64).sum();
    }
    let mean = totals.iter().sum::<f64>() / n_rows.max(1) as f64;
    if mean == 0.0 {
        return Ok(m.clone());
    }

    let mut out = m.clone();
    let mut offset = 0usize;
    for row in 0..n_rows {
        let len = m.row(row).1.len();
        let length_norm = (1.0 - b) + b * (totals[row] / mean) as f32;
        for v in &mut out.data_mut()[offset..offset + len] {
            *v = (k1 + 1.0) * *v / (k1 * length_norm + *v);
        }
        offset += len;
    }
    Ok(out)
}
