use crate::error::{Error, Result};

/// Compressed sparse row matrix of interaction weights.
///
/// Rows are users and columns are items in the orientation `fit` expects;
/// `transpose` swaps the roles. Storage is the usual indptr/indices/data
/// triplet with `i64` row pointers and `i32` column ids, weights in `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n_rows: usize,
    n_cols: usize,
    indptr: Vec<i64>,
    indices: Vec<i32>,
    data: Vec<f32>,
}

impl CsrMatrix {
    /// Build a matrix from an unordered sequence of (row, col, weight)
    /// triples. Duplicate (row, col) pairs are summed. Indices outside the
    /// declared shape and negative or non-finite weights are rejected.
    pub fn from_triples(
        n_rows: usize,
        n_cols: usize,
        triples: &[(u32, u32, f32)],
    ) -> Result<Self> {
        if n_rows > i32::MAX as usize || n_cols > i32::MAX as usize {
            return Err(Error::Dimension(format!(
                "shape {n_rows}x{n_cols} exceeds the i32 index space"
            )));
        }
        for &(r, c, w) in triples {
            if r as usize >= n_rows || c as usize >= n_cols {
                return Err(Error::Dimension(format!(
                    "entry ({r}, {c}) outside declared shape {n_rows}x{n_cols}"
                )));
            }
            if !w.is_finite() || w < 0.0 {
                return Err(Error::Dimension(format!(
                    "entry ({r}, {c}) has invalid weight {w}"
                )));
            }
        }

        let mut sorted: Vec<(u32, u32, f32)> = triples.to_vec();
        sorted.sort_unstable_by_key(|&(r, c, _)| (r, c));

        let mut indptr = vec![0i64; n_rows + 1];
        let mut indices = Vec::with_capacity(sorted.len());
        let mut data: Vec<f32> = Vec::with_capacity(sorted.len());

        for &(r, c, w) in &sorted {
            // Entries are sorted by (row, col), so a duplicate coordinate is
            // always adjacent: sum it instead of dropping it.
            if indptr[r as usize + 1] > 0 && *indices.last().unwrap() == c as i32 {
                *data.last_mut().unwrap() += w;
            } else {
                indices.push(c as i32);
                data.push(w);
                indptr[r as usize + 1] += 1;
            }
        }
        for r in 0..n_rows {
            indptr[r + 1] += indptr[r];
        }

        Ok(CsrMatrix {
            n_rows,
            n_cols,
            indptr,
            indices,
            data,
        })
    }

    /// Nonzero (column, weight) pairs of row `i`, columns ascending.
    ///
    /// Panics if `i` is out of range, like slice indexing.
    pub fn row(&self, i: usize) -> (&[i32], &[f32]) {
        let start = self.indptr[i] as usize;
        let end = self.indptr[i + 1] as usize;
        (&self.indices[start..end], &self.data[start..end])
    }

    /// Counting-sort transposition: O(nnz), weights copied bit-exactly.
    pub fn transpose(&self) -> CsrMatrix {
        let nnz = self.indices.len();
        let mut counts = vec![0i64; self.n_cols];
        for &c in &self.indices {
            counts[c as usize] += 1;
        }
        let mut indptr = vec![0i64; self.n_cols + 1];
        for i in 0..self.n_cols {
            indptr[i + 1] = indptr[i] + counts[i];
        }
        let mut indices = vec![0i32; nnz];
        let mut data = vec![0.0f32; nnz];
        let mut pos = indptr[..self.n_cols].to_vec();
        for row in 0..self.n_rows {
            let s = self.indptr[row] as usize;
            let e = self.indptr[row + 1] as usize;
            for idx in s..e {
                let col = self.indices[idx] as usize;
                let p = pos[col] as usize;
                indices[p] = row as i32;
                data[p] = self.data[idx];
                pos[col] += 1;
            }
        }
        CsrMatrix {
            n_rows: self.n_cols,
            n_cols: self.n_rows,
            indptr,
            indices,
            data,
        }
    }

    /// Multiply every stored weight by a scalar. Confidence scaling
    /// conventions (e.g. `alpha * count`) are applied here by the caller,
    /// before `fit`.
    pub fn scale(&mut self, factor: f32) {
        for v in &mut self.data {
            *v *= factor;
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// All stored entries as (row, col, weight) triples, row-major order.
    pub fn to_triples(&self) -> Vec<(u32, u32, f32)> {
        let mut out = Vec::with_capacity(self.nnz());
        for row in 0..self.n_rows {
            let (cols, vals) = self.row(row);
            for (&c, &v) in cols.iter().zip(vals) {
                out.push((row as u32, c as u32, v));
            }
        }
        out
    }

    pub(crate) fn indptr(&self) -> &[i64] {
        &self.indptr
    }

    pub(crate) fn indices(&self) -> &[i32] {
        &self.indices
    }

    pub(crate) fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sorted_rows() {
        let m = CsrMatrix::from_triples(2, 3, &[(1, 2, 3.0), (0, 1, 1.0), (1, 0, 2.0)]).unwrap();
        assert_eq!(m.row(0), (&[1i32][..], &[1.0f32][..]));
        assert_eq!(m.row(1), (&[0i32, 2][..], &[2.0f32, 3.0][..]));
        assert_eq!(m.nnz(), 3);
    }

    #[test]
    fn duplicate_triples_are_summed() {
        let m =
            CsrMatrix::from_triples(2, 2, &[(0, 1, 1.5), (0, 1, 2.5), (1, 0, 1.0)]).unwrap();
        assert_eq!(m.row(0), (&[1i32][..], &[4.0f32][..]));
        assert_eq!(m.nnz(), 2);
    }

    #[test]
    fn rejects_out_of_range_indices() {
        assert!(matches!(
            CsrMatrix::from_triples(2, 2, &[(2, 0, 1.0)]),
            Err(Error::Dimension(_))
        ));
        assert!(matches!(
            CsrMatrix::from_triples(2, 2, &[(0, 5, 1.0)]),
            Err(Error::Dimension(_))
        ));
    }

    #[test]
    fn rejects_invalid_weights() {
        assert!(matches!(
            CsrMatrix::from_triples(1, 1, &[(0, 0, -1.0)]),
            Err(Error::Dimension(_))
        ));
        assert!(matches!(
            CsrMatrix::from_triples(1, 1, &[(0, 0, f32::NAN)]),
            Err(Error::Dimension(_))
        ));
    }

    #[test]
    fn transpose_round_trip_preserves_triples() {
        let triples = vec![
            (0u32, 0u32, 1.0f32),
            (0, 2, 0.125),
            (1, 1, 7.5),
            (2, 0, 3.25),
            (2, 2, 2.0),
        ];
        let m = CsrMatrix::from_triples(3, 3, &triples).unwrap();
        let rt = m.transpose().transpose();
        assert_eq!(rt.to_triples(), m.to_triples());
        assert_eq!(m.transpose().nnz(), m.nnz());
    }

    #[test]
    fn transpose_swaps_roles() {
        let m = CsrMatrix::from_triples(2, 3, &[(0, 2, 4.0), (1, 0, 5.0)]).unwrap();
        let t = m.transpose();
        assert_eq!(t.n_rows(), 3);
        assert_eq!(t.n_cols(), 2);
        assert_eq!(t.row(2), (&[0i32][..], &[4.0f32][..]));
        assert_eq!(t.row(0), (&[1i32][..], &[5.0f32][..]));
    }

    #[test]
    fn scale_multiplies_all_weights() {
        let mut m = CsrMatrix::from_triples(1, 2, &[(0, 0, 1.0), (0, 1, 2.0)]).unwrap();
        m.scale(40.0);
        assert_eq!(m.row(0).1, &[40.0f32, 80.0][..]);
    }
}
