//! Exact nearest-neighbor vector index over graph node names.
//!
//! [`FlatIndex`] is a brute-force L2 index: search scans every row, so
//! results are exact. Row `i` of the index always corresponds to entry `i`
//! of the identifier list kept next to it in an [`IndexSnapshot`].

pub mod builder;
pub mod snapshot;

use anndists::dist::{DistL2, Distance};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

pub use builder::IndexBuilder;
pub use snapshot::IndexSnapshot;

/// Result type for index operations.
pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// Below this row count a sequential scan beats fanning out to rayon.
const PARALLEL_SCAN_ROWS: usize = 4096;

/// A search hit: index row and its Euclidean distance to the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Hit {
    pub position: usize,
    pub distance: f32,
}

/// Row-major matrix of equal-length vectors with exact L2 search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// An empty index for vectors of `dim` components.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Build from rows. All rows must share one non-zero dimension.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> IndexResult<Self> {
        let dim = rows.first().map(Vec::len).ok_or(IndexError::Empty)?;
        let mut index = Self::new(dim);
        index.data.reserve(dim * rows.len());
        for row in &rows {
            index.push(row)?;
        }
        Ok(index)
    }

    /// Append one row.
    pub fn push(&mut self, row: &[f32]) -> IndexResult<()> {
        if row.len() != self.dim || self.dim == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        if self.dim == 0 { 0 } else { self.data.len() / self.dim }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dim)?;
        self.data.get(start..start + self.dim)
    }

    /// The `k` nearest rows to `query`, nearest first.
    ///
    /// Ties are broken by ascending position, so results are deterministic.
    /// `k` larger than the index returns every row.
    pub fn search(&self, query: &[f32], k: usize) -> IndexResult<Vec<Hit>> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let dist = DistL2 {};
        let score = |(position, row): (usize, &[f32])| Hit {
            position,
            distance: dist.eval(query, row),
        };
        let mut hits: Vec<Hit> = if self.len() >= PARALLEL_SCAN_ROWS {
            self.data.par_chunks(self.dim).enumerate().map(score).collect()
        } else {
            self.data.chunks(self.dim).enumerate().map(score).collect()
        };

        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);
        Ok(hits)
    }

    pub(crate) fn raw(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn from_raw(dim: usize, data: Vec<f32>) -> IndexResult<Self> {
        if dim == 0 || data.len() % dim != 0 {
            return Err(IndexError::Serialization {
                message: format!("{} floats do not form rows of dimension {dim}", data.len()),
            });
        }
        Ok(Self { dim, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> FlatIndex {
        FlatIndex::from_rows(vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 3.0],
        ])
        .unwrap()
    }

    #[test]
    fn exact_match_ranks_first() {
        let index = abc();
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(hits[0].position, 1);
        assert!(hits[0].distance.abs() < 1e-6);
        assert_eq!(hits[1].position, 0);
        assert_eq!(hits[2].position, 2);
    }

    #[test]
    fn distances_are_non_decreasing() {
        let index = abc();
        let hits = index.search(&[0.2, 0.9], 3).unwrap();
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn ties_break_by_position() {
        let index = FlatIndex::from_rows(vec![vec![1.0], vec![-1.0], vec![1.0]]).unwrap();
        let hits = index.search(&[0.0], 3).unwrap();
        let order: Vec<_> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn k_is_capped_at_len() {
        assert_eq!(abc().search(&[0.0, 0.0], 30).unwrap().len(), 3);
        assert!(abc().search(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn wrong_dimensions_are_rejected() {
        assert!(matches!(
            abc().search(&[0.0], 1),
            Err(IndexError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(FlatIndex::from_rows(vec![vec![0.0, 1.0], vec![1.0]]).is_err());
        assert!(matches!(FlatIndex::from_rows(vec![]), Err(IndexError::Empty)));
    }

    #[test]
    fn parallel_scan_matches_sequential_order() {
        let rows: Vec<Vec<f32>> = (0..PARALLEL_SCAN_ROWS + 10)
            .map(|i| vec![i as f32, 0.0])
            .collect();
        let index = FlatIndex::from_rows(rows).unwrap();
        let hits = index.search(&[100.2, 0.0], 3).unwrap();
        let order: Vec<_> = hits.iter().map(|h| h.position).collect();
        assert_eq!(order, vec![100, 101, 99]);
    }

    #[test]
    fn row_access() {
        let index = abc();
        assert_eq!(index.row(2), Some(&[0.0, 3.0][..]));
        assert_eq!(index.row(3), None);
    }
}
