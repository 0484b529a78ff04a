//! Exact linear-scan index.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use uuid::Uuid;

use crate::error::Result;
use crate::index::{Candidate, IndexKind, Neighbor, VectorIndex, check_query};
use crate::metric::DistanceMetric;

/// Exact brute-force index: stores the full vector matrix and scores every
/// vector on each query. Deterministic under any metric.
#[derive(Debug)]
pub struct LinearIndex {
    metric: DistanceMetric,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    ids: Vec<Uuid>,
}

impl LinearIndex {
    /// Build a linear index over parallel `vectors` / `ids`.
    ///
    /// Input validation (uniform dimension, finite values, metric support)
    /// happens in [`crate::index::build_index`].
    pub(crate) fn new(metric: DistanceMetric, vectors: Vec<Vec<f32>>, ids: Vec<Uuid>) -> Self {
        let dimension = vectors.first().map_or(0, Vec::len);
        Self {
            metric,
            dimension,
            vectors,
            ids,
        }
    }
}

impl VectorIndex for LinearIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Linear
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn size(&self) -> usize {
        self.vectors.len()
    }

    fn query(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if !check_query(self.dimension, self.size(), self.metric, query, k)? {
            return Ok(Vec::new());
        }

        let scores = self.metric.batch_scores(query, &self.vectors)?;

        // Bounded min-heap of the best k seen so far; the root is the worst
        // of the kept candidates, so each scan step is O(log k).
        let mut heap: BinaryHeap<Reverse<Candidate>> = BinaryHeap::with_capacity(k + 1);
        for (i, score) in scores.into_iter().enumerate() {
            let candidate = Candidate {
                score,
                id: self.ids[i],
            };
            if heap.len() < k {
                heap.push(Reverse(candidate));
            } else if let Some(Reverse(worst)) = heap.peek()
                && candidate > *worst
            {
                heap.pop();
                heap.push(Reverse(candidate));
            }
        }

        let mut kept: Vec<Candidate> = heap.into_iter().map(|Reverse(c)| c).collect();
        kept.sort_unstable_by(|a, b| b.cmp(a));
        Ok(kept
            .into_iter()
            .map(|c| Neighbor {
                chunk_id: c.id,
                score: c.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::index::{IndexBuildOptions, build_index};

    use super::*;

    fn sample_index(metric: DistanceMetric) -> Box<dyn VectorIndex> {
        let ids: Vec<Uuid> = (1..=4).map(Uuid::from_u128).collect();
        let vectors = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 1.0],
            vec![0.7, 0.7, 0.0],
        ];
        build_index(
            IndexKind::Linear,
            metric,
            vectors,
            ids,
            &IndexBuildOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_top_k_ordering_cosine() {
        let index = sample_index(DistanceMetric::Cosine);
        let results = index.query(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, Uuid::from_u128(1));
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[1].chunk_id, Uuid::from_u128(4));
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_ties_broken_by_id_ascending() {
        let index = sample_index(DistanceMetric::Cosine);
        // Orthogonal to chunks 2 and 3, both score 0.0.
        let results = index.query(&[1.0, 0.0, 0.0], 4).unwrap();
        let tail: Vec<Uuid> = results[2..].iter().map(|n| n.chunk_id).collect();
        assert_eq!(tail, vec![Uuid::from_u128(2), Uuid::from_u128(3)]);
    }

    #[test]
    fn test_k_larger_than_size() {
        let index = sample_index(DistanceMetric::Euclidean);
        let results = index.query(&[0.0, 0.0, 0.0], 10).unwrap();
        assert_eq!(results.len(), 4);
        // Euclidean scores are negated distances, sorted descending.
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_k_zero_rejected() {
        let index = sample_index(DistanceMetric::Cosine);
        let err = index.query(&[1.0, 0.0, 0.0], 0).unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[test]
    fn test_query_dimension_checked() {
        let index = sample_index(DistanceMetric::Cosine);
        let err = index.query(&[1.0, 0.0], 1).unwrap_err();
        assert_eq!(err.code(), "dimension_mismatch");
    }
}
