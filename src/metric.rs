//! Distance metrics and the uniform ranking score.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};

/// Vector count above which batch scoring switches to rayon.
const PARALLEL_SCORING_THRESHOLD: usize = 100;

/// Distance metrics for vector similarity calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine similarity (higher is more similar).
    #[default]
    Cosine,
    /// Euclidean (L2) distance (lower is more similar).
    Euclidean,
}

impl DistanceMetric {
    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
        }
    }

    /// Parse a distance metric from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            _ => Err(QuiverError::invalid_argument(format!(
                "unknown distance metric: {s}"
            ))),
        }
    }

    /// Calculate the ranking score between two vectors under this metric.
    ///
    /// The score is uniform across metrics so the search layer always sorts
    /// descending: cosine returns the similarity in [-1, 1], euclidean
    /// returns the negated distance.
    pub fn score(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(QuiverError::dimension_mismatch(a.len(), b.len()));
        }

        match self {
            DistanceMetric::Cosine => cosine_similarity(a, b),
            DistanceMetric::Euclidean => Ok(-euclidean_distance(a, b)),
        }
    }

    /// Calculate ranking scores between a query and multiple vectors.
    ///
    /// Switches to parallel computation past a size threshold.
    pub fn batch_scores(&self, query: &[f32], vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        if vectors.len() < PARALLEL_SCORING_THRESHOLD {
            return vectors.iter().map(|v| self.score(query, v)).collect();
        }

        vectors.par_iter().map(|v| self.score(query, v)).collect()
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Dot product of two equal-length vectors.
pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm of a vector.
pub(crate) fn norm(a: &[f32]) -> f32 {
    a.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Squared euclidean distance. KD-tree pruning and the distance kernel both
/// go through this so linear and KD-tree scores are bit-identical.
pub(crate) fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Euclidean distance between two vectors.
pub(crate) fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    euclidean_sq(a, b).sqrt()
}

/// Cosine similarity between two vectors.
///
/// Zero-norm operands are rejected rather than clamped; insert-time and
/// query-time validation keeps them out of the index in the first place.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    let na = norm(a);
    let nb = norm(b);

    if na == 0.0 || nb == 0.0 {
        return Err(QuiverError::invalid_vector(
            "zero-norm vector under cosine metric",
        ));
    }

    Ok(dot(a, b) / (na * nb))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_score() {
        let metric = DistanceMetric::Cosine;
        let score = metric.score(&[1.0, 0.0], &[1.0, 0.0]).unwrap();
        assert!((score - 1.0).abs() < 1e-6);

        let score = metric.score(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert!(score.abs() < 1e-6);

        let score = metric.score(&[1.0, 0.0], &[-1.0, 0.0]).unwrap();
        assert!((score + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_score_is_negated_distance() {
        let metric = DistanceMetric::Euclidean;
        let score = metric.score(&[0.0, 0.0], &[3.0, 4.0]).unwrap();
        assert!((score + 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_norm_cosine_rejected() {
        let metric = DistanceMetric::Cosine;
        let err = metric.score(&[0.0, 0.0], &[1.0, 0.0]).unwrap_err();
        assert_eq!(err.code(), "invalid_vector");

        // Euclidean accepts zero vectors.
        let metric = DistanceMetric::Euclidean;
        assert!(metric.score(&[0.0, 0.0], &[1.0, 0.0]).is_ok());
    }

    #[test]
    fn test_dimension_mismatch() {
        let metric = DistanceMetric::Cosine;
        let err = metric.score(&[1.0, 0.0], &[1.0, 0.0, 0.0]).unwrap_err();
        assert_eq!(err.code(), "dimension_mismatch");
    }

    #[test]
    fn test_parse_str() {
        assert_eq!(
            DistanceMetric::parse_str("cosine").unwrap(),
            DistanceMetric::Cosine
        );
        assert_eq!(
            DistanceMetric::parse_str("L2").unwrap(),
            DistanceMetric::Euclidean
        );
        assert!(DistanceMetric::parse_str("manhattan").is_err());
    }

    #[test]
    fn test_batch_scores_match_single() {
        let metric = DistanceMetric::Cosine;
        let query = vec![0.6, 0.8];
        let vectors: Vec<Vec<f32>> = (0..250)
            .map(|i| vec![(i as f32 + 1.0).cos(), (i as f32 + 1.0).sin()])
            .collect();

        let batch = metric.batch_scores(&query, &vectors).unwrap();
        for (v, s) in vectors.iter().zip(batch.iter()) {
            assert_eq!(metric.score(&query, v).unwrap(), *s);
        }
    }
}
