//! Pluggable top-k nearest-neighbor indices.
//!
//! All indices are built from a frozen set of `(chunk id, vector)` pairs
//! and answer [`VectorIndex::query`] with ranking scores per
//! [`crate::metric::DistanceMetric::score`]. Results are sorted by score
//! descending with ties broken by chunk id ascending, so a query is
//! reproducible across runs and across index rebuilds.

pub mod kdtree;
pub mod linear;
pub mod lsh;

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LshParams;
use crate::error::{QuiverError, Result};
use crate::metric::{DistanceMetric, norm};

pub use kdtree::KdTreeIndex;
pub use linear::LinearIndex;
pub use lsh::LshIndex;

/// Enumeration of the available index algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Exact linear scan.
    #[default]
    Linear,
    /// Median-split KD-tree (euclidean only).
    KdTree,
    /// Random-hyperplane LSH (cosine only).
    Lsh,
}

impl IndexKind {
    /// Get the name of this index kind.
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Linear => "linear",
            IndexKind::KdTree => "kdtree",
            IndexKind::Lsh => "lsh",
        }
    }

    /// Parse an index kind from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "linear" => Ok(IndexKind::Linear),
            "kdtree" => Ok(IndexKind::KdTree),
            "lsh" => Ok(IndexKind::Lsh),
            _ => Err(QuiverError::invalid_argument(format!(
                "unknown index algorithm: {s}"
            ))),
        }
    }

    /// The metrics this algorithm supports.
    pub fn supported_metrics(&self) -> &'static [DistanceMetric] {
        match self {
            IndexKind::Linear => &[DistanceMetric::Cosine, DistanceMetric::Euclidean],
            IndexKind::KdTree => &[DistanceMetric::Euclidean],
            IndexKind::Lsh => &[DistanceMetric::Cosine],
        }
    }

    /// Whether this algorithm supports `metric`.
    pub fn supports(&self, metric: DistanceMetric) -> bool {
        self.supported_metrics().contains(&metric)
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single query result: a chunk id and its ranking score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// The chunk this vector belongs to.
    pub chunk_id: Uuid,
    /// Ranking score; higher is closer.
    pub score: f32,
}

/// Contract shared by all index implementations.
pub trait VectorIndex: Send + Sync + fmt::Debug {
    /// The algorithm of this index.
    fn kind(&self) -> IndexKind;

    /// The metric this index scores with.
    fn metric(&self) -> DistanceMetric;

    /// Dimensionality of the indexed vectors (0 when empty).
    fn dimension(&self) -> usize;

    /// Number of indexed vectors.
    fn size(&self) -> usize;

    /// Return the top `min(k, size)` neighbors of `query`, sorted by score
    /// descending, ties broken by chunk id ascending.
    fn query(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;
}

/// Build options threaded from configuration into index construction.
#[derive(Debug, Clone)]
pub struct IndexBuildOptions {
    /// LSH tuning parameters.
    pub lsh: LshParams,
    /// Fully derived PRNG seed for this build (library id and parameters
    /// already mixed in), so rebuilds are reproducible.
    pub build_seed: u64,
}

impl Default for IndexBuildOptions {
    fn default() -> Self {
        let lsh = LshParams::default();
        Self {
            build_seed: lsh.seed,
            lsh,
        }
    }
}

/// Build an index of the given kind over parallel `vectors` / `ids`.
///
/// Input pairs are sorted by chunk id before construction so the internal
/// layout is independent of insertion order. Fails with
/// [`QuiverError::UnsupportedMetric`] on a pairing outside the support
/// table, [`QuiverError::DimensionMismatch`] on ragged input, and
/// [`QuiverError::InvalidVector`] on non-finite values or zero-norm vectors
/// under cosine.
pub fn build_index(
    kind: IndexKind,
    metric: DistanceMetric,
    vectors: Vec<Vec<f32>>,
    ids: Vec<Uuid>,
    options: &IndexBuildOptions,
) -> Result<Box<dyn VectorIndex>> {
    if !kind.supports(metric) {
        let supported: Vec<&str> = kind.supported_metrics().iter().map(|m| m.name()).collect();
        return Err(QuiverError::unsupported_metric(
            kind.name(),
            metric.name(),
            &supported,
        ));
    }
    if vectors.len() != ids.len() {
        return Err(QuiverError::internal(format!(
            "index build input mismatch: {} vectors, {} ids",
            vectors.len(),
            ids.len()
        )));
    }

    let mut pairs: Vec<(Uuid, Vec<f32>)> = ids.into_iter().zip(vectors).collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    if let Some((_, first)) = pairs.first() {
        let dimension = first.len();
        if dimension == 0 {
            return Err(QuiverError::invalid_vector("empty embedding"));
        }
        for (id, vector) in &pairs {
            if vector.len() != dimension {
                return Err(QuiverError::dimension_mismatch(dimension, vector.len()));
            }
            if !vector.iter().all(|x| x.is_finite()) {
                return Err(QuiverError::invalid_vector(format!(
                    "non-finite component in vector for chunk {id}"
                )));
            }
            if metric == DistanceMetric::Cosine && norm(vector) == 0.0 {
                return Err(QuiverError::invalid_vector(format!(
                    "zero-norm vector for chunk {id} under cosine metric"
                )));
            }
        }
    }

    let (ids, vectors): (Vec<Uuid>, Vec<Vec<f32>>) = pairs.into_iter().unzip();

    let index: Box<dyn VectorIndex> = match kind {
        IndexKind::Linear => Box::new(LinearIndex::new(metric, vectors, ids)),
        IndexKind::KdTree => Box::new(KdTreeIndex::new(vectors, ids)),
        IndexKind::Lsh => Box::new(LshIndex::new(vectors, ids, &options.lsh, options.build_seed)),
    };
    Ok(index)
}

/// Shared query precondition checks.
///
/// Returns `Ok(false)` when the index is empty and the query should yield
/// no results without further validation.
pub(crate) fn check_query(
    dimension: usize,
    size: usize,
    metric: DistanceMetric,
    query: &[f32],
    k: usize,
) -> Result<bool> {
    if k == 0 {
        return Err(QuiverError::invalid_argument("k must be positive"));
    }
    if size == 0 {
        return Ok(false);
    }
    if query.len() != dimension {
        return Err(QuiverError::dimension_mismatch(dimension, query.len()));
    }
    if !query.iter().all(|x| x.is_finite()) {
        return Err(QuiverError::invalid_vector(
            "non-finite component in query vector",
        ));
    }
    if metric == DistanceMetric::Cosine && norm(query) == 0.0 {
        return Err(QuiverError::invalid_vector(
            "zero-norm query vector under cosine metric",
        ));
    }
    Ok(true)
}

/// A scored candidate ordered so that "greater" means "better": higher
/// score first, then smaller chunk id.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Candidate {
    pub(crate) score: f32,
    pub(crate) id: Uuid,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Sort candidates best-first and truncate to `k` neighbors.
pub(crate) fn top_k(mut candidates: Vec<Candidate>, k: usize) -> Vec<Neighbor> {
    candidates.sort_unstable_by(|a, b| b.cmp(a));
    candidates.truncate(k);
    candidates
        .into_iter()
        .map(|c| Neighbor {
            chunk_id: c.id,
            score: c.score,
        })
        .collect()
}
