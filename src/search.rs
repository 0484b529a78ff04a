//! Query execution: compiled index + chunk resolution + metadata filter.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{QuiverError, Result};
use crate::model::{Chunk, Metadata};
use crate::registry::IndexRegistry;
use crate::repository::Repository;

/// How many extra candidates to pull from the index when a metadata filter
/// may reject some of them (capped at the index size).
pub const DEFAULT_OVERFETCH: usize = 4;

/// Equality predicate over chunk metadata.
///
/// A chunk matches when every key is present in its metadata and the value
/// equals the expected scalar. When the expected value is an array, the
/// chunk value must be contained in it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// Key to expected scalar-or-set.
    #[serde(flatten)]
    pub conditions: HashMap<String, Value>,
}

impl MetadataFilter {
    /// A filter with a single equality condition.
    pub fn equals(key: impl Into<String>, value: Value) -> Self {
        let mut conditions = HashMap::new();
        conditions.insert(key.into(), value);
        Self { conditions }
    }

    /// Add a condition, returning the filter for chaining.
    pub fn and(mut self, key: impl Into<String>, value: Value) -> Self {
        self.conditions.insert(key.into(), value);
        self
    }

    /// Whether this filter has no conditions.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Whether `metadata` satisfies every condition.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|(key, expected)| {
            metadata.get(key).is_some_and(|actual| match expected {
                Value::Array(set) => set.contains(actual),
                scalar => actual == scalar,
            })
        })
    }

    /// Reject structurally malformed filters.
    pub fn validate(&self) -> Result<()> {
        for (key, expected) in &self.conditions {
            if key.trim().is_empty() {
                return Err(QuiverError::invalid_argument(
                    "metadata filter key must not be empty",
                ));
            }
            if let Value::Array(set) = expected
                && set.is_empty()
            {
                return Err(QuiverError::invalid_argument(format!(
                    "metadata filter for '{key}' has an empty candidate set"
                )));
            }
        }
        Ok(())
    }
}

/// One search result: the chunk, its id, and its ranking score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// Id of the matching chunk.
    pub chunk_id: Uuid,
    /// Ranking score from the index (higher is closer).
    pub score: f32,
    /// Snapshot of the chunk at resolution time.
    pub chunk: Chunk,
}

/// Executes top-k searches against a library's compiled index.
#[derive(Debug)]
pub struct SearchService {
    repository: Arc<Repository>,
    registry: Arc<IndexRegistry>,
}

impl SearchService {
    /// Create a search service over the shared repository and registry.
    pub fn new(repository: Arc<Repository>, registry: Arc<IndexRegistry>) -> Self {
        Self {
            repository,
            registry,
        }
    }

    /// Return up to `k` chunks nearest to `query`, best first.
    ///
    /// With a metadata filter the index is over-queried by
    /// [`DEFAULT_OVERFETCH`] to compensate for rejected candidates; if
    /// fewer than `k` survive, the result is simply shorter; there is no
    /// escalation to a full scan.
    pub fn search(
        &self,
        library_id: Uuid,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Err(QuiverError::invalid_argument("k must be positive"));
        }
        if let Some(filter) = filter {
            filter.validate()?;
        }
        let filter = filter.filter(|f| !f.is_empty());

        let index = self.registry.get_or_build(library_id)?;
        let query_k = match filter {
            Some(_) => k.saturating_mul(DEFAULT_OVERFETCH).min(index.size()).max(k),
            None => k,
        };
        let neighbors = index.query(query, query_k)?;

        // Resolution happens under the shard read lock; ids that vanished
        // since the index was compiled are skipped defensively.
        let resolved = self.repository.resolve_chunks(
            library_id,
            neighbors.into_iter().map(|n| (n.chunk_id, n.score)),
        )?;

        let mut hits = Vec::with_capacity(k.min(resolved.len()));
        for (chunk, score) in resolved {
            if let Some(filter) = filter
                && !filter.matches(&chunk.metadata)
            {
                continue;
            }
            hits.push(SearchHit {
                chunk_id: chunk.id,
                score,
                chunk,
            });
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }
}
