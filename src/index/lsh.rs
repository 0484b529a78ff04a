//! Random-hyperplane LSH index for cosine search.
//!
//! Each of `num_tables` tables hashes a vector to a `num_planes`-bit
//! signature: bit i is the sign of the projection onto the i-th random
//! hyperplane. Colliding signatures indicate approximate angular
//! proximity. Candidates are re-ranked by exact cosine similarity, so only
//! the candidate set is approximate, never the scores.

use ahash::{AHashMap, AHashSet};
use rand::SeedableRng;
use rand::rngs::StdRng;
use uuid::Uuid;

use crate::config::LshParams;
use crate::error::Result;
use crate::index::{Candidate, IndexKind, Neighbor, VectorIndex, check_query, top_k};
use crate::metric::{DistanceMetric, cosine_similarity, dot};

/// Approximate cosine index over random hyperplane signatures.
#[derive(Debug)]
pub struct LshIndex {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    ids: Vec<Uuid>,
    /// Hyperplane normals, `num_tables` groups of `num_planes` rows.
    planes: Vec<Vec<Vec<f32>>>,
    /// Per-table buckets: signature -> positions into `vectors`.
    tables: Vec<AHashMap<u64, Vec<u32>>>,
    num_planes: usize,
    expansion_factor: usize,
}

impl LshIndex {
    /// Build the hash tables over parallel `vectors` / `ids`.
    ///
    /// `seed` must already incorporate the owning library and the table
    /// geometry (see the registry's seed derivation) so that rebuilding the
    /// same library yields the same planes and buckets.
    pub(crate) fn new(vectors: Vec<Vec<f32>>, ids: Vec<Uuid>, params: &LshParams, seed: u64) -> Self {
        let dimension = vectors.first().map_or(0, Vec::len);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut planes = Vec::with_capacity(params.num_tables);
        if dimension > 0 {
            for _ in 0..params.num_tables {
                let mut table_planes = Vec::with_capacity(params.num_planes);
                for _ in 0..params.num_planes {
                    table_planes.push(sample_unit_normal(&mut rng, dimension));
                }
                planes.push(table_planes);
            }
        }

        let mut tables: Vec<AHashMap<u64, Vec<u32>>> = vec![AHashMap::new(); planes.len()];
        for (position, vector) in vectors.iter().enumerate() {
            for (table, table_planes) in planes.iter().enumerate() {
                let signature = signature_of(vector, table_planes);
                tables[table]
                    .entry(signature)
                    .or_default()
                    .push(position as u32);
            }
        }

        Self {
            dimension,
            vectors,
            ids,
            planes,
            tables,
            num_planes: params.num_planes,
            expansion_factor: params.expansion_factor,
        }
    }

    fn collect_bucket(&self, table: usize, signature: u64, candidates: &mut AHashSet<u32>) {
        if let Some(members) = self.tables[table].get(&signature) {
            candidates.extend(members.iter().copied());
        }
    }

    /// Add every bucket whose signature differs from `signature` in exactly
    /// `distance` bit positions.
    fn probe_at_distance(
        &self,
        table: usize,
        signature: u64,
        distance: usize,
        candidates: &mut AHashSet<u32>,
    ) {
        self.probe_combinations(table, signature, distance, 0, 0, candidates);
    }

    fn probe_combinations(
        &self,
        table: usize,
        signature: u64,
        remaining: usize,
        start_bit: usize,
        mask: u64,
        candidates: &mut AHashSet<u32>,
    ) {
        if remaining == 0 {
            self.collect_bucket(table, signature ^ mask, candidates);
            return;
        }
        for bit in start_bit..=(self.num_planes - remaining) {
            self.probe_combinations(
                table,
                signature,
                remaining - 1,
                bit + 1,
                mask | (1u64 << bit),
                candidates,
            );
        }
    }
}

/// Sample a unit-length standard-normal direction.
fn sample_unit_normal(rng: &mut StdRng, dimension: usize) -> Vec<f32> {
    let mut plane: Vec<f32> = (0..dimension).map(|_| gaussian(rng)).collect();
    let norm: f32 = plane.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut plane {
            *value /= norm;
        }
    }
    plane
}

/// One standard-normal sample via the Box-Muller transform.
fn gaussian(rng: &mut StdRng) -> f32 {
    use rand::Rng;
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    ((-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()) as f32
}

/// The sign-bit signature of `vector` under one table's hyperplanes.
fn signature_of(vector: &[f32], planes: &[Vec<f32>]) -> u64 {
    let mut signature = 0u64;
    for (bit, plane) in planes.iter().enumerate() {
        if dot(vector, plane) >= 0.0 {
            signature |= 1u64 << bit;
        }
    }
    signature
}

impl VectorIndex for LshIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Lsh
    }

    fn metric(&self) -> DistanceMetric {
        DistanceMetric::Cosine
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn size(&self) -> usize {
        self.vectors.len()
    }

    fn query(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if !check_query(self.dimension, self.size(), self.metric(), query, k)? {
            return Ok(Vec::new());
        }

        let signatures: Vec<u64> = self
            .planes
            .iter()
            .map(|table_planes| signature_of(query, table_planes))
            .collect();

        // Exact buckets first, then multi-probe outward one Hamming
        // distance level at a time (all tables per level) until the
        // candidate set is large enough or every bucket has been seen.
        let target = k.saturating_mul(self.expansion_factor).max(k).min(self.size());
        let mut candidates: AHashSet<u32> = AHashSet::new();
        for (table, signature) in signatures.iter().enumerate() {
            self.collect_bucket(table, *signature, &mut candidates);
        }
        for distance in 1..=self.num_planes {
            if candidates.len() >= target {
                break;
            }
            for (table, signature) in signatures.iter().enumerate() {
                self.probe_at_distance(table, *signature, distance, &mut candidates);
            }
        }

        let mut scored = Vec::with_capacity(candidates.len());
        for position in candidates {
            let position = position as usize;
            scored.push(Candidate {
                score: cosine_similarity(query, &self.vectors[position])?,
                id: self.ids[position],
            });
        }
        Ok(top_k(scored, k))
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use crate::index::{IndexBuildOptions, build_index};

    use super::*;

    fn random_unit_vectors(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let mut v: Vec<f32> = (0..dimension).map(|_| rng.random_range(-1.0..1.0)).collect();
                let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                for value in &mut v {
                    *value /= norm;
                }
                v
            })
            .collect()
    }

    fn build_lsh(vectors: Vec<Vec<f32>>, ids: Vec<Uuid>) -> Box<dyn VectorIndex> {
        build_index(
            IndexKind::Lsh,
            DistanceMetric::Cosine,
            vectors,
            ids,
            &IndexBuildOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_scores_are_exact_cosine() {
        let vectors = random_unit_vectors(64, 8, 7);
        let ids: Vec<Uuid> = (1..=64).map(Uuid::from_u128).collect();
        let by_id: std::collections::HashMap<Uuid, Vec<f32>> =
            ids.iter().copied().zip(vectors.clone()).collect();
        let index = build_lsh(vectors, ids);

        let query = random_unit_vectors(1, 8, 99).pop().unwrap();
        for neighbor in index.query(&query, 5).unwrap() {
            let expected = cosine_similarity(&query, &by_id[&neighbor.chunk_id]).unwrap();
            assert_eq!(neighbor.score, expected);
        }
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let vectors = random_unit_vectors(128, 16, 11);
        let ids: Vec<Uuid> = (1..=128).map(Uuid::from_u128).collect();
        let first = build_lsh(vectors.clone(), ids.clone());
        let second = build_lsh(vectors, ids);

        let query = random_unit_vectors(1, 16, 5).pop().unwrap();
        let a = first.query(&query, 10).unwrap();
        let b = second.query(&query, 10).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.chunk_id, y.chunk_id);
            assert_eq!(x.score, y.score);
        }
    }

    #[test]
    fn test_probing_reaches_all_vectors_for_small_sets() {
        // With far fewer vectors than buckets, exact matches are unlikely;
        // expansion must still surface every vector when k covers the set.
        let vectors = random_unit_vectors(12, 16, 3);
        let ids: Vec<Uuid> = (1..=12).map(Uuid::from_u128).collect();
        let index = build_lsh(vectors, ids);

        let query = random_unit_vectors(1, 16, 4).pop().unwrap();
        let results = index.query(&query, 12).unwrap();
        assert_eq!(results.len(), 12);
    }

    #[test]
    fn test_different_seeds_give_different_tables() {
        let vectors = random_unit_vectors(32, 8, 21);
        let ids: Vec<Uuid> = (1..=32).map(Uuid::from_u128).collect();
        let params = LshParams::default();
        let a = LshIndex::new(vectors.clone(), ids.clone(), &params, 1);
        let b = LshIndex::new(vectors, ids, &params, 2);
        assert_ne!(a.planes, b.planes);
    }
}
