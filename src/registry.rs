//! Per-library compiled index cache.
//!
//! The registry maps a library id to its desired `(algorithm, metric)`
//! configuration and, when built, the compiled index. Builds are
//! single-flight: concurrent callers for the same library coalesce onto one
//! build and share its result via a per-library latch. A generation counter
//! guards against publishing an index built from a vector set that was
//! mutated mid-build.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::config::{LshParams, Settings};
use crate::error::{QuiverError, Result};
use crate::index::{IndexBuildOptions, IndexKind, VectorIndex, build_index};
use crate::metric::DistanceMetric;
use crate::repository::{InvalidationSink, Repository};

/// Introspection view of a library's index slot.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    /// The library this descriptor refers to.
    pub library_id: Uuid,
    /// Configured (or default) algorithm.
    pub algorithm: IndexKind,
    /// Configured (or default) metric.
    pub metric: DistanceMetric,
    /// Whether a compiled index is currently cached.
    pub built: bool,
    /// Vector count of the compiled index, when built.
    pub size: Option<usize>,
    /// Dimension of the compiled index, when built.
    pub dimension: Option<usize>,
}

/// Latch other queriers wait on while one caller builds.
#[derive(Default)]
struct BuildLatch {
    done: Mutex<bool>,
    cond: Condvar,
}

impl BuildLatch {
    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    fn notify(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }
}

struct LibrarySlot {
    algorithm: IndexKind,
    metric: DistanceMetric,
    /// Bumped on every configure/invalidate; a build publishes only if the
    /// generation it started from is still current.
    generation: u64,
    compiled: Option<Arc<dyn VectorIndex>>,
    building: Option<Arc<BuildLatch>>,
}

/// The per-library compiled index cache.
pub struct IndexRegistry {
    repository: Arc<Repository>,
    default_algorithm: IndexKind,
    default_metric: DistanceMetric,
    lsh: LshParams,
    slots: Mutex<HashMap<Uuid, LibrarySlot>>,
}

impl std::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("default_algorithm", &self.default_algorithm)
            .field("default_metric", &self.default_metric)
            .finish_non_exhaustive()
    }
}

impl IndexRegistry {
    /// Create a registry over `repository` with defaults from `settings`.
    pub fn new(repository: Arc<Repository>, settings: &Settings) -> Self {
        Self {
            repository,
            default_algorithm: settings.default_index,
            default_metric: settings.default_metric,
            lsh: settings.lsh,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn default_slot(&self) -> LibrarySlot {
        LibrarySlot {
            algorithm: self.default_algorithm,
            metric: self.default_metric,
            generation: 0,
            compiled: None,
            building: None,
        }
    }

    /// Record the desired algorithm/metric for a library, evicting any
    /// compiled index. Fails with `UnsupportedMetric` on a pairing outside
    /// the support table.
    pub fn configure(
        &self,
        library_id: Uuid,
        algorithm: IndexKind,
        metric: DistanceMetric,
    ) -> Result<()> {
        ensure_supported(algorithm, metric)?;

        let mut slots = self.slots.lock();
        let slot = slots.entry(library_id).or_insert_with(|| self.default_slot());
        slot.algorithm = algorithm;
        slot.metric = metric;
        slot.generation += 1;
        slot.compiled = None;
        info!("index configured for library {library_id}: algorithm={algorithm}, metric={metric}");
        Ok(())
    }

    /// Return the compiled index for a library, building it on demand.
    ///
    /// At most one build per library runs at a time; concurrent callers
    /// wait on the builder's latch and share its result. A build error
    /// leaves the slot unbuilt so the next call retries.
    pub fn get_or_build(&self, library_id: Uuid) -> Result<Arc<dyn VectorIndex>> {
        loop {
            let latch = {
                let mut slots = self.slots.lock();
                let slot = slots.entry(library_id).or_insert_with(|| self.default_slot());
                if let Some(index) = &slot.compiled {
                    return Ok(index.clone());
                }
                match slot.building.clone() {
                    Some(latch) => latch,
                    None => {
                        let latch = Arc::new(BuildLatch::default());
                        slot.building = Some(latch.clone());
                        let algorithm = slot.algorithm;
                        let metric = slot.metric;
                        let generation = slot.generation;
                        drop(slots);

                        let outcome = self.build(library_id, algorithm, metric);

                        let mut slots = self.slots.lock();
                        let slot = slots.get_mut(&library_id);
                        match outcome {
                            Ok(index) => {
                                match slot {
                                    Some(slot) => {
                                        slot.building = None;
                                        latch.notify();
                                        if slot.generation == generation {
                                            slot.compiled = Some(index.clone());
                                            return Ok(index);
                                        }
                                        // Invalidated mid-build; rebuild
                                        // from the current vector set.
                                        debug!(
                                            "discarding stale index build for library {library_id}"
                                        );
                                        drop(slots);
                                        continue;
                                    }
                                    None => {
                                        // Library slot removed mid-build.
                                        latch.notify();
                                        return Ok(index);
                                    }
                                }
                            }
                            Err(e) => {
                                if let Some(slot) = slot {
                                    slot.building = None;
                                }
                                // A missing library has nothing to cache.
                                if matches!(e, QuiverError::NotFound { .. }) {
                                    slots.remove(&library_id);
                                }
                                latch.notify();
                                return Err(e);
                            }
                        }
                    }
                }
            };
            latch.wait();
        }
    }

    /// Drop any compiled index for a library, keeping its configuration.
    /// Idempotent.
    pub fn invalidate(&self, library_id: Uuid) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&library_id) {
            slot.generation += 1;
            if slot.compiled.take().is_some() {
                debug!("index invalidated for library {library_id}");
            }
        }
    }

    /// Remove a library's slot entirely (configuration included).
    pub fn remove(&self, library_id: Uuid) {
        self.slots.lock().remove(&library_id);
    }

    /// Describe a library's index slot; unconfigured libraries report the
    /// defaults with `built == false`.
    pub fn describe(&self, library_id: Uuid) -> IndexDescriptor {
        let slots = self.slots.lock();
        match slots.get(&library_id) {
            Some(slot) => IndexDescriptor {
                library_id,
                algorithm: slot.algorithm,
                metric: slot.metric,
                built: slot.compiled.is_some(),
                size: slot.compiled.as_ref().map(|index| index.size()),
                dimension: slot.compiled.as_ref().map(|index| index.dimension()),
            },
            None => IndexDescriptor {
                library_id,
                algorithm: self.default_algorithm,
                metric: self.default_metric,
                built: false,
                size: None,
                dimension: None,
            },
        }
    }

    /// The configured `(algorithm, metric)` per library, for the snapshot
    /// writer.
    pub fn configurations(&self) -> HashMap<Uuid, (IndexKind, DistanceMetric)> {
        self.slots
            .lock()
            .iter()
            .map(|(id, slot)| (*id, (slot.algorithm, slot.metric)))
            .collect()
    }

    /// Replace all slots with the given configurations (snapshot restore).
    pub fn reset(&self, configs: Vec<(Uuid, IndexKind, DistanceMetric)>) -> Result<()> {
        let mut staged = HashMap::with_capacity(configs.len());
        for (library_id, algorithm, metric) in configs {
            ensure_supported(algorithm, metric)?;
            let mut slot = self.default_slot();
            slot.algorithm = algorithm;
            slot.metric = metric;
            staged.insert(library_id, slot);
        }
        *self.slots.lock() = staged;
        Ok(())
    }

    fn build(
        &self,
        library_id: Uuid,
        algorithm: IndexKind,
        metric: DistanceMetric,
    ) -> Result<Arc<dyn VectorIndex>> {
        let (ids, vectors) = self.repository.chunk_embeddings(library_id)?;
        let options = IndexBuildOptions {
            lsh: self.lsh,
            build_seed: derive_build_seed(self.lsh.seed, library_id, algorithm, &self.lsh),
        };

        let start = Instant::now();
        let index = build_index(algorithm, metric, vectors, ids, &options)?;
        info!(
            "index built for library {library_id}: algorithm={algorithm}, metric={metric}, vectors={}, took {:?}",
            index.size(),
            start.elapsed()
        );
        Ok(Arc::from(index))
    }
}

impl InvalidationSink for IndexRegistry {
    fn invalidate(&self, library_id: Uuid) {
        IndexRegistry::invalidate(self, library_id);
    }
}

fn ensure_supported(algorithm: IndexKind, metric: DistanceMetric) -> Result<()> {
    if algorithm.supports(metric) {
        return Ok(());
    }
    let supported: Vec<&str> = algorithm.supported_metrics().iter().map(|m| m.name()).collect();
    Err(QuiverError::unsupported_metric(
        algorithm.name(),
        metric.name(),
        &supported,
    ))
}

/// Mix the base seed with the library id, algorithm, and table geometry so
/// each library gets an independent, reproducible PRNG stream.
fn derive_build_seed(base: u64, library_id: Uuid, algorithm: IndexKind, lsh: &LshParams) -> u64 {
    let (hi, lo) = library_id.as_u64_pair();
    let mut seed = splitmix64(base ^ hi);
    seed = splitmix64(seed ^ lo);
    seed = splitmix64(seed ^ ((lsh.num_tables as u64) << 32) ^ lsh.num_planes as u64);
    for byte in algorithm.name().bytes() {
        seed = splitmix64(seed ^ byte as u64);
    }
    seed
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;
    use std::thread;

    use crate::model::{ChunkPatch, Metadata};

    use super::*;

    fn wired() -> (Arc<Repository>, Arc<IndexRegistry>) {
        let repository = Arc::new(Repository::new());
        let registry = Arc::new(IndexRegistry::new(repository.clone(), &Settings::default()));
        let weak: Weak<dyn InvalidationSink> = Arc::downgrade(&registry);
        repository.subscribe_invalidations(weak);
        (repository, registry)
    }

    fn seeded(repository: &Repository) -> (Uuid, Uuid, Uuid) {
        let library = repository
            .create_library("docs", None, Metadata::new())
            .unwrap();
        let document = repository
            .create_document(library.id, "guide", None, Metadata::new())
            .unwrap();
        let chunk = repository
            .create_chunk(
                library.id,
                document.id,
                "hello",
                vec![1.0, 0.0],
                Metadata::new(),
            )
            .unwrap();
        (library.id, document.id, chunk.id)
    }

    #[test]
    fn test_defaults_apply_when_unconfigured() {
        let (repository, registry) = wired();
        let (library_id, ..) = seeded(&repository);

        let index = registry.get_or_build(library_id).unwrap();
        assert_eq!(index.kind(), IndexKind::Linear);
        assert_eq!(index.metric(), DistanceMetric::Cosine);
        assert_eq!(index.size(), 1);

        let descriptor = registry.describe(library_id);
        assert!(descriptor.built);
        assert_eq!(descriptor.size, Some(1));
        assert_eq!(descriptor.dimension, Some(2));
    }

    #[test]
    fn test_cached_index_is_shared() {
        let (repository, registry) = wired();
        let (library_id, ..) = seeded(&repository);

        let first = registry.get_or_build(library_id).unwrap();
        let second = registry.get_or_build(library_id).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_configure_validates_and_evicts() {
        let (repository, registry) = wired();
        let (library_id, ..) = seeded(&repository);

        let err = registry
            .configure(library_id, IndexKind::KdTree, DistanceMetric::Cosine)
            .unwrap_err();
        assert_eq!(err.code(), "unsupported_metric");

        let before = registry.get_or_build(library_id).unwrap();
        registry
            .configure(library_id, IndexKind::KdTree, DistanceMetric::Euclidean)
            .unwrap();
        assert!(!registry.describe(library_id).built);

        let after = registry.get_or_build(library_id).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.kind(), IndexKind::KdTree);
    }

    #[test]
    fn test_mutation_invalidates_through_sink() {
        let (repository, registry) = wired();
        let (library_id, document_id, _) = seeded(&repository);

        let before = registry.get_or_build(library_id).unwrap();
        repository
            .create_chunk(
                library_id,
                document_id,
                "more",
                vec![0.0, 1.0],
                Metadata::new(),
            )
            .unwrap();
        assert!(!registry.describe(library_id).built);

        let after = registry.get_or_build(library_id).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.size(), 2);
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let (repository, registry) = wired();
        let (library_id, ..) = seeded(&repository);

        registry.get_or_build(library_id).unwrap();
        IndexRegistry::invalidate(&registry, library_id);
        IndexRegistry::invalidate(&registry, library_id);
        assert!(!registry.describe(library_id).built);
    }

    #[test]
    fn test_build_error_leaves_slot_retryable() {
        let (repository, registry) = wired();
        let (library_id, _, chunk_id) = seeded(&repository);

        // A zero-norm vector cannot be indexed under cosine.
        repository
            .update_chunk(
                library_id,
                chunk_id,
                ChunkPatch {
                    embedding: Some(vec![0.0, 0.0]),
                    ..ChunkPatch::default()
                },
            )
            .unwrap();
        let err = registry.get_or_build(library_id).unwrap_err();
        assert_eq!(err.code(), "invalid_vector");
        assert!(!registry.describe(library_id).built);

        // Fixing the vector makes the next build succeed.
        repository
            .update_chunk(
                library_id,
                chunk_id,
                ChunkPatch {
                    embedding: Some(vec![0.6, 0.8]),
                    ..ChunkPatch::default()
                },
            )
            .unwrap();
        let index = registry.get_or_build(library_id).unwrap();
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn test_concurrent_callers_share_one_build() {
        let (repository, registry) = wired();
        let (library_id, document_id, _) = seeded(&repository);
        for i in 0..200 {
            repository
                .create_chunk(
                    library_id,
                    document_id,
                    format!("chunk {i}"),
                    vec![(i as f32).cos(), (i as f32).sin()],
                    Metadata::new(),
                )
                .unwrap();
        }

        let results: Vec<Arc<dyn VectorIndex>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| registry.get_or_build(library_id).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        for index in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], index));
        }
        assert_eq!(results[0].size(), 201);
    }

    #[test]
    fn test_seed_derivation_is_stable_and_library_specific() {
        let lsh = LshParams::default();
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        assert_eq!(
            derive_build_seed(42, a, IndexKind::Lsh, &lsh),
            derive_build_seed(42, a, IndexKind::Lsh, &lsh)
        );
        assert_ne!(
            derive_build_seed(42, a, IndexKind::Lsh, &lsh),
            derive_build_seed(42, b, IndexKind::Lsh, &lsh)
        );
    }
}
