//! Top-level wiring: one [`VectorStore`] owns the repository, the index
//! registry (subscribed to invalidations), the search service, and the
//! snapshot service. This is the object an HTTP routing layer talks to.

use std::sync::{Arc, Weak};

use uuid::Uuid;

use crate::config::Settings;
use crate::error::Result;
use crate::index::IndexKind;
use crate::metric::DistanceMetric;
use crate::registry::{IndexDescriptor, IndexRegistry};
use crate::repository::{InvalidationSink, Repository};
use crate::search::{MetadataFilter, SearchHit, SearchService};
use crate::snapshot::SnapshotService;

/// The assembled in-memory vector database.
#[derive(Debug)]
pub struct VectorStore {
    settings: Settings,
    repository: Arc<Repository>,
    registry: Arc<IndexRegistry>,
    search: SearchService,
    snapshots: SnapshotService,
}

impl VectorStore {
    /// Assemble a store from the given settings.
    pub fn new(settings: Settings) -> Self {
        let repository = Arc::new(Repository::new());
        let registry = Arc::new(IndexRegistry::new(repository.clone(), &settings));
        let weak: Weak<dyn InvalidationSink> = Arc::downgrade(&registry);
        repository.subscribe_invalidations(weak);

        let search = SearchService::new(repository.clone(), registry.clone());
        let snapshots = SnapshotService::new(repository.clone(), registry.clone(), &settings);
        Self {
            settings,
            repository,
            registry,
            search,
            snapshots,
        }
    }

    /// Assemble a store from the process environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(Settings::from_env()?))
    }

    /// The settings this store was assembled with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Library/document/chunk CRUD.
    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    /// The per-library index cache.
    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    /// Snapshot administration.
    pub fn snapshots(&self) -> &SnapshotService {
        &self.snapshots
    }

    /// Delete a library, its contents, and its index slot.
    pub fn delete_library(&self, library_id: Uuid) -> Result<()> {
        self.repository.delete_library(library_id)?;
        self.registry.remove(library_id);
        Ok(())
    }

    /// Record an index configuration for a library and build it eagerly.
    pub fn configure_index(
        &self,
        library_id: Uuid,
        algorithm: IndexKind,
        metric: DistanceMetric,
    ) -> Result<IndexDescriptor> {
        self.repository.get_library(library_id)?;
        self.registry.configure(library_id, algorithm, metric)?;
        self.registry.get_or_build(library_id)?;
        Ok(self.registry.describe(library_id))
    }

    /// Describe a library's index slot.
    pub fn describe_index(&self, library_id: Uuid) -> Result<IndexDescriptor> {
        self.repository.get_library(library_id)?;
        Ok(self.registry.describe(library_id))
    }

    /// Drop a library's compiled index, keeping its configuration.
    pub fn clear_index(&self, library_id: Uuid) -> Result<()> {
        self.repository.get_library(library_id)?;
        self.registry.invalidate(library_id);
        Ok(())
    }

    /// Top-k search over a library, building the index on demand.
    pub fn search(
        &self,
        library_id: Uuid,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        self.search.search(library_id, query, k, filter)
    }
}
