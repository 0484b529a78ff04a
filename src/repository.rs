//! In-memory hierarchical store for libraries, documents, and chunks.
//!
//! State is partitioned per library: a process-wide
//! [`PriorityRwLock`] guards the set of libraries (create/delete/rename and
//! snapshot atomicity), and each library shard carries its own lock for
//! document and chunk operations. Lock order is always the global lock
//! first, then at most one shard lock. The exception is
//! [`Repository::export_all`],
//! which holds every shard read lock (in sorted id order) for a
//! point-in-time view. No other path holds more than one shard lock, so
//! the ordering is cycle-free.
//!
//! Mutations that change a library's chunk set, or a chunk's embedding,
//! emit an invalidation event to the subscribed [`InvalidationSink`] while
//! the shard write lock is still held, so a stale compiled index is never
//! observable after the mutation returns.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};

use log::{debug, info};
use uuid::Uuid;

use crate::error::{QuiverError, Result};
use crate::lock::PriorityRwLock;
use crate::model::{Chunk, ChunkPatch, Document, DocumentPatch, Library, LibraryPatch, Metadata};

/// Observer for chunk-set mutations, notified per affected library.
pub trait InvalidationSink: Send + Sync {
    /// Called under the mutated library's write lock, before the mutation
    /// returns to the caller.
    fn invalidate(&self, library_id: Uuid);
}

/// Everything owned by a single library, guarded by the shard lock.
#[derive(Debug)]
struct LibraryState {
    library: Library,
    documents: HashMap<Uuid, Document>,
    chunks: HashMap<Uuid, Chunk>,
    chunks_by_document: HashMap<Uuid, BTreeSet<Uuid>>,
    /// Embedding dimension, fixed by the first chunk and sticky thereafter.
    dimension: Option<usize>,
}

impl LibraryState {
    fn new(library: Library) -> Self {
        Self {
            library,
            documents: HashMap::new(),
            chunks: HashMap::new(),
            chunks_by_document: HashMap::new(),
            dimension: None,
        }
    }
}

#[derive(Debug)]
struct LibraryShard {
    state: PriorityRwLock<LibraryState>,
}

#[derive(Debug, Default)]
struct LibraryTable {
    shards: HashMap<Uuid, Arc<LibraryShard>>,
    /// Name -> id map enforcing library-name uniqueness.
    names: HashMap<String, Uuid>,
}

/// One fully materialized library, as exported for snapshots and imported
/// on restore.
#[derive(Debug, Clone)]
pub struct LibraryRecords {
    /// The library record.
    pub library: Library,
    /// Documents, sorted by id.
    pub documents: Vec<Document>,
    /// Chunks, sorted by id.
    pub chunks: Vec<Chunk>,
}

/// The in-memory repository.
pub struct Repository {
    table: PriorityRwLock<LibraryTable>,
    sink: parking_lot::RwLock<Option<Weak<dyn InvalidationSink>>>,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").finish_non_exhaustive()
    }
}

impl Repository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self {
            table: PriorityRwLock::new(LibraryTable::default()),
            sink: parking_lot::RwLock::new(None),
        }
    }

    /// Register the invalidation observer. At most one sink is held; the
    /// weak reference keeps the repository from owning its observer.
    pub fn subscribe_invalidations(&self, sink: Weak<dyn InvalidationSink>) {
        *self.sink.write() = Some(sink);
    }

    fn notify_invalidation(&self, library_id: Uuid) {
        let sink = self.sink.read().as_ref().and_then(Weak::upgrade);
        if let Some(sink) = sink {
            sink.invalidate(library_id);
        }
    }

    // =========================================================================
    // Libraries
    // =========================================================================

    /// Create a library. Fails with `AlreadyExists` on a name collision.
    pub fn create_library(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        metadata: Metadata,
    ) -> Result<Library> {
        let name = name.into();
        validate_name(&name, "library")?;

        let mut table = self.table.write();
        if table.names.contains_key(&name) {
            return Err(QuiverError::already_exists("library", name));
        }

        let library = Library::new(name.clone(), description, metadata);
        let shard = Arc::new(LibraryShard {
            state: PriorityRwLock::new(LibraryState::new(library.clone())),
        });
        table.names.insert(name, library.id);
        table.shards.insert(library.id, shard);
        info!("library created: {}", library.id);
        Ok(library)
    }

    /// Fetch a library by id.
    pub fn get_library(&self, library_id: Uuid) -> Result<Library> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let state = shard.state.read();
        Ok(state.library.clone())
    }

    /// List all libraries, sorted by name.
    pub fn list_libraries(&self) -> Vec<Library> {
        let table = self.table.read();
        let mut libraries: Vec<Library> = table
            .shards
            .values()
            .map(|shard| shard.state.read().library.clone())
            .collect();
        libraries.sort_by(|a, b| a.name.cmp(&b.name));
        libraries
    }

    /// Apply a partial update to a library.
    pub fn update_library(&self, library_id: Uuid, patch: LibraryPatch) -> Result<Library> {
        // Renames touch the global name map, so the whole update runs under
        // the global write lock.
        let mut table = self.table.write();
        let shard = lookup(&table, library_id)?.clone();

        if let Some(name) = &patch.name {
            validate_name(name, "library")?;
            if let Some(owner) = table.names.get(name)
                && *owner != library_id
            {
                return Err(QuiverError::already_exists("library", name.clone()));
            }
        }

        let mut state = shard.state.write();
        if let Some(name) = patch.name {
            let previous = state.library.name.clone();
            table.names.remove(&previous);
            table.names.insert(name.clone(), library_id);
            state.library.name = name;
        }
        if let Some(description) = patch.description {
            state.library.description = Some(description);
        }
        if let Some(metadata) = patch.metadata {
            state.library.metadata = metadata;
        }
        info!("library updated: {library_id}");
        Ok(state.library.clone())
    }

    /// Delete a library and everything it owns.
    pub fn delete_library(&self, library_id: Uuid) -> Result<()> {
        let mut table = self.table.write();
        let shard = table
            .shards
            .remove(&library_id)
            .ok_or_else(|| QuiverError::not_found("library", library_id.to_string()))?;
        let name = shard.state.read().library.name.clone();
        table.names.remove(&name);
        drop(table);

        self.notify_invalidation(library_id);
        info!("library deleted: {library_id}");
        Ok(())
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Create a document inside a library.
    pub fn create_document(
        &self,
        library_id: Uuid,
        title: impl Into<String>,
        description: Option<String>,
        metadata: Metadata,
    ) -> Result<Document> {
        let title = title.into();
        validate_name(&title, "document")?;

        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let mut state = shard.state.write();

        let document = Document::new(library_id, title, description, metadata);
        state.documents.insert(document.id, document.clone());
        info!("document created: {} in library {library_id}", document.id);
        Ok(document)
    }

    /// Fetch a document by id.
    pub fn get_document(&self, library_id: Uuid, document_id: Uuid) -> Result<Document> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let state = shard.state.read();
        state
            .documents
            .get(&document_id)
            .cloned()
            .ok_or_else(|| QuiverError::not_found("document", document_id.to_string()))
    }

    /// List a library's documents, sorted by id.
    pub fn list_documents(&self, library_id: Uuid) -> Result<Vec<Document>> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let state = shard.state.read();
        let mut documents: Vec<Document> = state.documents.values().cloned().collect();
        documents.sort_by_key(|d| d.id);
        Ok(documents)
    }

    /// Apply a partial update to a document.
    pub fn update_document(
        &self,
        library_id: Uuid,
        document_id: Uuid,
        patch: DocumentPatch,
    ) -> Result<Document> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let mut state = shard.state.write();

        if let Some(title) = &patch.title {
            validate_name(title, "document")?;
        }
        let document = state
            .documents
            .get_mut(&document_id)
            .ok_or_else(|| QuiverError::not_found("document", document_id.to_string()))?;
        if let Some(title) = patch.title {
            document.title = title;
        }
        if let Some(description) = patch.description {
            document.description = Some(description);
        }
        if let Some(metadata) = patch.metadata {
            document.metadata = metadata;
        }
        info!("document updated: {document_id}");
        Ok(document.clone())
    }

    /// Delete a document and all of its chunks.
    pub fn delete_document(&self, library_id: Uuid, document_id: Uuid) -> Result<()> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let mut state = shard.state.write();

        if state.documents.remove(&document_id).is_none() {
            return Err(QuiverError::not_found("document", document_id.to_string()));
        }
        let removed = state.chunks_by_document.remove(&document_id).unwrap_or_default();
        for chunk_id in &removed {
            state.chunks.remove(chunk_id);
        }

        if !removed.is_empty() {
            self.notify_invalidation(library_id);
        }
        info!(
            "document deleted: {document_id} ({} chunks cascaded)",
            removed.len()
        );
        Ok(())
    }

    // =========================================================================
    // Chunks
    // =========================================================================

    /// Create a chunk. The first chunk of a library establishes its
    /// embedding dimension; later chunks must match it.
    pub fn create_chunk(
        &self,
        library_id: Uuid,
        document_id: Uuid,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<Chunk> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let mut state = shard.state.write();

        if !state.documents.contains_key(&document_id) {
            return Err(QuiverError::not_found("document", document_id.to_string()));
        }
        validate_embedding(&embedding)?;
        match state.dimension {
            Some(expected) if expected != embedding.len() => {
                return Err(QuiverError::dimension_mismatch(expected, embedding.len()));
            }
            Some(_) => {}
            None => {
                state.dimension = Some(embedding.len());
                debug!(
                    "library {library_id} dimension established at {}",
                    embedding.len()
                );
            }
        }

        let chunk = Chunk::new(library_id, document_id, text, embedding, metadata);
        state
            .chunks_by_document
            .entry(document_id)
            .or_default()
            .insert(chunk.id);
        state.chunks.insert(chunk.id, chunk.clone());

        self.notify_invalidation(library_id);
        info!("chunk created: {} in document {document_id}", chunk.id);
        Ok(chunk)
    }

    /// Fetch a chunk by id.
    pub fn get_chunk(&self, library_id: Uuid, chunk_id: Uuid) -> Result<Chunk> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let state = shard.state.read();
        state
            .chunks
            .get(&chunk_id)
            .cloned()
            .ok_or_else(|| QuiverError::not_found("chunk", chunk_id.to_string()))
    }

    /// List a library's chunks, optionally scoped to one document, sorted
    /// by id.
    pub fn list_chunks(&self, library_id: Uuid, document_id: Option<Uuid>) -> Result<Vec<Chunk>> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let state = shard.state.read();

        let mut chunks: Vec<Chunk> = match document_id {
            Some(document_id) => {
                if !state.documents.contains_key(&document_id) {
                    return Err(QuiverError::not_found("document", document_id.to_string()));
                }
                state
                    .chunks_by_document
                    .get(&document_id)
                    .map(|ids| ids.iter().filter_map(|id| state.chunks.get(id).cloned()).collect())
                    .unwrap_or_default()
            }
            None => state.chunks.values().cloned().collect(),
        };
        chunks.sort_by_key(|c| c.id);
        Ok(chunks)
    }

    /// Apply a partial update to a chunk. Only an embedding change
    /// invalidates the library's compiled index; text and metadata edits
    /// leave it untouched.
    pub fn update_chunk(&self, library_id: Uuid, chunk_id: Uuid, patch: ChunkPatch) -> Result<Chunk> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let mut state = shard.state.write();

        if !state.chunks.contains_key(&chunk_id) {
            return Err(QuiverError::not_found("chunk", chunk_id.to_string()));
        }
        if let Some(embedding) = &patch.embedding {
            validate_embedding(embedding)?;
            if let Some(expected) = state.dimension
                && expected != embedding.len()
            {
                return Err(QuiverError::dimension_mismatch(expected, embedding.len()));
            }
        }

        let chunk = state
            .chunks
            .get_mut(&chunk_id)
            .ok_or_else(|| QuiverError::not_found("chunk", chunk_id.to_string()))?;

        let mut embedding_changed = false;
        if let Some(embedding) = patch.embedding {
            embedding_changed = chunk.embedding != embedding;
            chunk.embedding = embedding;
        }
        if let Some(text) = patch.text {
            chunk.text = text;
        }
        if let Some(metadata) = patch.metadata {
            chunk.metadata = metadata;
        }
        let updated = chunk.clone();

        if embedding_changed {
            self.notify_invalidation(library_id);
        }
        info!("chunk updated: {chunk_id}");
        Ok(updated)
    }

    /// Delete a chunk.
    pub fn delete_chunk(&self, library_id: Uuid, chunk_id: Uuid) -> Result<()> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let mut state = shard.state.write();

        let chunk = state
            .chunks
            .remove(&chunk_id)
            .ok_or_else(|| QuiverError::not_found("chunk", chunk_id.to_string()))?;
        if let Some(ids) = state.chunks_by_document.get_mut(&chunk.document_id) {
            ids.remove(&chunk_id);
        }

        self.notify_invalidation(library_id);
        info!("chunk deleted: {chunk_id}");
        Ok(())
    }

    // =========================================================================
    // Collaborator views
    // =========================================================================

    /// Id-sorted `(ids, embeddings)` for an index build, taken under the
    /// shard read lock so the build sees a consistent vector set.
    pub fn chunk_embeddings(&self, library_id: Uuid) -> Result<(Vec<Uuid>, Vec<Vec<f32>>)> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let state = shard.state.read();

        let mut pairs: Vec<(&Uuid, &Chunk)> = state.chunks.iter().collect();
        pairs.sort_by_key(|(id, _)| **id);
        Ok(pairs
            .into_iter()
            .map(|(id, chunk)| (*id, chunk.embedding.clone()))
            .unzip())
    }

    /// Resolve index hits to chunks under a single shard read lock,
    /// skipping ids that no longer exist.
    pub fn resolve_chunks<T>(
        &self,
        library_id: Uuid,
        hits: impl IntoIterator<Item = (Uuid, T)>,
    ) -> Result<Vec<(Chunk, T)>> {
        let table = self.table.read();
        let shard = lookup(&table, library_id)?;
        let state = shard.state.read();
        Ok(hits
            .into_iter()
            .filter_map(|(id, tag)| state.chunks.get(&id).map(|chunk| (chunk.clone(), tag)))
            .collect())
    }

    /// Point-in-time export of every library, for snapshot create. Holds
    /// the global read lock plus all shard read locks in sorted id order.
    pub fn export_all(&self) -> Vec<LibraryRecords> {
        let table = self.table.read();
        let mut shards: Vec<(Uuid, &Arc<LibraryShard>)> =
            table.shards.iter().map(|(id, shard)| (*id, shard)).collect();
        shards.sort_by_key(|(id, _)| *id);

        let guards: Vec<_> = shards.iter().map(|(_, shard)| shard.state.read()).collect();
        guards
            .iter()
            .map(|state| {
                let mut documents: Vec<Document> = state.documents.values().cloned().collect();
                documents.sort_by_key(|d| d.id);
                let mut chunks: Vec<Chunk> = state.chunks.values().cloned().collect();
                chunks.sort_by_key(|c| c.id);
                LibraryRecords {
                    library: state.library.clone(),
                    documents,
                    chunks,
                }
            })
            .collect()
    }

    /// Replace the entire repository state, for snapshot restore. The
    /// caller validates the records first; the swap happens under the
    /// global write lock and is atomic from the outside.
    pub fn replace_all(&self, records: Vec<LibraryRecords>) -> Result<()> {
        let mut staged = LibraryTable::default();
        for record in records {
            let library_id = record.library.id;
            if staged.names.insert(record.library.name.clone(), library_id).is_some() {
                return Err(QuiverError::snapshot_corrupt(format!(
                    "duplicate library name '{}'",
                    record.library.name
                )));
            }

            let mut state = LibraryState::new(record.library);
            for document in record.documents {
                state.documents.insert(document.id, document);
            }
            for chunk in record.chunks {
                if state.dimension.is_none() {
                    state.dimension = Some(chunk.embedding.len());
                }
                state
                    .chunks_by_document
                    .entry(chunk.document_id)
                    .or_default()
                    .insert(chunk.id);
                state.chunks.insert(chunk.id, chunk);
            }
            staged.shards.insert(
                library_id,
                Arc::new(LibraryShard {
                    state: PriorityRwLock::new(state),
                }),
            );
        }

        let mut table = self.table.write();
        *table = staged;
        info!("repository state replaced ({} libraries)", table.shards.len());
        Ok(())
    }
}

fn lookup<'a>(table: &'a LibraryTable, library_id: Uuid) -> Result<&'a Arc<LibraryShard>> {
    table
        .shards
        .get(&library_id)
        .ok_or_else(|| QuiverError::not_found("library", library_id.to_string()))
}

fn validate_name(name: &str, what: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(QuiverError::invalid_argument(format!(
            "{what} name must not be empty"
        )));
    }
    Ok(())
}

fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(QuiverError::invalid_argument(
            "embedding must not be empty",
        ));
    }
    if !embedding.iter().all(|x| x.is_finite()) {
        return Err(QuiverError::invalid_vector(
            "embedding contains non-finite values",
        ));
    }
    Ok(())
}
