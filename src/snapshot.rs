//! Snapshot persistence: point-in-time JSON serialization of the whole
//! repository plus per-library index configuration.
//!
//! One file per snapshot lives under the data directory as
//! `{snapshot_id}.json`. Files are written atomically (write to a `.tmp`
//! sibling, fsync, rename), and restore stages and validates the whole
//! file before swapping it in, so a failed restore leaves the previous
//! state intact.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::{QuiverError, Result};
use crate::index::IndexKind;
use crate::metric::{DistanceMetric, norm};
use crate::model::{Chunk, Document, Library, Metadata};
use crate::registry::IndexRegistry;
use crate::repository::{LibraryRecords, Repository};

/// Version tag of the snapshot file format.
pub const FORMAT_VERSION: u32 = 1;

/// Header metadata of a snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Snapshot id; also the file stem.
    pub id: Uuid,
    /// Unique snapshot name.
    pub name: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// File size on disk.
    pub size_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    format_version: u32,
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
    libraries: Vec<SnapshotLibrary>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotLibrary {
    id: Uuid,
    name: String,
    description: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    documents: Vec<SnapshotDocument>,
    index: Option<SnapshotIndexConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    id: Uuid,
    title: String,
    description: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    chunks: Vec<SnapshotChunk>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotChunk {
    id: Uuid,
    text: String,
    embedding: Vec<f32>,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct SnapshotIndexConfig {
    algorithm: IndexKind,
    metric: DistanceMetric,
}

/// Writes, lists, and restores snapshot files.
#[derive(Debug)]
pub struct SnapshotService {
    repository: Arc<Repository>,
    registry: Arc<IndexRegistry>,
    data_dir: PathBuf,
}

impl SnapshotService {
    /// Create a snapshot service storing files under `settings.data_dir`.
    pub fn new(repository: Arc<Repository>, registry: Arc<IndexRegistry>, settings: &Settings) -> Self {
        Self {
            repository,
            registry,
            data_dir: settings.data_dir.clone(),
        }
    }

    /// Serialize the current state into a new snapshot file.
    ///
    /// The export is point-in-time consistent: it holds the global read
    /// lock plus every library's read lock while copying. Fails with
    /// `AlreadyExists` if a snapshot of the same name is already on disk.
    pub fn create(&self, name: impl Into<String>) -> Result<SnapshotInfo> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(QuiverError::invalid_argument(
                "snapshot name must not be empty",
            ));
        }
        fs::create_dir_all(&self.data_dir)?;
        if self.list()?.iter().any(|info| info.name == name) {
            return Err(QuiverError::already_exists("snapshot", name));
        }

        let records = self.repository.export_all();
        let configs = self.registry.configurations();

        let snapshot = SnapshotFile {
            format_version: FORMAT_VERSION,
            id: Uuid::new_v4(),
            name,
            created_at: Utc::now(),
            libraries: records
                .into_iter()
                .map(|record| encode_library(record, &configs))
                .collect(),
        };

        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        let tmp_path = self.data_dir.join(format!("{}.tmp", snapshot.id));
        let final_path = self.snapshot_path(snapshot.id);
        let mut file = File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &final_path)?;

        info!("snapshot '{}' written to {}", snapshot.name, final_path.display());
        Ok(SnapshotInfo {
            id: snapshot.id,
            name: snapshot.name,
            created_at: snapshot.created_at,
            size_bytes: bytes.len() as u64,
        })
    }

    /// Enumerate snapshot files, newest first. Unreadable files are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<SnapshotInfo>> {
        let mut snapshots = Vec::new();
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(snapshots),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match self.read_file(&path) {
                Ok(snapshot) => snapshots.push(SnapshotInfo {
                    id: snapshot.id,
                    name: snapshot.name,
                    created_at: snapshot.created_at,
                    size_bytes: entry.metadata()?.len(),
                }),
                Err(e) => warn!("skipping unreadable snapshot {}: {e}", path.display()),
            }
        }
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(snapshots)
    }

    /// Return a snapshot's header metadata.
    pub fn get(&self, id: Uuid) -> Result<SnapshotInfo> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Err(QuiverError::not_found("snapshot", id.to_string()));
        }
        let snapshot = self.read_file(&path)?;
        Ok(SnapshotInfo {
            id: snapshot.id,
            name: snapshot.name,
            created_at: snapshot.created_at,
            size_bytes: fs::metadata(&path)?.len(),
        })
    }

    /// Replace the entire repository state with the snapshot's contents
    /// and eagerly rebuild every configured index.
    ///
    /// The file is parsed and validated into a staging structure first;
    /// any corruption aborts with the previous state intact. The swap
    /// itself happens under the global write lock and is atomic from the
    /// outside: in-flight reads complete on the old state, the next read
    /// sees the new state.
    pub fn restore(&self, id: Uuid) -> Result<()> {
        let path = self.snapshot_path(id);
        if !path.exists() {
            return Err(QuiverError::not_found("snapshot", id.to_string()));
        }
        let snapshot = self.read_file(&path)?;
        let (records, configs) = decode_and_validate(snapshot)?;

        let configured: Vec<Uuid> = configs.iter().map(|(id, ..)| *id).collect();
        self.repository.replace_all(records)?;
        self.registry.reset(configs)?;

        for library_id in configured {
            if let Err(e) = self.registry.get_or_build(library_id) {
                error!("index rebuild failed for library {library_id} after restore: {e}");
                return Err(e);
            }
        }
        info!("snapshot {id} restored");
        Ok(())
    }

    /// Delete a snapshot file; missing files are ignored.
    pub fn delete(&self, id: Uuid) -> Result<()> {
        match fs::remove_file(self.snapshot_path(id)) {
            Ok(()) => {
                info!("snapshot {id} deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn snapshot_path(&self, id: Uuid) -> PathBuf {
        self.data_dir.join(format!("{id}.json"))
    }

    fn read_file(&self, path: &std::path::Path) -> Result<SnapshotFile> {
        let bytes = fs::read(path)?;
        let snapshot: SnapshotFile = serde_json::from_slice(&bytes)
            .map_err(|e| QuiverError::snapshot_corrupt(format!("{}: {e}", path.display())))?;
        if snapshot.format_version != FORMAT_VERSION {
            return Err(QuiverError::snapshot_corrupt(format!(
                "unsupported format version {}",
                snapshot.format_version
            )));
        }
        Ok(snapshot)
    }
}

fn encode_library(
    record: LibraryRecords,
    configs: &HashMap<Uuid, (IndexKind, DistanceMetric)>,
) -> SnapshotLibrary {
    let mut chunks_by_document: HashMap<Uuid, Vec<SnapshotChunk>> = HashMap::new();
    for chunk in record.chunks {
        chunks_by_document
            .entry(chunk.document_id)
            .or_default()
            .push(SnapshotChunk {
                id: chunk.id,
                text: chunk.text,
                embedding: chunk.embedding,
                metadata: chunk.metadata,
            });
    }

    let index = configs
        .get(&record.library.id)
        .map(|(algorithm, metric)| SnapshotIndexConfig {
            algorithm: *algorithm,
            metric: *metric,
        });

    SnapshotLibrary {
        id: record.library.id,
        name: record.library.name,
        description: record.library.description,
        metadata: record.library.metadata,
        documents: record
            .documents
            .into_iter()
            .map(|document| SnapshotDocument {
                chunks: chunks_by_document.remove(&document.id).unwrap_or_default(),
                id: document.id,
                title: document.title,
                description: document.description,
                metadata: document.metadata,
            })
            .collect(),
        index,
    }
}

/// Decode the file into repository records, checking every invariant the
/// repository relies on. All violations are `SnapshotCorrupt`.
fn decode_and_validate(
    snapshot: SnapshotFile,
) -> Result<(Vec<LibraryRecords>, Vec<(Uuid, IndexKind, DistanceMetric)>)> {
    let mut records = Vec::with_capacity(snapshot.libraries.len());
    let mut configs = Vec::new();
    let mut names: HashSet<String> = HashSet::new();
    let mut seen_ids: HashSet<Uuid> = HashSet::new();

    for library in snapshot.libraries {
        if library.name.trim().is_empty() {
            return Err(QuiverError::snapshot_corrupt(format!(
                "library {} has an empty name",
                library.id
            )));
        }
        if !names.insert(library.name.clone()) {
            return Err(QuiverError::snapshot_corrupt(format!(
                "duplicate library name '{}'",
                library.name
            )));
        }
        if !seen_ids.insert(library.id) {
            return Err(QuiverError::snapshot_corrupt(format!(
                "duplicate id {}",
                library.id
            )));
        }

        let mut documents = Vec::with_capacity(library.documents.len());
        let mut chunks = Vec::new();
        let mut dimension: Option<usize> = None;
        for document in library.documents {
            if document.title.trim().is_empty() {
                return Err(QuiverError::snapshot_corrupt(format!(
                    "document {} has an empty title",
                    document.id
                )));
            }
            if !seen_ids.insert(document.id) {
                return Err(QuiverError::snapshot_corrupt(format!(
                    "duplicate id {}",
                    document.id
                )));
            }
            for chunk in document.chunks {
                if !seen_ids.insert(chunk.id) {
                    return Err(QuiverError::snapshot_corrupt(format!(
                        "duplicate id {}",
                        chunk.id
                    )));
                }
                if chunk.embedding.is_empty() {
                    return Err(QuiverError::snapshot_corrupt(format!(
                        "chunk {} has an empty embedding",
                        chunk.id
                    )));
                }
                if !chunk.embedding.iter().all(|x| x.is_finite()) {
                    return Err(QuiverError::snapshot_corrupt(format!(
                        "chunk {} has non-finite embedding values",
                        chunk.id
                    )));
                }
                match dimension {
                    Some(expected) if expected != chunk.embedding.len() => {
                        return Err(QuiverError::snapshot_corrupt(format!(
                            "library '{}' mixes dimensions {expected} and {}",
                            library.name,
                            chunk.embedding.len()
                        )));
                    }
                    Some(_) => {}
                    None => dimension = Some(chunk.embedding.len()),
                }
                if let Some(config) = &library.index
                    && config.metric == DistanceMetric::Cosine
                    && norm(&chunk.embedding) == 0.0
                {
                    return Err(QuiverError::snapshot_corrupt(format!(
                        "chunk {} has a zero-norm embedding under cosine",
                        chunk.id
                    )));
                }
                chunks.push(Chunk {
                    id: chunk.id,
                    document_id: document.id,
                    library_id: library.id,
                    text: chunk.text,
                    embedding: chunk.embedding,
                    metadata: chunk.metadata,
                });
            }
            documents.push(Document {
                id: document.id,
                library_id: library.id,
                title: document.title,
                description: document.description,
                metadata: document.metadata,
            });
        }

        if let Some(config) = &library.index {
            if !config.algorithm.supports(config.metric) {
                return Err(QuiverError::snapshot_corrupt(format!(
                    "library '{}' pairs {} with unsupported metric {}",
                    library.name, config.algorithm, config.metric
                )));
            }
            configs.push((library.id, config.algorithm, config.metric));
        }

        records.push(LibraryRecords {
            library: Library {
                id: library.id,
                name: library.name,
                description: library.description,
                metadata: library.metadata,
            },
            documents,
            chunks,
        });
    }

    Ok((records, configs))
}
