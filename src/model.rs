//! The library / document / chunk ownership hierarchy.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Free-form metadata: string keys to JSON-like scalar or array values.
pub type Metadata = HashMap<String, Value>;

/// A named collection of documents sharing one embedding space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    /// Stable opaque identifier.
    pub id: Uuid,
    /// Unique, non-empty display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Library {
    /// Create a new library with a fresh id.
    pub fn new(name: impl Into<String>, description: Option<String>, metadata: Metadata) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description,
            metadata,
        }
    }
}

/// A titled grouping of chunks inside a library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable opaque identifier.
    pub id: Uuid,
    /// Owning library; immutable after creation.
    pub library_id: Uuid,
    /// Non-empty title.
    pub title: String,
    /// Optional description.
    pub description: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Create a new document with a fresh id.
    pub fn new(
        library_id: Uuid,
        title: impl Into<String>,
        description: Option<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            library_id,
            title: title.into(),
            description,
            metadata,
        }
    }
}

/// The unit that carries an embedding: a piece of text plus its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable opaque identifier.
    pub id: Uuid,
    /// Owning document.
    pub document_id: Uuid,
    /// Owning library, denormalized for index lookup.
    pub library_id: Uuid,
    /// The chunk text.
    pub text: String,
    /// Fixed-length embedding vector.
    pub embedding: Vec<f32>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    /// Create a new chunk with a fresh id.
    pub fn new(
        library_id: Uuid,
        document_id: Uuid,
        text: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id,
            library_id,
            text: text.into(),
            embedding,
            metadata,
        }
    }

    /// The dimensionality of this chunk's embedding.
    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}

/// Partial update for a library; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryPatch {
    /// New name (must stay unique and non-empty).
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// Replacement metadata mapping.
    pub metadata: Option<Metadata>,
}

/// Partial update for a document; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentPatch {
    /// New title (must stay non-empty).
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// Replacement metadata mapping.
    pub metadata: Option<Metadata>,
}

/// Partial update for a chunk; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkPatch {
    /// New text.
    pub text: Option<String>,
    /// Replacement embedding (must match the library dimension).
    pub embedding: Option<Vec<f32>>,
    /// Replacement metadata mapping.
    pub metadata: Option<Metadata>,
}
