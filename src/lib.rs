//! # Quiver
//!
//! An in-memory vector database for Rust.
//!
//! ## Features
//!
//! - Three-level data model: library -> document -> chunk
//! - Pluggable top-k indices: exact linear scan, KD-tree, random-hyperplane LSH
//! - Cosine and euclidean metrics behind one ranking-score contract
//! - Reader-writer concurrency with writer priority, partitioned per library
//! - Single-flight index builds with invalidation on mutation
//! - Atomic JSON snapshots with staged, all-or-nothing restore
//!
//! The [`engine::VectorStore`] wires everything together:
//!
//! ```
//! use quiver::config::Settings;
//! use quiver::engine::VectorStore;
//! use quiver::model::Metadata;
//!
//! # fn main() -> quiver::error::Result<()> {
//! let store = VectorStore::new(Settings::default());
//! let library = store.repository().create_library("docs", None, Metadata::new())?;
//! let document = store
//!     .repository()
//!     .create_document(library.id, "guide", None, Metadata::new())?;
//! store
//!     .repository()
//!     .create_chunk(library.id, document.id, "hello", vec![1.0, 0.0], Metadata::new())?;
//!
//! let hits = store.search(library.id, &[1.0, 0.0], 1, None)?;
//! assert_eq!(hits[0].chunk.text, "hello");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod lock;
pub mod metric;
pub mod model;
pub mod registry;
pub mod repository;
pub mod search;
pub mod snapshot;

/// Version information.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
