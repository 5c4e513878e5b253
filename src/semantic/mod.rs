//! Semantic retrieval infrastructure for template embeddings.
//!
//! This module owns the write path (synchronize templates into a persistent
//! vector index) and the read path (filtered nearest-neighbor search).
//!
//! # Architecture
//!
//! - `document`: template record -> canonical search text
//! - `embedder`: text -> vector via an OpenAI-compatible provider
//! - `index`: keyed vector index with cosine-distance queries
//! - `storage`: binary file I/O for index.bin persistence
//! - `pipeline`: rebuild / repair / metadata-refresh orchestration
//! - `search`: query embedding + filtered lookup + result assembly

pub mod document;
pub mod embedder;
pub mod index;
pub mod pipeline;
pub mod search;
pub mod storage;

pub use document::synthesize;
pub use embedder::{EmbeddingError, EmbeddingProvider, OpenAiEmbedder};
pub use index::{DateFilter, EntryMetadata, IndexEntry, IndexError, LocalIndex, VectorIndex};
pub use pipeline::{PipelineError, SyncPipeline, SyncReport};
pub use search::{SearchError, SearchHit, SearchService, TemplateInfo};
pub use storage::IndexFile;

use std::sync::{Arc, RwLock};

/// The index handle shared between the pipeline (writer) and the search
/// service (reader). Writes take the write guard; concurrent reads proceed
/// under the read guard.
pub type SharedIndex = Arc<RwLock<Box<dyn VectorIndex>>>;
