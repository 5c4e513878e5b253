//! Persistent vector index keyed by template id.
//!
//! Stores one entry per template: the embedding vector, the synthesized
//! document that produced it, and a typed metadata block. Queries rank by
//! cosine distance (ascending) with an optional timestamp range filter.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::semantic::storage::{IndexFile, StorageError};
use crate::templates::TemplateRecord;

/// Typed metadata attached to each index entry. Serialized only at the
/// storage boundary; in memory the timestamp is a real number with an
/// explicit "absent" sentinel, never a stringified zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub name: String,
    pub template_id: String,
    pub text_zones: u32,
    /// Original ISO-8601 timestamp, if the template carries one.
    pub added_at: Option<String>,
    /// Epoch seconds derived from `added_at`. `None` means "no timestamp"
    /// and never matches a range filter.
    pub added_at_ts: Option<i64>,
    /// Full record snapshot, JSON-encoded
    pub config_json: String,
}

impl EntryMetadata {
    pub fn from_record(record: &TemplateRecord) -> Self {
        let added_at_ts = record.added_at.as_deref().and_then(parse_timestamp);

        Self {
            name: record.name.clone().unwrap_or_default(),
            template_id: record.id.clone(),
            text_zones: record.text_zone_count(),
            added_at: record.added_at.clone(),
            added_at_ts,
            config_json: serde_json::to_string(record).unwrap_or_else(|_| "{}".to_string()),
        }
    }
}

/// Parse an ISO-8601 timestamp or bare date into epoch seconds.
pub fn parse_timestamp(value: &str) -> Option<i64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp());
    }

    if let Ok(date) = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }

    log::warn!("unparseable timestamp '{value}'");
    None
}

/// Conjunction of `>=` / `<=` bounds on `added_at_ts`. Entries without a
/// timestamp fail every bounded filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct DateFilter {
    pub min_ts: Option<i64>,
    pub max_ts: Option<i64>,
}

impl DateFilter {
    pub fn matches(&self, metadata: &EntryMetadata) -> bool {
        if self.min_ts.is_none() && self.max_ts.is_none() {
            return true;
        }

        let ts = match metadata.added_at_ts {
            Some(ts) => ts,
            None => return false,
        };

        if let Some(min) = self.min_ts {
            if ts < min {
                return false;
            }
        }
        if let Some(max) = self.max_ts {
            if ts > max {
                return false;
            }
        }

        true
    }
}

/// A complete index entry. `vector` and `document` are always produced
/// together from the same synthesis step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub document: String,
    pub metadata: EntryMetadata,
}

/// One ranked query result.
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub id: String,
    pub metadata: EntryMetadata,
    /// Cosine distance; lower is more similar.
    pub distance: f32,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("no entry for template '{0}'")]
    NotFound(String),

    #[error("index storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Contract every index backing store must satisfy. `flush` is part of the
/// contract, not an optional capability; callers never probe for it.
pub trait VectorIndex: Send + Sync {
    /// Atomic replace-or-insert of the full entry for `id`.
    fn upsert(
        &mut self,
        id: &str,
        vector: Vec<f32>,
        document: String,
        metadata: EntryMetadata,
    ) -> Result<(), IndexError>;

    /// Replace only the metadata block, preserving vector and document.
    fn update_metadata(&mut self, id: &str, metadata: EntryMetadata) -> Result<(), IndexError>;

    fn get(&self, id: &str) -> Option<IndexEntry>;

    fn ids(&self) -> HashSet<String>;

    /// Removes entries; unknown ids are a no-op.
    fn delete_many(&mut self, ids: &[String]);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Nearest-neighbor query, ascending cosine distance, truncated to
    /// `top_n`.
    fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        filter: Option<&DateFilter>,
    ) -> Result<Vec<QueryMatch>, IndexError>;

    /// Make all prior writes durable before returning.
    fn flush(&self) -> Result<(), IndexError>;
}

/// In-memory index persisted to a binary file on `flush`.
pub struct LocalIndex {
    entries: HashMap<String, IndexEntry>,
    dimensions: usize,
    file: IndexFile,
}

impl LocalIndex {
    /// Open or create the index at `dir/index.bin`.
    ///
    /// A persisted file written by a different model or format version is
    /// discarded and replaced by a fresh index; actual corruption is an
    /// error.
    pub fn open(dir: PathBuf, model_id: &str, dimensions: usize) -> Result<Self, IndexError> {
        std::fs::create_dir_all(&dir).map_err(StorageError::from)?;
        let file = IndexFile::new(dir.join("index.bin"), model_id);

        let entries = if file.exists() {
            match file.load(dimensions) {
                Ok(entries) => {
                    log::info!("loaded {} vectors from storage", entries.len());
                    entries
                }
                Err(StorageError::ModelMismatch) => {
                    log::warn!("embedding model changed, starting fresh index");
                    HashMap::new()
                }
                Err(StorageError::VersionMismatch(file_ver, _)) => {
                    log::warn!("index format version {file_ver} unsupported, starting fresh");
                    HashMap::new()
                }
                Err(err) => {
                    log::error!("failed to load index: {err}");
                    return Err(err.into());
                }
            }
        } else {
            log::info!("no existing index, starting fresh");
            HashMap::new()
        };

        Ok(Self {
            entries,
            dimensions,
            file,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn l2_norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Cosine distance with a precomputed query norm.
    fn cosine_distance(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
        let target_norm = Self::l2_norm(target);
        if target_norm < f32::EPSILON {
            return 1.0;
        }

        let dot: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
        1.0 - dot / (query_norm * target_norm)
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        if Self::l2_norm(vector) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        Ok(())
    }
}

impl VectorIndex for LocalIndex {
    fn upsert(
        &mut self,
        id: &str,
        vector: Vec<f32>,
        document: String,
        metadata: EntryMetadata,
    ) -> Result<(), IndexError> {
        self.check_vector(&vector)?;

        self.entries.insert(
            id.to_string(),
            IndexEntry {
                vector,
                document,
                metadata,
            },
        );

        Ok(())
    }

    fn update_metadata(&mut self, id: &str, metadata: EntryMetadata) -> Result<(), IndexError> {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.metadata = metadata;
                Ok(())
            }
            None => Err(IndexError::NotFound(id.to_string())),
        }
    }

    fn get(&self, id: &str) -> Option<IndexEntry> {
        self.entries.get(id).cloned()
    }

    fn ids(&self) -> HashSet<String> {
        self.entries.keys().cloned().collect()
    }

    fn delete_many(&mut self, ids: &[String]) {
        for id in ids {
            self.entries.remove(id);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn query(
        &self,
        vector: &[f32],
        top_n: usize,
        filter: Option<&DateFilter>,
    ) -> Result<Vec<QueryMatch>, IndexError> {
        self.check_vector(vector)?;

        let query_norm = Self::l2_norm(vector);

        let mut results: Vec<QueryMatch> = self
            .entries
            .iter()
            .filter(|(_, entry)| filter.map(|f| f.matches(&entry.metadata)).unwrap_or(true))
            .map(|(id, entry)| QueryMatch {
                id: id.clone(),
                metadata: entry.metadata.clone(),
                distance: Self::cosine_distance(vector, &entry.vector, query_norm),
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_n);

        Ok(results)
    }

    fn flush(&self) -> Result<(), IndexError> {
        self.file.save(&self.entries, self.dimensions)?;
        Ok(())
    }
}
