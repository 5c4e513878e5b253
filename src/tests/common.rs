//! Shared fixtures for integration tests: an in-memory template store, a
//! deterministic embedder, and a canned content extractor.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, RwLock};

use crate::enrich::Enricher;
use crate::extract::{ContentExtractor, ExtractedPage, FetchError};
use crate::semantic::{
    EmbeddingError, EmbeddingProvider, LocalIndex, SharedIndex, SyncPipeline,
};
use crate::templates::{StoreError, TemplateRecord, TemplateStore};

pub const TEST_DIMS: usize = 32;

/// Words the mock embedder recognizes. One dimension per word; tokens
/// outside the vocabulary contribute nothing, so two documents are similar
/// exactly when they share vocabulary words.
const VOCAB: [&str; 12] = [
    "drake", "meme", "choice", "cats", "pets", "dogs", "animals", "stocks", "finance",
    "weather", "same", "templates",
];

/// Deterministic bag-of-words embedder for tests.
pub struct MockEmbedder {
    pub dims: usize,
    /// Fail any input containing this marker, to simulate provider errors.
    pub fail_on: Option<String>,
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self {
            dims: TEST_DIMS,
            fail_on: None,
        }
    }
}

impl EmbeddingProvider for MockEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(marker) = &self.fail_on {
            if text.contains(marker.as_str()) {
                return Err(EmbeddingError::Http {
                    status: 500,
                    body: "mock provider failure".to_string(),
                });
            }
        }

        let mut vector = vec![0.0f32; self.dims];
        for token in text.split_whitespace() {
            let token: String = token
                .to_lowercase()
                .chars()
                .filter(|c| c.is_alphanumeric())
                .collect();

            if let Some(pos) = VOCAB.iter().position(|word| *word == token) {
                vector[pos] += 1.0;
            }
        }

        // a query with no known words still embeds to something nonzero
        if vector.iter().all(|&x| x == 0.0) {
            vector[self.dims - 1] = 1.0;
        }

        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

/// In-memory template store.
#[derive(Default)]
pub struct MemStore {
    records: RwLock<BTreeMap<String, TemplateRecord>>,
}

impl MemStore {
    pub fn with_records(records: Vec<TemplateRecord>) -> Self {
        let store = Self::default();
        {
            let mut map = store.records.write().unwrap();
            for record in records {
                map.insert(record.id.clone(), record);
            }
        }
        store
    }

    pub fn insert(&self, record: TemplateRecord) {
        self.records
            .write()
            .unwrap()
            .insert(record.id.clone(), record);
    }

    pub fn remove(&self, id: &str) {
        self.records.write().unwrap().remove(id);
    }
}

impl TemplateStore for MemStore {
    fn list_all(&self) -> Result<Vec<TemplateRecord>, StoreError> {
        Ok(self.records.read().unwrap().values().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Option<TemplateRecord>, StoreError> {
        Ok(self.records.read().unwrap().get(id).cloned())
    }

    fn save(&self, record: &TemplateRecord) -> Result<(), StoreError> {
        self.insert(record.clone());
        Ok(())
    }
}

/// Extractor returning a fixed page, counting calls.
pub struct FixedExtractor {
    pub calls: AtomicUsize,
    pub page: ExtractedPage,
}

impl Default for FixedExtractor {
    fn default() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            page: ExtractedPage {
                main_text: "canned page text".to_string(),
                aside_text: None,
                published_at: None,
            },
        }
    }
}

impl ContentExtractor for FixedExtractor {
    fn extract(&self, _url: &str) -> Result<ExtractedPage, FetchError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(self.page.clone())
    }
}

pub fn open_index(dir: &Path) -> SharedIndex {
    let index = LocalIndex::open(dir.to_path_buf(), "mock-model", TEST_DIMS).unwrap();
    Arc::new(RwLock::new(Box::new(index)))
}

pub fn make_pipeline(
    store: Arc<MemStore>,
    extractor: Arc<dyn ContentExtractor>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: SharedIndex,
) -> SyncPipeline {
    let enricher = Enricher::new(store.clone(), extractor);
    SyncPipeline::new(store, enricher, embedder, index, 2)
}

pub fn record(id: &str, name: &str, keywords: &[&str]) -> TemplateRecord {
    TemplateRecord {
        id: id.to_string(),
        name: Some(name.to_string()),
        keywords: keywords.iter().map(|k| Some(k.to_string())).collect(),
        ..Default::default()
    }
}
