//! Application context: one explicitly constructed instance wiring the
//! template store, content extractor, embedding provider, and vector index
//! together. Both the CLI and the HTTP daemon drive this type; there is no
//! global state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::config::Config;
use crate::enrich::Enricher;
use crate::errors::AppError;
use crate::extract::{ContentExtractor, HttpExtractor};
use crate::semantic::{
    EmbeddingProvider, LocalIndex, OpenAiEmbedder, SearchHit, SearchService, SharedIndex,
    SyncPipeline, SyncReport, TemplateInfo,
};
use crate::templates::{DirStore, TemplateStore};

pub struct App {
    config: Config,
    index: SharedIndex,
    pipeline: SyncPipeline,
    search: SearchService,
    cancel: Arc<AtomicBool>,
}

impl App {
    /// Build the production wiring: directory-backed template store, HTTP
    /// content extractor, OpenAI-compatible embedder, file-backed index.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn TemplateStore> = Arc::new(DirStore::new(config.templates_path())?);
        let extractor: Arc<dyn ContentExtractor> =
            Arc::new(HttpExtractor::new(config.scrape.clone()));
        let embedder: Arc<dyn EmbeddingProvider> =
            Arc::new(OpenAiEmbedder::new(&config.embedding)?);

        Self::assemble(config, store, extractor, embedder)
    }

    /// Wire an application from explicit collaborators. Used by `new` and by
    /// tests that substitute mock implementations.
    pub fn assemble(
        config: Config,
        store: Arc<dyn TemplateStore>,
        extractor: Arc<dyn ContentExtractor>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let index = LocalIndex::open(
            config.index_path(),
            embedder.model_id(),
            embedder.dimensions(),
        )?;
        let index: SharedIndex = Arc::new(RwLock::new(Box::new(index)));

        let enricher = Enricher::new(store.clone(), extractor);
        let pipeline = SyncPipeline::new(
            store,
            enricher,
            embedder.clone(),
            index.clone(),
            config.sync.workers,
        );
        let search = SearchService::new(embedder, index.clone());

        Ok(Self {
            config,
            index,
            pipeline,
            search,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn search_templates(
        &self,
        query: &str,
        top_n: Option<usize>,
        from_date: Option<&str>,
        to_date: Option<&str>,
    ) -> Result<Vec<SearchHit>, AppError> {
        if query.trim().is_empty() {
            return Err(AppError::Validation("query must not be empty".to_string()));
        }

        let top_n = top_n.unwrap_or(self.config.search.default_results);
        Ok(self.search.search(query, top_n, from_date, to_date)?)
    }

    pub fn get_template(&self, id: &str) -> Result<TemplateInfo, AppError> {
        self.search.lookup(id).ok_or(AppError::NotFound)
    }

    pub fn list_template_ids(&self) -> Vec<String> {
        self.search.list_ids()
    }

    pub fn indexed_count(&self) -> usize {
        self.index.read().unwrap().len()
    }

    pub fn rebuild(&self, force_rescrape: bool) -> Result<SyncReport, AppError> {
        Ok(self.pipeline.rebuild(force_rescrape, &self.cancel)?)
    }

    pub fn repair(
        &self,
        force_rescrape: bool,
        batch_size: Option<usize>,
    ) -> Result<SyncReport, AppError> {
        Ok(self.pipeline.repair(force_rescrape, batch_size, &self.cancel)?)
    }

    pub fn refresh_metadata(&self) -> Result<usize, AppError> {
        Ok(self.pipeline.refresh_metadata()?)
    }

    /// Ask in-flight pipeline runs to stop between items.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Final durability barrier, called on process shutdown.
    pub fn shutdown(&self) {
        match self.index.read().unwrap().flush() {
            Ok(()) => log::info!("index flushed"),
            Err(err) => log::error!("final index flush failed: {err}"),
        }
    }
}
