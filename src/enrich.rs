//! Content enrichment: fold fetched page content into template records.

use std::sync::Arc;

use crate::extract::{ContentExtractor, FetchError};
use crate::templates::{StoreError, TemplateRecord, TemplateStore};

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("write-through failed: {0}")]
    Store(#[from] StoreError),
}

/// Fetches a template's source page and writes the extracted content back
/// into the template store. Idempotent per template: once `scraped_text` is
/// present, further calls are no-ops unless forced.
pub struct Enricher {
    store: Arc<dyn TemplateStore>,
    extractor: Arc<dyn ContentExtractor>,
}

impl Enricher {
    pub fn new(store: Arc<dyn TemplateStore>, extractor: Arc<dyn ContentExtractor>) -> Self {
        Self { store, extractor }
    }

    /// Enrich a record from its source URL.
    ///
    /// Returns the record unchanged when there is nothing to do. On extractor
    /// failure the error propagates and the caller keeps its own copy of the
    /// record; enrichment failure never poisons the record itself.
    pub fn enrich(
        &self,
        record: &TemplateRecord,
        force: bool,
    ) -> Result<TemplateRecord, EnrichError> {
        let source = match &record.source {
            Some(source) if !source.is_empty() => source,
            _ => return Ok(record.clone()),
        };

        if !force && record.scraped_text.as_deref().is_some_and(|t| !t.is_empty()) {
            return Ok(record.clone());
        }

        let page = self.extractor.extract(source)?;

        let mut enriched = record.clone();
        enriched.scraped_text = Some(page.main_text);
        if page.aside_text.is_some() {
            enriched.aside_text = page.aside_text;
        }
        if page.published_at.is_some() {
            enriched.added_at = page.published_at;
        }

        self.store.save(&enriched)?;

        Ok(enriched)
    }
}
