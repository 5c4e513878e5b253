//! Synchronization pipeline: keeps the vector index consistent with the
//! template store.
//!
//! Three modes share one per-item sequence (enrich -> synthesize -> embed ->
//! upsert) running on a bounded worker pool:
//!
//! - full rebuild: process every template, then delete orphaned entries
//! - incremental repair: process only templates missing from the index
//! - metadata refresh: rewrite metadata blocks without re-embedding
//!
//! Item failures are terminal per item and never abort the batch. A failing
//! `flush` is fatal to the whole run.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

use serde::Serialize;

use crate::enrich::Enricher;
use crate::semantic::document::synthesize;
use crate::semantic::embedder::{EmbeddingError, EmbeddingProvider};
use crate::semantic::index::{EntryMetadata, IndexError};
use crate::semantic::SharedIndex;
use crate::templates::{StoreError, TemplateRecord, TemplateStore};

/// Errors that are fatal to a whole pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("template store error: {0}")]
    Store(#[from] StoreError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

/// Why a single item failed. Failures are logged with the template id and
/// reduce the success count; the batch keeps going.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("embedding failed: {0}")]
    Embed(#[from] EmbeddingError),

    #[error("index write failed: {0}")]
    Persist(#[from] IndexError),
}

/// Per-item progress through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemState {
    Enriching,
    Synthesizing,
    Embedding,
    Persisted,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemState::Enriching => "enriching",
            ItemState::Synthesizing => "synthesizing",
            ItemState::Embedding => "embedding",
            ItemState::Persisted => "persisted",
        };
        write!(f, "{name}")
    }
}

/// Counters for one batch run.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncReport {
    pub succeeded: usize,
    pub total: usize,
}

pub struct SyncPipeline {
    store: Arc<dyn TemplateStore>,
    enricher: Enricher,
    embedder: Arc<dyn EmbeddingProvider>,
    index: SharedIndex,
    workers: usize,
}

impl SyncPipeline {
    pub fn new(
        store: Arc<dyn TemplateStore>,
        enricher: Enricher,
        embedder: Arc<dyn EmbeddingProvider>,
        index: SharedIndex,
        workers: u16,
    ) -> Self {
        Self {
            store,
            enricher,
            embedder,
            index,
            workers: workers.max(1) as usize,
        }
    }

    /// Run one template through enrich -> synthesize -> embed -> upsert.
    fn process_record(
        &self,
        record: &TemplateRecord,
        force_rescrape: bool,
    ) -> Result<(), ItemError> {
        let id = record.id.clone();

        log::debug!("template {id}: {}", ItemState::Enriching);
        let record = match self.enricher.enrich(record, force_rescrape) {
            Ok(enriched) => enriched,
            Err(err) => {
                // stale or absent page content is still indexable
                log::warn!("template {id}: enrichment failed, continuing without fresh content: {err}");
                record.clone()
            }
        };

        log::debug!("template {id}: {}", ItemState::Synthesizing);
        let document = synthesize(&record);

        log::debug!("template {id}: {}", ItemState::Embedding);
        let vector = self.embedder.embed(&document)?;

        let metadata = EntryMetadata::from_record(&record);
        self.index
            .write()
            .unwrap()
            .upsert(&id, vector, document, metadata)?;

        log::debug!("template {id}: {}", ItemState::Persisted);
        Ok(())
    }

    /// Process records on the worker pool. Per-item failures are logged and
    /// counted, never propagated. Cancellation stops workers between items;
    /// already-persisted entries stay persisted.
    fn run_batch(
        &self,
        records: Vec<TemplateRecord>,
        force_rescrape: bool,
        cancel: &AtomicBool,
    ) -> SyncReport {
        let total = records.len();
        if total == 0 {
            return SyncReport::default();
        }

        let succeeded = AtomicUsize::new(0);
        let workers = self.workers.min(total);

        let (tx, rx) = mpsc::channel::<TemplateRecord>();
        let rx = Mutex::new(rx);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if cancel.load(Ordering::Relaxed) {
                        break;
                    }

                    let record = match rx.lock().unwrap().recv() {
                        Ok(record) => record,
                        Err(_) => break,
                    };

                    match self.process_record(&record, force_rescrape) {
                        Ok(()) => {
                            succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => log::error!("template {}: {err}", record.id),
                    }
                });
            }

            for record in records {
                if tx.send(record).is_err() {
                    break;
                }
            }
            drop(tx);
        });

        SyncReport {
            succeeded: succeeded.load(Ordering::Relaxed),
            total,
        }
    }

    /// Re-embed every template in the store, then delete index entries whose
    /// ids are no longer in the store's truth set.
    ///
    /// The rebuild is additive: existing entries are replaced in place and
    /// orphans removed at the end, so the index never serves an empty
    /// snapshot mid-run.
    pub fn rebuild(
        &self,
        force_rescrape: bool,
        cancel: &AtomicBool,
    ) -> Result<SyncReport, PipelineError> {
        log::info!("starting full rebuild");

        let records = self.store.list_all()?;
        let true_ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();

        let report = self.run_batch(records, force_rescrape, cancel);

        if !cancel.load(Ordering::Relaxed) {
            let indexed = self.index.read().unwrap().ids();
            let orphans: Vec<String> = indexed.difference(&true_ids).cloned().collect();
            if !orphans.is_empty() {
                log::info!("removing {} orphaned entries", orphans.len());
                self.index.write().unwrap().delete_many(&orphans);
            }
        }

        self.index.read().unwrap().flush()?;

        log::info!(
            "rebuild finished: {}/{} templates indexed",
            report.succeeded,
            report.total
        );
        Ok(report)
    }

    /// Process only templates missing from the index, optionally in
    /// fixed-size chunks. Chunking only paces the work; the outcome is the
    /// same either way.
    pub fn repair(
        &self,
        force_rescrape: bool,
        batch_size: Option<usize>,
        cancel: &AtomicBool,
    ) -> Result<SyncReport, PipelineError> {
        let records = self.store.list_all()?;
        let indexed = self.index.read().unwrap().ids();

        let missing: Vec<TemplateRecord> = records
            .into_iter()
            .filter(|r| !indexed.contains(&r.id))
            .collect();

        let total = missing.len();
        if total == 0 {
            log::info!("no missing templates found");
            return Ok(SyncReport::default());
        }

        log::info!("found {total} templates without embeddings");

        let chunk_size = batch_size.filter(|&n| n > 0).unwrap_or(total);
        let batches = total.div_ceil(chunk_size);

        let mut succeeded = 0;
        for (i, chunk) in missing.chunks(chunk_size).enumerate() {
            if cancel.load(Ordering::Relaxed) {
                log::warn!("repair cancelled after {i}/{batches} batches");
                break;
            }

            log::info!("processing batch {}/{batches} ({} templates)", i + 1, chunk.len());
            let report = self.run_batch(chunk.to_vec(), force_rescrape, cancel);
            log::info!(
                "batch {}/{batches} complete: {}/{} successful",
                i + 1,
                report.succeeded,
                report.total
            );
            succeeded += report.succeeded;
        }

        self.index.read().unwrap().flush()?;

        Ok(SyncReport { succeeded, total })
    }

    /// Recompute the metadata block for every indexed template without
    /// touching vectors or documents. Skips ids that have vanished from the
    /// store; removing those is the rebuild's job.
    pub fn refresh_metadata(&self) -> Result<usize, PipelineError> {
        let mut ids: Vec<String> = self.index.read().unwrap().ids().into_iter().collect();
        ids.sort();

        let mut refreshed = 0;
        for id in ids {
            match self.store.get(&id) {
                Ok(Some(record)) => {
                    let metadata = EntryMetadata::from_record(&record);
                    match self.index.write().unwrap().update_metadata(&id, metadata) {
                        Ok(()) => refreshed += 1,
                        Err(err) => log::error!("template {id}: metadata update failed: {err}"),
                    }
                }
                Ok(None) => {
                    log::debug!("template {id} no longer in store, leaving entry untouched")
                }
                Err(err) => log::error!("template {id}: store read failed: {err}"),
            }
        }

        self.index.read().unwrap().flush()?;

        log::info!("refreshed metadata for {refreshed} entries");
        Ok(refreshed)
    }
}
