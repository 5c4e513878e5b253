//! Integration tests for the synchronization pipeline: rebuild, repair,
//! metadata refresh, failure isolation, and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::common::{make_pipeline, open_index, record, FixedExtractor, MemStore, MockEmbedder};
use crate::extract::ExtractedPage;
use crate::templates::TemplateStore;

fn no_cancel() -> AtomicBool {
    AtomicBool::new(false)
}

#[test]
fn test_rebuild_indexes_every_template() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::with_records(vec![
        record("a", "Alpha", &["first"]),
        record("b", "Beta", &["second"]),
        record("c", "Gamma", &["third"]),
    ]));
    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store,
        Arc::new(FixedExtractor::default()),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    let report = pipeline.rebuild(false, &no_cancel()).unwrap();

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.total, 3);

    let ids = index.read().unwrap().ids();
    assert_eq!(ids.len(), 3);
    assert!(ids.contains("a") && ids.contains("b") && ids.contains("c"));
}

#[test]
fn test_rebuild_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::with_records(vec![
        record("a", "Alpha", &["first"]),
        record("b", "Beta", &["second"]),
    ]));
    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store,
        Arc::new(FixedExtractor::default()),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    pipeline.rebuild(false, &no_cancel()).unwrap();
    let first_ids = index.read().unwrap().ids();
    let first_docs: Vec<String> = {
        let guard = index.read().unwrap();
        let mut docs: Vec<String> = first_ids
            .iter()
            .map(|id| guard.get(id).unwrap().document)
            .collect();
        docs.sort();
        docs
    };

    pipeline.rebuild(false, &no_cancel()).unwrap();
    let second_ids = index.read().unwrap().ids();
    let second_docs: Vec<String> = {
        let guard = index.read().unwrap();
        let mut docs: Vec<String> = second_ids
            .iter()
            .map(|id| guard.get(id).unwrap().document)
            .collect();
        docs.sort();
        docs
    };

    assert_eq!(first_ids, second_ids);
    assert_eq!(first_docs, second_docs);
}

#[test]
fn test_rebuild_removes_orphaned_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::with_records(vec![
        record("keep", "Keep", &["stay"]),
        record("gone", "Gone", &["leave"]),
    ]));
    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store.clone(),
        Arc::new(FixedExtractor::default()),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    pipeline.rebuild(false, &no_cancel()).unwrap();
    assert_eq!(index.read().unwrap().len(), 2);

    store.remove("gone");
    pipeline.rebuild(false, &no_cancel()).unwrap();

    let ids = index.read().unwrap().ids();
    assert_eq!(ids.len(), 1);
    assert!(ids.contains("keep"));
    assert!(!ids.contains("gone"));
}

#[test]
fn test_repair_processes_only_missing_templates() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::with_records(vec![
        record("a", "Alpha", &["first"]),
        record("b", "Beta", &["second"]),
        record("c", "Gamma", &["third"]),
    ]));
    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store.clone(),
        Arc::new(FixedExtractor::default()),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    // seed the index with only "a"
    {
        use crate::semantic::{synthesize, EmbeddingProvider, EntryMetadata};

        let embedder = MockEmbedder::default();
        let store_record = store.get("a").unwrap().unwrap();
        let document = synthesize(&store_record);
        let vector = embedder.embed(&document).unwrap();
        let metadata = EntryMetadata::from_record(&store_record);
        index
            .write()
            .unwrap()
            .upsert("a", vector, document, metadata)
            .unwrap();
    }

    let report = pipeline.repair(false, None, &no_cancel()).unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.total, 2);

    let ids = index.read().unwrap().ids();
    assert_eq!(ids.len(), 3);
}

#[test]
fn test_repair_batched_has_same_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let records: Vec<_> = (0..7)
        .map(|i| record(&format!("t{i}"), &format!("Template {i}"), &["kw"]))
        .collect();
    let store = Arc::new(MemStore::with_records(records));
    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store,
        Arc::new(FixedExtractor::default()),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    let report = pipeline.repair(false, Some(2), &no_cancel()).unwrap();

    assert_eq!(report.succeeded, 7);
    assert_eq!(report.total, 7);
    assert_eq!(index.read().unwrap().len(), 7);
}

#[test]
fn test_repair_with_nothing_missing_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::with_records(vec![record("a", "Alpha", &["x"])]));
    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store,
        Arc::new(FixedExtractor::default()),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    pipeline.rebuild(false, &no_cancel()).unwrap();
    let report = pipeline.repair(false, None, &no_cancel()).unwrap();

    assert_eq!(report.succeeded, 0);
    assert_eq!(report.total, 0);
}

#[test]
fn test_embedding_failure_does_not_abort_batch() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::with_records(vec![
        record("ok1", "Fine", &["good"]),
        record("bad", "Poisoned", &["doomedtoken"]),
        record("ok2", "AlsoFine", &["good"]),
    ]));
    let index = open_index(dir.path());
    let embedder = MockEmbedder {
        fail_on: Some("doomedtoken".to_string()),
        ..Default::default()
    };
    let pipeline = make_pipeline(
        store,
        Arc::new(FixedExtractor::default()),
        Arc::new(embedder),
        index.clone(),
    );

    let report = pipeline.rebuild(false, &no_cancel()).unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, 2);

    let ids = index.read().unwrap().ids();
    assert!(ids.contains("ok1") && ids.contains("ok2"));
    assert!(!ids.contains("bad"));
}

#[test]
fn test_cancelled_run_leaves_index_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::with_records(vec![
        record("a", "Alpha", &["first"]),
        record("b", "Beta", &["second"]),
    ]));
    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store,
        Arc::new(FixedExtractor::default()),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    let cancel = AtomicBool::new(true);
    let report = pipeline.rebuild(false, &cancel).unwrap();

    assert_eq!(report.succeeded, 0);
    assert_eq!(index.read().unwrap().len(), 0);
}

#[test]
fn test_enrichment_flows_into_document_and_store() {
    let dir = tempfile::tempdir().unwrap();
    let mut rec = record("sourced", "Sourced", &["kw"]);
    rec.source = Some("http://example.com/page".to_string());
    let store = Arc::new(MemStore::with_records(vec![rec]));

    let extractor = Arc::new(FixedExtractor {
        page: ExtractedPage {
            main_text: "fetched description text".to_string(),
            aside_text: Some("sidebar".to_string()),
            published_at: Some("2021-06-01".to_string()),
        },
        ..Default::default()
    });

    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store.clone(),
        extractor.clone(),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    let report = pipeline.rebuild(false, &no_cancel()).unwrap();
    assert_eq!(report.succeeded, 1);

    // document carries the scraped description
    let entry = index.read().unwrap().get("sourced").unwrap();
    assert!(entry.document.contains("Description: fetched description text"));
    assert_eq!(entry.metadata.added_at.as_deref(), Some("2021-06-01"));
    assert!(entry.metadata.added_at_ts.is_some());

    // write-through updated the store
    let saved = store.get("sourced").unwrap().unwrap();
    assert_eq!(saved.scraped_text.as_deref(), Some("fetched description text"));
    assert_eq!(saved.aside_text.as_deref(), Some("sidebar"));
}

#[test]
fn test_already_scraped_template_skips_extractor() {
    let dir = tempfile::tempdir().unwrap();
    let mut rec = record("cached", "Cached", &["kw"]);
    rec.source = Some("http://example.com/page".to_string());
    rec.scraped_text = Some("already present".to_string());
    let store = Arc::new(MemStore::with_records(vec![rec]));

    let extractor = Arc::new(FixedExtractor::default());
    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store.clone(),
        extractor.clone(),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    pipeline.rebuild(false, &no_cancel()).unwrap();
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);

    let saved = store.get("cached").unwrap().unwrap();
    assert_eq!(saved.scraped_text.as_deref(), Some("already present"));

    // force_rescrape overrides the skip
    pipeline.rebuild(true, &no_cancel()).unwrap();
    assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_refresh_metadata_preserves_vector_and_document() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::with_records(vec![record("a", "Alpha", &["x"])]));
    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store.clone(),
        Arc::new(FixedExtractor::default()),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    pipeline.rebuild(false, &no_cancel()).unwrap();
    let before = index.read().unwrap().get("a").unwrap();
    assert!(before.metadata.added_at_ts.is_none());

    // change only bookkeeping fields in the store
    let mut updated = store.get("a").unwrap().unwrap();
    updated.added_at = Some("2022-03-04".to_string());
    store.insert(updated);

    let refreshed = pipeline.refresh_metadata().unwrap();
    assert_eq!(refreshed, 1);

    let after = index.read().unwrap().get("a").unwrap();
    assert_eq!(after.vector, before.vector);
    assert_eq!(after.document, before.document);
    assert_eq!(after.metadata.added_at.as_deref(), Some("2022-03-04"));
    assert!(after.metadata.added_at_ts.is_some());
}

#[test]
fn test_refresh_metadata_skips_vanished_templates() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::with_records(vec![
        record("stays", "Stays", &["x"]),
        record("vanishes", "Vanishes", &["y"]),
    ]));
    let index = open_index(dir.path());
    let pipeline = make_pipeline(
        store.clone(),
        Arc::new(FixedExtractor::default()),
        Arc::new(MockEmbedder::default()),
        index.clone(),
    );

    pipeline.rebuild(false, &no_cancel()).unwrap();
    store.remove("vanishes");

    let refreshed = pipeline.refresh_metadata().unwrap();

    assert_eq!(refreshed, 1);
    // the vanished id keeps its entry; removal is the rebuild's job
    assert!(index.read().unwrap().get("vanishes").is_some());
}

#[test]
fn test_index_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemStore::with_records(vec![record("a", "Alpha", &["x"])]));

    {
        let index = open_index(dir.path());
        let pipeline = make_pipeline(
            store.clone(),
            Arc::new(FixedExtractor::default()),
            Arc::new(MockEmbedder::default()),
            index,
        );
        pipeline.rebuild(false, &no_cancel()).unwrap();
    }

    // reopen from disk
    let index = open_index(dir.path());
    assert_eq!(index.read().unwrap().len(), 1);
    assert!(index.read().unwrap().get("a").is_some());
}
