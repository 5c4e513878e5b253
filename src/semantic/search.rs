//! Read-side retrieval: query embedding, date filtering, result assembly.

use std::sync::Arc;

use serde::Serialize;

use crate::semantic::embedder::{EmbeddingError, EmbeddingProvider};
use crate::semantic::index::{DateFilter, IndexError, QueryMatch};
use crate::semantic::SharedIndex;
use crate::templates::TemplateRecord;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub template_id: String,
    pub name: String,
    pub text_zones: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
    /// `1 - cosine distance`; higher is more similar.
    pub similarity: f32,
    pub config: TemplateRecord,
}

/// Direct lookup result, no ranking involved.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateInfo {
    pub template_id: String,
    pub name: String,
    pub text_zones: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added_at: Option<String>,
    pub config: TemplateRecord,
}

pub struct SearchService {
    embedder: Arc<dyn EmbeddingProvider>,
    index: SharedIndex,
}

impl SearchService {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: SharedIndex) -> Self {
        Self { embedder, index }
    }

    /// Search templates by natural-language text, optionally restricted to a
    /// `YYYY-MM-DD` date window.
    ///
    /// Results preserve the index's ranking order: ascending distance, so
    /// non-increasing similarity. An unsatisfiable date range yields an
    /// empty list, not an error.
    pub fn search(
        &self,
        query: &str,
        top_n: usize,
        from_date: Option<&str>,
        to_date: Option<&str>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        log::info!("searching templates with query: {query}");

        let filter = build_date_filter(from_date, to_date)?;

        let query_vector = self.embedder.embed(query)?;

        let matches = self
            .index
            .read()
            .unwrap()
            .query(&query_vector, top_n, filter.as_ref())?;

        log::info!("found {} matching templates", matches.len());
        Ok(matches.into_iter().map(hit_from_match).collect())
    }

    /// Fetch a template directly by id, without semantic search.
    pub fn lookup(&self, template_id: &str) -> Option<TemplateInfo> {
        let entry = self.index.read().unwrap().get(template_id)?;

        Some(TemplateInfo {
            template_id: template_id.to_string(),
            name: entry.metadata.name,
            text_zones: entry.metadata.text_zones,
            added_at: entry.metadata.added_at,
            config: decode_config(template_id, &entry.metadata.config_json),
        })
    }

    /// All currently indexed template ids, sorted.
    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.read().unwrap().ids().into_iter().collect();
        ids.sort();
        ids
    }
}

fn hit_from_match(m: QueryMatch) -> SearchHit {
    let config = decode_config(&m.id, &m.metadata.config_json);
    SearchHit {
        template_id: m.id,
        name: m.metadata.name,
        text_zones: m.metadata.text_zones,
        added_at: m.metadata.added_at,
        similarity: 1.0 - m.distance,
        config,
    }
}

fn decode_config(id: &str, config_json: &str) -> TemplateRecord {
    serde_json::from_str(config_json).unwrap_or_else(|err| {
        log::error!("template {id}: stored config snapshot is unreadable: {err}");
        TemplateRecord {
            id: id.to_string(),
            ..Default::default()
        }
    })
}

/// Convert day-granular bounds into an epoch-second filter. The `from` day
/// starts at 00:00:00 UTC and the `to` day is inclusive through 23:59:59.
fn build_date_filter(
    from_date: Option<&str>,
    to_date: Option<&str>,
) -> Result<Option<DateFilter>, SearchError> {
    if from_date.is_none() && to_date.is_none() {
        return Ok(None);
    }

    let mut filter = DateFilter::default();

    if let Some(from) = from_date {
        let date = parse_day(from)?;
        filter.min_ts = date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
    }

    if let Some(to) = to_date {
        let date = parse_day(to)?;
        filter.max_ts = date
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp());
    }

    Ok(Some(filter))
}

fn parse_day(value: &str) -> Result<chrono::NaiveDate, SearchError> {
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| SearchError::InvalidDate(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_filter_none_when_no_dates() {
        assert!(build_date_filter(None, None).unwrap().is_none());
    }

    #[test]
    fn test_build_filter_from_is_day_start() {
        let filter = build_date_filter(Some("1970-01-02"), None).unwrap().unwrap();
        assert_eq!(filter.min_ts, Some(86_400));
        assert_eq!(filter.max_ts, None);
    }

    #[test]
    fn test_build_filter_to_is_day_end_inclusive() {
        let filter = build_date_filter(None, Some("1970-01-01")).unwrap().unwrap();
        assert_eq!(filter.max_ts, Some(86_399));
    }

    #[test]
    fn test_build_filter_both_bounds() {
        let filter = build_date_filter(Some("2020-01-01"), Some("2020-12-31"))
            .unwrap()
            .unwrap();
        assert!(filter.min_ts.unwrap() < filter.max_ts.unwrap());
    }

    #[test]
    fn test_malformed_date_rejected() {
        let err = build_date_filter(Some("01/02/2020"), None).unwrap_err();
        assert!(matches!(err, SearchError::InvalidDate(_)));

        let err = build_date_filter(None, Some("soon")).unwrap_err();
        assert!(matches!(err, SearchError::InvalidDate(_)));
    }

    #[test]
    fn test_inverted_range_builds_unsatisfiable_filter() {
        // not an error; the filter just matches nothing
        let filter = build_date_filter(Some("2020-01-01"), Some("2019-01-01"))
            .unwrap()
            .unwrap();
        assert!(filter.min_ts.unwrap() > filter.max_ts.unwrap());
    }
}
