//! Canonical search text synthesis.
//!
//! Builds the single string that gets embedded for a template. Pure and
//! deterministic: the same record always yields the same document, and that
//! document is stored next to its vector so the two never drift apart.

use crate::templates::TemplateRecord;

/// Build the searchable document for a template.
///
/// Segments appear in a fixed order and are joined with single spaces.
/// A segment whose source field is absent, empty, or reduces to zero valid
/// entries is omitted entirely rather than emitted empty.
pub fn synthesize(record: &TemplateRecord) -> String {
    let mut parts = vec![];

    if let Some(name) = &record.name {
        if !name.is_empty() {
            parts.push(format!("Name: {name}"));
        }
    }

    let keywords = record.valid_keywords();
    if !keywords.is_empty() {
        parts.push(format!("Keywords: {}", keywords.join(", ")));
    }

    if let Some(source) = &record.source {
        if !source.is_empty() {
            parts.push(format!("Source: {source}"));
        }
    }

    if let Some(example) = &record.example {
        let entries = example.valid_entries();
        if !entries.is_empty() {
            parts.push(format!("Example: {}", entries.join(" ")));
        }
    }

    if let Some(text) = &record.scraped_text {
        if !text.is_empty() {
            parts.push(format!("Description: {text}"));
        }
    }

    parts.join(" ")
}
