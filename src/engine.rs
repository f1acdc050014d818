//! Search engine seam.
//!
//! The indexer only ever talks to a [`SearchEngine`]: it upserts whole
//! documents, patches single fields on rename and deletes documents when
//! their content block is unreferenced. [`memory::MemoryIndex`] is the
//! in-process implementation used by tests and benches.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::doc_id::DocumentId;

pub mod memory;

/// Entry name. Indexed.
pub const FIELD_NAME: &str = "name";
/// Extracted content. Indexed.
pub const FIELD_CONTENT: &str = "content";
/// Full path inside the TLF. Stored only.
pub const FIELD_PATH: &str = "path";
/// Owning TLF. Stored only.
pub const FIELD_TLF: &str = "tlf";

/// A document: an ordered set of named text fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    fields: BTreeMap<String, String>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_field(field, value);
        self
    }

    pub fn set_field(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Overwrite the fields present in `other`, keeping the rest.
    pub fn merge(&mut self, other: Document) {
        self.fields.extend(other.fields);
    }
}

/// A full-text query.
///
/// Whitespace separates clauses; every clause must match at least one of
/// the searched fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Fields to search. Empty means every indexed field.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        SearchRequest {
            query: query.into(),
            fields: Vec::new(),
            limit: default_limit(),
        }
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: DocumentId,
    pub score: f32,
    pub document: Document,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Number of matching documents before `limit` was applied.
    pub total_hits: usize,
    pub hits: Vec<SearchHit>,
}

/// The index the indexer keeps in sync with the filesystem.
///
/// Implementations guard their own data; the indexer mutates from a single
/// worker thread while searches run concurrently.
pub trait SearchEngine: Send + Sync + std::fmt::Debug {
    /// Insert or fully replace the document stored under `id`.
    fn upsert(&self, id: DocumentId, document: Document) -> Result<()>;

    /// Replace only the given fields of an existing document.
    ///
    /// Fails with `NotFound` when `id` is not indexed.
    fn patch(&self, id: DocumentId, fields: Document) -> Result<()>;

    /// Remove a document. Returns whether it existed.
    fn delete(&self, id: DocumentId) -> Result<bool>;

    fn get(&self, id: DocumentId) -> Result<Option<Document>>;

    fn search(&self, request: &SearchRequest) -> Result<SearchResults>;

    fn doc_count(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_merge() {
        let mut doc = Document::new()
            .with_field(FIELD_NAME, "a")
            .with_field(FIELD_CONTENT, "lorem");
        doc.merge(Document::new().with_field(FIELD_NAME, "b"));

        assert_eq!(doc.get_field(FIELD_NAME), Some("b"));
        assert_eq!(doc.get_field(FIELD_CONTENT), Some("lorem"));
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn test_search_request_from_json() {
        let request: SearchRequest = serde_json::from_str(r#"{"query": "dolor"}"#).unwrap();
        assert_eq!(request.query, "dolor");
        assert!(request.fields.is_empty());
        assert_eq!(request.limit, 10);
    }
}
