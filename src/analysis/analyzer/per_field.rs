//! Per-field analyzer.

use std::sync::Arc;

use ahash::AHashMap;

use crate::analysis::analyzer::Analyzer;
use crate::analysis::token::TokenStream;
use crate::error::Result;

/// Applies a different analyzer to each field.
///
/// Fields without an analyzer (and no default) are stored but not indexed.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
///
/// use vfs_search::analysis::analyzer::{content_analyzer, name_analyzer};
/// use vfs_search::analysis::PerFieldAnalyzer;
///
/// let mut analyzer = PerFieldAnalyzer::stored_only();
/// analyzer.add_analyzer("content", Arc::new(content_analyzer()));
/// analyzer.add_analyzer("name", Arc::new(name_analyzer().unwrap()));
///
/// assert!(analyzer.is_indexed("name"));
/// assert!(!analyzer.is_indexed("path"));
/// ```
#[derive(Clone, Default)]
pub struct PerFieldAnalyzer {
    default_analyzer: Option<Arc<dyn Analyzer>>,
    field_analyzers: AHashMap<String, Arc<dyn Analyzer>>,
}

impl PerFieldAnalyzer {
    /// Create a per-field analyzer that analyzes unknown fields with `default_analyzer`.
    pub fn new(default_analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            default_analyzer: Some(default_analyzer),
            field_analyzers: AHashMap::new(),
        }
    }

    /// Create a per-field analyzer that leaves unknown fields unindexed.
    pub fn stored_only() -> Self {
        Self::default()
    }

    pub fn add_analyzer(&mut self, field: impl Into<String>, analyzer: Arc<dyn Analyzer>) {
        self.field_analyzers.insert(field.into(), analyzer);
    }

    pub fn get_analyzer(&self, field: &str) -> Option<&Arc<dyn Analyzer>> {
        self.field_analyzers
            .get(field)
            .or(self.default_analyzer.as_ref())
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.get_analyzer(field).is_some()
    }

    /// Analyze text with the analyzer for the given field. Unindexed fields
    /// produce no tokens.
    pub fn analyze_field(&self, field: &str, text: &str) -> Result<TokenStream> {
        match self.get_analyzer(field) {
            Some(analyzer) => analyzer.analyze(text),
            None => Ok(Box::new(std::iter::empty())),
        }
    }
}

impl std::fmt::Debug for PerFieldAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut fields: Vec<_> = self
            .field_analyzers
            .iter()
            .map(|(field, analyzer)| (field.as_str(), analyzer.name()))
            .collect();
        fields.sort_unstable();
        f.debug_struct("PerFieldAnalyzer")
            .field("default", &self.default_analyzer.as_ref().map(|a| a.name()))
            .field("fields", &fields)
            .finish()
    }
}
