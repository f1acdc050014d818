//! In-memory inverted index.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;

use crate::analysis::analyzer::{content_analyzer, name_analyzer};
use crate::analysis::PerFieldAnalyzer;
use crate::engine::{
    Document, FIELD_CONTENT, FIELD_NAME, SearchEngine, SearchHit, SearchRequest, SearchResults,
};
use crate::error::{Result, SearchError};
use crate::index::doc_id::DocumentId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TermKey {
    field: String,
    term: String,
}

#[derive(Debug, Default)]
struct IndexData {
    documents: AHashMap<DocumentId, Document>,
    /// term -> doc -> term frequency
    postings: AHashMap<TermKey, AHashMap<DocumentId, u32>>,
    /// Terms each document contributed, for removal.
    doc_terms: AHashMap<DocumentId, Vec<TermKey>>,
}

impl IndexData {
    fn remove(&mut self, id: DocumentId) -> Option<Document> {
        if let Some(terms) = self.doc_terms.remove(&id) {
            for key in terms {
                if let Some(docs) = self.postings.get_mut(&key) {
                    docs.remove(&id);
                    if docs.is_empty() {
                        self.postings.remove(&key);
                    }
                }
            }
        }
        self.documents.remove(&id)
    }

    fn doc_freq(&self, key: &TermKey) -> usize {
        self.postings.get(key).map_or(0, |docs| docs.len())
    }
}

/// An in-memory [`SearchEngine`].
///
/// `name` is tokenized on alphanumeric runs and `content` on Unicode word
/// boundaries, both lowercased. Other fields are stored only.
#[derive(Debug)]
pub struct MemoryIndex {
    analyzer: PerFieldAnalyzer,
    data: RwLock<IndexData>,
}

impl MemoryIndex {
    pub fn new() -> Result<Self> {
        let mut analyzer = PerFieldAnalyzer::stored_only();
        analyzer.add_analyzer(FIELD_NAME, Arc::new(name_analyzer()?));
        analyzer.add_analyzer(FIELD_CONTENT, Arc::new(content_analyzer()));
        Ok(Self::with_analyzer(analyzer))
    }

    pub fn with_analyzer(analyzer: PerFieldAnalyzer) -> Self {
        MemoryIndex {
            analyzer,
            data: RwLock::new(IndexData::default()),
        }
    }

    /// Number of distinct (field, term) pairs.
    pub fn term_count(&self) -> usize {
        self.data.read().postings.len()
    }

    fn analyze_document(&self, document: &Document) -> Result<AHashMap<TermKey, u32>> {
        let mut frequencies = AHashMap::new();
        for (field, value) in document.fields() {
            for token in self.analyzer.analyze_field(field, value)? {
                let key = TermKey {
                    field: field.to_string(),
                    term: token.text,
                };
                *frequencies.entry(key).or_insert(0) += 1;
            }
        }
        Ok(frequencies)
    }

    fn index_locked(
        data: &mut IndexData,
        id: DocumentId,
        document: Document,
        frequencies: AHashMap<TermKey, u32>,
    ) {
        let mut terms = Vec::with_capacity(frequencies.len());
        for (key, freq) in frequencies {
            data.postings
                .entry(key.clone())
                .or_default()
                .insert(id, freq);
            terms.push(key);
        }
        data.doc_terms.insert(id, terms);
        data.documents.insert(id, document);
    }

    fn search_fields(&self, request: &SearchRequest) -> Vec<String> {
        if request.fields.is_empty() {
            vec![FIELD_NAME.to_string(), FIELD_CONTENT.to_string()]
        } else {
            request
                .fields
                .iter()
                .filter(|field| self.analyzer.is_indexed(field))
                .cloned()
                .collect()
        }
    }
}

impl SearchEngine for MemoryIndex {
    fn upsert(&self, id: DocumentId, document: Document) -> Result<()> {
        let frequencies = self.analyze_document(&document)?;
        let mut data = self.data.write();
        data.remove(id);
        Self::index_locked(&mut data, id, document, frequencies);
        Ok(())
    }

    fn patch(&self, id: DocumentId, fields: Document) -> Result<()> {
        let mut data = self.data.write();
        let mut document = data
            .documents
            .get(&id)
            .cloned()
            .ok_or_else(|| SearchError::not_found(format!("document {id}")))?;
        document.merge(fields);

        let frequencies = self.analyze_document(&document)?;
        data.remove(id);
        Self::index_locked(&mut data, id, document, frequencies);
        Ok(())
    }

    fn delete(&self, id: DocumentId) -> Result<bool> {
        Ok(self.data.write().remove(id).is_some())
    }

    fn get(&self, id: DocumentId) -> Result<Option<Document>> {
        Ok(self.data.read().documents.get(&id).cloned())
    }

    fn search(&self, request: &SearchRequest) -> Result<SearchResults> {
        let fields = self.search_fields(request);
        let clauses: Vec<&str> = request.query.split_whitespace().collect();
        if clauses.is_empty() || fields.is_empty() {
            return Ok(SearchResults::default());
        }

        // Each clause becomes one alternative per field: the terms that
        // field's analyzer produces for it.
        let mut alternatives: Vec<Vec<Vec<TermKey>>> = Vec::with_capacity(clauses.len());
        for clause in &clauses {
            let mut per_field = Vec::with_capacity(fields.len());
            for field in &fields {
                let terms: Vec<TermKey> = self
                    .analyzer
                    .analyze_field(field, clause)?
                    .map(|token| TermKey {
                        field: field.clone(),
                        term: token.text,
                    })
                    .collect();
                if !terms.is_empty() {
                    per_field.push(terms);
                }
            }
            if per_field.is_empty() {
                // Nothing searchable in this clause, e.g. punctuation.
                continue;
            }
            alternatives.push(per_field);
        }
        if alternatives.is_empty() {
            return Ok(SearchResults::default());
        }

        let data = self.data.read();
        let total_docs = data.documents.len().max(1) as f32;

        let mut scores: Option<AHashMap<DocumentId, f32>> = None;
        for per_field in &alternatives {
            let mut clause_scores: AHashMap<DocumentId, f32> = AHashMap::new();
            for terms in per_field {
                let mut matching: Option<AHashSet<DocumentId>> = None;
                for key in terms {
                    let docs: AHashSet<DocumentId> = data
                        .postings
                        .get(key)
                        .map(|postings| postings.keys().copied().collect())
                        .unwrap_or_default();
                    matching = Some(match matching {
                        Some(current) => current.intersection(&docs).copied().collect(),
                        None => docs,
                    });
                }

                for id in matching.unwrap_or_default() {
                    let score: f32 = terms
                        .iter()
                        .map(|key| {
                            let tf = data
                                .postings
                                .get(key)
                                .and_then(|postings| postings.get(&id))
                                .copied()
                                .unwrap_or(0) as f32;
                            let idf = (1.0 + total_docs / data.doc_freq(key).max(1) as f32).ln();
                            tf.sqrt() * idf
                        })
                        .sum();
                    let entry = clause_scores.entry(id).or_insert(0.0);
                    *entry = entry.max(score);
                }
            }

            scores = Some(match scores {
                None => clause_scores,
                Some(previous) => previous
                    .into_iter()
                    .filter_map(|(id, score)| clause_scores.get(&id).map(|s| (id, score + s)))
                    .collect(),
            });
        }

        let mut ranked: Vec<(DocumentId, f32)> = scores.unwrap_or_default().into_iter().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let total_hits = ranked.len();
        let hits = ranked
            .into_iter()
            .take(request.limit)
            .filter_map(|(doc_id, score)| {
                data.documents.get(&doc_id).map(|document| SearchHit {
                    doc_id,
                    score,
                    document: document.clone(),
                })
            })
            .collect();

        Ok(SearchResults { total_hits, hits })
    }

    fn doc_count(&self) -> usize {
        self.data.read().documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::FIELD_PATH;

    fn doc(name: &str, content: &str) -> Document {
        Document::new()
            .with_field(FIELD_NAME, name)
            .with_field(FIELD_CONTENT, content)
            .with_field(FIELD_PATH, format!("/{name}"))
    }

    fn hits(index: &MemoryIndex, query: &str) -> Vec<DocumentId> {
        index
            .search(&SearchRequest::new(query))
            .unwrap()
            .hits
            .into_iter()
            .map(|hit| hit.doc_id)
            .collect()
    }

    #[test]
    fn test_upsert_and_search() {
        let index = MemoryIndex::new().unwrap();
        index
            .upsert(DocumentId::new(1), doc("a", "Lorem ipsum dolor sit amet"))
            .unwrap();
        index
            .upsert(DocumentId::new(2), doc("b", "consectetur sit"))
            .unwrap();

        assert_eq!(hits(&index, "dolor"), vec![DocumentId::new(1)]);
        assert_eq!(hits(&index, "SIT").len(), 2);
        assert!(hits(&index, "tortor").is_empty());
        assert_eq!(index.doc_count(), 2);
    }

    #[test]
    fn test_conjunctive_clauses() {
        let index = MemoryIndex::new().unwrap();
        index.upsert(DocumentId::new(1), doc("a", "lorem dolor")).unwrap();
        index.upsert(DocumentId::new(2), doc("b", "lorem sit")).unwrap();

        assert_eq!(hits(&index, "lorem dolor"), vec![DocumentId::new(1)]);
        assert_eq!(hits(&index, "lorem").len(), 2);
    }

    #[test]
    fn test_name_tokens() {
        let index = MemoryIndex::new().unwrap();
        index
            .upsert(DocumentId::new(7), doc("alpha_file1.txt", ""))
            .unwrap();

        assert_eq!(hits(&index, "alpha"), vec![DocumentId::new(7)]);
        assert_eq!(hits(&index, "file1"), vec![DocumentId::new(7)]);
    }

    #[test]
    fn test_stored_only_fields_not_searchable() {
        let index = MemoryIndex::new().unwrap();
        index.upsert(DocumentId::new(1), doc("a", "x")).unwrap();

        let results = index
            .search(&SearchRequest::new("a").with_fields([FIELD_PATH]))
            .unwrap();
        assert_eq!(results.total_hits, 0);
    }

    #[test]
    fn test_upsert_replaces_terms() {
        let index = MemoryIndex::new().unwrap();
        let id = DocumentId::new(3);
        index.upsert(id, doc("a", "dolor")).unwrap();
        index.upsert(id, doc("a", "tortor")).unwrap();

        assert!(hits(&index, "dolor").is_empty());
        assert_eq!(hits(&index, "tortor"), vec![id]);
        assert_eq!(index.doc_count(), 1);
    }

    #[test]
    fn test_patch_keeps_other_fields() {
        let index = MemoryIndex::new().unwrap();
        let id = DocumentId::new(4);
        index.upsert(id, doc("dolor.txt", "lorem")).unwrap();
        index
            .patch(id, Document::new().with_field(FIELD_NAME, "neque.txt"))
            .unwrap();

        assert!(hits(&index, "dolor").is_empty());
        assert_eq!(hits(&index, "neque"), vec![id]);
        assert_eq!(hits(&index, "lorem"), vec![id]);
    }

    #[test]
    fn test_patch_missing_document() {
        let index = MemoryIndex::new().unwrap();
        let err = index
            .patch(DocumentId::new(9), Document::new().with_field(FIELD_NAME, "x"))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete() {
        let index = MemoryIndex::new().unwrap();
        let id = DocumentId::new(5);
        index.upsert(id, doc("a", "tortor")).unwrap();

        assert!(index.delete(id).unwrap());
        assert!(!index.delete(id).unwrap());
        assert!(hits(&index, "tortor").is_empty());
        assert_eq!(index.term_count(), 0);
    }

    #[test]
    fn test_limit_and_total_hits() {
        let index = MemoryIndex::new().unwrap();
        for i in 0..5 {
            index
                .upsert(DocumentId::new(i), doc(&format!("f{i}"), "sit"))
                .unwrap();
        }

        let results = index
            .search(&SearchRequest::new("sit").with_limit(2))
            .unwrap();
        assert_eq!(results.total_hits, 5);
        assert_eq!(results.hits.len(), 2);
    }
}
