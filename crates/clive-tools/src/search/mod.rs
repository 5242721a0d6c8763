//! In-memory knowledge index with BM25 ranking.
//!
//! Documents are tokenized on non-alphanumeric boundaries, case-folded.
//! Scores are Okapi BM25 (`k1 = 1.2`, `b = 0.75`) over the whole index, with
//! title tokens counted twice. Higher is better. Tag filters are conjunctive.

use std::collections::HashMap;

use async_trait::async_trait;
use clive_core::text::truncate_with_suffix;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::ToolError;
use crate::traits::{KnowledgeSearch, SearchHit, SearchQuery};

const TITLE_WEIGHT: f64 = 2.0;
const K1: f64 = 1.2;
const B: f64 = 0.75;
const SNIPPET_BYTES: usize = 160;
const SNIPPET_LEAD: usize = 40;

/// A searchable document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeDocument {
    /// Unique id. Inserting an existing id replaces the document.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Body text.
    pub content: String,
    /// Free-form tags (`convention`, `jest`, `plan`, ...).
    #[serde(default)]
    pub tags: Vec<String>,
}

/// [`KnowledgeSearch`] over documents held in memory.
#[derive(Debug)]
pub struct InMemoryKnowledgeIndex {
    docs: RwLock<Vec<KnowledgeDocument>>,
    default_limit: usize,
}

impl InMemoryKnowledgeIndex {
    /// Empty index returning at most `default_limit` hits when the query
    /// sets no limit.
    pub fn new(default_limit: usize) -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            default_limit: default_limit.max(1),
        }
    }

    /// Index seeded with `docs`.
    pub fn with_documents(default_limit: usize, docs: impl IntoIterator<Item = KnowledgeDocument>) -> Self {
        let index = Self::new(default_limit);
        for doc in docs {
            index.insert(doc);
        }
        index
    }

    /// Add or replace a document.
    pub fn insert(&self, doc: KnowledgeDocument) {
        let mut docs = self.docs.write();
        if let Some(existing) = docs.iter_mut().find(|d| d.id == doc.id) {
            *existing = doc;
        } else {
            docs.push(doc);
        }
    }

    /// Remove a document. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let mut docs = self.docs.write();
        let before = docs.len();
        docs.retain(|d| d.id != id);
        docs.len() != before
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    fn rank(&self, query: &SearchQuery) -> Vec<SearchHit> {
        let terms = tokenize(&query.text);
        let limit = query.limit.unwrap_or(self.default_limit);
        let docs = self.docs.read();
        let weighted: Vec<Weighted> = docs.iter().map(Weighted::of).collect();
        let bm25 = Bm25::new(&weighted, &terms);

        let mut hits: Vec<SearchHit> = docs
            .iter()
            .zip(&weighted)
            .filter(|(doc, _)| query.tags.iter().all(|t| doc.tags.contains(t)))
            .filter_map(|(doc, counts)| {
                let score = bm25.score(counts);
                if !terms.is_empty() && score <= 0.0 {
                    return None;
                }
                Some(SearchHit {
                    id: doc.id.clone(),
                    title: doc.title.clone(),
                    snippet: snippet(&doc.content, &terms),
                    score,
                    tags: doc.tags.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        hits
    }
}

#[async_trait]
impl KnowledgeSearch for InMemoryKnowledgeIndex {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, ToolError> {
        if query.limit == Some(0) {
            return Err(ToolError::InvalidInput {
                message: "limit must be at least 1".into(),
            });
        }
        let hits = self.rank(query);
        tracing::debug!(query = %query.text, hits = hits.len(), "knowledge search");
        Ok(hits)
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Term frequencies of one document, title tokens counted `TITLE_WEIGHT`
/// times.
struct Weighted {
    counts: HashMap<String, f64>,
    len: f64,
}

impl Weighted {
    fn of(doc: &KnowledgeDocument) -> Self {
        let mut counts = HashMap::new();
        let mut len = 0.0;
        for (text, weight) in [(&doc.title, TITLE_WEIGHT), (&doc.content, 1.0)] {
            for token in tokenize(text) {
                *counts.entry(token).or_insert(0.0) += weight;
                len += weight;
            }
        }
        Self { counts, len }
    }
}

/// Per-term inverse document frequency and average length of the index.
struct Bm25 {
    idf: Vec<(String, f64)>,
    avg_len: f64,
}

impl Bm25 {
    #[allow(clippy::cast_precision_loss)]
    fn new(corpus: &[Weighted], terms: &[String]) -> Self {
        let n = corpus.len() as f64;
        let avg_len = if corpus.is_empty() {
            0.0
        } else {
            corpus.iter().map(|doc| doc.len).sum::<f64>() / n
        };
        let idf = terms
            .iter()
            .map(|term| {
                let df = corpus.iter().filter(|doc| doc.counts.contains_key(term)).count() as f64;
                // Never negative, so a term in every document still counts.
                (term.clone(), ((n - df + 0.5) / (df + 0.5)).ln_1p())
            })
            .collect();
        Self { idf, avg_len }
    }

    fn score(&self, doc: &Weighted) -> f64 {
        let norm = if self.avg_len > 0.0 { doc.len / self.avg_len } else { 1.0 };
        self.idf
            .iter()
            .map(|(term, idf)| {
                let tf = doc.counts.get(term).copied().unwrap_or(0.0);
                if tf <= 0.0 {
                    return 0.0;
                }
                idf * tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * norm))
            })
            .sum()
    }
}

/// Excerpt starting a little before the first matching term.
fn snippet(content: &str, terms: &[String]) -> String {
    let lower = content.to_lowercase();
    let first = terms
        .iter()
        .filter_map(|t| lower.find(t.as_str()))
        .min()
        .unwrap_or(0);
    let mut start = first.saturating_sub(SNIPPET_LEAD);
    // Lowercasing can shift byte offsets for some scripts; snap to a boundary.
    start = start.min(content.len());
    while start > 0 && !content.is_char_boundary(start) {
        start -= 1;
    }
    let body = truncate_with_suffix(content[start..].trim_start(), SNIPPET_BYTES, "...");
    if start > 0 { format!("...{body}") } else { body }
}
