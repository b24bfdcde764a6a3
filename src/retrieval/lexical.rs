//! In-memory BM25 index used as the lexical retrieval backend.
//!
//! # Algorithm
//!
//! ```ascii
//! BM25+:
//! score = Σ IDF(q) × (f(q,D)×(k1+1) / (f(q,D) + k1×(1-b+b×|D|/avgdl)) + delta)
//!
//! IDF(q) = ln((N - n(q) + 0.5) / (n(q) + 0.5) + 1)
//! ```
//!
//! Term statistics are computed once at construction. Raw scores are divided
//! by the best score of the query so `lexical_score` lands in `[0, 1]` and
//! stays comparable to cosine similarities in weighted fusion.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use super::result::{Document, SearchResult};
use super::tokenize::{tokenize, TokenizerConfig};
use super::traits::SearchBackend;
use crate::error::Result;

/// BM25 lexical index over a fixed corpus.
///
/// # Presets
///
/// | Preset | k1 | b | delta |
/// |--------|----|----|-------|
/// | `new()` | 1.5 | 0.75 | 0 |
/// | `bm25_plus()` | 1.5 | 0.75 | 1.0 |
/// | `for_short_docs()` | 1.2 | 0.3 | 0 |
///
/// # Example
///
/// ```
/// use edgequake_retrieval::{Document, LexicalIndex};
///
/// let index = LexicalIndex::new(vec![
///     Document::new("1", "tokio runtime internals"),
///     Document::new("2", "garbage collection pauses"),
/// ]);
/// assert_eq!(index.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct LexicalIndex {
    documents: Vec<Document>,
    doc_terms: Vec<Vec<String>>,
    doc_freq: HashMap<String, usize>,
    avgdl: f64,
    k1: f64,
    b: f64,
    delta: f64,
    normalize_scores: bool,
    tokenizer: TokenizerConfig,
}

impl LexicalIndex {
    /// Build with default parameters (k1=1.5, b=0.75).
    pub fn new(documents: Vec<Document>) -> Self {
        Self::build(documents, 1.5, 0.75, 0.0, TokenizerConfig::default())
    }

    /// BM25+ (delta=1.0) for long documents.
    pub fn bm25_plus(documents: Vec<Document>) -> Self {
        Self::build(documents, 1.5, 0.75, 1.0, TokenizerConfig::default())
    }

    /// Preset for titles and short snippets.
    pub fn for_short_docs(documents: Vec<Document>) -> Self {
        Self::build(documents, 1.2, 0.3, 0.0, TokenizerConfig::default())
    }

    /// Build with explicit parameters.
    pub fn with_params(documents: Vec<Document>, k1: f64, b: f64, delta: f64) -> Self {
        Self::build(
            documents,
            k1.clamp(0.0, 3.0),
            b.clamp(0.0, 1.0),
            delta.max(0.0),
            TokenizerConfig::default(),
        )
    }

    /// Rebuild with a different tokenizer.
    pub fn with_tokenizer(self, tokenizer: TokenizerConfig) -> Self {
        Self::build(self.documents, self.k1, self.b, self.delta, tokenizer)
    }

    /// Return raw BM25 scores instead of max-normalized ones.
    pub fn with_raw_scores(mut self) -> Self {
        self.normalize_scores = false;
        self
    }

    fn build(
        documents: Vec<Document>,
        k1: f64,
        b: f64,
        delta: f64,
        tokenizer: TokenizerConfig,
    ) -> Self {
        let doc_terms: Vec<Vec<String>> = documents
            .iter()
            .map(|d| tokenize(&d.indexed_text(), &tokenizer))
            .collect();

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for terms in &doc_terms {
            let unique: HashSet<&String> = terms.iter().collect();
            for term in unique {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
        }

        let avgdl = (doc_terms.iter().map(Vec::len).sum::<usize>() as f64
            / doc_terms.len().max(1) as f64)
            .max(1.0);

        Self {
            documents,
            doc_terms,
            doc_freq,
            avgdl,
            k1,
            b,
            delta,
            normalize_scores: true,
            tokenizer,
        }
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[inline]
    fn idf(&self, n: f64, df: f64) -> f64 {
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn bm25(&self, query_terms: &[String], doc_terms: &[String]) -> f64 {
        let n = self.documents.len() as f64;
        let length_norm = 1.0 - self.b + self.b * (doc_terms.len() as f64 / self.avgdl);

        let mut score = 0.0;
        for term in query_terms {
            let tf = doc_terms.iter().filter(|t| *t == term).count() as f64;
            if tf > 0.0 {
                let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
                let tf_component = (tf * (self.k1 + 1.0)) / (tf + self.k1 * length_norm);
                score += self.idf(n, df) * (tf_component + self.delta);
            }
        }
        score
    }

    /// Score every document, best first; documents without a match are omitted.
    pub fn score(&self, query: &str) -> Vec<(usize, f64)> {
        let query_terms = tokenize(query, &self.tokenizer);
        if query_terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = self
            .doc_terms
            .iter()
            .enumerate()
            .map(|(idx, terms)| (idx, self.bm25(&query_terms, terms)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored
    }
}

#[async_trait]
impl SearchBackend for LexicalIndex {
    fn name(&self) -> &str {
        "bm25"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let mut scored = self.score(query);
        scored.truncate(limit);

        let max_score = scored.first().map(|(_, s)| *s).unwrap_or(1.0);
        Ok(scored
            .into_iter()
            .map(|(idx, raw)| {
                let doc = &self.documents[idx];
                let score = if self.normalize_scores {
                    raw / max_score
                } else {
                    raw
                };
                SearchResult::lexical(doc.id.clone(), doc.content.clone(), score)
                    .with_title(doc.title.clone())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<Document> {
        vec![
            Document::new("rust", "Rust async runtime with tokio tasks and futures"),
            Document::new("python", "Python asyncio event loop and coroutines"),
            Document::new("garden", "Growing tomatoes in a small garden"),
        ]
    }

    #[tokio::test]
    async fn test_search_ranks_matching_document_first() {
        let index = LexicalIndex::new(corpus());
        let results = index.search("tokio futures", 10).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "rust");
        assert!(results[0].lexical_retrieval);
        assert_eq!(results[0].lexical_score, 1.0);
    }

    #[tokio::test]
    async fn test_search_respects_limit_and_order() {
        let index = LexicalIndex::new(corpus());
        let results = index.search("async runtime event loop", 1).await.unwrap();
        assert_eq!(results.len(), 1);

        let all = index.search("async runtime event loop", 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].lexical_score >= all[1].lexical_score);
    }

    #[tokio::test]
    async fn test_stop_word_query_returns_nothing() {
        let index = LexicalIndex::new(corpus());
        assert!(index.search("the and of", 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_bm25_plus_scores_higher_than_plain() {
        let plain = LexicalIndex::new(corpus()).with_raw_scores();
        let plus = LexicalIndex::bm25_plus(corpus()).with_raw_scores();
        let a = plain.score("tomatoes")[0].1;
        let b = plus.score("tomatoes")[0].1;
        assert!(b > a);
    }

    #[test]
    fn test_idf_is_non_negative() {
        let index = LexicalIndex::new(corpus());
        assert!(index.idf(3.0, 3.0) > 0.0);
    }
}
