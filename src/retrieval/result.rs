//! Retrieved candidate type.
//!
//! A [`SearchResult`] is created by a backend, merged in place by fusion and
//! (optionally) rescored by the cross-encoder before the final top-k trim.
//!
//! ```ascii
//! backend ──► dense_score / lexical_score
//!    fusion ──► fused_score   (final_score = fused_score)
//!      rerank ──► rerank_score (final_score = rerank_score)
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Provenance tag: which retrieval path surfaced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    /// Vector (embedding) nearest-neighbour search.
    Dense,
    /// Term-overlap (BM25-style) search.
    Lexical,
}

impl RetrievalSource {
    /// Stable tag string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dense => "dense",
            Self::Lexical => "lexical",
        }
    }
}

impl fmt::Display for RetrievalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A corpus entry held by the simulated indexes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            content: content.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Title and body joined for indexing.
    pub fn indexed_text(&self) -> String {
        if self.title.is_empty() {
            self.content.clone()
        } else {
            format!("{} {}", self.title, self.content)
        }
    }
}

/// One retrieved candidate.
///
/// `final_score` always holds the most authoritative score computed so far:
/// the fused score after fusion, the rerank score once reranked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Stable document identifier.
    pub id: String,
    /// Document body.
    pub content: String,
    /// Document title.
    #[serde(default)]
    pub title: String,
    /// Score from dense retrieval (0 if not surfaced by dense).
    #[serde(default)]
    pub dense_score: f64,
    /// Score from lexical retrieval (0 if not surfaced by lexical).
    #[serde(default)]
    pub lexical_score: f64,
    /// Score after fusion.
    #[serde(default)]
    pub fused_score: f64,
    /// Cross-encoder score, if reranked.
    #[serde(default)]
    pub rerank_score: Option<f64>,
    /// Most authoritative score so far.
    #[serde(default)]
    pub final_score: f64,
    /// Surfaced by dense retrieval.
    #[serde(default)]
    pub dense_retrieval: bool,
    /// Surfaced by lexical retrieval.
    #[serde(default)]
    pub lexical_retrieval: bool,
    /// Every retrieval path that surfaced this id, in arrival order.
    #[serde(default)]
    pub sources: Vec<RetrievalSource>,
    /// Whether the cross-encoder rescored this result.
    #[serde(default)]
    pub was_reranked: bool,
    /// Share of the rerank latency attributed to this result.
    #[serde(default)]
    pub rerank_latency_ms: Option<f64>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SearchResult {
    fn empty(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            title: String::new(),
            dense_score: 0.0,
            lexical_score: 0.0,
            fused_score: 0.0,
            rerank_score: None,
            final_score: 0.0,
            dense_retrieval: false,
            lexical_retrieval: false,
            sources: Vec::new(),
            was_reranked: false,
            rerank_latency_ms: None,
            metadata: HashMap::new(),
        }
    }

    /// Create a result surfaced by dense retrieval.
    pub fn dense(id: impl Into<String>, content: impl Into<String>, score: f64) -> Self {
        let mut result = Self::empty(id, content);
        result.dense_score = score;
        result.final_score = score;
        result.dense_retrieval = true;
        result.sources.push(RetrievalSource::Dense);
        result
    }

    /// Create a result surfaced by lexical retrieval.
    pub fn lexical(id: impl Into<String>, content: impl Into<String>, score: f64) -> Self {
        let mut result = Self::empty(id, content);
        result.lexical_score = score;
        result.final_score = score;
        result.lexical_retrieval = true;
        result.sources.push(RetrievalSource::Lexical);
        result
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether both retrieval methods surfaced this id.
    pub fn has_cross_method_agreement(&self) -> bool {
        self.sources.contains(&RetrievalSource::Dense)
            && self.sources.contains(&RetrievalSource::Lexical)
    }

    /// Fold another result for the same id into this one.
    ///
    /// Scores from the other path are copied over, provenance is appended.
    pub(crate) fn absorb(&mut self, other: &SearchResult) {
        if other.dense_retrieval {
            self.dense_retrieval = true;
            self.dense_score = other.dense_score;
        }
        if other.lexical_retrieval {
            self.lexical_retrieval = true;
            self.lexical_score = other.lexical_score;
        }
        for source in &other.sources {
            if !self.sources.contains(source) {
                self.sources.push(*source);
            }
        }
        if self.title.is_empty() && !other.title.is_empty() {
            self.title = other.title.clone();
        }
        if self.content.is_empty() {
            self.content = other.content.clone();
        }
        for (key, value) in &other.metadata {
            self.metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Record the fused score; it becomes the final score.
    pub(crate) fn set_fused_score(&mut self, score: f64) {
        self.fused_score = score;
        self.final_score = score;
    }

    /// Record the cross-encoder score; it becomes the final score.
    pub(crate) fn set_rerank_score(&mut self, score: f64) {
        self.rerank_score = Some(score);
        self.final_score = score;
        self.was_reranked = true;
    }
}
