//! Simulated dense retrieval: feature-hashed term vectors + cosine similarity.
//!
//! ```ascii
//! text ─► tokens ─┬─► unigrams
//!                 └─► character trigrams (fuzzy overlap: "async" ~ "asyncio")
//!                          │
//!                          ▼ hash(feature) mod dims, signed
//!                    [f32; dims] ─► L2 normalize ─► cosine = dot product
//! ```
//!
//! Stands in for an embedding model + vector index; the return contract
//! (`dense_score` populated, best first) is the same.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::result::{Document, SearchResult};
use super::tokenize::{tokenize, TokenizerConfig};
use super::traits::SearchBackend;
use crate::error::Result;

const DEFAULT_DIMENSIONS: usize = 256;
const TRIGRAM_WEIGHT: f32 = 0.5;

/// Brute-force cosine index over hashed feature vectors.
#[derive(Debug, Clone)]
pub struct DenseIndex {
    documents: Vec<Document>,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
    min_similarity: f64,
    tokenizer: TokenizerConfig,
}

impl DenseIndex {
    /// Build with 256 dimensions.
    pub fn new(documents: Vec<Document>) -> Self {
        Self::with_dimensions(documents, DEFAULT_DIMENSIONS)
    }

    /// Build with a custom vector size.
    pub fn with_dimensions(documents: Vec<Document>, dimensions: usize) -> Self {
        let dimensions = dimensions.max(8);
        let tokenizer = TokenizerConfig::default();
        let vectors = documents
            .iter()
            .map(|d| embed(&d.indexed_text(), dimensions, &tokenizer))
            .collect();
        Self {
            documents,
            vectors,
            dimensions,
            min_similarity: 0.0,
            tokenizer,
        }
    }

    /// Drop candidates whose similarity is at or below `threshold`.
    pub fn with_min_similarity(mut self, threshold: f64) -> Self {
        self.min_similarity = threshold;
        self
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Cosine similarity of `query` against every document, best first.
    pub fn similarities(&self, query: &str) -> Vec<(usize, f64)> {
        let query_vec = embed(query, self.dimensions, &self.tokenizer);
        let mut scored: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(idx, v)| (idx, dot(&query_vec, v) as f64))
            .filter(|(_, s)| *s > self.min_similarity)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored
    }
}

#[async_trait]
impl SearchBackend for DenseIndex {
    fn name(&self) -> &str {
        "dense"
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        Ok(self
            .similarities(query)
            .into_iter()
            .take(limit)
            .map(|(idx, score)| {
                let doc = &self.documents[idx];
                SearchResult::dense(doc.id.clone(), doc.content.clone(), score)
                    .with_title(doc.title.clone())
            })
            .collect())
    }
}

fn bucket(feature: &str, dimensions: usize) -> (usize, f32) {
    let mut hasher = DefaultHasher::new();
    feature.hash(&mut hasher);
    let h = hasher.finish();
    let index = (h % dimensions as u64) as usize;
    let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
    (index, sign)
}

/// L2-normalized hashed feature vector for `text`.
fn embed(text: &str, dimensions: usize, tokenizer: &TokenizerConfig) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimensions];

    for token in tokenize(text, tokenizer) {
        let (i, sign) = bucket(&token, dimensions);
        vector[i] += sign;

        let padded: Vec<char> = format!("#{}#", token).chars().collect();
        for gram in padded.windows(3) {
            let gram: String = gram.iter().collect();
            let (i, sign) = bucket(&gram, dimensions);
            vector[i] += sign * TRIGRAM_WEIGHT;
        }
    }

    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
