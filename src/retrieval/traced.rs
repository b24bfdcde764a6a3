//! Tracing decorator for search backends.
//!
//! ```text
//! ┌─────────────────────┐
//! │ RetrievalReranker   │
//! └─────────┬───────────┘
//!           │ search()
//!           ▼
//! ┌─────────────────────┐
//! │  TracedBackend      │  ← span "retrieval.search"
//! │  • retrieval.backend│
//! │  • retrieval.limit  │
//! │  • retrieval.results│
//! └─────────┬───────────┘
//!           │ delegates
//!           ▼
//! ┌─────────────────────┐
//! │  Inner backend      │
//! └─────────────────────┘
//! ```

use async_trait::async_trait;
use tracing::{info_span, warn, Instrument};

use super::result::SearchResult;
use super::traits::SearchBackend;
use crate::error::Result;

/// Span attribute names.
pub mod attrs {
    pub const BACKEND: &str = "retrieval.backend";
    pub const LIMIT: &str = "retrieval.limit";
    pub const RESULTS: &str = "retrieval.results";
}

/// Wraps a backend and records a span around every search.
///
/// # Example
///
/// ```ignore
/// use edgequake_retrieval::{LexicalIndex, TracedBackend};
///
/// let traced = TracedBackend::new(LexicalIndex::new(docs));
/// ```
pub struct TracedBackend<B: SearchBackend> {
    inner: B,
}

impl<B: SearchBackend> TracedBackend<B> {
    pub fn new(inner: B) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

#[async_trait]
impl<B: SearchBackend> SearchBackend for TracedBackend<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        let span = info_span!(
            "retrieval.search",
            { attrs::BACKEND } = self.inner.name(),
            { attrs::LIMIT } = limit as i64,
            query_length = query.len(),
            { attrs::RESULTS } = tracing::field::Empty,
        );

        match self.inner.search(query, limit).instrument(span.clone()).await {
            Ok(results) => {
                span.record(attrs::RESULTS, results.len() as i64);
                Ok(results)
            }
            Err(e) => {
                let _guard = span.enter();
                warn!(backend = self.inner.name(), error = %e, "Search backend failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::MockBackend;

    #[tokio::test]
    async fn test_delegates_to_inner() {
        let traced = TracedBackend::new(
            MockBackend::new("dense").with_results(vec![SearchResult::dense("a", "", 0.5)]),
        );
        assert_eq!(traced.name(), "dense");
        assert_eq!(traced.search("q", 10).await.unwrap().len(), 1);
        assert_eq!(traced.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn test_propagates_errors() {
        let traced = TracedBackend::new(MockBackend::new("dense"));
        traced.inner().fail_next("down");
        assert!(traced.search("q", 10).await.is_err());
    }
}
