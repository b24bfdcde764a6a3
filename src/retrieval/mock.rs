//! Scripted search backend for tests.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ MockBackend                                │
//! │  ├── results      (returned, cut to limit) │
//! │  ├── failures     (consumed first)         │
//! │  ├── latency      (slept via Clock)        │
//! │  └── call_count / last_limit               │
//! └────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::result::SearchResult;
use super::traits::SearchBackend;
use crate::clock::SharedClock;
use crate::error::{Result, RetrievalError};

/// Mock backend returning a fixed result list.
///
/// # Example
///
/// ```
/// use edgequake_retrieval::{MockBackend, SearchResult};
///
/// let backend = MockBackend::new("dense")
///     .with_results(vec![SearchResult::dense("a", "doc a", 0.9)]);
/// backend.fail_next("index offline");
/// ```
#[derive(Debug, Clone)]
pub struct MockBackend {
    name: String,
    results: Arc<Mutex<Vec<SearchResult>>>,
    failures: Arc<Mutex<VecDeque<String>>>,
    latency: Option<(SharedClock, Duration)>,
    call_count: Arc<AtomicUsize>,
    last_limit: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            results: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            latency: None,
            call_count: Arc::new(AtomicUsize::new(0)),
            last_limit: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the scripted result list.
    pub fn with_results(self, results: Vec<SearchResult>) -> Self {
        *self.results.lock() = results;
        self
    }

    /// Sleep `latency` on `clock` before answering.
    pub fn with_latency(mut self, clock: SharedClock, latency: Duration) -> Self {
        self.latency = Some((clock, latency));
        self
    }

    /// Replace the scripted result list.
    pub fn set_results(&self, results: Vec<SearchResult>) {
        *self.results.lock() = results;
    }

    /// Make the next call fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        self.failures.lock().push_back(message.into());
    }

    /// Number of `search` calls so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// `limit` passed to the most recent call.
    pub fn last_limit(&self) -> usize {
        self.last_limit.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.last_limit.store(limit, Ordering::SeqCst);

        if let Some((clock, latency)) = &self.latency {
            clock.sleep(*latency).await;
        }

        let failure = self.failures.lock().pop_front();
        if let Some(message) = failure {
            return Err(RetrievalError::backend(self.name.clone(), message));
        }

        let results = self.results.lock();
        Ok(results.iter().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_scripted_results_up_to_limit() {
        let backend = MockBackend::new("dense").with_results(vec![
            SearchResult::dense("a", "", 0.9),
            SearchResult::dense("b", "", 0.8),
        ]);
        let results = backend.search("q", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.last_limit(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let backend = MockBackend::new("lexical");
        backend.fail_next("boom");

        let err = backend.search("q", 5).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Backend { .. }));
        assert!(backend.search("q", 5).await.is_ok());
    }
}
