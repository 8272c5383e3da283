//! Mock context retriever with a fixed snippet set.

use async_trait::async_trait;
use qnwis::{ContextRetriever, Result, RetrievedSnippet};

/// Retriever that returns a fixed snippet list, truncated to `top_k`.
#[derive(Debug, Default, Clone)]
pub struct MockRetriever {
    snippets: Vec<RetrievedSnippet>,
}

impl MockRetriever {
    /// Empty retriever (equivalent to the null retriever).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a snippet.
    #[must_use]
    pub fn with_snippet(mut self, source: impl Into<String>, snippet: impl Into<String>) -> Self {
        let score = 1.0 - self.snippets.len() as f64 * 0.1;
        self.snippets.push(RetrievedSnippet {
            source: source.into(),
            snippet: snippet.into(),
            score,
        });
        self
    }
}

#[async_trait]
impl ContextRetriever for MockRetriever {
    async fn retrieve(&self, _query: &str, top_k: usize) -> Result<Vec<RetrievedSnippet>> {
        Ok(self.snippets.iter().take(top_k).cloned().collect())
    }
}
