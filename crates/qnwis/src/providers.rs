//! Seams to external collaborators: LLM completion and context retrieval.
//!
//! The orchestrator makes no assumption about model identity; routing
//! decisions are based on its own input, never on the provider. A null
//! retriever is a valid deployment — the rag stage then completes with an
//! empty payload.

use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// Token accounting reported by a provider call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,
    /// Tokens generated
    pub completion_tokens: u32,
}

impl Usage {
    /// Total tokens for the call.
    #[must_use]
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A completed generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text
    pub text: String,
    /// Token usage
    pub usage: Usage,
}

/// Streamed text chunks.
pub type CompletionStream = BoxStream<'static, Result<String>>;

/// LLM completion provider.
///
/// Implementations wrap a vendor SDK; the pipeline only ever sees text in,
/// text out. Agents never issue data queries through this seam — facts are
/// prefetched and verified separately.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a completion.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        stop: Option<&[String]>,
    ) -> Result<Completion>;

    /// Generate a completion as a stream of text chunks.
    ///
    /// The default buffers [`CompletionProvider::complete`] into a single
    /// chunk; providers with native streaming override it.
    async fn complete_streaming(
        &self,
        prompt: &str,
        max_tokens: u32,
        stop: Option<&[String]>,
    ) -> Result<CompletionStream> {
        let completion = self.complete(prompt, max_tokens, stop).await?;
        Ok(Box::pin(futures::stream::once(async move {
            Ok(completion.text)
        })))
    }
}

/// One retrieved context snippet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedSnippet {
    /// Where the snippet came from
    pub source: String,
    /// The snippet text
    pub snippet: String,
    /// Relevance score, higher is better
    pub score: f64,
}

/// Context retriever for the rag stage. Opaque to the core.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Retrieve up to `top_k` snippets for a query.
    async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedSnippet>>;
}

/// Retriever that returns nothing; the rag stage completes empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRetriever;

#[async_trait]
impl ContextRetriever for NullRetriever {
    async fn retrieve(&self, _query: &str, _top_k: usize) -> Result<Vec<RetrievedSnippet>> {
        Ok(Vec::new())
    }
}

/// Provider that always fails; used where a provider is required by
/// construction but a deployment intentionally runs deterministic-only.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableProvider;

#[async_trait]
impl CompletionProvider for UnavailableProvider {
    async fn complete(
        &self,
        _prompt: &str,
        _max_tokens: u32,
        _stop: Option<&[String]>,
    ) -> Result<Completion> {
        Err(Error::Provider("no completion provider configured".to_string()))
    }
}
