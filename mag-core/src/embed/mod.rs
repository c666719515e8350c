//! Embedding and completion backends, and the batching/retry layer the
//! indexer and search paths share.

mod ollama;

pub use ollama::OllamaBackend;

use crate::concurrency::{CancellationToken, ConcurrencyLimit};
use crate::config::IndexingConfig;
use crate::error::MagError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Turns text into fixed-dimension vectors
pub trait EmbeddingProvider: Send + Sync {
    /// Backend identifier recorded in the index, e.g. `ollama/nomic-embed-text`
    fn id(&self) -> String;

    /// One vector per input text, in input order
    fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;

    /// Cheap reachability probe
    fn health_check(&self) -> crate::Result<()> {
        Ok(())
    }
}

/// Single-turn chat completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Generates text for explanations
pub trait CompletionProvider: Send + Sync {
    fn id(&self) -> String;

    fn complete(&self, request: &CompletionRequest) -> crate::Result<String>;
}

/// Exponential backoff for transient embedding failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IndexingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial: Duration::from_millis(config.retry_initial_ms),
            max: Duration::from_millis(config.retry_max_ms),
        }
    }

    /// No retries; used for interactive queries
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            initial: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Provider wrapper with batching, retry, a concurrency cap and a call counter.
///
/// Shared by all indexing workers; the cap holds no matter how many workers
/// call in at once.
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    retry: RetryPolicy,
    limit: ConcurrencyLimit,
    calls: AtomicUsize,
}

impl Embedder {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &IndexingConfig) -> Self {
        Self {
            provider,
            batch_size: config.embed_batch_size.max(1),
            retry: RetryPolicy::from_config(config),
            limit: ConcurrencyLimit::new(config.embed_concurrency),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider_id(&self) -> String {
        self.provider.id()
    }

    /// Backend calls made so far, retries included
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn concurrency(&self) -> usize {
        self.limit.permits()
    }

    /// Probe the backend; any failure means it is unavailable
    pub fn health_check(&self) -> crate::Result<()> {
        self.provider.health_check().map_err(|e| match e {
            MagError::BackendUnavailable(_) => e,
            other => MagError::BackendUnavailable(other.to_string()),
        })
    }

    /// Embed every text, in batches, keeping input order
    pub fn embed_all(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> crate::Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        let mut dimension: Option<usize> = None;

        for batch in texts.chunks(self.batch_size) {
            let batch_vectors = self.embed_batch(batch, cancel)?;
            for vector in &batch_vectors {
                match dimension {
                    None => dimension = Some(vector.len()),
                    Some(d) if d != vector.len() => {
                        return Err(MagError::embedding(
                            format!("backend returned mixed dimensions ({} and {})", d, vector.len()),
                            false,
                        ));
                    }
                    Some(_) => {}
                }
            }
            vectors.extend(batch_vectors);
        }

        Ok(vectors)
    }

    /// Embed a single text, e.g. a search query
    pub fn embed_one(&self, text: &str, cancel: &CancellationToken) -> crate::Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()], cancel)?;
        vectors
            .pop()
            .ok_or_else(|| MagError::embedding("backend returned no vector", false))
    }

    fn embed_batch(
        &self,
        batch: &[String],
        cancel: &CancellationToken,
    ) -> crate::Result<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(MagError::Cancelled);
            }
            attempt += 1;

            let result = {
                let _permit = self.limit.acquire();
                self.calls.fetch_add(1, Ordering::Relaxed);
                self.provider.embed(batch)
            };

            let err = match result {
                Ok(vectors) if vectors.len() == batch.len() => return Ok(vectors),
                Ok(vectors) => MagError::embedding(
                    format!("expected {} vectors, got {}", batch.len(), vectors.len()),
                    false,
                ),
                Err(e) => e,
            };

            if !err.is_transient() || attempt >= self.retry.max_attempts {
                debug!(attempt, error = %err, "embedding batch failed");
                return Err(err);
            }

            let delay = self.retry.delay(attempt);
            warn!(attempt, ?delay, error = %err, "transient embedding failure, retrying");
            sleep_unless_cancelled(delay, cancel);
        }
    }
}

/// Sleep in short steps so cancellation is noticed during backoff
fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) {
    const STEP: Duration = Duration::from_millis(50);
    let mut remaining = delay;
    while !remaining.is_zero() && !cancel.is_cancelled() {
        let step = remaining.min(STEP);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}
