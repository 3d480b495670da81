//! Retry decorator for embedding providers.
//!
//! Applies the bounded backoff schedule (1s, 2s, 4s, capped at 10s; at
//! most 3 attempts) around any [`Embedder`]. Retries live here and in the
//! brainstorm engine only; every other suspension point fails fast.

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::Embedder;
use crate::error::ProviderError;

/// Maximum attempts before surfacing `ProviderError::Unavailable`.
const MAX_ATTEMPTS: u32 = 3;
/// First backoff delay.
const BASE_DELAY: Duration = Duration::from_secs(1);
/// Backoff ceiling.
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Wraps an embedder with bounded exponential backoff.
pub struct RetryingEmbedder<E> {
    inner: E,
    max_attempts: u32,
}

impl<E: Embedder> RetryingEmbedder<E> {
    /// Wraps `inner` with the default schedule.
    #[must_use]
    pub const fn new(inner: E) -> Self {
        Self {
            inner,
            max_attempts: MAX_ATTEMPTS,
        }
    }

    /// Overrides the attempt bound (still capped by the delay ceiling).
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Delay before retry `attempt` (1-based): 1s, 2s, 4s, ... capped.
    fn delay_for(attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = BASE_DELAY.saturating_mul(2u32.saturating_pow(exp));
        delay.min(MAX_DELAY)
    }
}

#[async_trait]
impl<E: Embedder> Embedder for RetryingEmbedder<E> {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut last_reason = String::new();

        for attempt in 1..=self.max_attempts {
            match self.inner.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(ProviderError::DimensionMismatch { got, expected }) => {
                    // Not transient; retrying cannot change the outcome
                    return Err(ProviderError::DimensionMismatch { got, expected });
                }
                Err(e) => {
                    last_reason = e.to_string();
                    if attempt < self.max_attempts {
                        let delay = Self::delay_for(attempt);
                        warn!(
                            attempt,
                            max = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            "embedding attempt failed, backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(ProviderError::Unavailable {
            reason: last_reason,
            attempts: self.max_attempts,
        })
    }
}
