//! Deterministic scripted provider.
//!
//! Replays canned responses in order, optionally keyed by a substring of
//! the last user message. Backs tests and offline operation; also the
//! reference implementation of the streaming contract.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream;

use super::{ChatRequest, ChatResponse, LlmProvider, Role, TokenStream, TokenUsage};
use crate::error::ProviderError;

/// A provider that replays scripted responses.
///
/// Responses are served FIFO; keyed responses take priority when the last
/// user message contains their key. An exhausted script fails with
/// [`ProviderError::Unavailable`], which exercises every fallback path
/// deterministically.
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<String>>,
    keyed: Mutex<Vec<(String, String)>>,
    fail_next: Mutex<u32>,
}

impl ScriptedProvider {
    /// Creates a provider with an ordered response script.
    #[must_use]
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(responses.into_iter().map(Into::into).collect()),
            keyed: Mutex::new(Vec::new()),
            fail_next: Mutex::new(0),
        }
    }

    /// Creates a provider with an empty script (every call fails).
    #[must_use]
    pub fn unavailable() -> Self {
        Self::new(Vec::<String>::new())
    }

    /// Registers a response served whenever the last user message
    /// contains `key`.
    #[must_use]
    pub fn with_keyed(self, key: &str, response: &str) -> Self {
        if let Ok(mut keyed) = self.keyed.lock() {
            keyed.push((key.to_string(), response.to_string()));
        }
        self
    }

    /// Makes the next `n` calls fail before the script resumes, for
    /// retry-path tests.
    #[must_use]
    pub fn failing_first(self, n: u32) -> Self {
        if let Ok(mut fail) = self.fail_next.lock() {
            *fail = n;
        }
        self
    }

    fn next_response(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        if let Ok(mut fail) = self.fail_next.lock()
            && *fail > 0
        {
            *fail -= 1;
            return Err(ProviderError::Unavailable {
                reason: "scripted transient failure".to_string(),
                attempts: 1,
            });
        }

        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        if let Ok(keyed) = self.keyed.lock()
            && let Some((_, response)) = keyed.iter().find(|(k, _)| last_user.contains(k.as_str()))
        {
            return Ok(response.clone());
        }

        self.queue
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .ok_or_else(|| ProviderError::Unavailable {
                reason: "script exhausted".to_string(),
                attempts: 1,
            })
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let content = self.next_response(request)?;
        #[allow(clippy::cast_possible_truncation)]
        let completion_tokens = (content.len() / 4) as u32;
        Ok(ChatResponse {
            content,
            usage: TokenUsage {
                prompt_tokens: 0,
                completion_tokens,
                total_tokens: completion_tokens,
            },
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<TokenStream, ProviderError> {
        let content = self.next_response(request)?;
        // Stream word-by-word to exercise ordered reassembly downstream
        let words: Vec<Result<String, ProviderError>> = content
            .split_inclusive(' ')
            .map(|w| Ok(w.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(words)))
    }
}
