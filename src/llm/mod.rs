//! Provider-agnostic LLM seam.
//!
//! These types decouple every LLM-assisted component (intent parsing,
//! context headers, graph extraction, brainstorm generation, small talk)
//! from any specific vendor SDK. The crate ships no vendor adapter; a
//! deterministic [`ScriptedProvider`] backs tests and offline operation.

mod scripted;

pub use scripted::ScriptedProvider;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Role of a chat message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender.
    pub role: Role,
    /// Message content.
    pub content: String,
}

/// A chat completion request (provider-agnostic).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Ordered conversation messages.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature (0.0 = deterministic).
    pub temperature: Option<f32>,
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Request JSON-formatted output.
    pub json_mode: bool,
}

/// Token usage statistics from a completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens generated in the completion.
    pub completion_tokens: u32,
    /// Total tokens used.
    pub total_tokens: u32,
}

/// A chat completion response (provider-agnostic).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Generated text content.
    pub content: String,
    /// Token usage statistics.
    pub usage: TokenUsage,
    /// Finish reason from the model (e.g. `"stop"`, `"length"`).
    pub finish_reason: Option<String>,
}

/// Item type yielded by [`LlmProvider::chat_stream`].
pub type TokenStream =
    Pin<Box<dyn Stream<Item = std::result::Result<String, ProviderError>> + Send>>;

/// Trait for LLM provider back-ends.
///
/// Implementations handle the transport layer for a specific provider
/// while presenting a uniform interface. Every method is a suspension
/// point.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name (e.g. `"openai"`, `"scripted"`).
    fn name(&self) -> &'static str;

    /// Executes a chat completion request.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on transport failures, timeouts, or
    /// parse errors.
    async fn chat(&self, request: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError>;

    /// Executes a streaming chat completion request, yielding text
    /// fragments in generation order.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on connection or streaming failures.
    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> std::result::Result<TokenStream, ProviderError>;
}

/// Creates a system message.
#[must_use]
pub fn system_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::System,
        content: content.to_string(),
    }
}

/// Creates a user message.
#[must_use]
pub fn user_message(content: &str) -> ChatMessage {
    ChatMessage {
        role: Role::User,
        content: content.to_string(),
    }
}

/// Builds a minimal one-shot request with deterministic sampling.
#[must_use]
pub fn oneshot_request(model: &str, system: &str, user: &str, json_mode: bool) -> ChatRequest {
    ChatRequest {
        model: model.to_string(),
        messages: vec![system_message(system), user_message(user)],
        temperature: Some(0.0),
        max_tokens: Some(2048),
        json_mode,
    }
}
