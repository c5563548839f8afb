//! Summarization port, provider adapters, prompt cache and conversation memory.
//!
//! The execution engine talks to [`ConversationManager`], which owns the
//! prompt cache and applies the memory strategy before delegating to a
//! [`Summarizer`] adapter.

pub mod anthropic;
pub mod cache;
pub mod manager;
pub mod memory;
pub mod offline;
pub mod prompts;

use crate::domain::{LlmConfig, ProviderKind};
use crate::utils::sha256_hex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use anthropic::AnthropicSummarizer;
pub use cache::{CacheStats, PromptCache};
pub use manager::{ConversationManager, Reply};
pub use memory::{Conversation, MemoryAction, MemoryStrategy};
pub use offline::OfflineSummarizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A request to a summarization backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("provider error ({status}): {message}")]
    Provider { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl LlmError {
    /// Network and provider-side failures are worth retrying; everything
    /// else fails the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::RateLimited(_) => true,
            LlmError::Provider { status, .. } => *status >= 500,
            LlmError::Auth(_) | LlmError::InvalidResponse(_) | LlmError::InvalidRequest(_) => false,
        }
    }
}

/// The summarization capability: one completion per call, blocking.
pub trait Summarizer: Send + Sync {
    fn name(&self) -> &str;

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Parameters that change what a summarizer answers. Its hash is part of
/// every prompt cache key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
    pub provider: ProviderKind,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub prompt_version: &'static str,
}

impl ModelConfig {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            provider: config.provider,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            prompt_version: prompts::PROMPT_VERSION,
        }
    }

    pub fn hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        sha256_hex(json.as_bytes())
    }
}

/// Build the configured summarizer adapter.
pub fn build_summarizer(config: &LlmConfig) -> Result<Arc<dyn Summarizer>, LlmError> {
    match config.provider {
        ProviderKind::Offline => Ok(Arc::new(OfflineSummarizer::new(config.offline_sentences))),
        ProviderKind::Anthropic => Ok(Arc::new(AnthropicSummarizer::from_config(config)?)),
    }
}
