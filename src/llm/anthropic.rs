//! `Summarizer` adapter for the Anthropic messages API.

use super::{CompletionRequest, CompletionResponse, LlmError, Role, Summarizer};
use crate::domain::LlmConfig;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicSummarizer {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl AnthropicSummarizer {
    /// Build a client from config. The API key is read from the environment
    /// variable named by `llm.api_key_env`.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            LlmError::Auth(format!("{} environment variable not set", config.api_key_env))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| LlmError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/messages", config.api_base.trim_end_matches('/')),
            api_key,
        })
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: Vec<AnthropicMessage>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Deserialize)]
struct AnthropicErrorDetail {
    message: String,
}

/// The messages API requires alternating roles starting with a user turn, so
/// consecutive turns of one role are merged.
fn to_wire_messages(request: &CompletionRequest) -> Vec<AnthropicMessage> {
    let mut out: Vec<AnthropicMessage> = Vec::with_capacity(request.messages.len());
    for message in &request.messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        if let Some(last) = out.last_mut() {
            if last.role == role {
                last.content.push_str("\n\n");
                last.content.push_str(&message.content);
                continue;
            }
        }
        if out.is_empty() && role == "assistant" {
            out.push(AnthropicMessage { role: "user", content: "(continued)".to_string() });
        }
        out.push(AnthropicMessage { role, content: message.content.clone() });
    }
    out
}

fn classify_status(status: u16, message: String) -> LlmError {
    match status {
        401 | 403 => LlmError::Auth(message),
        429 => LlmError::RateLimited(message),
        _ => LlmError::Provider { status, message },
    }
}

impl Summarizer for AnthropicSummarizer {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = AnthropicRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: &request.system,
            messages: to_wire_messages(request),
        };

        debug!(model = %request.model, turns = body.messages.len(), "sending messages request");
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .map_err(|e| LlmError::Transport(format!("Anthropic API request failed: {e}")))?;

        let status = response.status();
        let response_text = response
            .text()
            .map_err(|e| LlmError::Transport(format!("failed to read Anthropic API response: {e}")))?;

        if !status.is_success() {
            let msg = serde_json::from_str::<AnthropicError>(&response_text)
                .map(|e| e.error.message)
                .unwrap_or(response_text);
            return Err(classify_status(status.as_u16(), msg));
        }

        let parsed: AnthropicResponse = serde_json::from_str(&response_text)
            .map_err(|e| LlmError::InvalidResponse(format!("failed to parse Anthropic API response: {e}")))?;

        let text = parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse("empty completion".to_string()));
        }

        Ok(CompletionResponse {
            text,
            prompt_tokens: parsed.usage.input_tokens,
            completion_tokens: parsed.usage.output_tokens,
        })
    }
}
