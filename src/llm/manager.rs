//! Conversation & cache manager: the single entry point the execution engine
//! uses for summarization.

use super::cache::{CacheStats, PromptCache};
use super::memory::{Conversation, MemoryAction, MemoryStrategy};
use super::prompts;
use super::{CompletionRequest, LlmError, Message, ModelConfig, Summarizer};
use crate::domain::{LlmConfig, MemoryConfig};
use crate::utils::{stable_key, Clock};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// A summarizer answer and whether it came from the prompt cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub cached: bool,
}

pub struct ConversationManager {
    summarizer: Arc<dyn Summarizer>,
    model: ModelConfig,
    model_hash: String,
    cache: Option<Mutex<PromptCache>>,
    memory: MemoryStrategy,
    token_budget: usize,
    clock: Arc<dyn Clock>,
    llm_calls: AtomicU64,
    cache_hits: AtomicU64,
}

impl ConversationManager {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        llm: &LlmConfig,
        memory: &MemoryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let model = ModelConfig::from_config(llm);
        let model_hash = model.hash();
        Self {
            summarizer,
            model,
            model_hash,
            cache: None,
            memory: MemoryStrategy::from_config(memory),
            token_budget: memory.token_budget,
            clock,
            llm_calls: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    pub fn with_cache(mut self, cache: PromptCache) -> Self {
        self.cache = Some(Mutex::new(cache));
        self
    }

    pub fn model_hash(&self) -> &str {
        &self.model_hash
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    pub fn start(&self, id: impl Into<String>, system: impl Into<String>) -> Conversation {
        Conversation::new(id, system)
    }

    /// Send one user turn and append the answer to the conversation.
    ///
    /// The memory strategy runs first, so the request that reaches the
    /// summarizer is already inside the token budget (except under the null
    /// strategy).
    pub fn send(&self, conversation: &mut Conversation, prompt: String) -> Result<Reply, LlmError> {
        conversation.push(Message::user(prompt));

        let id = conversation.id().to_string();
        let action = self
            .memory
            .apply(conversation, self.token_budget, |head| self.condense(&id, head));
        if action != MemoryAction::Unchanged {
            debug!(conversation = %id, ?action, "conversation memory trimmed");
        }

        let request = CompletionRequest {
            model: self.model.model.clone(),
            system: conversation.system().to_string(),
            messages: conversation.messages().to_vec(),
            max_tokens: self.model.max_tokens,
            temperature: self.model.temperature,
        };
        let reply = self.cached_complete(&id, &request)?;
        conversation.push(Message::assistant(reply.text.clone()));
        Ok(reply)
    }

    /// One-shot conversation.
    pub fn summarize(&self, conversation_id: &str, system: &str, prompt: String) -> Result<Reply, LlmError> {
        let mut conversation = self.start(conversation_id, system);
        self.send(&mut conversation, prompt)
    }

    fn condense(&self, conversation_id: &str, head: &[Message]) -> Option<String> {
        let request = CompletionRequest {
            model: self.model.model.clone(),
            system: prompts::CONDENSE_SYSTEM_PROMPT.to_string(),
            messages: vec![Message::user(prompts::condense_prompt(&Conversation::transcript(head)))],
            max_tokens: self.model.max_tokens,
            temperature: self.model.temperature,
        };
        match self.cached_complete(&format!("{conversation_id}#condense"), &request) {
            Ok(reply) => Some(reply.text),
            Err(e) => {
                warn!(conversation = %conversation_id, "condensing conversation failed: {e}");
                None
            }
        }
    }

    fn cached_complete(&self, conversation_id: &str, request: &CompletionRequest) -> Result<Reply, LlmError> {
        let key = PromptCache::key(&fingerprint(request), conversation_id, &self.model_hash);

        if let Some(cache) = &self.cache {
            let hit = cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(&key, self.clock.now());
            if let Some(text) = hit {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(conversation = %conversation_id, "prompt cache hit");
                return Ok(Reply { text, cached: true });
            }
        }

        self.llm_calls.fetch_add(1, Ordering::Relaxed);
        let response = self.summarizer.complete(request)?;
        debug!(
            conversation = %conversation_id,
            summarizer = self.summarizer.name(),
            prompt_tokens = response.prompt_tokens,
            completion_tokens = response.completion_tokens,
            "summarizer call finished"
        );

        if let Some(cache) = &self.cache {
            cache
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(key, response.text.clone(), self.clock.now());
        }
        Ok(Reply { text: response.text, cached: false })
    }

    /// Calls that reached the summarizer.
    pub fn llm_calls(&self) -> u64 {
        self.llm_calls.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache
            .as_ref()
            .map(|cache| cache.lock().unwrap_or_else(|e| e.into_inner()).stats())
    }

    pub fn save_cache(&self, path: &Path) -> crate::error::Result<()> {
        match &self.cache {
            Some(cache) => cache.lock().unwrap_or_else(|e| e.into_inner()).save(path),
            None => Ok(()),
        }
    }

    pub fn into_cache(self) -> Option<PromptCache> {
        self.cache.map(|cache| cache.into_inner().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Hash of everything in a request that the model sees.
fn fingerprint(request: &CompletionRequest) -> String {
    let mut parts = Vec::with_capacity(request.messages.len() * 2 + 1);
    parts.push(request.system.as_str());
    for message in &request.messages {
        parts.push(match message.role {
            super::Role::User => "user",
            super::Role::Assistant => "assistant",
        });
        parts.push(message.content.as_str());
    }
    stable_key(parts)
}
