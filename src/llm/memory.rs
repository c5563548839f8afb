//! Conversation state and the strategies that keep it inside a token budget.

use super::{Message, Role};
use crate::domain::{MemoryConfig, MemoryStrategyKind};
use crate::utils::estimate_tokens;

/// Prefix of the synthetic message that replaces collapsed turns.
pub const SUMMARY_MARKER: &str = "[Summary so far]";

const DIGEST_LINE_CHARS: usize = 160;

/// One running conversation with a summarizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    id: String,
    system: String,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, system: impl Into<String>) -> Self {
        Self { id: id.into(), system: system.into(), messages: Vec::new() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.system)
            + self.messages.iter().map(|m| estimate_tokens(&m.content)).sum::<usize>()
    }

    /// Render the turns as plain text, one labelled block per message.
    pub fn transcript(messages: &[Message]) -> String {
        messages
            .iter()
            .map(|m| match m.role {
                Role::User => format!("User:\n{}", m.content),
                Role::Assistant => format!("Assistant:\n{}", m.content),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStrategy {
    /// Collapse everything but the last `keep_last` exchanges into one message.
    Summarizing { keep_last: usize },
    /// Drop the oldest exchanges until the conversation fits.
    SlidingWindow,
    /// Leave the conversation alone.
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAction {
    Unchanged,
    Summarized { collapsed: usize },
    Trimmed { dropped: usize },
}

impl MemoryStrategy {
    pub fn from_config(config: &MemoryConfig) -> Self {
        match config.strategy {
            MemoryStrategyKind::Summarizing => MemoryStrategy::Summarizing { keep_last: config.keep_last },
            MemoryStrategyKind::SlidingWindow => MemoryStrategy::SlidingWindow,
            MemoryStrategyKind::Null => MemoryStrategy::Null,
        }
    }

    /// Bring `conversation` back under `budget` estimated tokens.
    ///
    /// `condense` produces the text of the summary message from the collapsed
    /// turns; when it returns `None` a digest of first lines is used instead.
    /// The newest message is never removed.
    pub fn apply<F>(&self, conversation: &mut Conversation, budget: usize, condense: F) -> MemoryAction
    where
        F: FnOnce(&[Message]) -> Option<String>,
    {
        if conversation.estimated_tokens() <= budget {
            return MemoryAction::Unchanged;
        }
        match *self {
            MemoryStrategy::Null => MemoryAction::Unchanged,
            MemoryStrategy::SlidingWindow => {
                let messages = &mut conversation.messages;
                let mut dropped = 0;
                while messages.len() > 1
                    && estimate_tokens(&conversation.system)
                        + messages.iter().map(|m| estimate_tokens(&m.content)).sum::<usize>()
                        > budget
                {
                    messages.remove(0);
                    dropped += 1;
                    if messages.len() > 1 && messages[0].role == Role::Assistant {
                        messages.remove(0);
                        dropped += 1;
                    }
                }
                if dropped == 0 {
                    MemoryAction::Unchanged
                } else {
                    MemoryAction::Trimmed { dropped }
                }
            }
            MemoryStrategy::Summarizing { keep_last } => {
                let messages = &mut conversation.messages;
                let pending = usize::from(messages.last().is_some_and(|m| m.role == Role::User));
                let tail_len = keep_last * 2 + pending;
                if messages.len() <= tail_len {
                    return MemoryAction::Unchanged;
                }
                let split = messages.len() - tail_len;
                let head: Vec<Message> = messages.drain(..split).collect();
                let summary = condense(&head)
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| digest(&head));
                messages.insert(0, Message::user(format!("{SUMMARY_MARKER}\n{}", summary.trim())));
                MemoryAction::Summarized { collapsed: head.len() }
            }
        }
    }
}

/// First line of every message, truncated.
fn digest(messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|m| {
            let content = m.content.strip_prefix(SUMMARY_MARKER).unwrap_or(&m.content);
            content.lines().map(str::trim).find(|l| !l.is_empty())
        })
        .map(|line| {
            let short: String = line.chars().take(DIGEST_LINE_CHARS).collect();
            format!("- {short}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
