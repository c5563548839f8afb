//! Deterministic extractive summarizer.
//!
//! Needs no network or credentials: it reads the prompt kind from the `Task:`
//! line and builds a summary from leading comments and definition names. The
//! same prompt always yields the same text.

use super::memory::SUMMARY_MARKER;
use super::prompts::{self, CHILD_PREFIX};
use super::{CompletionRequest, CompletionResponse, LlmError, Role, Summarizer};
use crate::utils::estimate_tokens;
use once_cell::sync::Lazy;
use regex::Regex;

static DEFINITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:fn|struct|enum|trait|mod|class|def|function|interface|type|const)\s+([A-Za-z_][A-Za-z0-9_]*)",
    )
    .expect("valid definition regex")
});

static COMMENT_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\s*(?://[/!]?|#+!?|--|\*+|/\*+|"""|''')\s?"#).expect("valid comment regex"));

const MAX_DEFINITIONS: usize = 12;

#[derive(Debug, Clone)]
pub struct OfflineSummarizer {
    sentences: usize,
}

impl OfflineSummarizer {
    pub fn new(sentences: usize) -> Self {
        Self { sentences: sentences.max(1) }
    }

    fn summarize_file(&self, prompt: &str) -> String {
        let path = prompts::header_value(prompt, "Path").unwrap_or("file");
        let source = prompts::source_section(prompt).unwrap_or("");
        let line_count = source.lines().count();

        let description = first_sentences(&leading_comment(source), self.sentences);
        let definitions: Vec<&str> = source
            .lines()
            .filter_map(|line| DEFINITION.captures(line))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .take(MAX_DEFINITIONS)
            .collect();

        let mut out = format!("`{path}` ({line_count} lines).");
        if !description.is_empty() {
            out.push(' ');
            out.push_str(&description);
        }
        if !definitions.is_empty() {
            out.push_str("\n\nDefines: ");
            out.push_str(&definitions.join(", "));
            out.push('.');
        }
        out
    }

    fn summarize_children(&self, prompt: &str) -> Vec<(String, String)> {
        let mut children = Vec::new();
        let mut current: Option<(String, String)> = None;
        for line in prompt.lines() {
            if let Some(heading) = line.strip_prefix(CHILD_PREFIX) {
                if let Some(done) = current.take() {
                    children.push(done);
                }
                let name = heading.rsplit_once(" (").map(|(p, _)| p).unwrap_or(heading);
                current = Some((name.to_string(), String::new()));
            } else if let Some((_, body)) = current.as_mut() {
                body.push_str(line);
                body.push(' ');
            }
        }
        children.extend(current);
        children
            .into_iter()
            .map(|(path, body)| (path, first_sentences(body.trim(), 1)))
            .collect()
    }

    fn summarize_directory(&self, request: &CompletionRequest, prompt: &str) -> String {
        let path = prompts::header_value(prompt, "Path").unwrap_or(".");
        let count = prompts::header_value(prompt, "Children").unwrap_or("0");
        let mut out = format!("Directory `{path}` with {count} entries.\n");

        let listed = self.summarize_children(prompt);
        if !listed.is_empty() {
            for (child, sentence) in listed {
                out.push_str(&format!("\n- `{child}`: {sentence}"));
            }
            return out;
        }

        // Multi-turn: fold the interim notes from earlier turns.
        let earlier = request.messages.iter().filter(|m| {
            m.role == Role::Assistant || m.content.starts_with(SUMMARY_MARKER)
        });
        for message in earlier {
            let note = message.content.strip_prefix(SUMMARY_MARKER).unwrap_or(&message.content).trim();
            if !note.is_empty() {
                out.push('\n');
                out.push_str(note);
            }
        }
        out
    }

    fn summarize_batch(&self, prompt: &str) -> String {
        let batch = prompts::header_value(prompt, "Batch").unwrap_or("?");
        self.summarize_children(prompt)
            .into_iter()
            .fold(format!("Batch {batch}:"), |mut acc, (child, sentence)| {
                acc.push_str(&format!("\n- `{child}`: {sentence}"));
                acc
            })
    }

    fn condense(&self, prompt: &str) -> String {
        let body = prompt.split_once("\n\n").map(|(_, b)| b).unwrap_or(prompt);
        let kept: Vec<&str> = body
            .lines()
            .map(str::trim)
            .filter(|line| line.starts_with("- "))
            .collect();
        if kept.is_empty() {
            first_sentences(body, self.sentences)
        } else {
            kept.join("\n")
        }
    }
}

impl Summarizer for OfflineSummarizer {
    fn name(&self) -> &str {
        "offline"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let prompt = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .ok_or_else(|| LlmError::InvalidRequest("no user message".to_string()))?;

        let text = match prompt.lines().next().unwrap_or_default() {
            prompts::TASK_FILE => self.summarize_file(prompt),
            prompts::TASK_DIRECTORY => self.summarize_directory(request, prompt),
            prompts::TASK_DIRECTORY_BATCH => self.summarize_batch(prompt),
            prompts::TASK_CONDENSE => self.condense(prompt),
            _ => first_sentences(prompt, self.sentences),
        };

        let prompt_tokens = estimate_tokens(&request.system)
            + request.messages.iter().map(|m| estimate_tokens(&m.content)).sum::<usize>();
        Ok(CompletionResponse {
            prompt_tokens: prompt_tokens as u32,
            completion_tokens: estimate_tokens(&text) as u32,
            text,
        })
    }
}

/// The comment block at the top of a file, with comment markers removed.
fn leading_comment(source: &str) -> String {
    let mut lines = Vec::new();
    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if lines.is_empty() {
                continue;
            }
            break;
        }
        match COMMENT_PREFIX.find(line) {
            Some(m) => {
                let text = line[m.end()..].trim().trim_end_matches("*/").trim();
                if !text.is_empty() && !text.starts_with('/') {
                    lines.push(text.to_string());
                }
            }
            None => break,
        }
    }
    lines.join(" ")
}

/// Up to `count` sentences from the start of `text`.
fn first_sentences(text: &str, count: usize) -> String {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut end = 0;
    let mut found = 0;
    for (idx, ch) in text.char_indices() {
        if matches!(ch, '.' | '!' | '?') {
            let next = text[idx + ch.len_utf8()..].chars().next();
            if next.map_or(true, char::is_whitespace) {
                end = idx + ch.len_utf8();
                found += 1;
                if found == count {
                    break;
                }
            }
        }
    }
    if found < count {
        text
    } else {
        text[..end].to_string()
    }
}
