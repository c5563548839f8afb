//! Prompt templates for file analysis, directory summaries and conversation
//! condensation.
//!
//! Every prompt starts with a `Task:` line so adapters (and the offline
//! summarizer in particular) can tell the request kinds apart.

/// Bumped whenever a template changes, so cached answers to old prompts miss.
pub const PROMPT_VERSION: &str = "1";

pub const TASK_FILE: &str = "Task: summarize-file";
pub const TASK_DIRECTORY: &str = "Task: summarize-directory";
pub const TASK_DIRECTORY_BATCH: &str = "Task: read-directory-batch";
pub const TASK_CONDENSE: &str = "Task: condense-conversation";

pub const SOURCE_BEGIN: &str = "<<<SOURCE";
pub const SOURCE_END: &str = "SOURCE>>>";
pub const CHILD_PREFIX: &str = "### ";

pub const FILE_SYSTEM_PROMPT: &str = "You maintain a knowledge base that mirrors a source repository. \
Describe what a single file is for, the main types and functions it defines and how it relates to \
the rest of the project. Write plain Markdown, at most a few short paragraphs. Do not repeat the code.";

pub const DIRECTORY_SYSTEM_PROMPT: &str = "You maintain a knowledge base that mirrors a source repository. \
Given the summaries of every file and subdirectory inside one directory, describe what the directory \
is responsible for as a whole and how its parts fit together. Work only from the summaries given. \
Write plain Markdown, at most a few short paragraphs.";

pub const CONDENSE_SYSTEM_PROMPT: &str = "Condense the conversation so far into a short note that keeps \
every fact needed to finish the current task.";

/// Prompt for analyzing one source file.
pub fn file_prompt(path: &str, content: &str, truncated: bool) -> String {
    let mut prompt = format!("{TASK_FILE}\nPath: {path}\n");
    if truncated {
        prompt.push_str("Note: the file was truncated for length.\n");
    }
    prompt.push_str(SOURCE_BEGIN);
    prompt.push('\n');
    prompt.push_str(content);
    if !content.ends_with('\n') {
        prompt.push('\n');
    }
    prompt.push_str(SOURCE_END);
    prompt.push('\n');
    prompt
}

/// One child entry in a directory prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildSummary {
    pub path: String,
    pub is_directory: bool,
    pub summary: String,
}

fn push_children(prompt: &mut String, children: &[ChildSummary]) {
    for child in children {
        let label = if child.is_directory { "directory" } else { "file" };
        prompt.push_str(&format!("{CHILD_PREFIX}{} ({label})\n", child.path));
        prompt.push_str(child.summary.trim());
        prompt.push_str("\n\n");
    }
}

/// Single-shot directory prompt carrying every child summary.
pub fn directory_prompt(path: &str, children: &[ChildSummary]) -> String {
    let mut prompt = format!("{TASK_DIRECTORY}\nPath: {path}\nChildren: {}\n\n", children.len());
    push_children(&mut prompt, children);
    prompt
}

/// One batch of child summaries in a multi-turn directory conversation.
pub fn directory_batch_prompt(path: &str, batch: usize, total: usize, children: &[ChildSummary]) -> String {
    let mut prompt = format!(
        "{TASK_DIRECTORY_BATCH}\nPath: {path}\nBatch: {batch}/{total}\n\
         Reply with an interim note about these children only.\n\n"
    );
    push_children(&mut prompt, children);
    prompt
}

/// Closing turn of a multi-turn directory conversation.
pub fn directory_finish_prompt(path: &str, child_count: usize) -> String {
    format!(
        "{TASK_DIRECTORY}\nPath: {path}\nChildren: {child_count}\n\n\
         All child summaries have been provided. Write the summary of the whole directory.\n"
    )
}

pub fn condense_prompt(transcript: &str) -> String {
    format!("{TASK_CONDENSE}\n\n{transcript}")
}

/// Extract the text between the source fences of a file prompt.
pub fn source_section(prompt: &str) -> Option<&str> {
    let start = prompt.find(SOURCE_BEGIN)? + SOURCE_BEGIN.len();
    let end = prompt.rfind(SOURCE_END)?;
    (end >= start).then(|| prompt[start..end].trim_matches('\n'))
}

/// Value of a `Key: value` header line.
pub fn header_value<'a>(prompt: &'a str, key: &str) -> Option<&'a str> {
    prompt
        .lines()
        .take_while(|line| !line.is_empty())
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(": "))
}
