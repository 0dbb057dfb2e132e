//! Token estimation for routing decisions
//!
//! Routing only needs a budget estimate, not an exact count: the pipeline
//! adds a reply headroom on top before comparing against context windows.
//! The chars/4 heuristic tracks OpenAI-family tokenizers closely enough for
//! that purpose.

use serde_json::Value;

/// Approximate characters per token for English-dominated text
const CHARS_PER_TOKEN: usize = 4;

/// Fixed per-message overhead (role markers and separators)
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count of a single text fragment.
pub fn estimate_text(text: &str) -> u32 {
    (text.chars().count().div_ceil(CHARS_PER_TOKEN)) as u32
}

/// Estimate tokens in an opaque message content value.
///
/// String content is estimated directly; structured content (vision parts,
/// tool results) is estimated from its serialized form, which overcounts a
/// little and keeps the routing estimate conservative.
pub fn estimate_content(content: &Value) -> u32 {
    match content {
        Value::String(text) => estimate_text(text),
        Value::Null => 0,
        other => estimate_text(&other.to_string()),
    }
}

/// Estimate the prompt token budget for a list of chat messages.
pub fn estimate_messages<'a>(contents: impl Iterator<Item = &'a Value>) -> u32 {
    contents
        .map(|c| estimate_content(c) + MESSAGE_OVERHEAD as u32)
        .sum()
}
