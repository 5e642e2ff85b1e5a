//! Calibrated token estimation.
//!
//! No tokenizer is loaded: a per-family characters-per-token ratio gives the
//! base count, and surcharges account for content that tokenizes densely
//! (JSON structure, fenced code, markdown punctuation, non-ASCII text).
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use crate::provider::{ContentBlock, Message};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Tokens charged per structural JSON character.
const STRUCTURAL_WEIGHT: f64 = 0.2;
/// Tokens charged per markdown punctuation character.
const MARKDOWN_WEIGHT: f64 = 0.1;
/// Tokens charged per non-ASCII character.
const NON_ASCII_WEIGHT: f64 = 0.3;
/// Code inside fences averages ~3 chars per token.
const CODE_CHARS_PER_TOKEN: f64 = 3.0;
/// Instruction text tokenizes slightly denser than conversation.
const SYSTEM_PROMPT_FACTOR: f64 = 1.05;
/// Overhead for tool call / tool result framing.
const TOOL_PAYLOAD_FACTOR: f64 = 1.15;
/// Flat cost of the role tag on every message.
const ROLE_TOKENS: usize = 1;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```.*?```").expect("code fence pattern is valid"));

/// Model family the estimate was calibrated for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Claude,
    Gpt,
    #[default]
    Generic,
}

impl ModelFamily {
    /// Guess the family from a model id such as `anthropic/claude-sonnet-4`.
    #[must_use]
    pub fn from_model_id(model: &str) -> Self {
        let model = model.to_lowercase();
        if model.contains("claude") || model.contains("anthropic") {
            ModelFamily::Claude
        } else if model.contains("gpt") || model.contains("openai") {
            ModelFamily::Gpt
        } else {
            ModelFamily::Generic
        }
    }

    #[must_use]
    pub fn chars_per_token(self) -> f64 {
        match self {
            ModelFamily::Claude => 3.8,
            ModelFamily::Gpt => 4.2,
            ModelFamily::Generic => 4.0,
        }
    }
}

/// Result of estimating a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub tokens: usize,
    pub characters: usize,
    pub method: ModelFamily,
}

/// Estimate tokens for arbitrary text.
#[must_use]
pub fn estimate_tokens(text: &str, family: ModelFamily) -> TokenEstimate {
    TokenEstimate {
        tokens: raw_estimate(text, family).ceil() as usize,
        characters: text.chars().count(),
        method: family,
    }
}

/// Estimate tokens for a system prompt.
#[must_use]
pub fn estimate_system_prompt(text: &str, family: ModelFamily) -> TokenEstimate {
    TokenEstimate {
        tokens: (raw_estimate(text, family) * SYSTEM_PROMPT_FACTOR).ceil() as usize,
        characters: text.chars().count(),
        method: family,
    }
}

/// Estimate tokens for a single message.
///
/// Text parts are joined and estimated together; tool calls and results are
/// estimated from their serialized form with a framing overhead. Messages
/// without content count as absent.
#[must_use]
pub fn estimate_message_tokens(message: &Message, family: ModelFamily) -> usize {
    if message.is_empty() {
        return 0;
    }

    let text = message.text_content();
    let mut tokens = ROLE_TOKENS + raw_estimate(&text, family).ceil() as usize;

    if message.has_tool_payload() {
        let payload = message
            .content
            .iter()
            .filter(|block| block.is_tool_payload())
            .map(serialize_block)
            .collect::<Vec<_>>()
            .join("\n");
        tokens += (raw_estimate(&payload, family) * TOOL_PAYLOAD_FACTOR).ceil() as usize;
    }

    tokens
}

/// Estimate total tokens for a message list.
#[must_use]
pub fn estimate_messages(messages: &[Message], family: ModelFamily) -> usize {
    messages
        .iter()
        .map(|m| estimate_message_tokens(m, family))
        .sum()
}

fn serialize_block(block: &ContentBlock) -> String {
    serde_json::to_string(block).unwrap_or_default()
}

fn raw_estimate(text: &str, family: ModelFamily) -> f64 {
    if text.is_empty() {
        return 0.0;
    }

    let cpt = family.chars_per_token();
    let mut characters = 0usize;
    let mut structural = 0usize;
    let mut markdown = 0usize;
    let mut non_ascii = 0usize;

    for c in text.chars() {
        characters += 1;
        match c {
            '{' | '}' | '[' | ']' | '"' | ',' | ':' => structural += 1,
            '#' | '*' | '_' | '>' | '|' | '~' => markdown += 1,
            c if !c.is_ascii() => non_ascii += 1,
            _ => {}
        }
    }

    let code_chars: usize = CODE_FENCE
        .find_iter(text)
        .map(|m| m.as_str().chars().count())
        .sum();
    let code_surcharge = code_chars as f64 * (1.0 / CODE_CHARS_PER_TOKEN - 1.0 / cpt);

    characters as f64 / cpt
        + structural as f64 * STRUCTURAL_WEIGHT
        + markdown as f64 * MARKDOWN_WEIGHT
        + non_ascii as f64 * NON_ASCII_WEIGHT
        + code_surcharge.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text() {
        let estimate = estimate_tokens("", ModelFamily::Generic);
        assert_eq!(estimate.tokens, 0);
        assert_eq!(estimate.characters, 0);
    }

    #[test]
    fn test_plain_text_per_family() {
        let text = "a".repeat(100);
        // 100 / 4.0 = 25
        assert_eq!(estimate_tokens(&text, ModelFamily::Generic).tokens, 25);
        // 100 / 3.8 = 26.3 -> 27
        assert_eq!(estimate_tokens(&text, ModelFamily::Claude).tokens, 27);
        // 100 / 4.2 = 23.8 -> 24
        assert_eq!(estimate_tokens(&text, ModelFamily::Gpt).tokens, 24);
        assert_eq!(estimate_tokens(&text, ModelFamily::Gpt).method, ModelFamily::Gpt);
    }

    #[test]
    fn test_non_ascii_surcharge() {
        let estimate = estimate_tokens(&"é".repeat(10), ModelFamily::Generic);
        // 10 / 4.0 + 10 * 0.3 = 5.5 -> 6
        assert_eq!(estimate.tokens, 6);
        assert_eq!(estimate.characters, 10);
    }

    #[test]
    fn test_json_is_denser_than_prose() {
        let json = r#"{"a":[1,2,3],"b":{"c":"d"},"e":[{"f":1}]}"#;
        let prose = "x".repeat(json.len());
        assert!(
            estimate_tokens(json, ModelFamily::Generic).tokens
                > estimate_tokens(&prose, ModelFamily::Generic).tokens
        );
    }

    #[test]
    fn test_code_fence_surcharge() {
        let body = "let value = compute(input);\n".repeat(10);
        let fenced = format!("```rust\n{body}```");
        let unfenced = format!("xxxxxxx\n{body}xxx");
        assert_eq!(fenced.len(), unfenced.len());
        assert!(
            estimate_tokens(&fenced, ModelFamily::Generic).tokens
                > estimate_tokens(&unfenced, ModelFamily::Generic).tokens
        );
    }

    #[test]
    fn test_unmatched_fence_has_no_code_surcharge() {
        let text = format!("```{}", "a".repeat(97));
        // 100 / 4.0, no closing fence so no code span
        assert_eq!(estimate_tokens(&text, ModelFamily::Generic).tokens, 25);
    }

    #[test]
    fn test_system_prompt_bump() {
        let text = "a".repeat(1000);
        // 250 * 1.05 = 262.5 -> 263
        assert_eq!(estimate_system_prompt(&text, ModelFamily::Generic).tokens, 263);
    }

    #[test]
    fn test_message_includes_role_tag() {
        let message = Message::user("a".repeat(100));
        assert_eq!(estimate_message_tokens(&message, ModelFamily::Generic), 26);
    }

    #[test]
    fn test_tool_payload_overhead() {
        let content = "a".repeat(100);
        let as_text = Message::user(content.clone());
        let as_tool = Message::tool_result("call_1", content);
        assert!(
            estimate_message_tokens(&as_tool, ModelFamily::Generic)
                > estimate_message_tokens(&as_text, ModelFamily::Generic)
        );
    }

    #[test]
    fn test_empty_message_counts_as_absent() {
        let message = Message {
            role: crate::provider::Role::User,
            content: std::sync::Arc::new(vec![]),
        };
        assert_eq!(estimate_message_tokens(&message, ModelFamily::Generic), 0);
    }

    #[test]
    fn test_estimate_messages() {
        let messages = vec![Message::user("a".repeat(40)), Message::assistant("b".repeat(40))];
        // (1 + 10) * 2
        assert_eq!(estimate_messages(&messages, ModelFamily::Generic), 22);
    }

    #[test]
    fn test_family_from_model_id() {
        assert_eq!(
            ModelFamily::from_model_id("anthropic/claude-haiku-4-5"),
            ModelFamily::Claude
        );
        assert_eq!(ModelFamily::from_model_id("openai/gpt-4.1-mini"), ModelFamily::Gpt);
        assert_eq!(ModelFamily::from_model_id("llama3.2"), ModelFamily::Generic);
    }
}
