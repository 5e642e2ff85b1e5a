//! Shared message types for the conversation being managed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Opening tag of the synthetic message produced by the context assembler.
///
/// Both the assembler and [`Message::is_compacted_context`] reference this
/// constant so they can't drift out of sync.
pub const COMPACTED_CONTEXT_OPEN: &str = "<compacted-context>";
pub const COMPACTED_CONTEXT_CLOSE: &str = "</compacted-context>";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Arc<Vec<ContentBlock>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_call_id: String,
        content: String,
        is_error: bool,
    },
}

impl ContentBlock {
    /// Tool calls and tool results are estimated from their serialized form.
    #[must_use]
    pub fn is_tool_payload(&self) -> bool {
        matches!(
            self,
            ContentBlock::ToolCall { .. } | ContentBlock::ToolResult { .. }
        )
    }
}

impl Message {
    /// Build a message holding a single text block.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Arc::new(vec![ContentBlock::Text { text: text.into() }]),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Arc::new(vec![ContentBlock::ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
                is_error: false,
            }]),
        }
    }

    /// Text and thinking parts joined by newlines.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Thinking { thinking } => Some(thinking.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[must_use]
    pub fn has_tool_payload(&self) -> bool {
        self.content.iter().any(ContentBlock::is_tool_payload)
    }

    /// A message without any content blocks carries nothing to keep.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Whether this message was rendered by the context assembler.
    #[must_use]
    pub fn is_compacted_context(&self) -> bool {
        self.role == Role::Assistant
            && matches!(
                self.content.first(),
                Some(ContentBlock::Text { text }) if text.starts_with(COMPACTED_CONTEXT_OPEN)
            )
    }
}
