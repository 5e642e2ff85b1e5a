//! Conversation segments: the unit of scoring and compaction.

use super::counter::{ModelFamily, estimate_message_tokens};
use super::scoring::{Importance, ImportanceAssessment};
use super::summarization::Compaction;
use crate::provider::{ContentBlock, Message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Max characters of a tool payload or thinking block rendered into a transcript.
const TRANSCRIPT_PART_LIMIT: usize = 500;

/// A contiguous chronological chunk of conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSegment {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Index of the first message in the cumulative stream of compacted messages.
    #[serde(default)]
    pub position: usize,
    pub messages: Vec<Message>,
    pub token_count: usize,
    pub importance: Importance,
    pub summary: Option<String>,
    pub key_points: Option<Vec<String>>,
    pub assessment: Option<ImportanceAssessment>,
}

impl ConversationSegment {
    #[must_use]
    pub fn is_scored(&self) -> bool {
        self.assessment.is_some()
    }

    #[must_use]
    pub fn is_compacted(&self) -> bool {
        self.summary.is_some()
    }

    /// Record the importance assessment. Only the first assessment sticks.
    pub fn apply_assessment(&mut self, assessment: ImportanceAssessment) -> bool {
        if self.is_scored() {
            tracing::warn!(segment = %self.id, "Segment already scored, ignoring new assessment");
            return false;
        }
        self.importance = assessment.importance;
        self.assessment = Some(assessment);
        true
    }

    /// Record the compaction result. A compacted segment is never re-compacted.
    pub fn apply_compaction(&mut self, compaction: Compaction) -> bool {
        if self.is_compacted() {
            tracing::warn!(segment = %self.id, "Segment already compacted, ignoring new summary");
            return false;
        }
        self.summary = Some(compaction.summary);
        self.key_points = Some(compaction.key_points);
        true
    }

    /// Render the segment's messages as a plain-text transcript.
    #[must_use]
    pub fn transcript(&self) -> String {
        format_transcript(&self.messages)
    }

    /// Whether `needle` (already lower-cased) appears in the compacted record.
    pub(crate) fn matches(&self, needle: &str) -> bool {
        let hit = |s: &str| s.to_lowercase().contains(needle);

        self.summary.as_deref().is_some_and(hit)
            || self
                .key_points
                .as_ref()
                .is_some_and(|points| points.iter().any(|p| hit(p.as_str())))
            || self.assessment.as_ref().is_some_and(|a| {
                hit(a.reasoning.as_str()) || a.topics.iter().any(|t| hit(t.as_str()))
            })
    }
}

/// Process-wide sequence so ids from different managers never collide.
static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Issues segment ids from a monotonically increasing counter plus a timestamp.
///
/// The counter is per manager and persisted with its state. A process-wide
/// sequence suffix keeps ids unique across managers in the same process.
#[derive(Debug, Clone, Default)]
pub struct SegmentIds {
    counter: u64,
}

impl SegmentIds {
    #[must_use]
    pub fn starting_at(counter: u64) -> Self {
        Self { counter }
    }

    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    pub fn next_id(&mut self, now: DateTime<Utc>) -> String {
        self.counter += 1;
        let sequence = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        format!("seg_{}_{}_{sequence}", self.counter, now.timestamp_millis())
    }
}

/// Partition messages into chunks of `segment_size`, preserving order.
///
/// The last chunk may be shorter. Messages without content are skipped.
/// `first_position` is the stream position of the first message.
pub fn segment_messages(
    messages: &[Message],
    segment_size: usize,
    family: ModelFamily,
    ids: &mut SegmentIds,
    first_position: usize,
) -> Vec<ConversationSegment> {
    let segment_size = segment_size.max(1);
    let present: Vec<&Message> = messages.iter().filter(|m| !m.is_empty()).collect();

    present
        .chunks(segment_size)
        .enumerate()
        .map(|(i, chunk)| {
            let now = Utc::now();
            let messages: Vec<Message> = chunk.iter().map(|m| (*m).clone()).collect();
            let token_count = messages
                .iter()
                .map(|m| estimate_message_tokens(m, family))
                .sum();

            ConversationSegment {
                id: ids.next_id(now),
                created_at: now,
                position: first_position + i * segment_size,
                messages,
                token_count,
                importance: Importance::default(),
                summary: None,
                key_points: None,
                assessment: None,
            }
        })
        .collect()
}

/// Format messages into readable text for the generation capabilities.
pub(crate) fn format_transcript(messages: &[Message]) -> String {
    let mut parts = Vec::new();

    for msg in messages {
        let role_label = msg.role.label();

        for block in msg.content.iter() {
            match block {
                ContentBlock::Text { text } => {
                    parts.push(format!("[{role_label}]: {text}"));
                }
                ContentBlock::Thinking { thinking } => {
                    parts.push(format!(
                        "[{role_label} thinking]: {}",
                        truncate_chars(thinking, TRANSCRIPT_PART_LIMIT)
                    ));
                }
                ContentBlock::ToolCall {
                    name, arguments, ..
                } => {
                    let args = arguments.to_string();
                    parts.push(format!(
                        "[Tool call: {name}({})]",
                        truncate_chars(&args, TRANSCRIPT_PART_LIMIT)
                    ));
                }
                ContentBlock::ToolResult {
                    content, is_error, ..
                } => {
                    let prefix = if *is_error { "Error" } else { "Result" };
                    parts.push(format!(
                        "[Tool {prefix}]: {}",
                        truncate_chars(content, TRANSCRIPT_PART_LIMIT)
                    ));
                }
            }
        }
    }

    parts.join("\n\n")
}

/// First `limit` characters of `text`, marked when cut.
pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => format!("{}... [truncated]", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;
    use std::sync::Arc;

    fn numbered(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn test_segments_preserve_order_and_size() {
        let messages = numbered(20);
        let mut ids = SegmentIds::default();
        let segments = segment_messages(&messages, 8, ModelFamily::Generic, &mut ids, 0);

        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].messages.len(), 8);
        assert_eq!(segments[1].messages.len(), 8);
        assert_eq!(segments[2].messages.len(), 4);

        let flattened: Vec<Message> = segments
            .iter()
            .flat_map(|s| s.messages.iter().cloned())
            .collect();
        assert_eq!(flattened, messages);
    }

    #[test]
    fn test_segment_positions_and_tokens() {
        let messages = numbered(10);
        let mut ids = SegmentIds::default();
        let segments = segment_messages(&messages, 4, ModelFamily::Generic, &mut ids, 12);

        let positions: Vec<usize> = segments.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![12, 16, 20]);

        for segment in &segments {
            let expected: usize = segment
                .messages
                .iter()
                .map(|m| estimate_message_tokens(m, ModelFamily::Generic))
                .sum();
            assert_eq!(segment.token_count, expected);
            assert!(!segment.is_scored());
            assert!(!segment.is_compacted());
        }
    }

    #[test]
    fn test_ids_are_unique_and_counter_advances() {
        let mut ids = SegmentIds::starting_at(41);
        let segments = segment_messages(&numbered(24), 8, ModelFamily::Generic, &mut ids, 0);

        assert!(segments[0].id.starts_with("seg_42_"));
        assert!(segments[2].id.starts_with("seg_44_"));
        assert_eq!(ids.counter(), 44);

        let unique: std::collections::HashSet<&str> =
            segments.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_separate_issuers_never_collide() {
        let now = Utc::now();
        let mut first = SegmentIds::default();
        let mut second = SegmentIds::default();

        // Same counter, same millisecond
        let a = first.next_id(now);
        let b = second.next_id(now);
        assert!(a.starts_with("seg_1_") && b.starts_with("seg_1_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_messages_are_skipped() {
        let mut messages = numbered(3);
        messages.insert(
            1,
            Message {
                role: Role::User,
                content: Arc::new(vec![]),
            },
        );
        let mut ids = SegmentIds::default();
        let segments = segment_messages(&messages, 8, ModelFamily::Generic, &mut ids, 0);

        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].messages.len(), 3);
    }

    #[test]
    fn test_no_messages_no_segments() {
        let mut ids = SegmentIds::default();
        assert!(segment_messages(&[], 8, ModelFamily::Generic, &mut ids, 0).is_empty());
        assert_eq!(ids.counter(), 0);
    }

    #[test]
    fn test_format_transcript() {
        let messages = vec![
            Message::user("Read main.rs"),
            Message::assistant("I'll read that file."),
            Message::tool_result("1", "fn main() {}"),
        ];

        let formatted = format_transcript(&messages);
        assert!(formatted.contains("[User]: Read main.rs"));
        assert!(formatted.contains("[Assistant]: I'll read that file."));
        assert!(formatted.contains("[Tool Result]: fn main() {}"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        let text = "é".repeat(600);
        let truncated = truncate_chars(&text, 500);
        assert!(truncated.ends_with("... [truncated]"));
        assert_eq!(truncated.chars().filter(|c| *c == 'é').count(), 500);
        assert_eq!(truncate_chars("short", 500), "short");
    }

    #[test]
    fn test_assessment_and_compaction_apply_once() {
        let mut ids = SegmentIds::default();
        let mut segment =
            segment_messages(&numbered(2), 8, ModelFamily::Generic, &mut ids, 0).remove(0);

        let first = super::super::scoring::heuristic_assessment("deploy failed with error");
        assert!(segment.apply_assessment(first));
        assert_eq!(segment.importance, Importance::High);
        let second = super::super::scoring::heuristic_assessment("chat");
        assert!(!segment.apply_assessment(second));
        assert_eq!(segment.importance, Importance::High);

        assert!(segment.apply_compaction(Compaction {
            summary: "first".to_string(),
            key_points: vec!["a".to_string()],
            fallback: false,
        }));
        assert!(!segment.apply_compaction(Compaction {
            summary: "second".to_string(),
            key_points: vec![],
            fallback: false,
        }));
        assert_eq!(segment.summary.as_deref(), Some("first"));
    }
}
