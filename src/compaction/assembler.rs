//! Render compacted segments back into the conversation.

use super::scoring::Importance;
use super::segment::ConversationSegment;
use crate::provider::{COMPACTED_CONTEXT_CLOSE, COMPACTED_CONTEXT_OPEN, Message};
use std::fmt::Write;

/// Render all compacted segments as synthetic messages.
///
/// Segments are grouped by importance; high segments keep summary, topics,
/// key points and reasoning, medium segments keep summary and topics, low
/// segments collapse to a count. The block is authored by the assistant so
/// the model reads it as prior context rather than a new instruction.
/// Returns an empty list when there is nothing to render.
#[must_use]
pub fn assemble_context(segments: &[ConversationSegment]) -> Vec<Message> {
    if segments.is_empty() {
        return Vec::new();
    }

    let by = |importance: Importance| -> Vec<&ConversationSegment> {
        segments
            .iter()
            .filter(|s| s.importance == importance)
            .collect()
    };
    let high = by(Importance::High);
    let medium = by(Importance::Medium);
    let low = by(Importance::Low);

    let mut out = String::new();
    out.push_str(COMPACTED_CONTEXT_OPEN);
    out.push_str("\n## Earlier conversation (compacted)\n");

    if !high.is_empty() {
        out.push_str("\n### High importance\n");
        for segment in high {
            let _ = writeln!(out, "- {}", summary_of(segment));
            if let Some(topics) = topics_of(segment) {
                let _ = writeln!(out, "  Topics: {topics}");
            }
            if let Some(points) = segment.key_points.as_ref().filter(|p| !p.is_empty()) {
                out.push_str("  Key points:\n");
                for point in points {
                    let _ = writeln!(out, "    - {point}");
                }
            }
            if let Some(assessment) = &segment.assessment {
                let _ = writeln!(out, "  Why it matters: {}", assessment.reasoning);
            }
        }
    }

    if !medium.is_empty() {
        out.push_str("\n### Medium importance\n");
        for segment in medium {
            match topics_of(segment) {
                Some(topics) => {
                    let _ = writeln!(out, "- {} (topics: {topics})", summary_of(segment));
                }
                None => {
                    let _ = writeln!(out, "- {}", summary_of(segment));
                }
            }
        }
    }

    if !low.is_empty() {
        out.push_str("\n### Low importance\n");
        let _ = writeln!(out, "- {} segments of general conversation", low.len());
    }

    let _ = writeln!(out, "\nTotal: {} segments compacted.", segments.len());
    out.push_str(COMPACTED_CONTEXT_CLOSE);

    vec![Message::assistant(out)]
}

fn summary_of(segment: &ConversationSegment) -> String {
    segment
        .summary
        .clone()
        .unwrap_or_else(|| format!("Conversation segment with {} messages", segment.messages.len()))
}

fn topics_of(segment: &ConversationSegment) -> Option<String> {
    segment
        .assessment
        .as_ref()
        .filter(|a| !a.topics.is_empty())
        .map(|a| a.topics.join(", "))
}
