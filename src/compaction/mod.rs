//! Context compaction for long conversations.
//!
//! Old messages are grouped into segments, scored for importance, replaced by
//! a summary with key points, and rendered back as one synthetic message.
//! [`ContextManager`] ties the pieces together for a single conversation.

mod assembler;
mod counter;
mod manager;
mod scoring;
mod segment;
mod summarization;

pub use assembler::assemble_context;
pub use counter::{
    ModelFamily, TokenEstimate, estimate_message_tokens, estimate_messages, estimate_system_prompt,
    estimate_tokens,
};
pub use manager::{ContextManager, ContextStats, ContextWindow, ImportanceCounts};
pub use scoring::{
    Importance, ImportanceAssessment, ImportanceScorer, assessment_schema, heuristic_assessment,
    parse_assessment,
};
pub use segment::{ConversationSegment, SegmentIds, segment_messages};
pub use summarization::{Compaction, Compactor, ParseError, fallback_compaction, parse_compaction};
