//! Segment compaction: a short summary plus key points.
//!
//! The text-generation capability is asked for a response in a fixed format:
//!
//! ```text
//! SUMMARY: <2-3 sentences, may continue over several lines>
//! KEY_POINTS:
//! - <point>
//! • <point>
//! ```
//!
//! Anything else is unparseable and routes to the deterministic fallback.

use super::segment::{ConversationSegment, truncate_chars};
use crate::provider::{GENERATION_TIMEOUT, GenerationError, TextGenerator, TextRequest, with_deadline};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

const COMPACTION_SYSTEM: &str = "\
You compress conversation history for an AI agent that must continue the work later. \
Preserve exact file paths, error messages, commands, and decisions. Only state facts \
present in the conversation.";

const COMPACTION_PROMPT: &str = "\
Summarize the conversation segment below in 2-3 sentences, then list its key points.
Respond in exactly this format and nothing else:

SUMMARY: <summary>
KEY_POINTS:
- <key point>
- <key point>";

const SUMMARY_MARKER: &str = "SUMMARY:";
const KEY_POINTS_MARKER: &str = "KEY_POINTS:";
/// Max characters of raw model output kept as a fallback summary.
const FALLBACK_SUMMARY_CHARS: usize = 500;
const FALLBACK_KEY_POINT: &str = "AI summary generation failed; raw messages preserved";
/// Bounds on a parsed response. Longer output is treated as unparseable.
const MAX_SUMMARY_CHARS: usize = 1_000;
const MAX_KEY_POINTS: usize = 8;
const MAX_KEY_POINT_CHARS: usize = 300;
const COMPACTION_MAX_TOKENS: u32 = 1_024;

/// Summary and key points for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Compaction {
    pub summary: String,
    pub key_points: Vec<String>,
    /// Produced by the deterministic fallback rather than the model.
    pub fallback: bool,
}

/// Ways a compaction response can deviate from the expected format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing SUMMARY marker")]
    MissingSummary,
    #[error("missing KEY_POINTS marker")]
    MissingKeyPoints,
    #[error("empty summary")]
    EmptySummary,
    #[error("no key points")]
    NoKeyPoints,
    #[error("unexpected line: {0}")]
    UnexpectedLine(String),
    #[error("summary too long ({0} chars)")]
    SummaryTooLong(usize),
    #[error("too many key points ({0})")]
    TooManyKeyPoints(usize),
    #[error("key point too long ({0} chars)")]
    KeyPointTooLong(usize),
}

#[derive(Clone, Copy)]
enum Section {
    Preamble,
    Summary,
    KeyPoints,
}

/// Parse a compaction response into `(summary, key_points)`.
pub fn parse_compaction(text: &str) -> Result<(String, Vec<String>), ParseError> {
    let mut section = Section::Preamble;
    let mut summary_lines: Vec<&str> = Vec::new();
    let mut key_points = Vec::new();
    let mut saw_key_points = false;

    for line in text.lines().map(str::trim) {
        match section {
            Section::Preamble => {
                if let Some(rest) = line.strip_prefix(SUMMARY_MARKER) {
                    section = Section::Summary;
                    if !rest.trim().is_empty() {
                        summary_lines.push(rest.trim());
                    }
                } else if !line.is_empty() {
                    return Err(ParseError::MissingSummary);
                }
            }
            Section::Summary => {
                if let Some(rest) = line.strip_prefix(KEY_POINTS_MARKER) {
                    if !rest.trim().is_empty() {
                        return Err(ParseError::UnexpectedLine(line.to_string()));
                    }
                    section = Section::KeyPoints;
                    saw_key_points = true;
                } else if !line.is_empty() {
                    summary_lines.push(line);
                }
            }
            Section::KeyPoints => {
                if line.is_empty() {
                    continue;
                }
                let point = line
                    .strip_prefix('-')
                    .or_else(|| line.strip_prefix('•'))
                    .ok_or_else(|| ParseError::UnexpectedLine(line.to_string()))?
                    .trim();
                if !point.is_empty() {
                    key_points.push(point.to_string());
                }
            }
        }
    }

    match section {
        Section::Preamble => return Err(ParseError::MissingSummary),
        Section::Summary if !saw_key_points => return Err(ParseError::MissingKeyPoints),
        _ => {}
    }

    let summary = summary_lines.join(" ");
    if summary.is_empty() {
        return Err(ParseError::EmptySummary);
    }
    if key_points.is_empty() {
        return Err(ParseError::NoKeyPoints);
    }

    let summary_chars = summary.chars().count();
    if summary_chars > MAX_SUMMARY_CHARS {
        return Err(ParseError::SummaryTooLong(summary_chars));
    }
    if key_points.len() > MAX_KEY_POINTS {
        return Err(ParseError::TooManyKeyPoints(key_points.len()));
    }
    if let Some(chars) = key_points
        .iter()
        .map(|p| p.chars().count())
        .find(|&chars| chars > MAX_KEY_POINT_CHARS)
    {
        return Err(ParseError::KeyPointTooLong(chars));
    }

    Ok((summary, key_points))
}

/// Deterministic compaction used whenever the model path fails.
///
/// Keeps the start of whatever the model did return, or a placeholder.
#[must_use]
pub fn fallback_compaction(raw_output: Option<&str>, message_count: usize) -> Compaction {
    let summary = match raw_output.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw.chars().take(FALLBACK_SUMMARY_CHARS).collect(),
        None => format!("Conversation segment with {message_count} messages"),
    };

    Compaction {
        summary,
        key_points: vec![FALLBACK_KEY_POINT.to_string()],
        fallback: true,
    }
}

/// Produces summaries and key points for segments.
pub struct Compactor {
    generator: Option<Arc<dyn TextGenerator>>,
    model: Option<String>,
    timeout: Duration,
}

impl Compactor {
    #[must_use]
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            generator,
            model: None,
            timeout: GENERATION_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Compact a segment. Never fails: degrades to [`fallback_compaction`].
    ///
    /// Callers must not invoke this on a segment that already has a summary.
    pub async fn compact(
        &self,
        segment: &ConversationSegment,
        cancel: &CancellationToken,
    ) -> Compaction {
        debug_assert!(!segment.is_compacted(), "segment {} already compacted", segment.id);
        let message_count = segment.messages.len();

        let raw = match self.generate(segment, cancel).await {
            Ok(raw) => raw,
            Err(GenerationError::Unavailable) => {
                return fallback_compaction(None, message_count);
            }
            Err(e) => {
                tracing::warn!(segment = %segment.id, "Compaction call failed, using fallback: {e}");
                return fallback_compaction(None, message_count);
            }
        };

        match parse_compaction(&raw) {
            Ok((summary, key_points)) => Compaction {
                summary,
                key_points,
                fallback: false,
            },
            Err(e) => {
                tracing::warn!(
                    segment = %segment.id,
                    response = %truncate_chars(&raw, 200),
                    "Unparseable compaction response, using fallback: {e}"
                );
                fallback_compaction(Some(&raw), message_count)
            }
        }
    }

    async fn generate(
        &self,
        segment: &ConversationSegment,
        cancel: &CancellationToken,
    ) -> Result<String, GenerationError> {
        let generator = self.generator.as_ref().ok_or(GenerationError::Unavailable)?;

        let request = TextRequest {
            model: self.model.clone(),
            system: COMPACTION_SYSTEM.to_string(),
            prompt: format!("{COMPACTION_PROMPT}\n\n---\n\n{}", segment.transcript()),
            max_tokens: Some(COMPACTION_MAX_TOKENS),
        };

        with_deadline(generator.generate_text(request), self.timeout, cancel).await
    }
}
