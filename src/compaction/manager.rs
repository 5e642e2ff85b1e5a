//! Orchestrates estimation, segmenting, scoring and compaction for one conversation.

use super::assembler::assemble_context;
use super::counter::{ModelFamily, estimate_message_tokens, estimate_messages, estimate_system_prompt};
use super::scoring::{Importance, ImportanceScorer};
use super::segment::{ConversationSegment, SegmentIds, segment_messages};
use super::summarization::Compactor;
use crate::config::ContextManagerConfig;
use crate::error::Result;
use crate::provider::{Message, StructuredGenerator, TextGenerator};
use crate::session::{ManagerState, SnapshotError, SnapshotStore};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where a conversation stands against its token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextWindow {
    pub total_tokens: usize,
    pub max_tokens: usize,
    pub system_prompt_tokens: usize,
    /// Raw (non-synthetic) message tokens
    pub message_tokens: usize,
    /// Tokens of the rendered compacted history
    pub summary_tokens: usize,
    pub recent_messages: usize,
    pub summarized_segments: usize,
}

impl ContextWindow {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn usage_pct(&self) -> f64 {
        if self.max_tokens == 0 {
            return 0.0;
        }
        self.total_tokens as f64 / self.max_tokens as f64 * 100.0
    }

    /// One-line summary for logs and the CLI.
    #[must_use]
    pub fn to_log_string(&self) -> String {
        format!(
            "{}/{} tokens ({:.1}%): system {}, messages {} ({}), summaries {} ({} segments)",
            self.total_tokens,
            self.max_tokens,
            self.usage_pct(),
            self.system_prompt_tokens,
            self.message_tokens,
            self.recent_messages,
            self.summary_tokens,
            self.summarized_segments,
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportanceCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextStats {
    pub segment_count: usize,
    pub total_compacted_messages: usize,
    pub counts_by_importance: ImportanceCounts,
}

/// Keeps one conversation under its token budget.
///
/// Owns the compacted segment history. History is append-only except for
/// [`force_summarize_all`](Self::force_summarize_all) and
/// [`load_state`](Self::load_state), which replace it wholesale.
pub struct ContextManager {
    config: ContextManagerConfig,
    family: ModelFamily,
    scorer: ImportanceScorer,
    compactor: Compactor,
    store: Option<SnapshotStore>,
    session_id: Option<String>,
    cancel: CancellationToken,
    segments: Vec<ConversationSegment>,
    ids: SegmentIds,
    /// Stream position of the next compacted message
    next_position: usize,
}

impl ContextManager {
    /// Build a manager. Either generator may be `None`, in which case the
    /// deterministic fallbacks run directly.
    pub fn new(
        config: ContextManagerConfig,
        structured: Option<Arc<dyn StructuredGenerator>>,
        text: Option<Arc<dyn TextGenerator>>,
    ) -> Result<Self> {
        config.validate()?;

        let timeout = config.generation_timeout();
        let model = config.compaction_model.clone();
        let scorer = ImportanceScorer::new(structured)
            .with_model(model.clone())
            .with_timeout(timeout);
        let compactor = Compactor::new(text).with_model(model).with_timeout(timeout);
        let store = config.snapshot_dir.clone().map(SnapshotStore::new);

        Ok(Self {
            family: config.family(),
            config,
            scorer,
            compactor,
            store,
            session_id: None,
            cancel: CancellationToken::new(),
            segments: Vec::new(),
            ids: SegmentIds::default(),
            next_position: 0,
        })
    }

    /// Bind to a session so a raw snapshot is written before each compaction.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Cancelling the token makes in-flight generation calls fall back.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ContextManagerConfig {
        &self.config
    }

    /// Compacted history in chronological order.
    #[must_use]
    pub fn segments(&self) -> &[ConversationSegment] {
        &self.segments
    }

    #[must_use]
    pub fn analyze_context(&self, messages: &[Message], system_prompt: &str) -> ContextWindow {
        let rendered = assemble_context(&self.segments);
        let raw = live_messages(messages, &rendered);
        let system_prompt_tokens = estimate_system_prompt(system_prompt, self.family).tokens;
        let message_tokens = raw
            .iter()
            .map(|m| estimate_message_tokens(m, self.family))
            .sum();
        let summary_tokens = estimate_messages(&rendered, self.family);

        ContextWindow {
            total_tokens: system_prompt_tokens + message_tokens + summary_tokens,
            max_tokens: self.config.max_context_tokens,
            system_prompt_tokens,
            message_tokens,
            summary_tokens,
            recent_messages: raw.len(),
            summarized_segments: self.segments.len(),
        }
    }

    /// Return a message list that fits the budget.
    ///
    /// Under the target the input comes back unchanged. Otherwise the oldest
    /// raw messages are compacted into new segments and replaced by the
    /// rendered history. Never fails: generation and persistence problems
    /// degrade to fallbacks.
    pub async fn manage_context(&mut self, messages: &[Message], system_prompt: &str) -> Vec<Message> {
        let window = self.analyze_context(messages, system_prompt);
        if window.total_tokens <= self.config.target_context_tokens {
            return messages.to_vec();
        }

        let live: Vec<Message> = live_messages(messages, &assemble_context(&self.segments))
            .into_iter()
            .cloned()
            .collect();
        // Compacted blocks from another manager are kept verbatim ahead of ours
        let (earlier, raw): (Vec<Message>, Vec<Message>) =
            live.iter().cloned().partition(Message::is_compacted_context);
        let mut compact_count = self.plan_compaction(&raw, window.total_tokens);
        if compact_count == 0 {
            tracing::debug!(
                total_tokens = window.total_tokens,
                "Over target but nothing can be compacted"
            );
            return messages.to_vec();
        }

        tracing::info!(
            tokens_before = window.total_tokens,
            target = self.config.target_context_tokens,
            max = self.config.max_context_tokens,
            compacting = compact_count,
            keeping = raw.len() - compact_count,
            "Compacting conversation history"
        );

        if let Some(session_id) = self.session_id.clone()
            && self.store.is_some()
            && let Err(e) = self.save_snapshot(&session_id, &live).await
        {
            tracing::warn!(session = %session_id, "Failed to save raw snapshot: {e}");
        }

        let mut tail = raw;
        let mut after = window;
        // Repeat while summaries alone leave the total over the ceiling
        while compact_count > 0 {
            let rest = tail.split_off(compact_count);
            self.compact_into_history(&tail).await;
            tail = rest;

            let kept: Vec<Message> = earlier.iter().chain(&tail).cloned().collect();
            after = self.analyze_context(&kept, system_prompt);
            if after.total_tokens <= self.config.max_context_tokens {
                break;
            }
            compact_count = self.plan_compaction(&tail, after.total_tokens);
        }

        let mut result = earlier;
        result.extend(assemble_context(&self.segments));
        result.extend(tail.iter().cloned());

        tracing::info!(
            tokens_before = window.total_tokens,
            tokens_after = after.total_tokens,
            segments = self.segments.len(),
            "Compaction complete"
        );
        if after.total_tokens > self.config.max_context_tokens {
            tracing::warn!(
                tokens_after = after.total_tokens,
                max = self.config.max_context_tokens,
                kept = tail.len(),
                "Still over the ceiling after keeping the most recent messages"
            );
        }

        result
    }

    /// Discard history and compact every raw message in one pass.
    ///
    /// Returns the synthetic messages standing in for the whole list,
    /// preceded by any compacted blocks this manager did not render.
    pub async fn force_summarize_all(&mut self, messages: &[Message]) -> Vec<Message> {
        let (earlier, raw): (Vec<Message>, Vec<Message>) =
            live_messages(messages, &assemble_context(&self.segments))
                .into_iter()
                .cloned()
                .partition(Message::is_compacted_context);
        self.segments.clear();
        self.next_position = 0;

        tracing::info!(messages = raw.len(), "Forcing compaction of all messages");
        self.compact_into_history(&raw).await;

        let mut result = earlier;
        result.extend(assemble_context(&self.segments));
        result
    }

    /// Write a raw-message snapshot for `session_id`.
    pub async fn save_snapshot(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> std::result::Result<PathBuf, SnapshotError> {
        let store = self.store.as_ref().ok_or(SnapshotError::Disabled)?;
        store
            .save_messages(session_id, self.config.compaction_model.as_deref(), messages)
            .await
    }

    /// Write the segment history for `session_id`.
    pub async fn save_state(&self, session_id: &str) -> std::result::Result<PathBuf, SnapshotError> {
        let store = self.store.as_ref().ok_or(SnapshotError::Disabled)?;
        let state = ManagerState {
            segments: self.segments.clone(),
            timestamp: Utc::now(),
            segment_counter: self.ids.counter(),
        };
        let path = store.save_state(session_id, &state).await?;
        tracing::debug!(session = %session_id, segments = self.segments.len(), "Saved manager state");
        Ok(path)
    }

    /// Replace history with the saved state for `session_id`.
    ///
    /// Returns `false` and leaves history untouched when nothing was saved.
    pub async fn load_state(&mut self, session_id: &str) -> std::result::Result<bool, SnapshotError> {
        let store = self.store.as_ref().ok_or(SnapshotError::Disabled)?;
        let Some(state) = store.load_state(session_id).await? else {
            return Ok(false);
        };

        self.next_position = state.segments.iter().map(|s| s.messages.len()).sum();
        self.ids = SegmentIds::starting_at(state.segment_counter);
        self.segments = state.segments;
        tracing::debug!(session = %session_id, segments = self.segments.len(), "Loaded manager state");
        Ok(true)
    }

    #[must_use]
    pub fn stats(&self) -> ContextStats {
        let mut counts = ImportanceCounts::default();
        for segment in &self.segments {
            match segment.importance {
                Importance::High => counts.high += 1,
                Importance::Medium => counts.medium += 1,
                Importance::Low => counts.low += 1,
            }
        }

        ContextStats {
            segment_count: self.segments.len(),
            total_compacted_messages: self.segments.iter().map(|s| s.messages.len()).sum(),
            counts_by_importance: counts,
        }
    }

    /// Case-insensitive substring search over summaries, key points, topics
    /// and reasoning. A query of only whitespace matches nothing.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<&ConversationSegment> {
        let needle = query.to_lowercase();
        if needle.trim().is_empty() {
            return Vec::new();
        }
        self.segments.iter().filter(|s| s.matches(&needle)).collect()
    }

    /// Number of oldest raw messages to compact.
    fn plan_compaction(&self, raw: &[Message], total_tokens: usize) -> usize {
        let reclaim_target = if total_tokens > self.config.max_context_tokens {
            self.config
                .target_context_tokens
                .min(self.config.emergency_floor_tokens())
        } else {
            self.config.target_context_tokens
        };
        let to_free = total_tokens.saturating_sub(reclaim_target) + self.config.safety_margin_tokens;

        let mut freed = 0;
        let mut count = 0;
        for message in raw {
            if freed >= to_free {
                break;
            }
            freed += estimate_message_tokens(message, self.family);
            count += 1;
        }

        let floor = self.config.min_recent_messages;
        if raw.len() > floor {
            count.min(raw.len() - floor)
        } else {
            // Short conversations still keep the newest message
            count.min(raw.len().saturating_sub(1))
        }
    }

    /// Segment, score and compact `messages`, then append to history.
    async fn compact_into_history(&mut self, messages: &[Message]) {
        let mut segments = segment_messages(
            messages,
            self.config.segment_size,
            self.family,
            &mut self.ids,
            self.next_position,
        );

        // Sequential so fallbacks and logs follow conversation order
        for segment in &mut segments {
            if segment.is_compacted() {
                continue;
            }
            if !segment.is_scored() {
                let assessment = self.scorer.score(segment, &self.cancel).await;
                segment.apply_assessment(assessment);
            }
            let compaction = self.compactor.compact(segment, &self.cancel).await;
            let fallback = compaction.fallback;
            segment.apply_compaction(compaction);
            tracing::debug!(
                segment = %segment.id,
                importance = ?segment.importance,
                messages = segment.messages.len(),
                fallback,
                "Segment compacted"
            );
        }

        self.next_position += segments.iter().map(|s| s.messages.len()).sum::<usize>();
        self.segments.extend(segments);
    }
}

/// Messages that count as live conversation.
///
/// Drops absent messages and this manager's own rendering of its history
/// (`rendered`). A compacted block rendered elsewhere is kept as raw content.
fn live_messages<'a>(messages: &'a [Message], rendered: &[Message]) -> Vec<&'a Message> {
    messages
        .iter()
        .filter(|m| !m.is_empty() && !(m.is_compacted_context() && rendered.contains(*m)))
        .collect()
}
