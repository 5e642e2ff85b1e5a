//! Best-effort JSON snapshots keyed by session id.
//!
//! Two files per session, both whole-file overwrites:
//! - `<id>.json`: raw messages `{sessionId, timestamp, modelId, messages}`
//! - `<id>.state.json`: manager state `{segments, timestamp, segmentCounter}`

use crate::compaction::ConversationSegment;
use crate::provider::Message;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MESSAGES_SUFFIX: &str = ".json";
const STATE_SUFFIX: &str = ".state.json";

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("Snapshot directory not configured")]
    Disabled,
}

/// Raw-message snapshot of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnapshot {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub model_id: Option<String>,
    #[serde(deserialize_with = "skip_null_messages")]
    pub messages: Vec<Message>,
}

/// Persisted context manager state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerState {
    pub segments: Vec<ConversationSegment>,
    pub timestamp: DateTime<Utc>,
    pub segment_counter: u64,
}

/// Directory of per-session snapshot files.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Overwrite the raw-message snapshot for a session.
    pub async fn save_messages(
        &self,
        session_id: &str,
        model_id: Option<&str>,
        messages: &[Message],
    ) -> Result<PathBuf, SnapshotError> {
        let snapshot = MessageSnapshot {
            session_id: session_id.to_string(),
            timestamp: Utc::now(),
            model_id: model_id.map(str::to_string),
            messages: messages.to_vec(),
        };
        let path = self.path_for(session_id, MESSAGES_SUFFIX)?;
        write_json(&path, &snapshot).await?;
        Ok(path)
    }

    /// Load the raw-message snapshot, `None` if the session has none.
    pub async fn load_messages(
        &self,
        session_id: &str,
    ) -> Result<Option<MessageSnapshot>, SnapshotError> {
        read_json(&self.path_for(session_id, MESSAGES_SUFFIX)?).await
    }

    /// Overwrite the manager-state snapshot for a session.
    pub async fn save_state(
        &self,
        session_id: &str,
        state: &ManagerState,
    ) -> Result<PathBuf, SnapshotError> {
        let path = self.path_for(session_id, STATE_SUFFIX)?;
        write_json(&path, state).await?;
        Ok(path)
    }

    /// Load the manager-state snapshot, `None` if the session has none.
    pub async fn load_state(&self, session_id: &str) -> Result<Option<ManagerState>, SnapshotError> {
        read_json(&self.path_for(session_id, STATE_SUFFIX)?).await
    }

    fn path_for(&self, session_id: &str, suffix: &str) -> Result<PathBuf, SnapshotError> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}{suffix}")))
    }
}

/// Session ids become file names: ASCII alphanumerics, `-` and `_` only.
fn validate_session_id(session_id: &str) -> Result<(), SnapshotError> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if valid {
        Ok(())
    } else {
        Err(SnapshotError::InvalidSessionId(session_id.to_string()))
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec_pretty(value)?;

    // Write then rename so a crash never leaves a half-written snapshot
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SnapshotError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn skip_null_messages<'de, D>(deserializer: D) -> Result<Vec<Message>, D::Error>
where
    D: Deserializer<'de>,
{
    let items: Vec<Option<Message>> = Vec::deserialize(deserializer)?;
    Ok(items.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::{ModelFamily, SegmentIds, segment_messages};
    use tempfile::tempdir;

    fn conversation() -> Vec<Message> {
        vec![
            Message::user("Hello, world!"),
            Message::assistant("Hi there!"),
            Message::tool_result("call_1", "file contents here"),
        ]
    }

    #[tokio::test]
    async fn test_save_and_load_messages() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let path = store
            .save_messages("session-1", Some("test-model"), &conversation())
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("session-1.json"));

        let loaded = store.load_messages("session-1").await.unwrap().unwrap();
        assert_eq!(loaded.session_id, "session-1");
        assert_eq!(loaded.model_id.as_deref(), Some("test-model"));
        assert_eq!(loaded.messages, conversation());
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_file() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        store
            .save_messages("s", None, &conversation())
            .await
            .unwrap();
        store
            .save_messages("s", None, &[Message::user("only one")])
            .await
            .unwrap();

        let loaded = store.load_messages("s").await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_none() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("never-created"));
        assert!(store.load_messages("nope").await.unwrap().is_none());
        assert!(store.load_state("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("nested").join("snapshots"));

        let mut ids = SegmentIds::default();
        let segments = segment_messages(&conversation(), 2, ModelFamily::Generic, &mut ids, 0);
        let state = ManagerState {
            segments,
            timestamp: Utc::now(),
            segment_counter: ids.counter(),
        };

        let path = store.save_state("abc_123", &state).await.unwrap();
        assert!(path.ends_with("abc_123.state.json"));

        let loaded = store.load_state("abc_123").await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_null_messages_are_skipped() {
        let dir = tempdir().unwrap();
        let json = r#"{
            "sessionId": "s",
            "timestamp": "2025-01-01T00:00:00Z",
            "modelId": null,
            "messages": [
                null,
                {"role": "user", "content": [{"type": "text", "text": "kept"}]},
                null
            ]
        }"#;
        std::fs::write(dir.path().join("s.json"), json).unwrap();

        let store = SnapshotStore::new(dir.path());
        let loaded = store.load_messages("s").await.unwrap().unwrap();
        assert_eq!(loaded.messages, vec![Message::user("kept")]);
    }

    #[tokio::test]
    async fn test_invalid_session_ids() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        for bad in ["", "../escape", "a/b", ".hidden", "a.state", "sp ace"] {
            assert!(matches!(
                store.save_messages(bad, None, &[]).await,
                Err(SnapshotError::InvalidSessionId(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_corrupt_state_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("s.state.json"), "{ not json").unwrap();

        let store = SnapshotStore::new(dir.path());
        assert!(matches!(
            store.load_state("s").await,
            Err(SnapshotError::Serialization(_))
        ));
    }
}
