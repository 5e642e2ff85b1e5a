mod store;

pub use store::{ManagerState, MessageSnapshot, SnapshotError, SnapshotStore};

/// Generate a fresh session id.
#[must_use]
pub fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
