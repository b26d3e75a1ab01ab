//! Remote document storage for the relay.
//!
//! The relay writes readings and decisions through the [`DocumentStore`]
//! port and watches the operator's `manual_control` record through
//! [`RecordWatch`]. The production implementation of both is the Firebase
//! Realtime Database REST client in `firebase`; tests use in-memory fakes.
//!
//! Submodules:
//! - `firebase`: REST client, credential loading.
//! - `stream`: server-sent event parsing for record change streams.

pub mod firebase;
pub mod stream;

use serde_json::Value;
use std::sync::{Arc, OnceLock};

use crate::config::DatabaseConfig;
use crate::model::StoreError;

pub use firebase::{Credentials, FirebaseStore};
pub use stream::RecordChange;

// ---------------------------------------------------------------------------
// Database paths
// ---------------------------------------------------------------------------

/// Most recent reading plus capture time, overwritten per message.
pub const PATH_LATEST: &str = "latest";
/// Append-only reading history, keyed by capture time.
pub const PATH_SENSOR_READINGS: &str = "sensor_readings";
/// Most recent decision; the operator dashboard reads this node.
pub const PATH_DECISION: &str = "decision";
/// Append-only decision history, keyed like `sensor_readings`.
pub const PATH_DECISIONS: &str = "decisions";
/// Operator-entered override record.
pub const PATH_MANUAL_CONTROL: &str = "manual_control";

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Write side of the document store.
pub trait DocumentStore {
    /// Replaces the value at `path` (slash-separated, no leading slash).
    fn set(&self, path: &str, value: &Value) -> Result<(), StoreError>;
}

impl<T: DocumentStore + ?Sized> DocumentStore for Arc<T> {
    fn set(&self, path: &str, value: &Value) -> Result<(), StoreError> {
        (**self).set(path, value)
    }
}

/// Change notifications for a single record.
///
/// Each call to `watch` opens a fresh stream, which starts with the current
/// value of the record as a `put` at `/`.
pub trait RecordWatch {
    type Changes: Iterator<Item = Result<RecordChange, StoreError>>;

    fn watch(&self, path: &str) -> Result<Self::Changes, StoreError>;
}

impl<T: RecordWatch + ?Sized> RecordWatch for Arc<T> {
    type Changes = T::Changes;

    fn watch(&self, path: &str) -> Result<Self::Changes, StoreError> {
        (**self).watch(path)
    }
}

// ---------------------------------------------------------------------------
// One-time setup
// ---------------------------------------------------------------------------

static SHARED: OnceLock<Arc<FirebaseStore>> = OnceLock::new();

/// Builds the process-wide database client on first call and returns the
/// same handle on every later call, whatever config is passed.
pub fn init(config: &DatabaseConfig) -> Result<Arc<FirebaseStore>, StoreError> {
    if let Some(store) = SHARED.get() {
        return Ok(Arc::clone(store));
    }
    let store = Arc::new(FirebaseStore::connect(config)?);
    Ok(Arc::clone(SHARED.get_or_init(|| store)))
}

/// Joins a parent path and a child key.
pub fn child_path(parent: &str, key: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), key.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_path_joins_with_single_slash() {
        assert_eq!(child_path("sensor_readings", "1700000000"), "sensor_readings/1700000000");
        assert_eq!(child_path("decisions/", "/17"), "decisions/17");
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = DatabaseConfig {
            url: "https://flood-test.firebaseio.com".to_string(),
            ..DatabaseConfig::default()
        };
        let first = init(&config).expect("client should build without credentials");
        let second = init(&config).expect("second init should reuse the handle");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
