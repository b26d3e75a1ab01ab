//! Manual override relay.
//!
//! Watches the operator's `manual_control` record and forwards every
//! change to the field device as a normalized [`ManualCommand`] on the
//! control topic.
//!
//! The change stream delivers `put`/`patch` events relative to the record,
//! so the relay keeps a local mirror of it and normalizes the whole mirror
//! after each change. Removal of the record publishes nothing.

use serde_json::{Map, Value};
use std::thread;
use std::time::Duration;

use crate::logging::{self, DataSource};
use crate::messaging::{Publisher, publish_json};
use crate::model::{ManualCommand, StoreError};
use crate::store::{RecordChange, RecordWatch};

/// Why a change stream stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    /// The server closed the connection.
    Closed,
    Cancelled(String),
    AuthRevoked,
}

pub struct ManualOverrideRelay<P> {
    publisher: P,
    control_topic: String,
    record_path: String,
    /// Local copy of the record; `None` when it does not exist.
    record: Option<Value>,
}

impl<P: Publisher> ManualOverrideRelay<P> {
    pub fn new(publisher: P, control_topic: &str, record_path: &str) -> Self {
        Self {
            publisher,
            control_topic: control_topic.to_string(),
            record_path: record_path.to_string(),
            record: None,
        }
    }

    /// Applies one change to the mirror and returns the command to publish,
    /// if the record still exists afterwards.
    pub fn apply(&mut self, change: &RecordChange) -> Option<ManualCommand> {
        match change {
            RecordChange::Put { path, data } => set_at(&mut self.record, path, data.clone()),
            RecordChange::Patch { path, data } => match data {
                Value::Object(children) => {
                    for (key, value) in children {
                        set_at(&mut self.record, &format!("{}/{}", path, key), value.clone());
                    }
                }
                // A patch is always an object of children; anything else is a put.
                other => set_at(&mut self.record, path, other.clone()),
            },
            RecordChange::KeepAlive | RecordChange::Cancel(_) | RecordChange::AuthRevoked => {
                return None;
            }
        }
        self.record.as_ref().map(ManualCommand::from_record)
    }

    /// Applies a change and publishes the resulting command.
    /// Returns whether a command went out.
    pub fn handle_change(&mut self, change: &RecordChange) -> bool {
        let Some(command) = self.apply(change) else {
            if matches!(change, RecordChange::Put { .. } | RecordChange::Patch { .. }) {
                logging::debug(
                    DataSource::Manual,
                    Some(&self.record_path),
                    "record removed, nothing to send",
                );
            }
            return false;
        };

        logging::info(
            DataSource::Manual,
            Some(&self.record_path),
            &format!(
                "Manual control received: green={} yellow={} red={} buzzer={} servoAngle={}",
                command.green, command.yellow, command.red, command.buzzer, command.servo_angle
            ),
        );

        match publish_json(&self.publisher, &self.control_topic, &command) {
            Ok(()) => true,
            Err(e) => {
                logging::log_mqtt_failure(&self.control_topic, "publish manual command", &e);
                false
            }
        }
    }

    /// Opens one change stream and relays it until it ends.
    ///
    /// The mirror is reset first: every new stream starts with the full
    /// current value of the record.
    pub fn run_stream<W: RecordWatch + ?Sized>(&mut self, watch: &W) -> Result<StreamEnd, StoreError> {
        self.record = None;
        let changes = watch.watch(&self.record_path)?;
        logging::info(DataSource::Manual, Some(&self.record_path), "Manual control listener started");

        for change in changes {
            match change {
                Ok(RecordChange::KeepAlive) => {}
                Ok(RecordChange::Cancel(reason)) => return Ok(StreamEnd::Cancelled(reason)),
                Ok(RecordChange::AuthRevoked) => return Ok(StreamEnd::AuthRevoked),
                Ok(change) => {
                    self.handle_change(&change);
                }
                // One undecodable event; the stream itself is still good.
                Err(StoreError::ParseError(msg)) => logging::warn(
                    DataSource::Manual,
                    Some(&self.record_path),
                    &format!("skipping stream event: {}", msg),
                ),
                Err(e) => return Err(e),
            }
        }
        Ok(StreamEnd::Closed)
    }

    /// Relays changes forever, reopening the stream after `retry_delay`
    /// whenever it ends or fails.
    pub fn run_forever<W: RecordWatch + ?Sized>(&mut self, watch: &W, retry_delay: Duration) {
        loop {
            match self.run_stream(watch) {
                Ok(StreamEnd::Closed) => logging::warn(
                    DataSource::Manual,
                    Some(&self.record_path),
                    "change stream closed by server",
                ),
                Ok(StreamEnd::Cancelled(reason)) => logging::error(
                    DataSource::Manual,
                    Some(&self.record_path),
                    &format!("change stream cancelled: {}", reason),
                ),
                Ok(StreamEnd::AuthRevoked) => logging::warn(
                    DataSource::Manual,
                    Some(&self.record_path),
                    "credential revoked, reopening stream",
                ),
                Err(e) => logging::log_store_failure(&self.record_path, "watch", &e),
            }
            thread::sleep(retry_delay);
        }
    }
}

// ---------------------------------------------------------------------------
// Mirror updates
// ---------------------------------------------------------------------------

/// Writes `data` at the slash-separated `path` inside `root`, creating
/// intermediate objects. `Value::Null` removes the node. A root left empty
/// is treated as removed, as the database does.
fn set_at(root: &mut Option<Value>, path: &str, data: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let Some((last, parents)) = segments.split_last() else {
        *root = (!data.is_null()).then_some(data);
        prune(root);
        return;
    };

    if data.is_null() && root.is_none() {
        return;
    }

    let mut node = root.get_or_insert_with(|| Value::Object(Map::new()));
    for segment in parents {
        node = object_mut(node)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let parent = object_mut(node);
    if data.is_null() {
        parent.remove(*last);
    } else {
        parent.insert(last.to_string(), data);
    }
    prune(root);
}

/// Returns `value` as an object, replacing any scalar with an empty one.
fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

fn prune(root: &mut Option<Value>) {
    if matches!(root, Some(Value::Object(map)) if map.is_empty()) {
        *root = None;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PublishError;
    use serde_json::json;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Capture(RefCell<Vec<Value>>);

    impl Publisher for &Capture {
        fn publish(&self, _topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
            self.0.borrow_mut().push(serde_json::from_slice(&payload).unwrap());
            Ok(())
        }
    }

    fn put(path: &str, data: Value) -> RecordChange {
        RecordChange::Put {
            path: path.to_string(),
            data,
        }
    }

    fn patch(path: &str, data: Value) -> RecordChange {
        RecordChange::Patch {
            path: path.to_string(),
            data,
        }
    }

    #[test]
    fn test_initial_put_is_normalized() {
        let capture = Capture::default();
        let mut relay = ManualOverrideRelay::new(&capture, "FloodProject/controllers", "manual_control");
        assert!(relay.handle_change(&put("/", json!({"green": 1}))));
        assert_eq!(
            capture.0.borrow()[0],
            json!({"green": 1, "yellow": 0, "red": 0, "buzzer": 0, "servoAngle": 0})
        );
    }

    #[test]
    fn test_deletion_publishes_nothing() {
        let capture = Capture::default();
        let mut relay = ManualOverrideRelay::new(&capture, "FloodProject/controllers", "manual_control");
        relay.handle_change(&put("/", json!({"red": 1})));
        assert!(!relay.handle_change(&put("/", Value::Null)));
        assert_eq!(capture.0.borrow().len(), 1);
    }

    #[test]
    fn test_missing_record_on_connect_publishes_nothing() {
        let capture = Capture::default();
        let mut relay = ManualOverrideRelay::new(&capture, "FloodProject/controllers", "manual_control");
        assert!(!relay.handle_change(&put("/", Value::Null)));
        assert!(capture.0.borrow().is_empty());
    }

    #[test]
    fn test_child_put_updates_mirror() {
        let capture = Capture::default();
        let mut relay = ManualOverrideRelay::new(&capture, "FloodProject/controllers", "manual_control");
        relay.apply(&put("/", json!({"green": 1})));
        let command = relay.apply(&put("/servoAngle", json!(90))).expect("record exists");
        assert_eq!(command.green, 1);
        assert_eq!(command.servo_angle, 90);
    }

    #[test]
    fn test_patch_merges_children() {
        let capture = Capture::default();
        let mut relay = ManualOverrideRelay::new(&capture, "FloodProject/controllers", "manual_control");
        relay.apply(&put("/", json!({"green": 1, "buzzer": 1})));
        let command = relay
            .apply(&patch("/", json!({"buzzer": null, "red": 1})))
            .expect("record exists");
        assert_eq!(command.green, 1);
        assert_eq!(command.red, 1);
        assert_eq!(command.buzzer, 0, "null in a patch removes the child");
    }

    #[test]
    fn test_removing_last_child_counts_as_deletion() {
        let capture = Capture::default();
        let mut relay = ManualOverrideRelay::new(&capture, "FloodProject/controllers", "manual_control");
        relay.apply(&put("/", json!({"buzzer": 1})));
        assert_eq!(relay.apply(&put("/buzzer", Value::Null)), None);
    }

    #[test]
    fn test_keep_alive_changes_nothing() {
        let capture = Capture::default();
        let mut relay = ManualOverrideRelay::new(&capture, "FloodProject/controllers", "manual_control");
        relay.apply(&put("/", json!({"yellow": 1})));
        assert_eq!(relay.apply(&RecordChange::KeepAlive), None);
        assert!(!relay.handle_change(&RecordChange::KeepAlive));
        assert!(capture.0.borrow().is_empty());
    }

    #[test]
    fn test_set_at_replaces_scalar_parent() {
        let mut root = Some(json!(5));
        set_at(&mut root, "/green", json!(1));
        assert_eq!(root, Some(json!({"green": 1})));
    }
}
