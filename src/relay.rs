//! Sensor event relay.
//!
//! For every inbound reading: store it (history, then snapshot), evaluate
//! the flood rules, store the decision, and publish the decision on the
//! control topic. Storage is not a precondition for actuation: a failed
//! write is logged and the pipeline carries on.
//!
//! # Clock injection
//! `handle_message_at` takes the capture time explicitly so tests can pin
//! history keys; `handle_message` uses the wall clock.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::decision::evaluate;
use crate::logging::{self, DataSource};
use crate::messaging::{Publisher, publish_json};
use crate::model::{Decision, ParseError, SensorReading, StoredDecision, StoredSnapshot};
use crate::store::{
    DocumentStore, PATH_DECISION, PATH_DECISIONS, PATH_LATEST, PATH_SENSOR_READINGS, child_path,
};

// ---------------------------------------------------------------------------
// Counters
// ---------------------------------------------------------------------------

/// Running totals for the sensor relay, shared with the interrupt handler.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub received: AtomicU64,
    pub discarded: AtomicU64,
    pub store_failures: AtomicU64,
    pub published: AtomicU64,
    pub publish_failures: AtomicU64,
}

impl RelayStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn log_summary(&self) {
        logging::log_relay_summary(
            self.received.load(Ordering::Relaxed),
            self.discarded.load(Ordering::Relaxed),
            self.store_failures.load(Ordering::Relaxed),
            self.published.load(Ordering::Relaxed),
            self.publish_failures.load(Ordering::Relaxed),
        );
    }
}

// ---------------------------------------------------------------------------
// History keys
// ---------------------------------------------------------------------------

/// Issues `sensor_readings` keys. A timestamp newer than any seen before
/// gets the plain epoch second; a repeat within the same second, or a
/// timestamp at or below the newest one after the clock stepped back, gets
/// `{ts}-{n}` with `n` never reused. No history entry is overwritten.
#[derive(Debug, Default)]
pub struct HistoryKeys {
    newest: Option<i64>,
    suffix: u64,
}

impl HistoryKeys {
    pub fn next(&mut self, timestamp: i64) -> String {
        match self.newest {
            Some(newest) if timestamp <= newest => {
                self.suffix += 1;
                format!("{}-{}", timestamp, self.suffix)
            }
            _ => {
                self.newest = Some(timestamp);
                timestamp.to_string()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// The payload was not a reading; nothing was stored or published.
    Discarded(ParseError),
    Relayed {
        decision: Decision,
        /// Both the history entry and the snapshot were written.
        reading_stored: bool,
        decision_stored: bool,
        published: bool,
    },
}

pub struct EventRelay<S, P> {
    store: S,
    publisher: P,
    control_topic: String,
    keys: HistoryKeys,
    stats: Arc<RelayStats>,
}

impl<S: DocumentStore, P: Publisher> EventRelay<S, P> {
    pub fn new(store: S, publisher: P, control_topic: &str, stats: Arc<RelayStats>) -> Self {
        Self {
            store,
            publisher,
            control_topic: control_topic.to_string(),
            keys: HistoryKeys::default(),
            stats,
        }
    }

    pub fn handle_message(&mut self, payload: &[u8]) -> MessageOutcome {
        self.handle_message_at(payload, Utc::now().timestamp())
    }

    pub fn handle_message_at(&mut self, payload: &[u8], timestamp: i64) -> MessageOutcome {
        RelayStats::bump(&self.stats.received);
        logging::debug(
            DataSource::Relay,
            None,
            &format!("Sensor data received: {}", String::from_utf8_lossy(payload)),
        );

        let reading = match SensorReading::from_payload(payload) {
            Ok(reading) => reading,
            Err(e) => {
                RelayStats::bump(&self.stats.discarded);
                logging::warn(DataSource::Relay, None, &format!("Discarding message: {}", e));
                return MessageOutcome::Discarded(e);
            }
        };

        let key = self.keys.next(timestamp);

        let history_path = child_path(PATH_SENSOR_READINGS, &key);
        let history_ok = self.write(&history_path, to_value(&reading));
        let snapshot = StoredSnapshot {
            reading: &reading,
            timestamp,
        };
        let snapshot_ok = self.write(PATH_LATEST, to_value(&snapshot));

        let decision = evaluate(&reading);
        logging::info(
            DataSource::Relay,
            None,
            &format!(
                "{} (rain={}, flow={}, level={}) → servo {} ({}°), buzzer {}",
                decision.status,
                reading
                    .rain
                    .map(|r| u8::from(r).to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                reading
                    .flow_pulses
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "unknown".to_string()),
                reading
                    .water_level
                    .map(|l| format!("{:.1}cm", l))
                    .unwrap_or_else(|| "unknown".to_string()),
                decision.servo.code(),
                decision.servo.degrees(),
                if decision.buzzer { "on" } else { "off" },
            ),
        );

        let stored_decision = StoredDecision {
            decision: &decision,
            timestamp,
        };
        let decision_value = to_value(&stored_decision);
        let decision_history_ok =
            self.write(&child_path(PATH_DECISIONS, &key), decision_value.clone());
        let decision_latest_ok = self.write(PATH_DECISION, decision_value);

        let published = match publish_json(&self.publisher, &self.control_topic, &decision) {
            Ok(()) => {
                RelayStats::bump(&self.stats.published);
                true
            }
            Err(e) => {
                RelayStats::bump(&self.stats.publish_failures);
                logging::log_mqtt_failure(&self.control_topic, "publish decision", &e);
                false
            }
        };

        MessageOutcome::Relayed {
            decision,
            reading_stored: history_ok && snapshot_ok,
            decision_stored: decision_history_ok && decision_latest_ok,
            published,
        }
    }

    fn write(&self, path: &str, value: Option<Value>) -> bool {
        let Some(value) = value else {
            RelayStats::bump(&self.stats.store_failures);
            logging::error(DataSource::Database, Some(path), "value could not be encoded");
            return false;
        };
        match self.store.set(path, &value) {
            Ok(()) => true,
            Err(e) => {
                RelayStats::bump(&self.stats.store_failures);
                logging::log_store_failure(path, "write", &e);
                false
            }
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Option<Value> {
    serde_json::to_value(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keys_are_unique_within_a_second() {
        let mut keys = HistoryKeys::default();
        assert_eq!(keys.next(100), "100");
        assert_eq!(keys.next(100), "100-1");
        assert_eq!(keys.next(100), "100-2");
        assert_eq!(keys.next(101), "101");
        assert_eq!(keys.next(101), "101-3");
    }

    #[test]
    fn test_history_keys_survive_clock_stepping_back() {
        let mut keys = HistoryKeys::default();
        let issued = [100, 100, 101, 100, 99, 101, 102]
            .into_iter()
            .map(|ts| keys.next(ts))
            .collect::<Vec<_>>();
        assert_eq!(issued, ["100", "100-1", "101", "100-2", "99-3", "101-4", "102"]);

        let mut unique = issued.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), issued.len(), "a history key was reused");
    }
}
