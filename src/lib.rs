//! Flood telemetry relay.
//!
//! Receives flood-sensor readings over MQTT, stores them in a Firebase
//! Realtime Database, derives a gate/buzzer command from fixed rules and
//! publishes it back to the field device. Operator overrides entered in the
//! database are forwarded to the device as well.

pub mod config;
pub mod decision;
pub mod logging;
pub mod manual;
pub mod messaging;
pub mod model;
pub mod relay;
pub mod store;
pub mod supervisor;
