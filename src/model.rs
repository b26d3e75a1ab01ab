/// Core data types for the flood telemetry relay.
///
/// This module defines the shared domain model imported by all other modules:
/// the sensor reading coming in from the field, the decision and manual
/// command going back out, and the error types for storage and messaging.
/// It contains no I/O.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Wire helpers
// ---------------------------------------------------------------------------

/// Serializes a `bool` as the integer `0`/`1` the field firmware expects.
fn bool_as_int<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

/// Serializes a known flag as `0`/`1` and an unknown one as `null`.
fn flag_as_int<S: Serializer>(value: &Option<bool>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(flag) => bool_as_int(flag, serializer),
        None => serializer.serialize_none(),
    }
}

/// Interprets a JSON value as a 0/1 flag. Numbers are truthy when non-zero,
/// booleans map directly, everything else is false.
fn flag_from(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// Strict 0/1 reading of a sensor flag: only `0`, `1`, `false` and `true`
/// are known values.
fn strict_flag_from(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(v) if v == 0.0 => Some(false),
            Some(v) if v == 1.0 => Some(true),
            _ => None,
        },
        _ => None,
    }
}

/// Interprets a JSON value as an integer, truncating fractional numbers.
/// Booleans count as 0/1; anything else is `None`.
fn integer_from(value: &Value) -> Option<i64> {
    match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v as i64)),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Sensor reading
// ---------------------------------------------------------------------------

/// One sample from the field device.
///
/// A field is `None` when the device sent a value that cannot be read
/// (`null`, a string, a rain flag other than 0/1). An unknown field never
/// satisfies a condition in the decision rules. `water_level` is also
/// `None` when absent; absent `rain` and `flowPulses` default to 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    #[serde(serialize_with = "flag_as_int")]
    pub rain: Option<bool>,
    #[serde(rename = "flowPulses")]
    pub flow_pulses: Option<i64>,
    #[serde(rename = "waterLevel", skip_serializing_if = "Option::is_none")]
    pub water_level: Option<f64>, // centimeters
}

impl SensorReading {
    /// Parses an inbound MQTT payload.
    ///
    /// The payload must be UTF-8 JSON whose top level is an object. Missing
    /// keys take their defaults (no rain, zero flow, unknown level), present
    /// but unreadable values are unknown, and extra keys are ignored.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ParseError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
        let value: Value =
            serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(Self::from_map(&map)),
            other => Err(ParseError::NotAnObject(json_type_name(&other))),
        }
    }

    fn from_map(map: &Map<String, Value>) -> Self {
        let rain = map.get("rain").map_or(Some(false), strict_flag_from);
        let flow_pulses = map.get("flowPulses").map_or(Some(0), integer_from);
        let water_level = map
            .get("waterLevel")
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite());
        SensorReading {
            rain,
            flow_pulses,
            water_level,
        }
    }
}

/// The `latest` node: the most recent reading plus its capture time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSnapshot<'a> {
    #[serde(flatten)]
    pub reading: &'a SensorReading,
    pub timestamp: i64, // epoch seconds
}

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// Flood status, in ascending order of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Safe,
    Alert,
    Danger,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Safe => write!(f, "SAFE"),
            Status::Alert => write!(f, "ALERT"),
            Status::Danger => write!(f, "DANGER"),
        }
    }
}

/// Gate servo position.
///
/// On the wire this is the firmware's discrete state code (`servoAngle`
/// field), not a degree value. The firmware maps 0 → 0°, 1 → 60°, 3 → 180°.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoPosition {
    Neutral,
    Intermediate,
    Full,
}

impl ServoPosition {
    /// State code sent in the `servoAngle` field.
    pub fn code(self) -> u8 {
        match self {
            ServoPosition::Neutral => 0,
            ServoPosition::Intermediate => 1,
            ServoPosition::Full => 3,
        }
    }

    /// Physical angle the firmware drives the servo to for this code.
    pub fn degrees(self) -> u16 {
        match self {
            ServoPosition::Neutral => 0,
            ServoPosition::Intermediate => 60,
            ServoPosition::Full => 180,
        }
    }
}

impl Serialize for ServoPosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Automated actuator command derived from one reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub status: Status,
    #[serde(rename = "servoAngle")]
    pub servo: ServoPosition,
    #[serde(serialize_with = "bool_as_int")]
    pub buzzer: bool,
}

/// A decision as persisted under `decision` / `decisions/{key}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDecision<'a> {
    #[serde(flatten)]
    pub decision: &'a Decision,
    pub timestamp: i64,
}

// ---------------------------------------------------------------------------
// Manual command
// ---------------------------------------------------------------------------

/// Operator-entered override, normalized from the `manual_control` record.
///
/// Field order here is the order on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManualCommand {
    pub green: u8,
    pub yellow: u8,
    pub red: u8,
    pub buzzer: u8,
    #[serde(rename = "servoAngle")]
    pub servo_angle: i64,
}

impl ManualCommand {
    /// Normalizes a `manual_control` record. Every field missing from the
    /// record, or holding a non-numeric value, becomes 0. A record that is
    /// not an object normalizes to all zeros.
    pub fn from_record(record: &Value) -> Self {
        let lamp = |key: &str| record.get(key).map(|v| u8::from(flag_from(v))).unwrap_or(0);
        ManualCommand {
            green: lamp("green"),
            yellow: lamp("yellow"),
            red: lamp("red"),
            buzzer: lamp("buzzer"),
            servo_angle: record.get("servoAngle").and_then(integer_from).unwrap_or(0),
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Reasons an inbound payload is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    InvalidUtf8(String),
    InvalidJson(String),
    /// Valid JSON, but the top level is not an object.
    NotAnObject(&'static str),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidUtf8(msg) => write!(f, "Payload is not UTF-8: {}", msg),
            ParseError::InvalidJson(msg) => write!(f, "Parse error: {}", msg),
            ParseError::NotAnObject(kind) => write!(f, "Expected JSON object, got {}", kind),
        }
    }
}

impl std::error::Error for ParseError {}

/// Errors from the remote document store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Non-2xx HTTP response from the database.
    HttpError(u16),
    /// The request never produced a response (DNS, TLS, timeout, ...).
    RequestFailed(String),
    /// A response or stream event could not be decoded.
    ParseError(String),
    /// The credential file could not be used.
    Credentials(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::HttpError(code) => write!(f, "HTTP error: {}", code),
            StoreError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            StoreError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            StoreError::Credentials(msg) => write!(f, "Credentials error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// Errors from the outbound messaging channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishError {
    /// The message could not be serialized.
    Encode(String),
    /// The client rejected the publish (request queue closed or full).
    Rejected(String),
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Encode(msg) => write!(f, "Encode error: {}", msg),
            PublishError::Rejected(msg) => write!(f, "Publish rejected: {}", msg),
        }
    }
}

impl std::error::Error for PublishError {}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
