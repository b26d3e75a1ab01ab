//! Server-sent event parsing for record change streams.
//!
//! A streaming `GET` with `Accept: text/event-stream` against the database
//! yields blocks of `event:` / `data:` lines separated by blank lines:
//!
//! ```text
//! event: put
//! data: {"path":"/","data":{"green":1}}
//!
//! event: keep-alive
//! data: null
//! ```
//!
//! [`EventStream`] splits a byte stream into raw events; [`ChangeStream`]
//! turns those into typed [`RecordChange`]s.

use serde::Deserialize;
use serde_json::Value;
use std::io::{self, BufRead};

use crate::model::StoreError;

// ---------------------------------------------------------------------------
// Raw events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerEvent {
    pub event: String,
    pub data: String,
}

/// Iterator over the events of a `text/event-stream` body.
pub struct EventStream<R> {
    reader: R,
    line: String,
}

impl<R: BufRead> EventStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
        }
    }
}

impl<R: BufRead> Iterator for EventStream<R> {
    type Item = io::Result<ServerEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut pending = ServerEvent::default();
        let mut has_fields = false;

        loop {
            self.line.clear();
            let read = match self.reader.read_line(&mut self.line) {
                Ok(n) => n,
                Err(e) => return Some(Err(e)),
            };

            if read == 0 {
                // EOF: flush an unterminated trailing event, if any.
                return has_fields.then_some(Ok(pending));
            }

            let line = self.line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if has_fields {
                    return Some(Ok(pending));
                }
                continue;
            }
            if line.starts_with(':') {
                continue; // comment
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };

            match field {
                "event" => {
                    pending.event = value.to_string();
                    has_fields = true;
                }
                "data" => {
                    if !pending.data.is_empty() {
                        pending.data.push('\n');
                    }
                    pending.data.push_str(value);
                    has_fields = true;
                }
                _ => {} // id / retry are not used by the database
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Typed changes
// ---------------------------------------------------------------------------

/// One notification about the watched record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    /// Replace the value at `path` (relative to the record; `/` is the
    /// record itself). `Value::Null` means removal.
    Put { path: String, data: Value },
    /// Merge the children of `data` into the value at `path`.
    Patch { path: String, data: Value },
    KeepAlive,
    /// The server closed the stream, e.g. because rules now deny access.
    Cancel(String),
    /// The credential used to open the stream is no longer valid.
    AuthRevoked,
}

#[derive(Deserialize)]
struct ChangeBody {
    path: String,
    #[serde(default)]
    data: Value,
}

impl RecordChange {
    pub fn from_event(event: &ServerEvent) -> Result<Self, StoreError> {
        let body = || -> Result<ChangeBody, StoreError> {
            serde_json::from_str(&event.data).map_err(|e| {
                StoreError::ParseError(format!("bad '{}' event body: {}", event.event, e))
            })
        };

        match event.event.as_str() {
            "put" => {
                let ChangeBody { path, data } = body()?;
                Ok(RecordChange::Put { path, data })
            }
            "patch" => {
                let ChangeBody { path, data } = body()?;
                Ok(RecordChange::Patch { path, data })
            }
            "keep-alive" => Ok(RecordChange::KeepAlive),
            "cancel" => Ok(RecordChange::Cancel(plain_text(&event.data))),
            "auth_revoked" => Ok(RecordChange::AuthRevoked),
            other => Err(StoreError::ParseError(format!("unknown stream event '{}'", other))),
        }
    }
}

/// Cancel reasons arrive either as a JSON string or as bare text.
fn plain_text(data: &str) -> String {
    match serde_json::from_str::<Value>(data) {
        Ok(Value::String(s)) => s,
        _ => data.to_string(),
    }
}

/// Iterator of typed changes over a raw event stream.
pub struct ChangeStream<R> {
    events: EventStream<R>,
}

impl<R: BufRead> ChangeStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            events: EventStream::new(reader),
        }
    }
}

impl<R: BufRead> Iterator for ChangeStream<R> {
    type Item = Result<RecordChange, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let event = self.events.next()?;
        Some(
            event
                .map_err(|e| StoreError::RequestFailed(format!("stream read: {}", e)))
                .and_then(|ev| RecordChange::from_event(&ev)),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
