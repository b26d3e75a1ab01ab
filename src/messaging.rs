//! MQTT messaging.
//!
//! The relays publish through the [`Publisher`] port; [`MqttPublisher`] is
//! the broker-backed implementation. It wraps a `rumqttc` client handle,
//! which is cheap to clone and safe to use from several threads at once,
//! so each relay gets its own clone and no extra locking is needed.

use rumqttc::{Client, ConnectReturnCode, Connection, Event, MqttOptions, Packet, QoS};
use serde::Serialize;

use crate::config::MqttConfig;
use crate::model::PublishError;

/// Capacity of the client's request queue (publishes/subscribes waiting
/// for the event loop).
const REQUEST_QUEUE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

pub trait Publisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

impl<T: Publisher + ?Sized> Publisher for std::sync::Arc<T> {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        (**self).publish(topic, payload)
    }
}

/// Serializes `message` as compact JSON and publishes it.
pub fn publish_json<P, T>(publisher: &P, topic: &str, message: &T) -> Result<(), PublishError>
where
    P: Publisher + ?Sized,
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_vec(message).map_err(|e| PublishError::Encode(e.to_string()))?;
    publisher.publish(topic, payload)
}

// ---------------------------------------------------------------------------
// Broker client
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MqttPublisher {
    client: Client,
    /// Fail instead of waiting when the request queue is full.
    non_blocking: bool,
}

impl MqttPublisher {
    /// A handle whose publishes never wait for queue space. The receive
    /// loop thread must publish through one of these: it is the only
    /// thread draining the queue, so a blocking send there cannot finish.
    pub fn non_blocking(&self) -> Self {
        Self {
            client: self.client.clone(),
            non_blocking: true,
        }
    }

    /// Queues a subscription without blocking. Used from inside the
    /// receive loop, where a blocking send could wait on the loop itself.
    pub fn try_subscribe(&self, topic: &str) -> Result<(), PublishError> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(|e| PublishError::Rejected(e.to_string()))
    }
}

impl Publisher for MqttPublisher {
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        let result = if self.non_blocking {
            self.client.try_publish(topic, QoS::AtMostOnce, false, payload)
        } else {
            self.client.publish(topic, QoS::AtMostOnce, false, payload)
        };
        result.map_err(|e| PublishError::Rejected(e.to_string()))
    }
}

/// Errors that stop the relay from starting.
#[derive(Debug)]
pub enum ConnectError {
    /// The broker could not be reached or the handshake failed.
    Unreachable(String),
    /// The broker answered with a non-success CONNACK.
    Refused(String),
    /// The event loop ended before the handshake completed.
    Closed,
    Subscribe(String),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::Unreachable(msg) => write!(f, "MQTT broker unreachable: {}", msg),
            ConnectError::Refused(code) => write!(f, "MQTT connection refused: {}", code),
            ConnectError::Closed => write!(f, "MQTT event loop closed during connect"),
            ConnectError::Subscribe(msg) => write!(f, "MQTT subscribe failed: {}", msg),
        }
    }
}

impl std::error::Error for ConnectError {}

/// A connected broker session: the shared publish handle plus the event
/// loop that must be polled to drive it.
pub struct MqttLink {
    pub publisher: MqttPublisher,
    pub connection: Connection,
}

pub fn options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(config.keep_alive());
    options
}

/// Connects to the broker and waits for a successful CONNACK, then
/// subscribes to `subscribe_topic`.
pub fn connect(config: &MqttConfig, subscribe_topic: &str) -> Result<MqttLink, ConnectError> {
    let (client, mut connection) = Client::new(options(config), REQUEST_QUEUE_CAPACITY);

    match connection.iter().next() {
        Some(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
            if ack.code != ConnectReturnCode::Success {
                return Err(ConnectError::Refused(format!("{:?}", ack.code)));
            }
        }
        Some(Ok(other)) => {
            return Err(ConnectError::Unreachable(format!(
                "expected CONNACK, got {:?}",
                other
            )));
        }
        Some(Err(e)) => return Err(ConnectError::Unreachable(e.to_string())),
        None => return Err(ConnectError::Closed),
    }

    let publisher = MqttPublisher {
        client,
        non_blocking: false,
    };
    publisher
        .try_subscribe(subscribe_topic)
        .map_err(|e| ConnectError::Subscribe(e.to_string()))?;

    Ok(MqttLink {
        publisher,
        connection,
    })
}
