//! Process supervisor.
//!
//! Startup order: database client (one-time, idempotent), broker connection
//! and sensor subscription, manual-control listener on a background thread,
//! then the MQTT receive loop on the calling thread. Only a failed broker
//! connection is fatal; database problems are logged and the relay keeps
//! actuating.

use rumqttc::{ConnectReturnCode, Connection, Event, Packet};
use std::error::Error;
use std::sync::Arc;
use std::thread;

use crate::config::{Config, MqttConfig};
use crate::logging::{self, DataSource};
use crate::manual::ManualOverrideRelay;
use crate::messaging::{self, MqttPublisher};
use crate::relay::{EventRelay, RelayStats};
use crate::store::{self, DocumentStore, PATH_LATEST, PATH_MANUAL_CONTROL};

/// Starts every component and blocks on the receive loop.
///
/// Returns only on a fatal startup error or if the broker session is torn
/// down for good; an operator interrupt exits the process from the signal
/// handler instead.
pub fn run(config: &Config, stats: Arc<RelayStats>) -> Result<(), Box<dyn Error>> {
    let store = store::init(&config.database)?;
    match store.probe(PATH_LATEST) {
        Ok(()) => logging::info(DataSource::Database, Some(&config.database.url), "Database reachable"),
        Err(e) => logging::log_store_failure(PATH_LATEST, "startup probe", &e),
    }

    let mqtt = &config.mqtt;
    logging::info(
        DataSource::Mqtt,
        None,
        &format!("Connecting to broker {}:{}...", mqtt.host, mqtt.port),
    );
    let link = messaging::connect(mqtt, &mqtt.sensor_topic)?;
    logging::info(DataSource::Mqtt, None, "Connected to MQTT broker");
    logging::info(DataSource::Mqtt, Some(&mqtt.sensor_topic), "Subscribed");

    let mut manual = ManualOverrideRelay::new(
        link.publisher.clone(),
        &mqtt.control_topic,
        PATH_MANUAL_CONTROL,
    );
    let watch_store = Arc::clone(&store);
    let retry_delay = config.database.reconnect_delay();
    thread::Builder::new()
        .name("manual-control".to_string())
        .spawn(move || manual.run_forever(&watch_store, retry_delay))?;

    let relay = EventRelay::new(store, link.publisher.non_blocking(), &mqtt.control_topic, stats);
    receive_loop(link.connection, &link.publisher, relay, mqtt);
    Ok(())
}

/// Drives the broker event loop, handing sensor messages to the relay.
///
/// Connection errors are left to the client's own reconnect: the next poll
/// reconnects, and the subscription is re-issued on each new CONNACK.
fn receive_loop<S: DocumentStore>(
    mut connection: Connection,
    subscriber: &MqttPublisher,
    mut relay: EventRelay<S, MqttPublisher>,
    config: &MqttConfig,
) {
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.topic == config.sensor_topic {
                    relay.handle_message(&publish.payload);
                } else {
                    logging::debug(DataSource::Mqtt, Some(&publish.topic), "ignoring message on unexpected topic");
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    logging::info(DataSource::Mqtt, None, "Reconnected to MQTT broker");
                    if let Err(e) = subscriber.try_subscribe(&config.sensor_topic) {
                        logging::log_mqtt_failure(&config.sensor_topic, "resubscribe", &e);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                logging::log_mqtt_failure(&config.sensor_topic, "receive", &e);
                thread::sleep(config.reconnect_delay());
            }
        }
    }
    logging::warn(DataSource::Mqtt, None, "MQTT event loop ended");
}
