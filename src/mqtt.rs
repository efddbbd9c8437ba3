//! MQTT transport backed by `rumqttc`.

use crate::bridge::{BridgeError, Transport, TransportControl, TransportEvent};
use crate::config::MqttConfig;
use async_trait::async_trait;
use gridstream_core::InboundMessage;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_CAPACITY: usize = 64;

/// Builds the event side and the control side of one broker connection.
/// Nothing touches the network until the transport is first polled.
pub fn connect(config: &MqttConfig) -> (MqttTransport, MqttControl) {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);

    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let reconnecting = Arc::new(AtomicBool::new(false));
    info!("Connecting to MQTT broker at {}:{}", config.host, config.port);
    (
        MqttTransport {
            eventloop,
            reconnecting: reconnecting.clone(),
        },
        MqttControl { client, reconnecting },
    )
}

pub struct MqttTransport {
    eventloop: EventLoop,
    reconnecting: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MqttTransport {
    async fn next_event(&mut self) -> Result<TransportEvent, BridgeError> {
        match self.eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to MQTT broker");
                Ok(TransportEvent::Connected)
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => Ok(TransportEvent::Message(InboundMessage::new(
                publish.topic,
                publish.payload,
            ))),
            Ok(Event::Incoming(Packet::SubAck(_))) => {
                info!("MQTT subscription successful");
                Ok(TransportEvent::Idle)
            }
            Ok(_) => Ok(TransportEvent::Idle),
            // A requested drop surfaces as one connection error; the next
            // poll reconnects.
            Err(e) if self.reconnecting.swap(false, Ordering::SeqCst) => {
                debug!("Connection closed for reconnect: {}", e);
                Ok(TransportEvent::Idle)
            }
            Err(e) => Err(BridgeError::Transport(e.to_string())),
        }
    }
}

#[derive(Clone)]
pub struct MqttControl {
    client: AsyncClient,
    reconnecting: Arc<AtomicBool>,
}

#[async_trait]
impl TransportControl for MqttControl {
    async fn subscribe(&self, filter: &str) -> Result<(), BridgeError> {
        // Called from the task that drives the event loop, so it must not wait
        // on request capacity.
        self.client
            .try_subscribe(filter, QoS::AtMostOnce)
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    async fn reconnect(&self) -> Result<(), BridgeError> {
        self.reconnecting.store(true, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        self.client
            .try_disconnect()
            .map_err(|e| BridgeError::Transport(e.to_string()))
    }
}
