//! Traits describing the MQTT transport surface the fleet-protocol bridge needs.

use async_trait::async_trait;
use bytes::Bytes;

use crate::control_packet::{Publish, QoS};
use crate::error::{AckError, ConnectionError, DisconnectError, PublishError, SubscribeError};

/// Event yielded by the event loop.
pub type Event = rumqttc::Event;
/// Incoming packet on the event loop.
pub type Incoming = rumqttc::Packet;

/// Publish, subscribe and ack functionality for a single car's MQTT session.
///
/// Implementors queue a publish/subscribe for delivery once the underlying
/// connection is (re-)established; callers do not need to wait for connectivity
/// before calling these methods.
#[async_trait]
pub trait MqttPubSub: Send + Sync {
    /// Publish `payload` to `topic` at the given QoS.
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Bytes,
    ) -> Result<(), PublishError>;

    /// Subscribe to `topic` at the given QoS.
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), SubscribeError>;

    /// Acknowledge a received Publish (QoS 1).
    async fn ack(&self, publish: &Publish) -> Result<(), AckError>;

    /// Disconnect from the broker.
    async fn disconnect(&self) -> Result<(), DisconnectError>;
}

/// Event loop driving a single car's MQTT connection.
#[async_trait]
pub trait MqttEventLoop: Send {
    /// Poll the event loop for the next [`Event`].
    async fn poll(&mut self) -> Result<Event, ConnectionError>;
}
