//! Transport layer
//!
//! Trait abstraction over the reconnecting pub/sub client so consumers can
//! inject a test double instead of a live broker session.

use rumqttc::v5::mqttbytes::QoS;

pub mod mqtt;

/// Pub/sub transport operations
///
/// Implemented by [`mqtt::MqttClient`]; mock implementations stand in for
/// it in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the broker session; no-op when already connected.
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Close the broker session.
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Subscribe to a topic. `Ok(false)` when the session is down.
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<bool, Self::Error>;

    /// Unsubscribe from a topic. `Ok(true)` when it was never subscribed.
    async fn unsubscribe(&self, topic: &str) -> Result<bool, Self::Error>;

    /// Register a message handler for a topic.
    async fn register_handler(&self, topic: &str, handler: mqtt::MessageCallback);

    /// Current connection status.
    fn is_connected(&self) -> bool;

    /// Current connection state, `None` before the first connect.
    fn connection_state(&self) -> Option<mqtt::ConnectionState>;
}

/// Type alias for the MQTT-backed transport
pub type MqttTransport = mqtt::MqttClient;

#[async_trait::async_trait]
impl Transport for mqtt::MqttClient {
    type Error = mqtt::MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        mqtt::MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        mqtt::MqttClient::disconnect(self).await
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<bool, Self::Error> {
        mqtt::MqttClient::subscribe(self, topic, qos).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<bool, Self::Error> {
        mqtt::MqttClient::unsubscribe(self, topic).await
    }

    async fn register_handler(&self, topic: &str, handler: mqtt::MessageCallback) {
        mqtt::MqttClient::register_handler(self, topic, handler).await;
    }

    fn is_connected(&self) -> bool {
        mqtt::MqttClient::is_connected(self)
    }

    fn connection_state(&self) -> Option<mqtt::ConnectionState> {
        mqtt::MqttClient::connection_state(self)
    }
}
