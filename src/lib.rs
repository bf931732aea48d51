//! mqtt-keeper - reconnecting MQTT pub/sub client
//!
//! A thin convenience layer over [rumqttc](https://docs.rs/rumqttc): one
//! connection manager owning a broker session, a per-topic callback
//! registry, and a subscription registry that is replayed automatically
//! after a reconnect.
//!
//! # Overview
//!
//! - `connect` / `disconnect` with a fixed ConnAck timeout
//! - `subscribe` / `unsubscribe` that wait for the broker acknowledgment
//!   and keep the subscription registry in sync with it
//! - per-topic message callbacks; messages on unhandled topics are logged
//!   and dropped
//! - bounded two-stage recovery after a lost connection (5 s, then the
//!   10 s mark), with subscription replay on success
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_keeper::{BrokerConfig, MqttClient, QoS};
//!
//! # tokio_test::block_on(async {
//! let config = BrokerConfig::from_url("mqtts://u:p@broker.example.com:8883")?;
//! let mut client = MqttClient::new(config);
//!
//! client.connect().await?;
//! client
//!     .register_handler("room/1", Box::new(|message| {
//!         println!("{} -> {:?}", message.topic, message.payload);
//!     }))
//!     .await;
//! client.subscribe("room/1", QoS::AtLeastOnce).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod observability;
pub mod transport;

pub use config::{BrokerConfig, ConfigError};
pub use transport::mqtt::{
    ConnectionState, DispatchOutcome, HandlerRegistry, IncomingMessage, MessageCallback,
    MqttClient, MqttError, ReconnectPolicy,
};
pub use transport::Transport;

/// Re-export of the rumqttc QoS levels used throughout the API.
pub use rumqttc::v5::mqttbytes::QoS;
