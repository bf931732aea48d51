//! Reconnecting MQTT client built on rumqttc
//!
//! The module is split into focused sub-modules:
//!
//! - [`connection`] - connection state, errors and session option handling
//! - [`dispatch`] - pure event routing and the per-topic callback registry
//! - [`reconnect`] - pure two-stage recovery scheduling
//! - [`client`] - I/O: the manager itself and its supervisor task
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_keeper::{BrokerConfig, MqttClient, QoS};
//!
//! # tokio_test::block_on(async {
//! let config = BrokerConfig::new("broker.example.com", 8883)
//!     .with_credentials("user", "secret");
//!
//! let mut client = MqttClient::new(config);
//! client.connect().await?;
//! client
//!     .register_handler("room/1", Box::new(|message| {
//!         println!("{}: {:?}", message.topic, message.payload);
//!     }))
//!     .await;
//! client.subscribe("room/1", QoS::AtLeastOnce).await?;
//! # Ok::<(), mqtt_keeper::MqttError>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod dispatch;
pub mod reconnect;

pub use client::MqttClient;
pub use connection::{
    ConnectionState, MqttError, CONNECT_TIMEOUT, SUBSCRIBE_TIMEOUT, UNSUBSCRIBE_TIMEOUT,
};
pub use dispatch::{DispatchOutcome, HandlerRegistry, IncomingMessage, MessageCallback};
pub use reconnect::{ReconnectDecision, ReconnectPolicy};
