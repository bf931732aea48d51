//! Connection state and session option handling
//!
//! Pure types shared by the manager: the connection state machine published
//! over the state channel, the transport error enum, and the translation
//! from [`BrokerConfig`] into rumqttc session options.

use crate::config::BrokerConfig;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// How long `connect()` waits for the broker ConnAck.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `subscribe()` waits for the SubAck.
pub const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `unsubscribe()` waits for the UnsubAck.
pub const UNSUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(6);

/// Connection state for the managed session
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Session opened, waiting for ConnAck
    Connecting,
    /// Broker acknowledged the session; operations may proceed
    Connected,
    /// Connection lost or closed, with reason
    Disconnected(String),
    /// Recovery attempt in flight (attempt number, 1-based)
    Reconnecting(u32),
    /// Both scheduled recovery attempts failed; no further retries
    RetriesExhausted(String),
}

impl ConnectionState {
    /// Whether subscribe/unsubscribe requests may be issued in this state.
    pub fn is_operational(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Transport-level errors surfaced to callers
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("connect failed: {0}")]
    ConnectFailure(String),
    #[error("subscribe to '{topic}' timed out after {timeout:?}")]
    SubscribeTimeout { topic: String, timeout: Duration },
    #[error("subscribe to '{topic}' rejected: {reason}")]
    SubscribeFailure { topic: String, reason: String },
    #[error("unsubscribe from '{topic}' timed out after {timeout:?}")]
    UnsubscribeTimeout { topic: String, timeout: Duration },
    #[error("unsubscribe from '{topic}' failed: {reason}")]
    UnsubscribeFailure { topic: String, reason: String },
    #[error("not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("client request failed")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Build rumqttc session options from a broker config.
///
/// Every call generates a fresh random client identifier, so a replacement
/// session never collides with the broker's half-open record of the old one.
/// The session is always clean-start; subscription replay is this crate's
/// job, not the broker's.
pub fn configure_mqtt_options(config: &BrokerConfig) -> MqttOptions {
    let client_id = format!("keeper-{}", Uuid::new_v4());
    let mut mqtt_options = MqttOptions::new(client_id, &config.host, config.port);

    if config.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &config.username {
        let password = config.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_clean_start(true);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

    mqtt_options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_operational() {
        assert!(ConnectionState::Connected.is_operational());
        assert!(!ConnectionState::Connecting.is_operational());
        assert!(!ConnectionState::Disconnected("x".to_string()).is_operational());
        assert!(!ConnectionState::Reconnecting(1).is_operational());
        assert!(!ConnectionState::RetriesExhausted("x".to_string()).is_operational());
    }

    #[test]
    fn test_configure_mqtt_options_basic() {
        let config = BrokerConfig::new("localhost", 1883);
        let options = configure_mqtt_options(&config);
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(200));
    }

    #[test]
    fn test_configure_mqtt_options_credentials() {
        let config = BrokerConfig::new("localhost", 1883).with_credentials("u", "p");
        let options = configure_mqtt_options(&config);
        assert_eq!(
            options.credentials(),
            Some(("u".to_string(), "p".to_string()))
        );
    }

    #[test]
    fn test_client_ids_are_unique_per_session() {
        let config = BrokerConfig::new("localhost", 1883);
        let a = configure_mqtt_options(&config);
        let b = configure_mqtt_options(&config);
        assert_ne!(a.client_id(), b.client_id());
        assert!(a.client_id().starts_with("keeper-"));
    }

    #[test]
    fn test_error_display_not_empty() {
        let errors = vec![
            MqttError::ConnectTimeout(CONNECT_TIMEOUT),
            MqttError::ConnectFailure("refused".to_string()),
            MqttError::SubscribeTimeout {
                topic: "room/1".to_string(),
                timeout: SUBSCRIBE_TIMEOUT,
            },
            MqttError::SubscribeFailure {
                topic: "room/1".to_string(),
                reason: "not authorized".to_string(),
            },
            MqttError::UnsubscribeTimeout {
                topic: "room/1".to_string(),
                timeout: UNSUBSCRIBE_TIMEOUT,
            },
            MqttError::UnsubscribeFailure {
                topic: "room/1".to_string(),
                reason: "broker error".to_string(),
            },
            MqttError::NotConnected {
                state: ConnectionState::Connecting,
            },
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
