//! Event routing and message dispatch
//!
//! Pure routing decisions for rumqttc events plus the per-topic callback
//! registry. Dispatch is an explicit branch: a message on a topic nobody
//! registered for yields [`DispatchOutcome::NoHandler`] and is dropped by
//! the caller with a warning, never delivered anywhere.

use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{Packet, SubscribeReasonCode, UnsubAckReason};
use rumqttc::v5::Event;
use std::collections::HashMap;
use tracing::debug;

/// A message received on a subscribed topic
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Bytes,
    pub retain: bool,
}

/// Per-topic message handler
pub type MessageCallback = Box<dyn Fn(IncomingMessage) + Send + Sync>;

/// Result of a dispatch lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchOutcome {
    /// A handler was registered for the topic and has been invoked
    Delivered,
    /// No handler registered; the message is dropped
    NoHandler,
}

/// Topic string to handler mapping
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, MessageCallback>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handler` for `topic`, replacing any previous one.
    pub fn register(&mut self, topic: impl Into<String>, handler: MessageCallback) {
        self.handlers.insert(topic.into(), handler);
    }

    /// Drop the handler for `topic`, if any.
    pub fn remove(&mut self, topic: &str) {
        self.handlers.remove(topic);
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.handlers.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Look up the handler for the message's topic and invoke it.
    pub fn dispatch(&self, message: IncomingMessage) -> DispatchOutcome {
        match self.handlers.get(&message.topic) {
            Some(handler) => {
                handler(message);
                DispatchOutcome::Delivered
            }
            None => DispatchOutcome::NoHandler,
        }
    }
}

/// Routing decision for a single rumqttc event
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Broker acknowledged the session; operations may start
    ConnectionAcknowledged,
    /// A message arrived on a subscribed topic
    MessageReceived(IncomingMessage),
    /// SubAck arrived; `Ok` when every requested filter was granted
    SubscribeAcked(Result<(), String>),
    /// UnsubAck arrived; `Ok` when the broker accepted the request
    UnsubscribeAcked(Result<(), String>),
    /// Broker closed the session
    Disconnected,
    /// Protocol chatter with no routing consequence (PingResp etc.)
    InfrastructureEvent,
    /// Outgoing packet echo; handled by rumqttc itself
    OutgoingEvent,
}

/// Map a rumqttc event to its routing decision.
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
            Packet::Publish(publish) => EventRoute::MessageReceived(IncomingMessage {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.clone(),
                retain: publish.retain,
            }),
            Packet::SubAck(suback) => {
                EventRoute::SubscribeAcked(validate_suback_codes(&suback.return_codes))
            }
            Packet::UnsubAck(unsuback) => {
                EventRoute::UnsubscribeAcked(validate_unsuback_reasons(&unsuback.reasons))
            }
            Packet::Disconnect(_) => EventRoute::Disconnected,
            other => {
                debug!(target: "mqtt_keeper", "unrouted packet: {other:?}");
                EventRoute::InfrastructureEvent
            }
        },
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}

/// Check that every filter in a SubAck was granted at some QoS.
pub fn validate_suback_codes(codes: &[SubscribeReasonCode]) -> Result<(), String> {
    let rejected: Vec<&SubscribeReasonCode> = codes
        .iter()
        .filter(|code| {
            !matches!(code, SubscribeReasonCode::Success(_))
        })
        .collect();

    if rejected.is_empty() {
        Ok(())
    } else {
        Err(format!("broker rejected subscription: {rejected:?}"))
    }
}

/// Check that every filter in an UnsubAck was accepted.
pub fn validate_unsuback_reasons(reasons: &[UnsubAckReason]) -> Result<(), String> {
    let rejected: Vec<&UnsubAckReason> = reasons
        .iter()
        .filter(|reason| {
            !matches!(
                reason,
                UnsubAckReason::Success | UnsubAckReason::NoSubscriptionExisted
            )
        })
        .collect();

    if rejected.is_empty() {
        Ok(())
    } else {
        Err(format!("broker rejected unsubscribe: {rejected:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode, Publish};
    use rumqttc::v5::mqttbytes::QoS;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn publish_event(topic: &str, payload: &str, retain: bool) -> Event {
        Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain,
            topic: Bytes::from(topic.to_string()),
            pkid: 1,
            payload: Bytes::from(payload.to_string()),
            properties: None,
        }))
    }

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            route_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));
    }

    #[test]
    fn test_route_publish() {
        let event = publish_event("room/1", "21.5", false);
        match route_event(&event) {
            EventRoute::MessageReceived(message) => {
                assert_eq!(message.topic, "room/1");
                assert_eq!(&message.payload[..], b"21.5");
                assert!(!message.retain);
            }
            other => panic!("expected MessageReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_dispatch_invokes_registered_handler() {
        let mut registry = HandlerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        registry.register(
            "room/1",
            Box::new(move |message| {
                assert_eq!(message.topic, "room/1");
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let outcome = registry.dispatch(IncomingMessage {
            topic: "room/1".to_string(),
            payload: Bytes::from_static(b"on"),
            retain: false,
        });

        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_without_handler_drops_message() {
        let registry = HandlerRegistry::new();
        let outcome = registry.dispatch(IncomingMessage {
            topic: "room/ghost".to_string(),
            payload: Bytes::from_static(b"on"),
            retain: false,
        });
        assert_eq!(outcome, DispatchOutcome::NoHandler);
    }

    #[test]
    fn test_register_replaces_previous_handler() {
        let mut registry = HandlerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let first_clone = first.clone();
        registry.register("room/1", Box::new(move |_| {
            first_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let second_clone = second.clone();
        registry.register("room/1", Box::new(move |_| {
            second_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(registry.len(), 1);

        registry.dispatch(IncomingMessage {
            topic: "room/1".to_string(),
            payload: Bytes::new(),
            retain: false,
        });
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("room/1", Box::new(|_| {}));
        assert!(registry.contains("room/1"));
        registry.remove("room/1");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_validate_suback_codes() {
        assert!(validate_suback_codes(&[SubscribeReasonCode::Success(QoS::AtLeastOnce)]).is_ok());
        assert!(validate_suback_codes(&[
            SubscribeReasonCode::Success(QoS::AtMostOnce),
            SubscribeReasonCode::Success(QoS::ExactlyOnce)
        ])
        .is_ok());
        assert!(validate_suback_codes(&[SubscribeReasonCode::NotAuthorized]).is_err());
        assert!(validate_suback_codes(&[
            SubscribeReasonCode::Success(QoS::AtLeastOnce),
            SubscribeReasonCode::Unspecified
        ])
        .is_err());
    }

    #[test]
    fn test_validate_unsuback_reasons() {
        assert!(validate_unsuback_reasons(&[UnsubAckReason::Success]).is_ok());
        assert!(validate_unsuback_reasons(&[UnsubAckReason::NoSubscriptionExisted]).is_ok());
        assert!(validate_unsuback_reasons(&[UnsubAckReason::NotAuthorized]).is_err());
    }
}
