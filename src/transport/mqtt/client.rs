//! Connection manager I/O
//!
//! Owns the rumqttc session and coordinates the supervisor task that polls
//! the event loop, dispatches inbound messages, completes ack waiters and
//! runs the bounded two-stage recovery after a lost connection.

use super::connection::{
    configure_mqtt_options, ConnectionState, MqttError, CONNECT_TIMEOUT, SUBSCRIBE_TIMEOUT,
    UNSUBSCRIBE_TIMEOUT,
};
use super::dispatch::{
    route_event, DispatchOutcome, EventRoute, HandlerRegistry, MessageCallback,
};
use super::reconnect::{next_attempt, ReconnectDecision, ReconnectPolicy};
use crate::config::BrokerConfig;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// FIFO queue of callers waiting for a broker acknowledgment.
///
/// rumqttc does not hand back packet ids on subscribe/unsubscribe, so
/// waiters are completed in request order. A timed-out waiter is removed by
/// id; its late ack, if any, lands on an empty queue and is discarded.
#[derive(Default)]
struct AckQueue {
    next_id: u64,
    queue: VecDeque<(u64, oneshot::Sender<Result<(), String>>)>,
}

impl AckQueue {
    fn push(&mut self) -> (u64, oneshot::Receiver<Result<(), String>>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back((id, tx));
        (id, rx)
    }

    fn complete_front(&mut self, result: Result<(), String>) -> bool {
        match self.queue.pop_front() {
            Some((_, tx)) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    fn remove(&mut self, id: u64) {
        self.queue.retain(|(entry_id, _)| *entry_id != id);
    }

    fn drain(&mut self, reason: &str) {
        for (_, tx) in self.queue.drain(..) {
            let _ = tx.send(Err(reason.to_string()));
        }
    }
}

/// Shared handles the supervisor task works against
struct SupervisorContext {
    config: BrokerConfig,
    policy: ReconnectPolicy,
    client: Arc<Mutex<Option<AsyncClient>>>,
    handlers: Arc<RwLock<HandlerRegistry>>,
    subscriptions: Arc<Mutex<HashMap<String, QoS>>>,
    sub_acks: Arc<Mutex<AckQueue>>,
    unsub_acks: Arc<Mutex<AckQueue>>,
    state_tx: watch::Sender<ConnectionState>,
}

/// Reconnecting MQTT pub/sub client
///
/// One instance manages one broker session: subscribe/unsubscribe helpers
/// with fixed timeouts, a per-topic callback registry, and automatic replay
/// of acknowledged subscriptions after a reconnect.
pub struct MqttClient {
    config: BrokerConfig,
    policy: ReconnectPolicy,
    client: Arc<Mutex<Option<AsyncClient>>>,
    handlers: Arc<RwLock<HandlerRegistry>>,
    subscriptions: Arc<Mutex<HashMap<String, QoS>>>,
    sub_acks: Arc<Mutex<AckQueue>>,
    unsub_acks: Arc<Mutex<AckQueue>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    supervisor: Option<JoinHandle<()>>,
}

impl MqttClient {
    /// Create a manager for `config`. No I/O happens until [`connect`].
    ///
    /// [`connect`]: MqttClient::connect
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            policy: ReconnectPolicy::default(),
            client: Arc::new(Mutex::new(None)),
            handlers: Arc::new(RwLock::new(HandlerRegistry::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            sub_acks: Arc::new(Mutex::new(AckQueue::default())),
            unsub_acks: Arc::new(Mutex::new(AckQueue::default())),
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            supervisor: None,
        }
    }

    /// Open the broker session.
    ///
    /// No-op when already connected. Otherwise spawns the supervisor task
    /// and waits for the broker ConnAck, failing with
    /// [`MqttError::ConnectTimeout`] after 10 s. Acknowledged subscriptions
    /// surviving from an earlier session are replayed once the ConnAck
    /// arrives.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        if self.is_connected() {
            debug!("connect called while already connected");
            return Ok(());
        }

        self.teardown_supervisor();

        let options = configure_mqtt_options(&self.config);
        let (client, event_loop) = AsyncClient::new(options, 10);
        *self.client.lock().await = Some(client);

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.state_rx = Some(state_rx.clone());
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let context = SupervisorContext {
            config: self.config.clone(),
            policy: self.policy.clone(),
            client: self.client.clone(),
            handlers: self.handlers.clone(),
            subscriptions: self.subscriptions.clone(),
            sub_acks: self.sub_acks.clone(),
            unsub_acks: self.unsub_acks.clone(),
            state_tx,
        };
        self.supervisor = Some(tokio::spawn(run_supervisor(
            event_loop,
            context,
            shutdown_rx,
        )));

        Self::wait_for_connection_confirmation(state_rx, CONNECT_TIMEOUT).await
    }

    /// Wait until the state channel reports `Connected`, or fail.
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason)
                    | ConnectionState::RetriesExhausted(reason) => {
                        return Err(MqttError::ConnectFailure(reason.clone()));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectFailure(
                        "state channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectTimeout(timeout)),
        }
    }

    /// Subscribe to `topic` at `qos`.
    ///
    /// Returns `Ok(false)` without contacting the broker when the session
    /// is down. On a granted SubAck the pair is recorded for replay and
    /// `Ok(true)` is returned. A missing ack within 10 s rejects with
    /// [`MqttError::SubscribeTimeout`] and records nothing.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<bool, MqttError> {
        if !self.is_connected() {
            warn!(topic, "subscribe skipped: client is not online");
            return Ok(false);
        }

        debug!(topic, "ready to subscribe");
        let (waiter_id, ack_rx) = {
            let client_guard = self.client.lock().await;
            let client = client_guard.as_ref().ok_or_else(|| self.not_connected())?;
            let (waiter_id, ack_rx) = self.sub_acks.lock().await.push();
            if let Err(e) = client.subscribe(topic, qos).await {
                self.sub_acks.lock().await.remove(waiter_id);
                return Err(MqttError::Client(Box::new(e)));
            }
            (waiter_id, ack_rx)
        };

        match tokio::time::timeout(SUBSCRIBE_TIMEOUT, ack_rx).await {
            Ok(Ok(Ok(()))) => {
                self.subscriptions
                    .lock()
                    .await
                    .insert(topic.to_string(), qos);
                info!(topic, ?qos, "subscribed");
                Ok(true)
            }
            Ok(Ok(Err(reason))) => Err(MqttError::SubscribeFailure {
                topic: topic.to_string(),
                reason,
            }),
            Ok(Err(_)) => Err(MqttError::SubscribeFailure {
                topic: topic.to_string(),
                reason: "connection lost before acknowledgment".to_string(),
            }),
            Err(_) => {
                self.sub_acks.lock().await.remove(waiter_id);
                Err(MqttError::SubscribeTimeout {
                    topic: topic.to_string(),
                    timeout: SUBSCRIBE_TIMEOUT,
                })
            }
        }
    }

    /// Unsubscribe from `topic`.
    ///
    /// `Ok(true)` without contacting the broker when the topic was never
    /// acknowledged as subscribed; `Ok(false)` when it is subscribed but
    /// the session is down. On success the topic leaves both the
    /// subscription registry and the callback registry.
    pub async fn unsubscribe(&self, topic: &str) -> Result<bool, MqttError> {
        if !self.subscriptions.lock().await.contains_key(topic) {
            return Ok(true);
        }
        if !self.is_connected() {
            warn!(topic, "unsubscribe skipped: client is not online");
            return Ok(false);
        }

        debug!(topic, "ready to unsubscribe");
        let (waiter_id, ack_rx) = {
            let client_guard = self.client.lock().await;
            let client = client_guard.as_ref().ok_or_else(|| self.not_connected())?;
            let (waiter_id, ack_rx) = self.unsub_acks.lock().await.push();
            if let Err(e) = client.unsubscribe(topic).await {
                self.unsub_acks.lock().await.remove(waiter_id);
                return Err(MqttError::Client(Box::new(e)));
            }
            (waiter_id, ack_rx)
        };

        match tokio::time::timeout(UNSUBSCRIBE_TIMEOUT, ack_rx).await {
            Ok(Ok(Ok(()))) => {
                self.subscriptions.lock().await.remove(topic);
                self.handlers.write().await.remove(topic);
                info!(topic, "unsubscribed");
                Ok(true)
            }
            Ok(Ok(Err(reason))) => Err(MqttError::UnsubscribeFailure {
                topic: topic.to_string(),
                reason,
            }),
            Ok(Err(_)) => Err(MqttError::UnsubscribeFailure {
                topic: topic.to_string(),
                reason: "connection lost before acknowledgment".to_string(),
            }),
            Err(_) => {
                self.unsub_acks.lock().await.remove(waiter_id);
                Err(MqttError::UnsubscribeTimeout {
                    topic: topic.to_string(),
                    timeout: UNSUBSCRIBE_TIMEOUT,
                })
            }
        }
    }

    /// Register `handler` for messages arriving on `topic`, replacing any
    /// previous handler for that topic.
    pub async fn register_handler(&self, topic: &str, handler: MessageCallback) {
        self.handlers.write().await.register(topic, handler);
    }

    /// Close the session and stop the supervisor task.
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        let was_connected = self.is_connected();
        if was_connected {
            let client_guard = self.client.lock().await;
            if let Some(client) = client_guard.as_ref() {
                client
                    .disconnect()
                    .await
                    .map_err(|e| MqttError::Client(Box::new(e)))?;
            }
        }

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "client disconnected".to_string(),
            ));
        }

        if let Some(handle) = self.supervisor.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("supervisor task shut down"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("supervisor task ended with error: {e}");
                }
                Err(_) => warn!("supervisor task did not stop in time, aborting"),
                _ => {}
            }
        }

        if was_connected {
            info!("mqtt client disconnected");
        }
        Ok(())
    }

    /// Current connection status.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::Connected)
        )
    }

    /// Current connection state, `None` before the first [`connect`].
    ///
    /// [`connect`]: MqttClient::connect
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Snapshot of the broker-acknowledged subscription set.
    pub async fn subscriptions(&self) -> HashMap<String, QoS> {
        self.subscriptions.lock().await.clone()
    }

    /// Whether a handler is registered for `topic`.
    pub async fn has_handler(&self, topic: &str) -> bool {
        self.handlers.read().await.contains(topic)
    }

    fn not_connected(&self) -> MqttError {
        MqttError::NotConnected {
            state: self
                .connection_state()
                .unwrap_or(ConnectionState::Disconnected("never connected".to_string())),
        }
    }

    fn teardown_supervisor(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
        self.state_tx = None;
        self.state_rx = None;
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // Callers wanting a clean DISCONNECT must call disconnect(); here we
        // can only stop the background task.
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}

/// Poll the event loop until shutdown, routing events and running the
/// two-stage recovery on connection loss.
async fn run_supervisor(
    mut event_loop: EventLoop,
    context: SupervisorContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;
    let mut lost_at: Option<Instant> = None;
    // Loss recovery only arms after the first ConnAck; a failed initial
    // connect surfaces to the connect() caller instead.
    let mut was_connected = false;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("shutdown signal received, stopping supervisor");
                    break;
                }
            }
            event = event_loop.poll() => {
                match event {
                    Ok(event) => match route_event(&event) {
                        EventRoute::ConnectionAcknowledged => {
                            attempts = 0;
                            lost_at = None;
                            was_connected = true;
                            info!("broker acknowledged connection");
                            let _ = context.state_tx.send(ConnectionState::Connected);
                            replay_subscriptions(&context).await;
                        }
                        EventRoute::MessageReceived(message) => {
                            let topic = message.topic.clone();
                            let registry = context.handlers.read().await;
                            if registry.dispatch(message) == DispatchOutcome::NoHandler {
                                warn!(
                                    topic = %topic,
                                    "message arrived on topic with no registered handler, dropping"
                                );
                            }
                        }
                        EventRoute::SubscribeAcked(result) => {
                            if !context.sub_acks.lock().await.complete_front(result) {
                                debug!("suback with no waiter (subscription replay)");
                            }
                        }
                        EventRoute::UnsubscribeAcked(result) => {
                            if !context.unsub_acks.lock().await.complete_front(result) {
                                debug!("unsuback with no waiter");
                            }
                        }
                        EventRoute::Disconnected => {
                            error!("broker closed the session");
                            let _ = context.state_tx.send(ConnectionState::Disconnected(
                                "broker closed the session".to_string(),
                            ));
                            if !was_connected {
                                break;
                            }
                            if !recover(
                                &context,
                                &mut event_loop,
                                &mut attempts,
                                &mut lost_at,
                                &shutdown_rx,
                            )
                            .await
                            {
                                break;
                            }
                        }
                        EventRoute::InfrastructureEvent | EventRoute::OutgoingEvent => {}
                    },
                    Err(e) => {
                        error!("connection lost: {e}");
                        let _ = context
                            .state_tx
                            .send(ConnectionState::Disconnected(e.to_string()));
                        if !was_connected {
                            break;
                        }
                        if !recover(
                            &context,
                            &mut event_loop,
                            &mut attempts,
                            &mut lost_at,
                            &shutdown_rx,
                        )
                        .await
                        {
                            break;
                        }
                    }
                }
            }
        }
    }
    debug!("supervisor task stopped");
}

/// Run one step of the two-stage recovery. Returns false when the
/// supervisor should stop.
async fn recover(
    context: &SupervisorContext,
    event_loop: &mut EventLoop,
    attempts: &mut u32,
    lost_at: &mut Option<Instant>,
    shutdown_rx: &watch::Receiver<bool>,
) -> bool {
    context
        .sub_acks
        .lock()
        .await
        .drain("connection lost before acknowledgment");
    context
        .unsub_acks
        .lock()
        .await
        .drain("connection lost before acknowledgment");

    let since = *lost_at.get_or_insert_with(Instant::now);
    let decision = next_attempt(
        &context.policy,
        *attempts,
        since.elapsed(),
        *shutdown_rx.borrow(),
    );

    match decision {
        ReconnectDecision::Attempt { attempt, delay } => {
            info!(attempt, ?delay, "scheduling reconnect attempt");
            let _ = context.state_tx.send(ConnectionState::Reconnecting(attempt));
            if !interruptible_sleep(shutdown_rx.clone(), delay).await {
                return false;
            }
            if *shutdown_rx.borrow() {
                return false;
            }
            *attempts = attempt;

            // Fresh client id per attempt so the broker never sees a clash
            // with its half-open record of the previous session.
            let options = configure_mqtt_options(&context.config);
            let (new_client, new_event_loop) = AsyncClient::new(options, 10);
            *event_loop = new_event_loop;
            *context.client.lock().await = Some(new_client);
            true
        }
        ReconnectDecision::AbortShutdownRequested => {
            debug!("shutdown requested, abandoning recovery");
            false
        }
        ReconnectDecision::GiveUp => {
            error!("both reconnect attempts failed, giving up");
            let _ = context.state_tx.send(ConnectionState::RetriesExhausted(
                "reconnect attempts exhausted".to_string(),
            ));
            false
        }
    }
}

/// Re-request every acknowledged subscription on the fresh session.
///
/// Fire-and-forget: replay acks land on an empty waiter queue and are
/// discarded.
async fn replay_subscriptions(context: &SupervisorContext) {
    let snapshot: Vec<(String, QoS)> = context
        .subscriptions
        .lock()
        .await
        .iter()
        .map(|(topic, qos)| (topic.clone(), *qos))
        .collect();
    if snapshot.is_empty() {
        return;
    }

    let client_guard = context.client.lock().await;
    let Some(client) = client_guard.as_ref() else {
        return;
    };
    for (topic, qos) in snapshot {
        match client.subscribe(topic.as_str(), qos).await {
            Ok(()) => debug!(topic = %topic, "replayed subscription"),
            Err(e) => error!(topic = %topic, "failed to replay subscription: {e}"),
        }
    }
}

/// Sleep for `delay`, waking early on shutdown. Returns false when shutdown
/// was requested.
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}
