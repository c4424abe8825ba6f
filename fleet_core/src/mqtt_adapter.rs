//! MQTT adapter (C8): wraps the MQTT 3.1.1 transport, translates frames
//! to/from typed [`fleet_protocol`] messages, and drives a car's event queue.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use fleet_mqtt::control_packet::QoS;
use fleet_mqtt::interface::{Event as MqttEvent, Incoming, MqttEventLoop, MqttPubSub};
use fleet_mqtt::topic::CarTopics;
use fleet_protocol::{ExternalClient, ExternalServer};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventSender};

/// Error surfaced while connecting the MQTT adapter.
#[derive(Debug, Error)]
pub enum AdapterConnectError {
    /// The broker refused the connection.
    #[error("broker refused connection: {0}")]
    Refused(String),
    /// The transport did not report "connected" within the bounded interval.
    #[error("transport did not become connected in time")]
    Timeout,
}

/// How long [`MqttAdapter::connect`] waits for the transport to report
/// "connected" before treating the attempt as refused.
pub const CONNECT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Bridges a single car's MQTT transport to its event queue and message FIFO.
pub struct MqttAdapter<C, L> {
    client: Arc<C>,
    event_loop: Option<L>,
    topics: CarTopics,
    events: EventSender,
    incoming: Arc<Mutex<VecDeque<ExternalClient>>>,
    connected: Arc<tokio::sync::RwLock<bool>>,
    connected_notify: Arc<tokio::sync::Notify>,
    poll_task: Option<tokio::task::JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl<C, L> MqttAdapter<C, L>
where
    C: MqttPubSub + Send + Sync + 'static,
    L: MqttEventLoop + Send + 'static,
{
    /// Wrap a connected client/event-loop pair for `topics`.
    #[must_use]
    pub fn new(client: C, event_loop: L, topics: CarTopics, events: EventSender) -> Self {
        Self {
            client: Arc::new(client),
            event_loop: Some(event_loop),
            topics,
            events,
            incoming: Arc::new(Mutex::new(VecDeque::new())),
            connected: Arc::new(tokio::sync::RwLock::new(false)),
            connected_notify: Arc::new(tokio::sync::Notify::new()),
            poll_task: None,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Subscribe to the car's topic, start the background poll task, and
    /// wait up to [`CONNECT_GRACE_PERIOD`] for the transport to report
    /// connected.
    ///
    /// # Errors
    /// Returns [`AdapterConnectError`] if the subscribe fails or the
    /// transport does not report connected in time.
    pub async fn connect(&mut self) -> Result<(), AdapterConnectError> {
        self.client
            .subscribe(self.topics.subscribe_topic(), QoS::AtLeastOnce)
            .await
            .map_err(|e| AdapterConnectError::Refused(e.to_string()))?;

        let event_loop = self
            .event_loop
            .take()
            .expect("connect called at most once per adapter instance");
        self.poll_task = Some(tokio::spawn(poll_loop(
            event_loop,
            self.topics.subscribe_topic().to_string(),
            self.incoming.clone(),
            self.connected.clone(),
            self.connected_notify.clone(),
            self.events.clone(),
            self.cancel_token.clone(),
        )));

        let wait = async {
            loop {
                if *self.connected.read().await {
                    return;
                }
                self.connected_notify.notified().await;
            }
        };
        tokio::time::timeout(CONNECT_GRACE_PERIOD, wait)
            .await
            .map_err(|_| AdapterConnectError::Timeout)
    }

    /// Whether the transport currently reports connected.
    pub async fn is_connected(&self) -> bool {
        *self.connected.read().await
    }

    /// Disconnect if connected; a no-op otherwise.
    pub async fn disconnect(&mut self) {
        if *self.connected.read().await {
            let _ = self.client.disconnect().await;
        }
        self.cancel_token.cancel();
        if let Some(handle) = self.poll_task.take() {
            let _ = handle.await;
        }
    }

    /// Publish `message` to this car's publish topic at QoS 1.
    ///
    /// # Errors
    /// Propagates the transport's publish error.
    pub async fn publish(
        &self,
        message: &ExternalServer,
    ) -> Result<(), fleet_mqtt::error::PublishError> {
        let payload = serde_json::to_vec(message).unwrap_or_default();
        self.client
            .publish(
                self.topics.publish_topic(),
                QoS::AtLeastOnce,
                false,
                Bytes::from(payload),
            )
            .await
    }

    /// Pop the next queued incoming message, if any.
    pub async fn pop_message(&self) -> Option<ExternalClient> {
        self.incoming.lock().await.pop_front()
    }

    /// Block up to `mqtt_timeout` for a `Connect` message, returning it if found.
    pub async fn get_connect_message(&self, mqtt_timeout: Duration) -> Option<ExternalClient> {
        self.wait_for_matching(mqtt_timeout, |m| matches!(m, ExternalClient::Connect { .. }))
            .await
    }

    /// Block up to `mqtt_timeout` for a `Status` message, returning it if found.
    pub async fn get_status(&self, mqtt_timeout: Duration) -> Option<ExternalClient> {
        self.wait_for_matching(mqtt_timeout, |m| matches!(m, ExternalClient::Status { .. }))
            .await
    }

    /// Block up to `mqtt_timeout` for a `CommandResponse` message, returning
    /// it if found.
    pub async fn get_command_response(&self, mqtt_timeout: Duration) -> Option<ExternalClient> {
        self.wait_for_matching(mqtt_timeout, |m| {
            matches!(m, ExternalClient::CommandResponse { .. })
        })
        .await
    }

    async fn wait_for_matching(
        &self,
        mqtt_timeout: Duration,
        matches_kind: impl Fn(&ExternalClient) -> bool,
    ) -> Option<ExternalClient> {
        let deadline = tokio::time::Instant::now() + mqtt_timeout;
        loop {
            {
                let mut queue = self.incoming.lock().await;
                if let Some(pos) = queue.iter().position(&matches_kind) {
                    return queue.remove(pos);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                log::info!("timed out waiting for expected message during handshake");
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn poll_loop<L: MqttEventLoop>(
    mut event_loop: L,
    subscribe_topic: String,
    incoming: Arc<Mutex<VecDeque<ExternalClient>>>,
    connected: Arc<tokio::sync::RwLock<bool>>,
    connected_notify: Arc<tokio::sync::Notify>,
    events: EventSender,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => return,
            next = event_loop.poll() => {
                match next {
                    Ok(MqttEvent::Incoming(Incoming::ConnAck(_))) => {
                        *connected.write().await = true;
                        connected_notify.notify_waiters();
                    }
                    Ok(MqttEvent::Incoming(Incoming::Publish(publish))) => {
                        if publish.topic == subscribe_topic {
                            match serde_json::from_slice::<ExternalClient>(&publish.payload) {
                                Ok(message) => {
                                    incoming.lock().await.push_back(message);
                                    events.post(Event::CarMessageAvailable).await;
                                }
                                Err(e) => log::warn!("failed to decode incoming message: {e}"),
                            }
                        }
                    }
                    Ok(MqttEvent::Incoming(Incoming::Disconnect)) => {
                        *connected.write().await = false;
                        events.post(Event::MqttDisconnected).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        log::warn!("mqtt connection error: {e}");
                        *connected.write().await = false;
                        events.post(Event::MqttDisconnected).await;
                        return;
                    }
                }
            }
        }
    }
}
