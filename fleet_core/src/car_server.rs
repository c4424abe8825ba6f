//! Car server (C9): the per-car state machine — connect handshake followed
//! by the normal-traffic loop. Owns C3–C8 for exactly one car.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_mqtt::interface::{MqttEventLoop, MqttPubSub};
use fleet_mqtt::topic::CarTopics;
use fleet_protocol::messages::DeviceCommand;
use fleet_protocol::{
    CommandResponseType, ConnectResponseType, Device, DeviceState, DisconnectKind, ExternalClient,
    ExternalServer, HandledCommand, ModulePlugin,
};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::command_tracker::CommandTracker;
use crate::config::ServerConfig;
use crate::event::{Event, EventReceiver, EventSender, TimeoutKind};
use crate::known_devices::KnownDevices;
use crate::module_host::ModuleHost;
use crate::mqtt_adapter::MqttAdapter;
use crate::session_tracker::SessionTracker;
use crate::status_checker::StatusChecker;

/// The per-car server lifecycle (§3).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerState {
    /// No broker connection established yet.
    Uninitialized,
    /// The broker link is up; the connect handshake has not run.
    Connected,
    /// The connect handshake completed.
    Initialized,
    /// Normal-traffic loop is running.
    Running,
    /// The server was asked to stop.
    Stopped,
    /// An unrecoverable error occurred; awaiting restart.
    Error,
}

impl ServerState {
    /// Whether transitioning from `self` to `next` is permitted (§3).
    /// Transitions to `Error` or `Stopped` are always permitted.
    #[must_use]
    pub fn can_transition_to(self, next: ServerState) -> bool {
        use ServerState::{Connected, Error, Initialized, Running, Stopped, Uninitialized};
        if matches!(next, Error | Stopped) {
            return true;
        }
        matches!(
            (self, next),
            (Uninitialized, Connected)
                | (Connected, Initialized)
                | (Initialized, Running)
                | (Stopped, Uninitialized)
                | (Error, Uninitialized)
        )
    }
}

/// Errors that can terminate the initial sequence or the normal
/// communication loop, restarting the outer `start` loop (§4.9).
#[derive(Debug, Error)]
pub enum CarServerError {
    /// The broker connection could not be established or was refused.
    #[error("mqtt connect failed: {0}")]
    ConnectFailed(String),
    /// No connect message arrived, or it declared zero devices.
    #[error("invalid or missing connect message")]
    InvalidConnectMessage,
    /// A status arrived during the handshake with an unexpected device state.
    #[error("expected CONNECTING status during handshake, device did not comply")]
    UnexpectedHandshakeStatus,
    /// A handshake step exceeded `mqtt_timeout`.
    #[error("timed out during connect handshake")]
    HandshakeTimeout,
    /// Every device disconnected during normal communication.
    #[error("all devices disconnected")]
    AllDevicesDisconnected,
    /// The transport reported an unexpected disconnect.
    #[error("mqtt transport disconnected unexpectedly")]
    MqttDisconnected,
    /// A session, status, or command-response timer expired.
    #[error("{0:?} timeout occurred")]
    Timeout(TimeoutKind),
    /// A configured module rejected its self-reported module number.
    #[error("module host error: {0}")]
    ModuleHost(String),
}

/// Builds a fresh `(client, event_loop)` pair for one connection attempt, or
/// the reason one could not be built. A [`CarServer`] calls this once per
/// outer-loop iteration, since an [`MqttAdapter`] consumes its event loop on
/// `connect` and cannot be reconnected in place.
pub type TransportFactory<C, L> = Arc<dyn Fn() -> Result<(C, L), String> + Send + Sync>;

/// The per-car server: owns its session tracker, checkers, known-devices
/// registry, module hosts, and MQTT adapter.
pub struct CarServer<C, L> {
    company: String,
    car_name: String,
    config: Arc<ServerConfig>,
    state: ServerState,
    running: CancellationToken,
    transport: TransportFactory<C, L>,
    topics: CarTopics,
    adapter: Option<MqttAdapter<C, L>>,
    events: EventReceiver,
    events_tx: EventSender,
    session: SessionTracker,
    status_checker: StatusChecker,
    command_tracker: CommandTracker,
    known_devices: Arc<RwLock<KnownDevices>>,
    modules: HashMap<u32, ModuleHost>,
}

impl<C, L> CarServer<C, L>
where
    C: MqttPubSub + Send + Sync + 'static,
    L: MqttEventLoop + Send + 'static,
{
    /// Build a car server. `transport` is invoked once per connection
    /// attempt to obtain a fresh client/event-loop pair for `topics`.
    #[must_use]
    pub fn new(
        company: String,
        car_name: String,
        config: Arc<ServerConfig>,
        topics: CarTopics,
        transport: TransportFactory<C, L>,
        events: EventReceiver,
        events_tx: EventSender,
    ) -> Self {
        let mqtt_timeout = config.mqtt_timeout();
        let timeout = config.timeout();
        Self {
            company,
            car_name,
            config,
            state: ServerState::Uninitialized,
            running: CancellationToken::new(),
            transport,
            topics,
            adapter: None,
            session: SessionTracker::new(mqtt_timeout, events_tx.clone()),
            status_checker: StatusChecker::new(timeout, events_tx.clone()),
            command_tracker: CommandTracker::new(timeout, events_tx.clone()),
            known_devices: Arc::new(RwLock::new(KnownDevices::new())),
            modules: HashMap::new(),
            events,
            events_tx,
        }
    }

    /// The currently established adapter.
    ///
    /// # Panics
    /// Panics if called before [`Self::run_initial_sequence`] has built the
    /// adapter for the current connection attempt.
    fn adapter(&self) -> &MqttAdapter<C, L> {
        self.adapter
            .as_ref()
            .expect("adapter built at the start of run_initial_sequence")
    }

    /// Register a module's plugin, spawning its command poller.
    ///
    /// # Errors
    /// Returns an error string if the plugin's self-reported module number
    /// does not match `module_id`.
    pub fn add_module(
        &mut self,
        module_id: u32,
        plugin: Box<dyn ModulePlugin>,
    ) -> Result<(), CarServerError> {
        let known_devices = self.known_devices.clone();
        let predicate = Arc::new(move || {
            known_devices
                .try_read()
                .is_ok_and(|devices| devices.any_connected_from_module(module_id))
        });
        let host = ModuleHost::start(module_id, plugin, predicate, self.events_tx.clone())
            .map_err(|e| CarServerError::ModuleHost(e.to_string()))?;
        self.modules.insert(module_id, host);
        Ok(())
    }

    fn transition(&mut self, next: ServerState) {
        if self.state.can_transition_to(next) {
            log::info!(
                "[{}/{}] {:?} -> {:?}",
                self.company,
                self.car_name,
                self.state,
                next
            );
            self.state = next;
        } else {
            log::warn!(
                "[{}/{}] rejected transition {:?} -> {:?}",
                self.company,
                self.car_name,
                self.state,
                next
            );
        }
    }

    /// A token that, when cancelled, causes the outer loop to stop after
    /// the current iteration.
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.running.clone()
    }

    /// Run the outer loop: repeatedly run the initial sequence then normal
    /// communication, clearing context and sleeping between attempts, until
    /// stopped.
    pub async fn start(&mut self) {
        while !self.running.is_cancelled() && self.state != ServerState::Stopped {
            let result = self.run_one_session().await;
            if let Err(e) = &result {
                log::error!("[{}/{}] session ended: {e}", self.company, self.car_name);
            }
            self.clear_context().await;
            if self.running.is_cancelled() || self.state == ServerState::Stopped {
                break;
            }
            tokio::time::sleep(self.config.sleep_duration_after_connection_refused()).await;
        }
    }

    async fn run_one_session(&mut self) -> Result<(), CarServerError> {
        self.run_initial_sequence().await?;
        self.run_normal_communication().await
    }

    /// **Initial sequence** (§4.9): connect, handshake, initial commands.
    async fn run_initial_sequence(&mut self) -> Result<(), CarServerError> {
        let (client, event_loop) = (self.transport)().map_err(CarServerError::ConnectFailed)?;
        let mut adapter = MqttAdapter::new(client, event_loop, self.topics.clone(), self.events_tx.clone());
        adapter
            .connect()
            .await
            .map_err(|e| CarServerError::ConnectFailed(e.to_string()))?;
        self.adapter = Some(adapter);
        self.transition(ServerState::Connected);

        let connect_msg = self
            .adapter()
            .get_connect_message(self.config.mqtt_timeout())
            .await
            .ok_or(CarServerError::InvalidConnectMessage)?;

        let ExternalClient::Connect {
            session_id,
            devices,
            ..
        } = &connect_msg
        else {
            return Err(CarServerError::InvalidConnectMessage);
        };
        if devices.is_empty() {
            return Err(CarServerError::InvalidConnectMessage);
        }

        self.session
            .set_id(session_id.clone())
            .map_err(|_| CarServerError::InvalidConnectMessage)?;

        let mut connected_in_order = Vec::new();
        for device in devices {
            self.connect_device_if_supported(device, &mut connected_in_order)
                .await;
        }

        self.adapter()
            .publish(&ExternalServer::ConnectResponse {
                session_id: self.session.id().to_string(),
                response_type: ConnectResponseType::Ok,
            })
            .await
            .map_err(|e| CarServerError::ConnectFailed(e.to_string()))?;

        self.status_checker.allow_counter_reset();
        for device in &connected_in_order {
            self.expect_connecting_status(device).await?;
        }

        self.send_initial_commands(&connected_in_order).await?;

        Ok(())
    }

    async fn connect_device_if_supported(&mut self, device: &Device, accepted: &mut Vec<Device>) {
        let Some(module) = self.modules.get(&device.module) else {
            log::info!(
                "[{}/{}] device {device} references unconfigured module {}",
                self.company,
                self.car_name,
                device.module
            );
            return;
        };
        if !module.is_device_type_supported(device.device_type).await {
            log::info!(
                "[{}/{}] module {} does not support device type {} for {device}",
                self.company,
                self.car_name,
                device.module,
                device.device_type
            );
            return;
        }
        if module.device_connected(device).await.is_ok() {
            self.known_devices.write().await.connect(device.clone());
            accepted.push(device.clone());
        } else {
            log::warn!("[{}/{}] plugin rejected {device}", self.company, self.car_name);
        }
    }

    async fn expect_connecting_status(&mut self, device: &Device) -> Result<(), CarServerError> {
        let status_msg = self
            .adapter()
            .get_status(self.config.mqtt_timeout())
            .await
            .ok_or(CarServerError::HandshakeTimeout)?;

        let ExternalClient::Status {
            session_id,
            device_state,
            message_counter,
            device_status,
            ..
        } = &status_msg
        else {
            return Err(CarServerError::UnexpectedHandshakeStatus);
        };

        if !self.session.is_valid(session_id) {
            return Err(CarServerError::UnexpectedHandshakeStatus);
        }
        if *device_state != DeviceState::Connecting {
            return Err(CarServerError::UnexpectedHandshakeStatus);
        }

        if let Some(module) = self.modules.get(&device.module) {
            let _ = module
                .forward_status(&device_status.status_data, device)
                .await;
        }

        self.status_checker.check(status_msg.clone(), *message_counter).await;
        let _ = self.status_checker.get();

        self.adapter()
            .publish(&ExternalServer::StatusResponse {
                session_id: self.session.id().to_string(),
                message_counter: *message_counter,
            })
            .await
            .map_err(|e| CarServerError::ConnectFailed(e.to_string()))?;

        Ok(())
    }

    async fn send_initial_commands(&mut self, devices: &[Device]) -> Result<(), CarServerError> {
        let mut published_counters = Vec::new();
        for device in devices {
            let command = if let Some(module) = self.modules.get(&device.module) {
                match module.pop_command().await {
                    Some((data, _)) => HandledCommand::from_plugin(data, device.clone()),
                    None => HandledCommand::synthesized_empty(device.clone()),
                }
            } else {
                HandledCommand::synthesized_empty(device.clone())
            };
            let counter = self.publish_command(command).await?;
            published_counters.push(counter);
        }

        for _ in &published_counters {
            let response = self
                .adapter()
                .get_command_response(self.config.mqtt_timeout())
                .await
                .ok_or(CarServerError::HandshakeTimeout)?;
            if let ExternalClient::CommandResponse {
                session_id,
                message_counter,
                ..
            } = response
            {
                if self.session.is_valid(&session_id) {
                    for popped in self.command_tracker.pop(message_counter).await {
                        if popped.from_api {
                            self.ack_command(&popped).await;
                        }
                    }
                }
            }
        }

        self.transition(ServerState::Initialized);
        Ok(())
    }

    async fn publish_command(&mut self, command: HandledCommand) -> Result<u32, CarServerError> {
        let device = command.device.clone();
        let data = command.data.clone();
        let counter = self.command_tracker.add(command);
        self.adapter()
            .publish(&ExternalServer::Command {
                session_id: self.session.id().to_string(),
                message_counter: counter,
                device_command: DeviceCommand {
                    device: device.with_priority_zeroed(),
                    command_data: data,
                },
            })
            .await
            .map_err(|e| CarServerError::ConnectFailed(e.to_string()))?;
        Ok(counter)
    }

    async fn ack_command(&self, command: &HandledCommand) {
        if let Some(module) = self.modules.get(&command.device.module) {
            let _ = module.command_ack(&command.data, &command.device).await;
        }
    }

    /// **Normal communication** (§4.9): event-driven loop after the handshake.
    async fn run_normal_communication(&mut self) -> Result<(), CarServerError> {
        self.transition(ServerState::Running);
        self.session.start();

        loop {
            let Some(evt) = self.events.get().await else {
                return Ok(());
            };
            match evt {
                Event::CarMessageAvailable => self.handle_car_message().await?,
                Event::CommandAvailable(module_id) => self.handle_command_available(module_id).await?,
                Event::MqttDisconnected => return Err(CarServerError::MqttDisconnected),
                Event::TimeoutOccurred(kind) => return Err(CarServerError::Timeout(kind)),
                Event::ServerStopped => return Ok(()),
            }
        }
    }

    async fn handle_car_message(&mut self) -> Result<(), CarServerError> {
        let Some(message) = self.adapter().pop_message().await else {
            return Ok(());
        };
        match message {
            ExternalClient::Connect { session_id, .. } => {
                if self.session.is_valid(&session_id) {
                    let _ = self
                        .adapter()
                        .publish(&ExternalServer::ConnectResponse {
                            session_id,
                            response_type: ConnectResponseType::AlreadyLogged,
                        })
                        .await;
                } else {
                    log::info!(
                        "[{}/{}] ignoring connect message for foreign session",
                        self.company,
                        self.car_name
                    );
                }
                Ok(())
            }
            ExternalClient::Status {
                session_id,
                device_state,
                message_counter,
                device_status,
                error_message,
            } => {
                if !self.session.is_valid(&session_id) {
                    log::info!(
                        "[{}/{}] ignoring status for foreign session",
                        self.company,
                        self.car_name
                    );
                    return Ok(());
                }
                self.session.reset_timer().await;
                self.status_checker
                    .check(
                        ExternalClient::Status {
                            session_id,
                            device_state,
                            message_counter,
                            device_status,
                            error_message,
                        },
                        message_counter,
                    )
                    .await;
                while let Some(checked) = self.status_checker.get() {
                    self.apply_checked_status(&checked).await?;
                }
                if self.known_devices.read().await.connected().is_empty() {
                    return Err(CarServerError::AllDevicesDisconnected);
                }
                Ok(())
            }
            ExternalClient::CommandResponse {
                session_id,
                response_type,
                message_counter,
            } => {
                if !self.session.is_valid(&session_id) {
                    return Ok(());
                }
                self.session.reset_timer().await;
                if response_type == CommandResponseType::DeviceNotConnected {
                    if let Some(device) = self.command_tracker.command_device(message_counter) {
                        let key = device.key();
                        self.disconnect_device(&key, DisconnectKind::Announced).await;
                    }
                }
                for popped in self.command_tracker.pop(message_counter).await {
                    if popped.from_api {
                        self.ack_command(&popped).await;
                    }
                }
                Ok(())
            }
        }
    }

    async fn apply_checked_status(&mut self, checked: &ExternalClient) -> Result<(), CarServerError> {
        let ExternalClient::Status {
            device_state,
            device_status,
            ..
        } = checked
        else {
            return Ok(());
        };
        let device = &device_status.device;
        if let Some(module) = self.modules.get(&device.module) {
            let _ = module.forward_status(&device_status.status_data, device).await;
        }
        let response_counter = match checked {
            ExternalClient::Status { message_counter, .. } => *message_counter,
            _ => 0,
        };
        let _ = self
            .adapter()
            .publish(&ExternalServer::StatusResponse {
                session_id: self.session.id().to_string(),
                message_counter: response_counter,
            })
            .await;
        if *device_state == DeviceState::Disconnect {
            self.disconnect_device(&device.key(), DisconnectKind::Announced).await;
        }
        Ok(())
    }

    async fn disconnect_device(&mut self, key: &fleet_protocol::device::DeviceKey, kind: DisconnectKind) {
        let device = self
            .known_devices
            .read()
            .await
            .connected()
            .iter()
            .find(|d| &d.key() == key)
            .cloned();
        if let Some(device) = device {
            if let Some(module) = self.modules.get(&device.module) {
                let _ = module.device_disconnected(kind, &device).await;
            }
        }
        self.known_devices.write().await.disconnect(key);
    }

    async fn handle_command_available(&mut self, module_id: u32) -> Result<(), CarServerError> {
        let Some(module) = self.modules.get(&module_id) else {
            return Ok(());
        };
        for (data, device) in module.drain_commands().await {
            if device.module != module_id {
                if !self.config.send_invalid_command {
                    log::warn!(
                        "[{}/{}] dropping command for device in module {} produced by module {module_id}",
                        self.company,
                        self.car_name,
                        device.module
                    );
                    continue;
                }
                log::warn!(
                    "[{}/{}] publishing command for device in module {} produced by module {module_id}",
                    self.company,
                    self.car_name,
                    device.module
                );
            }
            let command = HandledCommand::from_plugin(data, device);
            self.publish_command(command).await?;
        }
        Ok(())
    }

    /// **Clear context** (§4.9): disconnect the adapter, stop timers, reset
    /// checkers, disconnect every connected device, clear registries.
    async fn clear_context(&mut self) {
        if let Some(mut adapter) = self.adapter.take() {
            adapter.disconnect().await;
        }
        self.session.stop().await;
        self.status_checker.reset().await;
        self.command_tracker.reset().await;

        let connected: Vec<Device> = self.known_devices.read().await.connected().to_vec();
        for device in connected {
            if let Some(module) = self.modules.get(&device.module) {
                let _ = module
                    .device_disconnected(DisconnectKind::Error, &device)
                    .await;
            }
        }
        self.known_devices.write().await.clear();
        self.events.clear();
    }

    /// **Shutdown** (§4.9): stop every module host and clear context.
    pub async fn stop(&mut self) {
        self.transition(ServerState::Stopped);
        self.events_tx.post(Event::ServerStopped).await;
        self.running.cancel();
        for module in self.modules.values_mut() {
            module.stop().await;
        }
        self.clear_context().await;
    }

    /// The server's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_table_matches_allowed_edges() {
        use ServerState::{Connected, Error, Initialized, Running, Stopped, Uninitialized};
        assert!(Uninitialized.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Initialized));
        assert!(Initialized.can_transition_to(Running));
        assert!(Stopped.can_transition_to(Uninitialized));
        assert!(Error.can_transition_to(Uninitialized));
        assert!(!Uninitialized.can_transition_to(Running));
        assert!(!Running.can_transition_to(Connected));
    }

    #[test]
    fn any_state_can_transition_to_error_or_stopped() {
        for state in [
            ServerState::Uninitialized,
            ServerState::Connected,
            ServerState::Initialized,
            ServerState::Running,
            ServerState::Stopped,
            ServerState::Error,
        ] {
            assert!(state.can_transition_to(ServerState::Error));
            assert!(state.can_transition_to(ServerState::Stopped));
        }
    }
}
