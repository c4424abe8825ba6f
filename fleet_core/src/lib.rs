#![warn(missing_docs)]

//! Per-car session and message-routing state machine for the fleet-protocol
//! bridge server. Wires together the event queue, timers, session/status/
//! command trackers, known-devices registry, module hosts and MQTT adapter
//! (C1–C8) into a car server (C9) and a multi-car supervisor (C10).

pub use crate::car_server::{CarServer, CarServerError, ServerState, TransportFactory};
pub use crate::command_tracker::CommandTracker;
pub use crate::config::{CarConfig, ModuleConfig, ServerConfig, TlsSettings};
pub use crate::event::{channel, Event, EventReceiver, EventSender, TimeoutKind, QUEUE_CAPACITY};
pub use crate::known_devices::KnownDevices;
pub use crate::module_host::{ModuleHost, ModuleNumberMismatch};
pub use crate::mqtt_adapter::{AdapterConnectError, MqttAdapter, CONNECT_GRACE_PERIOD};
pub use crate::session_tracker::{EmptySessionId, SessionTracker};
pub use crate::status_checker::{StatusChecker, DEFAULT_INIT_COUNTER};
pub use crate::supervisor::{Supervisor, SupervisorError};
pub use crate::timer::Timer;

mod car_server;
mod command_tracker;
mod config;
mod event;
mod known_devices;
mod module_host;
mod mqtt_adapter;
mod session_tracker;
mod status_checker;
mod supervisor;
mod timer;
