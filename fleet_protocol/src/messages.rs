//! The `ExternalClient`/`ExternalServer` tagged message unions (§6.2).
//!
//! The real fleet-protocol wire schema is protobuf and out of scope; these
//! types carry exactly the fields the bridge server's core logic consumes,
//! serialized as JSON for the transport adapter and for tests.

use serde::{Deserialize, Serialize};

use crate::device::Device;

/// State a device reports itself to be in, carried on a `Status` message.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    /// The device is announcing itself during the connect handshake.
    Connecting,
    /// The device is operating normally.
    Running,
    /// The device is announcing a graceful disconnect.
    Disconnect,
    /// The device encountered an error and is disconnecting.
    Error,
}

/// Outcome reported on a `CommandResponse` message.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandResponseType {
    /// The command was delivered to the named device.
    Ok,
    /// The named device was not connected when the command arrived.
    DeviceNotConnected,
}

/// Outcome reported on a `ConnectResponse` message.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Eq, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectResponseType {
    /// The connect handshake succeeded.
    Ok,
    /// This session id was already logged in; the handshake is not re-run.
    AlreadyLogged,
}

/// A status reported about a single device.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceStatus {
    /// The device this status concerns.
    pub device: Device,
    /// Opaque, module-interpreted status payload.
    pub status_data: Vec<u8>,
}

/// A command directed at a single device.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceCommand {
    /// The device this command is directed at.
    pub device: Device,
    /// Opaque, module-interpreted command payload.
    pub command_data: Vec<u8>,
}

/// Messages sent by a car, received by the bridge server.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ExternalClient {
    /// The connect handshake message, sent once per MQTT session.
    Connect {
        /// The session id the car is proposing for this MQTT session.
        session_id: String,
        /// Company name the car belongs to.
        company: String,
        /// The car's own name.
        vehicle_name: String,
        /// Every device the car is offering to connect.
        devices: Vec<Device>,
    },
    /// A status update about one device.
    Status {
        /// Session id this message is scoped to.
        session_id: String,
        /// The reported device state.
        device_state: DeviceState,
        /// Monotonically increasing per-car status counter.
        message_counter: u32,
        /// The device and its opaque status payload.
        device_status: DeviceStatus,
        /// Optional human-readable error detail, present when `device_state == Error`.
        error_message: Option<Vec<u8>>,
    },
    /// A response to a previously published command.
    CommandResponse {
        /// Session id this message is scoped to.
        session_id: String,
        /// Outcome reported for the command.
        response_type: CommandResponseType,
        /// Counter of the command this response acknowledges.
        message_counter: u32,
    },
}

impl ExternalClient {
    /// The session id field common to every variant.
    #[must_use]
    pub fn session_id(&self) -> &str {
        match self {
            ExternalClient::Connect { session_id, .. }
            | ExternalClient::Status { session_id, .. }
            | ExternalClient::CommandResponse { session_id, .. } => session_id,
        }
    }
}

/// Messages sent by the bridge server, received by a car.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ExternalServer {
    /// Reply to a connect handshake.
    ConnectResponse {
        /// Session id this reply is scoped to.
        session_id: String,
        /// Outcome of the connect handshake.
        response_type: ConnectResponseType,
    },
    /// Reply to a checked-in-order status.
    StatusResponse {
        /// Session id this reply is scoped to.
        session_id: String,
        /// Counter of the status this reply acknowledges.
        message_counter: u32,
    },
    /// A command directed at one device.
    Command {
        /// Session id this message is scoped to.
        session_id: String,
        /// Monotonically increasing per-car command counter.
        message_counter: u32,
        /// The device and its opaque command payload.
        device_command: DeviceCommand,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let msg = ExternalClient::Status {
            session_id: "sess-1".into(),
            device_state: DeviceState::Connecting,
            message_counter: 3,
            device_status: DeviceStatus {
                device: Device::new(1, 2, "role"),
                status_data: vec![1, 2, 3],
            },
            error_message: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: ExternalClient = serde_json::from_str(&json).unwrap();
        assert_eq!(back.session_id(), "sess-1");
    }

    #[test]
    fn session_id_accessor_covers_every_variant() {
        let connect = ExternalClient::Connect {
            session_id: "a".into(),
            company: "acme".into(),
            vehicle_name: "car1".into(),
            devices: vec![],
        };
        let response = ExternalClient::CommandResponse {
            session_id: "b".into(),
            response_type: CommandResponseType::Ok,
            message_counter: 0,
        };
        assert_eq!(connect.session_id(), "a");
        assert_eq!(response.session_id(), "b");
    }
}
