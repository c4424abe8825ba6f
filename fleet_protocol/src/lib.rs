#![warn(missing_docs)]

//! The fleet-protocol wire schema, module plugin contract and plugin loaders.
//!
//! This crate treats the wire schema as opaque tagged messages (§6.2 of the
//! originating specification) and the module plugin as an external native
//! collaborator (§6.3): the types here only carry the fields the core
//! bridge server needs to route messages and drive the plugin, they do not
//! attempt to reproduce the real fleet-protocol protobuf schema.

pub mod device;
pub mod error_code;
pub mod messages;
pub mod plugin;

pub use crate::device::Device;
pub use crate::error_code::ErrorCode;
pub use crate::messages::{
    CommandResponseType, ConnectResponseType, DeviceState, ExternalClient, ExternalServer,
};
pub use crate::plugin::{DisconnectKind, HandledCommand, ModulePlugin, PluginError};
