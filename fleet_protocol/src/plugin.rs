//! The native module plugin contract (§6.3) and loaders for it.
//!
//! The plugin is an external collaborator the core only invokes through
//! this trait; the real implementation loads a dynamic library and calls
//! through its C ABI, but nothing in the core cares which implementation
//! it is handed.

use std::time::Duration;

use thiserror::Error;

use crate::device::Device;
use crate::error_code::ErrorCode;

/// A command the plugin produced (or, during the connect handshake, a
/// synthesized empty placeholder) that has been or is about to be published.
#[derive(Clone, Debug)]
pub struct HandledCommand {
    /// Opaque, module-interpreted command payload.
    pub data: Vec<u8>,
    /// The device this command targets.
    pub device: Device,
    /// Assigned at publish time from the car's per-car monotonic counter.
    /// `None` until published.
    pub counter: Option<u32>,
    /// `true` iff the command was sourced from the plugin, as opposed to a
    /// synthesized empty placeholder emitted during the connect handshake.
    pub from_api: bool,
}

impl HandledCommand {
    /// Build a command sourced from the plugin.
    #[must_use]
    pub fn from_plugin(data: Vec<u8>, device: Device) -> Self {
        Self {
            data,
            device,
            counter: None,
            from_api: true,
        }
    }

    /// Build the synthesized empty command used to fill in a device with no
    /// plugin-produced command during the connect handshake.
    #[must_use]
    pub fn synthesized_empty(device: Device) -> Self {
        Self {
            data: Vec::new(),
            device,
            counter: None,
            from_api: false,
        }
    }

    /// Assign the publish-time counter. Must only be called once.
    pub fn assign_counter(&mut self, counter: u32) {
        debug_assert!(self.counter.is_none(), "counter assigned more than once");
        self.counter = Some(counter);
    }
}

/// Reason a device is being reported as disconnected to the plugin.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DisconnectKind {
    /// The device announced its own disconnect.
    Announced = 0,
    /// The device's status timed out.
    Timeout = 1,
    /// The device encountered an error.
    Error = 2,
}

/// An error surfaced by a plugin operation.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin returned a negative code other than a known sentinel.
    #[error("plugin operation failed with code {0:?}")]
    Failed(ErrorCode),
    /// The plugin's self-reported module number does not match configuration.
    #[error("plugin module number {actual} does not match configured id {configured}")]
    ModuleNumberMismatch {
        /// The id found in the server's configuration.
        configured: u32,
        /// The id the plugin reported via `get_module_number`.
        actual: i32,
    },
    /// Loading the dynamic library or resolving a required symbol failed.
    #[error("failed to load plugin: {0}")]
    Load(String),
}

/// A single `(key, value)` byte-buffer configuration entry passed to
/// `init`, per §6.3.
pub type PluginConfigEntry = (Vec<u8>, Vec<u8>);

/// The outcome of a `wait_for_command` call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// A command became available.
    Ready,
    /// No command became available before the timeout elapsed.
    TimedOut,
}

/// The operations a module plugin must provide (§6.3).
///
/// Every operation except `wait_for_command` is declared non-reentrant by
/// the plugin contract; callers are responsible for serializing access
/// (the module host does this with a per-module mutex).
pub trait ModulePlugin: Send {
    /// The plugin's self-reported module number, checked against configuration
    /// once at module-host construction time.
    fn module_number(&self) -> i32;

    /// Whether the plugin supports the given device type.
    fn is_device_type_supported(&self, device_type: u32) -> bool;

    /// Notify the plugin that `device` has connected.
    ///
    /// # Errors
    /// Returns [`PluginError`] if the plugin reports a non-OK code.
    fn device_connected(&mut self, device: &Device) -> Result<(), PluginError>;

    /// Notify the plugin that `device` has disconnected, and why.
    ///
    /// # Errors
    /// Returns [`PluginError`] if the plugin reports a non-OK code.
    fn device_disconnected(
        &mut self,
        kind: DisconnectKind,
        device: &Device,
    ) -> Result<(), PluginError>;

    /// Forward a status payload for `device`.
    ///
    /// # Errors
    /// Returns [`PluginError`] if the plugin reports a non-OK code.
    fn forward_status(&mut self, buffer: &[u8], device: &Device) -> Result<(), PluginError>;

    /// Forward an error message payload for `device`.
    ///
    /// # Errors
    /// Returns [`PluginError`] if the plugin reports a non-OK code.
    fn forward_error_message(&mut self, buffer: &[u8], device: &Device)
        -> Result<(), PluginError>;

    /// Block up to `timeout` waiting for a command to become available.
    ///
    /// # Errors
    /// Returns [`PluginError`] for any outcome other than ready or timed out.
    fn wait_for_command(&mut self, timeout: Duration) -> Result<WaitOutcome, PluginError>;

    /// Take the next available command, if any.
    ///
    /// # Errors
    /// Returns [`PluginError`] if the plugin reports a negative remaining count.
    fn pop_command(&mut self) -> Result<Option<(Vec<u8>, Device)>, PluginError>;

    /// Acknowledge a command previously forwarded to a device.
    ///
    /// # Errors
    /// Returns [`PluginError`] if the plugin reports a non-OK code.
    fn command_ack(&mut self, buffer: &[u8], device: &Device) -> Result<(), PluginError>;
}

pub mod ffi;
pub mod fake;

pub use fake::FakeModulePlugin;
pub use ffi::FfiModulePlugin;
