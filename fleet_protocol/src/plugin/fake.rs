//! In-memory [`ModulePlugin`] double for tests.

use std::collections::VecDeque;
use std::time::Duration;

use super::{DisconnectKind, ModulePlugin, PluginError, WaitOutcome};
use crate::device::Device;

/// A scripted call recorded by [`FakeModulePlugin`] for assertions in tests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordedCall {
    /// `device_connected` was called for this device.
    DeviceConnected(Device),
    /// `device_disconnected` was called for this device, with this reason.
    DeviceDisconnected(DisconnectKind, Device),
    /// `forward_status` was called with this payload for this device.
    ForwardStatus(Vec<u8>, Device),
    /// `forward_error_message` was called with this payload for this device.
    ForwardErrorMessage(Vec<u8>, Device),
    /// `command_ack` was called with this payload for this device.
    CommandAck(Vec<u8>, Device),
}

/// An in-memory stand-in for a native module plugin, used by tests that
/// exercise the module host and car server without a real dynamic library.
pub struct FakeModulePlugin {
    module_number: i32,
    supported_device_types: Vec<u32>,
    queued_commands: VecDeque<(Vec<u8>, Device)>,
    calls: Vec<RecordedCall>,
    fail_next_wait: bool,
}

impl FakeModulePlugin {
    /// Build a fake reporting `module_number` and supporting exactly the
    /// given device types.
    #[must_use]
    pub fn new(module_number: i32, supported_device_types: Vec<u32>) -> Self {
        Self {
            module_number,
            supported_device_types,
            queued_commands: VecDeque::new(),
            calls: Vec::new(),
            fail_next_wait: false,
        }
    }

    /// Queue a command the next `wait_for_command`/`pop_command` pair will surface.
    pub fn queue_command(&mut self, data: Vec<u8>, device: Device) {
        self.queued_commands.push_back((data, device));
    }

    /// Arrange for the next `wait_for_command` call to report an error
    /// instead of ready/timed out.
    pub fn fail_next_wait(&mut self) {
        self.fail_next_wait = true;
    }

    /// The calls recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }
}

impl ModulePlugin for FakeModulePlugin {
    fn module_number(&self) -> i32 {
        self.module_number
    }

    fn is_device_type_supported(&self, device_type: u32) -> bool {
        self.supported_device_types.contains(&device_type)
    }

    fn device_connected(&mut self, device: &Device) -> Result<(), PluginError> {
        self.calls
            .push(RecordedCall::DeviceConnected(device.clone()));
        Ok(())
    }

    fn device_disconnected(
        &mut self,
        kind: DisconnectKind,
        device: &Device,
    ) -> Result<(), PluginError> {
        self.calls
            .push(RecordedCall::DeviceDisconnected(kind, device.clone()));
        Ok(())
    }

    fn forward_status(&mut self, buffer: &[u8], device: &Device) -> Result<(), PluginError> {
        self.calls
            .push(RecordedCall::ForwardStatus(buffer.to_vec(), device.clone()));
        Ok(())
    }

    fn forward_error_message(
        &mut self,
        buffer: &[u8],
        device: &Device,
    ) -> Result<(), PluginError> {
        self.calls.push(RecordedCall::ForwardErrorMessage(
            buffer.to_vec(),
            device.clone(),
        ));
        Ok(())
    }

    fn wait_for_command(&mut self, _timeout: Duration) -> Result<WaitOutcome, PluginError> {
        if self.fail_next_wait {
            self.fail_next_wait = false;
            return Err(PluginError::Failed(crate::error_code::ErrorCode::NotOk));
        }
        if self.queued_commands.is_empty() {
            Ok(WaitOutcome::TimedOut)
        } else {
            Ok(WaitOutcome::Ready)
        }
    }

    fn pop_command(&mut self) -> Result<Option<(Vec<u8>, Device)>, PluginError> {
        Ok(self.queued_commands.pop_front())
    }

    fn command_ack(&mut self, buffer: &[u8], device: &Device) -> Result<(), PluginError> {
        self.calls
            .push(RecordedCall::CommandAck(buffer.to_vec(), device.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_configured_module_number_and_support() {
        let plugin = FakeModulePlugin::new(7, vec![1, 2]);
        assert_eq!(plugin.module_number(), 7);
        assert!(plugin.is_device_type_supported(1));
        assert!(!plugin.is_device_type_supported(3));
    }

    #[test]
    fn drains_queued_commands_then_times_out() {
        let mut plugin = FakeModulePlugin::new(1, vec![1]);
        let device = Device::new(1, 1, "role");
        plugin.queue_command(vec![1, 2, 3], device.clone());

        assert_eq!(
            plugin.wait_for_command(Duration::from_millis(10)).unwrap(),
            WaitOutcome::Ready
        );
        let popped = plugin.pop_command().unwrap();
        assert_eq!(popped, Some((vec![1, 2, 3], device)));

        assert_eq!(
            plugin.wait_for_command(Duration::from_millis(10)).unwrap(),
            WaitOutcome::TimedOut
        );
        assert_eq!(plugin.pop_command().unwrap(), None);
    }

    #[test]
    fn records_every_call() {
        let mut plugin = FakeModulePlugin::new(1, vec![1]);
        let device = Device::new(1, 1, "role");
        plugin.device_connected(&device).unwrap();
        plugin
            .device_disconnected(DisconnectKind::Announced, &device)
            .unwrap();
        assert_eq!(plugin.calls().len(), 2);
    }
}
