//! Module host (C7): owns one plugin instance per module and a command
//! poller task that drains plugin-produced commands into a FIFO.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use fleet_protocol::plugin::WaitOutcome;
use fleet_protocol::{Device, DisconnectKind, ModulePlugin, PluginError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventSender};

/// The module's self-reported number did not match its configured id.
#[derive(Debug, thiserror::Error)]
#[error("module {configured}: plugin reported module number {actual}")]
pub struct ModuleNumberMismatch {
    configured: u32,
    actual: i32,
}

/// A predicate the command poller consults to decide whether commands
/// accumulated while the module was disconnected should be discarded in
/// favor of the freshest one.
pub type ConnectedPredicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Owns a single module's plugin instance and its command poller task.
pub struct ModuleHost {
    module_id: u32,
    plugin: Arc<Mutex<Box<dyn ModulePlugin>>>,
    queue: Arc<Mutex<VecDeque<(Vec<u8>, Device)>>>,
    cancel_token: CancellationToken,
    poller: Option<tokio::task::JoinHandle<()>>,
}

impl ModuleHost {
    /// Wrap `plugin`, verifying its self-reported module number matches
    /// `module_id`, and spawn the command-poller task.
    ///
    /// # Errors
    /// Returns [`ModuleNumberMismatch`] if the plugin's `module_number()`
    /// disagrees with `module_id`.
    pub fn start(
        module_id: u32,
        plugin: Box<dyn ModulePlugin>,
        is_connected: ConnectedPredicate,
        events: EventSender,
    ) -> Result<Self, ModuleNumberMismatch> {
        let actual = plugin.module_number();
        if actual != i32::try_from(module_id).unwrap_or(i32::MAX) {
            return Err(ModuleNumberMismatch {
                configured: module_id,
                actual,
            });
        }

        let plugin = Arc::new(Mutex::new(plugin));
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let cancel_token = CancellationToken::new();

        let poller = tokio::spawn(poll_loop(
            module_id,
            plugin.clone(),
            queue.clone(),
            is_connected,
            events,
            cancel_token.clone(),
        ));

        Ok(Self {
            module_id,
            plugin,
            queue,
            cancel_token,
            poller: Some(poller),
        })
    }

    /// This module's configured id.
    #[must_use]
    pub fn module_id(&self) -> u32 {
        self.module_id
    }

    /// Non-blocking take of the next plugin-produced command, if any.
    pub async fn pop_command(&self) -> Option<(Vec<u8>, Device)> {
        self.queue.lock().await.pop_front()
    }

    /// Drain every currently queued command.
    pub async fn drain_commands(&self) -> Vec<(Vec<u8>, Device)> {
        self.queue.lock().await.drain(..).collect()
    }

    /// Whether `device_type` is supported by the plugin.
    pub async fn is_device_type_supported(&self, device_type: u32) -> bool {
        self.plugin.lock().await.is_device_type_supported(device_type)
    }

    /// Forward `device_connected` to the plugin.
    ///
    /// # Errors
    /// Propagates [`PluginError`] from the plugin call.
    pub async fn device_connected(&self, device: &Device) -> Result<(), PluginError> {
        self.plugin.lock().await.device_connected(device)
    }

    /// Forward `device_disconnected` to the plugin.
    ///
    /// # Errors
    /// Propagates [`PluginError`] from the plugin call.
    pub async fn device_disconnected(
        &self,
        kind: DisconnectKind,
        device: &Device,
    ) -> Result<(), PluginError> {
        self.plugin.lock().await.device_disconnected(kind, device)
    }

    /// Forward `forward_status` to the plugin.
    ///
    /// # Errors
    /// Propagates [`PluginError`] from the plugin call.
    pub async fn forward_status(&self, buffer: &[u8], device: &Device) -> Result<(), PluginError> {
        self.plugin.lock().await.forward_status(buffer, device)
    }

    /// Forward `forward_error_message` to the plugin.
    ///
    /// # Errors
    /// Propagates [`PluginError`] from the plugin call.
    pub async fn forward_error(&self, buffer: &[u8], device: &Device) -> Result<(), PluginError> {
        self.plugin.lock().await.forward_error_message(buffer, device)
    }

    /// Forward `command_ack` to the plugin.
    ///
    /// # Errors
    /// Propagates [`PluginError`] from the plugin call.
    pub async fn command_ack(&self, buffer: &[u8], device: &Device) -> Result<(), PluginError> {
        self.plugin.lock().await.command_ack(buffer, device)
    }

    /// Signal the poller to stop and join it.
    pub async fn stop(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.poller.take() {
            let _ = handle.await;
        }
    }
}

async fn poll_loop(
    module_id: u32,
    plugin: Arc<Mutex<Box<dyn ModulePlugin>>>,
    queue: Arc<Mutex<VecDeque<(Vec<u8>, Device)>>>,
    is_connected: ConnectedPredicate,
    events: EventSender,
    cancel_token: CancellationToken,
) {
    const POLL_TIMEOUT: Duration = Duration::from_millis(1000);

    loop {
        if cancel_token.is_cancelled() {
            return;
        }

        let wait_result = {
            let mut plugin = plugin.lock().await;
            plugin.wait_for_command(POLL_TIMEOUT)
        };

        match wait_result {
            Ok(WaitOutcome::TimedOut) => continue,
            Ok(WaitOutcome::Ready) => {}
            Err(e) => {
                log::error!("module {module_id}: wait_for_command failed: {e}");
                continue;
            }
        }

        if cancel_token.is_cancelled() {
            return;
        }

        let connected = is_connected();
        let mut drained = Vec::new();
        loop {
            let next = {
                let mut plugin = plugin.lock().await;
                plugin.pop_command()
            };
            match next {
                Ok(Some(item)) => drained.push(item),
                Ok(None) => break,
                Err(e) => {
                    log::error!("module {module_id}: pop_command failed: {e}");
                    break;
                }
            }
        }

        if drained.is_empty() {
            continue;
        }

        {
            let mut queue = queue.lock().await;
            if connected {
                queue.extend(drained);
            } else if let Some(freshest) = drained.pop() {
                queue.clear();
                queue.push_back(freshest);
            }
        }

        if connected {
            events.post(Event::CommandAvailable(module_id)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::channel;
    use fleet_protocol::plugin::FakeModulePlugin;

    #[tokio::test]
    async fn rejects_mismatched_module_number() {
        let (tx, _rx) = channel();
        let plugin: Box<dyn ModulePlugin> = Box::new(FakeModulePlugin::new(9, vec![1]));
        let result = ModuleHost::start(1, plugin, Arc::new(|| true), tx);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn drains_plugin_commands_while_connected() {
        let (tx, mut rx) = channel();
        let mut fake = FakeModulePlugin::new(1, vec![1]);
        let device = Device::new(1, 1, "role");
        fake.queue_command(vec![9], device.clone());
        let plugin: Box<dyn ModulePlugin> = Box::new(fake);

        let mut host = ModuleHost::start(1, plugin, Arc::new(|| true), tx).unwrap();

        let event = rx.get().await;
        assert!(matches!(event, Some(Event::CommandAvailable(1))));
        let popped = host.pop_command().await;
        assert_eq!(popped, Some((vec![9], device)));

        host.stop().await;
    }

    #[tokio::test]
    async fn keeps_only_freshest_command_while_disconnected() {
        let (tx, _rx) = channel();
        let mut fake = FakeModulePlugin::new(1, vec![1]);
        fake.queue_command(vec![1], Device::new(1, 1, "a"));
        let plugin: Box<dyn ModulePlugin> = Box::new(fake);

        let mut host = ModuleHost::start(1, plugin, Arc::new(|| false), tx).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let remaining = host.drain_commands().await;
        assert!(remaining.len() <= 1);

        host.stop().await;
    }
}
