//! Known-devices registry (C6): two disjoint sets of device identities.

use fleet_protocol::device::DeviceKey;
use fleet_protocol::Device;

/// Tracks which devices are currently connected vs. disconnected for one
/// car. A device identity (`(module, device_type, role)`) appears in at
/// most one of the two sets at a time.
#[derive(Default)]
pub struct KnownDevices {
    connected: Vec<Device>,
    disconnected: Vec<Device>,
}

impl KnownDevices {
    /// Build an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Devices currently connected.
    #[must_use]
    pub fn connected(&self) -> &[Device] {
        &self.connected
    }

    /// Devices currently disconnected.
    #[must_use]
    pub fn disconnected(&self) -> &[Device] {
        &self.disconnected
    }

    /// Whether `device`'s identity is in the connected set.
    #[must_use]
    pub fn is_connected(&self, device: &Device) -> bool {
        self.connected.iter().any(|d| d.key() == device.key())
    }

    /// Whether `device`'s identity is in the disconnected set.
    #[must_use]
    pub fn is_disconnected(&self, device: &Device) -> bool {
        self.disconnected.iter().any(|d| d.key() == device.key())
    }

    /// Whether any connected device belongs to `module_id`. O(n) scan.
    #[must_use]
    pub fn any_connected_from_module(&self, module_id: u32) -> bool {
        self.connected.iter().any(|d| d.module == module_id)
    }

    /// Move `device` into the connected set, removing it from the
    /// disconnected set if present (Unknown/Disconnected → Connected).
    pub fn connect(&mut self, device: Device) {
        self.disconnected.retain(|d| d.key() != device.key());
        if !self.is_connected(&device) {
            self.connected.push(device);
        }
    }

    /// Move the device identified by `key` into the disconnected set,
    /// removing it from the connected set if present.
    pub fn disconnect(&mut self, key: &DeviceKey) {
        if let Some(pos) = self.connected.iter().position(|d| &d.key() == key) {
            let device = self.connected.remove(pos);
            self.disconnected.push(device);
        }
    }

    /// Remove `key` from both sets entirely.
    pub fn remove(&mut self, key: &DeviceKey) {
        self.connected.retain(|d| &d.key() != key);
        self.disconnected.retain(|d| &d.key() != key);
    }

    /// Empty both sets.
    pub fn clear(&mut self) {
        self.connected.clear();
        self.disconnected.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_removes_from_disconnected_set() {
        let mut devices = KnownDevices::new();
        let device = Device::new(1, 1, "role");
        devices.disconnect(&device.key());
        assert!(!devices.is_disconnected(&device));

        devices.connect(device.clone());
        assert!(devices.is_connected(&device));
        assert!(!devices.is_disconnected(&device));
    }

    #[test]
    fn disconnect_moves_device_between_sets() {
        let mut devices = KnownDevices::new();
        let device = Device::new(1, 1, "role");
        devices.connect(device.clone());
        devices.disconnect(&device.key());
        assert!(!devices.is_connected(&device));
        assert!(devices.is_disconnected(&device));
    }

    #[test]
    fn any_connected_from_module_scans_connected_set() {
        let mut devices = KnownDevices::new();
        devices.connect(Device::new(3, 1, "role"));
        assert!(devices.any_connected_from_module(3));
        assert!(!devices.any_connected_from_module(4));
    }

    #[test]
    fn clear_empties_both_sets() {
        let mut devices = KnownDevices::new();
        devices.connect(Device::new(1, 1, "role"));
        devices.disconnect(&Device::new(2, 1, "role").key());
        devices.clear();
        assert!(devices.connected().is_empty());
        assert!(devices.disconnected().is_empty());
    }
}
