//! Device identity.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical device exposed by a car, grouped under a module.
///
/// Equality and hashing use `(module, device_type, role)` only — `name` and
/// `priority` are informational and do not distinguish one device from
/// another with the same module/type/role.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Device {
    /// Id of the module this device belongs to.
    pub module: u32,
    /// Device type, interpreted by the owning module's plugin.
    pub device_type: u32,
    /// Free-form role string, interpreted by the owning module's plugin.
    pub device_role: String,
    /// Human-readable name, informational only.
    pub device_name: String,
    /// Priority hint, informational only. Zeroed on server-emitted devices.
    pub priority: u32,
}

impl Device {
    /// Build a device as declared by a connected car in its connect message.
    #[must_use]
    pub fn new(module: u32, device_type: u32, device_role: impl Into<String>) -> Self {
        Self {
            module,
            device_type,
            device_role: device_role.into(),
            device_name: String::new(),
            priority: 0,
        }
    }

    /// Return a copy of this device with `priority` zeroed, as required of
    /// every device object the server emits back onto the wire.
    #[must_use]
    pub fn with_priority_zeroed(&self) -> Self {
        Self {
            priority: 0,
            ..self.clone()
        }
    }

    /// The `(module, device_type, device_role)` identity key used for
    /// equality and for keying the known-devices registry.
    #[must_use]
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            module: self.module,
            device_type: self.device_type,
            device_role: self.device_role.clone(),
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.module == other.module
            && self.device_type == other.device_type
            && self.device_role == other.device_role
    }
}
impl Eq for Device {}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.module, self.device_type, self.device_role, self.device_name
        )
    }
}

/// The identity portion of a [`Device`], used as a map/set key.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct DeviceKey {
    /// Id of the module this device belongs to.
    pub module: u32,
    /// Device type, interpreted by the owning module's plugin.
    pub device_type: u32,
    /// Free-form role string, interpreted by the owning module's plugin.
    pub device_role: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_ignores_name_and_priority() {
        let mut a = Device::new(1, 2, "role");
        a.device_name = "alice".into();
        a.priority = 7;
        let mut b = Device::new(1, 2, "role");
        b.device_name = "bob".into();
        b.priority = 9;
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn with_priority_zeroed_preserves_identity() {
        let mut d = Device::new(1, 2, "role");
        d.priority = 42;
        let zeroed = d.with_priority_zeroed();
        assert_eq!(zeroed.priority, 0);
        assert_eq!(zeroed, d);
    }
}
