// Keymapper Input Layer - Devices
// Identity of the device an event came from

use std::fmt;

/// An input device as reported by the event source.
///
/// The descriptor is stable across reconnects and is what external
/// trigger keys and per-device dpad state are keyed on. The numeric id
/// is only valid while the device stays connected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InputDevice {
    pub id: i32,
    pub descriptor: String,
    pub name: String,
    pub is_external: bool,
}

impl InputDevice {
    pub fn new(
        id: i32,
        descriptor: impl Into<String>,
        name: impl Into<String>,
        is_external: bool,
    ) -> Self {
        Self {
            id,
            descriptor: descriptor.into(),
            name: name.into(),
            is_external,
        }
    }

    /// A built-in device
    pub fn internal(id: i32, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(id, format!("internal-{}", id), name, false)
    }

    /// An external device, using its descriptor as the name
    pub fn external(id: i32, descriptor: impl Into<String>) -> Self {
        let descriptor = descriptor.into();
        Self::new(id, descriptor.clone(), descriptor, true)
    }
}

impl fmt::Display for InputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_external { "external" } else { "internal" };
        write!(f, "{} [{} {}]", self.name, kind, self.descriptor)
    }
}
