// Keymapper Input Layer - Events
// Raw key and motion events delivered by the event source

use std::fmt;

use crate::{InputDevice, Key, KeyEventAction};

/// One key or button event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: Key,
    pub action: KeyEventAction,
    pub meta_state: u32,
    pub scan_code: u32,
    /// `None` when the source could not identify the device
    pub device: Option<InputDevice>,
}

impl KeyEvent {
    pub fn new(key: Key, action: KeyEventAction) -> Self {
        Self {
            key,
            action,
            meta_state: 0,
            scan_code: 0,
            device: None,
        }
    }

    pub fn down(key: Key) -> Self {
        Self::new(key, KeyEventAction::Down)
    }

    pub fn up(key: Key) -> Self {
        Self::new(key, KeyEventAction::Up)
    }

    pub fn with_device(mut self, device: InputDevice) -> Self {
        self.device = Some(device);
        self
    }

    pub fn with_scan_code(mut self, scan_code: u32) -> Self {
        self.scan_code = scan_code;
        self
    }

    pub fn with_meta_state(mut self, meta_state: u32) -> Self {
        self.meta_state = meta_state;
        self
    }

    /// Descriptor of the originating device, if known
    pub fn descriptor(&self) -> Option<&str> {
        self.device.as_ref().map(|d| d.descriptor.as_str())
    }
}

impl fmt::Display for KeyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.action)?;
        if let Some(device) = &self.device {
            write!(f, " from {}", device.descriptor)?;
        }
        Ok(())
    }
}

/// One sample of a two-axis hat (directional pad reported as motion).
#[derive(Debug, Clone, PartialEq)]
pub struct MotionEvent {
    pub device: Option<InputDevice>,
    /// -1.0 left, 1.0 right
    pub axis_hat_x: f32,
    /// -1.0 up, 1.0 down
    pub axis_hat_y: f32,
    pub meta_state: u32,
}

impl MotionEvent {
    pub fn new(axis_hat_x: f32, axis_hat_y: f32) -> Self {
        Self {
            device: None,
            axis_hat_x,
            axis_hat_y,
            meta_state: 0,
        }
    }

    pub fn with_device(mut self, device: InputDevice) -> Self {
        self.device = Some(device);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_event_builders() {
        let device = InputDevice::external(2, "pad");
        let event = KeyEvent::down(Key::BTN_A)
            .with_device(device)
            .with_scan_code(304)
            .with_meta_state(1);

        assert_eq!(event.action, KeyEventAction::Down);
        assert_eq!(event.descriptor(), Some("pad"));
        assert_eq!(event.scan_code, 304);
        assert_eq!(event.meta_state, 1);
        assert_eq!(event.to_string(), "BTN_A down from pad");
    }

    #[test]
    fn test_key_event_without_device() {
        let event = KeyEvent::up(Key::A);
        assert_eq!(event.descriptor(), None);
        assert_eq!(event.to_string(), "A up");
    }
}
