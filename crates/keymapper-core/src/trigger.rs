// Keymapper Trigger Model
// The key pattern a key map waits for before its actions run

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::input::InputDevice;
use crate::Key;

/// How a single trigger key has to be pressed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ClickType {
    #[default]
    ShortPress,
    LongPress,
    DoublePress,
}

/// Which devices a trigger key accepts events from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKeyDevice {
    /// Any device, including events with no device attached
    #[default]
    Any,
    /// Built-in devices only
    Internal,
    /// One external device, identified by its descriptor
    External(String),
}

impl TriggerKeyDevice {
    /// Check whether an event from `device` satisfies this requirement.
    /// A missing device only matches `Any`.
    pub fn matches(&self, device: Option<&InputDevice>) -> bool {
        match (self, device) {
            (TriggerKeyDevice::Any, _) => true,
            (TriggerKeyDevice::Internal, Some(device)) => !device.is_external,
            (TriggerKeyDevice::External(descriptor), Some(device)) => {
                device.is_external && device.descriptor == *descriptor
            }
            (_, None) => false,
        }
    }
}

impl fmt::Display for TriggerKeyDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKeyDevice::Any => write!(f, "any"),
            TriggerKeyDevice::Internal => write!(f, "internal"),
            TriggerKeyDevice::External(descriptor) => write!(f, "external:{}", descriptor),
        }
    }
}

/// One physical key of a trigger.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    pub key: Key,
    /// Scan code recorded when the key was captured
    pub scan_code: Option<u32>,
    /// Match on `scan_code` instead of `key`
    pub detect_with_scan_code: bool,
    pub device: TriggerKeyDevice,
    pub click_type: ClickType,
    /// Whether the matching input event is swallowed
    pub consume_event: bool,
}

impl TriggerKey {
    pub fn new(key: Key, click_type: ClickType) -> Self {
        Self {
            key,
            scan_code: None,
            detect_with_scan_code: false,
            device: TriggerKeyDevice::Any,
            click_type,
            consume_event: true,
        }
    }

    pub fn with_device(mut self, device: TriggerKeyDevice) -> Self {
        self.device = device;
        self
    }

    pub fn with_consume(mut self, consume_event: bool) -> Self {
        self.consume_event = consume_event;
        self
    }

    pub fn with_scan_code(mut self, scan_code: u32) -> Self {
        self.scan_code = Some(scan_code);
        self.detect_with_scan_code = true;
        self
    }

    /// Two trigger keys refer to the same physical key on the same device(s)
    pub fn same_physical_key(&self, other: &TriggerKey) -> bool {
        self.key == other.key && self.device == other.device
    }
}

/// How the keys of a multi-key trigger combine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerMode {
    /// All keys held together
    Parallel,
    /// Keys pressed one after another
    Sequence,
    /// Single-key trigger
    #[default]
    Undefined,
}

/// A key pattern with optional per-trigger timing overrides.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Trigger {
    pub keys: Vec<TriggerKey>,
    pub mode: TriggerMode,
    pub long_press_delay: Option<Duration>,
    pub double_press_delay: Option<Duration>,
    pub sequence_trigger_timeout: Option<Duration>,
}

impl Trigger {
    pub fn new(keys: Vec<TriggerKey>, mode: TriggerMode) -> Self {
        Self {
            keys,
            mode,
            ..Default::default()
        }
    }

    /// Single-key trigger
    pub fn single(key: TriggerKey) -> Self {
        Self::new(vec![key], TriggerMode::Undefined)
    }

    /// Mode the trigger actually behaves as. Fewer than two keys is
    /// always a single-key trigger.
    pub fn effective_mode(&self) -> TriggerMode {
        if self.keys.len() < 2 {
            TriggerMode::Undefined
        } else {
            self.mode
        }
    }

    /// Click type for parallel triggers, taken from the first key
    pub fn parallel_click_type(&self) -> ClickType {
        self.keys
            .first()
            .map(|k| k.click_type)
            .unwrap_or_default()
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = match self.effective_mode() {
            TriggerMode::Parallel => " + ",
            _ => " -> ",
        };
        let keys: Vec<String> = self
            .keys
            .iter()
            .map(|k| match k.click_type {
                ClickType::ShortPress => k.key.to_string(),
                other => format!("{}({})", k.key, other),
            })
            .collect();
        write!(f, "{}", keys.join(separator))
    }
}
