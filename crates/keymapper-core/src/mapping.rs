// Keymapper Mapping Structures
// KeyMap, its actions and their execution policies

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::modifier::MetaState;
use crate::settings::TimingDefaults;
use crate::{Key, Modifier, Trigger};

/// What an action does when performed. Interpreting it is up to the
/// action executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionData {
    /// Send a key, with extra meta state held for its duration
    KeyCode { key: Key, meta_state: u32 },
    /// Type a string
    Text(String),
    /// A named system or app action
    Named(String),
}

impl ActionData {
    pub fn key(key: Key) -> Self {
        ActionData::KeyCode { key, meta_state: 0 }
    }

    /// True for key actions whose key is a pure modifier
    pub fn is_modifier_key(&self) -> bool {
        matches!(self, ActionData::KeyCode { key, .. } if Modifier::is_key_modifier(*key))
    }

    /// Meta-state flags this action sets while held down, 0 for anything
    /// but a modifier key
    pub fn modifier_meta(&self) -> u32 {
        match self {
            ActionData::KeyCode { key, .. } => {
                Modifier::from_key(*key).map_or(0, Modifier::meta_flags)
            }
            _ => 0,
        }
    }
}

impl fmt::Display for ActionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionData::KeyCode { key, meta_state: 0 } => write!(f, "key {}", key),
            ActionData::KeyCode { key, meta_state } => {
                write!(f, "key {}+{}", MetaState(*meta_state), key)
            }
            ActionData::Text(text) => write!(f, "text {:?}", text),
            ActionData::Named(name) => write!(f, "{}", name),
        }
    }
}

/// When a repeating action stops.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RepeatMode {
    /// Stop when the trigger is released
    #[default]
    TriggerReleased,
    /// Keep going until the trigger fires again
    TriggerPressedAgain,
    /// Stop after `repeat_limit` repeats
    LimitReached,
}

/// Execution policy of one action in a key map.
///
/// Durations left as `None` fall back to the global timing defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionPolicy {
    pub repeat: bool,
    pub repeat_mode: RepeatMode,
    pub repeat_limit: Option<u32>,
    pub repeat_rate: Option<Duration>,
    pub repeat_delay: Option<Duration>,
    pub hold_down: bool,
    pub hold_down_duration: Option<Duration>,
    pub stop_hold_down_when_trigger_pressed_again: bool,
    pub multiplier: u32,
    pub delay_before_next_action: Duration,
}

impl Default for ActionPolicy {
    fn default() -> Self {
        Self {
            repeat: false,
            repeat_mode: RepeatMode::TriggerReleased,
            repeat_limit: None,
            repeat_rate: None,
            repeat_delay: None,
            hold_down: false,
            hold_down_duration: None,
            stop_hold_down_when_trigger_pressed_again: false,
            multiplier: 1,
            delay_before_next_action: Duration::ZERO,
        }
    }
}

impl ActionPolicy {
    pub fn repeat_rate(&self, defaults: &TimingDefaults) -> Duration {
        self.repeat_rate.unwrap_or(defaults.repeat_rate)
    }

    pub fn repeat_delay(&self, defaults: &TimingDefaults) -> Duration {
        self.repeat_delay.unwrap_or(defaults.repeat_delay)
    }

    pub fn hold_down_duration(&self, defaults: &TimingDefaults) -> Duration {
        self.hold_down_duration.unwrap_or(defaults.hold_down_duration)
    }

    /// Hold-down that flips between down and up on each firing instead
    /// of waiting for the trigger release
    pub fn toggles_hold_down(&self) -> bool {
        self.hold_down
            && ((self.repeat && self.repeat_mode == RepeatMode::TriggerPressedAgain)
                || self.stop_hold_down_when_trigger_pressed_again)
    }

    /// Number of performances per firing, never zero
    pub fn multiplier(&self) -> u32 {
        self.multiplier.max(1)
    }
}

/// One action of a key map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapAction {
    pub data: ActionData,
    pub policy: ActionPolicy,
}

impl KeyMapAction {
    pub fn new(data: ActionData) -> Self {
        Self {
            data,
            policy: ActionPolicy::default(),
        }
    }

    pub fn with_policy(data: ActionData, policy: ActionPolicy) -> Self {
        Self { data, policy }
    }
}

/// A trigger bound to an ordered list of actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMap {
    pub uid: String,
    pub trigger: Trigger,
    pub actions: Vec<KeyMapAction>,
    /// Constraint expressions; all must hold for the key map to fire
    pub constraints: Vec<String>,
    pub enabled: bool,
}

impl KeyMap {
    pub fn new(uid: impl Into<String>, trigger: Trigger, actions: Vec<KeyMapAction>) -> Self {
        Self {
            uid: uid.into(),
            trigger,
            actions,
            constraints: Vec::new(),
            enabled: true,
        }
    }

    pub fn with_constraints(mut self, constraints: Vec<String>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Enabled with at least one action
    pub fn is_active(&self) -> bool {
        self.enabled && !self.actions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::meta;
    use crate::{ClickType, TriggerKey};

    #[test]
    fn test_modifier_action_detection() {
        assert!(ActionData::key(Key::LEFT_SHIFT).is_modifier_key());
        assert!(!ActionData::key(Key::A).is_modifier_key());
        assert!(!ActionData::Text("shift".to_string()).is_modifier_key());
    }

    #[test]
    fn test_policy_defaults_fall_back() {
        let defaults = TimingDefaults::default();
        let policy = ActionPolicy::default();
        assert_eq!(policy.repeat_rate(&defaults), defaults.repeat_rate);
        assert_eq!(policy.repeat_delay(&defaults), defaults.repeat_delay);
        assert_eq!(policy.hold_down_duration(&defaults), defaults.hold_down_duration);

        let custom = ActionPolicy {
            repeat_rate: Some(Duration::from_millis(20)),
            ..ActionPolicy::default()
        };
        assert_eq!(custom.repeat_rate(&defaults), Duration::from_millis(20));
    }

    #[test]
    fn test_toggles_hold_down() {
        let plain = ActionPolicy {
            hold_down: true,
            ..ActionPolicy::default()
        };
        assert!(!plain.toggles_hold_down());

        let pressed_again = ActionPolicy {
            hold_down: true,
            repeat: true,
            repeat_mode: RepeatMode::TriggerPressedAgain,
            ..ActionPolicy::default()
        };
        assert!(pressed_again.toggles_hold_down());

        let explicit = ActionPolicy {
            hold_down: true,
            stop_hold_down_when_trigger_pressed_again: true,
            ..ActionPolicy::default()
        };
        assert!(explicit.toggles_hold_down());
    }

    #[test]
    fn test_multiplier_never_zero() {
        let policy = ActionPolicy {
            multiplier: 0,
            ..ActionPolicy::default()
        };
        assert_eq!(policy.multiplier(), 1);
    }

    #[test]
    fn test_keymap_is_active() {
        let trigger = Trigger::single(TriggerKey::new(Key::A, ClickType::ShortPress));
        let actions = vec![KeyMapAction::new(ActionData::key(Key::B))];
        let map = KeyMap::new("a", trigger.clone(), actions);
        assert!(map.is_active());
        assert!(!map.clone().disabled().is_active());
        assert!(!KeyMap::new("empty", trigger, vec![]).is_active());
    }

    #[test]
    fn test_action_display() {
        let data = ActionData::KeyCode {
            key: Key::C,
            meta_state: meta::CTRL_ON,
        };
        assert_eq!(data.to_string(), "key CTRL+C");
        assert_eq!(ActionData::key(Key::ENTER).to_string(), "key ENTER");
    }

    #[test]
    fn test_modifier_meta() {
        assert_eq!(
            ActionData::key(Key::LEFT_CTRL).modifier_meta(),
            meta::CTRL_ON | meta::CTRL_LEFT_ON
        );
        assert_eq!(
            ActionData::key(Key::RIGHT_SHIFT).modifier_meta(),
            meta::SHIFT_ON | meta::SHIFT_RIGHT_ON
        );
        assert_eq!(ActionData::key(Key::A).modifier_meta(), 0);
        assert_eq!(ActionData::Text("ctrl".to_string()).modifier_meta(), 0);
    }
}
