// Keymapper Config Parser - TOML with Serde
// Parses key maps, timing and feature toggles from TOML files

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;

use crate::key::key_from_name;
use crate::modifier::parse_meta_state;
use crate::settings::TimingToml;
use crate::{
    ActionData, ActionPolicy, ClickType, Key, KeyMap, KeyMapAction, RepeatMode, Settings,
    SettingsError, Trigger, TriggerKey, TriggerKeyDevice, TriggerMode,
};

fn config_debug_enabled() -> bool {
    static DEBUG_CONFIG: OnceLock<bool> = OnceLock::new();
    *DEBUG_CONFIG.get_or_init(|| {
        std::env::var("KEYMAPPER_DEBUG_CONFIG")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
            .unwrap_or(false)
    })
}

/// Configuration parser errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid modifier: {0}")]
    InvalidModifier(String),

    #[error("Invalid action in key map {uid}: {message}")]
    InvalidAction { uid: String, message: String },

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Duplicate key map uid: {0}")]
    DuplicateUid(String),
}

/// Root TOML table
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    /// Global timing defaults
    #[serde(default)]
    pub timing: Option<TimingToml>,

    /// Feature toggles read by key map constraints
    #[serde(default)]
    pub features: Option<HashMap<String, toml::Value>>,

    /// Key maps, in matching order
    #[serde(default)]
    pub keymap: Vec<KeyMapToml>,
}

/// One `[[keymap]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyMapToml {
    /// Defaults to `keymap-N`, N being the entry's position
    pub uid: Option<String>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Settings conditions, all of which must hold
    #[serde(default)]
    pub constraints: Vec<String>,

    pub trigger: TriggerToml,

    #[serde(default)]
    pub action: Vec<ActionToml>,
}

/// `[keymap.trigger]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerToml {
    #[serde(default)]
    pub mode: TriggerMode,

    pub long_press_delay_ms: Option<u64>,
    pub double_press_delay_ms: Option<u64>,
    pub sequence_trigger_timeout_ms: Option<u64>,

    #[serde(default)]
    pub keys: Vec<TriggerKeyToml>,
}

/// One entry of `keys = [...]`
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerKeyToml {
    pub key: String,

    #[serde(default)]
    pub click: ClickType,

    /// `any`, `internal`, or an external device descriptor
    pub device: Option<String>,

    #[serde(default = "default_true")]
    pub consume: bool,

    pub scan_code: Option<u32>,

    #[serde(default)]
    pub detect_with_scan_code: bool,
}

/// One `[[keymap.action]]` entry. Exactly one of `key`, `text` and `named`
/// must be set.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ActionToml {
    pub key: Option<String>,

    /// Modifiers held while `key` is sent
    #[serde(default)]
    pub modifiers: Vec<String>,

    pub text: Option<String>,
    pub named: Option<String>,

    #[serde(default)]
    pub repeat: bool,
    #[serde(default)]
    pub repeat_mode: RepeatMode,
    pub repeat_limit: Option<u32>,
    pub repeat_rate_ms: Option<u64>,
    pub repeat_delay_ms: Option<u64>,

    #[serde(default)]
    pub hold_down: bool,
    pub hold_down_duration_ms: Option<u64>,
    #[serde(default)]
    pub stop_hold_down_when_trigger_pressed_again: bool,

    pub multiplier: Option<u32>,
    pub delay_before_next_action_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

/// Parsed configuration: global settings plus the key maps
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub settings: Settings,
    pub key_maps: Vec<KeyMap>,
}

impl Config {
    /// Parse a TOML configuration file
    pub fn from_toml_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let toml_config: ConfigToml =
            toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))?;
        toml_config.to_config()
    }

    /// `~/.config/keymapper/config.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("keymapper").join("config.toml"))
    }
}

impl ConfigToml {
    fn to_config(&self) -> Result<Config, ConfigError> {
        let settings = Settings::from_tables(self.timing.clone(), self.features.clone())?;

        let mut seen = HashSet::new();
        let mut key_maps = Vec::with_capacity(self.keymap.len());
        for (index, entry) in self.keymap.iter().enumerate() {
            let key_map = entry.to_key_map(index)?;
            if !seen.insert(key_map.uid.clone()) {
                return Err(ConfigError::DuplicateUid(key_map.uid));
            }

            if config_debug_enabled() {
                log::debug!(
                    "Key map {} ({}) with {} actions{}",
                    key_map.uid,
                    key_map.trigger,
                    key_map.actions.len(),
                    if key_map.enabled { "" } else { ", disabled" }
                );
            }
            key_maps.push(key_map);
        }

        Ok(Config { settings, key_maps })
    }
}

impl KeyMapToml {
    fn to_key_map(&self, index: usize) -> Result<KeyMap, ConfigError> {
        let uid = self
            .uid
            .clone()
            .unwrap_or_else(|| format!("keymap-{}", index + 1));

        let keys = self
            .trigger
            .keys
            .iter()
            .map(TriggerKeyToml::to_trigger_key)
            .collect::<Result<Vec<_>, _>>()?;

        let trigger = Trigger {
            keys,
            mode: self.trigger.mode,
            long_press_delay: self.trigger.long_press_delay_ms.map(Duration::from_millis),
            double_press_delay: self.trigger.double_press_delay_ms.map(Duration::from_millis),
            sequence_trigger_timeout: self
                .trigger
                .sequence_trigger_timeout_ms
                .map(Duration::from_millis),
        };

        let actions = self
            .action
            .iter()
            .map(|action| action.to_action(&uid))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(KeyMap {
            uid,
            trigger,
            actions,
            constraints: self.constraints.clone(),
            enabled: self.enabled,
        })
    }
}

impl TriggerKeyToml {
    fn to_trigger_key(&self) -> Result<TriggerKey, ConfigError> {
        let mut trigger_key = TriggerKey::new(parse_key(&self.key)?, self.click)
            .with_consume(self.consume)
            .with_device(parse_device(self.device.as_deref()));
        if let Some(scan_code) = self.scan_code {
            trigger_key = trigger_key.with_scan_code(scan_code);
        }
        trigger_key.detect_with_scan_code = self.detect_with_scan_code;

        if trigger_key.detect_with_scan_code && trigger_key.scan_code.is_none() {
            return Err(ConfigError::InvalidValue(format!(
                "detect_with_scan_code is set for {} but no scan_code is given",
                self.key
            )));
        }
        Ok(trigger_key)
    }
}

impl ActionToml {
    fn to_action(&self, uid: &str) -> Result<KeyMapAction, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidAction {
            uid: uid.to_string(),
            message: message.to_string(),
        };

        let data = match (&self.key, &self.text, &self.named) {
            (Some(key), None, None) => ActionData::KeyCode {
                key: parse_key(key)?,
                meta_state: parse_meta_state(&self.modifiers)
                    .map_err(|e| ConfigError::InvalidModifier(e.to_string()))?,
            },
            (None, Some(text), None) if self.modifiers.is_empty() => {
                ActionData::Text(text.clone())
            }
            (None, None, Some(named)) if self.modifiers.is_empty() => {
                ActionData::Named(named.clone())
            }
            (None, None, None) => return Err(invalid("one of key, text or named is required")),
            _ if !self.modifiers.is_empty() && self.key.is_none() => {
                return Err(invalid("modifiers only apply to key actions"))
            }
            _ => return Err(invalid("only one of key, text or named may be set")),
        };

        if self.repeat_rate_ms == Some(0) {
            return Err(invalid("repeat_rate_ms must be positive"));
        }
        if self.multiplier == Some(0) {
            return Err(invalid("multiplier must be at least 1"));
        }
        if self.repeat_mode == RepeatMode::LimitReached
            && self.repeat
            && self.repeat_limit.is_none()
        {
            return Err(invalid("repeat_mode limit_reached needs a repeat_limit"));
        }

        let policy = ActionPolicy {
            repeat: self.repeat,
            repeat_mode: self.repeat_mode,
            repeat_limit: self.repeat_limit,
            repeat_rate: self.repeat_rate_ms.map(Duration::from_millis),
            repeat_delay: self.repeat_delay_ms.map(Duration::from_millis),
            hold_down: self.hold_down,
            hold_down_duration: self.hold_down_duration_ms.map(Duration::from_millis),
            stop_hold_down_when_trigger_pressed_again: self
                .stop_hold_down_when_trigger_pressed_again,
            multiplier: self.multiplier.unwrap_or(1),
            delay_before_next_action: self
                .delay_before_next_action_ms
                .map(Duration::from_millis)
                .unwrap_or(Duration::ZERO),
        };

        Ok(KeyMapAction::with_policy(data, policy))
    }
}

fn parse_key(name: &str) -> Result<Key, ConfigError> {
    key_from_name(name).ok_or_else(|| ConfigError::InvalidKey(name.to_string()))
}

fn parse_device(device: Option<&str>) -> TriggerKeyDevice {
    match device.map(str::trim) {
        None => TriggerKeyDevice::Any,
        Some(d) if d.eq_ignore_ascii_case("any") || d.is_empty() => TriggerKeyDevice::Any,
        Some(d) if d.eq_ignore_ascii_case("internal") => TriggerKeyDevice::Internal,
        Some(d) => {
            let descriptor = d.strip_prefix("external:").unwrap_or(d);
            TriggerKeyDevice::External(descriptor.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::meta;

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("a").unwrap(), Key::A);
        assert_eq!(parse_key("KEY_ENTER").unwrap(), Key::ENTER);
        assert!(matches!(parse_key("nope"), Err(ConfigError::InvalidKey(_))));
    }

    #[test]
    fn test_parse_device() {
        assert_eq!(parse_device(None), TriggerKeyDevice::Any);
        assert_eq!(parse_device(Some("ANY")), TriggerKeyDevice::Any);
        assert_eq!(parse_device(Some("internal")), TriggerKeyDevice::Internal);
        assert_eq!(
            parse_device(Some("external:usb-pad")),
            TriggerKeyDevice::External("usb-pad".to_string())
        );
        assert_eq!(
            parse_device(Some("usb-pad")),
            TriggerKeyDevice::External("usb-pad".to_string())
        );
    }

    #[test]
    fn test_config_from_simple_toml() {
        let toml = r#"
[timing]
long_press_delay_ms = 650

[features]
gaming = true

[[keymap]]
uid = "caps-escape"
constraints = ["not settings.gaming"]
[keymap.trigger]
keys = [{ key = "CAPSLOCK" }]
[[keymap.action]]
key = "ESC"

[[keymap]]
[keymap.trigger]
mode = "sequence"
sequence_trigger_timeout_ms = 800
keys = [{ key = "a" }, { key = "b", click = "long_press", consume = false }]
[[keymap.action]]
key = "c"
modifiers = ["Ctrl", "shift"]
multiplier = 2
[[keymap.action]]
text = "hello"
delay_before_next_action_ms = 20
"#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.settings.timing().long_press_delay, Duration::from_millis(650));
        assert!(config.settings.get_bool("gaming"));
        assert_eq!(config.key_maps.len(), 2);

        let caps = &config.key_maps[0];
        assert_eq!(caps.uid, "caps-escape");
        assert_eq!(caps.trigger.effective_mode(), TriggerMode::Undefined);
        assert_eq!(caps.constraints, vec!["not settings.gaming".to_string()]);
        assert_eq!(caps.actions[0].data, ActionData::key(Key::ESC));

        let seq = &config.key_maps[1];
        assert_eq!(seq.uid, "keymap-2");
        assert_eq!(seq.trigger.mode, TriggerMode::Sequence);
        assert_eq!(seq.trigger.sequence_trigger_timeout, Some(Duration::from_millis(800)));
        assert_eq!(seq.trigger.keys[1].click_type, ClickType::LongPress);
        assert!(!seq.trigger.keys[1].consume_event);
        assert_eq!(
            seq.actions[0].data,
            ActionData::KeyCode {
                key: Key::C,
                meta_state: meta::CTRL_ON | meta::SHIFT_ON
            }
        );
        assert_eq!(seq.actions[0].policy.multiplier, 2);
        assert_eq!(seq.actions[1].data, ActionData::Text("hello".to_string()));
        assert_eq!(
            seq.actions[1].policy.delay_before_next_action,
            Duration::from_millis(20)
        );
    }

    #[test]
    fn test_action_policy_fields() {
        let toml = r#"
[[keymap]]
uid = "turbo"
[keymap.trigger]
keys = [{ key = "BTN_A", device = "external:pad", scan_code = 304, detect_with_scan_code = true }]
[[keymap.action]]
key = "SPACE"
repeat = true
repeat_mode = "trigger_pressed_again"
repeat_rate_ms = 30
repeat_delay_ms = 100
hold_down = true
hold_down_duration_ms = 40
"#;
        let config = Config::from_toml(toml).unwrap();
        let key_map = &config.key_maps[0];
        let key = &key_map.trigger.keys[0];
        assert_eq!(key.device, TriggerKeyDevice::External("pad".to_string()));
        assert_eq!(key.scan_code, Some(304));
        assert!(key.detect_with_scan_code);

        let policy = &key_map.actions[0].policy;
        assert!(policy.repeat);
        assert_eq!(policy.repeat_mode, RepeatMode::TriggerPressedAgain);
        assert_eq!(policy.repeat_rate, Some(Duration::from_millis(30)));
        assert_eq!(policy.repeat_delay, Some(Duration::from_millis(100)));
        assert_eq!(policy.hold_down_duration, Some(Duration::from_millis(40)));
        assert!(policy.toggles_hold_down());
    }

    #[test]
    fn test_invalid_actions() {
        let base = |action: &str| {
            format!(
                concat!(
                    "[[keymap]]\nuid = \"x\"\n",
                    "[keymap.trigger]\nkeys = [{{ key = \"a\" }}]\n",
                    "[[keymap.action]]\n{}\n",
                ),
                action
            )
        };

        assert!(matches!(
            Config::from_toml(&base("repeat = true")),
            Err(ConfigError::InvalidAction { .. })
        ));
        assert!(matches!(
            Config::from_toml(&base("key = \"b\"\ntext = \"b\"")),
            Err(ConfigError::InvalidAction { .. })
        ));
        assert!(matches!(
            Config::from_toml(&base("text = \"b\"\nmodifiers = [\"ctrl\"]")),
            Err(ConfigError::InvalidAction { .. })
        ));
        assert!(matches!(
            Config::from_toml(&base("key = \"b\"\nmodifiers = [\"hyper\"]")),
            Err(ConfigError::InvalidModifier(_))
        ));
        assert!(matches!(
            Config::from_toml(&base("key = \"b\"\nrepeat_rate_ms = 0")),
            Err(ConfigError::InvalidAction { .. })
        ));
        assert!(matches!(
            Config::from_toml(&base("key = \"b\"\nrepeat = true\nrepeat_mode = \"limit_reached\"")),
            Err(ConfigError::InvalidAction { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_fields_and_duplicates() {
        assert!(matches!(
            Config::from_toml("[[keymap]]\nuid = \"x\"\ncolour = 1\n[keymap.trigger]\n"),
            Err(ConfigError::TomlParse(_))
        ));

        let duplicate = r#"
[[keymap]]
uid = "same"
[keymap.trigger]
keys = [{ key = "a" }]

[[keymap]]
uid = "same"
[keymap.trigger]
keys = [{ key = "b" }]
"#;
        assert!(matches!(
            Config::from_toml(duplicate),
            Err(ConfigError::DuplicateUid(uid)) if uid == "same"
        ));
    }

    #[test]
    fn test_invalid_timing_is_a_settings_error() {
        assert!(matches!(
            Config::from_toml("[timing]\nrepeat_rate_ms = 0\n"),
            Err(ConfigError::Settings(_))
        ));
    }

    #[test]
    fn test_empty_config() {
        let config = Config::from_toml("").unwrap();
        assert!(config.key_maps.is_empty());
        assert_eq!(*config.settings.timing(), crate::TimingDefaults::default());
    }
}
