// Keymapper Settings Module
// Global timing defaults and user feature toggles

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Default timing applied wherever a trigger or action leaves a value unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingDefaults {
    pub long_press_delay: Duration,
    pub double_press_delay: Duration,
    pub sequence_trigger_timeout: Duration,
    pub repeat_rate: Duration,
    pub repeat_delay: Duration,
    pub hold_down_duration: Duration,
    /// How long the keys of a parallel trigger may take to all go down
    pub parallel_window: Duration,
}

impl Default for TimingDefaults {
    fn default() -> Self {
        Self {
            long_press_delay: Duration::from_millis(500),
            double_press_delay: Duration::from_millis(300),
            sequence_trigger_timeout: Duration::from_millis(1000),
            repeat_rate: Duration::from_millis(50),
            repeat_delay: Duration::from_millis(400),
            hold_down_duration: Duration::from_millis(1000),
            parallel_window: Duration::from_millis(500),
        }
    }
}

/// Settings that apply to every key map.
///
/// Built from the `[timing]` and `[features]` tables of a config file.
/// Feature toggles back key map constraints such as:
///   constraints = ["settings.gaming", "not settings.docked"]
#[derive(Debug, Clone, Default)]
pub struct Settings {
    timing: TimingDefaults,

    /// Named boolean toggles
    features: HashMap<String, bool>,
}

/// Errors that can occur when building settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// `[timing]` table, all values in milliseconds
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TimingToml {
    pub long_press_delay_ms: Option<u64>,
    pub double_press_delay_ms: Option<u64>,
    pub sequence_trigger_timeout_ms: Option<u64>,
    pub repeat_rate_ms: Option<u64>,
    pub repeat_delay_ms: Option<u64>,
    pub hold_down_duration_ms: Option<u64>,
    pub parallel_window_ms: Option<u64>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from already-deserialized `[timing]` and `[features]` tables
    pub fn from_tables(
        timing: Option<TimingToml>,
        features: Option<HashMap<String, toml::Value>>,
    ) -> Result<Self, SettingsError> {
        let mut settings = Self::new();

        if let Some(timing) = timing {
            settings.timing = apply_timing(settings.timing, &timing)?;
        }

        for (key, value) in features.into_iter().flatten() {
            let bool_value = parse_bool_value(&value)?;
            settings.features.insert(key, bool_value);
        }

        Ok(settings)
    }

    pub fn timing(&self) -> &TimingDefaults {
        &self.timing
    }

    /// Get a boolean feature value
    pub fn get_bool(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    /// Set a boolean feature value
    pub fn set_bool(&mut self, name: &str, value: bool) {
        self.features.insert(name.to_string(), value);
    }

    /// Evaluate a settings condition expression
    ///
    /// Supports:
    ///   - "settings.gaming" -> true if that feature is on
    ///   - "not settings.gaming" -> true if that feature is off
    ///   - "gaming" -> same as "settings.gaming"
    pub fn evaluate_condition(&self, expr: &str) -> bool {
        let expr = expr.trim();

        if let Some(rest) = expr.strip_prefix("not ") {
            return !self.evaluate_condition(rest);
        }

        if let Some(setting_name) = expr.strip_prefix("settings.") {
            return self.get_bool(setting_name.trim());
        }

        self.get_bool(expr)
    }
}

fn apply_timing(
    mut base: TimingDefaults,
    toml: &TimingToml,
) -> Result<TimingDefaults, SettingsError> {
    if toml.repeat_rate_ms == Some(0) {
        return Err(SettingsError::InvalidValue(
            "repeat_rate_ms must be positive".to_string(),
        ));
    }

    let fields = [
        (toml.long_press_delay_ms, &mut base.long_press_delay),
        (toml.double_press_delay_ms, &mut base.double_press_delay),
        (toml.sequence_trigger_timeout_ms, &mut base.sequence_trigger_timeout),
        (toml.repeat_rate_ms, &mut base.repeat_rate),
        (toml.repeat_delay_ms, &mut base.repeat_delay),
        (toml.hold_down_duration_ms, &mut base.hold_down_duration),
        (toml.parallel_window_ms, &mut base.parallel_window),
    ];
    for (value, slot) in fields {
        if let Some(ms) = value {
            *slot = Duration::from_millis(ms);
        }
    }

    Ok(base)
}

/// Accepts booleans, 0/1, and the usual on/off spellings
fn parse_bool_value(value: &toml::Value) -> Result<bool, SettingsError> {
    match value {
        toml::Value::Boolean(b) => Ok(*b),
        toml::Value::Integer(1) => Ok(true),
        toml::Value::Integer(0) => Ok(false),
        toml::Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(SettingsError::InvalidValue(format!(
                "Cannot convert '{}' to boolean",
                s
            ))),
        },
        _ => Err(SettingsError::InvalidValue(format!(
            "Cannot convert {:?} to boolean",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn features(pairs: &[(&str, toml::Value)]) -> Option<HashMap<String, toml::Value>> {
        Some(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[test]
    fn test_settings_default() {
        let settings = Settings::new();
        assert!(!settings.get_bool("gaming"));
        assert_eq!(settings.timing(), &TimingDefaults::default());
        assert_eq!(settings.timing().long_press_delay, Duration::from_millis(500));
        assert_eq!(settings.timing().parallel_window, Duration::from_millis(500));
    }

    #[test]
    fn test_settings_from_tables() {
        let timing = TimingToml {
            long_press_delay_ms: Some(650),
            repeat_rate_ms: Some(30),
            ..TimingToml::default()
        };
        let settings = Settings::from_tables(
            Some(timing),
            features(&[
                ("gaming", toml::Value::Boolean(true)),
                ("docked", toml::Value::Boolean(false)),
            ]),
        )
        .unwrap();

        assert!(settings.get_bool("gaming"));
        assert!(!settings.get_bool("docked"));
        assert_eq!(settings.timing().long_press_delay, Duration::from_millis(650));
        assert_eq!(settings.timing().repeat_rate, Duration::from_millis(30));
        assert_eq!(settings.timing().double_press_delay, Duration::from_millis(300));
    }

    #[test]
    fn test_settings_evaluate_condition() {
        let mut settings = Settings::new();
        settings.set_bool("gaming", true);
        settings.set_bool("docked", false);

        assert!(settings.evaluate_condition("settings.gaming"));
        assert!(!settings.evaluate_condition("settings.docked"));
        assert!(settings.evaluate_condition("not settings.docked"));
        assert!(!settings.evaluate_condition("not settings.gaming"));
        assert!(settings.evaluate_condition("gaming"));
        assert!(!settings.evaluate_condition("settings.missing"));
    }

    #[test]
    fn test_settings_with_string_values() {
        let settings = Settings::from_tables(
            None,
            features(&[
                ("gaming", toml::Value::String("yes".to_string())),
                ("docked", toml::Value::String("off".to_string())),
                ("tablet", toml::Value::Integer(1)),
            ]),
        )
        .unwrap();

        assert!(settings.get_bool("gaming"));
        assert!(!settings.get_bool("docked"));
        assert!(settings.get_bool("tablet"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Settings::from_tables(
                None,
                features(&[("gaming", toml::Value::String("maybe".to_string()))])
            ),
            Err(SettingsError::InvalidValue(_))
        ));
        let zero_rate = TimingToml {
            repeat_rate_ms: Some(0),
            ..TimingToml::default()
        };
        assert!(matches!(
            Settings::from_tables(Some(zero_rate), None),
            Err(SettingsError::InvalidValue(_))
        ));
    }
}
