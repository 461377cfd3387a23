// Keymapper Key Type
// Key and button codes from Linux input-event-codes.h

use std::fmt;
use std::str::FromStr;

include!(concat!(env!("OUT_DIR"), "/key_codes.rs"));

impl Key {
    /// Get the raw numeric code value
    pub fn code(self) -> u16 {
        self.0
    }

    /// Get the display name of this key
    pub fn name(self) -> &'static str {
        key_name(self.0)
    }

    /// Returns true for the four directional-pad buttons
    pub fn is_dpad(self) -> bool {
        matches!(
            self,
            Key::BTN_DPAD_UP | Key::BTN_DPAD_DOWN | Key::BTN_DPAD_LEFT | Key::BTN_DPAD_RIGHT
        )
    }
}

impl From<u16> for Key {
    fn from(code: u16) -> Self {
        Key(code)
    }
}

impl From<Key> for u16 {
    fn from(key: Key) -> Self {
        key.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match key_name_opt(self.0) {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "KEY({})", self.0),
        }
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        key_from_name(s).ok_or_else(|| format!("Unknown key: {}", s))
    }
}

fn key_name_opt(code: u16) -> Option<&'static str> {
    KEY_TABLE
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(name, _)| *name)
}

/// Display name for a key code
pub fn key_name(code: u16) -> &'static str {
    key_name_opt(code).unwrap_or("UNKNOWN")
}

/// Look up a key by name.
///
/// Matching is case-insensitive. Single digits resolve to the number row,
/// a `KEY_` prefix is accepted for letters and named keys, and a bare
/// number is taken as a raw code.
pub fn key_from_name(name: &str) -> Option<Key> {
    let upper = name.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return None;
    }

    if upper.len() == 1 && upper.as_bytes()[0].is_ascii_digit() {
        return lookup(&format!("KEY_{}", upper));
    }

    if let Some(key) = lookup(&upper) {
        return Some(key);
    }

    if let Some(stripped) = upper.strip_prefix("KEY_") {
        if let Some(key) = lookup(stripped) {
            return Some(key);
        }
    }

    upper.parse::<u16>().ok().map(Key)
}

fn lookup(name: &str) -> Option<Key> {
    KEY_TABLE
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, code)| Key(*code))
}
