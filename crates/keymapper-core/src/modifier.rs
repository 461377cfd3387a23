// Keymapper Modifier Keys
// Modifier key identities and the meta-state bit flags that accompany events

use std::fmt;
use std::str::FromStr;

use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::Key;

/// Errors raised while resolving modifier names
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModifierError {
    #[error("Unknown modifier: {0}")]
    Unknown(String),
}

/// A modifier key, such as Shift or Ctrl.
///
/// Each modifier has the meta-state flag it sets while held. Generic
/// modifiers (`Shift`, `Ctrl`, ...) only set the "either side" flag;
/// sided ones set both their side flag and the generic one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, Display)]
#[strum(ascii_case_insensitive)]
pub enum Modifier {
    #[strum(serialize = "SHIFT")]
    Shift,
    #[strum(serialize = "L_SHIFT", serialize = "LSHIFT")]
    LeftShift,
    #[strum(serialize = "R_SHIFT", serialize = "RSHIFT")]
    RightShift,
    #[strum(to_string = "ALT", serialize = "OPT", serialize = "OPTION")]
    Alt,
    #[strum(serialize = "L_ALT", serialize = "LALT")]
    LeftAlt,
    #[strum(serialize = "R_ALT", serialize = "RALT", serialize = "ALTGR")]
    RightAlt,
    #[strum(to_string = "CTRL", serialize = "CONTROL")]
    Ctrl,
    #[strum(serialize = "L_CTRL", serialize = "LCTRL")]
    LeftCtrl,
    #[strum(serialize = "R_CTRL", serialize = "RCTRL")]
    RightCtrl,
    #[strum(to_string = "META", serialize = "SUPER", serialize = "WIN", serialize = "CMD")]
    Meta,
    #[strum(serialize = "L_META", serialize = "LMETA", serialize = "LSUPER")]
    LeftMeta,
    #[strum(serialize = "R_META", serialize = "RMETA", serialize = "RSUPER")]
    RightMeta,
    #[strum(to_string = "FN", serialize = "FUNCTION")]
    Function,
}

/// Meta-state bit flags
pub mod meta {
    pub const SHIFT_ON: u32 = 0x1;
    pub const ALT_ON: u32 = 0x2;
    pub const FUNCTION_ON: u32 = 0x8;
    pub const ALT_LEFT_ON: u32 = 0x10;
    pub const ALT_RIGHT_ON: u32 = 0x20;
    pub const SHIFT_LEFT_ON: u32 = 0x40;
    pub const SHIFT_RIGHT_ON: u32 = 0x80;
    pub const CTRL_ON: u32 = 0x1000;
    pub const CTRL_LEFT_ON: u32 = 0x2000;
    pub const CTRL_RIGHT_ON: u32 = 0x4000;
    pub const META_ON: u32 = 0x10000;
    pub const META_LEFT_ON: u32 = 0x20000;
    pub const META_RIGHT_ON: u32 = 0x40000;
}

impl Modifier {
    /// Keys that produce this modifier
    pub fn keys(self) -> &'static [Key] {
        match self {
            Modifier::Shift => &[Key::LEFT_SHIFT, Key::RIGHT_SHIFT],
            Modifier::LeftShift => &[Key::LEFT_SHIFT],
            Modifier::RightShift => &[Key::RIGHT_SHIFT],
            Modifier::Alt => &[Key::LEFT_ALT, Key::RIGHT_ALT],
            Modifier::LeftAlt => &[Key::LEFT_ALT],
            Modifier::RightAlt => &[Key::RIGHT_ALT],
            Modifier::Ctrl => &[Key::LEFT_CTRL, Key::RIGHT_CTRL],
            Modifier::LeftCtrl => &[Key::LEFT_CTRL],
            Modifier::RightCtrl => &[Key::RIGHT_CTRL],
            Modifier::Meta => &[Key::LEFT_META, Key::RIGHT_META],
            Modifier::LeftMeta => &[Key::LEFT_META],
            Modifier::RightMeta => &[Key::RIGHT_META],
            Modifier::Function => &[Key::FN],
        }
    }

    /// Meta-state flags set while this modifier is held
    pub fn meta_flags(self) -> u32 {
        use meta::*;
        match self {
            Modifier::Shift => SHIFT_ON,
            Modifier::LeftShift => SHIFT_ON | SHIFT_LEFT_ON,
            Modifier::RightShift => SHIFT_ON | SHIFT_RIGHT_ON,
            Modifier::Alt => ALT_ON,
            Modifier::LeftAlt => ALT_ON | ALT_LEFT_ON,
            Modifier::RightAlt => ALT_ON | ALT_RIGHT_ON,
            Modifier::Ctrl => CTRL_ON,
            Modifier::LeftCtrl => CTRL_ON | CTRL_LEFT_ON,
            Modifier::RightCtrl => CTRL_ON | CTRL_RIGHT_ON,
            Modifier::Meta => META_ON,
            Modifier::LeftMeta => META_ON | META_LEFT_ON,
            Modifier::RightMeta => META_ON | META_RIGHT_ON,
            Modifier::Function => FUNCTION_ON,
        }
    }

    /// Check if a key is a modifier key
    pub fn is_key_modifier(key: Key) -> bool {
        Modifier::from_key(key).is_some()
    }

    /// Get the sided modifier a key produces
    pub fn from_key(key: Key) -> Option<Modifier> {
        Modifier::iter().find(|m| m.keys() == [key])
    }

    /// Modifier by name or alias, case-insensitive
    pub fn from_alias(name: &str) -> Result<Modifier, ModifierError> {
        Modifier::from_str(name.trim()).map_err(|_| ModifierError::Unknown(name.to_string()))
    }
}

/// Combine a list of modifier names into one meta state
pub fn parse_meta_state<S: AsRef<str>>(names: &[S]) -> Result<u32, ModifierError> {
    names.iter().try_fold(0u32, |acc, name| {
        Ok(acc | Modifier::from_alias(name.as_ref())?.meta_flags())
    })
}

/// Display wrapper listing the generic modifiers present in a meta state
pub struct MetaState(pub u32);

impl fmt::Display for MetaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = [
            Modifier::Ctrl,
            Modifier::Shift,
            Modifier::Alt,
            Modifier::Meta,
            Modifier::Function,
        ]
        .into_iter()
        .filter(|m| self.0 & m.meta_flags() != 0)
        .map(|m| m.to_string())
        .collect();
        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join("+"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_key_modifier() {
        assert!(Modifier::is_key_modifier(Key::LEFT_SHIFT));
        assert!(Modifier::is_key_modifier(Key::RIGHT_CTRL));
        assert!(Modifier::is_key_modifier(Key::LEFT_META));
        assert!(Modifier::is_key_modifier(Key::FN));
        assert!(!Modifier::is_key_modifier(Key::A));
        assert!(!Modifier::is_key_modifier(Key::BTN_DPAD_UP));
    }

    #[test]
    fn test_from_key_is_sided() {
        assert_eq!(Modifier::from_key(Key::LEFT_ALT), Some(Modifier::LeftAlt));
        assert_eq!(Modifier::from_key(Key::RIGHT_SHIFT), Some(Modifier::RightShift));
        assert_eq!(Modifier::from_key(Key::SPACE), None);
    }

    #[test]
    fn test_from_alias() {
        assert_eq!(Modifier::from_alias("ctrl"), Ok(Modifier::Ctrl));
        assert_eq!(Modifier::from_alias("Super"), Ok(Modifier::Meta));
        assert_eq!(Modifier::from_alias("l_shift"), Ok(Modifier::LeftShift));
        assert_eq!(
            Modifier::from_alias("Hyper"),
            Err(ModifierError::Unknown("Hyper".to_string()))
        );
    }

    #[test]
    fn test_parse_meta_state() {
        let state = parse_meta_state(&["CTRL", "L_SHIFT"]).unwrap();
        assert_eq!(state, meta::CTRL_ON | meta::SHIFT_ON | meta::SHIFT_LEFT_ON);
        assert_eq!(parse_meta_state::<&str>(&[]).unwrap(), 0);
        assert!(parse_meta_state(&["nope"]).is_err());
    }

    #[test]
    fn test_meta_state_display() {
        assert_eq!(MetaState(0).to_string(), "-");
        assert_eq!(MetaState(meta::CTRL_ON | meta::SHIFT_ON).to_string(), "CTRL+SHIFT");
    }
}
