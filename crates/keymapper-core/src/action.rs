// Keymapper Event Directions
// Raw key event actions and the input types an action executor sends

use strum_macros::{Display, EnumString};

/// Direction of a raw key event as delivered by the event source.
///
/// Discriminants follow the kernel input-event values:
///   0 == 'released'
///   1 == 'pressed'
///   2 == 'repeated'
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[repr(i32)]
pub enum KeyEventAction {
    Up = 0,
    Down = 1,
    Repeat = 2,
}

impl KeyEventAction {
    /// Only the initial press, not auto-repeat
    pub fn is_down(self) -> bool {
        matches!(self, KeyEventAction::Down)
    }

    pub fn is_up(self) -> bool {
        matches!(self, KeyEventAction::Up)
    }

    pub fn is_repeat(self) -> bool {
        matches!(self, KeyEventAction::Repeat)
    }
}

/// What an action executor is asked to send for one performance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InputEventType {
    /// Press only; the matching `Up` comes later
    Down,
    /// Release of an earlier `Down`
    Up,
    /// A complete press and release
    DownUp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_properties() {
        assert!(KeyEventAction::Down.is_down());
        assert!(!KeyEventAction::Repeat.is_down());
        assert!(KeyEventAction::Repeat.is_repeat());
        assert!(!KeyEventAction::Up.is_repeat());
        assert!(KeyEventAction::Up.is_up());
        assert!(!KeyEventAction::Down.is_up());
        assert!(!KeyEventAction::Repeat.is_up());
        assert_eq!(KeyEventAction::Repeat as i32, 2);
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("down".parse::<KeyEventAction>(), Ok(KeyEventAction::Down));
        assert_eq!("UP".parse::<KeyEventAction>(), Ok(KeyEventAction::Up));
        assert!("hold".parse::<KeyEventAction>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(InputEventType::DownUp.to_string(), "DOWN_UP");
        assert_eq!(KeyEventAction::Down.to_string(), "down");
    }
}
