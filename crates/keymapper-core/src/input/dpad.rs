// Keymapper Input Layer - Directional Pad
// Converts hat-axis motion samples into discrete DPAD key events

use indexmap::IndexMap;

use crate::{Key, KeyEvent, KeyEventAction, MotionEvent};

const LEFT: u8 = 1;
const RIGHT: u8 = 1 << 1;
const UP: u8 = 1 << 2;
const DOWN: u8 = 1 << 3;

/// Bits in emission order. Horizontal changes are reported first.
const DIRECTIONS: [(u8, Key); 4] = [
    (LEFT, Key::BTN_DPAD_LEFT),
    (RIGHT, Key::BTN_DPAD_RIGHT),
    (UP, Key::BTN_DPAD_UP),
    (DOWN, Key::BTN_DPAD_DOWN),
];

/// Per-device dpad state, keyed by device descriptor.
///
/// Some controllers report their dpad as a hat axis instead of buttons.
/// Every sample is turned into a 4-bit state and compared against the
/// previous one; each changed bit becomes one synthetic key event.
#[derive(Debug, Default)]
pub struct DpadMotionNormalizer {
    states: IndexMap<String, u8>,
}

impl DpadMotionNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert one motion sample into zero or more DPAD key events.
    pub fn convert_motion_event(&mut self, event: &MotionEvent) -> Vec<KeyEvent> {
        let descriptor = descriptor_of(event.device.as_ref());
        let new_state = axis_bits(event.axis_hat_x, event.axis_hat_y);
        let old_state = self.states.get(descriptor).copied().unwrap_or(0);
        let changed = old_state ^ new_state;

        if changed == 0 {
            return Vec::new();
        }

        if new_state == 0 {
            self.states.shift_remove(descriptor);
        } else {
            self.states.insert(descriptor.to_string(), new_state);
        }

        DIRECTIONS
            .iter()
            .filter(|(bit, _)| changed & bit != 0)
            .map(|(bit, key)| {
                let action = if new_state & bit != 0 {
                    KeyEventAction::Down
                } else {
                    KeyEventAction::Up
                };
                log::trace!("dpad {} {} on {:?}", key, action, descriptor);
                KeyEvent {
                    key: *key,
                    action,
                    meta_state: event.meta_state,
                    scan_code: 0,
                    device: event.device.clone(),
                }
            })
            .collect()
    }

    /// Whether a real DPAD key event should be swallowed because the same
    /// press is already being reported through motion samples.
    pub fn on_key_event(&self, event: &KeyEvent) -> bool {
        let Some(bit) = direction_bit(event.key) else {
            return false;
        };
        let descriptor = descriptor_of(event.device.as_ref());
        self.states
            .get(descriptor)
            .is_some_and(|state| state & bit != 0)
    }

    /// Forget one device, e.g. after it disconnected
    pub fn remove_device(&mut self, descriptor: &str) {
        self.states.shift_remove(descriptor);
    }

    /// Forget every device
    pub fn reset(&mut self) {
        self.states.clear();
    }

    /// Number of devices with at least one direction held
    pub fn active_devices(&self) -> usize {
        self.states.len()
    }
}

fn descriptor_of(device: Option<&crate::InputDevice>) -> &str {
    device.map(|d| d.descriptor.as_str()).unwrap_or("")
}

fn axis_bits(x: f32, y: f32) -> u8 {
    let mut state = 0;
    if x <= -0.5 {
        state |= LEFT;
    } else if x >= 0.5 {
        state |= RIGHT;
    }
    if y <= -0.5 {
        state |= UP;
    } else if y >= 0.5 {
        state |= DOWN;
    }
    state
}

fn direction_bit(key: Key) -> Option<u8> {
    DIRECTIONS
        .iter()
        .find(|(_, k)| *k == key)
        .map(|(bit, _)| *bit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InputDevice;

    fn pad() -> InputDevice {
        InputDevice::external(4, "pad-1")
    }

    fn sample(x: f32, y: f32) -> MotionEvent {
        MotionEvent::new(x, y).with_device(pad())
    }

    fn keys(events: &[KeyEvent]) -> Vec<(Key, KeyEventAction)> {
        events.iter().map(|e| (e.key, e.action)).collect()
    }

    #[test]
    fn test_press_and_release_left() {
        let mut normalizer = DpadMotionNormalizer::new();

        let down = normalizer.convert_motion_event(&sample(-1.0, 0.0));
        assert_eq!(keys(&down), vec![(Key::BTN_DPAD_LEFT, KeyEventAction::Down)]);
        assert_eq!(down[0].device, Some(pad()));

        let up = normalizer.convert_motion_event(&sample(0.0, 0.0));
        assert_eq!(keys(&up), vec![(Key::BTN_DPAD_LEFT, KeyEventAction::Up)]);
        assert_eq!(normalizer.active_devices(), 0);
    }

    #[test]
    fn test_repeated_sample_emits_nothing() {
        let mut normalizer = DpadMotionNormalizer::new();
        assert_eq!(normalizer.convert_motion_event(&sample(0.0, 1.0)).len(), 1);
        assert!(normalizer.convert_motion_event(&sample(0.0, 1.0)).is_empty());
        assert!(normalizer.convert_motion_event(&sample(0.0, 0.0)).len() == 1);
        assert!(normalizer.convert_motion_event(&sample(0.0, 0.0)).is_empty());
    }

    #[test]
    fn test_direct_flip_reports_both_edges() {
        let mut normalizer = DpadMotionNormalizer::new();
        normalizer.convert_motion_event(&sample(-1.0, 0.0));

        let flipped = normalizer.convert_motion_event(&sample(1.0, 0.0));
        assert_eq!(
            keys(&flipped),
            vec![
                (Key::BTN_DPAD_LEFT, KeyEventAction::Up),
                (Key::BTN_DPAD_RIGHT, KeyEventAction::Down),
            ]
        );
    }

    #[test]
    fn test_diagonal_order_is_horizontal_first() {
        let mut normalizer = DpadMotionNormalizer::new();
        let diagonal = normalizer.convert_motion_event(&sample(1.0, -1.0));
        assert_eq!(
            keys(&diagonal),
            vec![
                (Key::BTN_DPAD_RIGHT, KeyEventAction::Down),
                (Key::BTN_DPAD_UP, KeyEventAction::Down),
            ]
        );
    }

    #[test]
    fn test_devices_are_independent() {
        let mut normalizer = DpadMotionNormalizer::new();
        let other = InputDevice::external(5, "pad-2");

        normalizer.convert_motion_event(&sample(-1.0, 0.0));
        let moved = MotionEvent::new(-1.0, 0.0).with_device(other);
        let events = normalizer.convert_motion_event(&moved);
        assert_eq!(keys(&events), vec![(Key::BTN_DPAD_LEFT, KeyEventAction::Down)]);
        assert_eq!(normalizer.active_devices(), 2);
    }

    #[test]
    fn test_real_key_event_consumed_while_motion_held() {
        let mut normalizer = DpadMotionNormalizer::new();
        normalizer.convert_motion_event(&sample(-1.0, 0.0));

        assert!(normalizer.on_key_event(&KeyEvent::down(Key::BTN_DPAD_LEFT).with_device(pad())));
        assert!(!normalizer.on_key_event(&KeyEvent::down(Key::BTN_DPAD_RIGHT).with_device(pad())));
        assert!(!normalizer.on_key_event(&KeyEvent::down(Key::A).with_device(pad())));

        normalizer.convert_motion_event(&sample(0.0, 0.0));
        assert!(!normalizer.on_key_event(&KeyEvent::up(Key::BTN_DPAD_LEFT).with_device(pad())));
    }

    #[test]
    fn test_reset_and_remove_device() {
        let mut normalizer = DpadMotionNormalizer::new();
        normalizer.convert_motion_event(&sample(-1.0, 0.0));
        normalizer.remove_device("pad-1");
        assert_eq!(normalizer.active_devices(), 0);

        normalizer.convert_motion_event(&sample(0.0, 1.0));
        normalizer.reset();
        normalizer.reset();
        assert_eq!(normalizer.active_devices(), 0);

        let again = normalizer.convert_motion_event(&sample(0.0, 1.0));
        assert_eq!(keys(&again), vec![(Key::BTN_DPAD_DOWN, KeyEventAction::Down)]);
    }
}
