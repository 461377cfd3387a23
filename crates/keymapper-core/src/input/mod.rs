// Keymapper Input Layer
// Input devices, raw events and directional-pad normalization

mod device;
pub mod dpad;
mod event;

pub use device::InputDevice;
pub use dpad::DpadMotionNormalizer;
pub use event::{KeyEvent, MotionEvent};
