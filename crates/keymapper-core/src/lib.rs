// Keymapper Core Library
// Trigger recognition and action execution for key maps

pub mod action;
pub mod config;
pub mod detection;
pub mod event;
pub mod input;
pub mod key;
pub mod mapping;
pub mod modifier;
pub mod perform;
pub mod settings;
pub mod trigger;

pub use action::{InputEventType, KeyEventAction};
pub use config::{Config, ConfigError};
pub use detection::{
    AlwaysEligible, CompileError, ConstraintGate, KeyMapController, SettingsConstraintGate,
};
pub use event::{EventWorker, InputEvent, ReplayError, WorkerError};
pub use input::{DpadMotionNormalizer, InputDevice, KeyEvent, MotionEvent};
pub use key::Key;
pub use mapping::{ActionData, ActionPolicy, KeyMap, KeyMapAction, RepeatMode};
pub use modifier::{Modifier, ModifierError};
pub use perform::{
    ActionExecutor, ParallelTriggerActionPerformer, PerformError, PerformedAction,
    RecordingExecutor, SequenceTriggerActionPerformer,
};
pub use settings::{Settings, SettingsError, TimingDefaults};
pub use trigger::{ClickType, Trigger, TriggerKey, TriggerKeyDevice, TriggerMode};
