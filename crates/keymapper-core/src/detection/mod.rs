// Keymapper Detection Layer
// Trigger compilation and recognition

pub mod compiler;
pub mod constraint;
pub mod controller;
pub mod tree;

pub use compiler::{
    compile_key_maps, CompileError, CompiledKeyMap, TriggerCompiler, MAX_PARALLEL_KEYS,
};
pub use constraint::{AlwaysEligible, ConstraintGate, SettingsConstraintGate};
pub use controller::KeyMapController;
pub use tree::{EventTree, NodeIndex, SideEffect};
