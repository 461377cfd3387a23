// Keymapper Event Handling
// Ordered event processing and scripted replay

pub mod replay;
pub mod worker;

pub use replay::{load_script, parse_script, run_script, ReplayError, ScriptStep, StepOutcome};
pub use worker::{CompiledKeyMaps, EventWorker, InputEvent, WorkerError};
