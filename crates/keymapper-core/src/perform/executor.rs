// Keymapper Perform - Action Executor
// The seam to whatever actually injects input or runs named actions

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{ActionData, InputEventType, KeyEvent};

/// Errors reported by an action executor
#[derive(Debug, thiserror::Error)]
pub enum PerformError {
    #[error("Action rejected: {0}")]
    Rejected(String),

    #[error("Unsupported action: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Performs actions on behalf of the action performers.
///
/// Calls are expected to return quickly; the performers keep their own
/// timing and never wait on the executor beyond the call itself.
pub trait ActionExecutor: Send + Sync {
    fn perform(
        &self,
        action: &ActionData,
        input: InputEventType,
        meta_state: u32,
    ) -> Result<(), PerformError>;

    /// Re-emit an input event that was swallowed while a trigger was
    /// still undecided
    fn imitate(&self, event: &KeyEvent, input: InputEventType) -> Result<(), PerformError> {
        self.perform(&ActionData::key(event.key), input, event.meta_state)
    }
}

/// One call recorded by [`RecordingExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerformedAction {
    pub at: Instant,
    pub action: ActionData,
    pub input: InputEventType,
    pub meta_state: u32,
    /// Came from `imitate` rather than `perform`
    pub imitated: bool,
}

/// Executor that only records what it was asked to do.
///
/// Used by the replay command to report performed actions, and by tests.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    performed: Mutex<Vec<PerformedAction>>,
    failing: Mutex<Vec<ActionData>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `perform` of `action` fail
    pub fn fail_on(&self, action: ActionData) {
        self.failing.lock().push(action);
    }

    pub fn performed(&self) -> Vec<PerformedAction> {
        self.performed.lock().clone()
    }

    /// Number of performances of `action` with the given input type
    pub fn count(&self, action: &ActionData, input: InputEventType) -> usize {
        self.performed
            .lock()
            .iter()
            .filter(|p| !p.imitated && p.action == *action && p.input == input)
            .count()
    }

    pub fn imitated(&self) -> Vec<PerformedAction> {
        self.performed
            .lock()
            .iter()
            .filter(|p| p.imitated)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.performed.lock().clear();
    }

    fn record(&self, action: &ActionData, input: InputEventType, meta_state: u32, imitated: bool) {
        self.performed.lock().push(PerformedAction {
            at: Instant::now(),
            action: action.clone(),
            input,
            meta_state,
            imitated,
        });
    }
}

impl ActionExecutor for RecordingExecutor {
    fn perform(
        &self,
        action: &ActionData,
        input: InputEventType,
        meta_state: u32,
    ) -> Result<(), PerformError> {
        if self.failing.lock().contains(action) {
            return Err(PerformError::Rejected(action.to_string()));
        }
        self.record(action, input, meta_state, false);
        Ok(())
    }

    fn imitate(&self, event: &KeyEvent, input: InputEventType) -> Result<(), PerformError> {
        self.record(&ActionData::key(event.key), input, event.meta_state, true);
        Ok(())
    }
}
