// Keymapper Perform Layer
// Runs the action lists of recognized key maps

pub mod executor;
pub mod parallel;
pub mod sequence;

pub use executor::{ActionExecutor, PerformError, PerformedAction, RecordingExecutor};
pub use parallel::ParallelTriggerActionPerformer;
pub use sequence::SequenceTriggerActionPerformer;

use crate::{ActionData, InputEventType};

/// Perform an action `times` times. Stops at the first failure, which is
/// logged, and reports whether every performance succeeded.
pub(crate) fn perform_times(
    executor: &dyn ActionExecutor,
    action: &ActionData,
    input: InputEventType,
    meta_state: u32,
    times: u32,
) -> bool {
    for _ in 0..times {
        if let Err(e) = executor.perform(action, input, meta_state) {
            log::warn!("Failed to perform {} ({}): {}", action, input, e);
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Key;

    #[tokio::test]
    async fn test_perform_times_stops_on_failure() {
        let executor = RecordingExecutor::new();
        let ok = ActionData::key(Key::A);
        let bad = ActionData::key(Key::B);
        executor.fail_on(bad.clone());

        assert!(perform_times(&executor, &ok, InputEventType::DownUp, 0, 3));
        assert_eq!(executor.count(&ok, InputEventType::DownUp), 3);
        assert!(!perform_times(&executor, &bad, InputEventType::DownUp, 0, 3));
    }
}
