// Keymapper Perform - Sequence Triggers
// Runs the actions of a sequence key map once per firing

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::{perform_times, ActionExecutor};
use crate::settings::TimingDefaults;
use crate::{InputEventType, KeyMapAction};

struct SequenceRun {
    task: JoinHandle<()>,
    /// Action currently held down by this run
    holding: Arc<Mutex<Option<usize>>>,
}

/// Performer for sequence triggers.
///
/// A sequence only fires once its last key is released, so there is no
/// release to wait for. Every action runs to completion in order; hold-down
/// actions are held for their hold-down duration. A new firing does not
/// cancel an earlier run still in progress.
pub struct SequenceTriggerActionPerformer {
    executor: Arc<dyn ActionExecutor>,
    actions: Arc<[KeyMapAction]>,
    timing: TimingDefaults,
    runs: Mutex<Vec<SequenceRun>>,
}

impl SequenceTriggerActionPerformer {
    pub fn new(
        actions: Vec<KeyMapAction>,
        timing: TimingDefaults,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            executor,
            actions: actions.into(),
            timing,
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn on_triggered(&self, meta_state: u32) {
        let holding = Arc::new(Mutex::new(None));
        let task = tokio::spawn(run_sequence(
            Arc::clone(&self.executor),
            Arc::clone(&self.actions),
            self.timing,
            meta_state,
            Arc::clone(&holding),
        ));

        let mut runs = self.runs.lock();
        runs.retain(|run| !run.task.is_finished());
        runs.push(SequenceRun { task, holding });
    }

    /// Abort every run and release whatever they hold down
    pub fn reset(&self) {
        let runs = std::mem::take(&mut *self.runs.lock());
        for run in runs {
            run.task.abort();
            let held = run.holding.lock().take();
            if let Some(action) = held.and_then(|index| self.actions.get(index)) {
                perform_times(
                    self.executor.as_ref(),
                    &action.data,
                    InputEventType::Up,
                    0,
                    action.policy.multiplier(),
                );
            }
        }
    }

    /// Runs that have not finished yet
    pub fn active_runs(&self) -> usize {
        self.runs
            .lock()
            .iter()
            .filter(|run| !run.task.is_finished())
            .count()
    }
}

impl Drop for SequenceTriggerActionPerformer {
    fn drop(&mut self) {
        for run in self.runs.get_mut().drain(..) {
            run.task.abort();
        }
    }
}

async fn run_sequence(
    executor: Arc<dyn ActionExecutor>,
    actions: Arc<[KeyMapAction]>,
    timing: TimingDefaults,
    meta_state: u32,
    holding: Arc<Mutex<Option<usize>>>,
) {
    let executor = executor.as_ref();

    for (index, action) in actions.iter().enumerate() {
        let policy = &action.policy;
        let times = policy.multiplier();

        if policy.hold_down {
            *holding.lock() = Some(index);
            if perform_times(executor, &action.data, InputEventType::Down, meta_state, times) {
                sleep(policy.hold_down_duration(&timing)).await;
                if holding.lock().take().is_some() {
                    perform_times(executor, &action.data, InputEventType::Up, meta_state, times);
                }
            } else {
                holding.lock().take();
            }
        } else {
            perform_times(executor, &action.data, InputEventType::DownUp, meta_state, times);
        }

        if !policy.delay_before_next_action.is_zero() {
            sleep(policy.delay_before_next_action).await;
        }
    }
}
