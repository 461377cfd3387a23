// Keymapper Perform - Parallel Triggers
// Action execution for single-key and parallel key maps: hold-down,
// repeat-until-release and multiplier handling with full cancellation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::{perform_times, ActionExecutor};
use crate::settings::TimingDefaults;
use crate::{InputEventType, KeyMapAction, RepeatMode};

const RELEASE_CHANNEL_CAPACITY: usize = 16;

/// What the first pass sends for one action, decided when the trigger fires
enum FirstPass {
    Send(InputEventType),
    /// Down now, Up when the trigger is released
    HoldUntilRelease(oneshot::Sender<()>),
    /// Down, wait the hold-down duration, Up
    Tap,
}

struct Shared {
    executor: Arc<dyn ActionExecutor>,
    actions: Arc<[KeyMapAction]>,
    timing: TimingDefaults,
}

impl Shared {
    fn send_up(&self, index: usize, meta_state: u32) {
        if let Some(action) = self.actions.get(index) {
            perform_times(
                self.executor.as_ref(),
                &action.data,
                InputEventType::Up,
                meta_state,
                action.policy.multiplier(),
            );
        }
    }
}

struct RepeatLoop {
    task: JoinHandle<()>,
    release_waiter: Option<JoinHandle<()>>,
    /// Set between a repeat's Down and its Up
    mid_hold: Arc<AtomicBool>,
}

impl RepeatLoop {
    fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the loop. Returns true if it was holding its action down.
    fn cancel(self) -> bool {
        self.task.abort();
        if let Some(waiter) = self.release_waiter {
            waiter.abort();
        }
        self.mid_hold.swap(false, Ordering::SeqCst)
    }
}

struct PerformerState {
    held_down: Vec<bool>,
    repeats: Vec<Option<RepeatLoop>>,
    first_pass: Option<JoinHandle<()>>,
    hold_waiters: Vec<JoinHandle<()>>,
}

/// Runs the actions of a key map whose trigger keys are held together.
///
/// Every firing runs a first pass over the action list in order. Repeating
/// actions get their own loop next to it, and hold-down actions wait for
/// the next trigger release before sending their Up. Releases are fanned
/// out to every waiter through a broadcast channel.
pub struct ParallelTriggerActionPerformer {
    shared: Arc<Shared>,
    state: Arc<Mutex<PerformerState>>,
    /// Index of the action the first pass is tapping, if any
    tapping: Arc<Mutex<Option<usize>>>,
    released: broadcast::Sender<u32>,
}

impl ParallelTriggerActionPerformer {
    pub fn new(
        actions: Vec<KeyMapAction>,
        timing: TimingDefaults,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        let count = actions.len();
        let (released, _) = broadcast::channel(RELEASE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                executor,
                actions: actions.into(),
                timing,
            }),
            state: Arc::new(Mutex::new(PerformerState {
                held_down: vec![false; count],
                repeats: (0..count).map(|_| None).collect(),
                first_pass: None,
                hold_waiters: Vec::new(),
            })),
            tapping: Arc::new(Mutex::new(None)),
            released,
        }
    }

    /// Start a firing. `released_on_entry` is true when the trigger was
    /// already released by the time it was recognized.
    pub fn on_triggered(&self, released_on_entry: bool, meta_state: u32) {
        let mut state = self.state.lock();

        if let Some(job) = state.first_pass.take() {
            job.abort();
            if let Some(index) = self.tapping.lock().take() {
                self.shared.send_up(index, meta_state);
            }
        }
        state.hold_waiters.retain(|waiter| !waiter.is_finished());

        let mut plan = Vec::with_capacity(self.shared.actions.len());
        for (index, action) in self.shared.actions.iter().enumerate() {
            let policy = &action.policy;
            let step = if policy.toggles_hold_down() {
                let now_held = !state.held_down[index];
                state.held_down[index] = now_held;
                if now_held {
                    FirstPass::Send(InputEventType::Down)
                } else {
                    FirstPass::Send(InputEventType::Up)
                }
            } else if policy.hold_down && !released_on_entry {
                state.held_down[index] = true;
                let (down_sent, down_seen) = oneshot::channel();
                let waiter = self.spawn_hold_waiter(index, down_seen);
                state.hold_waiters.push(waiter);
                FirstPass::HoldUntilRelease(down_sent)
            } else if policy.hold_down {
                FirstPass::Tap
            } else {
                FirstPass::Send(InputEventType::DownUp)
            };
            plan.push(step);
        }

        state.first_pass = Some(tokio::spawn(run_first_pass(
            Arc::clone(&self.shared),
            plan,
            meta_state,
            Arc::clone(&self.tapping),
        )));

        for (index, action) in self.shared.actions.iter().enumerate() {
            let policy = &action.policy;
            if !policy.repeat {
                continue;
            }

            let was_repeating = match state.repeats[index].take() {
                Some(repeat) => {
                    let running = repeat.is_running();
                    if repeat.cancel() {
                        self.shared.send_up(index, meta_state);
                    }
                    running
                }
                None => false,
            };

            if released_on_entry && policy.repeat_mode == RepeatMode::TriggerReleased {
                continue;
            }
            if policy.repeat_mode == RepeatMode::TriggerPressedAgain && was_repeating {
                log::debug!("Stopped repeating {} on trigger pressed again", action.data);
                continue;
            }
            if action.data.is_modifier_key() {
                continue;
            }

            state.repeats[index] = Some(self.spawn_repeat(index, meta_state));
        }
    }

    /// Signal that the trigger was released
    pub fn on_released(&self, meta_state: u32) {
        if self.released.send(meta_state).is_err() {
            log::trace!("Trigger released with nothing waiting");
        }
    }

    /// Cancel everything in flight and release any action still held down
    pub fn reset(&self) {
        let mut owed_up = Vec::new();
        {
            let mut state = self.state.lock();
            if let Some(job) = state.first_pass.take() {
                job.abort();
            }
            for waiter in state.hold_waiters.drain(..) {
                waiter.abort();
            }
            for (index, slot) in state.repeats.iter_mut().enumerate() {
                if let Some(repeat) = slot.take() {
                    if repeat.cancel() {
                        owed_up.push(index);
                    }
                }
            }
            for (index, held) in state.held_down.iter_mut().enumerate() {
                if std::mem::take(held) {
                    owed_up.push(index);
                }
            }
            if let Some(index) = self.tapping.lock().take() {
                owed_up.push(index);
            }
        }

        owed_up.sort_unstable();
        owed_up.dedup();
        for index in owed_up {
            self.shared.send_up(index, 0);
        }
    }

    pub fn is_held_down(&self, index: usize) -> bool {
        self.state.lock().held_down.get(index).copied().unwrap_or(false)
    }

    pub fn is_repeating(&self, index: usize) -> bool {
        self.state
            .lock()
            .repeats
            .get(index)
            .and_then(Option::as_ref)
            .is_some_and(RepeatLoop::is_running)
    }

    fn spawn_hold_waiter(&self, index: usize, down_seen: oneshot::Receiver<()>) -> JoinHandle<()> {
        let mut released = self.released.subscribe();
        let shared = Arc::clone(&self.shared);
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let meta_state = match released.recv().await {
                Ok(meta_state) => meta_state,
                Err(RecvError::Lagged(_)) => 0,
                Err(RecvError::Closed) => return,
            };
            let down_sent = down_seen.await.is_ok();
            let owes_up = std::mem::replace(&mut state.lock().held_down[index], false);
            if owes_up && down_sent {
                shared.send_up(index, meta_state);
            }
        })
    }

    fn spawn_repeat(&self, index: usize, meta_state: u32) -> RepeatLoop {
        let keep_going = Arc::new(AtomicBool::new(true));
        let mid_hold = Arc::new(AtomicBool::new(false));

        let stops_on_release =
            self.shared.actions[index].policy.repeat_mode == RepeatMode::TriggerReleased;
        let release_waiter = stops_on_release.then(|| {
            let mut released = self.released.subscribe();
            let keep_going = Arc::clone(&keep_going);
            tokio::spawn(async move {
                // Lagged or closed ends the loop too
                let _ = released.recv().await;
                keep_going.store(false, Ordering::SeqCst);
            })
        });

        let task = tokio::spawn(repeat_loop(
            Arc::clone(&self.shared),
            index,
            meta_state,
            keep_going,
            Arc::clone(&mid_hold),
        ));

        RepeatLoop {
            task,
            release_waiter,
            mid_hold,
        }
    }
}

impl Drop for ParallelTriggerActionPerformer {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(job) = state.first_pass.take() {
            job.abort();
        }
        for waiter in state.hold_waiters.drain(..) {
            waiter.abort();
        }
        for repeat in state.repeats.iter_mut().filter_map(Option::take) {
            repeat.cancel();
        }
    }
}

async fn run_first_pass(
    shared: Arc<Shared>,
    plan: Vec<FirstPass>,
    meta_state: u32,
    tapping: Arc<Mutex<Option<usize>>>,
) {
    let executor = shared.executor.as_ref();

    for (index, (action, step)) in shared.actions.iter().zip(plan).enumerate() {
        let policy = &action.policy;
        let times = policy.multiplier();
        let hold_down_duration = policy.hold_down_duration(&shared.timing);

        match step {
            FirstPass::Send(input) => {
                perform_times(executor, &action.data, input, meta_state, times);
            }
            FirstPass::HoldUntilRelease(down_sent) => {
                if perform_times(executor, &action.data, InputEventType::Down, meta_state, times) {
                    let _ = down_sent.send(());
                }
            }
            FirstPass::Tap => {
                *tapping.lock() = Some(index);
                if perform_times(executor, &action.data, InputEventType::Down, meta_state, times) {
                    sleep(hold_down_duration).await;
                    if tapping.lock().take().is_some() {
                        let up = InputEventType::Up;
                        perform_times(executor, &action.data, up, meta_state, times);
                    }
                } else {
                    tapping.lock().take();
                }
            }
        }

        if policy.repeat && policy.hold_down {
            sleep(hold_down_duration).await;
        }
        if !policy.delay_before_next_action.is_zero() {
            sleep(policy.delay_before_next_action).await;
        }
    }
}

async fn repeat_loop(
    shared: Arc<Shared>,
    index: usize,
    meta_state: u32,
    keep_going: Arc<AtomicBool>,
    mid_hold: Arc<AtomicBool>,
) {
    let Some(action) = shared.actions.get(index) else {
        return;
    };
    let policy = &action.policy;
    let executor = shared.executor.as_ref();
    let times = policy.multiplier();

    sleep(policy.repeat_delay(&shared.timing)).await;

    let mut count = 0u32;
    while keep_going.load(Ordering::SeqCst) {
        let ok = if policy.hold_down {
            mid_hold.store(true, Ordering::SeqCst);
            if perform_times(executor, &action.data, InputEventType::Down, meta_state, times) {
                sleep(policy.hold_down_duration(&shared.timing)).await;
                !mid_hold.swap(false, Ordering::SeqCst)
                    || perform_times(executor, &action.data, InputEventType::Up, meta_state, times)
            } else {
                mid_hold.store(false, Ordering::SeqCst);
                false
            }
        } else {
            perform_times(executor, &action.data, InputEventType::DownUp, meta_state, times)
        };

        if !ok {
            log::debug!("Abandoning repeats of {}", action.data);
            break;
        }

        count += 1;
        if policy.repeat_limit.is_some_and(|limit| count >= limit) {
            break;
        }

        sleep(policy.repeat_rate(&shared.timing)).await;
    }
}
