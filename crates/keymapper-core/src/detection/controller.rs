// Keymapper Detection - Key Map Controller
// Walks every compiled trigger with the incoming events and fires performers

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

use super::compiler::{compile_key_maps, CompiledKeyMap};
use super::constraint::ConstraintGate;
use super::tree::{NodeIndex, SideEffect, SideEffects};
use crate::perform::{
    ActionExecutor, ParallelTriggerActionPerformer, SequenceTriggerActionPerformer,
};
use crate::settings::TimingDefaults;
use crate::{
    DpadMotionNormalizer, InputEventType, Key, KeyEvent, KeyMap, Modifier, MotionEvent,
    TriggerMode,
};

enum Performer {
    Parallel(ParallelTriggerActionPerformer),
    Sequence(SequenceTriggerActionPerformer),
}

impl Performer {
    fn for_key_map(
        compiled: &CompiledKeyMap,
        timing: TimingDefaults,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        let actions = compiled.key_map.actions.clone();
        match compiled.mode {
            TriggerMode::Sequence => {
                Performer::Sequence(SequenceTriggerActionPerformer::new(actions, timing, executor))
            }
            TriggerMode::Parallel | TriggerMode::Undefined => {
                Performer::Parallel(ParallelTriggerActionPerformer::new(actions, timing, executor))
            }
        }
    }

    fn on_triggered(&self, released: bool, meta_state: u32) {
        match self {
            Performer::Parallel(p) => p.on_triggered(released, meta_state),
            Performer::Sequence(p) => p.on_triggered(meta_state),
        }
    }

    fn on_released(&self, meta_state: u32) {
        if let Performer::Parallel(p) = self {
            p.on_released(meta_state);
        }
    }

    fn reset(&self) {
        match self {
            Performer::Parallel(p) => p.reset(),
            Performer::Sequence(p) => p.reset(),
        }
    }
}

struct TriggerSlot {
    compiled: CompiledKeyMap,
    performer: Performer,
    cursor: NodeIndex,
    /// Identifies the visit to `cursor` a pending timeout was armed for
    generation: u64,
    timer: Option<JoinHandle<()>>,
    deadline: Option<Instant>,
    /// Event that last moved the cursor, re-emitted on imitation
    last_event: Option<KeyEvent>,
    /// Times the trigger was recognized
    fired: u64,
    /// Firing held back until an overlapping sequence is decided
    deferred: Option<(u64, JoinHandle<()>)>,
    /// Meta flags of the modifier actions the current firing holds down
    held_meta: u32,
}

impl TriggerSlot {
    fn new(compiled: CompiledKeyMap, performer: Performer) -> Self {
        Self {
            compiled,
            performer,
            cursor: NodeIndex::ROOT,
            generation: 0,
            timer: None,
            deadline: None,
            last_event: None,
            fired: 0,
            deferred: None,
            held_meta: 0,
        }
    }

    fn cancel_tasks(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some((_, task)) = self.deferred.take() {
            task.abort();
        }
    }
}

/// A key as seen by the controller: code and device descriptor
type HeldKey = (Key, Option<String>);

struct ControllerState {
    this: Weak<Mutex<ControllerState>>,
    timing: TimingDefaults,
    executor: Arc<dyn ActionExecutor>,
    gate: Arc<dyn ConstraintGate>,
    dpad: DpadMotionNormalizer,
    key_maps: Vec<KeyMap>,
    triggers: Vec<TriggerSlot>,
    /// Trigger indices, sequences first
    step_order: Vec<usize>,
    /// Downs that were consumed and whose up has not arrived yet
    held_consumed: Vec<HeldKey>,
    /// Unmapped keys re-emitted with the meta state of held modifier
    /// actions, waiting for their up
    imitating: Vec<HeldKey>,
    /// Imitations queued while handling one event
    imitations: Vec<(KeyEvent, InputEventType)>,
    next_generation: u64,
}

/// Recognizes key map triggers in a stream of input events.
///
/// Every compiled trigger keeps its own cursor into its event tree. Each
/// event is offered to all of them; a trigger whose current node accepts
/// the event moves on and runs the transition's side effects. Node
/// timeouts run as Tokio tasks, so the controller must be driven from
/// inside a Tokio runtime.
///
/// Triggers that share keys with a sequence wait on it: a short press
/// that may be the start of a sequence under way fires only once the
/// sequence times out, and a sequence contained in a longer one is not
/// matched while the longer one is under way.
///
/// Events are expected one at a time from a single producer. Clones share
/// the same state.
#[derive(Clone)]
pub struct KeyMapController {
    inner: Arc<Mutex<ControllerState>>,
}

impl KeyMapController {
    pub fn new(
        timing: TimingDefaults,
        executor: Arc<dyn ActionExecutor>,
        gate: Arc<dyn ConstraintGate>,
    ) -> Self {
        let inner = Arc::new_cyclic(|this| {
            Mutex::new(ControllerState {
                this: this.clone(),
                timing,
                executor,
                gate,
                dpad: DpadMotionNormalizer::new(),
                key_maps: Vec::new(),
                triggers: Vec::new(),
                step_order: Vec::new(),
                held_consumed: Vec::new(),
                imitating: Vec::new(),
                imitations: Vec::new(),
                next_generation: 0,
            })
        });
        Self { inner }
    }

    /// Feed a key event. Returns true if the event must not reach the
    /// rest of the system.
    pub fn on_key_event(&self, event: &KeyEvent) -> bool {
        let mut state = self.inner.lock();
        if state.dpad.on_key_event(event) {
            log::trace!("Suppressed {} while its dpad is driven by motion", event);
            return true;
        }
        state.process(event)
    }

    /// Feed a joystick hat sample. Direction changes are processed as key
    /// events; returns true if any of them was consumed.
    pub fn on_motion_event(&self, event: &MotionEvent) -> bool {
        let mut state = self.inner.lock();
        let key_events = state.dpad.convert_motion_event(event);
        let mut consumed = false;
        for key_event in &key_events {
            consumed |= state.process(key_event);
        }
        consumed
    }

    /// Forget a removed device and start recognition over
    pub fn on_device_disconnected(&self, descriptor: &str) {
        let mut state = self.inner.lock();
        log::info!("Input device {} disconnected, resetting triggers", descriptor);
        state.dpad.remove_device(descriptor);
        let on_device = |(_, device): &HeldKey| device.as_deref() == Some(descriptor);
        state.held_consumed.retain(|held| !on_device(held));
        state.imitating.retain(|held| !on_device(held));
        state.reset();
    }

    /// Cancel all timeouts and performer work and put every cursor back
    /// at its root
    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    /// Replace the key maps. Returns the ones that compiled and will be
    /// matched from now on.
    pub fn load_key_maps(&self, key_maps: &[KeyMap]) -> Vec<Arc<KeyMap>> {
        let mut state = self.inner.lock();
        state.key_maps = key_maps.to_vec();
        state.rebuild()
    }

    /// Change the timing defaults and recompile the loaded key maps
    pub fn set_timing(&self, timing: TimingDefaults) -> Vec<Arc<KeyMap>> {
        let mut state = self.inner.lock();
        state.timing = timing;
        state.rebuild()
    }

    pub fn compiled_key_maps(&self) -> Vec<Arc<KeyMap>> {
        self.inner.lock().compiled_key_maps()
    }

    /// Current node of the trigger of key map `uid`
    pub fn cursor_of(&self, uid: &str) -> Option<NodeIndex> {
        self.inner
            .lock()
            .triggers
            .iter()
            .find(|slot| slot.compiled.key_map.uid == uid)
            .map(|slot| slot.cursor)
    }
}

impl ControllerState {
    fn process(&mut self, event: &KeyEvent) -> bool {
        log::trace!("Key event {}", event);
        let held = (event.key, event.descriptor().map(str::to_string));

        if event.action.is_repeat() {
            return self.held_consumed.contains(&held);
        }

        let busy = self.sequences_under_way();
        let mut consumed = false;
        for position in 0..self.step_order.len() {
            let index = self.step_order[position];
            consumed |= self.step(index, event, &busy);
        }

        let held_meta = self.held_meta();
        let with_meta = event.clone().with_meta_state(event.meta_state | held_meta);
        if event.action.is_down() {
            if !consumed && held_meta != 0 && !Modifier::is_key_modifier(event.key) {
                log::debug!("Typing {} with the meta state of held actions", event);
                self.queue_imitation(with_meta, InputEventType::Down);
                self.imitating.push(held.clone());
                consumed = true;
            }
            if consumed && !self.held_consumed.contains(&held) {
                self.held_consumed.push(held);
            }
        } else {
            if let Some(position) = self.imitating.iter().position(|h| *h == held) {
                self.imitating.swap_remove(position);
                self.queue_imitation(with_meta, InputEventType::Up);
            }
            if let Some(position) = self.held_consumed.iter().position(|h| *h == held) {
                self.held_consumed.swap_remove(position);
                consumed = true;
            }
        }

        self.flush_imitations();
        consumed
    }

    /// Offer `event` to one trigger. Returns whether it consumed the event.
    fn step(&mut self, index: usize, event: &KeyEvent, busy: &[bool]) -> bool {
        let slot = &self.triggers[index];
        let yielding = slot
            .compiled
            .yields_to
            .iter()
            .any(|&other| busy.get(other).copied().unwrap_or(false));
        if yielding {
            if !slot.cursor.is_root() {
                self.enter_node(index, NodeIndex::ROOT);
            }
            return false;
        }

        let tree = &slot.compiled.tree;
        let mut abandoned = None;
        let mut transition = tree.find_transition(slot.cursor, event);
        if transition.is_none() && event.action.is_down() && !slot.cursor.is_root() {
            if let Some(node) = tree.node(slot.cursor).filter(|node| node.reset_on_mismatch) {
                log::trace!(
                    "{} breaks key map {} at {}, matching from the root",
                    event,
                    slot.compiled.key_map.uid,
                    slot.cursor
                );
                abandoned = Some(
                    node.timeout
                        .as_ref()
                        .filter(|timeout| timeout.next.is_none())
                        .map(|timeout| timeout.effects.clone())
                        .unwrap_or_default(),
                );
                transition = tree.find_transition(NodeIndex::ROOT, event);
            }
        }

        let Some(transition) = transition else {
            if let Some(effects) = abandoned {
                let source = self.triggers[index].last_event.clone();
                self.enter_node(index, NodeIndex::ROOT);
                self.apply_effects(index, &effects, source.as_ref());
            }
            return false;
        };

        let consume = transition.consume;
        let effects = transition.effects.clone();
        let next = transition.next.unwrap_or(NodeIndex::ROOT);

        if let Some(abandoned) = abandoned {
            let source = self.triggers[index].last_event.clone();
            self.apply_effects(index, &abandoned, source.as_ref());
        }
        self.triggers[index].last_event = Some(event.clone());
        self.enter_node(index, next);
        self.apply_effects(index, &effects, Some(event));
        consume
    }

    fn on_timeout(&mut self, index: usize, generation: u64) {
        let Some(slot) = self.triggers.get_mut(index) else {
            return;
        };
        if slot.generation != generation {
            return;
        }
        // The running timer task is this one
        slot.timer = None;

        let Some(timeout) = slot
            .compiled
            .tree
            .node(slot.cursor)
            .and_then(|node| node.timeout.as_ref())
        else {
            return;
        };
        let effects = timeout.effects.clone();
        let next = timeout.next.unwrap_or(NodeIndex::ROOT);
        let source = slot.last_event.clone();
        log::trace!(
            "Key map {} timed out at {}, moving to {}",
            slot.compiled.key_map.uid,
            slot.cursor,
            next
        );

        self.enter_node(index, next);
        self.apply_effects(index, &effects, source.as_ref());
        self.flush_imitations();
    }

    /// Move a cursor, cancelling the old node's timeout and arming the new one's
    fn enter_node(&mut self, index: usize, node: NodeIndex) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let this = self.this.clone();

        let slot = &mut self.triggers[index];
        if let Some(timer) = slot.timer.take() {
            timer.abort();
        }
        slot.cursor = node;
        slot.generation = generation;
        if node.is_root() {
            slot.last_event = None;
        }

        let (after, keeps_deadline) = match slot.compiled.tree.node(node) {
            Some(n) => (n.timeout.as_ref().map(|timeout| timeout.after), n.keeps_deadline),
            None => (None, false),
        };
        slot.deadline = match (after, slot.deadline) {
            (Some(_), Some(running)) if keeps_deadline => Some(running),
            (Some(after), _) => Some(Instant::now() + after),
            (None, _) => None,
        };
        if let Some(deadline) = slot.deadline {
            slot.timer = Some(tokio::spawn(async move {
                sleep_until(deadline).await;
                if let Some(inner) = this.upgrade() {
                    inner.lock().on_timeout(index, generation);
                }
            }));
        }
    }

    /// `source` is the event that caused the effects, or for timeouts the
    /// last event the trigger accepted
    fn apply_effects(&mut self, index: usize, effects: &SideEffects, source: Option<&KeyEvent>) {
        let meta_state = source.map_or(0, |e| e.meta_state) | self.held_meta();

        for effect in effects {
            match *effect {
                SideEffect::Trigger { released } => self.fire(index, released, meta_state),
                SideEffect::Release => {
                    let slot = &mut self.triggers[index];
                    slot.held_meta = 0;
                    slot.performer.on_released(meta_state);
                }
                SideEffect::Imitate(input) => {
                    if let Some(original) = source {
                        let event = original.clone().with_meta_state(meta_state);
                        self.queue_imitation(event, input);
                    }
                }
            }
        }
    }

    fn fire(&mut self, index: usize, released: bool, meta_state: u32) {
        let slot = &mut self.triggers[index];
        slot.fired += 1;
        let key_map = Arc::clone(&slot.compiled.key_map);

        if !self.gate.is_key_map_eligible(&key_map) {
            log::debug!("Key map {} recognized but its constraints do not hold", key_map.uid);
            return;
        }
        if let Some(sequence) = self.sequence_under_way(index) {
            self.defer(index, sequence, meta_state);
            return;
        }

        log::debug!("Firing key map {} ({})", key_map.uid, key_map.trigger);
        let slot = &mut self.triggers[index];
        if !released && slot.compiled.mode != TriggerMode::Sequence {
            slot.held_meta = held_modifier_meta(&key_map);
        }
        slot.performer.on_triggered(released, meta_state);
    }

    /// Overlapping sequence the firing of trigger `index` has to wait
    /// for. With several under way, the one with the longest timeout.
    fn sequence_under_way(&self, index: usize) -> Option<usize> {
        self.triggers[index]
            .compiled
            .deferred_by
            .iter()
            .copied()
            .filter(|&other| self.triggers.get(other).is_some_and(|s| !s.cursor.is_root()))
            .max_by_key(|&other| self.triggers[other].compiled.sequence_timeout)
    }

    fn sequences_under_way(&self) -> Vec<bool> {
        self.triggers
            .iter()
            .map(|slot| slot.compiled.mode == TriggerMode::Sequence && !slot.cursor.is_root())
            .collect()
    }

    /// Fire trigger `index` once the sequence times out, unless it
    /// completes first. A later deferral replaces a pending one.
    fn defer(&mut self, index: usize, sequence: usize, meta_state: u32) {
        self.next_generation += 1;
        let id = self.next_generation;
        let this = self.this.clone();
        let waited_on = &self.triggers[sequence];
        let after = waited_on.compiled.sequence_timeout;
        let seen = waited_on.fired;
        log::debug!(
            "Key map {} waits for sequence {}",
            self.triggers[index].compiled.key_map.uid,
            waited_on.compiled.key_map.uid
        );

        let task = tokio::spawn(async move {
            sleep(after).await;
            if let Some(inner) = this.upgrade() {
                inner.lock().on_deferred(index, sequence, seen, id, meta_state);
            }
        });
        if let Some((_, pending)) = self.triggers[index].deferred.replace((id, task)) {
            pending.abort();
        }
    }

    fn on_deferred(&mut self, index: usize, sequence: usize, seen: u64, id: u64, meta_state: u32) {
        let Some(slot) = self.triggers.get_mut(index) else {
            return;
        };
        if slot.deferred.as_ref().map(|(pending, _)| *pending) != Some(id) {
            return;
        }
        slot.deferred = None;

        let completed = self.triggers.get(sequence).map_or(true, |s| s.fired != seen);
        let slot = &self.triggers[index];
        if completed {
            log::debug!("Key map {} dropped, the sequence completed", slot.compiled.key_map.uid);
            return;
        }
        log::debug!("Firing key map {} after the sequence timed out", slot.compiled.key_map.uid);
        slot.performer.on_triggered(true, meta_state | self.held_meta());
    }

    /// Meta flags of every modifier action currently held down
    fn held_meta(&self) -> u32 {
        self.triggers.iter().fold(0, |meta, slot| meta | slot.held_meta)
    }

    /// Triggers giving up on the same press type it back only once
    fn queue_imitation(&mut self, event: KeyEvent, input: InputEventType) {
        let queued = self.imitations.iter().any(|(other, other_input)| {
            *other_input == input && other.key == event.key && other.device == event.device
        });
        if !queued {
            self.imitations.push((event, input));
        }
    }

    fn flush_imitations(&mut self) {
        for (event, input) in std::mem::take(&mut self.imitations) {
            log::debug!("Imitating {} as {}", event, input);
            if let Err(e) = self.executor.imitate(&event, input) {
                log::warn!("Failed to imitate {}: {}", event, e);
            }
        }
    }

    fn reset(&mut self) {
        for slot in self.triggers.iter_mut() {
            slot.cancel_tasks();
            self.next_generation += 1;
            slot.generation = self.next_generation;
            slot.cursor = NodeIndex::ROOT;
            slot.deadline = None;
            slot.last_event = None;
            slot.held_meta = 0;
            slot.performer.reset();
        }
        self.imitations.clear();
        self.dpad.reset();
    }

    fn rebuild(&mut self) -> Vec<Arc<KeyMap>> {
        self.reset();

        let compiled = compile_key_maps(&self.key_maps, &self.timing);
        self.triggers = compiled
            .into_iter()
            .map(|compiled| {
                let performer =
                    Performer::for_key_map(&compiled, self.timing, Arc::clone(&self.executor));
                TriggerSlot::new(compiled, performer)
            })
            .collect();

        let (sequences, others): (Vec<usize>, Vec<usize>) = (0..self.triggers.len())
            .partition(|&index| self.triggers[index].compiled.mode == TriggerMode::Sequence);
        self.step_order = sequences.into_iter().chain(others).collect();

        log::info!(
            "Loaded {} of {} key maps",
            self.triggers.len(),
            self.key_maps.len()
        );
        self.compiled_key_maps()
    }

    fn compiled_key_maps(&self) -> Vec<Arc<KeyMap>> {
        self.triggers
            .iter()
            .map(|slot| Arc::clone(&slot.compiled.key_map))
            .collect()
    }
}

impl Drop for ControllerState {
    fn drop(&mut self) {
        for slot in self.triggers.iter_mut() {
            slot.cancel_tasks();
        }
    }
}

/// Meta flags of the modifier keys a key map holds down while triggered
fn held_modifier_meta(key_map: &KeyMap) -> u32 {
    key_map
        .actions
        .iter()
        .filter(|action| action.policy.hold_down)
        .fold(0, |meta, action| meta | action.data.modifier_meta())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::AlwaysEligible;
    use crate::perform::RecordingExecutor;
    use crate::{
        ActionData, ClickType, InputDevice, InputEventType, KeyEventAction, KeyMapAction, Trigger,
        TriggerKey,
    };
    use std::time::Duration;
    use tokio::time::advance;

    fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn controller() -> (KeyMapController, Arc<RecordingExecutor>) {
        let executor = Arc::new(RecordingExecutor::new());
        let controller = KeyMapController::new(
            TimingDefaults::default(),
            executor.clone(),
            Arc::new(AlwaysEligible),
        );
        (controller, executor)
    }

    fn single(uid: &str, key: Key, click_type: ClickType, action: Key) -> KeyMap {
        KeyMap::new(
            uid,
            Trigger::single(TriggerKey::new(key, click_type)),
            vec![KeyMapAction::new(ActionData::key(action))],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_press_fires_once_and_consumes() {
        let (controller, executor) = controller();
        controller.load_key_maps(&[single("a", Key::A, ClickType::ShortPress, Key::B)]);

        assert!(controller.on_key_event(&KeyEvent::down(Key::A)));
        settle().await;
        assert!(controller.on_key_event(&KeyEvent::new(Key::A, KeyEventAction::Repeat)));
        assert!(controller.on_key_event(&KeyEvent::up(Key::A)));
        settle().await;

        assert_eq!(executor.count(&ActionData::key(Key::B), InputEventType::DownUp), 1);
        assert!(!controller.on_key_event(&KeyEvent::down(Key::C)));
        assert_eq!(controller.cursor_of("a"), Some(NodeIndex::ROOT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_press_fires_after_delay() {
        let (controller, executor) = controller();
        controller.load_key_maps(&[single("long", Key::A, ClickType::LongPress, Key::B)]);
        let b = ActionData::key(Key::B);

        controller.on_key_event(&KeyEvent::down(Key::A));
        advance(ms(499)).await;
        settle().await;
        assert_eq!(executor.count(&b, InputEventType::DownUp), 0);

        advance(ms(1)).await;
        settle().await;
        assert_eq!(executor.count(&b, InputEventType::DownUp), 1);

        assert!(controller.on_key_event(&KeyEvent::up(Key::A)));
        settle().await;
        assert!(executor.imitated().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_early_release_imitates_original_key() {
        let (controller, executor) = controller();
        controller.load_key_maps(&[single("long", Key::A, ClickType::LongPress, Key::B)]);

        controller.on_key_event(&KeyEvent::down(Key::A));
        advance(ms(300)).await;
        settle().await;
        assert!(controller.on_key_event(&KeyEvent::up(Key::A)));

        advance(ms(1000)).await;
        settle().await;
        let imitated = executor.imitated();
        assert_eq!(imitated.len(), 1);
        assert_eq!(imitated[0].action, ActionData::key(Key::A));
        assert_eq!(imitated[0].input, InputEventType::DownUp);
        assert_eq!(executor.count(&ActionData::key(Key::B), InputEventType::DownUp), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_press_and_failed_double_press() {
        let (controller, executor) = controller();
        controller.load_key_maps(&[single("double", Key::A, ClickType::DoublePress, Key::B)]);
        let b = ActionData::key(Key::B);

        for event in [KeyEvent::down(Key::A), KeyEvent::up(Key::A)] {
            controller.on_key_event(&event);
        }
        advance(ms(100)).await;
        controller.on_key_event(&KeyEvent::down(Key::A));
        settle().await;
        controller.on_key_event(&KeyEvent::up(Key::A));
        settle().await;
        assert_eq!(executor.count(&b, InputEventType::DownUp), 1);

        controller.on_key_event(&KeyEvent::down(Key::A));
        controller.on_key_event(&KeyEvent::up(Key::A));
        advance(ms(300)).await;
        settle().await;
        assert_eq!(executor.count(&b, InputEventType::DownUp), 1);
        assert_eq!(executor.imitated().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_within_and_past_timeout() {
        let (controller, executor) = controller();
        let trigger = Trigger::new(
            vec![
                TriggerKey::new(Key::A, ClickType::ShortPress),
                TriggerKey::new(Key::B, ClickType::ShortPress),
            ],
            TriggerMode::Sequence,
        );
        let action = ActionData::key(Key::X);
        let actions = vec![KeyMapAction::new(action.clone())];
        controller.load_key_maps(&[KeyMap::new("ab", trigger, actions)]);

        let tap = |key: Key| {
            controller.on_key_event(&KeyEvent::down(key));
            controller.on_key_event(&KeyEvent::up(key));
        };

        tap(Key::A);
        advance(ms(900)).await;
        tap(Key::B);
        settle().await;
        assert_eq!(executor.count(&action, InputEventType::DownUp), 1);

        tap(Key::A);
        advance(ms(1200)).await;
        settle().await;
        tap(Key::B);
        settle().await;
        assert_eq!(executor.count(&action, InputEventType::DownUp), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_restarts_on_unrelated_key() {
        let (controller, executor) = controller();
        let trigger = Trigger::new(
            vec![
                TriggerKey::new(Key::A, ClickType::ShortPress),
                TriggerKey::new(Key::B, ClickType::ShortPress),
            ],
            TriggerMode::Sequence,
        );
        let action = ActionData::key(Key::X);
        let actions = vec![KeyMapAction::new(action.clone())];
        controller.load_key_maps(&[KeyMap::new("ab", trigger, actions)]);

        for event in [
            KeyEvent::down(Key::A),
            KeyEvent::up(Key::A),
            KeyEvent::down(Key::C),
            KeyEvent::up(Key::C),
            KeyEvent::down(Key::B),
            KeyEvent::up(Key::B),
        ] {
            controller.on_key_event(&event);
        }
        settle().await;
        assert_eq!(executor.count(&action, InputEventType::DownUp), 0);

        // The breaking key-down can itself start the sequence again
        for event in [
            KeyEvent::down(Key::A),
            KeyEvent::up(Key::A),
            KeyEvent::down(Key::A),
            KeyEvent::up(Key::A),
            KeyEvent::down(Key::B),
            KeyEvent::up(Key::B),
        ] {
            controller.on_key_event(&event);
        }
        settle().await;
        assert_eq!(executor.count(&action, InputEventType::DownUp), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_constraint_gate_blocks_firing() {
        let executor = Arc::new(RecordingExecutor::new());
        let gate = |key_map: &KeyMap| key_map.uid != "blocked";
        let controller =
            KeyMapController::new(TimingDefaults::default(), executor.clone(), Arc::new(gate));
        controller.load_key_maps(&[
            single("blocked", Key::A, ClickType::ShortPress, Key::B),
            single("open", Key::A, ClickType::ShortPress, Key::C),
        ]);

        assert!(controller.on_key_event(&KeyEvent::down(Key::A)));
        controller.on_key_event(&KeyEvent::up(Key::A));
        settle().await;

        assert_eq!(executor.count(&ActionData::key(Key::B), InputEventType::DownUp), 0);
        assert_eq!(executor.count(&ActionData::key(Key::C), InputEventType::DownUp), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_motion_dpad_fires_and_suppresses_real_dpad() {
        let (controller, executor) = controller();
        controller.load_key_maps(&[single(
            "left",
            Key::BTN_DPAD_LEFT,
            ClickType::ShortPress,
            Key::B,
        )]);
        let pad = InputDevice::external(3, "pad");

        assert!(controller.on_motion_event(&MotionEvent::new(-1.0, 0.0).with_device(pad.clone())));
        settle().await;
        assert_eq!(executor.count(&ActionData::key(Key::B), InputEventType::DownUp), 1);

        // Same sample again changes nothing
        assert!(!controller.on_motion_event(&MotionEvent::new(-1.0, 0.0).with_device(pad.clone())));
        let real_left = KeyEvent::down(Key::BTN_DPAD_LEFT).with_device(pad.clone());
        assert!(controller.on_key_event(&real_left));
        let real_up = KeyEvent::down(Key::BTN_DPAD_UP).with_device(pad.clone());
        assert!(!controller.on_key_event(&real_up));

        assert!(controller.on_motion_event(&MotionEvent::new(0.0, 0.0).with_device(pad)));
        settle().await;
        assert_eq!(executor.count(&ActionData::key(Key::B), InputEventType::DownUp), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_is_idempotent_and_stops_timeouts() {
        let (controller, executor) = controller();
        controller.reset();
        controller.load_key_maps(&[single("long", Key::A, ClickType::LongPress, Key::B)]);

        controller.on_key_event(&KeyEvent::down(Key::A));
        controller.reset();
        controller.reset();
        assert_eq!(controller.cursor_of("long"), Some(NodeIndex::ROOT));

        advance(ms(1000)).await;
        settle().await;
        assert!(executor.performed().is_empty());

        // The up of the consumed down is still swallowed
        assert!(controller.on_key_event(&KeyEvent::up(Key::A)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_replaces_key_maps() {
        let (controller, executor) = controller();
        let loaded = controller.load_key_maps(&[
            single("a", Key::A, ClickType::ShortPress, Key::B),
            single("off", Key::C, ClickType::ShortPress, Key::B).disabled(),
        ]);
        assert_eq!(loaded.len(), 1);

        controller.load_key_maps(&[single("c", Key::C, ClickType::ShortPress, Key::D)]);
        assert_eq!(controller.cursor_of("a"), None);
        assert!(!controller.on_key_event(&KeyEvent::down(Key::A)));
        assert!(controller.on_key_event(&KeyEvent::down(Key::C)));
        settle().await;
        assert_eq!(executor.count(&ActionData::key(Key::D), InputEventType::DownUp), 1);
        assert_eq!(executor.count(&ActionData::key(Key::B), InputEventType::DownUp), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_specific_trigger() {
        let (controller, executor) = controller();
        let trigger = Trigger::single(
            TriggerKey::new(Key::BTN_A, ClickType::ShortPress)
                .with_device(crate::TriggerKeyDevice::External("pad".to_string())),
        );
        controller.load_key_maps(&[KeyMap::new(
            "pad-a",
            trigger,
            vec![KeyMapAction::new(ActionData::key(Key::ENTER))],
        )]);
        let enter = ActionData::key(Key::ENTER);

        assert!(!controller.on_key_event(&KeyEvent::down(Key::BTN_A)));
        controller.on_key_event(&KeyEvent::up(Key::BTN_A));
        settle().await;
        assert_eq!(executor.count(&enter, InputEventType::DownUp), 0);

        let pad = InputDevice::external(4, "pad");
        assert!(controller.on_key_event(&KeyEvent::down(Key::BTN_A).with_device(pad.clone())));
        settle().await;
        assert_eq!(executor.count(&enter, InputEventType::DownUp), 1);

        controller.on_device_disconnected("pad");
        assert!(!controller.on_key_event(&KeyEvent::up(Key::BTN_A).with_device(pad)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_press_abandoned_by_several_triggers_is_typed_back_once() {
        let (controller, executor) = controller();
        let chord = |uid: &str, other: Key| {
            KeyMap::new(
                uid,
                Trigger::new(
                    vec![
                        TriggerKey::new(Key::A, ClickType::ShortPress),
                        TriggerKey::new(other, ClickType::ShortPress),
                    ],
                    TriggerMode::Parallel,
                ),
                vec![KeyMapAction::new(ActionData::key(Key::X))],
            )
        };
        controller.load_key_maps(&[chord("ab", Key::B), chord("ac", Key::C)]);

        assert!(controller.on_key_event(&KeyEvent::down(Key::A)));
        advance(ms(50)).await;
        assert!(controller.on_key_event(&KeyEvent::up(Key::A)));
        settle().await;

        let imitated = executor.imitated();
        assert_eq!(imitated.len(), 1);
        assert_eq!(imitated[0].action, ActionData::key(Key::A));
        assert_eq!(imitated[0].input, InputEventType::DownUp);
        assert_eq!(controller.cursor_of("ab"), Some(NodeIndex::ROOT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_sequence_types_back_its_first_key() {
        let (controller, executor) = controller();
        let trigger = Trigger::new(
            vec![
                TriggerKey::new(Key::A, ClickType::ShortPress),
                TriggerKey::new(Key::B, ClickType::ShortPress),
            ],
            TriggerMode::Sequence,
        );
        let actions = vec![KeyMapAction::new(ActionData::key(Key::X))];
        controller.load_key_maps(&[KeyMap::new("ab", trigger, actions)]);

        assert!(controller.on_key_event(&KeyEvent::down(Key::A)));
        assert!(controller.on_key_event(&KeyEvent::up(Key::A)));
        assert!(!controller.on_key_event(&KeyEvent::down(Key::C)));
        settle().await;

        let imitated = executor.imitated();
        assert_eq!(imitated.len(), 1);
        assert_eq!(imitated[0].action, ActionData::key(Key::A));
        assert_eq!(controller.cursor_of("ab"), Some(NodeIndex::ROOT));

        // Past the timeout nothing more is owed
        advance(ms(2000)).await;
        settle().await;
        assert_eq!(executor.imitated().len(), 1);
    }
}
