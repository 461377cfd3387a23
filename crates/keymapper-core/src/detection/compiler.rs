// Keymapper Detection - Trigger Compiler
// Builds one event tree per key map, with click-type timing baked in

use std::sync::Arc;
use std::time::Duration;

use smallvec::smallvec;

use super::tree::{
    EventTree, KeyDirection, KeyMatcher, NodeIndex, NodeTimeout, SideEffect, SideEffects,
    Transition,
};
use crate::settings::TimingDefaults;
use crate::{ClickType, InputEventType, Key, KeyMap, Trigger, TriggerKey, TriggerMode};

/// Parallel triggers get one node per subset of held keys
pub const MAX_PARALLEL_KEYS: usize = 8;

/// Reasons a trigger cannot be compiled
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Trigger has no keys")]
    EmptyTrigger,

    #[error("Key {0} appears in the sequence with different click types")]
    InconsistentClickType(Key),

    #[error("Key {0} appears twice in a parallel trigger")]
    DuplicateParallelKey(Key),

    #[error("Double press is not supported in parallel triggers")]
    DoublePressInParallel,

    #[error("Parallel trigger has {0} keys, at most 8 are supported")]
    TooManyParallelKeys(usize),
}

/// A key map together with its compiled event tree.
#[derive(Debug, Clone)]
pub struct CompiledKeyMap {
    pub key_map: Arc<KeyMap>,
    pub mode: TriggerMode,
    pub tree: EventTree,
    pub sequence_timeout: Duration,
    /// Sequences (indices into the compiled list) that contain this
    /// trigger's keys. While one of them is under way a short press
    /// firing waits for it to complete or time out.
    pub deferred_by: Vec<usize>,
    /// Longer sequences containing this one after their first key. This
    /// trigger is not matched while one of them is under way.
    pub yields_to: Vec<usize>,
}

/// Single-key click types configured elsewhere for the same key. A short
/// press on such a key has to wait until the other interpretation has
/// been ruled out.
#[derive(Debug, Default)]
struct ClickConflicts {
    short: Vec<TriggerKey>,
    long: Vec<(TriggerKey, Duration)>,
    double: Vec<(TriggerKey, Duration)>,
    /// Every key of every active key map, with the map's uid
    owners: Vec<(TriggerKey, String)>,
}

impl ClickConflicts {
    fn collect(key_maps: &[KeyMap], timing: &TimingDefaults) -> Self {
        let mut conflicts = Self::default();

        for map in key_maps.iter().filter(|m| m.is_active()) {
            let trigger = &map.trigger;
            for key in &trigger.keys {
                conflicts.owners.push((key.clone(), map.uid.clone()));
            }
            if trigger.effective_mode() != TriggerMode::Undefined {
                continue;
            }
            let Some(key) = trigger.keys.first() else {
                continue;
            };
            match key.click_type {
                ClickType::ShortPress => conflicts.short.push(key.clone()),
                ClickType::LongPress => conflicts.long.push((
                    key.clone(),
                    trigger.long_press_delay.unwrap_or(timing.long_press_delay),
                )),
                ClickType::DoublePress => conflicts.double.push((
                    key.clone(),
                    trigger.double_press_delay.unwrap_or(timing.double_press_delay),
                )),
            }
        }

        conflicts
    }

    fn long_delay(&self, key: &TriggerKey) -> Option<Duration> {
        shortest(&self.long, key)
    }

    fn double_delay(&self, key: &TriggerKey) -> Option<Duration> {
        shortest(&self.double, key)
    }

    fn has_short(&self, key: &TriggerKey) -> bool {
        self.short.iter().any(|short| short.same_physical_key(key))
    }

    /// Some key map other than `uid` listens to the key
    fn shared(&self, key: &TriggerKey, uid: &str) -> bool {
        self.owners
            .iter()
            .any(|(other, owner)| owner != uid && other.same_physical_key(key))
    }
}

fn shortest(entries: &[(TriggerKey, Duration)], key: &TriggerKey) -> Option<Duration> {
    entries
        .iter()
        .filter(|(k, _)| k.same_physical_key(key))
        .map(|(_, delay)| *delay)
        .min()
}

/// Compiles triggers against one set of key maps and timing defaults.
pub struct TriggerCompiler {
    timing: TimingDefaults,
    conflicts: ClickConflicts,
}

impl TriggerCompiler {
    pub fn new(timing: TimingDefaults, key_maps: &[KeyMap]) -> Self {
        let conflicts = ClickConflicts::collect(key_maps, &timing);
        Self { timing, conflicts }
    }

    /// Build the event tree for one key map's trigger
    pub fn compile(&self, key_map: &KeyMap) -> Result<EventTree, CompileError> {
        let trigger = &key_map.trigger;
        if trigger.keys.is_empty() {
            return Err(CompileError::EmptyTrigger);
        }

        let mut tree = EventTree::new();
        match trigger.effective_mode() {
            TriggerMode::Undefined => self.compile_single(&mut tree, &trigger.keys[0], trigger),
            TriggerMode::Parallel => self.compile_parallel(&mut tree, trigger)?,
            TriggerMode::Sequence => self.compile_sequence(&mut tree, key_map)?,
        }
        Ok(tree)
    }

    fn long_press_delay(&self, trigger: &Trigger) -> Duration {
        trigger.long_press_delay.unwrap_or(self.timing.long_press_delay)
    }

    fn double_press_delay(&self, trigger: &Trigger) -> Duration {
        trigger.double_press_delay.unwrap_or(self.timing.double_press_delay)
    }

    fn sequence_timeout(&self, trigger: &Trigger) -> Duration {
        trigger
            .sequence_trigger_timeout
            .unwrap_or(self.timing.sequence_trigger_timeout)
    }

    /// Effects for a press that turned out not to be this trigger
    fn imitate_effects(&self, key: &TriggerKey) -> SideEffects {
        imitate(key.consume_event && !self.conflicts.has_short(key))
    }

    /// Same for a release. A double press map on the key imitates once
    /// its gap runs out, so the release leaves it to that map.
    fn imitate_on_release(&self, key: &TriggerKey) -> SideEffects {
        imitate(
            key.consume_event
                && !self.conflicts.has_short(key)
                && self.conflicts.double_delay(key).is_none(),
        )
    }

    /// Abandoning the first press of a sequence types it back when no
    /// other key map listens to the key
    fn imitate_prefix(&self, key: &TriggerKey, uid: &str) -> SideEffects {
        imitate(key.consume_event && !self.conflicts.shared(key, uid))
    }

    fn compile_single(&self, tree: &mut EventTree, key: &TriggerKey, trigger: &Trigger) {
        let root = NodeIndex::ROOT;

        match key.click_type {
            ClickType::ShortPress => {
                let long_delay = self.conflicts.long_delay(key);
                let double_delay = self.conflicts.double_delay(key);

                if long_delay.is_none() && double_delay.is_none() {
                    let held = tree.add_node();
                    tree.connect(root, edge(key, KeyDirection::Down, fire(false), Some(held)));
                    tree.connect(held, edge(key, KeyDirection::Up, release(), None));
                    return;
                }

                // Fire on release, once a long or double press is ruled out
                let pressed = tree.add_node();
                tree.connect(
                    root,
                    edge(key, KeyDirection::Down, SideEffects::new(), Some(pressed)),
                );
                if let Some(after) = long_delay {
                    tree.set_timeout(pressed, timeout(after, SideEffects::new(), None));
                }
                match double_delay {
                    Some(after) => {
                        let released = tree.add_node();
                        tree.connect(
                            pressed,
                            edge(key, KeyDirection::Up, SideEffects::new(), Some(released)),
                        );
                        tree.set_timeout(released, timeout(after, fire(true), None));
                        tree.connect(
                            released,
                            edge(key, KeyDirection::Down, SideEffects::new(), None),
                        );
                    }
                    None => {
                        tree.connect(pressed, edge(key, KeyDirection::Up, fire(true), None));
                    }
                }
            }
            ClickType::LongPress => {
                let pressed = tree.add_node();
                let held = tree.add_node();
                tree.connect(
                    root,
                    edge(key, KeyDirection::Down, SideEffects::new(), Some(pressed)),
                );
                tree.connect(
                    pressed,
                    edge(key, KeyDirection::Up, self.imitate_on_release(key), None),
                );
                tree.set_timeout(
                    pressed,
                    timeout(self.long_press_delay(trigger), fire(false), Some(held)),
                );
                tree.connect(held, edge(key, KeyDirection::Up, release(), None));
            }
            ClickType::DoublePress => {
                let first = tree.add_node();
                let gap = tree.add_node();
                let second = tree.add_node();
                tree.connect(root, edge(key, KeyDirection::Down, SideEffects::new(), Some(first)));
                tree.connect(first, edge(key, KeyDirection::Up, SideEffects::new(), Some(gap)));
                tree.set_timeout(
                    gap,
                    timeout(self.double_press_delay(trigger), self.imitate_effects(key), None),
                );
                tree.connect(gap, edge(key, KeyDirection::Down, fire(false), Some(second)));
                tree.connect(second, edge(key, KeyDirection::Up, release(), None));
            }
        }
    }

    /// One node per subset of held keys, so the keys may go down in any
    /// order. The coincidence window runs from the first key; releasing
    /// a key or running out the window before the set is complete starts
    /// over. A key released on its own is typed back.
    fn compile_parallel(
        &self,
        tree: &mut EventTree,
        trigger: &Trigger,
    ) -> Result<(), CompileError> {
        let keys = &trigger.keys;
        validate_parallel(keys)?;

        let click_type = trigger.parallel_click_type();
        let full = (1usize << keys.len()) - 1;

        let mut nodes = vec![NodeIndex::ROOT; full + 1];
        for node in nodes.iter_mut().skip(1) {
            *node = tree.add_node();
        }

        for mask in 0..full {
            for (i, key) in keys.iter().enumerate() {
                let bit = 1usize << i;
                if mask & bit == 0 {
                    let target = mask | bit;
                    let effects = if target == full && click_type == ClickType::ShortPress {
                        fire(false)
                    } else {
                        SideEffects::new()
                    };
                    tree.connect(
                        nodes[mask],
                        edge(key, KeyDirection::Down, effects, Some(nodes[target])),
                    );
                } else {
                    tree.connect(
                        nodes[mask],
                        edge(key, KeyDirection::Up, self.imitate_on_release(key), None),
                    );
                }
            }
            if mask != 0 {
                tree.set_timeout(
                    nodes[mask],
                    timeout(self.timing.parallel_window, SideEffects::new(), None),
                );
                if let Some(node) = tree.node_mut(nodes[mask]) {
                    node.keeps_deadline = true;
                }
            }
        }

        let held = if click_type == ClickType::LongPress {
            let held = tree.add_node();
            for key in keys {
                tree.connect(
                    nodes[full],
                    edge(key, KeyDirection::Up, self.imitate_on_release(key), None),
                );
            }
            tree.set_timeout(
                nodes[full],
                timeout(self.long_press_delay(trigger), fire(false), Some(held)),
            );
            held
        } else {
            nodes[full]
        };

        for key in keys {
            tree.connect(held, edge(key, KeyDirection::Up, release(), None));
        }

        Ok(())
    }

    /// A chain of press steps. Every step waits at most the sequence
    /// timeout for the next event and gives up on any unrelated key-down.
    fn compile_sequence(&self, tree: &mut EventTree, key_map: &KeyMap) -> Result<(), CompileError> {
        let trigger = &key_map.trigger;
        let keys = &trigger.keys;
        validate_sequence(keys)?;

        let step_timeout = Some(self.sequence_timeout(trigger));
        let mut current = NodeIndex::ROOT;

        for (index, key) in keys.iter().enumerate() {
            let last = index + 1 == keys.len();
            let done = if last { fire(true) } else { SideEffects::new() };
            // Only a lone first short press can be typed back
            let give_up = if index == 0 && key.click_type == ClickType::ShortPress {
                self.imitate_prefix(key, &key_map.uid)
            } else {
                SideEffects::new()
            };
            let next = (!last).then(|| sequence_node(tree, step_timeout, give_up.clone()));

            match key.click_type {
                ClickType::ShortPress => {
                    let pressed = sequence_node(tree, step_timeout, give_up);
                    tree.connect(
                        current,
                        edge(key, KeyDirection::Down, SideEffects::new(), Some(pressed)),
                    );
                    tree.connect(pressed, edge(key, KeyDirection::Up, done, next));
                }
                ClickType::LongPress => {
                    let pressed = sequence_node(tree, None, SideEffects::new());
                    let held = sequence_node(tree, None, SideEffects::new());
                    tree.connect(
                        current,
                        edge(key, KeyDirection::Down, SideEffects::new(), Some(pressed)),
                    );
                    tree.connect(
                        pressed,
                        edge(key, KeyDirection::Up, self.imitate_on_release(key), None),
                    );
                    tree.set_timeout(
                        pressed,
                        timeout(self.long_press_delay(trigger), SideEffects::new(), Some(held)),
                    );
                    tree.connect(held, edge(key, KeyDirection::Up, done, next));
                }
                ClickType::DoublePress => {
                    let first = sequence_node(tree, step_timeout, SideEffects::new());
                    let gap = sequence_node(tree, None, SideEffects::new());
                    let second = sequence_node(tree, step_timeout, SideEffects::new());
                    tree.connect(
                        current,
                        edge(key, KeyDirection::Down, SideEffects::new(), Some(first)),
                    );
                    tree.connect(first, edge(key, KeyDirection::Up, SideEffects::new(), Some(gap)));
                    tree.set_timeout(
                        gap,
                        timeout(self.double_press_delay(trigger), SideEffects::new(), None),
                    );
                    tree.connect(
                        gap,
                        edge(key, KeyDirection::Down, SideEffects::new(), Some(second)),
                    );
                    tree.connect(second, edge(key, KeyDirection::Up, done, next));
                }
            }

            if let Some(next) = next {
                current = next;
            }
        }

        Ok(())
    }
}

/// Compile every active key map. Key maps that fail to compile are
/// logged and left out; the rest still load.
pub fn compile_key_maps(key_maps: &[KeyMap], timing: &TimingDefaults) -> Vec<CompiledKeyMap> {
    let compiler = TriggerCompiler::new(*timing, key_maps);
    let mut compiled = Vec::with_capacity(key_maps.len());

    for key_map in key_maps {
        if !key_map.enabled {
            log::debug!("Skipping disabled key map {}", key_map.uid);
            continue;
        }
        if key_map.actions.is_empty() {
            log::debug!("Skipping key map {} with no actions", key_map.uid);
            continue;
        }

        match compiler.compile(key_map) {
            Ok(tree) => {
                log::debug!(
                    "Compiled key map {} ({}) into {} nodes",
                    key_map.uid,
                    key_map.trigger,
                    tree.len()
                );
                compiled.push(CompiledKeyMap {
                    key_map: Arc::new(key_map.clone()),
                    mode: key_map.trigger.effective_mode(),
                    tree,
                    sequence_timeout: compiler.sequence_timeout(&key_map.trigger),
                    deferred_by: Vec::new(),
                    yields_to: Vec::new(),
                });
            }
            Err(e) => log::warn!("Skipping key map {}: {}", key_map.uid, e),
        }
    }

    link_overlaps(&mut compiled);
    compiled
}

/// Record which sequences each trigger shares keys with
fn link_overlaps(compiled: &mut [CompiledKeyMap]) {
    for index in 0..compiled.len() {
        let this = &compiled[index];
        let keys = &this.key_map.trigger.keys;
        let mut deferred_by = Vec::new();
        let mut yields_to = Vec::new();

        for (other_index, other) in compiled.iter().enumerate() {
            if other_index == index || other.mode != TriggerMode::Sequence {
                continue;
            }
            let other_keys = &other.key_map.trigger.keys;
            match this.mode {
                TriggerMode::Sequence => {
                    if runs(other_keys, keys).any(|at| at > 0) {
                        yields_to.push(other_index);
                    }
                }
                TriggerMode::Parallel | TriggerMode::Undefined => {
                    let short = this.key_map.trigger.parallel_click_type() == ClickType::ShortPress;
                    if short && runs(other_keys, keys).next().is_some() {
                        deferred_by.push(other_index);
                    }
                }
            }
        }

        if !deferred_by.is_empty() || !yields_to.is_empty() {
            log::debug!(
                "Key map {} waits for {:?} and yields to {:?}",
                this.key_map.uid,
                deferred_by,
                yields_to
            );
        }
        compiled[index].deferred_by = deferred_by;
        compiled[index].yields_to = yields_to;
    }
}

/// Offsets at which `inner` appears as an unbroken run of `outer`
fn runs<'a>(outer: &'a [TriggerKey], inner: &'a [TriggerKey]) -> impl Iterator<Item = usize> + 'a {
    outer
        .windows(inner.len().max(1))
        .enumerate()
        .filter(move |(_, window)| {
            window.len() == inner.len()
                && window
                    .iter()
                    .zip(inner)
                    .all(|(a, b)| a.same_physical_key(b) && a.click_type == b.click_type)
        })
        .map(|(at, _)| at)
}

fn validate_parallel(keys: &[TriggerKey]) -> Result<(), CompileError> {
    if keys.len() > MAX_PARALLEL_KEYS {
        return Err(CompileError::TooManyParallelKeys(keys.len()));
    }
    if keys.iter().any(|k| k.click_type == ClickType::DoublePress) {
        return Err(CompileError::DoublePressInParallel);
    }
    for (i, key) in keys.iter().enumerate() {
        if keys[i + 1..].iter().any(|other| other.same_physical_key(key)) {
            return Err(CompileError::DuplicateParallelKey(key.key));
        }
    }
    Ok(())
}

fn validate_sequence(keys: &[TriggerKey]) -> Result<(), CompileError> {
    for (i, key) in keys.iter().enumerate() {
        let inconsistent = keys[i + 1..]
            .iter()
            .any(|other| other.same_physical_key(key) && other.click_type != key.click_type);
        if inconsistent {
            return Err(CompileError::InconsistentClickType(key.key));
        }
    }
    Ok(())
}

/// A step of a sequence. `give_up` runs when the step times out or is
/// broken by another key.
fn sequence_node(
    tree: &mut EventTree,
    step_timeout: Option<Duration>,
    give_up: SideEffects,
) -> NodeIndex {
    let index = tree.add_node();
    if let Some(node) = tree.node_mut(index) {
        node.reset_on_mismatch = true;
        node.timeout = step_timeout.map(|after| timeout(after, give_up, None));
    }
    index
}

fn matcher(key: &TriggerKey, direction: KeyDirection) -> KeyMatcher {
    KeyMatcher {
        key: key.key,
        scan_code: if key.detect_with_scan_code { key.scan_code } else { None },
        device: key.device.clone(),
        direction,
    }
}

fn edge(
    key: &TriggerKey,
    direction: KeyDirection,
    effects: SideEffects,
    next: Option<NodeIndex>,
) -> Transition {
    Transition {
        matcher: matcher(key, direction),
        consume: key.consume_event,
        effects,
        next,
    }
}

fn timeout(after: Duration, effects: SideEffects, next: Option<NodeIndex>) -> NodeTimeout {
    NodeTimeout { after, effects, next }
}

fn fire(released: bool) -> SideEffects {
    smallvec![SideEffect::Trigger { released }]
}

fn release() -> SideEffects {
    smallvec![SideEffect::Release]
}

fn imitate(wanted: bool) -> SideEffects {
    if wanted {
        smallvec![SideEffect::Imitate(InputEventType::DownUp)]
    } else {
        SideEffects::new()
    }
}
