// Keymapper Detection - Event Tree
// Arena of matchable states compiled from one trigger

use std::fmt;
use std::time::Duration;

use smallvec::SmallVec;

use crate::{InputEventType, Key, KeyEvent, TriggerKeyDevice};

/// Index of a node in its tree's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub usize);

impl NodeIndex {
    pub const ROOT: NodeIndex = NodeIndex(0);

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction a transition waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyDirection {
    Down,
    Up,
}

/// Which events a transition accepts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyMatcher {
    pub key: Key,
    /// Matched instead of `key` when set
    pub scan_code: Option<u32>,
    pub device: TriggerKeyDevice,
    pub direction: KeyDirection,
}

impl KeyMatcher {
    pub fn matches(&self, event: &KeyEvent) -> bool {
        let direction_ok = match self.direction {
            KeyDirection::Down => event.action.is_down(),
            KeyDirection::Up => event.action.is_up(),
        };
        direction_ok && self.same_key(event)
    }

    /// Same physical key as `event`, regardless of direction
    pub fn same_key(&self, event: &KeyEvent) -> bool {
        let key_ok = match self.scan_code {
            Some(scan_code) => event.scan_code == scan_code,
            None => event.key == self.key,
        };
        key_ok && self.device.matches(event.device.as_ref())
    }
}

/// What happens when a transition is taken or a timeout expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// Hand the key map to its action performer. `released` is true when
    /// the trigger is already up at the time of firing.
    Trigger { released: bool },
    /// Tell the action performer the trigger was released
    Release,
    /// Re-emit the swallowed original key to the executor
    Imitate(InputEventType),
}

pub type SideEffects = SmallVec<[SideEffect; 2]>;

/// An edge out of a node.
#[derive(Debug, Clone)]
pub struct Transition {
    pub matcher: KeyMatcher,
    /// Swallow the matching event
    pub consume: bool,
    pub effects: SideEffects,
    /// `None` returns to the root
    pub next: Option<NodeIndex>,
}

/// Deadline armed when a node becomes current.
#[derive(Debug, Clone)]
pub struct NodeTimeout {
    pub after: Duration,
    pub effects: SideEffects,
    pub next: Option<NodeIndex>,
}

#[derive(Debug, Clone, Default)]
pub struct EventNode {
    pub transitions: SmallVec<[Transition; 4]>,
    pub timeout: Option<NodeTimeout>,
    /// A key-down matching no transition sends the cursor back to the
    /// root, where the event is matched again. The node's timeout
    /// effects run first, as if it had expired.
    pub reset_on_mismatch: bool,
    /// Entered from another timed node, the deadline already running is
    /// kept instead of arming a fresh one
    pub keeps_deadline: bool,
}

/// Compiled form of one trigger. Node 0 is the root.
#[derive(Debug, Clone)]
pub struct EventTree {
    nodes: Vec<EventNode>,
}

impl Default for EventTree {
    fn default() -> Self {
        Self::new()
    }
}

impl EventTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![EventNode::default()],
        }
    }

    pub fn add_node(&mut self) -> NodeIndex {
        self.nodes.push(EventNode::default());
        NodeIndex(self.nodes.len() - 1)
    }

    pub fn node(&self, index: NodeIndex) -> Option<&EventNode> {
        self.nodes.get(index.0)
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> Option<&mut EventNode> {
        self.nodes.get_mut(index.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Add an edge. Edges out of unknown nodes are dropped.
    pub fn connect(&mut self, from: NodeIndex, transition: Transition) {
        if let Some(node) = self.node_mut(from) {
            node.transitions.push(transition);
        }
    }

    pub fn set_timeout(&mut self, index: NodeIndex, timeout: NodeTimeout) {
        if let Some(node) = self.node_mut(index) {
            node.timeout = Some(timeout);
        }
    }

    /// First transition out of `index` accepting `event`
    pub fn find_transition(&self, index: NodeIndex, event: &KeyEvent) -> Option<&Transition> {
        self.node(index)?
            .transitions
            .iter()
            .find(|t| t.matcher.matches(event))
    }
}
