// Keymapper Detection - Constraint Gate
// Decides whether a recognized key map is allowed to fire

use std::sync::Arc;

use parking_lot::RwLock;

use crate::{KeyMap, Settings};

/// Consulted every time a trigger is recognized, before its actions run.
pub trait ConstraintGate: Send + Sync {
    fn is_key_map_eligible(&self, key_map: &KeyMap) -> bool;
}

/// Lets every key map fire
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysEligible;

impl ConstraintGate for AlwaysEligible {
    fn is_key_map_eligible(&self, _key_map: &KeyMap) -> bool {
        true
    }
}

impl<F> ConstraintGate for F
where
    F: Fn(&KeyMap) -> bool + Send + Sync,
{
    fn is_key_map_eligible(&self, key_map: &KeyMap) -> bool {
        self(key_map)
    }
}

/// Evaluates key map constraints against live settings toggles.
///
/// Each constraint is a settings condition such as `settings.gaming` or
/// `not settings.docked`; all of them must hold.
#[derive(Debug, Clone)]
pub struct SettingsConstraintGate {
    settings: Arc<RwLock<Settings>>,
}

impl SettingsConstraintGate {
    pub fn new(settings: Arc<RwLock<Settings>>) -> Self {
        Self { settings }
    }

    /// Shared handle for flipping toggles at runtime
    pub fn settings(&self) -> Arc<RwLock<Settings>> {
        Arc::clone(&self.settings)
    }
}

impl ConstraintGate for SettingsConstraintGate {
    fn is_key_map_eligible(&self, key_map: &KeyMap) -> bool {
        let settings = self.settings.read();
        key_map
            .constraints
            .iter()
            .all(|constraint| settings.evaluate_condition(constraint))
    }
}
