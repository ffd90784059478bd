//! Signal governance for side-effecting hooks.
//!
//! Whether an optional hook (e.g. the post-commit advance notification)
//! fires is decided by explicit, injected configuration: a per-hook
//! rollout percentage and kill switch. The decision function is pure in
//! (config, hook, entity id) and deterministic, so the same entity always
//! routes the same way for a given configuration.

use serde::Deserialize;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Hook names used by the gateways.
pub mod hooks {
    /// Post-commit notification of a recorded advance installment.
    pub const ADVANCE_INSTALLMENT_RECORDED: &str = "advance.installment_recorded";
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookRule {
    #[serde(default = "default_rollout")]
    pub rollout_percent: u8,
    #[serde(default)]
    pub kill_switch: bool,
}

fn default_rollout() -> u8 {
    100
}

impl Default for HookRule {
    fn default() -> Self {
        Self {
            rollout_percent: default_rollout(),
            kill_switch: false,
        }
    }
}

/// Per-hook governance table. Hooks without a rule fire unconditionally.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookGovernance {
    #[serde(default)]
    hooks: HashMap<String, HookRule>,
}

impl HookGovernance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_rule(&mut self, hook: &str, rule: HookRule) {
        self.hooks.insert(hook.to_string(), rule);
    }

    /// Pure rollout decision for (hook, entity).
    pub fn should_fire(&self, hook: &str, entity_id: Uuid) -> bool {
        let rule = match self.hooks.get(hook) {
            Some(rule) => rule,
            None => return true,
        };
        if rule.kill_switch {
            return false;
        }
        if rule.rollout_percent >= 100 {
            return true;
        }
        bucket(hook, entity_id) < rule.rollout_percent
    }
}

/// Deterministic 0..100 bucket for an entity within a hook's rollout.
fn bucket(hook: &str, entity_id: Uuid) -> u8 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hook.hash(&mut hasher);
    entity_id.hash(&mut hasher);
    (hasher.finish() % 100) as u8
}
