//! Condition-driven unlocking.
//!
//! The [`UnlockRegistry`] is static content: a list of items, each gated by
//! conditions that must all hold. The [`UnlockEngine`] evaluates the registry
//! against a state, applies locked-to-unlocked transitions to a fixed point
//! and reports one [`Event::Unlocked`] per transition.
//!
//! Two rules sit outside the generic evaluator and are named here:
//!
//! - [`apply_purchase_gates`]: some resources unlock only when a specific
//!   building is first bought, never through thresholds.
//! - [`apply_counter_relock`]: on load, the counter-gated currency is
//!   relocked when its counter is below the configured threshold.

use crate::event::Event;
use crate::id::*;
use crate::state::GameState;
use crate::template::{Rules, Template};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Which field of state a condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionKind {
    /// `resource.value`; the resource must also be unlocked.
    Resource,
    /// `building.count`.
    Building,
    /// `upgrade.purchased`, read as 1 or 0.
    Upgrade,
    /// `counter.value`.
    Counter,
    /// Feature flag, read as 1 or 0.
    Feature,
    /// Anything content declares that this build does not understand.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Gte,
    Eq,
    Lte,
}

impl Operator {
    pub fn compare(self, actual: f64, target: f64) -> bool {
        match self {
            Operator::Gte => actual >= target,
            Operator::Eq => (actual - target).abs() < 1e-9,
            Operator::Lte => actual <= target,
        }
    }
}

/// A predicate over one field of state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockCondition {
    pub id: ConditionId,
    #[serde(rename = "type")]
    pub kind: ConditionKind,
    pub target_id: String,
    pub operator: Operator,
    pub target_value: f64,
}

impl UnlockCondition {
    pub fn new(
        id: impl Into<ConditionId>,
        kind: ConditionKind,
        target_id: impl Into<String>,
        operator: Operator,
        target_value: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            target_id: target_id.into(),
            operator,
            target_value,
        }
    }

    /// Evaluate against `state`. Missing targets and unknown kinds are false.
    pub fn holds(&self, state: &GameState) -> bool {
        let target = self.target_id.as_str();
        let actual = match self.kind {
            ConditionKind::Resource => match state.resources.get(target) {
                Some(r) if r.unlocked => r.value,
                _ => return false,
            },
            ConditionKind::Building => match state.buildings.get(target) {
                Some(b) => f64::from(b.count),
                None => return false,
            },
            ConditionKind::Upgrade => match state.upgrades.get(target) {
                Some(u) => flag(u.purchased),
                None => return false,
            },
            ConditionKind::Counter => match state.counters.get(target) {
                Some(c) => c.value,
                None => return false,
            },
            ConditionKind::Feature => match state.features.get(target) {
                Some(enabled) => flag(*enabled),
                None => return false,
            },
            ConditionKind::Unknown => return false,
        };
        self.operator.compare(actual, self.target_value)
    }
}

fn flag(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnlockKind {
    Resource,
    Building,
    Upgrade,
    Feature,
}

/// A static registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockableItem {
    pub id: String,
    pub kind: UnlockKind,
    #[serde(default)]
    pub conditions: Vec<UnlockCondition>,
    #[serde(default = "default_true")]
    pub auto_unlock: bool,
    /// Unlocking this item can satisfy other items' conditions.
    #[serde(default)]
    pub influences_others: bool,
}

fn default_true() -> bool {
    true
}

/// All unlockable items, in evaluation order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnlockRegistry {
    items: Vec<UnlockableItem>,
}

impl UnlockRegistry {
    pub fn new(items: Vec<UnlockableItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[UnlockableItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn conditions(&self) -> impl Iterator<Item = &UnlockCondition> {
        self.items.iter().flat_map(|i| i.conditions.iter())
    }

    /// Replace every item of `kind` with this id by `item`.
    pub(crate) fn replace(&mut self, item: UnlockableItem) {
        self.items.retain(|i| !(i.kind == item.kind && i.id == item.id));
        self.items.push(item);
    }

    /// Mark items whose unlocked flag is read by some condition.
    ///
    /// Resource conditions require the resource to be unlocked and feature
    /// conditions read the flag directly, so unlocking such a target can
    /// enable other items within the same evaluation.
    pub(crate) fn derive_influence(&mut self) {
        let read: Vec<(UnlockKind, String)> = self
            .conditions()
            .filter_map(|c| match c.kind {
                ConditionKind::Resource => Some((UnlockKind::Resource, c.target_id.clone())),
                ConditionKind::Feature => Some((UnlockKind::Feature, c.target_id.clone())),
                _ => None,
            })
            .collect();
        for item in &mut self.items {
            if read.iter().any(|(k, id)| *k == item.kind && *id == item.id) {
                item.influences_others = true;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Item state access
// ---------------------------------------------------------------------------

/// Whether the item is currently unlocked. Missing targets count as locked.
pub fn is_unlocked(state: &GameState, kind: UnlockKind, id: &str) -> bool {
    match kind {
        UnlockKind::Resource => state.resources.get(id).is_some_and(|r| r.unlocked),
        UnlockKind::Building => state.buildings.get(id).is_some_and(|b| b.unlocked),
        UnlockKind::Upgrade => state.upgrades.get(id).is_some_and(|u| u.unlocked),
        UnlockKind::Feature => state.features.get(id).copied().unwrap_or(false),
    }
}

/// Unlock one item. Returns the event when the flag actually changed.
pub fn unlock(state: &mut GameState, kind: UnlockKind, id: &str) -> Option<Event> {
    let flag = match kind {
        UnlockKind::Resource => state.resources.get_mut(id).map(|r| &mut r.unlocked),
        UnlockKind::Building => state.buildings.get_mut(id).map(|b| &mut b.unlocked),
        UnlockKind::Upgrade => state.upgrades.get_mut(id).map(|u| &mut u.unlocked),
        UnlockKind::Feature => state.features.get_mut(id),
    }?;
    if *flag {
        return None;
    }
    *flag = true;
    state.touch();
    info!(?kind, id, "unlocked");
    Some(Event::Unlocked {
        kind,
        id: id.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Named special cases
// ---------------------------------------------------------------------------

/// Unlock purchase-gated resources whose gating building has been bought.
///
/// These resources never unlock through thresholds. Running this on every
/// evaluation also repairs saves where the building exists but the flag was
/// lost.
pub fn apply_purchase_gates(template: &Template, state: &mut GameState) -> Vec<Event> {
    let due: Vec<ResourceId> = template
        .purchase_gates
        .iter()
        .filter(|(_, building)| state.buildings.get(*building).is_some_and(|b| b.count > 0))
        .map(|(resource, _)| resource.clone())
        .collect();
    due.iter()
        .filter_map(|r| unlock(state, UnlockKind::Resource, r.as_str()))
        .collect()
}

/// The counter that gates the knowledge conversion's output currency.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterGate {
    pub resource: ResourceId,
    pub counter: CounterId,
    pub threshold: f64,
}

impl CounterGate {
    pub fn condition_id(&self) -> ConditionId {
        ConditionId::new(format!("{}.counterGate", self.resource))
    }

    pub fn item(&self) -> UnlockableItem {
        UnlockableItem {
            id: self.resource.to_string(),
            kind: UnlockKind::Resource,
            conditions: vec![UnlockCondition::new(
                self.condition_id(),
                ConditionKind::Counter,
                self.counter.as_str(),
                Operator::Gte,
                self.threshold,
            )],
            auto_unlock: true,
            influences_others: false,
        }
    }
}

/// Relock the counter-gated currency when its counter is below threshold.
///
/// Applied during load reconciliation only, so the flag re-derives from the
/// same counter on every load. Ticks and actions never relock.
pub fn apply_counter_relock(rules: &Rules, state: &mut GameState) -> Option<Event> {
    let gate = rules.counter_gate.as_ref()?;
    if state.counter_value(gate.counter.as_str()) >= gate.threshold {
        return None;
    }
    let resource = state.resources.get_mut(gate.resource.as_str())?;
    if !resource.unlocked {
        return None;
    }
    resource.unlocked = false;
    state.touch();
    info!(resource = %gate.resource, "relocked below counter threshold");
    Some(Event::Relocked {
        id: gate.resource.clone(),
    })
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Cached {
    result: bool,
    at: Millis,
    revision: u64,
}

/// Evaluates the registry and caches condition results per condition id.
///
/// A cached result is reused only while the state revision is unchanged and
/// the entry is younger than the configured TTL.
#[derive(Debug, Default)]
pub struct UnlockEngine {
    cache: HashMap<ConditionId, Cached>,
    hits: u64,
    misses: u64,
}

impl UnlockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached result.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    pub fn cache_hits(&self) -> u64 {
        self.hits
    }

    pub fn cache_misses(&self) -> u64 {
        self.misses
    }

    /// Apply every due unlock and return one event per transition.
    ///
    /// Scans repeat while a pass unlocks an item flagged as influencing
    /// others, bounded by the registry size.
    pub fn evaluate(&mut self, rules: &Rules, state: &mut GameState, now: Millis) -> Vec<Event> {
        let template = &rules.template;
        let ttl = rules.config.unlock_cache_ttl_ms;
        let mut events = apply_purchase_gates(template, state);

        for _ in 0..=template.unlocks.len() {
            let mut influenced = false;
            for item in template.unlocks.items() {
                if !item.auto_unlock || is_unlocked(state, item.kind, &item.id) {
                    continue;
                }
                if item.kind == UnlockKind::Resource
                    && template.purchase_gates.contains_key(item.id.as_str())
                {
                    continue;
                }
                let due = item
                    .conditions
                    .iter()
                    .all(|c| self.check(c, state, now, ttl));
                if due && let Some(event) = unlock(state, item.kind, &item.id) {
                    influenced |= item.influences_others;
                    events.push(event);
                }
            }
            if !influenced {
                break;
            }
        }
        events
    }

    fn check(&mut self, condition: &UnlockCondition, state: &GameState, now: Millis, ttl: u64) -> bool {
        if let Some(hit) = self.cache.get(&condition.id)
            && hit.revision == state.revision
            && now.saturating_sub(hit.at) <= ttl
        {
            self.hits += 1;
            return hit.result;
        }
        let result = condition.holds(state);
        self.misses += 1;
        debug!(condition = %condition.id, result, "condition evaluated");
        self.cache.insert(
            condition.id.clone(),
            Cached {
                result,
                at: now,
                revision: state.revision,
            },
        );
        result
    }
}
