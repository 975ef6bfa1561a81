//! Per-session game state.
//!
//! Every record here is instantiated from the [`Template`](crate::template::Template)
//! at session start and mutated only by the reducer and the tick loop.
//! Records serialize with camelCase field names; that encoding is the
//! persisted snapshot format.

use crate::id::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Broad category of a resource. Informational for hosts; the engine treats
/// all kinds alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    #[default]
    Primary,
    Currency,
    Crypto,
    Infrastructure,
    Computational,
}

/// A stock-and-flow quantity.
///
/// Invariant: `0 <= value <= max`. `max` may be `f64::INFINITY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: ResourceId,
    pub value: f64,
    /// Net rate from the last pipeline run.
    pub per_second: f64,
    /// Rate produced without any building.
    pub base_production: f64,
    #[serde(with = "capacity")]
    pub max: f64,
    pub unlocked: bool,
    #[serde(rename = "type", default)]
    pub kind: ResourceKind,
}

impl Resource {
    pub fn new(id: impl Into<ResourceId>, max: f64) -> Self {
        Self {
            id: id.into(),
            value: 0.0,
            per_second: 0.0,
            base_production: 0.0,
            max,
            unlocked: false,
            kind: ResourceKind::Primary,
        }
    }

    /// Clamp `value` into `[0, max]`, repairing non-finite values.
    pub fn clamp_value(&mut self) {
        if !self.value.is_finite() {
            self.value = if self.value == f64::INFINITY { self.max } else { 0.0 };
        }
        self.value = self.value.clamp(0.0, self.max.max(0.0));
    }

    /// Add `amount` (may be negative) and clamp.
    pub fn add(&mut self, amount: f64) {
        if amount.is_finite() {
            self.value += amount;
        }
        self.clamp_value();
    }
}

/// Serde adapter for capacities: JSON has no infinity, so an unbounded
/// capacity is written as `null` and read back as `f64::INFINITY`.
pub mod capacity {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(max: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if max.is_finite() {
            serializer.serialize_some(max)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        let max: Option<f64> = Option::deserialize(deserializer)?;
        Ok(match max {
            Some(v) if v.is_finite() && v >= 0.0 => v,
            Some(_) => 0.0,
            None => f64::INFINITY,
        })
    }
}

// ---------------------------------------------------------------------------
// Buildings and upgrades
// ---------------------------------------------------------------------------

/// A repeatable purchase with recurring production and consumption.
///
/// `production` mixes plain resource rates with derived `<res>Max` and
/// `<res>Boost` keys; see [`EffectKey`](crate::effect::EffectKey).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Building {
    pub id: BuildingId,
    pub count: u32,
    /// Price of the first unit, per resource.
    pub cost: BTreeMap<ResourceId, f64>,
    pub cost_multiplier: f64,
    #[serde(default)]
    pub production: BTreeMap<String, f64>,
    #[serde(default)]
    pub consumption: BTreeMap<ResourceId, f64>,
    pub unlocked: bool,
}

impl Building {
    pub fn new(id: impl Into<BuildingId>) -> Self {
        Self {
            id: id.into(),
            count: 0,
            cost: BTreeMap::new(),
            cost_multiplier: 1.15,
            production: BTreeMap::new(),
            consumption: BTreeMap::new(),
            unlocked: false,
        }
    }
}

/// A one-time purchase. Invariant: `purchased` implies `unlocked`, and
/// `purchased` never reverts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upgrade {
    pub id: UpgradeId,
    pub cost: BTreeMap<ResourceId, f64>,
    #[serde(default)]
    pub effects: BTreeMap<String, f64>,
    pub purchased: bool,
    pub unlocked: bool,
}

impl Upgrade {
    pub fn new(id: impl Into<UpgradeId>) -> Self {
        Self {
            id: id.into(),
            cost: BTreeMap::new(),
            effects: BTreeMap::new(),
            purchased: false,
            unlocked: false,
        }
    }
}

/// A monotonically non-decreasing tally used as an unlock input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counter {
    pub id: CounterId,
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Social entities
// ---------------------------------------------------------------------------

/// Another player who joined through this player's invitation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub id: ReferralId,
    /// Opaque id of the player who referred them.
    #[serde(default)]
    pub referrer_id: String,
    pub activated: bool,
    pub hired: bool,
    #[serde(default)]
    pub assigned_building_id: Option<BuildingId>,
}

/// Whether a helper accepted their assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HelperStatus {
    Pending,
    Accepted,
    Rejected,
}

/// A referral assigned to boost one building.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperAssignment {
    pub id: AssignmentId,
    pub helper_id: ReferralId,
    pub building_id: BuildingId,
    pub status: HelperStatus,
}

// ---------------------------------------------------------------------------
// Mining parameters
// ---------------------------------------------------------------------------

/// The single record every mining and exchange conversion reads from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningParams {
    /// Resource spent by a manual mining action.
    pub compute_resource: ResourceId,
    pub compute_cost: f64,
    /// Resource produced by mining and sold by the exchange.
    pub mined_resource: ResourceId,
    pub reward: f64,
    /// Resource the exchange pays out in.
    pub exchange_target: ResourceId,
    pub exchange_rate: f64,
    /// Fraction kept by the exchange, in `[0, 1]`.
    pub commission: f64,
}

impl Default for MiningParams {
    fn default() -> Self {
        Self {
            compute_resource: ResourceId::from("computingPower"),
            compute_cost: 50.0,
            mined_resource: ResourceId::from("bitcoin"),
            reward: 0.00005,
            exchange_target: ResourceId::from("usdt"),
            exchange_rate: 20_000.0,
            commission: 0.05,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Tick loop phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    /// Before the start action; ticks are ignored.
    #[default]
    Idle,
    /// Ticks advance resources by elapsed wall-clock time.
    Running,
}

// ---------------------------------------------------------------------------
// GameState
// ---------------------------------------------------------------------------

/// Full mutable state of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub resources: BTreeMap<ResourceId, Resource>,
    pub buildings: BTreeMap<BuildingId, Building>,
    pub upgrades: BTreeMap<UpgradeId, Upgrade>,
    pub counters: BTreeMap<CounterId, Counter>,
    pub features: BTreeMap<FeatureId, bool>,
    pub referrals: BTreeMap<ReferralId, Referral>,
    pub helpers: BTreeMap<AssignmentId, HelperAssignment>,
    pub mining: MiningParams,
    /// Meta-currency carried across prestige resets.
    pub prestige_points: f64,
    pub phase: Phase,
    pub last_update: Option<Millis>,
    /// Upgrades whose one-shot effects were already merged.
    pub applied_effects: BTreeSet<UpgradeId>,
    /// Bumped on every successful transition. Keys the condition cache and
    /// is never persisted.
    #[serde(skip)]
    pub revision: u64,
}

impl GameState {
    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn resource_mut(&mut self, id: &str) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    /// Current value of a resource, or zero when it does not exist.
    pub fn value_of(&self, id: &str) -> f64 {
        self.resources.get(id).map(|r| r.value).unwrap_or(0.0)
    }

    pub fn counter_value(&self, id: &str) -> f64 {
        self.counters.get(id).map(|c| c.value).unwrap_or(0.0)
    }

    /// Increase a counter. Counters never decrease.
    pub fn bump_counter(&mut self, id: &str, by: f64) {
        if let Some(counter) = self.counters.get_mut(id)
            && by.is_finite()
            && by > 0.0
        {
            counter.value += by;
        }
    }

    pub fn is_resource(&self, id: &str) -> bool {
        self.resources.contains_key(id)
    }

    /// Number of referrals currently counted as active.
    pub fn active_referrals(&self) -> usize {
        self.referrals.values().filter(|r| r.activated).count()
    }

    /// Number of accepted helpers assigned to a building.
    pub fn accepted_helpers(&self, building: &str) -> usize {
        self.helpers
            .values()
            .filter(|h| h.status == HelperStatus::Accepted && h.building_id.as_str() == building)
            .count()
    }

    /// Whether every resource can cover `cost`.
    pub fn can_afford(&self, cost: &BTreeMap<ResourceId, f64>) -> bool {
        cost.iter().all(|(id, amount)| {
            self.resources
                .get(id)
                .is_some_and(|r| amount.is_finite() && r.value + 1e-9 >= *amount)
        })
    }

    /// Subtract `cost`. Callers check [`can_afford`](Self::can_afford) first.
    pub fn charge(&mut self, cost: &BTreeMap<ResourceId, f64>) {
        for (id, amount) in cost {
            if let Some(r) = self.resources.get_mut(id) {
                r.add(-amount);
            }
        }
    }

    /// Clamp every resource into its bounds.
    pub fn clamp_all(&mut self) {
        for r in self.resources.values_mut() {
            r.clamp_value();
        }
    }

    /// Mark a state transition.
    pub(crate) fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}
