//! Serde data file structs for game content definitions.
//!
//! These structs define the on-disk format for resources, buildings,
//! upgrades, unlock rules and the other content tables. They are
//! deserialized from RON, JSON, or TOML data files and then resolved into
//! engine types by the loader.

use accrual_core::config::EngineConfig;
use accrual_core::state::{MiningParams, ResourceKind};
use accrual_core::unlock::{ConditionKind, Operator, UnlockKind};
use serde::Deserialize;
use std::collections::BTreeMap;

fn default_true() -> bool {
    true
}

// ===========================================================================
// Resources
// ===========================================================================

/// A resource definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceData {
    pub id: String,
    /// Capacity. Omitted means unbounded.
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub base_production: f64,
    #[serde(default)]
    pub unlocked: bool,
    #[serde(default)]
    pub kind: ResourceKind,
}

// ===========================================================================
// Buildings and upgrades
// ===========================================================================

fn default_multiplier() -> f64 {
    1.15
}

/// A building definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildingData {
    pub id: String,
    pub cost: BTreeMap<String, f64>,
    #[serde(default = "default_multiplier")]
    pub cost_multiplier: f64,
    /// Resource rates plus `<res>Max` / `<res>Boost` keys.
    #[serde(default)]
    pub production: BTreeMap<String, f64>,
    #[serde(default)]
    pub consumption: BTreeMap<String, f64>,
    #[serde(default)]
    pub unlocked: bool,
}

/// An upgrade definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct UpgradeData {
    pub id: String,
    pub cost: BTreeMap<String, f64>,
    #[serde(default)]
    pub effects: BTreeMap<String, f64>,
    #[serde(default)]
    pub unlocked: bool,
}

/// A feature flag.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureData {
    pub id: String,
    #[serde(default)]
    pub enabled: bool,
}

// ===========================================================================
// Unlocking
// ===========================================================================

/// One condition of an unlock rule.
#[derive(Debug, Clone, Deserialize)]
pub struct ConditionData {
    /// Defaults to `<item>.<target>`.
    #[serde(default)]
    pub id: Option<String>,
    pub kind: ConditionKind,
    pub target: String,
    #[serde(default = "default_operator")]
    pub operator: Operator,
    pub value: f64,
}

fn default_operator() -> Operator {
    Operator::Gte
}

/// An unlockable item and its conditions.
#[derive(Debug, Clone, Deserialize)]
pub struct UnlockData {
    pub id: String,
    pub kind: UnlockKind,
    #[serde(default)]
    pub conditions: Vec<ConditionData>,
    #[serde(default = "default_true")]
    pub auto_unlock: bool,
    #[serde(default)]
    pub influences_others: bool,
}

fn default_on_count() -> u32 {
    1
}

/// Items unlocked when a building reaches a count through purchase.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerData {
    pub building: String,
    #[serde(default = "default_on_count")]
    pub on_count: u32,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub buildings: Vec<String>,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// A resource that unlocks only through a building's first purchase.
#[derive(Debug, Clone, Deserialize)]
pub struct GateData {
    pub resource: String,
    pub building: String,
}

// ===========================================================================
// Effects and conversions
// ===========================================================================

/// A targeted rate bonus owned by exactly one building or upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct EffectData {
    #[serde(default)]
    pub building: Option<String>,
    #[serde(default)]
    pub upgrade: Option<String>,
    pub target: String,
    pub percent: f64,
}

/// An automatic conversion building.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionData {
    pub building: String,
    pub output: String,
    pub base_rate: f64,
    #[serde(default)]
    pub inputs: BTreeMap<String, f64>,
}

// ===========================================================================
// Singletons
// ===========================================================================

/// Mining and exchange parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct MiningData {
    pub compute_resource: String,
    pub compute_cost: f64,
    pub mined_resource: String,
    pub reward: f64,
    pub exchange_target: String,
    pub exchange_rate: f64,
    pub commission: f64,
}

impl From<MiningData> for MiningParams {
    fn from(d: MiningData) -> Self {
        MiningParams {
            compute_resource: d.compute_resource.into(),
            compute_cost: d.compute_cost,
            mined_resource: d.mined_resource.into(),
            reward: d.reward,
            exchange_target: d.exchange_target.into(),
            exchange_rate: d.exchange_rate,
            commission: d.commission,
        }
    }
}

/// The config file deserializes straight into the engine config; every
/// field is optional.
pub type ConfigData = EngineConfig;
