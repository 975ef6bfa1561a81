//! Engine tunables.
//!
//! Every field has a default, so a partial config file (or none at all)
//! yields a working engine. Content-specific numbers live in the
//! [`Template`](crate::template::Template); this struct holds the rules that
//! apply across content.

use crate::id::{CounterId, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How fractional unit prices are rounded before charging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CostRounding {
    /// Floor each unit price that is at least one; keep smaller prices exact
    /// so sub-unit costs never round to zero.
    #[default]
    FloorWhole,
    /// Charge the exact geometric series.
    Exact,
}

impl CostRounding {
    pub fn apply(self, price: f64) -> f64 {
        match self {
            CostRounding::FloorWhole if price >= 1.0 => price.floor(),
            _ => price,
        }
    }
}

/// The knowledge-to-currency conversion and the counter it feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KnowledgeConfig {
    pub input: ResourceId,
    pub output: ResourceId,
    /// Units of input consumed per batch.
    pub batch_size: f64,
    /// Units of output produced per batch before efficiency bonuses.
    pub output_per_batch: f64,
    /// Counter incremented once per successful application.
    pub counter: CounterId,
    /// Applications needed before the output resource unlocks.
    pub unlock_threshold: f64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            input: ResourceId::from("knowledge"),
            output: ResourceId::from("usdt"),
            batch_size: 10.0,
            output_per_batch: 1.0,
            counter: CounterId::from("applyKnowledge"),
            unlock_threshold: 2.0,
        }
    }
}

/// Prestige conversion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrestigeConfig {
    /// Total asset value below which prestige yields nothing.
    pub threshold: f64,
    pub difficulty: f64,
    /// Per-resource weight when summing asset value. Resources not listed
    /// count with weight 1.
    pub asset_weights: BTreeMap<ResourceId, f64>,
}

impl Default for PrestigeConfig {
    fn default() -> Self {
        Self {
            threshold: 1000.0,
            difficulty: 1.0,
            asset_weights: BTreeMap::new(),
        }
    }
}

impl PrestigeConfig {
    pub fn weight(&self, id: &str) -> f64 {
        self.asset_weights.get(id).copied().unwrap_or(1.0)
    }
}

/// Save scheduling limits, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaveConfig {
    pub min_interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 5_000,
            timeout_ms: 10_000,
        }
    }
}

/// All engine tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub knowledge: KnowledgeConfig,
    /// Rate bonus per activated referral (0.05 = +5%).
    pub referral_bonus: f64,
    /// Bonus to a building's own output per accepted helper.
    pub helper_bonus: f64,
    /// Fraction of the marginal unit price refunded on sale.
    pub sell_refund: f64,
    pub prestige: PrestigeConfig,
    pub save: SaveConfig,
    /// How long a cached condition result stays valid.
    pub unlock_cache_ttl_ms: u64,
    pub cost_rounding: CostRounding,
    /// Largest unit count one purchase or sale may request.
    pub max_batch: u32,
    /// Capacity of the session event log.
    pub event_log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            knowledge: KnowledgeConfig::default(),
            referral_bonus: 0.05,
            helper_bonus: 0.10,
            sell_refund: 0.5,
            prestige: PrestigeConfig::default(),
            save: SaveConfig::default(),
            unlock_cache_ttl_ms: 1_000,
            cost_rounding: CostRounding::FloorWhole,
            max_batch: 1_000,
            event_log_capacity: 256,
        }
    }
}
