//! Typed view over the string keys used in building production maps and
//! upgrade effect tables.
//!
//! Content encodes several quantities in one flat map: a plain resource id
//! is a per-second rate, while suffixed keys (`knowledgeMax`,
//! `knowledgeBoost`, ...) describe capacity and percentage modifiers. Keys are
//! parsed into [`EffectKey`] before any arithmetic happens, so a derived key
//! can never be mistaken for a production rate.

use crate::id::ResourceId;

/// A parsed effect or production key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EffectKey {
    /// `<res>`: flat per-second production per building unit.
    Rate(ResourceId),
    /// `<res>Production`: flat per-second production from an upgrade.
    RateFlat(ResourceId),
    /// `<res>Boost`: fractional rate bonus (0.1 = +10%).
    RateBoost(ResourceId),
    /// `<res>Max`: flat capacity increase.
    MaxFlat(ResourceId),
    /// `<res>MaxBoost`: fractional capacity increase.
    MaxBoost(ResourceId),
    /// `<res>ConsumptionReduction`: fractional reduction of consumption.
    ConsumptionReduction(ResourceId),
    /// Multiplier bonus for automatic conversion buildings.
    ConversionEfficiency,
    /// Bonus applied to knowledge application output.
    KnowledgeEfficiency,
    /// Delta merged into the mining commission on purchase.
    MiningCommission,
    /// Fractional change merged into the exchange rate on purchase.
    ExchangeRate,
    /// Anything not understood. Ignored by every consumer.
    Unknown(String),
}

/// Suffixes checked longest first so `MaxBoost` is never read as `Boost`.
const SUFFIXES: &[(&str, fn(ResourceId) -> EffectKey)] = &[
    ("ConsumptionReduction", EffectKey::ConsumptionReduction),
    ("Production", EffectKey::RateFlat),
    ("MaxBoost", EffectKey::MaxBoost),
    ("Boost", EffectKey::RateBoost),
    ("Max", EffectKey::MaxFlat),
];

impl EffectKey {
    /// Parse a key. `is_resource` decides whether a bare or stripped key
    /// names a known resource.
    pub fn parse(key: &str, is_resource: impl Fn(&str) -> bool) -> Self {
        match key {
            "conversionEfficiency" => return EffectKey::ConversionEfficiency,
            "knowledgeEfficiency" => return EffectKey::KnowledgeEfficiency,
            "miningCommission" => return EffectKey::MiningCommission,
            "exchangeRate" => return EffectKey::ExchangeRate,
            _ => {}
        }
        if is_resource(key) {
            return EffectKey::Rate(ResourceId::from(key));
        }
        for (suffix, make) in SUFFIXES {
            if let Some(stem) = key.strip_suffix(suffix)
                && !stem.is_empty()
                && is_resource(stem)
            {
                return make(ResourceId::from(stem));
            }
        }
        EffectKey::Unknown(key.to_string())
    }

    /// Effects that are merged into state once at purchase time instead of
    /// being recomputed by the production pipeline.
    pub fn is_one_shot(&self) -> bool {
        matches!(self, EffectKey::MiningCommission | EffectKey::ExchangeRate)
    }
}
