//! Production pipeline.
//!
//! [`recalculate`] is a pure function of `(rules, state)`: it recomputes
//! every resource's net per-second rate and capacity from scratch on every
//! call. Rates are stacked in five ordered layers:
//!
//! 1. **Base**: resource base production plus building rates times count.
//! 2. **Upgrade**: flat upgrade rates, then percentage boosts compounding
//!    in upgrade id order.
//! 3. **Social**: a bonus per activated referral, for resources with a
//!    nonzero rate.
//! 4. **Helper**: a bonus per accepted helper on the assigned building's
//!    own base contribution.
//! 5. **Targeted**: building `<res>Boost` keys and targeted effects,
//!    summed into one percentage.
//!
//! Conversion buildings then add their output and draw their inputs, and
//! consumption (reduced, never boosted) is subtracted last.

use crate::effect::EffectKey;
use crate::id::*;
use crate::state::GameState;
use crate::template::{EffectSource, Rules};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Pipeline layer a contribution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    Base,
    Upgrade,
    Social,
    Helper,
    Targeted,
    Conversion,
    Consumption,
}

/// Key of a recorded contribution: one source may contribute to one
/// resource once per layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContributionKey {
    pub layer: Layer,
    pub source: String,
    pub resource: ResourceId,
}

/// Output of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductionReport {
    /// Net rate per unlocked resource. Locked resources are absent.
    pub per_second: BTreeMap<ResourceId, f64>,
    /// Capacity per resource.
    pub max: BTreeMap<ResourceId, f64>,
    /// Portion of `per_second` that comes from conversion buildings.
    /// The tick loop applies it separately, gated by input availability.
    pub conversion_net: BTreeMap<ResourceId, f64>,
    /// Per-source contributions, for inspection.
    pub contributions: BTreeMap<ContributionKey, f64>,
}

impl ProductionReport {
    pub fn rate(&self, id: &str) -> f64 {
        self.per_second.get(id).copied().unwrap_or(0.0)
    }

    /// Rate excluding conversion flows.
    pub fn direct_rate(&self, id: &str) -> f64 {
        self.rate(id) - self.conversion_net.get(id).copied().unwrap_or(0.0)
    }

    /// Sum of contributions from one layer to one resource.
    pub fn layer_total(&self, layer: Layer, resource: &str) -> f64 {
        self.contributions
            .iter()
            .filter(|(k, _)| k.layer == layer && k.resource.as_str() == resource)
            .map(|(_, v)| v)
            .sum()
    }

    /// Record a contribution. A repeated key is ignored so no source is
    /// counted twice within one layer.
    fn record(&mut self, layer: Layer, source: &str, resource: &ResourceId, amount: f64) {
        if amount == 0.0 {
            return;
        }
        self.contributions
            .entry(ContributionKey {
                layer,
                source: source.to_string(),
                resource: resource.clone(),
            })
            .or_insert(amount);
    }

    /// Write rates and capacities into `state` and clamp values.
    pub fn apply_to(&self, state: &mut GameState) {
        for (id, r) in state.resources.iter_mut() {
            r.per_second = if r.unlocked { self.rate(id.as_str()) } else { 0.0 };
            if let Some(max) = self.max.get(id) {
                r.max = *max;
            }
            r.clamp_value();
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Recompute rates and capacities for `state`.
pub fn recalculate(rules: &Rules, state: &GameState) -> ProductionReport {
    let template = &rules.template;
    let config = &rules.config;
    let mut report = ProductionReport::default();

    let purchased: Vec<_> = state.upgrades.values().filter(|u| u.purchased).collect();
    let active_referrals = state.active_referrals() as f64;
    let conversion_efficiency: f64 = purchased
        .iter()
        .flat_map(|u| u.effects.iter())
        .filter(|(k, _)| template.effect_key(k) == EffectKey::ConversionEfficiency)
        .map(|(_, v)| *v)
        .sum();

    for (rid, resource) in &state.resources {
        report.max.insert(rid.clone(), capacity(rules, state, rid));
        if !resource.unlocked {
            continue;
        }

        // 1. Base
        let mut rate = sanitize(resource.base_production);
        report.record(Layer::Base, "base", rid, rate);
        let mut own: Vec<(&BuildingId, f64)> = Vec::new();
        for b in state.buildings.values().filter(|b| b.count > 0) {
            let per_unit = b
                .production
                .iter()
                .filter(|(k, _)| template.effect_key(k) == EffectKey::Rate(rid.clone()))
                .map(|(_, v)| *v)
                .sum::<f64>();
            let amount = sanitize(per_unit * f64::from(b.count));
            if amount != 0.0 {
                rate += amount;
                own.push((&b.id, amount));
                report.record(Layer::Base, b.id.as_str(), rid, amount);
            }
        }

        // 2. Upgrades: flats, then compounding percentages.
        for u in &purchased {
            for (k, v) in &u.effects {
                if template.effect_key(k) == EffectKey::RateFlat(rid.clone()) {
                    rate += sanitize(*v);
                    report.record(Layer::Upgrade, u.id.as_str(), rid, sanitize(*v));
                }
            }
        }
        for u in &purchased {
            for (k, v) in &u.effects {
                if template.effect_key(k) == EffectKey::RateBoost(rid.clone()) {
                    let delta = sanitize(rate * v);
                    rate += delta;
                    report.record(Layer::Upgrade, u.id.as_str(), rid, delta);
                }
            }
        }

        // 3. Social
        if rate != 0.0 && active_referrals > 0.0 {
            let delta = sanitize(rate * config.referral_bonus * active_referrals);
            rate += delta;
            report.record(Layer::Social, "referrals", rid, delta);
        }

        // 4. Helpers, on each building's own contribution only.
        for (building, amount) in &own {
            let helpers = state.accepted_helpers(building.as_str()) as f64;
            if helpers > 0.0 {
                let delta = sanitize(amount * config.helper_bonus * helpers);
                rate += delta;
                report.record(Layer::Helper, building.as_str(), rid, delta);
            }
        }

        // 5. Targeted
        let mut pct = 0.0;
        let mut sources: Vec<(&str, f64)> = Vec::new();
        for b in state.buildings.values().filter(|b| b.count > 0) {
            for (k, v) in &b.production {
                if template.effect_key(k) == EffectKey::RateBoost(rid.clone()) {
                    let p = v * f64::from(b.count);
                    pct += p;
                    sources.push((b.id.as_str(), p));
                }
            }
        }
        for e in template.targeted_effects.iter().filter(|e| e.target == *rid) {
            let p = match &e.source {
                EffectSource::Building(id) => state
                    .buildings
                    .get(id)
                    .map(|b| e.percent * f64::from(b.count))
                    .unwrap_or(0.0),
                EffectSource::Upgrade(id) => {
                    if state.upgrades.get(id).is_some_and(|u| u.purchased) {
                        e.percent
                    } else {
                        0.0
                    }
                }
            };
            pct += p;
            sources.push((e.source.label(), p));
        }
        let base_for_targeted = rate;
        for (source, p) in sources {
            report.record(Layer::Targeted, source, rid, sanitize(base_for_targeted * p));
        }
        rate += sanitize(base_for_targeted * pct);

        report.per_second.insert(rid.clone(), sanitize(rate));
    }

    // Conversion buildings. Every input and the output must be unlocked.
    let open = |id: &ResourceId| state.resources.get(id).is_some_and(|r| r.unlocked);
    for conv in template.conversions.values() {
        let count = state.buildings.get(&conv.building).map(|b| b.count).unwrap_or(0);
        if count == 0 || !open(&conv.output) || !conv.inputs.keys().all(open) {
            continue;
        }
        let n = f64::from(count);
        let produced = sanitize(conv.base_rate * n * (1.0 + conversion_efficiency));
        add_conversion(&mut report, conv.building.as_str(), &conv.output, produced);
        for (input, per_unit) in &conv.inputs {
            add_conversion(&mut report, conv.building.as_str(), input, -sanitize(per_unit * n));
        }
    }

    // Consumption.
    for b in state.buildings.values().filter(|b| b.count > 0) {
        for (rid, per_unit) in &b.consumption {
            let Some(rate) = report.per_second.get_mut(rid) else {
                continue;
            };
            let reduction = consumption_reduction(rules, state, rid).clamp(0.0, 1.0);
            let used = sanitize(per_unit * f64::from(b.count) * (1.0 - reduction));
            *rate = sanitize(*rate - used);
            report.record(Layer::Consumption, b.id.as_str(), rid, -used);
        }
    }

    report
}

fn add_conversion(report: &mut ProductionReport, source: &str, rid: &ResourceId, amount: f64) {
    if let Some(rate) = report.per_second.get_mut(rid) {
        *rate = sanitize(*rate + amount);
        *report.conversion_net.entry(rid.clone()).or_insert(0.0) += amount;
        report.record(Layer::Conversion, source, rid, amount);
    }
}

/// `(templateMax + flat) * (1 + pct)`. Unbounded capacities stay unbounded.
fn capacity(rules: &Rules, state: &GameState, rid: &ResourceId) -> f64 {
    let template = &rules.template;
    let base = template
        .resources
        .get(rid)
        .or_else(|| state.resources.get(rid))
        .map(|r| r.max)
        .unwrap_or(0.0);
    if base.is_infinite() {
        return f64::INFINITY;
    }
    let mut flat = 0.0;
    let mut pct = 0.0;
    let mut take = |key: EffectKey, amount: f64| match key {
        EffectKey::MaxFlat(r) if r == *rid => flat += amount,
        EffectKey::MaxBoost(r) if r == *rid => pct += amount,
        _ => {}
    };
    for b in state.buildings.values().filter(|b| b.count > 0) {
        for (k, v) in &b.production {
            take(template.effect_key(k), v * f64::from(b.count));
        }
    }
    for u in state.upgrades.values().filter(|u| u.purchased) {
        for (k, v) in &u.effects {
            take(template.effect_key(k), *v);
        }
    }
    let max = (base + flat) * (1.0 + pct);
    if max.is_finite() { max.max(0.0) } else { base }
}

fn consumption_reduction(rules: &Rules, state: &GameState, rid: &ResourceId) -> f64 {
    state
        .upgrades
        .values()
        .filter(|u| u.purchased)
        .flat_map(|u| u.effects.iter())
        .filter(|(k, _)| rules.template.effect_key(k) == EffectKey::ConsumptionReduction(rid.clone()))
        .map(|(_, v)| *v)
        .sum()
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

/// Sum of a purchased-upgrade effect, e.g. knowledge efficiency.
pub fn upgrade_bonus(rules: &Rules, state: &GameState, key: &EffectKey) -> f64 {
    state
        .upgrades
        .values()
        .filter(|u| u.purchased)
        .flat_map(|u| u.effects.iter())
        .filter(|(k, _)| rules.template.effect_key(k) == *key)
        .map(|(_, v)| sanitize(*v))
        .sum()
}
