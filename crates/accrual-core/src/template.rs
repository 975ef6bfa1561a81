//! The static definition table and its builder.
//!
//! A [`Template`] is built once per content set through
//! [`TemplateBuilder`] (register, then `build()` validates) and is never
//! mutated afterwards. Every session instantiates its [`GameState`] from it,
//! and load, reset and prestige all re-instantiate from it.
//!
//! [`Rules`] pairs a template with the [`EngineConfig`]; it is what the
//! reducer, pipeline, unlock engine and tick loop receive.

use crate::config::EngineConfig;
use crate::effect::EffectKey;
use crate::id::*;
use crate::state::*;
use crate::unlock::{CounterGate, UnlockKind, UnlockRegistry, UnlockableItem};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

// ---------------------------------------------------------------------------
// Definition records
// ---------------------------------------------------------------------------

/// Items unlocked when a building's count first reaches `on_count`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PurchaseTrigger {
    pub building: BuildingId,
    pub on_count: u32,
    pub resources: Vec<ResourceId>,
    pub buildings: Vec<BuildingId>,
    pub upgrades: Vec<UpgradeId>,
    pub features: Vec<FeatureId>,
}

impl PurchaseTrigger {
    /// Every item this trigger unlocks.
    pub fn targets(&self) -> impl Iterator<Item = (UnlockKind, &str)> {
        let r = self.resources.iter().map(|id| (UnlockKind::Resource, id.as_str()));
        let b = self.buildings.iter().map(|id| (UnlockKind::Building, id.as_str()));
        let u = self.upgrades.iter().map(|id| (UnlockKind::Upgrade, id.as_str()));
        let f = self.features.iter().map(|id| (UnlockKind::Feature, id.as_str()));
        r.chain(b).chain(u).chain(f)
    }
}

/// Owner of a targeted effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EffectSource {
    /// Scales with the building's count.
    Building(BuildingId),
    /// Applies once the upgrade is purchased.
    Upgrade(UpgradeId),
}

impl EffectSource {
    pub fn label(&self) -> &str {
        match self {
            EffectSource::Building(id) => id.as_str(),
            EffectSource::Upgrade(id) => id.as_str(),
        }
    }
}

/// A named entry boosting one resource's rate by a fraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetedEffect {
    pub source: EffectSource,
    pub target: ResourceId,
    pub percent: f64,
}

/// An automatic conversion building: consumes `inputs` (per unit, per
/// second) and produces `output` at `base_rate` per unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionDef {
    pub building: BuildingId,
    pub output: ResourceId,
    pub base_rate: f64,
    #[serde(default)]
    pub inputs: BTreeMap<ResourceId, f64>,
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// Immutable definition table. Frozen after `build()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub resources: BTreeMap<ResourceId, Resource>,
    pub buildings: BTreeMap<BuildingId, Building>,
    pub upgrades: BTreeMap<UpgradeId, Upgrade>,
    pub counters: BTreeMap<CounterId, Counter>,
    pub features: BTreeMap<FeatureId, bool>,
    pub mining: MiningParams,
    pub unlocks: UnlockRegistry,
    pub triggers: Vec<PurchaseTrigger>,
    /// Resources that unlock only through their building's first purchase.
    pub purchase_gates: BTreeMap<ResourceId, BuildingId>,
    pub targeted_effects: Vec<TargetedEffect>,
    pub conversions: BTreeMap<BuildingId, ConversionDef>,
}

impl Template {
    /// Fresh per-session state.
    pub fn instantiate(&self) -> GameState {
        GameState {
            resources: self.resources.clone(),
            buildings: self.buildings.clone(),
            upgrades: self.upgrades.clone(),
            counters: self.counters.clone(),
            features: self.features.clone(),
            referrals: BTreeMap::new(),
            helpers: BTreeMap::new(),
            mining: self.mining.clone(),
            prestige_points: 0.0,
            phase: Phase::Idle,
            last_update: None,
            applied_effects: BTreeSet::new(),
            revision: 0,
        }
    }

    /// Parse a production or effect key against this template's resources.
    pub fn effect_key(&self, key: &str) -> EffectKey {
        EffectKey::parse(key, |id| self.resources.contains_key(id))
    }

    /// Triggers fired by moving `building` from `from` to `to` units.
    pub fn triggers_between<'a>(
        &'a self,
        building: &'a str,
        from: u32,
        to: u32,
    ) -> impl Iterator<Item = &'a PurchaseTrigger> {
        self.triggers
            .iter()
            .filter(move |t| t.building.as_str() == building && t.on_count > from && t.on_count <= to)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for constructing an immutable [`Template`].
/// Register everything, then call [`build`](Self::build) to validate.
#[derive(Debug, Default)]
pub struct TemplateBuilder {
    resources: Vec<Resource>,
    buildings: Vec<Building>,
    upgrades: Vec<Upgrade>,
    counters: Vec<CounterId>,
    features: Vec<(FeatureId, bool)>,
    mining: Option<MiningParams>,
    unlocks: Vec<UnlockableItem>,
    triggers: Vec<PurchaseTrigger>,
    purchase_gates: Vec<(ResourceId, BuildingId)>,
    targeted_effects: Vec<TargetedEffect>,
    conversions: Vec<ConversionDef>,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_resource(&mut self, resource: Resource) -> &mut Self {
        self.resources.push(resource);
        self
    }

    pub fn register_building(&mut self, building: Building) -> &mut Self {
        self.buildings.push(building);
        self
    }

    pub fn register_upgrade(&mut self, upgrade: Upgrade) -> &mut Self {
        self.upgrades.push(upgrade);
        self
    }

    pub fn register_counter(&mut self, id: impl Into<CounterId>) -> &mut Self {
        self.counters.push(id.into());
        self
    }

    pub fn register_feature(&mut self, id: impl Into<FeatureId>, enabled: bool) -> &mut Self {
        self.features.push((id.into(), enabled));
        self
    }

    pub fn mining(&mut self, params: MiningParams) -> &mut Self {
        self.mining = Some(params);
        self
    }

    pub fn register_unlock(&mut self, item: UnlockableItem) -> &mut Self {
        self.unlocks.push(item);
        self
    }

    pub fn register_trigger(&mut self, trigger: PurchaseTrigger) -> &mut Self {
        self.triggers.push(trigger);
        self
    }

    /// Declare that `resource` unlocks only when `building` is first bought.
    pub fn purchase_gate(
        &mut self,
        resource: impl Into<ResourceId>,
        building: impl Into<BuildingId>,
    ) -> &mut Self {
        self.purchase_gates.push((resource.into(), building.into()));
        self
    }

    pub fn register_targeted_effect(&mut self, effect: TargetedEffect) -> &mut Self {
        self.targeted_effects.push(effect);
        self
    }

    pub fn register_conversion(&mut self, conversion: ConversionDef) -> &mut Self {
        self.conversions.push(conversion);
        self
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<Template, TemplateError> {
        let resources = unique("resource", self.resources, |r| r.id.clone())?;
        let buildings = unique("building", self.buildings, |b| b.id.clone())?;
        let upgrades = unique("upgrade", self.upgrades, |u| u.id.clone())?;
        let counters = unique("counter", self.counters, |c| c.clone())?
            .into_iter()
            .map(|(id, _)| (id.clone(), Counter { id, value: 0.0 }))
            .collect::<BTreeMap<_, _>>();
        let features = unique("feature", self.features, |(id, _)| id.clone())?
            .into_iter()
            .map(|(id, (_, enabled))| (id, enabled))
            .collect::<BTreeMap<_, _>>();

        let check = Refs {
            resources: &resources,
            buildings: &buildings,
            upgrades: &upgrades,
        };

        for r in resources.values() {
            non_negative(r.id.as_str(), "max", r.max)?;
            non_negative(r.id.as_str(), "baseProduction", r.base_production)?;
        }
        for b in buildings.values() {
            for (res, amount) in &b.cost {
                check.resource(b.id.as_str(), res.as_str())?;
                positive(b.id.as_str(), "cost", *amount)?;
            }
            positive(b.id.as_str(), "costMultiplier", b.cost_multiplier)?;
            for res in b.consumption.keys() {
                check.resource(b.id.as_str(), res.as_str())?;
            }
            for key in b.production.keys() {
                if key_is_unknown(&resources, key) {
                    debug!(building = %b.id, key, "ignoring unknown production key");
                }
            }
        }
        for u in upgrades.values() {
            for (res, amount) in &u.cost {
                check.resource(u.id.as_str(), res.as_str())?;
                positive(u.id.as_str(), "cost", *amount)?;
            }
            for key in u.effects.keys() {
                if key_is_unknown(&resources, key) {
                    debug!(upgrade = %u.id, key, "ignoring unknown effect key");
                }
            }
        }

        let mining = self.mining.unwrap_or_default();
        for res in [
            &mining.compute_resource,
            &mining.mined_resource,
            &mining.exchange_target,
        ] {
            check.resource("mining", res.as_str())?;
        }
        if !(0.0..=1.0).contains(&mining.commission) {
            return Err(TemplateError::InvalidNumber {
                owner: "mining".into(),
                field: "commission",
                value: mining.commission,
            });
        }

        let mut condition_ids = BTreeSet::new();
        for item in &self.unlocks {
            check.item(&features, item.kind, &item.id)?;
            for c in &item.conditions {
                if !condition_ids.insert(c.id.clone()) {
                    return Err(TemplateError::Duplicate {
                        kind: "condition",
                        id: c.id.to_string(),
                    });
                }
            }
        }

        for t in &self.triggers {
            check.building("trigger", t.building.as_str())?;
            for (kind, id) in t.targets() {
                check.item(&features, kind, id)?;
            }
        }

        let mut purchase_gates = BTreeMap::new();
        for (res, building) in self.purchase_gates {
            check.resource("purchase gate", res.as_str())?;
            check.building(res.as_str(), building.as_str())?;
            purchase_gates.insert(res, building);
        }

        for e in &self.targeted_effects {
            match &e.source {
                EffectSource::Building(b) => check.building("targeted effect", b.as_str())?,
                EffectSource::Upgrade(u) => check.upgrade("targeted effect", u.as_str())?,
            }
            check.resource(e.source.label(), e.target.as_str())?;
        }

        let mut conversions = BTreeMap::new();
        for c in self.conversions {
            check.building("conversion", c.building.as_str())?;
            check.resource(c.building.as_str(), c.output.as_str())?;
            for res in c.inputs.keys() {
                check.resource(c.building.as_str(), res.as_str())?;
            }
            non_negative(c.building.as_str(), "baseRate", c.base_rate)?;
            if conversions.contains_key(&c.building) {
                return Err(TemplateError::Duplicate {
                    kind: "conversion",
                    id: c.building.to_string(),
                });
            }
            conversions.insert(c.building.clone(), c);
        }

        Ok(Template {
            resources,
            buildings,
            upgrades,
            counters,
            features,
            mining,
            unlocks: UnlockRegistry::new(self.unlocks),
            triggers: self.triggers,
            purchase_gates,
            targeted_effects: self.targeted_effects,
            conversions,
        })
    }
}

fn unique<K: Ord + ToString, T>(
    kind: &'static str,
    items: Vec<T>,
    key: impl Fn(&T) -> K,
) -> Result<BTreeMap<K, T>, TemplateError> {
    let mut out = BTreeMap::new();
    for item in items {
        let k = key(&item);
        if out.contains_key(&k) {
            return Err(TemplateError::Duplicate {
                kind,
                id: k.to_string(),
            });
        }
        out.insert(k, item);
    }
    Ok(out)
}

fn key_is_unknown(resources: &BTreeMap<ResourceId, Resource>, key: &str) -> bool {
    matches!(
        EffectKey::parse(key, |id| resources.contains_key(id)),
        EffectKey::Unknown(_)
    )
}

fn positive(owner: &str, field: &'static str, value: f64) -> Result<(), TemplateError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(TemplateError::InvalidNumber {
            owner: owner.to_string(),
            field,
            value,
        })
    }
}

/// Non-negative; infinity allowed (unbounded capacities).
fn non_negative(owner: &str, field: &'static str, value: f64) -> Result<(), TemplateError> {
    if value >= 0.0 {
        Ok(())
    } else {
        Err(TemplateError::InvalidNumber {
            owner: owner.to_string(),
            field,
            value,
        })
    }
}

struct Refs<'a> {
    resources: &'a BTreeMap<ResourceId, Resource>,
    buildings: &'a BTreeMap<BuildingId, Building>,
    upgrades: &'a BTreeMap<UpgradeId, Upgrade>,
}

impl Refs<'_> {
    fn resource(&self, owner: &str, id: &str) -> Result<(), TemplateError> {
        found(self.resources.contains_key(id), owner, "resource", id)
    }

    fn building(&self, owner: &str, id: &str) -> Result<(), TemplateError> {
        found(self.buildings.contains_key(id), owner, "building", id)
    }

    fn upgrade(&self, owner: &str, id: &str) -> Result<(), TemplateError> {
        found(self.upgrades.contains_key(id), owner, "upgrade", id)
    }

    fn item(
        &self,
        features: &BTreeMap<FeatureId, bool>,
        kind: UnlockKind,
        id: &str,
    ) -> Result<(), TemplateError> {
        match kind {
            UnlockKind::Resource => self.resource("unlock", id),
            UnlockKind::Building => self.building("unlock", id),
            UnlockKind::Upgrade => self.upgrade("unlock", id),
            UnlockKind::Feature => found(features.contains_key(id), "unlock", "feature", id),
        }
    }
}

fn found(ok: bool, owner: &str, kind: &'static str, id: &str) -> Result<(), TemplateError> {
    if ok {
        Ok(())
    } else {
        Err(TemplateError::UnknownRef {
            owner: owner.to_string(),
            kind,
            id: id.to_string(),
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TemplateError {
    #[error("duplicate {kind} id: {id}")]
    Duplicate { kind: &'static str, id: String },
    #[error("{owner} references unknown {kind} `{id}`")]
    UnknownRef {
        owner: String,
        kind: &'static str,
        id: String,
    },
    #[error("{owner}: invalid {field}: {value}")]
    InvalidNumber {
        owner: String,
        field: &'static str,
        value: f64,
    },
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Template plus configuration. Shared read-only by every component.
#[derive(Debug, Clone, PartialEq)]
pub struct Rules {
    pub template: Template,
    pub config: EngineConfig,
    /// Installed from the knowledge config when the template has both the
    /// output resource and the counter.
    pub counter_gate: Option<CounterGate>,
}

impl Rules {
    /// Combine a template with a config.
    ///
    /// This is the one place the currency counter gate enters the unlock
    /// registry: any content item for the same resource is replaced, so the
    /// configured threshold is the only one in effect.
    pub fn new(mut template: Template, config: EngineConfig) -> Self {
        let k = &config.knowledge;
        let counter_gate = (template.resources.contains_key(&k.output)
            && template.counters.contains_key(&k.counter))
        .then(|| CounterGate {
            resource: k.output.clone(),
            counter: k.counter.clone(),
            threshold: k.unlock_threshold,
        });
        if let Some(gate) = &counter_gate {
            template.unlocks.replace(gate.item());
        }
        template.unlocks.derive_influence();
        Self {
            template,
            config,
            counter_gate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crate::unlock::{ConditionKind, Operator, UnlockCondition};

    fn minimal() -> TemplateBuilder {
        let mut b = TemplateBuilder::new();
        b.register_resource(Resource::new("knowledge", 100.0))
            .register_resource(Resource::new("usdt", f64::INFINITY))
            .register_resource(Resource::new("computingPower", 10.0))
            .register_resource(Resource::new("bitcoin", f64::INFINITY));
        b
    }

    #[test]
    fn builds_and_instantiates() {
        let t = minimal().build().unwrap();
        let s = t.instantiate();
        assert_eq!(s.resources.len(), 4);
        assert_eq!(s.phase, Phase::Idle);
        assert!(s.resources["usdt"].max.is_infinite());
    }

    #[test]
    fn duplicate_resource_rejected() {
        let mut b = minimal();
        b.register_resource(Resource::new("usdt", 1.0));
        assert_eq!(
            b.build().unwrap_err(),
            TemplateError::Duplicate {
                kind: "resource",
                id: "usdt".into()
            }
        );
    }

    #[test]
    fn unknown_cost_resource_rejected() {
        let mut b = minimal();
        let mut building = Building::new("forge");
        building.cost.insert(ResourceId::from("gold"), 5.0);
        b.register_building(building);
        assert!(matches!(
            b.build(),
            Err(TemplateError::UnknownRef { kind: "resource", .. })
        ));
    }

    #[test]
    fn non_positive_cost_rejected() {
        let mut b = minimal();
        let mut building = Building::new("forge");
        building.cost.insert(ResourceId::from("usdt"), 0.0);
        b.register_building(building);
        assert!(matches!(b.build(), Err(TemplateError::InvalidNumber { .. })));
    }

    #[test]
    fn duplicate_condition_ids_rejected() {
        let mut b = minimal();
        let cond = UnlockCondition::new("c", ConditionKind::Counter, "x", Operator::Gte, 1.0);
        for id in ["usdt", "bitcoin"] {
            b.register_unlock(UnlockableItem {
                id: id.into(),
                kind: UnlockKind::Resource,
                conditions: vec![cond.clone()],
                auto_unlock: true,
                influences_others: false,
            });
        }
        assert!(matches!(
            b.build(),
            Err(TemplateError::Duplicate { kind: "condition", .. })
        ));
    }

    #[test]
    fn rules_install_single_counter_gate() {
        let rules = fixture_rules();
        let usdt_items: Vec<_> = rules
            .template
            .unlocks
            .items()
            .iter()
            .filter(|i| i.kind == UnlockKind::Resource && i.id == "usdt")
            .collect();
        assert_eq!(usdt_items.len(), 1);
        assert_eq!(usdt_items[0].conditions[0].target_value, 2.0);
        assert!(usdt_items[0].influences_others);
    }

    #[test]
    fn configured_threshold_is_used() {
        let mut config = EngineConfig::default();
        config.knowledge.unlock_threshold = 1.0;
        let rules = Rules::new(fixture_template(), config);
        assert_eq!(rules.counter_gate.unwrap().threshold, 1.0);
    }

    #[test]
    fn triggers_fire_on_crossing() {
        let t = fixture_template();
        assert_eq!(t.triggers_between("generator", 0, 1).count(), 1);
        assert_eq!(t.triggers_between("generator", 1, 3).count(), 0);
        assert_eq!(t.triggers_between("generator", 0, 5).count(), 1);
    }

    #[test]
    fn trigger_fields_default_when_omitted() {
        assert_eq!(PurchaseTrigger::default().targets().count(), 0);
        let t: PurchaseTrigger = serde_json::from_value(serde_json::json!({
            "buildings": ["homeComputer"],
        }))
        .unwrap();
        assert_eq!(t.building, BuildingId::default());
        assert_eq!(t.on_count, 0);
        assert_eq!(t.targets().collect::<Vec<_>>(), vec![(UnlockKind::Building, "homeComputer")]);
    }
}
