//! Shared fixtures for unit tests, integration tests and benches.
//!
//! The fixture is a small but complete content set: a knowledge producer,
//! a currency gated by the knowledge counter, an electricity chain with a
//! purchase-gated grid resource, and a conversion building.

use crate::config::EngineConfig;
use crate::id::*;
use crate::state::*;
use crate::template::*;
use crate::unlock::*;
use std::collections::BTreeMap;

fn cost(pairs: &[(&str, f64)]) -> BTreeMap<ResourceId, f64> {
    pairs.iter().map(|(k, v)| (ResourceId::from(*k), *v)).collect()
}

fn table(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn resource(id: &str, max: f64, unlocked: bool, kind: ResourceKind) -> Resource {
    let mut r = Resource::new(id, max);
    r.unlocked = unlocked;
    r.kind = kind;
    r
}

fn building(id: &str, price: &[(&str, f64)], mult: f64, production: &[(&str, f64)]) -> Building {
    let mut b = Building::new(id);
    b.cost = cost(price);
    b.cost_multiplier = mult;
    b.production = table(production);
    b
}

fn upgrade(id: &str, price: &[(&str, f64)], effects: &[(&str, f64)]) -> Upgrade {
    let mut u = Upgrade::new(id);
    u.cost = cost(price);
    u.effects = table(effects);
    u
}

fn threshold(id: &str, kind: UnlockKind, resource: &str, at: f64) -> UnlockableItem {
    UnlockableItem {
        id: id.to_string(),
        kind,
        conditions: vec![UnlockCondition::new(
            format!("{id}.{resource}"),
            ConditionKind::Resource,
            resource,
            Operator::Gte,
            at,
        )],
        auto_unlock: true,
        influences_others: false,
    }
}

/// Builder pre-loaded with the fixture content.
pub fn fixture_builder() -> TemplateBuilder {
    let mut b = TemplateBuilder::new();
    b.register_resource(resource("knowledge", 100.0, true, ResourceKind::Primary))
        .register_resource(resource("usdt", f64::INFINITY, false, ResourceKind::Currency))
        .register_resource(resource("electricity", 500.0, false, ResourceKind::Infrastructure))
        .register_resource(resource("gridPower", f64::INFINITY, false, ResourceKind::Infrastructure))
        .register_resource(resource("computingPower", 1_000.0, false, ResourceKind::Computational))
        .register_resource(resource("bitcoin", f64::INFINITY, false, ResourceKind::Crypto));

    let mut practice = building("practice", &[("usdt", 10.0)], 1.12, &[("knowledge", 0.63)]);
    practice.unlocked = true;
    let mut home = building("homeComputer", &[("usdt", 55.0)], 1.15, &[("computingPower", 2.0)]);
    home.consumption = cost(&[("electricity", 1.0)]);
    b.register_building(practice)
        .register_building(building("generator", &[("usdt", 25.0)], 1.15, &[("electricity", 0.5)]))
        .register_building(home)
        .register_building(building(
            "library",
            &[("usdt", 30.0)],
            1.15,
            &[("knowledgeMax", 50.0), ("knowledgeBoost", 0.1)],
        ))
        .register_building(building("autoMiner", &[("usdt", 100.0)], 1.15, &[]));

    b.register_upgrade(upgrade("practiceBoost", &[("usdt", 5.0)], &[("knowledgeBoost", 0.5)]))
        .register_upgrade(upgrade(
            "efficientMining",
            &[("usdt", 50.0)],
            &[("conversionEfficiency", 0.15)],
        ))
        .register_upgrade(upgrade(
            "coolingSystem",
            &[("usdt", 40.0)],
            &[("electricityConsumptionReduction", 0.25)],
        ))
        .register_upgrade(upgrade(
            "blockchainBasics",
            &[("usdt", 100.0)],
            &[("miningCommission", -0.01), ("exchangeRate", 0.1)],
        ));

    b.register_counter("applyKnowledge")
        .register_feature("mining", false)
        .mining(MiningParams::default());

    b.register_unlock(threshold("generator", UnlockKind::Building, "usdt", 15.0))
        .register_unlock(threshold("practiceBoost", UnlockKind::Upgrade, "usdt", 5.0))
        // Ignored: gridPower is purchase-gated.
        .register_unlock(threshold("gridPower", UnlockKind::Resource, "knowledge", 100.0));

    b.register_trigger(PurchaseTrigger {
        building: "generator".into(),
        on_count: 1,
        resources: vec!["electricity".into()],
        buildings: vec!["homeComputer".into()],
        ..PurchaseTrigger::default()
    })
    .register_trigger(PurchaseTrigger {
        building: "homeComputer".into(),
        on_count: 1,
        resources: vec!["computingPower".into()],
        buildings: vec!["autoMiner".into()],
        ..PurchaseTrigger::default()
    })
    .register_trigger(PurchaseTrigger {
        building: "autoMiner".into(),
        on_count: 1,
        resources: vec!["bitcoin".into()],
        upgrades: vec!["efficientMining".into()],
        features: vec!["mining".into()],
        ..PurchaseTrigger::default()
    })
    .purchase_gate("gridPower", "generator")
    .register_conversion(ConversionDef {
        building: "autoMiner".into(),
        output: "bitcoin".into(),
        base_rate: 0.00005,
        inputs: cost(&[("electricity", 0.5), ("computingPower", 1.0)]),
    });
    b
}

pub fn fixture_template() -> Template {
    match fixture_builder().build() {
        Ok(t) => t,
        Err(err) => panic!("fixture template is invalid: {err}"),
    }
}

pub fn fixture_rules() -> Rules {
    Rules::new(fixture_template(), EngineConfig::default())
}
