//! Scenario tests against the bundled standard content.
//!
//! Each scenario drives the engine through `accrual-data`'s
//! `standard_rules()`, so these also guard the content files themselves.

use accrual_core::action::{reduce, Action};
use accrual_core::event::{Event, EventKind, RecordingSink};
use accrual_core::game::Game;
use accrual_core::production::recalculate;
use accrual_core::session::Session;
use accrual_core::state::{GameState, Phase};
use accrual_core::template::Rules;
use accrual_core::tick::advance;
use accrual_core::unlock::UnlockKind;
use accrual_data::standard_rules;
use serde_json::json;
use std::sync::Arc;

fn rules() -> Rules {
    standard_rules().expect("bundled content must resolve")
}

fn running(rules: &Rules) -> GameState {
    let mut state = rules.template.instantiate();
    state.phase = Phase::Running;
    state.last_update = Some(0);
    state
}

fn game() -> (Game, RecordingSink) {
    let sink = RecordingSink::new();
    (Game::new(Arc::new(rules()), Box::new(sink.clone())), sink)
}

/// Gather `amount` of `resource` by hand.
fn gather(game: &mut Game, resource: &str, amount: f64) {
    assert!(game.dispatch(Action::Gather {
        resource: resource.into(),
        amount,
    }));
}

// ============================================================================
// Scenario A: one practice building
// ============================================================================

#[test]
fn test_practice_produces_knowledge() {
    let rules = rules();
    let mut session = Session::detached(&rules.config);
    let mut state = running(&rules);
    state.buildings.get_mut("practice").unwrap().count = 1;

    let report = recalculate(&rules, &state);
    assert!((report.rate("knowledge") - 0.63).abs() < 1e-12);

    advance(&rules, &mut session, &mut state, 10_000);
    assert!((state.resources["knowledge"].per_second - 0.63).abs() < 1e-12);
    assert!((state.value_of("knowledge") - 6.3).abs() < 1e-9);
}

#[test]
fn test_practice_output_clamps_at_max() {
    let rules = rules();
    let mut session = Session::detached(&rules.config);
    let mut state = running(&rules);
    state.buildings.get_mut("practice").unwrap().count = 1;

    advance(&rules, &mut session, &mut state, 1_000_000);
    assert_eq!(state.value_of("knowledge"), 100.0);
}

// ============================================================================
// Scenario B: applying knowledge twice unlocks the currency
// ============================================================================

#[test]
fn test_two_applications_unlock_currency() {
    let (mut g, sink) = game();
    g.start(0);
    gather(&mut g, "knowledge", 25.0);
    assert!(!g.state().resources["usdt"].unlocked);

    assert!(g.dispatch(Action::ApplyKnowledge));
    assert_eq!(g.state().counter_value("applyKnowledge"), 1.0);
    assert!(!g.state().resources["usdt"].unlocked);

    assert!(g.dispatch(Action::ApplyKnowledge));
    assert_eq!(g.state().counter_value("applyKnowledge"), 2.0);
    assert!(g.state().resources["usdt"].unlocked);
    assert!((g.state().value_of("usdt") - 2.0).abs() < 1e-9);
    assert!((g.state().value_of("knowledge") - 5.0).abs() < 1e-9);

    // The same counter opens the first building.
    assert!(g.state().buildings["practice"].unlocked);
    assert!(g.session().log.iter().any(|e| matches!(
        e,
        Event::Unlocked { kind: UnlockKind::Resource, id } if id == "usdt"
    )));
    assert!(sink.messages().iter().any(|(m, _)| m.contains("usdt")));
}

#[test]
fn test_currency_relocks_on_load_below_threshold() {
    let (mut g, _) = game();
    g.start(0);
    let mut snap = g.snapshot().unwrap();
    snap["resources"]["usdt"]["unlocked"] = json!(true);
    snap["counters"]["applyKnowledge"]["value"] = json!(1.0);
    g.dispatch(Action::Load { snapshot: snap });

    assert!(!g.state().resources["usdt"].unlocked);
    assert_eq!(g.session().log.count(EventKind::Relocked), 1);
}

// ============================================================================
// Scenario C: an unaffordable purchase changes nothing
// ============================================================================

#[test]
fn test_unaffordable_purchase_is_a_no_op() {
    let rules = rules();
    let mut session = Session::detached(&rules.config);
    let mut state = running(&rules);
    let usdt = state.resources.get_mut("usdt").unwrap();
    usdt.unlocked = true;
    usdt.value = 20.0;
    state.buildings.get_mut("generator").unwrap().unlocked = true;
    assert_eq!(rules.template.buildings["generator"].cost["usdt"], 25.0);

    let before = serde_json::to_vec(&state).unwrap();
    let next = reduce(
        &rules,
        &mut session,
        &state,
        &Action::PurchaseBuilding {
            id: "generator".into(),
            count: 1,
        },
    );
    assert_eq!(next, state);
    assert_eq!(serde_json::to_vec(&next).unwrap(), before);
    assert_eq!(session.log.count(EventKind::ActionRejected), 1);
}

#[test]
fn test_affordable_purchase_fires_triggers() {
    let rules = rules();
    let mut session = Session::detached(&rules.config);
    let mut state = running(&rules);
    let usdt = state.resources.get_mut("usdt").unwrap();
    usdt.unlocked = true;
    usdt.value = 30.0;
    state.buildings.get_mut("generator").unwrap().unlocked = true;

    let next = reduce(
        &rules,
        &mut session,
        &state,
        &Action::PurchaseBuilding {
            id: "generator".into(),
            count: 1,
        },
    );
    assert_eq!(next.buildings["generator"].count, 1);
    assert!((next.value_of("usdt") - 5.0).abs() < 1e-9);
    assert!(next.resources["electricity"].unlocked);
    assert!(next.resources["gridPower"].unlocked);
    assert!(next.buildings["homeComputer"].unlocked);
}

// ============================================================================
// Scenario D: conversion building with an efficiency upgrade
// ============================================================================

#[test]
fn test_auto_miner_rate_with_efficiency_upgrade() {
    let rules = rules();
    let mut state = running(&rules);
    for id in ["bitcoin", "electricity", "computingPower"] {
        state.resources.get_mut(id).unwrap().unlocked = true;
    }
    state.buildings.get_mut("autoMiner").unwrap().count = 2;
    let upgrade = state.upgrades.get_mut("algorithmOptimization").unwrap();
    upgrade.unlocked = true;
    upgrade.purchased = true;

    let report = recalculate(&rules, &state);
    assert!((report.rate("bitcoin") - 2.0 * 0.00005 * 1.15).abs() < 1e-15);
}

#[test]
fn test_auto_miner_starves_without_inputs() {
    let rules = rules();
    let mut session = Session::detached(&rules.config);
    let mut state = running(&rules);
    for id in ["bitcoin", "electricity", "computingPower"] {
        state.resources.get_mut(id).unwrap().unlocked = true;
    }
    state.buildings.get_mut("autoMiner").unwrap().count = 2;

    let report = advance(&rules, &mut session, &mut state, 10_000);
    assert_eq!(state.value_of("bitcoin"), 0.0);
    assert!(!report.conversion_supply.is_empty());
    assert!(session.shortages.contains("electricity"));
    assert!(session.log.count(EventKind::ShortageBegan) >= 1);
}

// ============================================================================
// Scenario E: a snapshot without buildings
// ============================================================================

#[test]
fn test_load_without_buildings_restores_defaults() {
    let (mut g, _) = game();
    g.start(0);
    gather(&mut g, "knowledge", 25.0);
    g.dispatch(Action::ApplyKnowledge);
    g.dispatch(Action::ApplyKnowledge);

    let mut snap = g.snapshot().unwrap();
    snap["resources"]["knowledge"]["value"] = json!(42.0);
    snap.as_object_mut().unwrap().remove("buildings");
    let counters = snap["counters"].clone();
    let upgrades = snap["upgrades"].clone();

    assert!(g.dispatch(Action::Load { snapshot: snap }));
    let state = g.state();
    let template = &g.rules().template;
    assert_eq!(state.buildings.len(), template.buildings.len());
    for (id, b) in &template.buildings {
        assert_eq!(state.buildings[id].count, 0, "{id}");
        assert_eq!(state.buildings[id].cost, b.cost, "{id}");
    }
    assert_eq!(state.value_of("knowledge"), 42.0);
    assert!(state.resources["usdt"].unlocked);
    assert_eq!(serde_json::to_value(&state.counters).unwrap(), counters);
    assert_eq!(serde_json::to_value(&state.upgrades).unwrap(), upgrades);
    // Unlock flags are re-derived, so practice opens again.
    assert!(state.buildings["practice"].unlocked);
}

// ============================================================================
// Whole-session flows
// ============================================================================

#[test]
fn test_scripted_session_is_deterministic() {
    fn play() -> u64 {
        let (mut g, _) = game();
        g.start(0);
        for s in 1..=120u64 {
            g.tick(s * 1_000);
            if s % 10 == 0 {
                gather(&mut g, "knowledge", 15.0);
                g.dispatch(Action::ApplyAllKnowledge);
            }
            if g.state().buildings["practice"].unlocked {
                g.dispatch(Action::PurchaseBuilding {
                    id: "practice".into(),
                    count: 1,
                });
            }
        }
        g.state_hash()
    }
    assert_eq!(play(), play());
}

#[test]
fn test_prestige_below_threshold_keeps_points_at_zero() {
    let (mut g, _) = game();
    g.start(0);
    gather(&mut g, "knowledge", 100.0);
    assert!(g.dispatch(Action::Prestige));
    assert_eq!(g.state().prestige_points, 0.0);
    assert_eq!(g.state().phase, Phase::Idle);
    assert_eq!(g.state().value_of("knowledge"), 0.0);
}
