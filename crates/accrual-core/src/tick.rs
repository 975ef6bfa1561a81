//! Elapsed-time driver.
//!
//! The host calls [`advance`] with its clock, nominally once a second but
//! at any cadence. Each call applies the whole gap since the last update in
//! one step, so a resumed session catches up in a single call. Rates are
//! treated as constant within a step: many small steps and one large step
//! over the same span agree up to floating-point error.
//!
//! Within a step every resource receives its whole net flow (direct rate
//! plus supplied conversion flows) before a single clamp, so a resource at
//! capacity that feeds a conversion is not clipped before it is drawn.

use crate::effect::EffectKey;
use crate::event::Event;
use crate::id::*;
use crate::production::{self, upgrade_bonus, ProductionReport};
use crate::session::Session;
use crate::state::{GameState, Phase};
use crate::template::Rules;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Values this close to zero count as empty for shortage detection.
const EMPTY: f64 = 1e-9;

/// What one call to [`advance`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Seconds applied. Zero when the call was a no-op.
    pub elapsed: f64,
    /// Fraction of requested input each conversion building received.
    pub conversion_supply: Vec<(BuildingId, f64)>,
}

/// Advance `state` to `now`.
pub fn advance(rules: &Rules, session: &mut Session, state: &mut GameState, now: Millis) -> TickReport {
    session.now = now;
    if state.phase != Phase::Running {
        return TickReport::default();
    }
    let Some(last) = state.last_update else {
        state.last_update = Some(now);
        return TickReport::default();
    };
    if now <= last {
        return TickReport::default();
    }
    let elapsed = (now - last) as f64 / 1_000.0;

    let report = production::recalculate(rules, state);
    report.apply_to(state);

    // Unclamped amounts after the direct flows.
    let mut pool: BTreeMap<ResourceId, f64> = state
        .resources
        .values()
        .filter(|r| r.unlocked)
        .map(|r| {
            let flow = report.direct_rate(r.id.as_str()) * elapsed;
            (r.id.clone(), r.value + if flow.is_finite() { flow } else { 0.0 })
        })
        .collect();

    let (conversion_supply, starved) = run_conversions(rules, state, &mut pool, elapsed);
    for (id, amount) in pool {
        if let Some(r) = state.resources.get_mut(&id) {
            r.value = amount;
            r.clamp_value();
        }
    }
    let mut events = detect_shortages(session, state, &report, &starved);

    state.touch();
    let unlocked = session.unlocks.evaluate(rules, state, now);
    if !unlocked.is_empty() {
        production::recalculate(rules, state).apply_to(state);
    }
    events.extend(unlocked);
    state.last_update = Some(now);

    debug!(elapsed, events = events.len(), "tick");
    session.emit_all(events);
    TickReport {
        elapsed,
        conversion_supply,
    }
}

/// Run every conversion building for `elapsed` seconds against `pool`,
/// scaled down to the fraction of inputs actually available. A locked input
/// supplies nothing. Returns the supply fraction per building and the
/// inputs that ran short.
fn run_conversions(
    rules: &Rules,
    state: &GameState,
    pool: &mut BTreeMap<ResourceId, f64>,
    elapsed: f64,
) -> (Vec<(BuildingId, f64)>, BTreeSet<ResourceId>) {
    let efficiency = 1.0 + upgrade_bonus(rules, state, &EffectKey::ConversionEfficiency);
    let mut supply = Vec::new();
    let mut starved = BTreeSet::new();

    for conv in rules.template.conversions.values() {
        let count = state.buildings.get(&conv.building).map(|b| b.count).unwrap_or(0);
        if count == 0 || !pool.contains_key(&conv.output) {
            continue;
        }
        let n = f64::from(count);
        let mut fraction: f64 = 1.0;
        for (id, per_unit) in &conv.inputs {
            let need = per_unit * n * elapsed;
            if need.is_nan() || need <= 0.0 {
                continue;
            }
            let have = pool.get(id).copied().unwrap_or(0.0).max(0.0);
            if have < need {
                starved.insert(id.clone());
                fraction = fraction.min(have / need);
            }
        }
        let fraction = fraction.clamp(0.0, 1.0);

        if fraction > 0.0 {
            for (id, per_unit) in &conv.inputs {
                if let Some(amount) = pool.get_mut(id) {
                    *amount -= per_unit * n * elapsed * fraction;
                }
            }
            if let Some(out) = pool.get_mut(&conv.output) {
                *out += conv.base_rate * n * efficiency * elapsed * fraction;
            }
        }
        supply.push((conv.building.clone(), fraction));
    }
    (supply, starved)
}

/// Compare the current shortage set with the session's and report
/// transitions only.
fn detect_shortages(
    session: &mut Session,
    state: &GameState,
    report: &ProductionReport,
    starved: &BTreeSet<ResourceId>,
) -> Vec<Event> {
    let now: BTreeSet<ResourceId> = state
        .resources
        .values()
        .filter(|r| r.unlocked)
        .filter(|r| starved.contains(&r.id) || (report.rate(r.id.as_str()) < 0.0 && r.value <= EMPTY))
        .map(|r| r.id.clone())
        .collect();

    let mut events = Vec::new();
    for id in now.difference(&session.shortages) {
        events.push(Event::ShortageBegan { resource: id.clone() });
    }
    for id in session.shortages.difference(&now) {
        events.push(Event::ShortageEnded { resource: id.clone() });
    }
    session.shortages = now;
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::test_utils::*;

    fn running(rules: &Rules) -> GameState {
        let mut state = rules.template.instantiate();
        state.phase = Phase::Running;
        state.last_update = Some(0);
        state
    }

    #[test]
    fn idle_state_is_not_advanced() {
        let rules = fixture_rules();
        let mut session = Session::detached(&rules.config);
        let mut state = rules.template.instantiate();
        state.buildings.get_mut("practice").unwrap().count = 1;
        let before = state.clone();
        let report = advance(&rules, &mut session, &mut state, 10_000);
        assert_eq!(report.elapsed, 0.0);
        assert_eq!(state, before);
    }

    #[test]
    fn zero_elapsed_is_a_noop() {
        let rules = fixture_rules();
        let mut session = Session::detached(&rules.config);
        let mut state = running(&rules);
        state.buildings.get_mut("practice").unwrap().count = 1;
        let before = state.clone();
        advance(&rules, &mut session, &mut state, 0);
        assert_eq!(state, before);
    }

    #[test]
    fn ten_seconds_of_practice() {
        let rules = fixture_rules();
        let mut session = Session::detached(&rules.config);
        let mut state = running(&rules);
        state.buildings.get_mut("practice").unwrap().count = 1;
        advance(&rules, &mut session, &mut state, 10_000);
        assert!((state.value_of("knowledge") - 6.3).abs() < 1e-9);
        assert_eq!(state.last_update, Some(10_000));
    }

    #[test]
    fn values_clamp_at_capacity() {
        let rules = fixture_rules();
        let mut session = Session::detached(&rules.config);
        let mut state = running(&rules);
        state.buildings.get_mut("practice").unwrap().count = 1;
        advance(&rules, &mut session, &mut state, 1_000_000);
        assert_eq!(state.value_of("knowledge"), 100.0);
    }

    #[test]
    fn shortage_events_fire_on_transitions_only() {
        let rules = fixture_rules();
        let mut session = Session::detached(&rules.config);
        let mut state = running(&rules);
        state.resources.get_mut("electricity").unwrap().unlocked = true;
        state.buildings.get_mut("homeComputer").unwrap().count = 1;

        for t in 1..=5 {
            advance(&rules, &mut session, &mut state, t * 1_000);
        }
        assert_eq!(session.log.count(EventKind::ShortageBegan), 1);

        state.buildings.get_mut("generator").unwrap().count = 4;
        advance(&rules, &mut session, &mut state, 6_000);
        advance(&rules, &mut session, &mut state, 7_000);
        assert_eq!(session.log.count(EventKind::ShortageEnded), 1);
    }

    #[test]
    fn conversion_scales_with_available_inputs() {
        let rules = fixture_rules();
        let mut session = Session::detached(&rules.config);
        let mut state = running(&rules);
        for id in ["electricity", "computingPower", "bitcoin"] {
            state.resources.get_mut(id).unwrap().unlocked = true;
        }
        state.buildings.get_mut("autoMiner").unwrap().count = 1;
        // Needs 0.5 electricity/s; only 1.0 available for 10 s.
        state.resources.get_mut("electricity").unwrap().value = 1.0;
        state.resources.get_mut("computingPower").unwrap().value = 100.0;

        let report = advance(&rules, &mut session, &mut state, 10_000);
        let (_, fraction) = &report.conversion_supply[0];
        assert!((fraction - 0.2).abs() < 1e-12);
        assert!((state.value_of("bitcoin") - 0.00005 * 10.0 * 0.2).abs() < 1e-15);
        assert_eq!(state.value_of("electricity"), 0.0);
        assert!(session.shortages.contains("electricity"));
    }

    #[test]
    fn conversion_input_at_capacity_splits_evenly() {
        let rules = fixture_rules();
        let mut a = running(&rules);
        for id in ["electricity", "computingPower", "bitcoin"] {
            a.resources.get_mut(id).unwrap().unlocked = true;
        }
        // The generator refills exactly what the miner draws.
        a.resources.get_mut("electricity").unwrap().value = 500.0;
        a.resources.get_mut("computingPower").unwrap().value = 100.0;
        a.buildings.get_mut("generator").unwrap().count = 1;
        a.buildings.get_mut("autoMiner").unwrap().count = 1;
        let mut b = a.clone();

        let mut sa = Session::detached(&rules.config);
        for t in 1..=10 {
            advance(&rules, &mut sa, &mut a, t * 1_000);
        }
        let mut sb = Session::detached(&rules.config);
        advance(&rules, &mut sb, &mut b, 10_000);

        assert!((a.value_of("electricity") - 500.0).abs() < 1e-9);
        assert!((b.value_of("electricity") - 500.0).abs() < 1e-9);
        assert!((a.value_of("bitcoin") - b.value_of("bitcoin")).abs() < 1e-15);
    }

    #[test]
    fn locked_input_starves_conversion() {
        let rules = fixture_rules();
        let mut session = Session::detached(&rules.config);
        let mut state = running(&rules);
        for id in ["electricity", "bitcoin"] {
            state.resources.get_mut(id).unwrap().unlocked = true;
        }
        state.resources.get_mut("electricity").unwrap().value = 100.0;
        state.buildings.get_mut("autoMiner").unwrap().count = 1;

        let report = advance(&rules, &mut session, &mut state, 10_000);
        assert_eq!(report.conversion_supply[0].1, 0.0);
        assert_eq!(state.value_of("bitcoin"), 0.0);
        assert_eq!(state.value_of("electricity"), 100.0);
    }

    #[test]
    fn catch_up_matches_small_steps() {
        let rules = fixture_rules();
        let mut a = running(&rules);
        a.buildings.get_mut("practice").unwrap().count = 3;
        let mut b = a.clone();

        let mut sa = Session::detached(&rules.config);
        for t in 1..=30 {
            advance(&rules, &mut sa, &mut a, t * 1_000);
        }
        let mut sb = Session::detached(&rules.config);
        advance(&rules, &mut sb, &mut b, 30_000);

        assert!((a.value_of("knowledge") - b.value_of("knowledge")).abs() < 1e-9);
    }
}
