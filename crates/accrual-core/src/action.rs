//! Discrete player commands and the reducer that applies them.
//!
//! [`reduce`] maps `(state, action)` to a new state. It never fails: a
//! rejected action yields an unchanged copy of the input and an
//! [`Event::ActionRejected`]. Every accepted action ends with the same
//! bookkeeping (pipeline recompute, revision bump, unlock pass) as the tick
//! loop, so derived fields never lag.

use crate::effect::EffectKey;
use crate::event::{Event, RejectReason};
use crate::id::*;
use crate::production::{self, upgrade_bonus};
use crate::session::Session;
use crate::snapshot;
use crate::state::*;
use crate::template::Rules;
use crate::unlock::{self, apply_counter_relock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

fn one() -> u32 {
    1
}

fn unit() -> f64 {
    1.0
}

/// A discrete command. Decodes from JSON as `{"type": "purchaseBuilding", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Action {
    PurchaseBuilding {
        id: BuildingId,
        #[serde(default = "one")]
        count: u32,
    },
    SellBuilding {
        id: BuildingId,
        #[serde(default = "one")]
        count: u32,
    },
    PurchaseUpgrade {
        id: UpgradeId,
    },
    /// Manual collection of an unlocked resource.
    Gather {
        resource: ResourceId,
        #[serde(default = "unit")]
        amount: f64,
    },
    ApplyKnowledge,
    ApplyAllKnowledge,
    Mine,
    ExchangeCurrency,
    Prestige,
    Load {
        snapshot: Value,
    },
    Reset,
    Start {
        now: Millis,
    },
    RecordReferral {
        id: ReferralId,
        /// Filled from the identity collaborator by the facade.
        #[serde(default)]
        referrer_id: Option<String>,
    },
    ActivateReferral {
        id: ReferralId,
    },
    HireHelper {
        referral: ReferralId,
        building: BuildingId,
    },
    RespondToHelper {
        id: AssignmentId,
        accept: bool,
    },
    DismissHelper {
        id: AssignmentId,
    },
    SyncSocial {
        referrals: Vec<Referral>,
        helpers: Vec<HelperAssignment>,
    },
}

impl Action {
    /// Decode an action from JSON. Unknown kinds and malformed payloads
    /// yield `None`.
    pub fn from_json(value: &Value) -> Option<Action> {
        match serde_json::from_value(value.clone()) {
            Ok(action) => Some(action),
            Err(err) => {
                debug!(%err, "ignoring undecodable action");
                None
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::PurchaseBuilding { .. } => "purchaseBuilding",
            Action::SellBuilding { .. } => "sellBuilding",
            Action::PurchaseUpgrade { .. } => "purchaseUpgrade",
            Action::Gather { .. } => "gather",
            Action::ApplyKnowledge => "applyKnowledge",
            Action::ApplyAllKnowledge => "applyAllKnowledge",
            Action::Mine => "mine",
            Action::ExchangeCurrency => "exchangeCurrency",
            Action::Prestige => "prestige",
            Action::Load { .. } => "load",
            Action::Reset => "reset",
            Action::Start { .. } => "start",
            Action::RecordReferral { .. } => "recordReferral",
            Action::ActivateReferral { .. } => "activateReferral",
            Action::HireHelper { .. } => "hireHelper",
            Action::RespondToHelper { .. } => "respondToHelper",
            Action::DismissHelper { .. } => "dismissHelper",
            Action::SyncSocial { .. } => "syncSocial",
        }
    }
}

type Outcome = Result<Vec<Event>, RejectReason>;

// ---------------------------------------------------------------------------
// Reducer
// ---------------------------------------------------------------------------

/// Apply `action` to `state`.
pub fn reduce(rules: &Rules, session: &mut Session, state: &GameState, action: &Action) -> GameState {
    let mut next = state.clone();
    let outcome = match action {
        Action::PurchaseBuilding { id, count } => purchase_building(rules, &mut next, id, *count),
        Action::SellBuilding { id, count } => sell_building(rules, &mut next, id, *count),
        Action::PurchaseUpgrade { id } => purchase_upgrade(rules, &mut next, id),
        Action::Gather { resource, amount } => gather(&mut next, resource, *amount),
        Action::ApplyKnowledge => apply_knowledge(rules, &mut next, false),
        Action::ApplyAllKnowledge => apply_knowledge(rules, &mut next, true),
        Action::Mine => mine(&mut next),
        Action::ExchangeCurrency => exchange(&mut next),
        Action::Prestige => prestige(rules, session, &mut next),
        Action::Load { snapshot } => load(rules, session, &mut next, snapshot),
        Action::Reset => reset(rules, session, &mut next),
        Action::Start { now } => start(session, &mut next, *now),
        Action::RecordReferral { id, referrer_id } => record_referral(&mut next, id, referrer_id.as_deref()),
        Action::ActivateReferral { id } => activate_referral(&mut next, id),
        Action::HireHelper { referral, building } => hire_helper(&mut next, referral, building),
        Action::RespondToHelper { id, accept } => respond_to_helper(&mut next, id, *accept),
        Action::DismissHelper { id } => dismiss_helper(&mut next, id),
        Action::SyncSocial { referrals, helpers } => sync_social(&mut next, referrals, helpers),
    };

    match outcome {
        Ok(events) => {
            settle(rules, &mut next);
            let unlocked = session.unlocks.evaluate(rules, &mut next, session.now);
            session.emit_all(events);
            session.emit_all(unlocked);
            next
        }
        Err(reason) => {
            debug!(action = action.name(), ?reason, "action rejected");
            session.emit(Event::ActionRejected {
                action: action.name(),
                reason,
            });
            state.clone()
        }
    }
}

/// Recompute derived fields and mark the transition.
fn settle(rules: &Rules, state: &mut GameState) {
    production::recalculate(rules, state).apply_to(state);
    state.touch();
}

// ---------------------------------------------------------------------------
// Buildings
// ---------------------------------------------------------------------------

/// Total price of `k` more units of `building`, per resource.
pub fn purchase_cost(rules: &Rules, building: &Building, k: u32) -> BTreeMap<ResourceId, f64> {
    priced_within(rules, building, k, |_| f64::INFINITY).unwrap_or_default()
}

/// Sum unit prices for `k` more units, giving up as soon as a running total
/// exceeds `budget` for its resource.
fn priced_within(
    rules: &Rules,
    building: &Building,
    k: u32,
    budget: impl Fn(&ResourceId) -> f64,
) -> Option<BTreeMap<ResourceId, f64>> {
    let rounding = rules.config.cost_rounding;
    let mut total: BTreeMap<ResourceId, f64> =
        building.cost.keys().map(|res| (res.clone(), 0.0)).collect();
    for i in 0..k {
        let exp = f64::from(building.count) + f64::from(i);
        for (res, base) in &building.cost {
            let sum = total.entry(res.clone()).or_insert(0.0);
            *sum += rounding.apply(base * building.cost_multiplier.powf(exp));
            if sum.is_nan() || *sum > budget(res) {
                return None;
            }
        }
    }
    Some(total)
}

fn purchase_building(rules: &Rules, state: &mut GameState, id: &BuildingId, k: u32) -> Outcome {
    if k == 0 || k > rules.config.max_batch {
        return Err(RejectReason::InvalidPayload);
    }
    let building = state.buildings.get(id).ok_or(RejectReason::UnknownId)?;
    if !building.unlocked {
        return Err(RejectReason::Locked);
    }
    let cost = priced_within(rules, building, k, |res| state.value_of(res.as_str()) + 1e-9)
        .ok_or(RejectReason::Unaffordable)?;
    let before = building.count;
    let after = before.checked_add(k).ok_or(RejectReason::InvalidPayload)?;

    state.charge(&cost);
    if let Some(b) = state.buildings.get_mut(id) {
        b.count = after;
    }

    let mut events = vec![Event::BuildingPurchased { id: id.clone(), count: k }];
    for trigger in rules.template.triggers_between(id.as_str(), before, after) {
        for (kind, target) in trigger.targets() {
            events.extend(unlock::unlock(state, kind, target));
        }
    }
    Ok(events)
}

fn sell_building(rules: &Rules, state: &mut GameState, id: &BuildingId, k: u32) -> Outcome {
    if k == 0 || k > rules.config.max_batch {
        return Err(RejectReason::InvalidPayload);
    }
    let building = state.buildings.get(id).ok_or(RejectReason::UnknownId)?;
    if building.count < k {
        return Err(RejectReason::NotEnoughHeld);
    }
    let fraction = rules.config.sell_refund;
    let mut refund: BTreeMap<ResourceId, f64> = BTreeMap::new();
    for i in 0..k {
        // Marginal price of the unit being given back.
        let exp = f64::from(building.count - 1 - i);
        for (res, base) in &building.cost {
            let price = rules.config.cost_rounding.apply(base * building.cost_multiplier.powf(exp));
            *refund.entry(res.clone()).or_insert(0.0) += price * fraction;
        }
    }

    if let Some(b) = state.buildings.get_mut(id) {
        b.count -= k;
    }
    for (res, amount) in refund {
        if let Some(r) = state.resources.get_mut(&res) {
            r.add(amount);
        }
    }
    Ok(vec![Event::BuildingSold { id: id.clone(), count: k }])
}

// ---------------------------------------------------------------------------
// Upgrades
// ---------------------------------------------------------------------------

fn purchase_upgrade(rules: &Rules, state: &mut GameState, id: &UpgradeId) -> Outcome {
    let upgrade = state.upgrades.get(id).ok_or(RejectReason::UnknownId)?;
    if upgrade.purchased {
        return Err(RejectReason::AlreadyPurchased);
    }
    if !upgrade.unlocked {
        return Err(RejectReason::Locked);
    }
    if !state.can_afford(&upgrade.cost) {
        return Err(RejectReason::Unaffordable);
    }
    let cost = upgrade.cost.clone();
    let effects = upgrade.effects.clone();
    state.charge(&cost);
    if let Some(u) = state.upgrades.get_mut(id) {
        u.purchased = true;
    }
    merge_one_shot_effects(rules, state, id, &effects);
    Ok(vec![Event::UpgradePurchased { id: id.clone() }])
}

/// Merge an upgrade's purchase-time effects into the mining record.
/// Guarded by `applied_effects`, so it happens at most once per upgrade.
fn merge_one_shot_effects(
    rules: &Rules,
    state: &mut GameState,
    id: &UpgradeId,
    effects: &BTreeMap<String, f64>,
) {
    if !state.applied_effects.insert(id.clone()) {
        return;
    }
    for (key, amount) in effects {
        let key = rules.template.effect_key(key);
        if !key.is_one_shot() || !amount.is_finite() {
            continue;
        }
        match key {
            EffectKey::MiningCommission => {
                state.mining.commission = (state.mining.commission + amount).clamp(0.0, 1.0);
            }
            EffectKey::ExchangeRate => {
                state.mining.exchange_rate = (state.mining.exchange_rate * (1.0 + amount)).max(0.0);
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Gathering
// ---------------------------------------------------------------------------

fn gather(state: &mut GameState, id: &ResourceId, amount: f64) -> Outcome {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(RejectReason::InvalidPayload);
    }
    let resource = state.resource_mut(id.as_str()).ok_or(RejectReason::UnknownId)?;
    if !resource.unlocked {
        return Err(RejectReason::Locked);
    }
    resource.add(amount);
    Ok(vec![Event::Gathered {
        resource: id.clone(),
        amount,
    }])
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn apply_knowledge(rules: &Rules, state: &mut GameState, all: bool) -> Outcome {
    let k = &rules.config.knowledge;
    if !(k.batch_size > 0.0) {
        return Err(RejectReason::InvalidPayload);
    }
    let available = state.value_of(k.input.as_str());
    if available < k.batch_size || !state.is_resource(k.output.as_str()) {
        return Err(RejectReason::BelowBatch);
    }
    let batches = if all {
        (available / k.batch_size).floor()
    } else {
        1.0
    };
    let bonus = upgrade_bonus(rules, state, &EffectKey::KnowledgeEfficiency);
    let gained = batches * k.output_per_batch * (1.0 + bonus);

    if let Some(input) = state.resource_mut(k.input.as_str()) {
        input.add(-(batches * k.batch_size));
    }
    if let Some(output) = state.resource_mut(k.output.as_str()) {
        output.add(gained);
    }
    state.bump_counter(k.counter.as_str(), 1.0);
    Ok(vec![Event::KnowledgeApplied {
        batches: batches as u32,
        gained,
    }])
}

fn mine(state: &mut GameState) -> Outcome {
    let params = state.mining.clone();
    if state.value_of(params.compute_resource.as_str()) < params.compute_cost
        || !state.is_resource(params.mined_resource.as_str())
    {
        return Err(RejectReason::Unaffordable);
    }
    if let Some(compute) = state.resource_mut(params.compute_resource.as_str()) {
        compute.add(-params.compute_cost);
    }
    if let Some(mined) = state.resource_mut(params.mined_resource.as_str()) {
        mined.add(params.reward);
    }
    Ok(vec![Event::Mined {
        reward: params.reward,
    }])
}

fn exchange(state: &mut GameState) -> Outcome {
    let params = state.mining.clone();
    let sold = state.value_of(params.mined_resource.as_str());
    if sold <= 0.0 || !state.is_resource(params.exchange_target.as_str()) {
        return Err(RejectReason::Unaffordable);
    }
    let received = sold * params.exchange_rate * (1.0 - params.commission);
    if let Some(mined) = state.resource_mut(params.mined_resource.as_str()) {
        mined.value = 0.0;
    }
    if let Some(target) = state.resource_mut(params.exchange_target.as_str()) {
        target.add(received);
    }
    Ok(vec![Event::Exchanged { sold, received }])
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Meta-currency earned by prestiging with `total_assets`.
pub fn prestige_gain(rules: &Rules, total_assets: f64) -> f64 {
    let p = &rules.config.prestige;
    if !total_assets.is_finite() || total_assets < p.threshold || p.threshold <= 0.0 {
        return 0.0;
    }
    let gain = ((total_assets / p.threshold).ln() * p.difficulty).floor();
    if gain.is_finite() { gain.max(0.0) } else { 0.0 }
}

/// Weighted value of every resource held.
pub fn total_assets(rules: &Rules, state: &GameState) -> f64 {
    state
        .resources
        .values()
        .map(|r| r.value * rules.config.prestige.weight(r.id.as_str()))
        .filter(|v| v.is_finite())
        .sum()
}

fn prestige(rules: &Rules, session: &mut Session, state: &mut GameState) -> Outcome {
    let gained = prestige_gain(rules, total_assets(rules, state));
    let total = state.prestige_points + gained;
    replace(state, rules.template.instantiate());
    state.prestige_points = total;
    info!(gained, total, "prestige");
    let mut events = vec![Event::Prestiged { gained, total }];
    events.extend(end_shortages(session));
    Ok(events)
}

fn reset(rules: &Rules, session: &mut Session, state: &mut GameState) -> Outcome {
    replace(state, rules.template.instantiate());
    session.unlocks.invalidate();
    info!("game reset");
    let mut events = vec![Event::GameReset];
    events.extend(end_shortages(session));
    Ok(events)
}

/// A fresh state owns no buildings, so every open shortage ends with it.
fn end_shortages(session: &mut Session) -> Vec<Event> {
    std::mem::take(&mut session.shortages)
        .into_iter()
        .map(|resource| Event::ShortageEnded { resource })
        .collect()
}

/// Swap in a whole new state without reusing the old revision.
fn replace(state: &mut GameState, mut fresh: GameState) {
    fresh.revision = state.revision.wrapping_add(1);
    *state = fresh;
}

fn load(rules: &Rules, session: &mut Session, state: &mut GameState, snapshot: &Value) -> Outcome {
    let restored = snapshot::restore(&rules.template, snapshot).map_err(|err| {
        debug!(%err, "snapshot rejected");
        RejectReason::InvalidPayload
    })?;
    replace(state, restored.state);
    // Shortages carry over; the next tick reports any that ended.
    session.unlocks.invalidate();

    // Saved flags are kept; the evaluator can only add to them.
    let mut events = vec![Event::GameLoaded];
    events.extend(session.unlocks.evaluate(rules, state, session.now));
    events.extend(apply_counter_relock(rules, state));
    info!(fell_back = restored.fell_back, "game loaded");
    Ok(events)
}

fn start(session: &mut Session, state: &mut GameState, now: Millis) -> Outcome {
    if state.phase == Phase::Running {
        return Err(RejectReason::AlreadyRunning);
    }
    state.phase = Phase::Running;
    state.last_update = Some(now);
    session.now = now;
    info!(now, "game started");
    Ok(vec![Event::GameStarted { at: now }])
}

// ---------------------------------------------------------------------------
// Social
// ---------------------------------------------------------------------------

fn record_referral(state: &mut GameState, id: &ReferralId, referrer: Option<&str>) -> Outcome {
    let referrer = referrer
        .filter(|r| !r.is_empty())
        .ok_or(RejectReason::MissingIdentity)?;
    if state.referrals.contains_key(id) {
        return Err(RejectReason::InvalidPayload);
    }
    state.referrals.insert(
        id.clone(),
        Referral {
            id: id.clone(),
            referrer_id: referrer.to_string(),
            activated: false,
            hired: false,
            assigned_building_id: None,
        },
    );
    Ok(vec![Event::ReferralRecorded { id: id.clone() }])
}

fn activate_referral(state: &mut GameState, id: &ReferralId) -> Outcome {
    let referral = state.referrals.get_mut(id).ok_or(RejectReason::UnknownId)?;
    if referral.activated {
        return Err(RejectReason::InvalidPayload);
    }
    referral.activated = true;
    Ok(vec![Event::ReferralActivated { id: id.clone() }])
}

fn hire_helper(state: &mut GameState, referral: &ReferralId, building: &BuildingId) -> Outcome {
    if !state.buildings.contains_key(building) {
        return Err(RejectReason::UnknownId);
    }
    let r = state.referrals.get_mut(referral).ok_or(RejectReason::UnknownId)?;
    if !r.activated || r.hired {
        return Err(RejectReason::InvalidPayload);
    }
    r.hired = true;
    r.assigned_building_id = Some(building.clone());
    let id = AssignmentId::for_pair(referral, building);
    state.helpers.insert(
        id.clone(),
        HelperAssignment {
            id: id.clone(),
            helper_id: referral.clone(),
            building_id: building.clone(),
            status: HelperStatus::Pending,
        },
    );
    Ok(vec![Event::HelperHired { id }])
}

fn respond_to_helper(state: &mut GameState, id: &AssignmentId, accept: bool) -> Outcome {
    let h = state.helpers.get_mut(id).ok_or(RejectReason::UnknownId)?;
    if h.status != HelperStatus::Pending {
        return Err(RejectReason::InvalidPayload);
    }
    h.status = if accept {
        HelperStatus::Accepted
    } else {
        HelperStatus::Rejected
    };
    let helper = h.helper_id.clone();
    if !accept {
        release_referral(state, &helper);
    }
    Ok(vec![Event::HelperResponded {
        id: id.clone(),
        accepted: accept,
    }])
}

fn dismiss_helper(state: &mut GameState, id: &AssignmentId) -> Outcome {
    let h = state.helpers.remove(id).ok_or(RejectReason::UnknownId)?;
    release_referral(state, &h.helper_id);
    Ok(vec![Event::HelperDismissed { id: id.clone() }])
}

fn release_referral(state: &mut GameState, id: &ReferralId) {
    if let Some(r) = state.referrals.get_mut(id) {
        r.hired = false;
        r.assigned_building_id = None;
    }
}

fn sync_social(state: &mut GameState, referrals: &[Referral], helpers: &[HelperAssignment]) -> Outcome {
    state.referrals = referrals.iter().map(|r| (r.id.clone(), r.clone())).collect();
    state.helpers = helpers
        .iter()
        .filter(|h| state.buildings.contains_key(&h.building_id))
        .map(|h| (h.id.clone(), h.clone()))
        .collect();
    Ok(vec![Event::SocialSynced])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::test_utils::*;
    use crate::tick::advance;

    fn setup() -> (Rules, Session, GameState) {
        let rules = fixture_rules();
        let session = Session::detached(&rules.config);
        let state = rules.template.instantiate();
        (rules, session, state)
    }

    fn funded(mut state: GameState, usdt: f64) -> GameState {
        let r = state.resources.get_mut("usdt").unwrap();
        r.unlocked = true;
        r.value = usdt;
        state
    }

    // 1. Purchases charge the geometric series.
    #[test]
    fn purchase_charges_geometric_series() {
        let (rules, mut session, state) = setup();
        let state = funded(state, 1_000.0);
        let next = reduce(
            &rules,
            &mut session,
            &state,
            &Action::PurchaseBuilding {
                id: "practice".into(),
                count: 3,
            },
        );
        let expected: f64 = (0..3).map(|i| (10.0 * 1.12f64.powi(i)).floor()).sum();
        assert_eq!(next.buildings["practice"].count, 3);
        assert!((next.value_of("usdt") - (1_000.0 - expected)).abs() < 1e-9);
    }

    // 2. Unaffordable purchase leaves state untouched.
    #[test]
    fn unaffordable_purchase_is_noop() {
        let (rules, mut session, state) = setup();
        let mut state = funded(state, 20.0);
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
        assert_eq!(next, state);
        assert_eq!(session.log.count(EventKind::ActionRejected), 1);
    }

    #[test]
    fn locked_building_is_rejected() {
        let (rules, mut session, state) = setup();
        let state = funded(state, 1_000.0);
        let next = reduce(
            &rules,
            &mut session,
            &state,
            &Action::PurchaseBuilding {
                id: "generator".into(),
                count: 1,
            },
        );
        assert_eq!(next.buildings["generator"].count, 0);
    }

    // 3. Trigger table unlocks on the first unit.
    #[test]
    fn first_generator_fires_triggers_and_gate() {
        let (rules, mut session, state) = setup();
        let mut state = funded(state, 1_000.0);
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
        assert!(next.resources["electricity"].unlocked);
        assert!(next.buildings["homeComputer"].unlocked);
        assert!(next.resources["gridPower"].unlocked);
    }

    #[test]
    fn sell_refunds_half_of_marginal_price() {
        let (rules, mut session, state) = setup();
        let mut state = funded(state, 0.0);
        state.buildings.get_mut("practice").unwrap().count = 2;
        let next = reduce(
            &rules,
            &mut session,
            &state,
            &Action::SellBuilding {
                id: "practice".into(),
                count: 1,
            },
        );
        assert_eq!(next.buildings["practice"].count, 1);
        assert!((next.value_of("usdt") - (10.0f64 * 1.12).floor() * 0.5).abs() < 1e-9);

        let rejected = reduce(
            &rules,
            &mut session,
            &next,
            &Action::SellBuilding {
                id: "practice".into(),
                count: 5,
            },
        );
        assert_eq!(rejected, next);
    }

    // 4. Upgrades are one-time and merge one-shot effects once.
    #[test]
    fn upgrade_purchase_is_one_time() {
        let (rules, mut session, state) = setup();
        let mut state = funded(state, 1_000.0);
        state.upgrades.get_mut("blockchainBasics").unwrap().unlocked = true;
        let buy = Action::PurchaseUpgrade {
            id: "blockchainBasics".into(),
        };
        let once = reduce(&rules, &mut session, &state, &buy);
        assert!(once.upgrades["blockchainBasics"].purchased);
        assert!((once.mining.commission - 0.04).abs() < 1e-12);

        let twice = reduce(&rules, &mut session, &once, &buy);
        assert_eq!(twice, once);
    }

    #[test]
    fn one_shot_effects_guarded_by_ledger() {
        let (rules, _, mut state) = setup();
        let effects = BTreeMap::from([("exchangeRate".to_string(), 0.1)]);
        let id = UpgradeId::from("blockchainBasics");
        merge_one_shot_effects(&rules, &mut state, &id, &effects);
        merge_one_shot_effects(&rules, &mut state, &id, &effects);
        assert!((state.mining.exchange_rate - 22_000.0).abs() < 1e-6);
    }

    #[test]
    fn rate_effects_are_not_merged_at_purchase() {
        let (rules, _, mut state) = setup();
        let effects = BTreeMap::from([
            ("knowledgeBoost".to_string(), 0.5),
            ("miningCommission".to_string(), -0.02),
        ]);
        let before = state.mining.clone();
        merge_one_shot_effects(&rules, &mut state, &UpgradeId::from("practiceBoost"), &effects);
        assert_eq!(state.mining.exchange_rate, before.exchange_rate);
        assert!((state.mining.commission - (before.commission - 0.02)).abs() < 1e-12);
    }

    // 5. Knowledge application.
    #[test]
    fn apply_knowledge_needs_a_batch() {
        let (rules, mut session, mut state) = setup();
        state.resources.get_mut("knowledge").unwrap().value = 9.0;
        let next = reduce(&rules, &mut session, &state, &Action::ApplyKnowledge);
        assert_eq!(next, state);
    }

    #[test]
    fn apply_all_converts_whole_batches() {
        let (rules, mut session, mut state) = setup();
        state.resources.get_mut("knowledge").unwrap().value = 37.0;
        let next = reduce(&rules, &mut session, &state, &Action::ApplyAllKnowledge);
        assert!((next.value_of("knowledge") - 7.0).abs() < 1e-9);
        assert!((next.value_of("usdt") - 3.0).abs() < 1e-9);
        assert_eq!(next.counter_value("applyKnowledge"), 1.0);
    }

    #[test]
    fn two_applications_unlock_currency() {
        let (rules, mut session, mut state) = setup();
        state.resources.get_mut("knowledge").unwrap().value = 25.0;
        let once = reduce(&rules, &mut session, &state, &Action::ApplyKnowledge);
        assert!(!once.resources["usdt"].unlocked);
        let twice = reduce(&rules, &mut session, &once, &Action::ApplyKnowledge);
        assert_eq!(twice.counter_value("applyKnowledge"), 2.0);
        assert!(twice.resources["usdt"].unlocked);
    }

    // 6. Mining and exchange read the mining record.
    #[test]
    fn mine_and_exchange() {
        let (rules, mut session, mut state) = setup();
        for id in ["computingPower", "bitcoin", "usdt"] {
            state.resources.get_mut(id).unwrap().unlocked = true;
        }
        state.resources.get_mut("computingPower").unwrap().value = 120.0;
        let mined = reduce(&rules, &mut session, &state, &Action::Mine);
        assert!((mined.value_of("computingPower") - 70.0).abs() < 1e-9);
        assert!((mined.value_of("bitcoin") - 0.00005).abs() < 1e-15);

        let sold = reduce(&rules, &mut session, &mined, &Action::ExchangeCurrency);
        assert_eq!(sold.value_of("bitcoin"), 0.0);
        assert!((sold.value_of("usdt") - 0.00005 * 20_000.0 * 0.95).abs() < 1e-9);
    }

    #[test]
    fn exchange_with_nothing_is_rejected() {
        let (rules, mut session, state) = setup();
        let next = reduce(&rules, &mut session, &state, &Action::ExchangeCurrency);
        assert_eq!(next, state);
    }

    // 7. Prestige.
    #[test]
    fn prestige_gain_guards_log_domain() {
        let rules = fixture_rules();
        assert_eq!(prestige_gain(&rules, 0.0), 0.0);
        assert_eq!(prestige_gain(&rules, 999.0), 0.0);
        assert_eq!(prestige_gain(&rules, 1000.0), 0.0);
        assert_eq!(prestige_gain(&rules, 1000.0 * std::f64::consts::E.powi(3) + 1.0), 3.0);
        assert_eq!(prestige_gain(&rules, f64::NAN), 0.0);
    }

    #[test]
    fn prestige_resets_and_carries_points() {
        let (rules, mut session, state) = setup();
        let mut state = funded(state, 10_000.0);
        state.prestige_points = 4.0;
        state.buildings.get_mut("practice").unwrap().count = 5;
        let next = reduce(&rules, &mut session, &state, &Action::Prestige);
        assert_eq!(next.prestige_points, 4.0 + (10f64.ln()).floor());
        assert_eq!(next.buildings["practice"].count, 0);
        assert_eq!(next.phase, Phase::Idle);
    }

    // 8. Lifecycle.
    #[test]
    fn start_runs_once() {
        let (rules, mut session, state) = setup();
        let started = reduce(&rules, &mut session, &state, &Action::Start { now: 1_000 });
        assert_eq!(started.phase, Phase::Running);
        assert_eq!(started.last_update, Some(1_000));
        let again = reduce(&rules, &mut session, &started, &Action::Start { now: 2_000 });
        assert_eq!(again, started);
    }

    #[test]
    fn reset_discards_everything() {
        let (rules, mut session, state) = setup();
        let mut state = funded(state, 500.0);
        state.prestige_points = 9.0;
        let next = reduce(&rules, &mut session, &state, &Action::Reset);
        assert_eq!(next.prestige_points, 0.0);
        assert_eq!(next.value_of("usdt"), 0.0);
        assert!(next.revision > state.revision);
    }

    #[test]
    fn load_rederives_and_relocks() {
        let (rules, mut session, state) = setup();
        let mut saved = state.clone();
        // Stale flag: currency unlocked with a counter below threshold.
        saved.resources.get_mut("usdt").unwrap().unlocked = true;
        saved.counters.get_mut("applyKnowledge").unwrap().value = 1.0;
        // Lost flag: generator owned but gridPower locked.
        saved.buildings.get_mut("generator").unwrap().count = 1;
        let snap = snapshot::encode(&saved).unwrap();

        let next = reduce(&rules, &mut session, &state, &Action::Load { snapshot: snap });
        assert!(!next.resources["usdt"].unlocked);
        assert!(next.resources["gridPower"].unlocked);
        assert_eq!(session.log.count(EventKind::Relocked), 1);
    }

    #[test]
    fn load_of_non_object_is_rejected() {
        let (rules, mut session, state) = setup();
        let next = reduce(
            &rules,
            &mut session,
            &state,
            &Action::Load {
                snapshot: Value::from(3),
            },
        );
        assert_eq!(next, state);
    }

    // 9. Social.
    #[test]
    fn helper_lifecycle() {
        let (rules, mut session, state) = setup();
        let mut s = reduce(
            &rules,
            &mut session,
            &state,
            &Action::RecordReferral {
                id: "r1".into(),
                referrer_id: Some("me".into()),
            },
        );
        s = reduce(&rules, &mut session, &s, &Action::ActivateReferral { id: "r1".into() });
        s = reduce(
            &rules,
            &mut session,
            &s,
            &Action::HireHelper {
                referral: "r1".into(),
                building: "practice".into(),
            },
        );
        let aid = AssignmentId::from("r1@practice");
        assert_eq!(s.helpers[&aid].status, HelperStatus::Pending);
        s = reduce(
            &rules,
            &mut session,
            &s,
            &Action::RespondToHelper {
                id: aid.clone(),
                accept: true,
            },
        );
        assert_eq!(s.accepted_helpers("practice"), 1);
        s = reduce(&rules, &mut session, &s, &Action::DismissHelper { id: aid });
        assert!(s.helpers.is_empty());
        assert!(!s.referrals["r1"].hired);
    }

    #[test]
    fn referral_without_identity_is_rejected() {
        let (rules, mut session, state) = setup();
        let next = reduce(
            &rules,
            &mut session,
            &state,
            &Action::RecordReferral {
                id: "r1".into(),
                referrer_id: None,
            },
        );
        assert!(next.referrals.is_empty());
    }

    #[test]
    fn sync_drops_helpers_on_unknown_buildings() {
        let (rules, mut session, state) = setup();
        let helper = HelperAssignment {
            id: "r1@castle".into(),
            helper_id: "r1".into(),
            building_id: "castle".into(),
            status: HelperStatus::Accepted,
        };
        let next = reduce(
            &rules,
            &mut session,
            &state,
            &Action::SyncSocial {
                referrals: vec![],
                helpers: vec![helper],
            },
        );
        assert!(next.helpers.is_empty());
    }

    // 10. Batch limits.
    #[test]
    fn oversized_batch_is_rejected_up_front() {
        let (rules, mut session, state) = setup();
        let state = funded(state, 1_000.0);
        let next = reduce(
            &rules,
            &mut session,
            &state,
            &Action::PurchaseBuilding {
                id: "practice".into(),
                count: 200_000_000,
            },
        );
        assert_eq!(next, state);
        assert_eq!(
            session.log.last(),
            Some(&Event::ActionRejected {
                action: "purchaseBuilding",
                reason: RejectReason::InvalidPayload
            })
        );
    }

    #[test]
    fn pricing_stops_once_over_budget() {
        let rules = fixture_rules();
        let building = rules.template.buildings["practice"].clone();
        assert!(priced_within(&rules, &building, 1_000, |_| 100.0).is_none());
        let cheap = priced_within(&rules, &building, 2, |_| 100.0).unwrap();
        assert_eq!(cheap["usdt"], 10.0 + 11.0);
        assert_eq!(purchase_cost(&rules, &building, 2), cheap);
    }

    // 11. Gathering.
    #[test]
    fn gather_tops_up_unlocked_resources() {
        let (rules, mut session, state) = setup();
        let next = reduce(
            &rules,
            &mut session,
            &state,
            &Action::Gather {
                resource: "knowledge".into(),
                amount: 5.0,
            },
        );
        assert_eq!(next.value_of("knowledge"), 5.0);

        let capped = reduce(
            &rules,
            &mut session,
            &next,
            &Action::Gather {
                resource: "knowledge".into(),
                amount: 1_000.0,
            },
        );
        assert_eq!(capped.value_of("knowledge"), 100.0);
    }

    #[test]
    fn gather_rejects_locked_and_bad_amounts() {
        let (rules, mut session, state) = setup();
        for action in [
            Action::Gather {
                resource: "usdt".into(),
                amount: 5.0,
            },
            Action::Gather {
                resource: "knowledge".into(),
                amount: -1.0,
            },
            Action::Gather {
                resource: "mana".into(),
                amount: 1.0,
            },
        ] {
            assert_eq!(reduce(&rules, &mut session, &state, &action), state);
        }
        assert_eq!(session.log.count(EventKind::ActionRejected), 3);
    }

    // 12. Shortages across lifecycle actions.
    #[test]
    fn ongoing_shortage_survives_a_load() {
        let (rules, mut session, state) = setup();
        let mut state = reduce(&rules, &mut session, &state, &Action::Start { now: 0 });
        state.resources.get_mut("electricity").unwrap().unlocked = true;
        state.buildings.get_mut("homeComputer").unwrap().count = 1;
        advance(&rules, &mut session, &mut state, 1_000);
        assert_eq!(session.log.count(EventKind::ShortageBegan), 1);

        let snap = snapshot::encode(&state).unwrap();
        let mut state = reduce(&rules, &mut session, &state, &Action::Load { snapshot: snap });
        advance(&rules, &mut session, &mut state, 2_000);
        assert_eq!(session.log.count(EventKind::ShortageBegan), 1);
        assert_eq!(session.log.count(EventKind::ShortageEnded), 0);
    }

    #[test]
    fn reset_ends_open_shortages() {
        let (rules, mut session, state) = setup();
        session.shortages.insert(ResourceId::from("electricity"));
        let next = reduce(&rules, &mut session, &state, &Action::Reset);
        assert!(session.shortages.is_empty());
        assert_eq!(session.log.count(EventKind::ShortageEnded), 1);
        assert_eq!(next.phase, Phase::Idle);
    }

    // 13. Decoding.
    #[test]
    fn actions_decode_from_json() {
        let a = Action::from_json(&serde_json::json!({"type": "purchaseBuilding", "id": "practice"}));
        assert_eq!(
            a,
            Some(Action::PurchaseBuilding {
                id: "practice".into(),
                count: 1
            })
        );
        assert_eq!(Action::from_json(&serde_json::json!({"type": "teleport"})), None);
        assert_eq!(
            Action::from_json(&serde_json::json!({"type": "gather", "resource": "knowledge"})),
            Some(Action::Gather {
                resource: "knowledge".into(),
                amount: 1.0
            })
        );
        assert_eq!(
            Action::from_json(&serde_json::json!({"type": "purchaseBuilding", "count": "x"})),
            None
        );
    }
}
