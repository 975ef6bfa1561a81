//! Snapshot encoding and the template merge used on load.
//!
//! Snapshots are the JSON encoding of [`GameState`] plus a `formatVersion`
//! field. Loading never trusts a snapshot's shape: it is merged onto the
//! template's encoding key by key, so anything missing or mistyped falls
//! back to the template default. An entry that still does not decode (a
//! fractional building count, an unknown phase) is replaced on its own; the
//! rest of the document is kept.

use crate::id::{FeatureId, Millis, UpgradeId};
use crate::state::*;
use crate::template::Template;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// Current snapshot format version.
pub const FORMAT_VERSION: u64 = 1;

const VERSION_KEY: &str = "formatVersion";

/// Collections whose entries come from the player rather than the
/// template. Their snapshot contents are taken as a whole.
const OPEN_COLLECTIONS: &[&str] = &["referrals", "helpers", "appliedEffects"];

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("snapshot is not a JSON object")]
    NotAnObject,
}

/// Encode `state` as a versioned snapshot.
pub fn encode(state: &GameState) -> Result<Value, SnapshotError> {
    let mut value = serde_json::to_value(state)?;
    let obj = value.as_object_mut().ok_or(SnapshotError::NotAnObject)?;
    obj.insert(VERSION_KEY.to_string(), Value::from(FORMAT_VERSION));
    Ok(value)
}

/// Result of restoring a snapshot.
#[derive(Debug)]
pub struct Restored {
    pub state: GameState,
    /// The merged document failed to decode and the template was used.
    pub fell_back: bool,
}

/// Merge `snapshot` onto `template` defaults and decode it.
///
/// The result is normalized (values clamped, `purchased` implies
/// `unlocked`) but unlock flags are not yet re-derived.
pub fn restore(template: &Template, snapshot: &Value) -> Result<Restored, SnapshotError> {
    let snap = snapshot.as_object().ok_or(SnapshotError::NotAnObject)?;
    if let Some(version) = snap.get(VERSION_KEY).and_then(Value::as_u64)
        && version > FORMAT_VERSION
    {
        warn!(version, supported = FORMAT_VERSION, "snapshot from a newer build");
    }

    let fresh = template.instantiate();
    let Value::Object(defaults) = serde_json::to_value(&fresh)? else {
        return Err(SnapshotError::NotAnObject);
    };
    let mut merged = merge_top(&defaults, snap);
    heal(&mut merged, &defaults);
    let (mut state, fell_back) = match serde_json::from_value::<GameState>(Value::Object(merged)) {
        Ok(state) => (state, false),
        Err(err) => {
            warn!(%err, "snapshot did not decode after merge; using template");
            (fresh, true)
        }
    };
    normalize(&mut state);
    Ok(Restored { state, fell_back })
}

fn merge_top(defaults: &Map<String, Value>, snap: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, default) in defaults {
        let value = match snap.get(key) {
            None => default.clone(),
            Some(saved) if OPEN_COLLECTIONS.contains(&key.as_str()) => {
                if same_shape(default, saved) {
                    saved.clone()
                } else {
                    warn!(key, "ignoring mistyped snapshot field");
                    default.clone()
                }
            }
            Some(saved) => merge(key, default, saved),
        };
        out.insert(key.clone(), value);
    }
    out
}

/// Key-by-key merge. Only keys present in `default` survive; a saved value
/// of a different JSON type is replaced by the default.
fn merge(path: &str, default: &Value, saved: &Value) -> Value {
    match (default, saved) {
        (Value::Object(d), Value::Object(s)) => {
            let mut out = Map::new();
            for (key, dv) in d {
                let v = match s.get(key) {
                    Some(sv) => merge(key, dv, sv),
                    None => dv.clone(),
                };
                out.insert(key.clone(), v);
            }
            Value::Object(out)
        }
        _ if same_shape(default, saved) => saved.clone(),
        // Unset optional fields accept any saved value; decoding checks it.
        (Value::Null, _) => saved.clone(),
        _ => {
            warn!(path, "ignoring mistyped snapshot field");
            default.clone()
        }
    }
}

/// Decode-check every top-level field and map entry of a merged document.
fn heal(doc: &mut Map<String, Value>, defaults: &Map<String, Value>) {
    heal_entries::<Resource>(doc, defaults, "resources");
    heal_entries::<Building>(doc, defaults, "buildings");
    heal_entries::<Upgrade>(doc, defaults, "upgrades");
    heal_entries::<Counter>(doc, defaults, "counters");
    heal_entries::<Referral>(doc, defaults, "referrals");
    heal_entries::<HelperAssignment>(doc, defaults, "helpers");
    heal_field::<BTreeMap<FeatureId, bool>>(doc, defaults, "features");
    heal_field::<MiningParams>(doc, defaults, "mining");
    heal_field::<f64>(doc, defaults, "prestigePoints");
    heal_field::<Phase>(doc, defaults, "phase");
    heal_field::<Option<Millis>>(doc, defaults, "lastUpdate");
    heal_field::<BTreeSet<UpgradeId>>(doc, defaults, "appliedEffects");
}

/// Replace each entry of the `key` map that does not decode as `T` with the
/// template's entry, or drop it when the template has none.
fn heal_entries<T: DeserializeOwned>(
    doc: &mut Map<String, Value>,
    defaults: &Map<String, Value>,
    key: &str,
) {
    let Some(Value::Object(entries)) = doc.get_mut(key) else {
        return;
    };
    let bad: Vec<String> = entries
        .iter()
        .filter(|(_, entry)| serde_json::from_value::<T>((*entry).clone()).is_err())
        .map(|(id, _)| id.clone())
        .collect();
    for id in bad {
        match defaults.get(key).and_then(|d| d.get(id.as_str())) {
            Some(default) => {
                warn!(key, id, "snapshot entry did not decode; using template");
                entries.insert(id, default.clone());
            }
            None => {
                warn!(key, id, "dropping undecodable snapshot entry");
                entries.remove(&id);
            }
        }
    }
}

fn heal_field<T: DeserializeOwned>(
    doc: &mut Map<String, Value>,
    defaults: &Map<String, Value>,
    key: &str,
) {
    let decodes = doc
        .get(key)
        .is_none_or(|v| serde_json::from_value::<T>(v.clone()).is_ok());
    if decodes {
        return;
    }
    warn!(key, "snapshot field did not decode; using template");
    match defaults.get(key) {
        Some(default) => {
            doc.insert(key.to_string(), default.clone());
        }
        None => {
            doc.remove(key);
        }
    }
}

fn same_shape(a: &Value, b: &Value) -> bool {
    match (a, b) {
        // Unbounded capacities encode as null.
        (Value::Number(_) | Value::Null, Value::Number(_) | Value::Null) => true,
        (Value::Bool(_), Value::Bool(_))
        | (Value::String(_), Value::String(_))
        | (Value::Array(_), Value::Array(_))
        | (Value::Object(_), Value::Object(_)) => true,
        _ => false,
    }
}

/// Repair invariants a saved document may violate.
pub fn normalize(state: &mut GameState) {
    state.clamp_all();
    for u in state.upgrades.values_mut() {
        if u.purchased {
            u.unlocked = true;
        }
    }
    for c in state.counters.values_mut() {
        if !c.value.is_finite() || c.value < 0.0 {
            c.value = 0.0;
        }
    }
    if !state.prestige_points.is_finite() || state.prestige_points < 0.0 {
        state.prestige_points = 0.0;
    }
    state.mining.commission = if state.mining.commission.is_finite() {
        state.mining.commission.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let buildings = &state.buildings;
    state
        .helpers
        .retain(|_, h| buildings.contains_key(&h.building_id));
}
