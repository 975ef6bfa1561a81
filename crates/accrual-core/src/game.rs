//! The host-facing facade.
//!
//! [`Game`] owns the shared [`Rules`], one [`Session`] and the current
//! [`GameState`], and routes host calls (actions, clock ticks, save
//! requests) to the reducer, tick loop and save scheduler. Persistence and
//! identity are passed in; the facade never blocks on them and never lets
//! their failures reach the simulation.

use crate::action::{reduce, Action};
use crate::event::{Event, NotificationSink};
use crate::id::{Millis, ReferralId};
use crate::persist::{Identity, PersistError, Persistence, SaveDeferred};
use crate::session::Session;
use crate::sim::StateHash;
use crate::snapshot::{self, SnapshotError};
use crate::state::GameState;
use crate::template::Rules;
use crate::tick::{self, TickReport};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Game {
    rules: Arc<Rules>,
    session: Session,
    state: GameState,
    identity: Option<Box<dyn Identity>>,
}

impl Game {
    pub fn new(rules: Arc<Rules>, sink: Box<dyn NotificationSink>) -> Self {
        let session = Session::new(&rules.config, sink);
        let state = rules.template.instantiate();
        Self {
            rules,
            session,
            state,
            identity: None,
        }
    }

    pub fn with_identity(mut self, identity: Box<dyn Identity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Apply an action. Returns whether it was accepted.
    pub fn dispatch(&mut self, action: Action) -> bool {
        let action = match action {
            Action::RecordReferral { id, referrer_id: None } => self.with_referrer(id),
            other => other,
        };
        let next = reduce(&self.rules, &mut self.session, &self.state, &action);
        let accepted = next.revision != self.state.revision;
        self.state = next;
        accepted
    }

    /// Decode and apply a JSON action. Undecodable input is ignored.
    pub fn dispatch_json(&mut self, value: &Value) -> bool {
        match Action::from_json(value) {
            Some(action) => self.dispatch(action),
            None => false,
        }
    }

    fn with_referrer(&self, id: ReferralId) -> Action {
        let referrer_id = self.identity.as_ref().and_then(|i| i.user_id());
        if referrer_id.is_none() {
            warn!(referral = %id, "no identity available; referral not recorded");
        }
        Action::RecordReferral { id, referrer_id }
    }

    pub fn start(&mut self, now: Millis) -> bool {
        self.dispatch(Action::Start { now })
    }

    pub fn tick(&mut self, now: Millis) -> TickReport {
        tick::advance(&self.rules, &mut self.session, &mut self.state, now)
    }

    pub fn snapshot(&self) -> Result<Value, SnapshotError> {
        snapshot::encode(&self.state)
    }

    pub fn state_hash(&self) -> u64 {
        StateHash::of(&self.state)
    }

    // -----------------------------------------------------------------------
    // Saving
    // -----------------------------------------------------------------------

    /// Start an asynchronous save: returns the snapshot for the host to
    /// write, or `None` when a save is running or throttled. The host
    /// reports back through [`complete_save`](Self::complete_save).
    pub fn request_save(&mut self, now: Millis) -> Option<Value> {
        if let Err(deferred) = self.session.saves.begin(now) {
            match deferred {
                SaveDeferred::InProgress => info!("save already in progress"),
                SaveDeferred::Throttled { retry_in } => info!(retry_in, "save throttled"),
            }
            return None;
        }
        match self.snapshot() {
            Ok(snap) => Some(snap),
            Err(err) => {
                self.session.saves.finish(now, false);
                self.session.emit(Event::SaveFailed {
                    reason: err.to_string(),
                });
                None
            }
        }
    }

    /// Report the outcome of a save handed out by `request_save`.
    pub fn complete_save(&mut self, now: Millis, result: Result<(), PersistError>) {
        if !self.session.saves.finish(now, result.is_ok()) {
            warn!("save completed after it was abandoned");
            return;
        }
        match result {
            Ok(()) => self.session.emit(Event::SaveSucceeded),
            Err(err) => {
                warn!(%err, "save failed; continuing offline");
                self.session.emit(Event::SaveFailed {
                    reason: err.to_string(),
                });
            }
        }
    }

    /// Abandon a save that has run past the timeout.
    pub fn poll_save_timeout(&mut self, now: Millis) -> bool {
        if !self.session.saves.expire(now) {
            return false;
        }
        warn!(timeout_ms = self.rules.config.save.timeout_ms, "save timed out; continuing offline");
        self.session.emit(Event::SaveTimedOut);
        true
    }

    /// Save synchronously through `store`, subject to the same guard and
    /// throttle as asynchronous saves.
    pub fn save_now(&mut self, store: &mut dyn Persistence, now: Millis) -> Result<(), PersistError> {
        let snap = self
            .request_save(now)
            .ok_or_else(|| PersistError::Save("save deferred".into()))?;
        let result = store.save(&snap);
        self.complete_save(now, result.clone());
        result
    }

    /// Load from `store`. Returns whether a snapshot was applied; failures
    /// leave the current state in place.
    pub fn load_from(&mut self, store: &mut dyn Persistence) -> bool {
        match store.load() {
            Ok(Some(snapshot)) => self.dispatch(Action::Load { snapshot }),
            Ok(None) => false,
            Err(err) => {
                warn!(%err, "load failed; keeping current state");
                false
            }
        }
    }

    pub fn clear_save(&mut self, store: &mut dyn Persistence) -> Result<(), PersistError> {
        store.clear().inspect_err(|err| warn!(%err, "clearing save failed"))
    }
}
