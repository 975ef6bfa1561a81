//! Persistence and identity collaborators, and save scheduling.
//!
//! Storage is the host's business. The core hands out an immutable JSON
//! snapshot and learns the outcome later; failures never reach the
//! simulation. [`SaveScheduler`] is the in-progress guard, throttle and
//! timeout that keep writes from overlapping.

use crate::id::Millis;
use serde_json::Value;

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum PersistError {
    #[error("save failed: {0}")]
    Save(String),
    #[error("load failed: {0}")]
    Load(String),
    #[error("clear failed: {0}")]
    Clear(String),
    #[error("timed out after {0} ms")]
    Timeout(u64),
}

/// Storage for one snapshot slot.
pub trait Persistence {
    fn save(&mut self, snapshot: &Value) -> Result<(), PersistError>;
    fn load(&mut self) -> Result<Option<Value>, PersistError>;
    fn clear(&mut self) -> Result<(), PersistError>;
}

/// Supplies the local player's stable opaque id.
pub trait Identity {
    fn user_id(&self) -> Option<String>;
}

/// A fixed identity.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub String);

impl Identity for StaticIdentity {
    fn user_id(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// In-memory slot. Can be told to fail, for exercising error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Option<Value>,
    pub fail_saves: bool,
    pub fail_loads: bool,
    pub saves: u32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Value) -> Self {
        Self {
            slot: Some(snapshot),
            ..Self::default()
        }
    }

    pub fn stored(&self) -> Option<&Value> {
        self.slot.as_ref()
    }
}

impl Persistence for MemoryStore {
    fn save(&mut self, snapshot: &Value) -> Result<(), PersistError> {
        if self.fail_saves {
            return Err(PersistError::Save("store unavailable".into()));
        }
        self.slot = Some(snapshot.clone());
        self.saves += 1;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Value>, PersistError> {
        if self.fail_loads {
            return Err(PersistError::Load("store unavailable".into()));
        }
        Ok(self.slot.clone())
    }

    fn clear(&mut self) -> Result<(), PersistError> {
        self.slot = None;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Why a save request was not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveDeferred {
    InProgress,
    Throttled { retry_in: Millis },
}

/// Save guard state, owned by the session.
#[derive(Debug, Clone, Default)]
pub struct SaveScheduler {
    started_at: Option<Millis>,
    last_success: Option<Millis>,
    min_interval: Millis,
    timeout: Millis,
}

impl SaveScheduler {
    pub fn new(min_interval: Millis, timeout: Millis) -> Self {
        Self {
            started_at: None,
            last_success: None,
            min_interval,
            timeout,
        }
    }

    pub fn in_progress(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn last_success(&self) -> Option<Millis> {
        self.last_success
    }

    /// Claim the guard for a save starting at `now`.
    pub fn begin(&mut self, now: Millis) -> Result<(), SaveDeferred> {
        if self.started_at.is_some() {
            return Err(SaveDeferred::InProgress);
        }
        if let Some(last) = self.last_success {
            let since = now.saturating_sub(last);
            if since < self.min_interval {
                return Err(SaveDeferred::Throttled {
                    retry_in: self.min_interval - since,
                });
            }
        }
        self.started_at = Some(now);
        Ok(())
    }

    /// Release the guard. Returns false when no save was in progress (for
    /// example a late completion after a timeout).
    pub fn finish(&mut self, now: Millis, ok: bool) -> bool {
        if self.started_at.take().is_none() {
            return false;
        }
        if ok {
            self.last_success = Some(now);
        }
        true
    }

    /// Release the guard if the running save exceeded the timeout.
    pub fn expire(&mut self, now: Millis) -> bool {
        match self.started_at {
            Some(start) if now.saturating_sub(start) >= self.timeout => {
                self.started_at = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_blocks_overlapping_saves() {
        let mut s = SaveScheduler::new(1_000, 5_000);
        assert!(s.begin(0).is_ok());
        assert_eq!(s.begin(10), Err(SaveDeferred::InProgress));
        assert!(s.finish(20, true));
        assert!(!s.in_progress());
    }

    #[test]
    fn throttle_counts_from_last_success() {
        let mut s = SaveScheduler::new(1_000, 5_000);
        s.begin(0).unwrap();
        s.finish(100, true);
        assert_eq!(s.begin(600), Err(SaveDeferred::Throttled { retry_in: 500 }));
        assert!(s.begin(1_100).is_ok());
    }

    #[test]
    fn failed_save_is_not_throttled() {
        let mut s = SaveScheduler::new(1_000, 5_000);
        s.begin(0).unwrap();
        s.finish(100, false);
        assert!(s.begin(200).is_ok());
    }

    #[test]
    fn timeout_releases_guard_once() {
        let mut s = SaveScheduler::new(0, 5_000);
        s.begin(0).unwrap();
        assert!(!s.expire(4_999));
        assert!(s.expire(5_000));
        assert!(!s.expire(9_000));
        // A late completion is ignored.
        assert!(!s.finish(9_500, true));
        assert_eq!(s.last_success(), None);
    }

    #[test]
    fn memory_store_round_trip_and_failure() {
        let mut store = MemoryStore::new();
        store.save(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(store.load().unwrap(), Some(serde_json::json!({"a": 1})));
        store.fail_saves = true;
        assert!(store.save(&serde_json::json!({})).is_err());
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
