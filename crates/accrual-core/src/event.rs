//! Events, the notification sink and the session event log.
//!
//! The reducer, tick loop and save scheduler report what happened as
//! [`Event`]s. The session keeps the most recent ones in an [`EventLog`]
//! ring buffer and forwards user-facing ones to the host's
//! [`NotificationSink`]. The core never queries the host back.

use crate::id::*;
use crate::unlock::UnlockKind;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Event types
// ---------------------------------------------------------------------------

/// Why an action was turned into a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnknownId,
    Locked,
    Unaffordable,
    AlreadyPurchased,
    NotEnoughHeld,
    BelowBatch,
    InvalidPayload,
    AlreadyRunning,
    MissingIdentity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // -- Unlocking --
    Unlocked {
        kind: UnlockKind,
        id: String,
    },
    Relocked {
        id: ResourceId,
    },

    // -- Shortages --
    ShortageBegan {
        resource: ResourceId,
    },
    ShortageEnded {
        resource: ResourceId,
    },

    // -- Actions --
    BuildingPurchased {
        id: BuildingId,
        count: u32,
    },
    BuildingSold {
        id: BuildingId,
        count: u32,
    },
    UpgradePurchased {
        id: UpgradeId,
    },
    Gathered {
        resource: ResourceId,
        amount: f64,
    },
    KnowledgeApplied {
        batches: u32,
        gained: f64,
    },
    Mined {
        reward: f64,
    },
    Exchanged {
        sold: f64,
        received: f64,
    },
    Prestiged {
        gained: f64,
        total: f64,
    },
    ReferralRecorded {
        id: ReferralId,
    },
    ReferralActivated {
        id: ReferralId,
    },
    HelperHired {
        id: AssignmentId,
    },
    HelperResponded {
        id: AssignmentId,
        accepted: bool,
    },
    HelperDismissed {
        id: AssignmentId,
    },
    SocialSynced,
    ActionRejected {
        action: &'static str,
        reason: RejectReason,
    },

    // -- Lifecycle --
    GameStarted {
        at: Millis,
    },
    GameLoaded,
    GameReset,

    // -- Persistence --
    SaveSucceeded,
    SaveFailed {
        reason: String,
    },
    SaveTimedOut,
}

/// Discriminant tag for event types, used for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Unlocked,
    Relocked,
    ShortageBegan,
    ShortageEnded,
    BuildingPurchased,
    BuildingSold,
    UpgradePurchased,
    Gathered,
    KnowledgeApplied,
    Mined,
    Exchanged,
    Prestiged,
    ReferralRecorded,
    ReferralActivated,
    HelperHired,
    HelperResponded,
    HelperDismissed,
    SocialSynced,
    ActionRejected,
    GameStarted,
    GameLoaded,
    GameReset,
    SaveSucceeded,
    SaveFailed,
    SaveTimedOut,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Unlocked { .. } => EventKind::Unlocked,
            Event::Relocked { .. } => EventKind::Relocked,
            Event::ShortageBegan { .. } => EventKind::ShortageBegan,
            Event::ShortageEnded { .. } => EventKind::ShortageEnded,
            Event::BuildingPurchased { .. } => EventKind::BuildingPurchased,
            Event::BuildingSold { .. } => EventKind::BuildingSold,
            Event::UpgradePurchased { .. } => EventKind::UpgradePurchased,
            Event::Gathered { .. } => EventKind::Gathered,
            Event::KnowledgeApplied { .. } => EventKind::KnowledgeApplied,
            Event::Mined { .. } => EventKind::Mined,
            Event::Exchanged { .. } => EventKind::Exchanged,
            Event::Prestiged { .. } => EventKind::Prestiged,
            Event::ReferralRecorded { .. } => EventKind::ReferralRecorded,
            Event::ReferralActivated { .. } => EventKind::ReferralActivated,
            Event::HelperHired { .. } => EventKind::HelperHired,
            Event::HelperResponded { .. } => EventKind::HelperResponded,
            Event::HelperDismissed { .. } => EventKind::HelperDismissed,
            Event::SocialSynced => EventKind::SocialSynced,
            Event::ActionRejected { .. } => EventKind::ActionRejected,
            Event::GameStarted { .. } => EventKind::GameStarted,
            Event::GameLoaded => EventKind::GameLoaded,
            Event::GameReset => EventKind::GameReset,
            Event::SaveSucceeded => EventKind::SaveSucceeded,
            Event::SaveFailed { .. } => EventKind::SaveFailed,
            Event::SaveTimedOut => EventKind::SaveTimedOut,
        }
    }

    /// The user-facing message for this event, if it has one.
    pub fn notification(&self) -> Option<(String, Severity)> {
        let note = match self {
            Event::Unlocked { kind, id } => (format!("unlocked {kind:?}: {id}"), Severity::Success),
            Event::ShortageBegan { resource } => (format!("shortage of {resource}"), Severity::Warning),
            Event::ShortageEnded { resource } => (format!("{resource} supply restored"), Severity::Info),
            Event::ActionRejected {
                action,
                reason: RejectReason::Unaffordable,
            } => (format!("not enough resources for {action}"), Severity::Warning),
            Event::Prestiged { gained, .. } => (format!("prestige: +{gained} points"), Severity::Success),
            Event::SaveFailed { .. } | Event::SaveTimedOut => (
                "progress could not be saved; playing offline".to_string(),
                Severity::Warning,
            ),
            _ => return None,
        };
        Some(note)
    }
}

// ---------------------------------------------------------------------------
// Notification sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// One-directional channel to the host's notification display.
pub trait NotificationSink {
    fn emit(&mut self, message: &str, severity: Severity);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn emit(&mut self, _message: &str, _severity: Severity) {}
}

/// Records notifications. Clones share the same record, so a test can keep
/// one handle and give the other to a session.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    seen: Arc<Mutex<Vec<(String, Severity)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, Severity)> {
        self.seen.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl NotificationSink for RecordingSink {
    fn emit(&mut self, message: &str, severity: Severity) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push((message.to_string(), severity));
        }
    }
}

// ---------------------------------------------------------------------------
// Event log
// ---------------------------------------------------------------------------

/// Bounded event log. When full, the oldest event is dropped.
#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<Event>,
    capacity: usize,
    total_written: u64,
}

impl EventLog {
    /// A capacity of 0 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            total_written: 0,
        }
    }

    pub fn push(&mut self, event: Event) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
        self.total_written += 1;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total events written since creation (including dropped).
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    pub fn dropped_count(&self) -> u64 {
        self.total_written.saturating_sub(self.capacity as u64)
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Event> {
        self.events.iter()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.back()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
