//! Per-session runtime context.
//!
//! Everything that would otherwise be process-wide lives here: the save
//! guard, the shown-once offline notice, shortage tracking, the condition
//! cache and the event log. Two sessions never share anything, so tests can
//! run many side by side.

use crate::config::EngineConfig;
use crate::event::{Event, EventKind, EventLog, NotificationSink, NullSink};
use crate::id::{Millis, ResourceId};
use crate::persist::SaveScheduler;
use crate::unlock::UnlockEngine;
use std::collections::BTreeSet;

pub struct Session {
    sink: Box<dyn NotificationSink>,
    pub log: EventLog,
    pub unlocks: UnlockEngine,
    /// Resources currently in shortage.
    pub shortages: BTreeSet<ResourceId>,
    pub saves: SaveScheduler,
    offline_notice_shown: bool,
    /// Latest host clock reading seen by the session.
    pub now: Millis,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("log", &self.log)
            .field("shortages", &self.shortages)
            .field("saves", &self.saves)
            .field("offline_notice_shown", &self.offline_notice_shown)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(config: &EngineConfig, sink: Box<dyn NotificationSink>) -> Self {
        Self {
            sink,
            log: EventLog::new(config.event_log_capacity),
            unlocks: UnlockEngine::new(),
            shortages: BTreeSet::new(),
            saves: SaveScheduler::new(config.save.min_interval_ms, config.save.timeout_ms),
            offline_notice_shown: false,
            now: 0,
        }
    }

    /// A session whose notifications go nowhere.
    pub fn detached(config: &EngineConfig) -> Self {
        Self::new(config, Box::new(NullSink))
    }

    /// Record an event and forward its notification, if any.
    ///
    /// Save failures and timeouts notify once; the notice re-arms after the
    /// next successful save.
    pub fn emit(&mut self, event: Event) {
        match event.kind() {
            EventKind::SaveFailed | EventKind::SaveTimedOut => {
                if !self.offline_notice_shown {
                    self.offline_notice_shown = true;
                    self.notify(&event);
                }
            }
            EventKind::SaveSucceeded => self.offline_notice_shown = false,
            _ => self.notify(&event),
        }
        self.log.push(event);
    }

    pub fn emit_all(&mut self, events: impl IntoIterator<Item = Event>) {
        for e in events {
            self.emit(e);
        }
    }

    pub fn offline(&self) -> bool {
        self.offline_notice_shown
    }

    fn notify(&mut self, event: &Event) {
        if let Some((message, severity)) = event.notification() {
            self.sink.emit(&message, severity);
        }
    }
}
