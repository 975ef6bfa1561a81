//! Accrual Core -- the simulation engine for incremental-progression games.
//!
//! Players accumulate typed resources, buy repeatable buildings and one-time
//! upgrades, and unlock new mechanics as thresholds are crossed. This crate
//! holds the state model and the pure machinery that moves it forward.
//!
//! # Two Paths, One Pipeline
//!
//! State changes arrive two ways, and both converge on the same functions:
//!
//! 1. **Actions** -- [`action::reduce`] applies a discrete command and
//!    returns the next state (or an unchanged copy if rejected).
//! 2. **Ticks** -- [`tick::advance`] applies elapsed wall-clock time.
//!
//! Each accepted action and each tick then runs
//! [`production::recalculate`] (five ordered bonus layers, recomputed from
//! scratch) and [`unlock::UnlockEngine::evaluate`] (conditions applied to a
//! fixed point).
//!
//! # Key Types
//!
//! - [`template::Template`] -- Immutable definition table, built and
//!   validated by [`template::TemplateBuilder`].
//! - [`template::Rules`] -- Template plus [`config::EngineConfig`].
//! - [`state::GameState`] -- Everything that changes during a session.
//! - [`session::Session`] -- Per-session runtime context: event log,
//!   condition cache, save guard, shortage tracking.
//! - [`game::Game`] -- Host-facing facade tying the above together.
//! - [`snapshot`] -- Versioned JSON snapshots and the template merge on load.

pub mod action;
pub mod config;
pub mod effect;
pub mod event;
pub mod game;
pub mod id;
pub mod persist;
pub mod production;
pub mod session;
pub mod sim;
pub mod snapshot;
pub mod state;
pub mod template;
pub mod tick;
pub mod unlock;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
