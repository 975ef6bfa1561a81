//! Data-driven content loading for the Accrual engine.
//!
//! A content directory holds one file per table (`resources`, `buildings`,
//! `upgrades`, `unlocks`, ...) in RON, TOML or JSON. [`load_rules`] reads,
//! cross-checks and resolves them into engine [`Rules`](accrual_core::template::Rules).
//! [`standard_rules`] does the same for the content set compiled into the
//! crate.

pub mod loader;
pub mod schema;
pub mod standard;

pub use loader::{load_rules, ContentFiles, DataLoadError};
pub use standard::{standard_content, standard_rules};
