use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Declares string-backed identifier newtypes.
///
/// Ids come from content files and persisted snapshots, so they stay
/// human-readable strings rather than dense integers. Each type borrows as
/// `str` so maps keyed by it can be queried with plain string slices.
macro_rules! string_id {
    ($($(#[$meta:meta])* $name:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub String);

            impl $name {
                pub fn new(id: impl Into<String>) -> Self {
                    Self(id.into())
                }

                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $name {
                fn from(id: &str) -> Self {
                    Self(id.to_string())
                }
            }

            impl From<String> for $name {
                fn from(id: String) -> Self {
                    Self(id)
                }
            }

            impl Borrow<str> for $name {
                fn borrow(&self) -> &str {
                    &self.0
                }
            }
        )*
    };
}

string_id! {
    /// Identifies a resource (knowledge, currency, electricity, ...).
    ResourceId;

    /// Identifies a repeatable building.
    BuildingId;

    /// Identifies a one-time upgrade.
    UpgradeId;

    /// Identifies a gameplay counter.
    CounterId;

    /// Identifies a feature flag that gates a whole mechanic.
    FeatureId;

    /// Identifies one unlock condition. Keys the condition cache.
    ConditionId;

    /// Identifies a referral (another player who joined through this one).
    ReferralId;

    /// Identifies a helper assignment of a referral to a building.
    AssignmentId;
}

impl AssignmentId {
    /// Deterministic id for assigning `helper` to `building`.
    pub fn for_pair(helper: &ReferralId, building: &BuildingId) -> Self {
        Self(format!("{helper}@{building}"))
    }
}

/// Milliseconds of wall-clock time, as supplied by the host.
pub type Millis = u64;
