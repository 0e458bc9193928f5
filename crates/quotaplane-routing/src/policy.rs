//! Named scoring policies for account selection.

use serde::{Deserialize, Serialize};

/// Scoring scheme applied when ranking candidate accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutePolicy {
    /// Blend of headroom, priority, and throttle state.
    #[default]
    Balanced,
    /// Most remaining headroom wins.
    LowestUsage,
    /// Headroom ordering with absolute dimension remaining as tiebreak.
    HighestQuota,
    /// Operator-assigned priority wins.
    Priority,
    /// Rotate across the sorted candidate set.
    RoundRobin,
    /// Score proportional to each candidate's share of pool headroom.
    Weighted,
}

impl RoutePolicy {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::LowestUsage => "lowest_usage",
            Self::HighestQuota => "highest_quota",
            Self::Priority => "priority",
            Self::RoundRobin => "round_robin",
            Self::Weighted => "weighted",
        }
    }
}

impl std::fmt::Display for RoutePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RoutePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(Self::Balanced),
            "lowest_usage" => Ok(Self::LowestUsage),
            "highest_quota" => Ok(Self::HighestQuota),
            "priority" => Ok(Self::Priority),
            "round_robin" => Ok(Self::RoundRobin),
            "weighted" => Ok(Self::Weighted),
            other => Err(format!("unknown policy: {other}")),
        }
    }
}

/// Weights of the balanced-policy blend.
pub(crate) const BALANCED_REMAINING_WEIGHT: f64 = 0.5;
pub(crate) const BALANCED_PRIORITY_WEIGHT: f64 = 0.3;
pub(crate) const BALANCED_THROTTLE_WEIGHT: f64 = 0.2;

/// Map `value` into [0, 1] relative to the candidate set's span.
///
/// A degenerate span (all candidates equal) normalizes to 1.0 so the factor
/// drops out of the blend instead of zeroing it.
pub(crate) fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if max <= min {
        1.0
    } else {
        ((value - min) / (max - min)).clamp(0.0, 1.0)
    }
}
