//! Upstream provider accounts.

use chrono::{DateTime, Utc};
use quotaplane_common::{AccountId, Provider};
use serde::{Deserialize, Serialize};

/// An upstream provider account registered with the control plane.
///
/// Accounts are created by administrative writes and never destroyed by the
/// core; disabling an account removes it from routing without losing its
/// quota history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Operator-assigned identity.
    pub id: AccountId,
    /// Provider this credential belongs to.
    pub provider: Provider,
    /// Whether the account participates in routing.
    pub enabled: bool,
    /// Routing preference; higher wins tiebreaks.
    #[serde(default)]
    pub priority: i32,
    /// Advisory cap on simultaneous active reservations.
    #[serde(default)]
    pub concurrency_limit: u32,
    /// Informational cost per input token, in USD.
    #[serde(default)]
    pub input_cost: f64,
    /// Informational cost per output token, in USD.
    #[serde(default)]
    pub output_cost: f64,
    /// When the account was registered.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create an enabled account with default routing attributes.
    pub fn new(id: impl Into<AccountId>, provider: Provider) -> Self {
        Self {
            id: id.into(),
            provider,
            enabled: true,
            priority: 0,
            concurrency_limit: 0,
            input_cost: 0.0,
            output_cost: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Set the routing priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the advisory concurrency cap.
    pub fn with_concurrency_limit(mut self, limit: u32) -> Self {
        self.concurrency_limit = limit;
        self
    }

    /// Set informational unit costs.
    pub fn with_costs(mut self, input_cost: f64, output_cost: f64) -> Self {
        self.input_cost = input_cost;
        self.output_cost = output_cost;
        self
    }

    /// Disable the account.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
