//! Identity types for accounts and reservations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of an upstream provider account.
///
/// Account ids are assigned by the operator when the account is registered;
/// the control plane treats them as opaque strings.
///
/// # Example
/// ```
/// use quotaplane_common::AccountId;
///
/// let account = AccountId::new("openai-prod-1");
/// assert_eq!(account.as_str(), "openai-prod-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an account id from an operator-assigned name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (invalid for every operation).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Allocate a new random reservation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a reservation id from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ReservationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_ordering() {
        let a = AccountId::new("a1");
        let b = AccountId::new("a2");
        assert!(a < b);
    }

    #[test]
    fn test_account_id_serde_transparent() {
        let id = AccountId::new("anthropic-eu-2");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""anthropic-eu-2""#);
    }

    #[test]
    fn test_reservation_id_roundtrip() {
        let id = ReservationId::new();
        let parsed: ReservationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_reservation_ids_are_unique() {
        assert_ne!(ReservationId::new(), ReservationId::new());
    }
}
