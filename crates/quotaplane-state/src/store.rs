//! State store trait and the canonical in-memory implementation.
//!
//! The store owns every entity instance. Reads hand back deep copies and
//! snapshot maps that callers may iterate without holding locks; writes
//! replace whole records. Cross-family atomicity is deliberately not
//! provided here; the reservation manager serializes compound updates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use quotaplane_common::{AccountId, QuotaPlaneError, QuotaPlaneResult, ReservationId};

use crate::account::Account;
use crate::quota::QuotaInfo;
use crate::reservation::Reservation;

/// Pluggable persistence seam for the control plane.
///
/// A persistent implementation must serialize each entity as a
/// self-describing record and replay reservations through the same state
/// machine on recovery, expiring any still-active reservation whose
/// `expires_at` has passed.
#[trait_variant::make(StateStore: Send)]
pub trait LocalStateStore {
    /// Insert or replace an account.
    async fn set_account(&self, account: Account) -> QuotaPlaneResult<()>;

    /// Fetch a deep copy of an account.
    async fn get_account(&self, id: &AccountId) -> QuotaPlaneResult<Option<Account>>;

    /// Snapshot all accounts.
    async fn list_accounts(&self) -> QuotaPlaneResult<HashMap<AccountId, Account>>;

    /// Insert or replace a quota record.
    async fn set_quota(&self, quota: QuotaInfo) -> QuotaPlaneResult<()>;

    /// Fetch a deep copy of a quota record.
    async fn get_quota(&self, id: &AccountId) -> QuotaPlaneResult<Option<QuotaInfo>>;

    /// Snapshot all quota records.
    async fn list_quotas(&self) -> QuotaPlaneResult<HashMap<AccountId, QuotaInfo>>;

    /// Insert or replace a reservation.
    async fn set_reservation(&self, reservation: Reservation) -> QuotaPlaneResult<()>;

    /// Fetch a deep copy of a reservation.
    async fn get_reservation(&self, id: &ReservationId)
        -> QuotaPlaneResult<Option<Reservation>>;

    /// Snapshot all reservations.
    async fn list_reservations(&self) -> QuotaPlaneResult<HashMap<ReservationId, Reservation>>;

    /// Close the store; every later operation fails with `Closed`.
    async fn close(&self) -> QuotaPlaneResult<()>;
}

/// In-memory state store.
///
/// One read-write lock per entity family: parallel readers, exclusive
/// writers, no lock shared across families.
#[derive(Debug)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
    quotas: RwLock<HashMap<AccountId, QuotaInfo>>,
    reservations: RwLock<HashMap<ReservationId, Reservation>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            quotas: RwLock::new(HashMap::new()),
            reservations: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> QuotaPlaneResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QuotaPlaneError::closed("store"));
        }
        Ok(())
    }

    fn lock_err<E: std::fmt::Display>(err: E) -> QuotaPlaneError {
        QuotaPlaneError::Internal(format!("store lock poisoned: {err}"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStore {
    async fn set_account(&self, account: Account) -> QuotaPlaneResult<()> {
        self.ensure_open()?;
        let mut accounts = self.accounts.write().map_err(Self::lock_err)?;
        accounts.insert(account.id.clone(), account);
        Ok(())
    }

    async fn get_account(&self, id: &AccountId) -> QuotaPlaneResult<Option<Account>> {
        self.ensure_open()?;
        let accounts = self.accounts.read().map_err(Self::lock_err)?;
        Ok(accounts.get(id).cloned())
    }

    async fn list_accounts(&self) -> QuotaPlaneResult<HashMap<AccountId, Account>> {
        self.ensure_open()?;
        let accounts = self.accounts.read().map_err(Self::lock_err)?;
        Ok(accounts.clone())
    }

    async fn set_quota(&self, quota: QuotaInfo) -> QuotaPlaneResult<()> {
        self.ensure_open()?;
        let mut quotas = self.quotas.write().map_err(Self::lock_err)?;
        quotas.insert(quota.account_id.clone(), quota);
        Ok(())
    }

    async fn get_quota(&self, id: &AccountId) -> QuotaPlaneResult<Option<QuotaInfo>> {
        self.ensure_open()?;
        let quotas = self.quotas.read().map_err(Self::lock_err)?;
        Ok(quotas.get(id).cloned())
    }

    async fn list_quotas(&self) -> QuotaPlaneResult<HashMap<AccountId, QuotaInfo>> {
        self.ensure_open()?;
        let quotas = self.quotas.read().map_err(Self::lock_err)?;
        Ok(quotas.clone())
    }

    async fn set_reservation(&self, reservation: Reservation) -> QuotaPlaneResult<()> {
        self.ensure_open()?;
        let mut reservations = self.reservations.write().map_err(Self::lock_err)?;
        reservations.insert(reservation.id, reservation);
        Ok(())
    }

    async fn get_reservation(
        &self,
        id: &ReservationId,
    ) -> QuotaPlaneResult<Option<Reservation>> {
        self.ensure_open()?;
        let reservations = self.reservations.read().map_err(Self::lock_err)?;
        Ok(reservations.get(id).cloned())
    }

    async fn list_reservations(
        &self,
    ) -> QuotaPlaneResult<HashMap<ReservationId, Reservation>> {
        self.ensure_open()?;
        let reservations = self.reservations.read().map_err(Self::lock_err)?;
        Ok(reservations.clone())
    }

    async fn close(&self) -> QuotaPlaneResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
