//! Common test fixtures.

use std::sync::Arc;

use quotaplane_common::Provider;
use quotaplane_state::{Account, MemoryStore, QuotaInfo, StateStore};
use uuid::Uuid;

/// Test fixture owning a store that scenarios seed and inspect.
pub struct TestFixture {
    pub store: Arc<MemoryStore>,
}

impl TestFixture {
    /// Create a fixture with an empty store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// Create the standard two-account openai pool used by the routing
    /// scenarios: `a1` at 80% headroom, `a2` at 60%.
    pub async fn standard_pool() -> Self {
        let fixture = Self::new();
        fixture.seed_account("a1", Provider::OpenAi, 0, 80.0).await;
        fixture.seed_account("a2", Provider::OpenAi, 0, 60.0).await;
        fixture
    }

    /// Seed an enabled account together with its quota record.
    pub async fn seed_account(
        &self,
        id: &str,
        provider: Provider,
        priority: i32,
        effective_pct: f64,
    ) {
        self.store
            .set_account(Account::new(id, provider).with_priority(priority))
            .await
            .unwrap();
        self.store
            .set_quota(QuotaInfo::new(id, provider, effective_pct))
            .await
            .unwrap();
    }

    /// Fresh correlation id for reservation calls.
    pub fn correlation_id() -> String {
        Uuid::new_v4().to_string()
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}
