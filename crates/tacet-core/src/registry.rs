//! Per-tenant store registry.
//!
//! Tenant stores are opened lazily through a provider and cached for the
//! lifetime of the process. The cache is explicit state owned by the
//! registry, not a global; reconfiguration invalidates a tenant's entry and
//! the next access reopens it.

use std::collections::HashMap;
use std::sync::Arc;

use tacet_storage::{TenantId, TenantStore};
use tokio::sync::RwLock;

use crate::error::CoreError;

/// Opens the datastore for one tenant. Implementations decide where a
/// tenant's database lives (file path, connection string, in-memory).
#[async_trait::async_trait]
pub trait TenantStoreProvider: Send + Sync {
    async fn open(&self, tenant: &TenantId) -> Result<Arc<dyn TenantStore>, CoreError>;
}

pub struct TenantRegistry {
    provider: Arc<dyn TenantStoreProvider>,
    stores: RwLock<HashMap<TenantId, Arc<dyn TenantStore>>>,
}

impl TenantRegistry {
    pub fn new(provider: Arc<dyn TenantStoreProvider>) -> Self {
        Self {
            provider,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// The tenant's store, opening it on first access.
    pub async fn get(&self, tenant: &TenantId) -> Result<Arc<dyn TenantStore>, CoreError> {
        if let Some(store) = self.stores.read().await.get(tenant) {
            return Ok(Arc::clone(store));
        }

        let store = self.provider.open(tenant).await?;

        // Two tasks may race the open; the first insert wins so both see the
        // same store instance afterwards.
        let mut stores = self.stores.write().await;
        Ok(Arc::clone(
            stores
                .entry(tenant.clone())
                .or_insert_with(|| Arc::clone(&store)),
        ))
    }

    /// Drop the cached store for a tenant. The next `get` reopens it.
    pub async fn invalidate(&self, tenant: &TenantId) {
        self.stores.write().await.remove(tenant);
    }
}
