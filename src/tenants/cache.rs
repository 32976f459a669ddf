use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use r2d2::{ManageConnection, Pool};

use models::StoreId;

struct CachedPool<M: ManageConnection> {
    credentials_version: i32,
    pool: Pool<M>,
}

/// Store database pools by store, each valid for one version of the store credentials
pub struct TenantPoolCache<M: ManageConnection> {
    inner: Arc<Mutex<HashMap<StoreId, CachedPool<M>>>>,
}

impl<M: ManageConnection> Clone for TenantPoolCache<M> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<M: ManageConnection> Default for TenantPoolCache<M> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<M: ManageConnection> TenantPoolCache<M> {
    // Pools stay usable after a panic elsewhere, so a poisoned lock is taken over
    fn lock(&self) -> MutexGuard<HashMap<StoreId, CachedPool<M>>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pool of the store built from `credentials_version`
    pub fn get(&self, store_id: StoreId, credentials_version: i32) -> Option<Pool<M>> {
        match self.lock().get(&store_id) {
            Some(cached) if cached.credentials_version == credentials_version => Some(cached.pool.clone()),
            _ => None,
        }
    }

    /// Caches the pool unless one for the same credentials got there first; returns the cached pool
    pub fn insert(&self, store_id: StoreId, credentials_version: i32, pool: Pool<M>) -> Pool<M> {
        let mut pools = self.lock();
        if let Some(cached) = pools.get(&store_id) {
            if cached.credentials_version == credentials_version {
                return cached.pool.clone();
            }
        }
        pools.insert(
            store_id,
            CachedPool {
                credentials_version,
                pool: pool.clone(),
            },
        );
        pool
    }

    pub fn remove(&self, store_id: StoreId) -> bool {
        self.lock().remove(&store_id).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
