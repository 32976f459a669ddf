use std::fmt;

use failure::{Error as FailureError, Fail};
use r2d2::{ManageConnection, Pool, PooledConnection, State};

use errors::Error;
use models::{Store, StoreId};

/// Access to the database of exactly one store.
///
/// Only the tenant resolver hands these out, so holding one means the store
/// was found, has a provisioned database and its credentials decrypted.
pub struct TenantHandle<M: ManageConnection> {
    store: Store,
    pool: Pool<M>,
}

impl<M: ManageConnection> Clone for TenantHandle<M> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            pool: self.pool.clone(),
        }
    }
}

// The pool manager holds the decrypted credentials, only the store is printed
impl<M: ManageConnection> fmt::Debug for TenantHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TenantHandle")
            .field("store_id", &self.store.id)
            .field("slug", &self.store.slug)
            .field("status", &self.store.status)
            .finish()
    }
}

impl<M: ManageConnection> TenantHandle<M> {
    pub(crate) fn new(store: Store, pool: Pool<M>) -> Self {
        Self { store, pool }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn store_id(&self) -> StoreId {
        self.store.id
    }

    /// Connection to the store database, waits at most the configured connection timeout
    pub fn connection(&self) -> Result<PooledConnection<M>, FailureError> {
        self.pool.get().map_err(|e| {
            e.context(format!("Connection to database of store {} timed out", self.store.slug))
                .context(Error::ConnectionTimeout)
                .into()
        })
    }

    pub fn pool_state(&self) -> State {
        self.pool.state()
    }
}
