//! Tenants Services, hands out handles on store databases
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Error as FailureError;
use r2d2::ManageConnection;

use super::types::{Service, ServiceFuture};
use models::{StoreId, StoreIdentifier};
use repos::ReposFactory;
use tenants::{TenantConnectionFactory, TenantHandle};

pub trait TenantsService<M: ManageConnection> {
    /// Resolves the store and returns a handle on its database
    fn resolve_tenant(&self, identifier: StoreIdentifier) -> ServiceFuture<TenantHandle<M>>;
    /// Drops the cached pool of the store database
    fn invalidate_tenant(&self, store_id: StoreId) -> bool;
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        CF: TenantConnectionFactory,
    > TenantsService<CF::Manager> for Service<T, M, F, CF>
{
    fn resolve_tenant(&self, identifier: StoreIdentifier) -> ServiceFuture<TenantHandle<CF::Manager>> {
        let tenants = self.static_context.tenants.clone();

        Box::new(self.static_context.cpu_pool.spawn_fn(move || {
            tenants
                .resolve(&identifier)
                .map_err(|e: FailureError| e.context("Service tenants, resolve_tenant endpoint error occurred.").into())
        }))
    }

    fn invalidate_tenant(&self, store_id: StoreId) -> bool {
        self.static_context.tenants.invalidate(store_id)
    }
}
