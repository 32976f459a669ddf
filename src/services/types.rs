use std::sync::Arc;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::{Error as FailureError, Fail};
use futures::future::Future;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool, PooledConnection};

use config::Config;
use errors::Error;
use repos::ReposFactory;
use tenants::{CredentialCipher, TenantConnectionFactory, TenantResolver};

/// Service layer Future
pub type ServiceFuture<T> = Box<Future<Item = T, Error = FailureError>>;

/// Everything the services share between calls
pub struct StaticContext<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    CF: TenantConnectionFactory,
> {
    pub db_pool: Pool<M>,
    pub cpu_pool: CpuPool,
    pub config: Arc<Config>,
    pub repo_factory: F,
    pub cipher: Arc<CredentialCipher>,
    pub tenants: TenantResolver<T, M, F, CF>,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        CF: TenantConnectionFactory,
    > Clone for StaticContext<T, M, F, CF>
{
    fn clone(&self) -> Self {
        Self {
            db_pool: self.db_pool.clone(),
            cpu_pool: self.cpu_pool.clone(),
            config: self.config.clone(),
            repo_factory: self.repo_factory.clone(),
            cipher: self.cipher.clone(),
            tenants: self.tenants.clone(),
        }
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        CF: TenantConnectionFactory,
    > StaticContext<T, M, F, CF>
{
    /// Builds the context, the tenant resolver shares the master pool, repos and cipher
    pub fn new(db_pool: Pool<M>, cpu_pool: CpuPool, config: Arc<Config>, repo_factory: F, cipher: Arc<CredentialCipher>, connection_factory: CF) -> Self {
        let tenants = TenantResolver::new(
            db_pool.clone(),
            repo_factory.clone(),
            connection_factory,
            cipher.clone(),
            config.tenant_pool_settings(),
        );
        Self {
            db_pool,
            cpu_pool,
            config,
            repo_factory,
            cipher,
            tenants,
        }
    }
}

/// Service
pub struct Service<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    CF: TenantConnectionFactory,
> {
    pub static_context: StaticContext<T, M, F, CF>,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        CF: TenantConnectionFactory,
    > Service<T, M, F, CF>
{
    pub fn new(static_context: StaticContext<T, M, F, CF>) -> Self {
        Self { static_context }
    }

    /// Runs `f` with a master database connection on the cpu pool
    pub fn spawn_on_pool<R, Func>(&self, f: Func) -> ServiceFuture<R>
    where
        Func: FnOnce(PooledConnection<M>) -> Result<R, FailureError> + Send + 'static,
        R: Send + 'static,
    {
        let db_pool = self.static_context.db_pool.clone();
        let cpu_pool = self.static_context.cpu_pool.clone();
        Box::new(cpu_pool.spawn_fn(move || db_pool.get().map_err(|e| e.context(Error::Connection).into()).and_then(f)))
    }
}
