//! Resolution of a store identifier to a handle on that store's database
use std::sync::Arc;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::{Error as FailureError, Fail};
use r2d2::{ManageConnection, Pool};

use config::TenantPoolSettings;
use errors::Error;
use models::{Store, StoreDatabase, StoreId, StoreIdentifier};
use repos::ReposFactory;
use tenants::{CredentialCipher, TenantConnectionFactory, TenantHandle, TenantPoolCache};

type TenantManager<CF> = <CF as TenantConnectionFactory>::Manager;

pub struct TenantResolver<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    CF: TenantConnectionFactory,
> {
    db_pool: Pool<M>,
    repo_factory: F,
    connection_factory: CF,
    cipher: Arc<CredentialCipher>,
    settings: TenantPoolSettings,
    cache: TenantPoolCache<TenantManager<CF>>,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        CF: TenantConnectionFactory,
    > Clone for TenantResolver<T, M, F, CF>
{
    fn clone(&self) -> Self {
        Self {
            db_pool: self.db_pool.clone(),
            repo_factory: self.repo_factory.clone(),
            connection_factory: self.connection_factory.clone(),
            cipher: self.cipher.clone(),
            settings: self.settings,
            cache: self.cache.clone(),
        }
    }
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        CF: TenantConnectionFactory,
    > TenantResolver<T, M, F, CF>
{
    pub fn new(db_pool: Pool<M>, repo_factory: F, connection_factory: CF, cipher: Arc<CredentialCipher>, settings: TenantPoolSettings) -> Self {
        Self {
            db_pool,
            repo_factory,
            connection_factory,
            cipher,
            settings,
            cache: TenantPoolCache::default(),
        }
    }

    /// Handle on the database of the identified store. Blocks on the master database
    /// and, for stores without a cached pool, on the store database.
    pub fn resolve(&self, identifier: &StoreIdentifier) -> Result<TenantHandle<TenantManager<CF>>, FailureError> {
        let (store, credentials) = self.lookup(identifier)?;

        if let Some(pool) = self.cache.get(store.id, credentials.credentials_version) {
            debug!("Reusing database pool of store {} ({}).", store.slug, store.id);
            return Ok(TenantHandle::new(store, pool));
        }

        let params = self.cipher.decrypt(store.id, &credentials.encrypted_credentials)?;
        let manager = self.connection_factory.manager(&params);
        let pool = Pool::builder()
            .max_size(self.settings.max_size)
            .min_idle(Some(self.settings.min_idle))
            .connection_timeout(self.settings.connection_timeout)
            .idle_timeout(Some(self.settings.idle_timeout))
            .build(manager)
            .and_then(|pool| pool.get().map(|_| pool))
            .map_err(|e| {
                e.context(format!(
                    "Database {} of store {} is unreachable",
                    params.database, store.slug
                )).context(Error::ConnectionTimeout)
            })?;

        let pool = self.cache.insert(store.id, credentials.credentials_version, pool);
        info!(
            "Opened database pool for store {} ({}), credentials version {}.",
            store.slug, store.id, credentials.credentials_version
        );
        Ok(TenantHandle::new(store, pool))
    }

    fn lookup(&self, identifier: &StoreIdentifier) -> Result<(Store, StoreDatabase), FailureError> {
        let conn = self.db_pool.get().map_err(|e| e.context(Error::Connection))?;

        let store = self
            .repo_factory
            .create_stores_repo(&*conn)
            .find_by_identifier(identifier)?
            .ok_or_else(|| format_err!("Store {} is not registered", identifier).context(Error::StoreNotFound))?;

        if !store.status.has_database() {
            if store.status.revokes_access() && self.cache.remove(store.id) {
                info!("Dropped database pool of {} store {}.", store.status, store.slug);
            }
            return Err(format_err!("Store {} is {}", store.slug, store.status)
                .context(Error::StoreNotProvisioned)
                .into());
        }

        let credentials = self
            .repo_factory
            .create_store_databases_repo(&*conn)
            .find_by_store(store.id)?
            .ok_or_else(|| format_err!("Store {} has no database credentials", store.slug).context(Error::StoreNotProvisioned))?;

        Ok((store, credentials))
    }

    /// Drops the cached pool of the store, returns whether there was one
    pub fn invalidate(&self, store_id: StoreId) -> bool {
        let removed = self.cache.remove(store_id);
        if removed {
            info!("Dropped database pool of store {}.", store_id);
        }
        removed
    }

    /// Drops every cached pool
    pub fn clear(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        info!("Dropped {} store database pools.", dropped);
    }

    pub fn cached_pools(&self) -> usize {
        self.cache.len()
    }
}
