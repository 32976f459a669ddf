//! Stores Services, presents the store registry and the lifecycle of store databases
use std::time::SystemTime;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Error as FailureError;
use r2d2::ManageConnection;
use validator::Validate;

use super::types::{Service, ServiceFuture};
use errors::Error;
use models::*;
use repos::{ReposFactory, StoresRepo};
use tenants::TenantConnectionFactory;

pub trait StoresService {
    /// Registers a store, its database is provisioned later
    fn create_store(&self, payload: NewStore) -> ServiceFuture<Store>;
    /// Returns store by id or slug
    fn get_store(&self, identifier: StoreIdentifier) -> ServiceFuture<Store>;
    /// Lists stores ordered by slug
    fn list_stores(&self, offset: i64, count: i64) -> ServiceFuture<Vec<Store>>;
    /// Marks the store database as being created
    fn begin_provisioning(&self, store_id: StoreId) -> ServiceFuture<Store>;
    /// Stores encrypted credentials of the created database and queues its schema migration
    fn complete_provisioning(&self, store_id: StoreId, params: ConnectionParams) -> ServiceFuture<Store>;
    /// Replaces credentials of the store database
    fn rotate_credentials(&self, store_id: StoreId, params: ConnectionParams) -> ServiceFuture<StoreDatabase>;
    /// Moves the store to another status
    fn set_store_status(&self, store_id: StoreId, status: StoreStatus) -> ServiceFuture<Store>;
    /// Revokes the store database credentials and deactivates the store
    fn deprovision_store(&self, store_id: StoreId) -> ServiceFuture<Store>;
}

fn find_locked(stores_repo: &dyn StoresRepo, store_id: StoreId) -> Result<Store, FailureError> {
    stores_repo
        .find_for_update(store_id)?
        .ok_or_else(|| format_err!("Store {} is not registered", store_id).context(Error::StoreNotFound).into())
}

fn ensure_transition(store: &Store, next: StoreStatus) -> Result<(), FailureError> {
    if store.status.can_transition_to(next) {
        Ok(())
    } else {
        Err(format_err!("Store {} cannot move from {} to {}", store.slug, store.status, next)
            .context(Error::Validate(
                validation_errors!({"status": ["status" => "Store status does not allow this transition"]}),
            ))
            .into())
    }
}

fn validate_params(params: &ConnectionParams) -> Result<(), FailureError> {
    params
        .validate()
        .map_err(|e| format_err!("Invalid store database parameters").context(Error::Validate(e)).into())
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        CF: TenantConnectionFactory,
    > StoresService for Service<T, M, F, CF>
{
    fn create_store(&self, payload: NewStore) -> ServiceFuture<Store> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            payload
                .validate()
                .map_err(|e| format_err!("Invalid store payload").context(Error::Validate(e)).into())
                .and_then(|_| {
                    let stores_repo = repo_factory.create_stores_repo(&*conn);
                    conn.transaction::<Store, FailureError, _>(move || {
                        if stores_repo.slug_exists(&payload.slug)? {
                            return Err(format_err!("Store with slug '{}' already exists.", payload.slug)
                                .context(Error::Validate(
                                    validation_errors!({"slug": ["slug" => "Store with this slug already exists"]}),
                                ))
                                .into());
                        }
                        let store = stores_repo.create(payload.into())?;
                        info!("Registered store {} ({}).", store.slug, store.id);
                        Ok(store)
                    })
                })
                .map_err(|e: FailureError| e.context("Service stores, create_store endpoint error occurred.").into())
        })
    }

    fn get_store(&self, identifier: StoreIdentifier) -> ServiceFuture<Store> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            let stores_repo = repo_factory.create_stores_repo(&*conn);
            stores_repo
                .find_by_identifier(&identifier)
                .and_then(|store| {
                    store.ok_or_else(|| {
                        format_err!("Store {} is not registered", identifier)
                            .context(Error::StoreNotFound)
                            .into()
                    })
                })
                .map_err(|e: FailureError| e.context("Service stores, get_store endpoint error occurred.").into())
        })
    }

    fn list_stores(&self, offset: i64, count: i64) -> ServiceFuture<Vec<Store>> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            let stores_repo = repo_factory.create_stores_repo(&*conn);
            stores_repo
                .list(offset, count)
                .map_err(|e: FailureError| e.context("Service stores, list_stores endpoint error occurred.").into())
        })
    }

    fn begin_provisioning(&self, store_id: StoreId) -> ServiceFuture<Store> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            let stores_repo = repo_factory.create_stores_repo(&*conn);
            conn.transaction::<Store, FailureError, _>(move || {
                let store = find_locked(&*stores_repo, store_id)?;
                ensure_transition(&store, StoreStatus::Provisioning)?;
                stores_repo.set_status(store_id, StoreStatus::Provisioning)
            })
            .map_err(|e: FailureError| e.context("Service stores, begin_provisioning endpoint error occurred.").into())
        })
    }

    fn complete_provisioning(&self, store_id: StoreId, params: ConnectionParams) -> ServiceFuture<Store> {
        let repo_factory = self.static_context.repo_factory.clone();
        let cipher = self.static_context.cipher.clone();
        let default_max_retries = self.static_context.config.jobs.default_max_retries;

        self.spawn_on_pool(move |conn| {
            validate_params(&params)
                .and_then(|_| {
                    let stores_repo = repo_factory.create_stores_repo(&*conn);
                    let store_databases_repo = repo_factory.create_store_databases_repo(&*conn);
                    let jobs_repo = repo_factory.create_jobs_repo(&*conn);
                    conn.transaction::<Store, FailureError, _>(move || {
                        let store = find_locked(&*stores_repo, store_id)?;
                        ensure_transition(&store, StoreStatus::Provisioned)?;
                        let encrypted_credentials = cipher.encrypt(store_id, &params)?;
                        let credentials = store_databases_repo.provision(NewStoreDatabase {
                            store_id,
                            encrypted_credentials,
                        })?;
                        let store = stores_repo.set_status(store_id, StoreStatus::Provisioned)?;
                        info!(
                            "Provisioned database {} of store {}, credentials version {}.",
                            params.database, store.slug, credentials.credentials_version
                        );
                        if jobs_repo.has_outstanding(store_id, TENANT_MIGRATE_JOB)? {
                            debug!("Store {} already has a {} job queued.", store.slug, TENANT_MIGRATE_JOB);
                        } else {
                            let migrate = NewJob::new(store_id, TENANT_MIGRATE_JOB).with_priority(JobPriority::Urgent);
                            let job = jobs_repo.create(InsertJob::new(migrate, default_max_retries, SystemTime::now()))?;
                            info!("Schema job {} of store {} queued.", job.id, store.slug);
                        }
                        Ok(store)
                    })
                })
                .map_err(|e: FailureError| e.context("Service stores, complete_provisioning endpoint error occurred.").into())
        })
    }

    fn rotate_credentials(&self, store_id: StoreId, params: ConnectionParams) -> ServiceFuture<StoreDatabase> {
        let repo_factory = self.static_context.repo_factory.clone();
        let cipher = self.static_context.cipher.clone();
        let tenants = self.static_context.tenants.clone();

        self.spawn_on_pool(move |conn| {
            validate_params(&params)
                .and_then(|_| {
                    let stores_repo = repo_factory.create_stores_repo(&*conn);
                    let store_databases_repo = repo_factory.create_store_databases_repo(&*conn);
                    conn.transaction::<StoreDatabase, FailureError, _>(move || {
                        let store = find_locked(&*stores_repo, store_id)?;
                        if store_databases_repo.find_by_store(store_id)?.is_none() {
                            return Err(format_err!("Store {} has no database credentials to rotate", store.slug)
                                .context(Error::StoreNotProvisioned)
                                .into());
                        }
                        let encrypted = cipher.encrypt(store_id, &params)?;
                        store_databases_repo.rotate(store_id, encrypted)
                    })
                })
                .map(|credentials| {
                    tenants.invalidate(store_id);
                    info!(
                        "Rotated database credentials of store {}, now at version {}.",
                        store_id, credentials.credentials_version
                    );
                    credentials
                })
                .map_err(|e: FailureError| e.context("Service stores, rotate_credentials endpoint error occurred.").into())
        })
    }

    fn set_store_status(&self, store_id: StoreId, status: StoreStatus) -> ServiceFuture<Store> {
        let repo_factory = self.static_context.repo_factory.clone();
        let tenants = self.static_context.tenants.clone();

        self.spawn_on_pool(move |conn| {
            let stores_repo = repo_factory.create_stores_repo(&*conn);
            conn.transaction::<Store, FailureError, _>(move || {
                let store = find_locked(&*stores_repo, store_id)?;
                // credentials are only stored by complete_provisioning
                if status == StoreStatus::Provisioned {
                    return Err(format_err!("Store {} needs database credentials to become provisioned", store.slug)
                        .context(Error::Validate(
                            validation_errors!({"status": ["status" => "Complete provisioning to store database credentials"]}),
                        ))
                        .into());
                }
                ensure_transition(&store, status)?;
                stores_repo.set_status(store_id, status)
            })
            .map(|store| {
                if store.status.revokes_access() {
                    tenants.invalidate(store.id);
                }
                info!("Store {} is now {}.", store.slug, store.status);
                store
            })
            .map_err(|e: FailureError| e.context("Service stores, set_store_status endpoint error occurred.").into())
        })
    }

    fn deprovision_store(&self, store_id: StoreId) -> ServiceFuture<Store> {
        let repo_factory = self.static_context.repo_factory.clone();
        let tenants = self.static_context.tenants.clone();

        self.spawn_on_pool(move |conn| {
            let stores_repo = repo_factory.create_stores_repo(&*conn);
            let store_databases_repo = repo_factory.create_store_databases_repo(&*conn);
            conn.transaction::<Store, FailureError, _>(move || {
                let store = find_locked(&*stores_repo, store_id)?;
                ensure_transition(&store, StoreStatus::Inactive)?;
                if !store_databases_repo.revoke(store_id)? {
                    warn!("Store {} had no database credentials to revoke.", store.slug);
                }
                stores_repo.set_status(store_id, StoreStatus::Inactive)
            })
            .map(|store| {
                tenants.invalidate(store.id);
                info!("Deprovisioned database of store {}.", store.slug);
                store
            })
            .map_err(|e: FailureError| e.context("Service stores, deprovision_store endpoint error occurred.").into())
        })
    }
}
