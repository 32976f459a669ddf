//! Store databases repo, keeps encrypted store database credentials in the master database
use std::time::SystemTime;

use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::Connection;
use failure::{Error as FailureError, Fail};

use errors::Error;
use models::{NewStoreDatabase, StoreDatabase, StoreId};
use repos::types::RepoResult;
use schema::store_databases::dsl::*;

pub struct StoreDatabasesRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait StoreDatabasesRepo {
    /// Credentials of the store database, if any were provisioned and not revoked since
    fn find_by_store(&self, store_id_arg: StoreId) -> RepoResult<Option<StoreDatabase>>;

    /// Stores credentials of a freshly provisioned database. A store provisioned again
    /// gets the version following the one of its revoked credentials.
    fn provision(&self, payload: NewStoreDatabase) -> RepoResult<StoreDatabase>;

    /// Replaces the credentials and bumps their version
    fn rotate(&self, store_id_arg: StoreId, encrypted: String) -> RepoResult<StoreDatabase>;

    /// Revokes the credentials, returns whether there were any. The version is kept.
    fn revoke(&self, store_id_arg: StoreId) -> RepoResult<bool>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> StoreDatabasesRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> StoreDatabasesRepo
    for StoreDatabasesRepoImpl<'a, T>
{
    fn find_by_store(&self, store_id_arg: StoreId) -> RepoResult<Option<StoreDatabase>> {
        debug!("Find database credentials of store {}.", store_id_arg);
        store_databases
            .filter(store_id.eq(store_id_arg))
            .filter(revoked_at.is_null())
            .get_result::<StoreDatabase>(self.db_conn)
            .optional()
            .map_err(|e| {
                e.context(format!("Find database credentials of store {} error occurred.", store_id_arg))
                    .into()
            })
    }

    fn provision(&self, payload: NewStoreDatabase) -> RepoResult<StoreDatabase> {
        debug!("Provision database credentials of store {}.", payload.store_id);
        let store_id_arg = payload.store_id;
        self.db_conn
            .transaction::<StoreDatabase, FailureError, _>(|| {
                let previous = store_databases
                    .filter(store_id.eq(store_id_arg))
                    .for_update()
                    .get_result::<StoreDatabase>(self.db_conn)
                    .optional()?;
                match previous {
                    None => diesel::insert_into(store_databases)
                        .values(&payload)
                        .get_result::<StoreDatabase>(self.db_conn)
                        .map_err(From::from),
                    Some(ref previous) if previous.is_revoked() => {
                        diesel::update(store_databases.filter(store_id.eq(store_id_arg)))
                            .set((
                                encrypted_credentials.eq(&payload.encrypted_credentials),
                                credentials_version.eq(credentials_version + 1),
                                updated_at.eq(SystemTime::now()),
                                revoked_at.eq(None::<SystemTime>),
                            ))
                            .get_result::<StoreDatabase>(self.db_conn)
                            .map_err(From::from)
                    }
                    Some(_) => Err(format_err!("Store {} already has database credentials", store_id_arg)
                        .context(Error::Forbidden)
                        .into()),
                }
            })
            .map_err(|e| {
                e.context(format!("Provision database credentials of store {} error occurred.", store_id_arg))
                    .into()
            })
    }

    fn rotate(&self, store_id_arg: StoreId, encrypted: String) -> RepoResult<StoreDatabase> {
        debug!("Rotate database credentials of store {}.", store_id_arg);
        let filter = store_databases.filter(store_id.eq(store_id_arg)).filter(revoked_at.is_null());
        diesel::update(filter)
            .set((
                encrypted_credentials.eq(encrypted),
                credentials_version.eq(credentials_version + 1),
                updated_at.eq(SystemTime::now()),
            ))
            .get_result::<StoreDatabase>(self.db_conn)
            .map_err(|e| {
                e.context(format!("Rotate database credentials of store {} error occurred.", store_id_arg))
                    .into()
            })
    }

    fn revoke(&self, store_id_arg: StoreId) -> RepoResult<bool> {
        debug!("Revoke database credentials of store {}.", store_id_arg);
        let filter = store_databases.filter(store_id.eq(store_id_arg)).filter(revoked_at.is_null());
        let now = SystemTime::now();
        diesel::update(filter)
            .set((revoked_at.eq(Some(now)), updated_at.eq(now)))
            .execute(self.db_conn)
            .map(|revoked| revoked > 0)
            .map_err(|e| {
                e.context(format!("Revoke database credentials of store {} error occurred.", store_id_arg))
                    .into()
            })
    }
}
