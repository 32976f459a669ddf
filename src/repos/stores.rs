//! Stores repo, presents CRUD operations with the store directory of the master database
use std::time::SystemTime;

use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::Connection;
use failure::Fail;

use models::{InsertStore, Store, StoreId, StoreIdentifier, StoreStatus};
use repos::types::RepoResult;
use schema::stores::dsl::*;

/// Stores repository, responsible for handling stores
pub struct StoresRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait StoresRepo {
    /// Find specific store by id or slug
    fn find_by_identifier(&self, identifier: &StoreIdentifier) -> RepoResult<Option<Store>>;

    /// Find specific store by id and lock its row until the transaction ends
    fn find_for_update(&self, store_id: StoreId) -> RepoResult<Option<Store>>;

    /// Returns list of stores, ordered by slug
    fn list(&self, offset: i64, count: i64) -> RepoResult<Vec<Store>>;

    /// Returns stores currently in one of `statuses`
    fn list_with_status(&self, statuses: &[StoreStatus]) -> RepoResult<Vec<Store>>;

    /// Check that slug is taken
    fn slug_exists(&self, slug_arg: &str) -> RepoResult<bool>;

    /// Creates new store
    fn create(&self, payload: InsertStore) -> RepoResult<Store>;

    /// Sets status of the store
    fn set_status(&self, store_id: StoreId, status_arg: StoreStatus) -> RepoResult<Store>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> StoresRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> StoresRepo for StoresRepoImpl<'a, T> {
    fn find_by_identifier(&self, identifier: &StoreIdentifier) -> RepoResult<Option<Store>> {
        debug!("Find store {}.", identifier);
        let result = match *identifier {
            StoreIdentifier::Id(store_id) => stores.filter(id.eq(store_id)).get_result::<Store>(self.db_conn),
            StoreIdentifier::Slug(ref slug_arg) => stores.filter(slug.eq(slug_arg)).get_result::<Store>(self.db_conn),
        };
        result
            .optional()
            .map_err(|e| e.context(format!("Find store {} error occurred.", identifier)).into())
    }

    fn find_for_update(&self, store_id: StoreId) -> RepoResult<Option<Store>> {
        debug!("Find store {} for update.", store_id);
        stores
            .filter(id.eq(store_id))
            .for_update()
            .get_result::<Store>(self.db_conn)
            .optional()
            .map_err(|e| e.context(format!("Find store {} for update error occurred.", store_id)).into())
    }

    fn list(&self, offset: i64, count: i64) -> RepoResult<Vec<Store>> {
        debug!("Find in stores with offset {} and count {}.", offset, count);
        stores
            .order(slug.asc())
            .offset(offset)
            .limit(count)
            .get_results(self.db_conn)
            .map_err(|e| {
                e.context(format!("Find in stores with offset {} and count {} error occurred.", offset, count))
                    .into()
            })
    }

    fn list_with_status(&self, statuses: &[StoreStatus]) -> RepoResult<Vec<Store>> {
        debug!("Find stores with status in {:?}.", statuses);
        stores
            .filter(status.eq_any(statuses.to_vec()))
            .order(slug.asc())
            .get_results(self.db_conn)
            .map_err(|e| e.context(format!("Find stores with status in {:?} error occurred.", statuses)).into())
    }

    fn slug_exists(&self, slug_arg: &str) -> RepoResult<bool> {
        debug!("Check if store slug {} exists.", slug_arg);
        diesel::select(diesel::dsl::exists(stores.filter(slug.eq(slug_arg))))
            .get_result(self.db_conn)
            .map_err(|e| e.context(format!("Check if store slug {} exists error occurred.", slug_arg)).into())
    }

    fn create(&self, payload: InsertStore) -> RepoResult<Store> {
        debug!("Create store {:?}.", payload);
        diesel::insert_into(stores)
            .values(&payload)
            .get_result::<Store>(self.db_conn)
            .map_err(|e| e.context(format!("Create store {:?} error occurred.", payload)).into())
    }

    fn set_status(&self, store_id: StoreId, status_arg: StoreStatus) -> RepoResult<Store> {
        debug!("Set status of store {} to {}.", store_id, status_arg);
        let filter = stores.filter(id.eq(store_id));
        diesel::update(filter)
            .set((status.eq(status_arg), updated_at.eq(SystemTime::now())))
            .get_result::<Store>(self.db_conn)
            .map_err(|e| {
                e.context(format!("Set status of store {} to {} error occurred.", store_id, status_arg))
                    .into()
            })
    }
}
