//! Store identity repo, works on a store database and ties it to its owning store
use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::Connection;
use failure::{Error as FailureError, Fail};

use errors::Error;
use models::{NewStoreIdentity, StoreIdentity};
use repos::types::RepoResult;
use schema::store_identity::dsl::*;

pub struct StoreIdentityRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait StoreIdentityRepo {
    /// Store the database is bound to
    fn find(&self) -> RepoResult<Option<StoreIdentity>>;

    /// Binds an unbound database to the store. Binding to the same store again is a no-op,
    /// a database bound to another store is refused.
    fn bind(&self, payload: NewStoreIdentity) -> RepoResult<StoreIdentity>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> StoreIdentityRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> StoreIdentityRepo
    for StoreIdentityRepoImpl<'a, T>
{
    fn find(&self) -> RepoResult<Option<StoreIdentity>> {
        debug!("Find store identity.");
        store_identity
            .first::<StoreIdentity>(self.db_conn)
            .optional()
            .map_err(|e| e.context("Find store identity error occurred.").into())
    }

    fn bind(&self, payload: NewStoreIdentity) -> RepoResult<StoreIdentity> {
        debug!("Bind store database to store {} ({}).", payload.store_id, payload.slug);
        self.db_conn
            .transaction::<StoreIdentity, FailureError, _>(|| {
                diesel::sql_query("LOCK TABLE store_identity IN SHARE ROW EXCLUSIVE MODE").execute(self.db_conn)?;
                match store_identity.first::<StoreIdentity>(self.db_conn).optional()? {
                    Some(ref identity) if identity.store_id != payload.store_id => Err(format_err!(
                        "Store database is bound to store {} ({})",
                        identity.store_id,
                        identity.slug
                    ).context(Error::Forbidden)
                        .into()),
                    Some(identity) => Ok(identity),
                    None => diesel::insert_into(store_identity)
                        .values(&payload)
                        .get_result::<StoreIdentity>(self.db_conn)
                        .map_err(From::from),
                }
            })
            .map_err(|e| e.context(format!("Bind store database to store {} error occurred.", payload.store_id)).into())
    }
}
