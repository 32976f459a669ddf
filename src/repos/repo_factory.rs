use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;

use repos::*;

pub trait ReposFactory<C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static>:
    Clone + Send + Sync + 'static
{
    fn create_stores_repo<'a>(&self, db_conn: &'a C) -> Box<dyn StoresRepo + 'a>;
    fn create_store_databases_repo<'a>(&self, db_conn: &'a C) -> Box<dyn StoreDatabasesRepo + 'a>;
    fn create_jobs_repo<'a>(&self, db_conn: &'a C) -> Box<dyn JobsRepo + 'a>;
    fn create_migrations_repo<'a>(&self, db_conn: &'a C) -> Box<dyn MigrationsRepo + 'a>;
    fn create_store_identity_repo<'a>(&self, db_conn: &'a C) -> Box<dyn StoreIdentityRepo + 'a>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReposFactoryImpl;

impl<C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> ReposFactory<C> for ReposFactoryImpl {
    fn create_stores_repo<'a>(&self, db_conn: &'a C) -> Box<dyn StoresRepo + 'a> {
        Box::new(StoresRepoImpl::new(db_conn)) as Box<dyn StoresRepo>
    }
    fn create_store_databases_repo<'a>(&self, db_conn: &'a C) -> Box<dyn StoreDatabasesRepo + 'a> {
        Box::new(StoreDatabasesRepoImpl::new(db_conn)) as Box<dyn StoreDatabasesRepo>
    }
    fn create_jobs_repo<'a>(&self, db_conn: &'a C) -> Box<dyn JobsRepo + 'a> {
        Box::new(JobsRepoImpl::new(db_conn)) as Box<dyn JobsRepo>
    }
    fn create_migrations_repo<'a>(&self, db_conn: &'a C) -> Box<dyn MigrationsRepo + 'a> {
        Box::new(MigrationsRepoImpl::new(db_conn)) as Box<dyn MigrationsRepo>
    }
    fn create_store_identity_repo<'a>(&self, db_conn: &'a C) -> Box<dyn StoreIdentityRepo + 'a> {
        Box::new(StoreIdentityRepoImpl::new(db_conn)) as Box<dyn StoreIdentityRepo>
    }
}
