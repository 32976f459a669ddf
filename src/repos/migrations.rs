//! Migrations repo, bookkeeping of applied schema changes. Works on master and store databases alike.
use diesel;
use diesel::connection::{AnsiTransactionManager, SimpleConnection};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::Connection;
use failure::{Error as FailureError, Fail};

use models::{AppliedMigration, Migration, NewAppliedMigration};
use repos::types::RepoResult;
use schema::schema_migrations::dsl::*;

const CREATE_SCHEMA_MIGRATIONS: &str = "
CREATE TABLE IF NOT EXISTS schema_migrations (
    version VARCHAR PRIMARY KEY,
    name VARCHAR NOT NULL,
    applied_at TIMESTAMP NOT NULL DEFAULT timezone('utc', now())
);";

/// Serializes migration runs of concurrent processes against the same database
const MIGRATION_LOCK: &str = "SELECT pg_advisory_xact_lock(4837291056)";

pub struct MigrationsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait MigrationsRepo {
    /// Creates the bookkeeping table if it is missing
    fn ensure_table(&self) -> RepoResult<()>;

    /// Applied migrations ordered by version
    fn applied(&self) -> RepoResult<Vec<AppliedMigration>>;

    /// Runs the migration and records it in one transaction, unless it is already recorded.
    /// Returns whether the migration ran.
    fn apply(&self, migration: &Migration) -> RepoResult<bool>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> MigrationsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> MigrationsRepo for MigrationsRepoImpl<'a, T> {
    fn ensure_table(&self) -> RepoResult<()> {
        debug!("Ensure schema_migrations table exists.");
        self.db_conn
            .batch_execute(CREATE_SCHEMA_MIGRATIONS)
            .map_err(|e| e.context("Ensure schema_migrations table exists error occurred.").into())
    }

    fn applied(&self) -> RepoResult<Vec<AppliedMigration>> {
        debug!("Find applied migrations.");
        schema_migrations
            .order(version.asc())
            .get_results(self.db_conn)
            .map_err(|e| e.context("Find applied migrations error occurred.").into())
    }

    fn apply(&self, migration: &Migration) -> RepoResult<bool> {
        debug!("Apply migration {} {}.", migration.version, migration.name);
        self.db_conn
            .transaction::<bool, FailureError, _>(|| {
                diesel::sql_query(MIGRATION_LOCK).execute(self.db_conn)?;
                let recorded = diesel::select(diesel::dsl::exists(schema_migrations.filter(version.eq(migration.version))))
                    .get_result::<bool>(self.db_conn)?;
                if recorded {
                    return Ok(false);
                }
                self.db_conn.batch_execute(migration.sql)?;
                diesel::insert_into(schema_migrations)
                    .values(&NewAppliedMigration::from(migration))
                    .execute(self.db_conn)?;
                Ok(true)
            })
            .map_err(|e| {
                e.context(format!("Apply migration {} {} error occurred.", migration.version, migration.name))
                    .into()
            })
    }
}
