//! Schema migrations shipped with the binary.
//!
//! Every statement is guarded (`IF NOT EXISTS`), so applying a migration to a
//! database that already has it changes nothing. The runner additionally
//! records applied versions and skips them.
use std::collections::HashSet;
use std::time::SystemTime;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Error as FailureError;

use models::{InsertJob, Job, JobPriority, Migration, NewJob, StoreStatus, TENANT_MIGRATE_JOB};
use repos::{MigrationsRepo, ReposFactory};

/// Migrations of the master database
pub const MASTER_MIGRATIONS: &[Migration] = &[
    Migration {
        version: "20240101000001",
        name: "create_stores",
        sql: include_str!("../../migrations/master/20240101000001_create_stores.sql"),
    },
    Migration {
        version: "20240101000002",
        name: "create_store_databases",
        sql: include_str!("../../migrations/master/20240101000002_create_store_databases.sql"),
    },
    Migration {
        version: "20240101000003",
        name: "create_jobs",
        sql: include_str!("../../migrations/master/20240101000003_create_jobs.sql"),
    },
];

/// Migrations of every store database
pub const TENANT_MIGRATIONS: &[Migration] = &[Migration {
    version: "20240101000001",
    name: "create_store_identity",
    sql: include_str!("../../migrations/tenant/20240101000001_create_store_identity.sql"),
}];

/// Versions must be unique and listed in increasing order
pub fn check_order(migrations: &[Migration]) -> Result<(), FailureError> {
    for pair in migrations.windows(2) {
        if pair[0].version >= pair[1].version {
            return Err(format_err!(
                "Migration {} {} is listed after {} {}",
                pair[1].version,
                pair[1].name,
                pair[0].version,
                pair[0].name
            ));
        }
    }
    Ok(())
}

pub struct MigrationRunner<'a> {
    repo: Box<dyn MigrationsRepo + 'a>,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(repo: Box<dyn MigrationsRepo + 'a>) -> Self {
        Self { repo }
    }

    /// Migrations of the set not yet recorded in the database
    pub fn pending(&self, migrations: &[Migration]) -> Result<Vec<Migration>, FailureError> {
        check_order(migrations)?;
        self.repo.ensure_table()?;
        let applied = self
            .repo
            .applied()?
            .into_iter()
            .map(|migration| migration.version)
            .collect::<HashSet<_>>();
        Ok(migrations
            .iter()
            .filter(|migration| !applied.contains(migration.version))
            .cloned()
            .collect())
    }

    /// Applies pending migrations in order, returns the versions applied by this run
    pub fn run(&self, migrations: &[Migration]) -> Result<Vec<&'static str>, FailureError> {
        let mut applied = vec![];
        for migration in self.pending(migrations)? {
            if self.repo.apply(&migration)? {
                info!("Applied migration {} {}.", migration.version, migration.name);
                applied.push(migration.version);
            } else {
                debug!("Migration {} was applied concurrently.", migration.version);
            }
        }
        Ok(applied)
    }
}

/// Queues a `tenant:migrate` job for every store that has a database and no such job
/// waiting or running yet. Returns the queued jobs.
///
/// Each store is checked and queued in one transaction holding the store row lock,
/// which provisioning takes as well.
pub fn enqueue_tenant_migrations<C, F>(conn: &C, repo_factory: &F, max_retries: i32) -> Result<Vec<Job>, FailureError>
where
    C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    F: ReposFactory<C>,
{
    let stores_repo = repo_factory.create_stores_repo(conn);
    let store_databases_repo = repo_factory.create_store_databases_repo(conn);
    let jobs_repo = repo_factory.create_jobs_repo(conn);

    let mut queued = vec![];
    for store in stores_repo.list_with_status(&[StoreStatus::Provisioned, StoreStatus::Active, StoreStatus::Demo])? {
        let job = conn.transaction::<Option<Job>, FailureError, _>(|| {
            let store = match stores_repo.find_for_update(store.id)? {
                Some(ref store) if store.status.has_database() => store.clone(),
                _ => return Ok(None),
            };
            if store_databases_repo.find_by_store(store.id)?.is_none() {
                warn!("Store {} is {} but has no database credentials, skipping.", store.slug, store.status);
                return Ok(None);
            }
            if jobs_repo.has_outstanding(store.id, TENANT_MIGRATE_JOB)? {
                debug!("Store {} already has a {} job queued.", store.slug, TENANT_MIGRATE_JOB);
                return Ok(None);
            }
            let payload = NewJob::new(store.id, TENANT_MIGRATE_JOB).with_priority(JobPriority::High);
            jobs_repo.create(InsertJob::new(payload, max_retries, SystemTime::now())).map(Some)
        })?;
        queued.extend(job);
    }
    info!("Queued {} {} jobs.", queued.len(), TENANT_MIGRATE_JOB);
    Ok(queued)
}
