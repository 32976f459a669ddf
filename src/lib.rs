//! Tenancy routes work between the master database, which knows every store,
//! and the dedicated database of each store.
//! The layered structure of the app is
//!
//! `Binary -> Loader (job worker) -> Service -> Repo + TenantResolver`
//!
//! Each layer can throw Error with context or cover occurred error with
//! Error in the context. Errors not covered with Error are treated as
//! transient by the job worker and retried.

#![allow(proc_macro_derive_resolution_fallback)]
#![recursion_limit = "128"]
extern crate aes_gcm;
extern crate base64;
extern crate config as config_crate;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate failure;
extern crate futures;
extern crate futures_cpupool;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
extern crate r2d2;
extern crate regex;
extern crate serde;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate serde_json;
extern crate tokio;
extern crate tokio_core;
extern crate tokio_signal;
extern crate tracing_subscriber;
extern crate uuid;
extern crate validator;
#[macro_use]
extern crate validator_derive;
#[macro_use]
extern crate sentry;

#[macro_use]
pub mod macros;
pub mod config;
pub mod errors;
pub mod loaders;
pub mod migrations;
pub mod models;
pub mod repos;
pub mod schema;
pub mod sentry_integration;
pub mod services;
pub mod tenants;

use std::sync::Arc;
use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use failure::{Error as FailureError, Fail};
use futures::{future, Future, Stream};
use futures_cpupool::CpuPool;
use tokio_core::reactor::Core;
use tracing_subscriber::EnvFilter;

use config::Config;
use errors::Error;
use loaders::{JobHandler, JobWorker, TenantMigrateHandler};
use migrations::{MigrationRunner, MASTER_MIGRATIONS};
use models::Job;
use repos::repo_factory::{ReposFactory, ReposFactoryImpl};
use repos::types::DbPool;
use services::StaticContext;
use tenants::{CredentialCipher, PgTenantConnectionFactory};

/// Installs the log subscriber, `RUST_LOG` takes precedence over `logging.level`
pub fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("Logger is already initialized: {}", e);
    }
}

fn create_master_pool(config: &Config) -> Result<DbPool, FailureError> {
    let db_manager = ConnectionManager::<PgConnection>::new(config.server.database.clone());
    r2d2::Pool::builder()
        .connection_timeout(Duration::from_millis(config.server.connection_timeout_ms))
        .build(db_manager)
        .map_err(|e| e.context(Error::Connection).context("Failed to create master connection pool").into())
}

/// Starts the job worker from provided `Config`, runs until Ctrl+C
pub fn start_worker(config: Config) {
    let mut core = Core::new().expect("Unexpected error creating event loop core");
    let handle = core.handle();

    let db_pool = create_master_pool(&config).expect("Failed to create DB connection pool");
    let cpu_pool = CpuPool::new(config.server.thread_count);
    let cipher = CredentialCipher::from_base64(&config.tenants.encryption_key).expect("Tenant encryption key must be 32 bytes of base64");

    let repo_factory = ReposFactoryImpl::default();
    let context = StaticContext::new(
        db_pool,
        cpu_pool,
        Arc::new(config),
        repo_factory,
        Arc::new(cipher),
        PgTenantConnectionFactory::default(),
    );

    let handlers: Vec<Box<dyn JobHandler<ConnectionManager<PgConnection>>>> = vec![Box::new(TenantMigrateHandler::new(repo_factory))];
    let worker = JobWorker::new(context, handlers);

    handle.spawn(
        worker
            .start()
            .then(|res| {
                match res {
                    Ok(ref report) if report.processed() > 0 || report.recovered > 0 => info!(
                        "Jobs batch done: {} completed, {} retried, {} failed, {} recovered.",
                        report.completed, report.retried, report.failed, report.recovered
                    ),
                    Ok(_) => {}
                    Err(ref e) => error!("Error in jobs worker: {}.", e),
                }
                future::ok::<(), ()>(())
            }).for_each(|_| future::ok(())),
    );

    core.run(tokio_signal::ctrl_c().flatten_stream().take(1u64).for_each(|()| {
        info!("Ctrl+C received. Exit");

        Ok(())
    })).unwrap();
}

/// Brings the master database up to date and queues `tenant:migrate` for every store database.
/// Returns the applied master versions and the queued jobs.
pub fn run_migrations(config: &Config) -> Result<(Vec<&'static str>, Vec<Job>), FailureError> {
    let db_pool = create_master_pool(config)?;
    let conn = db_pool.get().map_err(|e| e.context(Error::Connection))?;
    let repo_factory = ReposFactoryImpl::default();

    let applied = MigrationRunner::new(repo_factory.create_migrations_repo(&*conn)).run(MASTER_MIGRATIONS)?;
    let queued = migrations::enqueue_tenant_migrations(&*conn, &repo_factory, config.jobs.default_max_retries)?;
    Ok((applied, queued))
}
