//! `tenant:migrate` jobs bring a store database up to the current schema and
//! bind it to its store.
use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Error as FailureError;
use r2d2::ManageConnection;
use serde_json;

use loaders::jobs_worker::{JobContext, JobHandler};
use migrations::{MigrationRunner, TENANT_MIGRATIONS};
use models::{NewStoreIdentity, TENANT_MIGRATE_JOB};
use repos::ReposFactory;
use tenants::TenantHandle;

#[derive(Clone)]
pub struct TenantMigrateHandler<F> {
    repo_factory: F,
}

impl<F> TenantMigrateHandler<F> {
    pub fn new(repo_factory: F) -> Self {
        Self { repo_factory }
    }
}

impl<C, M, F> JobHandler<M> for TenantMigrateHandler<F>
where
    C: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = C>,
    F: ReposFactory<C>,
{
    fn job_type(&self) -> &'static str {
        TENANT_MIGRATE_JOB
    }

    fn handle(&self, ctx: &JobContext, tenant: &TenantHandle<M>) -> Result<Option<serde_json::Value>, FailureError> {
        let store = tenant.store();
        let conn = tenant.connection()?;

        let runner = MigrationRunner::new(self.repo_factory.create_migrations_repo(&*conn));
        let applied = runner.run(TENANT_MIGRATIONS)?;
        ctx.report_progress(80, Some(format!("applied {} migrations", applied.len())))?;

        let identity = self.repo_factory.create_store_identity_repo(&*conn).bind(NewStoreIdentity {
            store_id: store.id,
            slug: store.slug.clone(),
        })?;
        info!(
            "Database of store {} is up to date, {} migrations applied.",
            identity.slug,
            applied.len()
        );

        Ok(Some(json!({
            "applied": applied,
            "store_id": identity.store_id,
        })))
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use errors::Error;
    use models::*;
    use repos::repo_factory::tests::*;
    use tenants::TenantHandle;

    fn migrate(repos: &ReposFactoryMock, slug: &str) -> Result<Option<serde_json::Value>, FailureError> {
        let service = create_service();
        let handle: TenantHandle<MockTenantManager> = service
            .static_context
            .tenants
            .resolve(&StoreIdentifier::Slug(slug.to_string()))?;

        let mut job = create_job(handle.store_id(), TENANT_MIGRATE_JOB);
        let transition = job.claim(MOCK_WORKER_ID, SystemTime::now(), Duration::from_secs(60))?;
        job = job.apply(transition);
        let reports = ::std::cell::RefCell::new(vec![]);
        let progress = |progress: i32, message: Option<String>| -> Result<(), FailureError> {
            reports.borrow_mut().push((progress, message));
            Ok(())
        };

        let handler = TenantMigrateHandler::new(repos.clone());
        let result = handler.handle(&JobContext::new(&job, &progress), &handle);
        if result.is_ok() {
            assert_eq!(reports.borrow()[0].0, 80);
        }
        result
    }

    #[test]
    fn test_migrates_and_binds_store() {
        let repos = ReposFactoryMock::default();
        let result = migrate(&repos, "acme").unwrap().unwrap();
        assert_eq!(result["applied"], json!(["20240101000001"]));
        assert_eq!(result["store_id"], json!(mock_store_id("acme")));

        let identity = repos.identity.lock().unwrap().clone().unwrap();
        assert_eq!(identity.store_id, mock_store_id("acme"));
        assert_eq!(identity.slug, "acme");
    }

    #[test]
    fn test_second_run_is_noop() {
        let repos = ReposFactoryMock::default();
        migrate(&repos, "acme").unwrap();
        let result = migrate(&repos, "acme").unwrap().unwrap();
        assert_eq!(result["applied"], json!([]));
    }

    #[test]
    fn test_refuses_database_of_another_store() {
        let repos = ReposFactoryMock::default();
        migrate(&repos, "acme").unwrap();
        let err = migrate(&repos, "globex").unwrap_err();
        assert_error_kind!(err, Error::Forbidden);
    }
}
