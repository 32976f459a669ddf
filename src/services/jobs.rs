//! Jobs Services, submission and inspection of jobs queued for store databases
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
use repos::ReposFactory;
use tenants::TenantConnectionFactory;

pub trait JobsService {
    /// Queues a job for the store, it starts out pending
    fn submit_job(&self, payload: NewJob) -> ServiceFuture<Job>;
    /// Returns job by id
    fn get_job(&self, job_id: JobId) -> ServiceFuture<Job>;
    /// Latest jobs of the store, optionally only those with `status`
    fn list_store_jobs(&self, store_id: StoreId, status: Option<JobStatus>, count: i64) -> ServiceFuture<Vec<Job>>;
    /// Cancels a pending or running job
    fn cancel_job(&self, job_id: JobId) -> ServiceFuture<Job>;
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        CF: TenantConnectionFactory,
    > JobsService for Service<T, M, F, CF>
{
    fn submit_job(&self, payload: NewJob) -> ServiceFuture<Job> {
        let repo_factory = self.static_context.repo_factory.clone();
        let default_max_retries = self.static_context.config.jobs.default_max_retries;

        self.spawn_on_pool(move |conn| {
            payload
                .validate()
                .map_err(|e| format_err!("Invalid job payload").context(Error::Validate(e)).into())
                .and_then(|_| {
                    let stores_repo = repo_factory.create_stores_repo(&*conn);
                    let jobs_repo = repo_factory.create_jobs_repo(&*conn);
                    let identifier = StoreIdentifier::Id(payload.store_id);
                    if stores_repo.find_by_identifier(&identifier)?.is_none() {
                        return Err(format_err!("Store {} is not registered", identifier)
                            .context(Error::StoreNotFound)
                            .into());
                    }
                    let job = jobs_repo.create(InsertJob::new(payload, default_max_retries, SystemTime::now()))?;
                    info!(
                        "Queued {} job {} of type {} for store {}.",
                        job.priority, job.id, job.job_type, job.store_id
                    );
                    Ok(job)
                })
                .map_err(|e: FailureError| e.context("Service jobs, submit_job endpoint error occurred.").into())
        })
    }

    fn get_job(&self, job_id: JobId) -> ServiceFuture<Job> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            let jobs_repo = repo_factory.create_jobs_repo(&*conn);
            jobs_repo
                .find(job_id)
                .and_then(|job| job.ok_or_else(|| format_err!("Job {} not found", job_id).context(Error::NotFound).into()))
                .map_err(|e: FailureError| e.context("Service jobs, get_job endpoint error occurred.").into())
        })
    }

    fn list_store_jobs(&self, store_id: StoreId, status: Option<JobStatus>, count: i64) -> ServiceFuture<Vec<Job>> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            let jobs_repo = repo_factory.create_jobs_repo(&*conn);
            jobs_repo
                .list_for_store(store_id, status, count)
                .map_err(|e: FailureError| e.context("Service jobs, list_store_jobs endpoint error occurred.").into())
        })
    }

    fn cancel_job(&self, job_id: JobId) -> ServiceFuture<Job> {
        let repo_factory = self.static_context.repo_factory.clone();

        self.spawn_on_pool(move |conn| {
            let jobs_repo = repo_factory.create_jobs_repo(&*conn);
            jobs_repo
                .cancel(job_id, SystemTime::now())
                .map(|job| {
                    info!("Cancelled job {} of store {}.", job.id, job.store_id);
                    job
                })
                .map_err(|e: FailureError| e.context("Service jobs, cancel_job endpoint error occurred.").into())
        })
    }
}

#[cfg(test)]
pub mod tests {
    use tokio_core::reactor::Core;

    use errors::Error;
    use models::*;
    use repos::repo_factory::tests::*;
    use services::*;

    #[test]
    fn test_submit_job() {
        let mut core = Core::new().unwrap();
        let service = create_service();
        let payload = NewJob::new(mock_store_id("acme"), "akeneo:import:products")
            .with_priority(JobPriority::High)
            .with_payload(json!({}));
        let job = core.run(service.submit_job(payload)).unwrap();

        let found = core.run(service.get_job(job.id)).unwrap();
        assert_eq!(found.status, JobStatus::Pending);
        assert_eq!(found.priority, JobPriority::High);
        assert_eq!(found.progress, 0);
        assert_eq!(found.retry_count, 0);
        assert_eq!(found.max_retries, service.static_context.config.jobs.default_max_retries);
        assert_eq!(found.payload, json!({}));
    }

    #[test]
    fn test_submit_job_with_explicit_retries() {
        let mut core = Core::new().unwrap();
        let service = create_service();
        let mut payload = NewJob::new(mock_store_id("acme"), "tenant:migrate");
        payload.max_retries = Some(0);
        let job = core.run(service.submit_job(payload)).unwrap();
        assert_eq!(job.max_retries, 0);
        assert_eq!(job.priority, JobPriority::Normal);
    }

    #[test]
    fn test_submit_job_for_unknown_store() {
        let mut core = Core::new().unwrap();
        let service = create_service();
        let err = core
            .run(service.submit_job(NewJob::new(StoreId::new(), "akeneo:import:products")))
            .unwrap_err();
        assert_error_kind!(err, Error::StoreNotFound);
    }

    #[test]
    fn test_submit_job_with_invalid_type() {
        let mut core = Core::new().unwrap();
        let service = create_service();
        let err = core.run(service.submit_job(NewJob::new(mock_store_id("acme"), ""))).unwrap_err();
        assert_error_kind!(err, Error::Validate(ref errors) => assert!(errors.clone().field_errors().contains_key("job_type")));

        let mut payload = NewJob::new(mock_store_id("acme"), "tenant:migrate");
        payload.max_retries = Some(26);
        let err = core.run(service.submit_job(payload)).unwrap_err();
        assert_error_kind!(err, Error::Validate(ref errors) => assert!(errors.clone().field_errors().contains_key("max_retries")));
    }

    #[test]
    fn test_get_unknown_job() {
        let mut core = Core::new().unwrap();
        let service = create_service();
        let err = core.run(service.get_job(JobId::new())).unwrap_err();
        assert_error_kind!(err, Error::NotFound);
    }

    #[test]
    fn test_cancel_job() {
        let mut core = Core::new().unwrap();
        let service = create_service();
        let job = core
            .run(service.submit_job(NewJob::new(mock_store_id("acme"), "tenant:migrate")))
            .unwrap();
        let job = core.run(service.cancel_job(job.id)).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);

        let err = core.run(service.cancel_job(job.id)).unwrap_err();
        assert_error_kind!(err, Error::Validate(_));
    }

    #[test]
    fn test_list_store_jobs() {
        let mut core = Core::new().unwrap();
        let service = create_service();
        let acme = mock_store_id("acme");
        let first = core.run(service.submit_job(NewJob::new(acme, "tenant:migrate"))).unwrap();
        core.run(service.submit_job(NewJob::new(acme, "akeneo:import:products"))).unwrap();
        core.run(service.submit_job(NewJob::new(mock_store_id("globex"), "tenant:migrate")))
            .unwrap();
        core.run(service.cancel_job(first.id)).unwrap();

        let all = core.run(service.list_store_jobs(acme, None, 10)).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|job| job.store_id == acme));

        let pending = core.run(service.list_store_jobs(acme, Some(JobStatus::Pending), 10)).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_type, "akeneo:import:products");
    }
}
