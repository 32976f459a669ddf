//! Jobs worker: claims queued jobs, resolves the database of their store and
//! runs the handler registered for the job type.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use diesel::connection::AnsiTransactionManager;
use diesel::pg::Pg;
use diesel::Connection;
use failure::Error as FailureError;
use failure::Fail;
use futures::future;
use futures::future::Either;
use futures::prelude::*;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool};
use sentry::integrations::failure::capture_error;
use serde_json;
use tokio::timer::Interval;

use config;
use errors::{error_kind, Error};
use models::{Job, JobStatus, StoreIdentifier};
use repos::{JobsRepo, ReposFactory};
use services::StaticContext;
use tenants::{TenantConnectionFactory, TenantHandle, TenantResolver};

/// Work done for jobs of one type
pub trait JobHandler<M: ManageConnection>: Send + Sync {
    fn job_type(&self) -> &'static str;

    /// Runs the job against the database of its store. The returned value is stored as the job result.
    fn handle(&self, ctx: &JobContext, tenant: &TenantHandle<M>) -> Result<Option<serde_json::Value>, FailureError>;
}

/// Claimed job and a way to report its progress
pub struct JobContext<'a> {
    pub job: &'a Job,
    progress: &'a dyn Fn(i32, Option<String>) -> Result<(), FailureError>,
}

impl<'a> JobContext<'a> {
    pub fn new(job: &'a Job, progress: &'a dyn Fn(i32, Option<String>) -> Result<(), FailureError>) -> Self {
        Self { job, progress }
    }

    /// Stores progress in percent and extends the lease of the job
    pub fn report_progress<S: Into<String>>(&self, progress: i32, message: Option<S>) -> Result<(), FailureError> {
        (self.progress)(progress, message.map(Into::into))
    }
}

/// What one pass over the queue did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub recovered: usize,
    pub completed: usize,
    pub retried: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.completed + self.retried + self.failed
    }
}

type Handlers<M> = Arc<HashMap<&'static str, Box<dyn JobHandler<M>>>>;

pub struct JobWorker<
    T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
    M: ManageConnection<Connection = T>,
    F: ReposFactory<T>,
    CF: TenantConnectionFactory,
> {
    busy: Arc<Mutex<bool>>,
    settings: config::Jobs,
    db_pool: Pool<M>,
    thread_pool: CpuPool,
    repo_factory: F,
    tenants: TenantResolver<T, M, F, CF>,
    handlers: Handlers<CF::Manager>,
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        CF: TenantConnectionFactory,
    > Clone for JobWorker<T, M, F, CF>
{
    fn clone(&self) -> Self {
        Self {
            busy: self.busy.clone(),
            settings: self.settings.clone(),
            db_pool: self.db_pool.clone(),
            thread_pool: self.thread_pool.clone(),
            repo_factory: self.repo_factory.clone(),
            tenants: self.tenants.clone(),
            handlers: self.handlers.clone(),
        }
    }
}

/// Failures whose kind will not go away by running the job again
fn is_permanent(err: &FailureError) -> bool {
    error_kind(err).map(|kind| !kind.is_retryable()).unwrap_or(false)
}

fn describe(err: &FailureError) -> String {
    err.iter_chain().map(|cause| cause.to_string()).collect::<Vec<_>>().join(": ")
}

impl<
        T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static,
        M: ManageConnection<Connection = T>,
        F: ReposFactory<T>,
        CF: TenantConnectionFactory,
    > JobWorker<T, M, F, CF>
{
    pub fn new(context: StaticContext<T, M, F, CF>, handlers: Vec<Box<dyn JobHandler<CF::Manager>>>) -> Self {
        let handlers = handlers.into_iter().map(|handler| (handler.job_type(), handler)).collect();
        Self {
            busy: Arc::new(Mutex::new(false)),
            settings: context.config.jobs.clone(),
            db_pool: context.db_pool,
            thread_pool: context.cpu_pool,
            repo_factory: context.repo_factory,
            tenants: context.tenants,
            handlers: Arc::new(handlers),
        }
    }

    /// Job types this worker claims
    pub fn job_types(&self) -> Vec<String> {
        let mut job_types = self.handlers.keys().map(|job_type| job_type.to_string()).collect::<Vec<_>>();
        job_types.sort();
        job_types
    }

    fn busy(&self) -> MutexGuard<bool> {
        self.busy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn start(self) -> impl Stream<Item = BatchReport, Error = FailureError> {
        info!(
            "Jobs worker {} started, handling {:?}.",
            self.settings.worker_id,
            self.job_types()
        );
        let interval = Interval::new_interval(self.settings.poll_interval()).map_err(|e| e.context("timer creation error").into());

        interval.and_then(move |_| {
            let busy = *self.busy();
            if busy {
                debug!("Jobs worker: previous batch is still running, skipping tick.");
                Either::A(future::ok(BatchReport::default()))
            } else {
                Either::B(self.clone().make_step())
            }
        })
    }

    fn make_step(self) -> impl Future<Item = BatchReport, Error = FailureError> {
        *self.busy() = true;

        let worker = self.clone();
        self.thread_pool.spawn_fn(move || worker.run_batch()).then(move |res| {
            *self.busy() = false;
            res
        })
    }

    /// Recovers stale leases, then runs up to `batch_size` claimable jobs. Blocks on the databases.
    pub fn run_batch(&self) -> Result<BatchReport, FailureError> {
        let conn = self.db_pool.get().map_err(|e| e.context(Error::Connection))?;
        let jobs_repo = self.repo_factory.create_jobs_repo(&*conn);
        let mut report = BatchReport::default();

        let now = SystemTime::now();
        for job in jobs_repo.recover_stale(now, now + self.settings.retry_backoff())? {
            warn!(
                "Lease of job {} ({}) expired, job is now {} after {} retries.",
                job.id, job.job_type, job.status, job.retry_count
            );
            report.recovered += 1;
        }

        let job_types = self.job_types();
        while report.processed() < self.settings.batch_size {
            let claimed = jobs_repo.claim_next(&self.settings.worker_id, &job_types, SystemTime::now(), self.settings.lease())?;
            let job = match claimed {
                Some(job) => job,
                None => break,
            };
            debug!("Jobs worker {} claimed job {} ({}).", self.settings.worker_id, job.id, job.job_type);
            let job_id = job.id;
            match self.execute(&*jobs_repo, job) {
                Ok(ref job) if job.status == JobStatus::Completed => report.completed += 1,
                Ok(ref job) if job.status == JobStatus::Pending => report.retried += 1,
                Ok(_) => report.failed += 1,
                // e.g. cancelled while running, the row no longer accepts the outcome
                Err(err) => {
                    warn!("Outcome of job {} was not recorded: {}", job_id, describe(&err));
                    report.failed += 1;
                }
            }
        }

        if report.processed() > 0 || report.recovered > 0 {
            info!("Jobs worker {}: {:?}.", self.settings.worker_id, report);
        }
        Ok(report)
    }

    /// Runs a claimed job and records the outcome
    fn execute(&self, jobs_repo: &dyn JobsRepo, job: Job) -> Result<Job, FailureError> {
        let worker_id = self.settings.worker_id.as_str();
        let lease = self.settings.lease();
        let progress = |progress: i32, message: Option<String>| {
            jobs_repo
                .report_progress(job.id, worker_id, progress, message, SystemTime::now(), lease)
                .map(|_| ())
        };

        let outcome: Result<Option<serde_json::Value>, FailureError> = self
            .handlers
            .get(job.job_type.as_str())
            .ok_or_else(|| {
                format_err!("No handler for job type {}", job.job_type)
                    .context(Error::Validate(validation_errors!({"job_type": ["job_type" => "Unknown job type"]})))
                    .into()
            })
            .and_then(|handler| {
                let tenant = self.tenants.resolve(&StoreIdentifier::Id(job.store_id))?;
                handler.handle(&JobContext::new(&job, &progress), &tenant)
            });

        let now = SystemTime::now();
        match outcome {
            Ok(result) => {
                let job = jobs_repo.complete(job.id, worker_id, result, now)?;
                info!("Job {} ({}) of store {} completed.", job.id, job.job_type, job.store_id);
                Ok(job)
            }
            Err(err) => {
                let retry_at = if is_permanent(&err) {
                    None
                } else {
                    Some(now + self.settings.retry_backoff())
                };
                let err = FailureError::from(err.context(format!("Job {} ({}) of store {} failed", job.id, job.job_type, job.store_id)));
                error!("{}", describe(&err));
                capture_error(&err);
                let job = jobs_repo.fail(job.id, worker_id, &describe(&err), retry_at, now)?;
                if job.status.is_terminal() {
                    warn!("Job {} gave up after {} retries.", job.id, job.retry_count);
                }
                Ok(job)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime};

    use failure::Error as FailureError;
    use serde_json;

    use super::*;
    use errors::Error;
    use models::*;
    use repos::repo_factory::tests::*;

    type MockWorker = JobWorker<MockConnection, MockConnectionManager, ReposFactoryMock, MockTenantConnectionFactory>;

    /// Echoes the payload back, reporting progress on the way
    struct EchoHandler;

    impl JobHandler<MockTenantManager> for EchoHandler {
        fn job_type(&self) -> &'static str {
            "test:echo"
        }

        fn handle(&self, ctx: &JobContext, tenant: &TenantHandle<MockTenantManager>) -> Result<Option<serde_json::Value>, FailureError> {
            ctx.report_progress(50, Some("halfway"))?;
            let conn = tenant.connection()?;
            Ok(Some(json!({
                "payload": ctx.job.payload,
                "database": conn.params.database,
            })))
        }
    }

    struct FailingHandler {
        calls: Arc<AtomicUsize>,
    }

    impl JobHandler<MockTenantManager> for FailingHandler {
        fn job_type(&self) -> &'static str {
            "test:fail"
        }

        fn handle(&self, _ctx: &JobContext, _tenant: &TenantHandle<MockTenantManager>) -> Result<Option<serde_json::Value>, FailureError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(format_err!("remote catalog is down"))
        }
    }

    fn create_worker() -> (MockWorker, ReposFactoryMock, Arc<AtomicUsize>) {
        let service = create_service();
        let repo_factory = service.static_context.repo_factory.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let handlers: Vec<Box<dyn JobHandler<MockTenantManager>>> =
            vec![Box::new(EchoHandler), Box::new(FailingHandler { calls: calls.clone() })];
        (JobWorker::new(service.static_context, handlers), repo_factory, calls)
    }

    fn queue(repos: &ReposFactoryMock, slug: &str, job_type: &str) -> JobId {
        let mut job = create_job(mock_store_id(slug), job_type);
        job.payload = json!({"sku": "A-1"});
        let id = job.id;
        repos.insert_job(job);
        id
    }

    fn make_due(repos: &ReposFactoryMock, job_id: JobId) {
        let mut jobs = repos.jobs.lock().unwrap();
        let job = jobs.iter_mut().find(|job| job.id == job_id).unwrap();
        job.scheduled_at = SystemTime::now() - Duration::from_secs(1);
    }

    #[test]
    fn test_job_types() {
        let (worker, _, _) = create_worker();
        assert_eq!(worker.job_types(), vec!["test:echo", "test:fail"]);
    }

    #[test]
    fn test_completes_job() {
        let (worker, repos, _) = create_worker();
        let job_id = queue(&repos, "acme", "test:echo");

        let report = worker.run_batch().unwrap();
        assert_eq!(report.completed, 1);

        let job = repos.job(job_id);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.progress_message, Some("halfway".to_string()));
        assert_eq!(job.worker_id, None);
        assert_eq!(
            job.result,
            Some(json!({"payload": {"sku": "A-1"}, "database": "store_acme"}))
        );
    }

    #[test]
    fn test_retries_failing_job_until_exhausted() {
        let (worker, repos, calls) = create_worker();
        let job_id = queue(&repos, "acme", "test:fail");

        for attempt in 1..4 {
            let report = worker.run_batch().unwrap();
            assert_eq!(report.retried, 1);
            let job = repos.job(job_id);
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.retry_count, attempt);
            assert!(job.scheduled_at > SystemTime::now());
            assert!(job.last_error.unwrap().contains("remote catalog is down"));

            // backoff keeps the job away until it is due
            assert_eq!(worker.run_batch().unwrap().processed(), 0);
            make_due(&repos, job_id);
        }

        let report = worker.run_batch().unwrap();
        assert_eq!(report.failed, 1);
        let job = repos.job(job_id);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, job.max_retries);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unprovisioned_store_is_retried() {
        let (worker, repos, _) = create_worker();
        let job_id = queue(&repos, "provisioning", "test:echo");

        worker.run_batch().unwrap();
        let job = repos.job(job_id);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn test_unreachable_store_is_retried() {
        let (worker, repos, _) = create_worker();
        let job_id = queue(&repos, "offline", "test:echo");

        worker.run_batch().unwrap();
        let job = repos.job(job_id);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn test_corrupt_credentials_fail_for_good() {
        let (worker, repos, calls) = create_worker();
        let job_id = queue(&repos, "corrupt", "test:fail");

        let report = worker.run_batch().unwrap();
        assert_eq!(report.failed, 1);
        let job = repos.job(job_id);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_store_fails_for_good() {
        let (worker, repos, _) = create_worker();
        let job = create_job(StoreId::new(), "test:echo");
        let job_id = job.id;
        repos.insert_job(job);

        worker.run_batch().unwrap();
        let job = repos.job(job_id);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 0);
    }

    #[test]
    fn test_skips_unhandled_job_types() {
        let (worker, repos, _) = create_worker();
        let job_id = queue(&repos, "acme", "akeneo:import:products");

        assert_eq!(worker.run_batch().unwrap().processed(), 0);
        assert_eq!(repos.job(job_id).status, JobStatus::Pending);
    }

    #[test]
    fn test_claims_urgent_jobs_first() {
        let (worker, repos, _) = create_worker();
        let mut settings = worker.settings.clone();
        settings.batch_size = 1;
        let worker = JobWorker { settings, ..worker };

        let normal = queue(&repos, "acme", "test:echo");
        let mut urgent = create_job(mock_store_id("globex"), "test:echo");
        urgent.priority = JobPriority::Urgent;
        let urgent_id = urgent.id;
        repos.insert_job(urgent);

        assert_eq!(worker.run_batch().unwrap().completed, 1);
        assert_eq!(repos.job(urgent_id).status, JobStatus::Completed);
        assert_eq!(repos.job(normal).status, JobStatus::Pending);
    }

    #[test]
    fn test_batch_size_bounds_a_pass() {
        let (worker, repos, _) = create_worker();
        let batch_size = worker.settings.batch_size;
        for _ in 0..batch_size + 2 {
            queue(&repos, "acme", "test:echo");
        }

        assert_eq!(worker.run_batch().unwrap().completed, batch_size);
        assert_eq!(worker.run_batch().unwrap().completed, 2);
    }

    #[test]
    fn test_recovers_expired_leases() {
        let (worker, repos, _) = create_worker();
        let now = SystemTime::now();
        let job = create_job(mock_store_id("acme"), "test:echo");
        let transition = job.claim("crashed-worker", now - Duration::from_secs(600), Duration::from_secs(60)).unwrap();
        let job = job.apply(transition);
        let job_id = job.id;
        repos.insert_job(job);

        let report = worker.run_batch().unwrap();
        assert_eq!(report.recovered, 1);
        let job = repos.job(job_id);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.worker_id, None);
        assert_eq!(job.last_error, Some(LEASE_EXPIRED_ERROR.to_string()));
    }

    #[test]
    fn test_live_lease_is_kept() {
        let (worker, repos, _) = create_worker();
        let job = create_job(mock_store_id("acme"), "test:echo");
        let transition = job.claim("busy-worker", SystemTime::now(), Duration::from_secs(600)).unwrap();
        let job = job.apply(transition);
        let job_id = job.id;
        repos.insert_job(job);

        assert_eq!(worker.run_batch().unwrap().recovered, 0);
        let job = repos.job(job_id);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.worker_id, Some("busy-worker".to_string()));
    }

    #[test]
    fn test_permanent_error_kinds() {
        let err: FailureError = format_err!("gone").context(Error::StoreNotFound).into();
        assert!(is_permanent(&err));
        let err: FailureError = format_err!("slow").context(Error::ConnectionTimeout).into();
        assert!(!is_permanent(&err));
        let err: FailureError = format_err!("later").context(Error::StoreNotProvisioned).into();
        assert!(!is_permanent(&err));
        assert!(!is_permanent(&format_err!("handler failed")));
    }
}
