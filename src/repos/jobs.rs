//! Jobs repo, the job queue of the master database
use std::time::{Duration, SystemTime};

use diesel;
use diesel::connection::AnsiTransactionManager;
use diesel::dsl::{exists, sql};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use diesel::Connection;
use failure::{Error as FailureError, Fail};
use serde_json;

use errors::Error;
use models::{InsertJob, Job, JobId, JobStatus, JobTransition, StoreId, PRIORITY_RANK_SQL};
use repos::types::RepoResult;
use schema::jobs::dsl::*;

/// Jobs repository, every state change locks the job row first
pub struct JobsRepoImpl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> {
    pub db_conn: &'a T,
}

pub trait JobsRepo {
    /// Queues new job
    fn create(&self, payload_arg: InsertJob) -> RepoResult<Job>;

    /// Find specific job by ID
    fn find(&self, job_id: JobId) -> RepoResult<Option<Job>>;

    /// Whether the store has a job of this type waiting or running
    fn has_outstanding(&self, store_id_arg: StoreId, job_type_arg: &str) -> RepoResult<bool>;

    /// Newest jobs of the store first
    fn list_for_store(&self, store_id_arg: StoreId, status_filter: Option<JobStatus>, count: i64) -> RepoResult<Vec<Job>>;

    /// Takes the most urgent claimable job of one of `job_types`, skipping rows locked by other workers
    fn claim_next(&self, worker: &str, job_types: &[String], now: SystemTime, lease: Duration) -> RepoResult<Option<Job>>;

    /// Stores progress of a running job and extends its lease
    fn report_progress(
        &self,
        job_id: JobId,
        worker: &str,
        progress_arg: i32,
        message: Option<String>,
        now: SystemTime,
        lease: Duration,
    ) -> RepoResult<Job>;

    fn complete(&self, job_id: JobId, worker: &str, output: Option<serde_json::Value>, now: SystemTime) -> RepoResult<Job>;

    /// Requeues the job until it runs out of retries, `retry_at` of `None` fails it for good
    fn fail(&self, job_id: JobId, worker: &str, error: &str, retry_at: Option<SystemTime>, now: SystemTime) -> RepoResult<Job>;

    fn cancel(&self, job_id: JobId, now: SystemTime) -> RepoResult<Job>;

    /// Fails running jobs whose lease expired, returns them after the change
    fn recover_stale(&self, now: SystemTime, retry_at: SystemTime) -> RepoResult<Vec<Job>>;
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> JobsRepoImpl<'a, T> {
    pub fn new(db_conn: &'a T) -> Self {
        Self { db_conn }
    }

    fn save(&self, job_id: JobId, transition: &JobTransition) -> RepoResult<Job> {
        diesel::update(jobs.filter(id.eq(job_id)))
            .set(transition)
            .get_result::<Job>(self.db_conn)
            .map_err(From::from)
    }

    /// Locks the job row and writes back the transition computed from its current state
    fn transition<F>(&self, job_id: JobId, f: F) -> RepoResult<Job>
    where
        F: FnOnce(&Job) -> Result<JobTransition, FailureError>,
    {
        self.db_conn.transaction::<Job, FailureError, _>(|| {
            let job = jobs
                .filter(id.eq(job_id))
                .for_update()
                .get_result::<Job>(self.db_conn)
                .optional()?
                .ok_or_else(|| format_err!("Job {} not found", job_id).context(Error::NotFound))?;
            let transition = f(&job)?;
            self.save(job_id, &transition)
        })
    }
}

impl<'a, T: Connection<Backend = Pg, TransactionManager = AnsiTransactionManager> + 'static> JobsRepo for JobsRepoImpl<'a, T> {
    fn create(&self, payload_arg: InsertJob) -> RepoResult<Job> {
        debug!("Create job {:?}.", payload_arg);
        diesel::insert_into(jobs)
            .values(&payload_arg)
            .get_result::<Job>(self.db_conn)
            .map_err(|e| e.context(format!("Create job {:?} error occurred.", payload_arg)).into())
    }

    fn has_outstanding(&self, store_id_arg: StoreId, job_type_arg: &str) -> RepoResult<bool> {
        debug!("Check outstanding {} jobs of store {}.", job_type_arg, store_id_arg);
        let query = jobs
            .filter(store_id.eq(store_id_arg))
            .filter(job_type.eq(job_type_arg))
            .filter(status.eq_any(vec![JobStatus::Pending, JobStatus::Running]));
        diesel::select(exists(query))
            .get_result::<bool>(self.db_conn)
            .map_err(|e| {
                e.context(format!("Check outstanding {} jobs of store {} error occurred.", job_type_arg, store_id_arg))
                    .into()
            })
    }

    fn find(&self, job_id: JobId) -> RepoResult<Option<Job>> {
        debug!("Find job {}.", job_id);
        jobs.filter(id.eq(job_id))
            .get_result::<Job>(self.db_conn)
            .optional()
            .map_err(|e| e.context(format!("Find job {} error occurred.", job_id)).into())
    }

    fn list_for_store(&self, store_id_arg: StoreId, status_filter: Option<JobStatus>, count: i64) -> RepoResult<Vec<Job>> {
        debug!("Find jobs of store {} with status {:?}, count {}.", store_id_arg, status_filter, count);
        let query = jobs.filter(store_id.eq(store_id_arg)).order(created_at.desc()).limit(count);
        let found = match status_filter {
            Some(status_arg) => query.filter(status.eq(status_arg)).get_results::<Job>(self.db_conn),
            None => query.get_results::<Job>(self.db_conn),
        };
        found.map_err(|e| {
            e.context(format!("Find jobs of store {} with status {:?} error occurred.", store_id_arg, status_filter))
                .into()
        })
    }

    fn claim_next(&self, worker: &str, job_types: &[String], now: SystemTime, lease: Duration) -> RepoResult<Option<Job>> {
        debug!("Claim next job of types {:?} for worker {}.", job_types, worker);
        self.db_conn
            .transaction::<Option<Job>, FailureError, _>(|| {
                let candidate = jobs
                    .filter(status.eq(JobStatus::Pending))
                    .filter(scheduled_at.le(now))
                    .filter(job_type.eq_any(job_types.to_vec()))
                    .order((sql::<Integer>(PRIORITY_RANK_SQL), created_at.asc(), id.asc()))
                    .limit(1)
                    .for_update()
                    .skip_locked()
                    .get_result::<Job>(self.db_conn)
                    .optional()?;
                match candidate {
                    Some(job) => {
                        let transition = job.claim(worker, now, lease)?;
                        self.save(job.id, &transition).map(Some)
                    }
                    None => Ok(None),
                }
            })
            .map_err(|e| e.context(format!("Claim next job for worker {} error occurred.", worker)).into())
    }

    fn report_progress(
        &self,
        job_id: JobId,
        worker: &str,
        progress_arg: i32,
        message: Option<String>,
        now: SystemTime,
        lease: Duration,
    ) -> RepoResult<Job> {
        debug!("Report progress {} of job {} by worker {}.", progress_arg, job_id, worker);
        self.transition(job_id, |job| job.report_progress(worker, progress_arg, message, now, lease))
            .map_err(|e| e.context(format!("Report progress of job {} error occurred.", job_id)).into())
    }

    fn complete(&self, job_id: JobId, worker: &str, output: Option<serde_json::Value>, now: SystemTime) -> RepoResult<Job> {
        debug!("Complete job {} by worker {}.", job_id, worker);
        self.transition(job_id, |job| job.complete(worker, output, now))
            .map_err(|e| e.context(format!("Complete job {} error occurred.", job_id)).into())
    }

    fn fail(&self, job_id: JobId, worker: &str, error: &str, retry_at: Option<SystemTime>, now: SystemTime) -> RepoResult<Job> {
        debug!("Fail job {} by worker {}: {}.", job_id, worker, error);
        self.transition(job_id, |job| job.fail(worker, error, retry_at, now))
            .map_err(|e| e.context(format!("Fail job {} error occurred.", job_id)).into())
    }

    fn cancel(&self, job_id: JobId, now: SystemTime) -> RepoResult<Job> {
        debug!("Cancel job {}.", job_id);
        self.transition(job_id, |job| job.cancel(now))
            .map_err(|e| e.context(format!("Cancel job {} error occurred.", job_id)).into())
    }

    fn recover_stale(&self, now: SystemTime, retry_at: SystemTime) -> RepoResult<Vec<Job>> {
        debug!("Recover jobs with expired leases.");
        self.db_conn
            .transaction::<Vec<Job>, FailureError, _>(|| {
                let stale = jobs
                    .filter(status.eq(JobStatus::Running))
                    .filter(lease_expires_at.lt(now).or(lease_expires_at.is_null()))
                    .for_update()
                    .skip_locked()
                    .get_results::<Job>(self.db_conn)?;
                stale
                    .into_iter()
                    .map(|job| {
                        let transition = job.expire_lease(retry_at, now)?;
                        self.save(job.id, &transition)
                    })
                    .collect()
            })
            .map_err(|e| e.context("Recover jobs with expired leases error occurred.").into())
    }
}
