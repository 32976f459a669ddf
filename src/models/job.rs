//! Jobs queued in the master database and the transitions between their states
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use diesel::sql_types::VarChar;
use failure::Error as FailureError;
use serde_json;
use validator::Validate;

use errors::Error;
use models::validation_rules::*;
use models::StoreId;
use schema::jobs;

uuid_id!(JobId);

/// Ranks priorities for `ORDER BY`, most urgent first
pub const PRIORITY_RANK_SQL: &str = "CASE priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'normal' THEN 2 ELSE 3 END";

pub const LEASE_EXPIRED_ERROR: &str = "lease expired";

/// Brings a store database to the current schema, queued when a store gets its database
pub const TENANT_MIGRATE_JOB: &str = "tenant:migrate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromSqlRow, AsExpression)]
#[sql_type = "VarChar"]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match *self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match *self {
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => true,
            JobStatus::Pending | JobStatus::Running => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = FailureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            other => return Err(format_err!("Unrecognized job status: {}", other)),
        })
    }
}

varchar_enum_sql!(JobStatus);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromSqlRow, AsExpression)]
#[sql_type = "VarChar"]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match *self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Urgent => "urgent",
        }
    }

    /// Claim order, 0 is claimed first. Must agree with `PRIORITY_RANK_SQL`.
    pub fn rank(&self) -> i32 {
        match *self {
            JobPriority::Urgent => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobPriority {
    type Err = FailureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "low" => JobPriority::Low,
            "normal" => JobPriority::Normal,
            "high" => JobPriority::High,
            "urgent" => JobPriority::Urgent,
            other => return Err(format_err!("Unrecognized job priority: {}", other)),
        })
    }
}

varchar_enum_sql!(JobPriority);

#[derive(Debug, Serialize, Deserialize, Queryable, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub store_id: StoreId,
    pub job_type: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub progress: i32,
    pub progress_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<SystemTime>,
    pub scheduled_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

fn empty_payload() -> serde_json::Value {
    json!({})
}

/// Payload for submitting jobs
#[derive(Serialize, Deserialize, Validate, Clone, Debug)]
pub struct NewJob {
    pub store_id: StoreId,
    #[validate(custom = "validate_job_type")]
    pub job_type: String,
    #[serde(default)]
    pub priority: JobPriority,
    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
    #[validate(range(min = "0.0", max = "25.0"))]
    #[serde(default)]
    pub max_retries: Option<i32>,
    /// Not claimable before this moment, defaults to submission time
    #[serde(default)]
    pub scheduled_at: Option<SystemTime>,
}

impl NewJob {
    pub fn new<S: Into<String>>(store_id: StoreId, job_type: S) -> Self {
        Self {
            store_id,
            job_type: job_type.into(),
            priority: JobPriority::default(),
            payload: empty_payload(),
            max_retries: None,
            scheduled_at: None,
        }
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

#[derive(Insertable, Clone, Debug)]
#[table_name = "jobs"]
pub struct InsertJob {
    pub id: JobId,
    pub store_id: StoreId,
    pub job_type: String,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub payload: serde_json::Value,
    pub max_retries: i32,
    pub scheduled_at: SystemTime,
}

impl InsertJob {
    pub fn new(payload: NewJob, default_max_retries: i32, now: SystemTime) -> Self {
        Self {
            id: JobId::new(),
            store_id: payload.store_id,
            job_type: payload.job_type,
            priority: payload.priority,
            status: JobStatus::Pending,
            payload: payload.payload,
            max_retries: payload.max_retries.unwrap_or(default_max_retries),
            scheduled_at: payload.scheduled_at.unwrap_or(now),
        }
    }
}

/// Full set of mutable job columns, written back as a whole
#[derive(AsChangeset, Debug, Clone, PartialEq)]
#[table_name = "jobs"]
#[changeset_options(treat_none_as_null = "true")]
pub struct JobTransition {
    pub status: JobStatus,
    pub result: Option<serde_json::Value>,
    pub progress: i32,
    pub progress_message: Option<String>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<SystemTime>,
    pub scheduled_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    pub updated_at: SystemTime,
}

impl Job {
    fn unchanged(&self, now: SystemTime) -> JobTransition {
        JobTransition {
            status: self.status,
            result: self.result.clone(),
            progress: self.progress,
            progress_message: self.progress_message.clone(),
            retry_count: self.retry_count,
            last_error: self.last_error.clone(),
            worker_id: self.worker_id.clone(),
            lease_expires_at: self.lease_expires_at,
            scheduled_at: self.scheduled_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: now,
        }
    }

    fn ensure_status(&self, expected: &[JobStatus], action: &str) -> Result<(), FailureError> {
        if expected.contains(&self.status) {
            Ok(())
        } else {
            Err(format_err!("Cannot {} job {}: job is {}", action, self.id, self.status)
                .context(Error::Validate(validation_errors!({
                    "status": ["status" => "Job is not in a state that allows this operation"]
                })))
                .into())
        }
    }

    fn ensure_owner(&self, worker_id: &str) -> Result<(), FailureError> {
        match self.worker_id {
            Some(ref owner) if owner == worker_id => Ok(()),
            _ => Err(format_err!("Job {} is not leased by worker {}", self.id, worker_id)
                .context(Error::Forbidden)
                .into()),
        }
    }

    pub fn lease_expired(&self, now: SystemTime) -> bool {
        self.status == JobStatus::Running && self.lease_expires_at.map(|lease| lease < now).unwrap_or(true)
    }

    /// Pending job taken by a worker for the length of `lease`
    pub fn claim(&self, worker_id: &str, now: SystemTime, lease: Duration) -> Result<JobTransition, FailureError> {
        self.ensure_status(&[JobStatus::Pending], "claim")?;
        let mut transition = self.unchanged(now);
        transition.status = JobStatus::Running;
        transition.worker_id = Some(worker_id.to_string());
        transition.lease_expires_at = Some(now + lease);
        transition.started_at = Some(self.started_at.unwrap_or(now));
        Ok(transition)
    }

    /// Progress report of the owning worker, extends the lease
    pub fn report_progress(
        &self,
        worker_id: &str,
        progress: i32,
        message: Option<String>,
        now: SystemTime,
        lease: Duration,
    ) -> Result<JobTransition, FailureError> {
        self.ensure_status(&[JobStatus::Running], "report progress of")?;
        self.ensure_owner(worker_id)?;
        if progress < 0 || progress > 100 {
            return Err(format_err!("Progress {} of job {} is out of range", progress, self.id)
                .context(Error::Validate(validation_errors!({
                    "progress": ["range" => "Progress must be between 0 and 100"]
                })))
                .into());
        }
        let mut transition = self.unchanged(now);
        transition.progress = progress;
        transition.progress_message = message;
        transition.lease_expires_at = Some(now + lease);
        Ok(transition)
    }

    pub fn complete(&self, worker_id: &str, result: Option<serde_json::Value>, now: SystemTime) -> Result<JobTransition, FailureError> {
        self.ensure_status(&[JobStatus::Running], "complete")?;
        self.ensure_owner(worker_id)?;
        let mut transition = self.unchanged(now);
        transition.status = JobStatus::Completed;
        transition.result = result;
        transition.progress = 100;
        transition.worker_id = None;
        transition.lease_expires_at = None;
        transition.completed_at = Some(now);
        Ok(transition)
    }

    /// Failure reported by the owning worker. `retry_at` of `None` makes the failure terminal.
    pub fn fail(&self, worker_id: &str, error: &str, retry_at: Option<SystemTime>, now: SystemTime) -> Result<JobTransition, FailureError> {
        self.ensure_status(&[JobStatus::Running], "fail")?;
        self.ensure_owner(worker_id)?;
        Ok(self.failed(error, retry_at, now))
    }

    /// Running job whose worker stopped renewing the lease
    pub fn expire_lease(&self, retry_at: SystemTime, now: SystemTime) -> Result<JobTransition, FailureError> {
        self.ensure_status(&[JobStatus::Running], "expire lease of")?;
        if !self.lease_expired(now) {
            return Err(format_err!("Lease of job {} has not expired", self.id));
        }
        Ok(self.failed(LEASE_EXPIRED_ERROR, Some(retry_at), now))
    }

    fn failed(&self, error: &str, retry_at: Option<SystemTime>, now: SystemTime) -> JobTransition {
        let mut transition = self.unchanged(now);
        transition.last_error = Some(error.to_string());
        transition.worker_id = None;
        transition.lease_expires_at = None;
        match retry_at {
            Some(retry_at) if self.retry_count < self.max_retries => {
                transition.status = JobStatus::Pending;
                transition.retry_count = self.retry_count + 1;
                transition.scheduled_at = retry_at;
            }
            _ => {
                transition.status = JobStatus::Failed;
                transition.completed_at = Some(now);
            }
        }
        transition
    }

    pub fn cancel(&self, now: SystemTime) -> Result<JobTransition, FailureError> {
        self.ensure_status(&[JobStatus::Pending, JobStatus::Running], "cancel")?;
        let mut transition = self.unchanged(now);
        transition.status = JobStatus::Cancelled;
        transition.worker_id = None;
        transition.lease_expires_at = None;
        transition.completed_at = Some(now);
        Ok(transition)
    }

    /// Applies a transition to an in-memory copy
    pub fn apply(mut self, transition: JobTransition) -> Job {
        self.status = transition.status;
        self.result = transition.result;
        self.progress = transition.progress;
        self.progress_message = transition.progress_message;
        self.retry_count = transition.retry_count;
        self.last_error = transition.last_error;
        self.worker_id = transition.worker_id;
        self.lease_expires_at = transition.lease_expires_at;
        self.scheduled_at = transition.scheduled_at;
        self.started_at = transition.started_at;
        self.completed_at = transition.completed_at;
        self.updated_at = transition.updated_at;
        self
    }
}
