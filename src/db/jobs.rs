//! Job queue persistence: jobs, state transitions, dispatch history.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

use super::{from_millis, to_millis};
use crate::error::{Error, Result};
use crate::model::job::{Job, JobId, JobRun, JobStatus};
use crate::model::work::Priority;
use crate::telemetry::metrics;

/// Validate a state transition, returning an error if disallowed.
fn validate_transition(from: JobStatus, to: JobStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

const JOB_COLUMNS: &str = "id, work_type, subject, priority, payload, status, retries, max_retries, last_error, created_at, available_at, updated_at";

impl super::Db {
    pub async fn insert_job(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (id, work_type, subject, priority, payload, status, retries, max_retries, last_error, created_at, available_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(job.id.to_string())
        .bind(&job.work_type)
        .bind(&job.subject)
        .bind(job.priority.rank())
        .bind(serde_json::to_string(&job.payload)?)
        .bind(job.status.as_str())
        .bind(i64::from(job.retries))
        .bind(i64::from(job.max_retries))
        .bind(&job.last_error)
        .bind(to_millis(job.created_at))
        .bind(to_millis(job.available_at))
        .bind(to_millis(job.updated_at))
        .execute(self.pool())
        .await?;

        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("work_type", job.work_type.clone()),
                KeyValue::new("operation", "enqueue"),
            ],
        );
        Ok(())
    }

    /// Get a job by ID.
    pub async fn get_job(&self, id: JobId) -> Result<Job> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
                .bind(id.to_string())
                .fetch_optional(self.pool())
                .await?;

        row.ok_or_else(|| Error::NotFound(format!("job {id}")))?
            .try_into_job()
    }

    /// All pending jobs in dispatch order, whether or not they are due yet.
    pub async fn pending_jobs(&self) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending'
             ORDER BY priority, available_at, created_at, rowid"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(JobRow::try_into_job).collect()
    }

    /// Pending jobs with `available_at <= now`, highest priority and oldest first.
    pub async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' AND available_at <= $1
             ORDER BY priority, available_at, created_at, rowid"
        ))
        .bind(to_millis(now))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(JobRow::try_into_job).collect()
    }

    /// Pending → Running. Returns false if another claimer got there first.
    pub async fn claim_job(&self, id: JobId, now: DateTime<Utc>) -> Result<bool> {
        validate_transition(JobStatus::Pending, JobStatus::Running)?;
        let rows_affected = sqlx::query(
            "UPDATE jobs SET status = 'running', updated_at = $1 WHERE id = $2 AND status = 'pending'",
        )
        .bind(to_millis(now))
        .bind(id.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    /// Running → Completed.
    pub async fn complete_job(&self, id: JobId, now: DateTime<Utc>) -> Result<()> {
        self.finish_job(id, JobStatus::Completed, None, None, None, now)
            .await
    }

    /// Running → Pending with one more retry counted and dispatch pushed to `available_at`.
    pub async fn retry_job(
        &self,
        id: JobId,
        retries: u32,
        available_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.finish_job(
            id,
            JobStatus::Pending,
            Some(retries),
            Some(available_at),
            Some(error),
            now,
        )
        .await
    }

    /// Running → Failed. Terminal.
    pub async fn fail_job(&self, id: JobId, error: &str, now: DateTime<Utc>) -> Result<()> {
        self.finish_job(id, JobStatus::Failed, None, None, Some(error), now)
            .await
    }

    async fn finish_job(
        &self,
        id: JobId,
        to: JobStatus,
        retries: Option<u32>,
        available_at: Option<DateTime<Utc>>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        validate_transition(JobStatus::Running, to)?;

        let rows_affected = sqlx::query(
            "UPDATE jobs SET status = $1, updated_at = $2,
                retries = COALESCE($3, retries),
                available_at = COALESCE($4, available_at),
                last_error = COALESCE($5, last_error)
             WHERE id = $6 AND status = 'running'",
        )
        .bind(to.as_str())
        .bind(to_millis(now))
        .bind(retries.map(i64::from))
        .bind(available_at.map(to_millis))
        .bind(error)
        .bind(id.to_string())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::InvalidTransition {
                from: JobStatus::Running.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    /// Jobs currently `running`. At startup these were stranded by a crash.
    pub async fn running_jobs(&self) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'running' ORDER BY updated_at, rowid"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(JobRow::try_into_job).collect()
    }

    /// Append a history entry, keeping only the newest `keep` rows.
    pub async fn insert_run(&self, run: &JobRun, keep: usize) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO job_runs (job_id, work_type, subject, attempt, status, error, started_at, finished_at, duration_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(run.job_id.to_string())
        .bind(&run.work_type)
        .bind(&run.subject)
        .bind(i64::from(run.attempt))
        .bind(run.status.as_str())
        .bind(&run.error)
        .bind(to_millis(run.started_at))
        .bind(to_millis(run.finished_at))
        .bind(i64::try_from(run.duration_ms).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM job_runs WHERE id NOT IN (SELECT id FROM job_runs ORDER BY id DESC LIMIT $1)",
        )
        .bind(i64::try_from(keep).unwrap_or(i64::MAX))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Most recent history entries first.
    pub async fn recent_runs(&self, limit: usize) -> Result<Vec<JobRun>> {
        let rows: Vec<JobRunRow> = sqlx::query_as(
            "SELECT job_id, work_type, subject, attempt, status, error, started_at, finished_at, duration_ms
             FROM job_runs ORDER BY id DESC LIMIT $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(JobRunRow::try_into_run).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    work_type: String,
    subject: String,
    priority: i64,
    payload: String,
    status: String,
    retries: i64,
    max_retries: i64,
    last_error: Option<String>,
    created_at: i64,
    available_at: i64,
    updated_at: i64,
}

impl JobRow {
    fn try_into_job(self) -> Result<Job> {
        Ok(Job {
            id: self.id.parse()?,
            work_type: self.work_type,
            subject: self.subject,
            priority: Priority::from_rank(self.priority)
                .ok_or_else(|| Error::Other(format!("invalid priority rank: {}", self.priority)))?,
            payload: serde_json::from_str(&self.payload)?,
            status: self.status.parse()?,
            retries: u32::try_from(self.retries).unwrap_or(0),
            max_retries: u32::try_from(self.max_retries).unwrap_or(0),
            last_error: self.last_error,
            created_at: from_millis(self.created_at)?,
            available_at: from_millis(self.available_at)?,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct JobRunRow {
    job_id: String,
    work_type: String,
    subject: String,
    attempt: i64,
    status: String,
    error: Option<String>,
    started_at: i64,
    finished_at: i64,
    duration_ms: i64,
}

impl JobRunRow {
    fn try_into_run(self) -> Result<JobRun> {
        Ok(JobRun {
            job_id: self.job_id.parse()?,
            work_type: self.work_type,
            subject: self.subject,
            attempt: u32::try_from(self.attempt).unwrap_or(0),
            status: self.status.parse()?,
            error: self.error,
            started_at: from_millis(self.started_at)?,
            finished_at: from_millis(self.finished_at)?,
            duration_ms: u64::try_from(self.duration_ms).unwrap_or(0),
        })
    }
}
