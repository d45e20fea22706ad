//! Job storage contract and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use mailroom_core::JobId;
use mailroom_mail::{JobStatus, JsonMap, MailJob, NewMailJob};

use crate::store::StoreError;

/// Job store abstraction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new `pending` job.
    async fn enqueue(&self, job: NewMailJob) -> Result<MailJob, StoreError>;

    /// Get a job by ID.
    async fn get(&self, job_id: JobId) -> Result<Option<MailJob>, StoreError>;

    /// Lease up to `limit` eligible jobs to `worker_id`.
    ///
    /// Eligible: `pending`, `scheduled_at <= now`, `available_at` unset or
    /// `<= now`. Returned in (priority, created_at) order. Selection and
    /// leasing are one atomic step; no state changes when this fails.
    async fn claim_pending(&self, limit: usize, worker_id: &str)
    -> Result<Vec<MailJob>, StoreError>;

    /// `queued`, lease cleared, `metadata` merged into the job's metadata.
    async fn mark_as_queued(
        &self,
        job_id: JobId,
        metadata: Option<JsonMap>,
    ) -> Result<MailJob, StoreError>;

    /// `sent`, lease and last error cleared.
    ///
    /// The `mark_as_*` transitions only apply to `processing` jobs; any
    /// other status is a `Conflict` and the row is left untouched.
    async fn mark_as_sent(&self, job_id: JobId) -> Result<MailJob, StoreError>;

    /// `failed`, attempt count + 1, error recorded, lease cleared.
    async fn mark_as_failed(&self, job_id: JobId, error: &str) -> Result<MailJob, StoreError>;

    /// Return `processing` or `failed` jobs to `pending` with no lease.
    /// Other ids are ignored. Returns how many jobs were released.
    async fn release(&self, job_ids: &[JobId]) -> Result<u64, StoreError>;

    /// `processing` jobs whose lease is older than `older_than`, oldest first.
    async fn list_stale(&self, older_than: Duration) -> Result<Vec<MailJob>, StoreError>;

    /// Job counts per status.
    async fn stats(&self) -> Result<JobStats, StoreError>;
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: u64,
    pub processing: u64,
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
}

impl JobStats {
    pub(crate) fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Processing => self.processing += count,
            JobStatus::Queued => self.queued += count,
            JobStatus::Sent => self.sent += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

pub(crate) fn not_processing(job_id: JobId, status: JobStatus) -> StoreError {
    StoreError::Conflict(format!("job {job_id} is {status}, not processing"))
}

pub(crate) fn is_releasable(status: JobStatus) -> bool {
    matches!(status, JobStatus::Processing | JobStatus::Failed)
}

/// In-memory job store for tests/dev.
///
/// `claim_pending` holds the write lock across select and update.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, MailJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Apply a terminal transition to a job that is still `processing`.
    fn finish<F>(&self, job_id: JobId, apply: F) -> Result<MailJob, StoreError>
    where
        F: FnOnce(&mut MailJob, DateTime<Utc>),
    {
        let mut jobs = self.jobs.write()?;
        let job = jobs
            .get_mut(&job_id)
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        if job.status != JobStatus::Processing {
            return Err(not_processing(job_id, job.status));
        }
        apply(job, Utc::now());
        Ok(job.clone())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewMailJob) -> Result<MailJob, StoreError> {
        let job = MailJob::from_new(JobId::new(), job, Utc::now());
        self.jobs.write()?.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<MailJob>, StoreError> {
        Ok(self.jobs.read()?.get(&job_id).cloned())
    }

    async fn claim_pending(
        &self,
        limit: usize,
        worker_id: &str,
    ) -> Result<Vec<MailJob>, StoreError> {
        let mut jobs = self.jobs.write()?;
        let now = Utc::now();

        let mut candidates: Vec<_> = jobs
            .values()
            .filter(|j| j.is_claimable(now))
            .map(|j| (j.priority, j.created_at, j.id))
            .collect();
        candidates.sort();
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, _, id) in candidates {
            if let Some(job) = jobs.get_mut(&id) {
                job.claim(worker_id, now);
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_as_queued(
        &self,
        job_id: JobId,
        metadata: Option<JsonMap>,
    ) -> Result<MailJob, StoreError> {
        self.finish(job_id, |job, now| job.mark_queued(metadata, now))
    }

    async fn mark_as_sent(&self, job_id: JobId) -> Result<MailJob, StoreError> {
        self.finish(job_id, |job, now| job.mark_sent(now))
    }

    async fn mark_as_failed(&self, job_id: JobId, error: &str) -> Result<MailJob, StoreError> {
        self.finish(job_id, |job, now| job.mark_failed(error, now))
    }

    async fn release(&self, job_ids: &[JobId]) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.write()?;
        let now = Utc::now();
        let mut released = 0;
        for id in job_ids {
            if let Some(job) = jobs.get_mut(id) {
                if is_releasable(job.status) {
                    job.release(now);
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn list_stale(&self, older_than: Duration) -> Result<Vec<MailJob>, StoreError> {
        let cutoff = Utc::now() - older_than;
        let jobs = self.jobs.read()?;
        let mut stale: Vec<_> = jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::Processing && j.locked_at.is_some_and(|at| at <= cutoff)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|j| j.locked_at);
        Ok(stale)
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let jobs = self.jobs.read()?;
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.add(job.status, 1);
        }
        Ok(stats)
    }
}

#[async_trait]
impl<S: JobStore + ?Sized> JobStore for Arc<S> {
    async fn enqueue(&self, job: NewMailJob) -> Result<MailJob, StoreError> {
        (**self).enqueue(job).await
    }

    async fn get(&self, job_id: JobId) -> Result<Option<MailJob>, StoreError> {
        (**self).get(job_id).await
    }

    async fn claim_pending(
        &self,
        limit: usize,
        worker_id: &str,
    ) -> Result<Vec<MailJob>, StoreError> {
        (**self).claim_pending(limit, worker_id).await
    }

    async fn mark_as_queued(
        &self,
        job_id: JobId,
        metadata: Option<JsonMap>,
    ) -> Result<MailJob, StoreError> {
        (**self).mark_as_queued(job_id, metadata).await
    }

    async fn mark_as_sent(&self, job_id: JobId) -> Result<MailJob, StoreError> {
        (**self).mark_as_sent(job_id).await
    }

    async fn mark_as_failed(&self, job_id: JobId, error: &str) -> Result<MailJob, StoreError> {
        (**self).mark_as_failed(job_id, error).await
    }

    async fn release(&self, job_ids: &[JobId]) -> Result<u64, StoreError> {
        (**self).release(job_ids).await
    }

    async fn list_stale(&self, older_than: Duration) -> Result<Vec<MailJob>, StoreError> {
        (**self).list_stale(older_than).await
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        (**self).stats().await
    }
}
