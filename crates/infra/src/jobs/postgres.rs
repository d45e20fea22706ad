//! Postgres-backed job store.
//!
//! ## Claiming
//!
//! `claim_pending` is a single `UPDATE ... WHERE id IN (SELECT ... FOR UPDATE
//! SKIP LOCKED) RETURNING ...` statement. Rows locked by a concurrent claimer
//! are skipped rather than waited on, so concurrent workers receive disjoint
//! sets and never block each other. `RETURNING` does not preserve the inner
//! `ORDER BY`, so the claimed rows are re-sorted client-side.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use mailroom_core::{FlowId, JobId, ProviderId, TemplateId};
use mailroom_mail::{JobStatus, JsonMap, MailJob, NewMailJob};

use super::store::{JobStats, JobStore, not_processing};
use crate::store::{StoreError, map_sqlx_error};

const JOB_COLUMNS: &str = r#"
    id, email_flow_id, mail_template_id, mail_provider_id,
    recipient_email, recipient_name, subject, payload, metadata,
    priority, status, attempt_count, scheduled_at, available_at,
    locked_at, locked_by, last_error, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: Arc<PgPool>,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn fetch_one_returning(
        &self,
        operation: &str,
        sql: &str,
        job_id: JobId,
        bind_error: Option<&str>,
        bind_metadata: Option<serde_json::Value>,
    ) -> Result<MailJob, StoreError> {
        let mut query = sqlx::query(sql).bind(job_id.as_uuid());
        if let Some(error) = bind_error {
            query = query.bind(error);
        }
        if let Some(metadata) = bind_metadata {
            query = query.bind(metadata);
        }
        let row = query
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        match row {
            Some(row) => decode_job(&row),
            None => Err(self.transition_refused(operation, job_id).await),
        }
    }

    /// Why a guarded `UPDATE` matched nothing: missing row or wrong status.
    async fn transition_refused(&self, operation: &str, job_id: JobId) -> StoreError {
        let status: Option<String> =
            match sqlx::query_scalar("SELECT status FROM mail_jobs WHERE id = $1")
                .bind(job_id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
            {
                Ok(status) => status,
                Err(e) => return map_sqlx_error(operation, e),
            };
        match status.map(|s| s.parse::<JobStatus>()) {
            None => StoreError::NotFound(format!("job {job_id}")),
            Some(Ok(status)) => not_processing(job_id, status),
            Some(Err(e)) => StoreError::Storage(e.to_string()),
        }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, job), fields(recipient = %job.recipient_email), err)]
    async fn enqueue(&self, job: NewMailJob) -> Result<MailJob, StoreError> {
        let job = MailJob::from_new(JobId::new(), job, Utc::now());
        let sql = format!(
            r#"
            INSERT INTO mail_jobs (
                id, email_flow_id, mail_template_id, mail_provider_id,
                recipient_email, recipient_name, subject, payload, metadata,
                priority, status, attempt_count, scheduled_at, available_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', 0, $11, $12, $13, $13)
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(job.id.as_uuid())
            .bind(job.flow_id.map(Uuid::from))
            .bind(job.template_id.map(Uuid::from))
            .bind(job.provider_id.map(Uuid::from))
            .bind(&job.recipient_email)
            .bind(&job.recipient_name)
            .bind(&job.subject)
            .bind(serde_json::Value::Object(job.payload.clone()))
            .bind(serde_json::Value::Object(job.metadata.clone()))
            .bind(job.priority)
            .bind(job.scheduled_at)
            .bind(job.available_at)
            .bind(job.created_at)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("enqueue", e))?;
        decode_job(&row)
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn get(&self, job_id: JobId) -> Result<Option<MailJob>, StoreError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM mail_jobs WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_job", e))?;
        row.as_ref().map(decode_job).transpose()
    }

    #[instrument(skip(self), fields(claimed = tracing::field::Empty), err)]
    async fn claim_pending(
        &self,
        limit: usize,
        worker_id: &str,
    ) -> Result<Vec<MailJob>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            UPDATE mail_jobs
            SET status = 'processing', locked_at = now(), locked_by = $2, updated_at = now()
            WHERE id IN (
                SELECT id FROM mail_jobs
                WHERE status = 'pending'
                    AND scheduled_at <= now()
                    AND (available_at IS NULL OR available_at <= now())
                ORDER BY priority ASC, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(worker_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("claim_pending", e))?;

        let mut jobs = rows
            .iter()
            .map(decode_job)
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by_key(|j| (j.priority, j.created_at, j.id));

        Span::current().record("claimed", jobs.len());
        Ok(jobs)
    }

    #[instrument(skip(self, metadata), fields(job_id = %job_id), err)]
    async fn mark_as_queued(
        &self,
        job_id: JobId,
        metadata: Option<JsonMap>,
    ) -> Result<MailJob, StoreError> {
        let sql = format!(
            r#"
            UPDATE mail_jobs
            SET status = 'queued', locked_at = NULL, locked_by = NULL,
                metadata = COALESCE(metadata, '{{}}'::jsonb) || $2::jsonb,
                updated_at = now()
            WHERE id = $1 AND status = 'processing'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let extra = serde_json::Value::Object(metadata.unwrap_or_default());
        self.fetch_one_returning("mark_as_queued", &sql, job_id, None, Some(extra))
            .await
    }

    #[instrument(skip(self), fields(job_id = %job_id), err)]
    async fn mark_as_sent(&self, job_id: JobId) -> Result<MailJob, StoreError> {
        let sql = format!(
            r#"
            UPDATE mail_jobs
            SET status = 'sent', locked_at = NULL, locked_by = NULL,
                last_error = NULL, updated_at = now()
            WHERE id = $1 AND status = 'processing'
            RETURNING {JOB_COLUMNS}
            "#
        );
        self.fetch_one_returning("mark_as_sent", &sql, job_id, None, None)
            .await
    }

    #[instrument(skip(self, error), fields(job_id = %job_id), err)]
    async fn mark_as_failed(&self, job_id: JobId, error: &str) -> Result<MailJob, StoreError> {
        let sql = format!(
            r#"
            UPDATE mail_jobs
            SET status = 'failed', attempt_count = attempt_count + 1,
                last_error = $2, locked_at = NULL, locked_by = NULL, updated_at = now()
            WHERE id = $1 AND status = 'processing'
            RETURNING {JOB_COLUMNS}
            "#
        );
        self.fetch_one_returning("mark_as_failed", &sql, job_id, Some(error), None)
            .await
    }

    #[instrument(skip(self, job_ids), fields(count = job_ids.len()), err)]
    async fn release(&self, job_ids: &[JobId]) -> Result<u64, StoreError> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<Uuid> = job_ids.iter().map(|id| *id.as_uuid()).collect();
        let result = sqlx::query(
            r#"
            UPDATE mail_jobs
            SET status = 'pending', locked_at = NULL, locked_by = NULL, updated_at = now()
            WHERE id = ANY($1) AND status IN ('processing', 'failed')
            "#,
        )
        .bind(ids)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("release", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn list_stale(&self, older_than: Duration) -> Result<Vec<MailJob>, StoreError> {
        let cutoff = Utc::now() - older_than;
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS} FROM mail_jobs
            WHERE status = 'processing' AND locked_at <= $1
            ORDER BY locked_at ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_stale", e))?;
        rows.iter().map(decode_job).collect()
    }

    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<JobStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM mail_jobs GROUP BY status")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("job_stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row
                .try_get("status")
                .map_err(|e| map_sqlx_error("job_stats", e))?;
            let total: i64 = row
                .try_get("total")
                .map_err(|e| map_sqlx_error("job_stats", e))?;
            let status = status
                .parse::<JobStatus>()
                .map_err(|e| StoreError::Storage(e.to_string()))?;
            stats.add(status, u64::try_from(total).unwrap_or(0));
        }
        Ok(stats)
    }
}

/// Row structure for `mail_jobs`.
#[derive(Debug)]
struct JobRow {
    id: Uuid,
    email_flow_id: Option<Uuid>,
    mail_template_id: Option<Uuid>,
    mail_provider_id: Option<Uuid>,
    recipient_email: String,
    recipient_name: Option<String>,
    subject: Option<String>,
    payload: Option<serde_json::Value>,
    metadata: Option<serde_json::Value>,
    priority: i32,
    status: String,
    attempt_count: i32,
    scheduled_at: DateTime<Utc>,
    available_at: Option<DateTime<Utc>>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, StoreError> {
        let read = |e| map_sqlx_error("decode_job_row", e);
        Ok(JobRow {
            id: row.try_get("id").map_err(read)?,
            email_flow_id: row.try_get("email_flow_id").map_err(read)?,
            mail_template_id: row.try_get("mail_template_id").map_err(read)?,
            mail_provider_id: row.try_get("mail_provider_id").map_err(read)?,
            recipient_email: row.try_get("recipient_email").map_err(read)?,
            recipient_name: row.try_get("recipient_name").map_err(read)?,
            subject: row.try_get("subject").map_err(read)?,
            payload: row.try_get("payload").map_err(read)?,
            metadata: row.try_get("metadata").map_err(read)?,
            priority: row.try_get("priority").map_err(read)?,
            status: row.try_get("status").map_err(read)?,
            attempt_count: row.try_get("attempt_count").map_err(read)?,
            scheduled_at: row.try_get("scheduled_at").map_err(read)?,
            available_at: row.try_get("available_at").map_err(read)?,
            locked_at: row.try_get("locked_at").map_err(read)?,
            locked_by: row.try_get("locked_by").map_err(read)?,
            last_error: row.try_get("last_error").map_err(read)?,
            created_at: row.try_get("created_at").map_err(read)?,
            updated_at: row.try_get("updated_at").map_err(read)?,
        })
    }
}

fn decode_job(row: &sqlx::postgres::PgRow) -> Result<MailJob, StoreError> {
    JobRow::from_row(row)?.try_into()
}

pub(crate) fn json_object(value: Option<serde_json::Value>) -> JsonMap {
    match value {
        Some(serde_json::Value::Object(map)) => map,
        _ => JsonMap::new(),
    }
}

impl TryFrom<JobRow> for MailJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Storage(format!("job {}: {e}", row.id)))?;
        Ok(MailJob {
            id: JobId::from_uuid(row.id),
            flow_id: row.email_flow_id.map(FlowId::from_uuid),
            template_id: row.mail_template_id.map(TemplateId::from_uuid),
            provider_id: row.mail_provider_id.map(ProviderId::from_uuid),
            recipient_email: row.recipient_email,
            recipient_name: row.recipient_name,
            subject: row.subject,
            payload: json_object(row.payload),
            metadata: json_object(row.metadata),
            priority: row.priority,
            status,
            attempt_count: u32::try_from(row.attempt_count).unwrap_or(0),
            scheduled_at: row.scheduled_at,
            available_at: row.available_at,
            locked_at: row.locked_at,
            locked_by: row.locked_by,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
