//! Postgres-backed delivery log.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use mailroom_core::{FlowId, JobId, LogId, ProviderId, TemplateId};
use mailroom_mail::{LogStatus, MailLog, NewMailLog};

use super::store::{LogFilter, LogQueryResult, MailLogStore};
use crate::jobs::postgres::json_object;
use crate::store::{Pagination, StoreError, map_sqlx_error};

const LOG_COLUMNS: &str = r#"
    id, mail_job_id, mail_provider_id, mail_template_id, email_flow_id,
    recipient_email, recipient_name, cc, bcc, subject, body_preview, status,
    provider_message_id, provider_response, error, triggered_by, is_test,
    channel, metadata, created_at
"#;

// Optional filters are bound as NULL-able parameters so one statement
// serves every filter combination.
const LOG_FILTER: &str = r#"
    ($1::text IS NULL OR status = $1)
    AND ($2::uuid IS NULL OR mail_provider_id = $2)
    AND ($3::uuid IS NULL OR mail_template_id = $3)
    AND ($4::uuid IS NULL OR email_flow_id = $4)
    AND ($5::bool IS NULL OR is_test = $5)
    AND ($6::text IS NULL OR channel = $6)
    AND ($7::timestamptz IS NULL OR created_at >= $7)
    AND ($8::timestamptz IS NULL OR created_at <= $8)
    AND ($9::text IS NULL
         OR recipient_email ILIKE $9
         OR subject ILIKE $9
         OR COALESCE(error, '') ILIKE $9)
"#;

#[derive(Debug, Clone)]
pub struct PostgresMailLogStore {
    pool: Arc<PgPool>,
}

impl PostgresMailLogStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }
}

fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

fn decode_err(e: sqlx::Error) -> StoreError {
    map_sqlx_error("decode_log_row", e)
}

fn decode_log(row: &PgRow) -> Result<MailLog, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let status = status
        .parse::<LogStatus>()
        .map_err(|e| StoreError::Storage(format!("log {id}: {e}")))?;
    let job_id: Option<Uuid> = row.try_get("mail_job_id").map_err(decode_err)?;
    let provider_id: Option<Uuid> = row.try_get("mail_provider_id").map_err(decode_err)?;
    let template_id: Option<Uuid> = row.try_get("mail_template_id").map_err(decode_err)?;
    let flow_id: Option<Uuid> = row.try_get("email_flow_id").map_err(decode_err)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode_err)?;

    let entry = NewMailLog {
        job_id: job_id.map(JobId::from_uuid),
        provider_id: provider_id.map(ProviderId::from_uuid),
        template_id: template_id.map(TemplateId::from_uuid),
        flow_id: flow_id.map(FlowId::from_uuid),
        recipient_email: row.try_get("recipient_email").map_err(decode_err)?,
        recipient_name: row.try_get("recipient_name").map_err(decode_err)?,
        cc: row.try_get("cc").map_err(decode_err)?,
        bcc: row.try_get("bcc").map_err(decode_err)?,
        subject: row.try_get("subject").map_err(decode_err)?,
        body_preview: row.try_get("body_preview").map_err(decode_err)?,
        status,
        provider_message_id: row.try_get("provider_message_id").map_err(decode_err)?,
        provider_response: row.try_get("provider_response").map_err(decode_err)?,
        error: row.try_get("error").map_err(decode_err)?,
        triggered_by: row.try_get("triggered_by").map_err(decode_err)?,
        is_test: row.try_get("is_test").map_err(decode_err)?,
        channel: row.try_get("channel").map_err(decode_err)?,
        metadata: json_object(row.try_get("metadata").map_err(decode_err)?),
    };
    Ok(MailLog::new(LogId::from_uuid(id), entry, created_at))
}

#[async_trait]
impl MailLogStore for PostgresMailLogStore {
    #[instrument(skip(self, entry), fields(recipient = %entry.recipient_email, status = entry.status.as_str()), err)]
    async fn append(&self, entry: NewMailLog) -> Result<MailLog, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO mail_logs ({LOG_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, now())
            RETURNING {LOG_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::now_v7())
            .bind(entry.job_id.map(Uuid::from))
            .bind(entry.provider_id.map(Uuid::from))
            .bind(entry.template_id.map(Uuid::from))
            .bind(entry.flow_id.map(Uuid::from))
            .bind(&entry.recipient_email)
            .bind(&entry.recipient_name)
            .bind(&entry.cc)
            .bind(&entry.bcc)
            .bind(&entry.subject)
            .bind(&entry.body_preview)
            .bind(entry.status.as_str())
            .bind(&entry.provider_message_id)
            .bind(&entry.provider_response)
            .bind(&entry.error)
            .bind(&entry.triggered_by)
            .bind(entry.is_test)
            .bind(&entry.channel)
            .bind(serde_json::Value::Object(entry.metadata.clone()))
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("append_log", e))?;
        decode_log(&row)
    }

    #[instrument(skip(self, filter), err)]
    async fn query(
        &self,
        filter: LogFilter,
        pagination: Pagination,
    ) -> Result<LogQueryResult, StoreError> {
        let status = filter.status.map(|s| s.as_str());
        let provider_id = filter.provider_id.map(Uuid::from);
        let template_id = filter.template_id.map(Uuid::from);
        let flow_id = filter.flow_id.map(Uuid::from);
        let search = filter.search.as_deref().map(like_pattern);

        let count_sql = format!("SELECT COUNT(*) AS total FROM mail_logs WHERE {LOG_FILTER}");
        let count_row = sqlx::query(&count_sql)
            .bind(status)
            .bind(provider_id)
            .bind(template_id)
            .bind(flow_id)
            .bind(filter.is_test)
            .bind(filter.channel.as_deref())
            .bind(filter.from)
            .bind(filter.to)
            .bind(search.as_deref())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_logs", e))?;
        let total: i64 = count_row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_logs", e))?;

        let page_sql = format!(
            r#"
            SELECT {LOG_COLUMNS} FROM mail_logs
            WHERE {LOG_FILTER}
            ORDER BY created_at DESC, id DESC
            LIMIT $10 OFFSET $11
            "#
        );
        let rows = sqlx::query(&page_sql)
            .bind(status)
            .bind(provider_id)
            .bind(template_id)
            .bind(flow_id)
            .bind(filter.is_test)
            .bind(filter.channel.as_deref())
            .bind(filter.from)
            .bind(filter.to)
            .bind(search.as_deref())
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_logs", e))?;

        let logs = rows.iter().map(decode_log).collect::<Result<Vec<_>, _>>()?;
        Ok(LogQueryResult::new(
            logs,
            u64::try_from(total).unwrap_or(0),
            pagination,
        ))
    }

    #[instrument(skip(self), fields(provider_id = %provider_id), err)]
    async fn count_delivered_since(
        &self,
        provider_id: ProviderId,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total FROM mail_logs
            WHERE mail_provider_id = $1
                AND status IN ('sent', 'queued')
                AND created_at >= $2
            "#,
        )
        .bind(provider_id.as_uuid())
        .bind(since)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_delivered_since", e))?;
        let total: i64 = row
            .try_get("total")
            .map_err(|e| map_sqlx_error("count_delivered_since", e))?;
        Ok(u64::try_from(total).unwrap_or(0))
    }
}
