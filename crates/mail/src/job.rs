//! Mail job: a unit of outbound work and its lease lifecycle.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mailroom_core::{DomainError, FlowId, JobId, ProviderId, TemplateId};

use crate::JsonMap;
use crate::email::is_valid_email;

/// Priority given to jobs enqueued without one. Lower is more urgent.
pub const DEFAULT_JOB_PRIORITY: i32 = 5;

/// Job lifecycle status.
///
/// `pending -> processing -> {queued | sent | failed}`; `failed` and stale
/// `processing` jobs go back to `pending` only through an explicit release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed.
    Pending,
    /// Leased by a worker (`locked_by` is set).
    Processing,
    /// Handed to a provider, awaiting provider-side confirmation.
    Queued,
    /// Delivered.
    Sent,
    /// Last attempt failed; not retried unless released or re-enqueued.
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Queued,
        JobStatus::Sent,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Queued => "queued",
            JobStatus::Sent => "sent",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed)
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown job status '{s}'")))
    }
}

/// Input to `enqueue`: everything the caller controls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewMailJob {
    #[serde(default)]
    pub flow_id: Option<FlowId>,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    /// Explicit provider override.
    #[serde(default)]
    pub provider_id: Option<ProviderId>,
    pub recipient_email: String,
    #[serde(default)]
    pub recipient_name: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    /// Template variables. Without a template, `body` holds the raw message body.
    #[serde(default)]
    pub payload: JsonMap,
    #[serde(default)]
    pub metadata: JsonMap,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub available_at: Option<DateTime<Utc>>,
}

impl NewMailJob {
    pub fn new(recipient_email: impl Into<String>) -> Self {
        Self {
            recipient_email: recipient_email.into(),
            ..Default::default()
        }
    }

    pub fn with_template(mut self, template_id: TemplateId) -> Self {
        self.template_id = Some(template_id);
        self
    }

    pub fn with_flow(mut self, flow_id: FlowId) -> Self {
        self.flow_id = Some(flow_id);
        self
    }

    pub fn with_provider(mut self, provider_id: ProviderId) -> Self {
        self.provider_id = Some(provider_id);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_payload(mut self, payload: JsonMap) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_metadata(mut self, metadata: JsonMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if !is_valid_email(&self.recipient_email) {
            return Err(DomainError::validation(format!(
                "invalid recipient email '{}'",
                self.recipient_email
            )));
        }
        Ok(())
    }
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailJob {
    pub id: JobId,
    pub flow_id: Option<FlowId>,
    pub template_id: Option<TemplateId>,
    pub provider_id: Option<ProviderId>,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub subject: Option<String>,
    pub payload: JsonMap,
    pub metadata: JsonMap,
    pub priority: i32,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub scheduled_at: DateTime<Utc>,
    /// Backoff gate; `None` means "available as soon as scheduled".
    pub available_at: Option<DateTime<Utc>>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailJob {
    /// Materialize an enqueue request as a fresh `pending` job.
    pub fn from_new(id: JobId, new: NewMailJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            flow_id: new.flow_id,
            template_id: new.template_id,
            provider_id: new.provider_id,
            recipient_email: new.recipient_email.trim().to_string(),
            recipient_name: new.recipient_name,
            subject: new.subject,
            payload: new.payload,
            metadata: new.metadata,
            priority: new.priority.unwrap_or(DEFAULT_JOB_PRIORITY),
            status: JobStatus::Pending,
            attempt_count: 0,
            scheduled_at: new.scheduled_at.unwrap_or(now),
            available_at: Some(new.available_at.unwrap_or(now)),
            locked_at: None,
            locked_by: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `claim_pending` may pick this job at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.scheduled_at <= now
            && self.available_at.is_none_or(|at| at <= now)
    }

    /// Raw body for jobs sent without a template (`payload.body`).
    pub fn raw_body(&self) -> Option<&str> {
        self.payload.get("body").and_then(|v| v.as_str())
    }

    /// Take the lease.
    pub fn claim(&mut self, worker_id: &str, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.locked_at = Some(now);
        self.locked_by = Some(worker_id.to_string());
        self.updated_at = now;
    }

    pub fn mark_queued(&mut self, metadata: Option<JsonMap>, now: DateTime<Utc>) {
        self.status = JobStatus::Queued;
        self.clear_lease();
        if let Some(extra) = metadata {
            self.metadata.extend(extra);
        }
        self.updated_at = now;
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Sent;
        self.clear_lease();
        self.last_error = None;
        self.updated_at = now;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.attempt_count += 1;
        self.last_error = Some(error.into());
        self.clear_lease();
        self.updated_at = now;
    }

    /// Forcibly return the job to `pending` (stale-lease recovery).
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.clear_lease();
        self.updated_at = now;
    }

    fn clear_lease(&mut self) {
        self.locked_at = None;
        self.locked_by = None;
    }
}
