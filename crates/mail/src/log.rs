//! Delivery log: one immutable audit row per send attempt.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mailroom_core::{DomainError, FlowId, JobId, LogId, ProviderId, TemplateId};

use crate::JsonMap;

/// Bodies are stored as a preview of at most this many characters.
pub const BODY_PREVIEW_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Sent,
    Queued,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Sent => "sent",
            LogStatus::Queued => "queued",
            LogStatus::Failed => "failed",
        }
    }
}

impl FromStr for LogStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(LogStatus::Sent),
            "queued" => Ok(LogStatus::Queued),
            "failed" => Ok(LogStatus::Failed),
            other => Err(DomainError::validation(format!("unknown log status '{other}'"))),
        }
    }
}

/// Truncate a rendered body to the stored preview length, on a char boundary.
pub fn body_preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

/// Log row as written by the delivery path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMailLog {
    pub job_id: Option<JobId>,
    pub provider_id: Option<ProviderId>,
    pub template_id: Option<TemplateId>,
    pub flow_id: Option<FlowId>,
    pub recipient_email: String,
    pub recipient_name: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body_preview: String,
    pub status: LogStatus,
    pub provider_message_id: Option<String>,
    pub provider_response: Option<serde_json::Value>,
    pub error: Option<String>,
    pub triggered_by: Option<String>,
    pub is_test: bool,
    pub channel: String,
    pub metadata: JsonMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailLog {
    pub id: LogId,
    #[serde(flatten)]
    pub entry: NewMailLog,
    pub created_at: DateTime<Utc>,
}

impl MailLog {
    pub fn new(id: LogId, entry: NewMailLog, now: DateTime<Utc>) -> Self {
        Self {
            id,
            entry,
            created_at: now,
        }
    }
}
