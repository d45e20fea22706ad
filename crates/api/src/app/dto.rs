use chrono::{DateTime, Utc};
use serde::Deserialize;

use mailroom_core::{FlowId, JobId, ProviderId, TemplateId};
use mailroom_mail::{JsonMap, LogStatus, NewMailJob, ProviderSettings};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct TestConnectionRequest {
    #[serde(default)]
    pub test_email: Option<String>,
}

/// Unsaved provider settings plus an optional test recipient.
#[derive(Debug, Deserialize)]
pub struct TestSettingsRequest {
    #[serde(flatten)]
    pub settings: ProviderSettings,
    #[serde(default)]
    pub test_email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessTemplateRequest {
    #[serde(default)]
    pub variables: JsonMap,
}

#[derive(Debug, Deserialize)]
pub struct CloneTemplateRequest {
    pub new_name: String,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseJobsRequest {
    pub job_ids: Vec<JobId>,
}

#[derive(Debug, Deserialize)]
pub struct BulkSendRequest {
    pub messages: Vec<NewMailJob>,
}

// -------------------------
// Query parameters
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct LogListQuery {
    pub status: Option<LogStatus>,
    pub provider_id: Option<ProviderId>,
    pub template_id: Option<TemplateId>,
    pub flow_id: Option<FlowId>,
    pub is_test: Option<bool>,
    pub channel: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct StaleJobsQuery {
    /// Lease age threshold; defaults to five minutes.
    pub older_than_secs: Option<i64>,
}
