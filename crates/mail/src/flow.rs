//! Flow: a prioritized binding of one provider to an optional template scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mailroom_core::{FlowId, ProviderId, TemplateId};

use crate::provider::MAX_NAME_LEN;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDraft {
    pub name: String,
    pub provider_id: ProviderId,
    #[serde(default)]
    pub template_id: Option<TemplateId>,
    #[serde(default = "default_flow_priority")]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_flow_priority() -> i32 {
    5
}

fn default_active() -> bool {
    true
}

impl FlowDraft {
    pub fn new(name: impl Into<String>, provider_id: ProviderId) -> Self {
        Self {
            name: name.into(),
            provider_id,
            template_id: None,
            priority: default_flow_priority(),
            is_active: true,
            description: None,
        }
    }

    pub fn validate_shape(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let name = self.name.trim();
        if name.is_empty() {
            errors.push("name is required".to_string());
        } else if name.chars().count() > MAX_NAME_LEN {
            errors.push(format!("name must be at most {MAX_NAME_LEN} characters"));
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailFlow {
    pub id: FlowId,
    pub name: String,
    pub provider_id: ProviderId,
    pub template_id: Option<TemplateId>,
    pub priority: i32,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailFlow {
    pub fn new(id: FlowId, draft: FlowDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            provider_id: draft.provider_id,
            template_id: draft.template_id,
            priority: draft.priority,
            is_active: draft.is_active,
            description: draft.description,
            created_at: now,
            updated_at: now,
        }
    }
}
