//! Templates: `{{variable}}` placeholder extraction, rendering and validation.

use std::collections::HashSet;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use mailroom_core::{DomainError, FlowId, TemplateId};

use crate::JsonMap;
use crate::email::is_valid_email;
use crate::provider::MAX_NAME_LEN;

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{([^}]+)\}\}").expect("placeholder regex is valid"))
}

/// Who receives mail rendered from a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RecipientMode {
    /// The job's own recipient.
    #[default]
    Explicit,
    /// Always this address (staff notifications and the like).
    Fixed { email: String, name: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDraft {
    pub name: String,
    pub subject: String,
    pub body: String,
    pub template_type: String,
    /// Declared variables; detected from the content when absent or empty.
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub recipient_mode: RecipientMode,
    pub flow_id: FlowId,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_active() -> bool {
    true
}

impl TemplateDraft {
    pub fn new(
        name: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        flow_id: FlowId,
    ) -> Self {
        Self {
            name: name.into(),
            subject: subject.into(),
            body: body.into(),
            template_type: "transactional".to_string(),
            variables: None,
            recipient_mode: RecipientMode::Explicit,
            flow_id,
            is_active: true,
            description: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailTemplate {
    pub id: TemplateId,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub template_type: String,
    pub variables: Vec<String>,
    pub recipient_mode: RecipientMode,
    pub flow_id: FlowId,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailTemplate {
    pub fn new(id: TemplateId, draft: TemplateDraft, now: DateTime<Utc>) -> Self {
        let variables = match draft.variables {
            Some(declared) if !declared.is_empty() => declared,
            _ => extract_variables(&draft.subject, &draft.body),
        };
        Self {
            id,
            name: draft.name.trim().to_string(),
            subject: draft.subject,
            body: draft.body,
            template_type: draft.template_type,
            variables,
            recipient_mode: draft.recipient_mode,
            flow_id: draft.flow_id,
            is_active: draft.is_active,
            description: draft.description,
            created_at: now,
            updated_at: now,
        }
    }

    /// Back to an editable draft (used by clone and partial updates).
    pub fn to_draft(&self) -> TemplateDraft {
        TemplateDraft {
            name: self.name.clone(),
            subject: self.subject.clone(),
            body: self.body.clone(),
            template_type: self.template_type.clone(),
            variables: Some(self.variables.clone()),
            recipient_mode: self.recipient_mode.clone(),
            flow_id: self.flow_id,
            is_active: self.is_active,
            description: self.description.clone(),
        }
    }
}

/// Output of [`render`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedTemplate {
    pub subject: String,
    pub body: String,
    /// Placeholders whose variable was absent or null. Informational only.
    pub missing_variables: Vec<String>,
}

/// Placeholder names in `subject` then `body`, deduplicated, in order of
/// first appearance.
pub fn extract_variables(subject: &str, body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    [subject, body]
        .into_iter()
        .flat_map(|text| placeholder().captures_iter(text))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

fn value_to_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn substitute(text: &str, variables: &JsonMap, missing: &mut Vec<String>) -> String {
    placeholder()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match variables.get(name) {
                Some(value) if !value.is_null() => value_to_text(value),
                _ => {
                    if !missing.iter().any(|m| m == name) {
                        missing.push(name.to_string());
                    }
                    String::new()
                }
            }
        })
        .into_owned()
}

/// Replace every `{{name}}` in subject and body. Never fails: missing values
/// render as empty strings and are listed in `missing_variables`.
pub fn render(template: &MailTemplate, variables: &JsonMap) -> RenderedTemplate {
    render_parts(&template.subject, &template.body, variables)
}

pub fn render_parts(subject: &str, body: &str, variables: &JsonMap) -> RenderedTemplate {
    let mut missing = Vec::new();
    let subject = substitute(subject, variables, &mut missing);
    let body = substitute(body, variables, &mut missing);
    RenderedTemplate {
        subject,
        body,
        missing_variables: missing,
    }
}

/// Reject drafts with empty required fields or unbalanced `{{`/`}}` counts.
pub fn validate(draft: &TemplateDraft) -> Result<(), DomainError> {
    let mut errors = Vec::new();

    let name = draft.name.trim();
    if name.is_empty() {
        errors.push("name is required".to_string());
    } else if name.chars().count() > MAX_NAME_LEN {
        errors.push(format!("name must be at most {MAX_NAME_LEN} characters"));
    }
    if draft.subject.trim().is_empty() {
        errors.push("subject is required".to_string());
    }
    if draft.body.trim().is_empty() {
        errors.push("body is required".to_string());
    }
    if draft.template_type.trim().is_empty() {
        errors.push("type is required".to_string());
    }

    let content = format!("{}{}", draft.subject, draft.body);
    let opens = content.matches("{{").count();
    let closes = content.matches("}}").count();
    if opens != closes {
        errors.push(format!(
            "unbalanced placeholders: {opens} '{{{{' vs {closes} '}}}}'"
        ));
    }

    if let RecipientMode::Fixed { email, .. } = &draft.recipient_mode {
        if !is_valid_email(email) {
            errors.push(format!("invalid fixed recipient email '{email}'"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(DomainError::Validation(errors))
    }
}
