//! `mailroom-mail`: transactional mail domain.
//!
//! Plain data types for jobs, providers, flows, templates and delivery log
//! rows, plus the pure logic that operates on them (config validation,
//! placeholder extraction and rendering). No I/O lives here.

pub mod email;
pub mod flow;
pub mod job;
pub mod log;
pub mod provider;
pub mod template;

pub use email::is_valid_email;
pub use flow::{FlowDraft, MailFlow};
pub use job::{JobStatus, MailJob, NewMailJob, DEFAULT_JOB_PRIORITY};
pub use log::{body_preview, LogStatus, MailLog, NewMailLog, BODY_PREVIEW_CHARS};
pub use provider::{validate_config, MailProvider, ProviderSettings, ProviderType};
pub use template::{
    extract_variables, render, validate, MailTemplate, RecipientMode, RenderedTemplate,
    TemplateDraft,
};

/// Free-form JSON object used for payloads, metadata and provider config.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;
