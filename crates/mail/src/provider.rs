//! Outbound provider configuration and its validation rules.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mailroom_core::{DomainError, ProviderId};

use crate::JsonMap;
use crate::email::is_valid_email;

pub const MIN_PROVIDER_PRIORITY: u8 = 1;
pub const MAX_PROVIDER_PRIORITY: u8 = 10;
pub const MAX_NAME_LEN: usize = 100;

/// Kind of outbound channel. Everything but `Smtp` is an HTTPS API vendor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    Smtp,
    Sendgrid,
    Mailgun,
    Ses,
    Postmark,
    Mandrill,
}

impl ProviderType {
    pub const ALL: [ProviderType; 6] = [
        ProviderType::Smtp,
        ProviderType::Sendgrid,
        ProviderType::Mailgun,
        ProviderType::Ses,
        ProviderType::Postmark,
        ProviderType::Mandrill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Smtp => "smtp",
            ProviderType::Sendgrid => "sendgrid",
            ProviderType::Mailgun => "mailgun",
            ProviderType::Ses => "ses",
            ProviderType::Postmark => "postmark",
            ProviderType::Mandrill => "mandrill",
        }
    }

    pub fn is_api(&self) -> bool {
        !matches!(self, ProviderType::Smtp)
    }
}

impl core::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown provider type '{s}'")))
    }
}

/// Editable part of a provider: what admins create, update and test.
///
/// SMTP uses `host`/`port`/`secure`/`username`/`password`; API vendors use
/// `api_key` (SES: access key id) and `api_secret` (SES: secret key).
/// `api_host` overrides a vendor's API base URL. Vendor extras live in
/// `config` (Mailgun `domain`, SES `region`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub name: String,
    pub provider_type: ProviderType,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_secret: Option<String>,
    #[serde(default)]
    pub api_host: Option<String>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub from_name: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    /// 1 is tried first, 10 last.
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub hourly_limit: Option<u32>,
    #[serde(default)]
    pub daily_limit: Option<u32>,
    #[serde(default)]
    pub config: JsonMap,
}

fn default_priority() -> u8 {
    5
}

impl ProviderSettings {
    pub fn new(name: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            name: name.into(),
            provider_type,
            host: None,
            port: None,
            secure: false,
            username: None,
            password: None,
            api_key: None,
            api_secret: None,
            api_host: None,
            from_email: None,
            from_name: None,
            reply_to: None,
            is_active: false,
            priority: default_priority(),
            hourly_limit: None,
            daily_limit: None,
            config: JsonMap::new(),
        }
    }

    /// Structural checks applied on every create/update, independent of
    /// whether the provider is usable for sending yet.
    pub fn validate_shape(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let name = self.name.trim();
        if name.is_empty() {
            errors.push("name is required".to_string());
        } else if name.chars().count() > MAX_NAME_LEN {
            errors.push(format!("name must be at most {MAX_NAME_LEN} characters"));
        }
        if !(MIN_PROVIDER_PRIORITY..=MAX_PROVIDER_PRIORITY).contains(&self.priority) {
            errors.push(format!(
                "priority must be between {MIN_PROVIDER_PRIORITY} and {MAX_PROVIDER_PRIORITY}"
            ));
        }
        if self.port == Some(0) {
            errors.push("port must be between 1 and 65535".to_string());
        }
        errors
    }
}

/// A stored provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailProvider {
    pub id: ProviderId,
    #[serde(flatten)]
    pub settings: ProviderSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailProvider {
    pub fn new(id: ProviderId, settings: ProviderSettings, now: DateTime<Utc>) -> Self {
        Self {
            id,
            settings,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn provider_type(&self) -> ProviderType {
        self.settings.provider_type
    }

    pub fn is_active(&self) -> bool {
        self.settings.is_active
    }

    pub fn priority(&self) -> u8 {
        self.settings.priority
    }

    /// Active and passing `validate_config`.
    pub fn is_sendable(&self) -> bool {
        self.is_active() && validate_config(&self.settings).is_empty()
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().is_none_or(|v| v.trim().is_empty())
}

fn config_str<'a>(settings: &'a ProviderSettings, key: &str) -> Option<&'a str> {
    settings
        .config
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Check that a provider carries the credentials its type needs and that its
/// addresses are well formed. Returns every problem found; empty means valid.
pub fn validate_config(settings: &ProviderSettings) -> Vec<String> {
    let mut errors = Vec::new();

    match settings.provider_type {
        ProviderType::Smtp => {
            if is_blank(&settings.host) {
                errors.push("SMTP host is required".to_string());
            }
            if settings.port.is_none_or(|p| p == 0) {
                errors.push("SMTP port is required".to_string());
            }
        }
        api => {
            if is_blank(&settings.api_key) {
                errors.push(format!("API key is required for {api}"));
            }
        }
    }

    match settings.provider_type {
        ProviderType::Ses if is_blank(&settings.api_secret) => {
            errors.push("AWS secret key (api_secret) is required for ses".to_string());
        }
        ProviderType::Mailgun if config_str(settings, "domain").is_none() => {
            errors.push("Mailgun sending domain (config.domain) is required".to_string());
        }
        _ => {}
    }

    if let Some(from) = settings.from_email.as_deref() {
        if !is_valid_email(from) {
            errors.push(format!("invalid default from email '{from}'"));
        }
    }
    if let Some(reply_to) = settings.reply_to.as_deref() {
        if !is_valid_email(reply_to) {
            errors.push(format!("invalid reply-to email '{reply_to}'"));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smtp() -> ProviderSettings {
        let mut s = ProviderSettings::new("primary", ProviderType::Smtp);
        s.host = Some("smtp.example.com".into());
        s.port = Some(587);
        s
    }

    #[test]
    fn complete_smtp_config_is_valid() {
        assert!(validate_config(&smtp()).is_empty());
    }

    #[test]
    fn smtp_requires_host_and_port() {
        let mut s = smtp();
        s.host = Some("   ".into());
        s.port = None;
        let errors = validate_config(&s);
        assert_eq!(errors, vec!["SMTP host is required", "SMTP port is required"]);
    }

    #[test]
    fn api_vendors_require_a_key() {
        let mut s = ProviderSettings::new("sg", ProviderType::Sendgrid);
        assert_eq!(validate_config(&s), vec!["API key is required for sendgrid"]);

        s.api_key = Some("SG.xxx".into());
        assert!(validate_config(&s).is_empty());
    }

    #[test]
    fn ses_requires_a_secret_key() {
        let mut s = ProviderSettings::new("ses", ProviderType::Ses);
        s.api_key = Some("AKIDEXAMPLE".into());
        assert_eq!(
            validate_config(&s),
            vec!["AWS secret key (api_secret) is required for ses"]
        );

        s.api_secret = Some("  ".into());
        assert_eq!(validate_config(&s).len(), 1);

        s.api_secret = Some("wJalrXUtnFEMI".into());
        assert!(validate_config(&s).is_empty());
    }

    #[test]
    fn mailgun_requires_a_sending_domain() {
        let mut s = ProviderSettings::new("mg", ProviderType::Mailgun);
        s.api_key = Some("key-xxx".into());
        assert_eq!(
            validate_config(&s),
            vec!["Mailgun sending domain (config.domain) is required"]
        );

        s.config.insert("domain".into(), " ".into());
        assert_eq!(validate_config(&s).len(), 1);

        s.config.insert("domain".into(), "mg.example.com".into());
        assert!(validate_config(&s).is_empty());
    }

    #[test]
    fn malformed_addresses_are_reported() {
        let mut s = smtp();
        s.from_email = Some("noreply".into());
        s.reply_to = Some("support@example.com".into());
        assert_eq!(validate_config(&s).len(), 1);

        s.reply_to = Some("support@".into());
        assert_eq!(validate_config(&s).len(), 2);
    }

    #[test]
    fn shape_checks_name_and_priority() {
        let mut s = smtp();
        s.priority = 11;
        s.name = String::new();
        assert_eq!(s.validate_shape().len(), 2);

        s.priority = 1;
        s.name = "x".repeat(MAX_NAME_LEN);
        assert!(s.validate_shape().is_empty());
    }

    #[test]
    fn inactive_or_invalid_providers_are_not_sendable() {
        let now = Utc::now();
        let mut settings = smtp();
        let p = MailProvider::new(ProviderId::new(), settings.clone(), now);
        assert!(!p.is_sendable());

        settings.is_active = true;
        settings.host = None;
        let p = MailProvider::new(ProviderId::new(), settings.clone(), now);
        assert!(!p.is_sendable());

        settings.host = Some("smtp.example.com".into());
        let p = MailProvider::new(ProviderId::new(), settings, now);
        assert!(p.is_sendable());
    }

    #[test]
    fn secrets_are_not_serialized() {
        let mut s = ProviderSettings::new("sg", ProviderType::Sendgrid);
        s.api_key = Some("SG.secret".into());
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("SG.secret"));
        assert!(json.contains("\"provider_type\":\"sendgrid\""));
    }
}
