//! Mailgun v3 API. The sending domain comes from `config.domain`.

use std::time::Duration;

use async_trait::async_trait;

use mailroom_mail::ProviderSettings;

use super::{
    OutboundMessage, ProbeResult, SendFailure, SendResult, VendorAdapter, api_base, api_key,
    config_str, probe_http, send_http,
};

const DEFAULT_BASE: &str = "https://api.mailgun.net";

#[derive(Debug, Clone)]
pub struct MailgunAdapter {
    http: reqwest::Client,
}

impl MailgunAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn form(message: &OutboundMessage) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        ("from", message.from_header()),
        ("to", message.to_header()),
        ("subject", message.subject.clone()),
    ];
    for cc in &message.cc {
        fields.push(("cc", cc.clone()));
    }
    for bcc in &message.bcc {
        fields.push(("bcc", bcc.clone()));
    }
    let body_field = if message.is_html() { "html" } else { "text" };
    fields.push((body_field, message.body.clone()));
    if let Some(reply_to) = &message.reply_to {
        fields.push(("h:Reply-To", reply_to.clone()));
    }
    fields
}

#[async_trait]
impl VendorAdapter for MailgunAdapter {
    async fn probe(&self, settings: &ProviderSettings, timeout: Duration) -> ProbeResult {
        let Some(key) = api_key(settings) else {
            return ProbeResult::fail("API key is required for mailgun");
        };
        let base = api_base(settings, DEFAULT_BASE);
        let url = match config_str(settings, "domain") {
            Some(domain) => format!("{base}/v3/domains/{domain}"),
            None => format!("{base}/v3/domains"),
        };
        let request = self
            .http
            .get(url)
            .basic_auth("api", Some(key))
            .timeout(timeout);
        probe_http("Mailgun", request).await
    }

    async fn send(&self, settings: &ProviderSettings, message: &OutboundMessage) -> SendResult {
        let key = api_key(settings).ok_or_else(|| SendFailure::new("API key is required for mailgun"))?;
        let domain = config_str(settings, "domain")
            .ok_or_else(|| SendFailure::new("Mailgun sending domain (config.domain) is required"))?;
        let url = format!("{}/v3/{domain}/messages", api_base(settings, DEFAULT_BASE));
        let request = self
            .http
            .post(url)
            .basic_auth("api", Some(key))
            .form(&form(message));
        send_http("Mailgun", request, |_, body| {
            body.and_then(|b| b.get("id"))
                .and_then(|id| id.as_str())
                .map(String::from)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vendors::test_support::{http, message, spawn_stub};
    use mailroom_mail::ProviderType;

    fn settings(base: String, domain: Option<&str>) -> ProviderSettings {
        let mut s = ProviderSettings::new("mg", ProviderType::Mailgun);
        s.api_key = Some("key-test".into());
        s.api_host = Some(base);
        if let Some(domain) = domain {
            s.config.insert("domain".into(), domain.into());
        }
        s
    }

    #[tokio::test]
    async fn send_posts_a_form_to_the_domain() {
        let (addr, mut rx) =
            spawn_stub(200, vec![], r#"{"id":"<mg-1@mg.example.com>","message":"Queued"}"#).await;
        let receipt = MailgunAdapter::new(http())
            .send(&settings(format!("http://{addr}"), Some("mg.example.com")), &message())
            .await
            .unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("<mg-1@mg.example.com>"));

        let request = rx.recv().await.unwrap();
        assert_eq!(request.uri.path(), "/v3/mg.example.com/messages");
        let body = String::from_utf8(request.body).unwrap();
        assert!(body.contains("subject=Your+receipt"));
        assert!(body.contains("html="));
    }

    #[tokio::test]
    async fn send_without_domain_fails_before_any_request() {
        let failure = MailgunAdapter::new(http())
            .send(&settings("http://127.0.0.1:9".into(), None), &message())
            .await
            .unwrap_err();
        assert!(failure.error.contains("domain"));
    }

    #[tokio::test]
    async fn forbidden_probe_is_an_invalid_key() {
        let (addr, _rx) = spawn_stub(403, vec![], "Forbidden").await;
        let result = MailgunAdapter::new(http())
            .probe(&settings(format!("http://{addr}"), None), Duration::from_secs(2))
            .await;
        assert!(!result.success);
        assert_eq!(result.message, "invalid Mailgun API key");
    }
}
