//! SendGrid v3 API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use mailroom_mail::ProviderSettings;

use super::{
    OutboundMessage, ProbeResult, SendFailure, SendResult, VendorAdapter, api_base, api_key,
    probe_http, send_http,
};

const DEFAULT_BASE: &str = "https://api.sendgrid.com";

#[derive(Debug, Clone)]
pub struct SendgridAdapter {
    http: reqwest::Client,
}

impl SendgridAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn addresses(emails: &[String]) -> Vec<Value> {
    emails.iter().map(|e| json!({ "email": e })).collect()
}

pub(crate) fn payload(message: &OutboundMessage) -> Value {
    let mut to = json!({ "email": message.to_email });
    if let Some(name) = &message.to_name {
        to["name"] = json!(name);
    }
    let mut personalization = json!({ "to": [to] });
    // SendGrid rejects empty cc/bcc arrays.
    if !message.cc.is_empty() {
        personalization["cc"] = Value::Array(addresses(&message.cc));
    }
    if !message.bcc.is_empty() {
        personalization["bcc"] = Value::Array(addresses(&message.bcc));
    }

    let mut from = json!({ "email": message.from_email });
    if let Some(name) = &message.from_name {
        from["name"] = json!(name);
    }
    let content_type = if message.is_html() { "text/html" } else { "text/plain" };

    let mut body = json!({
        "personalizations": [personalization],
        "from": from,
        "subject": message.subject,
        "content": [{ "type": content_type, "value": message.body }],
    });
    if let Some(reply_to) = &message.reply_to {
        body["reply_to"] = json!({ "email": reply_to });
    }
    body
}

#[async_trait]
impl VendorAdapter for SendgridAdapter {
    async fn probe(&self, settings: &ProviderSettings, timeout: Duration) -> ProbeResult {
        let Some(key) = api_key(settings) else {
            return ProbeResult::fail("API key is required for sendgrid");
        };
        let url = format!("{}/v3/user/profile", api_base(settings, DEFAULT_BASE));
        probe_http("SendGrid", self.http.get(url).bearer_auth(key).timeout(timeout)).await
    }

    async fn send(&self, settings: &ProviderSettings, message: &OutboundMessage) -> SendResult {
        let key = api_key(settings).ok_or_else(|| SendFailure::new("API key is required for sendgrid"))?;
        let url = format!("{}/v3/mail/send", api_base(settings, DEFAULT_BASE));
        let request = self.http.post(url).bearer_auth(key).json(&payload(message));
        send_http("SendGrid", request, |headers, _| {
            headers
                .get("x-message-id")
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        })
        .await
    }
}
