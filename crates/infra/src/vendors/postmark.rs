//! Postmark API. Outcomes carry `ErrorCode` in the body as well as HTTP status.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use mailroom_mail::ProviderSettings;

use super::{
    OutboundMessage, ProbeResult, SendFailure, SendResult, VendorAdapter, api_base, api_key,
    config_str, probe_http, send_http,
};

const DEFAULT_BASE: &str = "https://api.postmarkapp.com";
const TOKEN_HEADER: &str = "X-Postmark-Server-Token";

#[derive(Debug, Clone)]
pub struct PostmarkAdapter {
    http: reqwest::Client,
}

impl PostmarkAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn payload(settings: &ProviderSettings, message: &OutboundMessage) -> Value {
    let body_key = if message.is_html() { "HtmlBody" } else { "TextBody" };
    let mut body = json!({
        "From": message.from_header(),
        "To": message.to_header(),
        "Subject": message.subject,
        "MessageStream": config_str(settings, "message_stream").unwrap_or("outbound"),
    });
    body[body_key] = json!(message.body);
    if !message.cc.is_empty() {
        body["Cc"] = json!(message.cc.join(","));
    }
    if !message.bcc.is_empty() {
        body["Bcc"] = json!(message.bcc.join(","));
    }
    if let Some(reply_to) = &message.reply_to {
        body["ReplyTo"] = json!(reply_to);
    }
    body
}

#[async_trait]
impl VendorAdapter for PostmarkAdapter {
    async fn probe(&self, settings: &ProviderSettings, timeout: Duration) -> ProbeResult {
        let Some(key) = api_key(settings) else {
            return ProbeResult::fail("API key is required for postmark");
        };
        let url = format!("{}/server", api_base(settings, DEFAULT_BASE));
        let request = self
            .http
            .get(url)
            .header(TOKEN_HEADER, key)
            .header("Accept", "application/json")
            .timeout(timeout);
        probe_http("Postmark", request).await
    }

    async fn send(&self, settings: &ProviderSettings, message: &OutboundMessage) -> SendResult {
        let key = api_key(settings).ok_or_else(|| SendFailure::new("API key is required for postmark"))?;
        let url = format!("{}/email", api_base(settings, DEFAULT_BASE));
        let request = self
            .http
            .post(url)
            .header(TOKEN_HEADER, key)
            .header("Accept", "application/json")
            .json(&payload(settings, message));
        let receipt = send_http("Postmark", request, |_, body| {
            body.and_then(|b| b.get("MessageID"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .await?;

        let error_code = receipt
            .response
            .as_ref()
            .and_then(|b| b.get("ErrorCode"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        if error_code != 0 {
            let detail = receipt
                .response
                .as_ref()
                .and_then(|b| b.get("Message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(SendFailure::new(format!("Postmark error {error_code}: {detail}"))
                .with_response(receipt.response));
        }
        Ok(receipt)
    }
}
