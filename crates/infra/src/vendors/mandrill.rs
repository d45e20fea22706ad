//! Mandrill (Mailchimp Transactional) API. Errors come back as HTTP 500 with
//! a JSON `name`, so invalid keys are recognised by name as well as status.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use mailroom_mail::ProviderSettings;

use super::{
    OutboundMessage, ProbeResult, SendFailure, SendResult, VendorAdapter, api_base, api_key,
    read_body, send_http,
};

const DEFAULT_BASE: &str = "https://mandrillapp.com/api/1.0";

#[derive(Debug, Clone)]
pub struct MandrillAdapter {
    http: reqwest::Client,
}

impl MandrillAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

fn payload(key: &str, message: &OutboundMessage) -> Value {
    let mut to = vec![json!({ "email": message.to_email, "name": message.to_name, "type": "to" })];
    to.extend(message.cc.iter().map(|e| json!({ "email": e, "type": "cc" })));
    to.extend(message.bcc.iter().map(|e| json!({ "email": e, "type": "bcc" })));

    let body_key = if message.is_html() { "html" } else { "text" };
    let mut inner = json!({
        "subject": message.subject,
        "from_email": message.from_email,
        "from_name": message.from_name,
        "to": to,
        "preserve_recipients": false,
    });
    inner[body_key] = json!(message.body);
    if let Some(reply_to) = &message.reply_to {
        inner["headers"] = json!({ "Reply-To": reply_to });
    }
    json!({ "key": key, "message": inner })
}

#[async_trait]
impl VendorAdapter for MandrillAdapter {
    async fn probe(&self, settings: &ProviderSettings, timeout: Duration) -> ProbeResult {
        let Some(key) = api_key(settings) else {
            return ProbeResult::fail("API key is required for mandrill");
        };
        let url = format!("{}/users/ping2.json", api_base(settings, DEFAULT_BASE));
        let response = match self
            .http
            .post(url)
            .json(&json!({ "key": key }))
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) if err.is_timeout() => return ProbeResult::fail("Mandrill API timed out"),
            Err(err) => return ProbeResult::fail(format!("Mandrill API request failed: {err}")),
        };

        let status = response.status();
        let body = read_body(response).await;
        let error_name = body
            .as_ref()
            .and_then(|b| b.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let result = if status.is_success() {
            ProbeResult::ok("Mandrill API key is valid")
        } else if matches!(status.as_u16(), 401 | 403) || error_name == "Invalid_Key" {
            ProbeResult::fail("invalid Mandrill API key")
        } else {
            ProbeResult::fail(format!("Mandrill API error (status {})", status.as_u16()))
        };
        let result = result.with_detail("status", status.as_u16());
        match body {
            Some(body) => result.with_detail("response", body),
            None => result,
        }
    }

    async fn send(&self, settings: &ProviderSettings, message: &OutboundMessage) -> SendResult {
        let key = api_key(settings).ok_or_else(|| SendFailure::new("API key is required for mandrill"))?;
        let url = format!("{}/messages/send.json", api_base(settings, DEFAULT_BASE));
        let request = self.http.post(url).json(&payload(key, message));
        let receipt = send_http("Mandrill", request, |_, body| {
            body.and_then(|b| b.get(0))
                .and_then(|r| r.get("_id"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .await?;

        let first = receipt.response.as_ref().and_then(|b| b.get(0));
        let status = first
            .and_then(|r| r.get("status"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        if matches!(status, "rejected" | "invalid") {
            let reason = first
                .and_then(|r| r.get("reject_reason"))
                .and_then(Value::as_str)
                .unwrap_or("no reason given");
            let error = format!("Mandrill {status} the message: {reason}");
            return Err(SendFailure::new(error).with_response(receipt.response));
        }
        Ok(receipt)
    }
}
