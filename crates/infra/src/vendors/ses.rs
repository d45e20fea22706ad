//! Amazon SES v2 over HTTPS, signed with SigV4.
//!
//! `api_key` is the access key id, `api_secret` the secret access key and
//! `config.region` the region (default `us-east-1`).

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Url;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use mailroom_mail::ProviderSettings;

use super::{
    OutboundMessage, ProbeResult, SendFailure, SendResult, VendorAdapter, api_key, config_str,
    probe_http, send_http,
};

const DEFAULT_REGION: &str = "us-east-1";
const SERVICE: &str = "ses";
const SEND_PATH: &str = "/v2/email/outbound-emails";
const ACCOUNT_PATH: &str = "/v2/email/account";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct SesAdapter {
    http: reqwest::Client,
}

impl SesAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

struct Credentials<'a> {
    access_key: &'a str,
    secret_key: &'a str,
    region: &'a str,
}

fn credentials(settings: &ProviderSettings) -> Result<Credentials<'_>, String> {
    let access_key = api_key(settings).ok_or("AWS access key (api_key) is required for ses")?;
    let secret_key = settings
        .api_secret
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("AWS secret key (api_secret) is required for ses")?;
    Ok(Credentials {
        access_key,
        secret_key,
        region: config_str(settings, "region").unwrap_or(DEFAULT_REGION),
    })
}

/// Base URL and the `host[:port]` value that goes into the signature.
fn endpoint(settings: &ProviderSettings, region: &str) -> Result<(String, String), String> {
    let base = settings
        .api_host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("https://email.{region}.amazonaws.com"));
    let base = base.trim_end_matches('/').to_string();
    let url = Url::parse(&base).map_err(|_| "invalid SES endpoint".to_string())?;
    let host = url.host_str().ok_or("invalid SES endpoint host")?;
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok((base, host))
}

fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str) -> Result<Vec<u8>, String> {
    let mut key = format!("AWS4{secret_key}").into_bytes();
    for part in [date_stamp, region, SERVICE, "aws4_request"] {
        let mut mac =
            HmacSha256::new_from_slice(&key).map_err(|_| "invalid AWS signing key".to_string())?;
        mac.update(part.as_bytes());
        key = mac.finalize().into_bytes().to_vec();
    }
    Ok(key)
}

struct Signature {
    authorization: String,
    amz_date: String,
    payload_hash: String,
}

fn sign(
    creds: &Credentials<'_>,
    method: &str,
    path: &str,
    host: &str,
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<Signature, String> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let payload_hash = hex::encode(Sha256::digest(payload));

    let signed_headers = "host;x-amz-content-sha256;x-amz-date";
    let canonical_request = format!(
        "{method}\n{path}\n\nhost:{}\nx-amz-content-sha256:{payload_hash}\nx-amz-date:{amz_date}\n\n{signed_headers}\n{payload_hash}",
        host.to_lowercase()
    );
    let scope = format!("{date_stamp}/{}/{SERVICE}/aws4_request", creds.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = derive_signing_key(creds.secret_key, &date_stamp, creds.region)?;
    let mut mac =
        HmacSha256::new_from_slice(&key).map_err(|_| "failed to sign SES request".to_string())?;
    mac.update(string_to_sign.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(Signature {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            creds.access_key
        ),
        amz_date,
        payload_hash,
    })
}

fn payload(message: &OutboundMessage) -> Value {
    let body_key = if message.is_html() { "Html" } else { "Text" };
    let mut destination = json!({ "ToAddresses": [message.to_header()] });
    if !message.cc.is_empty() {
        destination["CcAddresses"] = json!(message.cc);
    }
    if !message.bcc.is_empty() {
        destination["BccAddresses"] = json!(message.bcc);
    }
    let mut body = json!({
        "FromEmailAddress": message.from_header(),
        "Destination": destination,
        "Content": {
            "Simple": {
                "Subject": { "Data": message.subject, "Charset": "UTF-8" },
                "Body": { body_key: { "Data": message.body, "Charset": "UTF-8" } },
            }
        },
    });
    if let Some(reply_to) = &message.reply_to {
        body["ReplyToAddresses"] = json!([reply_to]);
    }
    body
}

impl SesAdapter {
    fn signed(
        &self,
        settings: &ProviderSettings,
        method: reqwest::Method,
        path: &str,
        body: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<reqwest::RequestBuilder, String> {
        let creds = credentials(settings)?;
        let (base, host) = endpoint(settings, creds.region)?;
        let signature = sign(&creds, method.as_str(), path, &host, &body, now)?;
        let mut request = self
            .http
            .request(method, format!("{base}{path}"))
            .header("x-amz-date", signature.amz_date)
            .header("x-amz-content-sha256", signature.payload_hash)
            .header("authorization", signature.authorization);
        if !body.is_empty() {
            request = request.header("content-type", "application/json").body(body);
        }
        Ok(request)
    }
}

#[async_trait]
impl VendorAdapter for SesAdapter {
    async fn probe(&self, settings: &ProviderSettings, timeout: Duration) -> ProbeResult {
        match self.signed(settings, reqwest::Method::GET, ACCOUNT_PATH, Vec::new(), Utc::now()) {
            Ok(request) => probe_http("SES", request.timeout(timeout)).await,
            Err(message) => ProbeResult::fail(message),
        }
    }

    async fn send(&self, settings: &ProviderSettings, message: &OutboundMessage) -> SendResult {
        let body = serde_json::to_vec(&payload(message))
            .map_err(|e| SendFailure::new(format!("failed to encode SES request: {e}")))?;
        let request = self
            .signed(settings, reqwest::Method::POST, SEND_PATH, body, Utc::now())
            .map_err(SendFailure::new)?;
        send_http("SES", request, |_, body| {
            body.and_then(|b| b.get("MessageId"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .await
    }
}
