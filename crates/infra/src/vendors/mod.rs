//! Vendor adapters: one `probe` + `send` implementation per provider type.
//!
//! Adding a vendor means adding one adapter and registering it in
//! [`VendorRegistry::standard`]; the queue and worker never change.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};

use mailroom_mail::{JsonMap, ProviderSettings, ProviderType};

pub mod mailgun;
pub mod mandrill;
pub mod postmark;
pub mod ses;
pub mod sendgrid;
pub mod smtp;

pub use mailgun::MailgunAdapter;
pub use mandrill::MandrillAdapter;
pub use postmark::PostmarkAdapter;
pub use sendgrid::SendgridAdapter;
pub use ses::SesAdapter;
pub use smtp::SmtpAdapter;

/// Rendered message ready for a vendor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub from_email: String,
    pub from_name: Option<String>,
    pub reply_to: Option<String>,
    pub to_email: String,
    pub to_name: Option<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl OutboundMessage {
    /// Bodies containing markup are sent as HTML, everything else as text.
    pub fn is_html(&self) -> bool {
        let body = self.body.trim_start();
        body.starts_with('<') || body.contains("</") || body.contains("<br")
    }

    /// `Name <email>` or bare `email`.
    pub fn from_header(&self) -> String {
        match self.from_name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => format!("{name} <{}>", self.from_email),
            None => self.from_email.clone(),
        }
    }

    pub fn to_header(&self) -> String {
        match self.to_name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => format!("{name} <{}>", self.to_email),
            None => self.to_email.clone(),
        }
    }
}

/// Outcome of a connection test. Never an error: failures are data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub success: bool,
    pub message: String,
    pub details: JsonMap,
}

impl ProbeResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: JsonMap::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: JsonMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Accepted by the vendor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReceipt {
    pub message_id: Option<String>,
    pub response: Option<Value>,
}

/// Rejected by the vendor, or never reached it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct SendFailure {
    pub error: String,
    pub response: Option<Value>,
}

impl SendFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            response: None,
        }
    }

    pub fn with_response(mut self, response: Option<Value>) -> Self {
        self.response = response;
        self
    }
}

pub type SendResult = Result<SendReceipt, SendFailure>;

/// Uniform capability every provider type exposes.
#[async_trait]
pub trait VendorAdapter: Send + Sync {
    /// Side-effect-free connectivity / credential check, bounded by `timeout`.
    async fn probe(&self, settings: &ProviderSettings, timeout: Duration) -> ProbeResult;

    async fn send(&self, settings: &ProviderSettings, message: &OutboundMessage) -> SendResult;
}

/// Adapter lookup by provider type.
#[derive(Clone, Default)]
pub struct VendorRegistry {
    adapters: HashMap<ProviderType, Arc<dyn VendorAdapter>>,
}

impl VendorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in adapter, sharing one HTTP client bounded by `timeout`.
    pub fn standard(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self::new()
            .with_adapter(ProviderType::Smtp, Arc::new(SmtpAdapter::new(timeout)))
            .with_adapter(ProviderType::Sendgrid, Arc::new(SendgridAdapter::new(http.clone())))
            .with_adapter(ProviderType::Mailgun, Arc::new(MailgunAdapter::new(http.clone())))
            .with_adapter(ProviderType::Ses, Arc::new(SesAdapter::new(http.clone())))
            .with_adapter(ProviderType::Postmark, Arc::new(PostmarkAdapter::new(http.clone())))
            .with_adapter(ProviderType::Mandrill, Arc::new(MandrillAdapter::new(http))))
    }

    pub fn with_adapter(mut self, provider_type: ProviderType, adapter: Arc<dyn VendorAdapter>) -> Self {
        self.adapters.insert(provider_type, adapter);
        self
    }

    pub fn get(&self, provider_type: ProviderType) -> Option<Arc<dyn VendorAdapter>> {
        self.adapters.get(&provider_type).cloned()
    }
}

impl std::fmt::Debug for VendorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VendorRegistry")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// `api_host` override or the vendor default, without a trailing slash.
pub(crate) fn api_base(settings: &ProviderSettings, default: &str) -> String {
    settings
        .api_host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

pub(crate) fn config_str<'a>(settings: &'a ProviderSettings, key: &str) -> Option<&'a str> {
    settings
        .config
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub(crate) fn api_key(settings: &ProviderSettings) -> Option<&str> {
    settings
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
}

/// Body as JSON when it parses, otherwise wrapped as `{"body": text}`.
pub(crate) async fn read_body(response: reqwest::Response) -> Option<Value> {
    let text = response.text().await.ok()?;
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "body": text })))
}

fn describe_transport_error(vendor: &str, err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("{vendor} API timed out")
    } else if err.is_connect() {
        format!("could not connect to {vendor} API: {err}")
    } else {
        format!("{vendor} API request failed: {err}")
    }
}

/// Shared classification for HTTP probes: 2xx reachable, 401/403 invalid
/// key, anything else a generic API error.
pub(crate) async fn probe_http(vendor: &str, request: reqwest::RequestBuilder) -> ProbeResult {
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => return ProbeResult::fail(describe_transport_error(vendor, &err)),
    };
    let status = response.status();
    let body = read_body(response).await;
    let result = if status.is_success() {
        ProbeResult::ok(format!("{vendor} API key is valid"))
    } else if matches!(status.as_u16(), 401 | 403) {
        ProbeResult::fail(format!("invalid {vendor} API key"))
    } else {
        ProbeResult::fail(format!("{vendor} API error (status {})", status.as_u16()))
    };
    let result = result.with_detail("status", status.as_u16());
    match body {
        Some(body) => result.with_detail("response", body),
        None => result,
    }
}

/// Send a request and split the outcome into receipt or failure, with the
/// raw body kept on both sides.
pub(crate) async fn send_http(
    vendor: &str,
    request: reqwest::RequestBuilder,
    message_id: impl FnOnce(&reqwest::header::HeaderMap, Option<&Value>) -> Option<String>,
) -> SendResult {
    let response = request
        .send()
        .await
        .map_err(|err| SendFailure::new(describe_transport_error(vendor, &err)))?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = read_body(response).await;

    if !status.is_success() {
        return Err(SendFailure::new(format!(
            "{vendor} rejected the message (status {})",
            status.as_u16()
        ))
        .with_response(body));
    }
    Ok(SendReceipt {
        message_id: message_id(&headers, body.as_ref()),
        response: body,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::SocketAddr;

    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::response::IntoResponse;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

    #[derive(Debug)]
    pub struct RecordedRequest {
        pub uri: Uri,
        pub headers: HeaderMap,
        pub body: Vec<u8>,
    }

    #[derive(Clone)]
    struct StubState {
        tx: UnboundedSender<RecordedRequest>,
        status: StatusCode,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static str,
    }

    async fn stub_handler(
        State(state): State<StubState>,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> impl IntoResponse {
        let _ = state.tx.send(RecordedRequest {
            uri,
            headers,
            body: body.to_vec(),
        });
        let mut response_headers = HeaderMap::new();
        for (name, value) in &state.headers {
            response_headers.insert(*name, value.parse().unwrap());
        }
        response_headers.insert("content-type", "application/json".parse().unwrap());
        (state.status, response_headers, state.body)
    }

    /// Answers every request with `status` + `body` and records what it got.
    pub async fn spawn_stub(
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static str,
    ) -> (SocketAddr, UnboundedReceiver<RecordedRequest>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = unbounded_channel();
        let state = StubState {
            tx,
            status: StatusCode::from_u16(status).unwrap(),
            headers,
            body,
        };
        let app = Router::new().fallback(stub_handler).with_state(state);
        tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                eprintln!("stub server exited with error: {err}");
            }
        });
        (addr, rx)
    }

    pub fn message() -> super::OutboundMessage {
        super::OutboundMessage {
            from_email: "noreply@example.com".into(),
            from_name: Some("Shop".into()),
            reply_to: Some("support@example.com".into()),
            to_email: "ada@example.com".into(),
            to_name: Some("Ada".into()),
            cc: vec!["cc@example.com".into()],
            bcc: Vec::new(),
            subject: "Your receipt".into(),
            body: "<p>Thanks Ada</p>".into(),
        }
    }

    pub fn http() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .unwrap()
    }

    /// In-process adapter that records every send.
    #[derive(Debug, Default)]
    pub struct FakeAdapter {
        sent: std::sync::Mutex<Vec<super::OutboundMessage>>,
        fail_with: Option<String>,
    }

    impl FakeAdapter {
        pub fn ok() -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self::default())
        }

        pub fn failing(error: &str) -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self {
                sent: Default::default(),
                fail_with: Some(error.to_string()),
            })
        }

        pub fn sent(&self) -> Vec<super::OutboundMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl super::VendorAdapter for FakeAdapter {
        async fn probe(
            &self,
            _: &mailroom_mail::ProviderSettings,
            _: std::time::Duration,
        ) -> super::ProbeResult {
            super::ProbeResult::ok("fake vendor reachable")
        }

        async fn send(
            &self,
            _: &mailroom_mail::ProviderSettings,
            message: &super::OutboundMessage,
        ) -> super::SendResult {
            let count = {
                let mut sent = self.sent.lock().unwrap();
                sent.push(message.clone());
                sent.len()
            };
            match &self.fail_with {
                Some(error) => Err(super::SendFailure::new(error.clone())
                    .with_response(Some(serde_json::json!({ "error": error })))),
                None => Ok(super::SendReceipt {
                    message_id: Some(format!("fake-{count}")),
                    response: Some(serde_json::json!({ "accepted": true })),
                }),
            }
        }
    }
}
