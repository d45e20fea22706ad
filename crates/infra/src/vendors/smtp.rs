//! SMTP adapter: raw TCP probe, `lettre` async transport for sending.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde_json::json;
use tokio::net::TcpStream;
use tracing::debug;

use mailroom_mail::ProviderSettings;

use super::{OutboundMessage, ProbeResult, SendFailure, SendReceipt, SendResult, VendorAdapter};

#[derive(Debug, Clone)]
pub struct SmtpAdapter {
    timeout: Duration,
}

impl SmtpAdapter {
    /// `timeout` bounds each SMTP command during a send.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn endpoint(settings: &ProviderSettings) -> Result<(String, u16), String> {
    let host = settings
        .host
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| "SMTP host is required".to_string())?;
    let port = settings
        .port
        .filter(|p| *p != 0)
        .ok_or_else(|| "SMTP port is required".to_string())?;
    Ok((host.to_string(), port))
}

fn mailbox(name: Option<&str>, email: &str) -> Result<Mailbox, SendFailure> {
    let address: Address = email
        .parse()
        .map_err(|_| SendFailure::new(format!("invalid email address '{email}'")))?;
    let name = name.map(str::trim).filter(|n| !n.is_empty()).map(String::from);
    Ok(Mailbox::new(name, address))
}

fn build_message(message: &OutboundMessage, message_id: &str) -> Result<Message, SendFailure> {
    let mut builder = Message::builder()
        .from(mailbox(message.from_name.as_deref(), &message.from_email)?)
        .to(mailbox(message.to_name.as_deref(), &message.to_email)?)
        .subject(message.subject.as_str())
        .message_id(Some(message_id.to_string()));
    for cc in &message.cc {
        builder = builder.cc(mailbox(None, cc)?);
    }
    for bcc in &message.bcc {
        builder = builder.bcc(mailbox(None, bcc)?);
    }
    if let Some(reply_to) = &message.reply_to {
        builder = builder.reply_to(mailbox(None, reply_to)?);
    }
    let content_type = if message.is_html() {
        ContentType::TEXT_HTML
    } else {
        ContentType::TEXT_PLAIN
    };
    builder
        .header(content_type)
        .body(message.body.clone())
        .map_err(|e| SendFailure::new(format!("failed to build message: {e}")))
}

fn transport(
    settings: &ProviderSettings,
    timeout: Duration,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendFailure> {
    let (host, port) = endpoint(settings).map_err(SendFailure::new)?;

    // `secure` means implicit TLS (usually 465); otherwise upgrade with
    // STARTTLS when the server offers it.
    let mut builder = if settings.secure {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&host)
            .map_err(|e| SendFailure::new(format!("SMTP TLS setup failed: {e}")))?
    } else {
        let params = TlsParameters::new(host.clone())
            .map_err(|e| SendFailure::new(format!("SMTP TLS setup failed: {e}")))?;
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&host)
            .tls(Tls::Opportunistic(params))
    };
    builder = builder.port(port).timeout(Some(timeout));

    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
        builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }
    Ok(builder.build())
}

fn domain_of(email: &str) -> &str {
    email.rsplit_once('@').map(|(_, d)| d).unwrap_or("localhost")
}

#[async_trait]
impl VendorAdapter for SmtpAdapter {
    /// Opens a socket to host:port and closes it. No EHLO, no auth.
    async fn probe(&self, settings: &ProviderSettings, timeout: Duration) -> ProbeResult {
        let (host, port) = match endpoint(settings) {
            Ok(endpoint) => endpoint,
            Err(message) => return ProbeResult::fail(message),
        };
        let target = format!("{host}:{port}");
        debug!(target = %target, "probing SMTP endpoint");

        let result = match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await {
            Ok(Ok(_stream)) => ProbeResult::ok(format!("connected to SMTP server {target}")),
            Ok(Err(err)) => ProbeResult::fail(format!("SMTP connection to {target} failed: {err}")),
            Err(_) => ProbeResult::fail(format!(
                "SMTP connection to {target} timed out after {}s",
                timeout.as_secs()
            )),
        };
        result
            .with_detail("host", host)
            .with_detail("port", port)
            .with_detail("secure", settings.secure)
    }

    async fn send(&self, settings: &ProviderSettings, message: &OutboundMessage) -> SendResult {
        let message_id = format!("<{}@{}>", uuid::Uuid::now_v7(), domain_of(&message.from_email));
        let email = build_message(message, &message_id)?;
        let transport = transport(settings, self.timeout)?;

        let response = transport
            .send(email)
            .await
            .map_err(|e| SendFailure::new(format!("SMTP send failed: {e}")))?;

        let lines: Vec<String> = response.message().map(|line| line.to_string()).collect();
        Ok(SendReceipt {
            message_id: Some(message_id),
            response: Some(json!({
                "code": response.code().to_string(),
                "message": lines,
            })),
        })
    }
}
