//! Administrator-triggered connection tests. Never touches the queue and
//! never writes anything.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use mailroom_core::{DomainError, ProviderId};
use mailroom_mail::{ProviderSettings, is_valid_email, validate_config};

use crate::catalog::ProviderStore;
use crate::error::PipelineResult;
use crate::vendors::{ProbeResult, VendorRegistry};

/// Default bound for SMTP sockets and HTTP probes.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ConnectionProber {
    providers: Arc<dyn ProviderStore>,
    vendors: VendorRegistry,
    timeout: Duration,
}

impl ConnectionProber {
    pub fn new(providers: Arc<dyn ProviderStore>, vendors: VendorRegistry, timeout: Duration) -> Self {
        Self {
            providers,
            vendors,
            timeout,
        }
    }

    /// Probe a stored provider. Only a missing provider is an error; every
    /// connection outcome comes back as a `ProbeResult`.
    pub async fn test_connection(
        &self,
        provider_id: ProviderId,
        test_email: Option<&str>,
    ) -> PipelineResult<ProbeResult> {
        let provider = self
            .providers
            .get_provider(provider_id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("provider {provider_id}")))?;
        Ok(self.test_with_data(&provider.settings, test_email).await)
    }

    /// Probe an unsaved configuration.
    pub async fn test_with_data(
        &self,
        settings: &ProviderSettings,
        test_email: Option<&str>,
    ) -> ProbeResult {
        let result = self.probe(settings, test_email).await;
        info!(
            provider = %settings.name,
            provider_type = %settings.provider_type,
            success = result.success,
            "connection test finished"
        );
        match test_email {
            Some(email) => result.with_detail("test_email", email),
            None => result,
        }
    }

    async fn probe(&self, settings: &ProviderSettings, test_email: Option<&str>) -> ProbeResult {
        if let Some(email) = test_email {
            if !is_valid_email(email) {
                return ProbeResult::fail(format!("invalid test email '{email}'"));
            }
        }

        let errors = validate_config(settings);
        if !errors.is_empty() {
            return ProbeResult::fail("provider configuration is invalid")
                .with_detail("errors", errors);
        }

        let Some(adapter) = self.vendors.get(settings.provider_type) else {
            return ProbeResult::fail(format!(
                "no adapter registered for provider type '{}'",
                settings.provider_type
            ));
        };

        // Adapters bound their own I/O; this caps the whole call.
        let outer = self.timeout + Duration::from_secs(1);
        match tokio::time::timeout(outer, adapter.probe(settings, self.timeout)).await {
            Ok(result) => result,
            Err(_) => ProbeResult::fail(format!(
                "connection test timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}

impl std::fmt::Debug for ConnectionProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProber")
            .field("vendors", &self.vendors)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::vendors::{OutboundMessage, SendResult, SmtpAdapter, VendorAdapter};
    use async_trait::async_trait;
    use chrono::Utc;
    use mailroom_mail::{MailProvider, ProviderType};
    use tokio::net::TcpListener;

    struct Hangs;

    #[async_trait]
    impl VendorAdapter for Hangs {
        async fn probe(&self, _: &ProviderSettings, _: Duration) -> ProbeResult {
            std::future::pending().await
        }

        async fn send(&self, _: &ProviderSettings, _: &OutboundMessage) -> SendResult {
            std::future::pending().await
        }
    }

    fn smtp(host: &str, port: u16) -> ProviderSettings {
        let mut s = ProviderSettings::new("relay", ProviderType::Smtp);
        s.host = Some(host.into());
        s.port = Some(port);
        s
    }

    fn prober(catalog: Arc<InMemoryCatalog>, timeout: Duration) -> ConnectionProber {
        let vendors = VendorRegistry::new()
            .with_adapter(ProviderType::Smtp, Arc::new(SmtpAdapter::new(timeout)))
            .with_adapter(ProviderType::Postmark, Arc::new(Hangs));
        ConnectionProber::new(catalog, vendors, timeout)
    }

    #[tokio::test]
    async fn stored_smtp_provider_is_probed_without_changes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let catalog = InMemoryCatalog::arc();
        let stored = catalog
            .insert_provider(MailProvider::new(ProviderId::new(), smtp("127.0.0.1", port), Utc::now()))
            .await
            .unwrap();

        let result = prober(catalog.clone(), Duration::from_secs(2))
            .test_connection(stored.id, Some("ops@example.com"))
            .await
            .unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(result.details["test_email"], "ops@example.com");

        let after = catalog.get_provider(stored.id).await.unwrap().unwrap();
        assert_eq!(after, stored);
    }

    #[tokio::test]
    async fn unknown_provider_is_not_found() {
        let err = prober(InMemoryCatalog::arc(), Duration::from_secs(1))
            .test_connection(ProviderId::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn invalid_config_is_reported_not_thrown() {
        let mut settings = smtp("", 25);
        settings.host = None;
        let result = prober(InMemoryCatalog::arc(), Duration::from_secs(1))
            .test_with_data(&settings, None)
            .await;
        assert!(!result.success);
        assert_eq!(result.details["errors"][0], "SMTP host is required");
    }

    #[tokio::test]
    async fn hanging_adapter_is_cut_off() {
        let mut settings = ProviderSettings::new("pm", ProviderType::Postmark);
        settings.api_key = Some("token".into());
        let started = std::time::Instant::now();
        let result = prober(InMemoryCatalog::arc(), Duration::from_millis(200))
            .test_with_data(&settings, None)
            .await;
        assert!(!result.success);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn unroutable_smtp_host_fails_within_the_bound() {
        let started = std::time::Instant::now();
        let result = prober(InMemoryCatalog::arc(), Duration::from_millis(300))
            .test_with_data(&smtp("192.0.2.1", 25), None)
            .await;
        assert!(!result.success);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
