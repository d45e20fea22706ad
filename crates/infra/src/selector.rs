//! Provider selection with priority ordering, config validation, caps and
//! failover.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use mailroom_core::{DomainError, ProviderId};
use mailroom_mail::{MailProvider, validate_config};

use crate::catalog::ProviderStore;
use crate::error::PipelineResult;
use crate::mail_log::MailLogStore;
use crate::store::StoreError;

/// Picks the provider a message goes out through.
#[derive(Clone)]
pub struct ProviderSelector {
    providers: Arc<dyn ProviderStore>,
    logs: Arc<dyn MailLogStore>,
}

impl ProviderSelector {
    pub fn new(providers: Arc<dyn ProviderStore>, logs: Arc<dyn MailLogStore>) -> Self {
        Self { providers, logs }
    }

    /// Active providers by (priority, name).
    pub async fn get_active_providers(&self) -> Result<Vec<MailProvider>, StoreError> {
        self.providers.active_providers().await
    }

    /// An explicit provider must itself be usable; it is never substituted.
    /// Without one, the first active provider that passes `validate_config`
    /// and is under its caps wins.
    pub async fn select(&self, explicit: Option<ProviderId>) -> PipelineResult<MailProvider> {
        let now = Utc::now();

        if let Some(id) = explicit {
            let provider = self
                .providers
                .get_provider(id)
                .await?
                .ok_or_else(|| DomainError::not_found(format!("provider {id}")))?;
            if let Some(reason) = self.unusable_reason(&provider, now).await? {
                return Err(DomainError::provider_unavailable(reason).into());
            }
            return Ok(provider);
        }

        for provider in self.get_active_providers().await? {
            match self.unusable_reason(&provider, now).await? {
                None => return Ok(provider),
                Some(reason) => debug!(provider = %provider.name(), %reason, "skipping provider"),
            }
        }
        Err(DomainError::NoActiveProvider.into())
    }

    async fn unusable_reason(
        &self,
        provider: &MailProvider,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let name = provider.name();
        if !provider.is_active() {
            return Ok(Some(format!("provider '{name}' is inactive")));
        }
        let errors = validate_config(&provider.settings);
        if !errors.is_empty() {
            return Ok(Some(format!(
                "provider '{name}' is misconfigured: {}",
                errors.join("; ")
            )));
        }

        let caps = [
            ("hourly", provider.settings.hourly_limit, Duration::hours(1)),
            ("daily", provider.settings.daily_limit, Duration::days(1)),
        ];
        for (label, limit, window) in caps {
            let Some(limit) = limit else { continue };
            let sent = self.logs.count_delivered_since(provider.id, now - window).await?;
            if sent >= u64::from(limit) {
                return Ok(Some(format!(
                    "provider '{name}' reached its {label} limit of {limit}"
                )));
            }
        }
        Ok(None)
    }
}

impl std::fmt::Debug for ProviderSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSelector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipelineError;
    use crate::catalog::InMemoryCatalog;
    use crate::mail_log::InMemoryMailLogStore;
    use mailroom_mail::{LogStatus, NewMailLog, ProviderSettings, ProviderType};

    fn provider(name: &str, priority: u8, active: bool) -> MailProvider {
        let mut s = ProviderSettings::new(name, ProviderType::Sendgrid);
        s.api_key = Some(format!("key-{name}"));
        s.priority = priority;
        s.is_active = active;
        MailProvider::new(ProviderId::new(), s, Utc::now())
    }

    async fn selector_with(
        providers: Vec<MailProvider>,
    ) -> (ProviderSelector, Arc<InMemoryMailLogStore>) {
        let catalog = InMemoryCatalog::arc();
        for p in providers {
            catalog.insert_provider(p).await.unwrap();
        }
        let logs = InMemoryMailLogStore::arc();
        (ProviderSelector::new(catalog, logs.clone()), logs)
    }

    fn delivered(provider_id: ProviderId) -> NewMailLog {
        NewMailLog {
            job_id: None,
            provider_id: Some(provider_id),
            template_id: None,
            flow_id: None,
            recipient_email: "ada@example.com".into(),
            recipient_name: None,
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: "hi".into(),
            body_preview: "hi".into(),
            status: LogStatus::Sent,
            provider_message_id: None,
            provider_response: None,
            error: None,
            triggered_by: None,
            is_test: false,
            channel: "email".into(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn picks_highest_priority_active_provider() {
        let (selector, _) = selector_with(vec![
            provider("five", 5, true),
            provider("one", 1, true),
            provider("two", 2, false),
        ])
        .await;
        let chosen = selector.select(None).await.unwrap();
        assert_eq!(chosen.name(), "one");
    }

    #[tokio::test]
    async fn no_active_provider() {
        let (selector, _) = selector_with(vec![provider("off", 1, false)]).await;
        let err = selector.select(None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Domain(DomainError::NoActiveProvider)));
    }

    #[tokio::test]
    async fn misconfigured_provider_is_skipped() {
        let mut broken = provider("broken", 1, true);
        broken.settings.api_key = None;
        let (selector, _) = selector_with(vec![broken, provider("backup", 3, true)]).await;
        assert_eq!(selector.select(None).await.unwrap().name(), "backup");
    }

    #[tokio::test]
    async fn providers_missing_vendor_credentials_are_skipped() {
        let mut ses = provider("ses", 1, true);
        ses.settings.provider_type = ProviderType::Ses;
        let mut mailgun = provider("mailgun", 2, true);
        mailgun.settings.provider_type = ProviderType::Mailgun;
        let (selector, _) =
            selector_with(vec![ses, mailgun, provider("sendgrid", 3, true)]).await;

        assert_eq!(selector.select(None).await.unwrap().name(), "sendgrid");
        let usable: Vec<String> = selector
            .get_active_providers()
            .await
            .unwrap()
            .iter()
            .filter(|p| p.is_sendable())
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(usable, vec!["sendgrid"]);
    }

    #[tokio::test]
    async fn capped_provider_fails_over_to_the_next() {
        let mut capped = provider("capped", 1, true);
        capped.settings.hourly_limit = Some(1);
        let capped_id = capped.id;
        let (selector, logs) = selector_with(vec![capped, provider("backup", 2, true)]).await;

        assert_eq!(selector.select(None).await.unwrap().name(), "capped");
        logs.append(delivered(capped_id)).await.unwrap();
        assert_eq!(selector.select(None).await.unwrap().name(), "backup");
    }

    #[tokio::test]
    async fn explicit_provider_is_never_substituted() {
        let inactive = provider("inactive", 1, false);
        let id = inactive.id;
        let (selector, _) = selector_with(vec![inactive, provider("other", 2, true)]).await;

        let err = selector.select(Some(id)).await.unwrap_err();
        assert_eq!(err.code(), "provider_unavailable");

        let err = selector.select(Some(ProviderId::new())).await.unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
