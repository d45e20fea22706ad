//! Administrative catalog operations: providers, flows, templates, delivery
//! log queries and connection tests.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use mailroom_core::{DomainError, FlowId, ProviderId, TemplateId};
use mailroom_mail::{
    FlowDraft, JsonMap, MailFlow, MailProvider, MailTemplate, ProviderSettings, RenderedTemplate,
    TemplateDraft, render, validate, validate_config,
};

use crate::catalog::{FlowStore, ProviderStore, TemplateStore};
use crate::error::PipelineResult;
use crate::mail_log::{LogFilter, LogQueryResult, MailLogStore};
use crate::prober::ConnectionProber;
use crate::store::Pagination;
use crate::vendors::ProbeResult;

#[derive(Clone)]
pub struct CatalogAdmin {
    providers: Arc<dyn ProviderStore>,
    flows: Arc<dyn FlowStore>,
    templates: Arc<dyn TemplateStore>,
    logs: Arc<dyn MailLogStore>,
    prober: ConnectionProber,
}

fn check(errors: Vec<String>) -> Result<(), DomainError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(DomainError::Validation(errors))
    }
}

/// Shape rules always; config rules only for providers that will be used
/// for sending.
fn validate_provider(settings: &ProviderSettings) -> Result<(), DomainError> {
    let mut errors = settings.validate_shape();
    if settings.is_active {
        errors.extend(validate_config(settings));
    }
    check(errors)
}

impl CatalogAdmin {
    pub fn new<C>(catalog: Arc<C>, logs: Arc<dyn MailLogStore>, prober: ConnectionProber) -> Self
    where
        C: ProviderStore + FlowStore + TemplateStore + 'static,
    {
        Self {
            providers: catalog.clone(),
            flows: catalog.clone(),
            templates: catalog,
            logs,
            prober,
        }
    }

    // providers

    pub async fn create_provider(&self, settings: ProviderSettings) -> PipelineResult<MailProvider> {
        validate_provider(&settings)?;
        let provider = self
            .providers
            .insert_provider(MailProvider::new(ProviderId::new(), settings, Utc::now()))
            .await?;
        info!(provider_id = %provider.id, provider = %provider.name(), "provider created");
        Ok(provider)
    }

    pub async fn update_provider(
        &self,
        id: ProviderId,
        settings: ProviderSettings,
    ) -> PipelineResult<MailProvider> {
        validate_provider(&settings)?;
        let mut provider = self.get_provider(id).await?;
        provider.settings = settings;
        provider.updated_at = Utc::now();
        let provider = self.providers.update_provider(provider).await?;
        info!(provider_id = %id, active = provider.is_active(), "provider updated");
        Ok(provider)
    }

    pub async fn get_provider(&self, id: ProviderId) -> PipelineResult<MailProvider> {
        self.providers
            .get_provider(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("provider {id}")).into())
    }

    pub async fn list_providers(&self) -> PipelineResult<Vec<MailProvider>> {
        Ok(self.providers.list_providers().await?)
    }

    pub async fn delete_provider(&self, id: ProviderId) -> PipelineResult<()> {
        self.providers.delete_provider(id).await?;
        info!(provider_id = %id, "provider deleted");
        Ok(())
    }

    pub async fn test_provider(
        &self,
        id: ProviderId,
        test_email: Option<&str>,
    ) -> PipelineResult<ProbeResult> {
        self.prober.test_connection(id, test_email).await
    }

    /// Probe an unsaved configuration. Only shape problems are rejected up
    /// front; config problems come back inside the probe result.
    pub async fn test_provider_settings(
        &self,
        settings: &ProviderSettings,
        test_email: Option<&str>,
    ) -> PipelineResult<ProbeResult> {
        check(settings.validate_shape())?;
        Ok(self.prober.test_with_data(settings, test_email).await)
    }

    // flows

    pub async fn create_flow(&self, draft: FlowDraft) -> PipelineResult<MailFlow> {
        check(draft.validate_shape())?;
        let flow = self
            .flows
            .insert_flow(MailFlow::new(FlowId::new(), draft, Utc::now()))
            .await?;
        info!(flow_id = %flow.id, flow = %flow.name, "flow created");
        Ok(flow)
    }

    pub async fn get_flow(&self, id: FlowId) -> PipelineResult<MailFlow> {
        self.flows
            .get_flow(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("flow {id}")).into())
    }

    pub async fn list_flows(&self) -> PipelineResult<Vec<MailFlow>> {
        Ok(self.flows.list_flows().await?)
    }

    pub async fn delete_flow(&self, id: FlowId) -> PipelineResult<()> {
        self.flows.delete_flow(id).await?;
        info!(flow_id = %id, "flow deleted");
        Ok(())
    }

    // templates

    pub async fn create_template(&self, draft: TemplateDraft) -> PipelineResult<MailTemplate> {
        validate(&draft)?;
        let template = self
            .templates
            .insert_template(MailTemplate::new(TemplateId::new(), draft, Utc::now()))
            .await?;
        info!(template_id = %template.id, template = %template.name, "template created");
        Ok(template)
    }

    /// Replace a template's content. Variables are re-detected unless the
    /// draft declares them.
    pub async fn update_template(
        &self,
        id: TemplateId,
        draft: TemplateDraft,
    ) -> PipelineResult<MailTemplate> {
        validate(&draft)?;
        let existing = self.get_template(id).await?;
        let mut template = MailTemplate::new(id, draft, existing.created_at);
        template.updated_at = Utc::now();
        Ok(self.templates.update_template(template).await?)
    }

    pub async fn get_template(&self, id: TemplateId) -> PipelineResult<MailTemplate> {
        self.templates
            .get_template(id)
            .await?
            .ok_or_else(|| DomainError::not_found(format!("template {id}")).into())
    }

    pub async fn list_templates(&self) -> PipelineResult<Vec<MailTemplate>> {
        Ok(self.templates.list_templates().await?)
    }

    pub async fn delete_template(&self, id: TemplateId) -> PipelineResult<()> {
        self.templates.delete_template(id).await?;
        info!(template_id = %id, "template deleted");
        Ok(())
    }

    /// Preview render; sends nothing.
    pub async fn process_template(
        &self,
        id: TemplateId,
        variables: &JsonMap,
    ) -> PipelineResult<RenderedTemplate> {
        let template = self.get_template(id).await?;
        Ok(render(&template, variables))
    }

    /// Copy under a new unique name on the same flow.
    pub async fn clone_template(&self, id: TemplateId, new_name: &str) -> PipelineResult<MailTemplate> {
        let source = self.get_template(id).await?;
        let mut draft = source.to_draft();
        draft.name = new_name.trim().to_string();
        self.create_template(draft).await
    }

    // logs

    pub async fn query_logs(
        &self,
        filter: LogFilter,
        pagination: Pagination,
    ) -> PipelineResult<LogQueryResult> {
        Ok(self.logs.query(filter, pagination).await?)
    }
}

impl std::fmt::Debug for CatalogAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogAdmin")
            .field("prober", &self.prober)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::mail_log::InMemoryMailLogStore;
    use crate::prober::DEFAULT_PROBE_TIMEOUT;
    use crate::vendors::VendorRegistry;
    use crate::vendors::test_support::FakeAdapter;
    use mailroom_mail::ProviderType;
    use serde_json::json;

    fn admin() -> CatalogAdmin {
        let catalog = InMemoryCatalog::arc();
        let vendors = VendorRegistry::new().with_adapter(ProviderType::Postmark, FakeAdapter::ok());
        let prober = ConnectionProber::new(catalog.clone(), vendors, DEFAULT_PROBE_TIMEOUT);
        CatalogAdmin::new(catalog, InMemoryMailLogStore::arc(), prober)
    }

    fn postmark(name: &str) -> ProviderSettings {
        let mut s = ProviderSettings::new(name, ProviderType::Postmark);
        s.api_key = Some("token".into());
        s.from_email = Some("noreply@example.com".into());
        s.is_active = true;
        s
    }

    async fn seeded(admin: &CatalogAdmin) -> (MailProvider, MailFlow, MailTemplate) {
        let provider = admin.create_provider(postmark("pm")).await.unwrap();
        let flow = admin.create_flow(FlowDraft::new("orders", provider.id)).await.unwrap();
        let template = admin
            .create_template(TemplateDraft::new("receipt", "Receipt {{order}}", "Thanks {{name}}", flow.id))
            .await
            .unwrap();
        (provider, flow, template)
    }

    #[tokio::test]
    async fn active_provider_must_pass_config_validation() {
        let admin = admin();
        let mut settings = postmark("pm");
        settings.api_key = None;

        let err = admin.create_provider(settings.clone()).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");

        // Inactive drafts may be incomplete.
        settings.is_active = false;
        let stored = admin.create_provider(settings.clone()).await.unwrap();

        settings.is_active = true;
        let err = admin.update_provider(stored.id, settings).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn provider_priority_and_names_are_checked() {
        let admin = admin();
        let mut settings = postmark("pm");
        settings.priority = 11;
        assert_eq!(admin.create_provider(settings).await.unwrap_err().code(), "validation_error");

        admin.create_provider(postmark("pm")).await.unwrap();
        assert_eq!(admin.create_provider(postmark("pm")).await.unwrap_err().code(), "conflict");
    }

    #[tokio::test]
    async fn unbalanced_template_is_rejected() {
        let admin = admin();
        let (_, flow, _) = seeded(&admin).await;
        let err = admin
            .create_template(TemplateDraft::new("bad", "Hi", "Hello {{name", flow.id))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn process_and_clone_template() {
        let admin = admin();
        let (_, flow, template) = seeded(&admin).await;
        assert_eq!(template.variables, vec!["order", "name"]);

        let vars = json!({ "order": 42 }).as_object().cloned().unwrap();
        let preview = admin.process_template(template.id, &vars).await.unwrap();
        assert_eq!(preview.subject, "Receipt 42");
        assert_eq!(preview.body, "Thanks ");
        assert_eq!(preview.missing_variables, vec!["name"]);

        let copy = admin.clone_template(template.id, "receipt-v2").await.unwrap();
        assert_ne!(copy.id, template.id);
        assert_eq!(copy.flow_id, flow.id);
        assert_eq!(copy.variables, template.variables);

        let err = admin.clone_template(template.id, "receipt").await.unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn referenced_provider_cannot_be_deleted() {
        let admin = admin();
        let (provider, flow, template) = seeded(&admin).await;
        assert_eq!(admin.delete_provider(provider.id).await.unwrap_err().code(), "conflict");
        assert_eq!(admin.delete_flow(flow.id).await.unwrap_err().code(), "conflict");

        admin.delete_template(template.id).await.unwrap();
        admin.delete_flow(flow.id).await.unwrap();
        admin.delete_provider(provider.id).await.unwrap();
        assert!(admin.list_providers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn connection_tests_delegate_to_the_prober() {
        let admin = admin();
        let (provider, _, _) = seeded(&admin).await;
        let result = admin.test_provider(provider.id, None).await.unwrap();
        assert!(result.success);

        let mut unsaved = postmark("draft");
        unsaved.name = String::new();
        let err = admin.test_provider_settings(&unsaved, None).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
