//! Catalog repository contracts and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use mailroom_core::{FlowId, ProviderId, TemplateId};
use mailroom_mail::{MailFlow, MailProvider, MailTemplate};

use crate::store::StoreError;

/// Provider registry.
#[async_trait]
pub trait ProviderStore: Send + Sync {
    /// Fails with `Conflict` when the name is taken.
    async fn insert_provider(&self, provider: MailProvider) -> Result<MailProvider, StoreError>;

    async fn update_provider(&self, provider: MailProvider) -> Result<MailProvider, StoreError>;

    async fn get_provider(&self, id: ProviderId) -> Result<Option<MailProvider>, StoreError>;

    /// All providers by (priority, name).
    async fn list_providers(&self) -> Result<Vec<MailProvider>, StoreError>;

    /// Active providers by (priority, name). Config validity is not checked here.
    async fn active_providers(&self) -> Result<Vec<MailProvider>, StoreError>;

    /// Fails with `Conflict` while any flow references the provider.
    async fn delete_provider(&self, id: ProviderId) -> Result<(), StoreError>;
}

/// Flow bindings.
#[async_trait]
pub trait FlowStore: Send + Sync {
    async fn insert_flow(&self, flow: MailFlow) -> Result<MailFlow, StoreError>;

    async fn get_flow(&self, id: FlowId) -> Result<Option<MailFlow>, StoreError>;

    /// All flows by (priority, name).
    async fn list_flows(&self) -> Result<Vec<MailFlow>, StoreError>;

    /// Fails with `Conflict` while a template is bound to the flow.
    async fn delete_flow(&self, id: FlowId) -> Result<(), StoreError>;
}

/// Template store.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert_template(&self, template: MailTemplate) -> Result<MailTemplate, StoreError>;

    async fn update_template(&self, template: MailTemplate) -> Result<MailTemplate, StoreError>;

    async fn get_template(&self, id: TemplateId) -> Result<Option<MailTemplate>, StoreError>;

    /// All templates by name.
    async fn list_templates(&self) -> Result<Vec<MailTemplate>, StoreError>;

    /// Fails with `Conflict` while a flow references the template.
    async fn delete_template(&self, id: TemplateId) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct CatalogState {
    providers: HashMap<ProviderId, MailProvider>,
    flows: HashMap<FlowId, MailFlow>,
    templates: HashMap<TemplateId, MailTemplate>,
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn name_taken<'a, I>(mut names: I, name: &str) -> bool
where
    I: Iterator<Item = &'a str>,
{
    names.any(|n| n == name)
}

#[async_trait]
impl ProviderStore for InMemoryCatalog {
    async fn insert_provider(&self, provider: MailProvider) -> Result<MailProvider, StoreError> {
        let mut state = self.state.write()?;
        if name_taken(state.providers.values().map(|p| p.name()), provider.name()) {
            return Err(StoreError::Conflict(format!(
                "provider name '{}' already exists",
                provider.name()
            )));
        }
        state.providers.insert(provider.id, provider.clone());
        Ok(provider)
    }

    async fn update_provider(&self, provider: MailProvider) -> Result<MailProvider, StoreError> {
        let mut state = self.state.write()?;
        if !state.providers.contains_key(&provider.id) {
            return Err(StoreError::NotFound(format!("provider {}", provider.id)));
        }
        let others = state
            .providers
            .values()
            .filter(|p| p.id != provider.id)
            .map(|p| p.name());
        if name_taken(others, provider.name()) {
            return Err(StoreError::Conflict(format!(
                "provider name '{}' already exists",
                provider.name()
            )));
        }
        state.providers.insert(provider.id, provider.clone());
        Ok(provider)
    }

    async fn get_provider(&self, id: ProviderId) -> Result<Option<MailProvider>, StoreError> {
        Ok(self.state.read()?.providers.get(&id).cloned())
    }

    async fn list_providers(&self) -> Result<Vec<MailProvider>, StoreError> {
        let mut providers: Vec<_> = self.state.read()?.providers.values().cloned().collect();
        providers.sort_by(|a, b| (a.priority(), a.name()).cmp(&(b.priority(), b.name())));
        Ok(providers)
    }

    async fn active_providers(&self) -> Result<Vec<MailProvider>, StoreError> {
        let mut providers = self.list_providers().await?;
        providers.retain(MailProvider::is_active);
        Ok(providers)
    }

    async fn delete_provider(&self, id: ProviderId) -> Result<(), StoreError> {
        let mut state = self.state.write()?;
        if !state.providers.contains_key(&id) {
            return Err(StoreError::NotFound(format!("provider {id}")));
        }
        if let Some(flow) = state.flows.values().find(|f| f.provider_id == id) {
            return Err(StoreError::Conflict(format!(
                "provider {id} is referenced by flow '{}'",
                flow.name
            )));
        }
        state.providers.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl FlowStore for InMemoryCatalog {
    async fn insert_flow(&self, flow: MailFlow) -> Result<MailFlow, StoreError> {
        let mut state = self.state.write()?;
        if name_taken(state.flows.values().map(|f| f.name.as_str()), &flow.name) {
            return Err(StoreError::Conflict(format!(
                "flow name '{}' already exists",
                flow.name
            )));
        }
        if !state.providers.contains_key(&flow.provider_id) {
            return Err(StoreError::NotFound(format!("provider {}", flow.provider_id)));
        }
        if let Some(template_id) = flow.template_id {
            if !state.templates.contains_key(&template_id) {
                return Err(StoreError::NotFound(format!("template {template_id}")));
            }
        }
        state.flows.insert(flow.id, flow.clone());
        Ok(flow)
    }

    async fn get_flow(&self, id: FlowId) -> Result<Option<MailFlow>, StoreError> {
        Ok(self.state.read()?.flows.get(&id).cloned())
    }

    async fn list_flows(&self) -> Result<Vec<MailFlow>, StoreError> {
        let mut flows: Vec<_> = self.state.read()?.flows.values().cloned().collect();
        flows.sort_by(|a, b| (a.priority, &a.name).cmp(&(b.priority, &b.name)));
        Ok(flows)
    }

    async fn delete_flow(&self, id: FlowId) -> Result<(), StoreError> {
        let mut state = self.state.write()?;
        if !state.flows.contains_key(&id) {
            return Err(StoreError::NotFound(format!("flow {id}")));
        }
        if let Some(template) = state.templates.values().find(|t| t.flow_id == id) {
            return Err(StoreError::Conflict(format!(
                "flow {id} is bound to template '{}'",
                template.name
            )));
        }
        state.flows.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl TemplateStore for InMemoryCatalog {
    async fn insert_template(&self, template: MailTemplate) -> Result<MailTemplate, StoreError> {
        let mut state = self.state.write()?;
        if name_taken(state.templates.values().map(|t| t.name.as_str()), &template.name) {
            return Err(StoreError::Conflict(format!(
                "template name '{}' already exists",
                template.name
            )));
        }
        if !state.flows.contains_key(&template.flow_id) {
            return Err(StoreError::NotFound(format!("flow {}", template.flow_id)));
        }
        state.templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn update_template(&self, template: MailTemplate) -> Result<MailTemplate, StoreError> {
        let mut state = self.state.write()?;
        if !state.templates.contains_key(&template.id) {
            return Err(StoreError::NotFound(format!("template {}", template.id)));
        }
        let others = state
            .templates
            .values()
            .filter(|t| t.id != template.id)
            .map(|t| t.name.as_str());
        if name_taken(others, &template.name) {
            return Err(StoreError::Conflict(format!(
                "template name '{}' already exists",
                template.name
            )));
        }
        if !state.flows.contains_key(&template.flow_id) {
            return Err(StoreError::NotFound(format!("flow {}", template.flow_id)));
        }
        state.templates.insert(template.id, template.clone());
        Ok(template)
    }

    async fn get_template(&self, id: TemplateId) -> Result<Option<MailTemplate>, StoreError> {
        Ok(self.state.read()?.templates.get(&id).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<MailTemplate>, StoreError> {
        let mut templates: Vec<_> = self.state.read()?.templates.values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn delete_template(&self, id: TemplateId) -> Result<(), StoreError> {
        let mut state = self.state.write()?;
        if !state.templates.contains_key(&id) {
            return Err(StoreError::NotFound(format!("template {id}")));
        }
        if let Some(flow) = state.flows.values().find(|f| f.template_id == Some(id)) {
            return Err(StoreError::Conflict(format!(
                "template {id} is referenced by flow '{}'",
                flow.name
            )));
        }
        state.templates.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mailroom_mail::{FlowDraft, ProviderSettings, ProviderType, TemplateDraft};

    fn provider(name: &str, priority: u8, active: bool) -> MailProvider {
        let mut settings = ProviderSettings::new(name, ProviderType::Sendgrid);
        settings.api_key = Some("key".into());
        settings.priority = priority;
        settings.is_active = active;
        MailProvider::new(ProviderId::new(), settings, Utc::now())
    }

    #[tokio::test]
    async fn provider_names_are_unique() {
        let catalog = InMemoryCatalog::new();
        catalog.insert_provider(provider("primary", 1, true)).await.unwrap();
        let err = catalog
            .insert_provider(provider("primary", 2, true))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn active_providers_are_ordered_by_priority_then_name() {
        let catalog = InMemoryCatalog::new();
        catalog.insert_provider(provider("zeta", 2, true)).await.unwrap();
        catalog.insert_provider(provider("alpha", 2, true)).await.unwrap();
        catalog.insert_provider(provider("first", 1, true)).await.unwrap();
        catalog.insert_provider(provider("off", 1, false)).await.unwrap();

        let names: Vec<_> = catalog
            .active_providers()
            .await
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "alpha", "zeta"]);
    }

    #[tokio::test]
    async fn deletes_are_restricted_while_referenced() {
        let catalog = InMemoryCatalog::new();
        let p = catalog.insert_provider(provider("primary", 1, true)).await.unwrap();
        let flow = MailFlow::new(FlowId::new(), FlowDraft::new("orders", p.id), Utc::now());
        let flow = catalog.insert_flow(flow).await.unwrap();
        let template = MailTemplate::new(
            TemplateId::new(),
            TemplateDraft::new("receipt", "Receipt", "Thanks {{name}}", flow.id),
            Utc::now(),
        );
        let template = catalog.insert_template(template).await.unwrap();

        assert!(matches!(
            catalog.delete_provider(p.id).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            catalog.delete_flow(flow.id).await,
            Err(StoreError::Conflict(_))
        ));

        catalog.delete_template(template.id).await.unwrap();
        catalog.delete_flow(flow.id).await.unwrap();
        catalog.delete_provider(p.id).await.unwrap();
        assert!(catalog.list_providers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn templates_require_an_existing_flow() {
        let catalog = InMemoryCatalog::new();
        let template = MailTemplate::new(
            TemplateId::new(),
            TemplateDraft::new("receipt", "Receipt", "Thanks", FlowId::new()),
            Utc::now(),
        );
        assert!(matches!(
            catalog.insert_template(template).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
