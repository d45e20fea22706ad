//! Postgres-backed catalog.
//!
//! Name uniqueness and restricted deletes are enforced by the schema
//! (`UNIQUE (name)`, `ON DELETE RESTRICT`); violations surface as
//! `StoreError::Conflict` through `map_sqlx_error`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use mailroom_core::{FlowId, ProviderId, TemplateId};
use mailroom_mail::{
    MailFlow, MailProvider, MailTemplate, ProviderSettings, ProviderType, RecipientMode,
};

use super::store::{FlowStore, ProviderStore, TemplateStore};
use crate::jobs::postgres::json_object;
use crate::store::{StoreError, map_sqlx_error};

const PROVIDER_COLUMNS: &str = r#"
    id, name, provider_type, host, port, secure, username, password,
    api_key, api_secret, api_host, from_email, from_name, reply_to,
    is_active, priority, hourly_limit, daily_limit, config, created_at, updated_at
"#;

const FLOW_COLUMNS: &str = r#"
    id, name, mail_provider_id, mail_template_id, priority, is_active,
    description, created_at, updated_at
"#;

const TEMPLATE_COLUMNS: &str = r#"
    id, name, subject, body, template_type, variables, recipient_mode,
    email_flow_id, is_active, description, created_at, updated_at
"#;

#[derive(Debug, Clone)]
pub struct PostgresCatalog {
    pool: Arc<PgPool>,
}

impl PostgresCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn delete_by_id(&self, operation: &str, sql: &str, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(sql)
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

/// On inserts a foreign key violation means the referenced row is missing.
fn map_insert_error(operation: &str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some("23503") {
            return StoreError::NotFound(format!(
                "{operation}: referenced row does not exist ({})",
                db_err.message()
            ));
        }
    }
    map_sqlx_error(operation, err)
}

fn decode_err(e: sqlx::Error) -> StoreError {
    map_sqlx_error("decode_catalog_row", e)
}

fn opt_u32(value: Option<i32>) -> Option<u32> {
    value.and_then(|v| u32::try_from(v).ok())
}

fn decode_provider(row: &PgRow) -> Result<MailProvider, StoreError> {
    let provider_type: String = row.try_get("provider_type").map_err(decode_err)?;
    let provider_type = provider_type
        .parse::<ProviderType>()
        .map_err(|e| StoreError::Storage(e.to_string()))?;
    let port: Option<i32> = row.try_get("port").map_err(decode_err)?;
    let priority: i16 = row.try_get("priority").map_err(decode_err)?;

    let settings = ProviderSettings {
        name: row.try_get("name").map_err(decode_err)?,
        provider_type,
        host: row.try_get("host").map_err(decode_err)?,
        port: port.and_then(|p| u16::try_from(p).ok()),
        secure: row.try_get("secure").map_err(decode_err)?,
        username: row.try_get("username").map_err(decode_err)?,
        password: row.try_get("password").map_err(decode_err)?,
        api_key: row.try_get("api_key").map_err(decode_err)?,
        api_secret: row.try_get("api_secret").map_err(decode_err)?,
        api_host: row.try_get("api_host").map_err(decode_err)?,
        from_email: row.try_get("from_email").map_err(decode_err)?,
        from_name: row.try_get("from_name").map_err(decode_err)?,
        reply_to: row.try_get("reply_to").map_err(decode_err)?,
        is_active: row.try_get("is_active").map_err(decode_err)?,
        priority: u8::try_from(priority).unwrap_or(u8::MAX),
        hourly_limit: opt_u32(row.try_get("hourly_limit").map_err(decode_err)?),
        daily_limit: opt_u32(row.try_get("daily_limit").map_err(decode_err)?),
        config: json_object(row.try_get("config").map_err(decode_err)?),
    };
    let id: Uuid = row.try_get("id").map_err(decode_err)?;
    Ok(MailProvider {
        id: ProviderId::from_uuid(id),
        settings,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
    })
}

fn decode_flow(row: &PgRow) -> Result<MailFlow, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode_err)?;
    let provider_id: Uuid = row.try_get("mail_provider_id").map_err(decode_err)?;
    let template_id: Option<Uuid> = row.try_get("mail_template_id").map_err(decode_err)?;
    Ok(MailFlow {
        id: FlowId::from_uuid(id),
        name: row.try_get("name").map_err(decode_err)?,
        provider_id: ProviderId::from_uuid(provider_id),
        template_id: template_id.map(TemplateId::from_uuid),
        priority: row.try_get("priority").map_err(decode_err)?,
        is_active: row.try_get("is_active").map_err(decode_err)?,
        description: row.try_get("description").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
    })
}

fn decode_template(row: &PgRow) -> Result<MailTemplate, StoreError> {
    let id: Uuid = row.try_get("id").map_err(decode_err)?;
    let flow_id: Uuid = row.try_get("email_flow_id").map_err(decode_err)?;
    let variables: serde_json::Value = row.try_get("variables").map_err(decode_err)?;
    let recipient_mode: serde_json::Value = row.try_get("recipient_mode").map_err(decode_err)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(decode_err)?;
    Ok(MailTemplate {
        id: TemplateId::from_uuid(id),
        name: row.try_get("name").map_err(decode_err)?,
        subject: row.try_get("subject").map_err(decode_err)?,
        body: row.try_get("body").map_err(decode_err)?,
        template_type: row.try_get("template_type").map_err(decode_err)?,
        variables: serde_json::from_value(variables)
            .map_err(|e| StoreError::Storage(format!("template {id} variables: {e}")))?,
        recipient_mode: serde_json::from_value::<RecipientMode>(recipient_mode)
            .map_err(|e| StoreError::Storage(format!("template {id} recipient mode: {e}")))?,
        flow_id: FlowId::from_uuid(flow_id),
        is_active: row.try_get("is_active").map_err(decode_err)?,
        description: row.try_get("description").map_err(decode_err)?,
        created_at,
        updated_at: row.try_get("updated_at").map_err(decode_err)?,
    })
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Storage(e.to_string()))
}

#[async_trait]
impl ProviderStore for PostgresCatalog {
    #[instrument(skip(self, provider), fields(provider = %provider.name()), err)]
    async fn insert_provider(&self, provider: MailProvider) -> Result<MailProvider, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO mail_providers ({PROVIDER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21)
            RETURNING {PROVIDER_COLUMNS}
            "#
        );
        let s = &provider.settings;
        let row = sqlx::query(&sql)
            .bind(provider.id.as_uuid())
            .bind(s.name.trim())
            .bind(s.provider_type.as_str())
            .bind(&s.host)
            .bind(s.port.map(i32::from))
            .bind(s.secure)
            .bind(&s.username)
            .bind(&s.password)
            .bind(&s.api_key)
            .bind(&s.api_secret)
            .bind(&s.api_host)
            .bind(&s.from_email)
            .bind(&s.from_name)
            .bind(&s.reply_to)
            .bind(s.is_active)
            .bind(i16::from(s.priority))
            .bind(s.hourly_limit.map(|v| i32::try_from(v).unwrap_or(i32::MAX)))
            .bind(s.daily_limit.map(|v| i32::try_from(v).unwrap_or(i32::MAX)))
            .bind(serde_json::Value::Object(s.config.clone()))
            .bind(provider.created_at)
            .bind(provider.updated_at)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_insert_error("insert_provider", e))?;
        decode_provider(&row)
    }

    #[instrument(skip(self, provider), fields(provider_id = %provider.id), err)]
    async fn update_provider(&self, provider: MailProvider) -> Result<MailProvider, StoreError> {
        let sql = format!(
            r#"
            UPDATE mail_providers SET
                name = $2, provider_type = $3, host = $4, port = $5, secure = $6,
                username = $7, password = $8, api_key = $9, api_secret = $10,
                api_host = $11, from_email = $12, from_name = $13, reply_to = $14,
                is_active = $15, priority = $16, hourly_limit = $17, daily_limit = $18,
                config = $19, updated_at = $20
            WHERE id = $1
            RETURNING {PROVIDER_COLUMNS}
            "#
        );
        let s = &provider.settings;
        let row = sqlx::query(&sql)
            .bind(provider.id.as_uuid())
            .bind(s.name.trim())
            .bind(s.provider_type.as_str())
            .bind(&s.host)
            .bind(s.port.map(i32::from))
            .bind(s.secure)
            .bind(&s.username)
            .bind(&s.password)
            .bind(&s.api_key)
            .bind(&s.api_secret)
            .bind(&s.api_host)
            .bind(&s.from_email)
            .bind(&s.from_name)
            .bind(&s.reply_to)
            .bind(s.is_active)
            .bind(i16::from(s.priority))
            .bind(s.hourly_limit.map(|v| i32::try_from(v).unwrap_or(i32::MAX)))
            .bind(s.daily_limit.map(|v| i32::try_from(v).unwrap_or(i32::MAX)))
            .bind(serde_json::Value::Object(s.config.clone()))
            .bind(provider.updated_at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_provider", e))?
            .ok_or_else(|| StoreError::NotFound(format!("provider {}", provider.id)))?;
        decode_provider(&row)
    }

    #[instrument(skip(self), fields(provider_id = %id), err)]
    async fn get_provider(&self, id: ProviderId) -> Result<Option<MailProvider>, StoreError> {
        let sql = format!("SELECT {PROVIDER_COLUMNS} FROM mail_providers WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_provider", e))?;
        row.as_ref().map(decode_provider).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_providers(&self) -> Result<Vec<MailProvider>, StoreError> {
        let sql =
            format!("SELECT {PROVIDER_COLUMNS} FROM mail_providers ORDER BY priority ASC, name ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_providers", e))?;
        rows.iter().map(decode_provider).collect()
    }

    #[instrument(skip(self), err)]
    async fn active_providers(&self) -> Result<Vec<MailProvider>, StoreError> {
        let sql = format!(
            "SELECT {PROVIDER_COLUMNS} FROM mail_providers WHERE is_active ORDER BY priority ASC, name ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("active_providers", e))?;
        rows.iter().map(decode_provider).collect()
    }

    #[instrument(skip(self), fields(provider_id = %id), err)]
    async fn delete_provider(&self, id: ProviderId) -> Result<(), StoreError> {
        self.delete_by_id(
            "delete_provider",
            "DELETE FROM mail_providers WHERE id = $1",
            *id.as_uuid(),
        )
        .await
    }
}

#[async_trait]
impl FlowStore for PostgresCatalog {
    #[instrument(skip(self, flow), fields(flow = %flow.name), err)]
    async fn insert_flow(&self, flow: MailFlow) -> Result<MailFlow, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO email_flows ({FLOW_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {FLOW_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(flow.id.as_uuid())
            .bind(&flow.name)
            .bind(flow.provider_id.as_uuid())
            .bind(flow.template_id.map(Uuid::from))
            .bind(flow.priority)
            .bind(flow.is_active)
            .bind(&flow.description)
            .bind(flow.created_at)
            .bind(flow.updated_at)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_insert_error("insert_flow", e))?;
        decode_flow(&row)
    }

    #[instrument(skip(self), fields(flow_id = %id), err)]
    async fn get_flow(&self, id: FlowId) -> Result<Option<MailFlow>, StoreError> {
        let sql = format!("SELECT {FLOW_COLUMNS} FROM email_flows WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_flow", e))?;
        row.as_ref().map(decode_flow).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_flows(&self) -> Result<Vec<MailFlow>, StoreError> {
        let sql = format!("SELECT {FLOW_COLUMNS} FROM email_flows ORDER BY priority ASC, name ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_flows", e))?;
        rows.iter().map(decode_flow).collect()
    }

    #[instrument(skip(self), fields(flow_id = %id), err)]
    async fn delete_flow(&self, id: FlowId) -> Result<(), StoreError> {
        self.delete_by_id(
            "delete_flow",
            "DELETE FROM email_flows WHERE id = $1",
            *id.as_uuid(),
        )
        .await
    }
}

#[async_trait]
impl TemplateStore for PostgresCatalog {
    #[instrument(skip(self, template), fields(template = %template.name), err)]
    async fn insert_template(&self, template: MailTemplate) -> Result<MailTemplate, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO mail_templates ({TEMPLATE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {TEMPLATE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(template.id.as_uuid())
            .bind(&template.name)
            .bind(&template.subject)
            .bind(&template.body)
            .bind(&template.template_type)
            .bind(encode_json(&template.variables)?)
            .bind(encode_json(&template.recipient_mode)?)
            .bind(template.flow_id.as_uuid())
            .bind(template.is_active)
            .bind(&template.description)
            .bind(template.created_at)
            .bind(template.updated_at)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_insert_error("insert_template", e))?;
        decode_template(&row)
    }

    #[instrument(skip(self, template), fields(template_id = %template.id), err)]
    async fn update_template(&self, template: MailTemplate) -> Result<MailTemplate, StoreError> {
        let sql = format!(
            r#"
            UPDATE mail_templates SET
                name = $2, subject = $3, body = $4, template_type = $5, variables = $6,
                recipient_mode = $7, email_flow_id = $8, is_active = $9,
                description = $10, updated_at = $11
            WHERE id = $1
            RETURNING {TEMPLATE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(template.id.as_uuid())
            .bind(&template.name)
            .bind(&template.subject)
            .bind(&template.body)
            .bind(&template.template_type)
            .bind(encode_json(&template.variables)?)
            .bind(encode_json(&template.recipient_mode)?)
            .bind(template.flow_id.as_uuid())
            .bind(template.is_active)
            .bind(&template.description)
            .bind(template.updated_at)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_insert_error("update_template", e))?
            .ok_or_else(|| StoreError::NotFound(format!("template {}", template.id)))?;
        decode_template(&row)
    }

    #[instrument(skip(self), fields(template_id = %id), err)]
    async fn get_template(&self, id: TemplateId) -> Result<Option<MailTemplate>, StoreError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM mail_templates WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_template", e))?;
        row.as_ref().map(decode_template).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_templates(&self) -> Result<Vec<MailTemplate>, StoreError> {
        let sql = format!("SELECT {TEMPLATE_COLUMNS} FROM mail_templates ORDER BY name ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_templates", e))?;
        rows.iter().map(decode_template).collect()
    }

    #[instrument(skip(self), fields(template_id = %id), err)]
    async fn delete_template(&self, id: TemplateId) -> Result<(), StoreError> {
        self.delete_by_id(
            "delete_template",
            "DELETE FROM mail_templates WHERE id = $1",
            *id.as_uuid(),
        )
        .await
    }
}
