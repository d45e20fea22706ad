//! Idempotent DDL for the Postgres repositories.

use sqlx::PgPool;
use tracing::info;

use crate::store::{StoreError, map_sqlx_error};

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS mail_providers (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        provider_type TEXT NOT NULL,
        host TEXT,
        port INTEGER,
        secure BOOLEAN NOT NULL DEFAULT FALSE,
        username TEXT,
        password TEXT,
        api_key TEXT,
        api_secret TEXT,
        api_host TEXT,
        from_email TEXT,
        from_name TEXT,
        reply_to TEXT,
        is_active BOOLEAN NOT NULL DEFAULT FALSE,
        priority SMALLINT NOT NULL DEFAULT 5 CHECK (priority BETWEEN 1 AND 10),
        hourly_limit INTEGER,
        daily_limit INTEGER,
        config JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS email_flows (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        mail_provider_id UUID NOT NULL REFERENCES mail_providers (id) ON DELETE RESTRICT,
        mail_template_id UUID,
        priority INTEGER NOT NULL DEFAULT 5,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        description TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mail_templates (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        template_type TEXT NOT NULL,
        variables JSONB NOT NULL DEFAULT '[]'::jsonb,
        recipient_mode JSONB NOT NULL DEFAULT '{"mode":"explicit"}'::jsonb,
        email_flow_id UUID NOT NULL REFERENCES email_flows (id) ON DELETE RESTRICT,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        description TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    // flows and templates reference each other; the second edge is added
    // once both tables exist.
    r#"
    DO $$
    BEGIN
        IF NOT EXISTS (
            SELECT 1 FROM pg_constraint WHERE conname = 'email_flows_mail_template_id_fkey'
        ) THEN
            ALTER TABLE email_flows
                ADD CONSTRAINT email_flows_mail_template_id_fkey
                FOREIGN KEY (mail_template_id) REFERENCES mail_templates (id) ON DELETE RESTRICT;
        END IF;
    END
    $$
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mail_jobs (
        id UUID PRIMARY KEY,
        email_flow_id UUID REFERENCES email_flows (id) ON DELETE SET NULL,
        mail_template_id UUID REFERENCES mail_templates (id) ON DELETE SET NULL,
        mail_provider_id UUID REFERENCES mail_providers (id) ON DELETE SET NULL,
        recipient_email TEXT NOT NULL,
        recipient_name TEXT,
        subject TEXT,
        payload JSONB,
        metadata JSONB,
        priority INTEGER NOT NULL DEFAULT 5,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'processing', 'queued', 'sent', 'failed')),
        attempt_count INTEGER NOT NULL DEFAULT 0,
        scheduled_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        available_at TIMESTAMPTZ DEFAULT now(),
        locked_at TIMESTAMPTZ,
        locked_by TEXT,
        last_error TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        CHECK ((status = 'processing') = (locked_by IS NOT NULL))
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS mail_jobs_claim_idx
        ON mail_jobs (status, priority, created_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS mail_logs (
        id UUID PRIMARY KEY,
        mail_job_id UUID REFERENCES mail_jobs (id) ON DELETE SET NULL,
        mail_provider_id UUID REFERENCES mail_providers (id) ON DELETE SET NULL,
        mail_template_id UUID REFERENCES mail_templates (id) ON DELETE SET NULL,
        email_flow_id UUID REFERENCES email_flows (id) ON DELETE SET NULL,
        recipient_email TEXT NOT NULL,
        recipient_name TEXT,
        cc TEXT[] NOT NULL DEFAULT '{}',
        bcc TEXT[] NOT NULL DEFAULT '{}',
        subject TEXT NOT NULL,
        body_preview TEXT NOT NULL,
        status TEXT NOT NULL CHECK (status IN ('sent', 'queued', 'failed')),
        provider_message_id TEXT,
        provider_response JSONB,
        error TEXT,
        triggered_by TEXT,
        is_test BOOLEAN NOT NULL DEFAULT FALSE,
        channel TEXT NOT NULL DEFAULT 'email',
        metadata JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS mail_logs_created_idx ON mail_logs (created_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS mail_logs_provider_idx
        ON mail_logs (mail_provider_id, created_at)
    "#,
];

/// Create every table and index the Postgres repositories need.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    info!(tables = 5, "mail schema ready");
    Ok(())
}
