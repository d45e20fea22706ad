use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;
use tracing::info;

use mailroom_infra::{
    admin::CatalogAdmin,
    catalog::{FlowStore, InMemoryCatalog, PostgresCatalog, ProviderStore, TemplateStore},
    config::PipelineConfig,
    delivery::{BulkSender, DeliveryService},
    jobs::{InMemoryJobStore, JobStore, PostgresJobStore},
    mail_log::{InMemoryMailLogStore, MailLogStore, PostgresMailLogStore},
    prober::ConnectionProber,
    schema,
    vendors::VendorRegistry,
};

/// Application services shared by every handler.
#[derive(Debug, Clone)]
pub struct AppServices {
    pub delivery: Arc<DeliveryService>,
    pub admin: CatalogAdmin,
    pub bulk: BulkSender,
}

impl AppServices {
    /// In-memory stores (dev/test).
    pub fn in_memory(vendors: VendorRegistry, config: &PipelineConfig) -> Self {
        Self::wire(
            InMemoryJobStore::arc(),
            InMemoryCatalog::arc(),
            InMemoryMailLogStore::arc(),
            vendors,
            config,
        )
    }

    fn wire<C>(
        jobs: Arc<dyn JobStore>,
        catalog: Arc<C>,
        logs: Arc<dyn MailLogStore>,
        vendors: VendorRegistry,
        config: &PipelineConfig,
    ) -> Self
    where
        C: ProviderStore + FlowStore + TemplateStore + 'static,
    {
        let prober = ConnectionProber::new(catalog.clone(), vendors.clone(), config.probe_timeout);
        let delivery = Arc::new(DeliveryService::new(jobs, catalog.clone(), logs.clone(), vendors));
        let bulk = BulkSender::new(delivery.clone())
            .with_batch_size(config.bulk_batch_size)
            .with_delay(config.bulk_delay);

        Self {
            delivery,
            admin: CatalogAdmin::new(catalog, logs, prober),
            bulk,
        }
    }
}

/// Wire services from configuration: Postgres when `DATABASE_URL` is
/// configured, in-memory otherwise.
pub async fn build_services(config: &PipelineConfig) -> anyhow::Result<AppServices> {
    let vendors = VendorRegistry::standard(config.probe_timeout)
        .context("failed to build vendor HTTP client")?;

    match config.database_url.as_deref() {
        Some(url) => build_persistent_services(url, vendors, config).await,
        None => {
            info!("using in-memory stores");
            Ok(AppServices::in_memory(vendors, config))
        }
    }
}

async fn build_persistent_services(
    database_url: &str,
    vendors: VendorRegistry,
    config: &PipelineConfig,
) -> anyhow::Result<AppServices> {
    let pool = PgPool::connect(database_url)
        .await
        .context("failed to connect to Postgres")?;
    schema::ensure_schema(&pool)
        .await
        .context("failed to prepare mail schema")?;
    info!("using Postgres stores");

    Ok(AppServices::wire(
        Arc::new(PostgresJobStore::new(pool.clone())),
        Arc::new(PostgresCatalog::new(pool.clone())),
        Arc::new(PostgresMailLogStore::new(pool)),
        vendors,
        config,
    ))
}
