//! End-to-end tests for the delivery pipeline over in-memory stores.
//!
//! Tests: admin catalog → enqueue → claim → render → vendor → log → job state
//!
//! Verifies:
//! - Every processed job leaves exactly one log row and a terminal status
//! - Stale leases are only recovered through an explicit release
//! - Provider failover and caps apply on the hot path

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use serde_json::json;

    use mailroom_mail::{
        FlowDraft, JobStatus, JsonMap, LogStatus, NewMailJob, ProviderSettings, ProviderType,
        TemplateDraft,
    };

    use crate::admin::CatalogAdmin;
    use crate::catalog::InMemoryCatalog;
    use crate::delivery::DeliveryService;
    use crate::jobs::{InMemoryJobStore, JobStore};
    use crate::mail_log::{InMemoryMailLogStore, LogFilter};
    use crate::prober::{ConnectionProber, DEFAULT_PROBE_TIMEOUT};
    use crate::store::Pagination;
    use crate::vendors::VendorRegistry;
    use crate::vendors::test_support::FakeAdapter;

    struct Pipeline {
        admin: CatalogAdmin,
        delivery: DeliveryService,
        jobs: Arc<InMemoryJobStore>,
        logs: Arc<InMemoryMailLogStore>,
        primary: Arc<FakeAdapter>,
        backup: Arc<FakeAdapter>,
    }

    /// Primary vendor is Postmark, backup is Mandrill.
    fn pipeline(primary: Arc<FakeAdapter>) -> Pipeline {
        let catalog = InMemoryCatalog::arc();
        let jobs = InMemoryJobStore::arc();
        let logs = InMemoryMailLogStore::arc();
        let backup = FakeAdapter::ok();
        let vendors = VendorRegistry::new()
            .with_adapter(ProviderType::Postmark, primary.clone())
            .with_adapter(ProviderType::Mandrill, backup.clone());

        let prober = ConnectionProber::new(catalog.clone(), vendors.clone(), DEFAULT_PROBE_TIMEOUT);
        Pipeline {
            admin: CatalogAdmin::new(catalog.clone(), logs.clone(), prober),
            delivery: DeliveryService::new(jobs.clone(), catalog, logs.clone(), vendors),
            jobs,
            logs,
            primary,
            backup,
        }
    }

    fn api_provider(name: &str, provider_type: ProviderType, priority: u8) -> ProviderSettings {
        let mut s = ProviderSettings::new(name, provider_type);
        s.api_key = Some(format!("{name}-key"));
        s.from_email = Some("noreply@example.com".into());
        s.is_active = true;
        s.priority = priority;
        s
    }

    fn vars(value: serde_json::Value) -> JsonMap {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn enqueue_process_and_log_end_to_end() {
        let p = pipeline(FakeAdapter::ok());
        let provider = p
            .admin
            .create_provider(api_provider("postmark", ProviderType::Postmark, 1))
            .await
            .unwrap();
        let flow = p.admin.create_flow(FlowDraft::new("orders", provider.id)).await.unwrap();
        let template = p
            .admin
            .create_template(TemplateDraft::new(
                "order-confirmation",
                "Order {{order_id}} confirmed",
                "<p>Hi {{name}}, order {{order_id}} is on its way.</p>",
                flow.id,
            ))
            .await
            .unwrap();

        let job = p
            .delivery
            .enqueue(
                NewMailJob::new("ada@example.com")
                    .with_template(template.id)
                    .with_payload(vars(json!({ "name": "Ada", "order_id": 1001 })))
                    .with_metadata(vars(json!({ "is_test": true, "channel": "orders" }))),
            )
            .await
            .unwrap();

        let report = p.delivery.process_batch(10, "worker-1").await.unwrap();
        assert_eq!(report.claimed, 1);

        let logs = p.logs.all().unwrap();
        assert_eq!(logs.len(), 1);
        let entry = &logs[0].entry;
        assert_eq!(entry.subject, "Order 1001 confirmed");
        assert_eq!(entry.provider_id, Some(provider.id));
        assert_eq!(entry.template_id, Some(template.id));
        assert!(entry.is_test);

        let stored = p.delivery.get_job(job.id).await.unwrap();
        assert!(matches!(stored.status, JobStatus::Sent | JobStatus::Failed));
        assert_ne!(stored.status, JobStatus::Processing);
        assert_eq!(p.primary.sent().len(), 1);

        let page = p
            .admin
            .query_logs(
                LogFilter {
                    channel: Some("orders".into()),
                    search: Some("1001".into()),
                    ..LogFilter::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn default_selection_fails_over_when_primary_is_capped() {
        let p = pipeline(FakeAdapter::ok());
        let mut capped = api_provider("postmark", ProviderType::Postmark, 1);
        capped.hourly_limit = Some(1);
        p.admin.create_provider(capped).await.unwrap();
        let backup = p
            .admin
            .create_provider(api_provider("mandrill", ProviderType::Mandrill, 2))
            .await
            .unwrap();

        for email in ["a@example.com", "b@example.com"] {
            p.delivery
                .enqueue(
                    NewMailJob::new(email)
                        .with_subject("Ping")
                        .with_payload(vars(json!({ "body": "pong" }))),
                )
                .await
                .unwrap();
        }
        let report = p.delivery.process_batch(10, "worker-1").await.unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(p.primary.sent().len(), 1);
        assert_eq!(p.backup.sent().len(), 1);

        let via_backup = p
            .admin
            .query_logs(
                LogFilter {
                    provider_id: Some(backup.id),
                    ..LogFilter::default()
                },
                Pagination::default(),
            )
            .await
            .unwrap();
        assert_eq!(via_backup.total, 1);
    }

    #[tokio::test]
    async fn vendor_rejection_is_logged_and_job_fails() {
        let p = pipeline(FakeAdapter::failing("invalid recipient"));
        p.admin
            .create_provider(api_provider("postmark", ProviderType::Postmark, 1))
            .await
            .unwrap();
        let job = p
            .delivery
            .enqueue(
                NewMailJob::new("ada@example.com")
                    .with_subject("Hi")
                    .with_payload(vars(json!({ "body": "hello" }))),
            )
            .await
            .unwrap();

        p.delivery.process_batch(10, "worker-1").await.unwrap();

        let stored = p.delivery.get_job(job.id).await.unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.attempt_count, 1);
        let logs = p.logs.all().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].entry.status, LogStatus::Failed);
        assert_eq!(logs[0].entry.error.as_deref(), Some("invalid recipient"));
    }

    #[tokio::test]
    async fn crashed_worker_lease_is_recovered_only_by_release() {
        let p = pipeline(FakeAdapter::ok());
        p.admin
            .create_provider(api_provider("postmark", ProviderType::Postmark, 1))
            .await
            .unwrap();
        let job = p
            .delivery
            .enqueue(
                NewMailJob::new("ada@example.com")
                    .with_subject("Hi")
                    .with_payload(vars(json!({ "body": "hello" }))),
            )
            .await
            .unwrap();

        // A worker claims and dies before finishing.
        let claimed = p.jobs.claim_pending(1, "doomed").await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Nobody else can pick it up.
        let report = p.delivery.process_batch(10, "survivor").await.unwrap();
        assert_eq!(report.claimed, 0);
        let stale = p.delivery.stale_jobs(Duration::zero()).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].locked_by.as_deref(), Some("doomed"));

        assert_eq!(p.delivery.release(&[job.id]).await.unwrap(), 1);
        let released = p.delivery.get_job(job.id).await.unwrap();
        assert_eq!(released.status, JobStatus::Pending);
        assert!(released.locked_by.is_none() && released.locked_at.is_none());

        let report = p.delivery.process_batch(10, "survivor").await.unwrap();
        assert_eq!(report.sent, 1);
        assert_eq!(p.logs.all().unwrap().len(), 1);
    }
}
