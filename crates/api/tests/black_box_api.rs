use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use mailroom_api::app::services::AppServices;
use mailroom_infra::config::PipelineConfig;
use mailroom_infra::vendors::{
    OutboundMessage, ProbeResult, SendFailure, SendReceipt, SendResult, VendorAdapter,
    VendorRegistry,
};
use mailroom_mail::{ProviderSettings, ProviderType};

/// Accepts everything except recipients starting with `bounce`.
struct StubVendor;

#[async_trait]
impl VendorAdapter for StubVendor {
    async fn probe(&self, _settings: &ProviderSettings, _timeout: Duration) -> ProbeResult {
        ProbeResult::ok("stub reachable")
    }

    async fn send(&self, _settings: &ProviderSettings, message: &OutboundMessage) -> SendResult {
        if message.to_email.starts_with("bounce") {
            return Err(SendFailure::new("mailbox unavailable"));
        }
        Ok(SendReceipt {
            message_id: Some(format!("stub-{}", message.to_email)),
            response: None,
        })
    }
}

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory stores, stub vendor, ephemeral port.
        let vendors = VendorRegistry::new().with_adapter(ProviderType::Postmark, Arc::new(StubVendor));
        let config = PipelineConfig {
            bulk_delay: Duration::from_millis(1),
            ..PipelineConfig::default()
        };
        let services = Arc::new(AppServices::in_memory(vendors, &config));
        let app = mailroom_api::app::build_app(services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self.client.post(self.url(path)).json(&body).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(self.url(path)).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        let res = self.client.delete(self.url(path)).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    /// Provider, flow and template, returned as (provider_id, flow_id, template_id).
    async fn seed_catalog(&self) -> (String, String, String) {
        let (status, provider) = self.post("/providers", postmark("primary")).await;
        assert_eq!(status, StatusCode::CREATED, "{provider}");
        let provider_id = provider["id"].as_str().unwrap().to_string();

        let (status, flow) = self
            .post("/flows", json!({ "name": "orders", "provider_id": provider_id }))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{flow}");
        let flow_id = flow["id"].as_str().unwrap().to_string();

        let (status, template) = self
            .post(
                "/templates",
                json!({
                    "name": "receipt",
                    "subject": "Order {{order_id}}",
                    "body": "<p>Thanks {{name}}</p>",
                    "template_type": "transactional",
                    "flow_id": flow_id,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{template}");
        let template_id = template["id"].as_str().unwrap().to_string();

        (provider_id, flow_id, template_id)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn postmark(name: &str) -> Value {
    json!({
        "name": name,
        "provider_type": "postmark",
        "api_key": "server-token",
        "from_email": "noreply@example.com",
        "is_active": true,
        "priority": 1,
    })
}

#[tokio::test]
async fn health_is_public_and_ok() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn provider_crud_and_error_codes() {
    let srv = TestServer::spawn().await;

    let (status, created) = srv.post("/providers", postmark("primary")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(created.get("api_key").is_none(), "secrets must not be echoed");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = srv.post("/providers", postmark("primary")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let mut incomplete = postmark("secondary");
    incomplete["api_key"] = Value::Null;
    let (status, body) = srv.post("/providers", incomplete).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, list) = srv.get("/providers").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, probe) = srv
        .post(&format!("/providers/{id}/test"), json!({ "test_email": "ops@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(probe["success"], true);
    assert_eq!(probe["details"]["test_email"], "ops@example.com");

    let (status, _) = srv.delete(&format!("/providers/{id}")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = srv.get(&format!("/providers/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, body) = srv.get("/providers/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn unsaved_settings_can_be_probed() {
    let srv = TestServer::spawn().await;

    let mut body = postmark("draft");
    body["test_email"] = json!("ops@example.com");
    let (status, probe) = srv.post("/providers/test", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(probe["success"], true);

    let mut bad = postmark("draft");
    bad["test_email"] = json!("not-an-address");
    let (status, probe) = srv.post("/providers/test", bad).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(probe["success"], false);
}

#[tokio::test]
async fn template_process_clone_and_restricted_delete() {
    let srv = TestServer::spawn().await;
    let (_, flow_id, template_id) = srv.seed_catalog().await;

    let (status, rendered) = srv
        .post(
            &format!("/templates/{template_id}/process"),
            json!({ "variables": { "order_id": 7 } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rendered["subject"], "Order 7");
    assert_eq!(rendered["missing_variables"], json!(["name"]));

    let (status, copy) = srv
        .post(&format!("/templates/{template_id}/clone"), json!({ "new_name": "receipt-v2" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(copy["flow_id"].as_str().unwrap(), flow_id);

    let (status, body) = srv.delete(&format!("/flows/{flow_id}")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, unbalanced) = srv
        .post(
            "/templates",
            json!({
                "name": "broken",
                "subject": "Hi",
                "body": "Hello {{name",
                "template_type": "transactional",
                "flow_id": flow_id,
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{unbalanced}");
}

#[tokio::test]
async fn enqueued_job_is_delivered_and_logged() {
    let srv = TestServer::spawn().await;
    let (provider_id, _, template_id) = srv.seed_catalog().await;

    let (status, body) = srv
        .post(
            "/jobs",
            json!({
                "template_id": template_id,
                "recipient_email": "ada@example.com",
                "payload": { "order_id": 1001, "name": "Ada" },
                "metadata": { "channel": "orders" },
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let job_id = body["id"].as_str().unwrap().to_string();

    let (_, job) = srv.get(&format!("/jobs/{job_id}")).await;
    assert_eq!(job["status"], "pending");

    let report = srv.services.delivery.process_batch(10, "api-test").await.unwrap();
    assert_eq!(report.sent, 1);

    let (_, job) = srv.get(&format!("/jobs/{job_id}")).await;
    assert_eq!(job["status"], "sent");
    assert!(job["locked_by"].is_null());

    let (status, logs) = srv
        .get(&format!("/logs?status=sent&provider_id={provider_id}&search=1001"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["total"], 1);
    assert_eq!(logs["has_more"], false);
    assert_eq!(logs["logs"][0]["subject"], "Order 1001");
    assert_eq!(logs["logs"][0]["channel"], "orders");

    let (_, stats) = srv.get("/jobs/stats").await;
    assert_eq!(stats["sent"], 1);
    assert_eq!(stats["pending"], 0);
}

#[tokio::test]
async fn invalid_jobs_are_rejected_at_enqueue() {
    let srv = TestServer::spawn().await;

    let (status, body) = srv
        .post("/jobs", json!({ "recipient_email": "nobody", "payload": { "body": "x" } }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let missing = "0190f2b8-0000-7000-8000-000000000000";
    let (status, body) = srv
        .post("/jobs", json!({ "recipient_email": "ada@example.com", "template_id": missing }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn failed_job_is_released_back_to_pending() {
    let srv = TestServer::spawn().await;
    srv.seed_catalog().await;

    let (_, body) = srv
        .post(
            "/jobs",
            json!({
                "recipient_email": "bounce@example.com",
                "subject": "Hi",
                "payload": { "body": "hello" },
            }),
        )
        .await;
    let job_id = body["id"].as_str().unwrap().to_string();

    let report = srv.services.delivery.process_batch(10, "api-test").await.unwrap();
    assert_eq!(report.failed, 1);
    let (_, job) = srv.get(&format!("/jobs/{job_id}")).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["attempt_count"], 1);

    let (_, stale) = srv.get("/jobs/stale?older_than_secs=0").await;
    assert!(stale.as_array().unwrap().is_empty());

    let (status, released) = srv.post("/jobs/release", json!({ "job_ids": [job_id] })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(released["released"], 1);

    let (_, job) = srv.get(&format!("/jobs/{job_id}")).await;
    assert_eq!(job["status"], "pending");
}

#[tokio::test]
async fn bulk_send_reports_per_message_outcomes() {
    let srv = TestServer::spawn().await;
    let (_, _, template_id) = srv.seed_catalog().await;

    let messages: Vec<Value> = ["a@example.com", "bounce@example.com", "c@example.com"]
        .iter()
        .map(|email| json!({ "template_id": template_id, "recipient_email": email }))
        .collect();
    let (status, report) = srv.post("/jobs/bulk", json!({ "messages": messages })).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["total"], 3);
    assert_eq!(report["succeeded"], 2);
    assert_eq!(report["failed"], 1);
    assert_eq!(report["results"][1]["error"], "mailbox unavailable");
}
