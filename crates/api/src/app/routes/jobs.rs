//! Job queue: enqueue, inspection and manual lease release.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use serde_json::json;

use mailroom_core::JobId;
use mailroom_mail::NewMailJob;

use crate::app::{dto, errors, services::AppServices};

const DEFAULT_STALE_SECS: i64 = 300;

pub fn router() -> Router {
    Router::new()
        .route("/", post(enqueue_job))
        .route("/bulk", post(send_bulk))
        .route("/stats", get(job_stats))
        .route("/stale", get(stale_jobs))
        .route("/release", post(release_jobs))
        .route("/:id", get(get_job))
}

pub async fn enqueue_job(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<NewMailJob>,
) -> axum::response::Response {
    match services.delivery.enqueue(body).await {
        Ok(job) => (StatusCode::CREATED, Json(json!({ "id": job.id }))).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: JobId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.delivery.get_job(id).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn job_stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.delivery.job_stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// GET /jobs/stale?older_than_secs=300
///
/// `processing` jobs whose lease is older than the threshold. Read-only:
/// recovering them is a separate `POST /jobs/release`.
pub async fn stale_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::StaleJobsQuery>,
) -> axum::response::Response {
    let secs = query.older_than_secs.unwrap_or(DEFAULT_STALE_SECS);
    if secs < 0 {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            "older_than_secs must not be negative",
        );
    }
    match services.delivery.stale_jobs(Duration::seconds(secs)).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn release_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::ReleaseJobsRequest>,
) -> axum::response::Response {
    match services.delivery.release(&body.job_ids).await {
        Ok(released) => Json(json!({ "released": released })).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// POST /jobs/bulk
///
/// Sends directly in paced batches, bypassing the queue. Per-message
/// failures are reported in the body; the request itself still succeeds.
pub async fn send_bulk(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::BulkSendRequest>,
) -> axum::response::Response {
    let report = services.bulk.send_bulk(body.messages).await;
    Json(report).into_response()
}
