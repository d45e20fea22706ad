//! Delivery log inspection.

use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use mailroom_infra::{mail_log::LogFilter, Pagination};

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new().route("/", get(list_logs))
}

/// GET /logs?status=sent&provider_id=X&search=Y&limit=50&offset=0
///
/// Newest first. `limit` defaults to 50 and is capped at 1000.
pub async fn list_logs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::LogListQuery>,
) -> axum::response::Response {
    let filter = LogFilter {
        status: query.status,
        provider_id: query.provider_id,
        template_id: query.template_id,
        flow_id: query.flow_id,
        is_test: query.is_test,
        channel: query.channel,
        from: query.from,
        to: query.to,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    let pagination = Pagination::new(query.limit, query.offset);

    match services.admin.query_logs(filter, pagination).await {
        Ok(result) => Json(serde_json::json!({
            "logs": result.logs,
            "total": result.total,
            "pagination": {
                "limit": result.pagination.limit,
                "offset": result.pagination.offset,
            },
            "has_more": result.has_more,
        }))
        .into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
