use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use mailroom_core::FlowId;
use mailroom_mail::FlowDraft;

use crate::app::{errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_flow).get(list_flows))
        .route("/:id", get(get_flow).delete(delete_flow))
}

pub async fn create_flow(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<FlowDraft>,
) -> axum::response::Response {
    match services.admin.create_flow(body).await {
        Ok(flow) => (StatusCode::CREATED, Json(flow)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn list_flows(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.admin.list_flows().await {
        Ok(flows) => Json(flows).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn get_flow(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: FlowId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.get_flow(id).await {
        Ok(flow) => Json(flow).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn delete_flow(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: FlowId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.delete_flow(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
