use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use mailroom_core::TemplateId;
use mailroom_mail::TemplateDraft;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_template).get(list_templates))
        .route("/:id", get(get_template).put(update_template).delete(delete_template))
        .route("/:id/process", post(process_template))
        .route("/:id/clone", post(clone_template))
}

pub async fn create_template(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<TemplateDraft>,
) -> axum::response::Response {
    match services.admin.create_template(body).await {
        Ok(template) => (StatusCode::CREATED, Json(template)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn list_templates(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.admin.list_templates().await {
        Ok(templates) => Json(templates).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn get_template(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TemplateId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.get_template(id).await {
        Ok(template) => Json(template).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn update_template(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<TemplateDraft>,
) -> axum::response::Response {
    let id: TemplateId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.update_template(id, body).await {
        Ok(template) => Json(template).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn delete_template(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: TemplateId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.delete_template(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// POST /templates/:id/process
///
/// Renders with the given variables and returns subject, body and the
/// placeholders left unfilled. Nothing is sent.
pub async fn process_template(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::ProcessTemplateRequest>,
) -> axum::response::Response {
    let id: TemplateId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.process_template(id, &body.variables).await {
        Ok(rendered) => Json(rendered).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn clone_template(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::CloneTemplateRequest>,
) -> axum::response::Response {
    let id: TemplateId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.clone_template(id, &body.new_name).await {
        Ok(template) => (StatusCode::CREATED, Json(template)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
