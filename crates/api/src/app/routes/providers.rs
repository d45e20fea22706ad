use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use mailroom_core::ProviderId;
use mailroom_mail::ProviderSettings;

use crate::app::{dto, errors, services::AppServices};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_provider).get(list_providers))
        .route("/test", post(test_provider_settings))
        .route("/:id", get(get_provider).put(update_provider).delete(delete_provider))
        .route("/:id/test", post(test_provider))
}

pub async fn create_provider(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<ProviderSettings>,
) -> axum::response::Response {
    match services.admin.create_provider(body).await {
        Ok(provider) => (StatusCode::CREATED, Json(provider)).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn list_providers(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.admin.list_providers().await {
        Ok(providers) => Json(providers).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn get_provider(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ProviderId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.get_provider(id).await {
        Ok(provider) => Json(provider).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// PUT /providers/:id
///
/// Replaces the provider's settings. Secrets are never echoed back, so a
/// client updating a provider must resend them.
pub async fn update_provider(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<ProviderSettings>,
) -> axum::response::Response {
    let id: ProviderId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.update_provider(id, body).await {
        Ok(provider) => Json(provider).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

pub async fn delete_provider(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: ProviderId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.admin.delete_provider(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// POST /providers/:id/test
///
/// The probe outcome is always a 200; `success: false` carries the reason.
pub async fn test_provider(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Option<Json<dto::TestConnectionRequest>>,
) -> axum::response::Response {
    let id: ProviderId = match errors::parse_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(body) = body.unwrap_or_default();
    match services.admin.test_provider(id, body.test_email.as_deref()).await {
        Ok(result) => Json(result).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}

/// POST /providers/test
pub async fn test_provider_settings(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::TestSettingsRequest>,
) -> axum::response::Response {
    match services
        .admin
        .test_provider_settings(&body.settings, body.test_email.as_deref())
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => errors::pipeline_error_to_response(e),
    }
}
