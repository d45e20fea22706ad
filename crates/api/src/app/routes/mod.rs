use axum::Router;

pub mod flows;
pub mod jobs;
pub mod logs;
pub mod providers;
pub mod system;
pub mod templates;

/// Router for every admin endpoint except `/health`.
pub fn router() -> Router {
    Router::new()
        .nest("/providers", providers::router())
        .nest("/flows", flows::router())
        .nest("/templates", templates::router())
        .nest("/logs", logs::router())
        .nest("/jobs", jobs::router())
}
