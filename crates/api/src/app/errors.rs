use core::str::FromStr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use mailroom_core::DomainError;
use mailroom_infra::PipelineError;

/// HTTP status for each stable error code.
fn status_for(code: &str) -> StatusCode {
    match code {
        "validation_error" | "invalid_id" => StatusCode::BAD_REQUEST,
        "conflict" => StatusCode::CONFLICT,
        "not_found" => StatusCode::NOT_FOUND,
        "provider_unavailable" => StatusCode::UNPROCESSABLE_ENTITY,
        "no_active_provider" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn pipeline_error_to_response(err: PipelineError) -> axum::response::Response {
    let code = err.code();
    if code == "store_error" {
        tracing::error!(error = %err, "store failure while handling request");
    }
    json_error(status_for(code), code, err.to_string())
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    pipeline_error_to_response(PipelineError::Domain(err))
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Parse a path id (`ProviderId`, `JobId`, ...) or produce a 400 response.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(domain_error_to_response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailroom_core::ProviderId;
    use mailroom_infra::StoreError;

    #[test]
    fn codes_map_to_statuses() {
        let cases = [
            (PipelineError::from(DomainError::validation("bad")), StatusCode::BAD_REQUEST),
            (PipelineError::from(DomainError::conflict("taken")), StatusCode::CONFLICT),
            (PipelineError::from(DomainError::not_found("gone")), StatusCode::NOT_FOUND),
            (
                PipelineError::from(DomainError::provider_unavailable("capped")),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (PipelineError::from(DomainError::NoActiveProvider), StatusCode::SERVICE_UNAVAILABLE),
            (
                PipelineError::from(StoreError::Storage("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(pipeline_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn bad_ids_are_bad_requests() {
        let response = parse_id::<ProviderId>("not-a-uuid").unwrap_err();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(parse_id::<ProviderId>(&ProviderId::new().to_string()).is_ok());
    }
}
