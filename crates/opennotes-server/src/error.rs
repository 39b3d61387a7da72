//! Domain error → HTTP translation.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use opennotes_domain::Error;

use crate::jsonapi::ErrorDocument;

/// Wrapper so handlers can `?` domain errors straight into responses.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self(error)
    }
}

fn classify(error: &Error) -> (StatusCode, &'static str) {
    match error {
        Error::NotFound { .. } => (StatusCode::NOT_FOUND, "Not Found"),
        Error::Forbidden { .. } => (StatusCode::FORBIDDEN, "Forbidden"),
        Error::Conflict { .. } | Error::ActiveJobExists { .. } => {
            (StatusCode::CONFLICT, "Conflict")
        }
        Error::Validation { .. } | Error::ConfigInvalid { .. } => {
            (StatusCode::BAD_REQUEST, "Validation Error")
        }
        Error::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "Rate Limited"),
        Error::CircuitOpen { .. } | Error::Upstream { .. } | Error::ProviderRateLimited { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
        }
        Error::Crypto { .. } => (StatusCode::UNAUTHORIZED, "Unauthorized"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, title) = classify(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Incident-log the details; the client only sees the class.
            error!(error = %self.0, "Unhandled internal error");
        }
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "An internal error occurred".to_owned()
        } else {
            self.0.to_string()
        };
        let mut response =
            (status, Json(ErrorDocument::single(status.as_u16(), title, detail))).into_response();
        if let Error::RateLimited { retry_after } = &self.0 {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

/// Handler result alias.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn taxonomy_maps_to_expected_statuses() {
        assert_eq!(classify(&Error::not_found("x")).0, StatusCode::NOT_FOUND);
        assert_eq!(classify(&Error::forbidden("x")).0, StatusCode::FORBIDDEN);
        assert_eq!(classify(&Error::conflict("x")).0, StatusCode::CONFLICT);
        assert_eq!(
            classify(&Error::ActiveJobExists { job_id: Uuid::now_v7() }).0,
            StatusCode::CONFLICT
        );
        assert_eq!(classify(&Error::validation("x")).0, StatusCode::BAD_REQUEST);
        assert_eq!(
            classify(&Error::RateLimited { retry_after: 3 }).0,
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            classify(&Error::CircuitOpen {
                name: "llm".to_owned(),
                failures: 5,
                retry_in_secs: 10
            })
            .0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            classify(&Error::internal("boom")).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
