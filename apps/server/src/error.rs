use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use openconv_shared::error::OpenConvError;

/// Newtype wrapper for `OpenConvError` that implements `IntoResponse`.
///
/// Needed because of the orphan rule â€” neither the trait (`IntoResponse`)
/// nor the type (`OpenConvError`) is defined in this crate.
#[derive(Debug)]
pub struct ServerError(pub OpenConvError);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            OpenConvError::NotFound => (StatusCode::NOT_FOUND, self.0.to_string()),
            OpenConvError::Unauthorized => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            OpenConvError::Forbidden => (StatusCode::FORBIDDEN, self.0.to_string()),
            OpenConvError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            OpenConvError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            OpenConvError::Crypto(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            OpenConvError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            OpenConvError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.0.to_string()),
            OpenConvError::SessionCompromised => (StatusCode::UNAUTHORIZED, self.0.to_string()),
            OpenConvError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<OpenConvError> for ServerError {
    fn from(e: OpenConvError) -> Self {
        ServerError(e)
    }
}
