use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;
use supervisor::SupervisorError;

#[derive(Serialize)]
pub struct ApiError {
    pub error: String,
}

/// Not-found class → 404, everything else → 500.
pub struct ControllerError(pub SupervisorError);

impl From<SupervisorError> for ControllerError {
    fn from(e: SupervisorError) -> Self {
        ControllerError(e)
    }
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let status = if self.0.is_not_found() {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self.0);
        }
        (status, Json(ApiError { error: self.0.to_string() })).into_response()
    }
}
