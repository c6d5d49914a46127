use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

/// Failures surfaced to HTTP callers as `{"status":"error","message":...}`.
#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("la cámara no está disponible")]
    DeviceUnavailable,
    #[error("{0}")]
    InvalidInput(String),
    #[error("servicio de análisis no disponible: {0}")]
    CollaboratorUnavailable(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::DeviceUnavailable | AppError::CollaboratorUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "status": "error",
            "message": self.to_string(),
        }))
    }
}
