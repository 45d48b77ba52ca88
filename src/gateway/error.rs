use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unauthorized")]
    Unauthorized,
    /// Operation failure whose cause is reported back as `details`.
    #[error("{error}: {details}")]
    Failed { error: String, details: String },
}

impl AppError {
    pub fn failed(error: impl Into<String>, cause: &anyhow::Error) -> Self {
        Self::Failed {
            error: error.into(),
            details: format!("{cause:#}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": msg }),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, serde_json::json!({ "error": msg })),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                serde_json::json!({ "error": "unauthorized" }),
            ),
            AppError::Failed { error, details } => {
                tracing::error!("{error}: {details}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": error, "details": details }),
                )
            }
        };
        (status, axum::Json(body)).into_response()
    }
}
