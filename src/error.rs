use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use thiserror::Error;

/// A single `{path, message}` validation failure, collected rather than
/// short-circuited by the schema engine. `conflict` marks failures that
/// §7 classifies as Conflict (409) rather than InvalidInput (400) — today
/// only immutability violations — so the caller can pick the right status
/// without losing the per-path detail the schema engine collected.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub path: String,
    pub message: String,
    #[serde(skip)]
    pub conflict: bool,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            conflict: false,
        }
    }

    pub fn conflict(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            conflict: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("invalid input")]
    InvalidInput(Vec<FieldError>),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid(path: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::InvalidInput(vec![FieldError::new(path, message)])
    }

    /// Classifies a schema engine error batch: if any collected failure is
    /// marked `conflict` (an immutability violation), the whole batch
    /// surfaces as 409 Conflict per §7/E3, otherwise as 400 InvalidInput.
    pub fn from_field_errors(errors: Vec<FieldError>) -> Self {
        if errors.iter().any(|e| e.conflict) {
            let detail = errors
                .iter()
                .map(|e| if e.path.is_empty() { e.message.clone() } else { format!("{}: {}", e.path, e.message) })
                .collect::<Vec<_>>()
                .join("; ");
            AppError::Conflict(detail)
        } else {
            AppError::InvalidInput(errors)
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<FieldError>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, fields) = match &self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string(), vec![]),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".to_string(),
                vec![],
            ),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".to_string(), vec![]),
            AppError::InvalidInput(fields) => (
                StatusCode::BAD_REQUEST,
                "invalid input".to_string(),
                fields.clone(),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone(), vec![]),
            AppError::Db(_) | AppError::Internal(_) => {
                tracing::error!(error = %self, "internal failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                    vec![],
                )
            }
        };
        if !matches!(self, AppError::Db(_) | AppError::Internal(_)) {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(ErrorBody { error: message, fields })).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
