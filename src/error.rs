use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::ports::RepositoryError;
use crate::services::EngineError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::DatabaseError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        let message = e.to_string();
        match e {
            EngineError::Validation(_)
            | EngineError::BelowMinimum { .. }
            | EngineError::InvalidAddress(_) => AppError::Validation(message),
            EngineError::InsufficientFunds { .. } => AppError::Unprocessable(message),
            EngineError::ProcessorUnavailable(_) => AppError::ServiceUnavailable(message),
            EngineError::AuthenticityFailure => AppError::Unauthorized(message),
            EngineError::AlreadyDecided(_) | EngineError::AlreadyTerminal(_) => {
                AppError::Conflict(message)
            }
            EngineError::AccountNotFound(_)
            | EngineError::DepositNotFound(_)
            | EngineError::WithdrawalNotFound(_) => AppError::NotFound(message),
            EngineError::Repository(RepositoryError::NotFound(_)) => AppError::NotFound(message),
            EngineError::Repository(RepositoryError::Conflict(_)) => AppError::Conflict(message),
            EngineError::Repository(_) => AppError::DatabaseError(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
