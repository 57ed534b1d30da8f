use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::models::BookingStatus;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unit {unit_id} is unavailable: {reason}")]
    UnitUnavailable { unit_id: String, reason: String },

    #[error("booking module is disabled for business {0}")]
    ModuleDisabled(String),

    #[error("payment has not been verified for booking {0}")]
    PaymentNotVerified(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("cannot {action} a booking that is {current}")]
    InvalidTransition {
        current: BookingStatus,
        action: &'static str,
    },

    #[error("booking {0} was modified concurrently, reload and retry")]
    StaleState(String),

    #[error("review not eligible: {0}")]
    ReviewNotEligible(String),

    #[error("a review already exists for booking {0}")]
    ReviewAlreadyExists(String),

    #[error("edit window expired for review {0}")]
    EditWindowExpired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::UnitUnavailable { .. } => "unit_unavailable",
            AppError::ModuleDisabled(_) => "module_disabled",
            AppError::PaymentNotVerified(_) => "payment_not_verified",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Unauthenticated => "unauthenticated",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::StaleState(_) => "stale_state",
            AppError::ReviewNotEligible(_) => "review_not_eligible",
            AppError::ReviewAlreadyExists(_) => "review_already_exists",
            AppError::EditWindowExpired(_) => "edit_window_expired",
            AppError::NotFound(_) => "not_found",
            AppError::Database(_) => "database_error",
            AppError::Storage(_) => "storage_error",
        }
    }

    /// SQLite reports a competing writer holding the database.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            AppError::Database(rusqlite::Error::SqliteFailure(e, _))
                if matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
        )
    }

    /// Only lost races and transient storage contention are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StaleState(_)) || self.is_busy()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::UnitUnavailable { .. } => StatusCode::CONFLICT,
            AppError::ModuleDisabled(_) => StatusCode::FORBIDDEN,
            AppError::PaymentNotVerified(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,
            AppError::StaleState(_) => StatusCode::CONFLICT,
            AppError::ReviewNotEligible(_) => StatusCode::CONFLICT,
            AppError::ReviewAlreadyExists(_) => StatusCode::CONFLICT,
            AppError::EditWindowExpired(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string(), "code": self.code() });
        (status, axum::Json(body)).into_response()
    }
}
