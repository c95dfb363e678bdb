//! Error types for the Bibliotheque server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable error codes carried in every error body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchData = 4,
    BookUnavailable = 5,
    AlreadyBorrowed = 6,
    AlreadyReturned = 7,
    NotOverdue = 8,
    BadValue = 9,
    StorageTimeout = 10,
    NotificationFailure = 11,
    Conflict = 12,
}

/// Loan lifecycle rule violations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanError {
    /// Missing book or book already out: indistinguishable for the caller
    #[error("This book is not available for borrowing")]
    BookUnavailable,

    #[error("You have already borrowed this book")]
    AlreadyBorrowed,

    /// Missing, already returned, or owned by someone else
    #[error("Loan not found or already returned")]
    LoanNotFound,

    #[error("Loan already returned")]
    AlreadyReturned,

    #[error("Reminders can only be sent for overdue loans")]
    NotOverdue,
}

impl LoanError {
    fn code(&self) -> ErrorCode {
        match self {
            LoanError::BookUnavailable => ErrorCode::BookUnavailable,
            LoanError::AlreadyBorrowed => ErrorCode::AlreadyBorrowed,
            LoanError::LoanNotFound => ErrorCode::NoSuchData,
            LoanError::AlreadyReturned => ErrorCode::AlreadyReturned,
            LoanError::NotOverdue => ErrorCode::NotOverdue,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            LoanError::LoanNotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Loan(#[from] LoanError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for failures worth retrying later (timeouts, dropped connections)
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Storage(_) => true,
            AppError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, ErrorCode::NoSuchData, msg.clone())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Conflict(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::Conflict, msg.clone())
            }
            AppError::Loan(e) => (e.status(), e.code(), e.to_string()),
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Storage(msg) => {
                tracing::error!("Storage error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::StorageTimeout,
                    "Storage temporarily unavailable".to_string(),
                )
            }
            AppError::Notification(msg) => {
                tracing::error!("Notification error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::NotificationFailure,
                    "Failed to send the reminder email".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loan_errors_map_to_contract_statuses() {
        let cases = [
            (LoanError::BookUnavailable, StatusCode::BAD_REQUEST),
            (LoanError::AlreadyBorrowed, StatusCode::BAD_REQUEST),
            (LoanError::AlreadyReturned, StatusCode::BAD_REQUEST),
            (LoanError::NotOverdue, StatusCode::BAD_REQUEST),
            (LoanError::LoanNotFound, StatusCode::NOT_FOUND),
        ];
        for (error, status) in cases {
            let response = AppError::from(error).into_response();
            assert_eq!(response.status(), status, "{:?}", error);
        }
    }

    #[test]
    fn test_auth_errors_split_401_and_403() {
        let unauthenticated = AppError::Authentication("missing".into()).into_response();
        let forbidden = AppError::Authorization("admin only".into()).into_response();
        assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_storage_errors_are_transient() {
        assert!(AppError::Storage("timed out".into()).is_transient());
        assert!(AppError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!AppError::NotFound("book".into()).is_transient());
        assert_eq!(
            AppError::Storage("timed out".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
