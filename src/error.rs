//! Error handling module
//!
//! Centralized error type for every operation the core exposes, its mapping
//! onto the error taxonomy, and HTTP response conversion for the API layer.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::{AmountError, Currency, ValidationError};
use crate::jobs::BrokerError;
use crate::store::StoreError;
use crate::token::TokenError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Taxonomy kind of an [`AppError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidArgument,
    CurrencyMismatch,
    InsufficientBalance,
    Unauthenticated,
    DeadlineExceeded,
    Internal,
}

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Account {account_id} currency mismatch: {found} vs {expected}")]
    CurrencyMismatch {
        account_id: i64,
        expected: Currency,
        found: Currency,
    },

    #[error("Insufficient balance on account {account_id}: required {required}, available {available}")]
    InsufficientBalance {
        account_id: i64,
        required: i64,
        available: i64,
    },

    /// Only `InvalidToken` or `ExpiredToken`; see `From<TokenError>`
    #[error(transparent)]
    Unauthenticated(TokenError),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The verification task was handed to the broker but the user row did
    /// not commit. Operators reconcile these from the error log.
    #[error("User {username} was not committed after its verification task was dispatched")]
    OutboxGap { username: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            AppError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            AppError::CurrencyMismatch { .. } => ErrorKind::CurrencyMismatch,
            AppError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            AppError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            AppError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            AppError::OutboxGap { .. } | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound
                | ErrorKind::AlreadyExists
                | ErrorKind::InvalidArgument
                | ErrorKind::CurrencyMismatch
                | ErrorKind::InsufficientBalance
                | ErrorKind::Unauthenticated
        )
    }
}

impl From<AmountError> for AppError {
    fn from(err: AmountError) -> Self {
        AppError::InvalidArgument(err.to_string())
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::InvalidArgument(err.to_string())
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidToken | TokenError::ExpiredToken => AppError::Unauthenticated(err),
            // Key and sealing failures are the server's, not the caller's
            other => {
                tracing::error!(error = %other, "Token authority failure");
                AppError::Internal("token authority failure".to_string())
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation(constraint) => {
                AppError::AlreadyExists(constraint_subject(&constraint).to_string())
            }
            other => {
                tracing::error!(error = %other, "Ledger store failure");
                AppError::Internal("ledger store failure".to_string())
            }
        }
    }
}

impl From<BrokerError> for AppError {
    fn from(err: BrokerError) -> Self {
        tracing::error!(error = %err, "Task broker failure");
        AppError::Internal("task broker failure".to_string())
    }
}

/// Turn a unique constraint name into the field it protects.
fn constraint_subject(constraint: &str) -> &str {
    if constraint.contains("email") {
        "email"
    } else if constraint.contains("username") || constraint.contains("pkey") {
        "username"
    } else {
        "record"
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, "not_found", Some(what.clone())),
            AppError::AlreadyExists(what) => {
                (StatusCode::CONFLICT, "already_exists", Some(what.clone()))
            }
            AppError::InvalidArgument(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_argument", Some(msg.clone()))
            }
            AppError::CurrencyMismatch { .. } => {
                (StatusCode::BAD_REQUEST, "currency_mismatch", Some(self.to_string()))
            }
            AppError::InsufficientBalance { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_balance",
                Some(self.to_string()),
            ),
            AppError::Unauthenticated(TokenError::ExpiredToken) => {
                (StatusCode::UNAUTHORIZED, "expired_token", None)
            }
            AppError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "invalid_token", None),
            AppError::DeadlineExceeded => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded", None),
            AppError::OutboxGap { username } => {
                tracing::error!(username = %username, "Outbox gap surfaced to caller");
                (StatusCode::INTERNAL_SERVER_ERROR, "outbox_gap", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}
