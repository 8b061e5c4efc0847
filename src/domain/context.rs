//! Operation Context
//!
//! Contains metadata about the current operation for tracing, plus the
//! caller-supplied deadline that bounds it.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::error::AppError;

/// Context for an operation, used for tracing and cancellation.
#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Correlation ID for request tracing
    pub correlation_id: Option<Uuid>,

    /// Username of the authenticated caller, taken from a verified token
    pub request_username: Option<String>,

    /// Point in time after which the operation is abandoned and rolled back
    pub deadline: Option<Instant>,
}

impl OperationContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Create context with the authenticated caller
    pub fn with_request_username(mut self, username: impl Into<String>) -> Self {
        self.request_username = Some(username.into());
        self
    }

    /// Abort the operation once `deadline` passes
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort the operation after `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    /// Drive `operation` to completion, or drop it when the deadline passes.
    ///
    /// Dropping the future drops any open store transaction with it, which
    /// rolls back its writes and releases its row locks.
    pub async fn run<T, F>(&self, operation: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, operation)
                .await
                .map_err(|_| AppError::DeadlineExceeded)?,
            None => operation.await,
        }
    }
}
