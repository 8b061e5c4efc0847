//! Verification email task handler

use std::sync::Arc;

use async_trait::async_trait;

use super::distributor::PayloadSendVerifyEmail;
use super::processor::{TaskError, TaskHandler};
use super::types::TaskMessage;
use crate::store::LedgerStore;

/// Handles `task:send_verify_email`.
///
/// Delivery itself is out of scope here: the handler resolves the user and
/// logs the send. A user that is not visible yet is retried, since the
/// task can be claimed before the creating transaction is readable.
pub struct SendVerifyEmailHandler {
    store: Arc<dyn LedgerStore>,
}

impl SendVerifyEmailHandler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TaskHandler for SendVerifyEmailHandler {
    async fn process_task(&self, task: &TaskMessage) -> Result<(), TaskError> {
        let payload: PayloadSendVerifyEmail = task
            .decode_payload()
            .map_err(|e| TaskError::SkipRetry(format!("failed to decode payload: {e}")))?;

        let user = self
            .store
            .get_user(&payload.username)
            .await
            .map_err(|e| TaskError::Retry(format!("failed to get user: {e}")))?
            .ok_or_else(|| TaskError::Retry(format!("user {} does not exist", payload.username)))?;

        if user.is_email_verified {
            tracing::debug!(username = %user.username, "Email already verified, skipping");
            return Ok(());
        }

        tracing::info!(
            task_id = %task.id,
            username = %user.username,
            email = %user.email,
            "Sent verification email"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewUser;
    use crate::jobs::types::NewTask;
    use crate::jobs::TASK_SEND_VERIFY_EMAIL;
    use crate::store::MemoryLedgerStore;
    use serde_json::json;

    fn task(payload: serde_json::Value) -> TaskMessage {
        TaskMessage::from_new(NewTask::new(TASK_SEND_VERIFY_EMAIL, payload))
    }

    async fn store_with_user(username: &str) -> MemoryLedgerStore {
        let store = MemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.create_user(&NewUser {
            username: username.to_string(),
            hashed_password: "hash".to_string(),
            full_name: "Alice Smith".to_string(),
            email: format!("{username}@example.com"),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_existing_user_succeeds() {
        let store = store_with_user("alice").await;
        let handler = SendVerifyEmailHandler::new(Arc::new(store));

        let result = handler.process_task(&task(json!({"username": "alice"}))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_verified_user_is_skipped() {
        let store = store_with_user("alice").await;
        store.verify_email("alice").await.unwrap();
        let handler = SendVerifyEmailHandler::new(Arc::new(store));

        let result = handler.process_task(&task(json!({"username": "alice"}))).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_missing_user_is_retried() {
        let handler = SendVerifyEmailHandler::new(MemoryLedgerStore::arc());

        let result = handler.process_task(&task(json!({"username": "ghost"}))).await;
        assert!(matches!(result, Err(TaskError::Retry(_))));
    }

    #[tokio::test]
    async fn test_bad_payload_skips_retry() {
        let handler = SendVerifyEmailHandler::new(MemoryLedgerStore::arc());

        let result = handler.process_task(&task(json!({"name": 42}))).await;
        assert!(matches!(result, Err(TaskError::SkipRetry(_))));
    }
}
