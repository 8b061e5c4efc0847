//! User Provisioner
//!
//! Creates users with a transactional-outbox style hook: the after-create
//! hook runs inside the insert transaction, only once the insert has
//! succeeded, and before commit. A failing hook rolls the insert back.
//!
//! The broker is not part of the store transaction. If the commit fails
//! after the hook has enqueued its task, the task is already out; that
//! case is reported as [`AppError::OutboxGap`] so it can be reconciled.
//! The caller's deadline covers the insert and the hook only: once the
//! task is out, the commit is always awaited to completion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::validation::{validate_email, validate_full_name, validate_username};
use crate::domain::{OperationContext, User};
use crate::error::{AppError, AppResult};
use crate::jobs::{BrokerError, PayloadSendVerifyEmail, TaskDistributor, TaskOptions, QUEUE_CRITICAL};
use crate::store::{LedgerStore, LedgerTx};

use super::CreateUserCommand;

/// Retry budget of the verification email task
pub const VERIFY_EMAIL_MAX_RETRY: u32 = 10;

/// Delay before the verification email task becomes eligible
pub const VERIFY_EMAIL_DELAY: Duration = Duration::from_secs(10);

/// Side effect run after a user row is inserted, inside its transaction.
#[async_trait]
pub trait AfterCreateUser: Send + Sync {
    async fn after_create(&self, user: &User) -> Result<(), BrokerError>;
}

/// Enqueues `task:send_verify_email` for the new user on the critical queue.
pub struct SendVerifyEmailHook {
    distributor: Arc<dyn TaskDistributor>,
}

impl SendVerifyEmailHook {
    pub fn new(distributor: Arc<dyn TaskDistributor>) -> Self {
        Self { distributor }
    }
}

#[async_trait]
impl AfterCreateUser for SendVerifyEmailHook {
    async fn after_create(&self, user: &User) -> Result<(), BrokerError> {
        let payload = PayloadSendVerifyEmail {
            username: user.username.clone(),
        };
        let options = TaskOptions::default()
            .queue(QUEUE_CRITICAL)
            .max_retry(VERIFY_EMAIL_MAX_RETRY)
            .process_in(VERIFY_EMAIL_DELAY);

        self.distributor
            .distribute_send_verify_email(&payload, options)
            .await?;
        Ok(())
    }
}

/// Handler for user creation
pub struct UserProvisioner {
    store: Arc<dyn LedgerStore>,
    after_create: Arc<dyn AfterCreateUser>,
}

impl UserProvisioner {
    /// Provisioner whose hook dispatches the verification email task.
    pub fn new(store: Arc<dyn LedgerStore>, distributor: Arc<dyn TaskDistributor>) -> Self {
        Self::with_hook(store, Arc::new(SendVerifyEmailHook::new(distributor)))
    }

    pub fn with_hook(store: Arc<dyn LedgerStore>, after_create: Arc<dyn AfterCreateUser>) -> Self {
        Self { store, after_create }
    }

    /// Execute the create user command
    ///
    /// # Errors
    /// - `InvalidArgument` for malformed fields, before the store is touched
    /// - `AlreadyExists` when the username or email is taken; the hook is not run
    /// - `Internal` when the hook or the store fails; nothing is committed
    /// - `DeadlineExceeded` when the deadline hits before the hook finished
    /// - `OutboxGap` when the commit fails after the hook succeeded
    pub async fn create_user(
        &self,
        command: CreateUserCommand,
        context: &OperationContext,
    ) -> AppResult<User> {
        validate_username(&command.username)?;
        validate_full_name(&command.full_name)?;
        validate_email(&command.email)?;
        if command.hashed_password.is_empty() {
            return Err(AppError::InvalidArgument(
                "hashed_password must not be empty".to_string(),
            ));
        }

        let (tx, user) = context.run(self.insert_and_dispatch(command)).await?;
        let user = self.commit_dispatched(tx, user).await?;

        tracing::info!(
            correlation_id = ?context.correlation_id,
            username = %user.username,
            "User created"
        );

        Ok(user)
    }

    /// Insert the user and run the hook, leaving the transaction open.
    async fn insert_and_dispatch(
        &self,
        command: CreateUserCommand,
    ) -> AppResult<(Box<dyn LedgerTx>, User)> {
        let new_user = command.into_new_user();
        let mut tx = self.store.begin().await?;

        // A uniqueness conflict fails here, before the hook can run
        let user = tx.create_user(&new_user).await?;

        // Dropping the transaction on error rolls back the insert
        self.after_create.after_create(&user).await?;

        Ok((tx, user))
    }

    async fn commit_dispatched(&self, tx: Box<dyn LedgerTx>, user: User) -> AppResult<User> {
        match tx.commit().await {
            Ok(()) => Ok(user),
            Err(e) => {
                tracing::error!(
                    username = %user.username,
                    error = %e,
                    "User commit failed after verification task was dispatched"
                );
                Err(AppError::OutboxGap {
                    username: user.username,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_user_command_debug_hides_password() {
        let cmd = CreateUserCommand::new("alice", "secret-hash", "Alice Smith", "alice@example.com");

        let debug = format!("{cmd:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("secret-hash"));
    }

    #[test]
    fn test_verify_email_task_options() {
        assert_eq!(VERIFY_EMAIL_MAX_RETRY, 10);
        assert_eq!(VERIFY_EMAIL_DELAY, Duration::from_secs(10));
    }
}
