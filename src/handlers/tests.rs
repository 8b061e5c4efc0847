//! Handler tests against the in-memory ledger store

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::domain::{Currency, OperationContext};
    use crate::error::{AppError, ErrorKind};
    use crate::domain::{Account, Entry, NewUser, Transfer, User};
    use crate::handlers::{
        AfterCreateUser, CreateUserCommand, TransferCommand, TransferExecutor, UserProvisioner,
        VERIFY_EMAIL_MAX_RETRY,
    };
    use crate::jobs::{BrokerError, NewTask, TaskDistributor, TaskInfo, TaskMessage, TASK_SEND_VERIFY_EMAIL};
    use crate::store::{LedgerStore, LedgerTx, MemoryLedgerStore, NewAccount, StoreError};

    /// Distributor that records every task it is handed
    #[derive(Default)]
    struct RecordingDistributor {
        tasks: Mutex<Vec<NewTask>>,
        fail: AtomicBool,
    }

    impl RecordingDistributor {
        fn failing() -> Self {
            let distributor = Self::default();
            distributor.fail.store(true, Ordering::SeqCst);
            distributor
        }

        fn calls(&self) -> usize {
            self.tasks.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TaskDistributor for RecordingDistributor {
        async fn enqueue(&self, task: NewTask) -> Result<TaskInfo, BrokerError> {
            let message = TaskMessage::from_new(task.clone());
            self.tasks.lock().unwrap().push(task);
            if self.fail.load(Ordering::SeqCst) {
                return Err(BrokerError::Unavailable("connection refused".to_string()));
            }
            Ok(message.info())
        }
    }

    async fn open(store: &MemoryLedgerStore, owner: &str, currency: Currency, balance: i64) -> i64 {
        store
            .create_account(&NewAccount::new(owner, currency).with_balance(balance))
            .await
            .unwrap()
            .id
    }

    fn alice() -> CreateUserCommand {
        CreateUserCommand::new("alice", "hashed", "Alice Smith", "alice@example.com")
    }

    // =========================================================================
    // Transfer tests
    // =========================================================================

    #[tokio::test]
    async fn test_transfer_moves_funds() {
        let store = MemoryLedgerStore::new();
        let from = open(&store, "alice", Currency::USD, 100).await;
        let to = open(&store, "bob", Currency::USD, 0).await;
        let executor = TransferExecutor::new(Arc::new(store.clone()));

        let result = executor
            .execute(TransferCommand::new(from, to, 40, Currency::USD), &OperationContext::new())
            .await
            .unwrap();

        assert_eq!(result.transfer.amount, 40);
        assert_eq!(result.from_entry.amount, -40);
        assert_eq!(result.to_entry.amount, 40);
        assert_eq!(result.from_account.balance, 60);
        assert_eq!(result.to_account.balance, 40);

        assert_eq!(store.get_account(from).await.unwrap().unwrap().balance, 60);
        assert_eq!(store.get_account(to).await.unwrap().unwrap().balance, 40);
    }

    #[tokio::test]
    async fn test_transfer_from_higher_id() {
        let store = MemoryLedgerStore::new();
        let low = open(&store, "alice", Currency::EUR, 0).await;
        let high = open(&store, "bob", Currency::EUR, 50).await;
        let executor = TransferExecutor::new(Arc::new(store.clone()));

        let result = executor
            .execute(TransferCommand::new(high, low, 50, Currency::EUR), &OperationContext::new())
            .await
            .unwrap();

        assert_eq!(result.from_account.id, high);
        assert_eq!(result.from_account.balance, 0);
        assert_eq!(result.to_account.id, low);
        assert_eq!(result.to_account.balance, 50);
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let store = MemoryLedgerStore::new();
        let from = open(&store, "alice", Currency::USD, 5).await;
        let to = open(&store, "bob", Currency::USD, 0).await;
        let executor = TransferExecutor::new(Arc::new(store.clone()));
        let entries_before = store.entry_count().await;

        let result = executor
            .execute(TransferCommand::new(from, to, 10, Currency::USD), &OperationContext::new())
            .await;

        match result {
            Err(AppError::InsufficientBalance {
                account_id,
                required,
                available,
            }) => {
                assert_eq!(account_id, from);
                assert_eq!(required, 10);
                assert_eq!(available, 5);
            }
            other => panic!("Expected InsufficientBalance, got: {:?}", other),
        }
        assert_eq!(store.transfer_count().await, 0);
        assert_eq!(store.entry_count().await, entries_before);
    }

    #[tokio::test]
    async fn test_exact_balance_transfer() {
        let store = MemoryLedgerStore::new();
        let from = open(&store, "alice", Currency::USD, 100).await;
        let to = open(&store, "bob", Currency::USD, 0).await;
        let executor = TransferExecutor::new(Arc::new(store.clone()));

        let result = executor
            .execute(TransferCommand::new(from, to, 100, Currency::USD), &OperationContext::new())
            .await
            .unwrap();

        assert_eq!(result.from_account.balance, 0);
    }

    #[tokio::test]
    async fn test_same_account_rejected() {
        let store = MemoryLedgerStore::new();
        let id = open(&store, "alice", Currency::USD, 100).await;
        let executor = TransferExecutor::new(Arc::new(store.clone()));

        let err = executor
            .execute(TransferCommand::new(id, id, 10, Currency::USD), &OperationContext::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let store = MemoryLedgerStore::new();
        let from = open(&store, "alice", Currency::USD, 100).await;
        let to = open(&store, "bob", Currency::USD, 0).await;
        let executor = TransferExecutor::new(Arc::new(store.clone()));

        for amount in [0, -10] {
            let err = executor
                .execute(TransferCommand::new(from, to, amount, Currency::USD), &OperationContext::new())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        assert_eq!(store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_account() {
        let store = MemoryLedgerStore::new();
        let from = open(&store, "alice", Currency::USD, 100).await;
        let executor = TransferExecutor::new(Arc::new(store.clone()));

        let err = executor
            .execute(TransferCommand::new(from, 999, 10, Currency::USD), &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(ref what) if what == "account 999"));

        let err = executor
            .execute(TransferCommand::new(998, from, 10, Currency::USD), &OperationContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(store.get_account(from).await.unwrap().unwrap().balance, 100);
    }

    #[tokio::test]
    async fn test_currency_mismatch() {
        let store = MemoryLedgerStore::new();
        let from = open(&store, "alice", Currency::USD, 100).await;
        let to = open(&store, "bob", Currency::EUR, 0).await;
        let executor = TransferExecutor::new(Arc::new(store.clone()));

        let err = executor
            .execute(TransferCommand::new(from, to, 10, Currency::USD), &OperationContext::new())
            .await
            .unwrap_err();
        match err {
            AppError::CurrencyMismatch {
                account_id,
                expected,
                found,
            } => {
                assert_eq!(account_id, to);
                assert_eq!(expected, Currency::USD);
                assert_eq!(found, Currency::EUR);
            }
            other => panic!("Expected CurrencyMismatch, got: {:?}", other),
        }

        // Requested currency must match the source too
        let err = executor
            .execute(TransferCommand::new(from, to, 10, Currency::EUR), &OperationContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CurrencyMismatch { account_id, .. } if account_id == from));
        assert_eq!(store.transfer_count().await, 0);
    }

    #[tokio::test]
    async fn test_deadline_rolls_back_blocked_transfer() {
        let store = MemoryLedgerStore::new();
        let from = open(&store, "alice", Currency::USD, 100).await;
        let to = open(&store, "bob", Currency::USD, 0).await;
        let executor = TransferExecutor::new(Arc::new(store.clone()));

        // Another transaction holds the destination row
        let mut blocker = store.begin().await.unwrap();
        blocker.lock_account(to).await.unwrap();

        let context = OperationContext::new().with_timeout(Duration::from_millis(50));
        let err = executor
            .execute(TransferCommand::new(from, to, 10, Currency::USD), &context)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        drop(blocker);

        // Source lock was released by the rollback
        let result = executor
            .execute(TransferCommand::new(from, to, 10, Currency::USD), &OperationContext::new())
            .await
            .unwrap();
        assert_eq!(result.from_account.balance, 90);
        assert_eq!(store.transfer_count().await, 1);
    }

    // =========================================================================
    // User provisioning tests
    // =========================================================================

    #[tokio::test]
    async fn test_create_user_dispatches_verify_email() {
        let store = MemoryLedgerStore::new();
        let distributor = Arc::new(RecordingDistributor::default());
        let provisioner = UserProvisioner::new(Arc::new(store.clone()), distributor.clone());

        let user = provisioner
            .create_user(alice(), &OperationContext::new())
            .await
            .unwrap();

        assert_eq!(user.username, "alice");
        assert!(!user.is_email_verified);
        assert!(store.get_user("alice").await.unwrap().is_some());

        let tasks = distributor.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].task_type, TASK_SEND_VERIFY_EMAIL);
        assert_eq!(tasks[0].payload, serde_json::json!({"username": "alice"}));
        assert_eq!(tasks[0].options.queue, "critical");
        assert_eq!(tasks[0].options.max_retry, VERIFY_EMAIL_MAX_RETRY);
        assert!(tasks[0].options.process_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_username_skips_hook() {
        let store = MemoryLedgerStore::new();
        let distributor = Arc::new(RecordingDistributor::default());
        let provisioner = UserProvisioner::new(Arc::new(store.clone()), distributor.clone());
        provisioner
            .create_user(alice(), &OperationContext::new())
            .await
            .unwrap();

        let duplicate = CreateUserCommand::new("alice", "hashed", "Other Alice", "other@example.com");
        let err = provisioner
            .create_user(duplicate, &OperationContext::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::AlreadyExists(ref what) if what == "username"));
        assert_eq!(distributor.calls(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_email_skips_hook() {
        let store = MemoryLedgerStore::new();
        let distributor = Arc::new(RecordingDistributor::default());
        let provisioner = UserProvisioner::new(Arc::new(store.clone()), distributor.clone());
        provisioner
            .create_user(alice(), &OperationContext::new())
            .await
            .unwrap();

        let duplicate = CreateUserCommand::new("alice_two", "hashed", "Alice Two", "alice@example.com");
        let err = provisioner
            .create_user(duplicate, &OperationContext::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::AlreadyExists(ref what) if what == "email"));
        assert_eq!(distributor.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_fields_touch_nothing() {
        let store = MemoryLedgerStore::new();
        let distributor = Arc::new(RecordingDistributor::default());
        let provisioner = UserProvisioner::new(Arc::new(store.clone()), distributor.clone());

        let commands = [
            CreateUserCommand::new("Alice!", "hashed", "Alice Smith", "alice@example.com"),
            CreateUserCommand::new("alice", "hashed", "Al1ce", "alice@example.com"),
            CreateUserCommand::new("alice", "hashed", "Alice Smith", "not-an-email"),
            CreateUserCommand::new("alice", "", "Alice Smith", "alice@example.com"),
        ];
        for command in commands {
            let err = provisioner
                .create_user(command, &OperationContext::new())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }

        assert_eq!(distributor.calls(), 0);
        assert!(store.get_user("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_hook_failure_rolls_back_user() {
        let store = MemoryLedgerStore::new();
        let distributor = Arc::new(RecordingDistributor::failing());
        let provisioner = UserProvisioner::new(Arc::new(store.clone()), distributor.clone());

        let err = provisioner
            .create_user(alice(), &OperationContext::new())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.to_string().contains("connection refused"));
        assert!(store.get_user("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_failure_after_dispatch_is_outbox_gap() {
        let store = MemoryLedgerStore::new();
        let distributor = Arc::new(RecordingDistributor::default());
        let provisioner = UserProvisioner::new(Arc::new(store.clone()), distributor.clone());
        store.fail_commits(true);

        let err = provisioner
            .create_user(alice(), &OperationContext::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::OutboxGap { ref username } if username == "alice"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(distributor.calls(), 1);
        assert!(store.get_user("alice").await.unwrap().is_none());
    }

    /// Memory store whose commits take `delay` to land
    struct SlowCommitStore {
        inner: MemoryLedgerStore,
        delay: Duration,
    }

    struct SlowCommitTx {
        inner: Box<dyn LedgerTx>,
        delay: Duration,
    }

    #[async_trait]
    impl LedgerStore for SlowCommitStore {
        async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
            Ok(Box::new(SlowCommitTx {
                inner: self.inner.begin().await?,
                delay: self.delay,
            }))
        }

        async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
            self.inner.create_account(account).await
        }

        async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError> {
            self.inner.get_account(id).await
        }

        async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError> {
            self.inner.list_entries(account_id).await
        }

        async fn list_transfers(&self, account_id: i64) -> Result<Vec<Transfer>, StoreError> {
            self.inner.list_transfers(account_id).await
        }

        async fn get_user(&self, username: &str) -> Result<Option<User>, StoreError> {
            self.inner.get_user(username).await
        }
    }

    #[async_trait]
    impl LedgerTx for SlowCommitTx {
        async fn lock_account(&mut self, id: i64) -> Result<Option<Account>, StoreError> {
            self.inner.lock_account(id).await
        }

        async fn create_transfer(
            &mut self,
            from_account_id: i64,
            to_account_id: i64,
            amount: i64,
        ) -> Result<Transfer, StoreError> {
            self.inner.create_transfer(from_account_id, to_account_id, amount).await
        }

        async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, StoreError> {
            self.inner.create_entry(account_id, amount).await
        }

        async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, StoreError> {
            self.inner.add_account_balance(id, delta).await
        }

        async fn create_user(&mut self, user: &NewUser) -> Result<User, StoreError> {
            self.inner.create_user(user).await
        }

        async fn commit(self: Box<Self>) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.commit().await
        }
    }

    /// Hook that takes `delay` before reporting success
    struct SlowHook {
        delay: Duration,
    }

    #[async_trait]
    impl AfterCreateUser for SlowHook {
        async fn after_create(&self, _user: &User) -> Result<(), BrokerError> {
            tokio::time::sleep(self.delay).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_deadline_does_not_abandon_commit_after_dispatch() {
        let memory = MemoryLedgerStore::new();
        let store = Arc::new(SlowCommitStore {
            inner: memory.clone(),
            delay: Duration::from_millis(200),
        });
        let distributor = Arc::new(RecordingDistributor::default());
        let provisioner = UserProvisioner::new(store, distributor.clone());

        let context = OperationContext::new().with_timeout(Duration::from_millis(50));
        let user = provisioner.create_user(alice(), &context).await.unwrap();

        // The dispatched task has a committed user behind it
        assert_eq!(distributor.calls(), 1);
        assert_eq!(memory.get_user("alice").await.unwrap(), Some(user));
    }

    #[tokio::test]
    async fn test_deadline_before_dispatch_rolls_back() {
        let store = MemoryLedgerStore::new();
        let provisioner = UserProvisioner::with_hook(
            Arc::new(store.clone()),
            Arc::new(SlowHook {
                delay: Duration::from_millis(500),
            }),
        );

        let context = OperationContext::new().with_timeout(Duration::from_millis(50));
        let err = provisioner.create_user(alice(), &context).await.unwrap_err();

        assert!(matches!(err, AppError::DeadlineExceeded));
        assert!(store.get_user("alice").await.unwrap().is_none());

        // The abandoned insert released its keys
        let fast = UserProvisioner::new(
            Arc::new(store.clone()),
            Arc::new(RecordingDistributor::default()),
        );
        fast.create_user(alice(), &OperationContext::new()).await.unwrap();
    }
}
