//! Common test utilities
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use ledger_core::jobs::{
    BrokerError, NewTask, ProcessorConfig, RetryPolicy, TaskDistributor, TaskInfo, TaskMessage,
};
use ledger_core::store::NewAccount;
use ledger_core::{Account, Currency, LedgerStore};

/// Connect to the test database and clear all ledger and task rows
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    sqlx::query("TRUNCATE TABLE entries, transfers, accounts, users, tasks RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .expect("Failed to clean up DB");

    pool
}

/// Open an account with an opening balance
pub async fn open_account(
    store: &dyn LedgerStore,
    owner: &str,
    currency: Currency,
    balance: i64,
) -> Account {
    store
        .create_account(&NewAccount::new(owner, currency).with_balance(balance))
        .await
        .expect("Failed to open account")
}

/// Assert that the balance equals the sum of the account's entries
pub async fn assert_balance_matches_entries(store: &dyn LedgerStore, account_id: i64) {
    let account = store
        .get_account(account_id)
        .await
        .unwrap()
        .expect("account should exist");
    let entries = store.list_entries(account_id).await.unwrap();
    let sum: i64 = entries.iter().map(|e| e.amount).sum();

    assert_eq!(
        account.balance, sum,
        "account {account_id}: balance {} != sum of {} entries",
        account.balance,
        entries.len()
    );
    assert!(account.balance >= 0);
}

/// Processor settings tuned for fast tests
pub fn fast_processor_config() -> ProcessorConfig {
    ProcessorConfig {
        concurrency: 2,
        poll_interval: Duration::from_millis(10),
        lease: Duration::from_secs(30),
        recovery_interval: Duration::from_millis(50),
        retry: RetryPolicy::immediate(),
        ..ProcessorConfig::default()
    }
}

/// Distributor that records every task handed to it
#[derive(Default)]
pub struct RecordingDistributor {
    tasks: Mutex<Vec<NewTask>>,
    fail: AtomicBool,
    latency: Duration,
}

impl RecordingDistributor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let distributor = Self::default();
        distributor.fail.store(true, Ordering::SeqCst);
        Arc::new(distributor)
    }

    /// Distributor whose enqueue takes `latency` to be accepted
    pub fn slow(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn tasks(&self) -> Vec<NewTask> {
        self.tasks.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskDistributor for RecordingDistributor {
    async fn enqueue(&self, task: NewTask) -> Result<TaskInfo, BrokerError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let info = TaskMessage::from_new(task.clone()).info();
        self.tasks.lock().unwrap().push(task);
        if self.fail.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        Ok(info)
    }
}
