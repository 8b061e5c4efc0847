//! Ledger Store module
//!
//! Durable account, entry, transfer and user records. The store exposes
//! row-level primitives inside a transaction; the handlers decide the order
//! in which rows are locked and written.

mod error;
mod memory;
mod postgres;

use async_trait::async_trait;

use crate::domain::{Account, Currency, Entry, NewUser, Transfer, User};

pub use error::StoreError;
pub use memory::MemoryLedgerStore;
pub use postgres::{PgLedgerStore, PgLedgerTx};

/// Parameters for opening an account.
///
/// A non-zero opening balance is written together with a matching entry so
/// the balance always equals the sum of the account's entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub owner: String,
    pub currency: Currency,
    pub balance: i64,
}

impl NewAccount {
    pub fn new(owner: impl Into<String>, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            currency,
            balance: 0,
        }
    }

    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = balance;
        self
    }
}

/// Entry point to the ledger: non-locking reads and transaction creation.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction. Dropping it without `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError>;

    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError>;

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError>;

    /// Entries of one account, oldest first
    async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError>;

    /// Transfers touching one account on either side, oldest first
    async fn list_transfers(&self, account_id: i64) -> Result<Vec<Transfer>, StoreError>;

    async fn get_user(&self, username: &str) -> Result<Option<User>, StoreError>;
}

/// One open store transaction.
///
/// Row locks taken through `lock_account` (or implicitly by
/// `add_account_balance`) are held until commit or drop.
#[async_trait]
pub trait LedgerTx: Send {
    /// Read an account and hold its row lock. `None` if it does not exist.
    async fn lock_account(&mut self, id: i64) -> Result<Option<Account>, StoreError>;

    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, StoreError>;

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, StoreError>;

    /// Add `delta` to the balance and return the updated account.
    /// Fails with `CheckViolation` if the balance would go negative.
    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, StoreError>;

    async fn create_user(&mut self, user: &NewUser) -> Result<User, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
