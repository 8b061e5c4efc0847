//! In-memory Ledger Store
//!
//! Same transactional contract as the Postgres store: every account has its
//! own async row lock held by the owning transaction until commit or drop,
//! writes are staged inside the transaction and become visible all at once
//! on commit, and balance/uniqueness constraints are enforced by the store.
//!
//! A user insert reserves its username and email until its transaction
//! ends. A concurrent insert of either key waits for that outcome, like an
//! insert blocking on a Postgres unique index, and fails once the holder
//! commits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::domain::{Account, Entry, NewUser, Transfer, User};

use super::{LedgerStore, LedgerTx, NewAccount, StoreError};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<i64, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
    users: HashMap<String, User>,
}

impl Tables {
    fn unique_conflict(&self, user: &NewUser) -> Option<&'static str> {
        if self.users.contains_key(&user.username) {
            return Some("users_pkey");
        }
        if self.users.values().any(|u| u.email == user.email) {
            return Some("users_email_key");
        }
        None
    }
}

#[derive(Debug)]
struct Inner {
    tables: RwLock<Tables>,
    row_locks: RwLock<HashMap<i64, Arc<Mutex<()>>>>,
    user_keys: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    next_account_id: AtomicI64,
    next_entry_id: AtomicI64,
    next_transfer_id: AtomicI64,
    fail_commits: AtomicBool,
}

/// Ledger store held entirely in process memory
#[derive(Debug, Clone)]
pub struct MemoryLedgerStore {
    inner: Arc<Inner>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                row_locks: RwLock::new(HashMap::new()),
                user_keys: Mutex::new(HashMap::new()),
                next_account_id: AtomicI64::new(1),
                next_entry_id: AtomicI64::new(1),
                next_transfer_id: AtomicI64::new(1),
                fail_commits: AtomicBool::new(false),
            }),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every subsequent commit fail with a backend error.
    pub fn fail_commits(&self, fail: bool) {
        self.inner.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of committed transfers across all accounts
    pub async fn transfer_count(&self) -> usize {
        self.inner.tables.read().await.transfers.len()
    }

    /// Number of committed entries across all accounts
    pub async fn entry_count(&self) -> usize {
        self.inner.tables.read().await.entries.len()
    }

    /// Mark a user's email as verified.
    pub async fn verify_email(&self, username: &str) -> Result<User, StoreError> {
        let mut tables = self.inner.tables.write().await;
        let user = tables
            .users
            .get_mut(username)
            .ok_or_else(|| StoreError::RowNotFound(format!("user {username}")))?;
        user.is_email_verified = true;
        Ok(user.clone())
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            guards: HashMap::new(),
            key_guards: Vec::new(),
            accounts: HashMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
            users: Vec::new(),
        }))
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        if account.balance < 0 {
            return Err(StoreError::CheckViolation("accounts_balance_check".to_string()));
        }

        let now = Utc::now();
        let created = Account {
            id: self.inner.next_account_id.fetch_add(1, Ordering::SeqCst),
            owner: account.owner.clone(),
            balance: account.balance,
            currency: account.currency,
            created_at: now,
        };

        self.inner
            .row_locks
            .write()
            .await
            .insert(created.id, Arc::new(Mutex::new(())));

        let mut tables = self.inner.tables.write().await;
        if account.balance != 0 {
            tables.entries.push(Entry {
                id: self.inner.next_entry_id.fetch_add(1, Ordering::SeqCst),
                account_id: created.id,
                amount: account.balance,
                created_at: now,
            });
        }
        tables.accounts.insert(created.id, created.clone());

        Ok(created)
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError> {
        Ok(self.inner.tables.read().await.accounts.get(&id).cloned())
    }

    async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError> {
        let tables = self.inner.tables.read().await;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn list_transfers(&self, account_id: i64) -> Result<Vec<Transfer>, StoreError> {
        let tables = self.inner.tables.read().await;
        Ok(tables
            .transfers
            .iter()
            .filter(|t| t.from_account_id == account_id || t.to_account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.inner.tables.read().await.users.get(username).cloned())
    }
}

/// Open in-memory transaction. Dropping it discards staged writes and
/// releases every row lock it holds.
struct MemoryTx {
    inner: Arc<Inner>,
    guards: HashMap<i64, OwnedMutexGuard<()>>,
    key_guards: Vec<OwnedMutexGuard<()>>,
    accounts: HashMap<i64, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
    users: Vec<User>,
}

impl MemoryTx {
    /// Current view of an account inside this transaction
    async fn visible_account(&self, id: i64) -> Option<Account> {
        match self.accounts.get(&id) {
            Some(staged) => Some(staged.clone()),
            None => self.inner.tables.read().await.accounts.get(&id).cloned(),
        }
    }

    async fn account_exists(&self, id: i64) -> bool {
        self.inner.tables.read().await.accounts.contains_key(&id)
    }

    /// Reserve the unique keys of `user`, waiting for any open transaction
    /// that holds one of them.
    async fn reserve_user_keys(&self, user: &NewUser) -> Vec<OwnedMutexGuard<()>> {
        let mut keys = vec![
            format!("username:{}", user.username),
            format!("email:{}", user.email),
        ];
        // Fixed acquisition order across transactions
        keys.sort();

        let mut reserved = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self
                .inner
                .user_keys
                .lock()
                .await
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            reserved.push(lock.lock_owned().await);
        }
        reserved
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_account(&mut self, id: i64) -> Result<Option<Account>, StoreError> {
        if !self.guards.contains_key(&id) {
            let lock = self.inner.row_locks.read().await.get(&id).cloned();
            let Some(lock) = lock else {
                return Ok(None);
            };
            let guard = lock.lock_owned().await;
            self.guards.insert(id, guard);
        }

        Ok(self.visible_account(id).await)
    }

    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, StoreError> {
        if amount <= 0 {
            return Err(StoreError::CheckViolation("transfers_amount_check".to_string()));
        }
        for id in [from_account_id, to_account_id] {
            if !self.account_exists(id).await {
                return Err(StoreError::ForeignKeyViolation(
                    "transfers_account_id_fkey".to_string(),
                ));
            }
        }

        let transfer = Transfer {
            id: self.inner.next_transfer_id.fetch_add(1, Ordering::SeqCst),
            from_account_id,
            to_account_id,
            amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, StoreError> {
        if !self.account_exists(account_id).await {
            return Err(StoreError::ForeignKeyViolation(
                "entries_account_id_fkey".to_string(),
            ));
        }

        let entry = Entry {
            id: self.inner.next_entry_id.fetch_add(1, Ordering::SeqCst),
            account_id,
            amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, StoreError> {
        // An UPDATE takes the row lock implicitly
        let mut account = self
            .lock_account(id)
            .await?
            .ok_or_else(|| StoreError::RowNotFound(format!("account {id}")))?;

        account.balance = account
            .balance
            .checked_add(delta)
            .filter(|balance| *balance >= 0)
            .ok_or_else(|| StoreError::CheckViolation("accounts_balance_check".to_string()))?;

        self.accounts.insert(id, account.clone());
        Ok(account)
    }

    async fn create_user(&mut self, user: &NewUser) -> Result<User, StoreError> {
        // Keys staged by this transaction are already reserved by it
        if self.users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::UniqueViolation("users_pkey".to_string()));
        }
        if self.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation("users_email_key".to_string()));
        }

        let reserved = self.reserve_user_keys(user).await;

        // Any earlier holder has committed or rolled back by now
        if let Some(constraint) = self.inner.tables.read().await.unique_conflict(user) {
            return Err(StoreError::UniqueViolation(constraint.to_string()));
        }
        self.key_guards.extend(reserved);

        let now = Utc::now();
        let created = User {
            username: user.username.clone(),
            hashed_password: user.hashed_password.clone(),
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            is_email_verified: false,
            password_changed_at: now,
            created_at: now,
        };
        self.users.push(created.clone());
        Ok(created)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        if self.inner.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("commit rejected".to_string()));
        }

        let MemoryTx {
            inner,
            guards,
            key_guards,
            accounts,
            entries,
            transfers,
            users,
        } = *self;

        let mut tables = inner.tables.write().await;
        tables.accounts.extend(accounts);
        tables.entries.extend(entries);
        tables.transfers.extend(transfers);
        tables
            .users
            .extend(users.into_iter().map(|u| (u.username.clone(), u)));
        drop(tables);

        // Row locks and key reservations are released only after the writes
        // are visible
        drop(guards);
        drop(key_guards);
        Ok(())
    }
}
