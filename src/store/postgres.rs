//! Postgres Ledger Store
//!
//! Row locks use `FOR NO KEY UPDATE` so that inserting entries and transfers
//! referencing a locked account does not conflict with the lock itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::{Account, Currency, Entry, NewUser, Transfer, User};

use super::{LedgerStore, LedgerTx, NewAccount, StoreError};

type AccountRow = (i64, String, i64, String, DateTime<Utc>);
type EntryRow = (i64, i64, i64, DateTime<Utc>);
type TransferRow = (i64, i64, i64, i64, DateTime<Utc>);
type UserRow = (
    String,
    String,
    String,
    String,
    bool,
    DateTime<Utc>,
    DateTime<Utc>,
);

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const USER_COLUMNS: &str =
    "username, hashed_password, full_name, email, is_email_verified, password_changed_at, created_at";

fn account_from_row((id, owner, balance, currency, created_at): AccountRow) -> Result<Account, StoreError> {
    let currency = currency
        .parse::<Currency>()
        .map_err(|e| StoreError::CorruptRow(e.to_string()))?;
    Ok(Account {
        id,
        owner,
        balance,
        currency,
        created_at,
    })
}

fn entry_from_row((id, account_id, amount, created_at): EntryRow) -> Entry {
    Entry {
        id,
        account_id,
        amount,
        created_at,
    }
}

fn transfer_from_row((id, from_account_id, to_account_id, amount, created_at): TransferRow) -> Transfer {
    Transfer {
        id,
        from_account_id,
        to_account_id,
        amount,
        created_at,
    }
}

fn user_from_row(row: UserRow) -> User {
    let (username, hashed_password, full_name, email, is_email_verified, password_changed_at, created_at) =
        row;
    User {
        username,
        hashed_password,
        full_name,
        email,
        is_email_verified,
        password_changed_at,
        created_at,
    }
}

/// Ledger store backed by a Postgres pool
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Account, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row: AccountRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO accounts (owner, balance, currency)
            VALUES ($1, $2, $3)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(&account.owner)
        .bind(account.balance)
        .bind(account.currency.code())
        .fetch_one(&mut *tx)
        .await?;
        let created = account_from_row(row)?;

        if account.balance != 0 {
            sqlx::query("INSERT INTO entries (account_id, amount) VALUES ($1, $2)")
                .bind(created.id)
                .bind(account.balance)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(created)
    }

    async fn get_account(&self, id: i64) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 LIMIT 1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(account_from_row).transpose()
    }

    async fn list_entries(&self, account_id: i64) -> Result<Vec<Entry>, StoreError> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, amount, created_at
            FROM entries
            WHERE account_id = $1
            ORDER BY id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(entry_from_row).collect())
    }

    async fn list_transfers(&self, account_id: i64) -> Result<Vec<Transfer>, StoreError> {
        let rows: Vec<TransferRow> = sqlx::query_as(
            r#"
            SELECT id, from_account_id, to_account_id, amount, created_at
            FROM transfers
            WHERE from_account_id = $1 OR to_account_id = $1
            ORDER BY id
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(transfer_from_row).collect())
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1 LIMIT 1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(user_from_row))
    }
}

/// An open Postgres transaction. Dropped without commit, sqlx rolls it back.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn lock_account(&mut self, id: i64) -> Result<Option<Account>, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 LIMIT 1 FOR NO KEY UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(account_from_row).transpose()
    }

    async fn create_transfer(
        &mut self,
        from_account_id: i64,
        to_account_id: i64,
        amount: i64,
    ) -> Result<Transfer, StoreError> {
        let row: TransferRow = sqlx::query_as(
            r#"
            INSERT INTO transfers (from_account_id, to_account_id, amount)
            VALUES ($1, $2, $3)
            RETURNING id, from_account_id, to_account_id, amount, created_at
            "#,
        )
        .bind(from_account_id)
        .bind(to_account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(transfer_from_row(row))
    }

    async fn create_entry(&mut self, account_id: i64, amount: i64) -> Result<Entry, StoreError> {
        let row: EntryRow = sqlx::query_as(
            r#"
            INSERT INTO entries (account_id, amount)
            VALUES ($1, $2)
            RETURNING id, account_id, amount, created_at
            "#,
        )
        .bind(account_id)
        .bind(amount)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(entry_from_row(row))
    }

    async fn add_account_balance(&mut self, id: i64, delta: i64) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            r#"
            UPDATE accounts
            SET balance = balance + $2
            WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => account_from_row(row),
            None => Err(StoreError::RowNotFound(format!("account {id}"))),
        }
    }

    async fn create_user(&mut self, user: &NewUser) -> Result<User, StoreError> {
        let row: UserRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (username, hashed_password, full_name, email)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.hashed_password)
        .bind(&user.full_name)
        .bind(&user.email)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(user_from_row(row))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
