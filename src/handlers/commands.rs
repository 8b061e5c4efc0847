//! Command definitions
//!
//! Commands represent intentions to change ledger state.

use serde::{Deserialize, Serialize};

use crate::domain::{Account, Currency, Entry, NewUser, Transfer};

// =========================================================================
// CreateUserCommand
// =========================================================================

/// Command to provision a new user
#[derive(Clone, Serialize, Deserialize)]
pub struct CreateUserCommand {
    pub username: String,
    /// Already hashed by the caller; never logged
    pub hashed_password: String,
    pub full_name: String,
    pub email: String,
}

impl CreateUserCommand {
    pub fn new(
        username: impl Into<String>,
        hashed_password: impl Into<String>,
        full_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            hashed_password: hashed_password.into(),
            full_name: full_name.into(),
            email: email.into(),
        }
    }

    pub(crate) fn into_new_user(self) -> NewUser {
        NewUser {
            username: self.username,
            hashed_password: self.hashed_password,
            full_name: self.full_name,
            email: self.email,
        }
    }
}

impl std::fmt::Debug for CreateUserCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateUserCommand")
            .field("username", &self.username)
            .field("full_name", &self.full_name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

// =========================================================================
// TransferCommand
// =========================================================================

/// Command to move funds between two accounts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferCommand {
    pub from_account_id: i64,
    pub to_account_id: i64,
    /// Minor units; must be positive
    pub amount: i64,
    /// Both accounts must hold this currency
    pub currency: Currency,
}

impl TransferCommand {
    pub fn new(from_account_id: i64, to_account_id: i64, amount: i64, currency: Currency) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
            currency,
        }
    }
}

// =========================================================================
// Results
// =========================================================================

/// Result of a committed transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub transfer: Transfer,
    pub from_entry: Entry,
    pub to_entry: Entry,
    /// Source account after the debit
    pub from_account: Account,
    /// Destination account after the credit
    pub to_account: Account,
}

