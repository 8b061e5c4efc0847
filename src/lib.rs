//! ledger_core Library
//!
//! Ledger-backed account service core: deadlock-free transfers, user
//! provisioning with verification task dispatch, a durable task queue and
//! stateless session tokens.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod store;
pub mod token;

pub use config::Config;
pub use domain::{Account, Amount, AmountError, Currency, Entry, OperationContext, Transfer, User};
pub use error::{AppError, AppResult, ErrorKind};
pub use handlers::{CreateUserCommand, TransferCommand, TransferExecutor, TransferResult, UserProvisioner};
pub use store::{LedgerStore, LedgerTx, MemoryLedgerStore, PgLedgerStore};
pub use token::{Payload, SealedTokenMaker, TokenError, TokenMaker};
