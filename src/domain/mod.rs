//! Domain module
//!
//! Core domain types and validation rules.

pub mod amount;
pub mod context;
pub mod models;
pub mod validation;

pub use amount::{Amount, AmountError, Currency, CurrencyError};
pub use context::OperationContext;
pub use models::{Account, Entry, NewUser, Transfer, User};
pub use validation::ValidationError;
