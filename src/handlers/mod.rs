//! Command Handlers module
//!
//! Handlers that orchestrate the state-changing operations of the ledger.
//! Each handler owns its collaborators through trait objects and runs its
//! writes in one store transaction.

mod commands;
mod transfer_executor;
mod user_provisioner;

#[cfg(test)]
mod tests;

pub use commands::*;
pub use transfer_executor::TransferExecutor;
pub use user_provisioner::{
    AfterCreateUser, SendVerifyEmailHook, UserProvisioner, VERIFY_EMAIL_DELAY,
    VERIFY_EMAIL_MAX_RETRY,
};
