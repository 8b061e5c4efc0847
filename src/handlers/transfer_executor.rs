//! Transfer Executor
//!
//! Moves funds between two accounts in one store transaction. Account rows
//! are always locked and updated in ascending ID order, whatever the
//! transfer direction, so opposing transfers over the same pair serialize
//! instead of deadlocking.

use std::sync::Arc;

use crate::domain::{Account, Amount, Currency, OperationContext};
use crate::error::{AppError, AppResult};
use crate::store::{LedgerStore, LedgerTx};

use super::{TransferCommand, TransferResult};

/// Handler for account-to-account transfers
pub struct TransferExecutor {
    store: Arc<dyn LedgerStore>,
}

impl TransferExecutor {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Execute the transfer command.
    ///
    /// Input is validated before any transaction is opened. The transaction
    /// itself runs under the context deadline; on expiry it is dropped and
    /// rolled back.
    pub async fn execute(
        &self,
        command: TransferCommand,
        context: &OperationContext,
    ) -> AppResult<TransferResult> {
        let amount = Amount::new(command.amount)?;

        if command.from_account_id == command.to_account_id {
            return Err(AppError::InvalidArgument(
                "cannot transfer to the same account".to_string(),
            ));
        }

        let result = context.run(self.transfer_tx(&command, amount)).await;

        match &result {
            Ok(result) => tracing::info!(
                correlation_id = ?context.correlation_id,
                transfer_id = result.transfer.id,
                from_account_id = command.from_account_id,
                to_account_id = command.to_account_id,
                amount = amount.value(),
                currency = %command.currency,
                "Transfer committed"
            ),
            Err(e) if e.is_client_error() => tracing::debug!(
                correlation_id = ?context.correlation_id,
                from_account_id = command.from_account_id,
                to_account_id = command.to_account_id,
                error = %e,
                "Transfer rejected"
            ),
            Err(e) => tracing::warn!(
                correlation_id = ?context.correlation_id,
                from_account_id = command.from_account_id,
                to_account_id = command.to_account_id,
                error = %e,
                "Transfer failed"
            ),
        }

        result
    }

    async fn transfer_tx(&self, command: &TransferCommand, amount: Amount) -> AppResult<TransferResult> {
        let from_id = command.from_account_id;
        let to_id = command.to_account_id;

        let mut tx = self.store.begin().await?;

        // Lock both rows, smaller ID first
        let (first_id, second_id) = lock_order(from_id, to_id);
        let first = lock_existing(tx.as_mut(), first_id).await?;
        let second = lock_existing(tx.as_mut(), second_id).await?;
        let (from_account, to_account) = if first_id == from_id {
            (first, second)
        } else {
            (second, first)
        };

        check_currency(&from_account, command.currency)?;
        check_currency(&to_account, command.currency)?;

        if !amount.is_covered_by(from_account.balance) {
            return Err(AppError::InsufficientBalance {
                account_id: from_id,
                required: amount.value(),
                available: from_account.balance,
            });
        }

        let transfer = tx.create_transfer(from_id, to_id, amount.value()).await?;
        let from_entry = tx.create_entry(from_id, amount.negated()).await?;
        let to_entry = tx.create_entry(to_id, amount.value()).await?;

        // Balance updates follow the same order as the locks
        let (from_account, to_account) = if from_id < to_id {
            let from_account = tx.add_account_balance(from_id, amount.negated()).await?;
            let to_account = tx.add_account_balance(to_id, amount.value()).await?;
            (from_account, to_account)
        } else {
            let to_account = tx.add_account_balance(to_id, amount.value()).await?;
            let from_account = tx.add_account_balance(from_id, amount.negated()).await?;
            (from_account, to_account)
        };

        tx.commit().await?;

        Ok(TransferResult {
            transfer,
            from_entry,
            to_entry,
            from_account,
            to_account,
        })
    }
}

/// Canonical lock order for a pair of account IDs.
fn lock_order(a: i64, b: i64) -> (i64, i64) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

async fn lock_existing(tx: &mut dyn LedgerTx, id: i64) -> AppResult<Account> {
    tx.lock_account(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("account {id}")))
}

fn check_currency(account: &Account, currency: Currency) -> AppResult<()> {
    if account.currency != currency {
        return Err(AppError::CurrencyMismatch {
            account_id: account.id,
            expected: currency,
            found: account.currency,
        });
    }
    Ok(())
}
