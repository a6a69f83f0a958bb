//! Balance projection from the transaction log.
//!
//! Balances are derived figures: the projector folds a wallet's ledger
//! entries into its spendable/held totals. Money operations run this fold
//! inside their own database transaction (after taking the wallet row lock)
//! and validate preconditions against the result rather than the cached
//! wallet columns.

use crate::models::{Direction, LedgerTransaction, TransactionStatus, TransactionType};
use rust_decimal::Decimal;
use serde::Serialize;

/// Spendable and held figures derived from a wallet's transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BalanceProjection {
    pub available: Decimal,
    pub blocked: Decimal,
    pub total_earned: Decimal,
    pub total_spent: Decimal,
    pub total_withdrawn: Decimal,
}

impl BalanceProjection {
    pub fn zero() -> Self {
        Self {
            available: Decimal::ZERO,
            blocked: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            total_spent: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
        }
    }
}

/// Fold a wallet's ledger entries into its balance figures.
///
/// Contributions per entry:
/// - completed credits accumulate into `total_earned`
/// - completed `bank_withdrawal` debits accumulate into `total_withdrawn`
/// - other completed debits accumulate into `total_spent`
/// - `blocked` entries and `pending` debits are open holds and accumulate
///   into `blocked`; they enter `total_spent`/`total_withdrawn` only when
///   they complete, and leave `blocked` in the same step, so no amount is
///   ever counted twice
/// - cancelled entries contribute nothing
/// - disputed entries keep their completed-era contribution: the funds moved
///   and adjudication happens outside the ledger
pub fn project(entries: &[LedgerTransaction]) -> BalanceProjection {
    let mut projection = BalanceProjection::zero();

    for entry in entries {
        let (status, direction) = match (entry.tx_status(), entry.tx_direction()) {
            (Some(s), Some(d)) => (s, d),
            // Unreachable given the schema's CHECK constraints
            _ => continue,
        };

        match (status, direction) {
            (TransactionStatus::Completed, Direction::Credit)
            | (TransactionStatus::Disputed, Direction::Credit) => {
                projection.total_earned += entry.amount;
            }
            (TransactionStatus::Completed, Direction::Debit)
            | (TransactionStatus::Disputed, Direction::Debit) => {
                if entry.tx_type() == Some(TransactionType::BankWithdrawal) {
                    projection.total_withdrawn += entry.amount;
                } else {
                    projection.total_spent += entry.amount;
                }
            }
            (TransactionStatus::Blocked, _) => {
                projection.blocked += entry.amount;
            }
            (TransactionStatus::Pending, Direction::Debit) => {
                projection.blocked += entry.amount;
            }
            (TransactionStatus::Pending, Direction::Credit)
            | (TransactionStatus::Cancelled, _) => {}
        }
    }

    projection.available = projection.total_earned
        - projection.total_spent
        - projection.total_withdrawn
        - projection.blocked;

    projection
}
