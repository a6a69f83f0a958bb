use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A user's internal balance record.
///
/// The balance columns are caches maintained in the same database transaction
/// as the ledger entries they summarize; the schema enforces
/// `available + blocked = earned - spent - withdrawn` so no code path can
/// commit them out of sync. Preconditions are still validated against the
/// projected transaction log, not these columns.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: Uuid,
    pub available_balance: Decimal,
    pub blocked_balance: Decimal,
    pub total_earned: Decimal,
    pub total_spent: Decimal,
    pub total_withdrawn: Decimal,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Wallet {
    /// Funds the owner can spend right now.
    pub fn available(&self) -> Decimal {
        self.available_balance
    }

    /// Everything the wallet has ever held, spendable or not.
    pub fn lifetime_volume(&self) -> Decimal {
        self.total_earned
    }
}
