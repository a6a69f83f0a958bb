use crate::database::DatabaseError;
use rust_decimal::Decimal;
use sqlx::Error as SqlxError;
use thiserror::Error;
use uuid::Uuid;

/// Application-level error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Ledger domain errors
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// SQLx database errors
    #[error("SQL error: {0}")]
    Sqlx(#[from] SqlxError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Unauthorized access errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// UUID parsing errors
    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    /// Generic error with message
    #[error("{0}")]
    Message(String),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Ledger domain errors.
///
/// Validation variants (`InvalidAmount`, `InvalidPercentage`) are raised
/// before any write is attempted. Conflict variants abort the whole operation
/// with no partial effect. `Persistence` covers storage failures and is the
/// only retry-eligible variant; the ledger itself never retries.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Amount is zero, negative, or finer than the currency's 2 decimal places
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Commission percentage outside [0, 1]
    #[error("Invalid percentage: {0}")]
    InvalidPercentage(String),

    /// Projected available balance cannot cover the requested amount
    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    /// No user record for the given id or email
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Release attempted on a transaction that is not currently blocked
    #[error("Transaction {0} is not blocked")]
    TransactionNotBlocked(Uuid),

    /// Conditional status update lost against a concurrent writer, or the
    /// requested transition is not part of the state machine
    #[error("Status conflict on transaction {transaction_id}: {detail}")]
    StatusConflict { transaction_id: Uuid, detail: String },

    /// A commission already exists for this (transaction, recipient) pair
    #[error("Commission already recorded for transaction {transaction_id}")]
    DuplicateCommission { transaction_id: Uuid },

    /// Storage/infra failure
    #[error("Persistence error: {0}")]
    Persistence(SqlxError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl AppError {
    /// Check if error is a database connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AppError::Database(DatabaseError::PoolCreation(_))
                | AppError::Database(DatabaseError::ConnectionTimeout)
        )
    }

    /// Check if error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_) | AppError::Ledger(LedgerError::UserNotFound(_))
        )
    }
}

impl From<SqlxError> for LedgerError {
    fn from(err: SqlxError) -> Self {
        match &err {
            SqlxError::Database(db_err) => {
                // Map the PostgreSQL error codes the schema can raise
                let code = db_err.code().map(|c| c.to_string());
                if code.as_deref() == Some("23505") {
                    // Unique violation: the only non-idempotency unique
                    // constraint a money operation can trip is the one
                    // commission per (transaction, recipient) pair
                    if db_err.message().contains("commissions_once_per_recipient") {
                        return LedgerError::DuplicateCommission {
                            transaction_id: Uuid::nil(),
                        };
                    }
                    LedgerError::Persistence(err)
                } else {
                    LedgerError::Persistence(err)
                }
            }
            _ => LedgerError::Persistence(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_funds_names_both_figures() {
        let err = LedgerError::InsufficientFunds {
            available: Decimal::new(50000, 2),
            requested: Decimal::new(60000, 2),
        };
        let text = format!("{}", err);
        assert!(text.contains("500.00"));
        assert!(text.contains("600.00"));
    }

    #[test]
    fn row_not_found_maps_to_persistence() {
        let err = LedgerError::from(SqlxError::RowNotFound);
        assert!(matches!(err, LedgerError::Persistence(_)));
    }
}
