//! Ledger transaction model and its status state machine.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Transaction types for fund movements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    PurchasePayment,
    FreightPayment,
    SaleReceipt,
    InternalTransfer,
    BankWithdrawal,
    Deposit,
    Commission,
    Refund,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PurchasePayment => "purchase_payment",
            Self::FreightPayment => "freight_payment",
            Self::SaleReceipt => "sale_receipt",
            Self::InternalTransfer => "internal_transfer",
            Self::BankWithdrawal => "bank_withdrawal",
            Self::Deposit => "deposit",
            Self::Commission => "commission",
            Self::Refund => "refund",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "purchase_payment" => Some(Self::PurchasePayment),
            "freight_payment" => Some(Self::FreightPayment),
            "sale_receipt" => Some(Self::SaleReceipt),
            "internal_transfer" => Some(Self::InternalTransfer),
            "bank_withdrawal" => Some(Self::BankWithdrawal),
            "deposit" => Some(Self::Deposit),
            "commission" => Some(Self::Commission),
            "refund" => Some(Self::Refund),
            _ => None,
        }
    }
}

/// Which side of the wallet a transaction touches.
///
/// Stored explicitly because `internal_transfer` appears on both sides of a
/// transfer; the type alone does not say whether the wallet gained or lost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Credit => "credit",
            Self::Debit => "debit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "credit" => Some(Self::Credit),
            "debit" => Some(Self::Debit),
            _ => None,
        }
    }
}

/// Transaction lifecycle status.
///
/// ```text
/// pending --> completed | cancelled
/// blocked --> completed | cancelled
/// completed --> disputed      (reserved for external adjudication)
/// ```
/// `completed`, `cancelled` and `disputed` are terminal for every operation
/// this service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Blocked,
    Completed,
    Cancelled,
    Disputed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "blocked" => Some(Self::Blocked),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "disputed" => Some(Self::Disputed),
            _ => None,
        }
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(&self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, to),
            (Pending, Completed)
                | (Pending, Cancelled)
                | (Blocked, Completed)
                | (Blocked, Cancelled)
                | (Completed, Disputed)
        )
    }

    /// No further transitions are reachable through the exposed operations.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Disputed)
    }
}

/// A ledger entry. Immutable once created, except for `status` which only
/// moves along the state machine via conditional updates.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub transaction_type: String,
    pub direction: String,
    pub amount: Decimal,
    pub status: String,
    pub description: Option<String>,
    pub related_user_id: Option<Uuid>,
    pub reference_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
}

impl LedgerTransaction {
    pub fn tx_type(&self) -> Option<TransactionType> {
        TransactionType::from_str(&self.transaction_type)
    }

    pub fn tx_status(&self) -> Option<TransactionStatus> {
        TransactionStatus::from_str(&self.status)
    }

    pub fn tx_direction(&self) -> Option<Direction> {
        Direction::from_str(&self.direction)
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }
}
