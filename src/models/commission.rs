use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Role of a commission taken on a released transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommissionType {
    /// Fee kept by the platform on a settled sale.
    PlatformFee,
    /// Referral credit. Reserved; no operation produces it yet.
    Referral,
}

impl CommissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlatformFee => "platform_fee",
            Self::Referral => "referral",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "platform_fee" => Some(Self::PlatformFee),
            "referral" => Some(Self::Referral),
            _ => None,
        }
    }
}

/// Commission derived from a released transaction. Immutable once written;
/// at most one per (transaction, recipient) pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Commission {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub recipient_user_id: Uuid,
    pub amount: Decimal,
    pub percentage: Decimal,
    pub commission_type: String,
    pub created_at: NaiveDateTime,
}

impl Commission {
    pub fn kind(&self) -> Option<CommissionType> {
        CommissionType::from_str(&self.commission_type)
    }
}
