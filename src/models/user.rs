use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// User account as seen by the ledger, indexed by email.
///
/// The marketplace's auth layer owns the full profile; transfers address
/// counterparties by email, so that is all the ledger keeps.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: NaiveDateTime,
}
