use crate::error::{AppError, AppResult};
use crate::models::{Commission, LedgerTransaction};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: i64,
    pub event_type: String, // "deposit", "transfer", "funds_blocked", etc.
    pub transaction_id: Option<Uuid>,
    pub user_email: Option<String>,
    pub details: serde_json::Value,
}

/// Audit trail service for logging all money movements
pub struct AuditTrailService {
    #[allow(dead_code)]
    log_file: PathBuf,
    file_handle: Arc<Mutex<std::fs::File>>,
}

impl AuditTrailService {
    /// Create a new audit trail service
    pub fn new(log_directory: PathBuf) -> AppResult<Self> {
        // Ensure directory exists
        std::fs::create_dir_all(&log_directory)
            .map_err(|e| AppError::Message(format!("Failed to create log directory: {}", e)))?;

        // Create log file with date
        let date = chrono::Utc::now().format("%Y-%m-%d");
        let log_file = log_directory.join(format!("audit_{}.log", date));

        // Open file in append mode
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .map_err(|e| AppError::Message(format!("Failed to open audit log file: {}", e)))?;

        info!("Audit trail initialized: {:?}", log_file);

        Ok(Self {
            log_file,
            file_handle: Arc::new(Mutex::new(file)),
        })
    }

    /// Log an audit entry
    pub async fn log(&self, entry: AuditLogEntry) -> AppResult<()> {
        let json = serde_json::to_string(&entry).map_err(AppError::Serialization)?;

        let mut file = self.file_handle.lock().await;
        writeln!(file, "{}", json)
            .map_err(|e| AppError::Message(format!("Failed to write audit log: {}", e)))?;

        file.flush()
            .map_err(|e| AppError::Message(format!("Failed to flush audit log: {}", e)))?;

        Ok(())
    }

    /// Log a deposit
    pub async fn log_deposit(
        &self,
        transaction: &LedgerTransaction,
        user_email: &str,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "deposit".to_string(),
            transaction_id: Some(transaction.id),
            user_email: Some(user_email.to_string()),
            details: serde_json::json!({
                "amount": transaction.amount.to_string(),
            }),
        };

        self.log(entry).await
    }

    /// Log an internal transfer (debit leg)
    pub async fn log_transfer(
        &self,
        debit: &LedgerTransaction,
        from_email: &str,
        to_email: &str,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "transfer".to_string(),
            transaction_id: Some(debit.id),
            user_email: Some(from_email.to_string()),
            details: serde_json::json!({
                "amount": debit.amount.to_string(),
                "to": to_email,
            }),
        };

        self.log(entry).await
    }

    /// Log a funds hold against an order
    pub async fn log_funds_blocked(
        &self,
        transaction: &LedgerTransaction,
        user_email: &str,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "funds_blocked".to_string(),
            transaction_id: Some(transaction.id),
            user_email: Some(user_email.to_string()),
            details: serde_json::json!({
                "amount": transaction.amount.to_string(),
                "reference_id": transaction.reference_id,
            }),
        };

        self.log(entry).await
    }

    /// Log a release of blocked funds
    pub async fn log_funds_released(
        &self,
        released: &LedgerTransaction,
        seller_email: &str,
        commission: Option<&Commission>,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "funds_released".to_string(),
            transaction_id: Some(released.id),
            user_email: Some(seller_email.to_string()),
            details: serde_json::json!({
                "amount": released.amount.to_string(),
                "commission": commission.map(|c| c.amount.to_string()),
            }),
        };

        self.log(entry).await
    }

    /// Log a withdrawal request
    pub async fn log_withdrawal_requested(
        &self,
        transaction: &LedgerTransaction,
        user_email: &str,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "withdrawal_requested".to_string(),
            transaction_id: Some(transaction.id),
            user_email: Some(user_email.to_string()),
            details: serde_json::json!({
                "amount": transaction.amount.to_string(),
            }),
        };

        self.log(entry).await
    }

    /// Log the settlement of a withdrawal
    pub async fn log_withdrawal_settled(
        &self,
        transaction: &LedgerTransaction,
        success: bool,
    ) -> AppResult<()> {
        let entry = AuditLogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            event_type: "withdrawal_settled".to_string(),
            transaction_id: Some(transaction.id),
            user_email: None,
            details: serde_json::json!({
                "amount": transaction.amount.to_string(),
                "success": success,
            }),
        };

        self.log(entry).await
    }
}
