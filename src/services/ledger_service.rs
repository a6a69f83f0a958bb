//! The wallet facade: the single entry point the application layer calls.
//!
//! Validation happens here, before any write is attempted; the atomicity and
//! locking of each operation live in the repository. Callers address
//! counterparties by email and never see storage details.

use crate::error::{AppError, AppResult, LedgerError};
use crate::models::{LedgerTransaction, User};
use crate::projector::BalanceProjection;
use crate::repositories::{
    LedgerRepository, OperationOutcome, ReleaseOutcome, UserRepository, WalletSnapshot,
};
use crate::services::AuditTrailService;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Default number of transactions/commissions in a snapshot.
const DEFAULT_SNAPSHOT_LIMIT: i64 = 50;

/// Facade over the ledger: money operations plus read-only views.
pub struct LedgerService {
    user_repo: Arc<UserRepository>,
    ledger_repo: Arc<LedgerRepository>,
    audit: Option<Arc<AuditTrailService>>,
    platform_account_email: String,
}

impl LedgerService {
    pub fn new(
        user_repo: Arc<UserRepository>,
        ledger_repo: Arc<LedgerRepository>,
        audit: Option<Arc<AuditTrailService>>,
        platform_account_email: String,
    ) -> Self {
        Self {
            user_repo,
            ledger_repo,
            audit,
            platform_account_email,
        }
    }

    // =========================================================================
    // Money operations
    // =========================================================================

    /// Credit external money into a user's wallet.
    pub async fn deposit(
        &self,
        user_email: &str,
        amount: Decimal,
        description: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> AppResult<OperationOutcome> {
        let amount = validate_amount(amount)?;
        let user = self.user_repo.find_or_create_by_email(user_email).await?;

        let outcome = self
            .ledger_repo
            .deposit(user.id, amount, description, idempotency_key)
            .await?;

        info!(
            transaction_id = %outcome.transaction.id,
            user = user_email,
            amount = %amount,
            "deposit completed"
        );
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_deposit(&outcome.transaction, user_email).await {
                warn!("audit log write failed: {}", e);
            }
        }

        Ok(outcome)
    }

    /// Move funds from one user to another.
    pub async fn transfer(
        &self,
        from_email: &str,
        to_email: &str,
        amount: Decimal,
        description: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> AppResult<OperationOutcome> {
        let amount = validate_amount(amount)?;

        if from_email.eq_ignore_ascii_case(to_email) {
            return Err(AppError::Validation(
                "Cannot transfer funds to yourself".to_string(),
            ));
        }

        let from = self.require_user(from_email).await?;
        let to = self.require_user(to_email).await?;

        let outcome = self
            .ledger_repo
            .transfer(from.id, to.id, amount, description, idempotency_key)
            .await?;

        info!(
            transaction_id = %outcome.transaction.id,
            from = from_email,
            to = to_email,
            amount = %amount,
            "internal transfer completed"
        );
        if let Some(audit) = &self.audit {
            if let Err(e) = audit
                .log_transfer(&outcome.transaction, from_email, to_email)
                .await
            {
                warn!("audit log write failed: {}", e);
            }
        }

        Ok(outcome)
    }

    /// Hold funds against an order without crediting anyone yet.
    pub async fn block_funds(
        &self,
        user_email: &str,
        amount: Decimal,
        reference_id: &str,
        description: Option<&str>,
    ) -> AppResult<OperationOutcome> {
        let amount = validate_amount(amount)?;
        if reference_id.is_empty() {
            return Err(AppError::Validation(
                "A reference id is required to block funds".to_string(),
            ));
        }

        let user = self.require_user(user_email).await?;

        let outcome = self
            .ledger_repo
            .block_funds(user.id, amount, reference_id, description)
            .await?;

        info!(
            transaction_id = %outcome.transaction.id,
            user = user_email,
            amount = %amount,
            reference_id,
            "funds blocked"
        );
        if let Some(audit) = &self.audit {
            if let Err(e) = audit
                .log_funds_blocked(&outcome.transaction, user_email)
                .await
            {
                warn!("audit log write failed: {}", e);
            }
        }

        Ok(outcome)
    }

    /// Settle blocked funds to a seller, minus an optional platform
    /// commission.
    pub async fn release_funds(
        &self,
        transaction_id: Uuid,
        seller_email: &str,
        commission_percentage: Option<Decimal>,
    ) -> AppResult<ReleaseOutcome> {
        let percentage = validate_percentage(commission_percentage)?;
        let seller = self.require_user(seller_email).await?;
        let platform = self
            .user_repo
            .find_or_create_by_email(&self.platform_account_email)
            .await?;

        let outcome = self
            .ledger_repo
            .release_funds(transaction_id, seller.id, platform.id, percentage)
            .await?;

        info!(
            transaction_id = %transaction_id,
            seller = seller_email,
            seller_credit = %outcome
                .seller_credit
                .as_ref()
                .map(|t| t.amount)
                .unwrap_or(Decimal::ZERO),
            commission = %outcome.commission.as_ref().map(|c| c.amount).unwrap_or(Decimal::ZERO),
            "blocked funds released"
        );
        if let Some(audit) = &self.audit {
            if let Err(e) = audit
                .log_funds_released(&outcome.released, seller_email, outcome.commission.as_ref())
                .await
            {
                warn!("audit log write failed: {}", e);
            }
        }

        Ok(outcome)
    }

    /// Hold funds for a bank withdrawal pending off-platform confirmation.
    pub async fn request_withdrawal(
        &self,
        user_email: &str,
        amount: Decimal,
        description: Option<&str>,
    ) -> AppResult<OperationOutcome> {
        let amount = validate_amount(amount)?;
        let user = self.require_user(user_email).await?;

        let outcome = self
            .ledger_repo
            .request_withdrawal(user.id, amount, description)
            .await?;

        info!(
            transaction_id = %outcome.transaction.id,
            user = user_email,
            amount = %amount,
            "withdrawal requested"
        );
        if let Some(audit) = &self.audit {
            if let Err(e) = audit
                .log_withdrawal_requested(&outcome.transaction, user_email)
                .await
            {
                warn!("audit log write failed: {}", e);
            }
        }

        Ok(outcome)
    }

    /// Confirm or cancel a pending bank withdrawal.
    pub async fn settle_withdrawal(
        &self,
        transaction_id: Uuid,
        success: bool,
    ) -> AppResult<LedgerTransaction> {
        let updated = self
            .ledger_repo
            .settle_withdrawal(transaction_id, success)
            .await?;

        info!(
            transaction_id = %transaction_id,
            success,
            "withdrawal settled"
        );
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_withdrawal_settled(&updated, success).await {
                warn!("audit log write failed: {}", e);
            }
        }

        Ok(updated)
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Balance figures projected from the wallet's transaction log.
    pub async fn balance(&self, user_email: &str) -> AppResult<BalanceProjection> {
        let user = self.require_user(user_email).await?;
        let wallet = self.ledger_repo.get_or_create_wallet(user.id).await?;
        let projection = self.ledger_repo.project_balance(wallet.id).await?;

        Ok(projection)
    }

    /// Wallet, recent transactions and commissions in one consistent view.
    pub async fn snapshot(&self, user_email: &str, limit: Option<i64>) -> AppResult<WalletSnapshot> {
        let user = self.require_user(user_email).await?;

        // Wallets are created lazily, so first access sees an empty one
        self.ledger_repo.get_or_create_wallet(user.id).await?;

        let limit = limit.filter(|l| *l > 0).unwrap_or(DEFAULT_SNAPSHOT_LIMIT);
        let snapshot = self
            .ledger_repo
            .snapshot(user.id, limit)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Wallet for {}", user_email)))?;

        Ok(snapshot)
    }

    async fn require_user(&self, email: &str) -> AppResult<User> {
        let user = self
            .user_repo
            .find_by_email(email)
            .await?
            .ok_or_else(|| AppError::Ledger(LedgerError::UserNotFound(email.to_string())))?;

        Ok(user)
    }
}

/// Amounts are Kwanza with at most 2 decimal places and must be positive.
fn validate_amount(amount: Decimal) -> AppResult<Decimal> {
    if amount <= Decimal::ZERO {
        return Err(AppError::Ledger(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        ))));
    }
    if amount.normalize().scale() > 2 {
        return Err(AppError::Ledger(LedgerError::InvalidAmount(format!(
            "amount {amount} has more than 2 decimal places"
        ))));
    }

    Ok(amount)
}

/// Commission percentages are decimal fractions in [0, 1].
fn validate_percentage(percentage: Option<Decimal>) -> AppResult<Decimal> {
    let percentage = percentage.unwrap_or(Decimal::ZERO);
    if percentage < Decimal::ZERO || percentage > Decimal::ONE {
        return Err(AppError::Ledger(LedgerError::InvalidPercentage(format!(
            "percentage must be within [0, 1], got {percentage}"
        ))));
    }

    Ok(percentage)
}
