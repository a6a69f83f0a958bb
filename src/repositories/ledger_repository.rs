//! Repository for wallet, transaction and commission operations.
//!
//! Every mutating method is one database transaction: wallet rows are locked
//! with `FOR UPDATE` before any read they validate against, preconditions are
//! re-checked against the projected transaction log inside the lock, and all
//! legs of a multi-row effect commit together or not at all.

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Commission, CommissionType, Direction, LedgerTransaction, TransactionStatus, TransactionType,
    Wallet,
};
use crate::projector::{self, BalanceProjection};
use rust_decimal::{Decimal, RoundingStrategy};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::warn;
use uuid::Uuid;

const WALLET_COLUMNS: &str = "id, user_id, available_balance, blocked_balance, \
     total_earned, total_spent, total_withdrawn, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, wallet_id, transaction_type, direction, amount, status, \
     description, related_user_id, reference_id, idempotency_key, metadata, \
     created_at, completed_at";

const COMMISSION_COLUMNS: &str =
    "id, transaction_id, recipient_user_id, amount, percentage, commission_type, created_at";

/// Result of a single-wallet money operation.
#[derive(Debug, Clone)]
pub struct OperationOutcome {
    pub transaction: LedgerTransaction,
    pub wallet: Wallet,
}

/// Result of releasing blocked funds.
#[derive(Debug, Clone)]
pub struct ReleaseOutcome {
    /// The original hold, now completed.
    pub released: LedgerTransaction,
    /// The seller's sale_receipt credit. Absent only when a 100% commission
    /// leaves the seller with nothing.
    pub seller_credit: Option<LedgerTransaction>,
    /// Present when a commission percentage was applied.
    pub commission: Option<Commission>,
}

/// Read-only view composed for display.
#[derive(Debug, Clone)]
pub struct WalletSnapshot {
    pub wallet: Wallet,
    pub transactions: Vec<LedgerTransaction>,
    pub commissions: Vec<Commission>,
}

pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Wallet operations
    // =========================================================================

    /// Get or create a user's wallet.
    ///
    /// Safe under concurrent first access: the insert is an upsert keyed on
    /// the user id, so two racing callers converge on the same row.
    pub async fn get_or_create_wallet(&self, user_id: Uuid) -> LedgerResult<Wallet> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            r#"
            INSERT INTO wallets (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO UPDATE SET updated_at = NOW()
            RETURNING {WALLET_COLUMNS}
            "#
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(wallet)
    }

    /// Get a user's wallet without creating one.
    pub async fn find_wallet_by_user(&self, user_id: Uuid) -> LedgerResult<Option<Wallet>> {
        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            r#"
            SELECT {WALLET_COLUMNS}
            FROM wallets
            WHERE user_id = $1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(wallet)
    }

    /// Project a wallet's balance from its transaction log.
    pub async fn project_balance(&self, wallet_id: Uuid) -> LedgerResult<BalanceProjection> {
        let entries = sqlx::query_as::<_, LedgerTransaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE wallet_id = $1
            ORDER BY created_at
            "#
        ))
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(projector::project(&entries))
    }

    /// Compose the wallet, recent transactions and recent commissions in one
    /// repeatable-read transaction so the view is a consistent snapshot.
    pub async fn snapshot(&self, user_id: Uuid, limit: i64) -> LedgerResult<Option<WalletSnapshot>> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        let wallet = sqlx::query_as::<_, Wallet>(&format!(
            r#"
            SELECT {WALLET_COLUMNS}
            FROM wallets
            WHERE user_id = $1
            "#
        ))
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        let wallet = match wallet {
            Some(wallet) => wallet,
            None => return Ok(None),
        };

        let transactions = sqlx::query_as::<_, LedgerTransaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE wallet_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(wallet.id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let commissions = sqlx::query_as::<_, Commission>(&format!(
            r#"
            SELECT {COMMISSION_COLUMNS}
            FROM commissions
            WHERE recipient_user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(WalletSnapshot {
            wallet,
            transactions,
            commissions,
        }))
    }

    // =========================================================================
    // Transaction log
    // =========================================================================

    /// Get transaction history for a wallet, newest first.
    pub async fn transaction_history(
        &self,
        wallet_id: Uuid,
        limit: i64,
    ) -> LedgerResult<Vec<LedgerTransaction>> {
        let transactions = sqlx::query_as::<_, LedgerTransaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE wallet_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(wallet_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(transactions)
    }

    pub async fn find_transaction(&self, id: Uuid) -> LedgerResult<Option<LedgerTransaction>> {
        let transaction = sqlx::query_as::<_, LedgerTransaction>(&format!(
            r#"
            SELECT {TRANSACTION_COLUMNS}
            FROM transactions
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(transaction)
    }

    /// Append a transaction row and apply its balance effect in one unit.
    ///
    /// This is the storage-contract primitive; the money operations below are
    /// built from the same pieces. Fails with `InvalidAmount` before any
    /// write if the amount is not positive.
    #[allow(clippy::too_many_arguments)]
    pub async fn append_transaction(
        &self,
        user_id: Uuid,
        tx_type: TransactionType,
        direction: Direction,
        amount: Decimal,
        status: TransactionStatus,
        description: Option<&str>,
        related_user_id: Option<Uuid>,
        reference_id: Option<&str>,
    ) -> LedgerResult<LedgerTransaction> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "amount must be positive, got {amount}"
            )));
        }

        let mut tx = self.pool.begin().await?;

        ensure_wallet(&mut tx, user_id).await?;
        let wallet = lock_wallet_by_user(&mut tx, user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;

        // Debits and holds must clear the projected available balance
        if direction == Direction::Debit || status == TransactionStatus::Blocked {
            let projection = project_locked(&mut tx, &wallet).await?;
            if projection.available < amount {
                return Err(LedgerError::InsufficientFunds {
                    available: projection.available,
                    requested: amount,
                });
            }
        }

        let entry = insert_entry(
            &mut tx,
            wallet.id,
            tx_type,
            direction,
            amount,
            status,
            description,
            related_user_id,
            reference_id,
            None,
            None,
        )
        .await?;

        apply_entry_effect(&mut tx, wallet.id, &entry).await?;

        tx.commit().await?;

        Ok(entry)
    }

    /// Conditionally move a transaction along the status state machine.
    ///
    /// Compare-and-swap on the current status: a concurrent writer that got
    /// there first makes this fail with `StatusConflict` and no effect.
    pub async fn update_transaction_status(
        &self,
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    ) -> LedgerResult<LedgerTransaction> {
        if !from.can_transition_to(to) {
            return Err(LedgerError::StatusConflict {
                transaction_id,
                detail: format!("transition {} -> {} is not allowed", from.as_str(), to.as_str()),
            });
        }

        let mut tx = self.pool.begin().await?;

        let entry = lock_transaction(&mut tx, transaction_id)
            .await?
            .ok_or_else(|| LedgerError::StatusConflict {
                transaction_id,
                detail: "transaction does not exist".to_string(),
            })?;

        lock_wallet_by_id(&mut tx, entry.wallet_id).await?;

        let updated = cas_status(&mut tx, transaction_id, from, to).await?;
        apply_transition_effect(&mut tx, &entry, from, to).await?;

        tx.commit().await?;

        Ok(updated)
    }

    // =========================================================================
    // Commissions
    // =========================================================================

    /// Record a commission derived from a transaction. At most one per
    /// (transaction, recipient) pair.
    pub async fn record_commission(
        &self,
        transaction_id: Uuid,
        recipient_user_id: Uuid,
        amount: Decimal,
        percentage: Decimal,
        commission_type: CommissionType,
    ) -> LedgerResult<Commission> {
        let mut tx = self.pool.begin().await?;
        let commission = insert_commission(
            &mut tx,
            transaction_id,
            recipient_user_id,
            amount,
            percentage,
            commission_type,
        )
        .await?;
        tx.commit().await?;

        Ok(commission)
    }

    /// Commissions credited to a user, newest first.
    pub async fn commissions_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> LedgerResult<Vec<Commission>> {
        let commissions = sqlx::query_as::<_, Commission>(&format!(
            r#"
            SELECT {COMMISSION_COLUMNS}
            FROM commissions
            WHERE recipient_user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(commissions)
    }

    // =========================================================================
    // Money operations
    // =========================================================================

    /// Credit external money into a user's wallet.
    pub async fn deposit(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> LedgerResult<OperationOutcome> {
        let mut tx = self.pool.begin().await?;

        ensure_wallet(&mut tx, user_id).await?;
        let wallet = lock_wallet_by_user(&mut tx, user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = find_by_idempotency_key(&mut tx, wallet.id, key).await? {
                tx.commit().await?;
                return Ok(OperationOutcome {
                    transaction: existing,
                    wallet,
                });
            }
        }

        let entry = insert_entry(
            &mut tx,
            wallet.id,
            TransactionType::Deposit,
            Direction::Credit,
            amount,
            TransactionStatus::Completed,
            description,
            None,
            None,
            idempotency_key,
            None,
        )
        .await?;

        let wallet = credit_wallet(&mut tx, wallet.id, amount).await?;

        tx.commit().await?;

        Ok(OperationOutcome {
            transaction: entry,
            wallet,
        })
    }

    /// Move funds between two wallets atomically.
    ///
    /// Both legs are written in one transaction; wallet rows are locked in
    /// wallet-id order so two transfers in opposite directions cannot
    /// deadlock.
    pub async fn transfer(
        &self,
        from_user_id: Uuid,
        to_user_id: Uuid,
        amount: Decimal,
        description: Option<&str>,
        idempotency_key: Option<&str>,
    ) -> LedgerResult<OperationOutcome> {
        let mut tx = self.pool.begin().await?;

        ensure_wallet(&mut tx, from_user_id).await?;
        ensure_wallet(&mut tx, to_user_id).await?;

        let wallets = lock_wallets_by_users(&mut tx, &[from_user_id, to_user_id]).await?;
        let source = wallets
            .iter()
            .find(|w| w.user_id == from_user_id)
            .cloned()
            .ok_or_else(|| LedgerError::UserNotFound(from_user_id.to_string()))?;
        let destination = wallets
            .iter()
            .find(|w| w.user_id == to_user_id)
            .cloned()
            .ok_or_else(|| LedgerError::UserNotFound(to_user_id.to_string()))?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = find_by_idempotency_key(&mut tx, source.id, key).await? {
                tx.commit().await?;
                return Ok(OperationOutcome {
                    transaction: existing,
                    wallet: source,
                });
            }
        }

        let projection = project_locked(&mut tx, &source).await?;
        if projection.available < amount {
            return Err(LedgerError::InsufficientFunds {
                available: projection.available,
                requested: amount,
            });
        }

        let debit = insert_entry(
            &mut tx,
            source.id,
            TransactionType::InternalTransfer,
            Direction::Debit,
            amount,
            TransactionStatus::Completed,
            description,
            Some(to_user_id),
            None,
            idempotency_key,
            None,
        )
        .await?;

        insert_entry(
            &mut tx,
            destination.id,
            TransactionType::InternalTransfer,
            Direction::Credit,
            amount,
            TransactionStatus::Completed,
            description,
            Some(from_user_id),
            None,
            None,
            None,
        )
        .await?;

        let source = debit_wallet(&mut tx, source.id, amount, false).await?;
        credit_wallet(&mut tx, destination.id, amount).await?;

        tx.commit().await?;

        Ok(OperationOutcome {
            transaction: debit,
            wallet: source,
        })
    }

    /// Hold funds against an order without crediting anyone yet.
    pub async fn block_funds(
        &self,
        user_id: Uuid,
        amount: Decimal,
        reference_id: &str,
        description: Option<&str>,
    ) -> LedgerResult<OperationOutcome> {
        let mut tx = self.pool.begin().await?;

        ensure_wallet(&mut tx, user_id).await?;
        let wallet = lock_wallet_by_user(&mut tx, user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;

        let projection = project_locked(&mut tx, &wallet).await?;
        if projection.available < amount {
            return Err(LedgerError::InsufficientFunds {
                available: projection.available,
                requested: amount,
            });
        }

        let entry = insert_entry(
            &mut tx,
            wallet.id,
            TransactionType::PurchasePayment,
            Direction::Debit,
            amount,
            TransactionStatus::Blocked,
            description,
            None,
            Some(reference_id),
            None,
            None,
        )
        .await?;

        let wallet = hold_wallet_funds(&mut tx, wallet.id, amount).await?;

        tx.commit().await?;

        Ok(OperationOutcome {
            transaction: entry,
            wallet,
        })
    }

    /// Settle previously blocked funds to a seller, minus an optional
    /// commission credited to the platform account.
    ///
    /// The whole effect is one atomic unit: the hold completes, the seller is
    /// credited with the complement of the commission, and the commission row
    /// plus its platform credit are written together with it.
    pub async fn release_funds(
        &self,
        transaction_id: Uuid,
        seller_user_id: Uuid,
        platform_user_id: Uuid,
        commission_percentage: Decimal,
    ) -> LedgerResult<ReleaseOutcome> {
        let mut tx = self.pool.begin().await?;

        let blocked = lock_transaction(&mut tx, transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotBlocked(transaction_id))?;

        if blocked.tx_status() != Some(TransactionStatus::Blocked) {
            return Err(LedgerError::TransactionNotBlocked(transaction_id));
        }

        ensure_wallet(&mut tx, seller_user_id).await?;
        if commission_percentage > Decimal::ZERO {
            ensure_wallet(&mut tx, platform_user_id).await?;
        }

        // One ordered statement locks buyer, seller and platform wallets in
        // wallet-id order, the same global order every multi-wallet operation
        // uses
        let mut counterparties = vec![seller_user_id];
        if commission_percentage > Decimal::ZERO && platform_user_id != seller_user_id {
            counterparties.push(platform_user_id);
        }
        let wallets =
            lock_wallets_for_release(&mut tx, blocked.wallet_id, &counterparties).await?;
        let buyer_wallet = wallets
            .iter()
            .find(|w| w.id == blocked.wallet_id)
            .cloned()
            .ok_or_else(|| LedgerError::UserNotFound(blocked.wallet_id.to_string()))?;
        let seller_wallet = wallets
            .iter()
            .find(|w| w.user_id == seller_user_id)
            .cloned()
            .ok_or_else(|| LedgerError::UserNotFound(seller_user_id.to_string()))?;

        let commission_amount = split_commission(blocked.amount, commission_percentage);
        let seller_amount = blocked.amount - commission_amount;

        // Settle the hold: blocked -> completed, held funds become spent
        let released = cas_status(
            &mut tx,
            transaction_id,
            TransactionStatus::Blocked,
            TransactionStatus::Completed,
        )
        .await
        .map_err(|err| match err {
            LedgerError::StatusConflict { .. } => {
                LedgerError::TransactionNotBlocked(transaction_id)
            }
            other => other,
        })?;
        settle_held_funds(&mut tx, buyer_wallet.id, blocked.amount, false).await?;

        // Credit the seller with the complement of the commission. A 100%
        // commission leaves nothing to credit; the schema rejects zero-amount
        // entries
        let seller_credit = if seller_amount > Decimal::ZERO {
            let credit = insert_entry(
                &mut tx,
                seller_wallet.id,
                TransactionType::SaleReceipt,
                Direction::Credit,
                seller_amount,
                TransactionStatus::Completed,
                blocked.description.as_deref(),
                Some(buyer_wallet.user_id),
                blocked.reference_id.as_deref(),
                None,
                None,
            )
            .await?;
            credit_wallet(&mut tx, seller_wallet.id, seller_amount).await?;
            Some(credit)
        } else {
            None
        };

        let commission = if commission_percentage > Decimal::ZERO {
            let commission = insert_commission(
                &mut tx,
                transaction_id,
                platform_user_id,
                commission_amount,
                commission_percentage,
                CommissionType::PlatformFee,
            )
            .await
            .map_err(|err| match err {
                LedgerError::DuplicateCommission { .. } => LedgerError::DuplicateCommission {
                    transaction_id,
                },
                other => other,
            })?;

            // Rounding can leave a zero commission on tiny amounts; the row
            // is still recorded but there is nothing to credit
            if commission_amount > Decimal::ZERO {
                let platform_wallet = wallets
                    .iter()
                    .find(|w| w.user_id == platform_user_id)
                    .cloned()
                    .or_else(|| {
                        (platform_user_id == seller_user_id).then(|| seller_wallet.clone())
                    })
                    .ok_or_else(|| LedgerError::UserNotFound(platform_user_id.to_string()))?;

                insert_entry(
                    &mut tx,
                    platform_wallet.id,
                    TransactionType::Commission,
                    Direction::Credit,
                    commission_amount,
                    TransactionStatus::Completed,
                    Some("Platform commission"),
                    Some(buyer_wallet.user_id),
                    blocked.reference_id.as_deref(),
                    None,
                    None,
                )
                .await?;
                credit_wallet(&mut tx, platform_wallet.id, commission_amount).await?;
            }

            Some(commission)
        } else {
            None
        };

        tx.commit().await?;

        Ok(ReleaseOutcome {
            released,
            seller_credit,
            commission,
        })
    }

    /// Hold funds for a bank withdrawal pending off-platform confirmation.
    pub async fn request_withdrawal(
        &self,
        user_id: Uuid,
        amount: Decimal,
        description: Option<&str>,
    ) -> LedgerResult<OperationOutcome> {
        let mut tx = self.pool.begin().await?;

        ensure_wallet(&mut tx, user_id).await?;
        let wallet = lock_wallet_by_user(&mut tx, user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.to_string()))?;

        let projection = project_locked(&mut tx, &wallet).await?;
        if projection.available < amount {
            return Err(LedgerError::InsufficientFunds {
                available: projection.available,
                requested: amount,
            });
        }

        let entry = insert_entry(
            &mut tx,
            wallet.id,
            TransactionType::BankWithdrawal,
            Direction::Debit,
            amount,
            TransactionStatus::Pending,
            description,
            None,
            None,
            None,
            None,
        )
        .await?;

        let wallet = hold_wallet_funds(&mut tx, wallet.id, amount).await?;

        tx.commit().await?;

        Ok(OperationOutcome {
            transaction: entry,
            wallet,
        })
    }

    /// Confirm or cancel a pending bank withdrawal.
    pub async fn settle_withdrawal(
        &self,
        transaction_id: Uuid,
        success: bool,
    ) -> LedgerResult<LedgerTransaction> {
        let mut tx = self.pool.begin().await?;

        let pending = lock_transaction(&mut tx, transaction_id)
            .await?
            .ok_or_else(|| LedgerError::StatusConflict {
                transaction_id,
                detail: "transaction does not exist".to_string(),
            })?;

        if pending.tx_type() != Some(TransactionType::BankWithdrawal) {
            return Err(LedgerError::StatusConflict {
                transaction_id,
                detail: "transaction is not a bank withdrawal".to_string(),
            });
        }

        lock_wallet_by_id(&mut tx, pending.wallet_id).await?;

        let to = if success {
            TransactionStatus::Completed
        } else {
            TransactionStatus::Cancelled
        };
        let updated = cas_status(&mut tx, transaction_id, TransactionStatus::Pending, to).await?;

        if success {
            settle_held_funds(&mut tx, pending.wallet_id, pending.amount, true).await?;
        } else {
            release_held_funds(&mut tx, pending.wallet_id, pending.amount).await?;
        }

        tx.commit().await?;

        Ok(updated)
    }
}

/// Commission split with bankers' rounding at 2 decimal places. The seller
/// receives the exact complement, so the two parts always sum to the
/// original amount.
pub fn split_commission(amount: Decimal, percentage: Decimal) -> Decimal {
    (amount * percentage).round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

// =============================================================================
// Transaction-scoped helpers
// =============================================================================

async fn ensure_wallet(tx: &mut Transaction<'_, Postgres>, user_id: Uuid) -> LedgerResult<()> {
    sqlx::query(
        r#"
        INSERT INTO wallets (user_id)
        VALUES ($1)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn lock_wallet_by_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> LedgerResult<Option<Wallet>> {
    let wallet = sqlx::query_as::<_, Wallet>(&format!(
        r#"
        SELECT {WALLET_COLUMNS}
        FROM wallets
        WHERE user_id = $1
        FOR UPDATE
        "#
    ))
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(wallet)
}

async fn lock_wallet_by_id(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
) -> LedgerResult<Option<Wallet>> {
    let wallet = sqlx::query_as::<_, Wallet>(&format!(
        r#"
        SELECT {WALLET_COLUMNS}
        FROM wallets
        WHERE id = $1
        FOR UPDATE
        "#
    ))
    .bind(wallet_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(wallet)
}

/// Lock several wallets in wallet-id order to keep lock acquisition
/// deadlock-free across concurrent multi-wallet operations.
async fn lock_wallets_by_users(
    tx: &mut Transaction<'_, Postgres>,
    user_ids: &[Uuid],
) -> LedgerResult<Vec<Wallet>> {
    let wallets = sqlx::query_as::<_, Wallet>(&format!(
        r#"
        SELECT {WALLET_COLUMNS}
        FROM wallets
        WHERE user_id = ANY($1)
        ORDER BY id
        FOR UPDATE
        "#
    ))
    .bind(user_ids.to_vec())
    .fetch_all(&mut **tx)
    .await?;

    Ok(wallets)
}

/// Same ordering discipline for the release path, which addresses the buyer
/// by wallet id and the counterparties by user id.
async fn lock_wallets_for_release(
    tx: &mut Transaction<'_, Postgres>,
    buyer_wallet_id: Uuid,
    counterparty_user_ids: &[Uuid],
) -> LedgerResult<Vec<Wallet>> {
    let wallets = sqlx::query_as::<_, Wallet>(&format!(
        r#"
        SELECT {WALLET_COLUMNS}
        FROM wallets
        WHERE id = $1 OR user_id = ANY($2)
        ORDER BY id
        FOR UPDATE
        "#
    ))
    .bind(buyer_wallet_id)
    .bind(counterparty_user_ids.to_vec())
    .fetch_all(&mut **tx)
    .await?;

    Ok(wallets)
}

async fn lock_transaction(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
) -> LedgerResult<Option<LedgerTransaction>> {
    let entry = sqlx::query_as::<_, LedgerTransaction>(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM transactions
        WHERE id = $1
        FOR UPDATE
        "#
    ))
    .bind(transaction_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(entry)
}

/// Re-project the wallet's balance from its log inside the current lock.
/// The cached columns are cross-checked but never trusted for preconditions.
async fn project_locked(
    tx: &mut Transaction<'_, Postgres>,
    wallet: &Wallet,
) -> LedgerResult<BalanceProjection> {
    let entries = sqlx::query_as::<_, LedgerTransaction>(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM transactions
        WHERE wallet_id = $1
        ORDER BY created_at
        "#
    ))
    .bind(wallet.id)
    .fetch_all(&mut **tx)
    .await?;

    let projection = projector::project(&entries);

    if projection.available != wallet.available_balance
        || projection.blocked != wallet.blocked_balance
    {
        warn!(
            wallet_id = %wallet.id,
            projected_available = %projection.available,
            cached_available = %wallet.available_balance,
            "wallet cache disagrees with projected balance; trusting the projection"
        );
    }

    Ok(projection)
}

async fn find_by_idempotency_key(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
    key: &str,
) -> LedgerResult<Option<LedgerTransaction>> {
    let entry = sqlx::query_as::<_, LedgerTransaction>(&format!(
        r#"
        SELECT {TRANSACTION_COLUMNS}
        FROM transactions
        WHERE wallet_id = $1 AND idempotency_key = $2
        "#
    ))
    .bind(wallet_id)
    .bind(key)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(entry)
}

#[allow(clippy::too_many_arguments)]
async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
    tx_type: TransactionType,
    direction: Direction,
    amount: Decimal,
    status: TransactionStatus,
    description: Option<&str>,
    related_user_id: Option<Uuid>,
    reference_id: Option<&str>,
    idempotency_key: Option<&str>,
    metadata: Option<serde_json::Value>,
) -> LedgerResult<LedgerTransaction> {
    let completed_at = (status == TransactionStatus::Completed)
        .then(|| chrono::Utc::now().naive_utc());

    let entry = sqlx::query_as::<_, LedgerTransaction>(&format!(
        r#"
        INSERT INTO transactions
        (wallet_id, transaction_type, direction, amount, status, description,
         related_user_id, reference_id, idempotency_key, metadata, completed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(wallet_id)
    .bind(tx_type.as_str())
    .bind(direction.as_str())
    .bind(amount)
    .bind(status.as_str())
    .bind(description)
    .bind(related_user_id)
    .bind(reference_id)
    .bind(idempotency_key)
    .bind(metadata)
    .bind(completed_at)
    .fetch_one(&mut **tx)
    .await?;

    Ok(entry)
}

async fn insert_commission(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
    recipient_user_id: Uuid,
    amount: Decimal,
    percentage: Decimal,
    commission_type: CommissionType,
) -> LedgerResult<Commission> {
    let commission = sqlx::query_as::<_, Commission>(&format!(
        r#"
        INSERT INTO commissions
        (transaction_id, recipient_user_id, amount, percentage, commission_type)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {COMMISSION_COLUMNS}
        "#
    ))
    .bind(transaction_id)
    .bind(recipient_user_id)
    .bind(amount)
    .bind(percentage)
    .bind(commission_type.as_str())
    .fetch_one(&mut **tx)
    .await
    .map_err(|err| match LedgerError::from(err) {
        LedgerError::DuplicateCommission { .. } => {
            LedgerError::DuplicateCommission { transaction_id }
        }
        other => other,
    })?;

    Ok(commission)
}

/// Compare-and-swap the status column; zero rows affected means a concurrent
/// writer got there first.
async fn cas_status(
    tx: &mut Transaction<'_, Postgres>,
    transaction_id: Uuid,
    from: TransactionStatus,
    to: TransactionStatus,
) -> LedgerResult<LedgerTransaction> {
    let completed_at_update = if to == TransactionStatus::Completed {
        ", completed_at = NOW()"
    } else {
        ""
    };

    let updated = sqlx::query_as::<_, LedgerTransaction>(&format!(
        r#"
        UPDATE transactions
        SET status = $3{completed_at_update}
        WHERE id = $1 AND status = $2
        RETURNING {TRANSACTION_COLUMNS}
        "#
    ))
    .bind(transaction_id)
    .bind(from.as_str())
    .bind(to.as_str())
    .fetch_optional(&mut **tx)
    .await?;

    updated.ok_or_else(|| LedgerError::StatusConflict {
        transaction_id,
        detail: format!("expected status {}", from.as_str()),
    })
}

/// available += amount, earned += amount
async fn credit_wallet(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
    amount: Decimal,
) -> LedgerResult<Wallet> {
    let wallet = sqlx::query_as::<_, Wallet>(&format!(
        r#"
        UPDATE wallets
        SET available_balance = available_balance + $2,
            total_earned = total_earned + $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {WALLET_COLUMNS}
        "#
    ))
    .bind(wallet_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;

    Ok(wallet)
}

/// available -= amount, spent/withdrawn += amount
async fn debit_wallet(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
    amount: Decimal,
    withdrawal: bool,
) -> LedgerResult<Wallet> {
    let counter = if withdrawal { "total_withdrawn" } else { "total_spent" };

    let wallet = sqlx::query_as::<_, Wallet>(&format!(
        r#"
        UPDATE wallets
        SET available_balance = available_balance - $2,
            {counter} = {counter} + $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {WALLET_COLUMNS}
        "#
    ))
    .bind(wallet_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;

    Ok(wallet)
}

/// available -= amount, blocked += amount
async fn hold_wallet_funds(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
    amount: Decimal,
) -> LedgerResult<Wallet> {
    let wallet = sqlx::query_as::<_, Wallet>(&format!(
        r#"
        UPDATE wallets
        SET available_balance = available_balance - $2,
            blocked_balance = blocked_balance + $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {WALLET_COLUMNS}
        "#
    ))
    .bind(wallet_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;

    Ok(wallet)
}

/// blocked -= amount, spent/withdrawn += amount
async fn settle_held_funds(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
    amount: Decimal,
    withdrawal: bool,
) -> LedgerResult<Wallet> {
    let counter = if withdrawal { "total_withdrawn" } else { "total_spent" };

    let wallet = sqlx::query_as::<_, Wallet>(&format!(
        r#"
        UPDATE wallets
        SET blocked_balance = blocked_balance - $2,
            {counter} = {counter} + $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {WALLET_COLUMNS}
        "#
    ))
    .bind(wallet_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;

    Ok(wallet)
}

/// blocked -= amount, available += amount
async fn release_held_funds(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
    amount: Decimal,
) -> LedgerResult<Wallet> {
    let wallet = sqlx::query_as::<_, Wallet>(&format!(
        r#"
        UPDATE wallets
        SET blocked_balance = blocked_balance - $2,
            available_balance = available_balance + $2,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {WALLET_COLUMNS}
        "#
    ))
    .bind(wallet_id)
    .bind(amount)
    .fetch_one(&mut **tx)
    .await?;

    Ok(wallet)
}

/// Apply the balance effect of a freshly appended entry.
async fn apply_entry_effect(
    tx: &mut Transaction<'_, Postgres>,
    wallet_id: Uuid,
    entry: &LedgerTransaction,
) -> LedgerResult<()> {
    let withdrawal = entry.tx_type() == Some(TransactionType::BankWithdrawal);

    match (entry.tx_status(), entry.tx_direction()) {
        (Some(TransactionStatus::Completed), Some(Direction::Credit)) => {
            credit_wallet(tx, wallet_id, entry.amount).await?;
        }
        (Some(TransactionStatus::Completed), Some(Direction::Debit)) => {
            debit_wallet(tx, wallet_id, entry.amount, withdrawal).await?;
        }
        (Some(TransactionStatus::Blocked), _)
        | (Some(TransactionStatus::Pending), Some(Direction::Debit)) => {
            hold_wallet_funds(tx, wallet_id, entry.amount).await?;
        }
        _ => {}
    }

    Ok(())
}

/// Apply the balance effect of a status transition on an existing entry.
async fn apply_transition_effect(
    tx: &mut Transaction<'_, Postgres>,
    entry: &LedgerTransaction,
    from: TransactionStatus,
    to: TransactionStatus,
) -> LedgerResult<()> {
    let withdrawal = entry.tx_type() == Some(TransactionType::BankWithdrawal);
    let held = matches!(from, TransactionStatus::Blocked)
        || (from == TransactionStatus::Pending && entry.tx_direction() == Some(Direction::Debit));

    match to {
        TransactionStatus::Completed if held => {
            settle_held_funds(tx, entry.wallet_id, entry.amount, withdrawal).await?;
        }
        TransactionStatus::Completed => {
            // pending credit becoming effective
            credit_wallet(tx, entry.wallet_id, entry.amount).await?;
        }
        TransactionStatus::Cancelled if held => {
            release_held_funds(tx, entry.wallet_id, entry.amount).await?;
        }
        // cancelled pending credits and disputes do not move funds
        _ => {}
    }

    Ok(())
}
