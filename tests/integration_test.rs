mod helpers;

use helpers::*;
use orbis_ledger::error::{AppError, LedgerError};
use orbis_ledger::models::*;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

async fn transaction_count(pool: &PgPool) -> i64 {
    sqlx::query("SELECT COUNT(*) FROM transactions")
        .fetch_one(pool)
        .await
        .expect("Count query failed")
        .get(0)
}

// ============================================================================
// Deposit
// ============================================================================

#[sqlx::test]
async fn test_deposit_credits_wallet(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    let outcome = deposit(&db, "ana@orbislink.test", 10_000).await;

    assert_eq!(outcome.transaction.transaction_type, "deposit");
    assert_eq!(outcome.transaction.direction, "credit");
    assert_eq!(outcome.transaction.status, "completed");
    assert!(outcome.transaction.completed_at.is_some());
    assert_eq!(outcome.wallet.available_balance, kz(10_000));
    assert_eq!(outcome.wallet.total_earned, kz(10_000));

    let projection = db
        .service
        .balance("ana@orbislink.test")
        .await
        .expect("Failed to project balance");
    assert_eq!(projection.available, kz(10_000));
    assert_eq!(projection.blocked, Decimal::ZERO);
}

#[sqlx::test]
async fn test_deposit_rejects_invalid_amounts(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    for amount in [Decimal::ZERO, kz(-50), Decimal::new(10_005, 3)] {
        let result = db
            .service
            .deposit("ana@orbislink.test", amount, None, None)
            .await;
        assert!(matches!(
            result,
            Err(AppError::Ledger(LedgerError::InvalidAmount(_)))
        ));
    }

    // Validation rejects before any write
    assert_eq!(transaction_count(&db.pool).await, 0);
}

#[sqlx::test]
async fn test_deposit_replay_with_idempotency_key(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    let first = db
        .service
        .deposit("ana@orbislink.test", kz(500), None, Some("dep-1"))
        .await
        .expect("First deposit failed");

    let replay = db
        .service
        .deposit("ana@orbislink.test", kz(500), None, Some("dep-1"))
        .await
        .expect("Replay failed");

    // Same transaction, no double credit
    assert_eq!(first.transaction.id, replay.transaction.id);
    let projection = db
        .service
        .balance("ana@orbislink.test")
        .await
        .expect("Failed to project balance");
    assert_eq!(projection.available, kz(500));
}

// ============================================================================
// Internal transfer
// ============================================================================

#[sqlx::test]
async fn test_transfer_moves_funds_atomically(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "ana@orbislink.test").await;
    create_test_user(&db, "joao@orbislink.test").await;
    deposit(&db, "ana@orbislink.test", 1_000).await;

    let outcome = db
        .service
        .transfer(
            "ana@orbislink.test",
            "joao@orbislink.test",
            kz(250),
            Some("payment for seeds"),
            None,
        )
        .await
        .expect("Transfer failed");

    // The returned transaction is the debit leg
    assert_eq!(outcome.transaction.transaction_type, "internal_transfer");
    assert_eq!(outcome.transaction.direction, "debit");
    assert_eq!(outcome.wallet.available_balance, kz(750));

    let ana = db.service.balance("ana@orbislink.test").await.unwrap();
    let joao = db.service.balance("joao@orbislink.test").await.unwrap();
    assert_eq!(ana.available, kz(750));
    assert_eq!(ana.total_spent, kz(250));
    assert_eq!(joao.available, kz(250));
    assert_eq!(joao.total_earned, kz(250));

    // Both legs exist and reference the counterpart user
    let legs: i64 =
        sqlx::query("SELECT COUNT(*) FROM transactions WHERE transaction_type = 'internal_transfer'")
            .fetch_one(&db.pool)
            .await
            .unwrap()
            .get(0);
    assert_eq!(legs, 2);

    let joao_user = db
        .user_repo
        .find_by_email("joao@orbislink.test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.transaction.related_user_id, Some(joao_user.id));
}

#[sqlx::test]
async fn test_transfer_insufficient_funds_leaves_no_trace(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "ana@orbislink.test").await;
    create_test_user(&db, "joao@orbislink.test").await;
    deposit(&db, "ana@orbislink.test", 500).await;

    let before = transaction_count(&db.pool).await;

    let result = db
        .service
        .transfer("ana@orbislink.test", "joao@orbislink.test", kz(600), None, None)
        .await;

    assert!(matches!(
        result,
        Err(AppError::Ledger(LedgerError::InsufficientFunds { .. }))
    ));

    // Neither leg was written, both balances unchanged
    assert_eq!(transaction_count(&db.pool).await, before);
    let ana = db.service.balance("ana@orbislink.test").await.unwrap();
    let joao = db.service.balance("joao@orbislink.test").await.unwrap();
    assert_eq!(ana.available, kz(500));
    assert_eq!(joao.available, Decimal::ZERO);
}

#[sqlx::test]
async fn test_transfer_rejects_self_and_unknown_counterparty(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "ana@orbislink.test").await;
    deposit(&db, "ana@orbislink.test", 500).await;

    let to_self = db
        .service
        .transfer("ana@orbislink.test", "ana@orbislink.test", kz(100), None, None)
        .await;
    assert!(matches!(to_self, Err(AppError::Validation(_))));

    let to_ghost = db
        .service
        .transfer("ana@orbislink.test", "ghost@orbislink.test", kz(100), None, None)
        .await;
    assert!(matches!(
        to_ghost,
        Err(AppError::Ledger(LedgerError::UserNotFound(_)))
    ));
}

// ============================================================================
// Block and release
// ============================================================================

#[sqlx::test]
async fn test_block_funds_holds_without_spending(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "ana@orbislink.test").await;
    deposit(&db, "ana@orbislink.test", 10_000).await;

    let outcome = db
        .service
        .block_funds("ana@orbislink.test", kz(4_000), "order-1", None)
        .await
        .expect("Block failed");

    assert_eq!(outcome.transaction.status, "blocked");
    assert_eq!(outcome.transaction.reference_id.as_deref(), Some("order-1"));

    let ana = db.service.balance("ana@orbislink.test").await.unwrap();
    assert_eq!(ana.available, kz(6_000));
    assert_eq!(ana.blocked, kz(4_000));
    // Held, not yet spent
    assert_eq!(ana.total_spent, Decimal::ZERO);
    assert_eq!(ana.total_earned, kz(10_000));
}

#[sqlx::test]
async fn test_block_funds_insufficient_available(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "ana@orbislink.test").await;
    deposit(&db, "ana@orbislink.test", 1_000).await;
    db.service
        .block_funds("ana@orbislink.test", kz(800), "order-1", None)
        .await
        .expect("First block failed");

    // 200 available left; holding another 300 must fail with no new rows
    let before = transaction_count(&db.pool).await;
    let result = db
        .service
        .block_funds("ana@orbislink.test", kz(300), "order-2", None)
        .await;

    assert!(matches!(
        result,
        Err(AppError::Ledger(LedgerError::InsufficientFunds { .. }))
    ));
    assert_eq!(transaction_count(&db.pool).await, before);
}

#[sqlx::test]
async fn test_release_with_commission_settles_the_order(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "buyer@orbislink.test").await;
    create_test_user(&db, "seller@orbislink.test").await;
    deposit(&db, "buyer@orbislink.test", 10_000).await;

    let hold = db
        .service
        .block_funds("buyer@orbislink.test", kz(4_000), "order-1", None)
        .await
        .expect("Block failed");

    let outcome = db
        .service
        .release_funds(
            hold.transaction.id,
            "seller@orbislink.test",
            Some(Decimal::new(7, 2)), // 7%
        )
        .await
        .expect("Release failed");

    // The hold completed
    assert_eq!(outcome.released.id, hold.transaction.id);
    assert_eq!(outcome.released.status, "completed");

    // Seller receives the complement of the commission
    let seller_credit = outcome.seller_credit.expect("Seller credit should exist");
    assert_eq!(seller_credit.amount, kz(3_720));
    assert_eq!(seller_credit.transaction_type, "sale_receipt");

    // Exactly one commission of amount * pct
    let commission = outcome.commission.expect("Commission should exist");
    assert_eq!(commission.amount, kz(280));
    assert_eq!(commission.percentage, Decimal::new(7, 2));

    let buyer = db.service.balance("buyer@orbislink.test").await.unwrap();
    let seller = db.service.balance("seller@orbislink.test").await.unwrap();
    let platform = db.service.balance(PLATFORM_EMAIL).await.unwrap();

    assert_eq!(buyer.available, kz(6_000));
    assert_eq!(buyer.blocked, Decimal::ZERO);
    assert_eq!(buyer.total_spent, kz(4_000));
    assert_eq!(seller.available, kz(3_720));
    assert_eq!(platform.available, kz(280));
}

#[sqlx::test]
async fn test_release_without_commission(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "buyer@orbislink.test").await;
    create_test_user(&db, "seller@orbislink.test").await;
    deposit(&db, "buyer@orbislink.test", 1_000).await;

    let hold = db
        .service
        .block_funds("buyer@orbislink.test", kz(400), "order-9", None)
        .await
        .expect("Block failed");

    let outcome = db
        .service
        .release_funds(hold.transaction.id, "seller@orbislink.test", None)
        .await
        .expect("Release failed");

    assert!(outcome.commission.is_none());
    let seller_credit = outcome.seller_credit.expect("Seller credit should exist");
    assert_eq!(seller_credit.amount, kz(400));

    let commissions: i64 = sqlx::query("SELECT COUNT(*) FROM commissions")
        .fetch_one(&db.pool)
        .await
        .unwrap()
        .get(0);
    assert_eq!(commissions, 0);
}

#[sqlx::test]
async fn test_release_with_full_commission_credits_only_the_platform(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "buyer@orbislink.test").await;
    create_test_user(&db, "seller@orbislink.test").await;
    deposit(&db, "buyer@orbislink.test", 1_000).await;

    let hold = db
        .service
        .block_funds("buyer@orbislink.test", kz(400), "order-8", None)
        .await
        .expect("Block failed");

    let outcome = db
        .service
        .release_funds(hold.transaction.id, "seller@orbislink.test", Some(Decimal::ONE))
        .await
        .expect("Release failed");

    // Everything went to the platform; the seller has nothing to credit
    assert!(outcome.seller_credit.is_none());
    assert_eq!(outcome.commission.expect("Commission should exist").amount, kz(400));

    let seller = db.service.balance("seller@orbislink.test").await.unwrap();
    let platform = db.service.balance(PLATFORM_EMAIL).await.unwrap();
    assert_eq!(seller.available, Decimal::ZERO);
    assert_eq!(platform.available, kz(400));
}

#[sqlx::test]
async fn test_release_twice_fails_second_time(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "buyer@orbislink.test").await;
    create_test_user(&db, "seller@orbislink.test").await;
    deposit(&db, "buyer@orbislink.test", 1_000).await;

    let hold = db
        .service
        .block_funds("buyer@orbislink.test", kz(400), "order-2", None)
        .await
        .expect("Block failed");

    db.service
        .release_funds(hold.transaction.id, "seller@orbislink.test", None)
        .await
        .expect("First release failed");

    let second = db
        .service
        .release_funds(hold.transaction.id, "seller@orbislink.test", None)
        .await;

    assert!(matches!(
        second,
        Err(AppError::Ledger(LedgerError::TransactionNotBlocked(_)))
    ));

    // The seller was credited exactly once
    let seller = db.service.balance("seller@orbislink.test").await.unwrap();
    assert_eq!(seller.available, kz(400));
}

#[sqlx::test]
async fn test_release_rejects_percentage_outside_unit_interval(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "buyer@orbislink.test").await;
    create_test_user(&db, "seller@orbislink.test").await;
    deposit(&db, "buyer@orbislink.test", 1_000).await;

    let hold = db
        .service
        .block_funds("buyer@orbislink.test", kz(400), "order-3", None)
        .await
        .expect("Block failed");

    let result = db
        .service
        .release_funds(
            hold.transaction.id,
            "seller@orbislink.test",
            Some(Decimal::new(15, 1)), // 1.5
        )
        .await;

    assert!(matches!(
        result,
        Err(AppError::Ledger(LedgerError::InvalidPercentage(_)))
    ));

    // The hold is untouched
    let stored = db
        .ledger_repo
        .find_transaction(hold.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "blocked");
}

#[sqlx::test]
async fn test_release_aborts_entirely_on_duplicate_commission(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "buyer@orbislink.test").await;
    create_test_user(&db, "seller@orbislink.test").await;
    let platform = create_test_user(&db, PLATFORM_EMAIL).await;
    deposit(&db, "buyer@orbislink.test", 1_000).await;

    let hold = db
        .service
        .block_funds("buyer@orbislink.test", kz(400), "order-4", None)
        .await
        .expect("Block failed");

    // A commission already recorded for this (transaction, recipient) pair
    db.ledger_repo
        .record_commission(
            hold.transaction.id,
            platform.id,
            kz(28),
            Decimal::new(7, 2),
            CommissionType::PlatformFee,
        )
        .await
        .expect("Seed commission failed");

    let result = db
        .service
        .release_funds(
            hold.transaction.id,
            "seller@orbislink.test",
            Some(Decimal::new(7, 2)),
        )
        .await;

    assert!(matches!(
        result,
        Err(AppError::Ledger(LedgerError::DuplicateCommission { .. }))
    ));

    // No partial effect: the hold is still blocked and the seller got nothing
    let stored = db
        .ledger_repo
        .find_transaction(hold.transaction.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "blocked");
    let seller = db.service.balance("seller@orbislink.test").await.unwrap();
    assert_eq!(seller.available, Decimal::ZERO);
}

// ============================================================================
// Withdrawals
// ============================================================================

#[sqlx::test]
async fn test_withdrawal_round_trip(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "ana@orbislink.test").await;
    deposit(&db, "ana@orbislink.test", 5_000).await;

    let request = db
        .service
        .request_withdrawal("ana@orbislink.test", kz(2_000), None)
        .await
        .expect("Withdrawal request failed");

    assert_eq!(request.transaction.status, "pending");
    let held = db.service.balance("ana@orbislink.test").await.unwrap();
    assert_eq!(held.available, kz(3_000));
    assert_eq!(held.blocked, kz(2_000));

    let settled = db
        .service
        .settle_withdrawal(request.transaction.id, true)
        .await
        .expect("Settle failed");
    assert_eq!(settled.status, "completed");

    let after = db.service.balance("ana@orbislink.test").await.unwrap();
    assert_eq!(after.available, kz(3_000));
    assert_eq!(after.blocked, Decimal::ZERO);
    assert_eq!(after.total_withdrawn, kz(2_000));
}

#[sqlx::test]
async fn test_cancelled_withdrawal_returns_the_hold(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "ana@orbislink.test").await;
    deposit(&db, "ana@orbislink.test", 5_000).await;

    let request = db
        .service
        .request_withdrawal("ana@orbislink.test", kz(2_000), None)
        .await
        .expect("Withdrawal request failed");

    let settled = db
        .service
        .settle_withdrawal(request.transaction.id, false)
        .await
        .expect("Cancel failed");
    assert_eq!(settled.status, "cancelled");

    let after = db.service.balance("ana@orbislink.test").await.unwrap();
    assert_eq!(after.available, kz(5_000));
    assert_eq!(after.blocked, Decimal::ZERO);
    assert_eq!(after.total_withdrawn, Decimal::ZERO);

    // Settling again conflicts: the status already moved on
    let replay = db.service.settle_withdrawal(request.transaction.id, true).await;
    assert!(matches!(
        replay,
        Err(AppError::Ledger(LedgerError::StatusConflict { .. }))
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[sqlx::test]
async fn test_concurrent_blocks_cannot_overspend(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "ana@orbislink.test").await;
    deposit(&db, "ana@orbislink.test", 1_000).await;

    // Two holds of 600 against 1 000 available: exactly one may win
    let (a, b) = tokio::join!(
        db.service
            .block_funds("ana@orbislink.test", kz(600), "order-a", None),
        db.service
            .block_funds("ana@orbislink.test", kz(600), "order-b", None),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);

    let loser = if a.is_err() { a } else { b };
    assert!(matches!(
        loser,
        Err(AppError::Ledger(LedgerError::InsufficientFunds { .. }))
    ));

    let ana = db.service.balance("ana@orbislink.test").await.unwrap();
    assert_eq!(ana.available, kz(400));
    assert_eq!(ana.blocked, kz(600));
}

#[sqlx::test]
async fn test_concurrent_releases_credit_the_seller_once(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "buyer@orbislink.test").await;
    create_test_user(&db, "seller@orbislink.test").await;
    deposit(&db, "buyer@orbislink.test", 1_000).await;

    let hold = db
        .service
        .block_funds("buyer@orbislink.test", kz(400), "order-5", None)
        .await
        .expect("Block failed");

    let (a, b) = tokio::join!(
        db.service
            .release_funds(hold.transaction.id, "seller@orbislink.test", None),
        db.service
            .release_funds(hold.transaction.id, "seller@orbislink.test", None),
    );

    let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1);

    let seller = db.service.balance("seller@orbislink.test").await.unwrap();
    assert_eq!(seller.available, kz(400));
}

// ============================================================================
// Conservation and snapshot
// ============================================================================

#[sqlx::test]
async fn test_conservation_across_a_settlement_flow(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "buyer@orbislink.test").await;
    create_test_user(&db, "seller@orbislink.test").await;

    // 12 000 enters the system
    deposit(&db, "buyer@orbislink.test", 10_000).await;
    deposit(&db, "seller@orbislink.test", 2_000).await;

    let hold = db
        .service
        .block_funds("buyer@orbislink.test", kz(4_000), "order-1", None)
        .await
        .unwrap();
    db.service
        .release_funds(hold.transaction.id, "seller@orbislink.test", Some(Decimal::new(7, 2)))
        .await
        .unwrap();
    db.service
        .transfer("seller@orbislink.test", "buyer@orbislink.test", kz(300), None, None)
        .await
        .unwrap();

    // 1 500 leaves the system
    let withdrawal = db
        .service
        .request_withdrawal("seller@orbislink.test", kz(1_500), None)
        .await
        .unwrap();
    db.service
        .settle_withdrawal(withdrawal.transaction.id, true)
        .await
        .unwrap();

    let buyer = db.service.balance("buyer@orbislink.test").await.unwrap();
    let seller = db.service.balance("seller@orbislink.test").await.unwrap();
    let platform = db.service.balance(PLATFORM_EMAIL).await.unwrap();

    let total = buyer.available
        + buyer.blocked
        + seller.available
        + seller.blocked
        + platform.available
        + platform.blocked;

    // deposits minus completed withdrawals
    assert_eq!(total, kz(12_000) - kz(1_500));
}

#[sqlx::test]
async fn test_snapshot_composes_wallet_history_and_commissions(pool: PgPool) {
    let db = TestDatabase::from_pool(pool).await;
    db.cleanup().await;

    create_test_user(&db, "buyer@orbislink.test").await;
    create_test_user(&db, "seller@orbislink.test").await;
    deposit(&db, "buyer@orbislink.test", 1_000).await;

    let hold = db
        .service
        .block_funds("buyer@orbislink.test", kz(400), "order-6", None)
        .await
        .unwrap();
    db.service
        .release_funds(hold.transaction.id, "seller@orbislink.test", Some(Decimal::new(10, 2)))
        .await
        .unwrap();

    let buyer_view = db
        .service
        .snapshot("buyer@orbislink.test", None)
        .await
        .expect("Snapshot failed");
    assert_eq!(buyer_view.wallet.available_balance, kz(600));
    // deposit + completed hold
    assert_eq!(buyer_view.transactions.len(), 2);
    assert!(buyer_view.commissions.is_empty());

    let platform_view = db
        .service
        .snapshot(PLATFORM_EMAIL, None)
        .await
        .expect("Snapshot failed");
    assert_eq!(platform_view.commissions.len(), 1);
    assert_eq!(platform_view.commissions[0].amount, kz(40));
    assert_eq!(platform_view.wallet.available_balance, kz(40));

    // The read path never mutates: a fresh user's snapshot is empty
    create_test_user(&db, "nova@orbislink.test").await;
    let empty = db
        .service
        .snapshot("nova@orbislink.test", Some(10))
        .await
        .expect("Snapshot failed");
    assert!(empty.transactions.is_empty());
    assert_eq!(empty.wallet.available_balance, Decimal::ZERO);
}
