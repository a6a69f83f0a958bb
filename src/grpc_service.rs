//! gRPC service implementation for the OrbisLink wallet ledger.
//!
//! This module implements the WalletLedger gRPC handlers using tonic.
//! The proto definitions are compiled at build time via build.rs.

use crate::auth;
use crate::error::{AppError, LedgerError};
use crate::services::LedgerService;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{error, info};
use uuid::Uuid;

// Include the generated proto code
pub mod proto {
    tonic::include_proto!("orbiswallet");

    /// File descriptor set for gRPC reflection
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/wallet_descriptor.bin"));
}

use proto::wallet_ledger_server::{WalletLedger, WalletLedgerServer};
use proto::{
    BalanceRequest, BalanceResponse, BlockFundsRequest, CommissionInfo, DepositRequest,
    ReleaseFundsRequest, ReleaseFundsResponse, SettleWithdrawalRequest, SettleWithdrawalResponse,
    SnapshotRequest, SnapshotResponse, TransactionInfo, TransactionResponse, TransferRequest,
    WalletInfo, WithdrawalRequest,
};

/// gRPC service implementation
pub struct WalletGrpcService {
    ledger: Arc<LedgerService>,
    auth_secret: Option<String>,
}

impl WalletGrpcService {
    /// Create a new gRPC service
    pub fn new(ledger: Arc<LedgerService>, auth_secret: Option<String>) -> Self {
        Self {
            ledger,
            auth_secret,
        }
    }

    /// Create a tonic server for this service
    pub fn into_server(self) -> WalletLedgerServer<Self> {
        WalletLedgerServer::new(self)
    }

    /// Convert AppError to tonic Status
    fn to_status(err: AppError) -> Status {
        match err {
            AppError::Ledger(ledger_err) => match &ledger_err {
                LedgerError::InvalidAmount(msg) => Status::invalid_argument(msg.clone()),
                LedgerError::InvalidPercentage(msg) => Status::invalid_argument(msg.clone()),
                LedgerError::InsufficientFunds { .. } => {
                    Status::failed_precondition(ledger_err.to_string())
                }
                LedgerError::UserNotFound(who) => {
                    Status::not_found(format!("User not found: {}", who))
                }
                LedgerError::TransactionNotBlocked(_) | LedgerError::StatusConflict { .. } => {
                    Status::failed_precondition(ledger_err.to_string())
                }
                LedgerError::DuplicateCommission { .. } => {
                    Status::already_exists(ledger_err.to_string())
                }
                LedgerError::Persistence(_) => {
                    error!("Persistence error: {:?}", ledger_err);
                    Status::internal("Database error")
                }
            },
            AppError::NotFound(msg) => Status::not_found(msg),
            AppError::Unauthorized(msg) => Status::unauthenticated(msg),
            AppError::Validation(msg) => Status::invalid_argument(msg),
            AppError::Database(_) | AppError::Sqlx(_) => {
                error!("Database error: {:?}", err);
                Status::internal("Database error")
            }
            _ => {
                error!("Internal error: {:?}", err);
                Status::internal("Internal server error")
            }
        }
    }

    /// Helper to parse UUID from string
    fn parse_uuid(s: &str, field_name: &str) -> Result<Uuid, Status> {
        Uuid::parse_str(s)
            .map_err(|_| Status::invalid_argument(format!("Invalid {}: {}", field_name, s)))
    }

    /// Helper to parse a decimal amount from the wire
    fn parse_amount(s: &str) -> Result<Decimal, Status> {
        Decimal::from_str(s)
            .map_err(|_| Status::invalid_argument(format!("Invalid amount: {}", s)))
    }

    /// Helper to parse an optional percentage from the wire
    fn parse_percentage(s: &str) -> Result<Option<Decimal>, Status> {
        if s.is_empty() {
            return Ok(None);
        }
        Decimal::from_str(s)
            .map(Some)
            .map_err(|_| Status::invalid_argument(format!("Invalid percentage: {}", s)))
    }

    fn verify(
        &self,
        subject: &str,
        action: &str,
        timestamp: i64,
        signature: &str,
    ) -> Result<(), Status> {
        auth::verify_auth_with_timestamp(
            self.auth_secret.as_deref(),
            subject,
            action,
            timestamp,
            signature,
        )
        .map_err(Self::to_status)
    }

    fn none_if_empty(s: &str) -> Option<&str> {
        if s.is_empty() {
            None
        } else {
            Some(s)
        }
    }
}

fn wallet_info(wallet: &crate::models::Wallet) -> WalletInfo {
    WalletInfo {
        id: wallet.id.to_string(),
        user_id: wallet.user_id.to_string(),
        available_balance: wallet.available_balance.to_string(),
        blocked_balance: wallet.blocked_balance.to_string(),
        total_earned: wallet.total_earned.to_string(),
        total_spent: wallet.total_spent.to_string(),
        total_withdrawn: wallet.total_withdrawn.to_string(),
        created_at: wallet.created_at.and_utc().timestamp(),
        updated_at: wallet.updated_at.and_utc().timestamp(),
    }
}

fn transaction_info(tx: &crate::models::LedgerTransaction) -> TransactionInfo {
    TransactionInfo {
        id: tx.id.to_string(),
        wallet_id: tx.wallet_id.to_string(),
        transaction_type: tx.transaction_type.clone(),
        direction: tx.direction.clone(),
        amount: tx.amount.to_string(),
        status: tx.status.clone(),
        description: tx.description.clone().unwrap_or_default(),
        related_user_id: tx
            .related_user_id
            .map(|id| id.to_string())
            .unwrap_or_default(),
        reference_id: tx.reference_id.clone().unwrap_or_default(),
        created_at: tx.created_at.and_utc().timestamp(),
        completed_at: tx
            .completed_at
            .map(|t| t.and_utc().timestamp())
            .unwrap_or_default(),
    }
}

fn commission_info(commission: &crate::models::Commission) -> CommissionInfo {
    CommissionInfo {
        id: commission.id.to_string(),
        transaction_id: commission.transaction_id.to_string(),
        recipient_user_id: commission.recipient_user_id.to_string(),
        amount: commission.amount.to_string(),
        percentage: commission.percentage.to_string(),
        commission_type: commission.commission_type.clone(),
        created_at: commission.created_at.and_utc().timestamp(),
    }
}

#[tonic::async_trait]
impl WalletLedger for WalletGrpcService {
    /// Credit external money into a user's wallet
    async fn deposit(
        &self,
        request: Request<DepositRequest>,
    ) -> Result<Response<TransactionResponse>, Status> {
        let req = request.into_inner();

        info!("Deposit request: user={}, amount={}", req.user_email, req.amount);

        self.verify(&req.user_email, "deposit", req.timestamp, &req.signature)?;

        let amount = Self::parse_amount(&req.amount)?;

        let outcome = self
            .ledger
            .deposit(
                &req.user_email,
                amount,
                Self::none_if_empty(&req.description),
                Self::none_if_empty(&req.idempotency_key),
            )
            .await
            .map_err(Self::to_status)?;

        Ok(Response::new(TransactionResponse {
            transaction_id: outcome.transaction.id.to_string(),
            status: outcome.transaction.status.clone(),
            available_balance: outcome.wallet.available_balance.to_string(),
        }))
    }

    /// Move funds between two wallets atomically
    async fn transfer(
        &self,
        request: Request<TransferRequest>,
    ) -> Result<Response<TransactionResponse>, Status> {
        let req = request.into_inner();

        info!(
            "Transfer request: from={}, to={}, amount={}",
            req.from_email, req.to_email, req.amount
        );

        self.verify(&req.from_email, "transfer", req.timestamp, &req.signature)?;

        let amount = Self::parse_amount(&req.amount)?;

        let outcome = self
            .ledger
            .transfer(
                &req.from_email,
                &req.to_email,
                amount,
                Self::none_if_empty(&req.description),
                Self::none_if_empty(&req.idempotency_key),
            )
            .await
            .map_err(Self::to_status)?;

        Ok(Response::new(TransactionResponse {
            transaction_id: outcome.transaction.id.to_string(),
            status: outcome.transaction.status.clone(),
            available_balance: outcome.wallet.available_balance.to_string(),
        }))
    }

    /// Hold funds against an order
    async fn block_funds(
        &self,
        request: Request<BlockFundsRequest>,
    ) -> Result<Response<TransactionResponse>, Status> {
        let req = request.into_inner();

        info!(
            "BlockFunds request: user={}, amount={}, reference={}",
            req.user_email, req.amount, req.reference_id
        );

        self.verify(&req.user_email, "block_funds", req.timestamp, &req.signature)?;

        let amount = Self::parse_amount(&req.amount)?;

        let outcome = self
            .ledger
            .block_funds(
                &req.user_email,
                amount,
                &req.reference_id,
                Self::none_if_empty(&req.description),
            )
            .await
            .map_err(Self::to_status)?;

        Ok(Response::new(TransactionResponse {
            transaction_id: outcome.transaction.id.to_string(),
            status: outcome.transaction.status.clone(),
            available_balance: outcome.wallet.available_balance.to_string(),
        }))
    }

    /// Settle blocked funds to a seller, minus an optional commission
    async fn release_funds(
        &self,
        request: Request<ReleaseFundsRequest>,
    ) -> Result<Response<ReleaseFundsResponse>, Status> {
        let req = request.into_inner();

        info!(
            "ReleaseFunds request: transaction={}, seller={}",
            req.transaction_id, req.seller_email
        );

        self.verify(&req.seller_email, "release_funds", req.timestamp, &req.signature)?;

        let transaction_id = Self::parse_uuid(&req.transaction_id, "transaction_id")?;
        let percentage = Self::parse_percentage(&req.commission_percentage)?;

        let outcome = self
            .ledger
            .release_funds(transaction_id, &req.seller_email, percentage)
            .await
            .map_err(Self::to_status)?;

        Ok(Response::new(ReleaseFundsResponse {
            success: true,
            seller_transaction_id: outcome
                .seller_credit
                .map(|t| t.id.to_string())
                .unwrap_or_default(),
            commission_id: outcome
                .commission
                .map(|c| c.id.to_string())
                .unwrap_or_default(),
        }))
    }

    /// Hold funds for a bank withdrawal
    async fn request_withdrawal(
        &self,
        request: Request<WithdrawalRequest>,
    ) -> Result<Response<TransactionResponse>, Status> {
        let req = request.into_inner();

        info!(
            "RequestWithdrawal request: user={}, amount={}",
            req.user_email, req.amount
        );

        self.verify(
            &req.user_email,
            "request_withdrawal",
            req.timestamp,
            &req.signature,
        )?;

        let amount = Self::parse_amount(&req.amount)?;

        let outcome = self
            .ledger
            .request_withdrawal(
                &req.user_email,
                amount,
                Self::none_if_empty(&req.description),
            )
            .await
            .map_err(Self::to_status)?;

        Ok(Response::new(TransactionResponse {
            transaction_id: outcome.transaction.id.to_string(),
            status: outcome.transaction.status.clone(),
            available_balance: outcome.wallet.available_balance.to_string(),
        }))
    }

    /// Confirm or cancel a pending withdrawal
    async fn settle_withdrawal(
        &self,
        request: Request<SettleWithdrawalRequest>,
    ) -> Result<Response<SettleWithdrawalResponse>, Status> {
        let req = request.into_inner();

        info!(
            "SettleWithdrawal request: transaction={}, success={}",
            req.transaction_id, req.success
        );

        self.verify(
            &req.transaction_id,
            "settle_withdrawal",
            req.timestamp,
            &req.signature,
        )?;

        let transaction_id = Self::parse_uuid(&req.transaction_id, "transaction_id")?;

        let updated = self
            .ledger
            .settle_withdrawal(transaction_id, req.success)
            .await
            .map_err(Self::to_status)?;

        Ok(Response::new(SettleWithdrawalResponse {
            success: true,
            status: updated.status,
        }))
    }

    /// Projected balance for a user's wallet
    async fn get_balance(
        &self,
        request: Request<BalanceRequest>,
    ) -> Result<Response<BalanceResponse>, Status> {
        let req = request.into_inner();

        let projection = self
            .ledger
            .balance(&req.user_email)
            .await
            .map_err(Self::to_status)?;

        Ok(Response::new(BalanceResponse {
            available: projection.available.to_string(),
            blocked: projection.blocked.to_string(),
            total_earned: projection.total_earned.to_string(),
            total_spent: projection.total_spent.to_string(),
            total_withdrawn: projection.total_withdrawn.to_string(),
        }))
    }

    /// Wallet, recent transactions and commissions in one consistent view
    async fn get_snapshot(
        &self,
        request: Request<SnapshotRequest>,
    ) -> Result<Response<SnapshotResponse>, Status> {
        let req = request.into_inner();

        let limit = if req.limit > 0 {
            Some(req.limit as i64)
        } else {
            None
        };

        let snapshot = self
            .ledger
            .snapshot(&req.user_email, limit)
            .await
            .map_err(Self::to_status)?;

        Ok(Response::new(SnapshotResponse {
            wallet: Some(wallet_info(&snapshot.wallet)),
            transactions: snapshot.transactions.iter().map(transaction_info).collect(),
            commissions: snapshot.commissions.iter().map(commission_info).collect(),
        }))
    }
}
