pub mod ledger_repository;
pub mod user_repository;

// Re-export all repositories for convenient access
pub use ledger_repository::{
    split_commission, LedgerRepository, OperationOutcome, ReleaseOutcome, WalletSnapshot,
};
pub use user_repository::UserRepository;
