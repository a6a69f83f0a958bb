//! OrbisLink Ledger Library
//!
//! This module exposes the wallet/ledger components for use by tests and
//! other consumers.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod grpc_service;
pub mod models;
pub mod projector;
pub mod repositories;
pub mod services;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult, LedgerError, LedgerResult};

use database::Database;
use repositories::*;
use std::sync::Arc;

/// Application state containing all repositories
pub struct AppState {
    pub database: Database,
    pub user_repo: Arc<UserRepository>,
    pub ledger_repo: Arc<LedgerRepository>,
}

impl AppState {
    /// Create a new AppState with initialized repositories
    pub fn new(pool: sqlx::PgPool) -> Self {
        let database = Database::new(pool.clone());

        Self {
            database,
            user_repo: Arc::new(UserRepository::new(pool.clone())),
            ledger_repo: Arc::new(LedgerRepository::new(pool)),
        }
    }
}
