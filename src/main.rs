//! OrbisLink Ledger Service
//!
//! Main entry point for the OrbisLink wallet/ledger backend.
//! This service provides:
//! - gRPC API for money operations and wallet views
//! - Append-only audit trail of all money movements

mod auth;
mod config;
mod database;
mod error;
mod grpc_service;
mod models;
mod projector;
mod repositories;
mod services;

use config::AppConfig;
use database::{create_pool, run_migrations, Database};
use error::{AppError, AppResult};
use grpc_service::WalletGrpcService;
use repositories::*;
use services::{AuditTrailService, LedgerService};
use std::net::SocketAddr;
use std::sync::Arc;
use tonic::transport::Server;
use tracing::{error, info, warn};

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

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load environment variables first
    dotenv::dotenv().ok();

    // Load configuration
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        AppError::Config(e)
    })?;

    // Initialize tracing/logging with config
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("orbis_ledger={},sqlx=warn,tonic=info", config.log_level).into()
            }),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           OrbisLink Ledger Service Starting               ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Environment: {}", config.environment);
    info!("Log level: {}", config.log_level);
    info!("gRPC port: {}", config.grpc_port);

    // =========================================================================
    // DATABASE SETUP
    // =========================================================================
    info!("Connecting to database...");

    let pool = create_pool(&config.database).await.map_err(|e| {
        error!("Failed to create database pool: {}", e);
        AppError::Database(e)
    })?;

    info!("Database connection pool created successfully");
    info!("Max connections: {}", config.database.max_connections);

    // Run migrations
    info!("Running database migrations...");
    run_migrations(&pool, None).await.map_err(|e| {
        error!("Database migration failed: {}", e);
        AppError::Database(e)
    })?;

    info!("Database migrations completed successfully");

    // =========================================================================
    // CORE SERVICES INITIALIZATION
    // =========================================================================
    info!("Initializing core services...");

    // Initialize application state with repositories
    let app_state = Arc::new(AppState::new(pool.clone()));
    info!("✓ Application state initialized with repositories");

    // Initialize audit trail service
    let audit_log_dir = std::path::PathBuf::from(
        std::env::var("AUDIT_LOG_DIR").unwrap_or_else(|_| "./logs".to_string()),
    );

    // Create logs directory if it doesn't exist
    if let Err(e) = std::fs::create_dir_all(&audit_log_dir) {
        warn!("Could not create audit log directory: {}", e);
    }

    let audit_trail = Arc::new(AuditTrailService::new(audit_log_dir).map_err(|e| {
        error!("Failed to initialize audit trail: {}", e);
        AppError::Message(format!("Audit trail initialization failed: {}", e))
    })?);
    info!("✓ Audit trail service initialized");

    // Initialize the ledger facade
    let ledger_service = Arc::new(LedgerService::new(
        app_state.user_repo.clone(),
        app_state.ledger_repo.clone(),
        Some(audit_trail),
        config.platform_account_email.clone(),
    ));
    info!("✓ Ledger service initialized");
    info!("Platform account: {}", config.platform_account_email);

    // Initialize gRPC service
    let grpc_service = WalletGrpcService::new(ledger_service, config.auth_secret.clone());
    info!("✓ gRPC service initialized");

    // =========================================================================
    // START SERVER
    // =========================================================================

    let grpc_addr: SocketAddr = format!("0.0.0.0:{}", config.grpc_port)
        .parse()
        .map_err(|e| AppError::Config(format!("Invalid gRPC address: {}", e)))?;

    info!("Starting gRPC server on {}...", grpc_addr);

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(grpc_service::proto::FILE_DESCRIPTOR_SET)
        .build()
        .map_err(|e| AppError::Message(format!("Failed to build reflection service: {}", e)))?;

    let grpc_server = Server::builder()
        .add_service(reflection)
        .add_service(grpc_service.into_server())
        .serve(grpc_addr);

    let grpc_handle = tokio::spawn(async move {
        if let Err(e) = grpc_server.await {
            error!("gRPC server error: {}", e);
        }
    });

    info!("✓ gRPC server started on {}", grpc_addr);

    // =========================================================================
    // READY
    // =========================================================================
    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║           OrbisLink Ledger Service Ready!                 ║");
    info!("╠══════════════════════════════════════════════════════════╣");
    info!("║  gRPC API:     0.0.0.0:{}                              ║", config.grpc_port);
    info!("║  Environment:  {}                                    ║", config.environment);
    info!("╚══════════════════════════════════════════════════════════╝");
    info!("Press Ctrl+C to shutdown gracefully");

    // =========================================================================
    // SHUTDOWN HANDLING
    // =========================================================================
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down gracefully...");
        }
        _ = grpc_handle => {
            error!("gRPC server exited unexpectedly");
        }
    }

    info!("OrbisLink ledger service shutdown complete");
    Ok(())
}
