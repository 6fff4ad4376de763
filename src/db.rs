//! Database connection and session management for orgpulse.
//!
//! This module initializes the SeaORM connection pool and wraps it in a
//! [`StoreSession`] that a pipeline run acquires up front and releases when
//! it reaches its terminal state.

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;
use crate::repositories::OrganizationRepository;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: DbErr,
    },
    #[error("Database connection timeout after {timeout_ms}ms")]
    ConnectionTimeout { timeout_ms: u64 },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Initializes a database connection pool with the given configuration.
///
/// Transient connection failures are retried with exponential backoff.
///
/// # Examples
///
/// ```no_run
/// use orgpulse::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let max_retries = 5;
    let mut retry_delay = Duration::from_millis(100);

    for attempt in 1..=max_retries {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("Successfully connected to database (attempt {})", attempt);
                return Ok(conn);
            }
            Err(e) => {
                if attempt == max_retries {
                    log::error!(
                        "Failed to connect to database after {} attempts: {}",
                        max_retries,
                        e
                    );
                    return Err(DatabaseError::ConnectionFailed { source: e }.into());
                }

                log::warn!(
                    "Database connection attempt {} failed: {}, retrying in {:?}",
                    attempt,
                    e,
                    retry_delay
                );

                sleep(retry_delay).await;
                retry_delay *= 2;
            }
        }
    }

    Err(DatabaseError::ConnectionTimeout {
        timeout_ms: cfg.db_acquire_timeout_ms,
    }
    .into())
}

/// Store handle owned by exactly one pipeline run.
#[derive(Debug)]
pub struct StoreSession {
    db: DatabaseConnection,
    organizations: OrganizationRepository,
}

impl StoreSession {
    /// Connects, applies pending migrations and returns a ready session.
    pub async fn open(cfg: &AppConfig) -> Result<Self> {
        let db = init_pool(cfg).await?;
        Migrator::up(&db, None)
            .await
            .context("applying database migrations")?;
        Ok(Self::from_connection(db))
    }

    /// Wraps an already-prepared connection (used by tests with in-memory SQLite).
    pub fn from_connection(db: DatabaseConnection) -> Self {
        let organizations = OrganizationRepository::new(Arc::new(db.clone()));
        Self { db, organizations }
    }

    pub fn organizations(&self) -> &OrganizationRepository {
        &self.organizations
    }

    /// Releases the underlying pool. Every clone of the connection becomes unusable.
    pub async fn close(self) -> Result<(), DbErr> {
        let Self { db, organizations } = self;
        drop(organizations);
        db.close().await
    }
}
