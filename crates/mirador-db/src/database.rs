use std::path::{Path, PathBuf};
use std::time::Duration;

use mirador_core::AppError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

use crate::audit_repository::AuditRepository;
use crate::config::DatabaseConfig;
use crate::repository::SnapshotRepository;

/// Central database facade: owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    path: PathBuf,
}

impl Database {
    /// Open (creating if missing) the SQLite file named by the configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::DatabaseError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        // Rollback journal keeps the whole database in one file, so a backup
        // can copy it as-is.
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        tracing::debug!(path = %config.path.display(), "Database opened");
        Ok(Self {
            pool,
            path: config.path.clone(),
        })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get a [`SnapshotRepository`] backed by this pool.
    pub fn snapshot_repo(&self) -> SnapshotRepository {
        SnapshotRepository::new(self.pool.clone())
    }

    /// Get an [`AuditRepository`] backed by this pool.
    pub fn audit_repo(&self) -> AuditRepository {
        AuditRepository::new(self.pool.clone())
    }

    /// Location of the database file, as included in backups.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
