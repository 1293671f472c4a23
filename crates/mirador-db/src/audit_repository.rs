use chrono::Utc;
use mirador_core::error::AppError;
use mirador_core::models::{AuditEntry, AuditFact};
use mirador_core::traits::AuditSink;
use sqlx::{Pool, Sqlite, SqlitePool};

use crate::repository::{from_micros, to_micros};

/// Actor recorded for facts emitted by the core itself.
pub const SYSTEM_ACTOR: &str = "system";

/// Append-only audit log in SQLite.
#[derive(Clone)]
pub struct AuditRepository {
    pool: Pool<Sqlite>,
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    actor: String,
    action: String,
    details: String,
    ts: i64,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            actor: row.actor,
            action: row.action,
            details: row.details,
            ts: from_micros(row.ts),
        }
    }
}

impl AuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, fact: &AuditFact) -> Result<(), AppError> {
        let details = fact.details()?;
        sqlx::query(
            r#"
            INSERT INTO audit (actor, action, details, ts)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(SYSTEM_ACTOR)
        .bind(fact.action())
        .bind(details)
        .bind(to_micros(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>, AppError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT actor, action, details, ts
            FROM audit
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }
}

impl AuditSink for AuditRepository {
    async fn record(&self, fact: &AuditFact) -> Result<(), AppError> {
        AuditRepository::record(self, fact).await
    }
}
