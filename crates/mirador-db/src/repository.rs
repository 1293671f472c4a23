use std::path::Path;

use chrono::{DateTime, Utc};
use mirador_core::error::AppError;
use mirador_core::models::{NewPage, Page, PageChange, PageSummary, Version};
use mirador_core::traits::SnapshotStore;
use sqlx::{Pool, Sqlite, SqlitePool};

/// Repository for Page and Version rows in SQLite.
///
/// Timestamps are stored as microseconds since the Unix epoch so that
/// ordering and the `(page_id, saved_at)` uniqueness work on plain integers.
#[derive(Clone)]
pub struct SnapshotRepository {
    pool: Pool<Sqlite>,
}

#[derive(sqlx::FromRow)]
struct PageRow {
    id: i64,
    url: String,
    local_path: String,
    hash: String,
    last_checked: i64,
}

impl From<PageRow> for Page {
    fn from(row: PageRow) -> Self {
        Self {
            id: row.id,
            url: row.url,
            local_path: row.local_path,
            hash: row.hash,
            last_checked: from_micros(row.last_checked),
        }
    }
}

impl From<PageRow> for PageSummary {
    fn from(row: PageRow) -> Self {
        Self {
            url: row.url,
            local_path: row.local_path,
            hash: row.hash,
            last_checked: from_micros(row.last_checked),
        }
    }
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: i64,
    page_id: i64,
    saved_at: i64,
    content_path: String,
    checksum: String,
}

impl From<VersionRow> for Version {
    fn from(row: VersionRow) -> Self {
        Self {
            id: row.id,
            page_id: row.page_id,
            saved_at: from_micros(row.saved_at),
            content_path: row.content_path,
            checksum: row.checksum,
        }
    }
}

pub(crate) fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or_default()
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(e.to_string())
}

impl SnapshotRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_page(&self, url: &str) -> Result<Option<Page>, AppError> {
        let row = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT id, url, local_path, hash, last_checked
            FROM pages
            WHERE url = ?
            "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Page::from))
    }

    pub async fn find_page_by_path(&self, local_path: &str) -> Result<Option<Page>, AppError> {
        let row = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT id, url, local_path, hash, last_checked
            FROM pages
            WHERE local_path = ?
            "#,
        )
        .bind(local_path)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(Page::from))
    }

    pub async fn insert_page(&self, page: &NewPage) -> Result<i64, AppError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO pages (url, local_path, hash, last_checked)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&page.url)
        .bind(&page.local_path)
        .bind(&page.hash)
        .bind(to_micros(page.last_checked))
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(id)
    }

    pub async fn touch_page(&self, page_id: i64, checked_at: DateTime<Utc>) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE pages SET last_checked = ? WHERE id = ?")
            .bind(to_micros(checked_at))
            .bind(page_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(AppError::DatabaseError(format!("Page {page_id} not found")));
        }
        Ok(())
    }

    /// Insert the version row and move the page to the new content, or
    /// neither.
    pub async fn record_change(&self, change: &PageChange) -> Result<i64, AppError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let (version_id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO versions (page_id, saved_at, content_path, checksum)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(change.page_id)
        .bind(to_micros(change.saved_at))
        .bind(&change.content_path)
        .bind(&change.checksum)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let updated = sqlx::query(
            r#"
            UPDATE pages
            SET local_path = ?, hash = ?, last_checked = ?
            WHERE id = ?
            "#,
        )
        .bind(&change.local_path)
        .bind(&change.checksum)
        .bind(to_micros(change.checked_at))
        .bind(change.page_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            // Dropping the transaction rolls the version insert back.
            return Err(AppError::DatabaseError(format!(
                "Page {} not found",
                change.page_id
            )));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(version_id)
    }

    pub async fn latest_version_at(&self, page_id: i64) -> Result<Option<DateTime<Utc>>, AppError> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(saved_at) FROM versions WHERE page_id = ?")
                .bind(page_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(latest.map(from_micros))
    }

    pub async fn page_hashes(&self) -> Result<Vec<(String, String)>, AppError> {
        sqlx::query_as("SELECT url, hash FROM pages ORDER BY url")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    pub async fn list_pages(&self, limit: Option<usize>) -> Result<Vec<PageSummary>, AppError> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query_as::<_, PageRow>(
            r#"
            SELECT id, url, local_path, hash, last_checked
            FROM pages
            ORDER BY last_checked DESC, url ASC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(PageSummary::from).collect())
    }

    pub async fn versions_for_page(&self, page_id: i64) -> Result<Vec<Version>, AppError> {
        let rows = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT id, page_id, saved_at, content_path, checksum
            FROM versions
            WHERE page_id = ?
            ORDER BY saved_at DESC, id DESC
            "#,
        )
        .bind(page_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Version::from).collect())
    }

    pub async fn versions_saved_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Version>, AppError> {
        let rows = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT id, page_id, saved_at, content_path, checksum
            FROM versions
            WHERE saved_at < ?
            ORDER BY saved_at ASC, id ASC
            "#,
        )
        .bind(to_micros(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Version::from).collect())
    }

    pub async fn version_counts(&self) -> Result<Vec<(i64, i64)>, AppError> {
        sqlx::query_as(
            r#"
            SELECT page_id, COUNT(*)
            FROM versions
            GROUP BY page_id
            ORDER BY page_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    pub async fn oldest_versions(&self, page_id: i64, limit: usize) -> Result<Vec<Version>, AppError> {
        let rows = sqlx::query_as::<_, VersionRow>(
            r#"
            SELECT id, page_id, saved_at, content_path, checksum
            FROM versions
            WHERE page_id = ?
            ORDER BY saved_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(page_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Version::from).collect())
    }

    pub async fn delete_version(&self, version_id: i64) -> Result<(), AppError> {
        sqlx::query("DELETE FROM versions WHERE id = ?")
            .bind(version_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn counts(&self) -> Result<(i64, i64), AppError> {
        sqlx::query_as(
            r#"
            SELECT (SELECT COUNT(*) FROM pages), (SELECT COUNT(*) FROM versions)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Copy the live database into `dest` with `VACUUM INTO`. SQLite takes a
    /// read transaction for the copy, so concurrent writers never tear it.
    pub async fn export_database(&self, dest: &Path) -> Result<(), AppError> {
        let dest = dest.to_str().ok_or_else(|| {
            AppError::StorageError(format!("Non UTF-8 export path: {}", dest.display()))
        })?;
        sqlx::query("VACUUM INTO ?")
            .bind(dest)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

impl SnapshotStore for SnapshotRepository {
    async fn find_page(&self, url: &str) -> Result<Option<Page>, AppError> {
        SnapshotRepository::find_page(self, url).await
    }

    async fn find_page_by_path(&self, local_path: &str) -> Result<Option<Page>, AppError> {
        SnapshotRepository::find_page_by_path(self, local_path).await
    }

    async fn insert_page(&self, page: &NewPage) -> Result<i64, AppError> {
        SnapshotRepository::insert_page(self, page).await
    }

    async fn touch_page(&self, page_id: i64, checked_at: DateTime<Utc>) -> Result<(), AppError> {
        SnapshotRepository::touch_page(self, page_id, checked_at).await
    }

    async fn record_change(&self, change: &PageChange) -> Result<i64, AppError> {
        SnapshotRepository::record_change(self, change).await
    }

    async fn latest_version_at(&self, page_id: i64) -> Result<Option<DateTime<Utc>>, AppError> {
        SnapshotRepository::latest_version_at(self, page_id).await
    }

    async fn page_hashes(&self) -> Result<Vec<(String, String)>, AppError> {
        SnapshotRepository::page_hashes(self).await
    }

    async fn list_pages(&self, limit: Option<usize>) -> Result<Vec<PageSummary>, AppError> {
        SnapshotRepository::list_pages(self, limit).await
    }

    async fn versions_for_page(&self, page_id: i64) -> Result<Vec<Version>, AppError> {
        SnapshotRepository::versions_for_page(self, page_id).await
    }

    async fn versions_saved_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Version>, AppError> {
        SnapshotRepository::versions_saved_before(self, cutoff).await
    }

    async fn version_counts(&self) -> Result<Vec<(i64, i64)>, AppError> {
        SnapshotRepository::version_counts(self).await
    }

    async fn oldest_versions(&self, page_id: i64, limit: usize) -> Result<Vec<Version>, AppError> {
        SnapshotRepository::oldest_versions(self, page_id, limit).await
    }

    async fn delete_version(&self, version_id: i64) -> Result<(), AppError> {
        SnapshotRepository::delete_version(self, version_id).await
    }

    async fn counts(&self) -> Result<(i64, i64), AppError> {
        SnapshotRepository::counts(self).await
    }

    async fn export_database(&self, dest: &Path) -> Result<(), AppError> {
        SnapshotRepository::export_database(self, dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_micros_round_trip_keeps_precision() {
        let ts = DateTime::from_timestamp_micros(1_700_000_000_123_456).unwrap();
        assert_eq!(from_micros(to_micros(ts)), ts);
    }
}
