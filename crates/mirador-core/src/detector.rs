use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use url::Url;

use crate::error::AppError;
use crate::models::{AuditFact, NewPage, PageChange, SnapshotOutcome, compute_hash};
use crate::path_map::{disambiguated_page_path, page_path, version_path};
use crate::snapshot::SnapshotFiles;
use crate::traits::{AuditSink, Clock, SnapshotStore};

/// Decides new / changed / unchanged for a fetched page and persists it.
///
/// Files are always written before the row that points at them, so a
/// reader never follows a row to a missing file. When the row write fails
/// the files are rolled back, so the live file keeps matching the stored
/// hash.
pub struct SnapshotWriter<S, A>
where
    S: SnapshotStore,
    A: AuditSink,
{
    store: S,
    audit: A,
    files: SnapshotFiles,
    clock: Arc<dyn Clock>,
}

impl<S, A> SnapshotWriter<S, A>
where
    S: SnapshotStore,
    A: AuditSink,
{
    pub fn new(store: S, audit: A, files: SnapshotFiles, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            files,
            clock,
        }
    }

    pub async fn record(&self, url: &Url, content: &[u8]) -> Result<SnapshotOutcome, AppError> {
        let checksum = compute_hash(content);
        let now = truncate_to_micros(self.clock.now());

        let Some(page) = self.store.find_page(url.as_str()).await? else {
            let local_path = self.free_page_path(url).await?;
            self.files.write_snapshot(&local_path, content).await?;
            let inserted = self
                .store
                .insert_page(&NewPage {
                    url: url.to_string(),
                    local_path: local_path.clone(),
                    hash: checksum,
                    last_checked: now,
                })
                .await;
            let id = match inserted {
                Ok(id) => id,
                Err(e) => {
                    self.discard(&local_path).await;
                    return Err(e);
                }
            };
            tracing::info!(%url, page_id = id, "New page saved");
            self.emit(AuditFact::PageSaved {
                url: url.to_string(),
            })
            .await;
            return Ok(SnapshotOutcome::New);
        };

        let checked_at = now.max(page.last_checked);

        if page.hash == checksum {
            self.store.touch_page(page.id, checked_at).await?;
            tracing::debug!(%url, "Unchanged");
            return Ok(SnapshotOutcome::Unchanged);
        }

        let saved_at = match self.store.latest_version_at(page.id).await? {
            Some(previous) if previous >= checked_at => previous + TimeDelta::microseconds(1),
            _ => checked_at,
        };
        let content_path = version_path(page.id, saved_at);
        let previous_live = self.files.read_raw(&page.local_path).await?;

        self.files.write_snapshot(&content_path, content).await?;
        if let Err(e) = self.files.write_snapshot(&page.local_path, content).await {
            self.discard(&content_path).await;
            return Err(e);
        }

        let change = PageChange {
            page_id: page.id,
            local_path: page.local_path.clone(),
            checksum,
            checked_at: checked_at.max(saved_at),
            saved_at,
            content_path,
        };
        if let Err(e) = self.store.record_change(&change).await {
            // The row never landed: drop the version copy and put the
            // live file back to the bytes the stored hash describes.
            self.discard(&change.content_path).await;
            if let Err(restore_err) = self.files.restore(&page.local_path, previous_live).await {
                tracing::error!(
                    %url,
                    path = %page.local_path,
                    error = %restore_err,
                    "Failed to restore live snapshot"
                );
            }
            return Err(e);
        }

        tracing::info!(
            %url,
            old = %&page.hash[..8.min(page.hash.len())],
            new = %&change.checksum[..8],
            "Page changed"
        );
        self.emit(AuditFact::PageChanged {
            url: url.to_string(),
        })
        .await;
        Ok(SnapshotOutcome::Changed)
    }

    /// [`page_path`] unless another URL already owns it, in which case the
    /// digest-suffixed fallback.
    async fn free_page_path(&self, url: &Url) -> Result<String, AppError> {
        let path = page_path(url);
        match self.store.find_page_by_path(&path).await? {
            Some(owner) if owner.url != url.as_str() => {
                let fallback = disambiguated_page_path(url);
                tracing::debug!(%url, owner = %owner.url, path = %fallback, "Snapshot path taken");
                Ok(fallback)
            }
            _ => Ok(path),
        }
    }

    async fn discard(&self, relative: &str) {
        if let Err(e) = self.files.remove(relative).await {
            tracing::warn!(path = relative, error = %e, "Failed to remove orphaned snapshot");
        }
    }

    async fn emit(&self, fact: AuditFact) {
        if let Err(e) = self.audit.record(&fact).await {
            tracing::warn!(action = fact.action(), error = %e, "Failed to record audit fact");
        }
    }
}

/// Timestamps are persisted with microsecond precision.
pub fn truncate_to_micros(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(t.timestamp_micros()).unwrap_or(t)
}
