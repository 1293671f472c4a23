use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::models::Version;
use crate::snapshot::SnapshotFiles;
use crate::traits::SnapshotStore;

#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Versions saved before `now - max_age` are pruned.
    pub max_age: TimeDelta,
    /// Versions kept per page after the age rule.
    pub max_versions: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: TimeDelta::days(30),
            max_versions: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub aged_out: usize,
    pub over_cap: usize,
    /// Version files that were already gone when their row was pruned.
    pub missing_files: usize,
}

impl RetentionReport {
    pub fn removed(&self) -> usize {
        self.aged_out + self.over_cap
    }
}

/// Prunes historical versions. Live snapshots are never touched.
pub struct RetentionManager<S: SnapshotStore> {
    store: S,
    files: SnapshotFiles,
    policy: RetentionPolicy,
}

impl<S: SnapshotStore> RetentionManager<S> {
    pub fn new(store: S, files: SnapshotFiles, policy: RetentionPolicy) -> Self {
        Self {
            store,
            files,
            policy,
        }
    }

    /// Age rule, then count rule on what survives. Idempotent.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> Result<RetentionReport, AppError> {
        let mut report = RetentionReport::default();

        // A window reaching before the earliest representable date keeps
        // everything, so the age rule has nothing to do.
        if let Some(cutoff) = now.checked_sub_signed(self.policy.max_age) {
            for version in self.store.versions_saved_before(cutoff).await? {
                self.prune(&version, &mut report).await?;
                report.aged_out += 1;
            }
        }

        let cap = self.policy.max_versions;
        for (page_id, count) in self.store.version_counts().await? {
            let count = usize::try_from(count).unwrap_or(0);
            if count <= cap {
                continue;
            }
            for version in self.store.oldest_versions(page_id, count - cap).await? {
                self.prune(&version, &mut report).await?;
                report.over_cap += 1;
            }
        }

        if report.removed() > 0 {
            tracing::info!(
                aged_out = report.aged_out,
                over_cap = report.over_cap,
                missing_files = report.missing_files,
                "Retention pass removed versions"
            );
        } else {
            tracing::debug!("Retention pass: nothing to prune");
        }
        Ok(report)
    }

    /// File first, then row. A missing or undeletable file never blocks
    /// the row deletion.
    async fn prune(&self, version: &Version, report: &mut RetentionReport) -> Result<(), AppError> {
        match self.files.remove(&version.content_path).await {
            Ok(true) => {}
            Ok(false) => report.missing_files += 1,
            Err(e) => {
                tracing::warn!(
                    version_id = version.id,
                    path = %version.content_path,
                    error = %e,
                    "Could not delete version file"
                );
            }
        }
        self.store.delete_version(version.id).await
    }
}
