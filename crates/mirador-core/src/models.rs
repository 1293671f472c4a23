use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Bytes returned by a fetch strategy.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub content: Vec<u8>,
    /// Value of the `Content-Type` header (or `text/html` for rendered pages).
    pub content_type: String,
}

impl FetchedContent {
    pub fn html(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            content_type: "text/html; charset=utf-8".to_string(),
        }
    }
}

/// Raw references found in a page, before resolution and filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageLinks {
    /// `a[href]` values.
    pub anchors: Vec<String>,
    /// `img[src]`, `script[src]` and `link[href]` values.
    pub resources: Vec<String>,
}

/// One entry per distinct URL ever crawled.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: i64,
    pub url: String,
    /// Current snapshot location, relative to the snapshot root.
    pub local_path: String,
    /// SHA-256 of the plaintext currently at `local_path`.
    pub hash: String,
    pub last_checked: DateTime<Utc>,
}

/// DTO for inserting a page seen for the first time.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub url: String,
    pub local_path: String,
    pub hash: String,
    pub last_checked: DateTime<Utc>,
}

/// A historical revision of a page.
#[derive(Debug, Clone, Serialize)]
pub struct Version {
    pub id: i64,
    pub page_id: i64,
    pub saved_at: DateTime<Utc>,
    /// Per-version snapshot file, relative to the snapshot root.
    pub content_path: String,
    pub checksum: String,
}

/// A content change to persist atomically: new version row plus page update.
#[derive(Debug, Clone)]
pub struct PageChange {
    pub page_id: i64,
    pub local_path: String,
    pub checksum: String,
    pub checked_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
    pub content_path: String,
}

/// Listing row for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct PageSummary {
    pub url: String,
    #[serde(skip)]
    pub local_path: String,
    pub hash: String,
    pub last_checked: DateTime<Utc>,
}

/// What the change detector decided for one fetched page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotOutcome {
    New,
    Changed,
    Unchanged,
}

/// Which fetch strategy served a crawl run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStrategy {
    Rendered,
    Plain,
}

/// Summary of one crawl run.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub strategy: FetchStrategy,
    /// Successfully processed page URLs, in BFS order.
    pub saved: Vec<String>,
    pub new_pages: usize,
    pub changed_pages: usize,
    pub unchanged_pages: usize,
    /// Pages skipped because of a transient fetch failure.
    pub failed: Vec<String>,
    pub resources_saved: usize,
    pub cancelled: bool,
}

impl CrawlReport {
    pub fn new(strategy: FetchStrategy) -> Self {
        Self {
            strategy,
            saved: Vec::new(),
            new_pages: 0,
            changed_pages: 0,
            unchanged_pages: 0,
            failed: Vec::new(),
            resources_saved: 0,
            cancelled: false,
        }
    }

    pub fn record(&mut self, url: &str, outcome: SnapshotOutcome) {
        match outcome {
            SnapshotOutcome::New => self.new_pages += 1,
            SnapshotOutcome::Changed => self.changed_pages += 1,
            SnapshotOutcome::Unchanged => self.unchanged_pages += 1,
        }
        self.saved.push(url.to_string());
    }

    /// A run succeeded if it processed at least one page and was not cancelled.
    pub fn success(&self) -> bool {
        !self.saved.is_empty() && !self.cancelled
    }

    pub fn summary(&self) -> String {
        format!(
            "{} pages processed ({} new, {} changed, {} unchanged), {} failed, {} resources",
            self.saved.len(),
            self.new_pages,
            self.changed_pages,
            self.unchanged_pages,
            self.failed.len(),
            self.resources_saved
        )
    }
}

/// Result of the lightweight change-check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub changed: Vec<String>,
    pub new: Vec<String>,
    pub removed: Vec<String>,
}

impl UpdateReport {
    /// Classify live `(url, checksum)` pairs against stored ones.
    ///
    /// `changed` and `new` follow the live (discovery) order, `removed`
    /// follows the stored order.
    pub fn classify(stored: &[(String, String)], live: &[(String, String)]) -> Self {
        let stored_map: HashMap<&str, &str> = stored
            .iter()
            .map(|(url, hash)| (url.as_str(), hash.as_str()))
            .collect();
        let live_urls: HashSet<&str> = live.iter().map(|(url, _)| url.as_str()).collect();

        let mut report = UpdateReport::default();
        for (url, hash) in live {
            match stored_map.get(url.as_str()) {
                Some(stored_hash) if *stored_hash != hash => report.changed.push(url.clone()),
                Some(_) => {}
                None => report.new.push(url.clone()),
            }
        }
        report.removed = stored
            .iter()
            .filter(|(url, _)| !live_urls.contains(url.as_str()))
            .map(|(url, _)| url.clone())
            .collect();
        report
    }

    /// True when there is something an operator may want to act on.
    pub fn has_drift(&self) -> bool {
        !self.changed.is_empty() || !self.new.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.new.is_empty() && self.removed.is_empty()
    }
}

/// Aggregate numbers about the snapshot store.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorStats {
    pub pages: i64,
    pub versions: i64,
    pub snapshot_bytes: u64,
}

/// Facts the core emits for the audit log. The core never reads them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditFact {
    PageSaved { url: String },
    PageChanged { url: String },
    AutoUpdatesFound { report: UpdateReport },
    Backup { path: String },
    ManualUpdate { summary: String },
}

impl AuditFact {
    pub fn action(&self) -> &'static str {
        match self {
            AuditFact::PageSaved { .. } => "page_saved",
            AuditFact::PageChanged { .. } => "page_changed",
            AuditFact::AutoUpdatesFound { .. } => "auto_updates_found",
            AuditFact::Backup { .. } => "backup",
            AuditFact::ManualUpdate { .. } => "manual_update",
        }
    }

    pub fn details(&self) -> Result<String, serde_json::Error> {
        match self {
            AuditFact::PageSaved { url } | AuditFact::PageChanged { url } => Ok(url.clone()),
            AuditFact::AutoUpdatesFound { report } => serde_json::to_string(report),
            AuditFact::Backup { path } => Ok(path.clone()),
            AuditFact::ManualUpdate { summary } => Ok(summary.clone()),
        }
    }
}

/// A persisted audit record, as read back by presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub actor: String,
    pub action: String,
    pub details: String,
    pub ts: DateTime<Utc>,
}

/// Compute a SHA-256 hash of raw bytes, returned as 64-char hex.
pub fn compute_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
