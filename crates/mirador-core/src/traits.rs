use std::future::Future;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::models::{
    AuditFact, FetchedContent, NewPage, Page, PageChange, PageLinks, PageSummary, Version,
};

/// Retrieves the bytes behind a URL.
///
/// Implementations must honour their own timeout and report every failure
/// as an [`AppError`]; nothing may panic or hang past the boundary.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedContent, AppError>> + Send;
}

/// Starts the rendering fetch strategy for one crawl run.
///
/// Launch failures are reported as [`AppError::RendererUnavailable`] and
/// cause the caller to fall back to the plain strategy for the whole run.
pub trait RendererLauncher: Send + Sync {
    type Fetcher: Fetcher;

    fn launch(
        &self,
        page_timeout: Duration,
    ) -> impl Future<Output = Result<Self::Fetcher, AppError>> + Send;
}

/// Pulls raw link references out of an HTML document.
pub trait LinkExtractor: Send + Sync + Clone {
    fn extract(&self, html: &str) -> PageLinks;
}

/// Persists Page and Version rows.
///
/// The snapshot bytes themselves live in [`crate::snapshot::SnapshotFiles`];
/// callers write files before calling the mutating methods here.
pub trait SnapshotStore: Send + Sync + Clone {
    fn find_page(&self, url: &str)
    -> impl Future<Output = Result<Option<Page>, AppError>> + Send;

    /// The page whose live snapshot sits at `local_path`, if any.
    fn find_page_by_path(
        &self,
        local_path: &str,
    ) -> impl Future<Output = Result<Option<Page>, AppError>> + Send;

    /// Insert a page seen for the first time. Returns its id.
    fn insert_page(&self, page: &NewPage) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Record a fetch whose content matched the stored hash.
    fn touch_page(
        &self,
        page_id: i64,
        checked_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Insert the new version and update the page in a single transaction.
    fn record_change(
        &self,
        change: &PageChange,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// `saved_at` of the most recent version of a page, if any.
    fn latest_version_at(
        &self,
        page_id: i64,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, AppError>> + Send;

    /// `(url, hash)` of every stored page, ordered by url.
    fn page_hashes(&self) -> impl Future<Output = Result<Vec<(String, String)>, AppError>> + Send;

    /// Pages ordered by `last_checked` descending.
    fn list_pages(
        &self,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<PageSummary>, AppError>> + Send;

    /// Versions of one page, newest first.
    fn versions_for_page(
        &self,
        page_id: i64,
    ) -> impl Future<Output = Result<Vec<Version>, AppError>> + Send;

    fn versions_saved_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Version>, AppError>> + Send;

    /// `(page_id, version count)` for every page that has versions.
    fn version_counts(&self) -> impl Future<Output = Result<Vec<(i64, i64)>, AppError>> + Send;

    /// The `limit` oldest versions of a page, oldest first.
    fn oldest_versions(
        &self,
        page_id: i64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Version>, AppError>> + Send;

    fn delete_version(&self, version_id: i64) -> impl Future<Output = Result<(), AppError>> + Send;

    /// `(pages, versions)` row counts.
    fn counts(&self) -> impl Future<Output = Result<(i64, i64), AppError>> + Send;

    /// Write a consistent copy of the whole store to `dest`, which must not
    /// exist yet.
    fn export_database(&self, dest: &Path) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Receives audit facts emitted by the core.
pub trait AuditSink: Send + Sync + Clone {
    fn record(&self, fact: &AuditFact) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Source of wall-clock time for timestamps written to the store.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Launcher for builds without a rendering backend: always unavailable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRenderer;

impl RendererLauncher for NoRenderer {
    type Fetcher = NoRenderer;

    async fn launch(&self, _page_timeout: Duration) -> Result<NoRenderer, AppError> {
        Err(AppError::RendererUnavailable(
            "built without a rendering backend".into(),
        ))
    }
}

impl Fetcher for NoRenderer {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, AppError> {
        Err(AppError::RendererUnavailable(format!(
            "cannot render {url}: no rendering backend"
        )))
    }
}
