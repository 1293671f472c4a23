//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::error::AppError;
use crate::models::{
    AuditFact, FetchedContent, NewPage, Page, PageChange, PageLinks, PageSummary, Version,
};
use crate::scheduler::{SchedulerEvent, SchedulerReporter};
use crate::traits::{AuditSink, Clock, Fetcher, LinkExtractor, RendererLauncher, SnapshotStore};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Response {
    Content(FetchedContent),
    Failure(String),
}

/// In-memory website. Unknown URLs answer with an HTTP 404 error.
#[derive(Clone, Default)]
pub struct MockFetcher {
    responses: Arc<Mutex<HashMap<String, Response>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.set_page(url, html);
        self
    }

    pub fn with_resource(self, url: &str, bytes: &[u8]) -> Self {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            Response::Content(FetchedContent {
                content: bytes.to_vec(),
                content_type: "application/octet-stream".into(),
            }),
        );
        self
    }

    /// Answer `url` with an HTTP error carrying `message`.
    pub fn with_failure(self, url: &str, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Response::Failure(message.to_string()));
        self
    }

    /// Sleep before answering `url`.
    pub fn with_delay(self, url: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
        self
    }

    /// Replace the page at `url`, e.g. to simulate a remote edit.
    pub fn set_page(&self, url: &str, html: &str) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            Response::Content(FetchedContent::html(html.as_bytes())),
        );
    }

    /// Every URL requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, AppError> {
        self.calls.lock().unwrap().push(url.to_string());

        let delay = self.delays.lock().unwrap().get(url).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = self.responses.lock().unwrap().get(url).cloned();
        match response {
            Some(Response::Content(content)) => Ok(content),
            Some(Response::Failure(message)) => Err(AppError::HttpError(message)),
            None => Err(AppError::HttpError(format!("HTTP 404 for {url}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockLinkExtractor
// ---------------------------------------------------------------------------

/// Reads whitespace-separated tokens instead of HTML:
/// `a:<href>` is an anchor, `img:`/`script:`/`link:` are resources.
#[derive(Clone, Copy, Default)]
pub struct MockLinkExtractor;

impl LinkExtractor for MockLinkExtractor {
    fn extract(&self, html: &str) -> PageLinks {
        let mut links = PageLinks::default();
        for token in html.split_whitespace() {
            if let Some(href) = token.strip_prefix("a:") {
                links.anchors.push(href.to_string());
            } else if let Some(src) = ["img:", "script:", "link:"]
                .iter()
                .find_map(|prefix| token.strip_prefix(prefix))
            {
                links.resources.push(src.to_string());
            }
        }
        links
    }
}

// ---------------------------------------------------------------------------
// MockRenderer
// ---------------------------------------------------------------------------

/// Launcher that either hands out a [`MockFetcher`] or reports the
/// renderer as unavailable.
#[derive(Clone)]
pub struct MockRenderer {
    fetcher: Option<MockFetcher>,
    launches: Arc<AtomicUsize>,
}

impl MockRenderer {
    pub fn available(fetcher: MockFetcher) -> Self {
        Self {
            fetcher: Some(fetcher),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            fetcher: None,
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl RendererLauncher for MockRenderer {
    type Fetcher = MockFetcher;

    async fn launch(&self, _page_timeout: Duration) -> Result<MockFetcher, AppError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        self.fetcher
            .clone()
            .ok_or_else(|| AppError::RendererUnavailable("no browser in tests".into()))
    }
}

// ---------------------------------------------------------------------------
// MockStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreState {
    pages: Vec<Page>,
    versions: Vec<Version>,
    next_id: i64,
    change_error: Option<AppError>,
    ops: Vec<&'static str>,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory Page/Version store. Mutating and retention calls are logged
/// in order, see [`MockStore::ops`].
#[derive(Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<StoreState>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a page directly, bypassing the writer. Returns its id.
    pub fn seed_page(&self, url: &str, hash: &str) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.pages.push(Page {
            id,
            url: url.to_string(),
            local_path: format!("seeded/{id}.html"),
            hash: hash.to_string(),
            last_checked: DateTime::<Utc>::UNIX_EPOCH,
        });
        id
    }

    pub fn push_version(&self, page_id: i64, saved_at: DateTime<Utc>, content_path: &str) -> i64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.versions.push(Version {
            id,
            page_id,
            saved_at,
            content_path: content_path.to_string(),
            checksum: format!("checksum-{id}"),
        });
        id
    }

    /// Make the next `record_change` fail with `error`.
    pub fn fail_next_change(&self, error: AppError) {
        self.state.lock().unwrap().change_error = Some(error);
    }

    pub fn page(&self, url: &str) -> Option<Page> {
        let state = self.state.lock().unwrap();
        state.pages.iter().find(|p| p.url == url).cloned()
    }

    pub fn pages(&self) -> Vec<Page> {
        self.state.lock().unwrap().pages.clone()
    }

    /// All versions, oldest first.
    pub fn versions(&self) -> Vec<Version> {
        let mut versions = self.state.lock().unwrap().versions.clone();
        versions.sort_by_key(|v| (v.saved_at, v.id));
        versions
    }

    /// Names of the store calls made so far, in call order.
    pub fn ops(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().ops.clone()
    }

    fn log(&self, op: &'static str) {
        self.state.lock().unwrap().ops.push(op);
    }
}

impl SnapshotStore for MockStore {
    async fn find_page(&self, url: &str) -> Result<Option<Page>, AppError> {
        Ok(self.page(url))
    }

    async fn find_page_by_path(&self, local_path: &str) -> Result<Option<Page>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pages
            .iter()
            .find(|p| p.local_path == local_path)
            .cloned())
    }

    async fn insert_page(&self, page: &NewPage) -> Result<i64, AppError> {
        self.log("insert_page");
        let mut state = self.state.lock().unwrap();
        if state.pages.iter().any(|p| p.url == page.url) {
            return Err(AppError::DatabaseError(format!("duplicate url {}", page.url)));
        }
        if state.pages.iter().any(|p| p.local_path == page.local_path) {
            return Err(AppError::DatabaseError(format!(
                "duplicate local_path {}",
                page.local_path
            )));
        }
        let id = state.next_id();
        state.pages.push(Page {
            id,
            url: page.url.clone(),
            local_path: page.local_path.clone(),
            hash: page.hash.clone(),
            last_checked: page.last_checked,
        });
        Ok(id)
    }

    async fn touch_page(&self, page_id: i64, checked_at: DateTime<Utc>) -> Result<(), AppError> {
        self.log("touch_page");
        let mut state = self.state.lock().unwrap();
        if let Some(page) = state.pages.iter_mut().find(|p| p.id == page_id) {
            page.last_checked = checked_at;
        }
        Ok(())
    }

    async fn record_change(&self, change: &PageChange) -> Result<i64, AppError> {
        self.log("record_change");
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.change_error.take() {
            return Err(e);
        }
        if state
            .versions
            .iter()
            .any(|v| v.page_id == change.page_id && v.saved_at == change.saved_at)
        {
            return Err(AppError::DatabaseError("duplicate (page_id, saved_at)".into()));
        }
        let id = state.next_id();
        state.versions.push(Version {
            id,
            page_id: change.page_id,
            saved_at: change.saved_at,
            content_path: change.content_path.clone(),
            checksum: change.checksum.clone(),
        });
        if let Some(page) = state.pages.iter_mut().find(|p| p.id == change.page_id) {
            page.local_path = change.local_path.clone();
            page.hash = change.checksum.clone();
            page.last_checked = change.checked_at;
        }
        Ok(id)
    }

    async fn latest_version_at(&self, page_id: i64) -> Result<Option<DateTime<Utc>>, AppError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .versions
            .iter()
            .filter(|v| v.page_id == page_id)
            .map(|v| v.saved_at)
            .max())
    }

    async fn page_hashes(&self) -> Result<Vec<(String, String)>, AppError> {
        let state = self.state.lock().unwrap();
        let mut pairs: Vec<_> = state
            .pages
            .iter()
            .map(|p| (p.url.clone(), p.hash.clone()))
            .collect();
        pairs.sort();
        Ok(pairs)
    }

    async fn list_pages(&self, limit: Option<usize>) -> Result<Vec<PageSummary>, AppError> {
        let state = self.state.lock().unwrap();
        let mut pages: Vec<_> = state
            .pages
            .iter()
            .map(|p| PageSummary {
                url: p.url.clone(),
                local_path: p.local_path.clone(),
                hash: p.hash.clone(),
                last_checked: p.last_checked,
            })
            .collect();
        pages.sort_by(|a, b| b.last_checked.cmp(&a.last_checked));
        pages.truncate(limit.unwrap_or(usize::MAX));
        Ok(pages)
    }

    async fn versions_for_page(&self, page_id: i64) -> Result<Vec<Version>, AppError> {
        let mut versions: Vec<_> = self
            .versions()
            .into_iter()
            .filter(|v| v.page_id == page_id)
            .collect();
        versions.reverse();
        Ok(versions)
    }

    async fn versions_saved_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Version>, AppError> {
        self.log("versions_saved_before");
        Ok(self
            .versions()
            .into_iter()
            .filter(|v| v.saved_at < cutoff)
            .collect())
    }

    async fn version_counts(&self) -> Result<Vec<(i64, i64)>, AppError> {
        self.log("version_counts");
        let mut counts: HashMap<i64, i64> = HashMap::new();
        for v in &self.state.lock().unwrap().versions {
            *counts.entry(v.page_id).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort();
        Ok(counts)
    }

    async fn oldest_versions(&self, page_id: i64, limit: usize) -> Result<Vec<Version>, AppError> {
        Ok(self
            .versions()
            .into_iter()
            .filter(|v| v.page_id == page_id)
            .take(limit)
            .collect())
    }

    async fn delete_version(&self, version_id: i64) -> Result<(), AppError> {
        self.log("delete_version");
        self.state
            .lock()
            .unwrap()
            .versions
            .retain(|v| v.id != version_id);
        Ok(())
    }

    async fn counts(&self) -> Result<(i64, i64), AppError> {
        let state = self.state.lock().unwrap();
        Ok((state.pages.len() as i64, state.versions.len() as i64))
    }

    async fn export_database(&self, dest: &Path) -> Result<(), AppError> {
        self.log("export_database");
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .map_err(|e| AppError::StorageError(format!("{}: {e}", dest.display())))?;
        file.write_all(b"mock database")
            .map_err(|e| AppError::StorageError(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// MockAudit
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockAudit {
    facts: Arc<Mutex<Vec<AuditFact>>>,
    fail: Arc<Mutex<bool>>,
}

impl MockAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_all(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn facts(&self) -> Vec<AuditFact> {
        self.facts.lock().unwrap().clone()
    }
}

impl AuditSink for MockAudit {
    async fn record(&self, fact: &AuditFact) -> Result<(), AppError> {
        if *self.fail.lock().unwrap() {
            return Err(AppError::DatabaseError("audit table unavailable".into()));
        }
        self.facts.lock().unwrap().push(fact.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at `secs` seconds after the Unix epoch.
    pub fn at(secs: i64) -> Self {
        Self {
            now: Mutex::new(DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)),
        }
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Records scheduler events as short strings, e.g. `"stopped:3"`.
#[derive(Clone, Default)]
pub struct MockReporter {
    events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl SchedulerReporter for MockReporter {
    fn report(&self, event: SchedulerEvent<'_>) {
        let name = match event {
            SchedulerEvent::Started { .. } => "started".to_string(),
            SchedulerEvent::TickStarted { tick } => format!("tick:{tick}"),
            SchedulerEvent::DriftDetected { .. } => "drift".to_string(),
            SchedulerEvent::NoDrift { .. } => "no_drift".to_string(),
            SchedulerEvent::CheckAbandoned => "check_abandoned".to_string(),
            SchedulerEvent::CleanupCompleted { .. } => "cleanup_done".to_string(),
            SchedulerEvent::CleanupFailed { error } => format!("cleanup_failed:{error}"),
            SchedulerEvent::Stopped { ticks } => format!("stopped:{ticks}"),
        };
        self.events.lock().unwrap().push(name);
    }
}
