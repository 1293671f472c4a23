use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::backup::BackupArchiver;
use crate::config::MirrorConfig;
use crate::detector::SnapshotWriter;
use crate::error::AppError;
use crate::frontier::Frontier;
use crate::models::{
    AuditFact, CrawlReport, FetchStrategy, FetchedContent, MirrorStats, PageLinks, PageSummary,
    UpdateReport, Version, compute_hash,
};
use crate::path_map::resource_path;
use crate::retention::{RetentionManager, RetentionPolicy, RetentionReport};
use crate::scheduler::MaintenanceJob;
use crate::snapshot::SnapshotFiles;
use crate::traits::{
    AuditSink, Clock, Fetcher, LinkExtractor, RendererLauncher, SnapshotStore, SystemClock,
};

/// Crawl parameters used by `update` and the change check.
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub seed_url: Option<String>,
    pub max_pages: usize,
    pub page_timeout: Duration,
    pub use_renderer: bool,
    pub fallback_to_plain: bool,
}

impl CrawlSettings {
    fn require_seed(&self) -> Result<&str, AppError> {
        self.seed_url.as_deref().ok_or_else(|| {
            AppError::ConfigError("No seed URL configured (MIRADOR_SEED_URL)".into())
        })
    }
}

impl From<&MirrorConfig> for CrawlSettings {
    fn from(config: &MirrorConfig) -> Self {
        Self {
            seed_url: config.seed_url.clone(),
            max_pages: config.max_pages,
            page_timeout: config.page_timeout,
            use_renderer: config.use_renderer,
            fallback_to_plain: config.fallback_to_plain,
        }
    }
}

/// Result of an explicit update: a crawl followed by a retention pass.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub crawl: CrawlReport,
    pub retention: RetentionReport,
}

/// The plain fetchers: one gated to HTML pages, one accepting any content
/// for static resources.
#[derive(Debug, Clone)]
pub struct PlainFetchers<P> {
    pub pages: P,
    pub resources: P,
}

/// Facade over the mirroring core.
///
/// Mutating operations (`crawl`, `update`, `cleanup`, `make_backup`) are
/// serialized through one store-wide gate. Reads never take it.
pub struct MirrorService<P, R, L, S, A>
where
    P: Fetcher,
    R: RendererLauncher,
    L: LinkExtractor,
    S: SnapshotStore,
    A: AuditSink,
{
    plain: PlainFetchers<P>,
    renderer: R,
    links: L,
    store: S,
    audit: A,
    files: SnapshotFiles,
    retention: RetentionManager<S>,
    archiver: BackupArchiver,
    settings: CrawlSettings,
    clock: Arc<dyn Clock>,
    store_gate: Mutex<()>,
}

impl<P, R, L, S, A> MirrorService<P, R, L, S, A>
where
    P: Fetcher,
    R: RendererLauncher,
    L: LinkExtractor,
    S: SnapshotStore,
    A: AuditSink,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        plain: PlainFetchers<P>,
        renderer: R,
        links: L,
        store: S,
        audit: A,
        files: SnapshotFiles,
        archiver: BackupArchiver,
        settings: CrawlSettings,
        retention: RetentionPolicy,
    ) -> Self {
        let retention = RetentionManager::new(store.clone(), files.clone(), retention);
        Self {
            plain,
            renderer,
            links,
            store,
            audit,
            files,
            retention,
            archiver,
            settings,
            clock: Arc::new(SystemClock),
            store_gate: Mutex::new(()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.settings
    }

    /// Full mirroring pass from `seed`.
    ///
    /// Tries the rendering strategy first; if it cannot start and fallback
    /// is enabled, the whole run uses the plain strategy. Transient fetch
    /// failures skip the URL. Storage failures abort the run.
    pub async fn crawl(
        &self,
        seed: &str,
        max_pages: usize,
        page_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CrawlReport, AppError> {
        let _gate = self.store_gate.lock().await;
        self.crawl_locked(seed, max_pages, page_timeout, cancel).await
    }

    /// Crawl the configured seed, then prune history.
    pub async fn update(&self, cancel: &CancellationToken) -> Result<UpdateOutcome, AppError> {
        let seed = self.settings.require_seed()?;
        let _gate = self.store_gate.lock().await;

        let crawl = self
            .crawl_locked(
                seed,
                self.settings.max_pages,
                self.settings.page_timeout,
                cancel,
            )
            .await?;
        let retention = self.retention.cleanup(self.clock.now()).await?;

        self.emit(AuditFact::ManualUpdate {
            summary: crawl.summary(),
        })
        .await;
        Ok(UpdateOutcome { crawl, retention })
    }

    /// Run an update only if nothing has been mirrored yet.
    pub async fn seed_if_empty(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<UpdateOutcome>, AppError> {
        let (pages, _) = self.store.counts().await?;
        if pages > 0 {
            return Ok(None);
        }
        tracing::info!("Snapshot store is empty, running initial update");
        self.update(cancel).await.map(Some)
    }

    /// Read-only drift check against the configured seed.
    ///
    /// Always the plain strategy, anchors only, no writes. Returns empty
    /// lists if the check cannot run at all.
    pub async fn check_for_updates(&self) -> UpdateReport {
        match self.try_check().await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "Change check failed");
                UpdateReport::default()
            }
        }
    }

    pub async fn cleanup(&self) -> Result<RetentionReport, AppError> {
        let _gate = self.store_gate.lock().await;
        self.retention.cleanup(self.clock.now()).await
    }

    /// Archive the database and the snapshot tree.
    ///
    /// The store first exports a consistent copy of itself next to the
    /// archives; the copy is what gets zipped and is removed afterwards.
    pub async fn make_backup(&self) -> Result<PathBuf, AppError> {
        let _gate = self.store_gate.lock().await;
        let now = self.clock.now();
        let staged = self.archiver.staging_path(now);

        tokio::fs::create_dir_all(self.archiver.backup_dir())
            .await
            .map_err(|e| {
                AppError::ArchiveError(format!(
                    "Failed to create backup dir {}: {e}",
                    self.archiver.backup_dir().display()
                ))
            })?;
        // A crashed earlier run may have left its copy behind.
        let _ = tokio::fs::remove_file(&staged).await;
        self.store.export_database(&staged).await?;

        let archiver = self.archiver.clone();
        let copy = staged.clone();
        let created = tokio::task::spawn_blocking(move || archiver.create(now, &copy))
            .await
            .map_err(|e| AppError::ArchiveError(format!("Backup task failed: {e}")));
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            tracing::warn!(path = %staged.display(), error = %e, "Failed to remove staged database copy");
        }
        let path = created??;

        self.emit(AuditFact::Backup {
            path: path.display().to_string(),
        })
        .await;
        Ok(path)
    }

    /// Current decrypted snapshot bytes, or `None` for unknown URLs.
    pub async fn get_raw_content(&self, url: &str) -> Result<Option<Vec<u8>>, AppError> {
        let Some(page) = self.store.find_page(&normalize_url(url)).await? else {
            return Ok(None);
        };
        let content = self.files.read_snapshot(&page.local_path).await?;
        if content.is_none() {
            tracing::warn!(%url, path = %page.local_path, "Snapshot file missing");
        }
        Ok(content)
    }

    /// Pages ordered by `last_checked`, most recent first.
    pub async fn list_pages(&self, limit: Option<usize>) -> Result<Vec<PageSummary>, AppError> {
        self.store.list_pages(limit).await
    }

    /// URLs whose text, or decrypted content, contains `query`
    /// (case-insensitive). Unreadable snapshots are skipped.
    pub async fn search_pages(&self, query: &str) -> Result<Vec<String>, AppError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        for page in self.store.list_pages(None).await? {
            if page.url.to_lowercase().contains(&needle) {
                hits.push(page.url);
                continue;
            }
            match self.files.read_snapshot(&page.local_path).await {
                Ok(Some(bytes)) => {
                    if String::from_utf8_lossy(&bytes).to_lowercase().contains(&needle) {
                        hits.push(page.url);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(url = %page.url, error = %e, "Skipping unreadable snapshot");
                }
            }
        }
        Ok(hits)
    }

    /// Versions of a page, newest first; `None` for unknown URLs.
    pub async fn page_history(&self, url: &str) -> Result<Option<Vec<Version>>, AppError> {
        match self.store.find_page(&normalize_url(url)).await? {
            Some(page) => self.store.versions_for_page(page.id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn stats(&self) -> Result<MirrorStats, AppError> {
        let (pages, versions) = self.store.counts().await?;
        let snapshot_bytes = self.files.tree_size().await?;
        Ok(MirrorStats {
            pages,
            versions,
            snapshot_bytes,
        })
    }

    async fn crawl_locked(
        &self,
        seed: &str,
        max_pages: usize,
        page_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<CrawlReport, AppError> {
        let mut frontier = Frontier::new(seed, max_pages)?;
        let writer = SnapshotWriter::new(
            self.store.clone(),
            self.audit.clone(),
            self.files.clone(),
            self.clock.clone(),
        );

        if self.settings.use_renderer {
            match self.renderer.launch(page_timeout).await {
                Ok(rendered) => {
                    tracing::info!(%seed, "Crawling with rendering strategy");
                    return self
                        .run_crawl(
                            &mut frontier,
                            &rendered,
                            FetchStrategy::Rendered,
                            page_timeout,
                            &writer,
                            cancel,
                        )
                        .await;
                }
                Err(e) if self.settings.fallback_to_plain => {
                    tracing::warn!(error = %e, "Renderer unavailable, using plain fetch for this run");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(%seed, "Crawling with plain strategy");
        self.run_crawl(
            &mut frontier,
            &self.plain.pages,
            FetchStrategy::Plain,
            page_timeout,
            &writer,
            cancel,
        )
        .await
    }

    async fn run_crawl<F: Fetcher>(
        &self,
        frontier: &mut Frontier,
        fetcher: &F,
        strategy: FetchStrategy,
        page_timeout: Duration,
        writer: &SnapshotWriter<S, A>,
        cancel: &CancellationToken,
    ) -> Result<CrawlReport, AppError> {
        let mut report = CrawlReport::new(strategy);

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let Some(url) = frontier.next() else {
                break;
            };

            let fetched = tokio::select! {
                fetched = fetch_bounded(fetcher, &url, page_timeout) => fetched,
                () = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
            };
            let content = match fetched {
                Ok(content) => content,
                Err(e) => {
                    if e.is_transient_fetch() {
                        tracing::warn!(%url, error = %e, "Skipping page");
                    } else {
                        tracing::error!(%url, error = %e, kind = ?e.kind(), "Skipping page");
                    }
                    report.failed.push(url.to_string());
                    continue;
                }
            };

            let outcome = writer.record(&url, &content.content).await?;
            report.record(url.as_str(), outcome);

            let links = self.links.extract(&String::from_utf8_lossy(&content.content));
            let resources = frontier.discover(&url, &links);
            report.resources_saved += self.save_resources(&resources, page_timeout).await;
        }

        if report.cancelled {
            tracing::info!(summary = %report.summary(), "Crawl cancelled");
        } else {
            tracing::info!(summary = %report.summary(), "Crawl finished");
        }
        Ok(report)
    }

    /// Fetch and store resources verbatim. Failures are ignored.
    async fn save_resources(&self, resources: &[Url], page_timeout: Duration) -> usize {
        let mut saved = 0;
        for url in resources {
            let content = match fetch_bounded(&self.plain.resources, url, page_timeout).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::debug!(%url, error = %e, "Resource fetch failed");
                    continue;
                }
            };
            match self
                .files
                .write_resource(&resource_path(url), &content.content)
                .await
            {
                Ok(()) => saved += 1,
                Err(e) => tracing::debug!(%url, error = %e, "Resource write failed"),
            }
        }
        saved
    }

    async fn try_check(&self) -> Result<UpdateReport, AppError> {
        let mut frontier = Frontier::new(self.settings.require_seed()?, self.settings.max_pages)?;
        let mut live = Vec::new();

        while let Some(url) = frontier.next() {
            let content =
                match fetch_bounded(&self.plain.pages, &url, self.settings.page_timeout).await {
                    Ok(content) => content,
                    Err(e) => {
                        tracing::debug!(%url, error = %e, "Unreachable during check");
                        continue;
                    }
                };
            live.push((url.to_string(), compute_hash(&content.content)));

            let anchors = self
                .links
                .extract(&String::from_utf8_lossy(&content.content))
                .anchors;
            frontier.discover(
                &url,
                &PageLinks {
                    anchors,
                    resources: Vec::new(),
                },
            );
        }

        let stored = self.store.page_hashes().await?;
        let report = UpdateReport::classify(&stored, &live);
        tracing::info!(
            changed = report.changed.len(),
            new = report.new.len(),
            removed = report.removed.len(),
            "Change check complete"
        );
        Ok(report)
    }

    async fn emit(&self, fact: AuditFact) {
        if let Err(e) = self.audit.record(&fact).await {
            tracing::warn!(action = fact.action(), error = %e, "Failed to record audit fact");
        }
    }
}

impl<P, R, L, S, A> MaintenanceJob for MirrorService<P, R, L, S, A>
where
    P: Fetcher,
    R: RendererLauncher,
    L: LinkExtractor,
    S: SnapshotStore,
    A: AuditSink,
{
    async fn check(&self) -> UpdateReport {
        self.check_for_updates().await
    }

    async fn drift_found(&self, report: &UpdateReport) {
        self.emit(AuditFact::AutoUpdatesFound {
            report: report.clone(),
        })
        .await;
    }

    async fn cleanup(&self) -> Result<RetentionReport, AppError> {
        MirrorService::cleanup(self).await
    }
}

async fn fetch_bounded<F: Fetcher>(
    fetcher: &F,
    url: &Url,
    timeout: Duration,
) -> Result<FetchedContent, AppError> {
    tokio::time::timeout(timeout, fetcher.fetch(url.as_str()))
        .await
        .unwrap_or(Err(AppError::Timeout(timeout.as_secs())))
}

/// Canonical form used as the page key: parsed, fragment stripped.
fn normalize_url(raw: &str) -> String {
    match Url::parse(raw.trim()) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}
