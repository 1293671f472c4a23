use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use mirador_core::error::AppError;
use mirador_core::models::FetchedContent;
use mirador_core::traits::{Fetcher, RendererLauncher};

/// Rendering fetch strategy: headless Chromium over the DevTools Protocol.
///
/// Each [`Fetcher::fetch`] opens a tab, waits a fixed settle delay for
/// client-side rendering, reads the rendered DOM and closes the tab. There
/// is no "fully loaded" signal; the settle delay is best-effort.
///
/// One Chromium process is shared by all clones and lives for one crawl
/// run; it is shut down when the last clone is dropped.
#[derive(Clone)]
pub struct BrowserFetcher {
    browser: Arc<Browser>,
    timeout: Duration,
    settle_delay: Duration,
}

impl BrowserFetcher {
    /// Launch headless Chromium. Any failure is reported as
    /// [`AppError::RendererUnavailable`].
    pub async fn launch(timeout: Duration, settle_delay: Duration) -> Result<Self, AppError> {
        let mut builder = BrowserConfig::builder();
        builder = builder.no_sandbox().disable_default_args();

        // Snap-packaged Chromium exposes a wrapper that rejects standard
        // Chrome CLI flags, so prefer the real binary when we can find it.
        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!(binary = %bin.display(), "Using Chrome binary");
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::RendererUnavailable(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::RendererUnavailable(format!("Failed to launch browser: {e}")))?;

        // The CDP handler must be polled continuously for the connection to work.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser CDP handler error");
                    break;
                }
            }
        });

        Ok(Self {
            browser: Arc::new(browser),
            timeout,
            settle_delay,
        })
    }

    /// Locate a Chrome/Chromium binary.
    ///
    /// `MIRADOR_CHROME_BIN` (or `CHROME_BIN`) wins; otherwise the real binary
    /// inside a snap install, then common system paths. `None` lets
    /// `chromiumoxide` run its own lookup.
    fn find_chrome_binary() -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ];

        ["MIRADOR_CHROME_BIN", "CHROME_BIN"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(PathBuf::from)
            .chain(CANDIDATES.iter().map(PathBuf::from))
            .find(|p| p.exists())
    }
}

impl Fetcher for BrowserFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, AppError> {
        // The tab is opened blank and navigated inside the timed section, so
        // it exists on every exit path and is always closed below.
        let page = tokio::time::timeout(self.timeout, self.browser.new_page("about:blank"))
            .await
            .map_err(|_| AppError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| AppError::NetworkError(format!("Failed to open tab for {url}: {e}")))?;

        let result = tokio::time::timeout(self.timeout, async {
            page.goto(url).await.map_err(|e| {
                AppError::NetworkError(format!("Failed to navigate to {url}: {e}"))
            })?;

            tokio::time::sleep(self.settle_delay).await;

            let html = page.content().await.map_err(|e| {
                AppError::HttpError(format!("Failed to read rendered page {url}: {e}"))
            })?;
            Ok::<_, AppError>(FetchedContent::html(html))
        })
        .await;

        if let Err(e) = page.close().await {
            tracing::debug!(%url, error = %e, "Failed to close browser tab");
        }

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::Timeout(self.timeout.as_secs())),
        }
    }
}

/// Starts one [`BrowserFetcher`] per crawl run.
#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    settle_delay: Duration,
}

impl BrowserLauncher {
    pub fn new(settle_delay: Duration) -> Self {
        Self { settle_delay }
    }
}

impl Default for BrowserLauncher {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl RendererLauncher for BrowserLauncher {
    type Fetcher = BrowserFetcher;

    async fn launch(&self, page_timeout: Duration) -> Result<BrowserFetcher, AppError> {
        BrowserFetcher::launch(page_timeout, self.settle_delay).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn stalled_site() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let app = axum::Router::new().route(
                "/stall",
                axum::routing::get(|| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    axum::response::Html("late")
                }),
            );
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    #[ignore = "needs a local Chrome or Chromium"]
    async fn test_timed_out_fetch_closes_its_tab() {
        let base = stalled_site().await;
        let fetcher = BrowserFetcher::launch(Duration::from_secs(1), Duration::ZERO)
            .await
            .unwrap();
        let open_before = fetcher.browser.pages().await.unwrap().len();

        let err = fetcher.fetch(&format!("{base}/stall")).await.unwrap_err();

        assert!(matches!(err, AppError::Timeout(1)));
        assert_eq!(fetcher.browser.pages().await.unwrap().len(), open_before);
    }
}
