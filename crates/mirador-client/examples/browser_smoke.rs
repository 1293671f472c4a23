/// Smoke-test for the rendering strategy.
///
/// Launches headless Chromium, renders the given URL (default
/// <https://example.com>) and prints the links the crawler would follow.
///
/// Run with:
///   cargo run -p mirador-client --example browser_smoke --features browser -- https://example.com
use std::time::Duration;

use mirador_client::{BrowserLauncher, ScraperLinkExtractor};
use mirador_core::traits::{Fetcher, LinkExtractor, RendererLauncher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://example.com".to_string());

    println!("Launching headless browser…");
    let fetcher = BrowserLauncher::default()
        .launch(Duration::from_secs(30))
        .await?;

    println!("Rendering {url} …");
    let page = fetcher.fetch(&url).await?;
    let html = String::from_utf8_lossy(&page.content);
    anyhow::ensure!(html.len() > 100, "rendered HTML suspiciously short");

    let links = ScraperLinkExtractor.extract(&html);
    println!(
        "OK: {} bytes, {} anchors, {} resources",
        page.content.len(),
        links.anchors.len(),
        links.resources.len()
    );
    for href in links.anchors.iter().take(10) {
        println!("  a  {href}");
    }
    Ok(())
}
