pub mod fetcher;
pub mod links;

#[cfg(feature = "browser")]
pub mod browser_fetcher;

#[cfg(feature = "browser")]
pub use browser_fetcher::{BrowserFetcher, BrowserLauncher};
pub use fetcher::ReqwestFetcher;
pub use links::ScraperLinkExtractor;
