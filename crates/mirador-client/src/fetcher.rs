use std::net::IpAddr;
use std::time::Duration;

use mirador_core::config::DEFAULT_USER_AGENT;
use mirador_core::error::AppError;
use mirador_core::models::FetchedContent;
use mirador_core::traits::Fetcher;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use url::Url;

/// Plain HTTP fetch strategy using reqwest.
///
/// In its default page mode only `text/html` responses are accepted; a
/// fetcher built with [`accept_any_content`](Self::accept_any_content) is
/// used for static resources. SSRF protection is **enabled** by default:
/// requests to private/reserved IP ranges are blocked. Use
/// [`allow_private_urls`](Self::allow_private_urls) to mirror an intranet
/// site or a local test server.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout_secs: u64,
    ssrf_protection: bool,
    html_only: bool,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_options(DEFAULT_USER_AGENT, Duration::from_secs(20))
    }

    pub fn with_options(user_agent: &str, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("HTTP client error: {e}")))?;

        Ok(Self {
            client,
            timeout_secs: timeout.as_secs(),
            ssrf_protection: true,
            html_only: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    /// Drop the `text/html` gate, for fetching static resources.
    pub fn accept_any_content(mut self) -> Self {
        self.html_only = false;
        self
    }
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, AppError> {
        if self.ssrf_protection {
            validate_url(url).await?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpError(format!(
                "HTTP {} for {}",
                status.as_u16(),
                url
            )));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if self.html_only && !is_html(&content_type) {
            return Err(AppError::UnsupportedContentType {
                url: url.to_string(),
                content_type,
            });
        }

        let content = response.bytes().await.map_err(|e| self.classify_error(e))?;
        tracing::debug!(%url, bytes = content.len(), "Fetched");
        Ok(FetchedContent {
            content: content.to_vec(),
            content_type,
        })
    }
}

impl ReqwestFetcher {
    fn classify_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else {
            AppError::HttpError(e.to_string())
        }
    }
}

fn is_html(content_type: &str) -> bool {
    content_type.to_ascii_lowercase().contains("text/html")
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
async fn validate_url(url: &str) -> Result<(), AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::HttpError(format!("Invalid URL: {e}")))?;

    // 1. Scheme check
    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::HttpError(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    // 2. Extract host
    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::HttpError("URL has no host".to_string()))?;

    // 3. If the host is already an IP literal, check it directly
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    // 4. DNS resolve and check all addresses
    let port = parsed.port().unwrap_or(match parsed.scheme() {
        "https" => 443,
        _ => 80,
    });
    let addr = format!("{host}:{port}");
    let addrs: Vec<_> = tokio::net::lookup_host(&addr)
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    for socket_addr in &addrs {
        if is_private_ip(socket_addr.ip()) {
            return Err(AppError::HttpError(format!(
                "SSRF blocked: {host} resolves to private/reserved IP {}",
                socket_addr.ip()
            )));
        }
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()           // 127.0.0.0/8
                || v4.is_private()     // 10/8, 172.16/12, 192.168/16
                || v4.is_link_local()  // 169.254.0.0/16 (cloud metadata!)
                || v4.is_unspecified() // 0.0.0.0
                || v4.is_broadcast()   // 255.255.255.255
                || v4.is_documentation() // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()       // ::1
                || v6.is_unspecified() // ::
                // fe80::/10 (link-local)
                || (v6.segments()[0] & 0xFFC0) == 0xFE80
                // fc00::/7 (unique local)
                || (v6.segments()[0] & 0xFE00) == 0xFC00
                // IPv4-mapped IPv6 (::ffff:x.x.x.x): check the embedded v4
                || match v6.to_ipv4_mapped() {
                    Some(v4) => is_private_ip(IpAddr::V4(v4)),
                    None => false,
                }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::{StatusCode, header};
    use axum::response::Html;
    use axum::routing::get;

    use super::*;

    async fn fixture_site() -> String {
        let app = Router::new()
            .route("/", get(|| async { Html("<html><a href=\"/a\">a</a></html>") }))
            .route(
                "/data.json",
                get(|| async { ([(header::CONTENT_TYPE, "application/json")], "{}") }),
            )
            .route(
                "/logo.png",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], b"PNG".to_vec()) }),
            )
            .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "gone") }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Html("late")
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn local_fetcher() -> ReqwestFetcher {
        ReqwestFetcher::with_options("MiradorTest/1.0", Duration::from_secs(1))
            .unwrap()
            .allow_private_urls()
    }

    #[tokio::test]
    async fn test_fetches_html_page() {
        let base = fixture_site().await;
        let page = local_fetcher().fetch(&format!("{base}/")).await.unwrap();

        assert!(page.content_type.starts_with("text/html"));
        assert_eq!(page.content, b"<html><a href=\"/a\">a</a></html>");
    }

    #[tokio::test]
    async fn test_non_html_is_rejected_in_page_mode() {
        let base = fixture_site().await;
        let err = local_fetcher()
            .fetch(&format!("{base}/data.json"))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::UnsupportedContentType { .. }));
        assert!(err.is_transient_fetch());
    }

    #[tokio::test]
    async fn test_resource_mode_accepts_any_content() {
        let base = fixture_site().await;
        let logo = local_fetcher()
            .accept_any_content()
            .fetch(&format!("{base}/logo.png"))
            .await
            .unwrap();
        assert_eq!(logo.content, b"PNG");
        assert_eq!(logo.content_type, "image/png");
    }

    #[tokio::test]
    async fn test_non_success_status_is_http_error() {
        let base = fixture_site().await;
        let err = local_fetcher()
            .fetch(&format!("{base}/missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HttpError(ref m) if m.contains("404")));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let base = fixture_site().await;
        let err = local_fetcher()
            .fetch(&format!("{base}/slow"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = local_fetcher()
            .fetch(&format!("http://{addr}/"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_ssrf_protection_blocks_loopback_by_default() {
        let base = fixture_site().await;
        let fetcher = ReqwestFetcher::new().unwrap();
        let err = fetcher.fetch(&format!("{base}/")).await.unwrap_err();
        assert!(err.to_string().contains("SSRF blocked"));
    }

    #[test]
    fn test_is_html() {
        assert!(is_html("text/html"));
        assert!(is_html("Text/HTML; charset=utf-8"));
        assert!(!is_html("application/xhtml+xml"));
        assert!(!is_html(""));
    }

    #[test]
    fn test_private_ipv4() {
        assert!(is_private_ip("127.0.0.1".parse().unwrap()));
        assert!(is_private_ip("10.0.0.1".parse().unwrap()));
        assert!(is_private_ip("172.16.0.1".parse().unwrap()));
        assert!(is_private_ip("192.168.1.1".parse().unwrap()));
        assert!(is_private_ip("169.254.169.254".parse().unwrap()));
        assert!(is_private_ip("100.64.0.1".parse().unwrap()));
        assert!(!is_private_ip("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn test_private_ipv6() {
        assert!(is_private_ip("::1".parse().unwrap()));
        assert!(is_private_ip("fe80::1".parse().unwrap()));
        assert!(is_private_ip("::ffff:169.254.169.254".parse().unwrap()));
        assert!(!is_private_ip("2001:4860:4860::8888".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_validate_url_rejects_bad_scheme() {
        let err = validate_url("file:///etc/passwd").await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }
}
