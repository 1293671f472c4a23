//! Bounded breadth-first traversal state for one crawl run.
//!
//! The frontier owns no I/O: the service feeds it the links of each
//! fetched page and asks it for the next URL. A fresh `Frontier` is built
//! for every run, so revisits across runs are expected.

use std::collections::{HashSet, VecDeque};

use url::Url;

use crate::error::AppError;
use crate::models::PageLinks;

/// Path extensions fetched as resources instead of crawled as pages.
pub const STATIC_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "css", "js", "pdf", "docx", "zip", "rar",
];

#[derive(Debug)]
pub struct Frontier {
    seed: Url,
    queue: VecDeque<Url>,
    /// Pages either queued or already yielded.
    seen: HashSet<String>,
    resources_seen: HashSet<String>,
    visited: usize,
    max_pages: usize,
}

impl Frontier {
    pub fn new(seed: &str, max_pages: usize) -> Result<Self, AppError> {
        let mut seed = Url::parse(seed)
            .map_err(|e| AppError::ConfigError(format!("Invalid seed URL '{seed}': {e}")))?;
        if !is_web_url(&seed) {
            return Err(AppError::ConfigError(format!(
                "Seed URL must be http(s) with a host: {seed}"
            )));
        }
        seed.set_fragment(None);

        let mut seen = HashSet::new();
        seen.insert(seed.to_string());
        Ok(Self {
            queue: VecDeque::from([seed.clone()]),
            seed,
            seen,
            resources_seen: HashSet::new(),
            visited: 0,
            max_pages,
        })
    }

    /// Number of pages handed out so far.
    pub fn visited(&self) -> usize {
        self.visited
    }

    /// Next page in BFS order, or `None` once the queue is empty or the
    /// page cap has been reached.
    pub fn next(&mut self) -> Option<Url> {
        if self.visited >= self.max_pages {
            return None;
        }
        let url = self.queue.pop_front()?;
        self.visited += 1;
        Some(url)
    }

    /// Feed the links found on `base`. Same-origin pages are queued; the
    /// returned list holds same-origin resources not yet fetched this run.
    pub fn discover(&mut self, base: &Url, links: &PageLinks) -> Vec<Url> {
        let mut resources = Vec::new();

        for raw in &links.anchors {
            let Some(url) = self.resolve_same_origin(base, raw) else {
                continue;
            };
            if is_static_resource(&url) {
                if self.resources_seen.insert(url.to_string()) {
                    resources.push(url);
                }
            } else if self.seen.insert(url.to_string()) {
                self.queue.push_back(url);
            }
        }

        for raw in &links.resources {
            let Some(url) = self.resolve_same_origin(base, raw) else {
                continue;
            };
            if self.resources_seen.insert(url.to_string()) {
                resources.push(url);
            }
        }

        resources
    }

    fn resolve_same_origin(&self, base: &Url, raw: &str) -> Option<Url> {
        let url = resolve(base, raw)?;
        is_same_origin(&self.seed, &url).then_some(url)
    }
}

/// Resolve a raw reference against the page it was found on.
///
/// Returns `None` for empty, `data:` and non-http(s) references. The
/// fragment is always stripped.
pub fn resolve(base: &Url, raw: &str) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    let mut url = base.join(raw).ok()?;
    if !is_web_url(&url) {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Same host and effective port.
pub fn is_same_origin(seed: &Url, candidate: &Url) -> bool {
    seed.host_str() == candidate.host_str()
        && seed.port_or_known_default() == candidate.port_or_known_default()
}

pub fn is_static_resource(url: &Url) -> bool {
    let Some(last) = url.path_segments().and_then(|mut s| s.next_back()) else {
        return false;
    };
    match last.rsplit_once('.') {
        Some((_, ext)) => STATIC_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

fn is_web_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some()
}
