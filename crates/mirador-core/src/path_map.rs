//! Mapping from URLs to locations inside the snapshot tree.
//!
//! All returned paths are relative to the snapshot root and use `/` as the
//! separator, so they can be stored as-is in the database.

use chrono::{DateTime, Utc};
use url::Url;

use crate::models::compute_hash;

/// Directory holding per-version snapshot copies.
pub const VERSIONS_DIR: &str = ".versions";

/// Snapshot location of an HTML page.
///
/// - empty path or trailing `/` → `<host>/<path>/index.html`
/// - otherwise the last segment is the file name, with `.html` appended
///   when it has no extension
/// - a query string adds a short digest before the extension
pub fn page_path(url: &Url) -> String {
    let mut parts = vec![host_dir(url)];
    let segments = clean_segments(url.path());
    let directory_like = url.path().is_empty() || url.path().ends_with('/');

    let file = match segments.split_last() {
        Some((last, dirs)) if !directory_like => {
            parts.extend(dirs.iter().map(|s| s.to_string()));
            if last.contains('.') {
                last.to_string()
            } else {
                format!("{last}.html")
            }
        }
        _ => {
            parts.extend(segments.iter().map(|s| s.to_string()));
            "index.html".to_string()
        }
    };

    let file = match url.query() {
        Some(query) if !query.is_empty() => with_digest_suffix(&file, query),
        _ => file,
    };
    parts.push(file);
    parts.join("/")
}

/// Fallback page location used when [`page_path`] is already taken by a
/// different URL, e.g. `/about` and `/about.html`. A digest of the whole
/// URL goes before the extension: `about_<8 hex>.html`.
pub fn disambiguated_page_path(url: &Url) -> String {
    let path = page_path(url);
    match path.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/{}", with_digest_suffix(file, url.as_str())),
        None => with_digest_suffix(&path, url.as_str()),
    }
}

/// Location of a static resource, written verbatim.
///
/// The query string is ignored; a trailing `/` maps to `index`.
pub fn resource_path(url: &Url) -> String {
    let mut parts = vec![host_dir(url)];
    let segments = clean_segments(url.path());
    parts.extend(segments.iter().map(|s| s.to_string()));
    if segments.is_empty() || url.path().ends_with('/') {
        parts.push("index".to_string());
    }
    parts.join("/")
}

/// Location of the per-version copy of a page.
pub fn version_path(page_id: i64, saved_at: DateTime<Utc>) -> String {
    format!(
        "{VERSIONS_DIR}/{page_id}/{}.snap",
        saved_at.timestamp_micros()
    )
}

fn host_dir(url: &Url) -> String {
    let host = url.host_str().unwrap_or("_");
    match url.port() {
        Some(port) => format!("{host}_{port}"),
        None => host.to_string(),
    }
}

fn clean_segments(path: &str) -> Vec<&str> {
    path.split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect()
}

fn with_digest_suffix(file: &str, input: &str) -> String {
    let digest = compute_hash(input.as_bytes());
    let tag = &digest[..8];
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{tag}.{ext}"),
        _ => format!("{file}_{tag}"),
    }
}
