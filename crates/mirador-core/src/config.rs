use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;

use crate::error::AppError;
use crate::retention::RetentionPolicy;

pub const DEFAULT_USER_AGENT: &str = "MiradorBot/1.0";

/// Runtime configuration for the mirroring core.
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub seed_url: Option<String>,
    pub max_pages: usize,
    pub page_timeout: Duration,
    pub check_interval: Duration,
    pub retention: RetentionPolicy,
    pub snapshot_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub key_file: PathBuf,
    pub use_renderer: bool,
    pub fallback_to_plain: bool,
    pub user_agent: String,
    pub settle_delay: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            seed_url: None,
            max_pages: 500,
            page_timeout: Duration::from_secs(20),
            check_interval: Duration::from_secs(3600),
            retention: RetentionPolicy::default(),
            snapshot_dir: PathBuf::from("data/site_copy"),
            backup_dir: PathBuf::from("data/backups"),
            key_file: PathBuf::from("data/snapshot.key"),
            use_renderer: true,
            fallback_to_plain: true,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            settle_delay: Duration::from_millis(1000),
        }
    }
}

impl MirrorConfig {
    /// Read configuration from `MIRADOR_*` environment variables.
    ///
    /// - `MIRADOR_SEED_URL`
    /// - `MIRADOR_MAX_PAGES` (default 500)
    /// - `MIRADOR_PAGE_TIMEOUT_SECS` (default 20)
    /// - `MIRADOR_CHECK_INTERVAL_SECS` (default 3600)
    /// - `MIRADOR_RETENTION_DAYS` (default 30)
    /// - `MIRADOR_RETENTION_KEEP` (default 10)
    /// - `MIRADOR_SNAPSHOT_DIR`, `MIRADOR_BACKUP_DIR`, `MIRADOR_KEY_FILE`
    /// - `MIRADOR_RENDERER`, `MIRADOR_FALLBACK_TO_PLAIN` (booleans, default true)
    /// - `MIRADOR_USER_AGENT`
    /// - `MIRADOR_SETTLE_MS` (default 1000)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_pages = parse_or(&get, "MIRADOR_MAX_PAGES", defaults.max_pages)?;
        let page_timeout = positive_secs(&get, "MIRADOR_PAGE_TIMEOUT_SECS", defaults.page_timeout)?;
        let check_interval =
            positive_secs(&get, "MIRADOR_CHECK_INTERVAL_SECS", defaults.check_interval)?;

        let retention_days: i64 =
            parse_or(&get, "MIRADOR_RETENTION_DAYS", defaults.retention.max_age.num_days())?;
        if retention_days < 0 {
            return Err(AppError::ConfigError(
                "MIRADOR_RETENTION_DAYS must not be negative".into(),
            ));
        }
        let max_age = TimeDelta::try_days(retention_days).ok_or_else(|| {
            AppError::ConfigError(format!("MIRADOR_RETENTION_DAYS is too large: {retention_days}"))
        })?;
        let max_versions = parse_or(&get, "MIRADOR_RETENTION_KEEP", defaults.retention.max_versions)?;

        let settle_ms: u64 = parse_or(
            &get,
            "MIRADOR_SETTLE_MS",
            defaults.settle_delay.as_millis() as u64,
        )?;

        Ok(Self {
            seed_url: get("MIRADOR_SEED_URL"),
            max_pages,
            page_timeout,
            check_interval,
            retention: RetentionPolicy {
                max_age,
                max_versions,
            },
            snapshot_dir: get("MIRADOR_SNAPSHOT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_dir),
            backup_dir: get("MIRADOR_BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.backup_dir),
            key_file: get("MIRADOR_KEY_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.key_file),
            use_renderer: bool_or(&get, "MIRADOR_RENDERER", defaults.use_renderer)?,
            fallback_to_plain: bool_or(&get, "MIRADOR_FALLBACK_TO_PLAIN", defaults.fallback_to_plain)?,
            user_agent: get("MIRADOR_USER_AGENT").unwrap_or(defaults.user_agent),
            settle_delay: Duration::from_millis(settle_ms),
        })
    }

    /// The seed URL, or a configuration error naming the variable.
    pub fn require_seed(&self) -> Result<&str, AppError> {
        self.seed_url.as_deref().ok_or_else(|| {
            AppError::ConfigError("MIRADOR_SEED_URL not set. Required for crawling.".into())
        })
    }
}

fn parse_or<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, AppError> {
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            AppError::ConfigError(format!("Invalid {key} '{raw}': must be a non-negative integer"))
        }),
    }
}

fn positive_secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, AppError> {
    let secs: u64 = parse_or(get, key, default.as_secs())?;
    if secs == 0 {
        return Err(AppError::ConfigError(format!("{key} must be at least 1")));
    }
    Ok(Duration::from_secs(secs))
}

fn bool_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, AppError> {
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::ConfigError(format!(
                "Invalid {key} '{v}': expected true or false"
            ))),
        },
    }
}
