use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mirador_client::{ReqwestFetcher, ScraperLinkExtractor};
use mirador_core::{
    BackupArchiver, CrawlSettings, MirrorConfig, MirrorService, PlainFetchers, Scheduler,
    SchedulerConfig, SnapshotCipher, SnapshotFiles, TracingSchedulerReporter,
};
use mirador_db::{AuditRepository, Database, DatabaseConfig, SnapshotRepository};

#[cfg(feature = "browser")]
type Renderer = mirador_client::BrowserLauncher;
#[cfg(not(feature = "browser"))]
type Renderer = mirador_core::NoRenderer;

type Service =
    MirrorService<ReqwestFetcher, Renderer, ScraperLinkExtractor, SnapshotRepository, AuditRepository>;

#[derive(Parser)]
#[command(name = "mirador", version, about = "Versioned website mirror")]
struct Cli {
    /// Allow fetching hosts on private or loopback addresses
    #[arg(long, global = true, env = "MIRADOR_ALLOW_PRIVATE_URLS")]
    allow_private_urls: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Mirror(MirrorCommand),

    /// Write a new snapshot encryption key
    Keygen {
        /// Key file (defaults to MIRADOR_KEY_FILE)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Subcommands that work on the opened database and snapshot tree.
#[derive(Subcommand)]
enum MirrorCommand {
    /// Mirror a site once, recording new and changed pages
    Crawl {
        /// Seed URL (defaults to MIRADOR_SEED_URL)
        #[arg(short, long)]
        url: Option<String>,

        /// Maximum number of pages to visit
        #[arg(short, long)]
        max_pages: Option<usize>,

        /// Per-page timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Crawl the configured seed, then apply retention
    Update,

    /// Compare the live site against the stored hashes without writing
    Check,

    /// Prune old versions according to the retention policy
    Cleanup,

    /// Archive the database and snapshot tree into a zip file
    Backup,

    /// List mirrored pages, most recently checked first
    Pages {
        /// Number of pages to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Find pages whose URL or content contains a phrase
    Search {
        /// Case-insensitive search phrase
        query: String,
    },

    /// Print the current snapshot of a page
    Raw {
        /// Page URL
        url: String,
    },

    /// Show the stored versions of a page
    History {
        /// Page URL
        url: String,
    },

    /// Show page and version counts and the size of the snapshot tree
    Stats,

    /// Show recent audit log entries
    Audit {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Run the periodic change check and retention loop until Ctrl+C
    Serve {
        /// Seconds between checks (defaults to MIRADOR_CHECK_INTERVAL_SECS)
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("mirador=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = MirrorConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        // Key generation must not touch the database or the snapshot tree.
        Commands::Keygen { output } => cmd_keygen(&output.unwrap_or(config.key_file)),
        Commands::Mirror(command) => {
            let app = App::open(config, cli.allow_private_urls).await?;
            run(app, command).await
        }
    }
}

async fn run(app: App, command: MirrorCommand) -> Result<()> {
    match command {
        MirrorCommand::Crawl {
            url,
            max_pages,
            timeout,
        } => {
            let settings = app.service.settings();
            let seed = match url {
                Some(url) => url,
                None => app
                    .config
                    .require_seed()
                    .map_err(|e| anyhow::anyhow!(e))?
                    .to_string(),
            };
            let max_pages = max_pages.unwrap_or(settings.max_pages);
            let timeout = timeout.map_or(settings.page_timeout, Duration::from_secs);

            let cancel = cancel_on_ctrl_c();
            let report = app
                .service
                .crawl(&seed, max_pages, timeout, &cancel)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            tracing::info!("{}", report.summary());
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        MirrorCommand::Update => {
            let cancel = cancel_on_ctrl_c();
            let outcome = app
                .service
                .update(&cancel)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        MirrorCommand::Check => {
            let report = app.service.check_for_updates().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        MirrorCommand::Cleanup => {
            let report = app.service.cleanup().await.map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        MirrorCommand::Backup => {
            let path = app
                .service
                .make_backup()
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", path.display());
        }
        MirrorCommand::Pages { limit } => cmd_pages(&app.service, limit).await?,
        MirrorCommand::Search { query } => {
            let hits = app
                .service
                .search_pages(&query)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            if hits.is_empty() {
                println!("No pages match '{query}'");
            }
            for url in hits {
                println!("{url}");
            }
        }
        MirrorCommand::Raw { url } => {
            let content = app
                .service
                .get_raw_content(&url)
                .await
                .map_err(|e| anyhow::anyhow!(e))?
                .with_context(|| format!("No snapshot stored for {url}"))?;
            use std::io::Write;
            std::io::stdout()
                .write_all(&content)
                .context("Failed to write snapshot to stdout")?;
        }
        MirrorCommand::History { url } => cmd_history(&app.service, &url).await?,
        MirrorCommand::Stats => {
            let stats = app.service.stats().await.map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        MirrorCommand::Audit { limit } => {
            let entries = app
                .db
                .audit_repo()
                .recent(limit)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            for entry in entries {
                println!(
                    "{}  {:<8} {:<20} {}",
                    entry.ts.format("%Y-%m-%d %H:%M:%S UTC"),
                    entry.actor,
                    entry.action,
                    entry.details
                );
            }
        }
        MirrorCommand::Serve { interval } => {
            let interval = interval.map_or(app.config.check_interval, Duration::from_secs);
            cmd_serve(app, interval).await?;
        }
    }

    Ok(())
}

/// Everything a subcommand may need, wired from configuration.
struct App {
    config: MirrorConfig,
    db: Database,
    service: Arc<Service>,
}

impl App {
    async fn open(config: MirrorConfig, allow_private_urls: bool) -> Result<Self> {
        let db_config = DatabaseConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;
        let db = Database::connect(&db_config)
            .await
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("Failed to open database {}", db_config.path.display()))?;
        db.migrate().await.map_err(|e| anyhow::anyhow!(e))?;

        let cipher = SnapshotCipher::load(&config.key_file).map_err(|e| anyhow::anyhow!(e))?;
        let files = SnapshotFiles::new(&config.snapshot_dir, cipher);

        let mut pages = ReqwestFetcher::with_options(&config.user_agent, config.page_timeout)
            .context("Failed to create HTTP client")?;
        if allow_private_urls {
            pages = pages.allow_private_urls();
        }
        let resources = pages.clone().accept_any_content();

        let archiver = BackupArchiver::new(db.path(), &config.snapshot_dir, &config.backup_dir);

        let service = MirrorService::new(
            PlainFetchers { pages, resources },
            renderer(&config),
            ScraperLinkExtractor,
            db.snapshot_repo(),
            db.audit_repo(),
            files,
            archiver,
            CrawlSettings::from(&config),
            config.retention.clone(),
        );

        Ok(Self {
            config,
            db,
            service: Arc::new(service),
        })
    }
}

#[cfg(feature = "browser")]
fn renderer(config: &MirrorConfig) -> Renderer {
    mirador_client::BrowserLauncher::new(config.settle_delay)
}

#[cfg(not(feature = "browser"))]
fn renderer(config: &MirrorConfig) -> Renderer {
    if config.use_renderer {
        tracing::debug!("Built without the browser feature; crawls use plain HTTP");
    }
    mirador_core::NoRenderer
}

/// A token that is cancelled on the first Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping after the current page");
            child.cancel();
        }
    });
    token
}

async fn cmd_pages(service: &Service, limit: Option<usize>) -> Result<()> {
    let pages = service
        .list_pages(limit)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    if pages.is_empty() {
        println!("No pages mirrored yet");
        return Ok(());
    }

    for page in &pages {
        println!(
            "  {}  {}...  {}",
            page.last_checked.format("%Y-%m-%d %H:%M:%S UTC"),
            &page.hash[..8.min(page.hash.len())],
            page.url
        );
    }
    println!("\nTotal: {} pages", pages.len());
    Ok(())
}

async fn cmd_history(service: &Service, url: &str) -> Result<()> {
    let Some(versions) = service
        .page_history(url)
        .await
        .map_err(|e| anyhow::anyhow!(e))?
    else {
        println!("{url} is not mirrored");
        return Ok(());
    };

    if versions.is_empty() {
        println!("No earlier versions of {url}");
        return Ok(());
    }

    println!("Version history for {url}:\n");
    for version in &versions {
        println!(
            "  {}  {}...  {}",
            version.saved_at.format("%Y-%m-%d %H:%M:%S%.6f UTC"),
            &version.checksum[..8.min(version.checksum.len())],
            version.content_path
        );
    }
    println!("\nTotal: {} versions", versions.len());
    Ok(())
}

async fn cmd_serve(app: App, interval: Duration) -> Result<()> {
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown signal received");
                cancel.cancel();
            }
        });
    }

    if app.config.seed_url.is_some() {
        match app.service.seed_if_empty(&cancel).await {
            Ok(Some(outcome)) => tracing::info!("Initial mirror: {}", outcome.crawl.summary()),
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Initial mirror failed"),
        }
    } else {
        tracing::warn!("MIRADOR_SEED_URL not set; change checks will report nothing");
    }

    let scheduler = Scheduler::new(
        app.service.clone(),
        SchedulerConfig::default().with_interval(interval),
    );
    scheduler.run(cancel, &TracingSchedulerReporter).await;

    app.db.close().await;
    Ok(())
}

fn cmd_keygen(path: &std::path::Path) -> Result<()> {
    SnapshotCipher::generate_key_file(path)
        .map_err(|e| anyhow::anyhow!(e))
        .with_context(|| format!("Refusing to write key to {}", path.display()))?;
    println!("Wrote snapshot key to {}", path.display());
    Ok(())
}
