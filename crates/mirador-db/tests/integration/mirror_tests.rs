use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use mirador_core::testutil::{ManualClock, MockFetcher, MockLinkExtractor, MockRenderer};
use mirador_core::{
    BackupArchiver, CrawlSettings, MirrorService, PlainFetchers, RetentionPolicy, SnapshotCipher,
    SnapshotFiles,
};
use mirador_db::{AuditRepository, Database, DatabaseConfig, SnapshotRepository};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::integration::common::setup_test_db;

const SEED: &str = "https://example.com/";

type Service =
    MirrorService<MockFetcher, MockRenderer, MockLinkExtractor, SnapshotRepository, AuditRepository>;

struct Mirror {
    db: Database,
    dir: TempDir,
    site: MockFetcher,
    clock: Arc<ManualClock>,
    service: Service,
}

fn site() -> MockFetcher {
    MockFetcher::new()
        .with_page(SEED, "home a:/about a:/docs/ img:/logo.png")
        .with_page("https://example.com/about", "about us a:/")
        .with_page("https://example.com/docs/", "documentation a:/about")
        .with_resource("https://example.com/logo.png", b"\x89PNG")
}

async fn mirror(cipher: SnapshotCipher, retention: RetentionPolicy) -> Mirror {
    let (db, dir) = setup_test_db().await;
    let site = site();
    let clock = Arc::new(ManualClock::at(1_700_000_000));
    let root = dir.path().join("site_copy");

    let service = MirrorService::new(
        PlainFetchers {
            pages: site.clone(),
            resources: site.clone(),
        },
        MockRenderer::unavailable(),
        MockLinkExtractor,
        db.snapshot_repo(),
        db.audit_repo(),
        SnapshotFiles::new(&root, cipher),
        BackupArchiver::new(db.path(), &root, dir.path().join("backups")),
        CrawlSettings {
            seed_url: Some(SEED.into()),
            max_pages: 20,
            page_timeout: Duration::from_secs(5),
            use_renderer: true,
            fallback_to_plain: true,
        },
        retention,
    )
    .with_clock(clock.clone());

    Mirror {
        db,
        dir,
        site,
        clock,
        service,
    }
}

#[tokio::test]
async fn update_mirrors_site_into_sqlite() {
    let m = mirror(SnapshotCipher::disabled(), RetentionPolicy::default()).await;

    let outcome = m.service.update(&CancellationToken::new()).await.unwrap();
    assert_eq!(outcome.crawl.new_pages, 3);
    assert_eq!(outcome.crawl.resources_saved, 1);

    let stats = m.service.stats().await.unwrap();
    assert_eq!((stats.pages, stats.versions), (3, 0));
    assert!(stats.snapshot_bytes > 0);

    let raw = m.service.get_raw_content(SEED).await.unwrap().unwrap();
    assert_eq!(raw, b"home a:/about a:/docs/ img:/logo.png");
    assert!(m.dir.path().join("site_copy/example.com/logo.png").exists());

    let actions: Vec<_> = m
        .db
        .audit_repo()
        .recent(10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions.first().map(String::as_str), Some("manual_update"));
    assert_eq!(actions.iter().filter(|a| *a == "page_saved").count(), 3);
}

#[tokio::test]
async fn remote_edit_creates_version_history() {
    let m = mirror(SnapshotCipher::disabled(), RetentionPolicy::default()).await;
    let cancel = CancellationToken::new();
    m.service.update(&cancel).await.unwrap();

    m.site.set_page("https://example.com/about", "about us, now with a team a:/");
    m.clock.advance(TimeDelta::minutes(5));

    let report = m.service.check_for_updates().await;
    assert_eq!(report.changed, vec!["https://example.com/about"]);
    assert!(report.new.is_empty() && report.removed.is_empty());

    let outcome = m.service.update(&cancel).await.unwrap();
    assert_eq!(outcome.crawl.changed_pages, 1);
    assert_eq!(outcome.crawl.unchanged_pages, 2);

    let history = m
        .service
        .page_history("https://example.com/about")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(m.service.page_history("https://example.com/nope").await.unwrap().is_none());

    let hits = m.service.search_pages("TEAM").await.unwrap();
    assert_eq!(hits, vec!["https://example.com/about"]);
    assert!(m.service.check_for_updates().await.is_empty());
}

#[tokio::test]
async fn retention_caps_history_per_page() {
    let policy = RetentionPolicy {
        max_age: TimeDelta::days(30),
        max_versions: 2,
    };
    let m = mirror(SnapshotCipher::disabled(), policy).await;
    let cancel = CancellationToken::new();
    m.service.update(&cancel).await.unwrap();

    for edit in 1..=4 {
        m.site
            .set_page("https://example.com/about", &format!("about edit {edit} a:/"));
        m.clock.advance(TimeDelta::hours(1));
        m.service
            .crawl(SEED, 20, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
    }
    assert_eq!(m.service.stats().await.unwrap().versions, 4);

    let report = m.service.cleanup().await.unwrap();
    assert_eq!(report.over_cap, 2);
    assert_eq!(report.missing_files, 0);

    let history = m
        .service
        .page_history("https://example.com/about")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].saved_at > history[1].saved_at);

    // Everything ages out once the clock passes the age limit.
    m.clock.advance(TimeDelta::days(31));
    let report = m.service.cleanup().await.unwrap();
    assert_eq!(report.aged_out, 2);
    assert_eq!(m.service.stats().await.unwrap().versions, 0);
}

#[tokio::test]
async fn encrypted_snapshots_read_back_through_service() {
    let cipher = SnapshotCipher::from_key(&[7u8; 32]).unwrap();
    let m = mirror(cipher, RetentionPolicy::default()).await;
    m.service.update(&CancellationToken::new()).await.unwrap();

    let on_disk = std::fs::read(m.dir.path().join("site_copy/example.com/about.html")).unwrap();
    assert!(!on_disk.windows(5).any(|w| w == b"about"));

    let raw = m
        .service
        .get_raw_content("https://example.com/about")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw, b"about us a:/");
    assert_eq!(
        m.service.search_pages("documentation").await.unwrap(),
        vec!["https://example.com/docs/"]
    );
}

#[tokio::test]
async fn backup_archives_database_and_tree() {
    let m = mirror(SnapshotCipher::disabled(), RetentionPolicy::default()).await;
    m.service.update(&CancellationToken::new()).await.unwrap();

    let first = m.service.make_backup().await.unwrap();
    let second = m.service.make_backup().await.unwrap();
    assert_ne!(first, second);
    assert!(first.file_name().unwrap().to_string_lossy().starts_with("backup_20231114"));

    let mut archive = zip::ZipArchive::new(std::fs::File::open(&first).unwrap()).unwrap();
    let names: Vec<String> = archive.file_names().map(String::from).collect();
    assert_eq!(names.first().map(String::as_str), Some("database.sqlite"));
    assert!(names.contains(&"example.com/index.html".to_string()));
    assert!(names.contains(&"example.com/logo.png".to_string()));

    let mut copy = Vec::new();
    std::io::Read::read_to_end(&mut archive.by_name("database.sqlite").unwrap(), &mut copy)
        .unwrap();
    assert_eq!(&copy[..16], b"SQLite format 3\0");

    // The archived copy is a complete database on its own.
    let restored = m.dir.path().join("restored/mirador.sqlite");
    std::fs::create_dir_all(restored.parent().unwrap()).unwrap();
    std::fs::write(&restored, &copy).unwrap();
    let reopened = Database::connect(&DatabaseConfig {
        path: restored,
        max_connections: 1,
    })
    .await
    .unwrap();
    assert_eq!(reopened.snapshot_repo().counts().await.unwrap(), (3, 0));
    reopened.close().await;

    let staged: Vec<_> = std::fs::read_dir(m.dir.path().join("backups"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with("backup_"))
        .collect();
    assert!(staged.is_empty(), "{staged:?}");

    let backups = m
        .db
        .audit_repo()
        .recent(50)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == "backup")
        .count();
    assert_eq!(backups, 2);
}

#[tokio::test]
async fn colliding_urls_keep_separate_snapshots() {
    let m = mirror(SnapshotCipher::disabled(), RetentionPolicy::default()).await;
    m.site.set_page(SEED, "home a:/about a:/about.html");
    m.site.set_page("https://example.com/about.html", "legacy about");

    m.service
        .crawl(SEED, 20, Duration::from_secs(5), &CancellationToken::new())
        .await
        .unwrap();

    for (url, body) in [
        ("https://example.com/about", b"about us a:/".as_slice()),
        ("https://example.com/about.html", b"legacy about".as_slice()),
    ] {
        assert_eq!(m.service.get_raw_content(url).await.unwrap().unwrap(), body);
    }
    let pages = m.service.list_pages(None).await.unwrap();
    let mut paths: Vec<_> = pages.iter().map(|p| p.local_path.clone()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), pages.len());
}

#[tokio::test]
async fn seed_if_empty_runs_once() {
    let m = mirror(SnapshotCipher::disabled(), RetentionPolicy::default()).await;
    let cancel = CancellationToken::new();

    assert!(m.service.seed_if_empty(&cancel).await.unwrap().is_some());
    assert!(m.service.seed_if_empty(&cancel).await.unwrap().is_none());
    assert_eq!(m.service.list_pages(None).await.unwrap().len(), 3);
}
