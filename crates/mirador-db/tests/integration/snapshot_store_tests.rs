use chrono::{DateTime, TimeDelta, Utc};
use mirador_core::models::{AuditFact, NewPage, PageChange, UpdateReport};
use mirador_db::Database;

use crate::integration::common::setup_test_db;

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap()
}

fn new_page(url: &str, hash: &str, checked: i64) -> NewPage {
    NewPage {
        url: url.into(),
        local_path: format!("{}.html", url.trim_start_matches("https://")),
        hash: hash.into(),
        last_checked: ts(checked),
    }
}

fn change(page_id: i64, checksum: &str, saved_at: DateTime<Utc>) -> PageChange {
    PageChange {
        page_id,
        local_path: format!("example.com/page-{page_id}.html"),
        checksum: checksum.into(),
        checked_at: saved_at,
        saved_at,
        content_path: format!("_versions/{page_id}/{}.html", saved_at.timestamp_micros()),
    }
}

#[tokio::test]
async fn insert_and_find_page() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.snapshot_repo();

    let id = repo
        .insert_page(&new_page("https://example.com/", "h1", 1_700_000_000))
        .await
        .unwrap();

    let page = repo
        .find_page("https://example.com/")
        .await
        .unwrap()
        .expect("Should find the page");
    assert_eq!(page.id, id);
    assert_eq!(page.hash, "h1");
    assert_eq!(page.last_checked, ts(1_700_000_000));

    assert!(repo.find_page("https://example.com/other").await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_url_is_rejected() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.snapshot_repo();

    repo.insert_page(&new_page("https://example.com/", "h1", 1))
        .await
        .unwrap();
    let err = repo
        .insert_page(&new_page("https://example.com/", "h2", 2))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Database error"), "{err}");
}

#[tokio::test]
async fn local_path_lookup_and_uniqueness() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.snapshot_repo();

    let id = repo
        .insert_page(&new_page("https://example.com/about", "h1", 1))
        .await
        .unwrap();

    let owner = repo
        .find_page_by_path("example.com/about.html")
        .await
        .unwrap()
        .expect("Should find the owner");
    assert_eq!(owner.id, id);
    assert!(repo.find_page_by_path("example.com/x.html").await.unwrap().is_none());

    let clash = NewPage {
        url: "https://example.com/about.html".into(),
        ..new_page("https://example.com/about", "h2", 2)
    };
    assert!(repo.insert_page(&clash).await.is_err());
}

#[tokio::test]
async fn touch_page_updates_last_checked_only() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.snapshot_repo();
    let id = repo
        .insert_page(&new_page("https://example.com/", "h1", 100))
        .await
        .unwrap();

    repo.touch_page(id, ts(200)).await.unwrap();

    let page = repo.find_page("https://example.com/").await.unwrap().unwrap();
    assert_eq!(page.last_checked, ts(200));
    assert_eq!(page.hash, "h1");
    assert!(repo.touch_page(id + 100, ts(300)).await.is_err());
}

#[tokio::test]
async fn record_change_updates_page_and_adds_version() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.snapshot_repo();
    let id = repo
        .insert_page(&new_page("https://example.com/", "h1", 100))
        .await
        .unwrap();

    let saved_at = ts(200) + TimeDelta::microseconds(42);
    let version_id = repo.record_change(&change(id, "h2", saved_at)).await.unwrap();

    let page = repo.find_page("https://example.com/").await.unwrap().unwrap();
    assert_eq!(page.hash, "h2");
    assert_eq!(page.last_checked, saved_at);

    let versions = repo.versions_for_page(id).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].id, version_id);
    assert_eq!(versions[0].saved_at, saved_at);
    assert_eq!(versions[0].checksum, "h2");
    assert_eq!(repo.latest_version_at(id).await.unwrap(), Some(saved_at));
}

#[tokio::test]
async fn record_change_is_all_or_nothing() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.snapshot_repo();
    let id = repo
        .insert_page(&new_page("https://example.com/", "h1", 100))
        .await
        .unwrap();
    repo.record_change(&change(id, "h2", ts(200))).await.unwrap();

    // Same (page_id, saved_at) violates the unique constraint.
    let err = repo.record_change(&change(id, "h3", ts(200))).await;
    assert!(err.is_err());

    let page = repo.find_page("https://example.com/").await.unwrap().unwrap();
    assert_eq!(page.hash, "h2");
    assert_eq!(repo.counts().await.unwrap(), (1, 1));
}

#[tokio::test]
async fn record_change_for_missing_page_leaves_no_version() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.snapshot_repo();

    // Foreign keys reject the insert before the page update is reached.
    assert!(repo.record_change(&change(999, "h", ts(10))).await.is_err());
    assert_eq!(repo.counts().await.unwrap(), (0, 0));
}

#[tokio::test]
async fn version_queries_order_and_filter() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.snapshot_repo();
    let a = repo
        .insert_page(&new_page("https://example.com/a", "a0", 1))
        .await
        .unwrap();
    let b = repo
        .insert_page(&new_page("https://example.com/b", "b0", 1))
        .await
        .unwrap();

    for (i, secs) in [100, 300, 200].into_iter().enumerate() {
        repo.record_change(&change(a, &format!("a{}", i + 1), ts(secs)))
            .await
            .unwrap();
    }
    repo.record_change(&change(b, "b1", ts(150))).await.unwrap();

    let history: Vec<_> = repo
        .versions_for_page(a)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.saved_at)
        .collect();
    assert_eq!(history, vec![ts(300), ts(200), ts(100)]);

    let oldest: Vec<_> = repo
        .oldest_versions(a, 2)
        .await
        .unwrap()
        .into_iter()
        .map(|v| v.saved_at)
        .collect();
    assert_eq!(oldest, vec![ts(100), ts(200)]);

    // Strictly older than the cutoff.
    let aged: Vec<_> = repo
        .versions_saved_before(ts(150))
        .await
        .unwrap()
        .into_iter()
        .map(|v| (v.page_id, v.saved_at))
        .collect();
    assert_eq!(aged, vec![(a, ts(100))]);

    assert_eq!(repo.version_counts().await.unwrap(), vec![(a, 3), (b, 1)]);
}

#[tokio::test]
async fn delete_version_removes_only_that_row() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.snapshot_repo();
    let id = repo
        .insert_page(&new_page("https://example.com/", "h0", 1))
        .await
        .unwrap();
    let first = repo.record_change(&change(id, "h1", ts(10))).await.unwrap();
    repo.record_change(&change(id, "h2", ts(20))).await.unwrap();

    repo.delete_version(first).await.unwrap();

    let remaining = repo.versions_for_page(id).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].checksum, "h2");
    assert_eq!(repo.counts().await.unwrap(), (1, 1));
}

#[tokio::test]
async fn page_listings() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.snapshot_repo();
    repo.insert_page(&new_page("https://example.com/b", "hb", 300))
        .await
        .unwrap();
    repo.insert_page(&new_page("https://example.com/a", "ha", 100))
        .await
        .unwrap();
    repo.insert_page(&new_page("https://example.com/c", "hc", 200))
        .await
        .unwrap();

    let hashes = repo.page_hashes().await.unwrap();
    assert_eq!(
        hashes,
        vec![
            ("https://example.com/a".to_string(), "ha".to_string()),
            ("https://example.com/b".to_string(), "hb".to_string()),
            ("https://example.com/c".to_string(), "hc".to_string()),
        ]
    );

    let recent: Vec<_> = repo
        .list_pages(None)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.url)
        .collect();
    assert_eq!(
        recent,
        vec![
            "https://example.com/b",
            "https://example.com/c",
            "https://example.com/a",
        ]
    );
    assert_eq!(repo.list_pages(Some(1)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn audit_entries_read_back_newest_first() {
    let (db, _dir) = setup_test_db().await;
    let audit = db.audit_repo();

    audit
        .record(&AuditFact::PageSaved {
            url: "https://example.com/".into(),
        })
        .await
        .unwrap();
    audit
        .record(&AuditFact::AutoUpdatesFound {
            report: UpdateReport {
                changed: vec!["https://example.com/".into()],
                new: vec![],
                removed: vec![],
            },
        })
        .await
        .unwrap();

    let entries = audit.recent(10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].action, "auto_updates_found");
    assert!(entries[0].details.contains("\"changed\""));
    assert_eq!(entries[1].action, "page_saved");
    assert_eq!(entries[1].details, "https://example.com/");
    assert!(entries.iter().all(|e| e.actor == "system"));

    assert_eq!(audit.recent(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn migrations_are_idempotent_and_data_survives_reopen() {
    let (db, dir) = setup_test_db().await;
    db.snapshot_repo()
        .insert_page(&new_page("https://example.com/", "h1", 1))
        .await
        .unwrap();
    db.migrate().await.unwrap();
    let path = db.path().to_path_buf();
    db.close().await;

    let reopened = Database::connect(&mirador_db::DatabaseConfig {
        path,
        max_connections: 1,
    })
    .await
    .unwrap();
    reopened.migrate().await.unwrap();
    assert_eq!(reopened.snapshot_repo().counts().await.unwrap(), (1, 0));
    drop(dir);
}
