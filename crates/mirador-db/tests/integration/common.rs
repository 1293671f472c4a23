use mirador_db::{Database, DatabaseConfig};
use tempfile::TempDir;

/// Opens a migrated SQLite database inside a fresh temp directory.
///
/// The `TempDir` must be kept in scope for the test duration; dropping it
/// deletes the database file.
pub async fn setup_test_db() -> (Database, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = DatabaseConfig {
        path: dir.path().join("state").join("mirador.sqlite"),
        max_connections: 5,
    };

    let db = Database::connect(&config)
        .await
        .expect("Failed to open SQLite database");
    db.migrate().await.expect("Failed to run migrations");

    (db, dir)
}
