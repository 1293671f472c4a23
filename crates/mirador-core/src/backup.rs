//! Deterministic zip archives of the database and the snapshot tree.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::AppError;

/// Archive-relative name of the database entry.
pub const DATABASE_ENTRY: &str = "database.sqlite";

/// Builds backup archives.
///
/// The database entry comes from a consistent copy made by the store
/// (see [`crate::traits::SnapshotStore::export_database`]); the live file at
/// `database_path` is never read, only kept out of the snapshot entries.
#[derive(Debug, Clone)]
pub struct BackupArchiver {
    database_path: PathBuf,
    snapshot_root: PathBuf,
    backup_dir: PathBuf,
}

impl BackupArchiver {
    pub fn new(
        database_path: impl Into<PathBuf>,
        snapshot_root: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            database_path: database_path.into(),
            snapshot_root: snapshot_root.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Where the database copy for a backup taken at `now` is staged.
    pub fn staging_path(&self, now: DateTime<Utc>) -> PathBuf {
        self.backup_dir
            .join(format!(".database-{}.sqlite", now.timestamp_micros()))
    }

    /// Write `backup_<YYYYmmddHHMMSS>.zip` holding `database_copy` and the
    /// snapshot tree, and return its path.
    ///
    /// Blocking; run it on the blocking pool. Never overwrites an existing
    /// archive: a same-second collision gets a `_1`, `_2`, … suffix.
    pub fn create(&self, now: DateTime<Utc>, database_copy: &Path) -> Result<PathBuf, AppError> {
        std::fs::create_dir_all(&self.backup_dir).map_err(|e| {
            AppError::ArchiveError(format!(
                "Failed to create backup dir {}: {e}",
                self.backup_dir.display()
            ))
        })?;

        let stamp = now.format("%Y%m%d%H%M%S").to_string();
        let (file, path) = self.open_unique(&stamp)?;

        if let Err(e) = self.write_archive(file, database_copy) {
            let _ = std::fs::remove_file(&path);
            return Err(e);
        }
        tracing::info!(path = %path.display(), "Backup archive written");
        Ok(path)
    }

    fn open_unique(&self, stamp: &str) -> Result<(File, PathBuf), AppError> {
        for attempt in 0u32.. {
            let name = match attempt {
                0 => format!("backup_{stamp}.zip"),
                n => format!("backup_{stamp}_{n}.zip"),
            };
            let path = self.backup_dir.join(name);
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(file) => return Ok((file, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(AppError::ArchiveError(format!(
                        "Failed to create {}: {e}",
                        path.display()
                    )));
                }
            }
        }
        Err(AppError::ArchiveError("no free archive name".into()))
    }

    fn write_archive(&self, file: File, database_copy: &Path) -> Result<(), AppError> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(0o644);
        let mut zip = ZipWriter::new(file);

        zip.start_file(DATABASE_ENTRY, options).map_err(zip_err)?;
        copy_into(database_copy, &mut zip)?;

        for (relative, path) in self.snapshot_entries()? {
            zip.start_file(relative, options).map_err(zip_err)?;
            copy_into(&path, &mut zip)?;
        }

        zip.finish()
            .map_err(zip_err)?
            .sync_all()
            .map_err(|e| AppError::ArchiveError(format!("Failed to flush archive: {e}")))
    }

    /// Files under the snapshot root as `(relative name, absolute path)`,
    /// sorted by name. The backup directory and the live database file are
    /// skipped if they live inside the root.
    fn snapshot_entries(&self) -> Result<Vec<(String, PathBuf)>, AppError> {
        let Ok(root) = self.snapshot_root.canonicalize() else {
            return Ok(Vec::new());
        };
        let backup_dir = self.backup_dir.canonicalize().ok();
        let database = self.database_path.canonicalize().ok();

        let mut entries = Vec::new();
        let walker = WalkDir::new(&root).sort_by_file_name().into_iter();
        for entry in walker.filter_entry(|e| Some(e.path()) != backup_dir.as_deref()) {
            let entry = entry
                .map_err(|e| AppError::ArchiveError(format!("Failed to walk snapshot tree: {e}")))?;
            if !entry.file_type().is_file() || Some(entry.path()) == database.as_deref() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            entries.push((name, entry.into_path()));
        }
        entries.sort();
        Ok(entries)
    }
}

fn copy_into<W: Write>(path: &Path, out: &mut W) -> Result<(), AppError> {
    let mut src = File::open(path)
        .map_err(|e| AppError::ArchiveError(format!("Failed to open {}: {e}", path.display())))?;
    io::copy(&mut src, out)
        .map_err(|e| AppError::ArchiveError(format!("Failed to archive {}: {e}", path.display())))?;
    Ok(())
}

fn zip_err(e: zip::result::ZipError) -> AppError {
    AppError::ArchiveError(e.to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    struct Layout {
        dir: tempfile::TempDir,
    }

    impl Layout {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path();
            std::fs::write(root.join("mirror.db"), b"live, mid-write").unwrap();
            std::fs::write(root.join("export.db"), b"SQLite format 3\0data").unwrap();
            std::fs::create_dir_all(root.join("site/example.com/docs")).unwrap();
            std::fs::write(root.join("site/example.com/index.html"), b"<h1>home</h1>").unwrap();
            std::fs::write(root.join("site/example.com/docs/a.html"), b"<p>a</p>").unwrap();
            std::fs::create_dir_all(root.join("site/.versions/1")).unwrap();
            std::fs::write(root.join("site/.versions/1/100.snap"), b"old").unwrap();
            Self { dir }
        }

        fn archiver(&self, backup_dir: &str) -> BackupArchiver {
            let root = self.dir.path();
            BackupArchiver::new(root.join("mirror.db"), root.join("site"), root.join(backup_dir))
        }

        fn export(&self) -> PathBuf {
            self.dir.path().join("export.db")
        }
    }

    fn read_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut f = archive.by_index(i).unwrap();
                let mut buf = Vec::new();
                f.read_to_end(&mut buf).unwrap();
                (f.name().to_string(), buf)
            })
            .collect()
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-05-06T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_round_trip_reproduces_db_and_tree() {
        let layout = Layout::new();
        let path = layout.archiver("backups").create(now(), &layout.export()).unwrap();

        assert_eq!(path.file_name().unwrap(), "backup_20240506070809.zip");
        let entries = read_entries(&path);
        assert_eq!(
            entries,
            vec![
                (DATABASE_ENTRY.to_string(), b"SQLite format 3\0data".to_vec()),
                (".versions/1/100.snap".to_string(), b"old".to_vec()),
                ("example.com/docs/a.html".to_string(), b"<p>a</p>".to_vec()),
                ("example.com/index.html".to_string(), b"<h1>home</h1>".to_vec()),
            ]
        );
    }

    #[test]
    fn test_same_inputs_give_identical_archives() {
        let layout = Layout::new();
        let archiver = layout.archiver("backups");
        let first = archiver.create(now(), &layout.export()).unwrap();
        let second = archiver.create(now(), &layout.export()).unwrap();

        assert_ne!(first, second);
        assert_eq!(second.file_name().unwrap(), "backup_20240506070809_1.zip");
        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }

    #[test]
    fn test_backup_dir_inside_snapshot_root_is_skipped() {
        let layout = Layout::new();
        let archiver = layout.archiver("site/backups");
        archiver.create(now(), &layout.export()).unwrap();
        let path = archiver.create(now(), &layout.export()).unwrap();

        let names: Vec<_> = read_entries(&path).into_iter().map(|(n, _)| n).collect();
        assert!(names.iter().all(|n| !n.starts_with("backups")));
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_live_database_inside_snapshot_root_is_not_archived() {
        let layout = Layout::new();
        let root = layout.dir.path();
        std::fs::write(root.join("site/mirror.db"), b"live, mid-write").unwrap();
        let archiver =
            BackupArchiver::new(root.join("site/mirror.db"), root.join("site"), root.join("backups"));

        let path = archiver.create(now(), &layout.export()).unwrap();

        let entries = read_entries(&path);
        assert!(entries.iter().all(|(name, _)| name != "mirror.db"));
        assert_eq!(entries[0].1, b"SQLite format 3\0data");
    }

    #[test]
    fn test_missing_database_copy_fails_without_leaving_a_file() {
        let layout = Layout::new();
        std::fs::remove_file(layout.export()).unwrap();
        let archiver = layout.archiver("backups");

        let err = archiver.create(now(), &layout.export()).unwrap_err();

        assert!(matches!(err, AppError::ArchiveError(_)));
        assert_eq!(std::fs::read_dir(archiver.backup_dir()).unwrap().count(), 0);
    }
}
