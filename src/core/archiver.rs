use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::models::ArchiveMove;
use crate::error::{BackupError, Result};

/// Move dumps superseded by `current` from `work_dir` into `archive_dir`.
///
/// Candidates are files named `{prefix}*` (structured `.sql` dumps first,
/// then everything else). `current` itself is never moved. The first
/// failed move aborts the pass.
pub fn archive_superseded(
    prefix: &str,
    current: &Path,
    work_dir: &Path,
    archive_dir: &Path,
) -> Result<Vec<ArchiveMove>> {
    fs::create_dir_all(archive_dir).map_err(|e| BackupError::io(archive_dir, e))?;

    let current = resolve(current)?;
    let dir = Pattern::escape(&work_dir.to_string_lossy());
    let prefix = Pattern::escape(prefix);

    let patterns = [
        Path::new(&dir).join(format!("{prefix}*.sql")),
        Path::new(&dir).join(format!("{prefix}*")),
    ];

    let mut moves = Vec::new();

    for pattern in &patterns {
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern).map_err(|e| {
            BackupError::io(
                work_dir,
                io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            )
        })?;

        for entry in entries {
            let path = entry.map_err(|e| {
                let path = e.path().to_path_buf();
                BackupError::io(path, io::Error::from(e))
            })?;

            if !path.is_file() {
                continue;
            }

            if resolve(&path)? == current {
                debug!(path = %path.display(), "Skipping the dump just produced");
                continue;
            }

            let Some(file_name) = path.file_name() else {
                continue;
            };
            let destination = archive_dir.join(file_name);

            fs::rename(&path, &destination).map_err(|source| BackupError::ArchiveMove {
                from: path.clone(),
                to: destination.clone(),
                source,
            })?;

            info!(
                file = %file_name.to_string_lossy(),
                archive = %archive_dir.display(),
                "Archived superseded dump"
            );
            moves.push(ArchiveMove {
                source: path,
                destination,
            });
        }
    }

    Ok(moves)
}

/// Absolute form of `path`, following symlinks when the file exists.
fn resolve(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .map_err(|e| BackupError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::write(path, b"-- dump").unwrap();
    }

    #[test]
    fn test_only_superseded_dump_is_moved() {
        let temp = tempdir().unwrap();
        let work = temp.path().join("dumps");
        let archive = temp.path().join("archived");
        fs::create_dir_all(&work).unwrap();

        touch(&work.join("orders_2024.sql"));
        touch(&work.join("orders_2023.sql"));

        let moves =
            archive_superseded("orders", &work.join("orders_2024.sql"), &work, &archive).unwrap();

        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].source, work.join("orders_2023.sql"));
        assert!(work.join("orders_2024.sql").exists());
        assert!(!work.join("orders_2023.sql").exists());
        assert!(archive.join("orders_2023.sql").exists());
    }

    #[test]
    fn test_catch_all_pattern_and_other_prefixes() {
        let temp = tempdir().unwrap();
        let work = temp.path().to_path_buf();
        let archive = temp.path().join("nested").join("archive");

        touch(&work.join("prod_orders_1.sql.gz"));
        touch(&work.join("prod_orders_2.dump"));
        touch(&work.join("prod_orders_3.sql.gz"));
        touch(&work.join("prod_billing_1.sql.gz"));

        let moves = archive_superseded(
            "prod_orders",
            &work.join("prod_orders_3.sql.gz"),
            &work,
            &archive,
        )
        .unwrap();

        assert_eq!(moves.len(), 2);
        assert!(archive.join("prod_orders_1.sql.gz").exists());
        assert!(archive.join("prod_orders_2.dump").exists());
        assert!(work.join("prod_orders_3.sql.gz").exists());
        assert!(work.join("prod_billing_1.sql.gz").exists());
    }

    #[test]
    fn test_relative_current_path_is_recognised() {
        let temp = tempdir().unwrap();
        let work = temp.path().join("w");
        fs::create_dir_all(&work).unwrap();
        touch(&work.join("db_a.sql"));

        let current = work.join(".").join("db_a.sql");
        let moves = archive_superseded("db", &current, &work, &temp.path().join("a")).unwrap();

        assert!(moves.is_empty());
        assert!(work.join("db_a.sql").exists());
    }

    #[test]
    fn test_glob_metacharacters_in_prefix_are_literal() {
        let temp = tempdir().unwrap();
        let work = temp.path().to_path_buf();
        let archive = temp.path().join("archive");

        touch(&work.join("db[1]_old.sql"));
        touch(&work.join("db1_old.sql"));

        let moves =
            archive_superseded("db[1]", &work.join("db[1]_new.sql"), &work, &archive).unwrap();

        assert_eq!(moves.len(), 1);
        assert!(archive.join("db[1]_old.sql").exists());
        assert!(work.join("db1_old.sql").exists());
    }

    #[test]
    fn test_failed_move_aborts() {
        let temp = tempdir().unwrap();
        let work = temp.path().join("w");
        fs::create_dir_all(&work).unwrap();
        touch(&work.join("db_old.sql"));

        // The archive "directory" is a file, so creating it fails.
        let archive = temp.path().join("blocked");
        touch(&archive);

        let err = archive_superseded("db", &work.join("db_new.sql"), &work, &archive).unwrap_err();
        assert!(matches!(err, BackupError::Io { .. }));
        assert!(work.join("db_old.sql").exists());
    }

    #[test]
    fn test_rename_failure_is_archive_move_error() {
        let temp = tempdir().unwrap();
        let work = temp.path().join("w");
        let archive = temp.path().join("a");
        fs::create_dir_all(&work).unwrap();
        touch(&work.join("db_old.sql"));

        // A non-empty directory already occupies the destination name.
        fs::create_dir_all(archive.join("db_old.sql")).unwrap();
        touch(&archive.join("db_old.sql").join("keep"));

        let err = archive_superseded("db", &work.join("db_new.sql"), &work, &archive).unwrap_err();
        assert!(matches!(err, BackupError::ArchiveMove { .. }));
        assert!(work.join("db_old.sql").exists());
    }
}
