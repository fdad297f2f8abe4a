//! Backup and restore through the APOC GraphML procedures
//!
//! APOC reads and writes files relative to the server's import directory,
//! so the backup directory is expected to be that directory (or a mount of
//! it). This module never looks inside the files; the plugin owns the format.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::connection::Connection;
use crate::error::{ManagerError, ManagerResult};
use crate::value::{params, Record, Value};

/// Extension of every artifact
pub const BACKUP_EXTENSION: &str = ".graphml";
/// Prefix used when callers don't choose a file name
pub const DEFAULT_PREFIX: &str = "neo4j_backup";
/// Directory used by [`BackupManager::with_default_dir`]
pub const DEFAULT_BACKUP_DIR: &str = "./backup";

const EXPORT_QUERY: &str = "CALL apoc.export.graphml.all($file, {
    useTypes: $useTypes,
    readLabels: true,
    storeNodeIds: false
})
YIELD file, nodes, relationships, time
RETURN file, nodes, relationships, time";

const IMPORT_QUERY: &str = "CALL apoc.import.graphml($file, {
    readLabels: true,
    storeNodeIds: false,
    defaultRelationshipType: 'RELATED',
    batchSize: 1000,
    useTypes: false
})
YIELD nodes, relationships, time
RETURN nodes, relationships, time";

/// Counts reported by an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportStats {
    pub nodes: i64,
    pub relationships: i64,
    pub time_ms: i64,
}

/// A backup file found in the backup directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl BackupArtifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Export/import helper bound to one connection and one directory
pub struct BackupManager<'a> {
    connection: &'a Connection,
    backup_dir: PathBuf,
}

impl<'a> BackupManager<'a> {
    /// Create the manager, creating `backup_dir` and its parents if needed
    pub fn new(connection: &'a Connection, backup_dir: impl Into<PathBuf>) -> ManagerResult<Self> {
        let backup_dir = backup_dir.into();
        fs::create_dir_all(&backup_dir)?;
        Ok(Self {
            connection,
            backup_dir,
        })
    }

    /// Manager over [`DEFAULT_BACKUP_DIR`]
    pub fn with_default_dir(connection: &'a Connection) -> ManagerResult<Self> {
        Self::new(connection, DEFAULT_BACKUP_DIR)
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// `{prefix}_{YYYYMMDD_HHMMSS}.graphml` for the current local time.
    ///
    /// Two calls within the same second return the same name.
    pub fn generate_filename(&self, prefix: &str) -> String {
        generate_filename_at(prefix, &Local::now())
    }

    /// Export the whole graph with `apoc.export.graphml.all`.
    ///
    /// Returns the artifact path under the backup directory.
    pub fn export(&self, filename: Option<&str>, include_types: bool) -> ManagerResult<PathBuf> {
        let filename = match filename {
            Some(name) => name.to_string(),
            None => self.generate_filename(DEFAULT_PREFIX),
        };
        // Exactly one extension, whether or not the caller supplied it.
        let base = filename
            .strip_suffix(BACKUP_EXTENSION)
            .unwrap_or(&filename)
            .to_string();
        let file = format!("{}{}", base, BACKUP_EXTENSION);

        let query_params = params([
            ("file", Value::from(file.as_str())),
            ("useTypes", Value::from(include_types)),
        ]);

        let records = self
            .connection
            .execute_query(EXPORT_QUERY, Some(&query_params))
            .map_err(|e| {
                error!("Export failed: {}", e);
                match e {
                    ManagerError::QueryExecutionFailed(message) => ManagerError::ExportFailed(message),
                    other => other,
                }
            })?;

        if let Some(row) = records.first() {
            info!(
                "Exported {} nodes and {} relationships in {}ms",
                int_column(row, "nodes"),
                int_column(row, "relationships"),
                int_column(row, "time")
            );
        }

        Ok(self.backup_dir.join(file))
    }

    /// Import a GraphML file with `apoc.import.graphml`.
    ///
    /// Fails with [`ManagerError::BackupNotFound`] before touching the
    /// database when `filepath` does not exist. With `clear_first`, the
    /// database is wiped before the import starts.
    pub fn import(&self, filepath: impl AsRef<Path>, clear_first: bool) -> ManagerResult<ImportStats> {
        let filepath = filepath.as_ref();
        if !filepath.exists() {
            return Err(ManagerError::BackupNotFound(filepath.to_path_buf()));
        }

        if clear_first {
            warn!("Clearing database before import");
            self.connection.clear_database()?;
        }

        // APOC resolves file URLs against the server import directory.
        let filename = filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| filepath.display().to_string());
        let query_params = params([("file", format!("file:///{}", filename))]);

        let records = self
            .connection
            .execute_write(IMPORT_QUERY, Some(&query_params))
            .map_err(|e| {
                error!("Import failed: {}", e);
                match e {
                    ManagerError::QueryExecutionFailed(message) => ManagerError::ImportFailed(message),
                    other => other,
                }
            })?;

        let Some(row) = records.first() else {
            return Ok(ImportStats::default());
        };

        let stats = ImportStats {
            nodes: int_column(row, "nodes"),
            relationships: int_column(row, "relationships"),
            time_ms: int_column(row, "time"),
        };
        info!(
            "Imported {} nodes and {} relationships in {}ms",
            stats.nodes, stats.relationships, stats.time_ms
        );
        Ok(stats)
    }

    /// Files matching `*.graphml*`, oldest first by modification time
    pub fn list_backups(&self) -> ManagerResult<Vec<BackupArtifact>> {
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if !is_backup_name(&name.to_string_lossy()) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            artifacts.push(BackupArtifact {
                path: entry.path(),
                modified: metadata.modified()?,
            });
        }
        artifacts.sort_by_key(|a| a.modified);
        Ok(artifacts)
    }

    /// Most recently modified artifact, if any
    pub fn latest_backup(&self) -> ManagerResult<Option<BackupArtifact>> {
        Ok(self.list_backups()?.pop())
    }
}

/// `{prefix}_{YYYYMMDD_HHMMSS}.graphml` for `timestamp`
pub fn generate_filename_at<Tz>(prefix: &str, timestamp: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{}_{}{}",
        prefix,
        timestamp.format("%Y%m%d_%H%M%S"),
        BACKUP_EXTENSION
    )
}

/// Glob `*.graphml*`, skipping hidden files like shell globbing does
fn is_backup_name(name: &str) -> bool {
    !name.starts_with('.') && name.contains(BACKUP_EXTENSION)
}

fn int_column(row: &Record, column: &str) -> i64 {
    row.get(column).and_then(|v| v.as_integer()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::driver::{AccessMode, Script};
    use crate::value::{record, Value};
    use chrono::Utc;

    fn scripted() -> (Script, Connection) {
        let script = Script::new();
        let conn = Connection::with_connector(ConnectionConfig::default(), script.connector());
        (script, conn)
    }

    #[test]
    fn test_generate_filename_at() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 15, 10, 30, 45).unwrap();
        assert_eq!(
            generate_filename_at(DEFAULT_PREFIX, &ts),
            "neo4j_backup_20250115_103045.graphml"
        );
        assert_eq!(generate_filename_at("custom", &ts), "custom_20250115_103045.graphml");
    }

    #[test]
    fn test_generate_filename_shape() {
        let dir = tempfile::tempdir().unwrap();
        let (_script, conn) = scripted();
        let manager = BackupManager::new(&conn, dir.path()).unwrap();

        let name = manager.generate_filename("neo4j_backup");
        assert!(name.starts_with("neo4j_backup_"));
        assert!(name.ends_with(".graphml"));

        let stamp = &name["neo4j_backup_".len()..name.len() - ".graphml".len()];
        assert_eq!(stamp.len(), 15);
        assert_eq!(&stamp[8..9], "_");
        assert!(stamp.chars().filter(|c| *c != '_').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_new_creates_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("backups");
        let (_script, conn) = scripted();

        let manager = BackupManager::new(&conn, &nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(manager.backup_dir(), nested.as_path());
    }

    #[test]
    fn test_with_default_dir() {
        let existed = Path::new(DEFAULT_BACKUP_DIR).exists();
        let (_script, conn) = scripted();

        let manager = BackupManager::with_default_dir(&conn).unwrap();
        assert_eq!(manager.backup_dir(), Path::new(DEFAULT_BACKUP_DIR));
        assert!(manager.backup_dir().is_dir());

        if !existed {
            fs::remove_dir(DEFAULT_BACKUP_DIR).unwrap();
        }
    }

    #[test]
    fn test_export_with_filename() {
        let dir = tempfile::tempdir().unwrap();
        let (script, conn) = scripted();
        script.respond(
            "apoc.export.graphml.all",
            vec![record([
                ("file", Value::from("test.graphml")),
                ("nodes", Value::from(4i64)),
                ("relationships", Value::from(4i64)),
                ("time", Value::from(12i64)),
            ])],
        );
        let manager = BackupManager::new(&conn, dir.path()).unwrap();

        let path = manager.export(Some("test.graphml"), true).unwrap();
        assert_eq!(path, dir.path().join("test.graphml"));

        let issued = script.issued();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].params["file"], Value::from("test.graphml"));
        assert_eq!(issued[0].params["useTypes"], Value::Boolean(true));
        assert!(issued[0].text.contains("readLabels: true"));
        assert!(issued[0].text.contains("storeNodeIds: false"));
    }

    #[test]
    fn test_export_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let (script, conn) = scripted();
        let manager = BackupManager::new(&conn, dir.path()).unwrap();

        let path = manager.export(Some("nightly"), false).unwrap();
        assert_eq!(path, dir.path().join("nightly.graphml"));
        assert_eq!(script.issued()[0].params["useTypes"], Value::Boolean(false));
    }

    #[test]
    fn test_export_auto_filename() {
        let dir = tempfile::tempdir().unwrap();
        let (script, conn) = scripted();
        let manager = BackupManager::new(&conn, dir.path()).unwrap();

        let path = manager.export(None, true).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("neo4j_backup_"));
        assert!(name.ends_with(".graphml"));
        assert_eq!(script.issued()[0].params["file"], Value::from(name.as_str()));
    }

    #[test]
    fn test_export_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (script, conn) = scripted();
        script.fail("apoc.export", "Export to files not enabled");
        let manager = BackupManager::new(&conn, dir.path()).unwrap();

        match manager.export(Some("x"), true).unwrap_err() {
            ManagerError::ExportFailed(message) => assert_eq!(message, "Export to files not enabled"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_import_success() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backup.graphml");
        fs::write(&file, "<graphml/>").unwrap();

        let (script, conn) = scripted();
        script.respond(
            "apoc.import.graphml",
            vec![record([("nodes", 10i64), ("relationships", 5i64), ("time", 100i64)])],
        );
        let manager = BackupManager::new(&conn, dir.path()).unwrap();

        let stats = manager.import(&file, false).unwrap();
        assert_eq!(
            stats,
            ImportStats {
                nodes: 10,
                relationships: 5,
                time_ms: 100
            }
        );

        let issued = script.issued();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].params["file"], Value::from("file:///backup.graphml"));
        assert_eq!(issued[0].mode, AccessMode::Write);
        assert!(issued[0].text.contains("defaultRelationshipType: 'RELATED'"));
        assert!(issued[0].text.contains("batchSize: 1000"));
    }

    #[test]
    fn test_import_with_clear() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backup.graphml");
        fs::write(&file, "<graphml/>").unwrap();

        let (script, conn) = scripted();
        let manager = BackupManager::new(&conn, dir.path()).unwrap();
        manager.import(&file, true).unwrap();

        let issued = script.issued();
        assert_eq!(issued.len(), 2);
        assert_eq!(issued[0].text, "MATCH (n) DETACH DELETE n");
        assert!(issued[1].text.contains("apoc.import.graphml"));
    }

    #[test]
    fn test_import_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (script, conn) = scripted();
        let manager = BackupManager::new(&conn, dir.path()).unwrap();

        let missing = dir.path().join("nonexistent.graphml");
        match manager.import(&missing, true).unwrap_err() {
            ManagerError::BackupNotFound(path) => assert_eq!(path, missing),
            other => panic!("unexpected error: {}", other),
        }
        assert!(script.issued().is_empty());
        assert_eq!(script.connects(), 0);
    }

    #[test]
    fn test_import_failure() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backup.graphml");
        fs::write(&file, "<graphml/>").unwrap();

        let (script, conn) = scripted();
        script.fail("apoc.import", "Import failed");
        let manager = BackupManager::new(&conn, dir.path()).unwrap();

        assert!(matches!(
            manager.import(&file, false).unwrap_err(),
            ManagerError::ImportFailed(_)
        ));
    }

    #[test]
    fn test_import_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("backup.graphml");
        fs::write(&file, "<graphml/>").unwrap();

        let (_script, conn) = scripted();
        let manager = BackupManager::new(&conn, dir.path()).unwrap();

        assert_eq!(manager.import(&file, false).unwrap(), ImportStats::default());
    }

    #[test]
    fn test_backup_name_pattern() {
        assert!(is_backup_name("neo4j_backup_20250101_000000.graphml"));
        assert!(is_backup_name("neo4j_backup_20250101_000000.graphml.gz"));
        assert!(!is_backup_name("notes.txt"));
        assert!(!is_backup_name(".hidden.graphml"));
    }
}
