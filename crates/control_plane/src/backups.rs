//! Game-state backup management.
//!
//! Backups are opaque JSON blobs written to a configured directory; the
//! control plane never interprets their contents. Restore is delegated to
//! the child process over IPC with the snapshot's file path. File names
//! follow `backup-<id>-<timestamp>.json` with ':' and '.' in the timestamp
//! replaced so names stay filesystem-safe.

use crate::error::SupervisorError;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Metadata for one stored backup file.
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    /// File name within the backup directory.
    pub file: String,
    /// Logical server id encoded in the file name.
    pub server: String,
    /// Size in bytes.
    pub size: u64,
    /// Last-modified time, RFC 3339.
    pub modified: String,
}

/// Manages the backup directory.
pub struct BackupManager {
    dir: PathBuf,
}

impl BackupManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the snapshot files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes an opaque snapshot blob for `server_id` and returns the file
    /// name it was stored under.
    pub async fn create(
        &self,
        server_id: &str,
        blob: &Value,
    ) -> Result<String, SupervisorError> {
        validate_id(server_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let stamp = Utc::now()
            .to_rfc3339()
            .replace(':', "-")
            .replace('.', "-");
        let file = format!("backup-{server_id}-{stamp}.json");
        let body = serde_json::to_vec_pretty(blob)
            .map_err(|e| SupervisorError::Config(format!("unserializable backup blob: {e}")))?;
        tokio::fs::write(self.dir.join(&file), body).await?;
        Ok(file)
    }

    /// Lists stored backups, newest first.
    pub async fn list(&self) -> Result<Vec<BackupInfo>, SupervisorError> {
        let mut backups = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(backups),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(server) = parse_backup_name(&name) else {
                continue;
            };
            let meta = entry.metadata().await?;
            let modified = meta
                .modified()
                .map(|t| chrono::DateTime::<Utc>::from(t).to_rfc3339())
                .unwrap_or_default();
            backups.push(BackupInfo {
                file: name,
                server,
                size: meta.len(),
                modified,
            });
        }
        backups.sort_by(|a, b| b.file.cmp(&a.file));
        Ok(backups)
    }

    /// Deletes a stored backup by file name.
    pub async fn delete(&self, file: &str) -> Result<(), SupervisorError> {
        let path = self.resolve(file)?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    /// Resolves a backup file name to its full path, rejecting names that
    /// do not look like backups or that try to escape the directory.
    pub fn resolve(&self, file: &str) -> Result<PathBuf, SupervisorError> {
        if parse_backup_name(file).is_none() {
            return Err(SupervisorError::Config(format!(
                "not a backup file name: '{file}'"
            )));
        }
        Ok(self.dir.join(file))
    }
}

/// Validates a logical server id for use inside a file name.
fn validate_id(id: &str) -> Result<(), SupervisorError> {
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SupervisorError::Config(format!(
            "invalid server id for backup: '{id}'"
        )));
    }
    Ok(())
}

/// Extracts the server id from a `backup-<id>-<stamp>.json` file name.
/// Returns `None` for anything else (including path traversal attempts,
/// since separators never validate).
fn parse_backup_name(file: &str) -> Option<String> {
    let stem = file.strip_prefix("backup-")?.strip_suffix(".json")?;
    if stem.contains('/') || stem.contains('\\') {
        return None;
    }
    // The timestamp starts at the first segment that parses as a year
    let (id, _stamp) = stem.split_once('-')?;
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}
