//! Per-server append-only log store with a bounded in-memory cache.
//!
//! Each logical server owns one `LogStore` (plus one store for system-level
//! events). Entries are kept in a FIFO-bounded in-memory buffer for cheap
//! tail queries and mirrored to an append-only UTF-8 file, one line per
//! entry, formatted as `[ISO-8601 timestamp] [SEVERITY] message`. When the
//! file grows past twice the line threshold it is rewritten to just the most
//! recent threshold-many lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Maximum number of entries held in memory per store (oldest evicted first).
pub const MEMORY_CAP: usize = 500;

/// Target line count a rotated file is trimmed down to. Rotation triggers
/// once the file exceeds twice this threshold.
pub const FILE_LINE_THRESHOLD: usize = 1000;

/// Severity of a single log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    /// Uppercase tag used in the persisted line format.
    pub fn as_tag(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Success => "SUCCESS",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "INFO" => Some(Severity::Info),
            "SUCCESS" => Some(Severity::Success),
            "WARNING" => Some(Severity::Warning),
            "ERROR" => Some(Severity::Error),
            _ => None,
        }
    }
}

/// A single immutable log entry, ordered by append time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    /// Creates an entry timestamped now.
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
        }
    }

    /// Renders the persisted single-line form: `[ISO-8601] [SEVERITY] message`.
    pub fn format_line(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.to_rfc3339(),
            self.severity.as_tag(),
            self.message
        )
    }

    /// Parses the persisted single-line form back into an entry.
    ///
    /// Lines that do not match the format are skipped by callers rather than
    /// treated as errors, so a hand-edited or truncated file never prevents
    /// the store from loading.
    pub fn parse_line(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (ts, rest) = rest.split_once("] [")?;
        let (tag, message) = rest.split_once("] ")?;
        let timestamp = DateTime::parse_from_rfc3339(ts).ok()?.with_timezone(&Utc);
        Some(Self {
            timestamp,
            severity: Severity::from_tag(tag)?,
            message: message.to_string(),
        })
    }
}

/// Append-only log for one logical server, mirrored to disk.
pub struct LogStore {
    path: PathBuf,
    entries: VecDeque<LogEntry>,
    file_lines: usize,
}

impl LogStore {
    /// Creates a store backed by the given file path. No I/O happens until
    /// [`LogStore::load`] or the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: VecDeque::with_capacity(MEMORY_CAP),
            file_lines: 0,
        }
    }

    /// Path of the backing file, for raw downloads.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seeds the in-memory buffer from the tail of the persisted file.
    ///
    /// Called once at supervisor boot. Missing files are treated as an empty
    /// history, not an error.
    pub async fn load(&mut self) -> std::io::Result<()> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let lines: Vec<&str> = content.lines().collect();
        self.file_lines = lines.len();
        self.entries.clear();
        for line in lines.iter().rev().take(MEMORY_CAP).rev() {
            if let Some(entry) = LogEntry::parse_line(line) {
                self.entries.push_back(entry);
            }
        }
        Ok(())
    }

    /// Appends an entry to memory and to the backing file, rotating the file
    /// when it exceeds twice the line threshold.
    pub async fn append(&mut self, entry: LogEntry) -> std::io::Result<()> {
        if self.entries.len() >= MEMORY_CAP {
            self.entries.pop_front();
        }
        let line = entry.format_line();
        self.entries.push_back(entry);

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        self.file_lines += 1;

        if self.file_lines > FILE_LINE_THRESHOLD * 2 {
            self.rotate().await?;
        }
        Ok(())
    }

    /// Rewrites the backing file down to its most recent threshold-many lines.
    async fn rotate(&mut self) -> std::io::Result<()> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let lines: Vec<&str> = content.lines().collect();
        let keep = lines.len().saturating_sub(FILE_LINE_THRESHOLD);
        let tail = lines[keep..].join("\n");
        tokio::fs::write(&self.path, format!("{tail}\n")).await?;
        self.file_lines = lines.len() - keep;
        Ok(())
    }

    /// Returns up to `limit` of the most recent in-memory entries.
    pub fn tail(&self, limit: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// Number of entries currently held in memory.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries are held in memory.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full history for session replay: persisted entries merged with any
    /// in-memory entries newer than the last persisted timestamp.
    pub async fn history(&self) -> std::io::Result<Vec<LogEntry>> {
        let mut merged: Vec<LogEntry> = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content.lines().filter_map(LogEntry::parse_line).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        let last_persisted = merged.last().map(|e| e.timestamp);
        for entry in &self.entries {
            if last_persisted.map_or(true, |ts| entry.timestamp > ts) {
                merged.push(entry.clone());
            }
        }
        Ok(merged)
    }

    /// Clears both the in-memory buffer and the persisted file.
    pub async fn clear(&mut self) -> std::io::Result<()> {
        self.entries.clear();
        self.file_lines = 0;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(msg: &str) -> LogEntry {
        LogEntry::new(Severity::Info, msg)
    }

    #[test]
    fn test_line_round_trip() {
        let original = LogEntry::new(Severity::Warning, "disk almost full");
        let line = original.format_line();
        let parsed = LogEntry::parse_line(&line).expect("line should parse back");
        assert_eq!(parsed.severity, Severity::Warning);
        assert_eq!(parsed.message, "disk almost full");
        assert_eq!(parsed.timestamp, original.timestamp);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(LogEntry::parse_line("").is_none());
        assert!(LogEntry::parse_line("not a log line").is_none());
        assert!(LogEntry::parse_line("[2024-01-01T00:00:00Z] [BOGUS] msg").is_none());
    }

    #[test]
    fn test_severity_tags() {
        assert_eq!(Severity::Info.as_tag(), "INFO");
        assert_eq!(Severity::Success.as_tag(), "SUCCESS");
        assert_eq!(Severity::Warning.as_tag(), "WARNING");
        assert_eq!(Severity::Error.as_tag(), "ERROR");
    }

    #[tokio::test]
    async fn test_memory_bound_fifo() {
        let dir = TempDir::new().unwrap();
        let mut store = LogStore::new(dir.path().join("pvp.log"));

        for i in 0..MEMORY_CAP + 50 {
            store.append(entry(&format!("event {i}"))).await.unwrap();
        }

        assert_eq!(store.len(), MEMORY_CAP);
        // Oldest entries evicted first
        let tail = store.tail(MEMORY_CAP);
        assert_eq!(tail.first().unwrap().message, "event 50");
        assert_eq!(
            tail.last().unwrap().message,
            format!("event {}", MEMORY_CAP + 49)
        );
    }

    #[tokio::test]
    async fn test_tail_limit() {
        let dir = TempDir::new().unwrap();
        let mut store = LogStore::new(dir.path().join("pvp.log"));
        for i in 0..10 {
            store.append(entry(&format!("event {i}"))).await.unwrap();
        }

        let tail = store.tail(3);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].message, "event 7");
        assert_eq!(tail[2].message, "event 9");

        // Limit larger than the buffer returns everything
        assert_eq!(store.tail(100).len(), 10);
    }

    #[tokio::test]
    async fn test_rotation_keeps_recent_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pve.log");
        let mut store = LogStore::new(&path);

        for i in 0..FILE_LINE_THRESHOLD * 2 + 1 {
            store.append(entry(&format!("event {i}"))).await.unwrap();
        }

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), FILE_LINE_THRESHOLD);
        // The most recent lines survive
        let last = LogEntry::parse_line(lines.last().unwrap()).unwrap();
        assert_eq!(last.message, format!("event {}", FILE_LINE_THRESHOLD * 2));
    }

    #[tokio::test]
    async fn test_load_seeds_memory_from_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pvp.log");

        {
            let mut store = LogStore::new(&path);
            for i in 0..20 {
                store.append(entry(&format!("boot {i}"))).await.unwrap();
            }
        }

        let mut reloaded = LogStore::new(&path);
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.len(), 20);
        assert_eq!(reloaded.tail(1)[0].message, "boot 19");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let mut store = LogStore::new(dir.path().join("missing.log"));
        store.load().await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_memory_and_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pvp.log");
        let mut store = LogStore::new(&path);
        store.append(entry("something")).await.unwrap();
        assert!(path.exists());

        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert!(!path.exists());

        // Clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_history_merges_file_and_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pvp.log");
        let mut store = LogStore::new(&path);
        for i in 0..5 {
            store.append(entry(&format!("event {i}"))).await.unwrap();
        }

        let history = store.history().await.unwrap();
        // Memory mirrors the file here, so no duplicates from the merge
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].message, "event 0");
        assert_eq!(history[4].message, "event 4");
    }
}
