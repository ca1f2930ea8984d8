use crate::error::{Result, WardenError};
use chrono::{DateTime, Local};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;

/// Default maximum log file size before rotation (10MB)
const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Which output stream of the child a writer records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStreamKind {
    Stdout,
    Stderr,
}

impl LogStreamKind {
    /// File name suffix for this stream
    pub fn suffix(&self) -> &'static str {
        match self {
            LogStreamKind::Stdout => "out",
            LogStreamKind::Stderr => "err",
        }
    }
}

/// Writes one output stream of one instance to a log file
/// with automatic rotation based on file size
pub struct LogWriter {
    /// Path to the log file
    path: PathBuf,
    /// Async file handle, opened in append mode
    file: TokioFile,
    /// Maximum size in bytes before rotation
    max_size: u64,
    /// Current size of the file
    size: u64,
}

impl LogWriter {
    /// Create a new LogWriter for one stream of an instance
    ///
    /// The file is named `<instance>-out.log` or `<instance>-err.log` inside
    /// `log_dir` and appended to across restarts.
    pub async fn new(log_dir: &Path, instance_name: &str, kind: LogStreamKind) -> Result<Self> {
        Self::with_max_size(log_dir, instance_name, kind, DEFAULT_MAX_LOG_SIZE).await
    }

    /// Create a new LogWriter with a custom maximum log size
    pub async fn with_max_size(
        log_dir: &Path,
        instance_name: &str,
        kind: LogStreamKind,
        max_size: u64,
    ) -> Result<Self> {
        tokio::fs::create_dir_all(log_dir).await.map_err(|e| {
            WardenError::Log(format!("Failed to create log directory: {}", e))
        })?;

        let path = log_dir.join(format!("{}-{}.log", instance_name, kind.suffix()));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| WardenError::LogFile(format!("Failed to open log file: {}", e)))?;

        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let file = TokioFile::from_std(file);

        Ok(Self {
            path,
            file,
            max_size,
            size,
        })
    }

    /// Write one line with a timestamp, rotating first if the file is full
    pub async fn write_line(&mut self, data: &[u8]) -> Result<()> {
        if self.size >= self.max_size {
            self.rotate().await?;
        }

        let timestamp = Local::now();
        let entry = format_entry(&timestamp, data);

        self.file
            .write_all(&entry)
            .await
            .map_err(|e| WardenError::Log(format!("Failed to write to log: {}", e)))?;

        self.file
            .flush()
            .await
            .map_err(|e| WardenError::Log(format!("Failed to flush log: {}", e)))?;

        self.size += entry.len() as u64;

        Ok(())
    }

    /// Rotate by renaming the current file with a timestamp and reopening
    async fn rotate(&mut self) -> Result<()> {
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let parent = self
            .path
            .parent()
            .ok_or_else(|| WardenError::LogRotation("Invalid log file path".to_string()))?;
        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| WardenError::LogRotation("Invalid log file name".to_string()))?;

        let rotated_path = parent.join(format!("{}-{}.log", stem, stamp));

        tokio::fs::rename(&self.path, &rotated_path)
            .await
            .map_err(|e| WardenError::LogRotation(format!("Failed to rotate log: {}", e)))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| WardenError::LogFile(format!("Failed to reopen log file: {}", e)))?;

        self.file = TokioFile::from_std(file);
        self.size = 0;

        Ok(())
    }

    /// Get the path to the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the current size of the log file
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Get the maximum log file size before rotation
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Flush the log file to ensure all data is written
    pub async fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .await
            .map_err(|e| WardenError::Log(format!("Failed to flush log: {}", e)))
    }
}

/// Format a log entry as `[YYYY-MM-DD HH:MM:SS.mmm] <data>`
fn format_entry(timestamp: &DateTime<Local>, data: &[u8]) -> Vec<u8> {
    let stamp = timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string();
    let mut entry = Vec::with_capacity(stamp.len() + 3 + data.len());

    entry.extend_from_slice(b"[");
    entry.extend_from_slice(stamp.as_bytes());
    entry.extend_from_slice(b"] ");
    entry.extend_from_slice(data);

    if !data.ends_with(b"\n") {
        entry.push(b'\n');
    }

    entry
}
