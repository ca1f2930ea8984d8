use crate::error::{Result, WardenError};
use crate::logs::writer::{LogStreamKind, LogWriter};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;

/// Routes child process output into per-instance log files
///
/// Each attached child gets one capture task per stream; the tasks own their
/// writers, run until the pipe reaches EOF, and flush on exit. Because the
/// files are opened in append mode, a relaunched instance continues its
/// existing logs.
pub struct LogRouter {
    /// Directory where all log files are stored
    log_dir: PathBuf,
}

impl LogRouter {
    /// Create a new LogRouter with the specified log directory
    pub async fn new<P: AsRef<Path>>(log_dir: P) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();

        tokio::fs::create_dir_all(&log_dir).await.map_err(|e| {
            WardenError::Log(format!("Failed to create log directory: {}", e))
        })?;

        Ok(Self { log_dir })
    }

    /// Get the log directory path
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Take the child's stdout/stderr pipes and spawn capture tasks for them
    pub async fn attach(&self, instance_name: &str, child: &mut Child) -> Result<()> {
        let stdout = child.stdout.take().ok_or_else(|| {
            WardenError::Log(format!(
                "No stdout pipe available for instance {}",
                instance_name
            ))
        })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            WardenError::Log(format!(
                "No stderr pipe available for instance {}",
                instance_name
            ))
        })?;

        // Open the writers up front so setup errors surface to the caller
        let stdout_writer =
            LogWriter::new(&self.log_dir, instance_name, LogStreamKind::Stdout).await?;
        let stderr_writer =
            LogWriter::new(&self.log_dir, instance_name, LogStreamKind::Stderr).await?;

        tokio::spawn(capture_stream(BufReader::new(stdout), stdout_writer));
        tokio::spawn(capture_stream(BufReader::new(stderr), stderr_writer));

        Ok(())
    }

    /// Path of the stdout log file for an instance
    pub fn stdout_path(&self, instance_name: &str) -> PathBuf {
        self.log_dir.join(format!(
            "{}-{}.log",
            instance_name,
            LogStreamKind::Stdout.suffix()
        ))
    }

    /// Path of the stderr log file for an instance
    pub fn stderr_path(&self, instance_name: &str) -> PathBuf {
        self.log_dir.join(format!(
            "{}-{}.log",
            instance_name,
            LogStreamKind::Stderr.suffix()
        ))
    }
}

/// Read lines from one child pipe until EOF, writing them to the log file
async fn capture_stream<R>(mut reader: BufReader<R>, mut writer: LogWriter)
where
    R: AsyncRead + Unpin,
{
    let mut line = String::new();

    loop {
        match reader.read_line(&mut line).await {
            Ok(0) => {
                // EOF - child closed the pipe
                break;
            }
            Ok(_) => {
                let _ = writer.write_line(line.as_bytes()).await;
                line.clear();
            }
            Err(_) => {
                // Read error - child may have crashed
                break;
            }
        }
    }

    let _ = writer.flush().await;
}
