use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

/// Default interval between directory scans
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Default quiet window; a burst of changes inside it collapses into one event
const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// Notification that files under a watched tree changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Name of the process group whose watch directory changed
    pub group: String,
}

/// Watches a directory tree and requests a restart when its contents change
///
/// The trigger polls the tree and compares a fingerprint of every file's
/// path, size and modification time. Changes are debounced: the event is
/// sent only once the tree has been quiet for a full window, so a burst of
/// writes produces a single restart request. Dropping the trigger cancels
/// the background task.
pub struct WatchTrigger {
    handle: JoinHandle<()>,
}

impl WatchTrigger {
    /// Spawn a watch task with default timing
    pub fn spawn(group: String, root: PathBuf, notify: mpsc::Sender<ChangeEvent>) -> Self {
        Self::with_timing(
            group,
            root,
            notify,
            DEFAULT_POLL_INTERVAL,
            DEFAULT_QUIET_WINDOW,
        )
    }

    /// Spawn a watch task with custom poll interval and quiet window
    pub fn with_timing(
        group: String,
        root: PathBuf,
        notify: mpsc::Sender<ChangeEvent>,
        poll_interval: Duration,
        quiet_window: Duration,
    ) -> Self {
        let handle = tokio::spawn(watch_loop(group, root, notify, poll_interval, quiet_window));
        Self { handle }
    }
}

impl Drop for WatchTrigger {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn watch_loop(
    group: String,
    root: PathBuf,
    notify: mpsc::Sender<ChangeEvent>,
    poll_interval: Duration,
    quiet_window: Duration,
) {
    info!(group = %group, root = %root.display(), "watching for file changes");

    let mut interval = tokio::time::interval(poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut fingerprint = scan(&root).await;
    let mut pending = false;
    let mut last_change = Instant::now();

    loop {
        interval.tick().await;

        let current = scan(&root).await;
        if current != fingerprint {
            fingerprint = current;
            pending = true;
            last_change = Instant::now();
            debug!(group = %group, "change observed, waiting for quiet window");
        } else if pending && last_change.elapsed() >= quiet_window {
            pending = false;
            info!(group = %group, "file change detected, requesting restart");
            if notify
                .send(ChangeEvent {
                    group: group.clone(),
                })
                .await
                .is_err()
            {
                // Supervisor is gone
                break;
            }
        }
    }
}

/// Fingerprint a directory tree from every file's path, size and mtime
///
/// Unreadable entries are skipped; a file vanishing mid-scan just changes
/// the fingerprint on the next pass.
async fn scan(root: &Path) -> u64 {
    let mut hasher = DefaultHasher::new();
    let mut pending_dirs = vec![root.to_path_buf()];

    while let Some(dir) = pending_dirs.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(_) => continue,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                Err(_) => continue,
            };

            if file_type.is_dir() {
                pending_dirs.push(path);
                continue;
            }

            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };

            path.hash(&mut hasher);
            metadata.len().hash(&mut hasher);
            if let Ok(modified) = metadata.modified() {
                if let Ok(elapsed) = modified.duration_since(std::time::UNIX_EPOCH) {
                    elapsed.as_nanos().hash(&mut hasher);
                }
            }
        }
    }

    hasher.finish()
}
