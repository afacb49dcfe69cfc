//! File change notifications with debouncing
//!
//! [`watch_file`] turns OS file events for a single file into `()` signals on
//! a channel; [`debounce`] waits for those signals to go quiet before running
//! a reaction. The two halves are independent so the reload logic can be fed
//! from any source.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info};

/// Keeps the OS watcher alive; dropping it stops the notifications
pub struct FileWatch {
    _watcher: RecommendedWatcher,
    path: PathBuf,
}

impl FileWatch {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Watch a single file for changes.
///
/// The parent directory is watched so editors that replace the file
/// (write-to-temp then rename) keep being noticed.
pub fn watch_file(path: &Path) -> Result<(FileWatch, mpsc::Receiver<()>)> {
    let path = path.to_path_buf();
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .context("Watched path has no file name")?;

    let (tx, rx) = mpsc::channel::<()>(64);

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                if event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()))
                {
                    debug!(kind = ?event.kind, "[Watcher] Change detected");
                    // A full channel already carries a pending signal
                    let _ = tx.try_send(());
                }
            }
            Err(e) => {
                error!("[Watcher] File watcher error: {}", e);
            }
        }
    })
    .context("Failed to create file watcher")?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {:?}", dir))?;

    info!(path = ?path, "[Watcher] Watching for changes");
    Ok((
        FileWatch {
            _watcher: watcher,
            path,
        },
        rx,
    ))
}

/// Run `on_settled` once the change signals on `rx` have been quiet for `delay`.
///
/// Every new signal restarts the wait. Returns when the channel closes.
pub async fn debounce<F, Fut>(mut rx: mpsc::Receiver<()>, delay: Duration, mut on_settled: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            change = rx.recv() => match change {
                Some(()) => deadline = Some(Instant::now() + delay),
                None => break,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                on_settled().await;
            }
        }
    }
}
