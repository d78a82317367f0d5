use std::path::{Path, PathBuf};
use std::time::Duration;

use botway_common::{Error, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Watches the config file and emits a debounced notification whenever it
/// changes on disk. The receiver side reloads via `ConfigLoader`.
pub struct ConfigWatcher {
    // Held for its Drop side effect: dropping stops the file watch.
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<()>,
}

impl ConfigWatcher {
    pub fn new(path: &Path, debounce: Duration) -> Result<Self> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<()>(16);
        let (tx, rx) = mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = raw_tx.try_send(());
                }
                Ok(_) => {}
                Err(e) => warn!("config watch error: {e}"),
            }
        })
        .map_err(|e| Error::Config(format!("failed to create config watcher: {e}")))?;

        let watch_target: PathBuf = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_target, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Config(format!("failed to watch {}: {e}", watch_target.display())))?;

        tokio::spawn(async move {
            while raw_rx.recv().await.is_some() {
                // Collapse edit bursts (editors write + rename) into one event.
                tokio::time::sleep(debounce).await;
                while raw_rx.try_recv().is_ok() {}
                debug!("config change detected");
                if tx.send(()).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next change notification. Returns `None` when the
    /// watcher task has stopped.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}
