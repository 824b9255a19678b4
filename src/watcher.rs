//! File watcher for identity files.
//!
//! Watches the identities directory (recursively) and the directory holding
//! the global config file. Each debounced batch of changed paths is handed to
//! [`IdentityRegistry::handle_file_changed`], so edits made outside the
//! process are reloaded and their differences reach every listener. The
//! outcome of each batch is published on a tokio watch channel.

use crate::registry::{FileChange, IdentityRegistry};
use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How often the worker checks whether anyone is still listening.
const RECEIVER_POLL: Duration = Duration::from_millis(250);

/// What happened after a batch of file changes was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityChangeEvent {
    /// A known identity was re-read.
    Reloaded { path: PathBuf, changes: usize },
    /// A new identity file appeared and was loaded.
    Added(PathBuf),
    /// An identity file disappeared.
    Removed(PathBuf),
    /// A new file could not be loaded as an identity.
    Rejected { path: PathBuf, reason: String },
    /// The watcher itself failed.
    Error(String),
}

impl IdentityChangeEvent {
    fn from_change(path: &Path, change: FileChange) -> Option<Self> {
        let path = path.to_path_buf();
        match change {
            FileChange::Reloaded { changes } => Some(Self::Reloaded { path, changes }),
            FileChange::Added => Some(Self::Added(path)),
            FileChange::Removed => Some(Self::Removed(path)),
            FileChange::Failed(reason) => Some(Self::Rejected { path, reason }),
            FileChange::Ignored => None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Reloaded { path, .. } | Self::Rejected { path, .. } => Some(path),
            Self::Added(path) | Self::Removed(path) => Some(path),
            Self::Error(_) => None,
        }
    }
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for coalescing rapid changes.
    pub debounce_duration: Duration,
    /// Whether to watch the identities directory.
    pub watch_identities: bool,
    /// Whether to watch the global config file.
    pub watch_global: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
            watch_identities: true,
            watch_global: true,
        }
    }
}

/// Handle to a running watcher. Dropping it stops the worker shortly after.
pub struct IdentityWatcherHandle {
    pub events: watch::Receiver<Option<IdentityChangeEvent>>,
    _task_handle: tokio::task::JoinHandle<()>,
}

impl IdentityWatcherHandle {
    /// Wait for the next event. `None` once the worker has stopped.
    pub async fn wait_for_change(&mut self) -> Option<IdentityChangeEvent> {
        loop {
            if self.events.changed().await.is_err() {
                return None;
            }
            let event = self.events.borrow().clone();
            if event.is_some() {
                return event;
            }
        }
    }

    pub fn latest_event(&self) -> Option<IdentityChangeEvent> {
        self.events.borrow().clone()
    }
}

/// Start watching the registry's identity files.
///
/// Must be called from within a tokio runtime.
pub fn start_identity_watcher(
    registry: Arc<IdentityRegistry>,
    config: WatcherConfig,
) -> Result<IdentityWatcherHandle, notify::Error> {
    let (event_tx, event_rx) = watch::channel(None);
    let (notify_tx, notify_rx) = mpsc::channel();

    let mut debouncer = new_debouncer(config.debounce_duration, notify_tx)?;
    let watcher = debouncer.watcher();
    let paths = registry.paths().clone();

    if config.watch_identities
        && let Some(dir) = &paths.identities_dir
    {
        if dir.exists() {
            info!("Watching identities directory: {}", dir.display());
            watcher.watch(dir, notify::RecursiveMode::Recursive)?;
        } else {
            warn!(
                "Identities directory does not exist, skipping watch: {}",
                dir.display()
            );
        }
    }

    let global_dir = paths
        .global_config
        .as_deref()
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty());
    if config.watch_global
        && let Some(dir) = global_dir
    {
        let covered = config.watch_identities
            && paths
                .identities_dir
                .as_deref()
                .is_some_and(|identities| dir.starts_with(identities));
        if covered {
            debug!("Global config already covered by identities watch");
        } else if dir.exists() {
            info!("Watching global config directory: {}", dir.display());
            watcher.watch(dir, notify::RecursiveMode::NonRecursive)?;
        } else {
            warn!(
                "Global config directory does not exist, skipping watch: {}",
                dir.display()
            );
        }
    }

    let task_handle = tokio::task::spawn_blocking(move || {
        let _debouncer = debouncer;
        process_notify_events(notify_rx, event_tx, &registry);
    });

    Ok(IdentityWatcherHandle {
        events: event_rx,
        _task_handle: task_handle,
    })
}

fn process_notify_events(
    rx: mpsc::Receiver<Result<Vec<DebouncedEvent>, notify::Error>>,
    tx: watch::Sender<Option<IdentityChangeEvent>>,
    registry: &IdentityRegistry,
) {
    loop {
        match rx.recv_timeout(RECEIVER_POLL) {
            Ok(Ok(events)) => {
                for path in changed_paths(events, registry) {
                    let change = registry.handle_file_changed(&path);
                    let Some(event) = IdentityChangeEvent::from_change(&path, change) else {
                        continue;
                    };
                    debug!("Identity change detected: {:?}", event);
                    if tx.send(Some(event)).is_err() {
                        info!("Identity watcher receiver dropped, stopping");
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                error!("File watcher error: {}", e);
                let _ = tx.send(Some(IdentityChangeEvent::Error(e.to_string())));
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if tx.is_closed() {
                    info!("Identity watcher receiver dropped, stopping");
                    return;
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!("Identity watcher channel closed, stopping");
                return;
            }
        }
    }
}

/// Distinct identity paths in a debounced batch, in arrival order.
fn changed_paths(events: Vec<DebouncedEvent>, registry: &IdentityRegistry) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();
    for event in events {
        if !matches!(
            event.kind,
            DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
        ) {
            continue;
        }
        if is_candidate(&event.path, registry) && !result.contains(&event.path) {
            result.push(event.path);
        }
    }
    result
}

/// Editor swap files and hidden files are never identities.
fn is_candidate(path: &Path, registry: &IdentityRegistry) -> bool {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if file_name.is_empty() || file_name.starts_with('.') || file_name.ends_with('~') {
        return false;
    }

    let is_global = registry
        .paths()
        .global_config
        .as_deref()
        .is_some_and(|global| global.file_name() == path.file_name());
    is_global || registry.is_identities_path(path) || registry.identity_for_path(path).is_some()
}
