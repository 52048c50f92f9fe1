//! File watcher for the notes directory. Signals when markdown files change.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::notify::{self, RecommendedWatcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEvent, Debouncer};

use crate::notes::is_markdown;

const DEBOUNCE: Duration = Duration::from_millis(400);

/// Keeps the watch alive; dropping it stops watching.
pub struct NotesWatcher {
    root: PathBuf,
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl NotesWatcher {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Watches `root` recursively and calls `on_change` with the changed note paths
/// (debounced). Changes to non-markdown files and Logseq's own data are ignored.
pub fn watch_notes(
    root: &Path,
    on_change: impl Fn(Vec<PathBuf>) + Send + 'static,
) -> Result<NotesWatcher, WatchError> {
    if !root.is_dir() {
        return Err(WatchError::NotADirectory(root.to_path_buf()));
    }
    let root = root.canonicalize().map_err(WatchError::Canonicalize)?;
    let filter_root = root.clone();

    let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| match res {
        Ok(events) => {
            let changed = changed_notes(&filter_root, &events);
            if !changed.is_empty() {
                on_change(changed);
            }
        }
        Err(e) => tracing::warn!("watcher error: {}", e),
    })
    .map_err(|e| WatchError::Notify(e.to_string()))?;

    debouncer
        .watcher()
        .watch(&root, notify::RecursiveMode::Recursive)
        .map_err(|e| WatchError::Watch(e.to_string()))?;
    tracing::info!("watching {}", root.display());

    Ok(NotesWatcher {
        root,
        _debouncer: debouncer,
    })
}

fn changed_notes(root: &Path, events: &[DebouncedEvent]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = events
        .iter()
        .map(|e| e.path.clone())
        .filter(|p| is_note_path(root, p))
        .collect();
    paths.sort();
    paths.dedup();
    paths
}

/// A markdown file under `root` outside hidden directories and `logseq/`.
fn is_note_path(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    is_markdown(relative)
        && relative.components().all(|c| {
            let name = c.as_os_str().to_string_lossy();
            !name.starts_with('.') && name != "logseq"
        })
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("failed to resolve path: {0}")]
    Canonicalize(std::io::Error),
    #[error("watcher init: {0}")]
    Notify(String),
    #[error("watch failed: {0}")]
    Watch(String),
}
