//! Filesystem watcher for the documents directory.
//!
//! Emits `{Added, Changed, Removed}` events into a bounded channel. Two
//! sources feed the channel:
//!
//! 1. **Startup reconciliation scan** — walks the directory once and diffs
//!    it against the metadata store: files on disk without a record become
//!    `Added`, records whose on-disk content hash shifted become `Changed`,
//!    records whose path vanished become `Removed`.
//! 2. **Debounced notify events** — editor saves fire several raw events,
//!    so raw notify events are collapsed within a debounce window before
//!    classification.
//!
//! Dotfiles (and anything under a dot-directory) are ignored, as are paths
//! whose extension is not on the allow-list.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_full::{new_debouncer, DebounceEventResult, DebouncedEvent};
use tokio::sync::mpsc;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::meta::MetadataStore;
use crate::models::content_hash;

/// A change observed under the documents directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Added(PathBuf),
    Changed(PathBuf),
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Added(p) | WatchEvent::Changed(p) | WatchEvent::Removed(p) => p,
        }
    }
}

/// True when any component of `path` is a dotfile or dot-directory.
pub fn has_hidden_component(path: &Path) -> bool {
    path.components().any(|c| match c {
        Component::Normal(name) => name.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

fn is_watchable(config: &Config, path: &Path) -> bool {
    let relative = path.strip_prefix(&config.documents_dir).unwrap_or(path);
    !has_hidden_component(relative) && config.is_supported_path(path)
}

/// Walk the documents directory and diff it against the metadata store.
///
/// Hashes every supported file on disk; the content hash is the sole
/// change-detection signal.
pub async fn startup_scan(config: &Config, meta: &MetadataStore) -> Result<Vec<WatchEvent>> {
    let mut events = Vec::new();
    let mut on_disk: Vec<PathBuf> = Vec::new();

    for entry in WalkDir::new(&config.documents_dir) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable directory entry during scan");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if !is_watchable(config, path) {
            continue;
        }
        on_disk.push(path.to_path_buf());
    }

    for path in &on_disk {
        let path_str = path.to_string_lossy().to_string();
        match meta.get_file_by_path(&path_str).await? {
            None => events.push(WatchEvent::Added(path.clone())),
            Some(record) => {
                let bytes = match std::fs::read(path) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cannot read file during scan");
                        continue;
                    }
                };
                if content_hash(&bytes) != record.content_hash {
                    events.push(WatchEvent::Changed(path.clone()));
                }
            }
        }
    }

    for record in meta.list_files().await? {
        let path = PathBuf::from(&record.path);
        if !path.exists() {
            events.push(WatchEvent::Removed(path));
        }
    }

    info!(
        files_on_disk = on_disk.len(),
        pending_events = events.len(),
        "startup reconciliation scan complete"
    );
    Ok(events)
}

/// Running watcher handle. Dropping it stops the watch.
pub struct FileWatcher {
    _debouncer: notify_debouncer_full::Debouncer<
        notify::RecommendedWatcher,
        notify_debouncer_full::RecommendedCache,
    >,
}

impl FileWatcher {
    /// Watch `documents_dir` recursively, sending classified events to `tx`.
    ///
    /// The send blocks the notify worker thread when the channel is full,
    /// which backpressures the watcher instead of dropping events.
    pub fn start(config: &Config, tx: mpsc::Sender<WatchEvent>) -> Result<Self> {
        let watch_root = config.documents_dir.clone();
        let config_for_events = config.clone();

        let mut debouncer = new_debouncer(
            Duration::from_millis(config.ingest.debounce_ms),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    for event in classify_events(&config_for_events, &events) {
                        if tx.blocking_send(event).is_err() {
                            // Receiver is gone; the engine is shutting down.
                            return;
                        }
                    }
                }
                Err(errors) => {
                    for e in errors {
                        warn!(error = ?e, "file watcher error");
                    }
                }
            },
        )
        .map_err(|e| EngineError::Config(format!("failed to start file watcher: {}", e)))?;

        debouncer
            .watch(&watch_root, RecursiveMode::Recursive)
            .map_err(|e| {
                EngineError::Config(format!(
                    "failed to watch {}: {}",
                    watch_root.display(),
                    e
                ))
            })?;

        info!(root = %watch_root.display(), "watching documents directory");
        Ok(Self {
            _debouncer: debouncer,
        })
    }
}

/// Collapse a debounced batch into per-path events; the last event kind wins
/// for each path.
fn classify_events(config: &Config, events: &[DebouncedEvent]) -> Vec<WatchEvent> {
    use notify::EventKind;

    let mut per_path: Vec<(PathBuf, WatchEvent)> = Vec::new();
    for event in events {
        for path in &event.paths {
            if !is_watchable(config, path) {
                continue;
            }
            let classified = match event.kind {
                EventKind::Create(_) => WatchEvent::Added(path.clone()),
                EventKind::Modify(_) => {
                    if path.exists() {
                        WatchEvent::Changed(path.clone())
                    } else {
                        // Rename away from the watched tree.
                        WatchEvent::Removed(path.clone())
                    }
                }
                EventKind::Remove(_) => WatchEvent::Removed(path.clone()),
                _ => continue,
            };
            if let Some(slot) = per_path.iter_mut().find(|(p, _)| p == path) {
                slot.1 = classified;
            } else {
                per_path.push((path.clone(), classified));
            }
        }
    }
    per_path.into_iter().map(|(_, event)| event).collect()
}
