//! Filesystem watch mode: after the initial scan, react to changes by
//! pushing paths back through the same per-file pipeline.
use super::IngestEngine;
use crate::content_type::is_audio_path;
use notify::event::{CreateKind, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to initialize watcher: {0}")]
    Init(String),
    #[error("failed to watch path: {0}")]
    Watch(String),
}

/// Watch the engine's root until the process stops.
///
/// Create/Write/Rename events on audio files re-enter the pipeline. A new
/// directory gets its own recursive watch and a full walk, so files that
/// landed before the watch was registered are not missed.
pub async fn watch_loop(engine: Arc<IngestEngine>) -> Result<(), WatchError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher: RecommendedWatcher = notify::recommended_watcher(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!("watch error: {}", e),
        },
    )
    .map_err(|e| WatchError::Init(e.to_string()))?;

    let root = engine.config().dir.clone();
    let mode = if engine.config().recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher
        .watch(&root, mode)
        .map_err(|e| WatchError::Watch(e.to_string()))?;

    info!("Watching {} for changes", root.display());

    while let Some(event) = rx.recv().await {
        match event.kind {
            EventKind::Create(CreateKind::File)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_)) => {
                for path in &event.paths {
                    if path.is_file() && is_audio_path(path) {
                        debug!("watch: change on {}", path.display());
                        engine.process_file(path).await;
                    }
                }
            }
            EventKind::Create(CreateKind::Folder) => {
                for path in &event.paths {
                    if path.is_dir() {
                        info!("watch: new directory {}", path.display());
                        if let Err(e) = watcher.watch(path, RecursiveMode::Recursive) {
                            warn!("failed to watch {}: {}", path.display(), e);
                        }
                        walk_new_directory(&engine, path).await;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(())
}

/// Fully walk a directory that appeared while watching.
async fn walk_new_directory(engine: &Arc<IngestEngine>, dir: &Path) {
    let dir = dir.to_path_buf();
    let paths: Vec<PathBuf> = match tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_audio_path(e.path()))
            .map(|e| e.path().to_path_buf())
            .collect()
    })
    .await
    {
        Ok(paths) => paths,
        Err(e) => {
            warn!("failed to walk new directory: {}", e);
            return;
        }
    };

    for path in paths {
        engine.process_file(&path).await;
    }
}
