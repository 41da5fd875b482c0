//! Parallel directory recursion.
//!
//! A handful of workers drain the directory queue and enqueue
//! subdirectories non-blockingly: when the queue is full, the producer
//! recurses inline instead of waiting, so the bounded queue can never
//! deadlock the recursion. Files that survive the selection rules are
//! sent on the (blocking) file queue.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use log::{error, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{DirMessage, WaitCounter};
use crate::gitignore::{Checker, GitignoreCache, GITIGNORE_FILENAME, GIT_FOLDER_NAME};
use crate::options::{Options, SearchConfig};

/// Everything a directory worker needs; cloned per worker.
#[derive(Clone)]
pub struct WalkContext {
    pub config: Arc<SearchConfig>,
    pub dir_tx: Sender<DirMessage>,
    pub file_tx: Sender<String>,
    pub pending: Arc<WaitCounter>,
    pub gitignore_cache: Arc<GitignoreCache>,
}

pub fn spawn_dir_workers(
    ctx: WalkContext,
    dir_rx: Receiver<DirMessage>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let ctx = ctx.clone();
            let dir_rx = dir_rx.clone();
            thread::spawn(move || {
                while let Ok(message) = dir_rx.recv() {
                    match message {
                        DirMessage::Dir(dir) => process_directory(&ctx, &dir),
                        DirMessage::Shutdown => break,
                    }
                }
            })
        })
        .collect()
}

/// Hand a directory to the worker pool; on a full queue the caller
/// recurses inline.
pub fn enqueue_directory(ctx: &WalkContext, dir: PathBuf) {
    ctx.pending.add(1);
    match ctx.dir_tx.try_send(DirMessage::Dir(dir)) {
        Ok(()) => {}
        Err(TrySendError::Full(DirMessage::Dir(dir)))
        | Err(TrySendError::Disconnected(DirMessage::Dir(dir))) => {
            process_directory(ctx, &dir);
        }
        Err(_) => ctx.pending.done(),
    }
}

/// Recurse into one directory, balancing the pending counter on every
/// exit path.
pub fn process_directory(ctx: &WalkContext, dir: &Path) {
    if let Err(err) = walk_directory(ctx, dir) {
        error!("cannot read directory '{}': {}", dir.display(), err);
    }
    ctx.pending.done();
}

fn walk_directory(ctx: &WalkContext, dir: &Path) -> std::io::Result<()> {
    let opts = &ctx.config.opts;

    let checker = if opts.git {
        let mut checker = Checker::with_cache(Arc::clone(&ctx.gitignore_cache));
        if let Err(err) = checker.load_base_path(dir) {
            error!(
                "cannot load gitignore files for path '{}': {}",
                dir.display(),
                err
            );
        }
        Some(checker)
    } else {
        None
    };

    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("cannot read entry in '{}': {}", dir.display(), err);
                continue;
            }
        };
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(_) => continue,
        };

        if file_type.is_dir() {
            if !opts.recursive {
                continue;
            }
            if ctx
                .config
                .exclude_dir_globs
                .iter()
                .any(|glob| glob.is_match(Path::new(name.as_ref())))
            {
                continue;
            }
            if opts.git {
                if name == GIT_FOLDER_NAME {
                    continue;
                }
                if let Some(checker) = &checker {
                    if checker.is_ignored(&path, true) {
                        continue;
                    }
                }
            }
            enqueue_directory(ctx, path);
        } else if file_type.is_file() {
            if !extension_selected(&name, opts) {
                continue;
            }
            if opts.git {
                if name == GITIGNORE_FILENAME {
                    continue;
                }
                if let Some(checker) = &checker {
                    if checker.is_ignored(&path, false) {
                        continue;
                    }
                }
            }
            let _ = ctx.file_tx.send(path.to_string_lossy().into_owned());
        }
        // Symlinks and special files are skipped.
    }
    Ok(())
}

fn extension_selected(name: &str, opts: &Options) -> bool {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    if !opts.exclude_extensions.is_empty()
        && opts.exclude_extensions.split(',').any(|e| e == extension)
    {
        return false;
    }
    if !opts.include_extensions.is_empty() {
        return opts.include_extensions.split(',').any(|e| e == extension);
    }
    true
}
