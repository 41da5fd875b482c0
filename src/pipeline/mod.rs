//! Parallel target processing.
//!
//! The driver enqueues the initial targets; a small set of directory
//! workers recurses in parallel and feeds the bounded file queue; file
//! workers each own their buffers and regex set and run the engine per
//! target; a single result handler applies conditions and renders.
//!
//! Termination is strictly ordered: wait for the recursion counter,
//! shut down the directory workers, close the file queue, join the file
//! and network workers, close the results channel, and finally collect
//! the totals from the handler.

pub mod results;
pub mod walk;
pub mod workers;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::bounded;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use crate::engine::reader;
use crate::gitignore::GitignoreCache;
use crate::options::SearchConfig;

/// Maximum number of parallel directory recursion workers.
pub const MAX_DIR_RECURSION_WORKERS: usize = 3;

const DIRECTORY_QUEUE_CAP: usize = 128;
const FILE_QUEUE_CAP: usize = 256;
const RESULTS_QUEUE_CAP: usize = 128;

/// Run counters, updated only by the single result handler.
#[derive(Debug, Default, Clone)]
pub struct SearchTotals {
    /// Targets for which a result was delivered.
    pub targets: u64,
    /// Targets with at least one surviving match.
    pub results: u64,
    /// Total matches rendered.
    pub matches: u64,
    /// Targets skipped because of an over-long line.
    pub line_length_errors: u64,
}

/// Message on the directory queue. `Shutdown` releases one recursion
/// worker once the pending counter has drained.
pub enum DirMessage {
    Dir(PathBuf),
    Shutdown,
}

/// Counts directories that are enqueued but not yet fully processed.
/// The driver waits on it before closing the directory queue.
pub struct WaitCounter {
    count: Mutex<usize>,
    cv: Condvar,
}

impl WaitCounter {
    pub fn new() -> Self {
        Self {
            count: Mutex::new(0),
            cv: Condvar::new(),
        }
    }

    pub fn add(&self, n: usize) {
        *self.count.lock().unwrap() += n;
    }

    pub fn done(&self) {
        let mut count = self.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            self.cv.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.cv.wait(count).unwrap();
        }
    }
}

impl Default for WaitCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a complete search over the given targets and return the totals.
pub fn execute_search(config: Arc<SearchConfig>, targets: &[String]) -> Result<SearchTotals> {
    // Validate plain targets up front so nothing is spawned for a typo.
    for target in targets {
        if target != "-" && reader::net_target(target).is_none() {
            fs::metadata(target)
                .with_context(|| format!("no such file or directory: {}", target))?;
        }
    }

    let (dir_tx, dir_rx) = bounded::<DirMessage>(DIRECTORY_QUEUE_CAP);
    let (file_tx, file_rx) = bounded::<String>(FILE_QUEUE_CAP);
    let (results_tx, results_rx) = bounded(RESULTS_QUEUE_CAP);
    let pending = Arc::new(WaitCounter::new());
    let line_length_errors = Arc::new(AtomicU64::new(0));

    let handler = results::spawn_result_handler(Arc::clone(&config), results_rx);

    let worker_count = config.opts.cores.max(1);
    let file_workers = workers::spawn_file_workers(
        Arc::clone(&config),
        file_rx,
        results_tx.clone(),
        Arc::clone(&line_length_errors),
        worker_count,
    );

    let walk_ctx = walk::WalkContext {
        config: Arc::clone(&config),
        dir_tx: dir_tx.clone(),
        file_tx: file_tx.clone(),
        pending: Arc::clone(&pending),
        gitignore_cache: Arc::new(GitignoreCache::new()),
    };
    let recursion_workers = worker_count.min(MAX_DIR_RECURSION_WORKERS);
    let dir_workers = walk::spawn_dir_workers(walk_ctx, dir_rx, recursion_workers);

    let mut net_workers = Vec::new();
    for target in targets {
        if target == "-" {
            file_tx
                .send("-".to_string())
                .map_err(|_| anyhow!("file queue closed"))?;
        } else if reader::net_target(target).is_some() {
            net_workers.push(workers::spawn_network_target(
                Arc::clone(&config),
                target.clone(),
                results_tx.clone(),
            ));
        } else if fs::metadata(target).map(|m| m.is_dir()).unwrap_or(false) {
            pending.add(1);
            dir_tx
                .send(DirMessage::Dir(PathBuf::from(target)))
                .map_err(|_| anyhow!("directory queue closed"))?;
        } else {
            file_tx
                .send(target.clone())
                .map_err(|_| anyhow!("file queue closed"))?;
        }
    }

    // Ordered shutdown; see the module docs.
    pending.wait();
    for _ in 0..recursion_workers {
        let _ = dir_tx.send(DirMessage::Shutdown);
    }
    drop(dir_tx);
    for handle in dir_workers {
        let _ = handle.join();
    }
    drop(file_tx);
    for handle in file_workers {
        let _ = handle.join();
    }
    for handle in net_workers {
        let _ = handle.join();
    }
    drop(results_tx);

    let mut totals = handler
        .join()
        .map_err(|_| anyhow!("result handler panicked"))?;
    totals.line_length_errors = line_length_errors.load(Ordering::Relaxed);
    Ok(totals)
}
