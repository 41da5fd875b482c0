//! File and network target workers.
//!
//! Each file worker owns its reusable scan buffers and its own clone of
//! the compiled regex set, then drains the file queue until it closes.
//! Network targets get a dedicated thread each: bind, accept one
//! connection, scan until the peer closes.

use crossbeam_channel::{Receiver, Sender};
use log::error;
use regex::bytes::Regex;
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::engine::{invert, reader, ChunkedReader, ScanError, Scanner, SearchResult};
use crate::options::SearchConfig;

pub fn spawn_file_workers(
    config: Arc<SearchConfig>,
    file_rx: Receiver<String>,
    results_tx: Sender<SearchResult>,
    line_length_errors: Arc<AtomicU64>,
    count: usize,
) -> Vec<JoinHandle<()>> {
    (0..count)
        .map(|_| {
            let config = Arc::clone(&config);
            let file_rx = file_rx.clone();
            let results_tx = results_tx.clone();
            let line_length_errors = Arc::clone(&line_length_errors);
            thread::spawn(move || {
                let regexes: Vec<Regex> = config.regexes.clone();
                let mut scanner = Scanner::new(config.opts.input_block_size);
                while let Ok(target) = file_rx.recv() {
                    process_file_target(
                        &config,
                        &mut scanner,
                        &regexes,
                        &target,
                        &results_tx,
                        &line_length_errors,
                    );
                }
            })
        })
        .collect()
}

fn process_file_target(
    config: &SearchConfig,
    scanner: &mut Scanner,
    regexes: &[Regex],
    target: &str,
    results_tx: &Sender<SearchResult>,
    line_length_errors: &AtomicU64,
) {
    let mut source: Box<dyn Read> = if target == "-" {
        if config.opts.multiline {
            Box::new(ChunkedReader::new(io::stdin()))
        } else {
            Box::new(io::stdin())
        }
    } else {
        match reader::open_target(target) {
            Ok(file) => Box::new(file),
            Err(err) => {
                error!("{}", err);
                return;
            }
        }
    };

    let outcome = if config.opts.invert_match {
        invert::scan_inverted(&mut *source, regexes, target, results_tx)
    } else {
        scanner.scan(&mut *source, regexes, target, config, results_tx)
    };

    match outcome {
        Ok(()) => {}
        Err(ScanError::LineTooLong(block_size)) => {
            line_length_errors.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "cannot process data from '{}': contains very long lines (>= {} bytes); see the block-size option",
                target,
                block_size
            );
        }
        Err(err) => error!("cannot process data from '{}': {}", target, err),
    }
}

/// Bind a listener for a `tcp://` target, accept one connection and scan
/// it on a dedicated thread. Failures skip the target.
pub fn spawn_network_target(
    config: Arc<SearchConfig>,
    target: String,
    results_tx: Sender<SearchResult>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let (proto, addr) = match reader::net_target(&target) {
            Some((proto, addr)) => (proto.to_string(), addr.to_string()),
            None => return,
        };
        let stream = match reader::accept_network_target(&target, &proto, &addr) {
            Ok(stream) => stream,
            Err(err) => {
                error!("{}", err);
                return;
            }
        };

        let mut source: Box<dyn Read> = if config.opts.multiline {
            Box::new(ChunkedReader::new(stream))
        } else {
            Box::new(stream)
        };
        let regexes: Vec<Regex> = config.regexes.clone();
        let mut scanner = Scanner::new(config.opts.input_block_size);
        if let Err(err) = scanner.scan(&mut *source, &regexes, &target, &config, &results_tx) {
            error!("error processing data from '{}': {}", target, err);
        }
    })
}
