//! The single result handler.
//!
//! Consumes the results channel serially, applies the condition
//! evaluator to each result and hands it to the renderer. Because only
//! this thread touches the run totals, they need no synchronisation.

use crossbeam_channel::Receiver;
use log::error;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::SearchTotals;
use crate::conditions::apply_conditions;
use crate::engine::SearchResult;
use crate::options::SearchConfig;
use crate::output::Printer;

pub fn spawn_result_handler(
    config: Arc<SearchConfig>,
    results_rx: Receiver<SearchResult>,
) -> JoinHandle<SearchTotals> {
    thread::spawn(move || {
        let printer = Printer::new(Arc::clone(&config));
        run_result_handler(config, results_rx, printer)
    })
}

/// Drain the results channel to completion. Render failures (say, a
/// closed pipe) stop the rendering but never the draining: producers
/// must not block on a full channel behind a dead consumer.
pub fn run_result_handler(
    config: Arc<SearchConfig>,
    results_rx: Receiver<SearchResult>,
    mut printer: Printer,
) -> SearchTotals {
    let mut totals = SearchTotals::default();
    let mut sink_broken = false;

    for mut result in results_rx.iter() {
        totals.targets += 1;
        apply_conditions(&mut result, &config.conditions);
        if sink_broken {
            drain_streaming(&mut result);
            continue;
        }
        if let Err(err) = printer.print_result(&mut result, &mut totals) {
            error!("cannot write to output: {}", err);
            sink_broken = true;
            drain_streaming(&mut result);
        }
    }
    totals
}

/// Unclog a streaming result whose batches will never be rendered.
fn drain_streaming(result: &mut SearchResult) {
    if let Some(match_rx) = result.match_rx.take() {
        for _ in match_rx.iter() {}
    }
}
