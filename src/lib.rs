//! # SGREP - Streaming Regex Search
//!
//! SGREP is a high-throughput recursive search tool built around a
//! streaming match engine: it searches arbitrarily large inputs in
//! fixed-size blocks, in both single-line and multiline modes, without
//! ever materializing a whole file in memory. Matches can additionally
//! be filtered by *conditions* - auxiliary patterns that must appear
//! before, after or around a match, or at fixed file positions.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`engine`] - The streaming match engine (block reader, match
//!   extraction, line accounting, streaming handoff)
//! - [`conditions`] - The condition table and the per-result evaluator
//! - [`pipeline`] - Parallel target processing (directory recursion,
//!   file workers, result handling)
//! - [`gitignore`] - A cached `.gitignore` matcher used during recursion
//! - [`options`] - Option loading, validation and pattern preparation
//! - [`output`] - Result rendering (ripgrep-style, colorized)
//!
//! ## Quick Start
//!
//! ```ignore
//! use sgrep::options::Options;
//! use std::sync::Arc;
//!
//! let mut options = Options::default();
//! options.show_line_numbers = true;
//! let config = options.apply(vec!["foo".to_string()], &[".".to_string()])?;
//! let totals = sgrep::pipeline::execute_search(Arc::new(config), &[".".to_string()])?;
//! println!("{} matches", totals.matches);
//! ```
//!
//! ## Data flow
//!
//! The driver enqueues targets; directory workers recurse in parallel and
//! feed a bounded file queue; file workers run the engine over each
//! target and push [`engine::SearchResult`]s onto a bounded results
//! channel; a single handler applies conditions and renders. Within a
//! target, matches are emitted in strictly ascending offset order and
//! never duplicated; across targets no order is guaranteed.

pub mod conditions;
pub mod engine;
pub mod gitignore;
pub mod options;
pub mod output;
pub mod pipeline;
