//! Inverted matching.
//!
//! A separate, line-oriented path: every line on which *no* primary
//! pattern matches becomes a match. Option support is deliberately
//! limited; multiline, context and network targets are rejected at
//! option-apply time.

use crossbeam_channel::Sender;
use regex::bytes::Regex;
use std::io::{BufRead, BufReader, Read};

use super::types::{Match, ScanError, SearchResult};

pub fn scan_inverted(
    reader: &mut dyn Read,
    regexes: &[Regex],
    target: &str,
    results_tx: &Sender<SearchResult>,
) -> Result<(), ScanError> {
    let mut reader = BufReader::new(reader);
    let mut matches: Vec<Match> = Vec::with_capacity(16);
    let mut line_no: u64 = 0;
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_no += 1;
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if !regexes.iter().any(|re| re.is_match(&line)) {
            matches.push(Match {
                line_no,
                line_text: String::from_utf8_lossy(&line).into_owned(),
                ..Match::default()
            });
        }
    }

    let _ = results_tx.send(SearchResult {
        target: target.to_string(),
        matches,
        condition_matches: Vec::new(),
        streaming: false,
        match_rx: None,
        is_binary: false,
    });
    Ok(())
}
