//! The streaming read loop.
//!
//! A [`Scanner`] owns two reusable buffers (the input block and, for
//! case-insensitive runs, the lowercase shadow) and drives one target at
//! a time: fill the block, derive the valid match range, extract and
//! deduplicate matches, account line numbers, and hand results off -
//! batched or streaming - to the results channel.

use crossbeam_channel::{bounded, Sender};
use memchr::{memchr, memchr_iter, memrchr};
use regex::bytes::Regex;
use std::io::{self, Read};

use super::extract::{collect_matches, BlockScan};
use super::types::{Match, ScanError, SearchResult};
use super::{bytes_to_lower, INPUT_MULTILINE_WINDOW, MATCH_CHANNEL_BATCHES};
use crate::options::SearchConfig;

/// Position of the most recently accepted match; persists across blocks
/// so a match re-emitted from the multiline overlap window (or another
/// pattern hitting an already-reported line) is absorbed as a duplicate.
#[derive(Debug, Clone, Copy)]
struct MatchCursor {
    end: u64,
    line_end: u64,
}

/// Reusable per-worker scan state.
pub struct Scanner {
    data: Vec<u8>,
    fold: Vec<u8>,
}

impl Scanner {
    /// Create a scanner with the given block size. The pipeline uses the
    /// configured `input_block_size`; tests may use smaller blocks to
    /// exercise boundary handling cheaply.
    pub fn new(block_size: usize) -> Self {
        Self {
            data: vec![0; block_size],
            fold: vec![0; block_size],
        }
    }

    /// Scan one target. Emits exactly one [`SearchResult`] on
    /// `results_tx` (plus streaming batches on its follow-up channel),
    /// except when binary-skip fires, which terminates the target with
    /// no result at all.
    pub fn scan(
        &mut self,
        reader: &mut dyn Read,
        regexes: &[Regex],
        target: &str,
        config: &SearchConfig,
        results_tx: &Sender<SearchResult>,
    ) -> Result<(), ScanError> {
        let opts = &config.opts;
        let block_size = self.data.len();
        let multiline = opts.multiline;

        let mut buffer_offset: usize = 0;
        let mut is_eof = false;
        let mut last_block_len: usize = 0;
        let mut last_window_round = false;
        let mut cursor: Option<MatchCursor> = None;
        let mut line_count: u64 = 1;
        let mut match_count: u64 = 0;
        let mut offset: u64 = 0;
        let mut is_binary = false;
        let mut matches: Vec<Match> = Vec::with_capacity(16);
        let mut condition_matches: Vec<Match> = Vec::with_capacity(16);
        let mut match_tx: Option<Sender<Vec<Match>>> = None;

        while !is_eof {
            let first_new_condition = condition_matches.len();

            let length;
            let mut valid;
            if multiline {
                if last_window_round {
                    // The tail of the previous block is processed again
                    // so matches straddling the boundary are found whole.
                    self.data.copy_within(
                        last_block_len - INPUT_MULTILINE_WINDOW..last_block_len,
                        buffer_offset,
                    );
                    let read_at = buffer_offset + INPUT_MULTILINE_WINDOW;
                    let n = read_retry(reader, &mut self.data[read_at..])?;
                    if n == 0 && read_at < block_size {
                        is_eof = true;
                    }
                    length = read_at + n;
                } else {
                    let n = read_retry(reader, &mut self.data[buffer_offset..])?;
                    if n == 0 && buffer_offset < block_size {
                        is_eof = true;
                    }
                    length = buffer_offset + n;
                }
                last_block_len = length;

                // Matches starting inside the window are deferred to the
                // next iteration, which re-scans that region.
                if !is_eof && length > INPUT_MULTILINE_WINDOW {
                    valid = length - INPUT_MULTILINE_WINDOW;
                    last_window_round = true;
                } else {
                    valid = length;
                    last_window_round = false;
                }
            } else {
                let n = read_retry(reader, &mut self.data[buffer_offset..])?;
                if n == 0 && buffer_offset < block_size {
                    is_eof = true;
                }
                length = buffer_offset + n;
                valid = length;
                last_block_len = length;
            }
            let pre_valid = valid;

            // Binary check on the first block only.
            if offset == 0 {
                let probe = length.min(256);
                if memchr(0, &self.data[..probe]).is_some() {
                    is_binary = true;
                    if opts.binary_skip {
                        return Ok(());
                    }
                }
            }

            // Round the valid range down to the last newline so no
            // partial line is matched mid-stream.
            let mut last_seek = 0usize;
            if !is_eof {
                match memrchr(b'\n', &self.data[..valid]) {
                    Some(pos) => {
                        last_seek = valid - 1 - pos;
                        valid -= last_seek;
                        buffer_offset = 0;
                    }
                    None => {
                        if last_block_len == block_size {
                            return Err(ScanError::LineTooLong(block_size));
                        }
                        buffer_offset = valid;
                        continue;
                    }
                }
            }

            if opts.ignore_case {
                bytes_to_lower(&self.data[..length], &mut self.fold[..length]);
            }
            let data_slice = &self.data[..length];
            let test_slice: &[u8] = if opts.ignore_case {
                &self.fold[..length]
            } else {
                data_slice
            };

            let block = BlockScan {
                data: data_slice,
                test: test_slice,
                offset,
                length,
                valid_match_range: valid,
            };

            let mut new_matches: Vec<Match> = Vec::new();
            for regex in regexes {
                new_matches.extend(collect_matches(regex, &block, None, target, config));
            }
            if !new_matches.is_empty() {
                dedup_matches(&mut new_matches, &mut cursor, multiline);
            }

            for (id, condition) in config.conditions.iter().enumerate() {
                let found = collect_matches(&condition.regex, &block, Some(id), target, config);
                condition_matches.extend(found);
            }
            if !condition_matches.is_empty() {
                condition_matches.sort_by_key(|m| m.start);
            }

            if config.needs_line_numbers {
                line_count = count_lines(
                    data_slice,
                    first_new_condition,
                    &mut new_matches,
                    &mut condition_matches,
                    offset,
                    valid,
                    line_count,
                );
            } else {
                line_count += memchr_iter(b'\n', &data_slice[..valid]).count() as u64;
            }

            if !new_matches.is_empty() {
                match_count += new_matches.len() as u64;
                if let Some(tx) = &match_tx {
                    let _ = tx.send(new_matches);
                } else {
                    matches.append(&mut new_matches);
                    if matches.len() > config.streaming_threshold && config.streaming_allowed {
                        let (tx, rx) = bounded(MATCH_CHANNEL_BATCHES);
                        let _ = results_tx.send(SearchResult {
                            target: target.to_string(),
                            matches: std::mem::take(&mut matches),
                            condition_matches: Vec::new(),
                            streaming: true,
                            match_rx: Some(rx),
                            is_binary,
                        });
                        match_tx = Some(tx);
                    }
                }
                if opts.limit != 0 && match_count >= opts.limit {
                    break;
                }
            }

            // Carry the bytes after the last newline to the buffer head.
            if last_seek > 0 {
                self.data
                    .copy_within(pre_valid - last_seek..pre_valid, buffer_offset);
                buffer_offset += last_seek;
            }
            offset += valid as u64;
        }

        if match_tx.is_none() {
            let _ = results_tx.send(SearchResult {
                target: target.to_string(),
                matches,
                condition_matches,
                streaming: false,
                match_rx: None,
                is_binary,
            });
        }
        // Dropping `match_tx` closes the streaming channel.
        Ok(())
    }
}

fn read_retry(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Sort candidates by start offset and compact away duplicates.
///
/// Walking in offset order, a candidate is kept when it reports a
/// strictly new line (single-line mode) or does not overlap the previous
/// accepted match (multiline mode). The cursor carries over between
/// blocks to absorb cross-block re-emissions.
fn dedup_matches(new_matches: &mut Vec<Match>, cursor: &mut Option<MatchCursor>, multiline: bool) {
    new_matches.sort_by_key(|m| m.start);
    let mut kept = 0;
    for i in 0..new_matches.len() {
        let accept = match *cursor {
            None => true,
            Some(c) => {
                if multiline {
                    new_matches[i].start >= c.end
                } else {
                    new_matches[i].line_end > c.line_end
                }
            }
        };
        if accept {
            *cursor = Some(MatchCursor {
                end: new_matches[i].end,
                line_end: new_matches[i].line_end,
            });
            new_matches.swap(kept, i);
            kept += 1;
        }
    }
    new_matches.truncate(kept);
}

/// Count newlines within the valid range and assign line numbers to the
/// pending matches in a single traversal.
fn count_lines(
    data: &[u8],
    first_new_condition: usize,
    matches: &mut [Match],
    condition_matches: &mut [Match],
    offset: u64,
    valid_match_range: usize,
    mut line_count: u64,
) -> u64 {
    let mut current = 0;
    let mut current_condition = first_new_condition;
    if current < matches.len() || current_condition < condition_matches.len() {
        for pos in memchr_iter(b'\n', &data[..valid_match_range]) {
            let absolute = offset + pos as u64;
            while current < matches.len() && absolute >= matches[current].line_start {
                matches[current].line_no = line_count;
                current += 1;
            }
            while current_condition < condition_matches.len()
                && absolute >= condition_matches[current_condition].line_start
            {
                condition_matches[current_condition].line_no = line_count;
                current_condition += 1;
            }
            line_count += 1;
        }
        // Matches on a final line without a terminating newline.
        let boundary = offset + valid_match_range as u64;
        while current < matches.len() && boundary >= matches[current].line_start {
            matches[current].line_no = line_count;
            current += 1;
        }
        while current_condition < condition_matches.len()
            && boundary >= condition_matches[current_condition].line_start
        {
            condition_matches[current_condition].line_no = line_count;
            current_condition += 1;
        }
    } else {
        line_count += memchr_iter(b'\n', &data[..valid_match_range]).count() as u64;
    }
    line_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Options, SearchConfig};
    use std::io::Cursor;

    fn config_with(f: impl FnOnce(&mut Options), patterns: &[&str]) -> SearchConfig {
        let mut opts = Options::default();
        opts.show_line_numbers = true;
        f(&mut opts);
        opts.apply(
            patterns.iter().map(|p| p.to_string()).collect(),
            &[".".to_string()],
        )
        .unwrap()
    }

    /// Run a scan over an in-memory input, draining streaming batches as
    /// they arrive, and return every delivered result with its matches
    /// fully materialized.
    fn run_scan(config: &SearchConfig, block_size: usize, input: &[u8]) -> Vec<SearchResult> {
        let (tx, rx) = bounded::<SearchResult>(64);
        let mut collected = Vec::new();
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut scanner = Scanner::new(block_size);
                let mut reader = Cursor::new(input);
                scanner
                    .scan(&mut reader, &config.regexes, "mem", config, &tx)
                    .unwrap();
                drop(tx);
            });
            for mut result in rx.iter() {
                if let Some(match_rx) = result.match_rx.take() {
                    for batch in match_rx.iter() {
                        result.matches.extend(batch);
                    }
                }
                collected.push(result);
            }
        });
        collected
    }

    fn scan_matches(config: &SearchConfig, block_size: usize, input: &[u8]) -> Vec<Match> {
        let mut results = run_scan(config, block_size, input);
        assert_eq!(results.len(), 1);
        std::mem::take(&mut results[0].matches)
    }

    #[test]
    fn test_two_matches_with_line_numbers() {
        let config = config_with(|_| {}, &["foo"]);
        let matches = scan_matches(&config, 4096, b"foo\nbar\nfoo\n");
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line_no, 1);
        assert_eq!(matches[1].line_no, 3);
        assert!(matches.iter().all(|m| m.match_text == "foo"));
    }

    #[test]
    fn test_ignore_case_reports_original_bytes() {
        let config = config_with(|o| o.ignore_case = true, &["def"]);
        let matches = scan_matches(&config, 4096, b"abc\nDEF\nabc\n");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line_no, 2);
        assert_eq!(matches[0].match_text, "DEF");
    }

    #[test]
    fn test_multiline_spanning_match() {
        let config = config_with(|o| o.multiline = true, &["a.*c"]);
        let matches = scan_matches(&config, 4096, b"aaa\nbbb\nccc\n");
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!((m.start, m.end), (0, 11));
        assert_eq!(m.line_no, 1);
        assert_eq!(m.line_text, "aaa\nbbb\nccc");
    }

    #[test]
    fn test_no_trailing_newline() {
        let config = config_with(|_| {}, &["tail"]);
        let matches = scan_matches(&config, 4096, b"head\ntail");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line_no, 2);
        assert_eq!(matches[0].line_text, "tail");
        assert_eq!(matches[0].line_end, 9);
    }

    #[test]
    fn test_empty_input_yields_empty_result() {
        let config = config_with(|_| {}, &["x"]);
        let results = run_scan(&config, 4096, b"");
        assert_eq!(results.len(), 1);
        assert!(results[0].matches.is_empty());
        assert!(!results[0].is_binary);
    }

    #[test]
    fn test_same_line_matches_of_two_patterns_deduplicate() {
        let config = config_with(|_| {}, &["foo", "bar"]);
        let matches = scan_matches(&config, 4096, b"foo bar\nplain\nbar foo\n");
        // One match per line; the earliest offset wins.
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].match_text, "foo");
        assert_eq!(matches[0].line_no, 1);
        assert_eq!(matches[1].match_text, "bar");
        assert_eq!(matches[1].line_no, 3);
    }

    #[test]
    fn test_line_too_long_without_newline() {
        let config = config_with(|_| {}, &["x"]);
        let (tx, _rx) = bounded::<SearchResult>(64);
        let mut scanner = Scanner::new(64);
        let input = vec![b'a'; 200];
        let mut reader = Cursor::new(&input[..]);
        let err = scanner
            .scan(&mut reader, &config.regexes, "mem", &config, &tx)
            .unwrap_err();
        assert!(matches!(err, ScanError::LineTooLong(64)));
    }

    #[test]
    fn test_long_final_line_without_newline_is_fine() {
        // The last line may exceed the remaining buffer only if EOF
        // arrives before the block fills; 50 < 64 here, so it must pass.
        let config = config_with(|_| {}, &["a+"]);
        let mut input = b"short\n".to_vec();
        input.extend(vec![b'a'; 50]);
        let matches = scan_matches(&config, 64, &input);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].line_no, 2);
    }

    #[test]
    fn test_binary_detection_and_skip() {
        let mut input = b"text\x00more\n".to_vec();
        input.extend_from_slice(b"needle\n");

        let config = config_with(|_| {}, &["needle"]);
        let results = run_scan(&config, 4096, &input);
        assert_eq!(results.len(), 1);
        assert!(results[0].is_binary);
        assert_eq!(results[0].matches.len(), 1);

        // With binary-skip the target terminates with no result at all.
        let config = config_with(|o| o.binary_skip = true, &["needle"]);
        let results = run_scan(&config, 4096, &input);
        assert!(results.is_empty());
    }

    #[test]
    fn test_limit_stops_reading_early() {
        let config = config_with(|o| o.limit = 1, &["hit"]);
        let one_line = b"hit here\n";
        let input: Vec<u8> = one_line.iter().cycle().take(one_line.len() * 1000).copied().collect();
        let matches = scan_matches(&config, 256, &input);
        // The engine stops at block granularity: at least the limit, far
        // fewer than the thousand available.
        assert!(!matches.is_empty());
        assert!(matches.len() < 100);
    }

    #[test]
    fn test_streaming_handoff_delivers_in_order_and_closes() {
        let mut config = config_with(|_| {}, &["row"]);
        config.streaming_allowed = true;
        config.streaming_threshold = 0;

        let input: Vec<u8> = (0..2000)
            .flat_map(|i| format!("row {}\n", i).into_bytes())
            .collect();

        // run_scan drains the follow-up channel until it closes; exactly
        // one streaming result must carry all batches, in order.
        let results = run_scan(&config, 512, &input);
        assert_eq!(results.len(), 1);
        assert!(results[0].streaming);
        let all = &results[0].matches;
        assert_eq!(all.len(), 2000);
        for window in all.windows(2) {
            assert!(window[0].start < window[1].start, "in-order delivery");
        }
    }

    /// Reading in small blocks must produce exactly the same match
    /// sequence as reading the whole input in one block.
    #[test]
    fn test_block_boundaries_do_not_change_matches() {
        let config = config_with(|_| {}, &["needle"]);
        let mut input = Vec::new();
        for i in 0..5000 {
            if i % 61 == 0 {
                input.extend_from_slice(format!("a needle in line {}\n", i).as_bytes());
            } else {
                input.extend_from_slice(format!("filler line number {}\n", i).as_bytes());
            }
        }

        let reference = scan_matches(&config, input.len() + 1, &input);
        assert_eq!(reference.len(), 82);
        for block_size in [512, 1024, 4099, 65536] {
            let got = scan_matches(&config, block_size, &input);
            assert_eq!(got.len(), reference.len(), "block size {}", block_size);
            for (a, b) in reference.iter().zip(got.iter()) {
                assert_eq!(a.start, b.start, "block size {}", block_size);
                assert_eq!(a.end, b.end);
                assert_eq!(a.line_no, b.line_no);
                assert_eq!(a.line_text, b.line_text);
            }
        }

        // Line numbering invariant: line_no is 1 + newlines before the line.
        for m in &reference {
            let newlines = memchr_iter(b'\n', &input[..m.line_start as usize]).count() as u64;
            assert_eq!(m.line_no, newlines + 1);
        }
    }

    /// Multiline variant: matches deferred past the overlap window must
    /// be re-emitted exactly once on the next iteration.
    #[test]
    fn test_multiline_overlap_window_dedup() {
        let config = config_with(|o| o.multiline = true, &[r"begin-\d+.end"]);
        let mut input = Vec::new();
        for i in 0..4000 {
            // Pairs of lines forming a two-line match every 40 lines.
            if i % 40 == 0 {
                input.extend_from_slice(format!("begin-{}\nend of pair {}\n", i, i).as_bytes());
            } else {
                input.extend_from_slice(format!("padding text line {}\n", i).as_bytes());
            }
        }

        let reference = scan_matches(&config, input.len() + INPUT_MULTILINE_WINDOW, &input);
        assert_eq!(reference.len(), 100);

        // A block barely larger than the window forces constant deferral.
        let got = scan_matches(&config, INPUT_MULTILINE_WINDOW + 8192, &input);
        assert_eq!(got.len(), reference.len());
        for (a, b) in reference.iter().zip(got.iter()) {
            assert_eq!(a.start, b.start);
            assert_eq!(a.end, b.end);
            assert_eq!(a.line_no, b.line_no);
        }
    }

    #[test]
    fn test_condition_matches_are_collected_and_numbered() {
        let config = config_with(
            |o| o.preceded_by = vec!["open".to_string()],
            &["close"],
        );
        let results = run_scan(&config, 4096, b"open\nmiddle\nclose\n");
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.condition_matches.len(), 1);
        assert_eq!(result.condition_matches[0].condition_id, Some(0));
        assert_eq!(result.condition_matches[0].line_no, 1);
        assert_eq!(result.matches[0].line_no, 3);
    }

    #[test]
    fn test_dedup_cursor_multiline_overlap_rule() {
        let mk = |start: u64, end: u64| Match {
            start,
            end,
            line_start: start,
            line_end: end,
            ..Match::default()
        };
        let mut cursor = None;
        let mut batch = vec![mk(10, 20), mk(15, 25), mk(20, 30)];
        dedup_matches(&mut batch, &mut cursor, true);
        let spans: Vec<(u64, u64)> = batch.iter().map(|m| (m.start, m.end)).collect();
        assert_eq!(spans, vec![(10, 20), (20, 30)]);

        // The cursor persists: a duplicate of the last match in the next
        // batch is absorbed.
        let mut next = vec![mk(20, 30), mk(40, 50)];
        dedup_matches(&mut next, &mut cursor, true);
        let spans: Vec<(u64, u64)> = next.iter().map(|m| (m.start, m.end)).collect();
        assert_eq!(spans, vec![(40, 50)]);
    }
}
