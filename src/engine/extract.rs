//! Per-block match extraction.
//!
//! Finds all hits of one pattern within the current input block and
//! expands them into full [`Match`] records. Single-line mode needs a
//! correction pass: `\s` in a pattern matches `\n`, so a raw regex match
//! may straddle lines; such candidates are trimmed, re-verified and, if
//! still spanning lines, split back into per-line hits.

use memchr::{memchr, memrchr};
use regex::bytes::Regex;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use super::types::Match;
use crate::options::SearchConfig;

/// One block of input under scan.
pub struct BlockScan<'a> {
    /// Original bytes of the block.
    pub data: &'a [u8],
    /// Bytes the patterns are tested against: the case-folded shadow
    /// buffer when ignore-case is active, otherwise `data` itself.
    pub test: &'a [u8],
    /// Absolute offset of the block's first byte within the target.
    pub offset: u64,
    /// Number of valid bytes in the block.
    pub length: usize,
    /// Prefix within which matches are admitted on this iteration.
    pub valid_match_range: usize,
}

/// Collect all matches of `regex` within the block. Used for primary and
/// condition patterns alike; `condition_id` tags the latter.
pub fn collect_matches(
    regex: &Regex,
    block: &BlockScan,
    condition_id: Option<usize>,
    target: &str,
    config: &SearchConfig,
) -> Vec<Match> {
    let opts = &config.opts;
    let data = block.data;
    let test = block.test;
    let length = block.length;
    let mut matches = Vec::new();

    // Work queue of candidate ranges. The single-line correction below
    // may requeue per-line candidates discovered inside a straddling
    // match; they are processed by this same pass.
    let mut candidates: Vec<(usize, usize)> = regex
        .find_iter(test)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut i = 0;
    while i < candidates.len() {
        let (mut start, mut end) = candidates[i];
        i += 1;

        if !opts.multiline {
            // Trim newlines the pattern swallowed at either end.
            while start < length && end > start && data[start] == b'\n' {
                start += 1;
            }
            while end > 0 && end > start && data[end - 1] == b'\n' {
                end -= 1;
            }
            // The trimmed range must still match on its own.
            if !regex.is_match(&test[start..end]) {
                continue;
            }
            // A match still spanning lines cannot be reported in
            // single-line mode. Rebuild the complete lines it touches and
            // re-match each line independently; inner hits join the queue.
            if memchr(b'\n', &data[start..end]).is_some() {
                let mut line_start = start;
                let mut line_end = end;
                while line_start > 0 && data[line_start - 1] != b'\n' {
                    line_start -= 1;
                }
                while line_end < length && data[line_end] != b'\n' {
                    line_end += 1;
                }

                let mut last_start = line_start;
                let mut pos = last_start + 1;
                while pos < line_end {
                    if data[pos] == b'\n' || pos == line_end - 1 {
                        let mut upto = pos;
                        if pos == line_end - 1 && data[pos] != b'\n' {
                            upto = pos + 1;
                            pos += 1;
                        }
                        if let Some(m) = regex.find(&test[last_start..upto]) {
                            candidates.push((last_start + m.start(), last_start + m.end()));
                        }
                        last_start = pos + 1;
                    }
                    pos += 1;
                }
                continue;
            }
        }

        // Matches beyond the valid range re-appear in the next block's
        // overlap window and are emitted there.
        if opts.multiline && start >= block.valid_match_range {
            continue;
        }

        let line_start = memrchr(b'\n', &data[..start]).map(|p| p + 1).unwrap_or(0);
        let line_end = memchr(b'\n', &data[end..length])
            .map(|p| end + p)
            .unwrap_or(length);

        let context_before = if opts.context_before > 0 {
            capture_context_before(block, line_start, start, target, config)
        } else {
            None
        };
        let context_after = if opts.context_after > 0 {
            capture_context_after(block, line_end, end, target, config)
        } else {
            None
        };

        // A zero-width `^` match right after the block's last newline
        // belongs to a line this iteration does not own.
        if line_start != block.valid_match_range {
            matches.push(Match {
                condition_id,
                start: block.offset + start as u64,
                end: block.offset + end as u64,
                line_start: block.offset + line_start as u64,
                line_end: block.offset + line_end as u64,
                match_text: String::from_utf8_lossy(&data[start..end]).into_owned(),
                line_text: String::from_utf8_lossy(&data[line_start..line_end]).into_owned(),
                line_no: 0,
                context_before,
                context_after,
            });
        }
    }

    matches
}

/// Context lines before the match, from the block when it holds enough
/// preceding newlines, otherwise re-read from the file.
fn capture_context_before(
    block: &BlockScan,
    line_start: usize,
    start: usize,
    target: &str,
    config: &SearchConfig,
) -> Option<String> {
    let data = block.data;
    let wanted = config.opts.context_before;

    if line_start > 0 {
        let mut ctx_start = line_start - 1;
        let mut preceding = 0;
        while ctx_start > 0 {
            if data[ctx_start - 1] == b'\n' {
                preceding += 1;
                if preceding == wanted {
                    break;
                }
            }
            ctx_start -= 1;
        }
        if preceding < wanted && ctx_start == 0 && block.offset > 0 {
            before_context_from_file(target, block.offset, start, config)
        } else {
            Some(String::from_utf8_lossy(&data[ctx_start..line_start - 1]).into_owned())
        }
    } else if block.offset > 0 {
        before_context_from_file(target, block.offset, start, config)
    } else {
        None
    }
}

/// Context lines after the match, from the block when it holds enough
/// following newlines, otherwise re-read from the file.
fn capture_context_after(
    block: &BlockScan,
    line_end: usize,
    end: usize,
    target: &str,
    config: &SearchConfig,
) -> Option<String> {
    let data = block.data;
    let length = block.length;
    let wanted = config.opts.context_after;

    if line_end + 1 < length {
        let mut ctx_end = line_end;
        let mut following = 0;
        while ctx_end < length - 1 {
            if data[ctx_end + 1] == b'\n' {
                following += 1;
                if following == wanted {
                    ctx_end += 1;
                    break;
                }
            }
            ctx_end += 1;
        }
        if following < wanted && ctx_end == length - 1 {
            after_context_from_file(target, block.offset, end, config)
        } else {
            Some(String::from_utf8_lossy(&data[line_end + 1..ctx_end]).into_owned())
        }
    } else {
        after_context_from_file(target, block.offset, end, config)
    }
}

/// Re-read the file to recover context that scrolled out of the buffer.
/// Only reachable for seekable targets; pipe and network targets reject
/// context options at apply time.
fn before_context_from_file(
    target: &str,
    offset: u64,
    start: usize,
    config: &SearchConfig,
) -> Option<String> {
    let block_size = config.opts.input_block_size as u64;
    let absolute_start = offset + start as u64;
    let seek_position = absolute_start.saturating_sub(block_size);
    let count = if offset == 0 && (start as u64) < block_size {
        start as u64
    } else {
        block_size
    };

    let mut file = File::open(target).ok()?;
    file.seek(SeekFrom::Start(seek_position)).ok()?;
    let mut buffer = Vec::with_capacity(count as usize);
    file.take(count).read_to_end(&mut buffer).ok()?;

    // The buffer ends exactly at the match start; back up to the start
    // of the match's line, then the requested number of lines further.
    let mut line_start = buffer.len();
    while line_start > 0 && buffer[line_start - 1] != b'\n' {
        line_start -= 1;
    }
    if line_start == 0 {
        return None;
    }
    let mut ctx_start = line_start - 1;
    let mut preceding = 0;
    while ctx_start > 0 {
        if buffer[ctx_start - 1] == b'\n' {
            preceding += 1;
            if preceding == config.opts.context_before {
                break;
            }
        }
        ctx_start -= 1;
    }
    Some(String::from_utf8_lossy(&buffer[ctx_start..line_start - 1]).into_owned())
}

fn after_context_from_file(
    target: &str,
    offset: u64,
    end: usize,
    config: &SearchConfig,
) -> Option<String> {
    let block_size = config.opts.input_block_size;

    let mut file = File::open(target).ok()?;
    file.seek(SeekFrom::Start(offset + end as u64)).ok()?;
    let mut buffer = Vec::with_capacity(block_size);
    file.take(block_size as u64).read_to_end(&mut buffer).ok()?;
    let length = buffer.len();

    let line_end = memchr(b'\n', &buffer).unwrap_or(length);
    if line_end + 1 >= length {
        return None;
    }
    let mut ctx_end = line_end;
    let mut following = 0;
    while ctx_end < length - 1 {
        if buffer[ctx_end + 1] == b'\n' {
            following += 1;
            if following == config.opts.context_after {
                ctx_end += 1;
                break;
            }
        }
        ctx_end += 1;
    }
    if following < config.opts.context_after && ctx_end == length - 1 && buffer[length - 1] != b'\n'
    {
        ctx_end += 1;
    }
    Some(String::from_utf8_lossy(&buffer[line_end + 1..ctx_end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn config_with(f: impl FnOnce(&mut Options), pattern: &str) -> SearchConfig {
        let mut opts = Options::default();
        f(&mut opts);
        opts.apply(vec![pattern.to_string()], &[".".to_string()])
            .unwrap()
    }

    fn block(data: &[u8]) -> BlockScan<'_> {
        BlockScan {
            data,
            test: data,
            offset: 0,
            length: data.len(),
            valid_match_range: data.len(),
        }
    }

    fn extract(config: &SearchConfig, data: &[u8]) -> Vec<Match> {
        collect_matches(&config.regexes[0], &block(data), None, "mem", config)
    }

    #[test]
    fn test_simple_match_expands_to_line() {
        let config = config_with(|_| {}, "bar");
        let matches = extract(&config, b"foo barbaz qux\nnext\n");
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!((m.start, m.end), (4, 7));
        assert_eq!((m.line_start, m.line_end), (0, 14));
        assert_eq!(m.match_text, "bar");
        assert_eq!(m.line_text, "foo barbaz qux");
    }

    #[test]
    fn test_whitespace_class_match_is_trimmed() {
        // `\s*` swallows the newline; the raw match "foo\n" is trimmed
        // back to "foo" and still verifies against the pattern.
        let config = config_with(|_| {}, r"foo\s*");
        let matches = extract(&config, b"xfoo\nbar\n");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].match_text, "foo");
        assert_eq!(matches[0].line_text, "xfoo");
    }

    #[test]
    fn test_trimmed_match_must_reverify() {
        // `foo\s` only exists because of the newline; once trimmed the
        // remainder no longer matches and the candidate is dropped.
        let config = config_with(|_| {}, r"foo\s");
        let matches = extract(&config, b"xfoo\nbar\n");
        assert!(matches.is_empty());
    }

    #[test]
    fn test_straddling_match_recovers_inner_line_match() {
        // The raw match "a\na" straddles the newline. Splitting the
        // enclosing region into lines re-discovers the real hit "a a"
        // on the second line, which the requeue must surface.
        let config = config_with(|_| {}, r"a\s+a");
        let matches = extract(&config, b"aa\na a\n");
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.match_text, "a a");
        assert_eq!((m.line_start, m.line_end), (3, 6));
    }

    #[test]
    fn test_straddling_match_without_inner_hit_is_dropped() {
        let config = config_with(|_| {}, r"foo\s+bar");
        let matches = extract(&config, b"foo\nbar\n");
        assert!(matches.is_empty());
    }

    #[test]
    fn test_multiline_match_spans_lines() {
        let config = config_with(|o| o.multiline = true, "a.*c");
        let matches = extract(&config, b"aaa\nbbb\nccc\n");
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!((m.start, m.end), (0, 11));
        assert_eq!(m.line_text, "aaa\nbbb\nccc");
        assert_eq!(m.match_text, "aaa\nbbb\nccc");
    }

    #[test]
    fn test_multiline_deferral_beyond_valid_range() {
        let config = config_with(|o| o.multiline = true, "bbb");
        let data = b"aaa\nbbb\n";
        let mut b = block(data);
        b.valid_match_range = 4;
        let matches = collect_matches(&config.regexes[0], &b, None, "mem", &config);
        assert!(matches.is_empty(), "match starting past the range defers");
    }

    #[test]
    fn test_anchored_match_at_range_boundary_dropped() {
        // `(?m)^` produces a zero-width-anchored match right after the
        // last newline; the line it starts belongs to the next block.
        let config = config_with(|_| {}, "^x*");
        let data = b"line\nx";
        let mut b = block(data);
        b.valid_match_range = 5;
        let matches = collect_matches(&config.regexes[0], &b, None, "mem", &config);
        assert!(matches.iter().all(|m| m.line_start != 5));
    }

    #[test]
    fn test_context_captured_from_block() {
        let config = config_with(
            |o| {
                o.context_before = 2;
                o.context_after = 1;
            },
            "needle",
        );
        let data = b"one\ntwo\nthree\nneedle here\nfive\nsix\n";
        let matches = extract(&config, data);
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(m.context_before.as_deref(), Some("two\nthree"));
        assert_eq!(m.context_after.as_deref(), Some("five"));
    }

    #[test]
    fn test_context_at_file_start() {
        let config = config_with(|o| o.context_before = 3, "first");
        let matches = extract(&config, b"first line\nsecond\n");
        assert_eq!(matches.len(), 1);
        // The match sits on the first line; there is nothing before it.
        assert!(matches[0].context_before.is_none());
    }

    #[test]
    fn test_condition_id_is_carried() {
        let config = config_with(|_| {}, "x");
        let matches = collect_matches(
            &config.regexes[0],
            &block(b"x marks\n"),
            Some(3),
            "mem",
            &config,
        );
        assert_eq!(matches[0].condition_id, Some(3));
    }
}
