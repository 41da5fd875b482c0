use crossbeam_channel::Receiver;
use thiserror::Error;

/// One located hit of a pattern within a target.
///
/// Offsets are absolute byte positions within the target; `end` and
/// `line_end` are exclusive. In single-line mode `match_text` never
/// contains a newline; in multiline mode `line_text` covers every line
/// the match touches.
#[derive(Debug, Clone, Default)]
pub struct Match {
    /// Offset of the start of the match.
    pub start: u64,
    /// Offset of the end of the match (exclusive).
    pub end: u64,
    /// Offset of the first byte of the first line of the match.
    pub line_start: u64,
    /// Offset just past the last line of the match (exclusive).
    pub line_end: u64,
    /// The matched text.
    pub match_text: String,
    /// The match including the non-matched text on the first and last line.
    pub line_text: String,
    /// 1-based line number of the beginning of the match.
    pub line_no: u64,
    /// Index into the condition table; `None` for primary matches.
    pub condition_id: Option<usize>,
    /// Up to `context_before` preceding lines, newline-joined.
    pub context_before: Option<String>,
    /// Up to `context_after` following lines, newline-joined.
    pub context_after: Option<String>,
}

/// Per-target match collection.
///
/// Constructed by a worker either when the target is finished or when
/// enough matches accumulated to switch to streaming delivery. A
/// streaming result carries the matches found so far plus a bounded
/// channel on which the remaining batches arrive; the channel is closed
/// when the engine finishes the target.
#[derive(Debug)]
pub struct SearchResult {
    /// Opaque target identifier (path, `-`, or a `tcp://` listener URL).
    pub target: String,
    /// Primary matches in emit order.
    pub matches: Vec<Match>,
    /// Matches of all condition patterns in emit order.
    pub condition_matches: Vec<Match>,
    /// Whether additional match batches arrive via `match_rx`.
    pub streaming: bool,
    /// Follow-up match batches; present iff `streaming`.
    pub match_rx: Option<Receiver<Vec<Match>>>,
    /// A NUL byte was found in the first 256 bytes of the target.
    pub is_binary: bool,
}

impl SearchResult {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            matches: Vec::new(),
            condition_matches: Vec::new(),
            streaming: false,
            match_rx: None,
            is_binary: false,
        }
    }
}

/// Terminal failures of a single scan. Neither aborts the pipeline: the
/// target degrades to "no matches" and the error is logged and tallied.
#[derive(Debug, Error)]
pub enum ScanError {
    /// A full input block contained no newline and the input is not at
    /// EOF. See the block-size option for inputs with very long lines.
    #[error("line too long (no newline within a full {0}-byte input block)")]
    LineTooLong(usize),
    /// Read failure on the byte source.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_default_is_primary() {
        let m = Match::default();
        assert_eq!(m.condition_id, None);
        assert_eq!(m.start, 0);
        assert!(m.context_before.is_none());
    }

    #[test]
    fn test_line_too_long_message_names_block_size() {
        let err = ScanError::LineTooLong(262144);
        assert!(err.to_string().contains("262144"));
    }
}
