//! Streaming match engine.
//!
//! The engine reads a target in fixed-size blocks and extracts matches
//! per block, carrying partial lines (single-line mode) or a sliding
//! overlap window (multiline mode) across block boundaries. It never
//! needs more memory than two input blocks regardless of input size.

pub mod extract;
pub mod invert;
pub mod reader;
pub mod scan;
pub mod types;

pub use reader::{open_target, ChunkedReader, SourceError};
pub use scan::Scanner;
pub use types::{Match, ScanError, SearchResult};

use std::time::Duration;

/// Default (and minimum) size of one input block.
pub const INPUT_BLOCK_SIZE: usize = 256 * 1024;

/// Size of the sliding overlap window for multiline matching.
pub const INPUT_MULTILINE_WINDOW: usize = 32 * 1024;

/// Upper bound for a single read from STDIN/network in multiline mode.
pub const MULTILINE_PIPE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Quiet period after which buffered STDIN/network input is treated as a
/// complete chunk for multiline matching.
pub const MULTILINE_PIPE_CHUNK_TIMEOUT: Duration = Duration::from_millis(150);

/// Match count after which a result switches to streaming delivery.
pub const STREAMING_THRESHOLD: usize = 1 << 16;

/// Capacity (in batches) of the follow-up channel of a streaming result.
pub const MATCH_CHANNEL_BATCHES: usize = 16;

/// ASCII-lowercase `src` into `dst`. Only the case-insensitive shadow
/// buffer is folded; reported match text always comes from the original
/// bytes.
#[inline]
pub(crate) fn bytes_to_lower(src: &[u8], dst: &mut [u8]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d = s.to_ascii_lowercase();
    }
}
