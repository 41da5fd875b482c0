//! Byte source adapter.
//!
//! Turns a target identifier into a blocking reader. File targets read
//! directly (and support re-seeking for out-of-window context
//! retrieval); STDIN and network targets are wrapped in a
//! [`ChunkedReader`] when multiline mode is active, so that a stalled
//! pipe cannot keep a multiline match pending forever.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::fs::File;
use std::io::{self, Read};
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::{MULTILINE_PIPE_CHUNK_TIMEOUT, MULTILINE_PIPE_TIMEOUT};

/// Split a `tcp[46]?://host:port` listener target into protocol and
/// address. Returns `None` for every other target identifier.
pub fn net_target(target: &str) -> Option<(&str, &str)> {
    static NET_TCP_REGEX: OnceLock<regex::Regex> = OnceLock::new();
    let re = NET_TCP_REGEX
        .get_or_init(|| regex::Regex::new(r"^(tcp[46]?)://(.*:\d+)$").unwrap());
    let caps = re.captures(target)?;
    Some((
        caps.get(1).unwrap().as_str(),
        caps.get(2).unwrap().as_str(),
    ))
}

/// Failures surfaced by the adapter; the affected target is skipped.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open file '{target}': {source}")]
    Open {
        target: String,
        source: io::Error,
    },
    #[error("cannot listen on '{target}': {source}")]
    Connect {
        target: String,
        source: io::Error,
    },
}

/// Open a file target for scanning.
pub fn open_target(target: &str) -> Result<File, SourceError> {
    File::open(target).map_err(|source| SourceError::Open {
        target: target.to_string(),
        source,
    })
}

/// Bind a listener for a `tcp[46]?://host:port` target, accept a single
/// connection and return it. The scan reads until the peer closes.
pub fn accept_network_target(
    target: &str,
    proto: &str,
    addr: &str,
) -> Result<TcpStream, SourceError> {
    let connect_err = |source| SourceError::Connect {
        target: target.to_string(),
        source,
    };

    let addrs: Vec<_> = addr
        .to_socket_addrs()
        .map_err(connect_err)?
        .filter(|a| match proto {
            "tcp4" => a.is_ipv4(),
            "tcp6" => a.is_ipv6(),
            _ => true,
        })
        .collect();
    if addrs.is_empty() {
        return Err(connect_err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no {} address for '{}'", proto, addr),
        )));
    }

    let listener = TcpListener::bind(&addrs[..]).map_err(connect_err)?;
    let (stream, _) = listener.accept().map_err(connect_err)?;
    Ok(stream)
}

/// A reader that aggregates input from a pipe or socket into chunks.
///
/// A background thread pulls from the underlying source; `read` first
/// blocks for data, then keeps appending until the destination buffer is
/// full, the source has been quiet for the chunk timeout, or the overall
/// timeout for this call expires. This bounds how long a multiline scan
/// can sit on a partially buffered chunk.
///
/// Contract: returns up to `buf.len()` bytes, signals EOF exactly once,
/// and never returns bytes and an error from the same call.
pub struct ChunkedReader {
    rx: Receiver<io::Result<Vec<u8>>>,
    leftover: Vec<u8>,
    pending_err: Option<io::Error>,
    done: bool,
    chunk_timeout: Duration,
    timeout: Duration,
}

impl ChunkedReader {
    pub fn new<R: Read + Send + 'static>(inner: R) -> Self {
        Self::with_timeouts(inner, MULTILINE_PIPE_CHUNK_TIMEOUT, MULTILINE_PIPE_TIMEOUT)
    }

    pub fn with_timeouts<R: Read + Send + 'static>(
        mut inner: R,
        chunk_timeout: Duration,
        timeout: Duration,
    ) -> Self {
        let (tx, rx) = bounded::<io::Result<Vec<u8>>>(8);
        thread::spawn(move || loop {
            let mut buf = vec![0u8; 64 * 1024];
            match inner.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    buf.truncate(n);
                    if tx.send(Ok(buf)).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        });
        Self {
            rx,
            leftover: Vec::new(),
            pending_err: None,
            done: false,
            chunk_timeout,
            timeout,
        }
    }

    /// Move as much of `chunk` as fits into `buf[filled..]`, stashing the
    /// rest for the next call. Returns the number of bytes copied.
    fn absorb(&mut self, chunk: Vec<u8>, buf: &mut [u8], filled: usize) -> usize {
        let room = buf.len() - filled;
        let take = chunk.len().min(room);
        buf[filled..filled + take].copy_from_slice(&chunk[..take]);
        if take < chunk.len() {
            self.leftover.extend_from_slice(&chunk[take..]);
        }
        take
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut filled = 0;
        if !self.leftover.is_empty() {
            let take = self.leftover.len().min(buf.len());
            buf[..take].copy_from_slice(&self.leftover[..take]);
            self.leftover.drain(..take);
            filled = take;
            if filled == buf.len() {
                return Ok(filled);
            }
        }

        if filled == 0 {
            if let Some(err) = self.pending_err.take() {
                self.done = true;
                return Err(err);
            }
            if self.done {
                return Ok(0);
            }
            // Block until the source produces something or closes.
            match self.rx.recv() {
                Ok(Ok(chunk)) => filled += self.absorb(chunk, buf, filled),
                Ok(Err(e)) => {
                    self.done = true;
                    return Err(e);
                }
                Err(_) => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }

        // Aggregate further chunks until quiet, deadline, or full buffer.
        let deadline = Instant::now() + self.timeout;
        while filled < buf.len() && !self.done && self.pending_err.is_none() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let wait = self.chunk_timeout.min(remaining);
            match self.rx.recv_timeout(wait) {
                Ok(Ok(chunk)) => filled += self.absorb(chunk, buf, filled),
                Ok(Err(e)) => self.pending_err = Some(e),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => self.done = true,
            }
        }

        Ok(filled)
    }
}
