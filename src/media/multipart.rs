//! `multipart/x-mixed-replace` demultiplexing
//!
//! Cameras and stream gateways serve MJPEG as one endless HTTP body where
//! each still image is wrapped in a MIME part:
//!
//! ```text
//! +------------+-------------------+------+-----------+--------+------------+
//! | --boundary | Header: value\r\n | \r\n | payload   | \r\n   | --boundary | ...
//! +------------+-------------------+------+-----------+--------+------------+
//!              |<- header block ->|       |<- frame ->|
//! ```
//!
//! The demuxer accumulates raw bytes and yields a payload once the boundary
//! that follows it has arrived, so a part is never emitted half-received.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Boundary used by go2rtc's MJPEG endpoint
pub const DEFAULT_BOUNDARY: &str = "--frame";

/// Blank line terminating a part's header block
const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const CRLF: &[u8] = b"\r\n";

/// Reasons a part is discarded instead of emitted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Nothing between header block and next boundary
    #[error("empty frame payload")]
    Empty,

    /// Payload (or its declared Content-Length) is over the limit
    #[error("frame of {len} bytes exceeds limit of {max}")]
    Oversized { len: usize, max: usize },

    /// A boundary appeared before the header block ended
    #[error("part without header terminator")]
    MissingHeader,

    /// Payload could not be turned into an image
    #[error("frame decode failed: {0}")]
    Decode(String),
}

/// Demultiplexer configuration
#[derive(Debug, Clone)]
pub struct DemuxConfig {
    /// Boundary marker including the leading dashes
    pub boundary: Vec<u8>,

    /// Largest payload accepted as a frame
    pub max_frame_size: usize,

    /// Buffer size at which undelimited data is thrown away
    pub buffer_ceiling: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            boundary: DEFAULT_BOUNDARY.as_bytes().to_vec(),
            max_frame_size: 8 * 1024 * 1024,  // 8MB
            buffer_ceiling: 16 * 1024 * 1024, // 16MB
        }
    }
}

impl DemuxConfig {
    /// Set the boundary token.
    ///
    /// Accepts the token as it appears in the `Content-Type` header
    /// (`boundary=frame`) or with its leading dashes (`--frame`).
    pub fn boundary(mut self, token: &str) -> Self {
        let token = token.trim();
        self.boundary = if token.starts_with("--") {
            token.as_bytes().to_vec()
        } else {
            format!("--{token}").into_bytes()
        };
        self
    }

    /// Set the maximum frame size; the buffer ceiling grows to fit two frames
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size.max(1);
        self.buffer_ceiling = self.buffer_ceiling.max(self.max_frame_size * 2);
        self
    }

    /// Set the buffer ceiling (never below one maximum-size frame)
    pub fn buffer_ceiling(mut self, size: usize) -> Self {
        self.buffer_ceiling = size.max(self.max_frame_size + self.boundary.len());
        self
    }
}

/// Counters kept by the demuxer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// Frames handed out
    pub frames: u64,
    /// Parts dropped as corrupt
    pub dropped: u64,
    /// Times the buffer was cleared because no boundary showed up
    pub resyncs: u64,
}

/// Splits a multipart byte stream into frame payloads
#[derive(Debug)]
pub struct MultipartDemuxer {
    config: DemuxConfig,
    buffer: BytesMut,
    /// Offset where the search for the closing boundary resumes
    resume_at: usize,
    stats: DemuxStats,
}

impl MultipartDemuxer {
    /// Create a demuxer with default configuration
    pub fn new() -> Self {
        Self::with_config(DemuxConfig::default())
    }

    /// Create a demuxer with custom configuration
    pub fn with_config(config: DemuxConfig) -> Self {
        Self {
            config,
            buffer: BytesMut::new(),
            resume_at: 0,
            stats: DemuxStats::default(),
        }
    }

    /// Append raw bytes and iterate over the frames they complete.
    ///
    /// The iterator is lazy: frames not pulled from it stay buffered and are
    /// returned by the next call.
    pub fn feed(&mut self, data: &[u8]) -> Frames<'_> {
        self.buffer.extend_from_slice(data);
        Frames { demuxer: self }
    }

    /// Extract the next complete frame from already-buffered data
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let boundary_len = self.config.boundary.len();

        loop {
            let Some(start) = find(&self.buffer, &self.config.boundary, 0) else {
                self.enforce_ceiling();
                return None;
            };
            if start > 0 {
                // preamble or garbage ahead of the first boundary
                self.consume(start);
            }

            let Some(header_end) = find(&self.buffer, HEADER_TERMINATOR, boundary_len) else {
                if let Some(next) = find(&self.buffer, &self.config.boundary, boundary_len) {
                    self.drop_part(next, FrameError::MissingHeader);
                    continue;
                }
                self.enforce_ceiling();
                return None;
            };

            // a boundary starting inside the header block means the part has no header
            let header_scan_end = (header_end + boundary_len).min(self.buffer.len());
            let header_block = &self.buffer[..header_scan_end];
            if let Some(next) = find(header_block, &self.config.boundary, boundary_len)
                .filter(|&next| next < header_end)
            {
                self.drop_part(next, FrameError::MissingHeader);
                continue;
            }

            let payload_start = header_end + HEADER_TERMINATOR.len();
            let search_from = payload_start.max(self.resume_at);
            let Some(end) = find(&self.buffer, &self.config.boundary, search_from) else {
                self.resume_at = self
                    .buffer
                    .len()
                    .saturating_sub(boundary_len.saturating_sub(1));
                self.enforce_ceiling();
                return None;
            };

            let declared = content_length(&self.buffer[boundary_len..header_end]);
            let mut payload_end = end;
            if payload_end >= payload_start + CRLF.len()
                && &self.buffer[payload_end - CRLF.len()..payload_end] == CRLF
            {
                payload_end -= CRLF.len();
            }
            let len = payload_end - payload_start;

            if let Err(err) = self.check(len, declared) {
                self.drop_part(end, err);
                continue;
            }

            let part = self.buffer.split_to(end).freeze();
            self.resume_at = 0;
            self.stats.frames += 1;
            return Some(part.slice(payload_start..payload_end));
        }
    }

    /// Number of bytes waiting for a boundary
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Demuxer counters
    pub fn stats(&self) -> DemuxStats {
        self.stats
    }

    /// Discard all buffered data
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.resume_at = 0;
    }

    fn check(&self, len: usize, declared: Option<usize>) -> Result<(), FrameError> {
        let max = self.config.max_frame_size;
        if let Some(declared) = declared.filter(|&d| d > max) {
            return Err(FrameError::Oversized { len: declared, max });
        }
        if len == 0 {
            return Err(FrameError::Empty);
        }
        if len > max {
            return Err(FrameError::Oversized { len, max });
        }
        Ok(())
    }

    /// Drop everything before `next`, keeping the boundary found there
    fn drop_part(&mut self, next: usize, err: FrameError) {
        tracing::debug!(error = %err, bytes = next, "Dropping corrupt multipart frame");
        self.stats.dropped += 1;
        self.consume(next);
    }

    fn consume(&mut self, n: usize) {
        self.buffer.advance(n);
        self.resume_at = 0;
    }

    /// Throw away undelimited data once the buffer passes the ceiling.
    ///
    /// A boundary-sized tail survives so a marker split across two reads is
    /// still recognised.
    fn enforce_ceiling(&mut self) {
        if self.buffer.len() <= self.config.buffer_ceiling {
            return;
        }
        let keep = self.config.boundary.len().saturating_sub(1);
        let discard = self.buffer.len() - keep;
        tracing::warn!(
            discarded = discard,
            ceiling = self.config.buffer_ceiling,
            "No multipart boundary within buffer ceiling, resynchronising"
        );
        self.consume(discard);
        self.stats.resyncs += 1;
    }
}

impl Default for MultipartDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy iterator over frames completed by a [`MultipartDemuxer::feed`] call
pub struct Frames<'a> {
    demuxer: &'a mut MultipartDemuxer,
}

impl Iterator for Frames<'_> {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.demuxer.next_frame()
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// `Content-Length` from a part's header block, if present and numeric
fn content_length(headers: &[u8]) -> Option<usize> {
    let text = std::str::from_utf8(headers).ok()?;
    text.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}
