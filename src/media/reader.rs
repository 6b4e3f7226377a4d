//! MJPEG reader loop
//!
//! Drives a [`MultipartDemuxer`] from any async byte source and hands each
//! payload to a [`FrameDecoder`]. Turning bytes into pixels belongs to the
//! embedding application; this module only decides which payloads reach it.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

use super::multipart::{DemuxConfig, DemuxStats, FrameError, MultipartDemuxer};

/// JPEG start-of-image marker
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Turns a frame payload into whatever the consumer displays
pub trait FrameDecoder: Send + Sync + 'static {
    /// Decoded frame type
    type Frame: Send + 'static;

    /// Decode one payload. Errors skip the frame.
    fn decode(&self, payload: Bytes) -> std::result::Result<Self::Frame, FrameError>;
}

/// Pass-through decoder that only accepts payloads that look like JPEG
#[derive(Debug, Clone, Copy, Default)]
pub struct JpegProbe;

impl FrameDecoder for JpegProbe {
    type Frame = Bytes;

    fn decode(&self, payload: Bytes) -> std::result::Result<Bytes, FrameError> {
        if payload.starts_with(&JPEG_SOI) {
            Ok(payload)
        } else {
            Err(FrameError::Decode("missing JPEG start-of-image marker".into()))
        }
    }
}

/// Why a reader loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// Source reached end of stream
    Eof,
    /// Frame receiver was dropped
    ReceiverClosed,
    /// Cancellation token fired
    Cancelled,
}

/// Single reader loop feeding a demuxer
pub struct MjpegReader<D: FrameDecoder = JpegProbe> {
    demuxer: MultipartDemuxer,
    decoder: D,
    read_size: usize,
    decode_failures: u64,
}

impl MjpegReader<JpegProbe> {
    /// Create a reader that emits raw JPEG payloads
    pub fn new(config: DemuxConfig) -> Self {
        Self::with_decoder(config, JpegProbe)
    }
}

impl<D: FrameDecoder> MjpegReader<D> {
    /// Create a reader with a custom decoder
    pub fn with_decoder(config: DemuxConfig, decoder: D) -> Self {
        Self {
            demuxer: MultipartDemuxer::with_config(config),
            decoder,
            read_size: 64 * 1024,
            decode_failures: 0,
        }
    }

    /// Set the size of each read from the source
    pub fn read_size(mut self, size: usize) -> Self {
        self.read_size = size.max(1);
        self
    }

    /// Demuxer counters
    pub fn stats(&self) -> DemuxStats {
        self.demuxer.stats()
    }

    /// Payloads the decoder rejected
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Read `source` until it ends, forwarding decoded frames to `frames`.
    ///
    /// Corrupt parts and decode failures are skipped. Only read errors from
    /// the source end the loop with an error.
    pub async fn run<R>(
        &mut self,
        mut source: R,
        frames: mpsc::Sender<D::Frame>,
        cancel: CancellationToken,
    ) -> Result<ReaderExit>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = BytesMut::with_capacity(self.read_size);

        loop {
            chunk.clear();
            chunk.reserve(self.read_size);

            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(ReaderExit::Cancelled),
                read = source.read_buf(&mut chunk) => read?,
            };
            if read == 0 {
                tracing::debug!(frames = self.demuxer.stats().frames, "MJPEG source ended");
                return Ok(ReaderExit::Eof);
            }

            for payload in self.demuxer.feed(&chunk) {
                let frame = match self.decoder.decode(payload) {
                    Ok(frame) => frame,
                    Err(e) => {
                        self.decode_failures += 1;
                        tracing::debug!(error = %e, "Skipping undecodable frame");
                        continue;
                    }
                };
                if frames.send(frame).await.is_err() {
                    return Ok(ReaderExit::ReceiverClosed);
                }
            }
        }
    }
}
