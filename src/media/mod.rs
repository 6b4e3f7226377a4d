//! Media handling for the still-image path
//!
//! This module provides:
//! - `multipart/x-mixed-replace` demultiplexing into frame payloads
//! - A reader loop that drives the demuxer from an async byte source

pub mod multipart;
pub mod reader;

pub use multipart::{DemuxConfig, DemuxStats, FrameError, Frames, MultipartDemuxer};
pub use reader::{FrameDecoder, JpegProbe, MjpegReader, ReaderExit};
