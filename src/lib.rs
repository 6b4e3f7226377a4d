//! Live camera stream acquisition and relay
//!
//! `camrelay` turns named camera streams on a go2rtc-style backend into local
//! byte sources that a player can open while they grow.
//!
//! - [`pool`]: bounded, coalescing pool of relays with delayed teardown
//! - [`relay`]: one WebSocket MSE stream copied into a growing file
//! - [`media`]: multipart still-image demultiplexing for MJPEG sources
//!
//! # Example
//!
//! ```no_run
//! use camrelay::{CameraStreamRequest, PoolConfig, RelayConfig, StreamPool};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> camrelay::Result<()> {
//! let relay = RelayConfig::from_base_url("http://nvr.local:1984")?.auth_cookie("session=abc");
//! let pool = StreamPool::new(PoolConfig::new(relay).max_concurrent(4));
//!
//! let cancel = CancellationToken::new();
//! if let Some(handle) = pool.acquire(CameraStreamRequest::main("driveway"), &cancel).await {
//!     let path = handle.ready().await?;
//!     println!("playing {}", path.display());
//!     handle.release().await;
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod media;
pub mod pool;
pub mod relay;
pub mod stats;

pub use error::{Error, Result};
pub use media::{DemuxConfig, FrameDecoder, JpegProbe, MjpegReader, MultipartDemuxer};
pub use pool::{CameraStreamRequest, PoolConfig, PoolStats, RelayHandle, StreamPool, StreamVariant};
pub use relay::{LiveRelay, RelayConfig, RelayEvent, RelayPhase, RelayStatus};
pub use stats::RelayStats;
