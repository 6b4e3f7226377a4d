//! Live fragment relay
//!
//! Connects to a backend's MSE WebSocket endpoint for one camera stream,
//! negotiates codecs, and appends every binary fragment to a growing byte
//! sink that playback opens by path.
//!
//! # Lifecycle
//!
//! ```text
//!  start() ──► Connecting ──► Negotiating ──► Streaming ──► Closed
//!                  ▲                              │
//!                  │        "stream not found"    │
//!                  └─────────── Retrying ◄────────┘
//!                        (cam_main <-> cam, once)
//! ```
//!
//! Startup is supervised by a watchdog: no binary data within
//! `first_fragment_timeout` of `start()` fails the relay with
//! [`Error::Timeout`](crate::Error::Timeout).

pub mod config;
pub mod control;
pub mod live;
pub mod naming;
pub mod sink;
pub mod state;

pub use config::RelayConfig;
pub use control::{Control, ControlMessage, DEFAULT_CODECS};
pub use live::LiveRelay;
pub use naming::fallback_stream_name;
pub use sink::ByteSink;
pub use state::{RelayEvent, RelayPhase, RelayStatus};
