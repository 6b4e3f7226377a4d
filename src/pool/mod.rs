//! Stream acquisition pool
//!
//! The pool hands out [`RelayHandle`]s for camera streams. It keeps at most
//! one relay per camera, bounds the number of live relays with an admission
//! gate, and tears a relay down only after its last handle has been released
//! for a grace period.
//!
//! # Architecture
//!
//! ```text
//!                            StreamPool (Arc<Shared>)
//!                     ┌──────────────────────────────────┐
//!                     │ gate: Semaphore(max_concurrent)  │
//!                     │ entries: HashMap<camera,         │
//!                     │   RelayState {                   │
//!                     │     relay: Arc<LiveRelay>,       │
//!                     │     permit, handles, epoch,      │
//!                     │     pending_disposal,            │
//!                     │   }                              │
//!                     │ >                                │
//!                     └────────────────┬─────────────────┘
//!                                      │
//!          ┌───────────────────────────┼───────────────────────────┐
//!          │                           │                           │
//!          ▼                           ▼                           ▼
//!    acquire("cam1")            acquire("cam1")             acquire("cam2")
//!    new relay + permit         joins cam1 relay            waits on gate
//!          │                           │
//!          └─────► release / drop ─────┘
//!                        │
//!                        ▼
//!             grace period ─► reap ─► relay.stop(), permit returned
//! ```
//!
//! # Teardown
//!
//! Releasing the last handle only marks the entry pending. A delayed check
//! after `grace_period` disposes the relay if nothing re-acquired it in the
//! meantime; each release bumps an epoch so checks scheduled by earlier
//! releases do nothing.

pub mod config;
pub mod entry;
pub mod handle;
pub mod request;
pub mod store;

pub use config::{clamp_concurrency, PoolConfig, DEFAULT_MAX_CONCURRENT, MAX_CONCURRENT, MIN_CONCURRENT};
pub use entry::{PoolStats, RelayInfo, RelayState};
pub use handle::RelayHandle;
pub use request::{CameraStreamRequest, StreamVariant};
pub use store::StreamPool;
