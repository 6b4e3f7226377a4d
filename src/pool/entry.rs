//! Per-camera pool state
//!
//! One [`RelayState`] exists per camera name while the camera's relay is
//! tracked by the pool.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::OwnedSemaphorePermit;

use crate::relay::{LiveRelay, RelayPhase};

/// Bookkeeping for one live relay
pub struct RelayState {
    /// The relay
    pub relay: Arc<LiveRelay>,

    /// Pool-assigned instance id; stale handles carry an older id
    pub relay_id: u64,

    /// Admission slot, returned when the entry is disposed
    pub(super) permit: OwnedSemaphorePermit,

    /// Last acquire for this camera
    pub last_activity: Instant,

    /// Last fragment reported by the relay
    pub last_fragment_at: Option<Instant>,

    /// Last ready, error notice or failure reported by the relay.
    /// Together with `last_activity` this decides freshness at teardown.
    pub last_event_at: Option<Instant>,

    /// Set when the last handle was released, cleared by an acquire
    pub pending_disposal: bool,

    /// Handles not yet released
    pub handles: usize,

    /// Bumped on every transition to zero handles
    pub release_epoch: u64,
}

impl RelayState {
    pub(super) fn new(relay: Arc<LiveRelay>, relay_id: u64, permit: OwnedSemaphorePermit) -> Self {
        Self {
            relay,
            relay_id,
            permit,
            last_activity: Instant::now(),
            last_fragment_at: None,
            last_event_at: None,
            pending_disposal: false,
            handles: 1,
            release_epoch: 0,
        }
    }

    /// Snapshot for callers outside the pool lock
    pub fn info(&self) -> RelayInfo {
        RelayInfo {
            relay_id: self.relay_id,
            stream_name: self.relay.stream_name(),
            phase: self.relay.phase(),
            handles: self.handles,
            pending_disposal: self.pending_disposal,
            last_activity: self.last_activity,
            last_fragment_at: self.last_fragment_at,
            last_event_at: self.last_event_at,
        }
    }
}

/// Point-in-time view of a tracked relay
#[derive(Debug, Clone)]
pub struct RelayInfo {
    pub relay_id: u64,
    pub stream_name: Option<String>,
    pub phase: RelayPhase,
    pub handles: usize,
    pub pending_disposal: bool,
    pub last_activity: Instant,
    pub last_fragment_at: Option<Instant>,
    pub last_event_at: Option<Instant>,
}

/// Pool-wide counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Relays tracked, including those inside their grace period
    pub relays: usize,
    /// Current concurrency budget
    pub capacity: usize,
    /// Admission slots free right now
    pub available_permits: usize,
    /// Slots still to be withdrawn after a budget decrease
    pub shrink_debt: usize,
}
