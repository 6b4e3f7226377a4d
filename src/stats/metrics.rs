//! Statistics for relays

use std::time::{Duration, Instant};

/// Per-relay statistics
#[derive(Debug, Clone)]
pub struct RelayStats {
    /// When the relay was started
    pub started_at: Option<Instant>,
    /// When the first media fragment arrived
    pub first_fragment_at: Option<Instant>,
    /// When the most recent media fragment arrived
    pub last_fragment_at: Option<Instant>,
    /// Total media bytes written to the sink
    pub bytes_received: u64,
    /// Number of binary fragments received
    pub fragments: u64,
    /// Error notices and failures reported
    pub errors: u64,
    /// Connection attempts, including fallback names
    pub attempts: u32,
}

impl RelayStats {
    /// Create an empty stats record
    pub fn new() -> Self {
        Self {
            started_at: None,
            first_fragment_at: None,
            last_fragment_at: None,
            bytes_received: 0,
            fragments: 0,
            errors: 0,
            attempts: 0,
        }
    }

    /// Record a received fragment
    pub fn on_fragment(&mut self, len: usize) {
        let now = Instant::now();
        if self.first_fragment_at.is_none() {
            self.first_fragment_at = Some(now);
        }
        self.last_fragment_at = Some(now);
        self.fragments += 1;
        self.bytes_received += len as u64;
    }

    /// Time from start to first fragment
    pub fn time_to_first_fragment(&self) -> Option<Duration> {
        Some(self.first_fragment_at?.duration_since(self.started_at?))
    }

    /// Time since the last fragment
    pub fn idle_for(&self) -> Option<Duration> {
        self.last_fragment_at.map(|t| t.elapsed())
    }

    /// Average bitrate in bits per second since start
    pub fn bitrate(&self) -> u64 {
        let Some(started) = self.started_at else {
            return 0;
        };
        let millis = started.elapsed().as_millis() as u64;
        if millis > 0 {
            self.bytes_received * 8 * 1000 / millis
        } else {
            0
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}
