//! Stream pool implementation
//!
//! Owns one relay per camera, the admission gate that bounds how many relays
//! run at once, and the delayed teardown of released relays.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::relay::{LiveRelay, RelayEvent};

use super::config::{clamp_concurrency, PoolConfig};
use super::entry::{PoolStats, RelayInfo, RelayState};
use super::handle::RelayHandle;
use super::request::CameraStreamRequest;

/// Bounded pool of live relays keyed by camera name.
///
/// Cheap to clone; clones share the same relays.
#[derive(Clone)]
pub struct StreamPool {
    shared: Arc<Shared>,
}

/// State shared by the pool, its handles and its background tasks
pub(super) struct Shared {
    config: PoolConfig,

    /// Entries and budget bookkeeping, mutated under one lock
    state: Mutex<PoolState>,

    /// Admission gate, one permit per live relay
    gate: Arc<Semaphore>,

    next_relay_id: AtomicU64,

    /// Parent of every relay's cancellation token
    shutdown: CancellationToken,
}

struct PoolState {
    entries: HashMap<String, RelayState>,
    capacity: usize,
    /// Permits to forget as they come back after the budget was lowered
    shrink_debt: usize,
}

/// Which timestamp a relay event refreshes
#[derive(Debug, Clone, Copy)]
enum Activity {
    /// Media data; recorded but never delays teardown
    Fragment,
    /// Ready, error notice or failure; delays teardown
    Event,
}

impl StreamPool {
    /// Create a pool
    pub fn new(config: PoolConfig) -> Self {
        let capacity = clamp_concurrency(config.max_concurrent);

        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(PoolState {
                    entries: HashMap::new(),
                    capacity,
                    shrink_debt: 0,
                }),
                gate: Arc::new(Semaphore::new(capacity)),
                next_relay_id: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Get the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Get a handle to the camera's relay, starting one if needed.
    ///
    /// Requests for a camera that already has a relay join it. Otherwise the
    /// call waits for an admission slot; `None` means `cancel` fired (or the
    /// pool closed) before a slot opened.
    pub async fn acquire(
        &self,
        request: CameraStreamRequest,
        cancel: &CancellationToken,
    ) -> Option<RelayHandle> {
        if self.shared.shutdown.is_cancelled() {
            return None;
        }

        {
            let mut state = self.shared.state.lock().await;
            if let Some(handle) = self.shared.join(&mut state, &request.camera) {
                return Some(handle);
            }
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(camera = %request.camera, "Acquire cancelled while waiting for admission");
                return None;
            }
            _ = self.shared.shutdown.cancelled() => return None,
            permit = Arc::clone(&self.shared.gate).acquire_owned() => permit.ok()?,
        };

        let mut state = self.shared.state.lock().await;

        // another caller may have created the relay while we waited
        if let Some(handle) = self.shared.join(&mut state, &request.camera) {
            Shared::return_permit(&mut state, permit);
            return Some(handle);
        }

        let relay_id = self.shared.next_relay_id.fetch_add(1, Ordering::Relaxed);
        let relay = LiveRelay::new(request.camera.clone(), self.shared.config.relay.clone());
        let events = relay.subscribe();

        if let Err(e) = relay.start(request.stream_name(), &self.shared.shutdown) {
            tracing::warn!(camera = %request.camera, error = %e, "Failed to start relay");
            Shared::return_permit(&mut state, permit);
            return None;
        }

        self.shared
            .spawn_activity_watcher(request.camera.clone(), relay_id, events);
        state.entries.insert(
            request.camera.clone(),
            RelayState::new(Arc::clone(&relay), relay_id, permit),
        );

        tracing::info!(
            camera = %request.camera,
            stream = %request.stream_name(),
            relay_id = relay_id,
            relays = state.entries.len(),
            "Relay created"
        );

        Some(RelayHandle::new(
            request.camera,
            relay,
            relay_id,
            Arc::downgrade(&self.shared),
        ))
    }

    /// Release a handle; same as [`RelayHandle::release`]
    pub async fn release(&self, handle: RelayHandle) {
        handle.release().await;
    }

    /// Stop every relay and clear the pool.
    ///
    /// Outstanding handles become stale; their release is a no-op.
    pub async fn stop_all(&self) {
        self.shared.stop_all().await;
    }

    /// Stop every relay and refuse further acquires
    pub async fn close(&self) {
        self.shared.shutdown.cancel();
        self.shared.stop_all().await;
    }

    /// Change the concurrency budget (clamped to `[1, 20]`).
    ///
    /// Running relays above a lowered budget keep running; their slots are
    /// withdrawn as they are disposed.
    pub async fn set_max_concurrent(&self, max: usize) {
        let max = clamp_concurrency(max);
        let mut state = self.shared.state.lock().await;
        let old = state.capacity;

        if max > old {
            let mut grow = max - old;
            let repaid = grow.min(state.shrink_debt);
            state.shrink_debt -= repaid;
            grow -= repaid;
            self.shared.gate.add_permits(grow);
        } else if max < old {
            let shrink = old - max;
            let forgotten = self.shared.gate.forget_permits(shrink);
            state.shrink_debt += shrink - forgotten;
        }
        state.capacity = max;

        tracing::info!(
            from = old,
            to = max,
            shrink_debt = state.shrink_debt,
            "Concurrency budget changed"
        );
    }

    /// Current concurrency budget
    pub async fn max_concurrent(&self) -> usize {
        self.shared.state.lock().await.capacity
    }

    /// Pool-wide counters
    pub async fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().await;

        PoolStats {
            relays: state.entries.len(),
            capacity: state.capacity,
            available_permits: self.shared.gate.available_permits(),
            shrink_debt: state.shrink_debt,
        }
    }

    /// Number of tracked relays
    pub async fn relay_count(&self) -> usize {
        self.shared.state.lock().await.entries.len()
    }

    /// Whether the camera has a tracked relay
    pub async fn contains(&self, camera: &str) -> bool {
        self.shared.state.lock().await.entries.contains_key(camera)
    }

    /// Snapshot of the camera's relay state
    pub async fn relay_info(&self, camera: &str) -> Option<RelayInfo> {
        let state = self.shared.state.lock().await;
        state.entries.get(camera).map(RelayState::info)
    }
}

impl std::fmt::Debug for StreamPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPool")
            .field("available_permits", &self.shared.gate.available_permits())
            .field("closed", &self.shared.shutdown.is_cancelled())
            .finish()
    }
}

impl Shared {
    /// Join an existing relay, evicting it if it already ended
    fn join(self: &Arc<Self>, state: &mut PoolState, camera: &str) -> Option<RelayHandle> {
        let terminated = state.entries.get(camera)?.relay.is_terminated();
        if terminated {
            if let Some(evicted) = state.entries.remove(camera) {
                tracing::info!(
                    camera = %camera,
                    relay_id = evicted.relay_id,
                    status = ?evicted.relay.status(),
                    "Evicting ended relay"
                );
                evicted.relay.stop();
                Self::return_permit(state, evicted.permit);
            }
            return None;
        }

        let entry = state.entries.get_mut(camera)?;
        entry.handles += 1;
        entry.pending_disposal = false;
        entry.last_activity = Instant::now();

        tracing::debug!(
            camera = %camera,
            relay_id = entry.relay_id,
            handles = entry.handles,
            "Joined existing relay"
        );

        Some(RelayHandle::new(
            camera.to_string(),
            Arc::clone(&entry.relay),
            entry.relay_id,
            Arc::downgrade(self),
        ))
    }

    /// Record a released handle; schedules teardown on the last one
    pub(super) async fn release_relay(self: &Arc<Self>, camera: &str, relay_id: u64) {
        let mut state = self.state.lock().await;

        let Some(entry) = state.entries.get_mut(camera) else {
            tracing::debug!(camera = %camera, relay_id = relay_id, "Release for untracked camera ignored");
            return;
        };
        if entry.relay_id != relay_id {
            tracing::debug!(
                camera = %camera,
                expected = entry.relay_id,
                actual = relay_id,
                "Stale release ignored"
            );
            return;
        }

        entry.handles = entry.handles.saturating_sub(1);
        if entry.handles > 0 {
            return;
        }

        entry.pending_disposal = true;
        entry.release_epoch += 1;
        let epoch = entry.release_epoch;

        tracing::info!(
            camera = %camera,
            relay_id = relay_id,
            grace_period_ms = self.config.grace_period.as_millis() as u64,
            "Last handle released, entering grace period"
        );

        self.schedule_reap(camera.to_string(), relay_id, epoch);
    }

    fn schedule_reap(self: &Arc<Self>, camera: String, relay_id: u64, epoch: u64) {
        let pool = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let mut delay = self.config.grace_period;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                let Some(shared) = pool.upgrade() else {
                    return;
                };
                match shared.reap(&camera, relay_id, epoch).await {
                    Some(remaining) => delay = remaining,
                    None => return,
                }
            }
        });
    }

    /// Delayed teardown check.
    ///
    /// An acquire, ready or error event newer than the freshness threshold
    /// defers teardown; returns how much longer to wait in that case.
    async fn reap(&self, camera: &str, relay_id: u64, epoch: u64) -> Option<Duration> {
        let mut state = self.state.lock().await;

        let entry = state.entries.get(camera)?;
        if entry.relay_id != relay_id
            || entry.release_epoch != epoch
            || !entry.pending_disposal
            || entry.handles > 0
        {
            tracing::trace!(camera = %camera, relay_id = relay_id, "Teardown superseded");
            return None;
        }

        let freshness = self.config.freshness_threshold.min(self.config.grace_period);
        let refreshed = entry
            .last_event_at
            .map_or(entry.last_activity, |at| at.max(entry.last_activity));
        let idle = refreshed.elapsed();
        if idle < freshness {
            tracing::debug!(camera = %camera, relay_id = relay_id, "Recent activity, teardown deferred");
            return Some(freshness - idle);
        }

        if let Some(entry) = state.entries.remove(camera) {
            entry.relay.stop();
            Self::return_permit(&mut state, entry.permit);
            tracing::info!(
                camera = %camera,
                relay_id = relay_id,
                relays = state.entries.len(),
                "Relay disposed after grace period"
            );
        }
        None
    }

    async fn stop_all(&self) {
        let mut state = self.state.lock().await;
        let entries: Vec<_> = state.entries.drain().collect();

        for (camera, entry) in entries {
            entry.relay.stop();
            Self::return_permit(&mut state, entry.permit);
            tracing::info!(camera = %camera, relay_id = entry.relay_id, "Relay stopped");
        }
    }

    /// Give an admission slot back, unless a budget decrease still owes one
    fn return_permit(state: &mut PoolState, permit: OwnedSemaphorePermit) {
        if state.shrink_debt > 0 {
            state.shrink_debt -= 1;
            permit.forget();
        } else {
            drop(permit);
        }
    }

    /// Refresh the entry's activity timestamps from relay events
    fn spawn_activity_watcher(
        self: &Arc<Self>,
        camera: String,
        relay_id: u64,
        mut events: broadcast::Receiver<RelayEvent>,
    ) {
        let pool: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let activity = match events.recv().await {
                    Ok(RelayEvent::Fragment { .. }) => Activity::Fragment,
                    Ok(RelayEvent::Ready(_) | RelayEvent::Error(_) | RelayEvent::Failed(_)) => {
                        Activity::Event
                    }
                    // missed fragments still mean the relay is busy
                    Err(RecvError::Lagged(_)) => Activity::Fragment,
                    Err(RecvError::Closed) => return,
                };

                let Some(shared) = pool.upgrade() else {
                    return;
                };
                if !shared.touch(&camera, relay_id, activity).await {
                    return;
                }
            }
        });
    }

    /// Returns false once the relay is no longer tracked
    async fn touch(&self, camera: &str, relay_id: u64, activity: Activity) -> bool {
        let mut state = self.state.lock().await;

        match state.entries.get_mut(camera) {
            Some(entry) if entry.relay_id == relay_id => {
                let now = Some(Instant::now());
                match activity {
                    Activity::Fragment => entry.last_fragment_at = now,
                    Activity::Event => entry.last_event_at = now,
                }
                true
            }
            _ => false,
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::relay::RelayConfig;

    /// Relays that fail fast against a closed port
    fn pool(max: usize) -> StreamPool {
        let relay = RelayConfig::from_base_url("http://127.0.0.1:9")
            .unwrap()
            .connect_timeout(Duration::from_millis(500));
        StreamPool::new(
            PoolConfig::new(relay)
                .max_concurrent(max)
                .grace_period(Duration::from_millis(50))
                .freshness_threshold(Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_cancelled_acquire_returns_none() {
        let pool = pool(1);
        let cancel = CancellationToken::new();
        let _held = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();

        let waiter = CancellationToken::new();
        let blocked = {
            let pool = pool.clone();
            let waiter = waiter.clone();
            tokio::spawn(async move { pool.acquire(CameraStreamRequest::main("b"), &waiter).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        waiter.cancel();

        assert!(blocked.await.unwrap().is_none());
        assert!(!pool.contains("b").await);
    }

    #[tokio::test]
    async fn test_same_camera_coalesces() {
        let pool = pool(2);
        let cancel = CancellationToken::new();

        let first = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();
        let second = pool.acquire(CameraStreamRequest::sub("a"), &cancel).await.unwrap();

        assert_eq!(first.relay_id(), second.relay_id());
        assert!(Arc::ptr_eq(first.relay(), second.relay()));
        assert_eq!(pool.relay_count().await, 1);
        assert_eq!(pool.relay_info("a").await.unwrap().handles, 2);
    }

    #[tokio::test]
    async fn test_stale_release_is_noop() {
        let pool = pool(2);
        let cancel = CancellationToken::new();

        let handle = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();
        let stale_id = handle.relay_id();
        pool.stop_all().await;

        let fresh = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();
        assert_ne!(fresh.relay_id(), stale_id);

        handle.release().await;

        let info = pool.relay_info("a").await.unwrap();
        assert_eq!(info.relay_id, fresh.relay_id());
        assert_eq!(info.handles, 1);
        assert!(!info.pending_disposal);
    }

    #[tokio::test]
    async fn test_ended_relay_is_evicted_on_acquire() {
        let pool = pool(1);
        let cancel = CancellationToken::new();

        let handle = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();
        // connection refused
        assert!(handle.ready().await.is_err());

        let replacement = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();

        assert_ne!(replacement.relay_id(), handle.relay_id());
        assert_eq!(pool.relay_count().await, 1);
    }

    #[tokio::test]
    async fn test_release_disposes_after_grace() {
        let pool = pool(1);
        let cancel = CancellationToken::new();

        let handle = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();
        handle.release().await;
        assert!(pool.relay_info("a").await.unwrap().pending_disposal);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!pool.contains("a").await);
        assert_eq!(pool.stats().await.available_permits, 1);
    }

    #[tokio::test]
    async fn test_recent_error_event_defers_teardown() {
        let relay = RelayConfig::from_base_url("http://127.0.0.1:9")
            .unwrap()
            .connect_timeout(Duration::from_millis(500));
        let pool = StreamPool::new(
            PoolConfig::new(relay)
                .max_concurrent(1)
                .grace_period(Duration::from_millis(200))
                .freshness_threshold(Duration::from_millis(150)),
        );
        let cancel = CancellationToken::new();

        let handle = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();
        let relay_id = handle.relay_id();
        // let the connection failure age past the threshold
        assert!(handle.ready().await.is_err());
        tokio::time::sleep(Duration::from_millis(300)).await;

        handle.release().await;
        tokio::time::sleep(Duration::from_millis(180)).await;
        assert!(pool.shared.touch("a", relay_id, Activity::Event).await);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(pool.contains("a").await);
        assert!(pool.relay_info("a").await.unwrap().last_event_at.is_some());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!pool.contains("a").await);
    }

    #[tokio::test]
    async fn test_recent_fragment_does_not_defer_teardown() {
        let pool = pool(1);
        let cancel = CancellationToken::new();

        let handle = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();
        let relay_id = handle.relay_id();
        assert!(handle.ready().await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;

        handle.release().await;
        tokio::time::sleep(Duration::from_millis(45)).await;
        assert!(pool.shared.touch("a", relay_id, Activity::Fragment).await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!pool.contains("a").await);
    }

    #[tokio::test]
    async fn test_lowering_budget_records_debt() {
        let pool = pool(3);
        let cancel = CancellationToken::new();

        let a = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();
        let _b = pool.acquire(CameraStreamRequest::main("b"), &cancel).await.unwrap();

        pool.set_max_concurrent(1).await;
        let stats = pool.stats().await;
        assert_eq!(stats.capacity, 1);
        assert_eq!(stats.available_permits, 0);
        assert_eq!(stats.shrink_debt, 1);
        // running relays are kept
        assert_eq!(stats.relays, 2);

        a.release().await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let stats = pool.stats().await;
        assert_eq!(stats.relays, 1);
        assert_eq!(stats.shrink_debt, 0);
        assert_eq!(stats.available_permits, 0);
    }

    #[tokio::test]
    async fn test_raising_budget_repays_debt_first() {
        let pool = pool(2);
        let cancel = CancellationToken::new();
        let _a = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();
        let _b = pool.acquire(CameraStreamRequest::main("b"), &cancel).await.unwrap();

        pool.set_max_concurrent(1).await;
        pool.set_max_concurrent(3).await;

        let stats = pool.stats().await;
        assert_eq!(stats.shrink_debt, 0);
        assert_eq!(stats.available_permits, 1);
    }

    #[tokio::test]
    async fn test_budget_clamped_at_runtime() {
        let pool = pool(4);

        pool.set_max_concurrent(0).await;
        assert_eq!(pool.max_concurrent().await, 1);

        pool.set_max_concurrent(100).await;
        assert_eq!(pool.max_concurrent().await, 20);
        assert_eq!(pool.stats().await.available_permits, 20);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_acquire() {
        let pool = pool(2);
        let cancel = CancellationToken::new();
        let handle = pool.acquire(CameraStreamRequest::main("a"), &cancel).await.unwrap();

        pool.close().await;

        assert_eq!(pool.relay_count().await, 0);
        assert!(pool.acquire(CameraStreamRequest::main("b"), &cancel).await.is_none());
        handle.relay().closed().await;
    }
}
