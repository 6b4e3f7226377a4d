//! Consumer handles

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, watch};

use crate::error::Result;
use crate::relay::{LiveRelay, RelayEvent};

use super::store::Shared;

/// One consumer's claim on a pooled relay.
///
/// Releasing (explicitly or by dropping) tells the pool; the pool decides
/// when the relay is torn down.
pub struct RelayHandle {
    camera: String,
    relay: Arc<LiveRelay>,
    relay_id: u64,
    /// `None` once released
    pool: Option<Weak<Shared>>,
}

impl RelayHandle {
    pub(super) fn new(
        camera: String,
        relay: Arc<LiveRelay>,
        relay_id: u64,
        pool: Weak<Shared>,
    ) -> Self {
        Self {
            camera,
            relay,
            relay_id,
            pool: Some(pool),
        }
    }

    /// Camera this handle belongs to
    pub fn camera(&self) -> &str {
        &self.camera
    }

    /// Pool-assigned relay instance id
    pub fn relay_id(&self) -> u64 {
        self.relay_id
    }

    /// The underlying relay
    pub fn relay(&self) -> &Arc<LiveRelay> {
        &self.relay
    }

    /// Wait for the sink path, or the error that ended the relay
    pub async fn ready(&self) -> Result<PathBuf> {
        self.relay.ready().await
    }

    /// Subscribe to fragment and error notifications
    pub fn events(&self) -> broadcast::Receiver<RelayEvent> {
        self.relay.subscribe()
    }

    /// Watch the number of bytes in the sink
    pub fn watch_sink_len(&self) -> watch::Receiver<u64> {
        self.relay.watch_sink_len()
    }

    /// Release this claim and wait for the pool to record it
    pub async fn release(mut self) {
        if let Some(shared) = self.pool.take().and_then(|pool| pool.upgrade()) {
            shared.release_relay(&self.camera, self.relay_id).await;
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        let Some(shared) = self.pool.take().and_then(|pool| pool.upgrade()) else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let camera = std::mem::take(&mut self.camera);
                let relay_id = self.relay_id;
                runtime.spawn(async move {
                    shared.release_relay(&camera, relay_id).await;
                });
            }
            Err(_) => {
                tracing::warn!(
                    camera = %self.camera,
                    relay_id = self.relay_id,
                    "Relay handle dropped outside a runtime, release skipped"
                );
            }
        }
    }
}

impl std::fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHandle")
            .field("camera", &self.camera)
            .field("relay_id", &self.relay_id)
            .field("released", &self.pool.is_none())
            .finish()
    }
}
