//! Live fragment relay
//!
//! A [`LiveRelay`] owns one WebSocket to the backend's MSE endpoint for one
//! camera stream and copies every binary fragment into a [`ByteSink`].
//!
//! ```text
//!   backend                         LiveRelay                     consumers
//!  ---------                 --------------------------         -----------
//!  ws /live/mse/api/ws  <--  {"type":"mse","value":..}
//!                       -->  text  -> Control::parse  --events-->  subscribe()
//!                       -->  binary -> ByteSink::append --status-->  ready()
//!                                         |
//!                                         v
//!                                 $TMP/live_<hex>.mp4  <--------  player
//! ```
//!
//! Outcomes are published on channels instead of callbacks: `ready()`
//! resolves once with the sink path or the terminal error, and
//! `subscribe()` delivers fragment and error notifications.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::stats::RelayStats;

use super::config::RelayConfig;
use super::control::{Control, ControlMessage};
use super::naming::fallback_stream_name;
use super::sink::ByteSink;
use super::state::{RelayEvent, RelayPhase, RelayStatus};

/// Relay for one camera stream
pub struct LiveRelay {
    camera: String,
    config: RelayConfig,
    /// Set by the first `start` (or a `stop` before it)
    token: OnceLock<CancellationToken>,
    sink_path: OnceLock<PathBuf>,
    phase: watch::Sender<RelayPhase>,
    status: watch::Sender<RelayStatus>,
    stream_name: watch::Sender<Option<String>>,
    sink_len: watch::Sender<u64>,
    stats: watch::Sender<RelayStats>,
    events: broadcast::Sender<RelayEvent>,
}

impl LiveRelay {
    /// Create an idle relay
    pub fn new(camera: impl Into<String>, config: RelayConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Arc::new(Self {
            camera: camera.into(),
            config,
            token: OnceLock::new(),
            sink_path: OnceLock::new(),
            phase: watch::channel(RelayPhase::Idle).0,
            status: watch::channel(RelayStatus::Pending).0,
            stream_name: watch::channel(None).0,
            sink_len: watch::channel(0).0,
            stats: watch::channel(RelayStats::new()).0,
            events,
        })
    }

    /// Start streaming `stream_name` on a background task.
    ///
    /// The relay stops when `cancel` (or [`stop`](Self::stop)) fires.
    pub fn start(
        self: &Arc<Self>,
        stream_name: impl Into<String>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let token = cancel.child_token();
        if self.token.set(token.clone()).is_err() {
            tracing::warn!(camera = %self.camera, "Relay already started, ignoring start");
            return Err(Error::AlreadyStarted);
        }

        let stream_name = stream_name.into();
        tracing::info!(camera = %self.camera, stream = %stream_name, "Starting live relay");

        self.stats.send_modify(|s| s.started_at = Some(Instant::now()));
        self.set_phase(RelayPhase::Connecting);
        self.spawn_watchdog(token.clone());

        let relay = Arc::clone(self);
        tokio::spawn(async move { relay.run(stream_name, token).await });

        Ok(())
    }

    /// Stop the relay. Cleanup finishes on the relay task.
    pub fn stop(&self) {
        self.token.get_or_init(CancellationToken::new).cancel();

        // never started, so no task will run the cleanup path
        let was_idle = self.phase.send_if_modified(|phase| {
            if *phase == RelayPhase::Idle {
                *phase = RelayPhase::Closed;
                true
            } else {
                false
            }
        });
        if was_idle {
            self.settle_stopped();
        }
    }

    /// Wait for the startup outcome: the sink path, or the error that ended
    /// the relay before (or after) data arrived.
    pub async fn ready(&self) -> Result<PathBuf> {
        let mut status = self.status.subscribe();
        let settled = status
            .wait_for(RelayStatus::is_settled)
            .await
            .map_err(|_| Error::Cancelled)?;

        match &*settled {
            RelayStatus::Ready(path) => Ok(path.clone()),
            RelayStatus::Failed(err) => Err(err.clone()),
            RelayStatus::Pending | RelayStatus::Stopped => Err(Error::Cancelled),
        }
    }

    /// Wait until the relay task has released the connection and sink
    pub async fn closed(&self) {
        let mut phase = self.phase.subscribe();
        let _ = phase.wait_for(|p| *p == RelayPhase::Closed).await;
    }

    /// Subscribe to fragment and error notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }

    /// Watch the number of bytes written to the sink
    pub fn watch_sink_len(&self) -> watch::Receiver<u64> {
        self.sink_len.subscribe()
    }

    /// Camera this relay serves
    pub fn camera(&self) -> &str {
        &self.camera
    }

    /// Stream name of the current (or last) connection attempt
    pub fn stream_name(&self) -> Option<String> {
        self.stream_name.borrow().clone()
    }

    /// Sink location, once the first fragment arrived
    pub fn sink_path(&self) -> Option<PathBuf> {
        self.sink_path.get().cloned()
    }

    /// Current phase
    pub fn phase(&self) -> RelayPhase {
        *self.phase.borrow()
    }

    /// Current status
    pub fn status(&self) -> RelayStatus {
        self.status.borrow().clone()
    }

    /// Whether the relay has ended (failed or stopped)
    pub fn is_terminated(&self) -> bool {
        self.status.borrow().is_terminated()
    }

    /// Snapshot of relay statistics
    pub fn stats(&self) -> RelayStats {
        self.stats.borrow().clone()
    }

    async fn run(self: Arc<Self>, stream_name: String, token: CancellationToken) {
        let mut sink = None;

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Error::Cancelled,
            err = self.pump(stream_name, &mut sink) => err,
        };

        if let Some(sink) = sink.take() {
            if let Err(e) = sink.finish().await {
                tracing::warn!(camera = %self.camera, error = %e, "Failed to close byte sink");
            }
        }

        match outcome {
            Error::Cancelled => self.settle_stopped(),
            err => self.fail(err),
        }

        // releases the watchdog
        token.cancel();
        self.set_phase(RelayPhase::Closed);

        let stats = self.stats();
        tracing::info!(
            camera = %self.camera,
            fragments = stats.fragments,
            bytes = stats.bytes_received,
            attempts = stats.attempts,
            "Live relay closed"
        );
    }

    /// Stream with fallback naming until a terminal error
    async fn pump(&self, initial: String, sink: &mut Option<ByteSink>) -> Error {
        let mut tried = HashSet::new();
        tried.insert(initial.clone());
        let mut name = initial;

        loop {
            self.stream_name.send_replace(Some(name.clone()));
            self.stats.send_modify(|s| s.attempts += 1);

            let err = match self.stream_once(&name, sink).await {
                Ok(()) => Error::Connection("stream closed by server".into()),
                Err(e) => e,
            };
            if !matches!(err, Error::StreamNotFound(_)) {
                return err;
            }

            match fallback_stream_name(&name) {
                Some(alternate) if tried.insert(alternate.clone()) => {
                    tracing::warn!(
                        camera = %self.camera,
                        stream = %name,
                        fallback = %alternate,
                        "Stream not found, retrying with fallback name"
                    );
                    self.set_phase(RelayPhase::Retrying);
                    name = alternate;
                }
                _ => return err,
            }
        }
    }

    /// One connection: connect, negotiate, stream until close or error
    async fn stream_once(&self, stream_name: &str, sink: &mut Option<ByteSink>) -> Result<()> {
        self.set_phase(RelayPhase::Connecting);

        let url = self.config.stream_url(stream_name)?;
        let mut request = url.as_str().into_client_request()?;
        if let Some(cookie) = &self.config.auth_cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| Error::Connection(format!("invalid auth cookie: {e}")))?;
            request.headers_mut().insert(COOKIE, value);
        }

        tracing::debug!(camera = %self.camera, url = %url, "Connecting to stream");

        let timeout = self.config.connect_timeout;
        let (mut ws, _response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| Error::Connection(format!("connect timed out after {timeout:?}")))??;

        self.set_phase(RelayPhase::Negotiating);
        let offer = ControlMessage::negotiate(self.config.codecs.as_slice()).to_json();
        ws.send(Message::Text(offer)).await?;

        self.set_phase(RelayPhase::Streaming);
        while let Some(message) = ws.next().await {
            match message? {
                Message::Binary(data) => self.on_fragment(&data, sink).await?,
                Message::Text(text) => self.on_control(stream_name, &text)?,
                Message::Close(frame) => {
                    tracing::debug!(camera = %self.camera, frame = ?frame, "Server closed stream");
                    break;
                }
                _ => {}
            }
        }

        Ok(())
    }

    fn on_control(&self, stream_name: &str, text: &str) -> Result<()> {
        match Control::parse(text) {
            Some(Control::StreamNotFound(message)) => {
                tracing::debug!(camera = %self.camera, stream = %stream_name, reason = %message, "Stream not found");
                Err(Error::StreamNotFound(stream_name.to_string()))
            }
            Some(Control::Error(message)) => {
                tracing::warn!(camera = %self.camera, error = %message, "Stream reported error");
                self.stats.send_modify(|s| s.errors += 1);
                let _ = self.events.send(RelayEvent::Error(message));
                Ok(())
            }
            Some(Control::Codecs(codecs)) => {
                tracing::debug!(camera = %self.camera, codecs = %codecs, "Server selected codecs");
                Ok(())
            }
            Some(Control::Other(message)) => {
                tracing::trace!(camera = %self.camera, kind = %message.kind, "Ignoring control message");
                Ok(())
            }
            None => {
                tracing::debug!(camera = %self.camera, len = text.len(), "Ignoring malformed control frame");
                Ok(())
            }
        }
    }

    async fn on_fragment(&self, data: &[u8], sink: &mut Option<ByteSink>) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        if sink.is_none() {
            let created = ByteSink::create(&self.config.sink_dir, &self.config.sink_extension).await?;
            let _ = self.sink_path.set(created.path().to_path_buf());
            *sink = Some(created);
        }
        let Some(sink) = sink.as_mut() else {
            return Ok(());
        };

        sink.append(data).await?;

        let len = data.len();
        self.sink_len.send_replace(sink.len());
        self.stats.send_modify(|s| s.on_fragment(len));

        let path = sink.path();
        let became_ready = self.status.send_if_modified(|status| {
            if matches!(status, RelayStatus::Pending) {
                *status = RelayStatus::Ready(path.to_path_buf());
                true
            } else {
                false
            }
        });
        if became_ready {
            tracing::info!(camera = %self.camera, path = %path.display(), "Live relay ready");
            let _ = self.events.send(RelayEvent::Ready(path.to_path_buf()));
        }

        let _ = self.events.send(RelayEvent::Fragment { len });
        Ok(())
    }

    /// First-fragment watchdog; fires at most once
    fn spawn_watchdog(self: &Arc<Self>, token: CancellationToken) {
        let relay = Arc::clone(self);
        let window = self.config.first_fragment_timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(window) => {
                    if relay.stats.borrow().fragments == 0 {
                        tracing::warn!(
                            camera = %relay.camera,
                            timeout = ?window,
                            "No media before first-fragment timeout"
                        );
                        relay.fail(Error::Timeout(window));
                        token.cancel();
                    }
                }
            }
        });
    }

    fn set_phase(&self, next: RelayPhase) {
        self.phase.send_if_modified(|phase| {
            if !phase.can_transition(next) {
                return false;
            }
            tracing::trace!(camera = %self.camera, from = ?*phase, to = ?next, "Relay phase");
            *phase = next;
            true
        });
    }

    /// Record a terminal error unless the relay already ended
    fn fail(&self, err: Error) {
        let changed = self.status.send_if_modified(|status| {
            if status.is_terminated() {
                false
            } else {
                *status = RelayStatus::Failed(err.clone());
                true
            }
        });
        if changed {
            tracing::warn!(camera = %self.camera, error = %err, "Live relay failed");
            self.stats.send_modify(|s| s.errors += 1);
            let _ = self.events.send(RelayEvent::Failed(err));
        }
    }

    fn settle_stopped(&self) {
        self.status.send_if_modified(|status| {
            if status.is_terminated() {
                false
            } else {
                *status = RelayStatus::Stopped;
                true
            }
        });
    }
}

impl std::fmt::Debug for LiveRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveRelay")
            .field("camera", &self.camera)
            .field("stream_name", &*self.stream_name.borrow())
            .field("phase", &*self.phase.borrow())
            .field("status", &*self.status.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> RelayConfig {
        // port 9 (discard) is not expected to accept WebSocket upgrades
        RelayConfig::from_base_url("http://127.0.0.1:9")
            .unwrap()
            .connect_timeout(std::time::Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_new_relay_is_idle() {
        let relay = LiveRelay::new("cam1", unreachable_config());

        assert_eq!(relay.camera(), "cam1");
        assert_eq!(relay.phase(), RelayPhase::Idle);
        assert_eq!(relay.status(), RelayStatus::Pending);
        assert!(relay.stream_name().is_none());
        assert!(relay.sink_path().is_none());
        assert!(!relay.is_terminated());
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let relay = LiveRelay::new("cam1", unreachable_config());

        relay.stop();

        assert_eq!(relay.phase(), RelayPhase::Closed);
        assert_eq!(relay.status(), RelayStatus::Stopped);
        assert_eq!(relay.ready().await, Err(Error::Cancelled));
        relay.closed().await;

        // a stopped relay cannot be started
        let result = relay.start("cam1_main", &CancellationToken::new());
        assert_eq!(result, Err(Error::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let relay = LiveRelay::new("cam1", unreachable_config());
        let cancel = CancellationToken::new();

        relay.start("cam1_main", &cancel).unwrap();
        assert_eq!(relay.start("cam1_main", &cancel), Err(Error::AlreadyStarted));

        relay.stop();
        relay.closed().await;
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_with_connection_error() {
        let relay = LiveRelay::new("cam1", unreachable_config());

        relay.start("cam1_main", &CancellationToken::new()).unwrap();

        let result = relay.ready().await;
        assert!(matches!(result, Err(Error::Connection(_))), "{result:?}");
        relay.closed().await;
        assert!(relay.is_terminated());
        // transport errors do not trigger fallback naming
        assert_eq!(relay.stats().attempts, 1);
    }

    #[tokio::test]
    async fn test_parent_cancel_stops_relay() {
        let relay = LiveRelay::new("cam1", unreachable_config());
        let cancel = CancellationToken::new();
        cancel.cancel();

        relay.start("cam1_main", &cancel).unwrap();
        relay.closed().await;

        assert_eq!(relay.status(), RelayStatus::Stopped);
    }
}
