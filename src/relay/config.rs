//! Relay configuration

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

use super::control::DEFAULT_CODECS;

/// Path of the MSE WebSocket endpoint below the backend base URL
const MSE_WS_PATH: &str = "/live/mse/api/ws";

/// Relay configuration options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Backend base URL (`http://host:port` or `https://host/prefix`)
    pub base_url: Url,

    /// Session cookie sent with the WebSocket upgrade
    pub auth_cookie: Option<String>,

    /// Codecs offered in the negotiation message
    pub codecs: Vec<String>,

    /// WebSocket handshake must complete within this time
    pub connect_timeout: Duration,

    /// First media fragment must arrive within this time after start
    pub first_fragment_timeout: Duration,

    /// Directory for byte sinks
    pub sink_dir: PathBuf,

    /// File extension for byte sinks
    pub sink_extension: String,

    /// Capacity of the per-relay event channel
    pub event_capacity: usize,
}

impl RelayConfig {
    /// Create a config for the given backend
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            auth_cookie: None,
            codecs: DEFAULT_CODECS.iter().map(|c| c.to_string()).collect(),
            connect_timeout: Duration::from_secs(10),
            first_fragment_timeout: Duration::from_secs(15),
            sink_dir: std::env::temp_dir(),
            sink_extension: "mp4".to_string(),
            event_capacity: 64,
        }
    }

    /// Parse the backend base URL and create a config
    pub fn from_base_url(base_url: &str) -> Result<Self> {
        Ok(Self::new(Url::parse(base_url)?))
    }

    /// Set the session cookie
    pub fn auth_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.auth_cookie = Some(cookie.into());
        self
    }

    /// Replace the codec offer
    pub fn codecs<I, S>(mut self, codecs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codecs = codecs.into_iter().map(Into::into).collect();
        self
    }

    /// Set connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set first-fragment timeout
    pub fn first_fragment_timeout(mut self, timeout: Duration) -> Self {
        self.first_fragment_timeout = timeout;
        self
    }

    /// Set the sink directory
    pub fn sink_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sink_dir = dir.into();
        self
    }

    /// Set the sink file extension (without the dot)
    pub fn sink_extension(mut self, ext: impl Into<String>) -> Self {
        self.sink_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    /// WebSocket URL for a stream name.
    ///
    /// The scheme mirrors the backend: `http` becomes `ws`, `https`
    /// becomes `wss`. A path prefix on the base URL is kept.
    pub fn stream_url(&self, stream_name: &str) -> Result<Url> {
        let scheme = match self.base_url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::InvalidUrl(format!(
                    "unsupported scheme '{other}' in {}",
                    self.base_url
                )))
            }
        };

        let mut url = self.base_url.clone();
        url.set_scheme(scheme)
            .map_err(|_| Error::InvalidUrl(format!("cannot use {scheme} for {}", self.base_url)))?;

        let prefix = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{prefix}{MSE_WS_PATH}"));
        url.set_query(None);
        url.set_fragment(None);
        url.query_pairs_mut().append_pair("src", stream_name);

        Ok(url)
    }
}
