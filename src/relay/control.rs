//! Text control messages on the MSE WebSocket
//!
//! Every text frame in either direction is a small JSON object:
//!
//! ```text
//! client -> server   {"type":"mse","value":"avc1.640029,mp4a.40.2,..."}
//! server -> client   {"type":"mse","value":"video/mp4; codecs=\"avc1.640029\""}
//! server -> client   {"type":"error","value":"streams: stream not found"}
//! ```

use serde::{Deserialize, Serialize};

/// Codecs the reference web player declares, in its order
pub const DEFAULT_CODECS: &[&str] = &[
    "avc1.640029",
    "avc1.64002A",
    "avc1.640033",
    "hvc1.1.6.L153.B0",
    "mp4a.40.2",
    "mp4a.40.5",
    "flac",
    "opus",
];

/// Substring of an error value that means the stream name is unknown
const NOT_FOUND_MARKER: &str = "not found";

/// A JSON control frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    /// Message type (`mse`, `error`, ...)
    #[serde(rename = "type")]
    pub kind: String,

    /// Payload text
    #[serde(default)]
    pub value: String,
}

impl ControlMessage {
    /// Codec negotiation offer sent right after connecting
    pub fn negotiate<S: AsRef<str>>(codecs: &[S]) -> Self {
        let value = codecs
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(",");
        Self {
            kind: "mse".to_string(),
            value,
        }
    }

    /// Serialize to the wire form
    pub fn to_json(&self) -> String {
        // two string fields cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Meaning of an inbound control frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// The requested stream does not exist on the server
    StreamNotFound(String),
    /// Any other error text; the stream keeps going
    Error(String),
    /// Server's codec selection
    Codecs(String),
    /// A message type this client does not act on
    Other(ControlMessage),
}

impl Control {
    /// Parse and classify an inbound text frame.
    ///
    /// Returns `None` for text that is not a control message.
    pub fn parse(text: &str) -> Option<Self> {
        let message: ControlMessage = serde_json::from_str(text).ok()?;

        Some(match message.kind.as_str() {
            "error" if message.value.to_ascii_lowercase().contains(NOT_FOUND_MARKER) => {
                Control::StreamNotFound(message.value)
            }
            "error" => Control::Error(message.value),
            "mse" => Control::Codecs(message.value),
            _ => Control::Other(message),
        })
    }
}
