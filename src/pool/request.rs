//! Stream requests

use std::fmt;

use crate::relay::naming::{MAIN_SUFFIX, SUB_SUFFIX};

/// Which of a camera's streams to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamVariant {
    /// Primary, full resolution
    #[default]
    Main,
    /// Secondary, reduced resolution
    Sub,
}

impl StreamVariant {
    /// Suffix appended to the camera name
    pub fn suffix(self) -> &'static str {
        match self {
            StreamVariant::Main => MAIN_SUFFIX,
            StreamVariant::Sub => SUB_SUFFIX,
        }
    }
}

/// A consumer's request for a camera stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CameraStreamRequest {
    /// Camera name; the pool key
    pub camera: String,
    /// Requested stream
    pub variant: StreamVariant,
}

impl CameraStreamRequest {
    /// Create a request
    pub fn new(camera: impl Into<String>, variant: StreamVariant) -> Self {
        Self {
            camera: camera.into(),
            variant,
        }
    }

    /// Request the primary stream
    pub fn main(camera: impl Into<String>) -> Self {
        Self::new(camera, StreamVariant::Main)
    }

    /// Request the secondary stream
    pub fn sub(camera: impl Into<String>) -> Self {
        Self::new(camera, StreamVariant::Sub)
    }

    /// Stream name on the server
    pub fn stream_name(&self) -> String {
        format!("{}{}", self.camera, self.variant.suffix())
    }
}

impl fmt::Display for CameraStreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stream_name())
    }
}
