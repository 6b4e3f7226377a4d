//! Growing byte sink
//!
//! Media fragments are appended to a temp file that a playback component
//! opens by path and reads while the relay keeps writing. The relay never
//! deletes the file; whoever plays it back removes it when done.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Prefix of every sink file name
const SINK_PREFIX: &str = "live_";

/// Append-only file with exactly one writer
#[derive(Debug)]
pub struct ByteSink {
    path: PathBuf,
    file: File,
    written: u64,
}

impl ByteSink {
    /// Create a new sink named `live_{random hex}.{extension}` in `dir`
    pub async fn create(dir: &Path, extension: &str) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(sink_file_name(extension));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        tracing::debug!(path = %path.display(), "Byte sink created");

        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    /// Append a fragment and flush it so readers see it immediately
    pub async fn append(&mut self, data: &[u8]) -> Result<()> {
        self.file.write_all(data).await?;
        self.file.flush().await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Location readers open
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    pub fn len(&self) -> u64 {
        self.written
    }

    /// Whether nothing was written yet
    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Flush and close for writing. The file stays on disk.
    pub async fn finish(mut self) -> Result<PathBuf> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        tracing::debug!(
            path = %self.path.display(),
            bytes = self.written,
            "Byte sink closed"
        );
        Ok(self.path)
    }
}

fn sink_file_name(extension: &str) -> String {
    format!("{SINK_PREFIX}{:016x}.{extension}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_pattern() {
        let name = sink_file_name("mp4");

        assert!(name.starts_with("live_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(name.len(), "live_".len() + 16 + ".mp4".len());
        assert_ne!(name, sink_file_name("mp4"));
    }

    #[tokio::test]
    async fn test_append_and_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ByteSink::create(dir.path(), "mp4").await.unwrap();
        assert!(sink.is_empty());

        sink.append(b"ftyp").await.unwrap();
        sink.append(b"moof").await.unwrap();
        assert_eq!(sink.len(), 8);

        // readable while still open
        let contents = tokio::fs::read(sink.path()).await.unwrap();
        assert_eq!(contents, b"ftypmoof");

        let path = sink.finish().await.unwrap();
        assert!(path.exists());
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"ftypmoof");
    }

    #[tokio::test]
    async fn test_creates_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("streams").join("live");

        let sink = ByteSink::create(&nested, "mp4").await.unwrap();

        assert!(sink.path().starts_with(&nested));
    }
}
