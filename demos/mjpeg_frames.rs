//! Split an MJPEG capture into JPEG files
//!
//! Run with: cargo run --example mjpeg_frames INPUT OUT_DIR [BOUNDARY]
//!
//! INPUT is a raw `multipart/x-mixed-replace` body, e.g. saved with
//!   curl -s http://camera/mjpeg > capture.mjpeg

use std::path::PathBuf;

use bytes::Bytes;
use camrelay::{DemuxConfig, MjpegReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(input), Some(out_dir)) = (args.next(), args.next()) else {
        eprintln!("usage: mjpeg_frames INPUT OUT_DIR [BOUNDARY]");
        std::process::exit(2);
    };
    let mut config = DemuxConfig::default();
    if let Some(boundary) = args.next() {
        config = config.boundary(&boundary);
    }

    let out_dir = PathBuf::from(out_dir);
    tokio::fs::create_dir_all(&out_dir).await?;
    let source = tokio::fs::File::open(&input).await?;

    let (tx, mut rx) = mpsc::channel::<Bytes>(16);
    let writer = tokio::spawn(async move {
        let mut count = 0usize;
        while let Some(frame) = rx.recv().await {
            let path = out_dir.join(format!("frame_{count:06}.jpg"));
            if let Err(e) = tokio::fs::write(&path, &frame).await {
                eprintln!("write {}: {e}", path.display());
                break;
            }
            count += 1;
        }
        count
    });

    let mut reader = MjpegReader::new(config);
    let exit = reader.run(source, tx, CancellationToken::new()).await?;
    let written = writer.await?;

    let stats = reader.stats();
    println!(
        "{exit:?}: wrote {written} frames, dropped={} resyncs={} undecodable={}",
        stats.dropped,
        stats.resyncs,
        reader.decode_failures()
    );
    Ok(())
}
