//! Relay one camera stream into a local file
//!
//! Run with: cargo run --example watch_camera BASE_URL CAMERA [COOKIE]
//!
//! Examples:
//!   cargo run --example watch_camera http://nvr.local:1984 driveway
//!   cargo run --example watch_camera https://nvr.example.com/go2rtc lobby "session=abc"
//!
//! The printed path can be opened by any player that tolerates a growing
//! fragmented MP4 (e.g. `ffplay -follow 1`). Stop with Ctrl-C.

use camrelay::{CameraStreamRequest, PoolConfig, RelayConfig, RelayEvent, StreamPool};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "camrelay=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(base_url), Some(camera)) = (args.next(), args.next()) else {
        eprintln!("usage: watch_camera BASE_URL CAMERA [COOKIE]");
        std::process::exit(2);
    };

    let mut relay = RelayConfig::from_base_url(&base_url)?;
    if let Some(cookie) = args.next() {
        relay = relay.auth_cookie(cookie);
    }
    let pool = StreamPool::new(PoolConfig::new(relay));

    let cancel = CancellationToken::new();
    let Some(handle) = pool.acquire(CameraStreamRequest::main(&camera), &cancel).await else {
        eprintln!("no relay slot available");
        return Ok(());
    };
    let mut events = handle.events();

    let path = handle.ready().await?;
    println!("Streaming {camera} into {}", path.display());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(RelayEvent::Error(message)) => println!("server notice: {message}"),
                Ok(RelayEvent::Failed(e)) => {
                    println!("relay failed: {e}");
                    break;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    let stats = handle.relay().stats();
    println!(
        "Stats: fragments={} bytes={} bitrate={}bps",
        stats.fragments,
        stats.bytes_received,
        stats.bitrate()
    );

    pool.close().await;
    Ok(())
}
