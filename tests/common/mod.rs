//! In-process stand-in for the backend's MSE WebSocket endpoint

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camrelay::RelayConfig;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// What the server does on a connection for a given stream name
#[derive(Debug, Clone)]
pub enum Script {
    /// Send `n` binary fragments, then hold the connection open
    Fragments(usize),
    /// Reply with a "stream not found" error
    NotFound,
    /// Accept, then never send anything
    Silent,
    /// Send an error notice, then `n` fragments
    Notice(String, usize),
    /// Close right after the codec offer
    Close,
}

/// One accepted WebSocket upgrade
#[derive(Debug, Clone, Default)]
pub struct ConnectionRecord {
    pub source: String,
    pub cookie: Option<String>,
    pub offer: Option<String>,
}

type ScriptFn = dyn Fn(&str) -> Script + Send + Sync;

pub struct MockServer {
    addr: SocketAddr,
    records: Arc<Mutex<Vec<ConnectionRecord>>>,
    task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(script: impl Fn(&str) -> Script + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let records = Arc::new(Mutex::new(Vec::new()));
        let script: Arc<ScriptFn> = Arc::new(script);

        let task = {
            let records = Arc::clone(&records);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let records = Arc::clone(&records);
                    let script = Arc::clone(&script);
                    tokio::spawn(serve(stream, records, script));
                }
            })
        };

        Self {
            addr,
            records,
            task,
        }
    }

    /// Every stream gets the same script
    pub async fn uniform(script: Script) -> Self {
        Self::start(move |_| script.clone()).await
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn sources(&self) -> Vec<String> {
        self.connections().into_iter().map(|c| c.source).collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Payload of the `i`th fragment on a connection
pub fn fragment(i: usize) -> Vec<u8> {
    format!("moof{i:04}").into_bytes()
}

/// Relay config pointing at `server`, writing sinks into `dir`
pub fn relay_config(server: &MockServer, dir: &Path) -> RelayConfig {
    RelayConfig::from_base_url(&server.base_url())
        .unwrap()
        .sink_dir(dir)
        .connect_timeout(Duration::from_secs(2))
        .first_fragment_timeout(Duration::from_secs(3))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn serve(stream: TcpStream, records: Arc<Mutex<Vec<ConnectionRecord>>>, script: Arc<ScriptFn>) {
    let handshake = Mutex::new(ConnectionRecord::default());
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let uri = format!("http://localhost{}", request.uri());
        let source = url::Url::parse(&uri)
            .ok()
            .and_then(|url| url.query_pairs().find(|(k, _)| k == "src").map(|(_, v)| v.into_owned()))
            .unwrap_or_default();
        let cookie = request
            .headers()
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut record = handshake.lock().unwrap();
        record.source = source;
        record.cookie = cookie;
        Ok(response)
    };
    let accepted = tokio_tungstenite::accept_hdr_async(stream, callback).await;
    let Ok(mut ws) = accepted else {
        return;
    };

    let record = handshake.into_inner().unwrap();
    let source = record.source.clone();
    let index = {
        let mut records = records.lock().unwrap();
        records.push(record);
        records.len() - 1
    };

    // codec offer
    if let Some(Ok(Message::Text(offer))) = ws.next().await {
        records.lock().unwrap()[index].offer = Some(offer);
    }

    let send_fragments = |n: usize| (0..n).map(|i| Message::Binary(fragment(i))).collect::<Vec<_>>();
    let outgoing = match script(&source) {
        Script::Fragments(n) => send_fragments(n),
        Script::NotFound => vec![Message::Text(
            r#"{"type":"error","value":"streams: stream not found"}"#.to_string(),
        )],
        Script::Silent => Vec::new(),
        Script::Notice(text, n) => {
            let notice = serde_json::json!({ "type": "error", "value": text }).to_string();
            let mut messages = vec![Message::Text(notice)];
            messages.extend(send_fragments(n));
            messages
        }
        Script::Close => {
            let _ = ws.close(None).await;
            return;
        }
    };

    for message in outgoing {
        if ws.send(message).await.is_err() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // hold until the client goes away
    while let Some(Ok(_)) = ws.next().await {}
}
