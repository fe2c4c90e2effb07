//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{RawQuery, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;

use ws_proxy::config::ServerConfig;
use ws_proxy::http::{HttpServer, Target, WsProxy};
use ws_proxy::lifecycle::Shutdown;
use ws_proxy::net::listener::Listener;
use ws_proxy::net::tls;
use ws_proxy::observability::MemoryErrorLog;

/// What the echo backend observed.
#[derive(Clone, Default)]
pub struct BackendState {
    /// Every request that reached a handler.
    pub hits: Arc<AtomicUsize>,
    /// Raw query strings of WebSocket requests.
    pub queries: Arc<Mutex<Vec<String>>>,
}

impl BackendState {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

/// Start a backend that echoes WebSocket messages on `/dst` and answers
/// anything else with plain HTTP.
pub async fn start_echo_backend() -> (SocketAddr, BackendState) {
    let state = BackendState::default();
    let app = Router::new()
        .route("/dst", get(echo_handler))
        .fallback(plain_handler)
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

async fn echo_handler(
    State(state): State<BackendState>,
    RawQuery(query): RawQuery,
    ws: WebSocketUpgrade,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state.queries.lock().unwrap().push(query.unwrap_or_default());
    ws.on_upgrade(echo)
}

async fn echo(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(_) | Message::Binary(_) => {
                if socket.send(msg).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

async fn plain_handler(State(state): State<BackendState>) -> impl IntoResponse {
    state.hits.fetch_add(1, Ordering::SeqCst);
    "http success"
}

/// A proxy listening on an OS-assigned port.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub log: MemoryErrorLog,
    pub shutdown: Shutdown,
    pub task: tokio::task::JoinHandle<()>,
}

/// Start a proxy forwarding to `target`.
pub async fn start_proxy(target: &str) -> TestProxy {
    let mut config = ServerConfig::default();
    config.upstream.target = target.to_string();
    start_with(config, WsProxy::new(Target::parse(target).unwrap())).await
}

/// Start `proxy` behind a server built from `config` on an OS-assigned port.
pub async fn start_with(mut config: ServerConfig, proxy: WsProxy) -> TestProxy {
    let log = MemoryErrorLog::new();
    let proxy = proxy.with_error_log(log.clone());

    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.drain_secs = 1;

    let listener = Listener::bind(&config.listener).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::with_proxy(config, proxy).unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let task = tokio::spawn(async move {
        server.run(listener, server_shutdown).await.unwrap();
    });

    TestProxy {
        addr,
        log,
        shutdown,
        task,
    }
}

/// An address with nothing listening on it.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Self-signed certificate for `localhost` and `127.0.0.1`, as PEM files.
pub struct TestCert {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

pub fn self_signed_cert(name: &str) -> TestCert {
    let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ])
    .unwrap();

    let dir = std::env::temp_dir().join(format!("ws-proxy-it-{}-{}", name, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();

    TestCert {
        cert_path,
        key_path,
    }
}

/// Start a WebSocket echo backend that only speaks TLS.
pub async fn start_tls_echo_backend(cert: &TestCert) -> SocketAddr {
    let acceptor = tls::acceptor(tls::load_server_config(&cert.cert_path, &cert.key_path).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(stream) = acceptor.accept(socket).await else {
                    return;
                };
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    if msg.is_close() {
                        break;
                    }
                    if (msg.is_text() || msg.is_binary()) && ws.send(msg).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}
