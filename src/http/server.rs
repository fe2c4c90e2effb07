//! Host HTTP server for the WebSocket proxy.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Optional inbound TLS handshake
//! - Read one request head per connection, under a deadline
//! - Hand the request and a hijackable writer to the forwarding engine
//! - Stop accepting on shutdown and drain open connections

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use hyper::StatusCode;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::http::proxy::WsProxy;
use crate::http::request::{read_request_head, HeadError};
use crate::http::response::{Http1Conn, ResponseWriter};
use crate::http::rewrite::Target;
use crate::net::connection::ConnectionTracker;
use crate::net::dial::AsyncConn;
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::{self, TlsError};

/// Error type for building the server from configuration.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid upstream target: {0}")]
    Target(#[from] url::ParseError),
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// State shared by every connection task.
struct Shared {
    proxy: WsProxy,
    tls: Option<TlsAcceptor>,
    header_read: Duration,
    max_header_bytes: usize,
}

/// HTTP/1 front end that feeds upgrade requests to a [`WsProxy`].
pub struct HttpServer {
    shared: Arc<Shared>,
    config: ServerConfig,
    tracker: ConnectionTracker,
}

impl HttpServer {
    /// Build the proxy and TLS material described by `config`.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let mut proxy = WsProxy::new(Target::parse(&config.upstream.target)?);
        if let Some(ca_file) = &config.upstream.ca_file {
            proxy = proxy.with_tls_config(tls::client_config_with_ca(Path::new(ca_file))?);
        }
        Self::with_proxy(config, proxy)
    }

    /// Serve with a caller-built proxy; listener settings still come from `config`.
    pub fn with_proxy(config: ServerConfig, proxy: WsProxy) -> Result<Self, ServerError> {
        let tls = match &config.listener.tls {
            Some(tls_config) => Some(tls::acceptor(tls::load_server_config(
                Path::new(&tls_config.cert_path),
                Path::new(&tls_config.key_path),
            )?)),
            None => None,
        };

        let shared = Arc::new(Shared {
            proxy,
            tls,
            header_read: config.timeouts.header_read(),
            max_header_bytes: config.listener.max_header_bytes,
        });

        Ok(Self {
            shared,
            config,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %addr,
            target = %self.config.upstream.target,
            tls = self.shared.tls.is_some(),
            "WebSocket proxy starting"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = self.tracker.track();
                        let shared = Arc::clone(&self.shared);
                        let span = tracing::info_span!("connection", id = %guard.id(), peer = %peer);
                        tokio::spawn(
                            async move {
                                let _permit = permit;
                                let _guard = guard;
                                if let Err(e) = stream.set_nodelay(true) {
                                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                                }
                                handle_connection(shared, stream, peer).await;
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => {
                        // Usually fd exhaustion; back off instead of spinning.
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }

        tracing::info!(
            active = self.tracker.active_count(),
            "Shutdown signal received, draining connections"
        );
        if !self.tracker.wait_for_drain(self.config.timeouts.drain()).await {
            tracing::warn!(
                active = self.tracker.active_count(),
                "Drain deadline passed with connections still open"
            );
        }

        tracing::info!("WebSocket proxy stopped");
        Ok(())
    }
}

async fn handle_connection(shared: Arc<Shared>, stream: tokio::net::TcpStream, peer: SocketAddr) {
    match &shared.tls {
        Some(acceptor) => {
            match tokio::time::timeout(shared.header_read, acceptor.accept(stream)).await {
                Ok(Ok(tls_stream)) => serve_stream(&shared, tls_stream).await,
                Ok(Err(e)) => tracing::debug!(peer = %peer, error = %e, "TLS handshake failed"),
                Err(_) => tracing::debug!(peer = %peer, "TLS handshake timed out"),
            }
        }
        None => serve_stream(&shared, stream).await,
    }
}

async fn serve_stream<S>(shared: &Shared, mut stream: S)
where
    S: AsyncConn + 'static,
{
    let head = tokio::time::timeout(
        shared.header_read,
        read_request_head(&mut stream, shared.max_header_bytes),
    )
    .await;

    let (request, buffered) = match head {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(HeadError::Closed)) => return,
        Ok(Err(HeadError::Io(e))) => {
            tracing::debug!(error = %e, "Failed to read request head");
            return;
        }
        Ok(Err(HeadError::TooLarge(limit))) => {
            tracing::debug!(limit, "Request head too large");
            reply(stream, StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE).await;
            return;
        }
        Ok(Err(HeadError::Malformed(reason))) => {
            tracing::debug!(reason = %reason, "Malformed request head");
            reply(stream, StatusCode::BAD_REQUEST).await;
            return;
        }
        Err(_) => {
            tracing::debug!("Timed out waiting for request head");
            return;
        }
    };

    let mut conn = Http1Conn::new(stream, buffered);
    let outcome = shared.proxy.serve(request, &mut conn).await;
    tracing::debug!(outcome = outcome.as_str(), "Request handled");

    // One request per connection; anything not hijacked is closed here.
    if let Some(mut stream) = conn.into_inner() {
        let _ = stream.shutdown().await;
    }
}

async fn reply<S>(stream: S, status: StatusCode)
where
    S: AsyncConn + 'static,
{
    let mut conn = Http1Conn::new(stream, BytesMut::new());
    let message = status.canonical_reason().unwrap_or("Error");
    if conn.error(status, message).await.is_ok() {
        if let Some(mut stream) = conn.into_inner() {
            let _ = stream.shutdown().await;
        }
    }
}
