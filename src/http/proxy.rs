//! WebSocket forwarding engine.
//!
//! # Data Flow
//! ```text
//! Received
//!     → Detected   (406 if not an upgrade request)
//!     → Rewritten  (director maps the URI onto the backend)
//!     → Dialed     (plain dialer, or TLS for wss; 500 on failure)
//!     → Hijacked   (500 if the writer cannot hijack)
//!     → Replayed   (request head + buffered bytes to the backend)
//!     → Spliced    (until either direction ends)
//!     → Closed
//! ```
//!
//! Every failure is terminal for its request and stays contained to it.
//! Connections are owned values, so each exit path releases exactly what it
//! acquired: nothing after a failed dial, the backend after a failed hijack,
//! both after a failed replay or a finished splice.

use std::io;
use std::sync::Arc;

use hyper::{Request, StatusCode};
use tracing::Instrument;

use crate::http::request::OutboundRequest;
use crate::http::response::ResponseWriter;
use crate::http::rewrite::{Destination, Rewrite, Target};
use crate::http::splice::{splice, Direction, SpliceOutcome};
use crate::http::upgrade::is_websocket_request;
use crate::net::connection::ConnectionId;
use crate::net::dial::{BoxedConn, Dialer, TcpDialer};
use crate::net::tls;
use crate::observability::metrics::{self, ActiveSession};
use crate::observability::{ErrorLog, TracingErrorLog};

pub const MSG_NOT_WEBSOCKET: &str = "Can't handle non-WebSocket requests";
pub const MSG_FORWARD_ERROR: &str = "Error forwarding request.";
pub const MSG_NOT_HIJACKER: &str = "Not a hijacker";

/// Terminal state of one request.
#[derive(Debug)]
pub enum Outcome {
    Rejected,
    DialFailed,
    NotHijacker,
    HijackFailed,
    ReplayFailed,
    Spliced(SpliceOutcome),
}

impl Outcome {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Rejected => "rejected",
            Outcome::DialFailed => "dial_failed",
            Outcome::NotHijacker => "not_hijacker",
            Outcome::HijackFailed => "hijack_failed",
            Outcome::ReplayFailed => "replay_failed",
            Outcome::Spliced(_) => "spliced",
        }
    }
}

/// Reverse proxy for WebSocket upgrade requests.
///
/// Built once and shared by reference across requests; holds no per-request
/// state.
#[derive(Clone)]
pub struct WsProxy {
    rewrite: Arc<dyn Rewrite>,
    dialer: Arc<dyn Dialer>,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    error_log: Arc<dyn ErrorLog>,
}

impl WsProxy {
    /// Proxy that forwards every upgrade request to `target`.
    pub fn new(target: Target) -> Self {
        Self {
            rewrite: Arc::new(target),
            dialer: Arc::new(TcpDialer),
            tls_config: None,
            error_log: Arc::new(TracingErrorLog),
        }
    }

    /// Replace the director.
    pub fn with_rewrite(mut self, rewrite: impl Rewrite + 'static) -> Self {
        self.rewrite = Arc::new(rewrite);
        self
    }

    /// Replace the dialer used for plain `ws` backends.
    pub fn with_dialer(mut self, dialer: impl Dialer + 'static) -> Self {
        self.dialer = Arc::new(dialer);
        self
    }

    /// TLS client configuration for `wss` backends.
    pub fn with_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    /// Replace the diagnostics sink.
    pub fn with_error_log(mut self, log: impl ErrorLog + 'static) -> Self {
        self.error_log = Arc::new(log);
        self
    }

    /// Handle one inbound request.
    pub async fn serve(&self, request: Request<()>, writer: &mut dyn ResponseWriter) -> Outcome {
        let session = ConnectionId::new();
        let span = tracing::debug_span!(
            "ws_session",
            session = %session,
            method = %request.method(),
            uri = %request.uri(),
        );

        let outcome = self.forward(&request, writer).instrument(span).await;
        metrics::record_outcome(outcome.as_str());
        outcome
    }

    async fn forward(&self, request: &Request<()>, writer: &mut dyn ResponseWriter) -> Outcome {
        if !is_websocket_request(request.headers()) {
            self.respond(writer, StatusCode::NOT_ACCEPTABLE, MSG_NOT_WEBSOCKET).await;
            self.error_log.log(format_args!("Received non-WebSocket request"));
            return Outcome::Rejected;
        }

        let outbound = OutboundRequest::new(request, self.rewrite.rewrite(request.uri()));
        let destination = &outbound.destination;
        let address = destination.dial_address();

        let mut backend: BoxedConn = match self.dial(destination, &address).await {
            Ok(conn) => conn,
            Err(e) => {
                self.respond(writer, StatusCode::INTERNAL_SERVER_ERROR, MSG_FORWARD_ERROR)
                    .await;
                self.error_log.log(format_args!(
                    "Error dialing websocket backend {}: {}",
                    destination, e
                ));
                return Outcome::DialFailed;
            }
        };
        tracing::debug!(backend = %destination, address = %address, "Backend dialed");

        let hijacked = match writer.as_hijacker() {
            Some(hijacker) => Some(hijacker.hijack().await),
            None => None,
        };

        let client = match hijacked {
            Some(Ok(hijacked)) => hijacked,
            Some(Err(e)) => {
                self.error_log.log(format_args!("Hijack error: {}", e));
                return Outcome::HijackFailed;
            }
            None => {
                self.respond(writer, StatusCode::INTERNAL_SERVER_ERROR, MSG_NOT_HIJACKER)
                    .await;
                self.error_log.log(format_args!(
                    "{}, dropping connection to {}",
                    MSG_NOT_HIJACKER, destination
                ));
                return Outcome::NotHijacker;
            }
        };

        if let Err(e) = outbound.write_to(&mut backend, &client.buffered).await {
            self.error_log
                .log(format_args!("Error copying request to target: {}", e));
            return Outcome::ReplayFailed;
        }

        let _active = ActiveSession::start();
        tracing::debug!(backend = %destination, "Session established");

        let outcome = splice(client.conn, backend).await;
        metrics::record_bytes(Direction::ClientToBackend, outcome.bytes.client_to_backend);
        metrics::record_bytes(Direction::BackendToClient, outcome.bytes.backend_to_client);
        match &outcome.result {
            Ok(_) => {
                tracing::debug!(
                    direction = %outcome.direction,
                    client_to_backend = outcome.bytes.client_to_backend,
                    backend_to_client = outcome.bytes.backend_to_client,
                    "Session closed"
                );
            }
            Err(e) if outcome.is_clean() => {
                tracing::debug!(direction = %outcome.direction, error = %e, "Session closed by peer");
            }
            Err(e) => {
                self.error_log.log(format_args!(
                    "Error forwarding {} for {}: {}",
                    outcome.direction, destination, e
                ));
            }
        }
        Outcome::Spliced(outcome)
    }

    /// TLS for `wss`, the configured dialer otherwise.
    async fn dial(&self, destination: &Destination, address: &str) -> io::Result<BoxedConn> {
        if !destination.is_secure() {
            return self.dialer.dial("tcp", address).await;
        }

        let config = match &self.tls_config {
            Some(config) => Arc::clone(config),
            None => tls::default_client_config().map_err(io::Error::other)?,
        };
        tls::dial_tls(address, config).await
    }

    async fn respond(&self, writer: &mut dyn ResponseWriter, status: StatusCode, message: &str) {
        if let Err(e) = writer.error(status, message).await {
            tracing::debug!(status = status.as_u16(), error = %e, "Failed to write error response");
        }
    }
}

impl std::fmt::Debug for WsProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsProxy")
            .field("tls_config", &self.tls_config.is_some())
            .finish_non_exhaustive()
    }
}
