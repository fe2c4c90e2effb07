//! Transparent WebSocket reverse proxy.
//!
//! Upgrade requests are rewritten onto a backend target, the backend is
//! dialed (TLS for `wss`), the client socket is hijacked, the request is
//! replayed and both sockets are spliced until either side closes. Plain
//! HTTP requests are rejected with 406.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::ServerConfig;
pub use http::{HttpServer, Outcome, Target, WsProxy};
pub use lifecycle::Shutdown;
