//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept, read request head)
//!     → proxy.rs (forwarding engine)
//!         → upgrade.rs (WebSocket detection)
//!         → rewrite.rs (director: inbound URI → backend destination)
//!         → [net::dial / net::tls] (backend connection)
//!         → response.rs (error replies, hijack of the client socket)
//!         → request.rs (replay of the rewritten request head)
//!         → splice.rs (bidirectional byte copy)
//! ```

pub mod proxy;
pub mod request;
pub mod response;
pub mod rewrite;
pub mod server;
pub mod splice;
pub mod upgrade;

pub use proxy::{Outcome, WsProxy};
pub use response::{Hijacked, Hijacker, Http1Conn, ResponseWriter};
pub use rewrite::{Destination, Rewrite, Target};
pub use server::HttpServer;
pub use upgrade::is_websocket_request;
