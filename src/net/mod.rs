//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound:
//!     listener.rs (accept loop, connection limits)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (ids, active tracking for drain)
//!     → Hand off to HTTP layer
//!
//! Outbound:
//!     dial.rs (pluggable dialer, plain TCP by default)
//!     tls.rs (TLS dial path for wss backends)
//! ```

pub mod connection;
pub mod dial;
pub mod listener;
pub mod tls;

pub use dial::{AsyncConn, BoxedConn, Dialer, TcpDialer};
