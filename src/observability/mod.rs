//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Forwarding engine diagnostics
//!     → error_log.rs (pluggable sink, tracing by default)
//!     → logging.rs (subscriber setup: pretty or JSON)
//!     → metrics.rs (outcome counters, active sessions, bytes)
//! ```
//!
//! # Design Decisions
//! - The engine never writes to a global logger directly; it receives a sink
//! - Structured fields on every event, session id carried in a span
//! - Metrics go through the `metrics` facade; exporting is opt-in

pub mod error_log;
pub mod logging;
pub mod metrics;

pub use error_log::{ErrorLog, MemoryErrorLog, TracingErrorLog};
