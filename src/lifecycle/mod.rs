//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Drain connections → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Draining has a deadline; spliced sessions still open after it are dropped

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
