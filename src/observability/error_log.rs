//! Diagnostic sinks for the forwarding engine.

use std::fmt;
use std::sync::{Arc, Mutex};

/// Receives printf-style diagnostics from the proxy.
pub trait ErrorLog: Send + Sync {
    fn log(&self, args: fmt::Arguments<'_>);
}

/// Forwards diagnostics to `tracing` at warn level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorLog;

impl ErrorLog for TracingErrorLog {
    fn log(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(target: "ws_proxy", "{}", args);
    }
}

/// Keeps diagnostics in memory so callers can inspect them.
#[derive(Debug, Clone, Default)]
pub struct MemoryErrorLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far.
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// True if any logged line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl ErrorLog for MemoryErrorLog {
    fn log(&self, args: fmt::Arguments<'_>) {
        let line = args.to_string();
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }
}
