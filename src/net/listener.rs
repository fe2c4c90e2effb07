//! TCP listener with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),
    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
}

/// A bounded TCP listener that limits concurrent connections.
///
/// When the limit is reached, `accept` waits until a slot becomes available.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        Ok(Self::from_tcp(listener, config.max_connections))
    }

    /// Wrap an already bound listener.
    pub fn from_tcp(listener: TcpListener, max_connections: usize) -> Self {
        if let Ok(local_addr) = listener.local_addr() {
            tracing::info!(
                address = %local_addr,
                max_connections,
                "Listener bound"
            );
        }

        Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// The returned permit must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // The semaphore is never closed, so acquisition only fails if that changes.
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ListenerError::Accept(std::io::Error::other(e)))?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Currently available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A connection slot, released back to the listener when dropped.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
