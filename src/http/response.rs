//! Response side of the inbound connection.
//!
//! # Responsibilities
//! - Write plain-text error responses (406, 500, ...)
//! - Expose the hijack capability: raw ownership of the client socket
//!
//! # Design Decisions
//! - Hijacking is an optional capability probed with `as_hijacker()`
//! - A hijacked connection carries any bytes read past the request head
//! - Once a response is written the connection can no longer be hijacked

use std::io;

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use hyper::StatusCode;
use tokio::io::AsyncWriteExt;

use crate::net::dial::{AsyncConn, BoxedConn};

/// Raw client connection taken over from the HTTP layer.
pub struct Hijacked {
    pub conn: BoxedConn,
    /// Bytes already read from the client beyond the request head.
    pub buffered: Bytes,
}

impl std::fmt::Debug for Hijacked {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hijacked")
            .field("buffered", &self.buffered.len())
            .finish_non_exhaustive()
    }
}

/// Takes raw ownership of the underlying connection.
pub trait Hijacker: Send {
    fn hijack(&mut self) -> BoxFuture<'_, io::Result<Hijacked>>;
}

/// The writer the host HTTP layer hands to the proxy for one request.
pub trait ResponseWriter: Send {
    /// Reply with `status` and a plain-text body of `message`.
    fn error<'a>(&'a mut self, status: StatusCode, message: &'a str) -> BoxFuture<'a, io::Result<()>>;

    /// The hijack capability, if this writer supports it.
    fn as_hijacker(&mut self) -> Option<&mut dyn Hijacker> {
        None
    }
}

/// Serialize a complete plain-text error response.
pub fn encode_error(status: StatusCode, message: &str) -> Vec<u8> {
    let body = format!("{}\n", message);
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         X-Content-Type-Options: nosniff\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        body.len(),
        body
    )
    .into_bytes()
}

/// HTTP/1 response writer over a raw stream. Supports hijacking.
pub struct Http1Conn<S> {
    stream: Option<S>,
    buffered: BytesMut,
    responded: bool,
}

impl<S> Http1Conn<S>
where
    S: AsyncConn + 'static,
{
    /// Wrap `stream`; `buffered` holds bytes read past the request head.
    pub fn new(stream: S, buffered: BytesMut) -> Self {
        Self {
            stream: Some(stream),
            buffered,
            responded: false,
        }
    }

    pub fn is_hijacked(&self) -> bool {
        self.stream.is_none()
    }

    pub fn has_responded(&self) -> bool {
        self.responded
    }

    /// Give the stream back unless it was hijacked.
    pub fn into_inner(self) -> Option<S> {
        self.stream
    }
}

impl<S> ResponseWriter for Http1Conn<S>
where
    S: AsyncConn + 'static,
{
    fn error<'a>(&'a mut self, status: StatusCode, message: &'a str) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or_else(hijacked_error)?;
            self.responded = true;
            stream.write_all(&encode_error(status, message)).await?;
            stream.flush().await
        })
    }

    fn as_hijacker(&mut self) -> Option<&mut dyn Hijacker> {
        Some(self)
    }
}

impl<S> Hijacker for Http1Conn<S>
where
    S: AsyncConn + 'static,
{
    fn hijack(&mut self) -> BoxFuture<'_, io::Result<Hijacked>> {
        Box::pin(async move {
            if self.responded {
                return Err(io::Error::other(
                    "response already written, connection cannot be hijacked",
                ));
            }
            let stream = self.stream.take().ok_or_else(hijacked_error)?;
            Ok(Hijacked {
                conn: Box::new(stream),
                buffered: std::mem::take(&mut self.buffered).freeze(),
            })
        })
    }
}

fn hijacked_error() -> io::Error {
    io::Error::other("connection has been hijacked")
}
