//! Request head parsing and replay.
//!
//! # Responsibilities
//! - Read an HTTP/1.x request head off a raw stream (`httparse`)
//! - Keep bytes the client sent past the head for the splice
//! - Build the outbound copy of a request and serialize it for the backend
//!
//! # Design Decisions
//! - The outbound request borrows the inbound header map instead of cloning it;
//!   only the addressing fields are owned by the copy
//! - The inbound `Host` header is replayed unchanged, so the backend sees the
//!   host the client asked for

use bytes::BytesMut;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use hyper::{Method, Request, Version};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::http::rewrite::Destination;

/// Maximum number of header lines accepted in a request head.
pub const MAX_HEADERS: usize = 100;

/// Errors raised while reading a request head.
#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    #[error("i/o error reading request head: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed before a request was received")]
    Closed,
    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),
    #[error("malformed request head: {0}")]
    Malformed(String),
}

impl From<httparse::Error> for HeadError {
    fn from(e: httparse::Error) -> Self {
        match e {
            httparse::Error::TooManyHeaders => HeadError::TooLarge(MAX_HEADERS),
            other => HeadError::Malformed(other.to_string()),
        }
    }
}

/// Read one request head from `stream`.
///
/// Returns the parsed request and whatever was read past the end of the head.
pub async fn read_request_head<S>(
    stream: &mut S,
    max_bytes: usize,
) -> Result<(Request<()>, BytesMut), HeadError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(if buf.is_empty() {
                HeadError::Closed
            } else {
                HeadError::Malformed("connection closed mid-head".to_string())
            });
        }

        if let Some((request, head_len)) = parse_head(&buf)? {
            let rest = buf.split_off(head_len);
            return Ok((request, rest));
        }

        if buf.len() >= max_bytes {
            return Err(HeadError::TooLarge(max_bytes));
        }
    }
}

/// Parse a complete head out of `buf`, or `None` if more bytes are needed.
fn parse_head(buf: &[u8]) -> Result<Option<(Request<()>, usize)>, HeadError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf)? {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let method = Method::from_bytes(req.method.unwrap_or("GET").as_bytes())
        .map_err(|e| HeadError::Malformed(e.to_string()))?;
    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut builder = Request::builder()
        .method(method)
        .uri(req.path.unwrap_or("/"))
        .version(version);

    if let Some(map) = builder.headers_mut() {
        for header in req.headers.iter() {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|e| HeadError::Malformed(e.to_string()))?;
            let value = HeaderValue::from_bytes(header.value)
                .map_err(|e| HeadError::Malformed(e.to_string()))?;
            map.append(name, value);
        }
    }

    let request = builder
        .body(())
        .map_err(|e| HeadError::Malformed(e.to_string()))?;
    Ok(Some((request, head_len)))
}

/// Shallow copy of an inbound request, retargeted at the backend.
#[derive(Debug)]
pub struct OutboundRequest<'a> {
    pub method: Method,
    pub destination: Destination,
    /// Shared with the inbound request.
    pub headers: &'a HeaderMap,
}

impl<'a> OutboundRequest<'a> {
    pub fn new(inbound: &'a Request<()>, destination: Destination) -> Self {
        Self {
            method: inbound.method().clone(),
            destination,
            headers: inbound.headers(),
        }
    }

    /// Request line and headers, terminated by an empty line.
    pub fn encode_head(&self) -> Vec<u8> {
        let mut head = Vec::with_capacity(256);
        head.extend_from_slice(self.method.as_str().as_bytes());
        head.push(b' ');
        head.extend_from_slice(self.destination.request_target().as_bytes());
        head.extend_from_slice(b" HTTP/1.1\r\nHost: ");
        match self.headers.get(HOST) {
            Some(host) => head.extend_from_slice(host.as_bytes()),
            None => head.extend_from_slice(self.destination.host.as_bytes()),
        }
        head.extend_from_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            if name == HOST {
                continue;
            }
            head.extend_from_slice(name.as_str().as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");
        head
    }

    /// Write the head followed by any already-buffered body bytes.
    pub async fn write_to<W>(&self, conn: &mut W, buffered: &[u8]) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        conn.write_all(&self.encode_head()).await?;
        if !buffered.is_empty() {
            conn.write_all(buffered).await?;
        }
        conn.flush().await
    }
}
