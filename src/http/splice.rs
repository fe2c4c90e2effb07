//! Bidirectional byte splicing between the client and the backend.
//!
//! # Data Flow
//! ```text
//! client ──read──▶ copy task ──write──▶ backend
//! client ◀─write── copy task ◀──read─── backend
//!            │                    │
//!            └──▶ mpsc (cap 2) ◀──┘   first result ends the session
//! ```
//!
//! The session ends as soon as either direction finishes. The other
//! direction is not awaited: both copy tasks are aborted, which drops every
//! half of both connections and closes the sockets. A read or write that is
//! still pending in the slower task is cancelled by the abort rather than
//! left blocked on a closed peer.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::net::dial::BoxedConn;

/// Copy direction of a splice task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ClientToBackend => "client_to_backend",
            Direction::BackendToClient => "backend_to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bytes read from each side over the whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteCounts {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

/// How a spliced session ended.
#[derive(Debug)]
pub struct SpliceOutcome {
    /// Direction that finished first.
    pub direction: Direction,
    /// Bytes copied on success, the terminal I/O error otherwise.
    pub result: io::Result<u64>,
    /// Both directions, including the one cut short.
    pub bytes: ByteCounts,
}

impl SpliceOutcome {
    /// True for clean EOF and for errors that only mean the peer went away.
    pub fn is_clean(&self) -> bool {
        match &self.result {
            Ok(_) => true,
            Err(e) => is_expected_close(e),
        }
    }
}

/// Errors that are part of normal connection teardown.
pub fn is_expected_close(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

/// Aborts both copy tasks when the session goes out of scope.
struct CopyTasks([JoinHandle<()>; 2]);

impl Drop for CopyTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

/// Reader that adds every byte it yields to a shared counter.
struct Metered<R> {
    inner: R,
    count: Arc<AtomicU64>,
}

impl<R: AsyncRead + Unpin> AsyncRead for Metered<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = &poll {
            let read = (buf.filled().len() - before) as u64;
            this.count.fetch_add(read, Ordering::Relaxed);
        }
        poll
    }
}

/// Splice `client` and `backend` until either direction terminates.
pub async fn splice(client: BoxedConn, backend: BoxedConn) -> SpliceOutcome {
    let (client_read, client_write) = tokio::io::split(client);
    let (backend_read, backend_write) = tokio::io::split(backend);

    let client_to_backend = Arc::new(AtomicU64::new(0));
    let backend_to_client = Arc::new(AtomicU64::new(0));

    let (tx, mut rx) = mpsc::channel(2);
    let tasks = CopyTasks([
        spawn_copy(
            Direction::ClientToBackend,
            Metered { inner: client_read, count: Arc::clone(&client_to_backend) },
            backend_write,
            tx.clone(),
        ),
        spawn_copy(
            Direction::BackendToClient,
            Metered { inner: backend_read, count: Arc::clone(&backend_to_client) },
            client_write,
            tx,
        ),
    ]);

    let (direction, result) = match rx.recv().await {
        Some(first) => first,
        // Both senders dropped without sending: the tasks were aborted or panicked.
        None => (
            Direction::ClientToBackend,
            Err(io::Error::other("splice task ended without a result")),
        ),
    };
    drop(tasks);

    SpliceOutcome {
        direction,
        result,
        bytes: ByteCounts {
            client_to_backend: client_to_backend.load(Ordering::Relaxed),
            backend_to_client: backend_to_client.load(Ordering::Relaxed),
        },
    }
}

fn spawn_copy<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    done: mpsc::Sender<(Direction, io::Result<u64>)>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let result = tokio::io::copy(&mut reader, &mut writer).await;
        if let Ok(bytes) = result {
            tracing::trace!(direction = %direction, bytes, "Copy reached EOF");
        }
        // Capacity 2 with one message per task: never blocks.
        let _ = done.send((direction, result)).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn forwards_both_directions_until_client_closes() {
        let (client_near, mut client_far) = duplex(1024);
        let (backend_near, mut backend_far) = duplex(1024);

        let session = tokio::spawn(splice(Box::new(client_near), Box::new(backend_near)));

        client_far.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        backend_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        backend_far.write_all(b"world").await.unwrap();
        client_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world");

        drop(client_far);
        let outcome = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("splice should end when the client closes")
            .unwrap();

        assert_eq!(outcome.direction, Direction::ClientToBackend);
        assert_eq!(outcome.result.as_ref().unwrap(), &5);
        assert!(outcome.is_clean());
        assert_eq!(
            outcome.bytes,
            ByteCounts {
                client_to_backend: 5,
                backend_to_client: 5,
            }
        );
    }

    #[tokio::test]
    async fn counts_bytes_of_the_direction_cut_short() {
        let (client_near, mut client_far) = duplex(1024);
        let (backend_near, mut backend_far) = duplex(1024);

        let session = tokio::spawn(splice(Box::new(client_near), Box::new(backend_near)));

        client_far.write_all(b"request").await.unwrap();
        let mut buf = [0u8; 7];
        backend_far.read_exact(&mut buf).await.unwrap();

        // The backend closes first; the client direction never reaches EOF.
        backend_far.write_all(b"bye").await.unwrap();
        let mut bye = [0u8; 3];
        client_far.read_exact(&mut bye).await.unwrap();
        drop(backend_far);

        let outcome = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.direction, Direction::BackendToClient);
        assert_eq!(outcome.bytes.client_to_backend, 7);
        assert_eq!(outcome.bytes.backend_to_client, 3);
    }

    #[tokio::test]
    async fn first_termination_closes_the_other_side() {
        let (client_near, mut client_far) = duplex(1024);
        let (backend_near, backend_far) = duplex(1024);

        let session = tokio::spawn(splice(Box::new(client_near), Box::new(backend_near)));

        drop(backend_far);
        let outcome = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.direction, Direction::BackendToClient);

        // The client side must observe EOF once the session is torn down.
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), client_far.read_to_end(&mut buf))
            .await
            .expect("client half should be closed");
        assert_eq!(read.unwrap(), 0);
    }

    #[test]
    fn expected_close_kinds() {
        assert!(is_expected_close(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_expected_close(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_expected_close(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }
}
