//! Backend dialing.
//!
//! The dialer is a per-proxy capability: the engine holds an
//! `Arc<dyn Dialer>` and never reaches for a process-wide default.

use std::future::Future;
use std::io;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A bidirectional byte stream the proxy can splice.
pub trait AsyncConn: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> AsyncConn for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased connection.
pub type BoxedConn = Box<dyn AsyncConn>;

/// Opens connections to `(network, address)` pairs.
pub trait Dialer: Send + Sync {
    fn dial<'a>(&'a self, network: &'a str, address: &'a str) -> BoxFuture<'a, io::Result<BoxedConn>>;
}

/// Plain functions and closures of `(network, address)` are dialers too.
impl<F, Fut> Dialer for F
where
    F: Fn(String, String) -> Fut + Send + Sync,
    Fut: Future<Output = io::Result<BoxedConn>> + Send + 'static,
{
    fn dial<'a>(&'a self, network: &'a str, address: &'a str) -> BoxFuture<'a, io::Result<BoxedConn>> {
        Box::pin(self(network.to_string(), address.to_string()))
    }
}

/// Plain TCP dialer used when no other dialer is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial<'a>(&'a self, network: &'a str, address: &'a str) -> BoxFuture<'a, io::Result<BoxedConn>> {
        Box::pin(async move {
            let stream = connect_tcp(network, address).await?;
            Ok(Box::new(stream) as BoxedConn)
        })
    }
}

/// Connect a TCP stream, rejecting non-TCP networks.
pub async fn connect_tcp(network: &str, address: &str) -> io::Result<TcpStream> {
    match network {
        "tcp" | "tcp4" | "tcp6" => {}
        other => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported network {:?}", other),
            ))
        }
    }

    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    tracing::trace!(address = %address, "Backend connection established");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_dialer_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            buf
        });

        let mut conn = TcpDialer.dial("tcp", &addr).await.unwrap();
        conn.write_all(b"ping").await.unwrap();
        assert_eq!(&accept.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn rejects_unknown_network() {
        let err = match TcpDialer.dial("udp", "127.0.0.1:1").await {
            Err(e) => e,
            Ok(_) => panic!("udp dial should fail"),
        };
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn closure_dialer() {
        let dialer = |network: String, address: String| async move {
            assert_eq!(network, "tcp");
            assert_eq!(address, "ignored:80");
            let (near, _far) = tokio::io::duplex(64);
            Ok::<BoxedConn, io::Error>(Box::new(near))
        };
        assert!(dialer.dial("tcp", "ignored:80").await.is_ok());
    }
}
