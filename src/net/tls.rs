//! TLS configuration and the secure dial path.
//!
//! Backend TLS always verifies the server certificate. The default trust
//! store is the webpki root set; a PEM bundle can extend it.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::net::dial::{connect_tcp, BoxedConn};

/// Errors raised while loading TLS material.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),
    #[error("invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Every config uses ring; the process-level default is ambiguous once a
/// second rustls backend is compiled in.
fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn client_config(roots: RootCertStore) -> Result<Arc<ClientConfig>, TlsError> {
    let config = ClientConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Client configuration trusting the webpki roots.
pub fn default_client_config() -> Result<Arc<ClientConfig>, TlsError> {
    client_config(webpki_roots_store())
}

/// Client configuration trusting the webpki roots plus the certificates in `ca_path`.
pub fn client_config_with_ca(ca_path: &Path) -> Result<Arc<ClientConfig>, TlsError> {
    let mut roots = webpki_roots_store();
    for cert in read_certs(ca_path)? {
        roots.add(cert)?;
    }

    tracing::debug!(path = ?ca_path, roots = roots.len(), "Loaded backend trust store");
    client_config(roots)
}

/// Load the inbound listener's certificate chain and key.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Arc<ServerConfig>, TlsError> {
    let certs = read_certs(cert_path)?;

    let file = File::open(key_path).map_err(|source| TlsError::Io {
        path: key_path.to_path_buf(),
        source,
    })?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsError::Io {
            path: key_path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let config = ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}

/// Acceptor for the inbound listener.
pub fn acceptor(config: Arc<ServerConfig>) -> TlsAcceptor {
    TlsAcceptor::from(config)
}

/// Dial `address` over TCP and complete a TLS handshake on top of it.
pub async fn dial_tls(address: &str, config: Arc<ClientConfig>) -> io::Result<BoxedConn> {
    let server_name = server_name(address)?;
    let tcp = connect_tcp("tcp", address).await?;
    let stream = TlsConnector::from(config).connect(server_name, tcp).await?;

    tracing::trace!(address = %address, "Backend TLS handshake complete");
    Ok(Box::new(stream))
}

/// SNI name for a `host:port` address. IPv6 brackets are stripped.
fn server_name(address: &str) -> io::Result<ServerName<'static>> {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if !port.contains(']') => host,
        _ => address,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

fn webpki_roots_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    roots
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Self-signed certificate for `localhost` and `127.0.0.1`, written as PEM files.
    fn write_self_signed(name: &str) -> (PathBuf, PathBuf) {
        let rcgen::CertifiedKey { cert, key_pair } = rcgen::generate_simple_self_signed(vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
        ])
        .unwrap();

        let dir = std::env::temp_dir().join(format!("ws-proxy-tls-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, cert.pem()).unwrap();
        std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
        (cert_path, key_path)
    }

    /// Accept one TLS connection and echo four bytes back.
    async fn spawn_tls_echo(cert: &Path, key: &Path) -> String {
        let acceptor = acceptor(load_server_config(cert, key).unwrap());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            if let Ok(mut tls) = acceptor.accept(socket).await {
                let mut buf = [0u8; 4];
                if tls.read_exact(&mut buf).await.is_ok() {
                    let _ = tls.write_all(&buf).await;
                    let _ = tls.flush().await;
                }
            }
        });
        addr
    }

    #[test]
    fn server_name_from_address() {
        assert_eq!(
            server_name("example.com:443").unwrap(),
            ServerName::try_from("example.com").unwrap()
        );
        assert!(matches!(
            server_name("[::1]:8443").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            server_name("127.0.0.1:443").unwrap(),
            ServerName::IpAddress(_)
        ));
    }

    #[test]
    fn default_config_has_roots() {
        let config = default_client_config().unwrap();
        assert!(config.alpn_protocols.is_empty());
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let err = client_config_with_ca(Path::new("/nonexistent/ca.pem")).unwrap_err();
        assert!(matches!(err, TlsError::Io { .. }));
    }

    #[tokio::test]
    async fn dials_backend_trusted_through_ca_file() {
        let (cert, key) = write_self_signed("trusted");
        let addr = spawn_tls_echo(&cert, &key).await;

        let mut conn = dial_tls(&addr, client_config_with_ca(&cert).unwrap())
            .await
            .unwrap();
        conn.write_all(b"ping").await.unwrap();
        conn.flush().await.unwrap();

        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn untrusted_certificate_is_rejected() {
        let (cert, key) = write_self_signed("untrusted");
        let addr = spawn_tls_echo(&cert, &key).await;

        assert!(dial_tls(&addr, default_client_config().unwrap()).await.is_err());
    }

    #[test]
    fn key_file_without_key_is_reported() {
        let (cert, _key) = write_self_signed("nokey");
        let err = load_server_config(&cert, &cert).unwrap_err();
        assert!(matches!(err, TlsError::NoPrivateKey(_)));
    }

    #[tokio::test]
    async fn handshake_against_plain_tcp_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let (mut socket, _) = listener.accept().await.unwrap();
            let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
        });

        assert!(dial_tls(&addr, default_client_config().unwrap()).await.is_err());
    }
}
