//! Byte-stream connection to the database server.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::error::GatewayError;

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
    /// Credential sent in the backend handshake; empty for none.
    pub auth_key: Vec<u8>,
    pub tls: Option<TlsOptions>,
}

#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// PEM file with the CA certificates to trust instead of the web PKI roots.
    pub ca_file: Option<PathBuf>,
    /// Name to verify the server certificate against; defaults to the host.
    pub server_name: Option<String>,
}

/// Anything the gateway can use as a backend connection.
pub trait BackendIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BackendIo for T {}

pub type BackendStream = Box<dyn BackendIo>;

/// Open a connection to the backend, with Nagle's algorithm disabled and
/// TLS on top when configured.
pub async fn connect(config: &BackendConfig) -> Result<BackendStream, GatewayError> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .map_err(GatewayError::BackendConnect)?;
    tcp.set_nodelay(true).map_err(GatewayError::BackendConnect)?;

    let Some(tls) = &config.tls else {
        tracing::debug!(host = %config.host, port = config.port, "backend connected");
        return Ok(Box::new(tcp));
    };

    let connector = TlsConnector::from(Arc::new(client_config(tls)?));
    let name = tls.server_name.clone().unwrap_or_else(|| config.host.clone());
    let server_name = ServerName::try_from(name.clone())
        .map_err(|e| GatewayError::Tls(format!("invalid server name '{name}': {e}")))?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(GatewayError::BackendConnect)?;
    tracing::debug!(host = %config.host, port = config.port, server_name = %name, "backend connected over TLS");
    Ok(Box::new(stream))
}

fn client_config(tls: &TlsOptions) -> Result<ClientConfig, GatewayError> {
    let mut roots = RootCertStore::empty();
    match &tls.ca_file {
        Some(path) => {
            let pem = std::fs::read(path).map_err(|e| {
                GatewayError::Tls(format!("failed to read CA file {}: {e}", path.display()))
            })?;
            let mut reader = pem.as_slice();
            for cert in rustls_pemfile::certs(&mut reader) {
                let cert = cert.map_err(|e| {
                    GatewayError::Tls(format!("invalid PEM in {}: {e}", path.display()))
                })?;
                roots
                    .add(cert)
                    .map_err(|e| GatewayError::Tls(format!("rejected CA certificate: {e}")))?;
            }
            if roots.is_empty() {
                return Err(GatewayError::Tls(format!(
                    "no certificates found in {}",
                    path.display()
                )));
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn plain_connection_carries_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            buf
        });

        let config = BackendConfig {
            host: "127.0.0.1".into(),
            port,
            auth_key: Vec::new(),
            tls: None,
        };
        let mut stream = connect(&config).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = BackendConfig {
            host: "127.0.0.1".into(),
            port,
            auth_key: Vec::new(),
            tls: None,
        };
        assert!(matches!(
            connect(&config).await,
            Err(GatewayError::BackendConnect(_))
        ));
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let tls = TlsOptions {
            ca_file: Some("/does/not/exist.pem".into()),
            server_name: None,
        };
        let err = client_config(&tls).unwrap_err();
        assert!(err.to_string().contains("failed to read CA file"), "{err}");
    }

    #[test]
    fn web_pki_roots_by_default() {
        assert!(client_config(&TlsOptions::default()).is_ok());
    }
}
