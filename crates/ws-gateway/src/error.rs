use thiserror::Error;

use crate::framing::FramingError;

/// Errors that end a client connection or stop the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error("client transport error: {0}")]
    Client(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("client sent invalid base64: {0}")]
    ClientEncoding(#[from] base64::DecodeError),

    #[error("backend connection failed: {0}")]
    BackendConnect(std::io::Error),

    #[error("backend transport error: {0}")]
    Backend(#[from] std::io::Error),

    #[error("backend TLS setup failed: {0}")]
    Tls(String),

    #[error("session creation failed: {0:#}")]
    Session(anyhow::Error),
}
