use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use audit_log::{AuditEntry, AuditEventType};
use http::header::SEC_WEBSOCKET_PROTOCOL;
use http::{HeaderMap, HeaderValue, StatusCode, Uri};
use query_policy::QueryAuthorizer;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as HsRequest, Response as HsResponse,
};

use crate::backend::{self, BackendConfig};
use crate::connection::{
    ClientEncoding, Connection, ConnectionContext, ConnectionSettings, LoggingMode,
};
use crate::error::GatewayError;
use crate::session::{ConnectionMetadata, SessionCreator};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    /// Only upgrade requests for this path are accepted; others get a 404.
    pub http_path: String,
    pub backend: BackendConfig,
    pub max_query_bytes: usize,
    pub logging: LoggingMode,
}

/// The WebSocket front of the gateway.
///
/// Every accepted client gets its own task, its own session and its own
/// backend connection; only the authorizer and configuration are shared.
pub struct Gateway {
    config: Arc<GatewayConfig>,
    settings: ConnectionSettings,
    sessions: Arc<dyn SessionCreator>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        authorizer: Arc<QueryAuthorizer>,
        sessions: Arc<dyn SessionCreator>,
        audit: audit_log::AuditSink,
    ) -> Self {
        let settings = ConnectionSettings {
            authorizer,
            backend_auth_key: config.backend.auth_key.clone().into(),
            max_query_bytes: config.max_query_bytes,
            logging: config.logging,
            audit,
        };
        Self {
            config: Arc::new(config),
            settings,
            sessions,
        }
    }

    /// Bind `listen_addr` and serve until `shutdown` fires.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<(), GatewayError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), GatewayError> {
        tracing::info!(
            addr = %listener.local_addr()?,
            path = %self.config.http_path,
            "ws-gateway listening"
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, remote_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(%err, "accept failed");
                            continue;
                        }
                    };
                    let config = Arc::clone(&self.config);
                    let settings = self.settings.clone();
                    let sessions = Arc::clone(&self.sessions);
                    tokio::spawn(async move {
                        if let Err(err) =
                            handle_connection(stream, remote_addr, config, settings, sessions).await
                        {
                            tracing::debug!(%remote_addr, %err, "connection handler error");
                        }
                    });
                }
                _ = shutdown.recv() => {
                    tracing::info!("ws-gateway stopped accepting connections");
                    return Ok(());
                }
            }
        }
    }
}

/// What the upgrade callback learned about the request.
struct Upgrade {
    uri: Uri,
    headers: HeaderMap,
    encoding: ClientEncoding,
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    config: Arc<GatewayConfig>,
    settings: ConnectionSettings,
    sessions: Arc<dyn SessionCreator>,
) -> Result<(), GatewayError> {
    let connection_id = uuid::Uuid::new_v4();
    stream.set_nodelay(true)?;

    let captured: Arc<Mutex<Option<Upgrade>>> = Arc::new(Mutex::new(None));
    let captured_cb = Arc::clone(&captured);
    let http_path = config.http_path.clone();

    let callback =
        move |req: &HsRequest, mut response: HsResponse| -> Result<HsResponse, ErrorResponse> {
            if req.uri().path() != http_path {
                tracing::debug!(%remote_addr, path = req.uri().path(), "upgrade for unknown path");
                return Err(error_response(StatusCode::NOT_FOUND, "Not Found"));
            }

            let offered = req
                .headers()
                .get(SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok());
            let encoding = match offered {
                None => ClientEncoding::Binary,
                Some(offered) => {
                    let Some(encoding) = ClientEncoding::negotiate(offered) else {
                        tracing::debug!(%remote_addr, offered, "no supported subprotocol offered");
                        return Err(error_response(
                            StatusCode::BAD_REQUEST,
                            "Unsupported WebSocket subprotocol",
                        ));
                    };
                    response
                        .headers_mut()
                        .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(encoding.as_str()));
                    encoding
                }
            };

            if let Ok(mut guard) = captured_cb.lock() {
                *guard = Some(Upgrade {
                    uri: req.uri().clone(),
                    headers: req.headers().clone(),
                    encoding,
                });
            }
            Ok(response)
        };

    let client = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let upgrade = captured
        .lock()
        .ok()
        .and_then(|mut guard| guard.take())
        .ok_or_else(|| GatewayError::Session(anyhow::anyhow!("upgrade request was not captured")))?;

    let meta = ConnectionMetadata {
        connection_id,
        remote_addr,
        uri: upgrade.uri,
        headers: upgrade.headers,
    };
    let ctx = ConnectionContext {
        connection_id,
        remote_addr,
        encoding: upgrade.encoding,
    };

    let setup = tokio::try_join!(
        async { sessions.create(&meta).await.map_err(GatewayError::Session) },
        backend::connect(&config.backend),
    );
    let (session, backend) = match setup {
        Ok(setup) => setup,
        Err(err) => {
            tracing::warn!(%connection_id, %remote_addr, error = %err, "connection setup failed");
            return Err(err);
        }
    };

    if config.logging == LoggingMode::All {
        tracing::info!(
            %connection_id,
            %remote_addr,
            path = %meta.uri,
            encoding = ctx.encoding.as_str(),
            "client connected"
        );
        settings
            .audit
            .log(AuditEntry::new(
                AuditEventType::ConnectionOpened,
                ctx.audit_source(),
                serde_json::json!({
                    "path": meta.uri.to_string(),
                    "encoding": ctx.encoding.as_str(),
                }),
            ))
            .await;
    }

    let mut connection = Connection::new(ctx, session, settings);
    connection.run(client, backend).await?;
    Ok(())
}

fn error_response(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}
