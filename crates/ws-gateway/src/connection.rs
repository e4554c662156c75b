//! One client connection paired with one backend connection.
//!
//! Bytes from the client are reassembled into frames. Each query frame is
//! authorized asynchronously, but frames are forwarded in arrival order:
//! authorizations queue up in a [`FuturesOrdered`] and only the head of the
//! queue may reach the backend. Backend bytes go to the client untouched.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use audit_log::{AuditEntry, AuditEventType, AuditSink, AuditSource, QueryRecord};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesOrdered, SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use query_policy::{CommandDecision, QueryAuthorizer, Session};
use reql_term::{MalformedQuery, QueryType};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::framing::{self, Frame, FramingError, QueryFrame};

/// Authorizations allowed in flight per connection. While the queue is full
/// the client stream is not read.
pub const MAX_IN_FLIGHT: usize = 256;

const BACKEND_READ_BUF: usize = 16 * 1024;

/// Upper bound on closing both sockets during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const COMPONENT: &str = "ws-gateway";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Active,
    Closed,
}

/// Which events are logged and audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoggingMode {
    /// Every query decision and connection lifecycle event.
    #[default]
    All,
    /// Denied and malformed queries, and rejected handshakes.
    Denied,
    None,
}

impl LoggingMode {
    fn all(self) -> bool {
        self == LoggingMode::All
    }

    fn denied(self) -> bool {
        self != LoggingMode::None
    }
}

/// How bytes travel inside WebSocket messages, chosen by subprotocol at
/// upgrade time.
///
/// Binary messages always carry raw bytes and text messages always carry
/// base64; the encoding decides what the gateway sends back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEncoding {
    Binary,
    Base64,
}

impl ClientEncoding {
    pub fn from_subprotocol(name: &str) -> Option<Self> {
        match name.trim() {
            "binary" => Some(ClientEncoding::Binary),
            "base64" => Some(ClientEncoding::Base64),
            _ => None,
        }
    }

    /// Pick the first supported protocol from a `Sec-WebSocket-Protocol`
    /// header value.
    pub fn negotiate(offered: &str) -> Option<Self> {
        offered.split(',').find_map(Self::from_subprotocol)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClientEncoding::Binary => "binary",
            ClientEncoding::Base64 => "base64",
        }
    }

    fn encode(self, data: Bytes) -> Message {
        match self {
            ClientEncoding::Binary => Message::Binary(data),
            ClientEncoding::Base64 => Message::Text(BASE64.encode(&data).into()),
        }
    }
}

enum Incoming {
    Data(Bytes),
    Close,
    Skip,
}

fn decode_incoming(message: Message) -> Result<Incoming, GatewayError> {
    Ok(match message {
        Message::Binary(data) => Incoming::Data(data),
        Message::Text(text) => Incoming::Data(BASE64.decode(text.as_str())?.into()),
        Message::Close(_) => Incoming::Close,
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Incoming::Skip,
    })
}

/// Why a connection ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    BackendClosed,
}

/// Gateway-wide settings shared by every connection.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub authorizer: Arc<QueryAuthorizer>,
    /// Credential placed in the backend handshake.
    pub backend_auth_key: Bytes,
    pub max_query_bytes: usize,
    pub logging: LoggingMode,
    pub audit: AuditSink,
}

#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub connection_id: uuid::Uuid,
    pub remote_addr: SocketAddr,
    pub encoding: ClientEncoding,
}

impl ConnectionContext {
    pub fn audit_source(&self) -> AuditSource {
        AuditSource::connection(
            COMPONENT,
            self.connection_id.to_string(),
            self.remote_addr.to_string(),
        )
    }
}

struct Authorized {
    frame: QueryFrame,
    result: Result<CommandDecision, MalformedQuery>,
}

type ClientSink<S> = SplitSink<WebSocketStream<S>, Message>;
type ClientStream<S> = SplitStream<WebSocketStream<S>>;

pub struct Connection {
    ctx: ConnectionContext,
    session: Arc<Session>,
    settings: ConnectionSettings,
    state: ConnectionState,
}

impl Connection {
    pub fn new(ctx: ConnectionContext, session: Session, settings: ConnectionSettings) -> Self {
        Self {
            ctx,
            session: Arc::new(session),
            settings,
            state: ConnectionState::Handshaking,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Relay between `client` and `backend` until either side closes or
    /// fails, then close both. Authorizations still pending at that point
    /// are dropped.
    ///
    /// The two directions are driven independently: a blocked write to the
    /// backend never stops backend bytes from reaching the client.
    pub async fn run<S, B>(
        &mut self,
        client: WebSocketStream<S>,
        backend: B,
    ) -> Result<CloseReason, GatewayError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut client_tx, mut client_rx) = client.split();
        let (mut backend_rx, mut backend_tx) = tokio::io::split(backend);
        let encoding = self.ctx.encoding;

        let result = tokio::select! {
            result = self.forward_client(&mut client_rx, &mut backend_tx) => result,
            result = forward_backend(&mut backend_rx, &mut client_tx, encoding) => result,
        };

        if self.close() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, async {
                let _ = client_tx.close().await;
                let _ = backend_tx.shutdown().await;
            })
            .await;
            self.log_closed(&result).await;
        }
        result
    }

    /// Move to [`ConnectionState::Closed`]. Returns `false` if already closed.
    fn close(&mut self) -> bool {
        if self.state == ConnectionState::Closed {
            return false;
        }
        self.state = ConnectionState::Closed;
        true
    }

    /// Client to backend: frame, authorize, forward in arrival order.
    ///
    /// Frames are taken off the framer only while the queue has room; the
    /// rest stay buffered until an authorization completes.
    async fn forward_client<S, B>(
        &mut self,
        client_rx: &mut ClientStream<S>,
        backend_tx: &mut WriteHalf<B>,
    ) -> Result<CloseReason, GatewayError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
        B: AsyncRead + AsyncWrite + Unpin,
    {
        let mut framer = framing::Framer::new(self.settings.max_query_bytes);
        let mut pending: FuturesOrdered<BoxFuture<'static, Authorized>> = FuturesOrdered::new();

        loop {
            while pending.len() < MAX_IN_FLIGHT {
                match self.next_frame(&mut framer).await? {
                    Some(Frame::Handshake(_)) => {
                        let handshake = framing::backend_handshake(&self.settings.backend_auth_key);
                        backend_tx.write_all(&handshake).await?;
                        self.state = ConnectionState::Active;
                        debug!(connection_id = %self.ctx.connection_id, "handshake forwarded to backend");
                    }
                    Some(Frame::Query(frame)) => pending.push_back(self.authorize(frame)),
                    None => break,
                }
            }

            tokio::select! {
                incoming = client_rx.next(), if pending.len() < MAX_IN_FLIGHT => {
                    let message = match incoming {
                        Some(message) => message?,
                        None => return Ok(CloseReason::ClientClosed),
                    };
                    match decode_incoming(message)? {
                        Incoming::Data(data) => framer.push(&data),
                        Incoming::Close => return Ok(CloseReason::ClientClosed),
                        Incoming::Skip => {}
                    }
                }
                Some(outcome) = pending.next(), if !pending.is_empty() => {
                    if self.record(&outcome).await {
                        backend_tx.write_all(&outcome.frame.raw).await?;
                    }
                }
            }
        }
    }

    async fn next_frame(
        &self,
        framer: &mut framing::Framer,
    ) -> Result<Option<Frame>, GatewayError> {
        match framer.next_frame() {
            Ok(frame) => Ok(frame),
            Err(FramingError::Handshake(err)) => {
                if self.settings.logging.denied() {
                    warn!(connection_id = %self.ctx.connection_id, error = %err, "client handshake rejected");
                    self.settings
                        .audit
                        .log(AuditEntry::new(
                            AuditEventType::HandshakeRejected,
                            self.ctx.audit_source(),
                            serde_json::json!({ "error": err.to_string() }),
                        ))
                        .await;
                }
                Err(FramingError::Handshake(err).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn authorize(&self, frame: QueryFrame) -> BoxFuture<'static, Authorized> {
        let authorizer = Arc::clone(&self.settings.authorizer);
        let session = Arc::clone(&self.session);
        Box::pin(async move {
            let result = authorizer.authorize_command(frame.payload(), &session).await;
            Authorized { frame, result }
        })
    }

    /// Log an authorization outcome. Returns whether the frame may be
    /// forwarded.
    async fn record(&self, outcome: &Authorized) -> bool {
        let token = outcome.frame.token;
        let logging = self.settings.logging;
        let command = match &outcome.result {
            Ok(command) => command,
            Err(err) => {
                if logging.denied() {
                    warn!(connection_id = %self.ctx.connection_id, token, error = %err, "malformed query dropped");
                    let record = QueryRecord {
                        token,
                        query_type: None,
                        term: None,
                        wire: None,
                        action: "deny".into(),
                        matched_pattern: None,
                        reason: err.to_string(),
                    };
                    self.audit_query(AuditEventType::QueryMalformed, record).await;
                }
                return false;
            }
        };

        let allowed = command.is_allowed();
        let decision = &command.decision;
        let (event, should_log) = if allowed {
            (AuditEventType::QueryAllowed, logging.all())
        } else {
            (AuditEventType::QueryDenied, logging.denied())
        };
        if !should_log {
            return allowed;
        }

        match (&command.query, command.query_type) {
            (Some(query), _) if allowed => info!(
                connection_id = %self.ctx.connection_id,
                token,
                query = %query.term,
                matched = decision.matched_pattern.as_deref().unwrap_or("-"),
                "query allowed"
            ),
            (Some(query), _) => warn!(
                connection_id = %self.ctx.connection_id,
                token,
                query = %query.term,
                wire = %query.query_json(),
                reason = %decision.reason,
                "query denied"
            ),
            (None, QueryType::Start) => {}
            (None, query_type) => debug!(
                connection_id = %self.ctx.connection_id,
                token,
                %query_type,
                "control message forwarded"
            ),
        }

        let record = QueryRecord {
            token,
            query_type: Some(command.query_type.to_string()),
            term: command.query.as_ref().map(|q| q.term.to_string()),
            wire: command.query.as_ref().map(|q| q.query_json()),
            action: decision.action.as_str().into(),
            matched_pattern: decision.matched_pattern.clone(),
            reason: decision.reason.clone(),
        };
        self.audit_query(event, record).await;
        allowed
    }

    async fn audit_query(&self, event: AuditEventType, record: QueryRecord) {
        self.settings
            .audit
            .log(
                AuditEntry::new(event, self.ctx.audit_source(), serde_json::json!({}))
                    .with_query(record),
            )
            .await;
    }

    async fn log_closed(&self, result: &Result<CloseReason, GatewayError>) {
        let detail = match result {
            Ok(reason) => format!("{reason:?}"),
            Err(err) => err.to_string(),
        };
        match result {
            Ok(_) if self.settings.logging.all() => {
                info!(connection_id = %self.ctx.connection_id, reason = %detail, "connection closed");
            }
            Err(_) if self.settings.logging.denied() => {
                warn!(connection_id = %self.ctx.connection_id, error = %detail, "connection closed on error");
            }
            _ => return,
        }
        self.settings
            .audit
            .log(AuditEntry::new(
                AuditEventType::ConnectionClosed,
                self.ctx.audit_source(),
                serde_json::json!({ "reason": detail }),
            ))
            .await;
    }
}

/// Backend to client: every chunk read is sent as one WebSocket message.
async fn forward_backend<S, B>(
    backend_rx: &mut ReadHalf<B>,
    client_tx: &mut ClientSink<S>,
    encoding: ClientEncoding,
) -> Result<CloseReason, GatewayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(BACKEND_READ_BUF);
    loop {
        buf.reserve(BACKEND_READ_BUF);
        if backend_rx.read_buf(&mut buf).await? == 0 {
            return Ok(CloseReason::BackendClosed);
        }
        client_tx.send(encoding.encode(buf.split().freeze())).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_picks_first_supported() {
        assert_eq!(ClientEncoding::negotiate("base64"), Some(ClientEncoding::Base64));
        assert_eq!(
            ClientEncoding::negotiate("chat, binary, base64"),
            Some(ClientEncoding::Binary)
        );
        assert_eq!(ClientEncoding::negotiate("chat, superchat"), None);
    }

    #[test]
    fn incoming_messages_decode_by_frame_type() {
        let raw = Bytes::from_static(b"\x01\x02");
        assert!(matches!(
            decode_incoming(Message::Binary(raw.clone())).unwrap(),
            Incoming::Data(d) if d == raw
        ));
        assert!(matches!(
            decode_incoming(Message::Text("AQI=".into())).unwrap(),
            Incoming::Data(d) if d == raw
        ));
        assert!(decode_incoming(Message::Text("not base64!".into())).is_err());
        assert!(matches!(decode_incoming(Message::Close(None)).unwrap(), Incoming::Close));
        assert!(matches!(
            decode_incoming(Message::Ping(Bytes::new())).unwrap(),
            Incoming::Skip
        ));
    }

    #[test]
    fn outgoing_encoding() {
        let data = Bytes::from_static(b"\x01\x02");
        assert_eq!(ClientEncoding::Binary.encode(data.clone()), Message::Binary(data.clone()));
        assert_eq!(ClientEncoding::Base64.encode(data), Message::Text("AQI=".into()));
    }

    #[test]
    fn logging_mode_levels() {
        assert!(LoggingMode::All.all() && LoggingMode::All.denied());
        assert!(!LoggingMode::Denied.all() && LoggingMode::Denied.denied());
        assert!(!LoggingMode::None.all() && !LoggingMode::None.denied());
    }

    #[test]
    fn close_is_idempotent() {
        let mut conn = Connection::new(
            ConnectionContext {
                connection_id: uuid::Uuid::new_v4(),
                remote_addr: "127.0.0.1:1".parse().unwrap(),
                encoding: ClientEncoding::Binary,
            },
            Session::Null,
            ConnectionSettings {
                authorizer: Arc::new(QueryAuthorizer::new(Default::default(), false)),
                backend_auth_key: Bytes::new(),
                max_query_bytes: framing::DEFAULT_MAX_QUERY_BYTES,
                logging: LoggingMode::None,
                audit: AuditSink::disabled(),
            },
        );
        assert_eq!(conn.state(), ConnectionState::Handshaking);
        assert!(conn.close());
        assert!(!conn.close());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }
}
