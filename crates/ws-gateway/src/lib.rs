//! WebSocket front for a RethinkDB-style database server.
//!
//! Browsers speak the database's binary wire protocol over a WebSocket.
//! The gateway reassembles that byte stream into frames, re-keys the
//! handshake with the gateway's own backend credential, and forwards each
//! query only after the [`query_policy::QueryAuthorizer`] accepts it.
//! Responses from the database are relayed back untouched.
//!
//! # Architecture
//!
//! ```text
//! Client  <--WS-->  ws-gateway  <--TCP/TLS-->  database
//!                       |
//!                 [Authorizer]
//!                       |
//!                 [Audit Sink]
//! ```
//!
//! Each connection owns its backend socket. Queries are authorized
//! concurrently but forwarded strictly in arrival order; denied queries are
//! dropped without a reply.

pub mod backend;
pub mod connection;
mod error;
pub mod framing;
pub mod listener;
pub mod session;

pub use backend::{BackendConfig, TlsOptions};
pub use connection::{
    ClientEncoding, CloseReason, Connection, ConnectionContext, ConnectionSettings,
    ConnectionState, LoggingMode, MAX_IN_FLIGHT,
};
pub use error::GatewayError;
pub use framing::{Frame, Framer, FramingError, HandshakeError};
pub use listener::{Gateway, GatewayConfig};
pub use session::{ConnectionMetadata, EmptySession, SessionCreator, UrlParamsSession};
