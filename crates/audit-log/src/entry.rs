use serde::{Deserialize, Serialize};

/// A single audit log entry representing an event in the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: AuditEventType,
    pub source: AuditSource,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<QueryRecord>,
}

impl AuditEntry {
    /// Create an entry stamped with a fresh UUID v4 and the current UTC time.
    pub fn new(
        event_type: AuditEventType,
        source: AuditSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            details,
            query: None,
        }
    }

    pub fn with_query(mut self, query: QueryRecord) -> Self {
        self.query = Some(query);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    GatewayStarted,
    GatewayStopped,
    WhitelistLoaded,
    ConnectionOpened,
    ConnectionClosed,
    HandshakeRejected,
    QueryAllowed,
    QueryDenied,
    QueryMalformed,
}

/// Where an event happened: the component plus, for per-connection events,
/// the client connection it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSource {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
}

impl AuditSource {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            connection_id: None,
            remote_addr: None,
        }
    }

    pub fn connection(
        component: impl Into<String>,
        connection_id: impl Into<String>,
        remote_addr: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            connection_id: Some(connection_id.into()),
            remote_addr: Some(remote_addr.into()),
        }
    }
}

/// One client query and what was decided about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    /// Client-chosen token of the query message.
    pub token: u64,
    /// START, CONTINUE, STOP or NOREPLY_WAIT; absent when the message could
    /// not be parsed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    /// Readable rendering of the query term, e.g. `TABLE("turtles")`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    /// The query exactly as sent on the wire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wire: Option<serde_json::Value>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    pub reason: String,
}
