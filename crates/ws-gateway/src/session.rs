use std::net::SocketAddr;

use async_trait::async_trait;
use http::{HeaderMap, Uri};
use query_policy::Session;
use serde_json::{Map, Value};

/// What is known about a client connection when its session is created.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    pub connection_id: uuid::Uuid,
    pub remote_addr: SocketAddr,
    /// Request URI of the WebSocket upgrade.
    pub uri: Uri,
    /// Headers of the WebSocket upgrade request.
    pub headers: HeaderMap,
}

/// Derives the session value handed to every authorization call made for a
/// connection. Failing is fatal for that connection.
#[async_trait]
pub trait SessionCreator: Send + Sync {
    async fn create(&self, meta: &ConnectionMetadata) -> anyhow::Result<Session>;
}

/// Every connection gets an empty session object.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySession;

#[async_trait]
impl SessionCreator for EmptySession {
    async fn create(&self, _meta: &ConnectionMetadata) -> anyhow::Result<Session> {
        Ok(Value::Object(Map::new()))
    }
}

/// The session is the query string of the upgrade URL as a JSON object of
/// strings. A repeated parameter keeps its last value.
#[derive(Debug, Default, Clone, Copy)]
pub struct UrlParamsSession;

#[async_trait]
impl SessionCreator for UrlParamsSession {
    async fn create(&self, meta: &ConnectionMetadata) -> anyhow::Result<Session> {
        let query = meta.uri.query().unwrap_or_default();
        let params = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect::<Map<_, _>>();
        Ok(Value::Object(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(uri: &str) -> ConnectionMetadata {
        ConnectionMetadata {
            connection_id: uuid::Uuid::new_v4(),
            remote_addr: "127.0.0.1:40000".parse().unwrap(),
            uri: uri.parse().unwrap(),
            headers: HeaderMap::new(),
        }
    }

    #[tokio::test]
    async fn empty_session_is_empty_object() {
        let session = EmptySession.create(&meta("/")).await.unwrap();
        assert_eq!(session, json!({}));
    }

    #[tokio::test]
    async fn url_params_become_session() {
        let session = UrlParamsSession
            .create(&meta("/?curHerdId=7&name=leo%20nardo&name=raph"))
            .await
            .unwrap();
        assert_eq!(session, json!({"curHerdId": "7", "name": "raph"}));
    }

    #[tokio::test]
    async fn no_query_string_gives_empty_object() {
        let session = UrlParamsSession.create(&meta("/")).await.unwrap();
        assert_eq!(session, json!({}));
    }
}
