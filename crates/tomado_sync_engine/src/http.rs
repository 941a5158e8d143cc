//! HTTP transport implementation.
//!
//! Sends JSON requests to the REST service with `reqwest`. Every request
//! carries `Content-Type: application/json` and, when a token is set, an
//! `Authorization: Bearer` header.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::time::Duration;
use tomado_sync_protocol::{Method, ProtocolError, RemoteRequest, RemoteResponse};
use tracing::trace;

/// HTTP-based sync transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// Base URL of the REST service (e.g., "https://api.example.com/v1").
    base_url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a new HTTP transport with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        Ok(Self::with_client(base_url, client))
    }

    /// Creates a transport around an existing client.
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn map_send_error(err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout
    } else if err.is_builder() {
        SyncError::transport_fatal(err.to_string())
    } else {
        SyncError::transport_retryable(err.to_string())
    }
}

/// Parses a response body. Error responses keep a non-JSON body as a string
/// so its text can end up in the queue item's error.
fn parse_body(status: u16, bytes: &[u8]) -> SyncResult<Option<Value>> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Ok(Some(value)),
        Err(_) if !(200..300).contains(&status) => Ok(Some(Value::String(
            String::from_utf8_lossy(bytes).into_owned(),
        ))),
        Err(e) => Err(ProtocolError::UnexpectedBody(format!("invalid JSON: {e}")).into()),
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn execute(
        &self,
        request: &RemoteRequest,
        token: Option<&str>,
    ) -> SyncResult<RemoteResponse> {
        let mut builder = self
            .client
            .request(to_reqwest(request.method), self.url(&request.path))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(map_send_error)?;
        trace!(%request, status, len = bytes.len(), "HTTP response");

        Ok(RemoteResponse::new(status, parse_body(status, &bytes)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the raw request text.
    async fn serve_once(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= head_end + 4 + length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let reply = format!(
                "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{addr}/api/"), handle)
    }

    #[tokio::test]
    async fn sends_headers_query_and_body() {
        let (base, server) =
            serve_once("HTTP/1.1 201 Created", r#"{"id":"t-1","updated_at":"2025-01-01T00:00:00Z"}"#)
                .await;
        let transport = HttpTransport::new(base, Duration::from_secs(5)).unwrap();

        let request = RemoteRequest {
            method: Method::Post,
            path: "/tasks".into(),
            query: vec![("updatedSince".into(), "2025-01-01T00:00:00.000Z".into())],
            body: Some(json!({ "id": "t-1" })),
        };
        let response = transport.execute(&request, Some("secret")).await.unwrap();
        assert_eq!(response.status, 201);
        assert_eq!(response.body.unwrap()["id"], json!("t-1"));

        let raw = server.await.unwrap();
        let lower = raw.to_ascii_lowercase();
        assert!(raw.starts_with("POST /api/tasks?updatedSince=2025-01-01T00%3A00%3A00.000Z HTTP/1.1"));
        assert!(lower.contains("authorization: bearer secret"));
        assert!(lower.contains("content-type: application/json"));
        assert!(raw.ends_with(r#"{"id":"t-1"}"#));
    }

    #[tokio::test]
    async fn encoded_entity_id_reaches_the_wire_unchanged() {
        let (base, server) = serve_once("HTTP/1.1 204 No Content", "").await;
        let transport = HttpTransport::new(base, Duration::from_secs(5)).unwrap();

        let request = tomado_sync_protocol::push_request(
            tomado_sync_protocol::EntityType::Task,
            "a#f/b?x=1",
            tomado_sync_protocol::QueueOperation::Delete,
            &serde_json::Map::new(),
        )
        .unwrap();
        let response = transport.execute(&request, None).await.unwrap();
        assert_eq!(response.status, 204);

        let raw = server.await.unwrap();
        assert!(raw.starts_with("DELETE /api/tasks/a%23f%2Fb%3Fx%3D1 HTTP/1.1"));
    }

    #[tokio::test]
    async fn error_status_is_a_response() {
        let (base, server) = serve_once("HTTP/1.1 404 Not Found", "").await;
        let transport = HttpTransport::new(base, Duration::from_secs(5)).unwrap();

        let request = RemoteRequest {
            method: Method::Delete,
            path: "/tags/x".into(),
            query: Vec::new(),
            body: None,
        };
        let response = transport.execute(&request, None).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(response.body.is_none());

        let raw = server.await.unwrap();
        assert!(!raw.to_ascii_lowercase().contains("authorization"));
    }

    #[tokio::test]
    async fn unreachable_server_is_retryable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport =
            HttpTransport::new(format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        let request = RemoteRequest {
            method: Method::Get,
            path: "/tasks".into(),
            query: Vec::new(),
            body: None,
        };
        let err = transport.execute(&request, None).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn body_parsing() {
        assert_eq!(parse_body(204, b"").unwrap(), None);
        assert_eq!(parse_body(200, b"[]").unwrap(), Some(json!([])));
        assert_eq!(
            parse_body(500, b"oops").unwrap(),
            Some(Value::String("oops".into()))
        );
        assert!(parse_body(200, b"oops").is_err());
    }
}
