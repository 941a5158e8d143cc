//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tomado_sync_protocol::{millis_to_iso, now_millis, Method, RemoteRequest, RemoteResponse};

/// A sync transport sends requests to the REST service.
///
/// This trait abstracts the network layer so the pipelines can run against
/// HTTP, an in-memory server or a scripted mock.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Executes one request, authenticating with `token` when given.
    ///
    /// Non-2xx statuses are returned as responses; only failures to get a
    /// response at all are errors.
    async fn execute(
        &self,
        request: &RemoteRequest,
        token: Option<&str>,
    ) -> SyncResult<RemoteResponse>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for std::sync::Arc<T> {
    async fn execute(
        &self,
        request: &RemoteRequest,
        token: Option<&str>,
    ) -> SyncResult<RemoteResponse> {
        (**self).execute(request, token).await
    }
}

/// A scripted answer of the [`MockTransport`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with this response.
    Respond(RemoteResponse),
    /// Fail without a response.
    Fail {
        /// Error message.
        message: String,
        /// Whether the failure is retryable.
        retryable: bool,
    },
}

impl MockReply {
    /// A bodiless response with the given status.
    pub fn status(status: u16) -> Self {
        MockReply::Respond(RemoteResponse::status(status))
    }

    /// A 200 response with the given body.
    pub fn ok(body: Value) -> Self {
        MockReply::Respond(RemoteResponse::ok(body))
    }

    /// A retryable network failure.
    pub fn network_error(message: impl Into<String>) -> Self {
        MockReply::Fail {
            message: message.into(),
            retryable: true,
        }
    }
}

/// A request seen by the [`MockTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// The request.
    pub request: RemoteRequest,
    /// Bearer token it carried.
    pub token: Option<String>,
}

/// A mock transport for testing.
///
/// Replies are looked up per method and path: queued one-shot replies
/// first, then a sticky reply, then a default. By default GET returns an
/// empty collection, POST and PATCH echo the body with a fresh
/// `updated_at`, and DELETE returns 204.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    latency: Mutex<Option<Duration>>,
    queued: Mutex<HashMap<(Method, String), VecDeque<MockReply>>>,
    sticky: Mutex<HashMap<(Method, String), MockReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            latency: Mutex::new(None),
            queued: Mutex::new(HashMap::new()),
            sticky: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a one-shot reply for `method path`.
    pub fn enqueue_reply(&self, method: Method, path: impl Into<String>, reply: MockReply) {
        self.queued
            .lock()
            .entry((method, path.into()))
            .or_default()
            .push_back(reply);
    }

    /// Sets the reply used for `method path` whenever nothing is queued.
    pub fn set_reply(&self, method: Method, path: impl Into<String>, reply: MockReply) {
        self.sticky.lock().insert((method, path.into()), reply);
    }

    /// Sets the connected state. A disconnected mock fails every request.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Delays every reply by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Returns every request seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Returns the requests seen with the given method.
    pub fn requests_with(&self, method: Method) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.request.method == method)
            .cloned()
            .collect()
    }

    /// Forgets recorded requests.
    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    fn reply_for(&self, request: &RemoteRequest) -> MockReply {
        let key = (request.method, request.path.clone());
        if let Some(reply) = self.queued.lock().get_mut(&key).and_then(VecDeque::pop_front) {
            return reply;
        }
        if let Some(reply) = self.sticky.lock().get(&key) {
            return reply.clone();
        }
        default_reply(request)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn default_reply(request: &RemoteRequest) -> MockReply {
    match request.method {
        Method::Get => MockReply::ok(Value::Array(Vec::new())),
        Method::Delete => MockReply::status(204),
        Method::Post | Method::Patch => {
            let mut body = match &request.body {
                Some(Value::Object(map)) => map.clone(),
                _ => serde_json::Map::new(),
            };
            if let Ok(now) = millis_to_iso(now_millis()) {
                body.insert("updated_at".into(), Value::String(now));
            }
            let status = if request.method == Method::Post { 201 } else { 200 };
            MockReply::Respond(RemoteResponse::new(status, Some(Value::Object(body))))
        }
    }
}

#[async_trait]
impl SyncTransport for MockTransport {
    async fn execute(
        &self,
        request: &RemoteRequest,
        token: Option<&str>,
    ) -> SyncResult<RemoteResponse> {
        self.requests.lock().push(RecordedRequest {
            request: request.clone(),
            token: token.map(str::to_string),
        });

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }

        match self.reply_for(request) {
            MockReply::Respond(response) => Ok(response),
            MockReply::Fail { message, retryable } => Err(SyncError::Transport { message, retryable }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get(path: &str) -> RemoteRequest {
        RemoteRequest {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    #[tokio::test]
    async fn mock_defaults() {
        let transport = MockTransport::new();

        let response = transport.execute(&get("/tasks"), None).await.unwrap();
        assert_eq!(response.body, Some(json!([])));

        let post = RemoteRequest {
            method: Method::Post,
            path: "/tasks".into(),
            query: Vec::new(),
            body: Some(json!({ "id": "t-1" })),
        };
        let response = transport.execute(&post, Some("tok")).await.unwrap();
        assert_eq!(response.status, 201);
        let body = response.body.unwrap();
        assert_eq!(body["id"], json!("t-1"));
        assert!(body["updated_at"].is_string());

        let seen = transport.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].token.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn queued_replies_before_sticky() {
        let transport = MockTransport::new();
        transport.set_reply(Method::Get, "/tags", MockReply::status(500));
        transport.enqueue_reply(Method::Get, "/tags", MockReply::ok(json!([{ "id": "a" }])));

        let first = transport.execute(&get("/tags"), None).await.unwrap();
        assert_eq!(first.status, 200);
        let second = transport.execute(&get("/tags"), None).await.unwrap();
        assert_eq!(second.status, 500);
        let third = transport.execute(&get("/tags"), None).await.unwrap();
        assert_eq!(third.status, 500);
    }

    #[tokio::test]
    async fn mock_disconnected() {
        let transport = MockTransport::new();
        transport.set_connected(false);
        let err = transport.execute(&get("/tasks"), None).await.unwrap_err();
        assert!(matches!(err, SyncError::NotConnected));

        transport.set_connected(true);
        transport.enqueue_reply(Method::Get, "/tasks", MockReply::network_error("reset"));
        let err = transport.execute(&get("/tasks"), None).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
