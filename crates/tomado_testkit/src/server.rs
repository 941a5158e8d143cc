//! An in-memory REST server for end-to-end sync tests.
//!
//! `FakeServer` implements [`SyncTransport`] directly, so a coordinator can
//! talk to it without sockets. It stores wire-form (snake_case) records per
//! collection, stamps `updated_at` on every write with a strictly increasing
//! clock and soft-deletes on `DELETE`, so deletions show up in later pulls.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tomado_sync_engine::{SyncResult, SyncTransport};
use tomado_sync_protocol::{
    iso_to_millis, millis_to_iso, now_millis, Method, Record, RemoteRequest, RemoteResponse,
};

#[derive(Default)]
struct ServerState {
    collections: HashMap<String, BTreeMap<String, Record>>,
    clock: i64,
    required_token: Option<String>,
    failures: HashMap<(Method, String), VecDeque<u16>>,
    log: Vec<String>,
}

impl ServerState {
    fn tick(&mut self) -> i64 {
        self.clock = now_millis().max(self.clock + 1);
        self.clock
    }

    fn stamp(&mut self, record: &mut Record) {
        let now = self.tick();
        let iso = millis_to_iso(now).expect("Clock out of range");
        record
            .entry("created_at")
            .or_insert_with(|| Value::String(iso.clone()));
        record.insert("updated_at".into(), Value::String(iso));
    }
}

/// In-memory REST server. Clones share state.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    /// Creates an empty server that accepts any token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects requests whose bearer token is not `token` with 401.
    pub fn require_token(&self, token: impl Into<String>) {
        self.state.lock().required_token = Some(token.into());
    }

    /// Answers the next `count` requests to `method path` with `status`.
    pub fn fail_next(&self, method: Method, path: impl Into<String>, status: u16, count: usize) {
        self.state
            .lock()
            .failures
            .entry((method, path.into()))
            .or_default()
            .extend(std::iter::repeat(status).take(count));
    }

    /// Returns a stored record in wire form.
    pub fn get(&self, endpoint: &str, id: &str) -> Option<Record> {
        self.state
            .lock()
            .collections
            .get(endpoint)
            .and_then(|c| c.get(id))
            .cloned()
    }

    /// Returns every stored record of a collection, deleted ones included.
    pub fn all(&self, endpoint: &str) -> Vec<Record> {
        self.state
            .lock()
            .collections
            .get(endpoint)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Simulates a write by another client: merges `fields` (wire names)
    /// into the record, creating it if needed, and stamps `updated_at`.
    pub fn remote_upsert(&self, endpoint: &str, id: &str, fields: Value) -> Record {
        let mut state = self.state.lock();
        let mut record = state
            .collections
            .get(endpoint)
            .and_then(|c| c.get(id))
            .cloned()
            .unwrap_or_else(|| {
                let mut fresh = Record::new();
                fresh.insert("id".into(), json!(id));
                fresh
            });
        if let Value::Object(fields) = fields {
            record.extend(fields);
        }
        state.stamp(&mut record);
        state
            .collections
            .entry(endpoint.to_string())
            .or_default()
            .insert(id.to_string(), record.clone());
        record
    }

    /// Simulates a deletion by another client.
    pub fn remote_delete(&self, endpoint: &str, id: &str) {
        let now = millis_to_iso(now_millis()).expect("Clock out of range");
        self.remote_upsert(endpoint, id, json!({ "deleted_at": now }));
    }

    /// Returns the requests served so far as `METHOD path` lines.
    pub fn request_log(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Forgets the request log.
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    fn handle(&self, request: &RemoteRequest, token: Option<&str>) -> RemoteResponse {
        let mut state = self.state.lock();
        state.log.push(request.to_string());

        if let Some(required) = &state.required_token {
            if token != Some(required.as_str()) {
                return error(401, "invalid token");
            }
        }
        let key = (request.method, request.path.clone());
        if let Some(status) = state.failures.get_mut(&key).and_then(VecDeque::pop_front) {
            return error(status, "injected failure");
        }

        let mut segments = request.path.trim_start_matches('/').split('/');
        let endpoint = segments.next().unwrap_or_default().to_string();
        let id = match (segments.next(), segments.next()) {
            (None, _) => None,
            (Some(raw), None) => match urlencoding::decode(raw) {
                Ok(id) => Some(id.into_owned()),
                Err(_) => return error(400, "malformed id"),
            },
            (Some(_), Some(_)) => return error(404, "no such route"),
        };

        match (request.method, id) {
            (Method::Get, None) => {
                let since = request
                    .query
                    .iter()
                    .find(|(k, _)| k == "updatedSince")
                    .map(|(_, v)| iso_to_millis(v));
                let since = match since {
                    Some(Ok(ms)) => Some(ms),
                    Some(Err(_)) => return error(400, "bad updatedSince"),
                    None => None,
                };
                let items: Vec<Value> = state
                    .collections
                    .get(&endpoint)
                    .map(|c| {
                        c.values()
                            .filter(|r| match since {
                                Some(since) => updated_at(r).is_some_and(|ts| ts >= since),
                                None => true,
                            })
                            .cloned()
                            .map(Value::Object)
                            .collect()
                    })
                    .unwrap_or_default();
                RemoteResponse::ok(json!({ "data": items }))
            }
            (Method::Post, None) => {
                let Some(Value::Object(mut record)) = request.body.clone() else {
                    return error(400, "body must be an object");
                };
                let Some(id) = record.get("id").and_then(Value::as_str).map(str::to_string) else {
                    return error(422, "id is required");
                };
                state.stamp(&mut record);
                state
                    .collections
                    .entry(endpoint)
                    .or_default()
                    .insert(id, record.clone());
                RemoteResponse::new(201, Some(json!({ "data": record })))
            }
            (Method::Patch, Some(id)) => {
                let Some(Value::Object(fields)) = request.body.clone() else {
                    return error(400, "body must be an object");
                };
                let Some(mut record) = state
                    .collections
                    .get(&endpoint)
                    .and_then(|c| c.get(&id))
                    .cloned()
                else {
                    return error(404, "not found");
                };
                record.extend(fields);
                state.stamp(&mut record);
                state
                    .collections
                    .entry(endpoint)
                    .or_default()
                    .insert(id, record.clone());
                RemoteResponse::ok(Value::Object(record))
            }
            (Method::Delete, Some(id)) => {
                let now = state.tick();
                let Some(record) = state
                    .collections
                    .get_mut(&endpoint)
                    .and_then(|c| c.get_mut(&id))
                else {
                    return error(404, "not found");
                };
                let iso = millis_to_iso(now).expect("Clock out of range");
                record.insert("deleted_at".into(), Value::String(iso.clone()));
                record.insert("updated_at".into(), Value::String(iso));
                RemoteResponse::status(204)
            }
            _ => error(405, "method not allowed"),
        }
    }
}

fn updated_at(record: &Record) -> Option<i64> {
    record
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| iso_to_millis(s).ok())
}

fn error(status: u16, message: &str) -> RemoteResponse {
    RemoteResponse::new(status, Some(json!({ "message": message })))
}

#[async_trait]
impl SyncTransport for FakeServer {
    async fn execute(
        &self,
        request: &RemoteRequest,
        token: Option<&str>,
    ) -> SyncResult<RemoteResponse> {
        Ok(self.handle(request, token))
    }
}
