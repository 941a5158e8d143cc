//! Request and response shapes for the consumed REST surface.

use crate::entity::EntityType;
use crate::error::{ProtocolError, ProtocolResult};
use crate::operation::QueueOperation;
use crate::timestamp::{iso_to_millis, millis_to_iso};
use crate::transform::{to_wire, Record};
use serde_json::Value;
use std::fmt;

/// HTTP method of a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request against the REST service, relative to its base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRequest {
    /// HTTP method.
    pub method: Method,
    /// Path below the base URL, starting with `/`.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<Value>,
}

impl fmt::Display for RemoteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A response from the REST service.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    /// HTTP status code.
    pub status: u16,
    /// Parsed JSON body, if the response had one.
    pub body: Option<Value>,
}

impl RemoteResponse {
    /// Creates a response with the given status and body.
    pub fn new(status: u16, body: Option<Value>) -> Self {
        Self { status, body }
    }

    /// Creates a 200 response with a JSON body.
    pub fn ok(body: Value) -> Self {
        Self::new(200, Some(body))
    }

    /// Creates a bodiless response with the given status.
    pub fn status(status: u16) -> Self {
        Self::new(status, None)
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Builds the request that sends one queued local mutation.
///
/// `create` posts to the collection, `update` patches the entity and
/// `delete` deletes it. The payload is converted with [`to_wire`]. The
/// entity id is percent-encoded into a single path segment.
pub fn push_request(
    entity_type: EntityType,
    entity_id: &str,
    operation: QueueOperation,
    payload: &Record,
) -> ProtocolResult<RemoteRequest> {
    let collection = format!("/{}", entity_type.endpoint());
    let member = || format!("{collection}/{}", urlencoding::encode(entity_id));
    let (path, body) = match operation {
        QueueOperation::Create => (
            collection.clone(),
            Some(Value::Object(to_wire(entity_type, payload)?)),
        ),
        QueueOperation::Update => (member(), Some(Value::Object(to_wire(entity_type, payload)?))),
        QueueOperation::Delete => (member(), None),
    };
    Ok(RemoteRequest {
        method: operation.method(),
        path,
        query: Vec::new(),
        body,
    })
}

/// Builds the request that fetches changes for one entity type.
///
/// Without a checkpoint the filter is omitted and full history is pulled.
pub fn pull_request(entity_type: EntityType, since: Option<i64>) -> ProtocolResult<RemoteRequest> {
    let query = match since {
        Some(millis) => vec![("updatedSince".to_string(), millis_to_iso(millis)?)],
        None => Vec::new(),
    };
    Ok(RemoteRequest {
        method: Method::Get,
        path: format!("/{}", entity_type.endpoint()),
        query,
        body: None,
    })
}

/// Extracts the records of a collection response.
///
/// Accepts a bare array, `{"data": [...]}` or `{"items": [...]}`. A missing
/// body counts as an empty collection.
pub fn parse_collection(body: Option<Value>) -> ProtocolResult<Vec<Record>> {
    let items = match body {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut map)) => match map.remove("data").or_else(|| map.remove("items")) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ProtocolError::UnexpectedBody(
                    "object without a data or items array".into(),
                ))
            }
        },
        Some(other) => return Err(ProtocolError::UnexpectedBody(type_name(&other).into())),
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            _ => Err(ProtocolError::NotAnObject),
        })
        .collect()
}

/// Reads the server's canonical `updated_at` from a create/update response.
///
/// The entity may be returned bare or wrapped in `{"data": {...}}`.
/// Returns `Ok(None)` if the body carries no timestamp.
pub fn server_updated_at(body: Option<&Value>) -> ProtocolResult<Option<i64>> {
    let Some(Value::Object(map)) = body else {
        return Ok(None);
    };
    let entity = match map.get("data") {
        Some(Value::Object(inner)) => inner,
        _ => map,
    };
    match entity.get("updated_at") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => iso_to_millis(s).map(Some).map_err(|_| {
            ProtocolError::InvalidTimestamp {
                field: "updated_at".into(),
                value: s.clone(),
            }
        }),
        Some(Value::Number(n)) => Ok(n.as_i64()),
        Some(other) => Err(ProtocolError::InvalidTimestamp {
            field: "updated_at".into(),
            value: other.to_string(),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
