//! The Transform Layer.
//!
//! Maps records between the local representation (camelCase keys, epoch
//! millisecond timestamps) and the wire representation (snake_case keys,
//! ISO-8601 strings). Both directions are pure functions driven by the
//! entity's field-mapping table.

use crate::entity::{EntityType, FieldKind, FieldSpec};
use crate::error::{ProtocolError, ProtocolResult};
use crate::timestamp::{iso_to_millis, millis_to_iso};
use serde_json::Value;

/// A record: a JSON object keyed by field name.
pub type Record = serde_json::Map<String, Value>;

/// Local-only sync bookkeeping. Never transmitted.
pub const SYNC_METADATA_FIELDS: [&str; 5] = [
    "isSynced",
    "syncStatus",
    "localUpdatedAt",
    "serverUpdatedAt",
    "isDeleted",
];

/// Returns true if `key` names a local sync metadata field.
pub fn is_sync_metadata(key: &str) -> bool {
    SYNC_METADATA_FIELDS.contains(&key)
}

/// Converts a local record into its wire form.
///
/// Sync metadata is stripped. Mapped fields are renamed, and timestamp
/// fields are rendered as ISO-8601. Unmapped fields pass through as-is.
pub fn to_wire(entity_type: EntityType, record: &Record) -> ProtocolResult<Record> {
    let mut wire = Record::new();
    for (key, value) in record {
        if is_sync_metadata(key) {
            continue;
        }
        match entity_type.field_by_local(key) {
            Some(spec) => {
                wire.insert(spec.wire.to_string(), encode(spec, key, value)?);
            }
            None => {
                wire.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(wire)
}

/// Converts a wire record into its local form.
///
/// The record must carry a string `id`. Local metadata keys are dropped
/// even if the server sends them.
pub fn from_wire(entity_type: EntityType, wire: &Record) -> ProtocolResult<Record> {
    let mut local = Record::new();
    for (key, value) in wire {
        match entity_type.field_by_wire(key) {
            Some(spec) => {
                local.insert(spec.local.to_string(), decode(spec, key, value)?);
            }
            None if is_sync_metadata(key) => {}
            None => {
                local.insert(key.clone(), value.clone());
            }
        }
    }
    record_id(&local)?;
    Ok(local)
}

/// Returns the record's `id` field.
pub fn record_id(record: &Record) -> ProtocolResult<&str> {
    record
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProtocolError::MissingField("id".into()))
}

fn encode(spec: &FieldSpec, key: &str, value: &Value) -> ProtocolResult<Value> {
    if spec.kind == FieldKind::Plain {
        return Ok(value.clone());
    }
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => {
            let millis = n.as_i64().ok_or_else(|| invalid(key, value))?;
            millis_to_iso(millis)
                .map(Value::String)
                .map_err(|_| invalid(key, value))
        }
        // Already ISO: normalize it so the wire always sees one format.
        Value::String(s) => {
            let millis = iso_to_millis(s).map_err(|_| invalid(key, value))?;
            millis_to_iso(millis)
                .map(Value::String)
                .map_err(|_| invalid(key, value))
        }
        _ => Err(invalid(key, value)),
    }
}

fn decode(spec: &FieldSpec, key: &str, value: &Value) -> ProtocolResult<Value> {
    if spec.kind == FieldKind::Plain {
        return Ok(value.clone());
    }
    match value {
        Value::Null => Ok(Value::Null),
        Value::String(s) => iso_to_millis(s)
            .map(Value::from)
            .map_err(|_| invalid(key, value)),
        Value::Number(n) if n.is_i64() => Ok(value.clone()),
        _ => Err(invalid(key, value)),
    }
}

fn invalid(field: &str, value: &Value) -> ProtocolError {
    ProtocolError::InvalidTimestamp {
        field: field.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn object(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn task_to_wire_renames_and_formats() {
        let local = object(json!({
            "id": "t-1",
            "projectId": "p-1",
            "title": "Write report",
            "position": 3,
            "dueDate": 1_735_689_600_000i64,
            "completedAt": null,
            "isSynced": false,
            "syncStatus": "pending",
            "localUpdatedAt": 1,
            "serverUpdatedAt": null,
            "isDeleted": false,
        }));

        let wire = to_wire(EntityType::Task, &local).unwrap();

        assert_eq!(
            Value::Object(wire),
            json!({
                "id": "t-1",
                "project_id": "p-1",
                "title": "Write report",
                "sort_order": 3,
                "due_date": "2025-01-01T00:00:00.000Z",
                "completed_at": null,
            })
        );
    }

    #[test]
    fn from_wire_parses_timestamps_and_drops_metadata() {
        let wire = object(json!({
            "id": "s-1",
            "task_id": "t-1",
            "started_at": "2025-01-01T00:00:00Z",
            "duration_minutes": 25,
            "is_synced": true,
            "isSynced": true,
        }));

        let local = from_wire(EntityType::PomodoroSession, &wire).unwrap();

        assert_eq!(local["taskId"], json!("t-1"));
        assert_eq!(local["startedAt"], json!(1_735_689_600_000i64));
        assert_eq!(local["durationMinutes"], json!(25));
        assert!(!local.contains_key("isSynced"));
        // Unmapped wire keys are kept under their own name.
        assert_eq!(local["is_synced"], json!(true));
    }

    #[test]
    fn from_wire_requires_id() {
        let wire = object(json!({ "name": "Home" }));
        assert_eq!(
            from_wire(EntityType::Workspace, &wire),
            Err(ProtocolError::MissingField("id".into()))
        );
    }

    #[test]
    fn bad_timestamp_is_reported_with_field() {
        let local = object(json!({ "id": "p", "dueDate": true }));
        match to_wire(EntityType::Project, &local) {
            Err(ProtocolError::InvalidTimestamp { field, .. }) => assert_eq!(field, "dueDate"),
            other => panic!("unexpected: {other:?}"),
        }

        let wire = object(json!({ "id": "p", "due_date": "soon" }));
        assert!(from_wire(EntityType::Project, &wire).is_err());
    }

    #[test]
    fn unmapped_local_fields_pass_through() {
        let local = object(json!({ "id": "w", "theme": { "dark": true } }));
        let wire = to_wire(EntityType::Workspace, &local).unwrap();
        assert_eq!(wire["theme"], json!({ "dark": true }));
    }

    fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
        prop::sample::select(EntityType::PULL_ORDER.to_vec())
    }

    fn field_value(kind: FieldKind) -> BoxedStrategy<Value> {
        match kind {
            FieldKind::Timestamp => prop_oneof![
                Just(Value::Null),
                (0i64..4_102_444_800_000).prop_map(Value::from),
            ]
            .boxed(),
            FieldKind::Plain => prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::from),
                any::<i64>().prop_map(Value::from),
                "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
            ]
            .boxed(),
        }
    }

    fn local_record(entity_type: EntityType) -> BoxedStrategy<Record> {
        let specs: Vec<&'static FieldSpec> = entity_type
            .fields()
            .iter()
            .filter(|f| f.local != "id")
            .collect();
        let values: Vec<_> = specs
            .iter()
            .map(|spec| prop::option::of(field_value(spec.kind)))
            .collect();
        ("[a-z0-9-]{1,12}", values)
            .prop_map(move |(id, values)| {
                let mut record = Record::new();
                record.insert("id".into(), Value::from(id));
                for (spec, value) in specs.iter().zip(values) {
                    if let Some(value) = value {
                        record.insert(spec.local.to_string(), value);
                    }
                }
                record
            })
            .boxed()
    }

    proptest! {
        #[test]
        fn from_wire_inverts_to_wire(
            (entity_type, record) in entity_type_strategy()
                .prop_flat_map(|t| (Just(t), local_record(t)))
        ) {
            let wire = to_wire(entity_type, &record).unwrap();
            let back = from_wire(entity_type, &wire).unwrap();
            prop_assert_eq!(back, record);
        }
    }
}
