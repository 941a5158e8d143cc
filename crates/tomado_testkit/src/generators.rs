//! Property-based test generators using proptest.
//!
//! Records are generated in local form (camelCase keys, epoch-ms
//! timestamps), the shape the application writes.

use proptest::prelude::*;
use serde_json::{json, Value};
use tomado_sync_protocol::{EntityType, Record};

/// Strategy for generating an entity type.
pub fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop::sample::select(EntityType::PULL_ORDER.to_vec())
}

/// Strategy for generating an entity id.
pub fn entity_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{4,12}").expect("Invalid regex")
}

/// Strategy for generating a short human-readable text.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Za-z][A-Za-z0-9 ,.!?-]{0,40}").expect("Invalid regex")
}

/// Strategy for generating a timestamp between 2020 and 2030, epoch ms.
pub fn timestamp_strategy() -> impl Strategy<Value = i64> {
    1_577_836_800_000_i64..1_893_456_000_000_i64
}

/// Strategy for generating the non-reference fields of a task.
pub fn task_fields_strategy() -> impl Strategy<Value = Record> {
    (
        text_strategy(),
        prop::option::of(text_strategy()),
        prop::sample::select(vec!["todo", "in_progress", "done"]),
        0i64..1000,
        prop::option::of(timestamp_strategy()),
        0u32..8,
    )
        .prop_map(|(title, description, status, position, due, estimate)| {
            let mut record = Record::new();
            record.insert("title".into(), json!(title));
            record.insert("description".into(), description.map_or(Value::Null, Value::from));
            record.insert("status".into(), json!(status));
            record.insert("position".into(), json!(position));
            record.insert("dueDate".into(), due.map_or(Value::Null, Value::from));
            record.insert("estimatedPomodoros".into(), json!(estimate));
            record
        })
}

/// Strategy for generating a record of `entity_type` without `id` or
/// parent reference.
pub fn fields_strategy(entity_type: EntityType) -> BoxedStrategy<Record> {
    match entity_type {
        EntityType::Task => task_fields_strategy().boxed(),
        EntityType::Workspace | EntityType::Project | EntityType::Tag => {
            (text_strategy(), prop::option::of("#[0-9a-f]{6}"))
                .prop_map(|(name, color)| {
                    let mut record = Record::new();
                    record.insert("name".into(), json!(name));
                    record.insert("color".into(), color.map_or(Value::Null, Value::from));
                    record
                })
                .boxed()
        }
        EntityType::Comment => text_strategy()
            .prop_map(|content| {
                let mut record = Record::new();
                record.insert("content".into(), json!(content));
                record
            })
            .boxed(),
        EntityType::PomodoroSession => (timestamp_strategy(), 1u32..90, any::<bool>())
            .prop_map(|(started, minutes, completed)| {
                let mut record = Record::new();
                record.insert("startedAt".into(), json!(started));
                record.insert("endedAt".into(), json!(started + i64::from(minutes) * 60_000));
                record.insert("durationMinutes".into(), json!(minutes));
                record.insert("sessionType".into(), json!("work"));
                record.insert("completed".into(), json!(completed));
                record
            })
            .boxed(),
    }
}

/// One local mutation in a generated edit script.
#[derive(Debug, Clone)]
pub enum LocalEdit {
    /// Create or update the workspace with this index.
    UpsertWorkspace(usize, Record),
    /// Create or update a task with this index under the shared project.
    UpsertTask(usize, Record),
    /// Delete the task with this index, if it exists.
    DeleteTask(usize),
}

/// Strategy for generating an edit script touching a few workspaces and
/// tasks, with repeated edits to the same entities.
pub fn edit_script_strategy(max_len: usize) -> impl Strategy<Value = Vec<LocalEdit>> {
    let edit = prop_oneof![
        1 => (0usize..3, fields_strategy(EntityType::Workspace))
            .prop_map(|(i, r)| LocalEdit::UpsertWorkspace(i, r)),
        3 => (0usize..4, task_fields_strategy()).prop_map(|(i, r)| LocalEdit::UpsertTask(i, r)),
        1 => (0usize..4).prop_map(LocalEdit::DeleteTask),
    ];
    prop::collection::vec(edit, 1..max_len.max(2))
}
