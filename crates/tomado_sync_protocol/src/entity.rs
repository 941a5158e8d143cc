//! Entity types and their field-mapping tables.
//!
//! Each entity type declares, field by field, how its local name maps to
//! the wire name and whether the value is a timestamp. Fields that are not
//! listed pass through the transform with their key unchanged.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a field's value is converted between local and wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Copied verbatim.
    Plain,
    /// Epoch milliseconds locally, ISO-8601 string on the wire.
    Timestamp,
}

/// One row of an entity's field-mapping table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Local (camelCase) key.
    pub local: &'static str,
    /// Wire (snake_case) key.
    pub wire: &'static str,
    /// Value conversion.
    pub kind: FieldKind,
}

impl FieldSpec {
    const fn plain(local: &'static str, wire: &'static str) -> Self {
        Self {
            local,
            wire,
            kind: FieldKind::Plain,
        }
    }

    const fn timestamp(local: &'static str, wire: &'static str) -> Self {
        Self {
            local,
            wire,
            kind: FieldKind::Timestamp,
        }
    }
}

/// A reference from a child entity to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentRef {
    /// Local field on the child holding the parent's id.
    pub field: &'static str,
    /// Entity type of the parent.
    pub entity_type: EntityType,
}

const ID: FieldSpec = FieldSpec::plain("id", "id");
const CREATED_AT: FieldSpec = FieldSpec::timestamp("createdAt", "created_at");
const UPDATED_AT: FieldSpec = FieldSpec::timestamp("updatedAt", "updated_at");
const DELETED_AT: FieldSpec = FieldSpec::timestamp("deletedAt", "deleted_at");

const WORKSPACE_FIELDS: &[FieldSpec] = &[
    ID,
    CREATED_AT,
    UPDATED_AT,
    DELETED_AT,
    FieldSpec::plain("name", "name"),
    FieldSpec::plain("description", "description"),
    FieldSpec::plain("ownerId", "owner_id"),
];

const PROJECT_FIELDS: &[FieldSpec] = &[
    ID,
    CREATED_AT,
    UPDATED_AT,
    DELETED_AT,
    FieldSpec::plain("workspaceId", "workspace_id"),
    FieldSpec::plain("name", "name"),
    FieldSpec::plain("color", "color"),
    FieldSpec::plain("isArchived", "is_archived"),
    FieldSpec::timestamp("dueDate", "due_date"),
];

const TAG_FIELDS: &[FieldSpec] = &[
    ID,
    CREATED_AT,
    UPDATED_AT,
    DELETED_AT,
    FieldSpec::plain("workspaceId", "workspace_id"),
    FieldSpec::plain("name", "name"),
    FieldSpec::plain("color", "color"),
];

const TASK_FIELDS: &[FieldSpec] = &[
    ID,
    CREATED_AT,
    UPDATED_AT,
    DELETED_AT,
    FieldSpec::plain("projectId", "project_id"),
    FieldSpec::plain("title", "title"),
    FieldSpec::plain("description", "description"),
    FieldSpec::plain("status", "status"),
    FieldSpec::plain("priority", "priority"),
    FieldSpec::timestamp("dueDate", "due_date"),
    FieldSpec::timestamp("completedAt", "completed_at"),
    FieldSpec::plain("estimatedPomodoros", "estimated_pomodoros"),
    // The server orders tasks by `sort_order`; locally it is `position`.
    FieldSpec::plain("position", "sort_order"),
    FieldSpec::plain("tagIds", "tag_ids"),
];

const COMMENT_FIELDS: &[FieldSpec] = &[
    ID,
    CREATED_AT,
    UPDATED_AT,
    DELETED_AT,
    FieldSpec::plain("taskId", "task_id"),
    FieldSpec::plain("authorId", "author_id"),
    FieldSpec::plain("content", "content"),
];

const POMODORO_SESSION_FIELDS: &[FieldSpec] = &[
    ID,
    CREATED_AT,
    UPDATED_AT,
    DELETED_AT,
    FieldSpec::plain("taskId", "task_id"),
    FieldSpec::timestamp("startedAt", "started_at"),
    FieldSpec::timestamp("endedAt", "ended_at"),
    FieldSpec::plain("durationMinutes", "duration_minutes"),
    FieldSpec::plain("sessionType", "session_type"),
    FieldSpec::plain("completed", "completed"),
];

/// A syncable entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A workspace (root of the hierarchy).
    Workspace,
    /// A project inside a workspace.
    Project,
    /// A tag scoped to a workspace.
    Tag,
    /// A task inside a project.
    Task,
    /// A comment on a task.
    Comment,
    /// A pomodoro timer session, optionally bound to a task.
    PomodoroSession,
}

impl EntityType {
    /// All entity types, parents before children.
    ///
    /// Pulls run in this order so that a child never lands before its parent.
    pub const PULL_ORDER: [EntityType; 6] = [
        EntityType::Workspace,
        EntityType::Project,
        EntityType::Tag,
        EntityType::Task,
        EntityType::Comment,
        EntityType::PomodoroSession,
    ];

    /// Returns the canonical name used in the queue and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Workspace => "workspace",
            EntityType::Project => "project",
            EntityType::Tag => "tag",
            EntityType::Task => "task",
            EntityType::Comment => "comment",
            EntityType::PomodoroSession => "pomodoro_session",
        }
    }

    /// Returns the REST collection segment (`<base>/<endpoint>`).
    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityType::Workspace => "workspaces",
            EntityType::Project => "projects",
            EntityType::Tag => "tags",
            EntityType::Task => "tasks",
            EntityType::Comment => "comments",
            EntityType::PomodoroSession => "pomodoro-sessions",
        }
    }

    /// Returns the local table holding rows of this type.
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityType::Workspace => "workspaces",
            EntityType::Project => "projects",
            EntityType::Tag => "tags",
            EntityType::Task => "tasks",
            EntityType::Comment => "comments",
            EntityType::PomodoroSession => "pomodoro_sessions",
        }
    }

    /// Returns the field-mapping table.
    pub fn fields(&self) -> &'static [FieldSpec] {
        match self {
            EntityType::Workspace => WORKSPACE_FIELDS,
            EntityType::Project => PROJECT_FIELDS,
            EntityType::Tag => TAG_FIELDS,
            EntityType::Task => TASK_FIELDS,
            EntityType::Comment => COMMENT_FIELDS,
            EntityType::PomodoroSession => POMODORO_SESSION_FIELDS,
        }
    }

    /// Returns the parent reference that local writes must satisfy.
    pub fn parent(&self) -> Option<ParentRef> {
        let (field, entity_type) = match self {
            EntityType::Workspace => return None,
            EntityType::Project | EntityType::Tag => ("workspaceId", EntityType::Workspace),
            EntityType::Task => ("projectId", EntityType::Project),
            EntityType::Comment | EntityType::PomodoroSession => ("taskId", EntityType::Task),
        };
        Some(ParentRef { field, entity_type })
    }

    /// Looks up a field by its local key.
    pub fn field_by_local(&self, key: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.local == key)
    }

    /// Looks up a field by its wire key.
    pub fn field_by_wire(&self, key: &str) -> Option<&'static FieldSpec> {
        self.fields().iter().find(|f| f.wire == key)
    }
}

impl FromStr for EntityType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s {
            "workspace" => Ok(EntityType::Workspace),
            "project" => Ok(EntityType::Project),
            "tag" => Ok(EntityType::Tag),
            "task" => Ok(EntityType::Task),
            "comment" => Ok(EntityType::Comment),
            "pomodoro_session" | "session" => Ok(EntityType::PomodoroSession),
            other => Err(ProtocolError::UnknownEntityType(other.to_string())),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_parse_back() {
        for entity_type in EntityType::PULL_ORDER {
            assert_eq!(entity_type.as_str().parse::<EntityType>().unwrap(), entity_type);
        }
        assert_eq!(
            "session".parse::<EntityType>().unwrap(),
            EntityType::PomodoroSession
        );
        assert!(matches!(
            "invoice".parse::<EntityType>(),
            Err(ProtocolError::UnknownEntityType(_))
        ));
    }

    #[test]
    fn mapping_tables_are_bijective() {
        for entity_type in EntityType::PULL_ORDER {
            let fields = entity_type.fields();
            let locals: HashSet<_> = fields.iter().map(|f| f.local).collect();
            let wires: HashSet<_> = fields.iter().map(|f| f.wire).collect();
            assert_eq!(locals.len(), fields.len(), "{entity_type}: duplicate local key");
            assert_eq!(wires.len(), fields.len(), "{entity_type}: duplicate wire key");
        }
    }

    #[test]
    fn parents_precede_children_in_pull_order() {
        let position = |t: EntityType| EntityType::PULL_ORDER.iter().position(|p| *p == t);
        for entity_type in EntityType::PULL_ORDER {
            if let Some(parent) = entity_type.parent() {
                assert!(position(parent.entity_type) < position(entity_type));
                assert!(entity_type.field_by_local(parent.field).is_some());
            }
        }
    }

    #[test]
    fn irregular_names_come_from_the_table() {
        let spec = EntityType::Task.field_by_local("position").unwrap();
        assert_eq!(spec.wire, "sort_order");
        assert_eq!(spec.kind, FieldKind::Plain);

        let due = EntityType::Task.field_by_wire("due_date").unwrap();
        assert_eq!(due.local, "dueDate");
        assert_eq!(due.kind, FieldKind::Timestamp);
    }
}
