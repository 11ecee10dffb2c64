//! Locally mirrored remote records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorKind {
    Event,
    Task,
    Employee,
}

crate::impl_domain_status_conversions!(MirrorKind {
    Event => "event",
    Task => "task",
    Employee => "employee",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEventRecord {
    pub external_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub all_day: bool,
    pub organizer_email: Option<String>,
    pub status: Option<String>,
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub project: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub external_id: String,
    pub display_name: String,
    pub work_email: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub employment_status: Option<String>,
    pub remote_updated_at: Option<DateTime<Utc>>,
    pub raw: Value,
}

/// A mirrored row, keyed by (integration id, external id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MirrorRecord {
    Event(CalendarEventRecord),
    Task(TaskRecord),
    Employee(EmployeeRecord),
}

impl MirrorRecord {
    pub fn external_id(&self) -> &str {
        match self {
            Self::Event(r) => &r.external_id,
            Self::Task(r) => &r.external_id,
            Self::Employee(r) => &r.external_id,
        }
    }

    pub const fn kind(&self) -> MirrorKind {
        match self {
            Self::Event(_) => MirrorKind::Event,
            Self::Task(_) => MirrorKind::Task,
            Self::Employee(_) => MirrorKind::Employee,
        }
    }
}

/// A normalized remote change. Every provider-specific removal marker maps to
/// [`RemoteChange::Removed`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    Upsert(MirrorRecord),
    Removed { kind: MirrorKind, external_id: String },
}

impl RemoteChange {
    pub fn external_id(&self) -> &str {
        match self {
            Self::Upsert(record) => record.external_id(),
            Self::Removed { external_id, .. } => external_id,
        }
    }
}
