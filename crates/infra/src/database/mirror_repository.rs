//! SQLCipher-backed local mirror of remote calendar events, tasks and
//! employees.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orgsync_core::MirrorRepository;
use orgsync_domain::{
    CalendarEventRecord, EmployeeRecord, MirrorKind, MirrorRecord, OrgSyncError, RemoteChange,
    Result as DomainResult, TaskRecord,
};
use rusqlite::{params, Row, Transaction};
use serde_json::Value;

use super::manager::{map_sql_error, map_storage_error, DbManager};
use super::rows::{count_to_u64, millis, opt_millis, opt_time_col, usize_to_u64};

pub struct SqlCipherMirrorRepository {
    db: Arc<DbManager>,
}

impl SqlCipherMirrorRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }
}

const fn table(kind: MirrorKind) -> &'static str {
    match kind {
        MirrorKind::Event => "mirrored_events",
        MirrorKind::Task => "mirrored_tasks",
        MirrorKind::Employee => "mirrored_employees",
    }
}

fn raw_json(raw: &Value) -> DomainResult<String> {
    serde_json::to_string(raw).map_err(|e| OrgSyncError::Internal(format!("failed to encode raw record: {e}")))
}

fn upsert(tx: &Transaction<'_>, integration_id: &str, record: &MirrorRecord, synced_at: i64) -> DomainResult<()> {
    match record {
        MirrorRecord::Event(event) => tx.execute(
            "INSERT INTO mirrored_events (
                integration_id, external_id, title, description, starts_at, ends_at, all_day,
                organizer_email, status, remote_updated_at, raw, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(integration_id, external_id) DO UPDATE SET
                title = excluded.title, description = excluded.description,
                starts_at = excluded.starts_at, ends_at = excluded.ends_at,
                all_day = excluded.all_day, organizer_email = excluded.organizer_email,
                status = excluded.status, remote_updated_at = excluded.remote_updated_at,
                raw = excluded.raw, synced_at = excluded.synced_at",
            params![
                integration_id,
                event.external_id,
                event.title,
                event.description,
                opt_millis(event.starts_at),
                opt_millis(event.ends_at),
                event.all_day,
                event.organizer_email,
                event.status,
                opt_millis(event.remote_updated_at),
                raw_json(&event.raw)?,
                synced_at,
            ],
        ),
        MirrorRecord::Task(task) => tx.execute(
            "INSERT INTO mirrored_tasks (
                integration_id, external_id, title, description, status, assignee, project,
                due_at, completed, remote_updated_at, raw, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(integration_id, external_id) DO UPDATE SET
                title = excluded.title, description = excluded.description,
                status = excluded.status, assignee = excluded.assignee,
                project = excluded.project, due_at = excluded.due_at,
                completed = excluded.completed, remote_updated_at = excluded.remote_updated_at,
                raw = excluded.raw, synced_at = excluded.synced_at",
            params![
                integration_id,
                task.external_id,
                task.title,
                task.description,
                task.status,
                task.assignee,
                task.project,
                opt_millis(task.due_at),
                task.completed,
                opt_millis(task.remote_updated_at),
                raw_json(&task.raw)?,
                synced_at,
            ],
        ),
        MirrorRecord::Employee(employee) => tx.execute(
            "INSERT INTO mirrored_employees (
                integration_id, external_id, display_name, work_email, job_title, department,
                employment_status, remote_updated_at, raw, synced_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(integration_id, external_id) DO UPDATE SET
                display_name = excluded.display_name, work_email = excluded.work_email,
                job_title = excluded.job_title, department = excluded.department,
                employment_status = excluded.employment_status,
                remote_updated_at = excluded.remote_updated_at,
                raw = excluded.raw, synced_at = excluded.synced_at",
            params![
                integration_id,
                employee.external_id,
                employee.display_name,
                employee.work_email,
                employee.job_title,
                employee.department,
                employee.employment_status,
                opt_millis(employee.remote_updated_at),
                raw_json(&employee.raw)?,
                synced_at,
            ],
        ),
    }
    .map(|_| ())
    .map_err(map_sql_error)
}

#[async_trait]
impl MirrorRepository for SqlCipherMirrorRepository {
    async fn apply_changes(
        &self,
        integration_id: uuid::Uuid,
        changes: &[RemoteChange],
        synced_at: DateTime<Utc>,
    ) -> DomainResult<(u64, u64)> {
        if changes.is_empty() {
            return Ok((0, 0));
        }
        let changes = changes.to_vec();
        self.db
            .with_connection_mut(move |conn| {
                let id = integration_id.to_string();
                let synced_at = millis(synced_at);
                let tx = conn.transaction().map_err(map_sql_error)?;
                let (mut upserted, mut deleted) = (0_u64, 0_u64);
                for change in &changes {
                    match change {
                        RemoteChange::Upsert(record) => {
                            upsert(&tx, &id, record, synced_at)?;
                            upserted += 1;
                        }
                        RemoteChange::Removed { kind, external_id } => {
                            let sql = format!(
                                "DELETE FROM {} WHERE integration_id = ?1 AND external_id = ?2",
                                table(*kind)
                            );
                            let removed = tx.execute(&sql, params![id, external_id]).map_err(map_sql_error)?;
                            deleted += usize_to_u64(removed);
                        }
                    }
                }
                tx.commit().map_err(map_sql_error)?;
                Ok((upserted, deleted))
            })
            .await
    }

    async fn delete_all(&self, integration_id: uuid::Uuid) -> DomainResult<u64> {
        self.db
            .with_connection_mut(move |conn| {
                let id = integration_id.to_string();
                let tx = conn.transaction().map_err(map_sql_error)?;
                let mut removed = 0_u64;
                for kind in [MirrorKind::Event, MirrorKind::Task, MirrorKind::Employee] {
                    let sql = format!("DELETE FROM {} WHERE integration_id = ?1", table(kind));
                    removed += usize_to_u64(tx.execute(&sql, params![id]).map_err(map_sql_error)?);
                }
                tx.commit().map_err(map_sql_error)?;
                Ok(removed)
            })
            .await
    }

    async fn get(
        &self,
        integration_id: uuid::Uuid,
        kind: MirrorKind,
        external_id: &str,
    ) -> DomainResult<Option<MirrorRecord>> {
        let external_id = external_id.to_string();
        self.db
            .with_connection(move |conn| {
                let (sql, mapper): (&str, fn(&Row<'_>) -> rusqlite::Result<MirrorRecord>) = match kind {
                    MirrorKind::Event => (SELECT_EVENT_SQL, map_event_row),
                    MirrorKind::Task => (SELECT_TASK_SQL, map_task_row),
                    MirrorKind::Employee => (SELECT_EMPLOYEE_SQL, map_employee_row),
                };
                let mut stmt = conn.prepare(sql).map_err(map_storage_error)?;
                stmt.query_optional(params![integration_id.to_string(), external_id], mapper)
                    .map_err(map_storage_error)
            })
            .await
    }

    async fn count(&self, integration_id: uuid::Uuid, kind: MirrorKind) -> DomainResult<u64> {
        self.db
            .with_connection(move |conn| {
                let sql = format!("SELECT COUNT(*) FROM {} WHERE integration_id = ?1", table(kind));
                let count: i64 = conn
                    .query_row(&sql, params![integration_id.to_string()], |row| row.get(0))
                    .map_err(map_storage_error)?;
                Ok(count_to_u64(count))
            })
            .await
    }
}

const SELECT_EVENT_SQL: &str = "SELECT external_id, title, description, starts_at, ends_at, all_day,
        organizer_email, status, remote_updated_at, raw
    FROM mirrored_events WHERE integration_id = ?1 AND external_id = ?2";

const SELECT_TASK_SQL: &str = "SELECT external_id, title, description, status, assignee, project,
        due_at, completed, remote_updated_at, raw
    FROM mirrored_tasks WHERE integration_id = ?1 AND external_id = ?2";

const SELECT_EMPLOYEE_SQL: &str = "SELECT external_id, display_name, work_email, job_title, department,
        employment_status, remote_updated_at, raw
    FROM mirrored_employees WHERE integration_id = ?1 AND external_id = ?2";

fn raw_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(idx)?;
    Ok(serde_json::from_str(&raw).unwrap_or(Value::Null))
}

fn map_event_row(row: &Row<'_>) -> rusqlite::Result<MirrorRecord> {
    Ok(MirrorRecord::Event(CalendarEventRecord {
        external_id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        starts_at: opt_time_col(row, 3)?,
        ends_at: opt_time_col(row, 4)?,
        all_day: row.get(5)?,
        organizer_email: row.get(6)?,
        status: row.get(7)?,
        remote_updated_at: opt_time_col(row, 8)?,
        raw: raw_col(row, 9)?,
    }))
}

fn map_task_row(row: &Row<'_>) -> rusqlite::Result<MirrorRecord> {
    Ok(MirrorRecord::Task(TaskRecord {
        external_id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: row.get(3)?,
        assignee: row.get(4)?,
        project: row.get(5)?,
        due_at: opt_time_col(row, 6)?,
        completed: row.get(7)?,
        remote_updated_at: opt_time_col(row, 8)?,
        raw: raw_col(row, 9)?,
    }))
}

fn map_employee_row(row: &Row<'_>) -> rusqlite::Result<MirrorRecord> {
    Ok(MirrorRecord::Employee(EmployeeRecord {
        external_id: row.get(0)?,
        display_name: row.get(1)?,
        work_email: row.get(2)?,
        job_title: row.get(3)?,
        department: row.get(4)?,
        employment_status: row.get(5)?,
        remote_updated_at: opt_time_col(row, 6)?,
        raw: raw_col(row, 7)?,
    }))
}
