//! SQLite-backed document store.
//!
//! Durable implementation of [`DocumentStore`]: tasks, task details,
//! work logs, meetings, and meeting notes live in typed tables in one
//! database file, so records created in a session survive across
//! invocations. Every mutation is a single statement or transaction, so
//! readers see either the pre- or post-image of a record.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use super::{DocumentStore, TaskPatch};
use crate::Result;
use crate::analyze::TaskSuggestion;
use crate::core::{
    Meeting, MeetingNote, Task, TaskDetail, TaskPriority, TaskStatus, WorkLog,
};
use crate::error::{Error, StoreError};

/// Document schema.
const DOC_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL,
    priority TEXT NOT NULL,
    due_date TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    estimate_hours REAL,
    todo TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS task_details (
    task_id TEXT PRIMARY KEY,
    objective TEXT,
    sub_tasks TEXT NOT NULL DEFAULT '[]',
    acceptance_criteria TEXT NOT NULL DEFAULT '[]',
    FOREIGN KEY (task_id) REFERENCES tasks(id)
);

CREATE TABLE IF NOT EXISTS work_logs (
    log_id TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    description TEXT NOT NULL,
    actual_hours REAL NOT NULL,
    task_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_work_logs_date ON work_logs(date);

CREATE TABLE IF NOT EXISTS meetings (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    start TEXT NOT NULL,
    end_time TEXT NOT NULL,
    participants TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS meeting_notes (
    path TEXT PRIMARY KEY,
    date TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_meeting_notes_date ON meeting_notes(date);
";

/// Durable SQLite implementation of [`DocumentStore`].
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Opens (or creates) a document store at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Unavailable` when the database cannot be
    /// opened, `StoreError::Database` on schema failures.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            Error::Store(StoreError::Unavailable {
                reason: format!("cannot open {path}: {e}"),
            })
        })?;
        Self::init(conn)
    }

    /// Creates an in-memory document store (tests).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` on schema failures.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(DOC_SCHEMA_SQL).map_err(StoreError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            Error::Store(StoreError::Unavailable {
                reason: "document store mutex poisoned".to_string(),
            })
        })
    }

    const TASK_COLUMNS: &'static str = "id, title, description, status, priority, due_date, \
                                        tags, estimate_hours, todo, created_at, updated_at";

    fn read_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
        let status: String = row.get(3)?;
        let priority: String = row.get(4)?;
        let due_date: Option<String> = row.get(5)?;
        let tags_json: String = row.get(6)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;
        Ok(Task {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
            priority: TaskPriority::parse(&priority).unwrap_or(TaskPriority::Medium),
            due_date: due_date.and_then(|d| d.parse().ok()),
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            estimate_hours: row.get(7)?,
            todo: row.get(8)?,
            created_at: parse_utc(&created_at),
            updated_at: parse_utc(&updated_at),
        })
    }

    fn write_task(conn: &Connection, task: &Task, replace: bool) -> Result<()> {
        let verb = if replace { "INSERT OR REPLACE" } else { "INSERT" };
        let sql = format!(
            "{verb} INTO tasks
                 (id, title, description, status, priority, due_date,
                  tags, estimate_hours, todo, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        );
        conn.execute(
            &sql,
            params![
                task.id,
                task.title,
                task.description,
                task.status.as_str(),
                task.priority.as_str(),
                task.due_date.map(|d| d.to_string()),
                serde_json::to_string(&task.tags).map_err(StoreError::from)?,
                task.estimate_hours,
                task.todo,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn read_meeting(row: &rusqlite::Row<'_>) -> rusqlite::Result<Meeting> {
        let start: String = row.get(2)?;
        let end: String = row.get(3)?;
        let participants_json: String = row.get(4)?;
        Ok(Meeting {
            id: row.get(0)?,
            title: row.get(1)?,
            start: DateTime::parse_from_rfc3339(&start)
                .unwrap_or_else(|_| Utc::now().fixed_offset()),
            end: DateTime::parse_from_rfc3339(&end)
                .unwrap_or_else(|_| Utc::now().fixed_offset()),
            participants: serde_json::from_str(&participants_json).unwrap_or_default(),
        })
    }

    fn read_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkLog> {
        let date: String = row.get(1)?;
        Ok(WorkLog {
            log_id: row.get(0)?,
            date: date.parse().unwrap_or_default(),
            description: row.get(2)?,
            actual_hours: row.get(3)?,
            task_id: row.get(4)?,
        })
    }
}

/// Parses an RFC 3339 timestamp, defaulting to now on corruption.
fn parse_utc(text: &str) -> DateTime<Utc> {
    text.parse().unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn tasks(&self) -> Result<Vec<Task>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM tasks ORDER BY id", Self::TASK_COLUMNS);
        let mut stmt = conn.prepare(&sql).map_err(StoreError::from)?;
        let tasks = stmt
            .query_map([], Self::read_task)
            .map_err(StoreError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        Ok(tasks)
    }

    async fn task(&self, id: &str) -> Result<Option<Task>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {} FROM tasks WHERE id = ?1", Self::TASK_COLUMNS);
        let task = conn
            .query_row(&sql, params![id], Self::read_task)
            .optional()
            .map_err(StoreError::from)?;
        Ok(task)
    }

    async fn find_task_by_title(&self, title: &str) -> Result<Option<Task>> {
        let needle = title.trim().to_lowercase();
        let conn = self.lock()?;

        let exact_sql = format!(
            "SELECT {} FROM tasks WHERE lower(title) = ?1 ORDER BY id LIMIT 1",
            Self::TASK_COLUMNS
        );
        if let Some(task) = conn
            .query_row(&exact_sql, params![needle], Self::read_task)
            .optional()
            .map_err(StoreError::from)?
        {
            return Ok(Some(task));
        }

        let partial_sql = format!(
            "SELECT {} FROM tasks WHERE instr(lower(title), ?1) > 0 ORDER BY id LIMIT 1",
            Self::TASK_COLUMNS
        );
        let task = conn
            .query_row(&partial_sql, params![needle], Self::read_task)
            .optional()
            .map_err(StoreError::from)?;
        Ok(task)
    }

    async fn create_task(&self, task: Task) -> Result<()> {
        let conn = self.lock()?;
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE id = ?1",
                params![task.id],
                |row| row.get::<_, i64>(0),
            )
            .map_err(StoreError::from)?
            > 0;
        if exists {
            return Err(Error::Store(StoreError::DuplicateTask { id: task.id }));
        }
        Self::write_task(&conn, &task, false)
    }

    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let mut task = self.task(id).await?.ok_or_else(|| {
            Error::Store(StoreError::TaskNotFound {
                selector: id.to_string(),
            })
        })?;
        patch.apply(&mut task);

        let conn = self.lock()?;
        Self::write_task(&conn, &task, true)?;
        Ok(task)
    }

    async fn remove_task(&self, id: &str) -> Result<Task> {
        let task = self.task(id).await?.ok_or_else(|| {
            Error::Store(StoreError::TaskNotFound {
                selector: id.to_string(),
            })
        })?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::from)?;
        tx.execute("DELETE FROM task_details WHERE task_id = ?1", params![id])
            .map_err(StoreError::from)?;
        tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .map_err(StoreError::from)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(task)
    }

    async fn task_detail(&self, task_id: &str) -> Result<Option<TaskDetail>> {
        let conn = self.lock()?;
        let detail = conn
            .query_row(
                "SELECT task_id, objective, sub_tasks, acceptance_criteria
                 FROM task_details WHERE task_id = ?1",
                params![task_id],
                |row| {
                    let sub_tasks: String = row.get(2)?;
                    let criteria: String = row.get(3)?;
                    Ok(TaskDetail {
                        task_id: row.get(0)?,
                        objective: row.get(1)?,
                        tasks: serde_json::from_str(&sub_tasks).unwrap_or_default(),
                        acceptance_criteria: serde_json::from_str(&criteria).unwrap_or_default(),
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)?;
        Ok(detail)
    }

    async fn set_task_detail(&self, detail: TaskDetail) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO task_details
                 (task_id, objective, sub_tasks, acceptance_criteria)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                detail.task_id,
                detail.objective,
                serde_json::to_string(&detail.tasks).map_err(StoreError::from)?,
                serde_json::to_string(&detail.acceptance_criteria).map_err(StoreError::from)?,
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn logs_for(&self, date: NaiveDate) -> Result<Vec<WorkLog>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT log_id, date, description, actual_hours, task_id
                 FROM work_logs WHERE date = ?1 ORDER BY log_id",
            )
            .map_err(StoreError::from)?;
        let logs = stmt
            .query_map(params![date.to_string()], Self::read_log)
            .map_err(StoreError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        Ok(logs)
    }

    async fn append_log(&self, log: WorkLog) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO work_logs (log_id, date, description, actual_hours, task_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                log.log_id,
                log.date.to_string(),
                log.description,
                log.actual_hours,
                log.task_id,
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn remove_log(&self, log_id: &str) -> Result<WorkLog> {
        let conn = self.lock()?;
        let log = conn
            .query_row(
                "SELECT log_id, date, description, actual_hours, task_id
                 FROM work_logs WHERE log_id = ?1",
                params![log_id],
                Self::read_log,
            )
            .optional()
            .map_err(StoreError::from)?
            .ok_or_else(|| {
                Error::Store(StoreError::DocumentNotFound {
                    id: log_id.to_string(),
                })
            })?;
        conn.execute("DELETE FROM work_logs WHERE log_id = ?1", params![log_id])
            .map_err(StoreError::from)?;
        Ok(log)
    }

    async fn meetings(&self) -> Result<Vec<Meeting>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, title, start, end_time, participants
                 FROM meetings ORDER BY start",
            )
            .map_err(StoreError::from)?;
        let meetings = stmt
            .query_map([], Self::read_meeting)
            .map_err(StoreError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        Ok(meetings)
    }

    async fn meetings_on(&self, date: NaiveDate) -> Result<Vec<Meeting>> {
        Ok(self
            .meetings()
            .await?
            .into_iter()
            .filter(|m| m.on_date(date))
            .collect())
    }

    async fn add_meeting(&self, meeting: Meeting) -> Result<()> {
        if !meeting.is_valid() {
            return Err(Error::Input {
                message: format!(
                    "meeting {} ends at or before it starts ({} >= {})",
                    meeting.id, meeting.start, meeting.end
                ),
            });
        }
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO meetings (id, title, start, end_time, participants)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                meeting.id,
                meeting.title,
                meeting.start.to_rfc3339(),
                meeting.end.to_rfc3339(),
                serde_json::to_string(&meeting.participants).map_err(StoreError::from)?,
            ],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn remove_meeting(&self, id: &str) -> Result<Meeting> {
        let conn = self.lock()?;
        let meeting = conn
            .query_row(
                "SELECT id, title, start, end_time, participants
                 FROM meetings WHERE id = ?1",
                params![id],
                Self::read_meeting,
            )
            .optional()
            .map_err(StoreError::from)?
            .ok_or_else(|| {
                Error::Store(StoreError::DocumentNotFound { id: id.to_string() })
            })?;
        conn.execute("DELETE FROM meetings WHERE id = ?1", params![id])
            .map_err(StoreError::from)?;
        Ok(meeting)
    }

    async fn notes_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MeetingNote>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT path, date, body FROM meeting_notes
                 WHERE date >= ?1 AND date <= ?2 ORDER BY date, path",
            )
            .map_err(StoreError::from)?;
        let notes = stmt
            .query_map(params![from.to_string(), to.to_string()], |row| {
                let date: String = row.get(1)?;
                Ok(MeetingNote {
                    path: row.get(0)?,
                    date: date.parse().unwrap_or_default(),
                    body: row.get(2)?,
                })
            })
            .map_err(StoreError::from)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;
        Ok(notes)
    }

    async fn add_note(&self, note: MeetingNote) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO meeting_notes (path, date, body) VALUES (?1, ?2, ?3)",
            params![note.path, note.date.to_string(), note.body],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    async fn create_task_from_suggestion(&self, suggestion: &TaskSuggestion) -> Result<Task> {
        let id = format!("task-{}", &Uuid::new_v4().to_string()[..8]);
        let mut task = Task::new(&id, &suggestion.title).with_priority(suggestion.priority);
        task.description = Some(suggestion.description.clone());
        task.due_date = suggestion.deadline;
        task.tags = vec![suggestion.category.clone()];
        task.status = TaskStatus::Pending;

        self.create_task(task.clone()).await?;
        Ok(task)
    }
}
