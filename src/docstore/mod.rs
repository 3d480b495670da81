//! Typed document store boundary.
//!
//! Tasks, task details, work logs, meetings, and meeting notes live
//! behind this trait; the underlying format is an implementation
//! concern. [`SqliteDocumentStore`] persists records across
//! invocations; [`MemoryDocumentStore`] backs tests and ephemeral
//! sessions. Every method is a suspension point.

mod memory;
mod sqlite;

pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::Result;
use crate::analyze::TaskSuggestion;
use crate::core::{Meeting, MeetingNote, Task, TaskDetail, TaskPriority, TaskStatus, WorkLog};

/// A partial update to a task; absent fields keep their value.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New status.
    pub status: Option<TaskStatus>,
    /// New priority.
    pub priority: Option<TaskPriority>,
    /// New due date (`Some(None)` clears it).
    pub due_date: Option<Option<NaiveDate>>,
    /// New estimate.
    pub estimate_hours: Option<f64>,
    /// New todo note.
    pub todo: Option<String>,
    /// Replacement tag set.
    pub tags: Option<Vec<String>>,
}

impl TaskPatch {
    /// A patch that only changes the status.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Applies the patch to a task, bumping `updated_at`.
    pub fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = Some(description);
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(due_date) = self.due_date {
            task.due_date = due_date;
        }
        if let Some(estimate) = self.estimate_hours {
            task.estimate_hours = Some(estimate);
        }
        if let Some(todo) = self.todo {
            task.todo = Some(todo);
        }
        if let Some(tags) = self.tags {
            task.tags = tags;
        }
        task.updated_at = chrono::Utc::now();
    }
}

/// Trait for the typed record store.
///
/// The planner mutates nothing it reads except work logs (append) and
/// tasks (updates) through this interface.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All tasks.
    async fn tasks(&self) -> Result<Vec<Task>>;

    /// One task by id.
    async fn task(&self, id: &str) -> Result<Option<Task>>;

    /// First task whose title matches case-insensitively (exact first,
    /// then substring).
    async fn find_task_by_title(&self, title: &str) -> Result<Option<Task>>;

    /// Creates a task. A duplicate id is rejected with
    /// `StoreError::DuplicateTask`.
    async fn create_task(&self, task: Task) -> Result<()>;

    /// Applies a patch to a task; `StoreError::TaskNotFound` when absent.
    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task>;

    /// Removes a task, returning it; `StoreError::TaskNotFound` when
    /// absent.
    async fn remove_task(&self, id: &str) -> Result<Task>;

    /// Optional detail record for a task.
    async fn task_detail(&self, task_id: &str) -> Result<Option<TaskDetail>>;

    /// Sets the detail record for a task.
    async fn set_task_detail(&self, detail: TaskDetail) -> Result<()>;

    /// Work logs for a given day.
    async fn logs_for(&self, date: NaiveDate) -> Result<Vec<WorkLog>>;

    /// Appends a work log entry (append-only by date).
    async fn append_log(&self, log: WorkLog) -> Result<()>;

    /// Removes a log entry by id, returning it.
    async fn remove_log(&self, log_id: &str) -> Result<WorkLog>;

    /// All meetings.
    async fn meetings(&self) -> Result<Vec<Meeting>>;

    /// Meetings touching the given local date.
    async fn meetings_on(&self, date: NaiveDate) -> Result<Vec<Meeting>>;

    /// Adds a meeting. `start >= end` is rejected as input error.
    async fn add_meeting(&self, meeting: Meeting) -> Result<()>;

    /// Removes a meeting by id, returning it.
    async fn remove_meeting(&self, id: &str) -> Result<Meeting>;

    /// Meeting notes dated within `[from, to]` inclusive.
    async fn notes_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MeetingNote>>;

    /// Adds a meeting note.
    async fn add_note(&self, note: MeetingNote) -> Result<()>;

    /// Converts an analyzer suggestion into a stored task, generating an
    /// id. The single conversion contract: callers never build tasks
    /// from suggestions themselves.
    async fn create_task_from_suggestion(&self, suggestion: &TaskSuggestion) -> Result<Task>;
}
