//! In-memory document store.
//!
//! Backs tests and ephemeral sessions. All records live behind one
//! `RwLock`; readers see either the pre- or post-image of a mutation,
//! never a partial update.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{DocumentStore, TaskPatch};
use crate::Result;
use crate::analyze::TaskSuggestion;
use crate::core::{Meeting, MeetingNote, Task, TaskDetail, TaskStatus, WorkLog};
use crate::error::{Error, StoreError};

#[derive(Default)]
struct Records {
    tasks: HashMap<String, Task>,
    details: HashMap<String, TaskDetail>,
    logs: Vec<WorkLog>,
    meetings: HashMap<String, Meeting>,
    notes: Vec<MeetingNote>,
}

/// In-memory implementation of [`DocumentStore`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    records: RwLock<Records>,
}

impl MemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store with tasks (test convenience).
    #[must_use]
    pub fn with_tasks<I: IntoIterator<Item = Task>>(self, tasks: I) -> Self {
        if let Ok(mut records) = self.records.try_write() {
            for task in tasks {
                records.tasks.insert(task.id.clone(), task);
            }
        }
        self
    }

    /// Seeds the store with meetings (test convenience).
    #[must_use]
    pub fn with_meetings<I: IntoIterator<Item = Meeting>>(self, meetings: I) -> Self {
        if let Ok(mut records) = self.records.try_write() {
            for meeting in meetings {
                records.meetings.insert(meeting.id.clone(), meeting);
            }
        }
        self
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn tasks(&self) -> Result<Vec<Task>> {
        let records = self.records.read().await;
        let mut tasks: Vec<Task> = records.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(tasks)
    }

    async fn task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.records.read().await.tasks.get(id).cloned())
    }

    async fn find_task_by_title(&self, title: &str) -> Result<Option<Task>> {
        let needle = title.trim().to_lowercase();
        let records = self.records.read().await;

        let exact = records
            .tasks
            .values()
            .find(|t| t.title.to_lowercase() == needle);
        if let Some(task) = exact {
            return Ok(Some(task.clone()));
        }

        let mut partial: Vec<&Task> = records
            .tasks
            .values()
            .filter(|t| t.title.to_lowercase().contains(&needle))
            .collect();
        partial.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(partial.first().map(|t| (*t).clone()))
    }

    async fn create_task(&self, task: Task) -> Result<()> {
        let mut records = self.records.write().await;
        if records.tasks.contains_key(&task.id) {
            return Err(Error::Store(StoreError::DuplicateTask { id: task.id }));
        }
        records.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    async fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task> {
        let mut records = self.records.write().await;
        let task = records
            .tasks
            .get_mut(id)
            .ok_or_else(|| {
                Error::Store(StoreError::TaskNotFound {
                    selector: id.to_string(),
                })
            })?;
        patch.apply(task);
        Ok(task.clone())
    }

    async fn remove_task(&self, id: &str) -> Result<Task> {
        let mut records = self.records.write().await;
        records.details.remove(id);
        records.tasks.remove(id).ok_or_else(|| {
            Error::Store(StoreError::TaskNotFound {
                selector: id.to_string(),
            })
        })
    }

    async fn task_detail(&self, task_id: &str) -> Result<Option<TaskDetail>> {
        Ok(self.records.read().await.details.get(task_id).cloned())
    }

    async fn set_task_detail(&self, detail: TaskDetail) -> Result<()> {
        let mut records = self.records.write().await;
        records.details.insert(detail.task_id.clone(), detail);
        Ok(())
    }

    async fn logs_for(&self, date: NaiveDate) -> Result<Vec<WorkLog>> {
        let records = self.records.read().await;
        Ok(records
            .logs
            .iter()
            .filter(|log| log.date == date)
            .cloned()
            .collect())
    }

    async fn append_log(&self, log: WorkLog) -> Result<()> {
        self.records.write().await.logs.push(log);
        Ok(())
    }

    async fn remove_log(&self, log_id: &str) -> Result<WorkLog> {
        let mut records = self.records.write().await;
        let position = records.logs.iter().position(|log| log.log_id == log_id);
        position.map(|i| records.logs.remove(i)).ok_or_else(|| {
            Error::Store(StoreError::DocumentNotFound {
                id: log_id.to_string(),
            })
        })
    }

    async fn meetings(&self) -> Result<Vec<Meeting>> {
        let records = self.records.read().await;
        let mut meetings: Vec<Meeting> = records.meetings.values().cloned().collect();
        meetings.sort_by(|a, b| a.start.cmp(&b.start));
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
        let mut records = self.records.write().await;
        records.meetings.insert(meeting.id.clone(), meeting);
        Ok(())
    }

    async fn remove_meeting(&self, id: &str) -> Result<Meeting> {
        let mut records = self.records.write().await;
        records.meetings.remove(id).ok_or_else(|| {
            Error::Store(StoreError::DocumentNotFound { id: id.to_string() })
        })
    }

    async fn notes_between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MeetingNote>> {
        let records = self.records.read().await;
        let mut notes: Vec<MeetingNote> = records
            .notes
            .iter()
            .filter(|n| n.date >= from && n.date <= to)
            .cloned()
            .collect();
        notes.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.path.cmp(&b.path)));
        Ok(notes)
    }

    async fn add_note(&self, note: MeetingNote) -> Result<()> {
        self.records.write().await.notes.push(note);
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
