//! Task, schedule, and brainstorm records.
//!
//! These are the typed records behind the `DocumentStore` boundary: tasks
//! with optional detail, append-only work logs, meetings, meeting notes,
//! and persisted brainstorm reports.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Finished.
    Done,
    /// Abandoned.
    Cancelled,
}

impl TaskStatus {
    /// Whether the task is still open for scheduling.
    #[must_use]
    pub const fn is_open(self) -> bool {
        !matches!(self, Self::Done)
    }

    /// Stable string form, matching the serialized representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "done" => Some(Self::Done),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Task priority level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Low priority.
    Low,
    /// Medium priority.
    Medium,
    /// High priority.
    High,
}

impl TaskPriority {
    /// Numeric score used by the planner (low 0, medium 1, high 2).
    #[must_use]
    pub const fn score(self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::Medium => 1.0,
            Self::High => 2.0,
        }
    }

    /// Stable string form, matching the serialized representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parses the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// A unit of work tracked by the planner and brainstorm engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id; may be user-supplied. Duplicates are rejected.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Priority level.
    pub priority: TaskPriority,
    /// Due date, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Freeform tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Effort estimate in hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimate_hours: Option<f64>,
    /// Inline todo note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a pending medium-priority task.
    #[must_use]
    pub fn new(id: &str, title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            due_date: None,
            tags: Vec::new(),
            estimate_hours: None,
            todo: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the due date.
    #[must_use]
    pub const fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.due_date = Some(due);
        self
    }

    /// Sets the effort estimate.
    #[must_use]
    pub const fn with_estimate(mut self, hours: f64) -> Self {
        self.estimate_hours = Some(hours);
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Optional one-to-one elaboration of a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDetail {
    /// Owning task id.
    pub task_id: String,
    /// What done looks like, or the issue being addressed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    /// Ordered sub-items. A task may be split across schedule windows
    /// only when these exist.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<String>,
    /// Acceptance criteria, possibly nested one level.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acceptance_criteria: Vec<String>,
}

/// An append-only work log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkLog {
    /// Log entry id.
    pub log_id: String,
    /// Day the work happened.
    pub date: NaiveDate,
    /// What was done.
    pub description: String,
    /// Hours actually spent.
    pub actual_hours: f64,
    /// Task the work belongs to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// A calendar meeting. Invariant: `start < end`; times carry their
/// timezone offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    /// Meeting id.
    pub id: String,
    /// Meeting title.
    pub title: String,
    /// Start time with offset.
    pub start: DateTime<FixedOffset>,
    /// End time with offset.
    pub end: DateTime<FixedOffset>,
    /// Participant names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<String>,
}

impl Meeting {
    /// Checks the `start < end` invariant.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    /// Whether the meeting falls on the given local date.
    #[must_use]
    pub fn on_date(&self, date: NaiveDate) -> bool {
        self.start.date_naive() == date || self.end.date_naive() == date
    }
}

/// A meeting note file with a date extracted from its name or content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingNote {
    /// Source path of the note.
    pub path: String,
    /// Date the note refers to.
    pub date: NaiveDate,
    /// Note text.
    pub body: String,
}

impl MeetingNote {
    /// Builds a note, extracting the date from the file name first and
    /// the body second (first `YYYY-MM-DD` occurrence in either).
    ///
    /// Returns `None` when neither carries a date.
    #[must_use]
    pub fn from_file(path: &str, body: &str) -> Option<Self> {
        let date = extract_iso_date(path).or_else(|| extract_iso_date(body))?;
        Some(Self {
            path: path.to_string(),
            date,
            body: body.to_string(),
        })
    }
}

/// First `YYYY-MM-DD` substring that parses as a date.
fn extract_iso_date(text: &str) -> Option<NaiveDate> {
    for start in 0..text.len().saturating_sub(9) {
        let Some(candidate) = text.get(start..start + 10) else {
            continue;
        };
        if candidate.as_bytes()[4] == b'-'
            && candidate.as_bytes()[7] == b'-'
            && let Ok(date) = candidate.parse()
        {
            return Some(date);
        }
    }
    None
}

/// Kind of brainstorm build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrainstormKind {
    /// First build for the task.
    Initial,
    /// Rebuild improving an existing report.
    Improved,
    /// Rebuild incorporating new task state.
    Updated,
}

impl BrainstormKind {
    /// Stable string form used in the report header.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Improved => "improved",
            Self::Updated => "updated",
        }
    }
}

/// A persisted brainstorm report.
///
/// At most one build per task runs at a time; `version` is monotonic per
/// task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Brainstorm {
    /// Owning task id.
    pub task_id: String,
    /// Build kind.
    pub kind: BrainstormKind,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Section name → markdown body, in the fixed template order.
    pub sections: Vec<(String, String)>,
    /// Retrieved context snippets included in the report.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rag_context: Vec<String>,
    /// Source identifiers for the retrieved context.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    /// Monotonic version within the task.
    pub version: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_priority_scores() {
        assert!((TaskPriority::Low.score() - 0.0).abs() < f64::EPSILON);
        assert!((TaskPriority::Medium.score() - 1.0).abs() < f64::EPSILON);
        assert!((TaskPriority::High.score() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_status_open() {
        assert!(TaskStatus::Pending.is_open());
        assert!(TaskStatus::InProgress.is_open());
        assert!(TaskStatus::Cancelled.is_open());
        assert!(!TaskStatus::Done.is_open());
    }

    #[test]
    fn test_task_builder() {
        let due = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        let task = Task::new("T1", "Write spec")
            .with_priority(TaskPriority::High)
            .with_due_date(due)
            .with_estimate(2.0)
            .with_tags(["docs", "architecture"]);
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.due_date, Some(due));
        assert_eq!(task.tags.len(), 2);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_meeting_validity() {
        let tz = FixedOffset::east_opt(0).unwrap();
        let start = tz.with_ymd_and_hms(2025, 6, 10, 10, 0, 0).unwrap();
        let end = tz.with_ymd_and_hms(2025, 6, 10, 10, 30, 0).unwrap();
        let m = Meeting {
            id: "m1".to_string(),
            title: "Standup".to_string(),
            start,
            end,
            participants: vec![],
        };
        assert!(m.is_valid());
        assert!(m.on_date(NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()));
        assert!(!m.on_date(NaiveDate::from_ymd_opt(2025, 6, 11).unwrap()));

        let inverted = Meeting {
            start: end,
            end: start,
            ..m
        };
        assert!(!inverted.is_valid());
    }

    #[test]
    fn test_task_serde_roundtrip() {
        let task = Task::new("T2", "Fix bug").with_estimate(1.5);
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "T2");
        assert_eq!(back.estimate_hours, Some(1.5));
        // Empty optional fields are omitted from the payload
        assert!(!json.contains("due_date"));
    }

    #[test]
    fn test_status_and_priority_string_roundtrip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::InProgress,
            TaskStatus::Done,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("paused"), None);

        for priority in [TaskPriority::Low, TaskPriority::Medium, TaskPriority::High] {
            assert_eq!(TaskPriority::parse(priority.as_str()), Some(priority));
        }
        assert_eq!(TaskPriority::parse("urgent"), None);
    }

    #[test]
    fn test_meeting_note_date_from_filename() {
        let note = MeetingNote::from_file("notes/2025-06-09-standup.md", "no date here").unwrap();
        assert_eq!(note.date, NaiveDate::from_ymd_opt(2025, 6, 9).unwrap());
    }

    #[test]
    fn test_meeting_note_date_from_body() {
        let note =
            MeetingNote::from_file("notes/standup.md", "Meeting held on 2025-06-09.").unwrap();
        assert_eq!(note.date, NaiveDate::from_ymd_opt(2025, 6, 9).unwrap());
    }

    #[test]
    fn test_meeting_note_no_date() {
        assert!(MeetingNote::from_file("notes/standup.md", "undated scribbles").is_none());
    }

    #[test]
    fn test_brainstorm_kind_strings() {
        assert_eq!(BrainstormKind::Initial.as_str(), "initial");
        assert_eq!(BrainstormKind::Improved.as_str(), "improved");
        assert_eq!(BrainstormKind::Updated.as_str(), "updated");
    }
}
