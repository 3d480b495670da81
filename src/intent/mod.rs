//! Natural-language intent parsing.
//!
//! Maps a user query to a typed [`Command`] through a constrained LLM
//! call returning an `{action, data}` JSON envelope. On provider failure
//! or a malformed envelope a deterministic regex table covers the most
//! common commands before giving up with [`Command::Unknown`].

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::core::{TaskPriority, TaskStatus, extract_date, resolve_date};
use crate::llm::{LlmProvider, oneshot_request};

/// How a command refers to an existing task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskSelector {
    /// By exact id.
    ById(String),
    /// By (case-insensitive) title.
    ByTitle(String),
}

impl TaskSelector {
    /// Display form used in errors.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ById(id) => id,
            Self::ByTitle(title) => title,
        }
    }

    /// Heuristic: short tokens with digits and no spaces read as ids.
    #[must_use]
    pub fn infer(text: &str) -> Self {
        let trimmed = text.trim();
        let looks_like_id = !trimmed.contains(' ')
            && trimmed.len() <= 24
            && trimmed.chars().any(|c| c.is_ascii_digit());
        if looks_like_id {
            Self::ById(trimmed.to_string())
        } else {
            Self::ByTitle(trimmed.to_string())
        }
    }
}

/// A parsed user command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Create a task.
    AddTask {
        /// Task title.
        title: String,
        /// Optional explicit id.
        id: Option<String>,
        /// Priority, when stated.
        priority: Option<TaskPriority>,
        /// Due date, normalized against today.
        due_date: Option<NaiveDate>,
        /// Tags, when stated.
        tags: Vec<String>,
        /// Effort estimate in hours.
        estimate_hours: Option<f64>,
    },
    /// Update an existing task.
    UpdateTask {
        /// Which task.
        selector: TaskSelector,
        /// New status, when stated.
        status: Option<TaskStatus>,
        /// New priority, when stated.
        priority: Option<TaskPriority>,
        /// New due date, when stated.
        due_date: Option<NaiveDate>,
    },
    /// Remove a task.
    RemoveTask {
        /// Which task.
        selector: TaskSelector,
    },
    /// Search stored tasks.
    SearchTasks {
        /// Search text.
        query: String,
    },
    /// Add a meeting.
    AddMeeting {
        /// Meeting title.
        title: String,
        /// Day of the meeting, normalized against today.
        date: Option<NaiveDate>,
        /// Start time `HH:MM`.
        start: Option<String>,
        /// End time `HH:MM`.
        end: Option<String>,
        /// Participant names.
        participants: Vec<String>,
    },
    /// Remove a meeting by id.
    RemoveMeeting {
        /// Meeting id.
        id: String,
    },
    /// Append a work log entry.
    AddLog {
        /// What was done.
        description: String,
        /// Hours spent.
        hours: f64,
        /// Task the work belongs to.
        task_id: Option<String>,
        /// Day of the work, normalized against today.
        date: Option<NaiveDate>,
    },
    /// Remove a log entry by id.
    RemoveLog {
        /// Log entry id.
        log_id: String,
    },
    /// Produce a day plan.
    PlanDay {
        /// Target date, when stated.
        date: Option<NaiveDate>,
    },
    /// Run the brainstorm pipeline; the engine parses the request
    /// further.
    Brainstorm {
        /// The raw brainstorm request.
        request: String,
    },
    /// Retrieval over the knowledge collections.
    RagSearch {
        /// Search text.
        query: String,
        /// Collections to search; empty means all.
        collections: Vec<String>,
    },
    /// Conversational text with no tool use.
    SmallTalk {
        /// The user's text.
        text: String,
    },
    /// Unrecognized input, recovered locally.
    Unknown {
        /// The raw text.
        text: String,
    },
}

/// System prompt constraining the intent envelope.
const INTENT_PROMPT: &str = r#"Classify the user's request. Respond with JSON only:
{"action": "add_task|update_task|remove_task|search_tasks|add_meeting|remove_meeting|add_log|remove_log|plan_day|brainstorm|rag_search|small_talk",
 "data": { ... }}
data fields by action:
  add_task: title, id?, priority? (low|medium|high), due_date?, tags?, estimate_hours?
  update_task: id? or title?, status? (pending|in_progress|done|cancelled), priority?, due_date?
  remove_task: id? or title?
  search_tasks: query
  add_meeting: title, date?, start?, end?, participants?
  remove_meeting: id
  add_log: description, hours, task_id?, date?
  remove_log: log_id
  plan_day: date?
  brainstorm: request
  rag_search: query, collections?
  small_talk: text
Dates may be natural language ("tomorrow", "next friday"); pass them through as strings."#;

/// Natural-language to [`Command`] parser.
pub struct IntentParser {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl IntentParser {
    /// Creates a parser over the given provider.
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
        }
    }

    /// Parses `text` into a command, normalizing dates against `today`.
    ///
    /// Never fails: provider outages and malformed envelopes fall back
    /// to the deterministic regex table, then to [`Command::Unknown`].
    pub async fn parse(&self, text: &str, today: NaiveDate) -> Command {
        let request = oneshot_request(&self.model, INTENT_PROMPT, text, true);
        match self.provider.chat(&request).await {
            Ok(response) => match parse_envelope(&response.content, text, today) {
                Some(command) => command,
                None => {
                    debug!("malformed intent envelope, using fallback patterns");
                    fallback_parse(text, today)
                }
            },
            Err(e) => {
                debug!(error = %e, "intent provider unavailable, using fallback patterns");
                fallback_parse(text, today)
            }
        }
    }
}

/// Parses the `{action, data}` envelope into a command.
fn parse_envelope(content: &str, original: &str, today: NaiveDate) -> Option<Command> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map_or(trimmed, str::trim);

    let envelope: Value = serde_json::from_str(json).ok()?;
    let action = envelope.get("action")?.as_str()?;
    let data = envelope.get("data").cloned().unwrap_or(Value::Null);

    let command = match action {
        "add_task" => Command::AddTask {
            title: str_field(&data, "title")?,
            id: opt_str(&data, "id"),
            priority: opt_str(&data, "priority").and_then(|p| parse_priority(&p)),
            due_date: opt_str(&data, "due_date").and_then(|d| resolve_date(&d, today)),
            tags: str_list(&data, "tags"),
            estimate_hours: data.get("estimate_hours").and_then(Value::as_f64),
        },
        "update_task" => Command::UpdateTask {
            selector: selector_from(&data)?,
            status: opt_str(&data, "status").and_then(|s| parse_status(&s)),
            priority: opt_str(&data, "priority").and_then(|p| parse_priority(&p)),
            due_date: opt_str(&data, "due_date").and_then(|d| resolve_date(&d, today)),
        },
        "remove_task" => Command::RemoveTask {
            selector: selector_from(&data)?,
        },
        "search_tasks" => Command::SearchTasks {
            query: str_field(&data, "query")?,
        },
        "add_meeting" => Command::AddMeeting {
            title: str_field(&data, "title")?,
            date: opt_str(&data, "date").and_then(|d| resolve_date(&d, today)),
            start: opt_str(&data, "start"),
            end: opt_str(&data, "end"),
            participants: str_list(&data, "participants"),
        },
        "remove_meeting" => Command::RemoveMeeting {
            id: str_field(&data, "id")?,
        },
        "add_log" => Command::AddLog {
            description: str_field(&data, "description")?,
            hours: data.get("hours").and_then(Value::as_f64).unwrap_or(0.0),
            task_id: opt_str(&data, "task_id"),
            date: opt_str(&data, "date").and_then(|d| resolve_date(&d, today)),
        },
        "remove_log" => Command::RemoveLog {
            log_id: str_field(&data, "log_id")?,
        },
        "plan_day" => Command::PlanDay {
            date: opt_str(&data, "date").and_then(|d| resolve_date(&d, today)),
        },
        "brainstorm" => Command::Brainstorm {
            request: opt_str(&data, "request").unwrap_or_else(|| original.to_string()),
        },
        "rag_search" => Command::RagSearch {
            query: str_field(&data, "query")?,
            collections: str_list(&data, "collections"),
        },
        "small_talk" => Command::SmallTalk {
            text: opt_str(&data, "text").unwrap_or_else(|| original.to_string()),
        },
        _ => Command::Unknown {
            text: original.to_string(),
        },
    };
    Some(command)
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)?.as_str().map(ToString::to_string)
}

fn opt_str(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(ToString::to_string)
}

fn str_list(data: &Value, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn selector_from(data: &Value) -> Option<TaskSelector> {
    if let Some(id) = opt_str(data, "id") {
        return Some(TaskSelector::ById(id));
    }
    opt_str(data, "title").map(TaskSelector::ByTitle)
}

fn parse_priority(s: &str) -> Option<TaskPriority> {
    match s.to_lowercase().as_str() {
        "low" => Some(TaskPriority::Low),
        "medium" => Some(TaskPriority::Medium),
        "high" => Some(TaskPriority::High),
        _ => None,
    }
}

fn parse_status(s: &str) -> Option<TaskStatus> {
    match s.to_lowercase().as_str() {
        "pending" => Some(TaskStatus::Pending),
        "in_progress" => Some(TaskStatus::InProgress),
        "done" => Some(TaskStatus::Done),
        "cancelled" => Some(TaskStatus::Cancelled),
        _ => None,
    }
}

/// Deterministic fallback patterns for the most common commands.
fn fallback_parse(text: &str, today: NaiveDate) -> Command {
    let trimmed = text.trim();

    if let Ok(re) = Regex::new(r"(?i)^(?:add|create|new)\s+task:?\s+(.+)$")
        && let Some(captures) = re.captures(trimmed)
        && let Some(title) = captures.get(1)
    {
        return Command::AddTask {
            title: title.as_str().trim().to_string(),
            id: None,
            priority: None,
            due_date: None,
            tags: Vec::new(),
            estimate_hours: None,
        };
    }

    if let Ok(re) = Regex::new(r"(?i)^(?:remove|delete|drop)\s+task:?\s+(.+)$")
        && let Some(captures) = re.captures(trimmed)
        && let Some(target) = captures.get(1)
    {
        return Command::RemoveTask {
            selector: TaskSelector::infer(target.as_str()),
        };
    }

    if let Ok(re) = Regex::new(r"(?i)\bbrainstorm\b")
        && re.is_match(trimmed)
    {
        return Command::Brainstorm {
            request: trimmed.to_string(),
        };
    }

    if let Ok(re) = Regex::new(r"(?i)^plan\b|\bplan (?:my|the) day\b")
        && re.is_match(trimmed)
    {
        return Command::PlanDay {
            date: extract_date(trimmed, today),
        };
    }

    if let Ok(re) = Regex::new(r"(?i)^(?:search|find)(?:\s+tasks?)?:?\s+(.+)$")
        && let Some(captures) = re.captures(trimmed)
        && let Some(query) = captures.get(1)
    {
        return Command::SearchTasks {
            query: query.as_str().trim().to_string(),
        };
    }

    Command::Unknown {
        text: trimmed.to_string(),
    }
}
