//! Agents and tools as data.
//!
//! An [`Agent`] is a value carrying a name, a system prompt, and its
//! tool set; a [`Tool`] is a named schema plus an invoke function.
//! Dispatch is by data (table lookup), not virtual calls. The router
//! turns parsed commands into tool invocations against the shared
//! [`Services`] record.

mod fragment;
mod router;

pub use fragment::Fragment;
pub use router::{AgentRouter, SessionHandle, SessionQuery};

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, TimeZone};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::Result;
use crate::core::{Meeting, Task, TaskStatus, WorkLog, parse_time_of_day};
use crate::docstore::TaskPatch;
use crate::error::Error;
use crate::intent::TaskSelector;
use crate::plan::PlanRequest;
use crate::retrieve::SearchOptions;
use crate::services::Services;
use tokio_util::sync::CancellationToken;

/// Context handed to every tool invocation.
#[derive(Clone)]
pub struct ToolContext {
    /// Shared service handles.
    pub services: Arc<Services>,
    /// Session-level "today" for date resolution.
    pub today: NaiveDate,
    /// Per-query cancellation token.
    pub cancel: CancellationToken,
}

/// Future returned by a tool invocation.
pub type ToolFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Tool invoke function (a plain fn keeps tools plain values).
pub type ToolFn = fn(ToolContext, Value) -> ToolFuture;

/// A tool: name, parameter schema, invoke function.
#[derive(Clone)]
pub struct Tool {
    /// Tool name; the dispatch key.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// JSON Schema of the arguments.
    pub schema: Value,
    /// The invocation function.
    pub invoke: ToolFn,
}

/// An agent: a named role with a system prompt and a tool set.
#[derive(Clone)]
pub struct Agent {
    /// Agent name.
    pub name: &'static str,
    /// Role-defining system prompt.
    pub system_prompt: &'static str,
    /// Tools this agent may invoke.
    pub tools: Vec<Tool>,
}

/// The built-in agent registry.
#[must_use]
pub fn registry() -> Vec<Agent> {
    vec![
        Agent {
            name: "retrieval",
            system_prompt: "You search the knowledge collections and stored tasks.",
            tools: vec![tool_rag_search(), tool_search_tasks()],
        },
        Agent {
            name: "planner",
            system_prompt: "You produce a day plan from tasks, logs, meetings, and notes.",
            tools: vec![tool_plan_day()],
        },
        Agent {
            name: "brainstorm",
            system_prompt: "You enrich tasks with retrieved context and structured analysis.",
            tools: vec![tool_brainstorm()],
        },
        Agent {
            name: "taskkeeper",
            system_prompt: "You maintain tasks, meetings, and work logs.",
            tools: vec![
                tool_add_task(),
                tool_update_task(),
                tool_remove_task(),
                tool_add_meeting(),
                tool_remove_meeting(),
                tool_add_log(),
                tool_remove_log(),
            ],
        },
        Agent {
            name: "companion",
            system_prompt: "You answer conversational messages briefly and helpfully, \
                            without using tools.",
            tools: vec![],
        },
    ]
}

/// Looks a tool up by name across the registry.
#[must_use]
pub fn find_tool<'a>(agents: &'a [Agent], name: &str) -> Option<(&'a Agent, &'a Tool)> {
    agents.iter().find_map(|agent| {
        agent
            .tools
            .iter()
            .find(|tool| tool.name == name)
            .map(|tool| (agent, tool))
    })
}

// ---------------------------------------------------------------------------
// Argument helpers
// ---------------------------------------------------------------------------

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(ToString::to_string)
}

fn required_str(args: &Value, key: &str, tool: &str) -> Result<String> {
    arg_str(args, key).ok_or_else(|| {
        Error::Agent(crate::error::AgentError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("missing field {key:?}"),
        })
    })
}

fn arg_date(args: &Value, key: &str) -> Option<NaiveDate> {
    arg_str(args, key).and_then(|s| s.parse().ok())
}

fn arg_list(args: &Value, key: &str) -> Vec<String> {
    args.get(key)
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

fn selector_args(args: &Value) -> Option<TaskSelector> {
    if let Some(id) = arg_str(args, "id") {
        return Some(TaskSelector::ById(id));
    }
    arg_str(args, "title").map(TaskSelector::ByTitle)
}

async fn resolve_selector(
    services: &Services,
    selector: &TaskSelector,
) -> Result<Task> {
    let found = match selector {
        TaskSelector::ById(id) => services.doc_store.task(id).await?,
        TaskSelector::ByTitle(title) => services.doc_store.find_task_by_title(title).await?,
    };
    found.ok_or_else(|| {
        Error::Store(crate::error::StoreError::TaskNotFound {
            selector: selector.as_str().to_string(),
        })
    })
}

// ---------------------------------------------------------------------------
// Tool definitions
// ---------------------------------------------------------------------------

fn tool_rag_search() -> Tool {
    Tool {
        name: "rag_search",
        description: "Hybrid retrieval over the knowledge collections.",
        schema: json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "collections": {"type": "array", "items": {"type": "string"}},
                "k": {"type": "integer", "default": 8}
            },
            "required": ["query"],
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let query = required_str(&args, "query", "rag_search")?;
                let collections = arg_list(&args, "collections");
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let k = args.get("k").and_then(Value::as_u64).unwrap_or(8) as usize;

                let results = ctx
                    .services
                    .retriever
                    .search(&query, &collections, k, &SearchOptions::default(), &ctx.cancel)
                    .await?;
                let rendered: Vec<Value> = results
                    .iter()
                    .map(|r| {
                        json!({
                            "id": r.id,
                            "collection": r.collection,
                            "score": r.score,
                            "body": r.body,
                        })
                    })
                    .collect();
                Ok(json!({"results": rendered}))
            })
        },
    }
}

fn tool_search_tasks() -> Tool {
    Tool {
        name: "search_tasks",
        description: "Substring search over stored tasks.",
        schema: json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"],
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let query = required_str(&args, "query", "search_tasks")?.to_lowercase();
                let tasks = ctx.services.doc_store.tasks().await?;
                let matches: Vec<Value> = tasks
                    .iter()
                    .filter(|t| {
                        t.title.to_lowercase().contains(&query)
                            || t.description
                                .as_ref()
                                .is_some_and(|d| d.to_lowercase().contains(&query))
                            || t.tags.iter().any(|tag| tag.to_lowercase().contains(&query))
                    })
                    .map(|t| {
                        json!({
                            "id": t.id,
                            "title": t.title,
                            "status": t.status,
                            "priority": t.priority,
                            "due_date": t.due_date,
                        })
                    })
                    .collect();
                Ok(json!({"tasks": matches}))
            })
        },
    }
}

fn tool_plan_day() -> Tool {
    Tool {
        name: "plan_day",
        description: "Produce a day plan around the day's meetings.",
        schema: json!({
            "type": "object",
            "properties": {
                "date": {"type": "string"},
                "use_llm_for_focus": {"type": "boolean", "default": false},
                "feedback": {"type": "string"}
            },
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let request = PlanRequest {
                    target_date: arg_str(&args, "date"),
                    work_hours: None,
                    use_llm_for_focus: args
                        .get("use_llm_for_focus")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    feedback: arg_str(&args, "feedback"),
                };
                let output = ctx.services.planner.plan(&request, ctx.today).await?;
                Ok(json!({
                    "target_date": output.target_date,
                    "yesterday_markdown": output.yesterday_markdown,
                    "tomorrow_markdown": output.tomorrow_markdown,
                }))
            })
        },
    }
}

fn tool_brainstorm() -> Tool {
    Tool {
        name: "brainstorm",
        description: "Build or fetch a persisted brainstorm report for a task.",
        schema: json!({
            "type": "object",
            "properties": {"request": {"type": "string"}},
            "required": ["request"],
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let request = required_str(&args, "request", "brainstorm")?;
                let result = ctx.services.brainstorm.process(&request, &ctx.cancel).await?;
                Ok(json!({
                    "task_id": result.task_id,
                    "source": result.source.as_str(),
                    "newly_generated": result.newly_generated,
                    "version": result.version,
                    "content": result.content,
                }))
            })
        },
    }
}

fn tool_add_task() -> Tool {
    Tool {
        name: "add_task",
        description: "Create a task; duplicate ids are rejected.",
        schema: json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "title": {"type": "string"},
                "priority": {"type": "string", "enum": ["low", "medium", "high"]},
                "due_date": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "estimate_hours": {"type": "number"}
            },
            "required": ["title"],
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let title = required_str(&args, "title", "add_task")?;
                let id = arg_str(&args, "id")
                    .unwrap_or_else(|| format!("task-{}", &Uuid::new_v4().to_string()[..8]));

                let mut task = Task::new(&id, &title);
                if let Some(priority) = arg_str(&args, "priority") {
                    task.priority = match priority.as_str() {
                        "low" => crate::core::TaskPriority::Low,
                        "high" => crate::core::TaskPriority::High,
                        _ => crate::core::TaskPriority::Medium,
                    };
                }
                task.due_date = arg_date(&args, "due_date");
                task.tags = arg_list(&args, "tags");
                task.estimate_hours = args.get("estimate_hours").and_then(Value::as_f64);

                ctx.services.doc_store.create_task(task.clone()).await?;
                Ok(json!({"created": task.id, "title": task.title}))
            })
        },
    }
}

fn tool_update_task() -> Tool {
    Tool {
        name: "update_task",
        description: "Patch a task's status, priority, or due date.",
        schema: json!({
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "title": {"type": "string"},
                "status": {"type": "string",
                           "enum": ["pending", "in_progress", "done", "cancelled"]},
                "priority": {"type": "string", "enum": ["low", "medium", "high"]},
                "due_date": {"type": "string"}
            },
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let selector = selector_args(&args).ok_or_else(|| {
                    Error::Agent(crate::error::AgentError::InvalidArguments {
                        tool: "update_task".to_string(),
                        reason: "need id or title".to_string(),
                    })
                })?;
                let task = resolve_selector(&ctx.services, &selector).await?;

                let patch = TaskPatch {
                    status: arg_str(&args, "status").and_then(|s| match s.as_str() {
                        "pending" => Some(TaskStatus::Pending),
                        "in_progress" => Some(TaskStatus::InProgress),
                        "done" => Some(TaskStatus::Done),
                        "cancelled" => Some(TaskStatus::Cancelled),
                        _ => None,
                    }),
                    priority: arg_str(&args, "priority").and_then(|p| match p.as_str() {
                        "low" => Some(crate::core::TaskPriority::Low),
                        "medium" => Some(crate::core::TaskPriority::Medium),
                        "high" => Some(crate::core::TaskPriority::High),
                        _ => None,
                    }),
                    due_date: arg_date(&args, "due_date").map(Some),
                    ..TaskPatch::default()
                };
                let updated = ctx.services.doc_store.update_task(&task.id, patch).await?;
                Ok(json!({"updated": updated.id, "status": updated.status}))
            })
        },
    }
}

fn tool_remove_task() -> Tool {
    Tool {
        name: "remove_task",
        description: "Remove a task by id or title.",
        schema: json!({
            "type": "object",
            "properties": {"id": {"type": "string"}, "title": {"type": "string"}},
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let selector = selector_args(&args).ok_or_else(|| {
                    Error::Agent(crate::error::AgentError::InvalidArguments {
                        tool: "remove_task".to_string(),
                        reason: "need id or title".to_string(),
                    })
                })?;
                let task = resolve_selector(&ctx.services, &selector).await?;
                let removed = ctx.services.doc_store.remove_task(&task.id).await?;
                Ok(json!({"removed": removed.id, "title": removed.title}))
            })
        },
    }
}

fn tool_add_meeting() -> Tool {
    Tool {
        name: "add_meeting",
        description: "Add a meeting on a day with start and end times.",
        schema: json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "date": {"type": "string"},
                "start": {"type": "string"},
                "end": {"type": "string"},
                "participants": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["title", "start", "end"],
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let title = required_str(&args, "title", "add_meeting")?;
                let date = arg_date(&args, "date").unwrap_or(ctx.today);
                let start_time = arg_str(&args, "start")
                    .as_deref()
                    .and_then(parse_time_of_day)
                    .ok_or_else(|| Error::Input {
                        message: "meeting start must be HH:MM".to_string(),
                    })?;
                let end_time = arg_str(&args, "end")
                    .as_deref()
                    .and_then(parse_time_of_day)
                    .ok_or_else(|| Error::Input {
                        message: "meeting end must be HH:MM".to_string(),
                    })?;

                let offset = FixedOffset::east_opt(0).ok_or_else(|| Error::Internal {
                    message: "utc offset".to_string(),
                })?;
                let to_dt = |time: chrono::NaiveTime| {
                    offset
                        .from_local_datetime(&date.and_time(time))
                        .single()
                        .ok_or_else(|| Error::Input {
                            message: "ambiguous meeting time".to_string(),
                        })
                };

                let meeting = Meeting {
                    id: format!("meeting-{}", &Uuid::new_v4().to_string()[..8]),
                    title,
                    start: to_dt(start_time)?,
                    end: to_dt(end_time)?,
                    participants: arg_list(&args, "participants"),
                };
                let id = meeting.id.clone();
                ctx.services.doc_store.add_meeting(meeting).await?;
                Ok(json!({"created": id}))
            })
        },
    }
}

fn tool_remove_meeting() -> Tool {
    Tool {
        name: "remove_meeting",
        description: "Remove a meeting by id.",
        schema: json!({
            "type": "object",
            "properties": {"id": {"type": "string"}},
            "required": ["id"],
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let id = required_str(&args, "id", "remove_meeting")?;
                let removed = ctx.services.doc_store.remove_meeting(&id).await?;
                Ok(json!({"removed": removed.id, "title": removed.title}))
            })
        },
    }
}

fn tool_add_log() -> Tool {
    Tool {
        name: "add_log",
        description: "Append a work log entry.",
        schema: json!({
            "type": "object",
            "properties": {
                "description": {"type": "string"},
                "hours": {"type": "number"},
                "task_id": {"type": "string"},
                "date": {"type": "string"}
            },
            "required": ["description"],
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let log = WorkLog {
                    log_id: format!("log-{}", &Uuid::new_v4().to_string()[..8]),
                    date: arg_date(&args, "date").unwrap_or(ctx.today),
                    description: required_str(&args, "description", "add_log")?,
                    actual_hours: args.get("hours").and_then(Value::as_f64).unwrap_or(0.0),
                    task_id: arg_str(&args, "task_id"),
                };
                let id = log.log_id.clone();
                ctx.services.doc_store.append_log(log).await?;
                Ok(json!({"created": id}))
            })
        },
    }
}

fn tool_remove_log() -> Tool {
    Tool {
        name: "remove_log",
        description: "Remove a work log entry by id.",
        schema: json!({
            "type": "object",
            "properties": {"log_id": {"type": "string"}},
            "required": ["log_id"],
            "additionalProperties": false
        }),
        invoke: |ctx, args| {
            Box::pin(async move {
                let log_id = required_str(&args, "log_id", "remove_log")?;
                let removed = ctx.services.doc_store.remove_log(&log_id).await?;
                Ok(json!({"removed": removed.log_id}))
            })
        },
    }
}
