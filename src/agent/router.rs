//! Session-level agent routing.
//!
//! A session is a channel pair: a lazy sequence of queries in, a lazy
//! sequence of response fragments out (finite per query, restartable
//! across queries). Queries are serialized in send order; each one is
//! resolved for temporal context, parsed into a command, dispatched to
//! the owning agent's tool, and streamed back. A failing query emits a
//! single typed error fragment and the session stays open.

use std::sync::Arc;

use chrono::NaiveDate;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::fragment::Fragment;
use super::{Agent, ToolContext, find_tool, registry};
use crate::Result;
use crate::error::{AgentError, Error};
use crate::intent::Command;
use crate::llm::oneshot_request;
use crate::services::Services;

/// One query submitted to a session.
pub struct SessionQuery {
    /// The query text.
    pub text: String,
    /// Cancellation for this query only.
    pub cancel: CancellationToken,
}

impl SessionQuery {
    /// A query with a fresh (never-fired) cancellation token.
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Client half of an open session.
pub struct SessionHandle {
    /// Send queries here, in order.
    pub queries: mpsc::Sender<SessionQuery>,
    /// Receive response fragments here; each query's fragments end with
    /// [`Fragment::Done`].
    pub fragments: mpsc::Receiver<Fragment>,
}

impl SessionHandle {
    /// Splits the handle into the query sender and a fragment `Stream`,
    /// for pipelined consumers that forward fragments as they arrive.
    #[must_use]
    pub fn into_parts(
        self,
    ) -> (
        mpsc::Sender<SessionQuery>,
        tokio_stream::wrappers::ReceiverStream<Fragment>,
    ) {
        (
            self.queries,
            tokio_stream::wrappers::ReceiverStream::new(self.fragments),
        )
    }

    /// Sends one query and collects its fragments up to `Done`.
    ///
    /// Convenience for non-pipelined callers (the CLI session loop).
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::SessionClosed`] when the session task is
    /// gone.
    pub async fn ask(&mut self, text: &str) -> Result<Vec<Fragment>> {
        self.queries
            .send(SessionQuery::new(text))
            .await
            .map_err(|_| Error::Agent(AgentError::SessionClosed))?;

        let mut collected = Vec::new();
        while let Some(fragment) = self.fragments.recv().await {
            let done = fragment.is_done();
            collected.push(fragment);
            if done {
                return Ok(collected);
            }
        }
        Err(Error::Agent(AgentError::SessionClosed))
    }
}

/// Routes queries to agents over the shared services.
pub struct AgentRouter {
    services: Arc<Services>,
    agents: Vec<Agent>,
}

impl AgentRouter {
    /// Creates a router with the built-in agent registry.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            agents: registry(),
        }
    }

    /// Opens a session; queries are processed one at a time in send
    /// order, and the session survives per-query failures.
    #[must_use]
    pub fn open_session(self: Arc<Self>, today: NaiveDate) -> SessionHandle {
        let (query_tx, mut query_rx) = mpsc::channel::<SessionQuery>(16);
        let (fragment_tx, fragment_rx) = mpsc::channel::<Fragment>(64);

        tokio::spawn(async move {
            while let Some(query) = query_rx.recv().await {
                self.handle_query(&query.text, today, &query.cancel, &fragment_tx)
                    .await;
            }
        });

        SessionHandle {
            queries: query_tx,
            fragments: fragment_rx,
        }
    }

    /// Processes one query into fragments, always ending with `Done`.
    pub async fn handle_query(
        &self,
        text: &str,
        today: NaiveDate,
        cancel: &CancellationToken,
        out: &mpsc::Sender<Fragment>,
    ) {
        debug!(query = text, "routing query");
        if let Err(error) = self.run_query(text, today, cancel, out).await {
            let _ = out.send(Fragment::error(&error)).await;
        }
        let _ = out.send(Fragment::Done).await;
    }

    async fn run_query(
        &self,
        text: &str,
        today: NaiveDate,
        cancel: &CancellationToken,
        out: &mpsc::Sender<Fragment>,
    ) -> Result<()> {
        let command = self.services.intent.parse(text, today).await;

        match command {
            Command::SmallTalk { text } => self.small_talk(&text, cancel, out).await,
            Command::Unknown { .. } => {
                // Input errors recover locally: ask for clarification
                let _ = out
                    .send(Fragment::Text {
                        text: "I didn't catch an action there. Try \"plan tomorrow\", \
                               \"add task: …\", \"search …\", or \"brainstorm task id …\"."
                            .to_string(),
                    })
                    .await;
                Ok(())
            }
            other => {
                let (tool_name, args) = invocation_for(&other).ok_or_else(|| {
                    Error::Internal {
                        message: "command without tool mapping".to_string(),
                    }
                })?;
                self.dispatch(tool_name, args, today, cancel, out).await
            }
        }
    }

    /// Dispatches one tool invocation and streams its fenced output.
    async fn dispatch(
        &self,
        tool_name: &str,
        args: Value,
        today: NaiveDate,
        cancel: &CancellationToken,
        out: &mpsc::Sender<Fragment>,
    ) -> Result<()> {
        let (agent, tool) = find_tool(&self.agents, tool_name).ok_or_else(|| {
            Error::Agent(AgentError::UnknownTool {
                name: tool_name.to_string(),
            })
        })?;
        debug!(agent = agent.name, tool = tool.name, "dispatching");

        let context = ToolContext {
            services: Arc::clone(&self.services),
            today,
            cancel: cancel.clone(),
        };
        let output = (tool.invoke)(context, args).await?;

        let _ = out
            .send(Fragment::Tool {
                marker: tool.name.to_string(),
                text: render_output(tool.name, &output),
            })
            .await;
        Ok(())
    }

    /// Streams a no-tools conversational answer, preserving token
    /// order. Cancellation aborts the stream mid-way.
    async fn small_talk(
        &self,
        text: &str,
        cancel: &CancellationToken,
        out: &mpsc::Sender<Fragment>,
    ) -> Result<()> {
        let companion_prompt = self
            .agents
            .iter()
            .find(|a| a.name == "companion")
            .map_or("You are a helpful assistant.", |a| a.system_prompt);
        let request = oneshot_request(
            &self.services.settings.llm_model,
            companion_prompt,
            text,
            false,
        );

        let mut stream = self
            .services
            .provider
            .chat_stream(&request)
            .await
            .map_err(Error::Provider)?;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(Error::Agent(AgentError::Cancelled));
                }
                piece = stream.next() => match piece {
                    Some(Ok(token)) => {
                        let _ = out.send(Fragment::Text { text: token }).await;
                    }
                    Some(Err(e)) => return Err(Error::Provider(e)),
                    None => return Ok(()),
                },
            }
        }
    }
}

/// Maps a parsed command to its tool invocation (dispatch by data).
fn invocation_for(command: &Command) -> Option<(&'static str, Value)> {
    let invocation = match command {
        Command::AddTask {
            title,
            id,
            priority,
            due_date,
            tags,
            estimate_hours,
        } => (
            "add_task",
            json!({
                "title": title,
                "id": id,
                "priority": priority,
                "due_date": due_date,
                "tags": tags,
                "estimate_hours": estimate_hours,
            }),
        ),
        Command::UpdateTask {
            selector,
            status,
            priority,
            due_date,
        } => {
            let mut args = json!({
                "status": status,
                "priority": priority,
                "due_date": due_date,
            });
            set_selector(&mut args, selector);
            ("update_task", args)
        }
        Command::RemoveTask { selector } => {
            let mut args = json!({});
            set_selector(&mut args, selector);
            ("remove_task", args)
        }
        Command::SearchTasks { query } => ("search_tasks", json!({"query": query})),
        Command::AddMeeting {
            title,
            date,
            start,
            end,
            participants,
        } => (
            "add_meeting",
            json!({
                "title": title,
                "date": date,
                "start": start,
                "end": end,
                "participants": participants,
            }),
        ),
        Command::RemoveMeeting { id } => ("remove_meeting", json!({"id": id})),
        Command::AddLog {
            description,
            hours,
            task_id,
            date,
        } => (
            "add_log",
            json!({
                "description": description,
                "hours": hours,
                "task_id": task_id,
                "date": date,
            }),
        ),
        Command::RemoveLog { log_id } => ("remove_log", json!({"log_id": log_id})),
        Command::PlanDay { date } => ("plan_day", json!({"date": date})),
        Command::Brainstorm { request } => ("brainstorm", json!({"request": request})),
        Command::RagSearch { query, collections } => (
            "rag_search",
            json!({"query": query, "collections": collections}),
        ),
        Command::SmallTalk { .. } | Command::Unknown { .. } => return None,
    };
    Some(invocation)
}

/// Copies a selector into tool args.
fn set_selector(args: &mut Value, selector: &crate::intent::TaskSelector) {
    use crate::intent::TaskSelector;
    if let Some(map) = args.as_object_mut() {
        match selector {
            TaskSelector::ById(id) => {
                map.insert("id".to_string(), Value::String(id.clone()));
            }
            TaskSelector::ByTitle(title) => {
                map.insert("title".to_string(), Value::String(title.clone()));
            }
        }
    }
}

/// Renders tool output for the stream: markdown for the content-bearing
/// tools, compact JSON otherwise.
fn render_output(tool_name: &str, output: &Value) -> String {
    match tool_name {
        "plan_day" => {
            let yesterday = output["yesterday_markdown"].as_str().unwrap_or_default();
            let tomorrow = output["tomorrow_markdown"].as_str().unwrap_or_default();
            format!("{yesterday}\n{tomorrow}")
        }
        "brainstorm" => output["content"].as_str().unwrap_or_default().to_string(),
        "rag_search" => {
            let empty = Vec::new();
            let results = output["results"].as_array().unwrap_or(&empty);
            if results.is_empty() {
                "No results.".to_string()
            } else {
                results
                    .iter()
                    .enumerate()
                    .map(|(i, r)| {
                        format!(
                            "{}. [{}] {}",
                            i + 1,
                            r["id"].as_str().unwrap_or("?"),
                            r["body"].as_str().unwrap_or_default()
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        }
        _ => serde_json::to_string_pretty(output)
            .unwrap_or_else(|_| output.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::llm::ScriptedProvider;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    async fn router_with(provider: ScriptedProvider) -> (Arc<AgentRouter>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let services = Services::ephemeral(
            Settings::default(),
            Arc::new(provider),
            dir.path().to_path_buf(),
        )
        .unwrap();
        (Arc::new(AgentRouter::new(Arc::new(services))), dir)
    }

    fn tool_fragment(fragments: &[Fragment]) -> Option<(&str, &str)> {
        fragments.iter().find_map(|f| match f {
            Fragment::Tool { marker, text } => Some((marker.as_str(), text.as_str())),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_add_then_search_tasks_via_fallback_parse() {
        // Provider down: the regex fallback drives both commands
        let (router, _dir) = router_with(ScriptedProvider::unavailable()).await;
        let mut session = router.open_session(today());

        let fragments = session.ask("add task: ship the release notes").await.unwrap();
        let (marker, text) = tool_fragment(&fragments).unwrap();
        assert_eq!(marker, "add_task");
        assert!(text.contains("ship the release notes"));

        let fragments = session.ask("search tasks: release").await.unwrap();
        let (marker, text) = tool_fragment(&fragments).unwrap();
        assert_eq!(marker, "search_tasks");
        assert!(text.contains("ship the release notes"));
    }

    #[tokio::test]
    async fn test_plan_query_resolves_tomorrow() {
        let (router, _dir) = router_with(ScriptedProvider::unavailable()).await;
        let mut session = router.open_session(today());

        let fragments = session.ask("plan tomorrow").await.unwrap();
        let (marker, text) = tool_fragment(&fragments).unwrap();
        assert_eq!(marker, "plan_day");
        assert!(text.contains("2025-06-11"));
    }

    #[tokio::test]
    async fn test_error_fragment_session_survives() {
        let (router, _dir) = router_with(ScriptedProvider::unavailable()).await;
        let mut session = router.open_session(today());

        let fragments = session.ask("remove task T99").await.unwrap();
        let error = fragments.iter().find_map(|f| match f {
            Fragment::Error { kind, message, correlation_id } => {
                Some((kind.clone(), message.clone(), correlation_id.clone()))
            }
            _ => None,
        });
        let (kind, message, correlation_id) = error.unwrap();
        assert_eq!(kind, "store");
        assert!(message.contains("T99"));
        assert!(!correlation_id.is_empty());

        // The session still answers afterwards
        let fragments = session.ask("add task: recover nicely").await.unwrap();
        assert!(tool_fragment(&fragments).is_some());
    }

    #[tokio::test]
    async fn test_small_talk_streams_in_order() {
        let provider = ScriptedProvider::new([
            r#"{"action":"small_talk","data":{"text":"how are you"}}"#,
            "doing great, thanks for asking",
        ]);
        let (router, _dir) = router_with(provider).await;
        let mut session = router.open_session(today());

        let fragments = session.ask("how are you").await.unwrap();
        let text: String = fragments
            .iter()
            .filter_map(|f| match f {
                Fragment::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "doing great, thanks for asking");
        assert!(fragments.last().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_unknown_asks_for_clarification() {
        let (router, _dir) = router_with(ScriptedProvider::unavailable()).await;
        let mut session = router.open_session(today());

        let fragments = session.ask("xyzzy").await.unwrap();
        let has_hint = fragments.iter().any(|f| {
            matches!(f, Fragment::Text { text } if text.contains("plan tomorrow"))
        });
        assert!(has_hint);
    }

    #[tokio::test]
    async fn test_queries_serialized_in_order() {
        let (router, _dir) = router_with(ScriptedProvider::unavailable()).await;
        let mut session = router.open_session(today());

        // Responses arrive strictly in submit order
        for i in 0..3 {
            let fragments = session
                .ask(&format!("add task: ordered item {i}"))
                .await
                .unwrap();
            let (_, text) = tool_fragment(&fragments).unwrap();
            assert!(text.contains(&format!("ordered item {i}")));
        }
    }

    #[tokio::test]
    async fn test_into_parts_streams_fragments() {
        let (router, _dir) = router_with(ScriptedProvider::unavailable()).await;
        let session = router.open_session(today());
        let (queries, mut fragments) = session.into_parts();

        queries
            .send(SessionQuery::new("add task: streamed item"))
            .await
            .unwrap();

        let mut saw_tool = false;
        while let Some(fragment) = fragments.next().await {
            if matches!(&fragment, Fragment::Tool { .. }) {
                saw_tool = true;
            }
            if fragment.is_done() {
                break;
            }
        }
        assert!(saw_tool);
    }

    #[tokio::test]
    async fn test_brainstorm_not_found_is_typed() {
        let (router, _dir) = router_with(ScriptedProvider::unavailable()).await;
        let mut session = router.open_session(today());

        let fragments = session.ask("brainstorm task id missing-7").await.unwrap();
        let kind = fragments.iter().find_map(|f| match f {
            Fragment::Error { kind, .. } => Some(kind.clone()),
            _ => None,
        });
        assert_eq!(kind.as_deref(), Some("brainstorm"));
    }
}
