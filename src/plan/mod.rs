//! Day planning.
//!
//! Builds a day's plan from tasks, work logs, meetings, and recent
//! meeting notes: a yesterday summary, open tasks scored and fitted
//! around meetings, and focus areas from the notes. Stateless between
//! calls; renders markdown only, never writes files.

mod focus;
mod schedule;

pub use focus::{llm_focus, rule_based_focus};
pub use schedule::{
    MIN_WINDOW_MINUTES, ScheduledBlock, TimeWindow, fit_tasks, free_windows, task_score,
};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Days, NaiveDate, NaiveTime};
use tracing::debug;

use crate::Result;
use crate::config::Settings;
use crate::core::{Meeting, Task, TaskDetail, WorkLog, resolve_date};
use crate::docstore::DocumentStore;
use crate::error::{Error, PlanError};
use crate::llm::LlmProvider;

/// How many days of meeting notes feed the focus pass.
const FOCUS_LOOKBACK_DAYS: u64 = 3;
/// Bounds on yesterday-summary bullets.
const YESTERDAY_BULLETS_MAX: usize = 5;
/// Maximum words per yesterday bullet.
const YESTERDAY_BULLET_WORDS: usize = 20;

/// A planning request.
#[derive(Debug, Clone, Default)]
pub struct PlanRequest {
    /// Target date expression (natural language or ISO); empty means
    /// today.
    pub target_date: Option<String>,
    /// Override of the configured working hours.
    pub work_hours: Option<(NaiveTime, NaiveTime)>,
    /// Ask the LLM for extra focus statements.
    pub use_llm_for_focus: bool,
    /// Freeform feedback carried into the rendered plan.
    pub feedback: Option<String>,
}

/// A produced plan: two markdown documents and the structured schedule.
#[derive(Debug, Clone)]
pub struct PlanOutput {
    /// The day the plan is for.
    pub target_date: NaiveDate,
    /// Markdown summary of the previous day's logs.
    pub yesterday_markdown: String,
    /// Markdown plan for the target day.
    pub tomorrow_markdown: String,
    /// The scheduled blocks behind the markdown.
    pub blocks: Vec<ScheduledBlock>,
}

/// Stateless day planner over the document store.
pub struct Planner {
    store: Arc<dyn DocumentStore>,
    provider: Option<Arc<dyn LlmProvider>>,
    model: String,
    work_hours: (NaiveTime, NaiveTime),
}

impl Planner {
    /// Creates a planner with the configured working hours.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, settings: &Settings) -> Self {
        Self {
            store,
            provider: None,
            model: settings.llm_model.clone(),
            work_hours: (settings.work_hours_start, settings.work_hours_end),
        }
    }

    /// Attaches the LLM used for the optional focus pass.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Produces a plan for the requested day.
    ///
    /// Loads and validates all four sources before planning; a schema
    /// error aborts with no partial plan. Work hours with `start ==
    /// end` yield an empty (but valid) plan.
    ///
    /// # Errors
    ///
    /// [`PlanError::UnresolvableDate`] for an unparseable date,
    /// [`PlanError::InvalidSource`] for invalid records, store errors
    /// as-is.
    pub async fn plan(&self, request: &PlanRequest, today: NaiveDate) -> Result<PlanOutput> {
        let target_date = match &request.target_date {
            Some(expr) => resolve_date(expr, today).ok_or_else(|| {
                Error::Plan(PlanError::UnresolvableDate {
                    input: expr.clone(),
                })
            })?,
            None => today,
        };
        let (work_start, work_end) = request.work_hours.unwrap_or(self.work_hours);
        if work_end < work_start {
            return Err(Error::Plan(PlanError::InvertedWorkHours {
                start: work_start.to_string(),
                end: work_end.to_string(),
            }));
        }

        // Load and validate every source up front; no partial plan
        let tasks = self.store.tasks().await?;
        let yesterday = target_date
            .checked_sub_days(Days::new(1))
            .unwrap_or(target_date);
        let logs = self.store.logs_for(yesterday).await?;
        let meetings = self.store.meetings_on(target_date).await?;
        let notes_from = target_date
            .checked_sub_days(Days::new(FOCUS_LOOKBACK_DAYS))
            .unwrap_or(target_date);
        let notes = self.store.notes_between(notes_from, target_date).await?;

        validate_meetings(&meetings)?;
        validate_logs(&logs)?;

        let mut details: HashMap<String, TaskDetail> = HashMap::new();
        for task in &tasks {
            if let Some(detail) = self.store.task_detail(&task.id).await? {
                details.insert(task.id.clone(), detail);
            }
        }

        // Schedule: free windows minus meetings, greedy fit by score
        let windows = free_windows(work_start, work_end, &meetings, target_date);
        let open_tasks: Vec<Task> = tasks
            .iter()
            .filter(|t| t.status.is_open())
            .cloned()
            .collect();
        let blocks = fit_tasks(&windows, &open_tasks, &details, target_date);

        // Focus areas: rules first, LLM statements appended on request
        let mut focus = rule_based_focus(&notes);
        if request.use_llm_for_focus
            && let Some(provider) = &self.provider
        {
            let extra = llm_focus(provider.as_ref(), &self.model, &notes, &open_tasks).await;
            for item in extra {
                if !focus.iter().any(|f| f.eq_ignore_ascii_case(&item)) {
                    focus.push(item);
                }
            }
        }

        debug!(
            date = %target_date,
            windows = windows.len(),
            blocks = blocks.len(),
            focus = focus.len(),
            "plan assembled"
        );

        Ok(PlanOutput {
            target_date,
            yesterday_markdown: render_yesterday(yesterday, &logs),
            tomorrow_markdown: render_day(
                target_date,
                &blocks,
                &meetings,
                &focus,
                request.feedback.as_deref(),
            ),
            blocks,
        })
    }
}

/// Meetings must satisfy `start < end`.
fn validate_meetings(meetings: &[Meeting]) -> Result<()> {
    for meeting in meetings {
        if !meeting.is_valid() {
            return Err(Error::Plan(PlanError::InvalidSource {
                source_name: "meetings".to_string(),
                reason: format!("meeting {} ends at or before it starts", meeting.id),
            }));
        }
    }
    Ok(())
}

/// Log entries must carry non-negative hours.
fn validate_logs(logs: &[WorkLog]) -> Result<()> {
    for log in logs {
        if log.actual_hours < 0.0 || !log.actual_hours.is_finite() {
            return Err(Error::Plan(PlanError::InvalidSource {
                source_name: "daily_logs".to_string(),
                reason: format!("log {} has invalid hours {}", log.log_id, log.actual_hours),
            }));
        }
    }
    Ok(())
}

/// Renders the yesterday summary: up to five bullets of at most twenty
/// words each.
fn render_yesterday(date: NaiveDate, logs: &[WorkLog]) -> String {
    let mut out = format!("## Yesterday ({date})\n\n");
    if logs.is_empty() {
        out.push_str("- No logged work.\n");
        return out;
    }
    for log in logs.iter().take(YESTERDAY_BULLETS_MAX) {
        let words: Vec<&str> = log.description.split_whitespace().collect();
        let mut bullet = words
            .iter()
            .take(YESTERDAY_BULLET_WORDS)
            .copied()
            .collect::<Vec<_>>()
            .join(" ");
        if words.len() > YESTERDAY_BULLET_WORDS {
            bullet.push('…');
        }
        out.push_str(&format!("- {bullet} ({:.1}h)\n", log.actual_hours));
    }
    out
}

/// Renders the day plan: schedule, meetings, focus areas.
fn render_day(
    date: NaiveDate,
    blocks: &[ScheduledBlock],
    meetings: &[Meeting],
    focus: &[String],
    feedback: Option<&str>,
) -> String {
    let mut out = format!("## Plan for {date}\n\n");

    out.push_str("### Schedule\n\n");
    if blocks.is_empty() {
        out.push_str("- Nothing scheduled.\n");
    }
    for block in blocks {
        let label = block.sub_item.as_ref().map_or_else(
            || block.title.clone(),
            |sub| format!("{}: {sub}", block.title),
        );
        out.push_str(&format!(
            "- {}–{} {} ({})\n",
            block.start.format("%H:%M"),
            block.end.format("%H:%M"),
            label,
            block.task_id
        ));
    }

    if !meetings.is_empty() {
        out.push_str("\n### Meetings\n\n");
        for meeting in meetings {
            out.push_str(&format!(
                "- {}–{} {}\n",
                meeting.start.format("%H:%M"),
                meeting.end.format("%H:%M"),
                meeting.title
            ));
        }
    }

    if !focus.is_empty() {
        out.push_str("\n### Focus Areas\n\n");
        for item in focus {
            out.push_str(&format!("- {item}\n"));
        }
    }

    if let Some(feedback) = feedback {
        out.push_str(&format!("\n> Feedback: {feedback}\n"));
    }

    out
}
