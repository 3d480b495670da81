//! Free-window computation and greedy task fitting.
//!
//! Subtracts a day's meetings from the working hours, discards slivers
//! under 15 minutes, and packs open tasks into the remaining windows by
//! score. A task may span windows only when it has sub-items to split
//! along.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::core::{Meeting, Task, TaskDetail};

/// Minimum usable window length in minutes.
pub const MIN_WINDOW_MINUTES: i64 = 15;

/// A free interval within the working day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    /// Window start.
    pub start: NaiveTime,
    /// Window end.
    pub end: NaiveTime,
}

impl TimeWindow {
    /// Window length in whole minutes.
    #[must_use]
    pub fn minutes(&self) -> i64 {
        i64::from(self.end.num_seconds_from_midnight()) / 60
            - i64::from(self.start.num_seconds_from_midnight()) / 60
    }
}

/// A task placed into the schedule.
#[derive(Debug, Clone)]
pub struct ScheduledBlock {
    /// Task id.
    pub task_id: String,
    /// Task title.
    pub title: String,
    /// Block start.
    pub start: NaiveTime,
    /// Block end.
    pub end: NaiveTime,
    /// Sub-item label when the task was split across windows.
    pub sub_item: Option<String>,
}

/// Computes free windows: `[start, end]` minus the day's meetings, with
/// windows under [`MIN_WINDOW_MINUTES`] discarded.
///
/// `start == end` yields no windows (an empty plan, not an error).
#[must_use]
pub fn free_windows(
    start: NaiveTime,
    end: NaiveTime,
    meetings: &[Meeting],
    date: NaiveDate,
) -> Vec<TimeWindow> {
    if start >= end {
        return Vec::new();
    }

    // Meeting intervals clamped to the working day, merged in order
    let mut busy: Vec<(NaiveTime, NaiveTime)> = meetings
        .iter()
        .filter(|m| m.on_date(date))
        .map(|m| {
            let m_start = if m.start.date_naive() < date {
                NaiveTime::MIN
            } else {
                m.start.time()
            };
            let m_end = if m.end.date_naive() > date {
                NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
            } else {
                m.end.time()
            };
            (m_start.max(start), m_end.min(end))
        })
        .filter(|(s, e)| s < e)
        .collect();
    busy.sort();

    let mut merged: Vec<(NaiveTime, NaiveTime)> = Vec::new();
    for interval in busy {
        match merged.last_mut() {
            Some(last) if interval.0 <= last.1 => last.1 = last.1.max(interval.1),
            _ => merged.push(interval),
        }
    }

    let mut windows = Vec::new();
    let mut cursor = start;
    for (busy_start, busy_end) in merged {
        if cursor < busy_start {
            windows.push(TimeWindow {
                start: cursor,
                end: busy_start,
            });
        }
        cursor = cursor.max(busy_end);
    }
    if cursor < end {
        windows.push(TimeWindow { start: cursor, end });
    }

    windows.retain(|w| w.minutes() >= MIN_WINDOW_MINUTES);
    windows
}

/// Scores a task for scheduling: `0.6 * priority + 0.4 * urgency`.
///
/// Urgency decays linearly over a 14-day horizon to the due date and
/// defaults to 0.25 without one.
#[must_use]
pub fn task_score(task: &Task, target_date: NaiveDate) -> f64 {
    const PRIORITY_WEIGHT: f64 = 0.6;
    const URGENCY_WEIGHT: f64 = 0.4;

    let urgency = task.due_date.map_or(0.25, |due| {
        let days_until = (due - target_date).num_days() as f64;
        (1.0 - days_until / 14.0).clamp(0.0, 1.0)
    });

    PRIORITY_WEIGHT * task.priority.score() + URGENCY_WEIGHT * urgency
}

/// Hours a task is assumed to take when no estimate is recorded.
const DEFAULT_ESTIMATE_HOURS: f64 = 1.0;

struct Candidate {
    task: Task,
    score: f64,
    hours_left: f64,
    splittable: bool,
    sub_items: Vec<String>,
    next_sub_item: usize,
}

/// Packs tasks into windows greedily.
///
/// Within each window, the highest-scoring task whose remaining effort
/// fits is placed whole; tasks with sub-items may also take a partial
/// slot spanning into later windows. Ties break by earlier due date,
/// then id. Output blocks are chronological and pairwise disjoint.
#[must_use]
pub fn fit_tasks(
    windows: &[TimeWindow],
    tasks: &[Task],
    details: &HashMap<String, TaskDetail>,
    target_date: NaiveDate,
) -> Vec<ScheduledBlock> {
    let mut candidates: Vec<Candidate> = tasks
        .iter()
        .filter(|t| t.status.is_open())
        .map(|task| {
            let detail = details.get(&task.id);
            let sub_items = detail.map(|d| d.tasks.clone()).unwrap_or_default();
            Candidate {
                score: task_score(task, target_date),
                hours_left: task.estimate_hours.unwrap_or(DEFAULT_ESTIMATE_HOURS),
                splittable: !sub_items.is_empty(),
                sub_items,
                next_sub_item: 0,
                task: task.clone(),
            }
        })
        .collect();

    // Score descending; ties by earlier due date, then id
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| match (a.task.due_date, b.task.due_date) {
                (Some(a_due), Some(b_due)) => a_due.cmp(&b_due),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.task.id.cmp(&b.task.id))
    });

    let mut blocks = Vec::new();

    for window in windows {
        let mut cursor = window.start;
        loop {
            let minutes_free = i64::from(window.end.num_seconds_from_midnight()) / 60
                - i64::from(cursor.num_seconds_from_midnight()) / 60;
            if minutes_free < MIN_WINDOW_MINUTES {
                break;
            }
            #[allow(clippy::cast_precision_loss)]
            let hours_free = minutes_free as f64 / 60.0;

            // Whole placement first, then a split for sub-item tasks
            let pick = candidates
                .iter()
                .position(|c| c.hours_left > 0.0 && c.hours_left <= hours_free)
                .or_else(|| {
                    candidates
                        .iter()
                        .position(|c| c.hours_left > 0.0 && c.splittable)
                });
            let Some(index) = pick else { break };

            let candidate = &mut candidates[index];
            let slot_hours = candidate.hours_left.min(hours_free);
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let slot_minutes = (slot_hours * 60.0).round() as u32;
            if slot_minutes == 0 {
                // Residual effort below one minute; consider it done
                candidate.hours_left = 0.0;
                continue;
            }
            let slot_end = add_minutes(cursor, slot_minutes).min(window.end);

            // Label split blocks with the task's sub-items in order
            let is_partial = slot_hours + 1e-9 < candidate.hours_left;
            let was_split = candidate.next_sub_item > 0;
            let sub_item = if candidate.splittable && (is_partial || was_split) {
                let label = candidate.sub_items.get(candidate.next_sub_item).cloned();
                candidate.next_sub_item += 1;
                label
            } else {
                None
            };

            blocks.push(ScheduledBlock {
                task_id: candidate.task.id.clone(),
                title: candidate.task.title.clone(),
                start: cursor,
                end: slot_end,
                sub_item,
            });

            candidate.hours_left -= slot_hours;
            cursor = slot_end;
        }
    }

    blocks
}

/// Adds minutes to a time, saturating at end of day.
fn add_minutes(time: NaiveTime, minutes: u32) -> NaiveTime {
    let total = time.num_seconds_from_midnight() + minutes * 60;
    NaiveTime::from_num_seconds_from_midnight_opt(total.min(86_399), 0).unwrap_or(time)
}
