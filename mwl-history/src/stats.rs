//! Derived history statistics
//!
//! Statistics are never stored as the source of truth; they are recomputed
//! from the session set of whichever identity currently owns history. The
//! cloud profile keeps a cached copy that sync merges with `merge_max`.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use mwl_common::time::local_day;
use mwl_common::Session;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Number of scripts reported in `favorite_scripts`
pub const FAVORITE_SCRIPT_COUNT: usize = 3;

/// Completed-session count for one script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCount {
    pub script_id: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statistics {
    /// Completed sessions only
    pub total_sessions: u32,
    /// Seconds across completed sessions
    pub total_duration: u64,
    /// Completed / all, 0.0 for an empty history
    pub completion_rate: f64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub favorite_scripts: Vec<ScriptCount>,
    pub last_session_at: Option<DateTime<Utc>>,
}

impl Statistics {
    /// Derive statistics from a session set as seen on `today`
    pub fn compute(sessions: &[Session], today: NaiveDate) -> Self {
        let completed: Vec<&Session> = sessions.iter().filter(|s| s.completed).collect();

        let total_sessions = completed.len() as u32;
        let total_duration = completed.iter().map(|s| s.duration as u64).sum();
        let completion_rate = if sessions.is_empty() {
            0.0
        } else {
            completed.len() as f64 / sessions.len() as f64
        };

        let days: BTreeSet<NaiveDate> = completed.iter().map(|s| local_day(s.start_time)).collect();

        let mut per_script: HashMap<&str, u32> = HashMap::new();
        for s in &completed {
            *per_script.entry(s.script_id.as_str()).or_default() += 1;
        }
        let favorite_scripts = top_scripts(
            per_script
                .into_iter()
                .map(|(script_id, count)| ScriptCount {
                    script_id: script_id.to_string(),
                    count,
                })
                .collect(),
        );

        Self {
            total_sessions,
            total_duration,
            completion_rate,
            current_streak: current_streak(&days, today),
            longest_streak: longest_streak(&days),
            favorite_scripts,
            last_session_at: sessions.iter().map(|s| s.start_time).max(),
        }
    }

    /// Element-wise maximum of two statistics snapshots
    ///
    /// Used when local and cloud histories are reconciled; summing would
    /// double count sessions present on both sides.
    pub fn merge_max(&self, other: &Statistics) -> Statistics {
        let mut per_script: HashMap<String, u32> = HashMap::new();
        for entry in self.favorite_scripts.iter().chain(&other.favorite_scripts) {
            let count = per_script.entry(entry.script_id.clone()).or_default();
            *count = (*count).max(entry.count);
        }

        Statistics {
            total_sessions: self.total_sessions.max(other.total_sessions),
            total_duration: self.total_duration.max(other.total_duration),
            completion_rate: self.completion_rate.max(other.completion_rate),
            current_streak: self.current_streak.max(other.current_streak),
            longest_streak: self.longest_streak.max(other.longest_streak),
            favorite_scripts: top_scripts(
                per_script
                    .into_iter()
                    .map(|(script_id, count)| ScriptCount { script_id, count })
                    .collect(),
            ),
            last_session_at: self.last_session_at.max(other.last_session_at),
        }
    }
}

/// Highest counts first, ties broken by script id
fn top_scripts(mut counts: Vec<ScriptCount>) -> Vec<ScriptCount> {
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.script_id.cmp(&b.script_id)));
    counts.truncate(FAVORITE_SCRIPT_COUNT);
    counts
}

/// Consecutive days ending today (or yesterday when today has no session)
fn current_streak(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut day = if days.contains(&today) {
        today
    } else {
        today - Duration::days(1)
    };

    let mut streak = 0;
    while days.contains(&day) {
        streak += 1;
        day -= Duration::days(1);
    }
    streak
}

fn longest_streak(days: &BTreeSet<NaiveDate>) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for &day in days {
        run = match prev {
            Some(p) if day - p == Duration::days(1) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(day);
    }
    longest
}
