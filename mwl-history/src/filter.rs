//! History list filters

use chrono::{DateTime, Utc};
use mwl_common::Session;
use serde::{Deserialize, Serialize};

/// Filter applied to history reads
///
/// Cloud reads push every field into the SQL `WHERE` clause; local reads
/// evaluate `matches` in memory. Both bounds are inclusive on `start_time`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub script_id: Option<String>,
    pub completed: Option<bool>,
}

impl HistoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn completed_only() -> Self {
        Self {
            completed: Some(true),
            ..Default::default()
        }
    }

    pub fn matches(&self, session: &Session) -> bool {
        if let Some(from) = self.from {
            if session.start_time < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if session.start_time > to {
                return false;
            }
        }
        if let Some(script_id) = &self.script_id {
            if &session.script_id != script_id {
                return false;
            }
        }
        if let Some(completed) = self.completed {
            if session.completed != completed {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(script: &str, start: DateTime<Utc>, completed: bool) -> Session {
        let mut s = Session::begin(script, start);
        s.finalize(start + Duration::seconds(60), if completed { 60 } else { 10 }, 60)
            .unwrap();
        s
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let s = session("breath", Utc::now(), false);
        assert!(HistoryFilter::all().matches(&s));
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let start = "2025-01-02T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let s = session("breath", start, true);

        let exact = HistoryFilter {
            from: Some(start),
            to: Some(start),
            ..Default::default()
        };
        assert!(exact.matches(&s));

        let later = HistoryFilter {
            from: Some(start + Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!later.matches(&s));

        let earlier = HistoryFilter {
            to: Some(start - Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!earlier.matches(&s));
    }

    #[test]
    fn test_script_and_completion() {
        let s = session("body-scan", Utc::now(), true);
        let mut filter = HistoryFilter::completed_only();
        assert!(filter.matches(&s));
        filter.script_id = Some("breath".to_string());
        assert!(!filter.matches(&s));
        filter.script_id = Some("body-scan".to_string());
        filter.completed = Some(false);
        assert!(!filter.matches(&s));
    }
}
