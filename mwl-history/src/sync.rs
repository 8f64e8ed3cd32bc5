//! Local to cloud reconciliation
//!
//! Runs when an anonymous identity converts to a permanent account. The pass
//! is a set difference on session ids: local sessions the cloud does not hold
//! yet are inserted under the new owner, and everything the cloud now holds
//! is dropped from the local record so each id has exactly one owner.
//!
//! Nothing here is transactional across the two stores. A pass interrupted
//! after the cloud insert but before the local cleanup is repaired by the
//! next pass, which finds those ids already present and equal.

use chrono::{DateTime, NaiveDate, Utc};
use mwl_common::{Error, Result, Session};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::HistoryBackend;
use crate::cloud::{format_timestamp, CloudStore};
use crate::filter::HistoryFilter;
use crate::local::LocalStore;
use crate::stats::Statistics;

/// Rows per insert transaction
pub const DEFAULT_SYNC_CHUNK_SIZE: usize = 50;

/// Outcome of one sync pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub user_id: String,
    /// Local sessions newly written to the cloud
    pub inserted: usize,
    /// Local sessions the cloud already held with identical fields
    pub already_present: usize,
    /// Ids held by both sides with divergent fields; the cloud copy was kept
    pub conflicts: Vec<Uuid>,
    /// Local sessions that could not be moved and stay on the device
    pub retained: usize,
    pub preferences_added: usize,
    /// Element-wise maximum of local and cloud statistics
    pub statistics: Statistics,
    pub synced_at: DateTime<Utc>,
}

/// Whether two copies of the same session disagree
///
/// Timestamps are compared in their stored form, since the cloud keeps
/// millisecond precision.
pub(crate) fn divergent(local: &Session, cloud: &Session) -> bool {
    let ts = |t: Option<DateTime<Utc>>| t.map(format_timestamp);
    local.script_id != cloud.script_id
        || format_timestamp(local.start_time) != format_timestamp(cloud.start_time)
        || ts(local.end_time) != ts(cloud.end_time)
        || local.completed != cloud.completed
        || local.duration != cloud.duration
        || local.rating != cloud.rating
        || local.notes != cloud.notes
}

/// Move local history into `cloud`'s owner
pub async fn sync_local_to_cloud(
    local: &LocalStore,
    cloud: &CloudStore,
    chunk_size: usize,
    today: NaiveDate,
) -> Result<SyncReport> {
    let record = local.load().await?;
    let cloud_before: HashMap<Uuid, Session> = cloud
        .list(&HistoryFilter::all())
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let mut missing = Vec::new();
    let mut already_present = 0;
    let mut conflicts = Vec::new();
    for session in &record.sessions {
        match cloud_before.get(&session.id) {
            None => missing.push(session.clone()),
            Some(existing) if divergent(session, existing) => {
                warn!("{}; keeping cloud copy", Error::SyncConflict { id: session.id });
                conflicts.push(session.id);
            }
            Some(_) => already_present += 1,
        }
    }

    let inserted = cloud.insert_missing(&missing, chunk_size).await?;

    let cloud_sessions: Vec<Session> = cloud_before.into_values().collect();
    let local_stats = Statistics::compute(&record.sessions, today);
    let mut cloud_stats = Statistics::compute(&cloud_sessions, today);
    if let Some(cached) = cloud.load_statistics().await? {
        cloud_stats = cloud_stats.merge_max(&cached);
    }
    let statistics = local_stats.merge_max(&cloud_stats);
    cloud.save_statistics(&statistics).await?;

    let preferences_added = cloud.merge_preferences(&record.preferences).await?;

    // Only ids the owner now holds leave the device
    let owned: HashSet<Uuid> = cloud
        .list(&HistoryFilter::all())
        .await?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let moved: HashSet<Uuid> = record
        .sessions
        .iter()
        .map(|s| s.id)
        .filter(|id| owned.contains(id))
        .collect();
    let removed = local.remove_sessions(&moved).await?;
    let retained = record.sessions.len() - moved.len();
    if retained > 0 {
        warn!(
            "{} local sessions could not be moved to {} and stay on the device",
            retained,
            cloud.user_id()
        );
    }

    let synced_at = Utc::now();
    local.set_last_sync_at(synced_at).await?;

    info!(
        "Synced local history to {}: {} inserted, {} already present, {} conflicts, {} removed locally",
        cloud.user_id(),
        inserted,
        already_present,
        conflicts.len(),
        removed
    );

    Ok(SyncReport {
        user_id: cloud.user_id().to_string(),
        inserted,
        already_present,
        conflicts,
        retained,
        preferences_added,
        statistics,
        synced_at,
    })
}
