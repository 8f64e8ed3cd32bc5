//! Device-local history backend
//!
//! The whole history lives in one JSON record:
//!
//! ```json
//! { "sessions": [...], "preferences": {...}, "lastSyncAt": "2025-01-03T08:00:00Z" }
//! ```
//!
//! Every mutation rewrites the record through a temp file and rename, so a
//! crash mid-write leaves the previous record intact. Records are keyed by
//! session id only; the local store has no notion of an owner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mwl_common::{Error, Result, Session, SessionPatch};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::{sort_newest_first, BackendKind, HistoryBackend};
use crate::filter::HistoryFilter;

/// Persisted local record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub preferences: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// JSON-file history store
pub struct LocalStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the record
    lock: Mutex<()>,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record; a missing file is an empty history
    pub async fn load(&self) -> Result<LocalRecord> {
        let _guard = self.lock.lock().await;
        self.read_record().await
    }

    async fn read_record(&self) -> Result<LocalRecord> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(LocalRecord::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Persistence(format!(
                    "corrupt local history {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalRecord::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_record(&self, record: &LocalRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(
            "Wrote local history ({} sessions) to {}",
            record.sessions.len(),
            self.path.display()
        );
        Ok(())
    }

    /// Run `f` against the record and persist the result
    async fn mutate<T>(&self, f: impl FnOnce(&mut LocalRecord) -> Result<T>) -> Result<T> {
        let _guard = self.lock.lock().await;
        let mut record = self.read_record().await?;
        let out = f(&mut record)?;
        self.write_record(&record).await?;
        Ok(out)
    }

    /// Every local session, unfiltered
    pub async fn all_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.load().await?.sessions)
    }

    pub async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.load().await?.last_sync_at)
    }

    pub async fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<()> {
        self.mutate(|record| {
            record.last_sync_at = Some(at);
            Ok(())
        })
        .await
    }

    pub async fn preferences(&self) -> Result<BTreeMap<String, serde_json::Value>> {
        Ok(self.load().await?.preferences)
    }

    pub async fn set_preference(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.mutate(|record| {
            record.preferences.insert(key.to_string(), value);
            Ok(())
        })
        .await
    }

    /// Drop records whose ownership moved to the cloud
    pub async fn remove_sessions(&self, ids: &HashSet<Uuid>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.mutate(|record| {
            let before = record.sessions.len();
            record.sessions.retain(|s| !ids.contains(&s.id));
            Ok(before - record.sessions.len())
        })
        .await
    }

    /// Serialize the whole record for backup
    pub async fn export_json(&self) -> Result<String> {
        let record = self.load().await?;
        Ok(serde_json::to_string_pretty(&record)?)
    }

    /// Merge an exported record into this store
    ///
    /// Every session is validated first; one bad record rejects the whole
    /// payload and nothing is written. Sessions whose ids already exist are
    /// kept as they are. Returns the number of sessions added.
    pub async fn import_json(&self, data: &str) -> Result<usize> {
        let incoming: LocalRecord = serde_json::from_str(data)
            .map_err(|e| Error::Validation(format!("malformed history payload: {}", e)))?;

        let mut seen = HashSet::new();
        for session in &incoming.sessions {
            session.validate()?;
            if !seen.insert(session.id) {
                return Err(Error::Validation(format!(
                    "duplicate session id {} in payload",
                    session.id
                )));
            }
        }

        let added = self
            .mutate(|record| {
                let existing: HashSet<Uuid> = record.sessions.iter().map(|s| s.id).collect();
                let fresh: Vec<Session> = incoming
                    .sessions
                    .into_iter()
                    .filter(|s| !existing.contains(&s.id))
                    .collect();
                let added = fresh.len();
                record.sessions.extend(fresh);
                for (key, value) in incoming.preferences {
                    record.preferences.entry(key).or_insert(value);
                }
                Ok(added)
            })
            .await?;

        info!("Imported {} sessions into local history", added);
        Ok(added)
    }
}

#[async_trait]
impl HistoryBackend for LocalStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let session = session.clone();
        self.mutate(move |record| {
            match record.sessions.iter_mut().find(|s| s.id == session.id) {
                Some(existing) => *existing = session,
                None => record.sessions.push(session),
            }
            Ok(())
        })
        .await
    }

    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self
            .all_sessions()
            .await?
            .into_iter()
            .filter(|s| filter.matches(s))
            .collect();
        sort_newest_first(&mut sessions);
        Ok(sessions)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Session>> {
        Ok(self.all_sessions().await?.into_iter().find(|s| s.id == id))
    }

    async fn update(&self, id: Uuid, patch: &SessionPatch) -> Result<Session> {
        patch.validate()?;
        self.mutate(|record| {
            let session = record
                .sessions
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| Error::NotFound(format!("session {}", id)))?;
            patch.apply(session)?;
            Ok(session.clone())
        })
        .await
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.mutate(|record| {
            let before = record.sessions.len();
            record.sessions.retain(|s| s.id != id);
            if record.sessions.len() == before {
                return Err(Error::NotFound(format!("session {}", id)));
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn finished(script: &str, start: DateTime<Utc>, elapsed: u32) -> Session {
        let mut s = Session::begin(script, start);
        s.finalize(start + Duration::seconds(elapsed as i64), elapsed, 60)
            .unwrap();
        s
    }

    fn store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("history.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_history() {
        let (_dir, store) = store();
        assert!(store.all_sessions().await.unwrap().is_empty());
        assert_eq!(store.last_sync_at().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let (_dir, store) = store();
        let mut session = finished("breath", Utc::now(), 60);
        store.save(&session).await.unwrap();
        session.notes = Some("again".to_string());
        store.save(&session).await.unwrap();

        let all = store.all_sessions().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].notes.as_deref(), Some("again"));
    }

    #[tokio::test]
    async fn test_list_filters_in_memory_newest_first() {
        let (_dir, store) = store();
        let t0 = "2025-01-01T08:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let a = finished("breath", t0, 60);
        let b = finished("body-scan", t0 + Duration::days(1), 30);
        let c = finished("breath", t0 + Duration::days(2), 60);
        for s in [&a, &b, &c] {
            store.save(s).await.unwrap();
        }

        let all = store.list(&HistoryFilter::all()).await.unwrap();
        assert_eq!(
            all.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![c.id, b.id, a.id]
        );

        let breath = store
            .list(&HistoryFilter {
                script_id: Some("breath".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(breath.len(), 2);

        let incomplete = store
            .list(&HistoryFilter {
                completed: Some(false),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].id, b.id);
    }

    #[tokio::test]
    async fn test_update_and_delete_unknown_id_fail() {
        let (_dir, store) = store();
        let missing = Uuid::new_v4();
        let patch = SessionPatch {
            rating: Some(3),
            ..Default::default()
        };
        assert!(matches!(
            store.update(missing, &patch).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(store.delete(missing).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_patches_rating_and_notes() {
        let (_dir, store) = store();
        let session = finished("breath", Utc::now(), 60);
        store.save(&session).await.unwrap();

        let updated = store
            .update(
                session.id,
                &SessionPatch {
                    rating: Some(5),
                    notes: Some("deep".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.rating, Some(5));
        assert_eq!(store.get(session.id).await.unwrap(), Some(updated));

        store.delete(session.id).await.unwrap();
        assert_eq!(store.get(session.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_persistence_error() {
        let (_dir, store) = store();
        tokio::fs::write(store.path(), b"{not json").await.unwrap();
        let err = store.all_sessions().await.unwrap_err();
        assert!(err.is_persistence());
    }

    #[tokio::test]
    async fn test_record_layout_on_disk() {
        let (_dir, store) = store();
        store.save(&finished("breath", Utc::now(), 60)).await.unwrap();
        store.set_preference("volume", serde_json::json!(0.5)).await.unwrap();
        store.set_last_sync_at(Utc::now()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(store.path()).await.unwrap()).unwrap();
        assert!(raw["sessions"].is_array());
        assert_eq!(raw["preferences"]["volume"], serde_json::json!(0.5));
        assert!(raw["lastSyncAt"].is_string());
    }

    #[tokio::test]
    async fn test_import_rejects_whole_payload_on_one_bad_record() {
        let (_dir, store) = store();
        let good = finished("breath", Utc::now(), 60);
        let mut bad = finished("breath", Utc::now(), 60);
        bad.rating = Some(9);
        let payload = serde_json::to_string(&LocalRecord {
            sessions: vec![good, bad],
            ..Default::default()
        })
        .unwrap();

        assert!(matches!(
            store.import_json(&payload).await,
            Err(Error::Validation(_))
        ));
        assert!(store.all_sessions().await.unwrap().is_empty());
        assert!(matches!(
            store.import_json("[1, 2").await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_export_import_between_devices() {
        let (_dir_a, device_a) = store();
        let (_dir_b, device_b) = store();
        let shared = finished("breath", Utc::now(), 60);
        device_a.save(&shared).await.unwrap();
        device_a
            .save(&finished("body-scan", Utc::now(), 20))
            .await
            .unwrap();
        device_b.save(&shared).await.unwrap();

        let exported = device_a.export_json().await.unwrap();
        assert_eq!(device_b.import_json(&exported).await.unwrap(), 1);
        assert_eq!(device_b.all_sessions().await.unwrap().len(), 2);
    }
}
