//! History store facade
//!
//! Routes every call to the local or cloud backend according to the current
//! identity: an authenticated user reads and writes the cloud rows it owns,
//! anyone else (anonymous or signed out) uses the device-local record.

use chrono::{NaiveDate, Utc};
use mwl_common::events::{EventBus, MwlEvent};
use mwl_common::time::today_local;
use mwl_common::{Error, Result, Session, SessionPatch};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::backend::{BackendKind, HistoryBackend};
use crate::cloud::CloudStore;
use crate::db::init_cloud_database;
use crate::filter::HistoryFilter;
use crate::identity::{is_conversion, IdentityProvider};
use crate::local::LocalStore;
use crate::stats::Statistics;
use crate::sync::{self, SyncReport, DEFAULT_SYNC_CHUNK_SIZE};

/// Who owns the history currently in view (`None` = this device)
type Owner = Option<String>;

/// Local calendar day used for streaks
type DaySource = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

pub struct HistoryStore {
    local: Arc<LocalStore>,
    pool: SqlitePool,
    identity: Arc<dyn IdentityProvider>,
    events: Option<Arc<EventBus>>,
    chunk_size: usize,
    today: DaySource,
    /// Keyed by owner and the day the streaks were computed for
    stats_cache: Mutex<Option<(Owner, NaiveDate, Statistics)>>,
}

impl HistoryStore {
    pub fn new(local: LocalStore, pool: SqlitePool, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            local: Arc::new(local),
            pool,
            identity,
            events: None,
            chunk_size: DEFAULT_SYNC_CHUNK_SIZE,
            today: Arc::new(today_local),
            stats_cache: Mutex::new(None),
        }
    }

    /// Open the local record and cloud database at the given paths
    pub async fn open(
        local_path: &Path,
        cloud_database: &Path,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        let pool = init_cloud_database(cloud_database).await?;
        info!("History store: local={}", local_path.display());
        Ok(Self::new(LocalStore::new(local_path), pool, identity))
    }

    /// Broadcast save and sync events on `bus`
    pub fn with_events(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Replace the local-day clock used for streaks
    pub fn with_today(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    fn owner(&self) -> Owner {
        self.identity.authenticated_user().map(|u| u.id)
    }

    /// Backend for the current identity
    fn backend(&self) -> Arc<dyn HistoryBackend> {
        match self.owner() {
            Some(user_id) => Arc::new(CloudStore::new(self.pool.clone(), user_id)),
            None => self.local.clone(),
        }
    }

    pub fn current_backend(&self) -> BackendKind {
        if self.owner().is_some() {
            BackendKind::Cloud
        } else {
            BackendKind::Local
        }
    }

    async fn invalidate_stats(&self) {
        *self.stats_cache.lock().await = None;
    }

    fn emit(&self, event: MwlEvent) {
        if let Some(bus) = &self.events {
            bus.emit_lossy(event);
        }
    }

    /// Persist a finished session; returns the backend that took it
    pub async fn save(&self, session: &Session) -> Result<BackendKind> {
        session.validate()?;
        let backend = self.backend();
        backend.save(session).await?;
        self.invalidate_stats().await;

        debug!("Saved session {} to {} store", session.id, backend.kind());
        self.emit(MwlEvent::SessionSaved {
            session_id: session.id,
            backend: backend.kind().to_string(),
            timestamp: Utc::now(),
        });
        Ok(backend.kind())
    }

    pub async fn list(&self, filter: &HistoryFilter) -> Result<Vec<Session>> {
        self.backend().list(filter).await
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Session>> {
        self.backend().get(id).await
    }

    pub async fn update(&self, id: Uuid, patch: &SessionPatch) -> Result<Session> {
        let session = self.backend().update(id, patch).await?;
        self.invalidate_stats().await;
        Ok(session)
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.backend().delete(id).await?;
        self.invalidate_stats().await;
        Ok(())
    }

    /// Statistics over the current owner's sessions
    ///
    /// Cached until a write, an identity change or a new local day.
    pub async fn stats(&self) -> Result<Statistics> {
        let owner = self.owner();
        let today = (self.today)();
        let mut cache = self.stats_cache.lock().await;
        if let Some((cached_owner, cached_day, stats)) = cache.as_ref() {
            if *cached_owner == owner && *cached_day == today {
                return Ok(stats.clone());
            }
        }

        let sessions = self.backend().list(&HistoryFilter::all()).await?;
        let stats = Statistics::compute(&sessions, today);
        *cache = Some((owner, today, stats.clone()));
        Ok(stats)
    }

    /// Reconcile local history into the signed-in user's cloud rows
    ///
    /// Fails with `Error::Validation` when nobody is authenticated.
    pub async fn sync_local_to_cloud(&self) -> Result<SyncReport> {
        let user = self.identity.authenticated_user().ok_or_else(|| {
            Error::Validation("sync requires an authenticated identity".to_string())
        })?;

        let cloud = CloudStore::new(self.pool.clone(), user.id);
        let report =
            sync::sync_local_to_cloud(&self.local, &cloud, self.chunk_size, (self.today)()).await?;
        self.invalidate_stats().await;

        self.emit(MwlEvent::SyncCompleted {
            user_id: report.user_id.clone(),
            inserted: report.inserted,
            conflicts: report.conflicts.len(),
            timestamp: report.synced_at,
        });
        Ok(report)
    }

    /// Watch identity changes and sync on account conversion
    pub fn spawn_identity_watcher(self: Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.identity.subscribe();
        tokio::spawn(async move {
            let mut before = rx.borrow_and_update().clone();
            while rx.changed().await.is_ok() {
                let after = rx.borrow_and_update().clone();
                self.invalidate_stats().await;

                if is_conversion(before.as_ref(), after.as_ref()) {
                    info!("Identity converted; syncing local history");
                    if let Err(e) = self.sync_local_to_cloud().await {
                        error!("Sync after identity conversion failed: {}", e);
                    }
                }
                before = after;
            }
            debug!("Identity watcher stopped");
        })
    }
}
