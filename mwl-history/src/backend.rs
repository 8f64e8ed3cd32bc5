//! Storage backend interface
//!
//! Both backends expose the same call shape; the facade picks one from the
//! current identity.

use async_trait::async_trait;
use mwl_common::{Result, Session, SessionPatch};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::filter::HistoryFilter;

/// Which store owns a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Cloud,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Local => write!(f, "local"),
            BackendKind::Cloud => write!(f, "cloud"),
        }
    }
}

/// Session history persistence
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Insert a finished session; saving the same id again replaces it
    async fn save(&self, session: &Session) -> Result<()>;

    /// Sessions matching `filter`, newest first
    async fn list(&self, filter: &HistoryFilter) -> Result<Vec<Session>>;

    async fn get(&self, id: Uuid) -> Result<Option<Session>>;

    /// Apply a partial update; unknown ids fail with `Error::NotFound`
    async fn update(&self, id: Uuid, patch: &SessionPatch) -> Result<Session>;

    /// Remove a record; unknown ids fail with `Error::NotFound`
    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Sort newest first, ties broken by id for a stable order
pub(crate) fn sort_newest_first(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| a.id.cmp(&b.id))
    });
}
