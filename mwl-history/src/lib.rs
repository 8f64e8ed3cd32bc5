//! # Mindwell History Store
//!
//! Persistence for finished sessions across two interchangeable backends:
//! - Local store: one JSON record on the device, used while the identity is
//!   anonymous (or absent)
//! - Cloud store: SQL tables keyed by (session id, owner id), used once the
//!   identity is authenticated
//!
//! The `HistoryStore` facade picks the backend from the current identity,
//! derives statistics, and reconciles local history into the cloud when an
//! anonymous identity converts to a permanent account.

pub mod backend;
pub mod cloud;
pub mod db;
pub mod filter;
pub mod identity;
pub mod local;
pub mod stats;
pub mod store;
pub mod sync;

pub use backend::{BackendKind, HistoryBackend};
pub use cloud::CloudStore;
pub use filter::HistoryFilter;
pub use identity::{IdentityHandle, IdentityProvider, User};
pub use local::{LocalRecord, LocalStore};
pub use stats::{ScriptCount, Statistics};
pub use store::HistoryStore;
pub use sync::{SyncReport, DEFAULT_SYNC_CHUNK_SIZE};

pub use mwl_common::{Error, Result};
