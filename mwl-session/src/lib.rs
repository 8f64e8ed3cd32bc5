//! # Mindwell Session Engine (mwl-session)
//!
//! Runs guided meditation sessions: a pause-aware clock, timestamped
//! instruction cues, a faded guidance track with a completion chime, and
//! hand-off of finished sessions to the history store.
//!
//! **Architecture:** one runner task owns the session state machine; audio
//! renders through an `AudioOutput` (cpal device, virtual, or none); control
//! and events are exposed over HTTP/SSE.

pub mod api;
pub mod audio;
pub mod catalog;
pub mod clock;
pub mod scheduler;
pub mod session;

pub use catalog::{InMemoryCatalog, ScriptCatalog};
pub use clock::{SessionClock, TimeSource};
pub use mwl_common::{Error, Result};
pub use scheduler::{CueEvent, InstructionScheduler};
pub use session::{SessionController, SessionHandle, SessionRunner, SessionSnapshot};
