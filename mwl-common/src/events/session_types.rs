//! Session-related type definitions
//!
//! Supporting types for session phase and audio status carried by events.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a guided session
///
/// Idle, Completed and Stopped are terminal for a given session id; a new
/// `start()` always mints a new id.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    #[default]
    Idle,
    Active,
    Paused,
    Completed,
    Stopped,
}

impl SessionPhase {
    /// Phases from which `start()` is accepted
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionPhase::Idle | SessionPhase::Completed | SessionPhase::Stopped
        )
    }

    /// Phases holding a live (unfinalized) session
    pub fn is_running(&self) -> bool {
        matches!(self, SessionPhase::Active | SessionPhase::Paused)
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Active => write!(f, "active"),
            SessionPhase::Paused => write!(f, "paused"),
            SessionPhase::Completed => write!(f, "completed"),
            SessionPhase::Stopped => write!(f, "stopped"),
        }
    }
}

/// Observable audio sub-state
///
/// Errors are mirrored here rather than thrown, so a UI that never awaited an
/// audio call can still show what went wrong.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AudioStatus {
    /// False when no output capability exists (visual-only mode)
    pub supported: bool,
    pub loading: bool,
    pub playing: bool,
    pub muted: bool,
    pub error: Option<String>,
    /// Playback position in the guidance track (seconds)
    pub current_time: f64,
    /// Guidance track length (seconds), 0 when nothing is loaded
    pub duration: f64,
    pub volume: f32,
}
