//! Event types for the Mindwell event system
//!
//! Provides shared event definitions and the EventBus used by the session
//! runner, the history store and the SSE endpoint.

mod session_types;

pub use session_types::{AudioStatus, SessionPhase};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{CueType, Session};

/// Mindwell event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MwlEvent {
    /// A new session id was minted and the clock armed
    SessionStarted {
        session_id: Uuid,
        script_id: String,
        duration: u32,
        timestamp: DateTime<Utc>,
    },

    /// Phase transition (Active ⇄ Paused, → Completed, → Stopped)
    SessionStateChanged {
        session_id: Uuid,
        old_phase: SessionPhase,
        new_phase: SessionPhase,
        timestamp: DateTime<Utc>,
    },

    /// Emitted once per tick while Active
    ///
    /// Not persisted; only transmitted via SSE.
    SessionProgress {
        session_id: Uuid,
        elapsed: u32,
        remaining: u32,
        progress: f64,
        timestamp: DateTime<Utc>,
    },

    /// An instruction was crossed; fires exactly once per instruction
    CueFired {
        session_id: Uuid,
        index: usize,
        at: u32,
        text: String,
        cue_type: CueType,
        timestamp: DateTime<Utc>,
    },

    /// The current cue's display window ran out
    CueCleared {
        session_id: Uuid,
        index: usize,
        timestamp: DateTime<Utc>,
    },

    /// Elapsed reached the script duration
    SessionCompleted {
        session: Session,
        timestamp: DateTime<Utc>,
    },

    /// Session aborted before reaching the script duration
    SessionStopped {
        session: Session,
        timestamp: DateTime<Utc>,
    },

    /// Finished session written to the history store
    SessionSaved {
        session_id: Uuid,
        /// "local" or "cloud"
        backend: String,
        timestamp: DateTime<Utc>,
    },

    /// Finished session could not be written; retained for retry
    SessionPersistFailed {
        session_id: Uuid,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Audio sub-state changed (load, play, mute, error)
    AudioStatusChanged {
        status: AudioStatus,
        timestamp: DateTime<Utc>,
    },

    /// Completion chime scheduled
    ChimePlayed {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Local history reconciled into the cloud store
    SyncCompleted {
        user_id: String,
        inserted: usize,
        conflicts: usize,
        timestamp: DateTime<Utc>,
    },
}

impl MwlEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            MwlEvent::SessionStarted { .. } => "SessionStarted",
            MwlEvent::SessionStateChanged { .. } => "SessionStateChanged",
            MwlEvent::SessionProgress { .. } => "SessionProgress",
            MwlEvent::CueFired { .. } => "CueFired",
            MwlEvent::CueCleared { .. } => "CueCleared",
            MwlEvent::SessionCompleted { .. } => "SessionCompleted",
            MwlEvent::SessionStopped { .. } => "SessionStopped",
            MwlEvent::SessionSaved { .. } => "SessionSaved",
            MwlEvent::SessionPersistFailed { .. } => "SessionPersistFailed",
            MwlEvent::AudioStatusChanged { .. } => "AudioStatusChanged",
            MwlEvent::ChimePlayed { .. } => "ChimePlayed",
            MwlEvent::SyncCompleted { .. } => "SyncCompleted",
        }
    }
}

/// Broadcast bus shared by all components
///
/// Late subscribers only see events emitted after they subscribed.
pub struct EventBus {
    tx: broadcast::Sender<MwlEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MwlEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: MwlEvent) -> Result<usize, broadcast::error::SendError<MwlEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MwlEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eventbus_subscribe_and_emit() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let session_id = Uuid::new_v4();
        bus.emit(MwlEvent::SessionStateChanged {
            session_id,
            old_phase: SessionPhase::Active,
            new_phase: SessionPhase::Paused,
            timestamp: Utc::now(),
        })
        .expect("emit should succeed");

        match rx.try_recv().expect("Should receive event") {
            MwlEvent::SessionStateChanged { new_phase, .. } => {
                assert_eq!(new_phase, SessionPhase::Paused)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(2);
        let event = MwlEvent::ChimePlayed {
            session_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
        assert_eq!(bus.capacity(), 2);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = MwlEvent::CueFired {
            session_id: Uuid::new_v4(),
            index: 1,
            at: 30,
            text: "breathe".to_string(),
            cue_type: CueType::Breathing,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"CueFired\""));
        assert!(json.contains("\"cue_type\":\"breathing\""));
        assert_eq!(event.event_type(), "CueFired");
    }

    #[test]
    fn test_phase_helpers() {
        assert!(SessionPhase::Idle.can_start());
        assert!(SessionPhase::Completed.can_start());
        assert!(SessionPhase::Stopped.can_start());
        assert!(!SessionPhase::Active.can_start());
        assert!(SessionPhase::Paused.is_running());
        assert!(!SessionPhase::Completed.is_running());
        assert_eq!(SessionPhase::default(), SessionPhase::Idle);
    }
}
